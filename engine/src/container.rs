//! Container strategy: run a guest in a separate, hardened OS process.
//!
//! Used for every non-host language, and as defense-in-depth for the host
//! language on especially untrusted input. The argv shape built here *is*
//! the security policy — every flag is mandatory, never conditional.

use std::process::Stdio;
use std::time::Duration;

use crucible_config::ContainerConfig;
use crucible_core::{EngineError, EnvPolicy};
use crucible_types::{ExecutionResult, Language};
use serde_json::Value;
use tokio::io::AsyncReadExt;

use crate::process::{ChildGuard, set_new_session, try_kill_process_group, try_terminate_process_group};

struct ContainerPlan {
    image: String,
    command_prefix: Vec<String>,
}

fn plan_for(language: Language, config: &ContainerConfig) -> ContainerPlan {
    let (key, default_image, default_prefix): (&str, &str, &[&str]) = match language {
        Language::Rhai => ("rhai", "rhai:latest", &["rhai"]),
        Language::Python => ("python", "python:3.12-slim", &["python3", "-c"]),
        Language::JavaScript => ("javascript", "node:22-slim", &["node", "-e"]),
        Language::TypeScript => ("typescript", "node:22-slim", &["npx", "-y", "ts-node", "-e"]),
    };
    ContainerPlan {
        image: config.image_for(key, default_image).to_string(),
        command_prefix: default_prefix.iter().map(ToString::to_string).collect(),
    }
}

fn build_argv(plan: &ContainerPlan, config: &ContainerConfig, code: &str) -> Vec<String> {
    let mem = format!("{}m", config.memory_mb);
    let mut argv = vec![
        "run".to_string(),
        "--rm".to_string(),
        "--network=none".to_string(),
        format!("--memory={mem}"),
        format!("--memory-swap={mem}"),
        format!("--cpu-quota={}", config.cpu_quota_micros),
        format!("--pids-limit={}", config.pids_limit),
        "--read-only".to_string(),
        "--tmpfs=/tmp:rw,noexec,nosuid,size=32m".to_string(),
        "--security-opt=no-new-privileges".to_string(),
        "--cap-drop=ALL".to_string(),
        plan.image.clone(),
    ];
    argv.extend(plan.command_prefix.iter().cloned());
    argv.push(code.to_string());
    argv
}

fn parse_stdout(bytes: &[u8]) -> Value {
    let text = String::from_utf8_lossy(bytes).into_owned();
    if text.starts_with('{') || text.starts_with('[') {
        if let Ok(v) = serde_json::from_str::<Value>(&text) {
            return v;
        }
    }
    Value::String(text.trim().to_string())
}

async fn read_to_end(mut reader: impl tokio::io::AsyncRead + Unpin) -> Vec<u8> {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    buf
}

/// Redact host secrets from captured stderr before it becomes `logs` or an
/// error message. A crashed interpreter can echo back pieces of its own
/// environment; `EnvPolicy` already trims what the container *sees*, but
/// this is the last stop before diagnostics leave the engine entirely.
fn sanitize_captured(bytes: &[u8]) -> Vec<u8> {
    crucible_utils::sanitize_stream_error(&String::from_utf8_lossy(bytes)).into_bytes()
}

pub struct ContainerExecutor;

impl ContainerExecutor {
    #[must_use]
    pub fn supports(_language: Language) -> bool {
        true
    }

    pub async fn execute(
        code: &str,
        language: Language,
        config: &ContainerConfig,
    ) -> Result<ExecutionResult, EngineError> {
        if code.trim().is_empty() {
            return Err(EngineError::invalid_argument("code must not be empty"));
        }

        let plan = plan_for(language, config);
        let argv = build_argv(&plan, config, code);

        let env_policy = EnvPolicy::default_policy();
        let host_env: Vec<(String, String)> = std::env::vars().collect();
        let safe_env = env_policy.filter(&host_env);

        let mut cmd = tokio::process::Command::new("docker");
        cmd.args(&argv);
        cmd.env_clear();
        for (k, v) in &safe_env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        #[cfg(unix)]
        set_new_session(&mut cmd);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                return Ok(ExecutionResult::failure(format!("Docker error: {e}"), Vec::new()));
            }
        };
        let pid = child.id();
        let stdout = child.stdout.take().expect("stdout piped");
        let stderr = child.stderr.take().expect("stderr piped");
        let stdout_task = tokio::spawn(read_to_end(stdout));
        let stderr_task = tokio::spawn(read_to_end(stderr));

        let mut guard = ChildGuard::new(child);
        let wait_budget = Duration::from_secs(config.timeout_secs + 1);

        match tokio::time::timeout(wait_budget, guard.child_mut().wait()).await {
            Ok(Ok(status)) => {
                guard.disarm();
                let stdout_bytes = stdout_task.await.unwrap_or_default();
                let stderr_bytes = sanitize_captured(&stderr_task.await.unwrap_or_default());
                if status.success() {
                    let parsed = parse_stdout(&stdout_bytes);
                    Ok(ExecutionResult::success(Some(parsed), stderr_bytes))
                } else {
                    let exit_code = status.code().unwrap_or(-1);
                    let stderr_text = String::from_utf8_lossy(&stderr_bytes);
                    Ok(ExecutionResult::failure(
                        format!("Exit code {exit_code}: {stderr_text}"),
                        stderr_bytes,
                    ))
                }
            }
            Ok(Err(e)) => Ok(ExecutionResult::failure(format!("Docker error: {e}"), Vec::new())),
            Err(_) => {
                if let Some(pid) = pid {
                    #[cfg(unix)]
                    {
                        let _ = try_terminate_process_group(pid);
                        let grace =
                            tokio::time::timeout(Duration::from_secs(1), guard.child_mut().wait()).await;
                        if grace.is_err() {
                            let _ = try_kill_process_group(pid);
                        }
                    }
                    #[cfg(windows)]
                    let _ = try_kill_process_group(pid);
                }
                guard.disarm();
                Ok(ExecutionResult::failure(
                    format!("Docker execution timeout after {} seconds", config.timeout_secs),
                    Vec::new(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_captured_redacts_api_keys() {
        let raw = b"Traceback: auth failed for sk-ant-REDACTED";
        let sanitized = String::from_utf8(sanitize_captured(raw)).unwrap();
        assert!(!sanitized.contains("sk-ant-REDACTED"));
    }

    #[test]
    fn argv_carries_every_mandatory_flag() {
        let config = ContainerConfig::default();
        let plan = plan_for(Language::Python, &config);
        let argv = build_argv(&plan, &config, "print(1)");
        assert!(argv.contains(&"--network=none".to_string()));
        assert!(argv.contains(&"--read-only".to_string()));
        assert!(argv.contains(&"--cap-drop=ALL".to_string()));
        assert!(argv.contains(&"--security-opt=no-new-privileges".to_string()));
        assert!(argv.iter().any(|a| a.starts_with("--memory=")));
        assert!(argv.iter().any(|a| a.starts_with("--cpu-quota=")));
        assert!(argv.iter().any(|a| a.starts_with("--pids-limit=")));
        assert_eq!(argv.last(), Some(&"print(1)".to_string()));
    }

    #[test]
    fn plan_resolves_image_override_from_config() {
        let mut config = ContainerConfig::default();
        config.images.insert("python".to_string(), "custom/python:1".to_string());
        let plan = plan_for(Language::Python, &config);
        assert_eq!(plan.image, "custom/python:1");
    }

    #[test]
    fn parse_stdout_prefers_json_object() {
        assert_eq!(parse_stdout(b"{\"a\":1}"), Value::from(serde_json::json!({"a": 1})));
    }

    #[test]
    fn parse_stdout_prefers_json_array() {
        assert_eq!(parse_stdout(b"[1,2,3]"), Value::from(serde_json::json!([1, 2, 3])));
    }

    #[test]
    fn parse_stdout_falls_back_to_trimmed_string_on_bad_json() {
        assert_eq!(parse_stdout(b"{not json}\n"), Value::String("{not json}".to_string()));
    }

    #[test]
    fn parse_stdout_non_json_prefix_returns_trimmed_string() {
        assert_eq!(parse_stdout(b"HELLO\n"), Value::String("HELLO".to_string()));
    }

    #[tokio::test]
    #[ignore = "requires a docker daemon and network-restricted runtime"]
    async fn python_upper_round_trip() {
        let config = ContainerConfig::default();
        let result = ContainerExecutor::execute("print('hello'.upper())", Language::Python, &config)
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.output, Some(Value::String("HELLO".to_string())));
    }
}
