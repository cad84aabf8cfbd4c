//! Environment variable policy for the container strategy.
//!
//! Two stages: an explicit allowlist of variable names that may cross into
//! the guest environment at all, then a case-insensitive denylist of
//! sensitivity patterns, matched as unanchored substrings against the
//! variable name, that strips anything sensitive even if it was allowlisted.

use regex::RegexSet;

/// Names permitted to cross into the container environment, subject to the
/// denylist below.
pub const DEFAULT_ALLOWLIST: &[&str] = &["PATH", "HOME", "USER", "LANG", "LC_ALL", "LC_CTYPE", "TZ", "TERM"];

/// Sensitivity patterns stripped from the environment even if allowlisted by
/// name. Unanchored substring matches, case-insensitive: `AWS_AUTH_TOKEN`
/// matches on `auth` alone, before `token` is even considered.
pub const DEFAULT_DENYLIST: &[&str] = &[
    "api[_-]?key",
    "secret",
    "token",
    "password",
    "credential",
    "auth",
    "private[_-]?key",
    "access[_-]?key",
];

/// Filters a host environment down to what a sandboxed guest may see.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    allowlist: Vec<String>,
    denylist: RegexSet,
}

impl EnvPolicy {
    pub fn new(allowlist: &[String], denylist_patterns: &[String]) -> Result<Self, String> {
        let denylist = RegexSet::new(denylist_patterns.iter().map(|p| format!("(?i){p}")))
            .map_err(|e| format!("invalid env denylist: {e}"))?;
        Ok(Self {
            allowlist: allowlist.to_vec(),
            denylist,
        })
    }

    /// Build the policy from [`DEFAULT_ALLOWLIST`] and [`DEFAULT_DENYLIST`].
    #[must_use]
    pub fn default_policy() -> Self {
        Self::new(
            &DEFAULT_ALLOWLIST.iter().map(ToString::to_string).collect::<Vec<_>>(),
            &DEFAULT_DENYLIST.iter().map(ToString::to_string).collect::<Vec<_>>(),
        )
        .expect("default env policy patterns are valid regexes")
    }

    /// Filter `env` down to the variables a guest may observe.
    #[must_use]
    pub fn filter<'a>(&self, env: &'a [(String, String)]) -> Vec<(&'a str, &'a str)> {
        env.iter()
            .filter(|(k, _)| self.allowlist.iter().any(|a| a == k))
            .filter(|(k, _)| !self.denylist.is_match(k))
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn allowlisted_and_clean_variable_passes() {
        let policy = EnvPolicy::default_policy();
        let binding = env(&[("PATH", "/usr/bin")]);
        let filtered = policy.filter(&binding);
        assert_eq!(filtered, vec![("PATH", "/usr/bin")]);
    }

    #[test]
    fn variable_outside_allowlist_is_dropped() {
        let policy = EnvPolicy::default_policy();
        let binding = env(&[("SHELL", "/bin/bash")]);
        let filtered = policy.filter(&binding);
        assert!(filtered.is_empty());
    }

    #[test]
    fn allowlisted_name_matching_denylist_is_still_dropped() {
        let policy = EnvPolicy::new(
            &["MY_AUTH_COOKIE".to_string()],
            &["auth".to_string()],
        )
        .unwrap();
        let binding = env(&[("MY_AUTH_COOKIE", "xyz")]);
        let filtered = policy.filter(&binding);
        assert!(filtered.is_empty());
    }

    #[test]
    fn denylist_is_case_insensitive() {
        let policy = EnvPolicy::new(
            &["api_key".to_string()],
            &["api[_-]?key".to_string()],
        )
        .unwrap();
        let binding = env(&[("api_key", "secret")]);
        let filtered = policy.filter(&binding);
        assert!(filtered.is_empty());
    }

    #[test]
    fn denylist_matches_as_unanchored_substring() {
        let policy = EnvPolicy::new(
            &["SECRETVALUE".to_string(), "MYTOKENVAR".to_string()],
            &DEFAULT_DENYLIST.iter().map(ToString::to_string).collect::<Vec<_>>(),
        )
        .unwrap();
        let binding = env(&[("SECRETVALUE", "x"), ("MYTOKENVAR", "y")]);
        let filtered = policy.filter(&binding);
        assert!(filtered.is_empty());
    }

    #[test]
    fn default_policy_drops_the_full_spec_pattern_table() {
        let names = [
            "MY_API_KEY",
            "MY_API-KEY",
            "THE_SECRET",
            "AUTH_TOKEN",
            "DB_PASSWORD",
            "AWS_CREDENTIAL",
            "MY_AUTH_COOKIE",
            "PRIVATE_KEY_PATH",
            "ACCESS_KEY_ID",
        ];
        let allowlist: Vec<String> = names.iter().map(ToString::to_string).collect();
        let denylist: Vec<String> = DEFAULT_DENYLIST.iter().map(ToString::to_string).collect();
        let policy = EnvPolicy::new(&allowlist, &denylist).unwrap();
        let pairs: Vec<(&str, &str)> = names.iter().map(|n| (*n, "x")).collect();
        assert!(policy.filter(&env(&pairs)).is_empty());
    }
}
