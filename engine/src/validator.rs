//! Static, pre-execution rejection of guest source that trips known-dangerous
//! patterns. Necessary but not sufficient: every strategy still sandboxes the
//! guest at runtime regardless of what the validator allows through.

use crucible_types::{Language, ValidationResult};
use regex::Regex;

use crate::EngineError;

/// One denied pattern plus the tag used in the emitted error message.
///
/// `excerpt_group` selects which capture group becomes the `<excerpt>` in
/// `"<tag>: <excerpt>"`; `0` (the whole match) unless the pattern names a
/// narrower group, e.g. the module name inside an `import X` statement.
struct Rule {
    re: Regex,
    tag: &'static str,
    excerpt_group: usize,
}

fn rule(pattern: &str, tag: &'static str) -> Rule {
    Rule {
        re: Regex::new(pattern).expect("validator pattern is a valid regex"),
        tag,
        excerpt_group: 0,
    }
}

/// Like [`rule`], but the emitted excerpt is capture group 1 rather than the
/// whole match — used where the match wraps the dangerous name in syntax
/// (`import os`, `require("fs")`) that would otherwise leak into the message.
fn rule_capturing(pattern: &str, tag: &'static str) -> Rule {
    Rule {
        re: Regex::new(pattern).expect("validator pattern is a valid regex"),
        tag,
        excerpt_group: 1,
    }
}

/// Dangerous callee names for the host language, shared with the sandbox's
/// dangerous-name registration guard.
pub const HOST_DANGEROUS_METHODS: &[&str] = &[
    "eval", "instance_eval", "class_eval", "module_eval", "system", "exec", "spawn", "fork",
    "require", "require_relative", "load", "autoload", "open", "send", "__send__",
    "public_send", "method", "define_method", "const_get", "const_set", "remove_const",
    "instance_variable_get", "instance_variable_set", "class_variable_get", "class_variable_set",
    "binding",
];

pub const HOST_DANGEROUS_CONSTANTS: &[&str] = &["File", "IO", "Dir", "ObjectSpace", "Marshal", "Kernel"];

fn host_rules() -> Vec<Rule> {
    let mut rules: Vec<Rule> = HOST_DANGEROUS_METHODS
        .iter()
        .map(|name| {
            rule(
                &format!(r"(?:^|[^.\w]){}\s*[\(!]", regex::escape(name)),
                "Dangerous method call",
            )
        })
        .collect();
    rules.extend(HOST_DANGEROUS_CONSTANTS.iter().map(|name| {
        rule(
            &format!(r"(?:^|[^.\w]){}(?:::|\b)", regex::escape(name)),
            "Dangerous constant access",
        )
    }));
    rules
}

fn python_rules() -> Vec<Rule> {
    vec![
        rule(r"\beval\s*\(", "Dangerous method call"),
        rule(r"\bexec\s*\(", "Dangerous method call"),
        rule(r"\bcompile\s*\(", "Dangerous method call"),
        rule(r"\b__code__\b", "Dangerous constant access"),
        rule(r"\b__globals__\b", "Dangerous constant access"),
        rule(r"\b__class__\b", "Dangerous constant access"),
        rule(r"\b__bases__\b", "Dangerous constant access"),
        rule(r"\b__subclasses__\b", "Dangerous constant access"),
        rule(r"\b__mro__\b", "Dangerous constant access"),
        rule(r"\b__dict__\b", "Dangerous constant access"),
        rule(r"\bgetattr\s*\(", "Dangerous method call"),
        rule(r"\bsetattr\s*\(", "Dangerous method call"),
        rule(r"\bdelattr\s*\(", "Dangerous method call"),
        rule(r"\bhasattr\s*\(", "Dangerous method call"),
        rule(r"\bos\.", "Dangerous import"),
        rule(r"\bsys\.", "Dangerous import"),
        rule(r"\bsubprocess\.", "Dangerous import"),
        rule(r"\bsocket\.", "Dangerous import"),
        rule(r"\bpickle\.", "Dangerous import"),
        rule(r"\bmarshal\.", "Dangerous import"),
        rule(r"\bimportlib\.", "Dangerous import"),
        rule(r"\bbuiltins\.", "Dangerous import"),
        rule(r"\b__builtins__\b", "Dangerous constant access"),
        rule(r"\bopen\s*\(", "Dangerous method call"),
        rule(r"\binput\s*\(", "Dangerous method call"),
        rule_capturing(r"(?m)^\s*import\s+(os|sys|subprocess|socket|pickle|marshal|importlib|builtins)\b", "Dangerous import"),
        rule_capturing(r"(?m)^\s*from\s+(os|sys|subprocess|socket|pickle|marshal|importlib|builtins)\s+import", "Dangerous import"),
    ]
}

fn javascript_rules() -> Vec<Rule> {
    vec![
        rule(r"\beval\s*\(", "Dangerous method call"),
        rule(r"\bnew\s+Function\s*\(", "Dangerous method call"),
        rule(r"\bprocess\.", "Dangerous import"),
        rule(r"\bglobal\.", "Dangerous import"),
        rule(r"\b__dirname\b", "Dangerous constant access"),
        rule(r"\b__filename\b", "Dangerous constant access"),
        rule_capturing(
            r#"\brequire\s*\(\s*['"](child_process|fs|net|http|https|vm|cluster|worker_threads)['"]\s*\)"#,
            "Dangerous import",
        ),
        rule(r#"\brequire\s*\(\s*[^'"]"#, "Dangerous import"),
        rule_capturing(
            r#"\bimport\b[^;\n]*['"](child_process|fs|net|http|https|vm|cluster|worker_threads)['"]"#,
            "Dangerous import",
        ),
        rule(r"__proto__", "Dangerous constant access"),
        rule(r"constructor\s*\.\s*prototype", "Dangerous constant access"),
        rule(r"\bdocument\.", "Dangerous import"),
        rule(r"\bwindow\.", "Dangerous import"),
        rule(r"\bXMLHttpRequest\b", "Dangerous constant access"),
        rule(r"\bfetch\s*\(", "Dangerous method call"),
    ]
}

fn rules_for(language: Language) -> Vec<Rule> {
    match language {
        Language::Rhai => host_rules(),
        Language::Python => python_rules(),
        Language::JavaScript | Language::TypeScript => javascript_rules(),
    }
}

/// Run the static validator, never raising.
#[must_use]
pub fn validate(code: &str, language: Language) -> ValidationResult {
    let mut result = ValidationResult::ok();
    for rule in rules_for(language) {
        if let Some(caps) = rule.re.captures(code) {
            let excerpt = caps
                .get(rule.excerpt_group)
                .or_else(|| caps.get(0))
                .expect("a match always has group 0")
                .as_str()
                .trim();
            result.push_error(format!("{}: {}", rule.tag, excerpt));
        }
    }
    result
}

/// Run the static validator, raising on the first failing run.
pub fn validate_or_raise(code: &str, language: Language) -> Result<(), EngineError> {
    let result = validate(code, language);
    if result.is_valid() {
        Ok(())
    } else {
        Err(EngineError::validation_failure(result.joined_errors()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_rejects_system_call() {
        let r = validate("system(\"rm -rf /\")", Language::Rhai);
        assert!(!r.is_valid());
        assert!(r.errors[0].starts_with("Dangerous method call"));
    }

    #[test]
    fn host_rejects_dangerous_constant() {
        let r = validate("File.read(\"/etc/passwd\")", Language::Rhai);
        assert!(!r.is_valid());
    }

    #[test]
    fn host_allows_clean_code() {
        let r = validate("let x = 1 + 2;", Language::Rhai);
        assert!(r.is_valid());
    }

    #[test]
    fn python_rejects_eval() {
        let r = validate("eval('1+1')", Language::Python);
        assert!(!r.is_valid());
    }

    #[test]
    fn python_rejects_os_import() {
        let r = validate("import os\nos.system('ls')", Language::Python);
        assert!(!r.is_valid());
    }

    #[test]
    fn python_bare_import_reports_just_the_module_name() {
        let r = validate("import os", Language::Python);
        assert!(!r.is_valid());
        assert!(r.errors[0].contains("Dangerous import: os"));
    }

    #[test]
    fn python_allows_clean_code() {
        let r = validate("x = 1 + 2\nprint(x)", Language::Python);
        assert!(r.is_valid());
    }

    #[test]
    fn javascript_rejects_child_process_require() {
        let r = validate("require('child_process').exec('ls')", Language::JavaScript);
        assert!(!r.is_valid());
    }

    #[test]
    fn javascript_rejects_new_function() {
        let r = validate("new Function('return 1')()", Language::JavaScript);
        assert!(!r.is_valid());
    }

    #[test]
    fn javascript_allows_clean_code() {
        let r = validate("const x = 1 + 2; console.log(x);", Language::JavaScript);
        assert!(r.is_valid());
    }

    #[test]
    fn validate_or_raise_joins_errors_with_semicolons() {
        let err = validate_or_raise("eval('1'); exec('2')", Language::Python).unwrap_err();
        assert!(err.message.contains("; "));
    }

    #[test]
    fn validate_or_raise_ok_for_clean_code() {
        assert!(validate_or_raise("let x = 1;", Language::Rhai).is_ok());
    }
}
