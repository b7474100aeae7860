//! Signature tables.
//!
//! Every family is plain `(name, pattern)` data compiled once into a
//! [`PatternSet`] when its owner is constructed. All patterns are matched
//! case-insensitively.

use log::warn;
use regex::{Regex, RegexBuilder};

use crate::error::ConfigError;

pub const SQL_INJECTION_PATTERNS: &[(&str, &str)] = &[
    ("union_select", r"union\s+select"),
    ("select_from", r"select\s+.*\s+from"),
    ("insert_into", r"insert\s+into"),
    ("delete_from", r"delete\s+from"),
    ("update_set", r"update\s+.*\s+set"),
    ("drop_object", r"drop\s+(table|database)"),
    ("exec_call", r"exec\s*\("),
    ("script_scheme", r"script\s*:"),
    ("quoted_tautology", r"'.*'.*=.*'.*'"),
    ("quoted_boolean", r"'\s*(or|and)\s*'"),
    ("numeric_tautology", r"\b(or|and)\s+\d+\s*=\s*\d+"),
    ("stacked_query", r";\s*(drop|delete|insert|update)"),
    ("sql_comment", r"(--(\s|$)|#|/\*.*\*/)"),
];

pub const XSS_PATTERNS: &[(&str, &str)] = &[
    ("script_open", r"<script[^>]*>"),
    ("script_close", r"</script>"),
    ("javascript_scheme", r"javascript:"),
    (
        "event_handler",
        r"\bon(load|unload|error|click|dblclick|mouse\w+|key\w+|focus\w*|blur|change|submit|input|abort|toggle|animation\w+|pointer\w+)\s*=",
    ),
    ("iframe_tag", r"<iframe[^>]*>"),
    ("object_tag", r"<object[^>]*>"),
    ("embed_tag", r"<embed[^>]*>"),
    ("css_expression", r"expression\s*\("),
    ("vbscript_scheme", r"vbscript:"),
    ("link_tag", r"<link[^>]*>"),
];

pub const COMMAND_INJECTION_PATTERNS: &[(&str, &str)] = &[
    ("shell_metachar", r"(;|\||&&|\$\(|`|\$\{)"),
    ("netcat_listener", r"nc\s+.*\s+.*\s+\d+"),
    ("recursive_delete", r"rm\s+-rf"),
    ("wget_fetch", r"wget\s+http"),
    ("curl_fetch", r"curl\s+http"),
    ("chmod_exec", r"chmod\s+\+x"),
    ("unix_shell", r"/bin/(sh|bash|csh|zsh)"),
    ("windows_shell", r"cmd\.exe"),
    ("powershell", r"powershell"),
];

/// Probes matched against the request URL by the attack detector.
pub const PATH_TRAVERSAL_PATTERN: (&str, &str) =
    ("path_traversal", r"(\.\./|\.\.\\|%2e%2e%2f|%2e%2e%5c)");

pub const SENSITIVE_FILE_PATTERNS: &[(&str, &str)] = &[
    ("directory_listing", r"(index\s+of\s+/|directory\s+listing)"),
    ("password_files", r"(passwd|shadow|htpasswd|web\.config)"),
    ("backup_files", r"\.(bak|backup|old|tmp|swp)$"),
    ("config_files", r"\.(conf|config|ini|env)$"),
    ("log_files", r"\.(log|logs)$"),
];

/// User-Agent signatures the attack detector treats as hostile tooling.
pub const SCANNER_AGENT_PATTERNS: &[(&str, &str)] = &[
    ("vulnerability_scan", r"(nmap|nessus|openvas|nikto|dirb|gobuster)"),
    ("automated_tools", r"(bot|crawler|scanner|spider)"),
];

/// User-Agent signatures reported by threat intelligence.
pub const SUSPICIOUS_AGENT_PATTERNS: &[(&str, &str)] = &[
    ("sql_injection_tools", r"(sqlmap|havij|pangolin)"),
    ("commercial_scanners", r"(acunetix|netsparker|appscan)"),
    ("web_scanners", r"(nikto|skipfish|w3af)"),
    ("mass_scanners", r"(masscan|zmap|zgrab)"),
    ("http_libraries", r"(python-requests|curl|wget)"),
];

/// A compiled signature together with the name it is reported under.
#[derive(Debug, Clone)]
pub struct NamedPattern {
    pub name: &'static str,
    pub regex: Regex,
}

impl NamedPattern {
    pub fn compile(name: &'static str, pattern: &str) -> Result<Self, ConfigError> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                name: name.to_string(),
                source,
            })?;
        Ok(Self { name, regex })
    }
}

/// Ordered, immutable list of compiled signatures.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<NamedPattern>,
}

impl PatternSet {
    /// Compile a table, logging and skipping any entry that fails to build.
    pub fn compile(family: &str, table: &[(&'static str, &str)]) -> Self {
        let mut patterns = Vec::with_capacity(table.len());
        for &(name, pattern) in table {
            match NamedPattern::compile(name, pattern) {
                Ok(compiled) => patterns.push(compiled),
                Err(e) => warn!("Skipping {} signature: {}", family, e),
            }
        }
        Self { patterns }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    /// Name of the first pattern matching any of `inputs`.
    pub fn first_match(&self, inputs: &[&str]) -> Option<&'static str> {
        self.patterns
            .iter()
            .find(|p| inputs.iter().any(|input| p.regex.is_match(input)))
            .map(|p| p.name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_tables_compile() {
        for (family, table) in [
            ("sql", SQL_INJECTION_PATTERNS),
            ("xss", XSS_PATTERNS),
            ("cmd", COMMAND_INJECTION_PATTERNS),
            ("sensitive", SENSITIVE_FILE_PATTERNS),
            ("scanner", SCANNER_AGENT_PATTERNS),
            ("agent", SUSPICIOUS_AGENT_PATTERNS),
        ] {
            assert_eq!(PatternSet::compile(family, table).len(), table.len());
        }
    }

    #[test]
    fn test_invalid_entry_is_skipped() {
        let set = PatternSet::compile("test", &[("broken", r"(unclosed"), ("ok", r"abc")]);
        assert_eq!(set.len(), 1);
        assert_eq!(set.first_match(&["xxABCxx"]), Some("ok"));
    }

    #[test]
    fn test_first_match_respects_order() {
        let set = PatternSet::compile("sql", SQL_INJECTION_PATTERNS);
        assert_eq!(
            set.first_match(&["1 UNION SELECT name FROM users"]),
            Some("union_select")
        );
    }

    #[test]
    fn test_sql_comment_ignores_wildcard_accept() {
        let set = PatternSet::compile("sql", SQL_INJECTION_PATTERNS);
        assert_eq!(
            set.first_match(&["text/html,application/xml;q=0.9,*/*;q=0.8"]),
            None
        );
        assert_eq!(set.first_match(&["1 /* hidden */ 2"]), Some("sql_comment"));
    }

    #[test]
    fn test_sql_comment_needs_trailing_space_or_end() {
        let set = PatternSet::compile("sql", SQL_INJECTION_PATTERNS);
        assert_eq!(
            set.first_match(&["multipart/form-data; boundary=----WebKitFormBoundaryx7"]),
            None
        );
        assert_eq!(set.first_match(&["id=1-- "]), Some("sql_comment"));
        assert_eq!(set.first_match(&["id=1--"]), Some("sql_comment"));
    }
}
