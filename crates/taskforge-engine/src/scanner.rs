//! Keyword scanner — operator-defined patterns applied to every output
//! line of a run.
//!
//! Rules are tested in declaration order and the first match wins per
//! line. A failure hit forces the run's terminal state to failed; a
//! success hit is advisory; an alert hit only drives notification.

use taskforge_core::catalog::{KeywordKind, KeywordRule};

#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub kind: KeywordKind,
    pub pattern: String,
    pub message: String,
    pub line: String,
    /// Cancel the still-running process on this hit.
    pub abort: bool,
}

struct CompiledRule {
    kind: KeywordKind,
    message: String,
    abort_on_hit: bool,
    case_insensitive: bool,
    patterns: Vec<String>,
}

/// Per-job scanner, compiled once per launch.
pub struct KeywordScanner {
    rules: Vec<CompiledRule>,
}

impl KeywordScanner {
    pub fn compile(rules: &[KeywordRule]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|rule| CompiledRule {
                    kind: rule.kind,
                    message: rule.message.clone(),
                    abort_on_hit: rule.abort_on_hit,
                    case_insensitive: rule.case_insensitive,
                    patterns: if rule.case_insensitive {
                        rule.patterns.iter().map(|p| p.to_lowercase()).collect()
                    } else {
                        rule.patterns.clone()
                    },
                })
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First matching rule for this line, if any.
    pub fn scan_line(&self, line: &str) -> Option<KeywordHit> {
        let lowered = if self.rules.iter().any(|r| r.case_insensitive) {
            Some(line.to_lowercase())
        } else {
            None
        };
        for rule in &self.rules {
            let haystack = if rule.case_insensitive {
                lowered.as_deref().unwrap_or(line)
            } else {
                line
            };
            if let Some(pattern) = rule.patterns.iter().find(|p| haystack.contains(p.as_str())) {
                return Some(KeywordHit {
                    kind: rule.kind,
                    pattern: pattern.clone(),
                    message: rule.message.clone(),
                    line: line.to_string(),
                    abort: rule.abort_on_hit && rule.kind == KeywordKind::Failure,
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(kind: KeywordKind, patterns: &[&str]) -> KeywordRule {
        KeywordRule {
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            kind,
            message: format!("{kind:?} matched"),
            case_insensitive: false,
            abort_on_hit: false,
        }
    }

    #[test]
    fn first_match_wins_per_line() {
        let scanner = KeywordScanner::compile(&[
            rule(KeywordKind::Alert, &["disk"]),
            rule(KeywordKind::Failure, &["FATAL"]),
        ]);
        // Both rules match; declaration order decides.
        let hit = scanner.scan_line("FATAL: disk full").unwrap();
        assert_eq!(hit.kind, KeywordKind::Alert);
        assert_eq!(hit.pattern, "disk");
    }

    #[test]
    fn match_is_case_sensitive_by_default() {
        let scanner = KeywordScanner::compile(&[rule(KeywordKind::Failure, &["FATAL"])]);
        assert!(scanner.scan_line("fatal error").is_none());
        assert!(scanner.scan_line("FATAL error").is_some());
    }

    #[test]
    fn case_insensitive_rule() {
        let mut insensitive = rule(KeywordKind::Failure, &["Fatal"]);
        insensitive.case_insensitive = true;
        let scanner = KeywordScanner::compile(&[insensitive]);
        assert!(scanner.scan_line("FATAL error").is_some());
        assert!(scanner.scan_line("totally fine").is_none());
    }

    #[test]
    fn abort_flag_only_applies_to_failure_rules() {
        let mut alert = rule(KeywordKind::Alert, &["warn"]);
        alert.abort_on_hit = true;
        let mut failure = rule(KeywordKind::Failure, &["boom"]);
        failure.abort_on_hit = true;
        let scanner = KeywordScanner::compile(&[alert, failure]);

        assert!(!scanner.scan_line("warn: low").unwrap().abort);
        assert!(scanner.scan_line("boom!").unwrap().abort);
    }
}
