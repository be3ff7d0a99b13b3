//! Router rule evaluation.
//!
//! The grammar is one predicate per rule. The only matcher so far is
//! ``Host(`value`)``: it compares the request host (any `:port` suffix
//! stripped) case-insensitively against the backtick-quoted argument.
//! Anything else is rejected explicitly so future grammar growth cannot be
//! masked by accept-and-ignore behavior.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuleError {
    #[error("invalid rule: {0}")]
    Invalid(String),
    #[error("unsupported matcher: {0}")]
    UnsupportedMatcher(String),
}

/// Evaluate `rule` against the request host.
pub fn evaluate(rule: &str, host: &str) -> Result<bool, RuleError> {
    let rule = rule.trim();

    let Some(open) = rule.find('(') else {
        return Err(RuleError::Invalid(rule.to_string()));
    };

    match &rule[..open] {
        "Host" => Ok(host_matches(rule, host)),
        name => Err(RuleError::UnsupportedMatcher(name.to_string())),
    }
}

fn host_matches(rule: &str, host: &str) -> bool {
    let expected = extract_argument(rule);
    if expected.is_empty() {
        return false;
    }

    let host = host.split(':').next().unwrap_or(host);
    host.eq_ignore_ascii_case(expected)
}

/// The argument sits between backticks: ``Host(`example.com`)``. Malformed
/// quoting yields an empty argument, which never matches.
fn extract_argument(rule: &str) -> &str {
    let (Some(start), Some(end)) = (rule.find("(`"), rule.find("`)")) else {
        return "";
    };
    if end <= start + 2 {
        return "";
    }
    &rule[start + 2..end]
}
