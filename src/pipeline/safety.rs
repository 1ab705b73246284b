//! Pattern screening of the raw user message. No model involved.

use regex::Regex;
use std::sync::LazyLock;

/// Which rule blocked a message. The message itself is never logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyFinding {
    Forbidden(&'static str),
    Pii(&'static str),
}

struct Rule {
    name: &'static str,
    regex: Regex,
}

/// Patterns are compile-time constants; `test_built_in_rules_compile` forces them.
fn rules(patterns: &[(&'static str, &str)]) -> Vec<Rule> {
    patterns
        .iter()
        .map(|&(name, pattern)| Rule {
            name,
            regex: Regex::new(pattern).expect("invalid built-in safety pattern"),
        })
        .collect()
}

static FORBIDDEN: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        ("jailbreak", r"(?i)jailbreak"),
        (
            "instruction_override",
            r"(?i)(?:ignore|disregard|forget)\s+(?:all\s+)?(?:the\s+|your\s+)?(?:previous|prior|above|earlier)\s+instructions",
        ),
        ("rules_override", r"(?i)override.*rules"),
        ("policy_bypass", r"(?i)bypass.*(?:policy|policies|filter|safeguard)"),
        ("illegal", r"(?i)\billegal"),
        ("hacking", r"(?i)\bhack(?:s|ed|er|ers|ing)?\b"),
        ("crime", r"(?i)commit.*crime"),
        ("sexual", r"(?i)\bsexual"),
        ("self_harm", r"(?i)self[- ]?harm"),
    ])
});

static PII: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    rules(&[
        ("card_number", r"\b\d{11,16}\b"),
        ("national_id", r"\b[0-9]{2}-[0-9]{6}-[0-9]\b"),
        ("email", r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b"),
    ])
});

fn first_match(rules: &[Rule], text: &str) -> Option<&'static str> {
    rules
        .iter()
        .find(|rule| rule.regex.is_match(text))
        .map(|rule| rule.name)
}

pub fn check_forbidden(message: &str) -> Option<&'static str> {
    first_match(&FORBIDDEN, message)
}

pub fn check_pii(message: &str) -> Option<&'static str> {
    first_match(&PII, message)
}

/// Forbidden topics first, then personal data.
pub fn screen(message: &str) -> Option<SafetyFinding> {
    check_forbidden(message)
        .map(SafetyFinding::Forbidden)
        .or_else(|| check_pii(message).map(SafetyFinding::Pii))
}
