/// Terms that show up in lectures, papers and textbooks.
pub const ACADEMIC_MARKERS: [&str; 14] = [
    "abstract",
    "introduction",
    "methodology",
    "results",
    "discussion",
    "conclusion",
    "references",
    "bibliography",
    "chapter",
    "section",
    "figure",
    "table",
    "doi",
    "et al.",
];

/// Number of distinct markers present as case-insensitive substrings.
pub fn count_markers(text: &str) -> usize {
    let lower = text.to_lowercase();
    ACADEMIC_MARKERS
        .iter()
        .filter(|marker| lower.contains(*marker))
        .count()
}

pub fn looks_academic(text: &str, threshold: usize) -> bool {
    count_markers(text) >= threshold
}

/// `true` only for a bare "YES" (case and surrounding whitespace ignored).
pub fn parse_yes_no(reply: &str) -> bool {
    reply.trim().eq_ignore_ascii_case("YES")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_distinct_markers_case_insensitively() {
        let text = "ABSTRACT\nIntroduction ... Methodology ... Conclusion. References: Smith et al.";
        assert_eq!(count_markers(text), 6);
        assert!(looks_academic(text, 3));
    }

    #[test]
    fn test_repeated_marker_counts_once() {
        let text = "figure figure figure figure";
        assert_eq!(count_markers(text), 1);
        assert!(!looks_academic(text, 3));
    }

    #[test]
    fn test_shopping_list_is_not_academic() {
        assert!(!looks_academic("milk, eggs, bread, two apples", 3));
    }

    #[test]
    fn test_yes_no_parsing_is_strict() {
        assert!(parse_yes_no("YES"));
        assert!(parse_yes_no("  yes\n"));
        assert!(!parse_yes_no("NO"));
        assert!(!parse_yes_no("Yes."));
        assert!(!parse_yes_no("YES, it is"));
        assert!(!parse_yes_no(""));
    }
}
