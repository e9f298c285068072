//! Command allow-list (§4.1) — the only line of defense against
//! arbitrary subprocess execution. A compile-time constant, never
//! mutated by a running pipeline.

/// Lowercase names of local utilities a `command` stage may spawn.
const ALLOWED_COMMANDS: &[&str] = &[
    "jq", "grep", "sed", "awk", "sort", "uniq", "cut", "wc", "head", "tail", "tr", "date", "bc",
    "paste", "shuf", "join", "sleep",
];

/// Returns whether `name` may be spawned as a subprocess.
pub fn contains(name: &str) -> bool {
    ALLOWED_COMMANDS.contains(&name)
}

/// The allow-list in a stable, deterministic order.
pub fn list() -> Vec<&'static str> {
    ALLOWED_COMMANDS.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jq_is_allowed() {
        assert!(contains("jq"));
    }

    #[test]
    fn rm_is_not_allowed() {
        assert!(!contains("rm"));
        assert!(!contains("bash"));
        assert!(!contains("sh"));
    }

    #[test]
    fn list_is_stable_and_matches_spec() {
        let names = list();
        assert_eq!(names.len(), 17);
        assert_eq!(names, ALLOWED_COMMANDS);
    }

    #[test]
    fn case_sensitive_lowercase_only() {
        assert!(!contains("JQ"));
        assert!(!contains("Jq"));
    }
}
