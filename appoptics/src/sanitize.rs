//! Metric name sanitizers.

use std::fmt;
use std::sync::{Arc, LazyLock};

use regex::Regex;

/// Longest metric name the API accepts.
pub const MAX_METRIC_NAME_LENGTH: usize = 255;

static DISALLOWED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^A-Za-z0-9.:_\-]+").expect("static metric name pattern is valid")
});

/// Replaces each run of characters outside `[A-Za-z0-9.:_-]` with `-` and
/// truncates the result to 255 characters.
pub fn sanitize_metric_name(name: &str) -> String {
    let replaced = DISALLOWED.replace_all(name, "-");
    replaced.chars().take(MAX_METRIC_NAME_LENGTH).collect()
}

/// Returns the name unchanged, so the API reports invalid names itself.
pub fn sanitize_no_op(name: &str) -> String {
    name.to_string()
}

/// A pluggable metric name transformation.
#[derive(Clone)]
pub struct Sanitizer(Arc<dyn Fn(&str) -> String + Send + Sync>);

impl Sanitizer {
    /// Leaves names untouched (default).
    pub fn no_op() -> Self {
        Self(Arc::new(sanitize_no_op))
    }

    /// Rewrites names into the character set the API accepts.
    pub fn metric_name() -> Self {
        Self(Arc::new(sanitize_metric_name))
    }

    /// Wraps a custom function.
    pub fn custom(f: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    /// Applies the sanitizer.
    pub fn apply(&self, name: &str) -> String {
        (self.0)(name)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::no_op()
    }
}

impl fmt::Debug for Sanitizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Sanitizer(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_name_untouched() {
        assert_eq!(sanitize_metric_name("cpu.user_time:1-a"), "cpu.user_time:1-a");
    }

    #[test]
    fn test_runs_collapse_to_single_dash() {
        assert_eq!(
            sanitize_metric_name(r"I AM #*@#@983221 CRazy((\\\\] invalid"),
            "I-AM-983221-CRazy-invalid"
        );
        assert_eq!(sanitize_metric_name("a[b]c"), "a-b-c");
    }

    #[test]
    fn test_truncates_long_names() {
        let long = "a".repeat(300);
        assert_eq!(sanitize_metric_name(&long).len(), MAX_METRIC_NAME_LENGTH);
    }

    #[test]
    fn test_sanitizer_variants() {
        assert_eq!(Sanitizer::default().apply("a b"), "a b");
        assert_eq!(Sanitizer::metric_name().apply("a b"), "a-b");
        assert_eq!(Sanitizer::custom(|n| n.to_uppercase()).apply("cpu"), "CPU");
    }
}
