//! Environment variable parsing with type safety.
//!
//! Parses `GRADE_` variables with validation, error collection, and source
//! tracking.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Empty value where one is required.
    #[error("Empty value for {var}")]
    Empty { var: String },
}

/// Type-safe environment variable parser.
///
/// Collects errors during parsing so all issues can be reported at once.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the GRADE_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "GRADE_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get a string value with default.
    pub fn get_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(value, var_name),
            Err(_) => Sourced::default_value(default.to_string()),
        }
    }

    /// Get a string that must not be empty or whitespace.
    pub fn get_nonempty_string(&mut self, name: &str, default: &str) -> Sourced<String> {
        let value = self.get_string(name, default);
        if value.value.trim().is_empty() {
            let var = self.var_name(name);
            self.errors.push(EnvError::Empty { var });
            return Sourced::default_value(default.to_string());
        }
        value
    }

    /// Get a u64 value with default and range validation.
    pub fn get_u64_range(&mut self, name: &str, default: u64, min: u64, max: u64) -> Sourced<u64> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u64>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(n, var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::from_env(default, var_name)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned 64-bit integer".to_string(),
                        value,
                    });
                    Sourced::default_value(default)
                }
            },
            Err(_) => Sourced::default_value(default),
        }
    }

    /// Get a path value.
    pub fn get_path(&mut self, name: &str, default: &str) -> Sourced<PathBuf> {
        let var_name = self.var_name(name);
        let (value, source) = match env::var(&var_name) {
            Ok(v) if !v.is_empty() => (v, ConfigSource::Environment(var_name)),
            Ok(_) => {
                self.errors.push(EnvError::Empty { var: var_name });
                (default.to_string(), ConfigSource::Default)
            }
            Err(_) => (default.to_string(), ConfigSource::Default),
        };
        Sourced {
            value: PathBuf::from(value),
            source,
        }
    }

    /// Get a whitespace-separated list of words.
    pub fn get_word_list(&mut self, name: &str) -> Sourced<Vec<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => Sourced::from_env(
                value.split_whitespace().map(str::to_string).collect(),
                var_name,
            ),
            Err(_) => Sourced::default_value(Vec::new()),
        }
    }

    /// Get an optional string (None if not set or empty).
    pub fn get_optional_string(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.is_empty() => Sourced::from_env(None, var_name),
            Ok(value) => Sourced::from_env(Some(value), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: env_test_lock serializes every test touching the environment
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(key: &str, value: &str) {
        // SAFETY: env_test_lock serializes every test touching the environment
        unsafe { env::set_var(key, value) };
    }

    #[test]
    fn test_get_u64_range_valid() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_U64"];
        cleanup_env(&vars);

        set_env("GRADE_TEST_U64", "50");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64", 10, 0, 100);
        assert_eq!(result.value, 50);
        assert_eq!(result.source, ConfigSource::Environment("GRADE_TEST_U64".into()));
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_u64_range_out_of_range() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_U64_OOR"];
        cleanup_env(&vars);

        set_env("GRADE_TEST_U64_OOR", "200");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64_OOR", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(matches!(parser.errors()[0], EnvError::OutOfRange { .. }));

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_u64_range_garbage() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_U64_BAD"];
        cleanup_env(&vars);

        set_env("GRADE_TEST_U64_BAD", "thirty");
        let mut parser = EnvParser::new();
        let result = parser.get_u64_range("TEST_U64_BAD", 10, 0, 100);
        assert_eq!(result.value, 10);
        assert!(result.is_default());
        assert!(matches!(parser.take_errors()[0], EnvError::InvalidValue { .. }));
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_word_list() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_WORDS"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        assert!(parser.get_word_list("TEST_WORDS").value.is_empty());

        set_env("GRADE_TEST_WORDS", "  -s   CPUS=1 ");
        let words = parser.get_word_list("TEST_WORDS");
        assert_eq!(words.value, vec!["-s".to_string(), "CPUS=1".to_string()]);

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_nonempty_string_rejects_blank() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_PROG"];
        cleanup_env(&vars);

        set_env("GRADE_TEST_PROG", "   ");
        let mut parser = EnvParser::new();
        let result = parser.get_nonempty_string("TEST_PROG", "make");
        assert_eq!(result.value, "make");
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_get_optional_string() {
        let _guard = env_test_lock();
        let vars = ["GRADE_TEST_OPT"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        assert_eq!(parser.get_optional_string("TEST_OPT").value, None);
        set_env("GRADE_TEST_OPT", "");
        assert_eq!(parser.get_optional_string("TEST_OPT").value, None);
        set_env("GRADE_TEST_OPT", "grade.log");
        assert_eq!(
            parser.get_optional_string("TEST_OPT").value.as_deref(),
            Some("grade.log")
        );

        cleanup_env(&vars);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn test_env_parser_get_u64_range_never_panics(value in "[-0-9a-zA-Z. ]{0,30}") {
                let _guard = env_test_lock();
                set_env("GRADE_PROP_U64", &value);
                let mut parser = EnvParser::new();
                let result = parser.get_u64_range("PROP_U64", 30, 1, 3600);
                prop_assert!((1..=3600).contains(&result.value));
                cleanup_env(&["GRADE_PROP_U64"]);
            }
        }
    }
}
