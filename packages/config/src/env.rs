// ABOUTME: Environment variable parsing utilities
// ABOUTME: Typed lookups with defaults, validation, fallbacks, and command-line splitting

use std::str::FromStr;

/// Read a variable, treating unset and blank values the same way
pub fn env_string(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parse an environment variable with a fallback default value
/// Returns the parsed value or the default if the variable is not set or cannot be parsed
pub fn parse_env_or_default<T>(var_name: &str, default: T) -> T
where
    T: FromStr,
{
    env_string(var_name)
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// Parse an environment variable with validation
/// Logs a warning and returns the default when the value is unparseable or rejected
pub fn parse_env_or_default_with_validation<T, F>(var_name: &str, default: T, validator: F) -> T
where
    T: FromStr + Copy + std::fmt::Display,
    F: Fn(T) -> bool,
{
    let Some(raw_value) = env_string(var_name) else {
        return default;
    };

    match raw_value.parse::<T>() {
        Ok(parsed) if validator(parsed) => parsed,
        Ok(_) => {
            tracing::warn!(
                "Environment variable {} has invalid value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
        Err(_) => {
            tracing::warn!(
                "Environment variable {} has unparseable value '{}', using default: {}",
                var_name,
                raw_value,
                default
            );
            default
        }
    }
}

/// Read a string variable, trying the primary name first, then the fallback, then the default
pub fn string_with_fallback(primary_var: &str, fallback_var: &str, default: &str) -> String {
    env_string(primary_var)
        .or_else(|| env_string(fallback_var))
        .unwrap_or_else(|| default.to_string())
}

/// Split a command line like `npm run dev -- --host` into program and arguments.
///
/// Whitespace separated; no quoting rules. Returns `None` for a blank string.
pub fn split_command(line: &str) -> Option<(String, Vec<String>)> {
    let mut parts = line.split_whitespace().map(str::to_string);
    let program = parts.next()?;
    Some((program, parts.collect()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_parse_env_or_default_not_set() {
        std::env::remove_var("SHIPYARD_TEST_NOT_SET");
        let result: u64 = parse_env_or_default("SHIPYARD_TEST_NOT_SET", 42);
        assert_eq!(result, 42);
    }

    #[test]
    #[serial]
    fn test_parse_env_or_default_blank_is_unset() {
        std::env::set_var("SHIPYARD_TEST_BLANK", "   ");
        let result: u64 = parse_env_or_default("SHIPYARD_TEST_BLANK", 7);
        assert_eq!(result, 7);
        std::env::remove_var("SHIPYARD_TEST_BLANK");
    }

    #[test]
    #[serial]
    fn test_parse_env_with_validation() {
        std::env::set_var("SHIPYARD_TEST_VALIDATION", "150");
        let accepted =
            parse_env_or_default_with_validation("SHIPYARD_TEST_VALIDATION", 100, |v| v <= 200);
        assert_eq!(accepted, 150);

        let rejected =
            parse_env_or_default_with_validation("SHIPYARD_TEST_VALIDATION", 100, |v| v <= 120);
        assert_eq!(rejected, 100);

        std::env::set_var("SHIPYARD_TEST_VALIDATION", "lots");
        let unparseable =
            parse_env_or_default_with_validation("SHIPYARD_TEST_VALIDATION", 100, |_| true);
        assert_eq!(unparseable, 100);
        std::env::remove_var("SHIPYARD_TEST_VALIDATION");
    }

    #[test]
    #[serial]
    fn test_string_with_fallback() {
        std::env::remove_var("SHIPYARD_TEST_PRIMARY");
        std::env::set_var("SHIPYARD_TEST_FALLBACK", "from-fallback");
        assert_eq!(
            string_with_fallback("SHIPYARD_TEST_PRIMARY", "SHIPYARD_TEST_FALLBACK", "default"),
            "from-fallback"
        );

        std::env::set_var("SHIPYARD_TEST_PRIMARY", "from-primary");
        assert_eq!(
            string_with_fallback("SHIPYARD_TEST_PRIMARY", "SHIPYARD_TEST_FALLBACK", "default"),
            "from-primary"
        );

        std::env::remove_var("SHIPYARD_TEST_PRIMARY");
        std::env::remove_var("SHIPYARD_TEST_FALLBACK");
        assert_eq!(
            string_with_fallback("SHIPYARD_TEST_PRIMARY", "SHIPYARD_TEST_FALLBACK", "default"),
            "default"
        );
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            split_command("npm run dev -- --host 0.0.0.0"),
            Some((
                "npm".to_string(),
                vec!["run", "dev", "--", "--host", "0.0.0.0"]
                    .into_iter()
                    .map(String::from)
                    .collect()
            ))
        );
        assert_eq!(split_command("npm"), Some(("npm".to_string(), vec![])));
        assert_eq!(split_command("   "), None);
    }
}
