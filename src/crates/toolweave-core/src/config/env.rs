//! Environment variable loading utilities

use crate::error::{AgentError, Result};
use std::env;
use std::str::FromStr;

/// Load an environment variable as a string
///
/// # Returns
///
/// * `Ok(Some(value))` if the variable exists
/// * `Ok(None)` if it does not
/// * `Err` if it exists but is not valid UTF-8
pub fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(AgentError::Configuration(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

/// Load and parse an environment variable
///
/// ```rust,ignore
/// let workers: Option<usize> = get_env_parse("TOOLWEAVE_MAX_WORKERS")?;
/// ```
pub fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                AgentError::Configuration(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

/// Load a boolean environment variable
///
/// Recognizes "true", "1", "yes", "on" as true and "false", "0", "no",
/// "off" as false (case-insensitive). Anything else is an error.
pub fn get_env_bool(key: &str) -> Result<Option<bool>> {
    match get_env(key)? {
        Some(val) => {
            let result = match val.trim().to_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => true,
                "false" | "0" | "no" | "off" => false,
                _ => {
                    return Err(AgentError::Configuration(format!(
                        "Invalid boolean value for {}: {}",
                        key, val
                    )))
                }
            };
            Ok(Some(result))
        }
        None => Ok(None),
    }
}

/// Build a prefixed environment variable name
///
/// ```rust,ignore
/// assert_eq!(build_env_key("TOOLWEAVE_", "save_dir"), "TOOLWEAVE_SAVE_DIR");
/// ```
pub fn build_env_key(prefix: &str, name: &str) -> String {
    format!("{}{}", prefix, name.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_missing() {
        assert_eq!(get_env("TOOLWEAVE_TEST_ENV_DEFINITELY_MISSING").unwrap(), None);
    }

    #[test]
    fn test_get_env_parse() {
        env::set_var("TOOLWEAVE_TEST_ENV_PARSE", " 12 ");
        let n: Option<usize> = get_env_parse("TOOLWEAVE_TEST_ENV_PARSE").unwrap();
        assert_eq!(n, Some(12));

        env::set_var("TOOLWEAVE_TEST_ENV_PARSE_BAD", "twelve");
        let bad: Result<Option<usize>> = get_env_parse("TOOLWEAVE_TEST_ENV_PARSE_BAD");
        assert!(matches!(bad, Err(AgentError::Configuration(_))));
    }

    #[test]
    fn test_get_env_bool() {
        for (raw, expected) in [("YES", true), ("on", true), ("0", false), ("Off", false)] {
            env::set_var("TOOLWEAVE_TEST_ENV_BOOL", raw);
            assert_eq!(get_env_bool("TOOLWEAVE_TEST_ENV_BOOL").unwrap(), Some(expected));
        }
        env::set_var("TOOLWEAVE_TEST_ENV_BOOL_BAD", "maybe");
        assert!(get_env_bool("TOOLWEAVE_TEST_ENV_BOOL_BAD").is_err());
    }

    #[test]
    fn test_build_env_key() {
        assert_eq!(build_env_key("TOOLWEAVE_", "max_workers"), "TOOLWEAVE_MAX_WORKERS");
    }
}
