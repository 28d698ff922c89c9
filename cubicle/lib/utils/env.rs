use std::{env, path::PathBuf, str::FromStr};

use crate::{CubicleError, CubicleResult};

use super::default_cubicle_home;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Environment variable that overrides where cubicle keeps its state.
pub const CUBICLE_HOME_ENV_VAR: &str = "CUBICLE_HOME";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Returns the cubicle home directory, honouring `CUBICLE_HOME`.
pub fn get_cubicle_home_path() -> PathBuf {
    match env::var(CUBICLE_HOME_ENV_VAR) {
        Ok(home) if !home.trim().is_empty() => PathBuf::from(home),
        _ => default_cubicle_home(),
    }
}

/// Reads a non-empty environment variable.
pub fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Reads and parses an environment variable, returning `None` when it is unset or empty.
pub fn env_parse<T>(key: &str) -> CubicleResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env_string(key) {
        Some(value) => value.trim().parse().map(Some).map_err(|e: T::Err| {
            CubicleError::InvalidConfig(format!("{key}={value:?} is not valid: {e}"))
        }),
        None => Ok(None),
    }
}

/// Reads a comma separated environment variable into its trimmed, non-empty items.
pub fn env_list(key: &str) -> Vec<String> {
    env_string(key)
        .map(|v| split_list(&v))
        .unwrap_or_default()
}

/// Splits a comma separated list into its trimmed, non-empty items.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" /a/b.qcow2, ,/c/d.qcow2 ,"),
            vec!["/a/b.qcow2".to_string(), "/c/d.qcow2".to_string()]
        );
        assert!(split_list("").is_empty());
    }

    #[test]
    fn test_env_parse_reports_key() {
        // Only this test touches this variable.
        env::set_var("CUBICLE_TEST_ENV_PARSE", "not-a-number");
        let err = env_parse::<u16>("CUBICLE_TEST_ENV_PARSE").unwrap_err();
        assert!(err.to_string().contains("CUBICLE_TEST_ENV_PARSE"));

        env::set_var("CUBICLE_TEST_ENV_PARSE", " 42 ");
        assert_eq!(env_parse::<u16>("CUBICLE_TEST_ENV_PARSE").unwrap(), Some(42));

        env::remove_var("CUBICLE_TEST_ENV_PARSE");
        assert_eq!(env_parse::<u16>("CUBICLE_TEST_ENV_PARSE").unwrap(), None);
    }
}
