//! Environment-driven configuration helpers.
//!
//! Every component config in the workspace follows the same shape:
//! `Default` from [`crate::defaults`], a `from_env()` constructor, and
//! chainable `with_*` builders. The helpers below keep the parsing rules
//! identical everywhere.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Read and parse an environment variable, falling back to `default` when
/// the variable is unset or does not parse.
pub fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Read a boolean flag. `false`/`0`/`no`/`off` disable, anything else enables.
pub fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| {
            let v = v.trim().to_ascii_lowercase();
            !(v == "false" || v == "0" || v == "no" || v == "off")
        })
        .unwrap_or(default)
}

/// Read an optional limit where `0` means "disabled".
pub fn env_optional_limit<T>(key: &str, default: Option<T>) -> Option<T>
where
    T: FromStr + PartialEq + Default,
{
    match std::env::var(key).ok().and_then(|v| v.trim().parse::<T>().ok()) {
        Some(v) if v == T::default() => None,
        Some(v) => Some(v),
        None => default,
    }
}

/// How the pipeline reacts to intermediate contract drift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DriftGuardMode {
    /// Drift is not checked at all.
    Off,
    /// Drift is reported via telemetry; the staged pipeline continues.
    #[default]
    Warn,
    /// Drift is reported, and real hash drift forces the fallback path.
    Safe,
}

impl FromStr for DriftGuardMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "off" => Ok(Self::Off),
            "warn" => Ok(Self::Warn),
            "safe" => Ok(Self::Safe),
            _ => Err(Error::Config(format!("Invalid drift guard mode: {}", s))),
        }
    }
}

impl fmt::Display for DriftGuardMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Off => write!(f, "off"),
            Self::Warn => write!(f, "warn"),
            Self::Safe => write!(f, "safe"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drift_mode_from_str() {
        assert_eq!("off".parse::<DriftGuardMode>().unwrap(), DriftGuardMode::Off);
        assert_eq!("WARN".parse::<DriftGuardMode>().unwrap(), DriftGuardMode::Warn);
        assert_eq!(" safe ".parse::<DriftGuardMode>().unwrap(), DriftGuardMode::Safe);
    }

    #[test]
    fn test_drift_mode_from_str_invalid() {
        let err = "strict".parse::<DriftGuardMode>().unwrap_err();
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid drift guard mode: strict"
        );
    }

    #[test]
    fn test_drift_mode_display_roundtrip() {
        for mode in [DriftGuardMode::Off, DriftGuardMode::Warn, DriftGuardMode::Safe] {
            assert_eq!(mode.to_string().parse::<DriftGuardMode>().unwrap(), mode);
        }
    }

    #[test]
    fn test_drift_mode_default_is_warn() {
        assert_eq!(DriftGuardMode::default(), DriftGuardMode::Warn);
    }

    #[test]
    fn test_env_or_missing_uses_default() {
        assert_eq!(env_or::<u64>("MEDEX_TEST_ENV_OR_MISSING", 42), 42);
    }

    #[test]
    fn test_env_or_unparseable_uses_default() {
        std::env::set_var("MEDEX_TEST_ENV_OR_GARBAGE", "not-a-number");
        assert_eq!(env_or::<u64>("MEDEX_TEST_ENV_OR_GARBAGE", 7), 7);
        std::env::remove_var("MEDEX_TEST_ENV_OR_GARBAGE");
    }

    #[test]
    fn test_env_flag() {
        std::env::set_var("MEDEX_TEST_FLAG_OFF", "0");
        std::env::set_var("MEDEX_TEST_FLAG_ON", "yes");
        assert!(!env_flag("MEDEX_TEST_FLAG_OFF", true));
        assert!(env_flag("MEDEX_TEST_FLAG_ON", false));
        assert!(env_flag("MEDEX_TEST_FLAG_UNSET", true));
        std::env::remove_var("MEDEX_TEST_FLAG_OFF");
        std::env::remove_var("MEDEX_TEST_FLAG_ON");
    }

    #[test]
    fn test_env_optional_limit_zero_disables() {
        std::env::set_var("MEDEX_TEST_LIMIT_ZERO", "0");
        assert_eq!(env_optional_limit::<usize>("MEDEX_TEST_LIMIT_ZERO", Some(5)), None);
        std::env::remove_var("MEDEX_TEST_LIMIT_ZERO");
        assert_eq!(
            env_optional_limit::<usize>("MEDEX_TEST_LIMIT_ZERO", Some(5)),
            Some(5)
        );
    }
}
