//! Directory names of index generations.
//!
//! ```text
//! index              the single generation of the simple lifecycle
//! current_<ts>       the live hot-swap generation
//! next_<ts>          a pending hot-swap generation
//! multi_<key>        a multi-index generation
//! expired_<name>     an evicted generation, archived
//! delete_<name>      a generation being removed
//! ```

use std::fmt;

use chrono::{DateTime, Utc};

use crate::config::TimeUnit;
use crate::error::{LindenError, Result};

pub const SIMPLE_DIR: &str = "index";
const CURRENT_PREFIX: &str = "current_";
const NEXT_PREFIX: &str = "next_";
const MULTI_PREFIX: &str = "multi_";
const EXPIRED_PREFIX: &str = "expired_";
const DELETE_PREFIX: &str = "delete_";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GenerationName {
    Simple,
    Current(i64),
    Next(i64),
    Multi(String),
    /// Archived by eviction; holds the original directory name.
    Expired(String),
    /// Awaiting removal; holds the original directory name.
    Deleted(String),
}

impl GenerationName {
    /// Parse a directory name. Unknown names yield `None`.
    pub fn parse(name: &str) -> Option<Self> {
        if name == SIMPLE_DIR {
            return Some(GenerationName::Simple);
        }
        if let Some(rest) = name.strip_prefix(CURRENT_PREFIX) {
            return rest.parse().ok().map(GenerationName::Current);
        }
        if let Some(rest) = name.strip_prefix(NEXT_PREFIX) {
            return rest.parse().ok().map(GenerationName::Next);
        }
        if let Some(rest) = name.strip_prefix(MULTI_PREFIX) {
            return (!rest.is_empty()).then(|| GenerationName::Multi(rest.to_string()));
        }
        if let Some(rest) = name.strip_prefix(EXPIRED_PREFIX) {
            return Some(GenerationName::Expired(rest.to_string()));
        }
        if let Some(rest) = name.strip_prefix(DELETE_PREFIX) {
            return Some(GenerationName::Deleted(rest.to_string()));
        }
        None
    }

    /// The directory name, refused unless it is one plain path component.
    pub fn dir_name(&self) -> Result<String> {
        let name = self.to_string();
        let plain = !name.is_empty()
            && name != "."
            && name != ".."
            && !name.contains(['/', '\\', '\0']);
        if !plain {
            return Err(LindenError::invalid_argument(format!(
                "'{name}' is not a valid generation directory"
            )));
        }
        Ok(name)
    }

    pub fn expired(self) -> Self {
        GenerationName::Expired(self.to_string())
    }

    pub fn deleted(self) -> Self {
        GenerationName::Deleted(self.to_string())
    }
}

impl fmt::Display for GenerationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GenerationName::Simple => f.write_str(SIMPLE_DIR),
            GenerationName::Current(ts) => write!(f, "{CURRENT_PREFIX}{ts}"),
            GenerationName::Next(ts) => write!(f, "{NEXT_PREFIX}{ts}"),
            GenerationName::Multi(key) => write!(f, "{MULTI_PREFIX}{key}"),
            GenerationName::Expired(name) => write!(f, "{EXPIRED_PREFIX}{name}"),
            GenerationName::Deleted(name) => write!(f, "{DELETE_PREFIX}{name}"),
        }
    }
}

/// Check a caller-supplied multi-index key. Only ASCII letters, digits,
/// `_` and `-` are accepted.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LindenError::invalid_argument("generation name must not be empty"));
    }
    if !key
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(LindenError::invalid_argument(format!(
            "generation name '{key}' may only contain letters, digits, '_' and '-'"
        )));
    }
    Ok(())
}

/// Timestamp of a hot-swap target written as `next_<ts>` or `next:<ts>`.
pub fn parse_swap_target(name: &str) -> Result<i64> {
    let ts = name
        .strip_prefix(NEXT_PREFIX)
        .or_else(|| name.strip_prefix("next:"))
        .ok_or_else(|| {
            LindenError::invalid_transition(format!(
                "can only swap to a next index, got '{name}'"
            ))
        })?;
    ts.parse().map_err(|_| {
        LindenError::invalid_transition(format!("bad timestamp in swap target '{name}'"))
    })
}

/// Key of the time bucket holding `now`. Keys sort chronologically.
pub fn time_key(now: DateTime<Utc>, unit: TimeUnit) -> String {
    let format = match unit {
        TimeUnit::Hour => "%Y%m%d%H",
        TimeUnit::Day => "%Y%m%d",
        TimeUnit::Month => "%Y%m",
        TimeUnit::Year => "%Y",
    };
    now.format(format).to_string()
}

/// Key of the `seq`-th doc-count generation.
pub fn sequence_key(seq: u64) -> String {
    format!("{seq:010}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_and_format() {
        for name in ["index", "current_17", "next_18", "multi_2024010203"] {
            assert_eq!(GenerationName::parse(name).unwrap().to_string(), name);
        }
        assert_eq!(
            GenerationName::parse("delete_next_5"),
            Some(GenerationName::Deleted("next_5".to_string()))
        );
        assert_eq!(
            GenerationName::Multi("2024".to_string()).expired().to_string(),
            "expired_multi_2024"
        );
        assert_eq!(GenerationName::parse("current_abc"), None);
        assert_eq!(GenerationName::parse("lost+found"), None);
    }

    #[test]
    fn test_generation_keys_stay_inside_data_dir() {
        assert!(validate_key("books-2024_a").is_ok());
        for key in ["", ".", "..", "x/../../escaped", "a\\b", "a.b", "caf\u{e9}"] {
            assert!(
                matches!(validate_key(key), Err(LindenError::InvalidArgument(_))),
                "{key:?} accepted"
            );
        }

        assert!(GenerationName::Multi("books".to_string()).dir_name().is_ok());
        let escaping = GenerationName::Multi("x/../../escaped".to_string());
        assert!(matches!(
            escaping.dir_name(),
            Err(LindenError::InvalidArgument(_))
        ));
        assert!(escaping.expired().dir_name().is_err());
    }

    #[test]
    fn test_swap_target_forms() {
        assert_eq!(parse_swap_target("next_42").unwrap(), 42);
        assert_eq!(parse_swap_target("next:42").unwrap(), 42);
        assert!(matches!(
            parse_swap_target("current_42"),
            Err(LindenError::InvalidTransition(_))
        ));
        assert!(parse_swap_target("next:soon").is_err());
    }

    #[test]
    fn test_time_keys_sort_chronologically() {
        let t = Utc.with_ymd_and_hms(2024, 3, 9, 7, 30, 0).unwrap();
        assert_eq!(time_key(t, TimeUnit::Hour), "2024030907");
        assert_eq!(time_key(t, TimeUnit::Day), "20240309");
        assert_eq!(time_key(t, TimeUnit::Month), "202403");
        assert_eq!(time_key(t, TimeUnit::Year), "2024");

        let later = Utc.with_ymd_and_hms(2024, 11, 1, 0, 0, 0).unwrap();
        assert!(time_key(t, TimeUnit::Day) < time_key(later, TimeUnit::Day));
        assert!(sequence_key(9) < sequence_key(10));
    }
}
