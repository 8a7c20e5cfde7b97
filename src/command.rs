//! Administrative commands.
//!
//! Commands travel as `{"type": "<COMMAND>", "options": {...}}`. Parsing
//! never panics: malformed JSON, an unknown type or a missing option all
//! come back as [`LindenError::InvalidCommand`].

use std::fmt;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{LindenError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Promote the named pending generation.
    SwapIndex { index: String },
    /// Merge every live generation down to `count` segments.
    MergeIndex { count: usize },
    /// Commit and refresh every live generation.
    FlushIndex,
    PauseIndexing,
    ResumeIndexing,
    /// Remove a named multi-index generation.
    DeleteIndex { index: String },
}

#[derive(Deserialize)]
struct RawCommand {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    options: Map<String, Value>,
}

impl Command {
    pub fn parse(json: &str) -> Result<Self> {
        let raw: RawCommand = serde_json::from_str(json)
            .map_err(|e| LindenError::invalid_command(format!("malformed command: {e}")))?;
        let options = &raw.options;
        match raw.kind.as_str() {
            "SWAP_INDEX" => Ok(Command::SwapIndex {
                index: string_option(options, &raw.kind, "index")?,
            }),
            "MERGE_INDEX" => {
                let count = options
                    .get("count")
                    .ok_or_else(|| missing(&raw.kind, "count"))?
                    .as_u64()
                    .filter(|c| *c > 0)
                    .ok_or_else(|| {
                        LindenError::invalid_command("MERGE_INDEX count must be a positive integer")
                    })?;
                Ok(Command::MergeIndex {
                    count: count as usize,
                })
            }
            "FLUSH_INDEX" => Ok(Command::FlushIndex),
            "PAUSE_INDEXING" => Ok(Command::PauseIndexing),
            "RESUME_INDEXING" => Ok(Command::ResumeIndexing),
            "DELETE_INDEX" => Ok(Command::DeleteIndex {
                index: string_option(options, &raw.kind, "index")?,
            }),
            other => Err(LindenError::invalid_command(format!(
                "unknown command type '{other}'"
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Command::SwapIndex { .. } => "SWAP_INDEX",
            Command::MergeIndex { .. } => "MERGE_INDEX",
            Command::FlushIndex => "FLUSH_INDEX",
            Command::PauseIndexing => "PAUSE_INDEXING",
            Command::ResumeIndexing => "RESUME_INDEXING",
            Command::DeleteIndex { .. } => "DELETE_INDEX",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SwapIndex { index } | Command::DeleteIndex { index } => {
                write!(f, "{} {index}", self.name())
            }
            Command::MergeIndex { count } => write!(f, "{} {count}", self.name()),
            _ => f.write_str(self.name()),
        }
    }
}

fn missing(kind: &str, option: &str) -> LindenError {
    LindenError::invalid_command(format!("{kind} requires options.{option}"))
}

fn string_option(options: &Map<String, Value>, kind: &str, option: &str) -> Result<String> {
    options
        .get(option)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .ok_or_else(|| missing(kind, option))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_commands() {
        assert_eq!(
            Command::parse(r#"{"type": "SWAP_INDEX", "options": {"index": "next_17"}}"#).unwrap(),
            Command::SwapIndex {
                index: "next_17".to_string()
            }
        );
        assert_eq!(
            Command::parse(r#"{"type": "MERGE_INDEX", "options": {"count": 1}}"#).unwrap(),
            Command::MergeIndex { count: 1 }
        );
        assert_eq!(
            Command::parse(r#"{"type": "FLUSH_INDEX"}"#).unwrap(),
            Command::FlushIndex
        );
        assert_eq!(
            Command::parse(r#"{"type": "PAUSE_INDEXING", "options": {}}"#)
                .unwrap()
                .to_string(),
            "PAUSE_INDEXING"
        );
    }

    #[test]
    fn test_parse_rejects_bad_commands() {
        let unknown = Command::parse(r#"{"type": "REBOOT"}"#).unwrap_err();
        assert!(unknown.to_string().contains("unknown command type 'REBOOT'"));

        let missing = Command::parse(r#"{"type": "SWAP_INDEX", "options": {}}"#).unwrap_err();
        assert!(missing.to_string().contains("options.index"));

        assert!(Command::parse(r#"{"type": "MERGE_INDEX", "options": {"count": 0}}"#).is_err());
        assert!(Command::parse(r#"{"type": "MERGE_INDEX", "options": {"count": "two"}}"#).is_err());
        assert!(matches!(
            Command::parse("{").unwrap_err(),
            LindenError::InvalidCommand(_)
        ));
        assert!(Command::parse(r#"{"options": {}}"#).is_err());
    }
}
