//! JSONL turn logs.
//!
//! One object per line: `{"role": "user", "text": "...", "timestamp": "..."}`.
//! `timestamp` and `attachment` are optional; blank lines and lines starting
//! with `#` are skipped.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use memoria_core::{Attachment, Role, Turn, TurnContent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TurnLine {
    role: Role,
    #[serde(default)]
    text: String,
    #[serde(default)]
    attachment: Option<Attachment>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl From<TurnLine> for Turn {
    fn from(line: TurnLine) -> Self {
        let content = TurnContent {
            text: line.text,
            attachment: line.attachment,
        };
        match line.timestamp {
            Some(at) => Turn::at(line.role, content, at),
            None => Turn::new(line.role, content),
        }
    }
}

/// Parse a JSONL document into turns, in order.
pub fn parse_turns(input: &str) -> Result<Vec<Turn>> {
    input
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(n, line)| {
            serde_json::from_str::<TurnLine>(line)
                .map(Turn::from)
                .with_context(|| format!("line {}: invalid turn", n + 1))
        })
        .collect()
}

/// Read and parse a JSONL file.
pub fn read_turns(path: &Path) -> Result<Vec<Turn>> {
    let input = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_turns(&input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use memoria_core::Modality;
    use std::io::Write;

    #[test]
    fn parses_roles_timestamps_and_attachments() {
        let input = r#"
# a comment
{"role": "user", "text": "my invoice is wrong", "timestamp": "2026-01-02T03:04:05Z"}
{"role": "assistant", "text": "let me check"}

{"role": "user", "text": "here", "attachment": {"modality": "image", "description": "scanned invoice"}}
"#;
        let turns = parse_turns(input).unwrap();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].role(), Role::User);
        assert_eq!(turns[0].timestamp().to_rfc3339(), "2026-01-02T03:04:05+00:00");
        assert_eq!(turns[1].role(), Role::Assistant);
        assert!(turns[2].modalities().contains(&Modality::Image));
    }

    #[test]
    fn errors_name_the_line() {
        let err = parse_turns("{\"role\": \"user\", \"text\": \"ok\"}\n{\"role\": \"robot\"}").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn reads_from_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"role": "system", "text": "be brief"}}"#).unwrap();
        let turns = read_turns(file.path()).unwrap();
        assert_eq!(turns[0].role(), Role::System);
        assert!(read_turns(Path::new("/definitely/not/here.jsonl")).is_err());
    }
}
