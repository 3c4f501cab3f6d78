//! Outcome repository: the append-only `action_outcomes` log.

use memoria_core::ConversationId;
use rusqlite::{Connection, params};

use super::{format_time, parse_json, parse_time};
use crate::errors::Result;
use crate::types::OutcomeRecord;

/// Outcome repository.
pub struct OutcomeRepo;

impl OutcomeRepo {
    /// Append one outcome.
    pub fn insert(conn: &Connection, outcome: &OutcomeRecord) -> Result<()> {
        let _ = conn.execute(
            "INSERT INTO action_outcomes (conversation_id, action, bucket, success, snapshot, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                outcome.conversation_id.as_str(),
                outcome.action,
                outcome.bucket,
                outcome.success,
                serde_json::to_string(&outcome.snapshot)?,
                format_time(outcome.recorded_at),
            ],
        )?;
        Ok(())
    }

    /// The newest `limit` outcomes in insertion order.
    pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<OutcomeRecord>> {
        let mut stmt = conn.prepare(
            "SELECT conversation_id, action, bucket, success, snapshot, recorded_at FROM (
                 SELECT * FROM action_outcomes ORDER BY id DESC LIMIT ?1
             ) ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![i64::try_from(limit).unwrap_or(i64::MAX)], |row| {
                let snapshot: String = row.get(4)?;
                let recorded_at: String = row.get(5)?;
                Ok(OutcomeRecord {
                    conversation_id: ConversationId::from_string(row.get(0)?),
                    action: row.get(1)?,
                    bucket: row.get(2)?,
                    success: row.get(3)?,
                    snapshot: parse_json(4, &snapshot)?,
                    recorded_at: parse_time(5, &recorded_at)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
