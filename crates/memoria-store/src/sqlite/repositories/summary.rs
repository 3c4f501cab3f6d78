//! Summary repository: the `summaries` table.

use memoria_core::{ConversationId, SegmentId, SummaryRecord, TopicQuery};
use rusqlite::types::Value as SqlValue;
use rusqlite::{Connection, OptionalExtension, Row, params, params_from_iter};

use super::{format_time, parse_json, parse_time};
use crate::errors::Result;

const COLUMNS: &str = "segment_id, conversation_id, summary_text, topics, \
                       original_token_count, modalities, created_at";

/// Summary repository.
pub struct SummaryRepo;

impl SummaryRepo {
    /// Insert a record unless one already exists for the segment.
    /// Returns whether a row was written.
    pub fn insert(conn: &Connection, record: &SummaryRecord) -> Result<bool> {
        let changed = conn.execute(
            "INSERT OR IGNORE INTO summaries (segment_id, conversation_id, summary_text,
                 topics, original_token_count, modalities, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.segment_id.as_str(),
                record.conversation_id.as_str(),
                record.summary_text,
                serde_json::to_string(&record.topics)?,
                record.original_token_count,
                serde_json::to_string(&record.modalities)?,
                format_time(record.created_at),
            ],
        )?;
        Ok(changed > 0)
    }

    /// Fetch one record.
    pub fn get(conn: &Connection, segment_id: &SegmentId) -> Result<Option<SummaryRecord>> {
        let row = conn
            .query_row(
                &format!("SELECT {COLUMNS} FROM summaries WHERE segment_id = ?1"),
                params![segment_id.as_str()],
                Self::map_row,
            )
            .optional()?;
        Ok(row)
    }

    /// Records with at least one query topic, newest first.
    pub fn scan(conn: &Connection, query: &TopicQuery, limit: usize) -> Result<Vec<SummaryRecord>> {
        let terms: Vec<&str> = query.topics.terms().collect();
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let placeholders = (0..terms.len())
            .map(|i| format!("?{}", i + 2))
            .collect::<Vec<_>>()
            .join(", ");
        let limit_param = terms.len() + 2;
        let sql = format!(
            "SELECT {COLUMNS} FROM summaries s
             WHERE (?1 IS NULL OR s.conversation_id = ?1)
               AND EXISTS (SELECT 1 FROM summary_topics t
                           WHERE t.segment_id = s.segment_id AND t.topic IN ({placeholders}))
             ORDER BY s.created_at DESC, s.segment_id ASC
             LIMIT ?{limit_param}"
        );

        let mut values: Vec<SqlValue> = Vec::with_capacity(terms.len() + 2);
        values.push(
            query
                .conversation_id
                .as_ref()
                .map_or(SqlValue::Null, |c| SqlValue::Text(c.to_string())),
        );
        values.extend(terms.iter().map(|t| SqlValue::Text((*t).to_owned())));
        values.push(SqlValue::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Self::map_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Delete every record of a conversation. Topic index rows cascade.
    pub fn delete_conversation(conn: &Connection, conversation_id: &ConversationId) -> Result<usize> {
        let removed = conn.execute(
            "DELETE FROM summaries WHERE conversation_id = ?1",
            params![conversation_id.as_str()],
        )?;
        Ok(removed)
    }

    fn map_row(row: &Row<'_>) -> rusqlite::Result<SummaryRecord> {
        let topics: String = row.get(3)?;
        let modalities: String = row.get(5)?;
        let created_at: String = row.get(6)?;
        Ok(SummaryRecord {
            segment_id: SegmentId::from_string(row.get(0)?),
            conversation_id: ConversationId::from_string(row.get(1)?),
            summary_text: row.get(2)?,
            topics: parse_json(3, &topics)?,
            original_token_count: row.get(4)?,
            modalities: parse_json(5, &modalities)?,
            created_at: parse_time(6, &created_at)?,
        })
    }
}
