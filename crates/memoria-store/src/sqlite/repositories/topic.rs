//! Topic repository: the `summary_topics` index and the
//! `topic_relationships` co-occurrence graph.

use chrono::Utc;
use memoria_core::SummaryRecord;
use rusqlite::{Connection, params};

use super::format_time;
use crate::errors::Result;
use crate::store::topic_pairs;
use crate::types::RelatedTopic;

/// Topic repository.
pub struct TopicRepo;

impl TopicRepo {
    /// Write one index row per topic of the record.
    pub fn index(conn: &Connection, record: &SummaryRecord) -> Result<()> {
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO summary_topics (segment_id, topic, weight) VALUES (?1, ?2, ?3)",
        )?;
        for (topic, weight) in record.topics.iter() {
            let _ = stmt.execute(params![record.segment_id.as_str(), topic, weight])?;
        }
        Ok(())
    }

    /// Strengthen every topic pair of the record by one.
    pub fn strengthen_pairs(conn: &Connection, record: &SummaryRecord) -> Result<()> {
        let now = format_time(Utc::now());
        let mut stmt = conn.prepare(
            "INSERT INTO topic_relationships (topic_a, topic_b, strength, last_seen)
             VALUES (?1, ?2, 1, ?3)
             ON CONFLICT (topic_a, topic_b)
             DO UPDATE SET strength = strength + 1, last_seen = excluded.last_seen",
        )?;
        for (a, b) in topic_pairs(record) {
            let _ = stmt.execute(params![a, b, now])?;
        }
        Ok(())
    }

    /// Topics co-occurring with `topic`, strongest first.
    pub fn related(conn: &Connection, topic: &str, limit: usize) -> Result<Vec<RelatedTopic>> {
        let mut stmt = conn.prepare(
            "SELECT CASE WHEN topic_a = ?1 THEN topic_b ELSE topic_a END AS other, strength
             FROM topic_relationships
             WHERE topic_a = ?1 OR topic_b = ?1
             ORDER BY strength DESC, other ASC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(
                params![topic, i64::try_from(limit).unwrap_or(i64::MAX)],
                |row| {
                    Ok(RelatedTopic {
                        topic: row.get(0)?,
                        strength: row.get(1)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
