//! Long-term agent memory: episodes, semantic facts, checkpoints
//!
//! Episodes and facts live in one `persistent_memory` table discriminated
//! by `memory_type`; the latest active row wins for a semantic
//! `(category, key)`. Checkpoints are append-only; only stable ones are
//! candidates for recovery.

use crate::models::{Checkpoint, Episode, SemanticFact};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{info, warn};
use uuid::Uuid;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;

CREATE TABLE IF NOT EXISTS persistent_memory (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memory_type TEXT NOT NULL,
    event_id TEXT,
    fact_id TEXT,
    timestamp TEXT NOT NULL,
    event_type TEXT,
    category TEXT,
    key TEXT,
    description TEXT,
    content TEXT,
    source TEXT,
    sku TEXT,
    confidence REAL NOT NULL DEFAULT 1.0,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_memory_type_ts ON persistent_memory(memory_type, timestamp DESC);
CREATE INDEX IF NOT EXISTS idx_memory_sku ON persistent_memory(sku);
CREATE INDEX IF NOT EXISTS idx_memory_cat_key ON persistent_memory(memory_type, category, key);

CREATE TABLE IF NOT EXISTS agent_checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    checkpoint_id TEXT UNIQUE NOT NULL,
    timestamp TEXT NOT NULL,
    cycle_number INTEGER NOT NULL,
    goal TEXT NOT NULL,
    state TEXT NOT NULL,
    is_stable INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE INDEX IF NOT EXISTS idx_checkpoints_ts ON agent_checkpoints(timestamp DESC);
"#;

const MEMORY_EPISODIC: &str = "episodic";
const MEMORY_SEMANTIC: &str = "semantic";

pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open memory database at {db_path}"))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize memory schema")?;
        info!("💾 Memory store ready at {}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // ---- episodic memory ----

    pub fn store_episode(&self, episode: &Episode) -> Result<String> {
        let content = serde_json::json!({
            "context": episode.context,
            "outcome": episode.outcome,
            "learning": episode.learning,
        });
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO persistent_memory
                (memory_type, event_id, timestamp, event_type, sku, description, content, confidence, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1.0, 1)",
            params![
                MEMORY_EPISODIC,
                episode.event_id,
                episode.timestamp.to_rfc3339(),
                episode.event_type,
                episode.sku,
                episode.description,
                content.to_string(),
            ],
        )
        .context("Failed to store episode")?;
        Ok(episode.event_id.clone())
    }

    pub fn list_episodes(&self, sku: Option<&str>, limit: usize) -> Result<Vec<Episode>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT event_id, timestamp, event_type, sku, description, content
             FROM persistent_memory
             WHERE memory_type = ?1 AND is_active = 1
               AND (?2 IS NULL OR sku = ?2)
             ORDER BY timestamp DESC LIMIT ?3",
        )?;
        let episodes = stmt
            .query_map(params![MEMORY_EPISODIC, sku, limit as i64], |row| {
                let ts: String = row.get(1)?;
                let content: Option<String> = row.get(5)?;
                let blob: serde_json::Value = content
                    .and_then(|c| serde_json::from_str(&c).ok())
                    .unwrap_or(serde_json::Value::Null);
                Ok(Episode {
                    event_id: row.get(0)?,
                    timestamp: parse_ts(&ts),
                    event_type: row.get(2)?,
                    sku: row.get(3)?,
                    description: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
                    context: blob.get("context").cloned().unwrap_or(serde_json::Value::Null),
                    outcome: blob
                        .get("outcome")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                    learning: blob
                        .get("learning")
                        .and_then(|v| v.as_str())
                        .map(String::from),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(episodes)
    }

    // ---- semantic memory ----

    /// Deactivates the previous record for (category, key) so the latest
    /// active row stays unique.
    pub fn store_fact(&self, fact: &SemanticFact) -> Result<String> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE persistent_memory SET is_active = 0
             WHERE memory_type = ?1 AND category = ?2 AND key = ?3 AND is_active = 1",
            params![MEMORY_SEMANTIC, fact.category, fact.key],
        )?;
        conn.execute(
            "INSERT INTO persistent_memory
                (memory_type, fact_id, timestamp, category, key, content, source, confidence, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
            params![
                MEMORY_SEMANTIC,
                fact.fact_id,
                fact.timestamp.to_rfc3339(),
                fact.category,
                fact.key,
                serde_json::json!({ "value": fact.value }).to_string(),
                fact.source,
                fact.confidence,
            ],
        )
        .context("Failed to store fact")?;
        Ok(fact.fact_id.clone())
    }

    /// Active facts whose key is the given SKU, any category.
    pub fn facts_for_sku(&self, sku: &str) -> Result<Vec<SemanticFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fact_id, timestamp, category, key, content, source, confidence
             FROM persistent_memory
             WHERE memory_type = ?1 AND key = ?2 AND is_active = 1
             ORDER BY confidence DESC",
        )?;
        let facts = stmt
            .query_map(params![MEMORY_SEMANTIC, sku], row_to_fact)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    pub fn facts_by_category(&self, category: &str, min_confidence: f64) -> Result<Vec<SemanticFact>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT fact_id, timestamp, category, key, content, source, confidence
             FROM persistent_memory
             WHERE memory_type = ?1 AND category = ?2 AND confidence >= ?3 AND is_active = 1
             ORDER BY confidence DESC",
        )?;
        let facts = stmt
            .query_map(params![MEMORY_SEMANTIC, category, min_confidence], row_to_fact)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(facts)
    }

    // ---- checkpoints ----

    pub fn store_checkpoint(&self, checkpoint: &Checkpoint) -> Result<String> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO agent_checkpoints
                (checkpoint_id, timestamp, cycle_number, goal, state, is_stable, is_active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1)",
            params![
                checkpoint.checkpoint_id,
                checkpoint.timestamp.to_rfc3339(),
                checkpoint.cycle_number,
                checkpoint.goal,
                checkpoint.state.to_string(),
                checkpoint.is_stable as i64,
            ],
        )
        .context("Failed to store checkpoint")?;
        Ok(checkpoint.checkpoint_id.clone())
    }

    pub fn latest_stable_checkpoint(&self) -> Result<Option<Checkpoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, timestamp, cycle_number, goal, state, is_stable
             FROM agent_checkpoints
             WHERE is_stable = 1 AND is_active = 1
             ORDER BY timestamp DESC LIMIT 1",
        )?;
        let checkpoint = stmt.query_row([], row_to_checkpoint).optional()?;
        Ok(checkpoint)
    }

    pub fn list_checkpoints(&self, limit: usize) -> Result<Vec<Checkpoint>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT checkpoint_id, timestamp, cycle_number, goal, state, is_stable
             FROM agent_checkpoints WHERE is_active = 1
             ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let checkpoints = stmt
            .query_map(params![limit as i64], row_to_checkpoint)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(checkpoints)
    }

    /// Next cycle number = latest checkpoint's cycle + 1, starting at 1.
    pub fn next_cycle_number(&self) -> i64 {
        let conn = self.conn.lock();
        conn.query_row(
            "SELECT COALESCE(MAX(cycle_number), 0) + 1 FROM agent_checkpoints",
            [],
            |row| row.get(0),
        )
        .unwrap_or_else(|e| {
            warn!("Failed to read cycle counter: {e}");
            1
        })
    }
}

pub fn new_event_id(prefix: &str) -> String {
    format!("{}_{}", prefix, &Uuid::new_v4().simple().to_string()[..8])
}

fn row_to_fact(row: &rusqlite::Row<'_>) -> rusqlite::Result<SemanticFact> {
    let ts: String = row.get(1)?;
    let content: Option<String> = row.get(4)?;
    let value = content
        .and_then(|c| serde_json::from_str::<serde_json::Value>(&c).ok())
        .and_then(|v| v.get("value").cloned())
        .unwrap_or(serde_json::Value::Null);
    Ok(SemanticFact {
        fact_id: row.get(0)?,
        timestamp: parse_ts(&ts),
        category: row.get(2)?,
        key: row.get(3)?,
        value,
        confidence: row.get(6)?,
        source: row.get(5)?,
    })
}

fn row_to_checkpoint(row: &rusqlite::Row<'_>) -> rusqlite::Result<Checkpoint> {
    let ts: String = row.get(1)?;
    let state: String = row.get(4)?;
    Ok(Checkpoint {
        checkpoint_id: row.get(0)?,
        timestamp: parse_ts(&ts),
        cycle_number: row.get(2)?,
        goal: row.get(3)?,
        state: serde_json::from_str(&state).unwrap_or(serde_json::Value::Null),
        is_stable: row.get::<_, i64>(5)? != 0,
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(":memory:").unwrap()
    }

    #[test]
    fn episode_roundtrip() {
        let db = store();
        let episode = Episode {
            event_id: new_event_id("cycle"),
            timestamp: Utc::now(),
            event_type: "cycle_complete".to_string(),
            sku: None,
            description: "Cycle 1 finished".to_string(),
            context: serde_json::json!({"orders": 3}),
            outcome: Some("success".to_string()),
            learning: Some("demand steady".to_string()),
        };
        db.store_episode(&episode).unwrap();

        let episodes = db.list_episodes(None, 10).unwrap();
        assert_eq!(episodes.len(), 1);
        assert_eq!(episodes[0].outcome.as_deref(), Some("success"));
        assert_eq!(episodes[0].context["orders"], 3);
    }

    #[test]
    fn fact_latest_active_wins() {
        let db = store();
        for (value, confidence) in [(10, 0.5), (20, 0.9)] {
            db.store_fact(&SemanticFact {
                fact_id: new_event_id("fact"),
                timestamp: Utc::now(),
                category: "demand_pattern".to_string(),
                key: "SKU-A".to_string(),
                value: serde_json::json!(value),
                confidence,
                source: Some("analyst".to_string()),
            })
            .unwrap();
        }

        // Only the newest fact for (category, key) is active
        let facts = db.facts_for_sku("SKU-A").unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, serde_json::json!(20));
    }

    #[test]
    fn only_stable_checkpoints_are_resumable() {
        let db = store();
        db.store_checkpoint(&Checkpoint {
            checkpoint_id: "cp-unstable".to_string(),
            timestamp: Utc::now() - chrono::Duration::seconds(10),
            cycle_number: 1,
            goal: "replenish".to_string(),
            state: serde_json::json!({}),
            is_stable: false,
        })
        .unwrap();

        assert!(db.latest_stable_checkpoint().unwrap().is_none());

        db.store_checkpoint(&Checkpoint {
            checkpoint_id: "cp-stable".to_string(),
            timestamp: Utc::now(),
            cycle_number: 2,
            goal: "replenish".to_string(),
            state: serde_json::json!({"decisions": 1}),
            is_stable: true,
        })
        .unwrap();

        let latest = db.latest_stable_checkpoint().unwrap().unwrap();
        assert_eq!(latest.checkpoint_id, "cp-stable");
        assert_eq!(db.next_cycle_number(), 3);
    }
}
