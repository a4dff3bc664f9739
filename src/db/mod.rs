use crate::config::Config;
use crate::message::Message;
use crate::rag::{self, ScoredTopic, Topic};
use crate::spam::SpamVerdict;
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{Connection, OptionalExtension, Result};
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    pub fn new(config: &Config) -> Result<Self> {
        let conn = Connection::open(&config.database_url)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn execute_init(&self) -> anyhow::Result<()> {
        info!("Database: Initializing schema...");
        let sql = "
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                group_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_messages_group_date ON messages (group_id, timestamp);

            CREATE TABLE IF NOT EXISTS topics (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                source_message_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS spam_verdicts (
                message_id TEXT PRIMARY KEY,
                score REAL NOT NULL,
                decision TEXT NOT NULL,
                rationale TEXT NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS processed_messages (
                message_id TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS groups (
                group_id TEXT PRIMARY KEY,
                last_ingest INTEGER
            );
        ";
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(sql)?;
        debug!("Database: Schema initialized successfully");
        Ok(())
    }

    pub fn save_message(&self, message: &Message) -> anyhow::Result<()> {
        debug!(
            "Database: Saving message {} from {} in group {}",
            message.id, message.sender_id, message.group_id
        );
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO messages (id, group_id, sender_id, content, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &message.id,
                &message.group_id,
                &message.sender_id,
                &message.text,
                message.timestamp.timestamp(),
            ),
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO groups (group_id, last_ingest) VALUES (?1, NULL)",
            (&message.group_id,),
        )?;
        Ok(())
    }

    /// Messages in `[start, end)` for one group, oldest first, excluding
    /// anything with a recorded flag/remove verdict and (optionally) one
    /// sender (the bot itself).
    pub fn messages_in_window(
        &self,
        group_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: usize,
        exclude_sender: Option<&str>,
    ) -> anyhow::Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT m.id, m.group_id, m.sender_id, m.content, m.timestamp
             FROM messages m
             LEFT JOIN spam_verdicts v ON m.id = v.message_id
             WHERE m.group_id = ?1
               AND m.timestamp >= ?2 AND m.timestamp < ?3
               AND (v.decision IS NULL OR v.decision = 'allow')
               AND (?4 IS NULL OR m.sender_id != ?4)
             ORDER BY m.timestamp ASC
             LIMIT ?5",
        )?;

        let rows = stmt.query_map(
            (
                group_id,
                start.timestamp(),
                end.timestamp(),
                exclude_sender,
                limit,
            ),
            row_to_message,
        )?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        debug!(
            "Database: Window query returned {} messages for group {}",
            results.len(),
            group_id
        );
        Ok(results)
    }

    /// Fully-constructed topics only: the single INSERT is the publish point,
    /// so concurrent readers either see the whole topic or none of it.
    pub fn insert_topic(&self, topic: &Topic) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO topics (id, content, embedding, source_message_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                &topic.id,
                &topic.text,
                embedding_to_blob(&topic.embedding),
                &topic.source_message_id,
                topic.created_at.timestamp(),
            ),
        )?;
        Ok(())
    }

    /// Top-k stored topics by cosine similarity against `query`, descending.
    /// Scoring happens in process; the table scan is bounded by the knowledge
    /// base size, which near-duplicate skipping keeps in check.
    pub fn nearest_topics(&self, query: &[f32], k: usize) -> anyhow::Result<Vec<ScoredTopic>> {
        let candidates = self.all_topics()?;
        Ok(rag::top_k(query, candidates, k))
    }

    pub fn all_topics(&self) -> anyhow::Result<Vec<Topic>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, content, embedding, source_message_id, created_at FROM topics",
        )?;
        let rows = stmt.query_map([], |row| {
            let blob: Vec<u8> = row.get(2)?;
            let created: i64 = row.get(4)?;
            Ok(Topic {
                id: row.get(0)?,
                text: row.get(1)?,
                embedding: blob_to_embedding(&blob),
                source_message_id: row.get(3)?,
                created_at: Utc.timestamp_opt(created, 0).single().unwrap_or_default(),
            })
        })?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn topic_count(&self) -> anyhow::Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM topics", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn record_spam_verdict(&self, verdict: &SpamVerdict) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO spam_verdicts (message_id, score, decision, rationale, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(message_id) DO UPDATE SET
                score = ?2, decision = ?3, rationale = ?4, created_at = ?5",
            (
                &verdict.message_id,
                verdict.score as f64,
                verdict.decision.as_str(),
                &verdict.rationale,
                Utc::now().timestamp(),
            ),
        )?;
        Ok(())
    }

    // --- Per-message processing state ---

    pub fn processed_state(&self, message_id: &str) -> anyhow::Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let state = conn
            .query_row(
                "SELECT state FROM processed_messages WHERE message_id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(state)
    }

    pub fn mark_processed(&self, message_id: &str, state: &str) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO processed_messages (message_id, state, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(message_id) DO UPDATE SET state = ?2, updated_at = ?3",
            (message_id, state, Utc::now().timestamp()),
        )?;
        Ok(())
    }

    // --- Group ingest watermarks ---

    pub fn list_groups(&self) -> anyhow::Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT group_id FROM groups")?;
        let rows = stmt.query_map([], |row| row.get(0))?;

        let mut results = Vec::new();
        for row in rows {
            results.push(row?);
        }
        Ok(results)
    }

    pub fn last_ingest(&self, group_id: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        let ts: Option<Option<i64>> = conn
            .query_row(
                "SELECT last_ingest FROM groups WHERE group_id = ?1",
                [group_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(ts
            .flatten()
            .and_then(|t| Utc.timestamp_opt(t, 0).single()))
    }

    pub fn set_last_ingest(&self, group_id: &str, at: DateTime<Utc>) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO groups (group_id, last_ingest) VALUES (?1, ?2)
             ON CONFLICT(group_id) DO UPDATE SET last_ingest = ?2",
            (group_id, at.timestamp()),
        )?;
        Ok(())
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let ts: i64 = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        group_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        timestamp: Utc.timestamp_opt(ts, 0).single().unwrap_or_default(),
        attachments: Vec::new(),
    })
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spam::Decision;
    use crate::test_support::{test_config, test_message, test_topic};
    use chrono::Duration;

    fn test_db() -> Database {
        let db = Database::new(&test_config()).unwrap();
        db.execute_init().unwrap();
        db
    }

    #[test]
    fn test_embedding_blob_roundtrip() {
        let embedding = vec![0.25, -1.5, 3.75, 0.0];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob), embedding);
    }

    #[test]
    fn test_save_message_is_idempotent() {
        let db = test_db();
        let msg = test_message("m1", "hello");
        db.save_message(&msg).unwrap();
        db.save_message(&msg).unwrap();

        let window = db
            .messages_in_window(
                &msg.group_id,
                msg.timestamp - Duration::hours(1),
                msg.timestamp + Duration::hours(1),
                10,
                None,
            )
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].text, "hello");
    }

    #[test]
    fn test_window_excludes_spam_and_bot() {
        let db = test_db();
        let now = Utc::now();

        for (id, sender, text) in [
            ("m1", "alice", "legit question"),
            ("m2", "mallory", "buy cheap followers"),
            ("m3", "bot", "a bot reply"),
        ] {
            let mut msg = test_message(id, text);
            msg.sender_id = sender.to_string();
            db.save_message(&msg).unwrap();
        }

        db.record_spam_verdict(&SpamVerdict {
            message_id: "m2".to_string(),
            score: 0.95,
            decision: Decision::Remove,
            rationale: "known-bad domain".to_string(),
        })
        .unwrap();

        let window = db
            .messages_in_window(
                "group-1",
                now - Duration::hours(1),
                now + Duration::hours(1),
                10,
                Some("bot"),
            )
            .unwrap();
        assert_eq!(window.len(), 1);
        assert_eq!(window[0].id, "m1");
    }

    #[test]
    fn test_nearest_topics_ordering() {
        let db = test_db();
        db.insert_topic(&test_topic("t1", vec![1.0, 0.0])).unwrap();
        db.insert_topic(&test_topic("t2", vec![0.0, 1.0])).unwrap();
        db.insert_topic(&test_topic("t3", vec![0.8, 0.2])).unwrap();

        let results = db.nearest_topics(&[1.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].topic.id, "t1");
        assert_eq!(results[1].topic.id, "t3");
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_processed_state_roundtrip() {
        let db = test_db();
        assert!(db.processed_state("m1").unwrap().is_none());

        db.mark_processed("m1", "delivered").unwrap();
        assert_eq!(db.processed_state("m1").unwrap().as_deref(), Some("delivered"));

        // Terminal state can be overwritten by design; the dispatcher checks
        // before reprocessing.
        db.mark_processed("m1", "failed").unwrap();
        assert_eq!(db.processed_state("m1").unwrap().as_deref(), Some("failed"));
    }

    #[test]
    fn test_group_watermarks() {
        let db = test_db();
        db.save_message(&test_message("m1", "hi")).unwrap();

        assert_eq!(db.list_groups().unwrap(), vec!["group-1".to_string()]);
        assert!(db.last_ingest("group-1").unwrap().is_none());

        let mark = Utc::now();
        db.set_last_ingest("group-1", mark).unwrap();
        let stored = db.last_ingest("group-1").unwrap().unwrap();
        assert_eq!(stored.timestamp(), mark.timestamp());
    }
}
