//! Remote store client.
//!
//! One connection to the remote SQLite-compatible store serves three
//! consumers: the live flush path (per-topic blob upserts), post-session
//! persistence (blob read-back plus normalized inserts), and the push
//! sender (subscription queries).

use crate::config::StorageConfig;
use crate::error::Result;
use libsql::{params, Connection, Value};
use std::collections::HashMap;
use tracing::debug;

const ARCHIVE_BATCH_SIZE: usize = 80;

const UPSERT_TOPIC_SQL: &str = "\
    INSERT INTO live_state (session_key, topic, data, updated_at) \
    VALUES (?, ?, ?, ?) \
    ON CONFLICT (session_key, topic) \
    DO UPDATE SET data = excluded.data, updated_at = excluded.updated_at";

/// Ingestion markers on a session row. `ingested_at` set without
/// `live_ingested_at` means a full post-event archive import already ran
/// and the live snapshot must not overwrite it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMarkers {
    pub ingested_at: Option<String>,
    pub live_ingested_at: Option<String>,
}

impl SessionMarkers {
    pub fn has_archive_data(&self) -> bool {
        self.ingested_at.is_some() && self.live_ingested_at.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct PushSubscription {
    pub id: i64,
    pub endpoint: String,
    pub p256dh: String,
    pub auth: String,
}

/// Which subscriber opt-ins a notification targets. Conditions are OR'd.
#[derive(Debug, Clone, Copy, Default)]
pub struct SubscriptionFilter {
    pub reminders: bool,
    pub live_events: bool,
}

pub struct LiveStore {
    conn: Connection,
}

impl LiveStore {
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let db = libsql::Builder::new_remote(
            config.database_url.clone(),
            config.auth_token.clone(),
        )
        .build()
        .await?;
        let conn = db.connect()?;
        Ok(Self { conn })
    }

    /// Upsert all per-topic blobs for one flush as a single transaction.
    pub async fn upsert_topics(
        &self,
        session_key: i64,
        topics: &[(&str, String)],
        updated_at: &str,
    ) -> Result<()> {
        let tx = self.conn.transaction().await?;
        for (topic, data) in topics {
            tx.execute(
                UPSERT_TOPIC_SQL,
                params![session_key, *topic, data.as_str(), updated_at],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Read back every blob written for a session, keyed by topic.
    pub async fn read_topics(&self, session_key: i64) -> Result<HashMap<String, String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT topic, data FROM live_state WHERE session_key = ?",
                params![session_key],
            )
            .await?;

        let mut topics = HashMap::new();
        while let Some(row) = rows.next().await? {
            let topic: String = row.get(0)?;
            let data: String = row.get(1)?;
            topics.insert(topic, data);
        }
        Ok(topics)
    }

    /// Ingestion markers for a session, `None` if the row doesn't exist.
    pub async fn session_markers(&self, session_key: i64) -> Result<Option<SessionMarkers>> {
        let mut rows = self
            .conn
            .query(
                "SELECT ingested_at, live_ingested_at FROM sessions WHERE key = ?",
                params![session_key],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(SessionMarkers {
                ingested_at: row.get(0)?,
                live_ingested_at: row.get(1)?,
            })),
            None => Ok(None),
        }
    }

    /// Stamp a session as live-ingested. The guard keeps a completed
    /// archive import from being overwritten by a late live persist.
    pub async fn mark_live_ingested(
        &self,
        session_key: i64,
        now: &str,
        total_laps: Option<u32>,
    ) -> Result<()> {
        self.conn
            .execute(
                "UPDATE sessions SET ingested_at = ?, live_ingested_at = ?, total_laps = ? \
                 WHERE key = ? AND (ingested_at IS NULL OR live_ingested_at IS NOT NULL)",
                params![now, now, total_laps.map(i64::from), session_key],
            )
            .await?;
        Ok(())
    }

    /// Insert rows in chunks so one enormous session doesn't produce a
    /// single oversized batch.
    pub async fn batch_insert(&self, sql: &str, rows: Vec<Vec<Value>>) -> Result<usize> {
        let mut inserted = 0;
        for chunk in rows.chunks(ARCHIVE_BATCH_SIZE) {
            let tx = self.conn.transaction().await?;
            for row in chunk {
                tx.execute(sql, row.clone()).await?;
            }
            tx.commit().await?;
            inserted += chunk.len();
        }
        Ok(inserted)
    }

    pub async fn subscriptions(&self, filter: SubscriptionFilter) -> Result<Vec<PushSubscription>> {
        let mut conditions = Vec::new();
        if filter.reminders {
            conditions.push("notify_reminders = 1");
        }
        if filter.live_events {
            conditions.push("notify_live_events = 1");
        }
        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" OR "))
        };

        let sql = format!(
            "SELECT id, endpoint, p256dh, auth FROM push_subscriptions{where_clause}"
        );
        let mut rows = self.conn.query(&sql, ()).await?;

        let mut subs = Vec::new();
        while let Some(row) = rows.next().await? {
            subs.push(PushSubscription {
                id: row.get(0)?,
                endpoint: row.get(1)?,
                p256dh: row.get(2)?,
                auth: row.get(3)?,
            });
        }
        Ok(subs)
    }

    pub async fn delete_subscriptions(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!("DELETE FROM push_subscriptions WHERE id IN ({placeholders})");
        let args: Vec<Value> = ids.iter().map(|id| Value::from(*id)).collect();
        self.conn.execute(&sql, args).await?;
        debug!(count = ids.len(), "removed stale push subscriptions");
        Ok(())
    }

    /// The tightest reminder lead time any subscriber asked for, in
    /// minutes. Falls back to 15 when nobody has opted in.
    pub async fn min_reminder_minutes(&self) -> Result<i64> {
        let mut rows = self
            .conn
            .query(
                "SELECT MIN(reminder_minutes) FROM push_subscriptions WHERE notify_reminders = 1",
                (),
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(row.get::<Option<i64>>(0)?.unwrap_or(15)),
            None => Ok(15),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_marker_requires_missing_live_stamp() {
        let archived = SessionMarkers {
            ingested_at: Some("2026-03-08T20:00:00Z".into()),
            live_ingested_at: None,
        };
        assert!(archived.has_archive_data());

        let live_only = SessionMarkers {
            ingested_at: Some("2026-03-08T20:00:00Z".into()),
            live_ingested_at: Some("2026-03-08T20:00:00Z".into()),
        };
        assert!(!live_only.has_archive_data());

        assert!(!SessionMarkers::default().has_archive_data());
    }
}
