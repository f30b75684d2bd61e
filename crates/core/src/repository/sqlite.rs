//! SQLite-backed repository.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::brush::RemovalReason;
use crate::subscription::{Subscription, SubscriptionState};

use super::{
    NewTrackedTorrent, RemovedTorrent, Repository, RepositoryError, TaskCounters, TrackedTorrent,
};

/// SQLite-backed repository.
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the database file and its tables.
    pub fn new(path: &Path) -> Result<Self, RepositoryError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory repository (useful for testing).
    pub fn in_memory() -> Result<Self, RepositoryError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RepositoryError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                state TEXT NOT NULL,
                lack_episodes TEXT,
                body TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS enclosure_history (
                enclosure_url TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                seen_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS tracked_torrents (
                task_id TEXT NOT NULL,
                enclosure_url TEXT NOT NULL,
                title TEXT NOT NULL,
                downloader TEXT NOT NULL,
                torrent_id TEXT NOT NULL,
                size_bytes INTEGER NOT NULL DEFAULT 0,
                added_at TEXT NOT NULL,
                removed_at TEXT,
                removal_reason TEXT,
                uploaded_bytes INTEGER NOT NULL DEFAULT 0,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (task_id, enclosure_url)
            );

            CREATE INDEX IF NOT EXISTS idx_tracked_task_torrent
                ON tracked_torrents(task_id, torrent_id);

            CREATE TABLE IF NOT EXISTS task_counters (
                task_id TEXT PRIMARY KEY,
                acquired INTEGER NOT NULL DEFAULT 0,
                removed INTEGER NOT NULL DEFAULT 0,
                total_uploaded INTEGER NOT NULL DEFAULT 0,
                total_downloaded INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RepositoryError> {
        self.conn
            .lock()
            .map_err(|_| RepositoryError::Database("connection lock poisoned".to_string()))
    }

    fn row_to_subscription(row: &rusqlite::Row) -> rusqlite::Result<(String, Option<String>, String)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?))
    }

    /// Rebuild a subscription from its stored definition and bookkeeping.
    fn decode_subscription(
        state: &str,
        lack_episodes: Option<String>,
        body: &str,
    ) -> Result<Subscription, RepositoryError> {
        let mut subscription: Subscription = serde_json::from_str(body)
            .map_err(|e| RepositoryError::Database(format!("corrupt subscription: {}", e)))?;
        subscription.state = state.parse().map_err(RepositoryError::Database)?;
        subscription.lack_episodes = lack_episodes
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(|e| RepositoryError::Database(format!("corrupt lack_episodes: {}", e)))?;
        Ok(subscription)
    }

    fn row_to_tracked(row: &rusqlite::Row) -> rusqlite::Result<TrackedTorrent> {
        let added_at: String = row.get(6)?;
        let removed_at: Option<String> = row.get(7)?;
        let reason: Option<String> = row.get(8)?;

        Ok(TrackedTorrent {
            task_id: row.get(0)?,
            enclosure_url: row.get(1)?,
            title: row.get(2)?,
            downloader: row.get(3)?,
            torrent_id: row.get(4)?,
            size_bytes: row.get::<_, i64>(5)?.max(0) as u64,
            added_at: parse_timestamp(&added_at).unwrap_or_else(Utc::now),
            removed_at: removed_at.as_deref().and_then(parse_timestamp),
            removal_reason: reason.as_deref().and_then(RemovalReason::from_tag),
            uploaded_bytes: row.get::<_, i64>(9)?.max(0) as u64,
            downloaded_bytes: row.get::<_, i64>(10)?.max(0) as u64,
        })
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
}

fn encode_json<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Database(e.to_string()))
}

impl Repository for SqliteRepository {
    fn list_subscriptions(
        &self,
        state: SubscriptionState,
    ) -> Result<Vec<Subscription>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT state, lack_episodes, body FROM subscriptions WHERE state = ? ORDER BY seq",
        )?;
        let rows = stmt
            .query_map(params![state.as_str()], Self::row_to_subscription)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(state, lack, body)| Self::decode_subscription(&state, lack, &body))
            .collect()
    }

    fn get_subscription(&self, id: &str) -> Result<Option<Subscription>, RepositoryError> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                "SELECT state, lack_episodes, body FROM subscriptions WHERE id = ?",
                params![id],
                Self::row_to_subscription,
            )
            .optional()?;

        row.map(|(state, lack, body)| Self::decode_subscription(&state, lack, &body))
            .transpose()
    }

    fn upsert_subscription(&self, subscription: &Subscription) -> Result<(), RepositoryError> {
        let body = encode_json(subscription)?;
        let lack = subscription
            .lack_episodes
            .as_ref()
            .map(encode_json)
            .transpose()?;

        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO subscriptions (id, state, lack_episodes, body, updated_at) VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at",
            params![
                subscription.id,
                subscription.state.as_str(),
                lack,
                body,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn update_lack_episodes(
        &self,
        id: &str,
        lack_episodes: &BTreeSet<u32>,
    ) -> Result<(), RepositoryError> {
        let lack = encode_json(lack_episodes)?;
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE subscriptions SET lack_episodes = ?, updated_at = ? WHERE id = ?",
            params![lack, Utc::now().to_rfc3339(), id],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("subscription {}", id)));
        }
        Ok(())
    }

    fn finish_subscription(&self, id: &str) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE subscriptions SET state = ?, updated_at = ? WHERE id = ?",
            params![
                SubscriptionState::Finished.as_str(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        if updated == 0 {
            return Err(RepositoryError::NotFound(format!("subscription {}", id)));
        }
        Ok(())
    }

    fn is_enclosure_seen(&self, enclosure_url: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM enclosure_history WHERE enclosure_url = ?",
            params![enclosure_url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn mark_enclosure_seen(&self, enclosure_url: &str, title: &str) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR IGNORE INTO enclosure_history (enclosure_url, title, seen_at) VALUES (?, ?, ?)",
            params![enclosure_url, title, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    fn insert_tracked_torrent(&self, torrent: &NewTrackedTorrent) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO tracked_torrents
                (task_id, enclosure_url, title, downloader, torrent_id, size_bytes, added_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                torrent.task_id,
                torrent.enclosure_url,
                torrent.title,
                torrent.downloader,
                torrent.torrent_id,
                torrent.size_bytes as i64,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(inserted > 0)
    }

    fn is_tracked(&self, task_id: &str, enclosure_url: &str) -> Result<bool, RepositoryError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM tracked_torrents WHERE task_id = ? AND enclosure_url = ?",
            params![task_id, enclosure_url],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn tracked_torrent_ids(&self, task_id: &str) -> Result<Vec<String>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT torrent_id FROM tracked_torrents
             WHERE task_id = ? AND removed_at IS NULL ORDER BY added_at",
        )?;
        let ids = stmt
            .query_map(params![task_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn tracked_torrents(&self, task_id: &str) -> Result<Vec<TrackedTorrent>, RepositoryError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT task_id, enclosure_url, title, downloader, torrent_id, size_bytes, added_at,
                    removed_at, removal_reason, uploaded_bytes, downloaded_bytes
             FROM tracked_torrents WHERE task_id = ? ORDER BY added_at",
        )?;
        let torrents = stmt
            .query_map(params![task_id], Self::row_to_tracked)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(torrents)
    }

    fn drop_tracked_torrents(&self, task_id: &str, ids: &[String]) -> Result<(), RepositoryError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for id in ids {
            // rows stay behind as history so the enclosure is not re-acquired
            tx.execute(
                "UPDATE tracked_torrents SET removed_at = ?
                 WHERE task_id = ? AND torrent_id = ? AND removed_at IS NULL",
                params![now, task_id, id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn mark_removed(&self, task_id: &str, removed: &[RemovedTorrent]) -> Result<(), RepositoryError> {
        if removed.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        for torrent in removed {
            tx.execute(
                "UPDATE tracked_torrents
                 SET removed_at = ?, removal_reason = ?, uploaded_bytes = ?, downloaded_bytes = ?
                 WHERE task_id = ? AND torrent_id = ? AND removed_at IS NULL",
                params![
                    now,
                    torrent.reason.tag(),
                    torrent.uploaded_bytes as i64,
                    torrent.downloaded_bytes as i64,
                    task_id,
                    torrent.torrent_id,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn retained_volume(&self, task_id: &str) -> Result<u64, RepositoryError> {
        let conn = self.conn()?;
        let total: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size_bytes), 0) FROM tracked_torrents
             WHERE task_id = ? AND removed_at IS NULL",
            params![task_id],
            |row| row.get(0),
        )?;
        Ok(total.max(0) as u64)
    }

    fn increment_acquired(&self, task_id: &str) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO task_counters (task_id, acquired) VALUES (?, 1)
             ON CONFLICT(task_id) DO UPDATE SET acquired = acquired + 1",
            params![task_id],
        )?;
        Ok(())
    }

    fn add_task_counters(
        &self,
        task_id: &str,
        uploaded: u64,
        downloaded: u64,
        removed: u64,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO task_counters (task_id, removed, total_uploaded, total_downloaded)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(task_id) DO UPDATE SET
                removed = removed + ?2,
                total_uploaded = total_uploaded + ?3,
                total_downloaded = total_downloaded + ?4",
            params![task_id, removed as i64, uploaded as i64, downloaded as i64],
        )?;
        Ok(())
    }

    fn task_counters(&self, task_id: &str) -> Result<TaskCounters, RepositoryError> {
        let conn = self.conn()?;
        let counters = conn
            .query_row(
                "SELECT acquired, removed, total_uploaded, total_downloaded
                 FROM task_counters WHERE task_id = ?",
                params![task_id],
                |row| {
                    Ok(TaskCounters {
                        acquired: row.get::<_, i64>(0)?.max(0) as u64,
                        removed: row.get::<_, i64>(1)?.max(0) as u64,
                        total_uploaded: row.get::<_, i64>(2)?.max(0) as u64,
                        total_downloaded: row.get::<_, i64>(3)?.max(0) as u64,
                    })
                },
            )
            .optional()?;
        Ok(counters.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::MediaKind;

    fn subscription(id: &str) -> Subscription {
        Subscription {
            id: id.to_string(),
            kind: MediaKind::Tv,
            title: "Show".to_string(),
            year: Some(2021),
            season: Some("S01".to_string()),
            identity: None,
            fuzzy: false,
            rss_sites: vec!["site-a".to_string()],
            search_sites: Vec::new(),
            over_edition: false,
            filter_rule: None,
            filter_restype: None,
            filter_pix: None,
            filter_team: None,
            save_path: None,
            downloader: None,
            total_episodes: Some(10),
            current_episode: None,
            lack_episodes: None,
            state: SubscriptionState::Rss,
        }
    }

    fn tracked(task: &str, enclosure: &str, id: &str, size: u64) -> NewTrackedTorrent {
        NewTrackedTorrent {
            task_id: task.to_string(),
            enclosure_url: enclosure.to_string(),
            title: format!("Torrent {}", id),
            downloader: "qb".to_string(),
            torrent_id: id.to_string(),
            size_bytes: size,
        }
    }

    #[test]
    fn test_upsert_keeps_bookkeeping() {
        let repo = SqliteRepository::in_memory().unwrap();
        let sub = subscription("s1");
        repo.upsert_subscription(&sub).unwrap();
        repo.update_lack_episodes("s1", &BTreeSet::from([3, 4])).unwrap();

        let mut edited = sub.clone();
        edited.title = "Show Renamed".to_string();
        repo.upsert_subscription(&edited).unwrap();

        let stored = repo.get_subscription("s1").unwrap().unwrap();
        assert_eq!(stored.title, "Show Renamed");
        assert_eq!(stored.lack_episodes, Some(BTreeSet::from([3, 4])));
        assert_eq!(stored.state, SubscriptionState::Rss);
    }

    #[test]
    fn test_list_subscriptions_in_insertion_order() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_subscription(&subscription("sub-9")).unwrap();
        repo.upsert_subscription(&subscription("sub-10")).unwrap();
        repo.upsert_subscription(&subscription("sub-1")).unwrap();

        // updating an existing row keeps its place
        let mut edited = subscription("sub-9");
        edited.title = "Show Renamed".to_string();
        repo.upsert_subscription(&edited).unwrap();

        let ids: Vec<_> = repo
            .list_subscriptions(SubscriptionState::Rss)
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(ids, vec!["sub-9", "sub-10", "sub-1"]);
    }

    #[test]
    fn test_finish_subscription_leaves_rss_list() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.upsert_subscription(&subscription("s1")).unwrap();
        repo.upsert_subscription(&subscription("s2")).unwrap();

        repo.finish_subscription("s1").unwrap();

        let active = repo.list_subscriptions(SubscriptionState::Rss).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "s2");
        let finished = repo.list_subscriptions(SubscriptionState::Finished).unwrap();
        assert_eq!(finished[0].id, "s1");
    }

    #[test]
    fn test_missing_subscription_errors() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(matches!(
            repo.finish_subscription("nope"),
            Err(RepositoryError::NotFound(_))
        ));
        assert!(repo.get_subscription("nope").unwrap().is_none());
    }

    #[test]
    fn test_enclosure_history() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(!repo.is_enclosure_seen("https://e/1").unwrap());
        repo.mark_enclosure_seen("https://e/1", "x").unwrap();
        repo.mark_enclosure_seen("https://e/1", "x").unwrap();
        assert!(repo.is_enclosure_seen("https://e/1").unwrap());
    }

    #[test]
    fn test_insert_tracked_torrent_is_idempotent() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.insert_tracked_torrent(&tracked("t1", "https://e/1", "a", 100)).unwrap());
        assert!(!repo.insert_tracked_torrent(&tracked("t1", "https://e/1", "a", 100)).unwrap());
        // same enclosure for another task is a separate record
        assert!(repo.insert_tracked_torrent(&tracked("t2", "https://e/1", "b", 100)).unwrap());

        assert_eq!(repo.tracked_torrent_ids("t1").unwrap(), vec!["a".to_string()]);
        assert_eq!(repo.retained_volume("t1").unwrap(), 100);
        assert!(repo.is_tracked("t1", "https://e/1").unwrap());
        assert!(!repo.is_tracked("t1", "https://e/2").unwrap());
    }

    #[test]
    fn test_mark_removed_and_drop() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.insert_tracked_torrent(&tracked("t1", "https://e/1", "a", 100)).unwrap();
        repo.insert_tracked_torrent(&tracked("t1", "https://e/2", "b", 200)).unwrap();
        repo.insert_tracked_torrent(&tracked("t1", "https://e/3", "c", 400)).unwrap();
        assert_eq!(repo.retained_volume("t1").unwrap(), 700);

        repo.mark_removed(
            "t1",
            &[RemovedTorrent {
                torrent_id: "a".to_string(),
                reason: RemovalReason::Ratio,
                uploaded_bytes: 300,
                downloaded_bytes: 100,
            }],
        )
        .unwrap();
        repo.drop_tracked_torrents("t1", &["b".to_string()]).unwrap();

        assert_eq!(repo.tracked_torrent_ids("t1").unwrap(), vec!["c".to_string()]);
        assert_eq!(repo.retained_volume("t1").unwrap(), 400);

        let all = repo.tracked_torrents("t1").unwrap();
        let a = all.iter().find(|t| t.torrent_id == "a").unwrap();
        assert_eq!(a.removal_reason, Some(RemovalReason::Ratio));
        assert_eq!(a.uploaded_bytes, 300);
        let b = all.iter().find(|t| t.torrent_id == "b").unwrap();
        assert!(b.removed_at.is_some());
        assert_eq!(b.removal_reason, None);
    }

    #[test]
    fn test_task_counters_accumulate() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert_eq!(repo.task_counters("t1").unwrap(), TaskCounters::default());

        repo.increment_acquired("t1").unwrap();
        repo.increment_acquired("t1").unwrap();
        repo.add_task_counters("t1", 1000, 500, 1).unwrap();
        repo.add_task_counters("t1", 10, 5, 2).unwrap();

        let counters = repo.task_counters("t1").unwrap();
        assert_eq!(counters.acquired, 2);
        assert_eq!(counters.removed, 3);
        assert_eq!(counters.total_uploaded, 1010);
        assert_eq!(counters.total_downloaded, 505);
    }

    #[test]
    fn test_file_backed_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seedwarden.db");
        {
            let repo = SqliteRepository::new(&path).unwrap();
            repo.mark_enclosure_seen("https://e/1", "x").unwrap();
        }
        let repo = SqliteRepository::new(&path).unwrap();
        assert!(repo.is_enclosure_seen("https://e/1").unwrap());
    }
}
