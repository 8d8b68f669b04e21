//! Local encrypted conversion history (SQLite).
//!
//! Records are keyed by user email. Conversion text is encrypted at rest;
//! the key is derived from machine identity, so the database is not
//! portable between accounts by design.

use std::path::{Path, PathBuf};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use rand::RngCore;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use eloqui_core::ConversionRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: i64,
    pub created_at: String,
    pub text: String,
    pub service_type: String,
    pub file_name: Option<String>,
    pub duration_secs: f64,
    pub from_local_engine: bool,
    /// Where the artifact was saved, when it was.
    pub audio_path: Option<String>,
}

impl HistoryItem {
    /// Rebuild the core record (without its in-memory artifact) for replay.
    pub fn into_record(self) -> ConversionRecord {
        ConversionRecord {
            id: self.id,
            text: self.text,
            date: self.created_at,
            service_type: self.service_type,
            file_name: self.file_name,
            duration_secs: self.duration_secs,
            from_local_engine: self.from_local_engine,
            audio_url: self.audio_path,
            audio: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub items: Vec<HistoryItem>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsBucket {
    pub date: String,
    pub conversions: usize,
    pub chars: usize,
    pub audio_secs: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    pub range_days: usize,
    pub total_conversions: usize,
    pub total_chars: usize,
    pub total_audio_secs: f64,
    pub local_engine_share: f32,
    pub buckets: Vec<StatsBucket>,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    db_path: PathBuf,
    cipher: TextCipher,
}

#[derive(Debug, Clone)]
struct TextCipher {
    key: [u8; 32],
}

impl TextCipher {
    fn new(scope: &Path) -> Self {
        let username = std::env::var("USERNAME")
            .or_else(|_| std::env::var("USER"))
            .unwrap_or_default();
        let host = std::env::var("COMPUTERNAME")
            .or_else(|_| std::env::var("HOSTNAME"))
            .unwrap_or_default();
        let material = format!(
            "{username}|{host}|{}|eloqui-history-v1",
            scope.to_string_lossy()
        );
        let mut hasher = Sha256::new();
        hasher.update(material.as_bytes());
        let digest = hasher.finalize();
        let mut key = [0u8; 32];
        key.copy_from_slice(&digest[..32]);
        Self { key }
    }

    fn encrypt(&self, plain: &str) -> Result<String, String> {
        if plain.is_empty() {
            return Ok(String::new());
        }
        let cipher = Aes256Gcm::new_from_slice(&self.key).map_err(|e| e.to_string())?;
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let encrypted = cipher
            .encrypt(nonce, plain.as_bytes())
            .map_err(|e| e.to_string())?;
        let mut out = Vec::with_capacity(12 + encrypted.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&encrypted);
        Ok(BASE64.encode(out))
    }

    fn decrypt(&self, encoded: &str) -> Option<String> {
        if encoded.is_empty() {
            return Some(String::new());
        }
        let bytes = BASE64.decode(encoded).ok()?;
        if bytes.len() <= 12 {
            return None;
        }
        let (nonce_bytes, cipher_bytes) = bytes.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = Aes256Gcm::new_from_slice(&self.key).ok()?;
        let plain = cipher.decrypt(nonce, cipher_bytes).ok()?;
        String::from_utf8(plain).ok()
    }
}

impl LocalStore {
    pub fn default_db_path() -> PathBuf {
        crate::settings::default_data_dir().join("eloqui.db")
    }

    pub fn new(db_path: PathBuf) -> Result<Self, String> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        let store = Self {
            cipher: TextCipher::new(&db_path),
            db_path,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, String> {
        Connection::open(&self.db_path).map_err(|e| e.to_string())
    }

    fn init_schema(&self) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode = WAL;
            CREATE TABLE IF NOT EXISTS conversion_history (
              id INTEGER PRIMARY KEY,
              user_email TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              text_enc TEXT NOT NULL,
              service_type TEXT NOT NULL,
              file_name TEXT,
              duration_secs REAL NOT NULL DEFAULT 0,
              from_local_engine INTEGER NOT NULL DEFAULT 1,
              audio_path TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_user_created
              ON conversion_history(user_email, created_at DESC);
            "#,
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Append one record for `user_email`. Records are immutable once
    /// inserted, except for a later artifact-path backfill.
    pub fn insert_record(
        &self,
        user_email: &str,
        record: &ConversionRecord,
        audio_path: Option<&str>,
    ) -> Result<(), String> {
        let created_at = DateTime::parse_from_rfc3339(&record.date)
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|_| Utc::now().timestamp());
        let text_enc = self.cipher.encrypt(&record.text)?;
        let conn = self.open()?;
        conn.execute(
            r#"
            INSERT INTO conversion_history
            (id, user_email, created_at, text_enc, service_type, file_name, duration_secs, from_local_engine, audio_path)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                record.id,
                user_email,
                created_at,
                text_enc,
                record.service_type,
                record.file_name,
                record.duration_secs,
                if record.from_local_engine { 1_i64 } else { 0_i64 },
                audio_path,
            ],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    /// Backfill the saved-artifact path of an existing record.
    pub fn set_audio_path(&self, id: i64, audio_path: &str) -> Result<(), String> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE conversion_history SET audio_path = ?2 WHERE id = ?1",
            params![id, audio_path],
        )
        .map_err(|e| e.to_string())?;
        Ok(())
    }

    pub fn get_record(&self, user_email: &str, id: i64) -> Result<Option<HistoryItem>, String> {
        let page = self.get_history(user_email, 1, 200, None)?;
        Ok(page.items.into_iter().find(|item| item.id == id))
    }

    pub fn get_history(
        &self,
        user_email: &str,
        page: usize,
        page_size: usize,
        query: Option<String>,
    ) -> Result<HistoryPage, String> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, 200);
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, created_at, text_enc, service_type, file_name, duration_secs, from_local_engine, audio_path
                 FROM conversion_history WHERE user_email = ?1
                 ORDER BY created_at DESC LIMIT 5000",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt.query(params![user_email]).map_err(|e| e.to_string())?;
        let query = query
            .as_ref()
            .map(|q| q.trim().to_ascii_lowercase())
            .filter(|q| !q.is_empty());

        let mut items = Vec::new();
        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let enc: String = row.get(2).map_err(|e| e.to_string())?;
            let Some(text) = self.cipher.decrypt(&enc) else {
                continue;
            };
            if let Some(ref q) = query {
                if !text.to_ascii_lowercase().contains(q) {
                    continue;
                }
            }
            let created_at: i64 = row.get(1).map_err(|e| e.to_string())?;
            items.push(HistoryItem {
                id: row.get(0).map_err(|e| e.to_string())?,
                created_at: ts_to_rfc3339(created_at),
                text,
                service_type: row.get(3).map_err(|e| e.to_string())?,
                file_name: row.get(4).map_err(|e| e.to_string())?,
                duration_secs: row.get(5).map_err(|e| e.to_string())?,
                from_local_engine: row.get::<_, i64>(6).map_err(|e| e.to_string())? != 0,
                audio_path: row.get(7).map_err(|e| e.to_string())?,
            });
        }

        let total = items.len();
        let start = (page - 1).saturating_mul(page_size);
        let end = (start + page_size).min(total);
        let paged = if start >= total {
            Vec::new()
        } else {
            items[start..end].to_vec()
        };

        Ok(HistoryPage {
            items: paged,
            total,
            page,
            page_size,
        })
    }

    pub fn delete_history(
        &self,
        user_email: &str,
        ids: Option<Vec<i64>>,
        older_than_days: Option<usize>,
    ) -> Result<usize, String> {
        let conn = self.open()?;
        let mut deleted = 0usize;

        match (&ids, older_than_days) {
            (None, None) => {
                deleted += conn
                    .execute(
                        "DELETE FROM conversion_history WHERE user_email = ?1",
                        params![user_email],
                    )
                    .map_err(|e| e.to_string())?;
            }
            _ => {
                if let Some(ids) = ids {
                    for id in ids {
                        deleted += conn
                            .execute(
                                "DELETE FROM conversion_history WHERE user_email = ?1 AND id = ?2",
                                params![user_email, id],
                            )
                            .map_err(|e| e.to_string())?;
                    }
                }
                if let Some(days) = older_than_days {
                    let cutoff = Utc::now() - Duration::days(days as i64);
                    deleted += conn
                        .execute(
                            "DELETE FROM conversion_history WHERE user_email = ?1 AND created_at < ?2",
                            params![user_email, cutoff.timestamp()],
                        )
                        .map_err(|e| e.to_string())?;
                }
            }
        }

        Ok(deleted)
    }

    pub fn prune_history(&self, retention_days: usize) -> Result<usize, String> {
        if retention_days == 0 {
            return Ok(0);
        }
        let cutoff = Utc::now() - Duration::days(retention_days as i64);
        let conn = self.open()?;
        let changed = conn
            .execute(
                "DELETE FROM conversion_history WHERE created_at < ?1",
                params![cutoff.timestamp()],
            )
            .map_err(|e| e.to_string())?;
        Ok(changed)
    }

    pub fn get_stats(&self, user_email: &str, range_days: usize) -> Result<StatsPayload, String> {
        let range_days = range_days.clamp(1, 365);
        let cutoff = Utc::now() - Duration::days(range_days as i64);
        let conn = self.open()?;
        let mut stmt = conn
            .prepare(
                "SELECT created_at, text_enc, duration_secs, from_local_engine
                 FROM conversion_history
                 WHERE user_email = ?1 AND created_at >= ?2
                 ORDER BY created_at ASC",
            )
            .map_err(|e| e.to_string())?;
        let mut rows = stmt
            .query(params![user_email, cutoff.timestamp()])
            .map_err(|e| e.to_string())?;

        #[derive(Default)]
        struct DayAgg {
            conversions: usize,
            chars: usize,
            audio_secs: f64,
        }

        let mut buckets: std::collections::BTreeMap<(i32, u32, u32), DayAgg> =
            std::collections::BTreeMap::new();
        let mut total_conversions = 0usize;
        let mut total_chars = 0usize;
        let mut total_audio_secs = 0f64;
        let mut local_engine_count = 0usize;

        while let Some(row) = rows.next().map_err(|e| e.to_string())? {
            let ts: i64 = row.get(0).map_err(|e| e.to_string())?;
            let enc: String = row.get(1).map_err(|e| e.to_string())?;
            let chars = self
                .cipher
                .decrypt(&enc)
                .map(|t| t.chars().count())
                .unwrap_or(0);
            let secs: f64 = row.get(2).map_err(|e| e.to_string())?;
            let from_local: i64 = row.get(3).map_err(|e| e.to_string())?;

            let dt = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);
            let day = buckets.entry((dt.year(), dt.month(), dt.day())).or_default();
            day.conversions += 1;
            day.chars += chars;
            day.audio_secs += secs;

            total_conversions += 1;
            total_chars += chars;
            total_audio_secs += secs;
            if from_local != 0 {
                local_engine_count += 1;
            }
        }

        let mut out_buckets = Vec::with_capacity(buckets.len());
        for ((y, m, d), day) in buckets {
            out_buckets.push(StatsBucket {
                date: format!("{y:04}-{m:02}-{d:02}"),
                conversions: day.conversions,
                chars: day.chars,
                audio_secs: day.audio_secs,
            });
        }

        Ok(StatsPayload {
            range_days,
            total_conversions,
            total_chars,
            total_audio_secs,
            local_engine_share: if total_conversions == 0 {
                0.0
            } else {
                local_engine_count as f32 / total_conversions as f32
            },
            buckets: out_buckets,
        })
    }
}

fn ts_to_rfc3339(ts: i64) -> String {
    let dt: DateTime<Utc> = Utc.timestamp_opt(ts, 0).single().unwrap_or_else(Utc::now);
    dt.to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_store(tag: &str) -> (LocalStore, PathBuf) {
        let dir = std::env::temp_dir().join(format!("eloqui-store-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        let store = LocalStore::new(dir.join("test.db")).expect("store");
        (store, dir)
    }

    fn record(id: i64, text: &str) -> ConversionRecord {
        ConversionRecord {
            id,
            text: text.into(),
            date: Utc::now().to_rfc3339(),
            service_type: "illustrator".into(),
            file_name: None,
            duration_secs: 3.0,
            from_local_engine: true,
            audio_url: None,
            audio: None,
        }
    }

    #[test]
    fn insert_and_read_back_round_trips_the_text() {
        let (store, dir) = temp_store("roundtrip");
        store
            .insert_record("ana@example.com", &record(1, "Hola mundo"), None)
            .unwrap();

        let page = store.get_history("ana@example.com", 1, 10, None).unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].text, "Hola mundo");
        assert!(page.items[0].from_local_engine);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn history_is_scoped_per_user() {
        let (store, dir) = temp_store("peruser");
        store
            .insert_record("ana@example.com", &record(1, "de ana"), None)
            .unwrap();
        store
            .insert_record("luis@example.com", &record(2, "de luis"), None)
            .unwrap();

        let ana = store.get_history("ana@example.com", 1, 10, None).unwrap();
        assert_eq!(ana.total, 1);
        assert_eq!(ana.items[0].text, "de ana");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn search_filters_by_decrypted_text() {
        let (store, dir) = temp_store("search");
        store
            .insert_record("ana@example.com", &record(1, "la primera frase"), None)
            .unwrap();
        store
            .insert_record("ana@example.com", &record(2, "otra cosa"), None)
            .unwrap();

        let page = store
            .get_history("ana@example.com", 1, 10, Some("primera".into()))
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.items[0].id, 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn audio_path_backfill_survives_reads() {
        let (store, dir) = temp_store("backfill");
        store
            .insert_record("ana@example.com", &record(5, "texto"), None)
            .unwrap();
        store.set_audio_path(5, "/tmp/voz.wav").unwrap();

        let item = store.get_record("ana@example.com", 5).unwrap().unwrap();
        assert_eq!(item.audio_path.as_deref(), Some("/tmp/voz.wav"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn clear_deletes_only_the_given_user() {
        let (store, dir) = temp_store("clear");
        store
            .insert_record("ana@example.com", &record(1, "uno"), None)
            .unwrap();
        store
            .insert_record("luis@example.com", &record(2, "dos"), None)
            .unwrap();

        let deleted = store.delete_history("ana@example.com", None, None).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(
            store.get_history("luis@example.com", 1, 10, None).unwrap().total,
            1
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn stats_aggregate_by_day() {
        let (store, dir) = temp_store("stats");
        store
            .insert_record("ana@example.com", &record(1, "12345"), None)
            .unwrap();
        store
            .insert_record("ana@example.com", &record(2, "abcde"), None)
            .unwrap();

        let stats = store.get_stats("ana@example.com", 30).unwrap();
        assert_eq!(stats.total_conversions, 2);
        assert_eq!(stats.total_chars, 10);
        assert!((stats.total_audio_secs - 6.0).abs() < 1e-9);
        assert!((stats.local_engine_share - 1.0).abs() < 1e-6);
        assert_eq!(stats.buckets.len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn cipher_rejects_tampered_payloads() {
        let cipher = TextCipher::new(Path::new("/tmp/test-scope"));
        let encrypted = cipher.encrypt("secreto").unwrap();
        let mut tampered = BASE64.decode(&encrypted).unwrap();
        let last = tampered.len() - 1;
        tampered[last] ^= 0xFF;
        assert!(cipher.decrypt(&BASE64.encode(tampered)).is_none());
        assert_eq!(cipher.decrypt(&encrypted).as_deref(), Some("secreto"));
    }
}
