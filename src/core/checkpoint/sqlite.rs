//! SQLite checkpoint backend.

use super::{
    failure_write, pair_write, signature_write, CheckpointStore, Fingerprint, ImageRecord,
    ImageState, PairOutcome, RunState, StoreCounts, StoredSignature, WriteOutcome,
};
use crate::core::comparator::{PairVerdict, Verdict};
use crate::core::enumerator::PairKey;
use crate::core::signature::Signature;
use crate::error::{self, CheckpointError};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS run_state (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        state TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS images (
        idx INTEGER PRIMARY KEY,
        path TEXT NOT NULL UNIQUE,
        file_size INTEGER NOT NULL,
        file_modified INTEGER NOT NULL,
        state TEXT NOT NULL,
        reason TEXT,
        width INTEGER,
        height INTEGER,
        side INTEGER,
        thumbnail BLOB,
        hash BLOB,
        digest INTEGER
    );

    CREATE INDEX IF NOT EXISTS idx_images_state ON images(state);

    CREATE TABLE IF NOT EXISTS pairs (
        a INTEGER NOT NULL,
        b INTEGER NOT NULL,
        outcome TEXT NOT NULL,
        score REAL,
        prefiltered INTEGER NOT NULL DEFAULT 0,
        error TEXT,
        PRIMARY KEY (a, b),
        CHECK (a < b)
    );

    CREATE INDEX IF NOT EXISTS idx_pairs_b ON pairs(b);
";

/// SQLite-backed checkpoint
///
/// WAL journal with `synchronous = FULL`: a write is on disk once the call
/// that made it returns. Each write runs in its own transaction, so a crash
/// never leaves half a record behind.
pub struct SqliteCheckpointStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
}

/// Columns needed to rebuild a signature
struct SignatureRow {
    fingerprint: Fingerprint,
    state: String,
    width: Option<i64>,
    height: Option<i64>,
    side: Option<i64>,
    thumbnail: Option<Vec<u8>>,
    hash: Option<Vec<u8>>,
    digest: Option<i64>,
}

impl SqliteCheckpointStore {
    /// Open or create a checkpoint database at the given path
    pub fn open(path: &Path) -> Result<Self, CheckpointError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| CheckpointError::OpenFailed {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            }
        }

        let conn = Connection::open(path).map_err(|e| CheckpointError::OpenFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::configure(conn, path)
    }

    /// Open a throwaway database that lives only as long as the store
    pub fn open_in_memory() -> Result<Self, CheckpointError> {
        let conn = Connection::open_in_memory().map_err(|e| CheckpointError::OpenFailed {
            path: PathBuf::from(":memory:"),
            reason: e.to_string(),
        })?;

        Self::configure(conn, Path::new(":memory:"))
    }

    fn configure(conn: Connection, path: &Path) -> Result<Self, CheckpointError> {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "FULL")?;

        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version != 0 && version != SCHEMA_VERSION {
            return Err(CheckpointError::Corrupted {
                path: path.to_path_buf(),
                reason: format!("unsupported schema version {version}"),
            });
        }

        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        debug!(path = %path.display(), "checkpoint opened");

        Ok(Self {
            conn: Mutex::new(conn),
            db_path: path.to_path_buf(),
        })
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Write a consistent copy of the checkpoint to `destination`.
    ///
    /// Fails if `destination` already exists.
    pub fn backup(&self, destination: &Path) -> Result<(), CheckpointError> {
        if destination.exists() {
            return Err(CheckpointError::QueryFailed(format!(
                "backup destination already exists: {}",
                destination.display()
            )));
        }
        if let Some(parent) = destination.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| CheckpointError::QueryFailed(e.to_string()))?;
            }
        }

        let conn = self.lock()?;
        conn.execute(
            "VACUUM INTO ?1",
            params![destination.to_string_lossy().into_owned()],
        )?;

        debug!(destination = %destination.display(), "checkpoint backed up");
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, CheckpointError> {
        self.conn.lock().map_err(|_| CheckpointError::Poisoned {
            path: self.db_path.clone(),
        })
    }

    fn corrupted(&self, reason: impl Into<String>) -> CheckpointError {
        CheckpointError::Corrupted {
            path: self.db_path.clone(),
            reason: reason.into(),
        }
    }

    fn parse_state(&self, state: &str, reason: Option<String>) -> Result<ImageState, CheckpointError> {
        match state {
            "discovered" => Ok(ImageState::Discovered),
            "signed" => Ok(ImageState::Signed),
            "failed" => Ok(ImageState::Failed {
                reason: reason.unwrap_or_default(),
            }),
            other => Err(self.corrupted(format!("unknown image state '{other}'"))),
        }
    }

    fn parse_outcome(
        &self,
        outcome: &str,
        score: Option<f64>,
        prefiltered: i64,
        error: Option<String>,
    ) -> Result<PairOutcome, CheckpointError> {
        if outcome == "error" {
            return Ok(PairOutcome::Error {
                message: error.unwrap_or_default(),
            });
        }

        let verdict = Verdict::parse(outcome)
            .ok_or_else(|| self.corrupted(format!("unknown pair outcome '{outcome}'")))?;
        let score = score.ok_or_else(|| self.corrupted("resolved pair without a score"))?;

        Ok(PairOutcome::Resolved(PairVerdict {
            score,
            verdict,
            prefiltered: prefiltered != 0,
        }))
    }

    /// Image record plus stored digest
    fn fetch_image(
        &self,
        conn: &Connection,
        index: u32,
    ) -> Result<Option<(ImageRecord, Option<u64>)>, CheckpointError> {
        let result = conn.query_row(
            "SELECT path, file_size, file_modified, state, reason, digest
             FROM images WHERE idx = ?1",
            params![index as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<i64>>(5)?,
                ))
            },
        );

        match result {
            Ok((path, size, modified, state, reason, digest)) => {
                let record = ImageRecord {
                    index,
                    path: PathBuf::from(path),
                    fingerprint: Fingerprint {
                        size: size as u64,
                        modified_secs: modified,
                    },
                    state: self.parse_state(&state, reason)?,
                };
                Ok(Some((record, digest.map(|d| d as u64))))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn fetch_pair(&self, conn: &Connection, key: PairKey) -> Result<Option<PairOutcome>, CheckpointError> {
        let result = conn.query_row(
            "SELECT outcome, score, prefiltered, error FROM pairs WHERE a = ?1 AND b = ?2",
            params![key.first() as i64, key.second() as i64],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<f64>>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        );

        match result {
            Ok((outcome, score, prefiltered, error)) => self
                .parse_outcome(&outcome, score, prefiltered, error)
                .map(Some),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn rebuild_signature(row: SignatureRow) -> StoredSignature {
        let parts = (
            row.width.and_then(|v| u32::try_from(v).ok()),
            row.height.and_then(|v| u32::try_from(v).ok()),
            row.side.and_then(|v| u32::try_from(v).ok()),
            row.thumbnail,
            row.hash,
            row.digest,
        );

        let (Some(width), Some(height), Some(side), Some(thumbnail), Some(hash), Some(digest)) =
            parts
        else {
            return StoredSignature::Unreadable {
                reason: "signed image is missing signature columns".to_string(),
            };
        };

        match Signature::from_parts(width, height, side, thumbnail, hash) {
            Some(signature) if signature.digest() == digest as u64 => {
                StoredSignature::Present(signature)
            }
            Some(_) => StoredSignature::Unreadable {
                reason: "stored signature does not match its digest".to_string(),
            },
            None => StoredSignature::Unreadable {
                reason: "stored thumbnail has the wrong shape".to_string(),
            },
        }
    }
}

impl CheckpointStore for SqliteCheckpointStore {
    fn load_run_state(&self) -> Result<Option<RunState>, CheckpointError> {
        let conn = self.lock()?;

        let result = conn.query_row("SELECT state FROM run_state WHERE id = 1", [], |row| {
            row.get::<_, String>(0)
        });

        match result {
            Ok(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| self.corrupted(format!("unreadable run state: {e}"))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn save_run_state(&self, state: &RunState) -> Result<(), CheckpointError> {
        let json = serde_json::to_string(state)
            .map_err(|e| CheckpointError::Serialization(e.to_string()))?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO run_state (id, state) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET state = excluded.state",
            params![json],
        )?;

        Ok(())
    }

    fn images(&self) -> Result<Vec<ImageRecord>, CheckpointError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT idx, path, file_size, file_modified, state, reason
             FROM images ORDER BY idx",
        )?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(idx, path, size, modified, state, reason)| {
                Ok(ImageRecord {
                    index: u32::try_from(idx)
                        .map_err(|_| self.corrupted(format!("image index {idx} out of range")))?,
                    path: PathBuf::from(path),
                    fingerprint: Fingerprint {
                        size: size as u64,
                        modified_secs: modified,
                    },
                    state: self.parse_state(&state, reason)?,
                })
            })
            .collect()
    }

    fn register_image(&self, record: &ImageRecord) -> Result<(), CheckpointError> {
        let reason = match &record.state {
            ImageState::Failed { reason } => Some(reason.as_str()),
            _ => None,
        };

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO images (idx, path, file_size, file_modified, state, reason)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.index as i64,
                record.path.to_string_lossy(),
                record.fingerprint.size as i64,
                record.fingerprint.modified_secs,
                record.state.as_str(),
                reason,
            ],
        )?;

        Ok(())
    }

    fn load_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<StoredSignature, CheckpointError> {
        let conn = self.lock()?;

        let result = conn.query_row(
            "SELECT file_size, file_modified, state, width, height, side, thumbnail, hash, digest
             FROM images WHERE idx = ?1",
            params![index as i64],
            |row| {
                Ok(SignatureRow {
                    fingerprint: Fingerprint {
                        size: row.get::<_, i64>(0)? as u64,
                        modified_secs: row.get(1)?,
                    },
                    state: row.get(2)?,
                    width: row.get(3)?,
                    height: row.get(4)?,
                    side: row.get(5)?,
                    thumbnail: row.get(6)?,
                    hash: row.get(7)?,
                    digest: row.get(8)?,
                })
            },
        );

        let row = match result {
            Ok(row) => row,
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                return Err(CheckpointError::UnknownImage { index })
            }
            Err(e) => return Err(e.into()),
        };

        if row.state != "signed" || row.fingerprint != *fingerprint {
            return Ok(StoredSignature::Absent);
        }

        Ok(Self::rebuild_signature(row))
    }

    fn record_signature(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
        signature: &Signature,
    ) -> error::Result<WriteOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CheckpointError::from)?;

        let (record, digest) = self
            .fetch_image(&tx, index)?
            .ok_or(CheckpointError::UnknownImage { index })?;

        let outcome = signature_write(
            index,
            &record.path,
            &record.state,
            &record.fingerprint,
            digest,
            fingerprint,
            signature,
        )?;

        if outcome.is_written() {
            tx.execute(
                "UPDATE images
                 SET state = 'signed', reason = NULL, width = ?2, height = ?3, side = ?4,
                     thumbnail = ?5, hash = ?6, digest = ?7
                 WHERE idx = ?1",
                params![
                    index as i64,
                    signature.width() as i64,
                    signature.height() as i64,
                    signature.side() as i64,
                    signature.thumbnail(),
                    signature.hash(),
                    signature.digest() as i64,
                ],
            )
            .map_err(CheckpointError::from)?;
            tx.commit().map_err(CheckpointError::from)?;
        }

        Ok(outcome)
    }

    fn record_failure(&self, index: u32, reason: &str) -> error::Result<WriteOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CheckpointError::from)?;

        let (record, _) = self
            .fetch_image(&tx, index)?
            .ok_or(CheckpointError::UnknownImage { index })?;

        let outcome = failure_write(index, &record.path, &record.state)?;

        if outcome.is_written() {
            tx.execute(
                "UPDATE images SET state = 'failed', reason = ?2 WHERE idx = ?1",
                params![index as i64, reason],
            )
            .map_err(CheckpointError::from)?;
            tx.commit().map_err(CheckpointError::from)?;
        }

        Ok(outcome)
    }

    fn mark_failed(&self, index: u32, reason: &str) -> Result<(), CheckpointError> {
        let conn = self.lock()?;

        let changed = conn.execute(
            "UPDATE images
             SET state = 'failed', reason = ?2, width = NULL, height = NULL, side = NULL,
                 thumbnail = NULL, hash = NULL, digest = NULL
             WHERE idx = ?1",
            params![index as i64, reason],
        )?;

        if changed == 0 {
            return Err(CheckpointError::UnknownImage { index });
        }
        Ok(())
    }

    fn invalidate_image(
        &self,
        index: u32,
        fingerprint: &Fingerprint,
    ) -> Result<usize, CheckpointError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let changed = tx.execute(
            "UPDATE images
             SET file_size = ?2, file_modified = ?3, state = 'discovered', reason = NULL,
                 width = NULL, height = NULL, side = NULL,
                 thumbnail = NULL, hash = NULL, digest = NULL
             WHERE idx = ?1",
            params![
                index as i64,
                fingerprint.size as i64,
                fingerprint.modified_secs
            ],
        )?;
        if changed == 0 {
            return Err(CheckpointError::UnknownImage { index });
        }

        let deleted = tx.execute(
            "DELETE FROM pairs WHERE a = ?1 OR b = ?1",
            params![index as i64],
        )?;

        tx.commit()?;
        Ok(deleted)
    }

    fn clear_failed(&self) -> Result<usize, CheckpointError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM pairs
             WHERE a IN (SELECT idx FROM images WHERE state = 'failed')
                OR b IN (SELECT idx FROM images WHERE state = 'failed')",
            [],
        )?;
        let reset = tx.execute(
            "UPDATE images SET state = 'discovered', reason = NULL WHERE state = 'failed'",
            [],
        )?;

        tx.commit()?;
        Ok(reset)
    }

    fn record_pair(&self, key: PairKey, outcome: &PairOutcome) -> error::Result<WriteOutcome> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(CheckpointError::from)?;

        let stored = self.fetch_pair(&tx, key)?;
        let write = pair_write(key, stored.as_ref(), outcome)?;

        if write.is_written() {
            let (name, score, prefiltered, error) = match outcome {
                PairOutcome::Resolved(verdict) => (
                    verdict.verdict.as_str(),
                    Some(verdict.score),
                    verdict.prefiltered,
                    None,
                ),
                PairOutcome::Error { message } => ("error", None, false, Some(message.as_str())),
            };

            tx.execute(
                "INSERT INTO pairs (a, b, outcome, score, prefiltered, error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    key.first() as i64,
                    key.second() as i64,
                    name,
                    score,
                    prefiltered as i64,
                    error,
                ],
            )
            .map_err(CheckpointError::from)?;
            tx.commit().map_err(CheckpointError::from)?;
        }

        Ok(write)
    }

    fn pair_outcome(&self, key: PairKey) -> Result<Option<PairOutcome>, CheckpointError> {
        let conn = self.lock()?;
        self.fetch_pair(&conn, key)
    }

    fn resolved_pairs(&self) -> Result<HashSet<PairKey>, CheckpointError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare("SELECT a, b FROM pairs")?;
        let keys = stmt
            .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        keys.into_iter()
            .map(|(a, b)| {
                PairKey::new(a as u32, b as u32)
                    .ok_or_else(|| self.corrupted(format!("self-pair ({a}, {b}) stored")))
            })
            .collect()
    }

    fn edges(&self) -> Result<Vec<(PairKey, PairVerdict)>, CheckpointError> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT a, b, outcome, score, prefiltered FROM pairs
             WHERE outcome IN ('duplicate', 'similar')
             ORDER BY a, b",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<f64>>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut edges = Vec::with_capacity(rows.len());
        for (a, b, outcome, score, prefiltered) in rows {
            let key = PairKey::new(a as u32, b as u32)
                .ok_or_else(|| self.corrupted(format!("self-pair ({a}, {b}) stored")))?;
            if let PairOutcome::Resolved(verdict) =
                self.parse_outcome(&outcome, score, prefiltered, None)?
            {
                edges.push((key, verdict));
            }
        }

        Ok(edges)
    }

    fn counts(&self) -> Result<StoreCounts, CheckpointError> {
        let conn = self.lock()?;

        let (images, discovered, signed, failed) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(state = 'discovered'), 0),
                    COALESCE(SUM(state = 'signed'), 0),
                    COALESCE(SUM(state = 'failed'), 0)
             FROM images",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        let (resolved, errored, duplicates, similar) = conn.query_row(
            "SELECT COALESCE(SUM(outcome != 'error'), 0),
                    COALESCE(SUM(outcome = 'error'), 0),
                    COALESCE(SUM(outcome = 'duplicate'), 0),
                    COALESCE(SUM(outcome = 'similar'), 0)
             FROM pairs",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        Ok(StoreCounts {
            images: images as usize,
            discovered: discovered as usize,
            signed: signed as usize,
            failed: failed as usize,
            pairs_resolved: resolved as u64,
            pairs_errored: errored as u64,
            duplicate_pairs: duplicates as u64,
            similar_pairs: similar as u64,
        })
    }

    fn clear(&self) -> Result<(), CheckpointError> {
        let conn = self.lock()?;

        conn.execute_batch(
            "BEGIN;
             DELETE FROM pairs;
             DELETE FROM images;
             DELETE FROM run_state;
             COMMIT;",
        )?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checkpoint::RunSettings;
    use crate::error::EngineError;
    use tempfile::TempDir;

    fn record(index: u32, name: &str) -> ImageRecord {
        ImageRecord {
            index,
            path: PathBuf::from(format!("/photos/{name}")),
            fingerprint: Fingerprint {
                size: 1000 + index as u64,
                modified_secs: 1_700_000_000,
            },
            state: ImageState::Discovered,
        }
    }

    fn signature(fill: u8) -> Signature {
        Signature::from_parts(100, 80, 2, vec![fill; 4], vec![0xAB; 8]).unwrap()
    }

    fn verdict(score: f64, verdict: Verdict) -> PairOutcome {
        PairOutcome::Resolved(PairVerdict::scored(score, verdict))
    }

    fn key(a: u32, b: u32) -> PairKey {
        PairKey::new(a, b).unwrap()
    }

    #[test]
    fn creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("checkpoint.db");

        let store = SqliteCheckpointStore::open(&db_path).unwrap();

        assert!(db_path.exists());
        assert_eq!(store.counts().unwrap(), StoreCounts::default());
    }

    #[test]
    fn state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("checkpoint.db");
        let first = record(0, "a.jpg");
        let second = record(1, "b.jpg");

        {
            let store = SqliteCheckpointStore::open(&db_path).unwrap();
            store.register_image(&first).unwrap();
            store.register_image(&second).unwrap();
            store
                .record_signature(0, &first.fingerprint, &signature(1))
                .unwrap();
            store.record_failure(1, "truncated file").unwrap();
            store
                .record_pair(key(0, 1), &verdict(0.97, Verdict::Duplicate))
                .unwrap();
        }

        let store = SqliteCheckpointStore::open(&db_path).unwrap();
        let images = store.images().unwrap();

        assert_eq!(images.len(), 2);
        assert_eq!(images[0].state, ImageState::Signed);
        assert_eq!(
            images[1].state,
            ImageState::Failed {
                reason: "truncated file".to_string()
            }
        );
        assert_eq!(
            store.load_signature(0, &first.fingerprint).unwrap(),
            StoredSignature::Present(signature(1))
        );
        assert_eq!(
            store.pair_outcome(key(0, 1)).unwrap(),
            Some(verdict(0.97, Verdict::Duplicate))
        );
    }

    #[test]
    fn rewriting_identical_results_is_a_no_op() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let image = record(0, "a.jpg");
        store.register_image(&image).unwrap();
        store.register_image(&record(1, "b.jpg")).unwrap();

        let sig = signature(5);
        assert_eq!(
            store.record_signature(0, &image.fingerprint, &sig).unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            store.record_signature(0, &image.fingerprint, &sig).unwrap(),
            WriteOutcome::Unchanged
        );

        let outcome = verdict(0.42, Verdict::Distinct);
        assert_eq!(
            store.record_pair(key(0, 1), &outcome).unwrap(),
            WriteOutcome::Written
        );
        assert_eq!(
            store.record_pair(key(0, 1), &outcome).unwrap(),
            WriteOutcome::Unchanged
        );
        assert_eq!(store.counts().unwrap().pairs_resolved, 1);
    }

    #[test]
    fn conflicting_pair_verdict_is_a_divergence() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store
            .record_pair(key(2, 3), &verdict(0.99, Verdict::Duplicate))
            .unwrap();

        let result = store.record_pair(key(2, 3), &verdict(0.50, Verdict::Distinct));

        assert!(matches!(result, Err(EngineError::Divergence(_))));
        assert_eq!(
            store.pair_outcome(key(2, 3)).unwrap(),
            Some(verdict(0.99, Verdict::Duplicate))
        );
    }

    #[test]
    fn conflicting_signature_is_a_divergence() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let image = record(0, "a.jpg");
        store.register_image(&image).unwrap();
        store
            .record_signature(0, &image.fingerprint, &signature(1))
            .unwrap();

        let result = store.record_signature(0, &image.fingerprint, &signature(2));

        assert!(matches!(result, Err(EngineError::Divergence(_))));
    }

    #[test]
    fn invalidate_resets_image_and_drops_its_pairs() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        for (i, name) in ["a.jpg", "b.jpg", "c.jpg"].iter().enumerate() {
            let image = record(i as u32, name);
            store.register_image(&image).unwrap();
            store
                .record_signature(i as u32, &image.fingerprint, &signature(i as u8))
                .unwrap();
        }
        store.record_pair(key(0, 1), &verdict(0.1, Verdict::Distinct)).unwrap();
        store.record_pair(key(0, 2), &verdict(0.1, Verdict::Distinct)).unwrap();
        store.record_pair(key(1, 2), &verdict(0.1, Verdict::Distinct)).unwrap();

        let changed = Fingerprint {
            size: 5,
            modified_secs: 1_800_000_000,
        };
        let deleted = store.invalidate_image(1, &changed).unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(
            store.resolved_pairs().unwrap(),
            [key(0, 2)].into_iter().collect::<HashSet<_>>()
        );
        let images = store.images().unwrap();
        assert_eq!(images[1].state, ImageState::Discovered);
        assert_eq!(images[1].fingerprint, changed);
        assert_eq!(
            store.load_signature(1, &changed).unwrap(),
            StoredSignature::Absent
        );
    }

    #[test]
    fn stale_fingerprint_is_rejected() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.register_image(&record(0, "a.jpg")).unwrap();

        let other = Fingerprint {
            size: 1,
            modified_secs: 1,
        };
        let result = store.record_signature(0, &other, &signature(0));

        assert!(matches!(
            result,
            Err(EngineError::Checkpoint(CheckpointError::StaleFingerprint { index: 0 }))
        ));
    }

    #[test]
    fn tampered_signature_is_unreadable() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        let image = record(0, "a.jpg");
        store.register_image(&image).unwrap();
        store
            .record_signature(0, &image.fingerprint, &signature(3))
            .unwrap();

        store
            .lock()
            .unwrap()
            .execute("UPDATE images SET thumbnail = X'00000000' WHERE idx = 0", [])
            .unwrap();

        assert!(matches!(
            store.load_signature(0, &image.fingerprint).unwrap(),
            StoredSignature::Unreadable { .. }
        ));
    }

    #[test]
    fn clear_failed_returns_images_to_discovered() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.register_image(&record(0, "a.jpg")).unwrap();
        store.register_image(&record(1, "b.jpg")).unwrap();
        store.record_failure(0, "bad header").unwrap();
        store.mark_failed(1, "file disappeared").unwrap();

        assert_eq!(store.clear_failed().unwrap(), 2);
        assert_eq!(store.counts().unwrap().discovered, 2);
    }

    #[test]
    fn edges_only_include_matches() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.record_pair(key(0, 1), &verdict(0.99, Verdict::Duplicate)).unwrap();
        store.record_pair(key(1, 2), &verdict(0.92, Verdict::Similar)).unwrap();
        store.record_pair(key(0, 2), &verdict(0.3, Verdict::Distinct)).unwrap();
        store
            .record_pair(
                key(2, 3),
                &PairOutcome::Error {
                    message: "metric failed".to_string(),
                },
            )
            .unwrap();

        let edges: Vec<_> = store.edges().unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(edges, vec![key(0, 1), key(1, 2)]);

        let counts = store.counts().unwrap();
        assert_eq!(counts.pairs_resolved, 3);
        assert_eq!(counts.pairs_errored, 1);
        assert_eq!(counts.duplicate_pairs, 1);
        assert_eq!(counts.similar_pairs, 1);
    }

    #[test]
    fn run_state_round_trips() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        assert!(store.load_run_state().unwrap().is_none());

        let mut state = RunState::new(RunSettings {
            root: PathBuf::from("/photos"),
            duplicate_threshold: 0.95,
            similar_threshold: 0.9,
            prefilter: "none".to_string(),
            metric: "thumbnail-mse".to_string(),
            extractor: "thumbnail-32".to_string(),
            rotate: false,
            compare_root: None,
        });
        store.save_run_state(&state).unwrap();
        state.transition(crate::core::checkpoint::RunPhase::Running);
        store.save_run_state(&state).unwrap();

        assert_eq!(store.load_run_state().unwrap(), Some(state));
    }

    #[test]
    fn backup_copies_contents() {
        let temp_dir = TempDir::new().unwrap();
        let store = SqliteCheckpointStore::open(&temp_dir.path().join("live.db")).unwrap();
        store.register_image(&record(0, "a.jpg")).unwrap();

        let backup_path = temp_dir.path().join("backups").join("copy.db");
        store.backup(&backup_path).unwrap();

        let copy = SqliteCheckpointStore::open(&backup_path).unwrap();
        assert_eq!(copy.images().unwrap().len(), 1);
        assert!(store.backup(&backup_path).is_err());
    }

    #[test]
    fn clear_removes_everything() {
        let store = SqliteCheckpointStore::open_in_memory().unwrap();
        store.register_image(&record(0, "a.jpg")).unwrap();
        store.record_pair(key(0, 1), &verdict(0.1, Verdict::Distinct)).unwrap();

        store.clear().unwrap();

        assert_eq!(store.counts().unwrap(), StoreCounts::default());
    }
}
