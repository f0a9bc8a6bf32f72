use anyhow::Result;
use rusqlite::{params, Connection};
use std::fs;
use std::path::{Path, PathBuf};

use generation::{GenerationKind, GenerationRequest};

/// Default location of the generation history database.
pub fn default_history_path() -> PathBuf {
    settings::app_data_dir().join("history.db")
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: String,
    pub kind: String,
    pub prompt: String,
    pub model: Option<String>,
    pub status: String,
    pub result_ref: Option<String>,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Generation log. One row per submitted request: inserted at submission,
/// updated once when the request reaches a terminal state.
pub struct HistoryDb {
    conn: Connection,
    path: PathBuf,
}

impl HistoryDb {
    pub fn open_or_create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        // Recommended PRAGMAs for local interactive app DB
        conn.pragma_update(None, "journal_mode", &"WAL")?;
        conn.pragma_update(None, "synchronous", &"NORMAL")?;
        conn.pragma_update(None, "foreign_keys", &"ON")?;
        apply_migrations(&conn)?;
        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, request: &GenerationRequest) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO generations(id, kind, prompt, model, status, result_ref, error, created_at, completed_at) VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                request.id.to_string(),
                request.kind.as_str(),
                request.prompt,
                request.params.model,
                request.status.as_str(),
                request.result_ref,
                request.error_detail.as_ref().map(format_error),
                request.created_at,
                request.completed_at,
            ],
        )?;
        Ok(())
    }

    /// Record the terminal outcome for an already-inserted request.
    pub fn finish(&self, request: &GenerationRequest) -> Result<()> {
        self.conn.execute(
            "UPDATE generations SET status = ?2, result_ref = ?3, error = ?4, completed_at = ?5 WHERE id = ?1",
            params![
                request.id.to_string(),
                request.status.as_str(),
                request.result_ref,
                request.error_detail.as_ref().map(format_error),
                request.completed_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> Result<Option<HistoryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, prompt, model, status, result_ref, error, created_at, completed_at FROM generations WHERE id = ?1 LIMIT 1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_history(row)?)),
            None => Ok(None),
        }
    }

    /// Newest entries first, optionally filtered by kind.
    pub fn list(&self, kind: Option<GenerationKind>, limit: usize) -> Result<Vec<HistoryRow>> {
        let mut out = Vec::new();
        match kind {
            Some(kind) => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, kind, prompt, model, status, result_ref, error, created_at, completed_at FROM generations WHERE kind = ?1 ORDER BY created_at DESC, id DESC LIMIT ?2",
                )?;
                let mut rows = stmt.query(params![kind.as_str(), limit as i64])?;
                while let Some(row) = rows.next()? {
                    out.push(row_to_history(row)?);
                }
            }
            None => {
                let mut stmt = self.conn.prepare(
                    "SELECT id, kind, prompt, model, status, result_ref, error, created_at, completed_at FROM generations ORDER BY created_at DESC, id DESC LIMIT ?1",
                )?;
                let mut rows = stmt.query(params![limit as i64])?;
                while let Some(row) = rows.next()? {
                    out.push(row_to_history(row)?);
                }
            }
        }
        Ok(out)
    }
}

fn format_error(detail: &generation::ErrorDetail) -> String {
    format!("{}: {}", detail.class, detail.message)
}

fn row_to_history(row: &rusqlite::Row<'_>) -> Result<HistoryRow> {
    Ok(HistoryRow {
        id: row.get(0)?,
        kind: row.get(1)?,
        prompt: row.get(2)?,
        model: row.get(3)?,
        status: row.get(4)?,
        result_ref: row.get(5)?,
        error: row.get(6)?,
        created_at: row.get(7)?,
        completed_at: row.get(8)?,
    })
}

fn apply_migrations(conn: &Connection) -> Result<()> {
    // Simple migration tracking by name
    conn.execute_batch(include_str!("../migrations/V0001__init.sql"))?;
    conn.execute(
        "INSERT OR IGNORE INTO migrations(name, applied_at) VALUES(?1, strftime('%s','now'))",
        params!["V0001__init"],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use generation::{ErrorDetail, GenerationParams, RequestStatus};

    fn sample(kind: GenerationKind, prompt: &str) -> GenerationRequest {
        GenerationRequest::new(
            kind,
            prompt.to_string(),
            GenerationParams::new().with_model("velqis"),
        )
    }

    #[test]
    fn test_record_and_finish() {
        let dir = tempfile::tempdir().unwrap();
        let db = HistoryDb::open_or_create(&dir.path().join("history.db")).unwrap();

        let mut request = sample(GenerationKind::Video, "sunrise timelapse");
        db.record(&request).unwrap();

        let row = db.get(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.model.as_deref(), Some("velqis"));
        assert!(row.result_ref.is_none());

        request.status = RequestStatus::Succeeded;
        request.result_ref = Some("https://cdn.velqis.ai/out.mp4".to_string());
        request.completed_at = Some(request.created_at + 12);
        db.finish(&request).unwrap();

        let row = db.get(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "succeeded");
        assert_eq!(row.result_ref.as_deref(), Some("https://cdn.velqis.ai/out.mp4"));
        assert!(row.error.is_none());
    }

    #[test]
    fn test_failed_request_records_classified_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = HistoryDb::open_or_create(&dir.path().join("history.db")).unwrap();

        let mut request = sample(GenerationKind::Image, "oil painting");
        request.status = RequestStatus::Failed;
        request.error_detail = Some(ErrorDetail::permanent("invalid api key"));
        request.completed_at = Some(request.created_at + 1);
        db.record(&request).unwrap();

        let row = db.get(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.status, "failed");
        assert_eq!(
            row.error.as_deref(),
            Some("permanent_remote: invalid api key")
        );
    }

    #[test]
    fn test_list_filters_and_limits() {
        let dir = tempfile::tempdir().unwrap();
        let db = HistoryDb::open_or_create(&dir.path().join("history.db")).unwrap();

        for i in 0..3 {
            let mut request = sample(GenerationKind::Video, &format!("video {}", i));
            request.created_at += i;
            db.record(&request).unwrap();
        }
        let mut music = sample(GenerationKind::Music, "a song");
        music.created_at += 10;
        db.record(&music).unwrap();

        let all = db.list(None, 10).unwrap();
        assert_eq!(all.len(), 4);
        // newest first
        assert_eq!(all[0].prompt, "a song");

        let videos = db.list(Some(GenerationKind::Video), 10).unwrap();
        assert_eq!(videos.len(), 3);
        assert!(videos.iter().all(|row| row.kind == "video"));

        let limited = db.list(None, 2).unwrap();
        assert_eq!(limited.len(), 2);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.db");

        let request = sample(GenerationKind::Music, "late night lofi");
        {
            let db = HistoryDb::open_or_create(&path).unwrap();
            db.record(&request).unwrap();
        }

        let db = HistoryDb::open_or_create(&path).unwrap();
        let row = db.get(&request.id.to_string()).unwrap().unwrap();
        assert_eq!(row.prompt, "late night lofi");
    }
}
