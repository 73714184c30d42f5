//! SQLite persistence for novels, chapters, the name dictionary and detected
//! names. One connection behind a mutex; uniqueness invariants live in the
//! schema so concurrent writers are serialized by SQLite itself.

use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::model::{
    now_unix, Chapter, DetectedName, DetectionStatus, NameCandidate, NameMapping, NameType,
    NewNovel, Novel,
};
use crate::state_machine::ChapterStatus;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS novels (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL,
    author TEXT NOT NULL,
    source_lang TEXT NOT NULL,
    target_lang TEXT NOT NULL,
    description TEXT,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS chapters (
    id TEXT PRIMARY KEY,
    novel_id TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
    number INTEGER NOT NULL,
    title TEXT NOT NULL,
    source_text TEXT NOT NULL,
    raw_translation TEXT,
    processed_translation TEXT,
    translated_at INTEGER,
    summary TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    pending_names INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    UNIQUE (novel_id, number)
);
CREATE TABLE IF NOT EXISTS name_mappings (
    id TEXT PRIMARY KEY,
    novel_id TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
    original_name TEXT NOT NULL,
    translated_name TEXT NOT NULL,
    name_type TEXT NOT NULL DEFAULT 'character',
    frequency INTEGER NOT NULL DEFAULT 1,
    first_detected INTEGER NOT NULL,
    context TEXT,
    UNIQUE (novel_id, original_name)
);
CREATE TABLE IF NOT EXISTS detected_names (
    id TEXT PRIMARY KEY,
    novel_id TEXT NOT NULL REFERENCES novels(id) ON DELETE CASCADE,
    chapter_id TEXT NOT NULL REFERENCES chapters(id) ON DELETE CASCADE,
    original_text TEXT NOT NULL,
    suggested_translation TEXT NOT NULL DEFAULT '',
    name_type TEXT NOT NULL DEFAULT 'unknown',
    context TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detected_chapter_status
    ON detected_names(chapter_id, status);
";

const CHAPTER_COLUMNS: &str = "id, novel_id, number, title, source_text, raw_translation,
    processed_translation, translated_at, summary, status, pending_names, created_at";

const MAPPING_COLUMNS: &str =
    "id, novel_id, original_name, translated_name, name_type, frequency, first_detected, context";

const DETECTED_COLUMNS: &str = "id, novel_id, chapter_id, original_text, suggested_translation,
    name_type, context, status, created_at";

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// A uniqueness invariant was violated, e.g. a duplicate
    /// `(novel, original name)` pair.
    Conflict(String),
    NotFound(String),
    Invalid(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Sqlite(e) => write!(f, "storage error: {e}"),
            StoreError::Conflict(msg) => write!(f, "conflict: {msg}"),
            StoreError::NotFound(what) => write!(f, "not found: {what}"),
            StoreError::Invalid(msg) => write!(f, "invalid data: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Sqlite(e) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Sqlite(e)
    }
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

/// Map a UNIQUE violation onto `Conflict`, everything else onto `Sqlite`.
fn conflict_or(e: rusqlite::Error, what: impl FnOnce() -> String) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            StoreError::Conflict(what())
        }
        _ => StoreError::Sqlite(e),
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database at the given path.
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        // WAL mode for better concurrent read performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        let store = Self::init(conn)?;
        info!(path = %db_path.display(), "store opened");
        Ok(store)
    }

    /// Private in-memory database, used by tests and dry runs.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    // --- Novels ---

    pub fn create_novel(&self, novel: NewNovel) -> Result<Novel, StoreError> {
        if novel.title.trim().is_empty() || novel.author.trim().is_empty() {
            return Err(StoreError::Invalid("title and author are required".into()));
        }
        let record = Novel {
            id: new_id(),
            title: novel.title.trim().to_string(),
            author: novel.author.trim().to_string(),
            source_language: novel.source_language,
            target_language: novel.target_language,
            description: novel.description,
            created_at: now_unix(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO novels (id, title, author, source_lang, target_lang, description, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.id,
                record.title,
                record.author,
                record.source_language,
                record.target_language,
                record.description,
                record.created_at,
            ],
        )?;
        info!(novel_id = %record.id, title = %record.title, "novel created");
        Ok(record)
    }

    pub fn novel(&self, id: &str) -> Result<Option<Novel>, StoreError> {
        let conn = self.conn.lock();
        let novel = conn
            .query_row(
                "SELECT id, title, author, source_lang, target_lang, description, created_at
                 FROM novels WHERE id = ?1",
                params![id],
                novel_from_row,
            )
            .optional()?;
        Ok(novel)
    }

    pub fn list_novels(&self) -> Result<Vec<Novel>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, title, author, source_lang, target_lang, description, created_at
             FROM novels ORDER BY created_at DESC, title",
        )?;
        let rows = stmt.query_map([], novel_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // --- Chapters ---

    pub fn add_chapter(
        &self,
        novel_id: &str,
        number: u32,
        title: &str,
        source_text: &str,
    ) -> Result<Chapter, StoreError> {
        if source_text.trim().is_empty() {
            return Err(StoreError::Invalid("chapter source text is empty".into()));
        }
        if self.novel(novel_id)?.is_none() {
            return Err(StoreError::NotFound(format!("novel {novel_id}")));
        }
        let chapter = Chapter {
            id: new_id(),
            novel_id: novel_id.to_string(),
            number,
            title: title.trim().to_string(),
            source_text: source_text.to_string(),
            raw_translation: None,
            processed_translation: None,
            translated_at: None,
            summary: None,
            status: ChapterStatus::Pending,
            pending_names: false,
            created_at: now_unix(),
        };
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO chapters (id, novel_id, number, title, source_text, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                chapter.id,
                chapter.novel_id,
                chapter.number,
                chapter.title,
                chapter.source_text,
                chapter.status.as_str(),
                chapter.created_at,
            ],
        )
        .map_err(|e| conflict_or(e, || format!("chapter {number} already exists")))?;
        info!(novel_id, chapter_id = %chapter.id, number, "chapter added");
        Ok(chapter)
    }

    pub fn chapter(&self, id: &str) -> Result<Option<Chapter>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE id = ?1");
        let chapter = conn.query_row(&sql, params![id], chapter_from_row).optional()?;
        Ok(chapter)
    }

    pub fn list_chapters(&self, novel_id: &str) -> Result<Vec<Chapter>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {CHAPTER_COLUMNS} FROM chapters WHERE novel_id = ?1 ORDER BY number");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![novel_id], chapter_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Replace a chapter's source text. The chapter goes back to `pending`
    /// with its translation, summary and still-pending detected names
    /// dropped; resolved and ignored detections are kept.
    pub fn update_chapter_source(&self, chapter_id: &str, source_text: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let n = tx.execute(
            "UPDATE chapters SET source_text = ?2, status = 'pending', pending_names = 0,
                raw_translation = NULL, processed_translation = NULL,
                translated_at = NULL, summary = NULL
             WHERE id = ?1",
            params![chapter_id, source_text],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("chapter {chapter_id}")));
        }
        let dropped = tx.execute(
            "DELETE FROM detected_names WHERE chapter_id = ?1 AND status = 'pending'",
            params![chapter_id],
        )?;
        tx.commit()?;
        debug!(chapter_id, dropped, "chapter source replaced");
        Ok(())
    }

    pub fn set_chapter_status(
        &self,
        chapter_id: &str,
        status: ChapterStatus,
        pending_names: bool,
    ) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE chapters SET status = ?2, pending_names = ?3 WHERE id = ?1",
            params![chapter_id, status.as_str(), pending_names],
        )?;
        Ok(())
    }

    /// Summaries of other chapters of the novel, newest chapter number first.
    pub fn recent_summaries(
        &self,
        novel_id: &str,
        exclude_chapter_id: &str,
        limit: usize,
    ) -> Result<Vec<(u32, String)>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT number, summary FROM chapters
             WHERE novel_id = ?1 AND id <> ?2 AND summary IS NOT NULL
             ORDER BY number DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![novel_id, exclude_chapter_id, limit as i64], |row| {
            Ok((row.get::<_, u32>(0)?, row.get::<_, String>(1)?))
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Write a translation result, its status, and the chapter's pending
    /// detected names in one transaction. Pending rows from an earlier run are
    /// replaced; resolved and ignored rows are kept.
    pub fn save_translation(
        &self,
        chapter: &Chapter,
        source_text: &str,
        raw: &str,
        processed: &str,
        status: ChapterStatus,
        candidates: &[NameCandidate],
    ) -> Result<Vec<DetectedName>, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let now = now_unix();

        // A summary of different source text is stale.
        tx.execute(
            "UPDATE chapters SET raw_translation = ?2, processed_translation = ?3,
                translated_at = ?4, status = ?5, pending_names = ?6,
                summary = CASE WHEN source_text = ?7 THEN summary ELSE NULL END,
                source_text = ?7
             WHERE id = ?1",
            params![
                chapter.id,
                raw,
                processed,
                now,
                status.as_str(),
                !candidates.is_empty(),
                source_text
            ],
        )?;
        let replaced = tx.execute(
            "DELETE FROM detected_names WHERE chapter_id = ?1 AND status = 'pending'",
            params![chapter.id],
        )?;

        let mut detected = Vec::with_capacity(candidates.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO detected_names
                 (id, novel_id, chapter_id, original_text, suggested_translation,
                  name_type, context, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 'pending', ?8)",
            )?;
            for c in candidates {
                let record = DetectedName {
                    id: new_id(),
                    novel_id: chapter.novel_id.clone(),
                    chapter_id: chapter.id.clone(),
                    original_text: c.original_text.clone(),
                    suggested_translation: c.suggested_translation.clone(),
                    name_type: c.name_type,
                    context: c.context.clone(),
                    status: DetectionStatus::Pending,
                    created_at: now,
                };
                stmt.execute(params![
                    record.id,
                    record.novel_id,
                    record.chapter_id,
                    record.original_text,
                    record.suggested_translation,
                    record.name_type.as_str(),
                    record.context,
                    record.created_at,
                ])?;
                detected.push(record);
            }
        }
        tx.commit()?;
        debug!(
            chapter_id = %chapter.id,
            detected = detected.len(),
            replaced,
            "translation saved"
        );
        Ok(detected)
    }

    pub fn store_summary(&self, chapter_id: &str, summary: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute(
            "UPDATE chapters SET summary = ?2 WHERE id = ?1",
            params![chapter_id, summary],
        )?;
        Ok(())
    }

    // --- Name dictionary ---

    /// All name mappings of a novel, ordered by original name.
    pub fn name_mappings(&self, novel_id: &str) -> Result<Vec<NameMapping>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {MAPPING_COLUMNS} FROM name_mappings WHERE novel_id = ?1 ORDER BY original_name"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![novel_id], mapping_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn name_mapping(&self, id: &str) -> Result<Option<NameMapping>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {MAPPING_COLUMNS} FROM name_mappings WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], mapping_from_row).optional()?)
    }

    /// Insert a new mapping. Fails with `Conflict` if the novel already has
    /// an entry for `original_name`.
    pub fn insert_name_mapping(
        &self,
        novel_id: &str,
        original_name: &str,
        translated_name: &str,
        name_type: NameType,
        context: Option<&str>,
    ) -> Result<NameMapping, StoreError> {
        let conn = self.conn.lock();
        insert_mapping(&conn, novel_id, original_name, translated_name, name_type, context)
    }

    /// Explicit edit of an existing mapping.
    pub fn update_name_mapping(
        &self,
        id: &str,
        translated_name: Option<&str>,
        name_type: Option<NameType>,
    ) -> Result<NameMapping, StoreError> {
        if let Some(t) = translated_name {
            if t.trim().is_empty() {
                return Err(StoreError::Invalid("translated name is empty".into()));
            }
        }
        if name_type == Some(NameType::Unknown) {
            return Err(StoreError::Invalid("dictionary entries need a concrete type".into()));
        }
        {
            let conn = self.conn.lock();
            let n = conn.execute(
                "UPDATE name_mappings
                 SET translated_name = COALESCE(?2, translated_name),
                     name_type = COALESCE(?3, name_type)
                 WHERE id = ?1",
                params![id, translated_name.map(str::trim), name_type.map(NameType::as_str)],
            )?;
            if n == 0 {
                return Err(StoreError::NotFound(format!("name mapping {id}")));
            }
        }
        self.name_mapping(id)?
            .ok_or_else(|| StoreError::NotFound(format!("name mapping {id}")))
    }

    pub fn delete_name_mapping(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let n = conn.execute("DELETE FROM name_mappings WHERE id = ?1", params![id])?;
        if n == 0 {
            return Err(StoreError::NotFound(format!("name mapping {id}")));
        }
        Ok(())
    }

    // --- Detected names ---

    pub fn detected_name(&self, id: &str) -> Result<Option<DetectedName>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!("SELECT {DETECTED_COLUMNS} FROM detected_names WHERE id = ?1");
        Ok(conn.query_row(&sql, params![id], detected_from_row).optional()?)
    }

    pub fn pending_detected_names(
        &self,
        novel_id: &str,
        chapter_id: &str,
    ) -> Result<Vec<DetectedName>, StoreError> {
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT {DETECTED_COLUMNS} FROM detected_names
             WHERE novel_id = ?1 AND chapter_id = ?2 AND status = 'pending'
             ORDER BY created_at, original_text"
        );
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params![novel_id, chapter_id], detected_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn count_pending(&self, novel_id: &str, chapter_id: &str) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM detected_names
             WHERE novel_id = ?1 AND chapter_id = ?2 AND status = 'pending'",
            params![novel_id, chapter_id],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Promote a pending detected name into the dictionary. The insert and the
    /// status change commit together; on `Conflict` neither happens.
    pub fn promote_detected_name(
        &self,
        detected: &DetectedName,
        translated_name: &str,
        name_type: NameType,
    ) -> Result<NameMapping, StoreError> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let mapping = insert_mapping(
            &tx,
            &detected.novel_id,
            &detected.original_text,
            translated_name,
            name_type,
            detected.context.as_deref(),
        )?;
        mark_detected(&tx, &detected.id, DetectionStatus::Resolved)?;
        tx.commit()?;
        Ok(mapping)
    }

    pub fn ignore_detected_name(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        mark_detected(&conn, id, DetectionStatus::Ignored)
    }
}

fn insert_mapping(
    conn: &Connection,
    novel_id: &str,
    original_name: &str,
    translated_name: &str,
    name_type: NameType,
    context: Option<&str>,
) -> Result<NameMapping, StoreError> {
    let original_name = original_name.trim();
    let translated_name = translated_name.trim();
    if original_name.is_empty() || translated_name.is_empty() {
        return Err(StoreError::Invalid("original and translated names are required".into()));
    }
    if !name_type.is_dictionary_kind() {
        return Err(StoreError::Invalid("dictionary entries need a concrete type".into()));
    }
    let mapping = NameMapping {
        id: new_id(),
        novel_id: novel_id.to_string(),
        original_name: original_name.to_string(),
        translated_name: translated_name.to_string(),
        name_type,
        frequency: 1,
        first_detected: now_unix(),
        context: context.map(str::to_string),
    };
    conn.execute(
        "INSERT INTO name_mappings
         (id, novel_id, original_name, translated_name, name_type, frequency, first_detected, context)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            mapping.id,
            mapping.novel_id,
            mapping.original_name,
            mapping.translated_name,
            mapping.name_type.as_str(),
            mapping.frequency,
            mapping.first_detected,
            mapping.context,
        ],
    )
    .map_err(|e| {
        conflict_or(e, || {
            format!("name mapping for \"{original_name}\" already exists")
        })
    })?;
    info!(novel_id, original = %mapping.original_name, translated = %mapping.translated_name, "name mapping added");
    Ok(mapping)
}

/// Move a pending detected name to a terminal status. Terminal rows are left
/// untouched.
fn mark_detected(conn: &Connection, id: &str, status: DetectionStatus) -> Result<(), StoreError> {
    let n = conn.execute(
        "UPDATE detected_names SET status = ?2 WHERE id = ?1 AND status = 'pending'",
        params![id, status.as_str()],
    )?;
    if n == 0 {
        return Err(StoreError::Invalid(format!("detected name {id} is not pending")));
    }
    Ok(())
}

fn novel_from_row(row: &Row<'_>) -> rusqlite::Result<Novel> {
    Ok(Novel {
        id: row.get(0)?,
        title: row.get(1)?,
        author: row.get(2)?,
        source_language: row.get(3)?,
        target_language: row.get(4)?,
        description: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn chapter_from_row(row: &Row<'_>) -> rusqlite::Result<Chapter> {
    let status: String = row.get(9)?;
    Ok(Chapter {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        number: row.get(2)?,
        title: row.get(3)?,
        source_text: row.get(4)?,
        raw_translation: row.get(5)?,
        processed_translation: row.get(6)?,
        translated_at: row.get(7)?,
        summary: row.get(8)?,
        status: ChapterStatus::parse(&status).unwrap_or(ChapterStatus::Pending),
        pending_names: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn mapping_from_row(row: &Row<'_>) -> rusqlite::Result<NameMapping> {
    let name_type: String = row.get(4)?;
    Ok(NameMapping {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        original_name: row.get(2)?,
        translated_name: row.get(3)?,
        name_type: NameType::parse_lenient(&name_type),
        frequency: row.get(5)?,
        first_detected: row.get(6)?,
        context: row.get(7)?,
    })
}

fn detected_from_row(row: &Row<'_>) -> rusqlite::Result<DetectedName> {
    let name_type: String = row.get(5)?;
    let status: String = row.get(7)?;
    Ok(DetectedName {
        id: row.get(0)?,
        novel_id: row.get(1)?,
        chapter_id: row.get(2)?,
        original_text: row.get(3)?,
        suggested_translation: row.get(4)?,
        name_type: NameType::parse_lenient(&name_type),
        context: row.get(6)?,
        status: DetectionStatus::parse(&status).unwrap_or(DetectionStatus::Pending),
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    pub(crate) fn seeded() -> (Store, Novel, Chapter) {
        let store = Store::open_in_memory().unwrap();
        let novel = store
            .create_novel(NewNovel {
                title: "달빛 조각사".into(),
                author: "남희성".into(),
                source_language: "ko".into(),
                target_language: "en".into(),
                description: None,
            })
            .unwrap();
        let chapter = store
            .add_chapter(&novel.id, 1, "Prologue", "김철수는 철수라고 불린다.")
            .unwrap();
        (store, novel, chapter)
    }

    fn candidate(text: &str) -> NameCandidate {
        NameCandidate {
            original_text: text.into(),
            name_type: NameType::Character,
            suggested_translation: String::new(),
            context: None,
        }
    }

    #[test]
    fn test_duplicate_chapter_number_conflicts() {
        let (store, novel, _) = seeded();
        let err = store.add_chapter(&novel.id, 1, "Again", "텍스트").unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn test_chapter_requires_existing_novel() {
        let (store, _, _) = seeded();
        let err = store.add_chapter("missing", 2, "Two", "텍스트").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_duplicate_name_mapping_conflicts_and_keeps_original() {
        let (store, novel, _) = seeded();
        store
            .insert_name_mapping(&novel.id, "철수", "Chulsoo", NameType::Character, None)
            .unwrap();
        let err = store
            .insert_name_mapping(&novel.id, "철수", "Cheolsu", NameType::Character, None)
            .unwrap_err();
        assert!(err.is_conflict());

        let names = store.name_mappings(&novel.id).unwrap();
        assert_eq!(names.len(), 1);
        assert_eq!(names[0].translated_name, "Chulsoo");
    }

    #[test]
    fn test_same_name_in_two_novels_is_fine() {
        let (store, novel, _) = seeded();
        let other = store
            .create_novel(NewNovel {
                title: "Other".into(),
                author: "Someone".into(),
                source_language: "ko".into(),
                target_language: "en".into(),
                description: None,
            })
            .unwrap();
        store
            .insert_name_mapping(&novel.id, "철수", "Chulsoo", NameType::Character, None)
            .unwrap();
        store
            .insert_name_mapping(&other.id, "철수", "Cheolsu", NameType::Character, None)
            .unwrap();
    }

    #[test]
    fn test_unknown_type_rejected_for_dictionary() {
        let (store, novel, _) = seeded();
        let err = store
            .insert_name_mapping(&novel.id, "서울", "Seoul", NameType::Unknown, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn test_save_translation_replaces_only_pending_rows() {
        let (store, novel, chapter) = seeded();
        let first = store
            .save_translation(
                &chapter,
                &chapter.source_text,
                "raw",
                "processed",
                ChapterStatus::NeedsReview,
                &[candidate("김철수"), candidate("영희")],
            )
            .unwrap();
        store.ignore_detected_name(&first[1].id).unwrap();

        store
            .save_translation(
                &chapter,
                &chapter.source_text,
                "raw2",
                "processed2",
                ChapterStatus::NeedsReview,
                &[candidate("민수")],
            )
            .unwrap();

        let pending = store.pending_detected_names(&novel.id, &chapter.id).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].original_text, "민수");
        let ignored = store.detected_name(&first[1].id).unwrap().unwrap();
        assert_eq!(ignored.status, DetectionStatus::Ignored);

        let saved = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(saved.processed_translation.as_deref(), Some("processed2"));
        assert!(saved.pending_names);
    }

    #[test]
    fn test_translation_of_new_source_replaces_source_and_summary() {
        let (store, _, chapter) = seeded();
        store.store_summary(&chapter.id, "Kim Chulsoo is introduced.").unwrap();
        store
            .save_translation(&chapter, &chapter.source_text, "r", "p", ChapterStatus::Translated, &[])
            .unwrap();
        let same = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(same.summary.as_deref(), Some("Kim Chulsoo is introduced."));

        store
            .save_translation(
                &chapter,
                "영희는 집에 갔다.",
                "Younghee went home.",
                "Younghee went home.",
                ChapterStatus::Translated,
                &[],
            )
            .unwrap();
        let saved = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(saved.source_text, "영희는 집에 갔다.");
        assert_eq!(saved.raw_translation.as_deref(), Some("Younghee went home."));
        assert!(saved.summary.is_none());
    }

    #[test]
    fn test_source_edit_resets_translation_state() {
        let (store, novel, chapter) = seeded();
        let detected = store
            .save_translation(
                &chapter,
                &chapter.source_text,
                "r",
                "p",
                ChapterStatus::NeedsReview,
                &[candidate("김철수"), candidate("영희")],
            )
            .unwrap();
        store.ignore_detected_name(&detected[1].id).unwrap();
        store.store_summary(&chapter.id, "old").unwrap();

        store.update_chapter_source(&chapter.id, "민수는 웃었다.").unwrap();

        let edited = store.chapter(&chapter.id).unwrap().unwrap();
        assert_eq!(edited.source_text, "민수는 웃었다.");
        assert_eq!(edited.status, ChapterStatus::Pending);
        assert!(!edited.pending_names);
        assert!(edited.raw_translation.is_none());
        assert!(edited.processed_translation.is_none());
        assert!(edited.translated_at.is_none());
        assert!(edited.summary.is_none());
        assert_eq!(store.count_pending(&novel.id, &chapter.id).unwrap(), 0);
        assert!(store.detected_name(&detected[1].id).unwrap().is_some());

        assert!(matches!(
            store.update_chapter_source("missing", "텍스트"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_promote_conflict_leaves_detected_pending() {
        let (store, novel, chapter) = seeded();
        store
            .insert_name_mapping(&novel.id, "김철수", "Kim Chulsoo", NameType::Character, None)
            .unwrap();
        let detected = store
            .save_translation(&chapter, &chapter.source_text, "r", "p", ChapterStatus::NeedsReview, &[candidate("김철수")])
            .unwrap();
        let err = store
            .promote_detected_name(&detected[0], "Kim Cheolsu", NameType::Character)
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.count_pending(&novel.id, &chapter.id).unwrap(), 1);
    }

    #[test]
    fn test_terminal_detected_names_are_not_mutated() {
        let (store, _, chapter) = seeded();
        let detected = store
            .save_translation(&chapter, &chapter.source_text, "r", "p", ChapterStatus::NeedsReview, &[candidate("영희")])
            .unwrap();
        store.ignore_detected_name(&detected[0].id).unwrap();
        assert!(store.ignore_detected_name(&detected[0].id).is_err());
    }

    #[test]
    fn test_recent_summaries_newest_first() {
        let (store, novel, chapter) = seeded();
        for n in 2..=5 {
            let c = store.add_chapter(&novel.id, n, "ch", "본문").unwrap();
            if n != 4 {
                store.store_summary(&c.id, &format!("summary {n}")).unwrap();
            }
        }
        let got = store.recent_summaries(&novel.id, &chapter.id, 3).unwrap();
        let numbers: Vec<u32> = got.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![5, 3, 2]);
    }

    #[test]
    fn test_file_backed_store_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("namesake.db");
        let novel_id = {
            let store = Store::open(&path).unwrap();
            store
                .create_novel(NewNovel {
                    title: "転生".into(),
                    author: "作者".into(),
                    source_language: "ja".into(),
                    target_language: "en".into(),
                    description: Some("isekai".into()),
                })
                .unwrap()
                .id
        };
        let reopened = Store::open(&path).unwrap();
        let novel = reopened.novel(&novel_id).unwrap().unwrap();
        assert_eq!(novel.source_language, "ja");
        assert_eq!(novel.description.as_deref(), Some("isekai"));
    }

    #[test]
    fn test_update_name_mapping_is_explicit() {
        let (store, novel, _) = seeded();
        let m = store
            .insert_name_mapping(&novel.id, "서울", "Seoul", NameType::Location, None)
            .unwrap();
        let updated = store
            .update_name_mapping(&m.id, Some("Seoul City"), None)
            .unwrap();
        assert_eq!(updated.translated_name, "Seoul City");
        assert_eq!(updated.name_type, NameType::Location);
        store.delete_name_mapping(&m.id).unwrap();
        assert!(store.name_mappings(&novel.id).unwrap().is_empty());
    }
}
