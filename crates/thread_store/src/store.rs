use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tempfile::NamedTempFile;
use threadkeeper::{Session, Thread};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::ThreadStoreError;
use crate::paths::{crash_dump_file_name, detached_dump_key};
use crate::schema::{major_version, DocumentMeta, ThreadDocument, ThreadRecord, FORMAT_MAJOR};

/// A JSON thread document on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStore {
    path: PathBuf,
}

impl ThreadStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes every named thread of `session`, then marks them saved.
    /// Returns how many threads were written.
    pub fn save(&self, session: &mut Session) -> Result<usize, ThreadStoreError> {
        if session.named().is_empty() {
            return Err(ThreadStoreError::NothingToSave);
        }

        let document = ThreadDocument {
            meta: DocumentMeta::current(now_rfc3339()?),
            threads: session
                .named()
                .iter()
                .map(|(name, thread)| (name.clone(), ThreadRecord::from(thread)))
                .collect(),
        };
        self.write_document(&document)?;
        session.mark_saved();
        Ok(document.threads.len())
    }

    /// Reads the document and returns its threads, each marked clean.
    pub fn load(&self) -> Result<Vec<(String, Thread)>, ThreadStoreError> {
        let document = self.read_document()?;
        Ok(document
            .threads
            .into_iter()
            .map(|(name, record)| (name, Thread::from(record)))
            .collect())
    }

    pub fn read_document(&self) -> Result<ThreadDocument, ThreadStoreError> {
        let path = &self.path;
        let text = fs::read_to_string(path)
            .map_err(|source| ThreadStoreError::io("reading thread document", path, source))?;
        let value: Value =
            serde_json::from_str(&text).map_err(|source| ThreadStoreError::json_parse(path, source))?;

        let meta = value
            .get("_meta")
            .and_then(Value::as_object)
            .ok_or_else(|| ThreadStoreError::MissingMeta { path: path.clone() })?;
        validate_version(path, meta)?;

        serde_json::from_value(value).map_err(|source| ThreadStoreError::json_parse(path, source))
    }

    /// Serializes `document` and atomically replaces the file with it.
    pub fn write_document(&self, document: &ThreadDocument) -> Result<(), ThreadStoreError> {
        let path = &self.path;
        let mut bytes = serde_json::to_vec_pretty(document)
            .map_err(|source| ThreadStoreError::json_serialize(path, source))?;
        bytes.push(b'\n');

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|source| ThreadStoreError::io("creating temporary file", dir, source))?;
        temp.write_all(&bytes)
            .map_err(|source| ThreadStoreError::io("writing temporary file", temp.path(), source))?;
        temp.as_file()
            .sync_all()
            .map_err(|source| ThreadStoreError::io("syncing temporary file", temp.path(), source))?;
        temp.persist(path)
            .map_err(|error| ThreadStoreError::io("replacing thread document", path, error.error))?;
        Ok(())
    }
}

fn validate_version(path: &Path, meta: &Map<String, Value>) -> Result<(), ThreadStoreError> {
    let version = meta
        .get("version")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let found = major_version(version).ok_or_else(|| ThreadStoreError::InvalidVersion {
        path: path.to_path_buf(),
        version: version.to_string(),
    })?;

    if found > FORMAT_MAJOR {
        return Err(ThreadStoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            found,
            supported: FORMAT_MAJOR,
        });
    }
    Ok(())
}

pub fn now_rfc3339() -> Result<String, ThreadStoreError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ThreadStoreError::ClockFormat)
}

/// Writes every thread of `session` into `dir` after an unexpected failure.
///
/// The detached thread is included under a key no named thread uses, and
/// `failure` is recorded as `_meta.crash`. The session itself is not
/// modified. Returns the path written.
pub fn write_crash_dump(
    dir: &Path,
    session: &Session,
    failure: &str,
) -> Result<PathBuf, ThreadStoreError> {
    let saved_at = now_rfc3339()?;
    let mut threads: std::collections::BTreeMap<String, ThreadRecord> = session
        .named()
        .iter()
        .map(|(name, thread)| (name.clone(), ThreadRecord::from(thread)))
        .collect();
    if !session.detached().is_empty() {
        threads.insert(
            detached_dump_key(session.named()),
            ThreadRecord::from(session.detached()),
        );
    }

    let mut meta = DocumentMeta::current(saved_at.clone());
    meta.extra
        .insert("crash".to_string(), Value::String(failure.to_string()));

    let path = dir.join(crash_dump_file_name(&saved_at));
    ThreadStore::new(&path).write_document(&ThreadDocument { meta, threads })?;
    Ok(path)
}
