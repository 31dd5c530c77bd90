use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

use crate::entity::{MediaInfoEntity, MediaInfoId, PropertyId, Statement};
use crate::runtime::{ResolvedPaths, normalize_for_display};

const LEDGER_SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS structured_data_ledger (
    title TEXT PRIMARY KEY,
    entity_id TEXT NOT NULL,
    page_id INTEGER NOT NULL,
    relative_path TEXT NOT NULL,
    last_revision INTEGER,
    captions_json TEXT NOT NULL,
    statements_json TEXT NOT NULL,
    document_hash TEXT NOT NULL,
    last_synced_at_unix INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_structured_data_ledger_entity ON structured_data_ledger(entity_id);
"#;

const FILE_PREFIX: &str = "File:";

/// Local JSON rendition of one file's structured data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredDataDocument {
    pub file: String,
    pub entity_id: MediaInfoId,
    #[serde(default)]
    pub captions: BTreeMap<String, String>,
    #[serde(default)]
    pub statements: Vec<Statement>,
}

impl StructuredDataDocument {
    pub fn from_entity(file: &str, entity: &MediaInfoEntity) -> Self {
        Self {
            file: normalize_file_title(file),
            entity_id: entity.id,
            captions: entity.labels.clone(),
            statements: entity.all_statements(),
        }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let document: Self =
            serde_json::from_str(content).context("failed to decode structured data document")?;
        if let Some((language, _)) = document
            .captions
            .iter()
            .find(|(language, _)| language.trim().is_empty())
        {
            bail!("document for {} has a caption without language ({language:?})", document.file);
        }
        Ok(document)
    }

    pub fn render(&self) -> Result<String> {
        let mut content =
            serde_json::to_string_pretty(self).context("failed to encode structured data document")?;
        content.push('\n');
        Ok(content)
    }

    pub fn statements_by_property(&self) -> BTreeMap<PropertyId, Vec<Statement>> {
        let mut grouped: BTreeMap<PropertyId, Vec<Statement>> = BTreeMap::new();
        for statement in &self.statements {
            grouped
                .entry(statement.property())
                .or_default()
                .push(statement.clone());
        }
        grouped
    }
}

#[derive(Debug, Clone)]
pub struct LocalDocument {
    pub relative_path: String,
    pub path: PathBuf,
    pub content_hash: String,
    pub document: StructuredDataDocument,
}

/// Canonical `File:` title with spaces instead of underscores.
pub fn normalize_file_title(title: &str) -> String {
    let trimmed = title.replace('_', " ").trim().to_string();
    let name = trimmed
        .strip_prefix(FILE_PREFIX)
        .or_else(|| trimmed.strip_prefix("file:"))
        .or_else(|| trimmed.strip_prefix("Image:"))
        .unwrap_or(&trimmed)
        .trim();
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("{FILE_PREFIX}{}{}", first.to_uppercase(), chars.as_str()),
        None => FILE_PREFIX.to_string(),
    }
}

pub fn document_relative_path(paths: &ResolvedPaths, title: &str) -> String {
    let normalized = normalize_file_title(title);
    let name = normalized.trim_start_matches(FILE_PREFIX);
    let filename = name
        .replace(' ', "_")
        .replace('/', "___")
        .replace(':', "--");
    let documents_rel = paths
        .documents_dir
        .strip_prefix(&paths.project_root)
        .map(normalize_for_display)
        .unwrap_or_else(|_| crate::runtime::DOCUMENTS_DIR_NAME.to_string());
    format!("{documents_rel}/{filename}.json")
}

pub fn document_path(paths: &ResolvedPaths, title: &str) -> PathBuf {
    let mut output = paths.project_root.clone();
    for segment in document_relative_path(paths, title).split('/') {
        if !segment.is_empty() {
            output.push(segment);
        }
    }
    output
}

pub fn read_document(paths: &ResolvedPaths, title: &str) -> Result<Option<LocalDocument>> {
    let path = document_path(paths, title);
    if !path.exists() {
        return Ok(None);
    }
    load_document(paths, &path).map(Some)
}

/// Writes the document to its canonical path; returns the local document as written.
pub fn write_document(
    paths: &ResolvedPaths,
    document: &StructuredDataDocument,
) -> Result<LocalDocument> {
    let relative_path = document_relative_path(paths, &document.file);
    let path = document_path(paths, &document.file);
    let content = document.render()?;
    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(&path, &content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(LocalDocument {
        relative_path,
        path,
        content_hash: compute_hash(&content),
        document: document.clone(),
    })
}

pub fn scan_documents(paths: &ResolvedPaths) -> Result<Vec<LocalDocument>> {
    let mut output = Vec::new();
    if !paths.documents_dir.exists() {
        return Ok(output);
    }
    for entry in WalkDir::new(&paths.documents_dir).follow_links(false) {
        let entry =
            entry.with_context(|| format!("failed to walk {}", paths.documents_dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if entry.path().extension().and_then(|ext| ext.to_str()) != Some("json") {
            continue;
        }
        output.push(load_document(paths, entry.path())?);
    }
    output.sort_by(|left, right| left.document.file.cmp(&right.document.file));
    Ok(output)
}

fn load_document(paths: &ResolvedPaths, path: &Path) -> Result<LocalDocument> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let document = StructuredDataDocument::parse(&content)
        .with_context(|| format!("invalid document {}", path.display()))?;
    let relative_path = path
        .strip_prefix(&paths.project_root)
        .map(normalize_for_display)
        .unwrap_or_else(|_| normalize_for_display(path));
    Ok(LocalDocument {
        relative_path,
        path: path.to_path_buf(),
        content_hash: compute_hash(&content),
        document: StructuredDataDocument {
            file: normalize_file_title(&document.file),
            ..document
        },
    })
}

pub fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Last-known-good snapshot of one entity as of the last sync.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub title: String,
    pub entity_id: MediaInfoId,
    pub page_id: u64,
    pub relative_path: String,
    pub last_revision: Option<u64>,
    pub captions: BTreeMap<String, String>,
    pub statements: Vec<Statement>,
    pub document_hash: String,
    pub last_synced_at_unix: u64,
}

impl LedgerEntry {
    pub fn from_sync(
        local: &LocalDocument,
        entity: &MediaInfoEntity,
        page_id: u64,
    ) -> Result<Self> {
        Ok(Self {
            title: normalize_file_title(&local.document.file),
            entity_id: entity.id,
            page_id,
            relative_path: local.relative_path.clone(),
            last_revision: entity.last_revision,
            captions: entity.labels.clone(),
            statements: entity.all_statements(),
            document_hash: local.content_hash.clone(),
            last_synced_at_unix: unix_timestamp()?,
        })
    }

    /// The snapshot as an entity, for seeding the editing panels.
    pub fn snapshot_entity(&self) -> MediaInfoEntity {
        let mut entity = MediaInfoEntity::empty(self.entity_id);
        entity.title = Some(self.title.clone());
        entity.labels = self.captions.clone();
        for statement in &self.statements {
            entity
                .statements
                .entry(statement.property())
                .or_default()
                .push(statement.clone());
        }
        entity.last_revision = self.last_revision;
        entity
    }
}

pub struct SyncLedger {
    connection: Connection,
}

impl SyncLedger {
    pub fn open(paths: &ResolvedPaths) -> Result<Self> {
        let parent = paths
            .db_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("db path has no parent: {}", paths.db_path.display()))?;
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create database parent directory {}",
                parent.display()
            )
        })?;
        let connection = Connection::open(&paths.db_path)
            .with_context(|| format!("failed to open {}", paths.db_path.display()))?;
        connection
            .busy_timeout(Duration::from_secs(5))
            .context("failed to set sqlite busy timeout")?;
        connection
            .pragma_update(None, "journal_mode", "WAL")
            .context("failed to enable WAL journal mode")?;
        connection
            .execute_batch(LEDGER_SCHEMA_SQL)
            .context("failed to initialize ledger schema")?;
        Ok(Self { connection })
    }

    pub fn upsert(&self, entry: &LedgerEntry) -> Result<()> {
        let captions_json =
            serde_json::to_string(&entry.captions).context("failed to encode ledger captions")?;
        let statements_json = serde_json::to_string(&entry.statements)
            .context("failed to encode ledger statements")?;
        let last_revision = entry
            .last_revision
            .map(i64::try_from)
            .transpose()
            .context("revision id does not fit into i64")?;
        self.connection
            .execute(
                "INSERT INTO structured_data_ledger (
                    title, entity_id, page_id, relative_path, last_revision, captions_json,
                    statements_json, document_hash, last_synced_at_unix
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(title) DO UPDATE SET
                    entity_id = excluded.entity_id,
                    page_id = excluded.page_id,
                    relative_path = excluded.relative_path,
                    last_revision = excluded.last_revision,
                    captions_json = excluded.captions_json,
                    statements_json = excluded.statements_json,
                    document_hash = excluded.document_hash,
                    last_synced_at_unix = excluded.last_synced_at_unix",
                params![
                    normalize_file_title(&entry.title),
                    entry.entity_id.to_string(),
                    i64::try_from(entry.page_id).context("page id does not fit into i64")?,
                    entry.relative_path,
                    last_revision,
                    captions_json,
                    statements_json,
                    entry.document_hash,
                    i64::try_from(entry.last_synced_at_unix)
                        .context("timestamp does not fit into i64")?
                ],
            )
            .with_context(|| format!("failed to upsert ledger row for {}", entry.title))?;
        Ok(())
    }

    pub fn load(&self, title: &str) -> Result<Option<LedgerEntry>> {
        let title = normalize_file_title(title);
        let raw = self
            .connection
            .query_row(
                "SELECT title, entity_id, page_id, relative_path, last_revision, captions_json,
                        statements_json, document_hash, last_synced_at_unix
                 FROM structured_data_ledger WHERE title = ?1",
                [&title],
                RawLedgerRow::from_row,
            )
            .optional()
            .with_context(|| format!("failed to read ledger row for {title}"))?;
        raw.map(RawLedgerRow::decode).transpose()
    }

    /// Every entry keyed by title.
    pub fn load_all(&self) -> Result<BTreeMap<String, LedgerEntry>> {
        let mut statement = self
            .connection
            .prepare(
                "SELECT title, entity_id, page_id, relative_path, last_revision, captions_json,
                        statements_json, document_hash, last_synced_at_unix
                 FROM structured_data_ledger ORDER BY title",
            )
            .context("failed to prepare ledger query")?;
        let rows = statement
            .query_map([], RawLedgerRow::from_row)
            .context("failed to run ledger query")?;
        let mut output = BTreeMap::new();
        for row in rows {
            let entry = row.context("failed to decode ledger row")?.decode()?;
            output.insert(entry.title.clone(), entry);
        }
        Ok(output)
    }

    pub fn remove(&self, title: &str) -> Result<bool> {
        let title = normalize_file_title(title);
        let removed = self
            .connection
            .execute(
                "DELETE FROM structured_data_ledger WHERE title = ?1",
                [&title],
            )
            .with_context(|| format!("failed to delete ledger row for {title}"))?;
        Ok(removed > 0)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM structured_data_ledger", [], |row| {
                row.get(0)
            })
            .context("failed to count ledger rows")?;
        usize::try_from(count).context("ledger row count is negative")
    }
}

struct RawLedgerRow {
    title: String,
    entity_id: String,
    page_id: i64,
    relative_path: String,
    last_revision: Option<i64>,
    captions_json: String,
    statements_json: String,
    document_hash: String,
    last_synced_at_unix: i64,
}

impl RawLedgerRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            title: row.get(0)?,
            entity_id: row.get(1)?,
            page_id: row.get(2)?,
            relative_path: row.get(3)?,
            last_revision: row.get(4)?,
            captions_json: row.get(5)?,
            statements_json: row.get(6)?,
            document_hash: row.get(7)?,
            last_synced_at_unix: row.get(8)?,
        })
    }

    fn decode(self) -> Result<LedgerEntry> {
        let title = self.title;
        Ok(LedgerEntry {
            entity_id: MediaInfoId::parse(&self.entity_id)
                .with_context(|| format!("ledger row for {title} has a bad entity id"))?,
            page_id: u64::try_from(self.page_id).context("negative page id in ledger")?,
            relative_path: self.relative_path,
            last_revision: self
                .last_revision
                .map(u64::try_from)
                .transpose()
                .context("negative revision id in ledger")?,
            captions: serde_json::from_str(&self.captions_json)
                .with_context(|| format!("failed to decode ledger captions for {title}"))?,
            statements: serde_json::from_str(&self.statements_json)
                .with_context(|| format!("failed to decode ledger statements for {title}"))?,
            document_hash: self.document_hash,
            last_synced_at_unix: u64::try_from(self.last_synced_at_unix)
                .context("negative sync timestamp in ledger")?,
            title,
        })
    }
}

fn unix_timestamp() -> Result<u64> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is before UNIX_EPOCH")
        .map(|duration| duration.as_secs())
}
