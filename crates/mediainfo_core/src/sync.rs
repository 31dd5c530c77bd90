use std::collections::{BTreeMap, BTreeSet};
use std::env;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use similar::{ChangeTag, TextDiff};
use tracing::{debug, info, warn};

use crate::api::{
    EditOptions, RepoApiClient, RepoApiClientConfig, RepoApiError, RepoReadApi, RepoWriteApi,
};
use crate::captions::{CaptionPublishError, CaptionValidation, CaptionsPanel, CaptionsPanelConfig};
use crate::config::MediaInfoConfig;
use crate::entity::{DataValue, MediaInfoEntity, MediaInfoId, PropertyId, Statement};
use crate::format::FormatValueCache;
use crate::languages::{LanguageCatalog, normalize_code};
use crate::ledger::{
    LedgerEntry, LocalDocument, StructuredDataDocument, SyncLedger, normalize_file_title,
    read_document, scan_documents, write_document,
};
use crate::runtime::ResolvedPaths;
use crate::statements::{StatementPanel, StatementSubmitError};

#[derive(Debug, Clone, Default)]
pub struct PullOptions {
    /// File titles to pull; empty pulls everything already tracked.
    pub titles: Vec<String>,
    pub overwrite_local: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TitleResult {
    pub title: String,
    pub action: String,
    pub detail: Option<String>,
}

impl TitleResult {
    fn new(title: &str, action: &str, detail: Option<String>) -> Self {
        Self {
            title: title.to_string(),
            action: action.to_string(),
            detail,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PullReport {
    pub success: bool,
    pub requested: usize,
    pub pulled: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub missing: usize,
    pub errors: Vec<String>,
    pub titles: Vec<TitleResult>,
    pub request_count: usize,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DiffChangeType {
    Untracked,
    Modified,
    DeletedLocal,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CaptionChange {
    pub language: String,
    /// `added`, `changed` or `removed`.
    pub kind: String,
    pub before: Option<String>,
    pub after: Option<String>,
    /// Word diff of a changed caption, `[-old-]{+new+}`.
    pub inline: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PropertyChanges {
    pub property: String,
    /// Guids of changed statements; `<new>` for statements not yet saved.
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DiffChange {
    pub title: String,
    pub change_type: DiffChangeType,
    pub relative_path: String,
    pub local_hash: Option<String>,
    pub synced_hash: Option<String>,
    pub synced_revision: Option<u64>,
    pub captions: Vec<CaptionChange>,
    pub statements: Vec<PropertyChanges>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DiffReport {
    pub untracked: usize,
    pub modified: usize,
    pub deleted_local: usize,
    pub changes: Vec<DiffChange>,
}

#[derive(Debug, Clone, Default)]
pub struct PushOptions {
    pub summary: String,
    pub dry_run: bool,
    pub force: bool,
    /// Restrict the push to these titles; empty pushes every modified document.
    pub titles: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PushReport {
    pub success: bool,
    pub dry_run: bool,
    pub pushed: usize,
    pub partial: usize,
    pub unchanged: usize,
    pub captions_saved: usize,
    pub captions_removed: usize,
    pub statements_saved: usize,
    pub statements_removed: usize,
    pub conflicts: Vec<String>,
    pub errors: Vec<String>,
    pub titles: Vec<TitleResult>,
    pub request_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShowCaption {
    pub language: String,
    pub language_name: Option<String>,
    pub text: String,
    pub direction: String,
    pub shown: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShowStatement {
    pub guid: Option<String>,
    pub rank: String,
    pub value: String,
    pub qualifiers: Vec<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ShowProperty {
    pub property: String,
    pub label: String,
    pub statements: Vec<ShowStatement>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShowReport {
    pub title: String,
    pub entity_id: String,
    pub exists: bool,
    pub last_revision: Option<u64>,
    pub hidden_captions: usize,
    pub captions: Vec<ShowCaption>,
    pub properties: Vec<ShowProperty>,
    pub request_count: usize,
}

pub fn language_catalog(config: &MediaInfoConfig) -> Result<LanguageCatalog> {
    Ok(LanguageCatalog::embedded()?.with_extra(&config.captions.extra_languages))
}

pub fn pull_from_remote(
    paths: &ResolvedPaths,
    config: &MediaInfoConfig,
    options: &PullOptions,
) -> Result<PullReport> {
    let mut client = RepoApiClient::new(RepoApiClientConfig::from_config(config))?;
    pull_with_api(paths, options, &mut client)
}

pub fn push_to_remote(
    paths: &ResolvedPaths,
    config: &MediaInfoConfig,
    options: &PushOptions,
) -> Result<PushReport> {
    let mut client = RepoApiClient::new(RepoApiClientConfig::from_config(config))?;
    let credentials = if options.dry_run {
        None
    } else {
        let username = env::var("WIKI_BOT_USER")
            .map_err(|_| anyhow::anyhow!("WIKI_BOT_USER is required for push"))?;
        let password = env::var("WIKI_BOT_PASS")
            .map_err(|_| anyhow::anyhow!("WIKI_BOT_PASS is required for push"))?;
        Some((username, password))
    };
    push_with_api(
        paths,
        config,
        options,
        &mut client,
        credentials
            .as_ref()
            .map(|(username, password)| (username.trim(), password.trim())),
    )
}

pub fn show_from_remote(
    paths: &ResolvedPaths,
    config: &MediaInfoConfig,
    title: &str,
) -> Result<ShowReport> {
    let mut client = RepoApiClient::new(RepoApiClientConfig::from_config(config))?;
    let mut cache = FormatValueCache::new();
    show_with_api(paths, config, title, &mut client, &mut cache)
}

pub fn pull_with_api<A: RepoReadApi + ?Sized>(
    paths: &ResolvedPaths,
    options: &PullOptions,
    api: &mut A,
) -> Result<PullReport> {
    let ledger = SyncLedger::open(paths)?;
    let mut report = PullReport {
        success: true,
        ..PullReport::default()
    };

    let titles = pull_targets(&ledger, options)?;
    report.requested = titles.len();
    if titles.is_empty() {
        report.request_count = api.request_count();
        return Ok(report);
    }

    let mut resolved: BTreeMap<String, (u64, MediaInfoId)> = BTreeMap::new();
    for page in api.resolve_file_pages(&titles)? {
        if let (Some(page_id), Some(entity_id)) = (page.page_id, page.entity_id()) {
            resolved.insert(normalize_file_title(&page.title), (page_id, entity_id));
        }
    }
    let ids: Vec<MediaInfoId> = resolved.values().map(|(_, id)| *id).collect();
    let entities: BTreeMap<MediaInfoId, MediaInfoEntity> = if ids.is_empty() {
        BTreeMap::new()
    } else {
        api.get_entities(&ids)?
            .into_iter()
            .map(|entity| (entity.id, entity))
            .collect()
    };

    for title in &titles {
        let Some((page_id, entity_id)) = resolved.get(title).copied() else {
            report.missing += 1;
            report.titles.push(TitleResult::new(
                title,
                "missing",
                Some("file page does not exist".to_string()),
            ));
            continue;
        };
        let mut entity = entities
            .get(&entity_id)
            .cloned()
            .unwrap_or_else(|| MediaInfoEntity::empty(entity_id));
        entity.title = Some(title.clone());

        match pull_one(paths, &ledger, title, page_id, &entity, options.overwrite_local) {
            Ok(result) => {
                match result.action.as_str() {
                    "created" => {
                        report.pulled += 1;
                        report.created += 1;
                    }
                    "updated" => {
                        report.pulled += 1;
                        report.updated += 1;
                    }
                    "unchanged" => report.unchanged += 1,
                    _ => report.skipped += 1,
                }
                report.titles.push(result);
            }
            Err(error) => {
                report.errors.push(format!("{title}: {error:#}"));
                report.titles.push(TitleResult::new(
                    title,
                    "error",
                    Some(format!("{error:#}")),
                ));
            }
        }
    }

    report.request_count = api.request_count();
    report.success = report.errors.is_empty();
    info!(
        pulled = report.pulled,
        skipped = report.skipped,
        missing = report.missing,
        "pull finished"
    );
    Ok(report)
}

fn pull_targets(ledger: &SyncLedger, options: &PullOptions) -> Result<Vec<String>> {
    let mut titles: Vec<String> = if options.titles.is_empty() {
        ledger.load_all()?.into_keys().collect()
    } else {
        options
            .titles
            .iter()
            .map(|title| normalize_file_title(title))
            .collect()
    };
    titles.sort();
    titles.dedup();
    Ok(titles)
}

fn pull_one(
    paths: &ResolvedPaths,
    ledger: &SyncLedger,
    title: &str,
    page_id: u64,
    entity: &MediaInfoEntity,
    overwrite_local: bool,
) -> Result<TitleResult> {
    let local = read_document(paths, title)?;
    let entry = ledger.load(title)?;
    let locally_modified = match (&local, &entry) {
        (Some(local), Some(entry)) => local.content_hash != entry.document_hash,
        (Some(_), None) => true,
        (None, _) => false,
    };
    if locally_modified && !overwrite_local {
        debug!(title, "skipping locally modified document");
        return Ok(TitleResult::new(
            title,
            "skipped",
            Some("local document modified since last sync (use --overwrite-local)".to_string()),
        ));
    }

    let document = StructuredDataDocument::from_entity(title, entity);
    if let (Some(local), Some(entry)) = (&local, &entry)
        && !locally_modified
        && local.document == document
        && entry.last_revision == entity.last_revision
    {
        return Ok(TitleResult::new(title, "unchanged", None));
    }

    let written = write_document(paths, &document)?;
    ledger.upsert(&LedgerEntry::from_sync(&written, entity, page_id)?)?;
    let action = if local.is_some() { "updated" } else { "created" };
    Ok(TitleResult::new(
        title,
        action,
        entity
            .last_revision
            .map(|revision| format!("revision {revision}")),
    ))
}

pub fn diff_local_against_ledger(paths: &ResolvedPaths) -> Result<Option<DiffReport>> {
    if !paths.db_path.exists() {
        return Ok(None);
    }
    let ledger = SyncLedger::open(paths)?;
    let entries = ledger.load_all()?;
    let documents = scan_documents(paths)?;

    let mut changes = Vec::new();
    let mut seen = BTreeSet::new();
    for local in &documents {
        let title = local.document.file.clone();
        seen.insert(title.clone());
        match entries.get(&title) {
            None => changes.push(DiffChange {
                title,
                change_type: DiffChangeType::Untracked,
                relative_path: local.relative_path.clone(),
                local_hash: Some(local.content_hash.clone()),
                synced_hash: None,
                synced_revision: None,
                captions: Vec::new(),
                statements: Vec::new(),
            }),
            Some(entry) if entry.document_hash != local.content_hash => {
                let captions = caption_changes(&entry.captions, &local.document.captions);
                let statements = statement_changes(entry, &local.document)?;
                changes.push(DiffChange {
                    title,
                    change_type: DiffChangeType::Modified,
                    relative_path: local.relative_path.clone(),
                    local_hash: Some(local.content_hash.clone()),
                    synced_hash: Some(entry.document_hash.clone()),
                    synced_revision: entry.last_revision,
                    captions,
                    statements,
                });
            }
            Some(_) => {}
        }
    }
    for entry in entries.values() {
        if !seen.contains(&entry.title) {
            changes.push(DiffChange {
                title: entry.title.clone(),
                change_type: DiffChangeType::DeletedLocal,
                relative_path: entry.relative_path.clone(),
                local_hash: None,
                synced_hash: Some(entry.document_hash.clone()),
                synced_revision: entry.last_revision,
                captions: Vec::new(),
                statements: Vec::new(),
            });
        }
    }

    changes.sort_by(|left, right| {
        left.change_type
            .cmp(&right.change_type)
            .then(left.title.cmp(&right.title))
    });
    let count = |kind: DiffChangeType| {
        changes
            .iter()
            .filter(|change| change.change_type == kind)
            .count()
    };
    Ok(Some(DiffReport {
        untracked: count(DiffChangeType::Untracked),
        modified: count(DiffChangeType::Modified),
        deleted_local: count(DiffChangeType::DeletedLocal),
        changes,
    }))
}

fn caption_changes(
    synced: &BTreeMap<String, String>,
    local: &BTreeMap<String, String>,
) -> Vec<CaptionChange> {
    let local: BTreeMap<String, &String> = local
        .iter()
        .filter(|(_, text)| !text.is_empty())
        .map(|(language, text)| (normalize_code(language), text))
        .collect();
    let mut output = Vec::new();
    for (language, text) in &local {
        match synced.get(language) {
            None => output.push(CaptionChange {
                language: language.clone(),
                kind: "added".to_string(),
                before: None,
                after: Some((*text).clone()),
                inline: None,
            }),
            Some(before) if before != *text => output.push(CaptionChange {
                language: language.clone(),
                kind: "changed".to_string(),
                before: Some(before.clone()),
                after: Some((*text).clone()),
                inline: Some(inline_diff(before, text)),
            }),
            Some(_) => {}
        }
    }
    for (language, before) in synced {
        if !local.contains_key(language) {
            output.push(CaptionChange {
                language: language.clone(),
                kind: "removed".to_string(),
                before: Some(before.clone()),
                after: None,
                inline: None,
            });
        }
    }
    output.sort_by(|left, right| left.language.cmp(&right.language));
    output
}

fn statement_changes(
    entry: &LedgerEntry,
    document: &StructuredDataDocument,
) -> Result<Vec<PropertyChanges>> {
    let synced = entry.snapshot_entity();
    let mut local = document.statements_by_property();
    let properties: BTreeSet<PropertyId> = synced
        .statements
        .keys()
        .chain(local.keys())
        .copied()
        .collect();

    let mut output = Vec::new();
    for property in properties {
        let mut panel = StatementPanel::new(entry.entity_id, property, None);
        panel.reset_data(Some(synced.statements_for(property)))?;
        panel.set_data(local.remove(&property).unwrap_or_default())?;
        let changed: Vec<String> = panel.get_changes().iter().map(guid_label).collect();
        let removed: Vec<String> = panel.get_removals().iter().map(guid_label).collect();
        if !changed.is_empty() || !removed.is_empty() {
            output.push(PropertyChanges {
                property: property.to_string(),
                changed,
                removed,
            });
        }
    }
    Ok(output)
}

fn guid_label(statement: &Statement) -> String {
    statement
        .guid
        .clone()
        .unwrap_or_else(|| "<new>".to_string())
}

/// Word-level diff with removed runs as `[-…-]` and inserted runs as `{+…+}`.
pub fn inline_diff(before: &str, after: &str) -> String {
    let diff = TextDiff::from_words(before, after);
    let mut output = String::new();
    let mut run_tag = ChangeTag::Equal;
    let mut run = String::new();
    for change in diff.iter_all_changes() {
        if change.tag() != run_tag {
            flush_run(run_tag, &mut run, &mut output);
            run_tag = change.tag();
        }
        run.push_str(change.value());
    }
    flush_run(run_tag, &mut run, &mut output);
    output
}

fn flush_run(tag: ChangeTag, run: &mut String, output: &mut String) {
    if run.is_empty() {
        return;
    }
    match tag {
        ChangeTag::Equal => output.push_str(run),
        ChangeTag::Delete => output.push_str(&format!("[-{run}-]")),
        ChangeTag::Insert => output.push_str(&format!("{{+{run}+}}")),
    }
    run.clear();
}

pub fn push_with_api<A: RepoWriteApi + ?Sized>(
    paths: &ResolvedPaths,
    config: &MediaInfoConfig,
    options: &PushOptions,
    api: &mut A,
    credentials: Option<(&str, &str)>,
) -> Result<PushReport> {
    if options.summary.trim().is_empty() {
        bail!("push requires a non-empty summary");
    }
    let ledger = SyncLedger::open(paths)?;
    let catalog = language_catalog(config)?;
    let edit_options = EditOptions::from_config(config, Some(&options.summary));
    let mut report = PushReport {
        success: true,
        dry_run: options.dry_run,
        ..PushReport::default()
    };

    let filter: BTreeSet<String> = options
        .titles
        .iter()
        .map(|title| normalize_file_title(title))
        .collect();
    let entries = ledger.load_all()?;
    let mut candidates: Vec<(LocalDocument, LedgerEntry)> = Vec::new();
    for local in scan_documents(paths)? {
        let title = local.document.file.clone();
        if !filter.is_empty() && !filter.contains(&title) {
            continue;
        }
        match entries.get(&title) {
            None => report.titles.push(TitleResult::new(
                &title,
                "untracked",
                Some("pull the file before pushing".to_string()),
            )),
            Some(entry) if entry.document_hash != local.content_hash => {
                candidates.push((local, entry.clone()));
            }
            Some(_) => {}
        }
    }

    if candidates.is_empty() {
        report.request_count = api.request_count();
        return Ok(report);
    }

    let plans: Vec<PushPlan> = candidates
        .into_iter()
        .map(|(local, entry)| PushPlan::new(local, entry))
        .collect::<Result<_>>()?;

    if options.dry_run {
        for plan in &plans {
            let action = if plan.is_empty() { "unchanged" } else { "would_update" };
            report.titles.push(TitleResult::new(
                &plan.entry.title,
                action,
                Some(plan.describe()),
            ));
        }
        report.request_count = api.request_count();
        return Ok(report);
    }

    let (username, password) = credentials
        .ok_or_else(|| anyhow::anyhow!("push credentials are required for write mode"))?;
    api.login(username, password)?;

    for plan in plans {
        let title = plan.entry.title.clone();
        if plan.is_empty() {
            // Formatting-only edits: adopt the local file as the synced copy.
            let mut entry = plan.entry.clone();
            entry.document_hash = plan.local.content_hash.clone();
            ledger.upsert(&entry)?;
            report.unchanged += 1;
            report.titles.push(TitleResult::new(&title, "unchanged", None));
            continue;
        }

        let remote = match api.get_entity(plan.entry.entity_id) {
            Ok(remote) => remote,
            Err(error) => {
                report.errors.push(format!("{title}: {error:#}"));
                report.titles.push(TitleResult::new(
                    &title,
                    "error",
                    Some("failed to load remote entity".to_string()),
                ));
                continue;
            }
        };
        if !options.force && remote.last_revision != plan.entry.last_revision {
            warn!(
                title = %title,
                synced = ?plan.entry.last_revision,
                remote = ?remote.last_revision,
                "remote entity changed since last sync"
            );
            report.conflicts.push(title.clone());
            report.titles.push(TitleResult::new(
                &title,
                "conflict",
                Some("remote entity changed since last sync".to_string()),
            ));
            continue;
        }

        let mut applied = AppliedEdits::default();
        push_captions(
            api,
            config,
            &catalog,
            &plan,
            &remote,
            &edit_options,
            &mut applied,
        );
        if applied.failures.is_empty() {
            push_statements(api, config, &plan, &remote, &edit_options, &mut applied);
        }

        report.captions_saved += applied.captions_saved;
        report.captions_removed += applied.captions_removed;
        report.statements_saved += applied.statements_saved;
        report.statements_removed += applied.statements_removed;

        if let Err(error) = record_push(paths, &ledger, api, &plan, applied.failures.is_empty()) {
            applied
                .failures
                .push(format!("failed to refresh local copy: {error:#}"));
        }

        if applied.failures.is_empty() {
            report.pushed += 1;
            report.titles.push(TitleResult::new(&title, "updated", None));
            continue;
        }
        for failure in &applied.failures {
            report.errors.push(format!("{title}: {failure}"));
        }
        let action = if applied.edits() > 0 {
            report.partial += 1;
            "partial"
        } else {
            "error"
        };
        report
            .titles
            .push(TitleResult::new(&title, action, Some(applied.failures.join("; "))));
    }

    report.request_count = api.request_count();
    report.success = report.errors.is_empty() && report.conflicts.is_empty();
    info!(
        pushed = report.pushed,
        partial = report.partial,
        conflicts = report.conflicts.len(),
        "push finished"
    );
    Ok(report)
}

/// What one modified document would change relative to its synced snapshot.
struct PushPlan {
    local: LocalDocument,
    entry: LedgerEntry,
    captions: Vec<CaptionChange>,
    statements: Vec<PropertyChanges>,
}

impl PushPlan {
    fn new(local: LocalDocument, entry: LedgerEntry) -> Result<Self> {
        if local.document.entity_id != entry.entity_id {
            bail!(
                "{} names entity {} but was synced as {}",
                local.relative_path,
                local.document.entity_id,
                entry.entity_id
            );
        }
        let captions = caption_changes(&entry.captions, &local.document.captions);
        let statements = statement_changes(&entry, &local.document)?;
        Ok(Self {
            local,
            entry,
            captions,
            statements,
        })
    }

    fn is_empty(&self) -> bool {
        self.captions.is_empty() && self.statements.is_empty()
    }

    fn describe(&self) -> String {
        let count = |kind: &str| {
            self.captions
                .iter()
                .filter(|change| change.kind == kind)
                .count()
        };
        let changed: usize = self.statements.iter().map(|item| item.changed.len()).sum();
        let removed: usize = self.statements.iter().map(|item| item.removed.len()).sum();
        format!(
            "captions +{} ~{} -{}; statements ~{changed} -{removed}",
            count("added"),
            count("changed"),
            count("removed"),
        )
    }

    fn desired_captions(&self) -> BTreeMap<String, String> {
        self.local
            .document
            .captions
            .iter()
            .filter(|(_, text)| !text.is_empty())
            .map(|(language, text)| (normalize_code(language), text.clone()))
            .collect()
    }
}

#[derive(Debug, Default)]
struct AppliedEdits {
    captions_saved: usize,
    captions_removed: usize,
    statements_saved: usize,
    statements_removed: usize,
    last_revision: Option<u64>,
    failures: Vec<String>,
}

impl AppliedEdits {
    fn edits(&self) -> usize {
        self.captions_saved + self.captions_removed + self.statements_saved + self.statements_removed
    }
}

fn push_captions<A: RepoWriteApi + ?Sized>(
    api: &mut A,
    config: &MediaInfoConfig,
    catalog: &LanguageCatalog,
    plan: &PushPlan,
    remote: &MediaInfoEntity,
    options: &EditOptions,
    applied: &mut AppliedEdits,
) {
    applied.last_revision = remote.last_revision;
    if plan.captions.is_empty() {
        return;
    }
    let unsupported: Vec<&CaptionChange> = plan
        .captions
        .iter()
        .filter(|change| !catalog.is_known(&change.language))
        .collect();
    if !unsupported.is_empty() {
        for change in unsupported {
            let verb = if change.kind == "removed" {
                "removed"
            } else {
                "saved"
            };
            applied.failures.push(format!(
                "caption language `{}` is not supported; its caption cannot be {verb}",
                change.language
            ));
        }
        return;
    }
    // Captions in other languages are left as they are on the wiki.
    let desired: BTreeMap<String, String> = plan
        .desired_captions()
        .into_iter()
        .filter(|(code, _)| catalog.is_known(code))
        .collect();

    let mut panel = CaptionsPanel::new(
        plan.entry.entity_id,
        catalog.clone(),
        CaptionsPanelConfig::from_config(config),
    );
    panel.initialize(remote);
    panel.make_editable(api);
    if let Err(error) = stage_caption_rows(&mut panel, &desired) {
        applied.failures.push(format!("{error:#}"));
        return;
    }
    if let Some((index, over)) = panel
        .validate()
        .iter()
        .enumerate()
        .find_map(|(index, result)| match result {
            CaptionValidation::TooLong { over } => Some((index, *over)),
            _ => None,
        })
    {
        let language = panel.rows()[index].language.clone().unwrap_or_default();
        applied.failures.push(format!(
            "caption {language} is {over} characters over the limit"
        ));
        return;
    }
    if !panel.can_publish() {
        return;
    }

    match panel.publish(api, options) {
        Ok(outcome) => {
            applied.captions_saved += outcome.updated.len();
            applied.captions_removed += outcome.removed.len();
            applied.last_revision = outcome.last_revision.or(applied.last_revision);
        }
        Err(error) => {
            applied.last_revision = panel.current_revision();
            let message = match error.downcast_ref::<CaptionPublishError>() {
                Some(failure) => format!("caption {}: {}", failure.language, failure.message),
                None => format!("{error:#}"),
            };
            // Edits before the failing row went through.
            let saved = plan
                .captions
                .iter()
                .filter(|change| {
                    change.kind != "removed"
                        && panel.labels().get(&change.language) == change.after.as_ref()
                })
                .count();
            applied.captions_saved += saved;
            applied.failures.push(message);
        }
    }
}

/// Rewrites the panel's rows so they hold exactly `desired`.
fn stage_caption_rows(panel: &mut CaptionsPanel, desired: &BTreeMap<String, String>) -> Result<()> {
    for index in (0..panel.rows().len()).rev() {
        let row = panel.rows()[index].clone();
        let Some(language) = row.language else {
            panel.delete_row(index)?;
            continue;
        };
        match desired.get(&language) {
            Some(text) if *text != row.text => panel.set_row_text(index, text)?,
            Some(_) => {}
            None => panel.delete_row(index)?,
        }
    }
    for (language, text) in desired {
        if panel
            .rows()
            .iter()
            .any(|row| row.language.as_deref() == Some(language.as_str()))
        {
            continue;
        }
        let index = panel.add_row()?;
        panel.set_row_language(index, language)?;
        panel.set_row_text(index, text)?;
    }
    Ok(())
}

fn push_statements<A: RepoWriteApi + ?Sized>(
    api: &mut A,
    config: &MediaInfoConfig,
    plan: &PushPlan,
    remote: &MediaInfoEntity,
    options: &EditOptions,
    applied: &mut AppliedEdits,
) {
    if plan.statements.is_empty() {
        return;
    }
    let mut local = plan.local.document.statements_by_property();
    let properties: BTreeSet<PropertyId> = remote
        .statements
        .keys()
        .chain(local.keys())
        .copied()
        .collect();
    let datatypes = property_datatypes(api, config, &properties);

    let mut revision = applied.last_revision;
    for property in properties {
        let mut panel = StatementPanel::new(
            plan.entry.entity_id,
            property,
            datatypes.get(&property).map(String::as_str),
        );
        let staged = panel
            .reset_data(Some(remote.statements_for(property)))
            .and_then(|()| panel.set_data(local.remove(&property).unwrap_or_default()));
        if let Err(error) = staged {
            applied.failures.push(format!("{error:#}"));
            continue;
        }
        if !panel.can_publish() {
            continue;
        }
        let changes = panel.get_changes().len();
        let removals: Vec<String> = panel
            .get_removals()
            .into_iter()
            .filter_map(|statement| statement.guid)
            .collect();
        match panel.submit(api, revision, options) {
            Ok(outcome) => {
                applied.statements_saved += outcome.saved;
                applied.statements_removed += outcome.removed;
                revision = outcome.last_revision;
            }
            Err(error) => match error.downcast_ref::<StatementSubmitError>() {
                Some(failure) => {
                    let failed_removals = failure
                        .failures
                        .iter()
                        .filter(|item| item.guid.as_ref().is_some_and(|guid| removals.contains(guid)))
                        .count();
                    let failed_changes = failure.failures.len() - failed_removals;
                    applied.statements_saved += changes.saturating_sub(failed_changes);
                    applied.statements_removed += removals.len() - failed_removals;
                    revision = failure.last_revision;
                    applied.failures.push(failure.to_string());
                }
                None => applied.failures.push(RepoApiError::describe(&error)),
            },
        }
    }
    applied.last_revision = revision;
}

fn property_datatypes<A: RepoReadApi + ?Sized>(
    api: &mut A,
    config: &MediaInfoConfig,
    properties: &BTreeSet<PropertyId>,
) -> BTreeMap<PropertyId, String> {
    let mut datatypes = config.property_types().unwrap_or_else(|error| {
        warn!(error = %format!("{error:#}"), "ignoring [statements.property_types]");
        BTreeMap::new()
    });
    let missing: Vec<PropertyId> = properties
        .iter()
        .filter(|property| !datatypes.contains_key(*property))
        .copied()
        .collect();
    if missing.is_empty() {
        return datatypes;
    }
    match api.get_property_datatypes(&missing) {
        Ok(fetched) => datatypes.extend(fetched),
        Err(error) => warn!(
            error = %format!("{error:#}"),
            "property datatypes unavailable; value types are not checked"
        ),
    }
    datatypes
}

/// Re-reads the entity after a push. A clean push rewrites the document from the
/// entity. After a partial failure the document keeps the edits that still need
/// sending, with guids adopted for statements that were created, and the ledger
/// keeps the old document hash so the file stays modified.
fn record_push<A: RepoReadApi + ?Sized>(
    paths: &ResolvedPaths,
    ledger: &SyncLedger,
    api: &mut A,
    plan: &PushPlan,
    clean: bool,
) -> Result<()> {
    let mut fresh = api
        .get_entity(plan.entry.entity_id)
        .context("failed to re-read entity after push")?;
    fresh.title = Some(plan.entry.title.clone());
    if clean {
        let document = StructuredDataDocument::from_entity(&plan.entry.title, &fresh);
        let written = write_document(paths, &document)?;
        ledger.upsert(&LedgerEntry::from_sync(&written, &fresh, plan.entry.page_id)?)?;
    } else {
        let mut pending = plan.local.document.clone();
        adopt_assigned_guids(&mut pending, &plan.entry, &fresh);
        let written = write_document(paths, &pending)?;
        let mut entry = LedgerEntry::from_sync(&written, &fresh, plan.entry.page_id)?;
        entry.document_hash = plan.entry.document_hash.clone();
        ledger.upsert(&entry)?;
    }
    Ok(())
}

/// Gives guid-less local statements the guid of a matching statement that the
/// push created, so they are not created again.
fn adopt_assigned_guids(
    document: &mut StructuredDataDocument,
    synced: &LedgerEntry,
    fresh: &MediaInfoEntity,
) {
    let known: BTreeSet<&str> = synced
        .statements
        .iter()
        .filter_map(|statement| statement.guid.as_deref())
        .collect();
    let mut created: Vec<&Statement> = fresh
        .statements
        .values()
        .flatten()
        .filter(|statement| {
            statement
                .guid
                .as_deref()
                .is_some_and(|guid| !known.contains(guid))
        })
        .collect();
    for statement in document
        .statements
        .iter_mut()
        .filter(|statement| statement.guid.is_none())
    {
        let position = created.iter().position(|candidate| {
            let mut unsaved = (*candidate).clone();
            unsaved.guid = None;
            unsaved == *statement
        });
        if let Some(position) = position {
            statement.guid = created.remove(position).guid.clone();
        }
    }
}

pub fn show_with_api<A: RepoReadApi + ?Sized>(
    paths: &ResolvedPaths,
    config: &MediaInfoConfig,
    title: &str,
    api: &mut A,
    cache: &mut FormatValueCache,
) -> Result<ShowReport> {
    let title = normalize_file_title(title);
    let tracked = if paths.db_path.exists() {
        SyncLedger::open(paths)?.load(&title)?
    } else {
        None
    };
    let entity_id = match tracked {
        Some(entry) => entry.entity_id,
        None => api
            .resolve_file_pages(std::slice::from_ref(&title))?
            .into_iter()
            .find_map(|page| page.entity_id())
            .ok_or_else(|| anyhow::anyhow!("{title} does not exist"))?,
    };
    let entity = api.get_entity(entity_id)?;
    let catalog = language_catalog(config)?;
    let language = normalize_code(&config.interface_language());

    let mut panel = CaptionsPanel::new(
        entity_id,
        catalog.clone(),
        CaptionsPanelConfig::from_config(config),
    );
    panel.initialize(&entity);
    let captions = panel
        .read_only_rows()
        .into_iter()
        .map(|row| ShowCaption {
            language_name: catalog.name(&row.caption.language).map(ToString::to_string),
            language: row.caption.language,
            text: row.caption.text,
            direction: row.caption.direction.as_str().to_string(),
            shown: row.shown,
        })
        .collect();

    let mut properties: Vec<PropertyId> = config.default_properties()?;
    for property in entity.statements.keys() {
        if !properties.contains(property) {
            properties.push(*property);
        }
    }
    let mut shown = Vec::new();
    for property in properties {
        let mut statements = StatementPanel::new(entity_id, property, None);
        statements.reset_data(Some(entity.statements_for(property)))?;
        let mut rows = Vec::new();
        for item in statements.items() {
            let value = match item.value() {
                Some(value) => cache.format_or_plain(api, value, &language),
                None => String::new(),
            };
            let data = item.data();
            let mut qualifiers = Vec::new();
            for qualifier in &data.qualifiers {
                let label = property_label(api, cache, qualifier.property, &language);
                let rendered = match &qualifier.datavalue {
                    Some(value) => cache.format_or_plain(api, value, &language),
                    None => format!("({:?})", qualifier.snaktype).to_lowercase(),
                };
                qualifiers.push(format!("{label}: {rendered}"));
            }
            rows.push(ShowStatement {
                guid: item.guid().map(ToString::to_string),
                rank: item.rank().as_str().to_string(),
                value,
                qualifiers,
            });
        }
        shown.push(ShowProperty {
            property: property.to_string(),
            label: property_label(api, cache, property, &language),
            statements: rows,
        });
    }

    Ok(ShowReport {
        title,
        entity_id: entity_id.to_string(),
        exists: entity.exists(),
        last_revision: entity.last_revision,
        hidden_captions: panel.hidden_count(),
        captions,
        properties: shown,
        request_count: api.request_count(),
    })
}

fn property_label<A: RepoReadApi + ?Sized>(
    api: &mut A,
    cache: &mut FormatValueCache,
    property: PropertyId,
    language: &str,
) -> String {
    match DataValue::item(&property.to_string()) {
        Some(value) => cache.format_or_plain(api, &value, language),
        None => property.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;
    use crate::entity::Snak;
    use crate::ledger::document_path;
    use crate::mock::{MockRepo, depicts, entity_with, item_statement, mid};
    use crate::runtime::{InitOptions, init_layout};

    fn workspace(root: &std::path::Path) -> ResolvedPaths {
        let paths = ResolvedPaths::under(root);
        init_layout(
            &paths,
            &InitOptions {
                materialize_config: false,
                force: false,
            },
        )
        .expect("init");
        paths
    }

    fn repo_with_cat() -> MockRepo {
        let mut repo = MockRepo::default().with_entity(entity_with(
            mid(12),
            &[("en", "A cat"), ("fr", "Un chat")],
            vec![item_statement(Some("M12$a"), "Q146")],
            Some(40),
        ));
        repo.pages.insert("File:Cat.jpg".to_string(), 12);
        repo.datatypes
            .insert(depicts(), "wikibase-item".to_string());
        repo
    }

    fn pull(paths: &ResolvedPaths, repo: &mut MockRepo, overwrite_local: bool) -> PullReport {
        pull_with_api(
            paths,
            &PullOptions {
                titles: vec!["Cat.jpg".to_string(), "File:Missing.jpg".to_string()],
                overwrite_local,
            },
            repo,
        )
        .expect("pull")
    }

    fn edit_document(paths: &ResolvedPaths, edit: impl FnOnce(&mut StructuredDataDocument)) {
        let mut local = read_document(paths, "File:Cat.jpg")
            .expect("read")
            .expect("present");
        edit(&mut local.document);
        write_document(paths, &local.document).expect("write");
    }

    fn push_options(dry_run: bool) -> PushOptions {
        PushOptions {
            summary: "sync captions".to_string(),
            dry_run,
            force: false,
            titles: Vec::new(),
        }
    }

    #[test]
    fn pull_writes_documents_and_reports_missing_pages() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();

        let report = pull(&paths, &mut repo, false);
        assert_eq!(report.requested, 2);
        assert_eq!(report.created, 1);
        assert_eq!(report.missing, 1);
        assert!(report.success);

        let local = read_document(&paths, "File:Cat.jpg")
            .expect("read")
            .expect("present");
        assert_eq!(local.document.entity_id, mid(12));
        assert_eq!(local.document.captions["fr"], "Un chat");
        let entry = SyncLedger::open(&paths)
            .expect("ledger")
            .load("File:Cat.jpg")
            .expect("load")
            .expect("tracked");
        assert_eq!(entry.last_revision, Some(40));
        assert_eq!(entry.document_hash, local.content_hash);

        let again = pull(&paths, &mut repo, false);
        assert_eq!(again.unchanged, 1);
    }

    #[test]
    fn pull_skips_locally_modified_documents_unless_overwriting() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A sleepy cat".to_string());
        });

        let report = pull(&paths, &mut repo, false);
        assert_eq!(report.skipped, 1);
        assert_eq!(
            read_document(&paths, "File:Cat.jpg")
                .expect("read")
                .expect("present")
                .document
                .captions["en"],
            "A sleepy cat"
        );

        let report = pull(&paths, &mut repo, true);
        assert_eq!(report.updated, 1);
        assert_eq!(
            read_document(&paths, "File:Cat.jpg")
                .expect("read")
                .expect("present")
                .document
                .captions["en"],
            "A cat"
        );
    }

    #[test]
    fn diff_reports_caption_and_statement_changes() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
            document.captions.remove("fr");
            document
                .captions
                .insert("de".to_string(), "Eine Katze".to_string());
            document.statements.push(item_statement(None, "Q5"));
        });
        let stray = StructuredDataDocument {
            file: "File:Dog.jpg".to_string(),
            entity_id: mid(13),
            captions: BTreeMap::new(),
            statements: Vec::new(),
        };
        write_document(&paths, &stray).expect("write");

        let report = diff_local_against_ledger(&paths)
            .expect("diff")
            .expect("ledger present");
        assert_eq!(report.modified, 1);
        assert_eq!(report.untracked, 1);
        let modified = report
            .changes
            .iter()
            .find(|change| change.change_type == DiffChangeType::Modified)
            .expect("modified");
        let kinds: Vec<(&str, &str)> = modified
            .captions
            .iter()
            .map(|change| (change.language.as_str(), change.kind.as_str()))
            .collect();
        assert_eq!(
            kinds,
            vec![("de", "added"), ("en", "changed"), ("fr", "removed")]
        );
        let inline = modified.captions[1].inline.as_deref().expect("inline diff");
        assert!(inline.contains("{+") && inline.contains("black"), "{inline}");
        assert_eq!(
            modified.statements,
            vec![PropertyChanges {
                property: "P180".to_string(),
                changed: vec!["<new>".to_string()],
                removed: Vec::new(),
            }]
        );
    }

    #[test]
    fn diff_without_ledger_is_none() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::under(temp.path());
        assert!(diff_local_against_ledger(&paths).expect("diff").is_none());
    }

    #[test]
    fn inline_diff_groups_word_runs() {
        assert_eq!(
            inline_diff("A black cat", "A white cat"),
            "A [-black-]{+white+} cat"
        );
        assert_eq!(inline_diff("same", "same"), "same");
    }

    #[test]
    fn push_requires_summary() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        let error = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &PushOptions::default(),
            &mut repo,
            None,
        )
        .expect_err("summary required");
        assert!(error.to_string().contains("non-empty summary"));
    }

    #[test]
    fn dry_run_push_reports_without_writing() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(true),
            &mut repo,
            None,
        )
        .expect("push");
        assert_eq!(report.titles.len(), 1);
        assert_eq!(report.titles[0].action, "would_update");
        assert_eq!(
            report.titles[0].detail.as_deref(),
            Some("captions +0 ~1 -0; statements ~0 -0")
        );
        assert!(repo.label_calls.is_empty());
        assert!(!repo.logged_in);
    }

    #[test]
    fn push_replays_captions_then_statements_and_refreshes_document() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
            document.captions.remove("fr");
            document.statements.push(item_statement(None, "Q5"));
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.pushed, 1);
        assert_eq!(report.captions_saved, 1);
        assert_eq!(report.captions_removed, 1);
        assert_eq!(report.statements_saved, 1);
        assert!(repo.logged_in);

        let bases: Vec<Option<u64>> = repo.label_calls.iter().map(|call| call.base_revision).collect();
        assert_eq!(bases, vec![Some(40), Some(41)]);
        assert_eq!(repo.claim_calls, vec![(None, Some(42))]);

        let local = read_document(&paths, "File:Cat.jpg")
            .expect("read")
            .expect("present");
        assert!(!local.document.captions.contains_key("fr"));
        assert!(
            local
                .document
                .statements
                .iter()
                .any(|statement| statement.guid.as_deref() == Some("M12$mock-1"))
        );
        let entry = SyncLedger::open(&paths)
            .expect("ledger")
            .load("File:Cat.jpg")
            .expect("load")
            .expect("tracked");
        assert_eq!(entry.last_revision, Some(43));
        assert_eq!(entry.document_hash, local.content_hash);
        assert_eq!(
            diff_local_against_ledger(&paths)
                .expect("diff")
                .expect("ledger")
                .changes
                .len(),
            0
        );
    }

    #[test]
    fn push_detects_remote_conflicts_unless_forced() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
        });
        if let Some(entity) = repo.entities.get_mut(&mid(12)) {
            entity.last_revision = Some(55);
        }

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert_eq!(report.conflicts, vec!["File:Cat.jpg".to_string()]);
        assert!(!report.success);
        assert!(repo.label_calls.is_empty());

        let forced = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &PushOptions {
                force: true,
                ..push_options(false)
            },
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert_eq!(forced.pushed, 1);
        assert_eq!(repo.label_calls[0].base_revision, Some(55));
    }

    #[test]
    fn push_partial_failure_keeps_local_edits_pending() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
            document.statements.push(item_statement(None, "Q5"));
            document.statements.push(item_statement(None, "Q7"));
        });
        repo.failing_claim_values.insert("Q7".to_string());

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert_eq!(report.partial, 1);
        assert_eq!(report.titles[0].action, "partial");
        assert_eq!(report.statements_saved, 1);
        assert!(report.errors[0].contains("Could not save Q7"));

        // The snapshot caught up with what was saved; only Q7 remains.
        let diff = diff_local_against_ledger(&paths)
            .expect("diff")
            .expect("ledger");
        let change = &diff.changes[0];
        assert_eq!(change.change_type, DiffChangeType::Modified);
        assert!(change.captions.is_empty());
        assert_eq!(change.statements[0].changed, vec!["<new>".to_string()]);
        assert_eq!(change.synced_revision, Some(42));
    }

    #[test]
    fn push_rejects_unknown_caption_language() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("xx-unknown".to_string(), "??".to_string());
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert_eq!(report.titles[0].action, "error");
        assert!(report.errors[0].contains("xx-unknown"));
        assert!(repo.label_calls.is_empty());
    }

    fn repo_with_regional_caption() -> MockRepo {
        let mut repo = repo_with_cat();
        if let Some(entity) = repo.entities.get_mut(&mid(12)) {
            entity
                .labels
                .insert("xx-unknown".to_string(), "En Katt".to_string());
        }
        repo
    }

    #[test]
    fn push_leaves_unchanged_captions_in_other_languages_alone() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_regional_caption();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document
                .captions
                .insert("en".to_string(), "A black cat".to_string());
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.titles[0].action, "updated");
        let languages: Vec<&str> = repo
            .label_calls
            .iter()
            .map(|call| call.language.as_str())
            .collect();
        assert_eq!(languages, vec!["en"]);

        let remote = repo.entity(mid(12));
        assert_eq!(
            remote.labels.get("xx-unknown").map(String::as_str),
            Some("En Katt")
        );
        let local = read_document(&paths, "File:Cat.jpg")
            .expect("read")
            .expect("present");
        assert_eq!(
            local.document.captions.get("xx-unknown").map(String::as_str),
            Some("En Katt")
        );
    }

    #[test]
    fn removing_caption_in_unsupported_language_is_reported() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_regional_caption();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document.captions.remove("xx-unknown");
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert!(!report.success);
        assert_eq!(report.titles[0].action, "error");
        assert!(report.errors[0].contains("cannot be removed"));
        assert!(repo.label_calls.is_empty());

        let local = read_document(&paths, "File:Cat.jpg")
            .expect("read")
            .expect("present");
        assert!(!local.document.captions.contains_key("xx-unknown"));
        let diff = diff_local_against_ledger(&paths)
            .expect("diff")
            .expect("ledger");
        assert_eq!(diff.modified, 1);
        assert_eq!(diff.changes[0].captions[0].kind, "removed");
    }

    #[test]
    fn push_rejects_values_of_the_wrong_type() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        pull(&paths, &mut repo, false);
        edit_document(&paths, |document| {
            document.statements.push(Statement::new(Snak::value(
                depicts(),
                DataValue::String("a cat".to_string()),
            )));
        });

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert!(!report.success);
        assert_eq!(report.titles[0].action, "error");
        assert!(report.errors[0].contains("expects wikibase-entityid values"));
        assert!(repo.claim_calls.is_empty());
    }

    #[test]
    fn untracked_documents_are_not_pushed() {
        let temp = tempdir().expect("tempdir");
        let paths = workspace(temp.path());
        let mut repo = repo_with_cat();
        let path = document_path(&paths, "File:Cat.jpg");
        fs::create_dir_all(path.parent().expect("parent")).expect("dir");
        let document = StructuredDataDocument {
            file: "File:Cat.jpg".to_string(),
            entity_id: mid(12),
            captions: BTreeMap::from([("en".to_string(), "Cat".to_string())]),
            statements: Vec::new(),
        };
        write_document(&paths, &document).expect("write");

        let report = push_with_api(
            &paths,
            &MediaInfoConfig::default(),
            &push_options(false),
            &mut repo,
            Some(("bot", "secret")),
        )
        .expect("push");
        assert_eq!(report.titles[0].action, "untracked");
        assert!(!repo.logged_in);
    }

    #[test]
    fn show_renders_captions_and_formatted_statements() {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths::under(temp.path());
        let mut statement = item_statement(Some("M12$a"), "Q146");
        statement.qualifiers.push(Snak::no_value(
            PropertyId::parse("P462").expect("property"),
        ));
        let mut repo = MockRepo::default().with_entity(entity_with(
            mid(12),
            &[("fr", "Un chat"), ("de", "Eine Katze")],
            vec![statement],
            Some(40),
        ));
        repo.pages.insert("File:Cat.jpg".to_string(), 12);
        let mut cache = FormatValueCache::new();

        let report = show_with_api(
            &paths,
            &MediaInfoConfig::default(),
            "Cat.jpg",
            &mut repo,
            &mut cache,
        )
        .expect("show");
        assert_eq!(report.entity_id, "M12");
        let languages: Vec<(&str, bool)> = report
            .captions
            .iter()
            .map(|caption| (caption.language.as_str(), caption.shown))
            .collect();
        assert_eq!(languages, vec![("en", true), ("de", true), ("fr", false)]);
        assert_eq!(report.hidden_captions, 1);

        let property = &report.properties[0];
        assert_eq!(property.property, "P180");
        assert_eq!(property.label, "P180 [text/plain|en]");
        assert_eq!(property.statements[0].value, "Q146 [text/plain|en]");
        assert_eq!(
            property.statements[0].qualifiers,
            vec!["P462 [text/plain|en]: (novalue)".to_string()]
        );
        assert_eq!(repo.format_calls, 3);
    }
}
