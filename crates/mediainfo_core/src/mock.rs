//! In-memory repo API used by unit tests.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;

use crate::api::{
    ClaimEdit, EditOptions, FilePage, MediaType, RepoApiError, RepoReadApi, RepoWriteApi,
    SearchHit, SearchPage, ValueFormat,
};
use crate::entity::{
    DataValue, MediaInfoEntity, MediaInfoId, PropertyId, Rank, Snak, Statement,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LabelCall {
    pub language: String,
    pub value: String,
    pub base_revision: Option<u64>,
}

#[derive(Default)]
pub(crate) struct MockRepo {
    pub pages: BTreeMap<String, u64>,
    pub entities: BTreeMap<MediaInfoId, MediaInfoEntity>,
    pub datatypes: BTreeMap<PropertyId, String>,
    pub search_titles: BTreeMap<MediaType, Vec<String>>,
    /// Languages whose `wbsetlabel` calls fail.
    pub failing_labels: BTreeSet<String>,
    /// Plain renderings of main-snak values whose `wbsetclaim` calls fail.
    pub failing_claim_values: BTreeSet<String>,
    pub fail_remove_claims: bool,
    pub fail_get_entities: bool,
    pub fail_format: bool,
    pub label_calls: Vec<LabelCall>,
    pub claim_calls: Vec<(Option<String>, Option<u64>)>,
    pub remove_calls: Vec<(Vec<String>, Option<u64>)>,
    pub format_calls: usize,
    pub logged_in: bool,
    pub request_count: usize,
    pub next_guid: usize,
}

impl MockRepo {
    pub fn with_entity(mut self, entity: MediaInfoEntity) -> Self {
        self.entities.insert(entity.id, entity);
        self
    }

    pub fn entity(&self, id: MediaInfoId) -> MediaInfoEntity {
        self.entities
            .get(&id)
            .cloned()
            .unwrap_or_else(|| MediaInfoEntity::empty(id))
    }

    fn bump_revision(&mut self, id: MediaInfoId) -> u64 {
        let entity = self
            .entities
            .entry(id)
            .or_insert_with(|| MediaInfoEntity::empty(id));
        let next = entity.last_revision.unwrap_or(100) + 1;
        entity.last_revision = Some(next);
        next
    }

    fn save_failure(what: &str) -> anyhow::Error {
        RepoApiError {
            code: "failed-save".to_string(),
            info: format!("The save has failed for {what}."),
            messages: vec![format!("Could not save {what}")],
        }
        .into()
    }
}

impl RepoReadApi for MockRepo {
    fn resolve_file_pages(&mut self, titles: &[String]) -> Result<Vec<FilePage>> {
        self.request_count += 1;
        Ok(titles
            .iter()
            .map(|title| FilePage {
                title: title.clone(),
                page_id: self.pages.get(title).copied(),
            })
            .collect())
    }

    fn get_entities(&mut self, ids: &[MediaInfoId]) -> Result<Vec<MediaInfoEntity>> {
        self.request_count += 1;
        if self.fail_get_entities {
            return Err(RepoApiError::new("internal_api_error", "backend unavailable").into());
        }
        Ok(ids.iter().map(|id| self.entity(*id)).collect())
    }

    fn get_property_datatypes(
        &mut self,
        properties: &[PropertyId],
    ) -> Result<BTreeMap<PropertyId, String>> {
        self.request_count += 1;
        Ok(properties
            .iter()
            .filter_map(|property| {
                self.datatypes
                    .get(property)
                    .map(|datatype| (*property, datatype.clone()))
            })
            .collect())
    }

    fn format_value(
        &mut self,
        value: &DataValue,
        format: ValueFormat,
        language: &str,
    ) -> Result<String> {
        self.request_count += 1;
        self.format_calls += 1;
        if self.fail_format {
            anyhow::bail!("formatter unavailable");
        }
        Ok(format!(
            "{} [{}|{language}]",
            value.plain_text(),
            format.as_str()
        ))
    }

    fn search_media(
        &mut self,
        term: &str,
        media_type: MediaType,
        offset: Option<u64>,
        limit: usize,
    ) -> Result<SearchPage> {
        self.request_count += 1;
        let start = offset.unwrap_or(0) as usize;
        let matching: Vec<&String> = self
            .search_titles
            .get(&media_type)
            .map(|titles| {
                titles
                    .iter()
                    .filter(|title| title.to_lowercase().contains(&term.to_lowercase()))
                    .collect()
            })
            .unwrap_or_default();
        let hits: Vec<SearchHit> = matching
            .iter()
            .enumerate()
            .skip(start)
            .take(limit)
            .map(|(index, title)| SearchHit {
                title: (*title).clone(),
                page_id: index as u64 + 1,
                index: index as u64,
                snippet: None,
            })
            .collect();
        let end = start + hits.len();
        Ok(SearchPage {
            continue_offset: (end < matching.len()).then_some(end as u64),
            hits,
        })
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl RepoWriteApi for MockRepo {
    fn login(&mut self, _username: &str, _password: &str) -> Result<()> {
        self.request_count += 1;
        self.logged_in = true;
        Ok(())
    }

    fn set_label(
        &mut self,
        id: MediaInfoId,
        language: &str,
        value: &str,
        base_revision: Option<u64>,
        _options: &EditOptions,
    ) -> Result<u64> {
        self.request_count += 1;
        self.label_calls.push(LabelCall {
            language: language.to_string(),
            value: value.to_string(),
            base_revision,
        });
        if self.failing_labels.contains(language) {
            return Err(Self::save_failure(language));
        }
        let revision = self.bump_revision(id);
        let entity = self
            .entities
            .get_mut(&id)
            .ok_or_else(|| anyhow::anyhow!("entity vanished"))?;
        if value.is_empty() {
            entity.labels.remove(language);
        } else {
            entity.labels.insert(language.to_string(), value.to_string());
        }
        Ok(revision)
    }

    fn set_claim(
        &mut self,
        entity_id: MediaInfoId,
        statement: &Statement,
        base_revision: Option<u64>,
        _options: &EditOptions,
    ) -> Result<ClaimEdit> {
        self.request_count += 1;
        self.claim_calls
            .push((statement.guid.clone(), base_revision));
        let rendered = statement
            .mainsnak
            .datavalue
            .as_ref()
            .map(DataValue::plain_text)
            .unwrap_or_default();
        if self.failing_claim_values.contains(&rendered) {
            return Err(Self::save_failure(&rendered));
        }

        let mut saved = statement.clone();
        if saved.guid.is_none() {
            self.next_guid += 1;
            saved.guid = Some(format!("{entity_id}$mock-{}", self.next_guid));
        }
        saved.mainsnak.hash = Some(format!("hash-{rendered}"));
        let revision = self.bump_revision(entity_id);
        let entity = self
            .entities
            .get_mut(&entity_id)
            .ok_or_else(|| anyhow::anyhow!("entity vanished"))?;
        let group = entity.statements.entry(saved.property()).or_default();
        match group.iter_mut().find(|item| item.guid == saved.guid) {
            Some(existing) => *existing = saved.clone(),
            None => group.push(saved.clone()),
        }
        Ok(ClaimEdit {
            statement: saved,
            last_revision: revision,
        })
    }

    fn remove_claims(
        &mut self,
        guids: &[String],
        base_revision: Option<u64>,
        _options: &EditOptions,
    ) -> Result<u64> {
        self.request_count += 1;
        self.remove_calls.push((guids.to_vec(), base_revision));
        if self.fail_remove_claims {
            return Err(Self::save_failure("claim removal"));
        }
        let entity_id = guids
            .first()
            .and_then(|guid| guid.split('$').next())
            .and_then(|id| MediaInfoId::parse(id).ok())
            .ok_or_else(|| anyhow::anyhow!("claim guid without entity"))?;
        let revision = self.bump_revision(entity_id);
        if let Some(entity) = self.entities.get_mut(&entity_id) {
            for group in entity.statements.values_mut() {
                group.retain(|item| {
                    item.guid
                        .as_ref()
                        .is_none_or(|guid| !guids.contains(guid))
                });
            }
            entity.statements.retain(|_, group| !group.is_empty());
        }
        Ok(revision)
    }
}

pub(crate) fn mid(value: u64) -> MediaInfoId {
    MediaInfoId::from_page_id(value).expect("non-zero page id")
}

pub(crate) fn depicts() -> PropertyId {
    PropertyId::parse("P180").expect("property id")
}

pub(crate) fn item_statement(guid: Option<&str>, item: &str) -> Statement {
    let mut statement = Statement::new(Snak::value(
        depicts(),
        DataValue::item(item).expect("item id"),
    ));
    statement.guid = guid.map(ToString::to_string);
    statement
}

pub(crate) fn ranked(mut statement: Statement, rank: Rank) -> Statement {
    statement.rank = rank;
    statement
}

pub(crate) fn entity_with(
    id: MediaInfoId,
    labels: &[(&str, &str)],
    statements: Vec<Statement>,
    revision: Option<u64>,
) -> MediaInfoEntity {
    let mut entity = MediaInfoEntity::empty(id);
    for (language, text) in labels {
        entity
            .labels
            .insert((*language).to_string(), (*text).to_string());
    }
    for statement in statements {
        entity
            .statements
            .entry(statement.property())
            .or_default()
            .push(statement);
    }
    entity.last_revision = revision;
    entity
}
