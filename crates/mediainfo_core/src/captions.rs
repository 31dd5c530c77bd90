use std::collections::BTreeMap;

use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{EditOptions, RepoApiError, RepoReadApi, RepoWriteApi};
use crate::config::MediaInfoConfig;
use crate::entity::{Caption, MediaInfoEntity, MediaInfoId, TextDirection};
use crate::languages::{LanguageCatalog, normalize_code};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelMode {
    ReadOnly,
    Editing,
    Sending,
}

#[derive(Debug, Clone)]
pub struct CaptionsPanelConfig {
    pub interface_language: String,
    pub fallback_languages: Vec<String>,
    pub user_languages: Vec<String>,
    pub max_caption_length: usize,
    pub warn_within_max_caption_length: usize,
}

impl CaptionsPanelConfig {
    pub fn from_config(config: &MediaInfoConfig) -> Self {
        Self {
            interface_language: normalize_code(&config.interface_language()),
            fallback_languages: config
                .captions
                .fallback_languages
                .iter()
                .map(|code| normalize_code(code))
                .collect(),
            user_languages: config
                .captions
                .user_languages
                .iter()
                .map(|code| normalize_code(code))
                .collect(),
            max_caption_length: config.max_caption_length(),
            warn_within_max_caption_length: config.warn_within_max_caption_length(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadOnlyRow {
    pub index: usize,
    pub caption: Caption,
    /// Hidden rows sit behind the "more languages" toggle.
    pub shown: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableRow {
    pub language: Option<String>,
    pub text: String,
    pub direction: TextDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptionValidation {
    Ok,
    ApproachingLimit { remaining: usize },
    TooLong { over: usize },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("caption row {index} ({language}) was not saved: {message}")]
pub struct CaptionPublishError {
    pub index: usize,
    pub language: String,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublishOutcome {
    pub updated: Vec<String>,
    pub removed: Vec<String>,
    pub last_revision: Option<u64>,
}

/// Multilingual captions of one file with their read-only and editing states.
#[derive(Debug, Clone)]
pub struct CaptionsPanel {
    entity_id: MediaInfoId,
    catalog: LanguageCatalog,
    config: CaptionsPanelConfig,
    captions_data: BTreeMap<String, Caption>,
    language_order: Vec<String>,
    current_revision: Option<u64>,
    captions_exist: bool,
    mode: PanelMode,
    rows: Vec<EditableRow>,
    publish_enabled: bool,
}

impl CaptionsPanel {
    pub fn new(
        entity_id: MediaInfoId,
        catalog: LanguageCatalog,
        config: CaptionsPanelConfig,
    ) -> Self {
        Self {
            entity_id,
            catalog,
            config,
            captions_data: BTreeMap::new(),
            language_order: Vec::new(),
            current_revision: None,
            captions_exist: false,
            mode: PanelMode::ReadOnly,
            rows: Vec::new(),
            publish_enabled: false,
        }
    }

    /// Loads the entity's captions and lays out the display order.
    pub fn initialize(&mut self, entity: &MediaInfoEntity) {
        self.captions_data.clear();
        for (language, text) in &entity.labels {
            let language = normalize_code(language);
            if !self.catalog.is_known(&language) {
                continue;
            }
            let caption = self.caption(&language, text);
            self.captions_data.insert(language, caption);
        }
        self.current_revision = entity.last_revision;
        self.captions_exist = entity.exists();

        let interface = self.config.interface_language.clone();
        let mut order = vec![interface.clone()];
        if !self.has_text(&interface)
            && let Some(fallback) = self
                .config
                .fallback_languages
                .iter()
                .find(|code| **code != interface && self.has_text(code))
        {
            order.push(fallback.clone());
        }
        for code in &self.config.user_languages {
            if !order.contains(code) {
                order.push(code.clone());
            }
        }
        for (code, caption) in &self.captions_data {
            if !caption.is_blank() && !order.contains(code) {
                order.push(code.clone());
            }
        }
        order.retain(|code| self.catalog.is_known(code));

        for code in &order {
            if !self.captions_data.contains_key(code) {
                let caption = self.caption(code, "");
                self.captions_data.insert(code.clone(), caption);
            }
        }
        self.language_order = order;
        self.mode = PanelMode::ReadOnly;
        self.rows.clear();
        debug!(
            entity = %self.entity_id,
            languages = self.language_order.len(),
            "captions panel initialized"
        );
    }

    pub fn entity_id(&self) -> MediaInfoId {
        self.entity_id
    }

    pub fn mode(&self) -> PanelMode {
        self.mode
    }

    pub fn current_revision(&self) -> Option<u64> {
        self.current_revision
    }

    pub fn captions_exist(&self) -> bool {
        self.captions_exist
    }

    pub fn language_order(&self) -> &[String] {
        &self.language_order
    }

    pub fn captions_data(&self) -> &BTreeMap<String, Caption> {
        &self.captions_data
    }

    /// Non-blank captions keyed by language.
    pub fn labels(&self) -> BTreeMap<String, String> {
        self.captions_data
            .iter()
            .filter(|(_, caption)| !caption.is_blank())
            .map(|(code, caption)| (code.clone(), caption.text.clone()))
            .collect()
    }

    pub fn rows(&self) -> &[EditableRow] {
        &self.rows
    }

    pub fn is_publish_enabled(&self) -> bool {
        self.publish_enabled
    }

    pub fn show_flags(&self) -> Vec<bool> {
        let mut flags = Vec::with_capacity(self.language_order.len());
        let mut first_is_blank = false;
        for (index, code) in self.language_order.iter().enumerate() {
            let shown = if index == 0 {
                first_is_blank = !self.has_text(code);
                true
            } else if index == 1 && first_is_blank && self.has_text(code) {
                true
            } else {
                self.config.user_languages.contains(code)
            };
            flags.push(shown);
        }
        flags
    }

    pub fn read_only_rows(&self) -> Vec<ReadOnlyRow> {
        self.language_order
            .iter()
            .zip(self.show_flags())
            .enumerate()
            .map(|(index, (code, shown))| ReadOnlyRow {
                index,
                caption: self
                    .captions_data
                    .get(code)
                    .cloned()
                    .unwrap_or_else(|| self.caption(code, "")),
                shown,
            })
            .collect()
    }

    pub fn hidden_count(&self) -> usize {
        self.show_flags().iter().filter(|shown| !**shown).count()
    }

    /// Re-reads captions and revision from the API. Failures keep the data already held.
    pub fn refresh_from_api<A: RepoReadApi + ?Sized>(&mut self, api: &mut A) -> bool {
        let entity = match api.get_entity(self.entity_id) {
            Ok(entity) => entity,
            Err(error) => {
                warn!(
                    entity = %self.entity_id,
                    error = %format!("{error:#}"),
                    "caption refresh failed; using cached captions"
                );
                return false;
            }
        };
        self.current_revision = entity.last_revision;
        if entity.exists() {
            self.captions_exist = true;
        }
        // The API never returns blank labels; keep the placeholders we already show.
        let mut refreshed: BTreeMap<String, Caption> = self
            .captions_data
            .iter()
            .filter(|(_, caption)| caption.is_blank())
            .map(|(code, caption)| (code.clone(), caption.clone()))
            .collect();
        for (language, text) in &entity.labels {
            let language = normalize_code(language);
            if self.catalog.is_known(&language) {
                let caption = self.caption(&language, text);
                refreshed.insert(language, caption);
            }
        }
        self.captions_data = refreshed;
        true
    }

    pub fn make_editable<A: RepoReadApi + ?Sized>(&mut self, api: &mut A) {
        self.refresh_from_api(api);
        self.redraw();
        self.rows = self
            .read_only_rows()
            .into_iter()
            .map(|row| EditableRow {
                language: Some(row.caption.language),
                text: row.caption.text,
                direction: row.caption.direction,
            })
            .collect();
        self.mode = PanelMode::Editing;
        self.publish_enabled = false;
    }

    pub fn make_read_only(&mut self) {
        self.mode = PanelMode::ReadOnly;
        self.rows.clear();
        self.publish_enabled = false;
        self.redraw();
    }

    pub fn add_row(&mut self) -> Result<usize> {
        self.ensure_editing()?;
        self.rows.push(EditableRow {
            language: None,
            text: String::new(),
            direction: TextDirection::Ltr,
        });
        self.refresh_publish_state();
        Ok(self.rows.len() - 1)
    }

    pub fn delete_row(&mut self, index: usize) -> Result<()> {
        self.ensure_editing()?;
        if index >= self.rows.len() {
            bail!("caption row {index} does not exist");
        }
        self.rows.remove(index);
        self.refresh_publish_state();
        Ok(())
    }

    pub fn available_languages(&self, index: usize) -> Vec<String> {
        let own = self.rows.get(index).and_then(|row| row.language.clone());
        let selected: Vec<String> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(position, _)| *position != index)
            .filter_map(|(_, row)| row.language.clone())
            .collect();
        self.catalog.available(&selected, own.as_deref())
    }

    pub fn set_row_language(&mut self, index: usize, code: &str) -> Result<()> {
        self.ensure_editing()?;
        let code = normalize_code(code);
        if index >= self.rows.len() {
            bail!("caption row {index} does not exist");
        }
        if !self.available_languages(index).contains(&code) {
            bail!("language `{code}` is unknown or already used by another caption row");
        }
        let direction = self.catalog.direction(&code);
        let row = &mut self.rows[index];
        row.language = Some(code);
        row.direction = direction;
        self.refresh_publish_state();
        Ok(())
    }

    pub fn set_row_text(&mut self, index: usize, text: &str) -> Result<()> {
        self.ensure_editing()?;
        let Some(row) = self.rows.get_mut(index) else {
            bail!("caption row {index} does not exist");
        };
        row.text = text.to_string();
        self.refresh_publish_state();
        Ok(())
    }

    pub fn validate(&self) -> Vec<CaptionValidation> {
        let max = self.config.max_caption_length;
        let warn_within = self.config.warn_within_max_caption_length;
        self.rows
            .iter()
            .map(|row| {
                let length = row.text.chars().count();
                if length > max {
                    CaptionValidation::TooLong { over: length - max }
                } else if max - length < warn_within {
                    CaptionValidation::ApproachingLimit {
                        remaining: max - length,
                    }
                } else {
                    CaptionValidation::Ok
                }
            })
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        if self.rows.len() < self.captions_data.len() {
            return true;
        }
        self.rows.iter().any(|row| match &row.language {
            Some(code) => self.known_text(code) != row.text,
            None => false,
        })
    }

    pub fn can_publish(&self) -> bool {
        self.has_changes()
            && !self
                .validate()
                .iter()
                .any(|result| matches!(result, CaptionValidation::TooLong { .. }))
    }

    /// Known non-blank captions whose language no row selects any more.
    pub fn find_removed_languages(&self) -> Vec<String> {
        self.captions_data
            .values()
            .filter(|caption| !caption.is_blank())
            .filter(|caption| {
                !self
                    .rows
                    .iter()
                    .any(|row| row.language.as_deref() == Some(caption.language.as_str()))
            })
            .map(|caption| caption.language.clone())
            .collect()
    }

    /// Sends every changed caption, then blanks removed ones, one edit at a time.
    ///
    /// The chain stops at the first failure; the panel returns to editing and the
    /// error is a [`CaptionPublishError`] naming the row.
    pub fn publish<A: RepoWriteApi + ?Sized>(
        &mut self,
        api: &mut A,
        options: &EditOptions,
    ) -> Result<PublishOutcome> {
        self.ensure_editing()?;
        let removed = self.find_removed_languages();
        self.mode = PanelMode::Sending;
        self.rows.retain(|row| row.language.is_some());

        let mut outcome = PublishOutcome::default();
        let rows = self.rows.clone();
        for (index, row) in rows.iter().enumerate() {
            let Some(language) = row.language.as_deref() else {
                continue;
            };
            if self.known_text(language) == row.text {
                continue;
            }
            let base_revision = self.base_revision();
            match api.set_label(self.entity_id, language, &row.text, base_revision, options) {
                Ok(revision) => {
                    info!(entity = %self.entity_id, language, revision, "caption saved");
                    self.captions_exist = true;
                    self.current_revision = Some(revision);
                    let caption = self.caption(language, &row.text);
                    self.captions_data.insert(language.to_string(), caption);
                    if !self.language_order.iter().any(|code| code == language) {
                        self.language_order.push(language.to_string());
                    }
                    outcome.updated.push(language.to_string());
                }
                Err(error) => return Err(self.fail(index, language, &error)),
            }
        }

        for language in removed {
            let base_revision = self.base_revision();
            match api.set_label(self.entity_id, &language, "", base_revision, options) {
                Ok(revision) => {
                    info!(entity = %self.entity_id, language = %language, revision, "caption removed");
                    self.current_revision = Some(revision);
                    let keep_blank = self.language_order.first() == Some(&language)
                        || self.config.user_languages.contains(&language);
                    if keep_blank {
                        let caption = self.caption(&language, "");
                        self.captions_data.insert(language.clone(), caption);
                    } else {
                        self.captions_data.remove(&language);
                        self.language_order.retain(|code| *code != language);
                    }
                    outcome.removed.push(language);
                }
                Err(error) => {
                    let text = self.known_text(&language);
                    self.rows.push(EditableRow {
                        language: Some(language.clone()),
                        text,
                        direction: self.catalog.direction(&language),
                    });
                    let index = self.rows.len() - 1;
                    let failure = self.fail(index, &language, &error);
                    self.publish_enabled = false;
                    return Err(failure);
                }
            }
        }

        outcome.last_revision = self.current_revision;
        self.make_read_only();
        Ok(outcome)
    }

    fn fail(&mut self, index: usize, language: &str, error: &anyhow::Error) -> anyhow::Error {
        warn!(
            entity = %self.entity_id,
            language,
            index,
            error = %format!("{error:#}"),
            "caption publish stopped"
        );
        self.mode = PanelMode::Editing;
        self.refresh_publish_state();
        CaptionPublishError {
            index,
            language: language.to_string(),
            code: error
                .downcast_ref::<RepoApiError>()
                .map(|api_error| api_error.code.clone()),
            message: RepoApiError::describe(error),
        }
        .into()
    }

    /// Reconciles the display order with the current data: new known languages
    /// are appended; languages without data stay (blank) only when they are the
    /// interface language or a user language.
    fn redraw(&mut self) {
        let mut order = Vec::with_capacity(self.language_order.len());
        for code in &self.language_order {
            if !self.catalog.is_known(code) || order.contains(code) {
                continue;
            }
            if self.captions_data.contains_key(code) {
                order.push(code.clone());
            } else if *code == self.config.interface_language
                || self.config.user_languages.contains(code)
            {
                let caption = self.caption(code, "");
                self.captions_data.insert(code.clone(), caption);
                order.push(code.clone());
            }
        }
        for code in self.captions_data.keys() {
            if self.catalog.is_known(code) && !order.contains(code) {
                order.push(code.clone());
            }
        }
        self.language_order = order;
    }

    fn refresh_publish_state(&mut self) {
        self.publish_enabled = self.mode == PanelMode::Editing && self.can_publish();
    }

    fn ensure_editing(&self) -> Result<()> {
        if self.mode != PanelMode::Editing {
            bail!("captions of {} are not being edited", self.entity_id);
        }
        Ok(())
    }

    fn base_revision(&self) -> Option<u64> {
        if self.captions_exist {
            self.current_revision
        } else {
            None
        }
    }

    fn has_text(&self, code: &str) -> bool {
        self.captions_data
            .get(code)
            .is_some_and(|caption| !caption.is_blank())
    }

    fn known_text(&self, code: &str) -> String {
        self.captions_data
            .get(code)
            .map(|caption| caption.text.clone())
            .unwrap_or_default()
    }

    fn caption(&self, code: &str, text: &str) -> Caption {
        Caption::new(code, text, self.catalog.direction(code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockRepo, entity_with, mid};

    fn config(interface: &str, fallback: &[&str], user: &[&str]) -> CaptionsPanelConfig {
        CaptionsPanelConfig {
            interface_language: interface.to_string(),
            fallback_languages: fallback.iter().map(ToString::to_string).collect(),
            user_languages: user.iter().map(ToString::to_string).collect(),
            max_caption_length: 20,
            warn_within_max_caption_length: 5,
        }
    }

    fn panel(config: CaptionsPanelConfig) -> CaptionsPanel {
        CaptionsPanel::new(
            mid(7),
            LanguageCatalog::embedded().expect("catalog"),
            config,
        )
    }

    fn order(panel: &CaptionsPanel) -> Vec<&str> {
        panel.language_order().iter().map(String::as_str).collect()
    }

    #[test]
    fn order_puts_interface_then_fallback_then_user_then_rest() {
        let entity = entity_with(
            mid(7),
            &[("fr", "Un chat"), ("nl", "Een kat"), ("ar", "قطة")],
            Vec::new(),
            Some(10),
        );
        let mut panel = panel(config("en", &["de", "fr"], &["es"]));
        panel.initialize(&entity);

        assert_eq!(order(&panel), vec!["en", "fr", "es", "ar", "nl"]);
        assert_eq!(panel.show_flags(), vec![true, true, true, false, false]);
        assert_eq!(panel.hidden_count(), 2);

        let rows = panel.read_only_rows();
        assert!(rows[0].caption.is_blank());
        assert_eq!(rows[3].caption.direction, TextDirection::Rtl);
        assert_eq!(rows[4].index, 4);
    }

    #[test]
    fn second_row_hidden_when_interface_language_has_caption() {
        let entity = entity_with(mid(7), &[("en", "A cat"), ("fr", "Un chat")], Vec::new(), Some(3));
        let mut panel = panel(config("en", &["fr"], &[]));
        panel.initialize(&entity);
        assert_eq!(order(&panel), vec!["en", "fr"]);
        assert_eq!(panel.show_flags(), vec![true, false]);
    }

    #[test]
    fn unknown_languages_are_not_displayed() {
        let entity = entity_with(mid(7), &[("qqx-nope", "x")], Vec::new(), Some(3));
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        assert_eq!(order(&panel), vec!["en"]);
    }

    #[test]
    fn refresh_failure_keeps_existing_data() {
        let entity = entity_with(mid(7), &[("en", "A cat")], Vec::new(), Some(3));
        let mut api = MockRepo {
            fail_get_entities: true,
            ..MockRepo::default()
        };
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        assert!(!panel.refresh_from_api(&mut api));
        assert_eq!(panel.labels().get("en").map(String::as_str), Some("A cat"));

        panel.make_editable(&mut api);
        assert_eq!(panel.mode(), PanelMode::Editing);
        assert_eq!(panel.rows().len(), 1);
        assert!(!panel.is_publish_enabled());
    }

    #[test]
    fn refresh_keeps_blank_rows_and_appends_new_languages() {
        let entity = entity_with(mid(7), &[("en", "A cat")], Vec::new(), Some(3));
        let mut panel = panel(config("en", &[], &["de"]));
        panel.initialize(&entity);

        let mut api = MockRepo::default().with_entity(entity_with(
            mid(7),
            &[("en", "A grey cat"), ("it", "Un gatto")],
            Vec::new(),
            Some(9),
        ));
        panel.make_editable(&mut api);
        assert_eq!(panel.current_revision(), Some(9));
        assert_eq!(order(&panel), vec!["en", "de", "it"]);
        assert_eq!(panel.rows()[0].text, "A grey cat");
        assert_eq!(panel.rows()[1].text, "");
    }

    #[test]
    fn validation_reports_limits_in_characters() {
        let entity = entity_with(mid(7), &[], Vec::new(), None);
        let mut api = MockRepo::default();
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);

        panel.set_row_text(0, "ééééééééééééééééé").expect("text");
        assert_eq!(
            panel.validate(),
            vec![CaptionValidation::ApproachingLimit { remaining: 3 }]
        );
        panel.set_row_text(0, "ééééééééééééééééééééééé").expect("text");
        assert_eq!(panel.validate(), vec![CaptionValidation::TooLong { over: 3 }]);
        assert!(panel.has_changes());
        assert!(!panel.can_publish());
        assert!(!panel.is_publish_enabled());

        panel.set_row_text(0, "short").expect("text");
        assert_eq!(panel.validate(), vec![CaptionValidation::Ok]);
        assert!(panel.is_publish_enabled());
    }

    #[test]
    fn language_selection_excludes_languages_used_elsewhere() {
        let entity = entity_with(mid(7), &[("en", "A cat")], Vec::new(), Some(2));
        let mut api = MockRepo::default().with_entity(entity.clone());
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);

        let index = panel.add_row().expect("row");
        assert!(!panel.available_languages(index).contains(&"en".to_string()));
        assert!(panel.available_languages(0).contains(&"en".to_string()));
        assert!(panel.set_row_language(index, "en").is_err());
        assert!(panel.set_row_language(index, "zz-unknown").is_err());
        panel.set_row_language(index, "HE").expect("language");
        assert_eq!(panel.rows()[index].direction, TextDirection::Rtl);
        assert!(!panel.has_changes());
    }

    #[test]
    fn publish_sends_changes_then_removals_with_threaded_revision() {
        let entity = entity_with(
            mid(7),
            &[("en", "A cat"), ("fr", "Un chat"), ("nl", "Een kat")],
            Vec::new(),
            Some(10),
        );
        let mut api = MockRepo::default().with_entity(entity.clone());
        let mut panel = panel(config("en", &[], &["fr"]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);
        assert_eq!(order(&panel), vec!["en", "fr", "nl"]);

        panel.set_row_text(0, "A black cat").expect("text");
        let index = panel.add_row().expect("row");
        panel.set_row_language(index, "de").expect("language");
        panel.set_row_text(index, "Eine Katze").expect("text");
        panel.delete_row(2).expect("delete nl");
        panel.delete_row(1).expect("delete fr");
        assert_eq!(panel.find_removed_languages(), vec!["fr", "nl"]);
        assert!(panel.can_publish());

        let outcome = panel
            .publish(&mut api, &EditOptions::default())
            .expect("publish");
        assert_eq!(outcome.updated, vec!["en", "de"]);
        assert_eq!(outcome.removed, vec!["fr", "nl"]);
        assert_eq!(outcome.last_revision, Some(14));

        let bases: Vec<Option<u64>> = api.label_calls.iter().map(|call| call.base_revision).collect();
        assert_eq!(bases, vec![Some(10), Some(11), Some(12), Some(13)]);
        assert_eq!(api.label_calls[2].value, "");

        assert_eq!(panel.mode(), PanelMode::ReadOnly);
        // fr is a user language and stays as a blank row; nl is gone.
        assert_eq!(order(&panel), vec!["en", "fr", "de"]);
        assert!(panel.captions_data()["fr"].is_blank());
        assert!(!panel.captions_data().contains_key("nl"));
        assert_eq!(api.entity(mid(7)).labels.len(), 2);
    }

    #[test]
    fn first_caption_of_new_entity_is_sent_without_base_revision() {
        let entity = entity_with(mid(7), &[], Vec::new(), None);
        let mut api = MockRepo::default();
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);
        panel.set_row_text(0, "A cat").expect("text");
        let index = panel.add_row().expect("row");
        panel.set_row_language(index, "fr").expect("language");
        panel.set_row_text(index, "Un chat").expect("text");

        panel
            .publish(&mut api, &EditOptions::default())
            .expect("publish");
        assert_eq!(api.label_calls[0].base_revision, None);
        assert_eq!(api.label_calls[1].base_revision, Some(101));
        assert!(panel.captions_exist());
    }

    #[test]
    fn publish_stops_at_first_failure_with_row_index() {
        let entity = entity_with(mid(7), &[("en", "A cat")], Vec::new(), Some(10));
        let mut api = MockRepo::default().with_entity(entity.clone());
        api.failing_labels.insert("de".to_string());
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);

        let de = panel.add_row().expect("row");
        panel.set_row_language(de, "de").expect("language");
        panel.set_row_text(de, "Katze").expect("text");
        let unset = panel.add_row().expect("row without language");
        panel.set_row_text(unset, "ignored").expect("text");
        let fr = panel.add_row().expect("row");
        panel.set_row_language(fr, "fr").expect("language");
        panel.set_row_text(fr, "Chat").expect("text");

        let error = panel
            .publish(&mut api, &EditOptions::default())
            .expect_err("must fail");
        let failure = error
            .downcast_ref::<CaptionPublishError>()
            .expect("typed failure");
        assert_eq!(failure.index, 1);
        assert_eq!(failure.language, "de");
        assert_eq!(failure.message, "Could not save de");
        assert_eq!(failure.code.as_deref(), Some("failed-save"));

        assert_eq!(api.label_calls.len(), 1);
        assert_eq!(panel.mode(), PanelMode::Editing);
        assert_eq!(panel.rows().len(), 3);
        assert!(panel.has_changes());
    }

    #[test]
    fn failed_removal_restores_row_and_disables_publish() {
        let entity = entity_with(mid(7), &[("en", "A cat"), ("fr", "Un chat")], Vec::new(), Some(10));
        let mut api = MockRepo::default().with_entity(entity.clone());
        api.failing_labels.insert("fr".to_string());
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        panel.make_editable(&mut api);
        panel.delete_row(1).expect("delete fr");

        let error = panel
            .publish(&mut api, &EditOptions::default())
            .expect_err("must fail");
        let failure = error
            .downcast_ref::<CaptionPublishError>()
            .expect("typed failure");
        assert_eq!(failure.index, 1);
        assert_eq!(
            panel.rows()[1],
            EditableRow {
                language: Some("fr".to_string()),
                text: "Un chat".to_string(),
                direction: TextDirection::Ltr,
            }
        );
        assert!(!panel.is_publish_enabled());
        assert_eq!(panel.mode(), PanelMode::Editing);
    }

    #[test]
    fn edits_require_editing_mode() {
        let entity = entity_with(mid(7), &[], Vec::new(), None);
        let mut panel = panel(config("en", &[], &[]));
        panel.initialize(&entity);
        assert!(panel.add_row().is_err());
        assert!(panel.publish(&mut MockRepo::default(), &EditOptions::default()).is_err());
    }
}
