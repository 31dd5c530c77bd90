use anyhow::{Result, bail};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::api::{EditOptions, RepoApiError, RepoWriteApi};
use crate::entity::{
    DataValue, MediaInfoId, PropertyId, Rank, Snak, SnakType, Statement, value_type_for_datatype,
};

/// An editable qualifier. Rows missing a property or value are left out of the statement.
#[derive(Debug, Clone, PartialEq)]
pub struct QualifierRow {
    pub property: Option<PropertyId>,
    pub snaktype: SnakType,
    pub value: Option<DataValue>,
}

impl QualifierRow {
    pub fn empty() -> Self {
        Self {
            property: None,
            snaktype: SnakType::Value,
            value: None,
        }
    }

    fn from_snak(snak: &Snak) -> Self {
        Self {
            property: Some(snak.property),
            snaktype: snak.snaktype,
            value: snak.datavalue.clone(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.property.is_some() && (self.snaktype != SnakType::Value || self.value.is_some())
    }

    fn to_snak(&self) -> Option<Snak> {
        let property = self.property?;
        if !self.is_complete() {
            return None;
        }
        Some(Snak {
            snaktype: self.snaktype,
            property,
            hash: None,
            datavalue: self.value.clone(),
            datatype: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatementItem {
    statement: Statement,
    pub qualifiers: Vec<QualifierRow>,
}

impl StatementItem {
    fn new(statement: Statement) -> Self {
        let qualifiers = statement.qualifiers.iter().map(QualifierRow::from_snak).collect();
        Self {
            statement,
            qualifiers,
        }
    }

    pub fn guid(&self) -> Option<&str> {
        self.statement.guid.as_deref()
    }

    pub fn rank(&self) -> Rank {
        self.statement.rank
    }

    pub fn value(&self) -> Option<&DataValue> {
        self.statement.mainsnak.datavalue.as_ref()
    }

    pub fn data(&self) -> Statement {
        let mut statement = self.statement.clone();
        statement.qualifiers = self
            .qualifiers
            .iter()
            .filter_map(QualifierRow::to_snak)
            .collect();
        statement.group_qualifiers();
        statement
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementFailure {
    /// `None` for a statement that was never saved.
    pub guid: Option<String>,
    pub code: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("statement edits for {property} failed: {}", describe_failures(.failures))]
pub struct StatementSubmitError {
    pub property: PropertyId,
    pub failures: Vec<StatementFailure>,
    /// Revision after the last edit that went through.
    pub last_revision: Option<u64>,
}

fn describe_failures(failures: &[StatementFailure]) -> String {
    failures
        .iter()
        .map(|failure| {
            format!(
                "{}: {}",
                failure.guid.as_deref().unwrap_or("<new statement>"),
                failure.message
            )
        })
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    pub saved: usize,
    pub removed: usize,
    pub last_revision: Option<u64>,
}

/// Statements of one property on one entity, with the last-known-good snapshot
/// used to work out what to send.
#[derive(Debug, Clone)]
pub struct StatementPanel {
    entity_id: MediaInfoId,
    property: PropertyId,
    value_type: Option<&'static str>,
    initial_data: Vec<Statement>,
    items: Vec<StatementItem>,
    hidden: Vec<Statement>,
    editing: bool,
    disabled: bool,
}

impl StatementPanel {
    pub fn new(entity_id: MediaInfoId, property: PropertyId, datatype: Option<&str>) -> Self {
        Self {
            entity_id,
            property,
            value_type: datatype.and_then(value_type_for_datatype),
            initial_data: Vec::new(),
            items: Vec::new(),
            hidden: Vec::new(),
            editing: false,
            disabled: false,
        }
    }

    pub fn property(&self) -> PropertyId {
        self.property
    }

    pub fn items(&self) -> &[StatementItem] {
        &self.items
    }

    pub fn initial_data(&self) -> &[Statement] {
        &self.initial_data
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn set_disabled(&mut self, disabled: bool) {
        self.disabled = disabled;
    }

    /// Replaces the known state (and the working state) with `data`, or reverts
    /// the working state to the known state when `data` is `None`.
    pub fn reset_data(&mut self, data: Option<Vec<Statement>>) -> Result<()> {
        let data = data.unwrap_or_else(|| self.initial_data.clone());
        let previous = std::mem::replace(&mut self.initial_data, data.clone());
        if let Err(error) = self.set_data(data) {
            self.initial_data = previous;
            return Err(error);
        }
        self.set_editing(false);
        Ok(())
    }

    /// Statements that differ from the known state must carry values of the
    /// property's type. Known statements pass as they are.
    fn check_value_types(&self, data: &[Statement]) -> Result<()> {
        let Some(expected) = self.value_type else {
            return Ok(());
        };
        let edited = data
            .iter()
            .filter(|statement| !self.initial_data.contains(statement));
        for statement in edited {
            if let Some(value) = &statement.mainsnak.datavalue
                && value.value_type() != expected
            {
                bail!(
                    "{} expects {expected} values, got {} in statement {}",
                    self.property,
                    value.value_type(),
                    statement.guid.as_deref().unwrap_or("<new>")
                );
            }
        }
        Ok(())
    }

    pub fn set_data(&mut self, data: Vec<Statement>) -> Result<()> {
        if let Some(stray) = data.iter().find(|item| item.property() != self.property) {
            bail!(
                "statement {} uses {} but this panel edits {}",
                stray.guid.as_deref().unwrap_or("<new>"),
                stray.property(),
                self.property
            );
        }
        self.check_value_types(&data)?;
        let (mut shown, hidden): (Vec<Statement>, Vec<Statement>) =
            data.into_iter().partition(|item| item.mainsnak.has_value());
        // Stable, so equally ranked statements keep their order.
        shown.sort_by(|left, right| right.rank.cmp(&left.rank));
        self.items = shown.into_iter().map(StatementItem::new).collect();
        self.hidden = hidden;
        Ok(())
    }

    pub fn get_data(&self) -> Vec<Statement> {
        self.items
            .iter()
            .map(StatementItem::data)
            .chain(self.hidden.iter().cloned())
            .collect()
    }

    pub fn add_item_from_value(&mut self, value: DataValue) -> Result<usize> {
        if let Some(expected) = self.value_type
            && value.value_type() != expected
        {
            bail!(
                "{} expects {expected} values, got {}",
                self.property,
                value.value_type()
            );
        }
        self.items
            .push(StatementItem::new(Statement::new(Snak::value(self.property, value))));
        self.set_editing(true);
        Ok(self.items.len() - 1)
    }

    pub fn remove_item(&mut self, index: usize) -> Result<Statement> {
        if index >= self.items.len() {
            bail!("{} has no statement at index {index}", self.property);
        }
        Ok(self.items.remove(index).data())
    }

    pub fn set_rank(&mut self, index: usize, rank: Rank) -> Result<()> {
        self.item_mut(index)?.statement.rank = rank;
        self.set_editing(true);
        Ok(())
    }

    pub fn add_qualifier(&mut self, index: usize) -> Result<usize> {
        let item = self.item_mut(index)?;
        item.qualifiers.push(QualifierRow::empty());
        let position = item.qualifiers.len() - 1;
        self.set_editing(true);
        Ok(position)
    }

    pub fn set_qualifier_property(
        &mut self,
        index: usize,
        qualifier: usize,
        property: PropertyId,
    ) -> Result<()> {
        let row = self.qualifier_mut(index, qualifier)?;
        if row.property != Some(property) {
            row.property = Some(property);
            row.snaktype = SnakType::Value;
            row.value = None;
        }
        self.set_editing(true);
        Ok(())
    }

    pub fn set_qualifier_value(
        &mut self,
        index: usize,
        qualifier: usize,
        value: DataValue,
    ) -> Result<()> {
        let row = self.qualifier_mut(index, qualifier)?;
        row.snaktype = SnakType::Value;
        row.value = Some(value);
        self.set_editing(true);
        Ok(())
    }

    pub fn remove_qualifier(&mut self, index: usize, qualifier: usize) -> Result<()> {
        let item = self.item_mut(index)?;
        if qualifier >= item.qualifiers.len() {
            bail!("statement {index} has no qualifier at index {qualifier}");
        }
        item.qualifiers.remove(qualifier);
        self.set_editing(true);
        Ok(())
    }

    pub fn set_editing(&mut self, editing: bool) {
        if !editing {
            for item in &mut self.items {
                item.qualifiers.retain(QualifierRow::is_complete);
            }
        }
        self.editing = editing;
    }

    /// Working statements that are new or differ from their known version.
    pub fn get_changes(&self) -> Vec<Statement> {
        self.get_data()
            .into_iter()
            .filter(|statement| match statement.guid.as_deref() {
                None => true,
                Some(guid) => self.known(guid) != Some(statement),
            })
            .collect()
    }

    /// Known statements that are no longer in the working state.
    pub fn get_removals(&self) -> Vec<Statement> {
        let current = self.get_data();
        self.initial_data
            .iter()
            .filter(|statement| {
                statement.guid.is_some()
                    && !current.iter().any(|item| item.guid == statement.guid)
            })
            .cloned()
            .collect()
    }

    pub fn has_changes(&self) -> bool {
        !self.get_changes().is_empty() || !self.get_removals().is_empty()
    }

    pub fn can_publish(&self) -> bool {
        !self.disabled && self.has_changes()
    }

    /// Sends every change with `wbsetclaim`, then all removals in one
    /// `wbremoveclaims`, threading the revision from each response into the next
    /// call. Failed edits are rolled back and the chain moves on; the error
    /// returned afterwards is a [`StatementSubmitError`].
    pub fn submit<A: RepoWriteApi + ?Sized>(
        &mut self,
        api: &mut A,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<SubmitOutcome> {
        let was_disabled = self.disabled;
        self.set_editing(false);
        self.disabled = true;

        let changes = self.get_changes();
        let removals = self.get_removals();
        let mut data = self.get_data();
        let mut revision = base_revision;
        let mut failures = Vec::new();
        let mut outcome = SubmitOutcome::default();

        for statement in changes {
            let Some(position) = data.iter().position(|item| *item == statement) else {
                continue;
            };
            match api.set_claim(self.entity_id, &statement, revision, options) {
                Ok(edit) => {
                    info!(
                        entity = %self.entity_id,
                        property = %self.property,
                        guid = edit.statement.guid.as_deref().unwrap_or_default(),
                        revision = edit.last_revision,
                        "statement saved"
                    );
                    revision = Some(edit.last_revision);
                    data[position] = edit.statement;
                    outcome.saved += 1;
                }
                Err(error) => {
                    warn!(
                        entity = %self.entity_id,
                        property = %self.property,
                        error = %format!("{error:#}"),
                        "statement edit failed; rolling back"
                    );
                    failures.push(failure_for(statement.guid.clone(), &error));
                    let known = statement
                        .guid
                        .as_deref()
                        .and_then(|guid| self.known(guid))
                        .cloned();
                    match known {
                        Some(previous) => data[position] = previous,
                        None => {
                            data.remove(position);
                        }
                    }
                }
            }
        }

        if !removals.is_empty() {
            let guids: Vec<String> = removals
                .iter()
                .filter_map(|statement| statement.guid.clone())
                .collect();
            match api.remove_claims(&guids, revision, options) {
                Ok(last_revision) => {
                    info!(
                        entity = %self.entity_id,
                        property = %self.property,
                        count = guids.len(),
                        revision = last_revision,
                        "statements removed"
                    );
                    revision = Some(last_revision);
                    outcome.removed = guids.len();
                }
                Err(error) => {
                    warn!(
                        entity = %self.entity_id,
                        property = %self.property,
                        error = %format!("{error:#}"),
                        "statement removal failed; restoring"
                    );
                    for guid in guids {
                        failures.push(failure_for(Some(guid), &error));
                    }
                    data.extend(removals);
                }
            }
        }

        self.disabled = was_disabled;
        self.reset_data(Some(data))?;
        outcome.last_revision = revision;

        if failures.is_empty() {
            debug!(property = %self.property, ?outcome, "statements submitted");
            return Ok(outcome);
        }
        self.set_editing(true);
        Err(StatementSubmitError {
            property: self.property,
            failures,
            last_revision: revision,
        }
        .into())
    }

    /// Drops every shown statement and submits the removal.
    pub fn remove_all<A: RepoWriteApi + ?Sized>(
        &mut self,
        api: &mut A,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<SubmitOutcome> {
        self.items.clear();
        self.submit(api, base_revision, options)
    }

    fn known(&self, guid: &str) -> Option<&Statement> {
        self.initial_data
            .iter()
            .find(|statement| statement.guid.as_deref() == Some(guid))
    }

    fn item_mut(&mut self, index: usize) -> Result<&mut StatementItem> {
        let property = self.property;
        self.items
            .get_mut(index)
            .ok_or_else(|| anyhow::anyhow!("{property} has no statement at index {index}"))
    }

    fn qualifier_mut(&mut self, index: usize, qualifier: usize) -> Result<&mut QualifierRow> {
        self.item_mut(index)?
            .qualifiers
            .get_mut(qualifier)
            .ok_or_else(|| anyhow::anyhow!("statement {index} has no qualifier at index {qualifier}"))
    }
}

fn failure_for(guid: Option<String>, error: &anyhow::Error) -> StatementFailure {
    StatementFailure {
        guid,
        code: error
            .downcast_ref::<RepoApiError>()
            .map(|api_error| api_error.code.clone()),
        message: RepoApiError::describe(error),
    }
}
