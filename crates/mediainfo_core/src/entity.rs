use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const ENTITY_TYPE: &str = "mediainfo";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IdError {
    #[error("invalid mediainfo id `{0}` (expected M followed by a positive number)")]
    MediaInfo(String),
    #[error("invalid property id `{0}` (expected P followed by a positive number)")]
    Property(String),
    #[error("page id 0 has no mediainfo entity")]
    ZeroPageId,
}

fn parse_prefixed_number(value: &str, prefix: char) -> Option<u64> {
    let trimmed = value.trim();
    let mut chars = trimmed.chars();
    let first = chars.next()?;
    if !first.eq_ignore_ascii_case(&prefix) {
        return None;
    }
    let digits = chars.as_str();
    if digits.is_empty() || digits.starts_with('0') || !digits.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    digits.parse::<u64>().ok()
}

/// Identifier of a mediainfo entity: `M` followed by the file page id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MediaInfoId(u64);

impl MediaInfoId {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        parse_prefixed_number(value, 'M')
            .map(Self)
            .ok_or_else(|| IdError::MediaInfo(value.to_string()))
    }

    pub fn from_page_id(page_id: u64) -> Result<Self, IdError> {
        if page_id == 0 {
            return Err(IdError::ZeroPageId);
        }
        Ok(Self(page_id))
    }

    pub fn numeric_id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MediaInfoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

impl FromStr for MediaInfoId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for MediaInfoId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<MediaInfoId> for String {
    fn from(value: MediaInfoId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PropertyId(u64);

impl PropertyId {
    pub fn parse(value: &str) -> Result<Self, IdError> {
        parse_prefixed_number(value, 'P')
            .map(Self)
            .ok_or_else(|| IdError::Property(value.to_string()))
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

impl FromStr for PropertyId {
    type Err = IdError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for PropertyId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PropertyId> for String {
    fn from(value: PropertyId) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TextDirection {
    #[default]
    Ltr,
    Rtl,
}

impl TextDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ltr => "ltr",
            Self::Rtl => "rtl",
        }
    }
}

/// A single-language caption. Blank text means the language has no caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caption {
    pub language: String,
    pub text: String,
    #[serde(default)]
    pub direction: TextDirection,
}

impl Caption {
    pub fn new(language: &str, text: &str, direction: TextDirection) -> Self {
        Self {
            language: language.to_string(),
            text: text.to_string(),
            direction,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.text.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityIdValue {
    #[serde(rename = "entity-type")]
    pub entity_type: String,
    #[serde(
        rename = "numeric-id",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub numeric_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EntityIdValue {
    /// Build from a serialized id such as `Q42` or `P180`.
    pub fn from_id(id: &str) -> Option<Self> {
        let trimmed = id.trim();
        let prefix = trimmed.chars().next()?.to_ascii_uppercase();
        let entity_type = match prefix {
            'Q' => "item",
            'P' => "property",
            'M' => ENTITY_TYPE,
            'L' => "lexeme",
            _ => return None,
        };
        let numeric_id = parse_prefixed_number(trimmed, prefix)?;
        Some(Self {
            entity_type: entity_type.to_string(),
            numeric_id: Some(numeric_id),
            id: Some(format!("{prefix}{numeric_id}")),
        })
    }

    pub fn serialized_id(&self) -> String {
        if let Some(id) = &self.id {
            return id.clone();
        }
        let prefix = match self.entity_type.as_str() {
            "item" => "Q",
            "property" => "P",
            ENTITY_TYPE => "M",
            "lexeme" => "L",
            _ => "?",
        };
        format!("{prefix}{}", self.numeric_id.unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonolingualTextValue {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityValue {
    pub amount: String,
    pub unit: String,
    #[serde(
        rename = "upperBound",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub upper_bound: Option<String>,
    #[serde(
        rename = "lowerBound",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub lower_bound: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeValue {
    pub time: String,
    #[serde(default)]
    pub timezone: i64,
    #[serde(default)]
    pub before: u64,
    #[serde(default)]
    pub after: u64,
    pub precision: u8,
    pub calendarmodel: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobeCoordinateValue {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<f64>,
    pub globe: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum DataValue {
    #[serde(rename = "string")]
    String(String),
    #[serde(rename = "wikibase-entityid")]
    EntityId(EntityIdValue),
    #[serde(rename = "monolingualtext")]
    MonolingualText(MonolingualTextValue),
    #[serde(rename = "quantity")]
    Quantity(QuantityValue),
    #[serde(rename = "time")]
    Time(TimeValue),
    #[serde(rename = "globecoordinate")]
    GlobeCoordinate(GlobeCoordinateValue),
}

impl DataValue {
    pub fn item(id: &str) -> Option<Self> {
        EntityIdValue::from_id(id).map(Self::EntityId)
    }

    pub fn value_type(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::EntityId(_) => "wikibase-entityid",
            Self::MonolingualText(_) => "monolingualtext",
            Self::Quantity(_) => "quantity",
            Self::Time(_) => "time",
            Self::GlobeCoordinate(_) => "globecoordinate",
        }
    }

    /// Rendering used when the repo cannot format the value.
    pub fn plain_text(&self) -> String {
        match self {
            Self::String(value) => value.clone(),
            Self::EntityId(value) => value.serialized_id(),
            Self::MonolingualText(value) => format!("{} ({})", value.text, value.language),
            Self::Quantity(value) => {
                if value.unit == "1" {
                    value.amount.clone()
                } else {
                    format!("{} {}", value.amount, value.unit)
                }
            }
            Self::Time(value) => value.time.clone(),
            Self::GlobeCoordinate(value) => format!("{}, {}", value.latitude, value.longitude),
        }
    }
}

/// Maps a property datatype to the value type its snaks carry.
pub fn value_type_for_datatype(datatype: &str) -> Option<&'static str> {
    match datatype {
        "wikibase-item" | "wikibase-property" | "wikibase-lexeme" | "wikibase-form"
        | "wikibase-sense" => Some("wikibase-entityid"),
        "string" | "external-id" | "url" | "commonsMedia" | "geo-shape" | "tabular-data"
        | "math" | "musical-notation" => Some("string"),
        "monolingualtext" => Some("monolingualtext"),
        "quantity" => Some("quantity"),
        "time" => Some("time"),
        "globe-coordinate" => Some("globecoordinate"),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnakType {
    Value,
    SomeValue,
    NoValue,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snak {
    pub snaktype: SnakType,
    pub property: PropertyId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datavalue: Option<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

// The server hash and datatype hint are derived data.
impl PartialEq for Snak {
    fn eq(&self, other: &Self) -> bool {
        self.snaktype == other.snaktype
            && self.property == other.property
            && self.datavalue == other.datavalue
    }
}

impl Snak {
    pub fn value(property: PropertyId, value: DataValue) -> Self {
        Self {
            snaktype: SnakType::Value,
            property,
            hash: None,
            datavalue: Some(value),
            datatype: None,
        }
    }

    pub fn no_value(property: PropertyId) -> Self {
        Self {
            snaktype: SnakType::NoValue,
            property,
            hash: None,
            datavalue: None,
            datatype: None,
        }
    }

    pub fn has_value(&self) -> bool {
        self.snaktype == SnakType::Value && self.datavalue.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Rank {
    Deprecated,
    #[default]
    Normal,
    Preferred,
}

impl Rank {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Deprecated => "deprecated",
            Self::Normal => "normal",
            Self::Preferred => "preferred",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StatementSerialization", into = "StatementSerialization")]
pub struct Statement {
    /// Server-assigned guid; `None` until the statement has been saved.
    pub guid: Option<String>,
    pub mainsnak: Snak,
    pub qualifiers: Vec<Snak>,
    pub rank: Rank,
    pub references: Vec<Value>,
}

impl Statement {
    pub fn new(mainsnak: Snak) -> Self {
        Self {
            guid: None,
            mainsnak,
            qualifiers: Vec::new(),
            rank: Rank::Normal,
            references: Vec::new(),
        }
    }

    pub fn property(&self) -> PropertyId {
        self.mainsnak.property
    }

    /// Qualifiers grouped by property, groups in order of first appearance.
    /// This is the order the repo stores them in.
    pub fn grouped_qualifiers(&self) -> Vec<&Snak> {
        let mut order: Vec<PropertyId> = Vec::new();
        for snak in &self.qualifiers {
            if !order.contains(&snak.property) {
                order.push(snak.property);
            }
        }
        order
            .into_iter()
            .flat_map(|property| {
                self.qualifiers
                    .iter()
                    .filter(move |snak| snak.property == property)
            })
            .collect()
    }

    pub fn group_qualifiers(&mut self) {
        self.qualifiers = self.grouped_qualifiers().into_iter().cloned().collect();
    }
}

/// Qualifier order only matters within a property.
impl PartialEq for Statement {
    fn eq(&self, other: &Self) -> bool {
        self.guid == other.guid
            && self.mainsnak == other.mainsnak
            && self.rank == other.rank
            && self.references == other.references
            && self.grouped_qualifiers() == other.grouped_qualifiers()
    }
}

fn statement_type() -> String {
    "statement".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StatementSerialization {
    mainsnak: Snak,
    #[serde(rename = "type", default = "statement_type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default)]
    rank: Rank,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    qualifiers: BTreeMap<PropertyId, Vec<Snak>>,
    #[serde(
        rename = "qualifiers-order",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    qualifiers_order: Vec<PropertyId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    references: Vec<Value>,
}

impl TryFrom<StatementSerialization> for Statement {
    type Error = String;

    fn try_from(raw: StatementSerialization) -> Result<Self, Self::Error> {
        if raw.kind != "statement" {
            return Err(format!("unexpected claim type `{}`", raw.kind));
        }
        let mut order = raw.qualifiers_order.clone();
        for property in raw.qualifiers.keys() {
            if !order.contains(property) {
                order.push(*property);
            }
        }
        let mut qualifiers = Vec::new();
        for property in order {
            let Some(snaks) = raw.qualifiers.get(&property) else {
                continue;
            };
            for snak in snaks {
                if snak.property != property {
                    return Err(format!(
                        "qualifier for {} is grouped under {property}",
                        snak.property
                    ));
                }
                qualifiers.push(snak.clone());
            }
        }
        Ok(Self {
            guid: raw.id,
            mainsnak: raw.mainsnak,
            qualifiers,
            rank: raw.rank,
            references: raw.references,
        })
    }
}

impl From<Statement> for StatementSerialization {
    fn from(statement: Statement) -> Self {
        let mut qualifiers: BTreeMap<PropertyId, Vec<Snak>> = BTreeMap::new();
        let mut qualifiers_order = Vec::new();
        for snak in statement.qualifiers {
            if !qualifiers_order.contains(&snak.property) {
                qualifiers_order.push(snak.property);
            }
            qualifiers.entry(snak.property).or_default().push(snak);
        }
        Self {
            mainsnak: statement.mainsnak,
            kind: statement_type(),
            id: statement.guid,
            rank: statement.rank,
            qualifiers,
            qualifiers_order,
            references: statement.references,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfoEntity {
    pub id: MediaInfoId,
    pub title: Option<String>,
    /// Caption text by language code.
    pub labels: BTreeMap<String, String>,
    pub statements: BTreeMap<PropertyId, Vec<Statement>>,
    /// `None` when the entity has never been saved.
    pub last_revision: Option<u64>,
}

impl MediaInfoEntity {
    pub fn empty(id: MediaInfoId) -> Self {
        Self {
            id,
            title: None,
            labels: BTreeMap::new(),
            statements: BTreeMap::new(),
            last_revision: None,
        }
    }

    pub fn exists(&self) -> bool {
        self.last_revision.is_some()
    }

    pub fn statements_for(&self, property: PropertyId) -> Vec<Statement> {
        self.statements.get(&property).cloned().unwrap_or_default()
    }

    pub fn all_statements(&self) -> Vec<Statement> {
        self.statements.values().flatten().cloned().collect()
    }

    /// Decode one entry of a `wbgetentities` response.
    pub fn from_serialization(serialization: &Value) -> Result<Self> {
        let id = serialization
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("entity serialization has no id"))?;
        let id = MediaInfoId::parse(id)?;

        if serialization.get("missing").is_some() {
            let mut entity = Self::empty(id);
            entity.title = serialization
                .get("title")
                .and_then(Value::as_str)
                .map(ToString::to_string);
            return Ok(entity);
        }

        let kind = serialization.get("type").and_then(Value::as_str);
        if kind != Some(ENTITY_TYPE) {
            bail!(
                "serialization of {id} does not resolve to a mediainfo entity (type {})",
                kind.unwrap_or("<none>")
            );
        }

        let mut labels = BTreeMap::new();
        if let Some(map) = serialization.get("labels").and_then(Value::as_object) {
            for (language, term) in map {
                let text = term
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| anyhow::anyhow!("label {language} of {id} has no value"))?;
                labels.insert(language.clone(), text.to_string());
            }
        }

        let mut statements = BTreeMap::new();
        let groups = serialization
            .get("statements")
            .or_else(|| serialization.get("claims"))
            .and_then(Value::as_object);
        if let Some(groups) = groups {
            for (key, list) in groups {
                let property = PropertyId::parse(key)?;
                let parsed: Vec<Statement> = serde_json::from_value(list.clone())
                    .with_context(|| format!("failed to decode {property} statements of {id}"))?;
                for statement in &parsed {
                    if statement.property() != property {
                        bail!(
                            "statement {} of {id} is grouped under {property}",
                            statement.guid.as_deref().unwrap_or("<new>")
                        );
                    }
                }
                statements.insert(property, parsed);
            }
        }

        Ok(Self {
            id,
            title: serialization
                .get("title")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            labels,
            statements,
            last_revision: serialization.get("lastrevid").and_then(Value::as_u64),
        })
    }
}
