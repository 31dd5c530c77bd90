use std::collections::BTreeMap;
use std::env;
use std::thread::sleep;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::MediaInfoConfig;
use crate::entity::{DataValue, MediaInfoEntity, MediaInfoId, PropertyId, Statement};

pub const NS_FILE: i32 = 6;
pub const NS_CATEGORY: i32 = 14;

/// Error payload returned by the repo API (`{"error": {"code", "info"}}`).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("repo API error [{code}]: {info}")]
pub struct RepoApiError {
    pub code: String,
    pub info: String,
    /// Extra human-readable messages attached to the error, if any.
    pub messages: Vec<String>,
}

impl RepoApiError {
    pub fn new(code: &str, info: &str) -> Self {
        Self {
            code: code.to_string(),
            info: info.to_string(),
            messages: Vec::new(),
        }
    }

    fn from_payload(error: &Value) -> Self {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        let messages = error
            .get("messages")
            .and_then(Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item.get("html")
                            .and_then(|html| html.get("*").or(Some(html)))
                            .and_then(Value::as_str)
                            .or_else(|| item.get("text").and_then(Value::as_str))
                            .map(ToString::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default();
        Self {
            code: code.to_string(),
            info: info.to_string(),
            messages,
        }
    }

    /// The most specific message available, falling back to `info`.
    pub fn detailed_message(&self) -> String {
        self.messages
            .first()
            .cloned()
            .unwrap_or_else(|| self.info.clone())
    }

    /// Detailed message of any error, using the API payload when one is wrapped inside.
    pub fn describe(error: &anyhow::Error) -> String {
        match error.downcast_ref::<RepoApiError>() {
            Some(api_error) => api_error.detailed_message(),
            None => format!("{error:#}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Bitmap,
    Audio,
    Video,
    Category,
}

impl MediaType {
    pub const ALL: [MediaType; 4] = [Self::Bitmap, Self::Audio, Self::Video, Self::Category];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bitmap => "bitmap",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Category => "category",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(value.trim()))
    }

    pub fn namespace(self) -> i32 {
        match self {
            Self::Category => NS_CATEGORY,
            _ => NS_FILE,
        }
    }

    /// Search string sent to the backend for `term`.
    pub fn search_query(self, term: &str) -> String {
        match self {
            Self::Bitmap => format!("{term} filetype:bitmap|drawing"),
            Self::Audio => format!("{term} filetype:audio"),
            Self::Video => format!("{term} filetype:video"),
            Self::Category => term.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueFormat {
    #[default]
    PlainText,
    Html,
}

impl ValueFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PlainText => "text/plain",
            Self::Html => "text/html",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilePage {
    pub title: String,
    pub page_id: Option<u64>,
}

impl FilePage {
    pub fn entity_id(&self) -> Option<MediaInfoId> {
        self.page_id
            .and_then(|page_id| MediaInfoId::from_page_id(page_id).ok())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub page_id: u64,
    /// Position of the hit across all pages of the search.
    pub index: u64,
    pub snippet: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchPage {
    pub hits: Vec<SearchHit>,
    pub continue_offset: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct EditOptions {
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub bot: bool,
}

impl EditOptions {
    pub fn from_config(config: &MediaInfoConfig, summary: Option<&str>) -> Self {
        let summary = summary
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string)
            .or_else(|| config.edit.summary.clone());
        Self {
            summary,
            tags: config.edit.tags.clone(),
            bot: config.bot_edits(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClaimEdit {
    pub statement: Statement,
    pub last_revision: u64,
}

pub trait RepoReadApi {
    fn resolve_file_pages(&mut self, titles: &[String]) -> Result<Vec<FilePage>>;
    fn get_entities(&mut self, ids: &[MediaInfoId]) -> Result<Vec<MediaInfoEntity>>;
    fn get_property_datatypes(
        &mut self,
        properties: &[PropertyId],
    ) -> Result<BTreeMap<PropertyId, String>>;
    fn format_value(
        &mut self,
        value: &DataValue,
        format: ValueFormat,
        language: &str,
    ) -> Result<String>;
    fn search_media(
        &mut self,
        term: &str,
        media_type: MediaType,
        offset: Option<u64>,
        limit: usize,
    ) -> Result<SearchPage>;
    fn request_count(&self) -> usize;

    fn get_entity(&mut self, id: MediaInfoId) -> Result<MediaInfoEntity> {
        self.get_entities(&[id])?
            .into_iter()
            .find(|entity| entity.id == id)
            .ok_or_else(|| anyhow::anyhow!("entity {id} not returned by API"))
    }
}

pub trait RepoWriteApi: RepoReadApi {
    fn login(&mut self, username: &str, password: &str) -> Result<()>;
    /// Sets one caption; an empty `value` removes it. Returns the new revision.
    fn set_label(
        &mut self,
        id: MediaInfoId,
        language: &str,
        value: &str,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<u64>;
    /// Creates or replaces a statement on `entity`. Statements without a guid are created.
    fn set_claim(
        &mut self,
        entity: MediaInfoId,
        statement: &Statement,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<ClaimEdit>;
    /// Removes the statements with the given guids in one edit. Returns the new revision.
    fn remove_claims(
        &mut self,
        guids: &[String],
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct RepoApiClientConfig {
    pub api_url: String,
    pub user_agent: String,
    pub timeout_ms: u64,
    pub read: RequestPolicy,
    pub write: RequestPolicy,
}

/// Throttle and retry settings for one class of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Minimum gap between two requests of this class.
    pub min_interval_ms: u64,
    pub max_retries: usize,
    /// Backoff before retry `n` is `retry_base_ms * 2^n` plus up to 99ms of jitter.
    pub retry_base_ms: u64,
}

impl RepoApiClientConfig {
    pub fn from_config(config: &MediaInfoConfig) -> Self {
        let retry_base_ms = env_value_parsed("WIKI_HTTP_RETRY_DELAY_MS", 500);
        Self {
            api_url: config.api_url_owned().unwrap_or_default(),
            user_agent: config.user_agent(),
            timeout_ms: env_value_parsed("WIKI_HTTP_TIMEOUT_MS", 30_000),
            read: RequestPolicy {
                min_interval_ms: env_value_parsed("WIKI_RATE_LIMIT_READ", 300),
                max_retries: env_value_parsed("WIKI_HTTP_RETRIES", 2),
                retry_base_ms,
            },
            write: RequestPolicy {
                min_interval_ms: env_value_parsed("WIKI_RATE_LIMIT_WRITE", 1_000),
                max_retries: env_value_parsed("WIKI_HTTP_WRITE_RETRIES", 1),
                retry_base_ms: retry_base_ms.saturating_mul(2),
            },
        }
    }
}

/// Reads and writes are throttled independently.
#[derive(Debug)]
struct RequestLane {
    policy: RequestPolicy,
    last_sent: Option<Instant>,
}

impl RequestLane {
    fn new(policy: RequestPolicy) -> Self {
        Self {
            policy,
            last_sent: None,
        }
    }

    fn throttle(&mut self) {
        let interval = Duration::from_millis(self.policy.min_interval_ms);
        if let Some(wait) = self
            .last_sent
            .and_then(|last| interval.checked_sub(last.elapsed()))
        {
            sleep(wait);
        }
        self.last_sent = Some(Instant::now());
    }

    fn backoff(&self, attempt: usize) -> Duration {
        let factor = 1u64
            .checked_shl(u32::try_from(attempt).unwrap_or(u32::MAX))
            .unwrap_or(u64::MAX);
        let jitter = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| u64::from(elapsed.subsec_nanos() % 100))
            .unwrap_or(0);
        Duration::from_millis(
            self.policy
                .retry_base_ms
                .saturating_mul(factor)
                .saturating_add(jitter),
        )
    }
}

enum AttemptFailure {
    Retryable(String),
    Fatal(anyhow::Error),
}

pub struct RepoApiClient {
    client: Client,
    endpoint: Url,
    user_agent: String,
    reads: RequestLane,
    writes: RequestLane,
    request_count: usize,
    csrf_token: Option<String>,
    logged_in_user: Option<String>,
}

impl RepoApiClient {
    pub fn new(config: RepoApiClientConfig) -> Result<Self> {
        if config.api_url.trim().is_empty() {
            bail!("repo API url is not configured (set [wiki].api_url or WIKI_API_URL)");
        }
        let endpoint = Url::parse(config.api_url.trim())
            .with_context(|| format!("invalid repo API url: {}", config.api_url))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .cookie_store(true)
            .build()
            .context("failed to build repo API HTTP client")?;

        Ok(Self {
            client,
            endpoint,
            user_agent: config.user_agent,
            reads: RequestLane::new(config.read),
            writes: RequestLane::new(config.write),
            request_count: 0,
            csrf_token: None,
            logged_in_user: None,
        })
    }

    fn request_json(
        &mut self,
        method: Method,
        params: &[(&str, String)],
        is_write: bool,
    ) -> Result<Value> {
        let action = params
            .iter()
            .find(|(key, _)| *key == "action")
            .map(|(_, value)| value.as_str())
            .unwrap_or("?")
            .to_string();
        let mut pairs: Vec<(&str, &str)> = vec![("format", "json"), ("formatversion", "2")];
        pairs.extend(
            params
                .iter()
                .filter(|(_, value)| !value.is_empty())
                .map(|(key, value)| (*key, value.as_str())),
        );

        let mut attempt = 0;
        loop {
            let lane = if is_write {
                &mut self.writes
            } else {
                &mut self.reads
            };
            lane.throttle();
            self.request_count += 1;
            debug!(action = %action, attempt, "repo API request");

            let failure = match self.send_once(&method, &pairs) {
                Ok(payload) => {
                    check_api_error(&payload)?;
                    return Ok(payload);
                }
                Err(failure) => failure,
            };
            let reason = match failure {
                AttemptFailure::Fatal(error) => {
                    return Err(error.context(format!("repo API request `{action}` failed")));
                }
                AttemptFailure::Retryable(reason) => reason,
            };
            let lane = if is_write { &self.writes } else { &self.reads };
            if attempt >= lane.policy.max_retries {
                bail!("repo API request `{action}` failed after {} attempt(s): {reason}", attempt + 1);
            }
            let delay = lane.backoff(attempt);
            warn!(action = %action, attempt, reason = %reason, delay_ms = delay.as_millis() as u64, "retrying repo API request");
            sleep(delay);
            attempt += 1;
        }
    }

    fn send_once(&self, method: &Method, pairs: &[(&str, &str)]) -> Result<Value, AttemptFailure> {
        let request = self
            .client
            .request(method.clone(), self.endpoint.clone())
            .header(reqwest::header::USER_AGENT, self.user_agent.as_str());
        let request = if *method == Method::GET {
            request.query(pairs)
        } else {
            request.form(pairs)
        };
        let response = request.send().map_err(|error| {
            if is_retryable_error(&error) {
                AttemptFailure::Retryable(error.to_string())
            } else {
                AttemptFailure::Fatal(error.into())
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(if is_retryable_status(status) {
                AttemptFailure::Retryable(format!("HTTP {status}"))
            } else {
                AttemptFailure::Fatal(anyhow::anyhow!("HTTP {status}"))
            });
        }
        response.json::<Value>().map_err(|error| {
            AttemptFailure::Fatal(
                anyhow::Error::new(error).context("failed to decode repo API JSON response"),
            )
        })
    }

    fn get(&mut self, params: &[(&str, String)]) -> Result<Value> {
        self.request_json(Method::GET, params, false)
    }

    fn fetch_token(&mut self, kind: &str) -> Result<String> {
        let response = self.get(&[
            ("action", "query".to_string()),
            ("meta", "tokens".to_string()),
            ("type", kind.to_string()),
        ])?;
        let parsed: TokenQueryResponse =
            serde_json::from_value(response).context("failed to decode token response")?;
        let tokens = parsed.query.tokens.unwrap_or_default();
        let token = match kind {
            "login" => tokens.logintoken,
            _ => tokens.csrftoken,
        };
        token.ok_or_else(|| anyhow::anyhow!("failed to get {kind} token"))
    }

    fn ensure_csrf_token(&mut self) -> Result<String> {
        if let Some(token) = &self.csrf_token {
            return Ok(token.clone());
        }
        let token = self.fetch_token("csrf")?;
        self.csrf_token = Some(token.clone());
        Ok(token)
    }

    /// POST a write action with the token, edit options and assertion attached.
    fn write(
        &mut self,
        mut params: Vec<(&str, String)>,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<Value> {
        let token = self.ensure_csrf_token()?;
        if let Some(revision) = base_revision {
            params.push(("baserevid", revision.to_string()));
        }
        if options.bot {
            params.push(("bot", "1".to_string()));
        }
        if let Some(summary) = &options.summary {
            params.push(("summary", summary.clone()));
        }
        if !options.tags.is_empty() {
            params.push(("tags", options.tags.join("|")));
        }
        if let Some(user) = &self.logged_in_user {
            params.push(("assertuser", user.clone()));
        }
        params.push(("token", token));
        self.request_json(Method::POST, &params, true)
    }
}

impl RepoReadApi for RepoApiClient {
    fn resolve_file_pages(&mut self, titles: &[String]) -> Result<Vec<FilePage>> {
        let mut output = Vec::new();
        for batch in titles.chunks(50) {
            let response = self.get(&[
                ("action", "query".to_string()),
                ("prop", "info".to_string()),
                ("titles", batch.join("|")),
            ])?;
            output.extend(parse_file_pages(response)?);
        }
        Ok(output)
    }

    fn get_entities(&mut self, ids: &[MediaInfoId]) -> Result<Vec<MediaInfoEntity>> {
        let mut output = Vec::new();
        for batch in ids.chunks(50) {
            let joined = batch
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|");
            let response = self.get(&[
                ("action", "wbgetentities".to_string()),
                ("ids", joined),
                ("props", "info|labels|claims".to_string()),
            ])?;
            output.extend(parse_entities(&response)?);
        }
        Ok(output)
    }

    fn get_property_datatypes(
        &mut self,
        properties: &[PropertyId],
    ) -> Result<BTreeMap<PropertyId, String>> {
        let mut output = BTreeMap::new();
        for batch in properties.chunks(50) {
            let joined = batch
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("|");
            let response = self.get(&[
                ("action", "wbgetentities".to_string()),
                ("ids", joined),
                ("props", "datatype".to_string()),
            ])?;
            output.extend(parse_datatypes(&response)?);
        }
        Ok(output)
    }

    fn format_value(
        &mut self,
        value: &DataValue,
        format: ValueFormat,
        language: &str,
    ) -> Result<String> {
        let datavalue =
            serde_json::to_string(value).context("failed to encode datavalue for formatting")?;
        let options = serde_json::json!({ "lang": language }).to_string();
        let response = self.get(&[
            ("action", "wbformatvalue".to_string()),
            ("datavalue", datavalue),
            ("options", options),
            ("generate", format.as_str().to_string()),
        ])?;
        response
            .get("result")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| anyhow::anyhow!("wbformatvalue response has no result"))
    }

    fn search_media(
        &mut self,
        term: &str,
        media_type: MediaType,
        offset: Option<u64>,
        limit: usize,
    ) -> Result<SearchPage> {
        let response = self.get(&[
            ("action", "query".to_string()),
            ("list", "search".to_string()),
            ("srsearch", media_type.search_query(term)),
            ("srnamespace", media_type.namespace().to_string()),
            ("srlimit", limit.clamp(1, 500).to_string()),
            ("sroffset", offset.map(|value| value.to_string()).unwrap_or_default()),
        ])?;
        parse_search_page(response, offset.unwrap_or(0))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

impl RepoWriteApi for RepoApiClient {
    fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let login_token = self.fetch_token("login")?;
        let response = self.request_json(
            Method::POST,
            &[
                ("action", "login".to_string()),
                ("lgname", username.to_string()),
                ("lgpassword", password.to_string()),
                ("lgtoken", login_token),
            ],
            true,
        )?;
        let payload: LoginResponse =
            serde_json::from_value(response).context("failed to decode login response")?;
        match payload.login.result.as_deref() {
            Some("Success") => {
                self.csrf_token = None;
                // Bot passwords log in as `User@bot`; edits assert the account name.
                let account = payload
                    .login
                    .lgusername
                    .unwrap_or_else(|| username.split('@').next().unwrap_or(username).to_string());
                info!(user = %account, "logged in to repo API");
                self.logged_in_user = Some(account);
                Ok(())
            }
            other => bail!(
                "repo API login failed: {}",
                payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }

    fn set_label(
        &mut self,
        id: MediaInfoId,
        language: &str,
        value: &str,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<u64> {
        // An empty value is dropped from the request, which removes the label.
        let params = vec![
            ("action", "wbsetlabel".to_string()),
            ("id", id.to_string()),
            ("language", language.to_string()),
            ("value", value.to_string()),
        ];
        let response = self.write(params, base_revision, options)?;
        response
            .get("entity")
            .and_then(|entity| entity.get("lastrevid"))
            .and_then(Value::as_u64)
            .ok_or_else(|| anyhow::anyhow!("wbsetlabel response for {id} has no lastrevid"))
    }

    fn set_claim(
        &mut self,
        entity: MediaInfoId,
        statement: &Statement,
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<ClaimEdit> {
        let mut outgoing = statement.clone();
        if outgoing.guid.is_none() {
            outgoing.guid = Some(new_statement_guid(entity));
        }
        let claim = serde_json::to_string(&outgoing).context("failed to encode statement")?;
        let response = self.write(
            vec![("action", "wbsetclaim".to_string()), ("claim", claim)],
            base_revision,
            options,
        )?;
        parse_claim_edit(&response)
    }

    fn remove_claims(
        &mut self,
        guids: &[String],
        base_revision: Option<u64>,
        options: &EditOptions,
    ) -> Result<u64> {
        if guids.is_empty() {
            bail!("wbremoveclaims called without claims");
        }
        let response = self.write(
            vec![
                ("action", "wbremoveclaims".to_string()),
                ("claim", guids.join("|")),
            ],
            base_revision,
            options,
        )?;
        last_revision_from_pageinfo(&response)
            .ok_or_else(|| anyhow::anyhow!("wbremoveclaims response has no lastrevid"))
    }
}

/// Guid for a statement about to be created: `{entity}${uuid}`.
pub fn new_statement_guid(entity: MediaInfoId) -> String {
    format!("{entity}${}", Uuid::new_v4())
}

fn check_api_error(payload: &Value) -> Result<()> {
    match payload.get("error") {
        Some(error) => Err(RepoApiError::from_payload(error).into()),
        None => Ok(()),
    }
}

fn parse_file_pages(response: Value) -> Result<Vec<FilePage>> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode page info response")?;
    Ok(parsed
        .query
        .pages
        .into_iter()
        .map(|page| FilePage {
            title: page.title,
            page_id: if page.missing.unwrap_or(false) {
                None
            } else {
                page.pageid
            },
        })
        .collect())
}

fn parse_entities(response: &Value) -> Result<Vec<MediaInfoEntity>> {
    let entities = response
        .get("entities")
        .and_then(Value::as_object)
        .ok_or_else(|| anyhow::anyhow!("wbgetentities response has no entities"))?;
    entities
        .values()
        .map(MediaInfoEntity::from_serialization)
        .collect()
}

fn parse_datatypes(response: &Value) -> Result<BTreeMap<PropertyId, String>> {
    let mut output = BTreeMap::new();
    let Some(entities) = response.get("entities").and_then(Value::as_object) else {
        return Ok(output);
    };
    for (key, entity) in entities {
        if entity.get("missing").is_some() {
            continue;
        }
        let property = PropertyId::parse(key)?;
        if let Some(datatype) = entity.get("datatype").and_then(Value::as_str) {
            output.insert(property, datatype.to_string());
        }
    }
    Ok(output)
}

fn parse_search_page(response: Value, offset: u64) -> Result<SearchPage> {
    let parsed: QueryResponse =
        serde_json::from_value(response).context("failed to decode search response")?;
    let hits = parsed
        .query
        .search
        .into_iter()
        .zip(offset..)
        .map(|(item, index)| SearchHit {
            title: item.title,
            page_id: item.pageid,
            index,
            snippet: item.snippet,
        })
        .collect();
    Ok(SearchPage {
        hits,
        continue_offset: parsed.continuation.and_then(|value| value.sroffset),
    })
}

fn parse_claim_edit(response: &Value) -> Result<ClaimEdit> {
    let last_revision = last_revision_from_pageinfo(response)
        .ok_or_else(|| anyhow::anyhow!("wbsetclaim response has no lastrevid"))?;
    let claim = response
        .get("claim")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("wbsetclaim response has no claim"))?;
    let statement: Statement =
        serde_json::from_value(claim).context("failed to decode saved statement")?;
    Ok(ClaimEdit {
        statement,
        last_revision,
    })
}

fn last_revision_from_pageinfo(response: &Value) -> Option<u64> {
    response
        .get("pageinfo")
        .and_then(|info| info.get("lastrevid"))
        .and_then(Value::as_u64)
}

fn env_value_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn is_retryable_error(error: &reqwest::Error) -> bool {
    error.is_timeout() || error.is_connect() || error.is_request()
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    pages: Vec<PageInfoItem>,
    #[serde(default)]
    search: Vec<SearchQueryItem>,
}

#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    sroffset: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct PageInfoItem {
    pageid: Option<u64>,
    title: String,
    missing: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct SearchQueryItem {
    title: String,
    pageid: u64,
    snippet: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
    csrftoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
    lgusername: Option<String>,
}
