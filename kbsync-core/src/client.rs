use std::time::{Duration, SystemTime};

use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.elevenlabs.io";
const API_KEY_HEADER: &str = "xi-api-key";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(180);

#[derive(Debug, Error)]
pub enum KbError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("rate limited by api: {body}")]
    RateLimited {
        retry_after: Option<Duration>,
        body: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    RateLimit,
    Transient,
    NotFound,
    Permanent,
}

#[derive(Clone)]
pub struct KnowledgeBaseClient {
    http: Client,
    base_url: Url,
    api_key: String,
}

impl KnowledgeBaseClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self, KbError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: &str, api_key: impl Into<String>) -> Result<Self, KbError> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
            api_key: api_key.into(),
        })
    }

    pub async fn list_documents(
        &self,
        page: u32,
        page_size: u32,
    ) -> Result<DocumentPage, KbError> {
        let mut url = self.endpoint("/v1/convai/knowledge-base")?;
        url.query_pairs_mut()
            .append_pair("page_size", &page_size.max(1).to_string())
            .append_pair("page", &page.to_string());
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_document(&self, id: &str) -> Result<Document, KbError> {
        let url = self.document_endpoint(id, None)?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_document_content(&self, id: &str) -> Result<String, KbError> {
        let url = self.document_endpoint(id, Some("content"))?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let response = Self::check_status(response).await?;
        Ok(response.text().await?)
    }

    pub async fn create_text_document(&self, name: &str, text: &str) -> Result<String, KbError> {
        let url = self.endpoint("/v1/convai/knowledge-base/text")?;
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&CreateTextRequest { text, name })
            .send()
            .await?;
        let created: CreatedDocument = Self::handle_response(response).await?;
        Ok(created.id)
    }

    pub async fn request_indexing(&self, id: &str, model: &str) -> Result<RagIndexEntry, KbError> {
        let url = self.document_endpoint(id, Some("rag-index"))?;
        let response = self
            .http
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&RagIndexRequest { model })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn get_indexing_status(&self, id: &str) -> Result<RagIndexList, KbError> {
        let url = self.document_endpoint(id, Some("rag-index"))?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), KbError> {
        let url = self.document_endpoint(id, None)?;
        let response = self
            .http
            .delete(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    pub async fn get_agent_knowledge_base(
        &self,
        agent_id: &str,
    ) -> Result<Vec<KnowledgeBaseRef>, KbError> {
        let url = self.agent_endpoint(agent_id)?;
        let response = self
            .http
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await?;
        let agent: AgentKnowledgeBase = Self::handle_response(response).await?;
        Ok(agent.conversation_config.agent.prompt.knowledge_base)
    }

    /// Replaces the agent's whole knowledge-base list in one PATCH.
    pub async fn replace_agent_knowledge_base(
        &self,
        agent_id: &str,
        refs: &[KnowledgeBaseRef],
    ) -> Result<(), KbError> {
        let url = self.agent_endpoint(agent_id)?;
        let body = AgentKnowledgeBase::with_refs(refs.to_vec());
        let response = self
            .http
            .patch(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        Self::check_status(response).await?;
        Ok(())
    }

    fn endpoint(&self, path: &str) -> Result<Url, KbError> {
        Ok(self.base_url.join(path)?)
    }

    fn document_endpoint(&self, id: &str, suffix: Option<&str>) -> Result<Url, KbError> {
        let mut url = self.endpoint("/v1/convai/knowledge-base")?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.push(id);
            if let Some(suffix) = suffix {
                segments.push(suffix);
            }
        }
        Ok(url)
    }

    fn agent_endpoint(&self, agent_id: &str) -> Result<Url, KbError> {
        let mut url = self.endpoint("/v1/convai/agents")?;
        url.path_segments_mut()
            .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?
            .push(agent_id);
        Ok(url)
    }

    async fn check_status(response: reqwest::Response) -> Result<reqwest::Response, KbError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(parse_retry_after);
            let body = response.text().await.unwrap_or_default();
            return Err(KbError::RateLimited { retry_after, body });
        }
        let body = response.text().await.unwrap_or_default();
        Err(KbError::Api { status, body })
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, KbError> {
        let response = Self::check_status(response).await?;
        Ok(response.json::<T>().await?)
    }
}

impl KbError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            KbError::Api { status, .. } => Some(classify_api_status(*status)),
            KbError::RateLimited { .. } => Some(ApiErrorClass::RateLimit),
            // dropped or reset connections and truncated bodies; decode errors stay permanent
            KbError::Request(err)
                if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() =>
            {
                Some(ApiErrorClass::Transient)
            }
            _ => None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self.classification(),
            Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
        )
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            KbError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        ApiErrorClass::Auth
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

// Retry-After is either delta-seconds or an HTTP date.
fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(at.duration_since(SystemTime::now()).unwrap_or_default())
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub metadata: DocumentMetadata,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct DocumentMetadata {
    #[serde(default)]
    pub created_at_unix_secs: Option<i64>,
    #[serde(default)]
    pub size_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct DocumentPage {
    #[serde(default, alias = "knowledge_bases")]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RagIndexStatus {
    Created,
    Processing,
    Succeeded,
    Failed,
    RagLimitExceeded,
    DocumentTooSmall,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RagIndexEntry {
    pub status: RagIndexStatus,
    #[serde(default)]
    pub progress_percentage: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct RagIndexList {
    #[serde(default)]
    pub indexes: Vec<RagIndexEntry>,
}

impl RagIndexList {
    pub fn current(&self) -> Option<&RagIndexEntry> {
        self.indexes.first()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct KnowledgeBaseRef {
    #[serde(rename = "type", default = "default_ref_type")]
    pub ref_type: String,
    pub name: String,
    pub id: String,
    #[serde(default = "default_usage_mode")]
    pub usage_mode: String,
}

impl KnowledgeBaseRef {
    pub fn text(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            ref_type: default_ref_type(),
            name: name.into(),
            id: id.into(),
            usage_mode: default_usage_mode(),
        }
    }
}

fn default_ref_type() -> String {
    "text".to_string()
}

fn default_usage_mode() -> String {
    "auto".to_string()
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AgentKnowledgeBase {
    #[serde(default)]
    conversation_config: ConversationConfig,
}

impl AgentKnowledgeBase {
    fn with_refs(knowledge_base: Vec<KnowledgeBaseRef>) -> Self {
        Self {
            conversation_config: ConversationConfig {
                agent: AgentSection {
                    prompt: PromptSection { knowledge_base },
                },
            },
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct ConversationConfig {
    #[serde(default)]
    agent: AgentSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct AgentSection {
    #[serde(default)]
    prompt: PromptSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct PromptSection {
    #[serde(default)]
    knowledge_base: Vec<KnowledgeBaseRef>,
}

#[derive(Debug, Serialize)]
struct CreateTextRequest<'a> {
    text: &'a str,
    name: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreatedDocument {
    #[serde(alias = "knowledge_base_id")]
    id: String,
}

#[derive(Debug, Serialize)]
struct RagIndexRequest<'a> {
    model: &'a str,
}
