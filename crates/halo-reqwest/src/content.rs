//! The content-generation endpoint and its reqwest adapter.
//!
//! Requests go to `POST {base_url}/v1beta/models/{model}:generateContent?key={api_key}`
//! with a JSON body of the form `{"contents": [...]}`. The generated text is
//! read from `candidates[0].content.parts[0].text`.

use async_trait::async_trait;
use halo_types::config::HaloConfig;
use http::{HeaderMap, StatusCode};
use reqwest::Client;
use serde_json::json;
use std::fmt::{Debug, Formatter};
use url::Url;

use crate::wrapper::{Invoke, PaymentRequiredSignal};

#[cfg(feature = "telemetry")]
use tracing::instrument;

const TEXT_POINTER: &str = "/candidates/0/content/parts/0/text";

/// Location of the content endpoint, including the API key.
#[derive(Clone)]
pub struct ContentEndpoint {
    base_url: Url,
    model: String,
    api_key: Option<String>,
}

impl Debug for ContentEndpoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentEndpoint")
            .field("base_url", &self.base_url.as_str())
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ContentEndpoint {
    pub fn new<M: Into<String>>(base_url: Url, model: M) -> Self {
        Self {
            base_url,
            model: model.into(),
            api_key: None,
        }
    }

    pub fn with_api_key<K: Into<String>>(mut self, api_key: K) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn from_config(config: &HaloConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Full `generateContent` URL, with the API key as the `key` query parameter.
    pub fn url(&self) -> Result<Url, url::ParseError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let mut url = Url::parse(&format!(
            "{base}/v1beta/models/{}:generateContent",
            self.model
        ))?;
        if let Some(api_key) = &self.api_key {
            url.query_pairs_mut().append_pair("key", api_key);
        }
        Ok(url)
    }
}

/// Strips query and fragment, so the API key never reaches logs.
pub(crate) fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url.to_string()
}

/// The argument of a content call: a bare prompt or a ready request body.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateContentRequest {
    /// Sent as `{"contents": [{"parts": [{"text": prompt}]}]}`.
    Prompt(String),
    /// Sent as-is.
    Body(serde_json::Value),
}

impl GenerateContentRequest {
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            GenerateContentRequest::Prompt(prompt) => prompt_body(prompt),
            GenerateContentRequest::Body(body) => body.clone(),
        }
    }
}

pub(crate) fn prompt_body(prompt: &str) -> serde_json::Value {
    json!({ "contents": [{ "parts": [{ "text": prompt }] }] })
}

impl From<&str> for GenerateContentRequest {
    fn from(prompt: &str) -> Self {
        GenerateContentRequest::Prompt(prompt.to_string())
    }
}

impl From<String> for GenerateContentRequest {
    fn from(prompt: String) -> Self {
        GenerateContentRequest::Prompt(prompt)
    }
}

impl From<serde_json::Value> for GenerateContentRequest {
    fn from(body: serde_json::Value) -> Self {
        GenerateContentRequest::Body(body)
    }
}

/// How to treat a successful response that carries no text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseParsing {
    /// Missing text becomes an empty string.
    #[default]
    Lenient,
    /// Missing text is an error.
    Strict,
}

#[derive(Debug, thiserror::Error)]
#[error("Response has no text at candidates[0].content.parts[0].text")]
pub struct MissingTextError;

/// Reads the generated text out of a response document.
pub fn extract_text(response: &serde_json::Value) -> Option<&str> {
    response.pointer(TEXT_POINTER).and_then(|v| v.as_str())
}

/// Normalized result of a content call.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedContent {
    pub text: String,
    /// The full response document.
    pub raw: serde_json::Value,
}

impl GeneratedContent {
    pub fn from_response(
        raw: serde_json::Value,
        parsing: ResponseParsing,
    ) -> Result<Self, MissingTextError> {
        let text = match (extract_text(&raw), parsing) {
            (Some(text), _) => text.to_string(),
            (None, ResponseParsing::Lenient) => String::new(),
            (None, ResponseParsing::Strict) => return Err(MissingTextError),
        };
        Ok(Self { text, raw })
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

/// Where and how a content call is sent, so a paid replay can repeat it.
#[derive(Debug, Clone, Copy)]
pub struct ReplayTarget<'a> {
    pub client: &'a Client,
    pub endpoint: &'a ContentEndpoint,
    pub parsing: ResponseParsing,
}

/// Body of a failed response, or `""` when it cannot be read.
pub(crate) async fn error_body(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(body) => body,
        Err(error) => {
            tracing::warn!(%error, %status, "Failed to read error response body");
            String::new()
        }
    }
}

/// Errors of a plain (unpaid) content call.
#[derive(Debug, thiserror::Error)]
pub enum ContentError {
    #[error("Invalid content endpoint URL: {0}")]
    Url(#[from] url::ParseError),
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),
    #[error("Unexpected HTTP status {status}: {body}")]
    Status {
        status: StatusCode,
        headers: HeaderMap,
        body: String,
    },
    #[error("Failed to decode response JSON: {0}")]
    Decode(#[source] reqwest::Error),
    #[error(transparent)]
    MissingText(#[from] MissingTextError),
}

impl PaymentRequiredSignal for ContentError {
    fn status(&self) -> Option<StatusCode> {
        match self {
            ContentError::Status { status, .. } => Some(*status),
            ContentError::Http(e) => e.status(),
            _ => None,
        }
    }

    fn response_headers(&self) -> Option<&HeaderMap> {
        match self {
            ContentError::Status { headers, .. } => Some(headers),
            _ => None,
        }
    }
}

/// A content-generation model reached over HTTP.
///
/// Non-success statuses come back as [`ContentError::Status`] with the
/// response headers attached, which is what [`Halo`](crate::Halo) needs to
/// recover from a 402.
///
/// ```rust,no_run
/// use halo_reqwest::{ContentEndpoint, GenerativeModel};
///
/// let endpoint = ContentEndpoint::new("https://api.agihalo.com".parse().unwrap(), "gemini-3-flash-preview")
///     .with_api_key("KEY");
/// let model = GenerativeModel::new(endpoint);
/// ```
#[derive(Debug, Clone)]
pub struct GenerativeModel {
    client: Client,
    endpoint: ContentEndpoint,
    parsing: ResponseParsing,
}

impl GenerativeModel {
    pub fn new(endpoint: ContentEndpoint) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            parsing: ResponseParsing::default(),
        }
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    pub fn with_parsing(mut self, parsing: ResponseParsing) -> Self {
        self.parsing = parsing;
        self
    }

    pub fn endpoint(&self) -> &ContentEndpoint {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        self.endpoint.model()
    }
}

#[async_trait]
impl Invoke for GenerativeModel {
    type Output = GeneratedContent;
    type Error = ContentError;

    fn replay_target(&self) -> ReplayTarget<'_> {
        ReplayTarget {
            client: &self.client,
            endpoint: &self.endpoint,
            parsing: self.parsing,
        }
    }

    #[cfg_attr(feature = "telemetry", instrument(name = "halo.content.generate", skip_all, err, fields(model = %self.endpoint.model)))]
    async fn invoke(
        &self,
        request: &GenerateContentRequest,
    ) -> Result<GeneratedContent, ContentError> {
        let url = self.endpoint.url()?;
        let response = self
            .client
            .post(url)
            .json(&request.to_body())
            .send()
            .await
            .map_err(ContentError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = error_body(response).await;
            return Err(ContentError::Status {
                status,
                headers,
                body,
            });
        }

        let raw = response
            .json::<serde_json::Value>()
            .await
            .map_err(ContentError::Decode)?;
        let content = GeneratedContent::from_response(raw, self.parsing)?;
        Ok(content)
    }
}
