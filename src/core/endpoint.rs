//! Endpoint resolution
//!
//! Turns the configured `(base address, credential)` pair into everything a
//! request needs: where chat is posted, where (and whether) the model catalog
//! lives, how the connectivity probe is sent and which headers go along.

use reqwest::header::HeaderMap;
use reqwest::Method;

use crate::api::ApiError;
use crate::utils::auth::request_headers;
use crate::utils::url::construct_api_url;

/// Path segment marking a single-purpose webhook address.
pub const WEBHOOK_PATH_MARKER: &str = "/webhook/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Posts go to the address verbatim and there is no model catalog.
    Webhook,
    /// Address is an OpenAI-style API root (`.../v1`).
    OpenAiCompatible,
}

impl EndpointKind {
    pub fn classify(base_url: &str) -> Self {
        if base_url.contains(WEBHOOK_PATH_MARKER) {
            EndpointKind::Webhook
        } else {
            EndpointKind::OpenAiCompatible
        }
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedEndpoint {
    pub kind: EndpointKind,
    pub base_url: String,
    pub chat_url: String,
    pub models_url: Option<String>,
    pub headers: HeaderMap,
}

impl ResolvedEndpoint {
    /// Request used by the connectivity probe.
    pub fn probe_target(&self) -> (Method, &str) {
        match (&self.kind, &self.models_url) {
            (EndpointKind::OpenAiCompatible, Some(models_url)) => (Method::GET, models_url),
            _ => (Method::HEAD, &self.base_url),
        }
    }
}

pub fn resolve_endpoint(base_url: &str, api_key: &str) -> Result<ResolvedEndpoint, ApiError> {
    let base_url = base_url.trim();
    let kind = EndpointKind::classify(base_url);
    let headers = request_headers(base_url, api_key).map_err(|err| ApiError {
        message: "API key contains characters that cannot be sent in a request header"
            .to_string(),
        status: None,
        cause: Some(Box::new(err)),
    })?;

    let (chat_url, models_url) = match kind {
        EndpointKind::Webhook => (base_url.to_string(), None),
        EndpointKind::OpenAiCompatible => (
            construct_api_url(base_url, "chat/completions"),
            Some(construct_api_url(base_url, "models")),
        ),
    };

    Ok(ResolvedEndpoint {
        kind,
        base_url: base_url.to_string(),
        chat_url,
        models_url,
        headers,
    })
}
