use chrono::Utc;
use tracing::debug;

use crate::api::{ApiError, ApiOperation, Model, ModelsResponse};
use crate::core::endpoint::{EndpointKind, ResolvedEndpoint};

pub const WEBHOOK_MODEL_ID: &str = "webhook-model";
pub const WEBHOOK_MODEL_OWNER: &str = "webhook";

/// The catalog reported for webhook endpoints, which have no `/models` route.
pub fn webhook_catalog() -> ModelsResponse {
    ModelsResponse {
        object: "list".to_string(),
        data: vec![Model {
            id: WEBHOOK_MODEL_ID.to_string(),
            object: "model".to_string(),
            created: Some(Utc::now().timestamp_millis()),
            owned_by: Some(WEBHOOK_MODEL_OWNER.to_string()),
        }],
    }
}

pub async fn fetch_models(
    client: &reqwest::Client,
    endpoint: &ResolvedEndpoint,
) -> Result<ModelsResponse, ApiError> {
    let models_url = match (&endpoint.kind, &endpoint.models_url) {
        (EndpointKind::Webhook, _) | (_, None) => {
            debug!(url = %endpoint.base_url, "Webhook endpoint, using synthetic model catalog");
            return Ok(webhook_catalog());
        }
        (EndpointKind::OpenAiCompatible, Some(url)) => url,
    };

    debug!(url = %models_url, "Fetching model catalog");
    let response = client
        .get(models_url)
        .headers(endpoint.headers.clone())
        .send()
        .await
        .map_err(|err| ApiError::from_reqwest(ApiOperation::ListModels, err))?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        return Err(ApiError::http_status(
            ApiOperation::ListModels,
            status,
            &error_text,
        ));
    }

    response
        .json::<ModelsResponse>()
        .await
        .map_err(|err| ApiError::from_reqwest(ApiOperation::ListModels, err))
}

/// Keeps models whose id contains `search` (case-insensitive) and starts with
/// `prefix` (case-sensitive). Empty filters match everything.
pub fn filter_models<'a>(models: &'a [Model], search: &str, prefix: &str) -> Vec<&'a Model> {
    let search = search.to_lowercase();
    models
        .iter()
        .filter(|model| search.is_empty() || model.id.to_lowercase().contains(&search))
        .filter(|model| prefix.is_empty() || model.id.starts_with(prefix))
        .collect()
}

pub fn sort_models(models: &mut [Model]) {
    // Newest first; models without a creation date go last, ordered by id
    models.sort_by(|a, b| match (a.created, b.created) {
        (Some(a_created), Some(b_created)) => {
            b_created.cmp(&a_created).then_with(|| a.id.cmp(&b.id))
        }
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => a.id.cmp(&b.id),
    });
}
