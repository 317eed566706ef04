//! Model listing and automatic model selection

use std::error::Error;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::api::models::{filter_models, sort_models};
use crate::api::{ApiError, Model, ModelsResponse};
use crate::core::chat_stream::ChatClient;
use crate::core::config::Settings;

pub async fn list_models(settings: &Settings, search: &str) -> Result<(), Box<dyn Error>> {
    let client = ChatClient::new(&settings.client_config())?;
    let response = client.list_models().await?;

    println!("🤖 Available Models at {}", client.endpoint().base_url);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let mut selected = settings.selected_model.clone();
    if selected.trim().is_empty() {
        if let Some(model) = first_model_id(&response) {
            selected = model.to_string();
            remember_selected_model(&selected);
            println!("🎯 No model was selected; selected {selected}");
            println!();
        }
    }

    if !settings.model_prefix_filter.is_empty() {
        println!(
            "📌 Prefix filter active: {} (change with 'lmchat set model-prefix-filter')",
            settings.model_prefix_filter
        );
        println!();
    }

    let mut models = response.data;
    sort_models(&mut models);
    let shown = filter_models(&models, search, &settings.model_prefix_filter);

    if shown.is_empty() {
        println!("No models found.");
        return Ok(());
    }

    println!("Found {} models (sorted newest first):", shown.len());
    println!();
    for model in shown {
        print_model(model, model.id == selected);
    }
    Ok(())
}

/// Pick the first model the server reports and save it as the selection.
///
/// Returns `Ok(None)` when the catalog is empty.
pub async fn auto_select_model(
    client: &ChatClient,
    settings: &mut Settings,
) -> Result<Option<String>, ApiError> {
    let response = client.list_models().await?;
    let Some(model) = first_model_id(&response) else {
        return Ok(None);
    };
    settings.selected_model = model.to_string();
    remember_selected_model(model);
    Ok(Some(model.to_string()))
}

pub fn first_model_id(response: &ModelsResponse) -> Option<&str> {
    response.data.first().map(|model| model.id.as_str())
}

/// Render a `created` value, accepting both seconds and milliseconds.
pub fn format_created(created: i64) -> Option<String> {
    if created <= 0 {
        return None;
    }
    let seconds = if created > 10_000_000_000 {
        created / 1000
    } else {
        created
    };
    DateTime::<Utc>::from_timestamp(seconds, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

fn print_model(model: &Model, selected: bool) {
    let marker = if selected { " (selected)" } else { "" };
    println!("  • {}{marker}", model.id);
    if let Some(owned_by) = model.owned_by.as_deref() {
        if !owned_by.is_empty() && owned_by != "system" {
            println!("    Owner: {owned_by}");
        }
    }
    if let Some(created) = model.created.and_then(format_created) {
        println!("    Created: {created}");
    }
    println!();
}

/// Saves the selection to the stored settings, leaving overrides of this
/// run out of the file.
fn remember_selected_model(model: &str) {
    let result = Settings::load().and_then(|mut stored| {
        stored.selected_model = model.to_string();
        stored.save()
    });
    match result {
        Ok(()) => info!(model, "Saved automatically selected model"),
        Err(err) => warn!(model, error = %err, "Could not save selected model"),
    }
}
