//! `connect`: test a server address and remember it

use std::error::Error;

use crate::core::chat_stream::{ChatClient, ClientConfig};
use crate::core::config::Settings;
use crate::core::endpoint::EndpointKind;
use crate::utils::url::format_server_url;

pub async fn connect(stored: &Settings, api_key: &str, url: &str) -> Result<(), Box<dyn Error>> {
    let target = server_url_for(url);
    if target.is_empty() {
        return Err("Please enter a server URL, e.g. lmchat connect http://localhost:1234".into());
    }

    println!("🔍 Testing connection to {target}...");
    let client = ChatClient::new(&ClientConfig {
        base_url: target.clone(),
        api_key: api_key.to_string(),
    })?;

    match probe_server(&client, stored).await {
        Some((updated, latency)) => {
            updated.save()?;
            println!("✅ Connected in {latency} ms. Saved {target} as the server address.");
            Ok(())
        }
        None => Err(format!(
            "Could not connect to {target}. Check the address and that the server is running."
        )
        .into()),
    }
}

/// Webhook addresses are used as typed; anything else is normalized to `/v1`.
pub fn server_url_for(input: &str) -> String {
    match EndpointKind::classify(input) {
        EndpointKind::Webhook => input.trim().to_string(),
        EndpointKind::OpenAiCompatible => format_server_url(input),
    }
}

/// Probe `client`'s server; on success return `stored` pointing at it.
pub async fn probe_server(client: &ChatClient, stored: &Settings) -> Option<(Settings, u64)> {
    let latency = client.check_connection().await?;
    let updated = Settings {
        base_url: client.endpoint().base_url.clone(),
        server_configured: true,
        ..stored.clone()
    };
    Some((updated, latency))
}
