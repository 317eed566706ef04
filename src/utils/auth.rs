//! Request header construction
//!
//! Every call to the server carries the same header set, derived only from
//! the configured base address and credential.

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue, AUTHORIZATION, CONTENT_TYPE};

/// Substring identifying addresses served through an ngrok tunnel.
pub const TUNNEL_HOST_MARKER: &str = "ngrok";
/// Header that makes ngrok skip its browser warning interstitial.
pub const TUNNEL_BYPASS_HEADER: &str = "ngrok-skip-browser-warning";

/// Build the headers for a request against `base_url`
///
/// - `Content-Type: application/json` is always present.
/// - `Authorization: Bearer <key>` only when the key is non-blank; a blank key
///   sends no `Authorization` header at all.
/// - The tunnel bypass header when the address goes through ngrok.
pub fn request_headers(base_url: &str, api_key: &str) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let api_key = api_key.trim();
    if !api_key.is_empty() {
        let mut value = HeaderValue::from_str(&format!("Bearer {api_key}"))?;
        value.set_sensitive(true);
        headers.insert(AUTHORIZATION, value);
    }

    if base_url.contains(TUNNEL_HOST_MARKER) {
        headers.insert(TUNNEL_BYPASS_HEADER, HeaderValue::from_static("true"));
    }

    Ok(headers)
}
