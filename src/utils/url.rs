//! Server address helpers

/// Strip every trailing `/` from a base address.
///
/// ```
/// use lmchat::utils::url::normalize_base_url;
///
/// assert_eq!(normalize_base_url("http://localhost:1234/v1//"), "http://localhost:1234/v1");
/// ```
pub fn normalize_base_url(base_url: &str) -> String {
    base_url.trim_end_matches('/').to_string()
}

/// Join `path` onto `base_url` with exactly one `/` between them.
///
/// ```
/// use lmchat::utils::url::construct_api_url;
///
/// assert_eq!(
///     construct_api_url("http://localhost:1234/v1/", "/models"),
///     "http://localhost:1234/v1/models"
/// );
/// ```
pub fn construct_api_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        normalize_base_url(base_url),
        path.trim_start_matches('/')
    )
}

/// Turn a typed server address into an OpenAI-compatible root.
///
/// Whitespace and one trailing `/` are dropped, then `/v1` is appended
/// unless already there. Blank input stays blank.
///
/// ```
/// use lmchat::utils::url::format_server_url;
///
/// assert_eq!(format_server_url(" http://localhost:1234/ "), "http://localhost:1234/v1");
/// assert_eq!(format_server_url("http://localhost:1234/v1"), "http://localhost:1234/v1");
/// ```
pub fn format_server_url(url: &str) -> String {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    let clean = trimmed.strip_suffix('/').unwrap_or(trimmed);
    if clean.ends_with("/v1") {
        clean.to_string()
    } else {
        format!("{clean}/v1")
    }
}
