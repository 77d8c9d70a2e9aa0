use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use std::error::Error;

/// `base` with `segments` appended, each percent-encoded.
pub fn endpoint(base: &str, segments: &[&str]) -> Result<Url, Box<dyn Error>> {
    let mut url = Url::parse(base)?;
    url.path_segments_mut()
        .map_err(|_| format!("invalid base URL: {base}"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Decode a success body, or turn the daemon's `{"error": ...}` into an error.
pub async fn json_or_error<T: DeserializeOwned>(resp: Response) -> Result<T, Box<dyn Error>> {
    if resp.status().is_success() {
        return Ok(resp.json().await?);
    }
    Err(error_message(resp).await.into())
}

pub async fn error_message(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("error")
            .and_then(|e| e.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {status}")),
        Err(_) => format!("HTTP {status}"),
    }
}

pub fn format_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{v:.precision$}"),
        None => "-".to_string(),
    }
}
