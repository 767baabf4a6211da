use std::fs;
use std::io::Write as _;
use std::path::Path;

use futures_util::StreamExt as _;
use reqwest::Client;

use crate::error::{FleetError, Result};
use crate::github::USER_AGENT;

/// Download `url` to `dest`, calling `on_progress(downloaded, total)` after every chunk.
/// `total` is 0 when the server does not send a content length.
pub async fn download_file<F>(client: &Client, url: &str, dest: &Path, mut on_progress: F) -> Result<u64>
where
    F: FnMut(u64, u64) + Send,
{
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| FleetError::io(e.to_string()))?;
    }

    let resp = client
        .get(url)
        .header("User-Agent", USER_AGENT)
        .send()
        .await
        .map_err(|e| FleetError::network_with_url(url, e.to_string()))?;

    if !resp.status().is_success() {
        return Err(FleetError::network_with_url(url, resp.status().to_string()));
    }

    let total = resp.content_length().unwrap_or(0);
    let mut file = fs::File::create(dest).map_err(|e| FleetError::io(e.to_string()))?;
    let mut downloaded = 0u64;
    on_progress(0, total);

    let mut stream = resp.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| FleetError::network_with_url(url, e.to_string()))?;
        file.write_all(&chunk)
            .map_err(|e| FleetError::io(e.to_string()))?;
        downloaded += chunk.len() as u64;
        on_progress(downloaded, total);
    }

    file.flush().map_err(|e| FleetError::io(e.to_string()))?;
    log::info!("Downloaded {} ({} bytes) to {}", url, downloaded, dest.display());
    Ok(downloaded)
}
