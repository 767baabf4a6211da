use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::{FleetError, Result};

pub const USER_AGENT: &str = "stationeers-fleet";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

/// Wrap a URL with the GitHub proxy prefix.
/// If proxy is empty, returns the original URL unchanged.
/// Proxy wraps the full original URL, e.g. `https://cdn.gh-proxy.org/https://api.github.com/...`.
pub fn wrap_with_proxy(proxy: &str, url: &str) -> String {
    let proxy = proxy.trim();
    if proxy.is_empty() {
        url.to_string()
    } else {
        let base = proxy.trim_end_matches('/');
        format!("{}/{}", base, url)
    }
}

/// API URL of the latest release of `repo` (`owner/name`).
pub fn latest_release_api_url(proxy: &str, repo: &str) -> String {
    let raw = format!("https://api.github.com/repos/{}/releases/latest", repo);
    wrap_with_proxy(proxy, &raw)
}

/// Archive URL of a branch head, used when a repo has no usable release asset.
pub fn branch_archive_url(proxy: &str, repo: &str, branch: &str) -> String {
    let raw = format!(
        "https://github.com/{}/archive/refs/heads/{}.zip",
        repo, branch
    );
    wrap_with_proxy(proxy, &raw)
}

pub async fn fetch_latest_release(client: &Client, proxy: &str, repo: &str) -> Result<GitHubRelease> {
    let url = latest_release_api_url(proxy, repo);
    let resp = client
        .get(&url)
        .header("User-Agent", USER_AGENT)
        .header("Accept", "application/vnd.github.v3+json")
        .send()
        .await
        .map_err(|e| FleetError::github(format!("Failed to fetch release of {}: {}", repo, e)))?;

    if !resp.status().is_success() {
        return Err(FleetError::github(format!(
            "GitHub API returned status {} for {}",
            resp.status(),
            repo
        )));
    }

    resp.json::<GitHubRelease>()
        .await
        .map_err(|e| FleetError::github(format!("Failed to parse release of {}: {}", repo, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_prefixes_full_url() {
        assert_eq!(
            latest_release_api_url("https://proxy.example/", "BepInEx/BepInEx"),
            "https://proxy.example/https://api.github.com/repos/BepInEx/BepInEx/releases/latest"
        );
        assert_eq!(
            wrap_with_proxy("  ", "https://github.com/a/b"),
            "https://github.com/a/b"
        );
    }

    #[test]
    fn branch_archive_points_at_heads() {
        assert_eq!(
            branch_archive_url("", "StationeersLaunchPad/StationeersLaunchPad", "main"),
            "https://github.com/StationeersLaunchPad/StationeersLaunchPad/archive/refs/heads/main.zip"
        );
    }

    #[test]
    fn release_parses_without_optional_fields() {
        let json = r#"{"tag_name":"v1.0","assets":[{"name":"a.zip","browser_download_url":"u"}]}"#;
        let release: GitHubRelease = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v1.0");
        assert_eq!(release.assets[0].size, 0);
    }
}
