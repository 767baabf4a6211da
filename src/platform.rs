use std::env::consts::OS;

use crate::github::GitHubAsset;

pub fn server_executable_name() -> &'static str {
    if OS == "windows" {
        "rocketstation_DedicatedServer.exe"
    } else {
        "rocketstation_DedicatedServer.x86_64"
    }
}

pub fn steamcmd_executable_name() -> &'static str {
    if OS == "windows" {
        "steamcmd.exe"
    } else {
        "steamcmd.sh"
    }
}

pub fn steamcmd_download_url() -> &'static str {
    if OS == "windows" {
        "https://steamcdn-a.akamaihd.net/client/installer/steamcmd.zip"
    } else {
        "https://steamcdn-a.akamaihd.net/client/installer/steamcmd_linux.tar.gz"
    }
}

/// Find the BepInEx asset built for this platform.
pub fn find_bepinex_asset(assets: &[GitHubAsset]) -> Option<&GitHubAsset> {
    let marker = if OS == "windows" { "win_x64" } else { "linux_x64" };
    assets.iter().find(|asset| {
        let name = asset.name.to_lowercase();
        name.contains(marker) && name.ends_with(".zip") && !asset.browser_download_url.is_empty()
    })
}

/// First `.zip` asset with a download URL.
pub fn find_zip_asset(assets: &[GitHubAsset]) -> Option<&GitHubAsset> {
    assets.iter().find(|asset| {
        asset.name.to_lowercase().ends_with(".zip") && !asset.browser_download_url.is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> GitHubAsset {
        GitHubAsset {
            name: name.to_string(),
            browser_download_url: format!("https://example.invalid/{name}"),
            size: 1,
        }
    }

    #[test]
    fn picks_platform_bepinex_zip() {
        let assets = [
            asset("BepInEx_win_x86_5.4.23.zip"),
            asset("BepInEx_linux_x64_5.4.23.zip"),
            asset("BepInEx_win_x64_5.4.23.zip"),
            asset("BepInEx_linux_x64_5.4.23.tar.gz"),
        ];
        let picked = find_bepinex_asset(&assets).unwrap();
        if OS == "windows" {
            assert_eq!(picked.name, "BepInEx_win_x64_5.4.23.zip");
        } else {
            assert_eq!(picked.name, "BepInEx_linux_x64_5.4.23.zip");
        }
    }

    #[test]
    fn zip_asset_skips_other_formats() {
        let assets = [asset("notes.txt"), asset("SCON.ZIP")];
        assert_eq!(find_zip_asset(&assets).unwrap().name, "SCON.ZIP");
        assert!(find_zip_asset(&assets[..1]).is_none());
    }
}
