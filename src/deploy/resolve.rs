use std::collections::BTreeSet;

use crate::component::{Component, DeployKind};

/// Map missing component names to the jobs that fix them, in dependency order.
///
/// A server redeploy is appended when a component the servers are built from
/// is reinstalled and there are servers to redeploy. An unrecognized name
/// resolves to `[All]`.
pub fn resolve_targets(missing: &[String], server_count: usize) -> Vec<DeployKind> {
    let mut kinds = BTreeSet::new();
    for name in missing {
        match Component::from_display_name(name) {
            Some(component) => {
                kinds.insert(DeployKind::from(component));
            }
            None => {
                log::warn!("Unknown missing component {:?}, deploying everything", name);
                return vec![DeployKind::All];
            }
        }
    }

    let feeds_servers = kinds
        .iter()
        .filter_map(|k| k.component())
        .any(Component::feeds_servers);
    if feeds_servers && server_count > 0 {
        kinds.insert(DeployKind::Servers);
    }
    kinds.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn orders_by_dependency_and_redeploys_servers() {
        let targets = resolve_targets(&names(&["BepInEx", "SteamCMD", "Stationeers Release"]), 2);
        assert_eq!(
            targets,
            vec![
                DeployKind::SteamCmd,
                DeployKind::Release,
                DeployKind::BepInEx,
                DeployKind::Servers
            ]
        );
    }

    #[test]
    fn steamcmd_alone_does_not_touch_servers() {
        assert_eq!(
            resolve_targets(&names(&["SteamCMD"]), 3),
            vec![DeployKind::SteamCmd]
        );
    }

    #[test]
    fn no_servers_means_no_redeploy() {
        assert_eq!(resolve_targets(&names(&["SCON"]), 0), vec![DeployKind::ConsoleTool]);
    }

    #[test]
    fn unknown_name_falls_back_to_all() {
        assert_eq!(
            resolve_targets(&names(&["SCON", "Mystery Tool"]), 1),
            vec![DeployKind::All]
        );
    }

    #[test]
    fn nothing_missing_resolves_to_nothing() {
        assert!(resolve_targets(&[], 5).is_empty());
    }
}
