use std::fmt;

use serde::{Deserialize, Serialize};

/// A shared piece of software the servers are deployed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Component {
    SteamCmd,
    Release,
    Beta,
    BepInEx,
    LaunchPad,
    ConsoleTool,
}

impl Component {
    /// Human-readable name, also used in missing-component reports.
    pub fn display_name(self) -> &'static str {
        match self {
            Self::SteamCmd => "SteamCMD",
            Self::Release => "Stationeers Release",
            Self::Beta => "Stationeers Beta",
            Self::BepInEx => "BepInEx",
            Self::LaunchPad => "Stationeers LaunchPad",
            Self::ConsoleTool => "SCON",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.display_name().eq_ignore_ascii_case(name.trim()))
    }

    /// All components in install order.
    pub fn all() -> &'static [Self] {
        &[
            Self::SteamCmd,
            Self::Release,
            Self::Beta,
            Self::BepInEx,
            Self::LaunchPad,
            Self::ConsoleTool,
        ]
    }

    /// Whether server files are built from this component.
    pub fn feeds_servers(self) -> bool {
        !matches!(self, Self::SteamCmd)
    }
}

/// One orchestrated deployment job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeployKind {
    SteamCmd,
    Release,
    Beta,
    BepInEx,
    LaunchPad,
    ConsoleTool,
    /// Redeploy the files of every managed server.
    Servers,
    /// Every component followed by a server redeploy.
    All,
}

impl DeployKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SteamCmd => "SteamCmd",
            Self::Release => "Release",
            Self::Beta => "Beta",
            Self::BepInEx => "BepInEx",
            Self::LaunchPad => "LaunchPad",
            Self::ConsoleTool => "ConsoleTool",
            Self::Servers => "Servers",
            Self::All => "All",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let all = [
            Self::SteamCmd,
            Self::Release,
            Self::Beta,
            Self::BepInEx,
            Self::LaunchPad,
            Self::ConsoleTool,
            Self::Servers,
            Self::All,
        ];
        all.into_iter().find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
    }

    pub fn component(self) -> Option<Component> {
        match self {
            Self::SteamCmd => Some(Component::SteamCmd),
            Self::Release => Some(Component::Release),
            Self::Beta => Some(Component::Beta),
            Self::BepInEx => Some(Component::BepInEx),
            Self::LaunchPad => Some(Component::LaunchPad),
            Self::ConsoleTool => Some(Component::ConsoleTool),
            Self::Servers | Self::All => None,
        }
    }

    /// The single-step jobs this kind runs, in dependency order.
    pub fn steps(self) -> Vec<Self> {
        match self {
            Self::All => vec![
                Self::SteamCmd,
                Self::Release,
                Self::Beta,
                Self::BepInEx,
                Self::LaunchPad,
                Self::ConsoleTool,
                Self::Servers,
            ],
            other => vec![other],
        }
    }
}

impl From<Component> for DeployKind {
    fn from(component: Component) -> Self {
        match component {
            Component::SteamCmd => Self::SteamCmd,
            Component::Release => Self::Release,
            Component::Beta => Self::Beta,
            Component::BepInEx => Self::BepInEx,
            Component::LaunchPad => Self::LaunchPad,
            Component::ConsoleTool => Self::ConsoleTool,
        }
    }
}

impl fmt::Display for DeployKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_expands_in_dependency_order() {
        let steps = DeployKind::All.steps();
        assert_eq!(steps.first(), Some(&DeployKind::SteamCmd));
        assert_eq!(steps.last(), Some(&DeployKind::Servers));
        assert!(steps.iter().all(|k| *k != DeployKind::All));
        assert_eq!(DeployKind::Beta.steps(), vec![DeployKind::Beta]);
    }

    #[test]
    fn component_names_round_trip() {
        for component in Component::all() {
            assert_eq!(
                Component::from_display_name(component.display_name()),
                Some(*component)
            );
            assert_eq!(DeployKind::from(*component).component(), Some(*component));
        }
        assert_eq!(Component::from_display_name("bepinex"), Some(Component::BepInEx));
        assert_eq!(Component::from_display_name("RocketStation"), None);
    }

    #[test]
    fn parses_kind_names_case_insensitively() {
        assert_eq!(DeployKind::parse("release"), Some(DeployKind::Release));
        assert_eq!(DeployKind::parse("ALL"), Some(DeployKind::All));
        assert_eq!(DeployKind::parse("nope"), None);
    }
}
