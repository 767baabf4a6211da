//! Fleet error types.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Error returned by every fleet operation.
///
/// The payload carries the details a caller needs to retry differently,
/// e.g. the `suggested` port for a port conflict.
#[derive(Debug)]
pub struct FleetError {
    payload: HashMap<String, String>,
    kind: ErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Server id is not in the roster
    ServerNotFound,
    /// Server process is alive
    ServerRunning,
    /// Server process is not alive
    ServerNotRunning,
    /// Server name is taken (case-insensitive)
    NameUnavailable,
    /// Port is within the spacing window of another server
    PortUnavailable,
    /// Settings failed validation
    InvalidSettings,
    /// No delayed stop to cancel
    NoPendingStop,
    /// A deployment job is already running
    DeployInProgress,
    /// A server file update is already running
    UpdateInProgress,
    /// A shared component is not installed
    ComponentMissing,
    /// Configuration error
    Config,
    /// File system error
    Io,
    /// Network error
    Network,
    /// GitHub API error
    GitHub,
    /// Process control error
    Process,
    /// Deployment failed
    Deploy,
    /// A background task panicked
    TaskPanicked,
    /// General error
    Other,
}

impl ErrorKind {
    pub fn code(&self) -> u32 {
        match self {
            Self::ServerNotFound => 1001,
            Self::ServerRunning => 1002,
            Self::ServerNotRunning => 1003,
            Self::NameUnavailable => 1004,
            Self::PortUnavailable => 1005,
            Self::InvalidSettings => 1006,
            Self::NoPendingStop => 1007,
            Self::Config => 2001,
            Self::Io => 2002,
            Self::Network => 2003,
            Self::GitHub => 2004,
            Self::Process => 3001,
            Self::DeployInProgress => 4001,
            Self::UpdateInProgress => 4002,
            Self::ComponentMissing => 4003,
            Self::Deploy => 4004,
            Self::TaskPanicked => 4005,
            Self::Other => 9999,
        }
    }
}

impl FleetError {
    pub fn new(kind: ErrorKind, payload: HashMap<String, String>) -> Self {
        Self { payload, kind }
    }

    /// Create an error with a single "detail" key from a non-empty string,
    /// or an empty payload if the string is empty.
    fn with_detail(kind: ErrorKind, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        let payload = if detail.is_empty() {
            HashMap::new()
        } else {
            HashMap::from([("detail".to_string(), detail)])
        };
        Self::new(kind, payload)
    }

    pub fn server_not_found(id: u32) -> Self {
        Self::new(
            ErrorKind::ServerNotFound,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn server_running(id: u32) -> Self {
        Self::new(
            ErrorKind::ServerRunning,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn server_not_running(id: u32) -> Self {
        Self::new(
            ErrorKind::ServerNotRunning,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn name_unavailable(name: &str) -> Self {
        Self::new(
            ErrorKind::NameUnavailable,
            HashMap::from([("name".to_string(), name.to_string())]),
        )
    }

    pub fn port_unavailable(port: u16, suggested: Option<u16>) -> Self {
        let mut payload = HashMap::from([("port".to_string(), port.to_string())]);
        if let Some(suggested) = suggested {
            payload.insert("suggested".to_string(), suggested.to_string());
        }
        Self::new(ErrorKind::PortUnavailable, payload)
    }

    pub fn invalid_settings(field: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::InvalidSettings,
            HashMap::from([
                ("field".to_string(), field.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn no_pending_stop(id: u32) -> Self {
        Self::new(
            ErrorKind::NoPendingStop,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn deploy_in_progress(current: &str) -> Self {
        Self::new(
            ErrorKind::DeployInProgress,
            HashMap::from([("current".to_string(), current.to_string())]),
        )
    }

    pub fn update_in_progress(id: u32) -> Self {
        Self::new(
            ErrorKind::UpdateInProgress,
            HashMap::from([("id".to_string(), id.to_string())]),
        )
    }

    pub fn component_missing(name: &str) -> Self {
        Self::new(
            ErrorKind::ComponentMissing,
            HashMap::from([("component".to_string(), name.to_string())]),
        )
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Config, message)
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Io, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Network, message)
    }

    pub fn network_with_url(url: &str, detail: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Network,
            HashMap::from([
                ("url".to_string(), url.to_string()),
                ("detail".to_string(), detail.into()),
            ]),
        )
    }

    pub fn github(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::GitHub, message)
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Process, message)
    }

    pub fn deploy(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Deploy, message)
    }

    pub fn task_panicked(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::TaskPanicked, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::with_detail(ErrorKind::Other, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn detail(&self, key: &str) -> Option<&str> {
        self.payload.get(key).map(String::as_str)
    }

    /// Human-readable text: the `detail` entry when present, else the full rendering.
    pub fn message(&self) -> String {
        self.detail("detail")
            .map_or_else(|| self.to_string(), str::to_string)
    }

    /// Port a caller can retry with after a port conflict.
    pub fn suggested_port(&self) -> Option<u16> {
        self.detail("suggested").and_then(|p| p.parse().ok())
    }
}

impl fmt::Display for FleetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.payload.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            let mut pairs: Vec<String> = self
                .payload
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect();
            pairs.sort();
            write!(f, "{:?}: {}", self.kind, pairs.join(", "))
        }
    }
}

impl std::error::Error for FleetError {}

impl Serialize for FleetError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct as _;
        let mut s = serializer.serialize_struct("FleetError", 2)?;
        s.serialize_field("code", &self.kind.code())?;
        s.serialize_field("payload", &self.payload)?;
        s.end()
    }
}

impl From<std::io::Error> for FleetError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<toml::de::Error> for FleetError {
    fn from(err: toml::de::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<toml::ser::Error> for FleetError {
    fn from(err: toml::ser::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<reqwest::Error> for FleetError {
    fn from(err: reqwest::Error) -> Self {
        Self::network(err.to_string())
    }
}

impl From<zip::result::ZipError> for FleetError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::io(err.to_string())
    }
}

impl From<walkdir::Error> for FleetError {
    fn from(err: walkdir::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(err: serde_json::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, FleetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict_carries_suggestion() {
        let err = FleetError::port_unavailable(27016, Some(27019));
        assert_eq!(err.kind(), ErrorKind::PortUnavailable);
        assert_eq!(err.suggested_port(), Some(27019));
        assert_eq!(
            err.to_string(),
            "PortUnavailable: port=27016, suggested=27019"
        );
    }

    #[test]
    fn serializes_code_and_payload() {
        let err = FleetError::deploy_in_progress("Release");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], 4001);
        assert_eq!(json["payload"]["current"], "Release");
    }

    #[test]
    fn empty_detail_has_empty_payload() {
        let err = FleetError::other("");
        assert_eq!(err.to_string(), "Other");
        assert!(err.detail("detail").is_none());
    }
}
