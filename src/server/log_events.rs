//! Recognizes the game's log lines that change supervisor state.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// The world finished loading and the server accepts clients.
    Ready,
    Paused,
    Resumed,
    ClientReady { name: String, steam_id: String },
    ClientLeft { name: String, steam_id: String },
    Chat { name: String, message: String },
    /// Startup failed in a way the process will not recover from.
    Fatal(String),
}

const READY_MARKERS: &[&str] = &["started server", "rocketnet succesfully hosted"];
const PAUSED_MARKERS: &[&str] = &["server paused", "game is paused"];
const RESUMED_MARKERS: &[&str] = &["server resumed", "game is resumed"];
const FATAL_MARKERS: &[&str] = &["no such world name"];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Split an `HH:MM:SS` prefix off the line. Returns the rest and whether a
/// colon directly followed the timestamp.
fn strip_timestamp(line: &str) -> Option<(&str, bool)> {
    let bytes = line.as_bytes();
    if bytes.len() < 8 {
        return None;
    }
    let digits_ok = [0, 1, 3, 4, 6, 7]
        .iter()
        .all(|&i| bytes[i].is_ascii_digit());
    if !digits_ok || bytes[2] != b':' || bytes[5] != b':' {
        return None;
    }
    let mut rest = &line[8..];
    let colon = rest.starts_with(':');
    if colon {
        rest = &rest[1..];
    }
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some((rest.trim_start(), colon))
}

fn parse_client_ready(body: &str) -> Option<LogEvent> {
    let inner = body.strip_prefix("Client ")?.trim_end().strip_suffix("is ready")?;
    let inner = inner.trim_end();
    let inner = inner.strip_suffix(')')?;
    let open = inner.rfind('(')?;
    let name = inner[..open].trim();
    let steam_id = inner[open + 1..].trim();
    if name.is_empty() || steam_id.is_empty() {
        return None;
    }
    Some(LogEvent::ClientReady {
        name: name.to_string(),
        steam_id: steam_id.to_string(),
    })
}

fn parse_client_left(body: &str) -> Option<LogEvent> {
    let rest = body.strip_prefix("Client disconnected:")?.trim_start();
    let (steam_id, rest) = rest.split_once('|')?;
    let name = rest
        .split_once("connectTime")
        .map_or(rest, |(name, _)| name)
        .trim();
    let steam_id = steam_id.trim();
    if steam_id.is_empty() {
        return None;
    }
    Some(LogEvent::ClientLeft {
        name: name.to_string(),
        steam_id: steam_id.to_string(),
    })
}

fn parse_chat(body: &str) -> Option<LogEvent> {
    let (name, message) = body.split_once(':')?;
    let name = name.trim();
    let message = message.trim();
    if name.is_empty() || message.is_empty() {
        return None;
    }
    Some(LogEvent::Chat {
        name: name.to_string(),
        message: message.to_string(),
    })
}

pub fn classify(line: &str) -> Option<LogEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let stamped = strip_timestamp(line);
    if let Some((body, _)) = stamped {
        if let Some(event) = parse_client_ready(body).or_else(|| parse_client_left(body)) {
            return Some(event);
        }
    }

    let lower = line.to_lowercase();
    if contains_any(&lower, FATAL_MARKERS) {
        return Some(LogEvent::Fatal(line.to_string()));
    }
    if contains_any(&lower, READY_MARKERS) {
        return Some(LogEvent::Ready);
    }
    if contains_any(&lower, PAUSED_MARKERS) {
        return Some(LogEvent::Paused);
    }
    if contains_any(&lower, RESUMED_MARKERS) {
        return Some(LogEvent::Resumed);
    }

    match stamped {
        Some((body, true)) => parse_chat(body),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_markers() {
        assert_eq!(classify("Started server on port 27016"), Some(LogEvent::Ready));
        assert_eq!(
            classify("12:00:01: RocketNet Succesfully hosted with Address: 0.0.0.0"),
            Some(LogEvent::Ready)
        );
    }

    #[test]
    fn pause_and_resume() {
        assert_eq!(classify("12:01:00: Server Paused"), Some(LogEvent::Paused));
        assert_eq!(classify("game is resumed"), Some(LogEvent::Resumed));
    }

    #[test]
    fn client_ready_line() {
        assert_eq!(
            classify("14:02:11: Client Jon Doe (76561198000000001) is ready"),
            Some(LogEvent::ClientReady {
                name: "Jon Doe".to_string(),
                steam_id: "76561198000000001".to_string(),
            })
        );
    }

    #[test]
    fn client_disconnect_line() {
        assert_eq!(
            classify(
                "14:05:00: Client disconnected: 76561198000000001 | Jon Doe connectTime: 120.5s, ClientId: 3"
            ),
            Some(LogEvent::ClientLeft {
                name: "Jon Doe".to_string(),
                steam_id: "76561198000000001".to_string(),
            })
        );
    }

    #[test]
    fn chat_requires_stamped_colon() {
        assert_eq!(
            classify("14:06:00: Jon: hello there: all"),
            Some(LogEvent::Chat {
                name: "Jon".to_string(),
                message: "hello there: all".to_string(),
            })
        );
        assert_eq!(classify("14:06:00 Jon: hello"), None);
        assert_eq!(classify("Jon: hello"), None);
    }

    #[test]
    fn unknown_world_is_fatal() {
        assert!(matches!(
            classify("Error: no such world name 'Titan'"),
            Some(LogEvent::Fatal(_))
        ));
    }

    #[test]
    fn noise_is_ignored() {
        assert_eq!(classify(""), None);
        assert_eq!(classify("Loading assemblies"), None);
    }
}
