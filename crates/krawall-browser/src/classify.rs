//! Engine.IO/Socket.IO frame-pattern classifier (spec.md §4.10, component
//! C10). Runs over whatever frames discovery captured, with no network
//! access of its own — pure pattern matching so it can be unit tested
//! without a browser.

use std::collections::HashSet;

use krawall_core::{CapturedFrame, DetectedProtocol, SocketIoConfig};

/// Engine.IO packet type prefixes (protocol v3/v4): open, close, ping,
/// pong, message, upgrade, noop.
const ENGINE_IO_PREFIXES: &[char] = &['0', '1', '2', '3', '4', '5', '6'];

/// Minimum number of distinct Engine.IO/Socket.IO signals required before
/// frame-pattern alone classifies a connection as Socket.IO (spec.md
/// §4.10 step 3) — a single matching frame is too weak a signal on its
/// own, since an arbitrary JSON payload can start with a digit.
const MIN_DISTINCT_SIGNALS: usize = 2;

/// Classifies a widget connection to `page_url` producing `frames` as raw
/// or Socket.IO (spec.md §4.10): the page URL is checked first (path
/// segment or `EIO` query parameter), then a captured open handshake
/// frame, then frame-pattern voting, with raw WebSocket as the fallback.
pub fn classify(page_url: &str, frames: &[CapturedFrame]) -> (DetectedProtocol, Option<SocketIoConfig>) {
    let open_frame = frames
        .iter()
        .find(|frame| frame.data.starts_with('0') && frame.data.len() > 1 && parse_open_frame(&frame.data[1..]).is_some());

    if let Some(frame) = open_frame {
        let config = parse_open_frame(&frame.data[1..]).unwrap_or_else(|| SocketIoConfig::defaults(4));
        return (DetectedProtocol::SocketIo, Some(config));
    }

    if url_looks_like_socket_io(page_url) {
        return (DetectedProtocol::SocketIo, Some(SocketIoConfig::defaults(4)));
    }

    if count_distinct_signals(frames) >= MIN_DISTINCT_SIGNALS {
        return (DetectedProtocol::SocketIo, Some(SocketIoConfig::defaults(4)));
    }

    (DetectedProtocol::Raw, None)
}

/// Step 1 of spec.md §4.10: the page's own URL names the protocol when
/// its path contains a `socket.io` segment or it carries an `EIO` query
/// parameter (the Engine.IO protocol-version param every client sends).
fn url_looks_like_socket_io(page_url: &str) -> bool {
    let Ok(url) = url::Url::parse(page_url) else {
        return false;
    };
    if url.path().contains("socket.io") {
        return true;
    }
    url.query_pairs().any(|(key, _)| key == "EIO")
}

/// Counts how many distinct Engine.IO/Socket.IO signal kinds appear among
/// `frames`: ping, pong, an event frame, a connect frame, or noop.
fn count_distinct_signals(frames: &[CapturedFrame]) -> usize {
    let mut signals: HashSet<&'static str> = HashSet::new();
    for frame in frames {
        let data = frame.data.as_str();
        if data == "2" {
            signals.insert("ping");
        } else if data == "3" {
            signals.insert("pong");
        } else if data.starts_with("42[") {
            signals.insert("event");
        } else if data == "40" || data.starts_with("40/") {
            signals.insert("connect");
        } else if data == "6" {
            signals.insert("noop");
        } else if data.chars().next().is_some_and(|c| ENGINE_IO_PREFIXES.contains(&c)) && data.len() > 1 {
            // Unrecognized but Engine.IO-shaped payload; not itself a signal
            // kind, but keeps the fallback from misclassifying raw JSON that
            // merely starts with a digit as Socket.IO on its own.
        }
    }
    signals.len()
}

fn parse_open_frame(payload: &str) -> Option<SocketIoConfig> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    Some(SocketIoConfig {
        sid: value.get("sid")?.as_str()?.to_string(),
        ping_interval: value.get("pingInterval").and_then(|v| v.as_u64()).unwrap_or(25_000),
        ping_timeout: value.get("pingTimeout").and_then(|v| v.as_u64()).unwrap_or(20_000),
        engine_io_version: 4,
    })
}
