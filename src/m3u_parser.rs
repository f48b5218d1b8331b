//! M3U playlist parser
//!
//! Turns `#EXTINF` + URL line pairs into [`Channel`] records. Parsing is
//! total: malformed lines are skipped, never reported.

use crate::models::Channel;

/// Upper bound on channels taken from one playlist
pub const MAX_CHANNELS: usize = 1000;

pub const DEFAULT_GROUP: &str = "General";
pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// Metadata collected from an `#EXTINF` line, waiting for its URL
#[derive(Debug, Clone)]
struct PendingEntry {
    name: String,
    group: String,
    logo: Option<String>,
}

/// Parser state
#[derive(Debug)]
enum ParseState {
    AwaitingMetadata,
    AwaitingUrl(PendingEntry),
}

/// Parse M3U content with the default channel cap
pub fn parse_m3u(content: &str) -> Vec<Channel> {
    parse_m3u_capped(content, MAX_CHANNELS)
}

/// Parse M3U content, stopping as soon as `cap` channels have been emitted
pub fn parse_m3u_capped(content: &str, cap: usize) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut state = ParseState::AwaitingMetadata;
    let mut next_id: u32 = 1;

    if cap == 0 {
        return channels;
    }

    for line in content.lines() {
        let line = line.trim();

        if line.starts_with("#EXTINF:") {
            // A second metadata line simply replaces the pending one
            state = ParseState::AwaitingUrl(parse_extinf(line));
        } else if line.starts_with("http") {
            let ParseState::AwaitingUrl(entry) =
                std::mem::replace(&mut state, ParseState::AwaitingMetadata)
            else {
                continue;
            };

            let id = next_id;
            next_id += 1;

            let name = if entry.name.is_empty() {
                format!("Channel {}", id)
            } else {
                entry.name
            };

            channels.push(
                Channel::new(
                    id,
                    name,
                    format!("{} channel", entry.group),
                    line,
                    entry.group,
                )
                .with_logo(entry.logo),
            );

            if channels.len() >= cap {
                tracing::debug!(cap, "Channel cap reached, ignoring rest of playlist");
                break;
            }
        }
    }

    channels
}

fn parse_extinf(line: &str) -> PendingEntry {
    let name = match line.rfind(',') {
        Some(pos) => line[pos + 1..].trim().to_string(),
        None => UNKNOWN_CHANNEL.to_string(),
    };

    let group = extract_quoted_attr(line, "group-title")
        .filter(|g| !g.is_empty())
        .unwrap_or_else(|| DEFAULT_GROUP.to_string());

    let logo = extract_quoted_attr(line, "tvg-logo").filter(|l| !l.is_empty());

    PendingEntry { name, group, logo }
}

/// Value of the first `name="..."` occurrence on the line (exact, case-sensitive)
fn extract_quoted_attr(line: &str, name: &str) -> Option<String> {
    let needle = format!("{}=\"", name);
    let start = line.find(&needle)? + needle.len();
    let rest = &line[start..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
#[path = "m3u_parser_tests.rs"]
mod tests;
