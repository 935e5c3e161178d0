//! Single-pass parsers for the generated outline and illustration blocks.
//!
//! Both grammars are a repeated `## <Marker>` heading followed by
//! `Field: value` lines. A heading flushes the record in progress (when its
//! identifying field is non-empty) and opens a new one; end of input flushes
//! the last record. Lines that match no known prefix are ignored.

use crate::adventure::{Episode, Illustration};

const EPISODE_MARKER: &str = "## Episode";
const ILLUSTRATION_MARKER: &str = "## Illustration";

/// Strip `prefix` and the whitespace that follows it.
fn field<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.strip_prefix(prefix).map(str::trim)
}

/// Parse the outline response into episodes, in source order.
pub fn parse_episodes(content: &str) -> Vec<Episode> {
    let mut episodes = Vec::new();
    let mut current = Episode::default();

    for line in content.lines().map(str::trim) {
        if line.starts_with(EPISODE_MARKER) {
            let finished = std::mem::take(&mut current);
            if !finished.title.is_empty() {
                episodes.push(finished);
            }
            current.title = line.trim_start_matches("## ").to_string();
        } else if let Some(value) = field(line, "Summary:") {
            current.summary = value.to_string();
        } else if let Some(value) = field(line, "Tagline:") {
            current.tagline = value.to_string();
        } else if let Some(value) = field(line, "Location:") {
            current.location = value.to_string();
        } else if let Some(value) = field(line, "Characters:") {
            current.characters = value
                .split(", ")
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    if !current.title.is_empty() {
        episodes.push(current);
    }
    episodes
}

/// Parse an illustration response into descriptors, in source order.
pub fn parse_illustrations(content: &str) -> Vec<Illustration> {
    let mut illustrations = Vec::new();
    let mut current = Illustration::default();

    for line in content.lines().map(str::trim) {
        if line.starts_with(ILLUSTRATION_MARKER) {
            let finished = std::mem::take(&mut current);
            if !finished.description.is_empty() {
                illustrations.push(finished);
            }
        } else if let Some(value) = field(line, "Description:") {
            current.description = value.to_string();
        } else if let Some(value) = field(line, "Style:") {
            current.style = value.to_string();
        } else if let Some(value) = field(line, "Type:") {
            current.is_map = value.to_lowercase().contains("map");
        }
    }

    if !current.description.is_empty() {
        illustrations.push(current);
    }
    illustrations
}
