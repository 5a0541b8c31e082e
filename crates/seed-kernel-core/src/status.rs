use serde::{Deserialize, Serialize};

use crate::document::{self, Document, SELF_BLOCK, STATE_BLOCK};

const DEFAULT_NAME: &str = "Soul";
const UNKNOWN: &str = "unknown";

/// Operator-facing summary of a seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedStatus {
    pub name: String,
    pub version: Option<String>,
    pub born: String,
    pub sessions: u32,
    pub model: String,
    pub state: String,
    pub mood: String,
    pub seed_size: usize,
}

fn first_value<'a>(document: &'a Document, keys: &[&str]) -> Option<&'a str> {
    document
        .blocks
        .values()
        .find_map(|block| block.value_of(keys))
        .filter(|value| !value.is_empty())
}

#[must_use]
pub fn summarize(text: &str) -> SeedStatus {
    let document = document::parse(text);

    let name = document
        .block(SELF_BLOCK)
        .and_then(|block| block.value_of(&["name"]))
        .or_else(|| first_value(&document, &["project", "projekt"]))
        .filter(|value| !value.is_empty())
        .unwrap_or(DEFAULT_NAME)
        .to_string();
    let state = document
        .block(STATE_BLOCK)
        .and_then(|block| block.value_of(&["state", "zustand"]))
        .or_else(|| first_value(&document, &["state", "zustand"]))
        .unwrap_or_default()
        .to_string();
    let mood = state.split(',').next().unwrap_or_default().trim().to_string();

    SeedStatus {
        name,
        version: document.header.version.clone(),
        born: document
            .header
            .created_at
            .map_or_else(|| UNKNOWN.to_string(), |date| date.to_string()),
        sessions: document.header.session_count.unwrap_or(0),
        model: first_value(&document, &["model", "modell"])
            .unwrap_or(UNKNOWN)
            .to_string(),
        state,
        mood,
        seed_size: document.size_bytes,
    }
}
