//! Typed view of a seed document.
//!
//! [`parse`] is total: malformed input degrades to missing header fields and an
//! empty (or partial) block map. Deciding whether that is acceptable is the
//! validator's job.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::macros::format_description;
use time::Date;

use crate::tokenizer::{self, RawBlock};

time::serde::format_description!(seed_date, Date, "[year]-[month]-[day]");

pub const CORE_BLOCK: &str = "CORE";
pub const SELF_BLOCK: &str = "SELF";
pub const STATE_BLOCK: &str = "STATE";
pub const BONDS_BLOCK: &str = "BONDS";
pub const MEM_BLOCK: &str = "MEM";

/// Blocks every accepted document must carry, in canonical spelling.
pub const REQUIRED_BLOCKS: [&str; 5] =
    [CORE_BLOCK, SELF_BLOCK, STATE_BLOCK, BONDS_BLOCK, MEM_BLOCK];

/// Localized block spellings, `(alias, canonical)`.
const BLOCK_ALIASES: [(&str, &str); 7] = [
    ("KERN", CORE_BLOCK),
    ("BEZIEHUNGEN", BONDS_BLOCK),
    ("TRAEUME", "DREAMS"),
    ("INTERESSEN", "INTERESTS"),
    ("VERBINDUNGEN", "CONNECTIONS"),
    ("SCHATTEN", "SHADOW"),
    ("WACHSTUM", "GROWTH"),
];

/// Canonical spelling of a block name; unknown names are returned as-is.
#[must_use]
pub fn canonical_block_name(name: &str) -> &str {
    BLOCK_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, canonical)| *canonical)
}

/// Every accepted spelling of a canonical block name, canonical first.
#[must_use]
pub fn block_spellings(canonical: &str) -> Vec<&str> {
    let mut spellings = vec![canonical];
    spellings.extend(
        BLOCK_ALIASES
            .iter()
            .filter(|(_, target)| *target == canonical)
            .map(|(alias, _)| *alias),
    );
    spellings
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HeaderMarker {
    Born,
    Condensed,
    Sessions,
}

impl HeaderMarker {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "born" | "geboren" => Some(Self::Born),
            "condensed" | "verdichtet" => Some(Self::Condensed),
            "sessions" | "sitzungen" => Some(Self::Sessions),
            _ => None,
        }
    }
}

/// Parse a `YYYY-MM-DD` date, `None` when malformed or not a calendar date.
#[must_use]
pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Protocol tag of the first line, e.g. `SEED`.
    pub protocol: Option<String>,
    /// Schema version without the leading `v`.
    pub version: Option<String>,
    #[serde(with = "seed_date::option")]
    pub created_at: Option<Date>,
    #[serde(with = "seed_date::option")]
    pub last_consolidated: Option<Date>,
    pub session_count: Option<u32>,
}

impl Header {
    fn parse(region: &str) -> Self {
        let mut header = Self::default();
        for line in region.lines() {
            let mut tokens = line.split_whitespace().peekable();
            while let Some(token) = tokens.next() {
                let Some(token) = token.strip_prefix('#') else {
                    continue;
                };
                if let Some((marker, value)) = token.split_once(':') {
                    match HeaderMarker::parse(&marker.to_ascii_lowercase()) {
                        Some(HeaderMarker::Born) => header.created_at = parse_date(value),
                        Some(HeaderMarker::Condensed) => {
                            header.last_consolidated = parse_date(value);
                        }
                        Some(HeaderMarker::Sessions) => {
                            header.session_count = value.trim().parse().ok();
                        }
                        None => {}
                    }
                } else if header.protocol.is_none() && !token.is_empty() {
                    header.protocol = Some(token.to_string());
                    if let Some(version) = tokens.peek().copied().and_then(version_token) {
                        header.version = Some(version.to_string());
                        tokens.next();
                    }
                }
            }
        }
        header
    }
}

fn version_token(token: &str) -> Option<&str> {
    let version = token.strip_prefix('v').or_else(|| token.strip_prefix('V'))?;
    version
        .chars()
        .next()
        .filter(char::is_ascii_digit)
        .map(|_| version)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Core,
    Active,
    Archive,
}

impl MemoryTier {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Core => "core",
            Self::Active => "active",
            Self::Archive => "archive",
        }
    }

    /// Accepts both localized spellings, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "core" | "kern" => Some(Self::Core),
            "active" | "aktiv" => Some(Self::Active),
            "archive" | "archiv" => Some(Self::Archive),
            _ => None,
        }
    }
}

pub const DEFAULT_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub tier: MemoryTier,
    /// False when the line carried no recognizable `[tier...]` tag.
    pub tagged: bool,
    pub confidence: f64,
    pub recurrence: u32,
    #[serde(with = "seed_date::option")]
    pub date: Option<Date>,
    pub content: String,
    pub raw: String,
}

impl MemoryEntry {
    fn parse(line: &str) -> Self {
        let mut entry = Self {
            tier: MemoryTier::Active,
            tagged: false,
            confidence: DEFAULT_CONFIDENCE,
            recurrence: 0,
            date: None,
            content: String::new(),
            raw: line.to_string(),
        };

        // An unrecognized `[...]` prefix stays part of the content.
        let rest = match tokenizer::split_tag(line) {
            Some((tag, rest)) if entry.apply_tag(tag) => rest,
            _ => line,
        };

        let rest = rest.trim();
        let dated = tokenizer::date_token_candidates(rest)
            .into_iter()
            .find_map(|range| parse_date(&rest[range.clone()]).map(|date| (date, range)));
        entry.content = match dated {
            Some((date, range)) => {
                entry.date = Some(date);
                if range.start == 0 {
                    let after = &rest[range.end..];
                    after.strip_prefix('.').unwrap_or(after).trim().to_string()
                } else {
                    rest.to_string()
                }
            }
            None => rest.to_string(),
        };
        entry
    }

    /// Returns false, leaving the entry untouched, when the tag names no tier.
    fn apply_tag(&mut self, tag: &str) -> bool {
        let mut facets = tokenizer::split_facets(tag);
        let Some(tier) = facets.next().and_then(MemoryTier::parse) else {
            return false;
        };
        self.tier = tier;
        self.tagged = true;
        for facet in facets.map(tokenizer::split_key_value) {
            match facet.key {
                "c" => {
                    if let Ok(confidence) = facet.value.parse::<f64>() {
                        if confidence.is_finite() {
                            self.confidence = confidence.clamp(0.0, 1.0);
                        }
                    }
                }
                "r" => {
                    if let Ok(recurrence) = facet.value.parse() {
                        self.recurrence = recurrence;
                    }
                }
                _ => {}
            }
        }
        true
    }

    /// Identity used to follow an entry across versions.
    #[must_use]
    pub fn identity(&self) -> (Option<Date>, &str) {
        (self.date, self.content.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub key: String,
    pub value: String,
}

impl Entry {
    /// Numbered keys (`1`, `2`, ...) form the ordered core-values list.
    #[must_use]
    pub fn is_numbered(&self) -> bool {
        !self.key.is_empty() && self.key.bytes().all(|byte| byte.is_ascii_digit())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "snake_case")]
pub enum BlockBody {
    Entries(Vec<Entry>),
    Memories(Vec<MemoryEntry>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Spelling used in the document.
    pub name: String,
    pub canonical: String,
    pub raw_content: String,
    pub body: BlockBody,
}

impl Block {
    fn parse(raw: &RawBlock<'_>) -> Self {
        let canonical = canonical_block_name(raw.name);
        let lines = raw.body.lines().map(str::trim).filter(|line| !line.is_empty());
        let body = if canonical == MEM_BLOCK {
            BlockBody::Memories(lines.map(MemoryEntry::parse).collect())
        } else {
            BlockBody::Entries(
                lines
                    .flat_map(tokenizer::facets)
                    .map(|facet| Entry {
                        key: facet.key.to_string(),
                        value: facet.value.to_string(),
                    })
                    .collect(),
            )
        };
        Self {
            name: raw.name.to_string(),
            canonical: canonical.to_string(),
            raw_content: raw.body.to_string(),
            body,
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[Entry] {
        match &self.body {
            BlockBody::Entries(entries) => entries,
            BlockBody::Memories(_) => &[],
        }
    }

    #[must_use]
    pub fn memories(&self) -> &[MemoryEntry] {
        match &self.body {
            BlockBody::Memories(memories) => memories,
            BlockBody::Entries(_) => &[],
        }
    }

    /// First value stored under any of `keys`.
    #[must_use]
    pub fn value_of(&self, keys: &[&str]) -> Option<&str> {
        self.entries()
            .iter()
            .find(|entry| keys.contains(&entry.key.as_str()))
            .map(|entry| entry.value.as_str())
    }

    #[must_use]
    pub fn numbered_entries(&self) -> Vec<&Entry> {
        self.entries().iter().filter(|entry| entry.is_numbered()).collect()
    }

    /// Content with per-line whitespace and blank lines removed; two blocks
    /// are unchanged when this matches.
    #[must_use]
    pub fn normalized(&self) -> String {
        self.raw_content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub header: Header,
    /// Keyed by canonical block name.
    pub blocks: BTreeMap<String, Block>,
    pub unterminated_blocks: Vec<String>,
    pub size_bytes: usize,
}

impl Document {
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&Block> {
        self.blocks.get(canonical_block_name(name))
    }

    #[must_use]
    pub fn has_block(&self, name: &str) -> bool {
        self.block(name).is_some()
    }

    #[must_use]
    pub fn memories(&self) -> &[MemoryEntry] {
        self.block(MEM_BLOCK).map(Block::memories).unwrap_or_default()
    }
}

/// Parse seed text. Never fails; the first occurrence of a block wins when a
/// block appears twice (including under both of its spellings).
#[must_use]
pub fn parse(text: &str) -> Document {
    let scan = tokenizer::scan_blocks(text);
    let mut blocks = BTreeMap::new();
    for raw in &scan.blocks {
        let block = Block::parse(raw);
        blocks.entry(block.canonical.clone()).or_insert(block);
    }
    Document {
        header: Header::parse(scan.header),
        blocks,
        unterminated_blocks: scan.unterminated.iter().map(ToString::to_string).collect(),
        size_bytes: text.len(),
    }
}


#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use time::macros::date;

    use super::fixtures::VALID_SEED;
    use super::*;

    // Test IDs: TDOC-001
    #[test]
    fn parses_header_fields() {
        let document = parse(VALID_SEED);
        assert_eq!(document.header.protocol.as_deref(), Some("SEED"));
        assert_eq!(document.header.version.as_deref(), Some("0.3"));
        assert_eq!(document.header.created_at, Some(date!(2025 - 11 - 02)));
        assert_eq!(document.header.last_consolidated, Some(date!(2026 - 02 - 18)));
        assert_eq!(document.header.session_count, Some(42));
        assert_eq!(document.size_bytes, VALID_SEED.len());
    }

    // Test IDs: TDOC-002
    #[test]
    fn localized_header_and_block_spellings_are_equivalent() {
        let document = parse(
            "#SAAT v0.2\n#geboren:2025-01-01 #verdichtet:2025-02-01 #sitzungen:7\n@KERN{\n1:a\n}\n@BEZIEHUNGEN{\nx:y\n}",
        );
        assert_eq!(document.header.created_at, Some(date!(2025 - 01 - 01)));
        assert_eq!(document.header.last_consolidated, Some(date!(2025 - 02 - 01)));
        assert_eq!(document.header.session_count, Some(7));
        assert!(document.has_block("CORE"));
        assert!(document.has_block("KERN"));
        assert!(document.has_block("BONDS"));
        assert_eq!(
            document.block("CORE").map(|block| block.name.as_str()),
            Some("KERN")
        );
        assert_eq!(block_spellings("CORE"), vec!["CORE", "KERN"]);
    }

    // Test IDs: TDOC-003
    #[test]
    fn entries_split_into_facets_and_numbered_keys() {
        let document = parse(VALID_SEED);
        let core = document
            .block("CORE")
            .unwrap_or_else(|| panic!("CORE block missing"));
        assert_eq!(core.numbered_entries().len(), 3);

        let state = document
            .block("STATE")
            .unwrap_or_else(|| panic!("STATE block missing"));
        assert_eq!(state.value_of(&["state"]), Some("calm,curious"));
        assert_eq!(state.value_of(&["energy"]), Some("0.6"));
    }

    // Test IDs: TDOC-004
    #[test]
    fn memory_tags_dates_and_defaults() {
        let document = parse(VALID_SEED);
        let memories = document.memories();
        assert_eq!(memories.len(), 4);

        assert_eq!(memories[0].tier, MemoryTier::Core);
        assert!(memories[0].tagged);
        assert!((memories[0].confidence - 0.95).abs() < f64::EPSILON);
        assert_eq!(memories[0].recurrence, 4);
        assert_eq!(memories[0].date, Some(date!(2025 - 11 - 02)));
        assert_eq!(memories[0].content, "birth:first_conversation");

        assert!((memories[2].confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
        assert_eq!(memories[2].recurrence, 0);
        assert_eq!(memories[3].tier, MemoryTier::Archive);
    }

    // Test IDs: TDOC-005
    #[test]
    fn untagged_and_unknown_tier_lines_are_untagged_active() {
        let document = parse("@MEM{\n2026-01-01.loose:line\n[someday]2026-01-02.odd:tag\n[aktiv|c:7]x\n}");
        let memories = document.memories();
        assert_eq!(memories.len(), 3);
        assert!(!memories[0].tagged);
        assert_eq!(memories[0].tier, MemoryTier::Active);
        assert!(!memories[1].tagged);
        assert_eq!(memories[1].content, "[someday]2026-01-02.odd:tag");
        assert_eq!(memories[1].date, Some(date!(2026-01-02)));
        assert!(memories[2].tagged);
        assert!((memories[2].confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(memories[2].date, None);
    }

    // Test IDs: TDOC-006
    #[test]
    fn garbage_degrades_to_empty_document() {
        let document = parse("}}} not a seed {{{ @@");
        assert!(document.blocks.is_empty());
        assert_eq!(document.header.version, None);
        assert_eq!(document.header.session_count, None);
    }

    // Test IDs: TDOC-007
    #[test]
    fn first_block_occurrence_wins_and_truncation_is_reported() {
        let document = parse("@CORE{\n1:first\n}\n@KERN{\n1:second\n}\n@MEM{\n[core]x");
        let core = document
            .block("CORE")
            .unwrap_or_else(|| panic!("CORE block missing"));
        assert_eq!(core.value_of(&["1"]), Some("first"));
        assert_eq!(document.unterminated_blocks, vec!["MEM".to_string()]);
        assert!(!document.has_block("MEM"));
    }

    proptest! {
        // Test IDs: TDOC-P01
        #[test]
        fn parse_is_total(text in "\\PC{0,400}") {
            let document = parse(&text);
            prop_assert_eq!(document.size_bytes, text.len());
        }

        // Test IDs: TDOC-P02
        #[test]
        fn parse_is_total_on_seed_shaped_noise(text in "[#@A-Z{}\\[\\]|:.0-9a-z \n-]{0,300}") {
            let document = parse(&text);
            for memory in document.memories() {
                prop_assert!((0.0..=1.0).contains(&memory.confidence));
            }
        }
    }
}
