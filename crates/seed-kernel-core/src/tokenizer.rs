//! Explicit tokenizer for the seed text format.
//!
//! Separator semantics are fixed and kept here in one place:
//! - `@NAME{ ... }` opens a block; braces nest and the block ends at the matching `}`.
//! - `|` splits a block line into facets.
//! - the first `:` of a facet splits key from value (later colons belong to the value).
//! - a memory line may open with a bracketed tag `[tier|c:0.NN|r:N]`.
//! - a date token is `YYYY-MM-DD` not glued to other digits.

use std::ops::Range;

/// A `@NAME{...}` region found by [`scan_blocks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawBlock<'a> {
    pub name: &'a str,
    pub body: &'a str,
    /// Byte range of `body` inside the scanned text.
    pub body_range: Range<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockScan<'a> {
    /// Everything before the first block opening.
    pub header: &'a str,
    pub blocks: Vec<RawBlock<'a>>,
    /// Blocks whose opening brace is never closed (truncated output).
    pub unterminated: Vec<&'a str>,
}

/// One facet of a block line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facet<'a> {
    pub key: &'a str,
    /// Empty when the facet carried no colon.
    pub value: &'a str,
}

fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_'
}

/// Position of the next `@NAME{` at or after `from`, as `(at, open_brace)`.
fn next_block_opening(bytes: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut index = from;
    while index < bytes.len() {
        let at_line_start = index == 0 || bytes[index - 1].is_ascii_whitespace();
        if bytes[index] == b'@' && at_line_start {
            let name_start = index + 1;
            let mut name_end = name_start;
            while name_end < bytes.len() && is_name_byte(bytes[name_end]) {
                name_end += 1;
            }
            if name_end > name_start && bytes.get(name_end) == Some(&b'{') {
                return Some((index, name_end));
            }
        }
        index += 1;
    }
    None
}

fn matching_brace(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0_usize;
    for (offset, byte) in bytes[open..].iter().enumerate() {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

/// Split text into the header region and its balanced-brace blocks.
///
/// Scanning stops at the first unterminated block: its name is reported in
/// [`BlockScan::unterminated`] and the remaining text is not interpreted.
#[must_use]
pub fn scan_blocks(text: &str) -> BlockScan<'_> {
    let bytes = text.as_bytes();
    let mut blocks = Vec::new();
    let mut unterminated = Vec::new();
    let mut header_end = text.len();
    let mut cursor = 0;

    while let Some((at, open)) = next_block_opening(bytes, cursor) {
        if blocks.is_empty() && unterminated.is_empty() {
            header_end = at;
        }
        let name = &text[at + 1..open];
        let Some(close) = matching_brace(bytes, open) else {
            unterminated.push(name);
            break;
        };
        blocks.push(RawBlock {
            name,
            body: &text[open + 1..close],
            body_range: open + 1..close,
        });
        cursor = close + 1;
    }

    BlockScan {
        header: &text[..header_end],
        blocks,
        unterminated,
    }
}

/// Non-empty, trimmed facets of one line.
pub fn split_facets(line: &str) -> impl Iterator<Item = &str> {
    line.split('|').map(str::trim).filter(|facet| !facet.is_empty())
}

#[must_use]
pub fn split_key_value(facet: &str) -> Facet<'_> {
    match facet.split_once(':') {
        Some((key, value)) => Facet {
            key: key.trim(),
            value: value.trim(),
        },
        None => Facet {
            key: facet.trim(),
            value: "",
        },
    }
}

#[must_use]
pub fn facets(line: &str) -> Vec<Facet<'_>> {
    split_facets(line).map(split_key_value).collect()
}

/// Split a leading `[...]` tag off a line, returning `(tag_inner, rest)`.
#[must_use]
pub fn split_tag(line: &str) -> Option<(&str, &str)> {
    let after_open = line.trim_start().strip_prefix('[')?;
    let close = after_open.find(']')?;
    Some((&after_open[..close], &after_open[close + 1..]))
}

fn looks_like_date(bytes: &[u8]) -> bool {
    bytes.len() == 10
        && bytes.iter().enumerate().all(|(index, byte)| match index {
            4 | 7 => *byte == b'-',
            _ => byte.is_ascii_digit(),
        })
}

/// Byte offsets of every `YYYY-MM-DD` shaped token, in order of appearance.
///
/// Shape only: calendar validity is checked by the caller.
#[must_use]
pub fn date_token_candidates(text: &str) -> Vec<Range<usize>> {
    let bytes = text.as_bytes();
    let mut found = Vec::new();
    if bytes.len() < 10 {
        return found;
    }
    let mut start = 0;
    while start + 10 <= bytes.len() {
        let end = start + 10;
        let glued_before = start > 0 && bytes[start - 1].is_ascii_digit();
        let glued_after = bytes.get(end).is_some_and(u8::is_ascii_digit);
        if !glued_before && !glued_after && looks_like_date(&bytes[start..end]) {
            found.push(start..end);
            start = end;
        } else {
            start += 1;
        }
    }
    found
}
