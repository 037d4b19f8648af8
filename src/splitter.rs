//! Boundary-aware HTML chunking.
//!
//! A document is first cut into Blocks, each ending at the closing tag of a
//! block-level element. Blocks are then packed greedily into Chunks no
//! longer than a character bound. Concatenating the chunks in order always
//! reproduces the input exactly.

use regex::Regex;
use std::sync::OnceLock;

/// Default chunk bound, in characters.
pub const DEFAULT_MAX_CHARS: usize = 5000;

/// Blocks at or below this length are never cut, whatever the bound.
/// Cutting inside a short element only produces fragments the service
/// cannot translate coherently.
pub const MIN_SUBDIVIDE_CHARS: usize = 256;

/// A whitespace cut is only taken if it lies past this fraction of the window.
const MIN_CUT_FRACTION: f64 = 0.6;

static BLOCK_CLOSE_REGEX: OnceLock<Regex> = OnceLock::new();

fn block_close_regex() -> &'static Regex {
    BLOCK_CLOSE_REGEX.get_or_init(|| {
        Regex::new(
            r"(?i)</\s*(?:p|div|section|article|header|footer|aside|nav|main|ul|ol|li|dl|dt|dd|h[1-6]|blockquote|pre|figure|figcaption|table|thead|tbody|tfoot|tr|td|th)\s*>",
        )
        .unwrap()
    })
}

/// Split raw HTML into ordered Blocks.
///
/// Each block runs up to and including a block-level closing tag. Whatever
/// follows the last closing tag becomes a trailing block. Input without any
/// recognised closing tag is a single block; empty input has no blocks.
pub fn split_blocks(html: &str) -> Vec<String> {
    let mut blocks = Vec::new();
    let mut last = 0;

    for m in block_close_regex().find_iter(html) {
        blocks.push(html[last..m.end()].to_string());
        last = m.end();
    }

    if last < html.len() {
        blocks.push(html[last..].to_string());
    }

    blocks
}

/// Pack Blocks into Chunks of at most `max_chars` characters.
///
/// Blocks are accumulated greedily; the running chunk is flushed when the
/// next block would overflow it. A block longer than both `max_chars` and
/// [`MIN_SUBDIVIDE_CHARS`] is cut into pieces (see [`subdivide`]). A block
/// too short to subdivide but longer than the bound becomes a chunk of its
/// own, which is the only way a chunk can exceed `max_chars`.
pub fn assemble_chunks(blocks: &[String], max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for block in blocks {
        let block_len = block.chars().count();

        if block_len > max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if block_len > MIN_SUBDIVIDE_CHARS {
                chunks.extend(subdivide(block, max_chars));
            } else {
                chunks.push(block.clone());
            }
            continue;
        }

        if current_len + block_len > max_chars && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
            current_len = 0;
        }

        current.push_str(block);
        current_len += block_len;
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Split HTML into translation-sized chunks.
pub fn chunk_html(html: &str, max_chars: usize) -> Vec<String> {
    assemble_chunks(&split_blocks(html), max_chars)
}

/// Cut one oversized block into pieces of at most `max_chars` characters.
///
/// Each cut goes right after the last whitespace in the `max_chars` window
/// that sits outside a tag, provided it lies past 60% of the window.
/// Otherwise the cut is made at exactly `max_chars` so unbroken text still
/// makes progress.
fn subdivide(block: &str, max_chars: usize) -> Vec<String> {
    let min_cut = (max_chars as f64 * MIN_CUT_FRACTION) as usize;
    let mut pieces = Vec::new();
    let mut rest = block;

    while rest.chars().count() > max_chars {
        let cut = whitespace_cut(rest, max_chars, min_cut)
            .unwrap_or_else(|| byte_offset_of_char(rest, max_chars));
        pieces.push(rest[..cut].to_string());
        rest = &rest[cut..];
    }

    if !rest.is_empty() {
        pieces.push(rest.to_string());
    }

    pieces
}

/// Byte offset just past the last usable whitespace within the first
/// `max_chars` characters, if that whitespace is at char index > `min_cut`.
fn whitespace_cut(text: &str, max_chars: usize, min_cut: usize) -> Option<usize> {
    let mut in_tag = false;
    let mut best: Option<(usize, usize)> = None;

    for (char_idx, (byte_idx, c)) in text.char_indices().take(max_chars).enumerate() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if c.is_whitespace() && !in_tag => best = Some((char_idx, byte_idx + c.len_utf8())),
            _ => {}
        }
    }

    best.filter(|&(char_idx, _)| char_idx > min_cut)
        .map(|(_, byte_end)| byte_end)
}

fn byte_offset_of_char(text: &str, char_count: usize) -> usize {
    text.char_indices()
        .nth(char_count)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
