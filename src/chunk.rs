use serde::Serialize;

use crate::errors::ChunkOverflow;

/// How far back (in chars) the character splitter searches for a whitespace
/// boundary before giving up and cutting exactly at the size limit.
pub const WHITESPACE_LOOKBACK: usize = 120;

/// A bounded piece of one document, tagged with its position and the
/// Markdown header context it was found under.
#[derive(Debug, Clone, Serialize)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    pub header_path: Vec<String>,
    pub char_count: usize,
    pub word_count: usize,
    pub source: String,
}

impl Chunk {
    /// Metadata dictionary stored alongside the chunk text.
    pub fn metadata(&self) -> serde_json::Value {
        serde_json::json!({
            "headers": self.header_path.join("; "),
            "chunk_index": self.index,
            "char_count": self.char_count,
            "word_count": self.word_count,
            "source": self.source,
        })
    }
}

/// Splits `text` into chunks of at most `max_size` characters.
///
/// Level-1 headers are split on unconditionally; `##` and `###` splits and
/// finally character-count splits are applied only to pieces still over the
/// limit. A header line consumed at a split point moves into the chunk's
/// header path and out of its body.
pub fn chunk_markdown(
    text: &str,
    source: &str,
    max_size: usize,
) -> Result<Vec<Chunk>, ChunkOverflow> {
    assert!(max_size > 0, "max_size must be positive");

    let mut pieces: Vec<(String, Vec<String>)> = Vec::new();
    let mut path: Vec<String> = Vec::new();

    let (preamble, sections) = split_at_headers(text, 1);
    fit_or_descend(&preamble, 2, max_size, &mut path, &mut pieces);
    for (header, body) in sections {
        path.push(header);
        fit_or_descend(&body, 2, max_size, &mut path, &mut pieces);
        path.pop();
    }

    let mut chunks = Vec::with_capacity(pieces.len());
    for (index, (body, header_path)) in pieces.into_iter().enumerate() {
        let char_count = body.chars().count();
        if char_count > max_size {
            return Err(ChunkOverflow {
                source_url: source.to_owned(),
                index,
                char_count,
                max_size,
            });
        }
        chunks.push(Chunk {
            index,
            word_count: body.split_whitespace().count(),
            char_count,
            text: body,
            header_path,
            source: source.to_owned(),
        });
    }

    Ok(chunks)
}

/// Emits `text` as a single piece when it fits, otherwise splits at headers
/// of `level` (then deeper levels, then by characters).
fn fit_or_descend(
    text: &str,
    level: usize,
    max_size: usize,
    path: &mut Vec<String>,
    out: &mut Vec<(String, Vec<String>)>,
) {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return;
    }
    if trimmed.chars().count() <= max_size {
        out.push((trimmed.to_owned(), path.clone()));
        return;
    }
    if level > 3 {
        split_by_chars(trimmed, max_size, path, out);
        return;
    }

    let (preamble, sections) = split_at_headers(text, level);
    if sections.is_empty() {
        fit_or_descend(text, level + 1, max_size, path, out);
        return;
    }

    fit_or_descend(&preamble, level + 1, max_size, path, out);
    for (header, body) in sections {
        path.push(header);
        fit_or_descend(&body, level + 1, max_size, path, out);
        path.pop();
    }
}

/// Splits `text` at lines that are exactly `level`-deep ATX headers.
///
/// Returns the text before the first such header and, per header, its title
/// with the body that follows it (up to the next same-level header).
fn split_at_headers(text: &str, level: usize) -> (String, Vec<(String, String)>) {
    let mut header_starts: Vec<usize> = Vec::new();
    let mut offset = 0usize;
    for line in text.split_inclusive('\n') {
        if header_title(line, level).is_some() {
            header_starts.push(offset);
        }
        offset += line.len();
    }

    let Some(&first) = header_starts.first() else {
        return (text.to_owned(), Vec::new());
    };

    let preamble = text[..first].to_owned();
    let mut sections = Vec::with_capacity(header_starts.len());
    for (i, &start) in header_starts.iter().enumerate() {
        let end = header_starts.get(i + 1).copied().unwrap_or(text.len());
        let segment = &text[start..end];
        let (header_line, body) = match segment.find('\n') {
            Some(nl) => (&segment[..nl], &segment[nl + 1..]),
            None => (segment, ""),
        };
        let title = header_title(header_line, level)
            .unwrap_or_default()
            .to_owned();
        sections.push((title, body.to_owned()));
    }

    (preamble, sections)
}

/// Returns the title of `line` when it is an ATX header of exactly `level`.
fn header_title(line: &str, level: usize) -> Option<&str> {
    let mut rest = line;
    for _ in 0..level {
        rest = rest.strip_prefix('#')?;
    }
    if rest.starts_with('#') {
        return None;
    }
    let title = rest.strip_prefix(' ')?.trim();
    if title.is_empty() { None } else { Some(title) }
}

/// Cuts `text` into contiguous slices of at most `max_size` chars, preferring
/// the nearest whitespace within [`WHITESPACE_LOOKBACK`] of the limit.
fn split_by_chars(
    text: &str,
    max_size: usize,
    path: &[String],
    out: &mut Vec<(String, Vec<String>)>,
) {
    let chars: Vec<char> = text.chars().collect();
    let mut start = 0usize;

    while start < chars.len() {
        if chars.len() - start <= max_size {
            push_piece(&chars[start..], path, out);
            break;
        }

        let hard = start + max_size;
        let floor = hard.saturating_sub(WHITESPACE_LOOKBACK).max(start + 1);
        let cut = (floor..=hard).rev().find(|&i| chars[i].is_whitespace());
        match cut {
            Some(i) => {
                push_piece(&chars[start..i], path, out);
                start = i + 1;
            }
            None => {
                push_piece(&chars[start..hard], path, out);
                start = hard;
            }
        }
    }
}

fn push_piece(chars: &[char], path: &[String], out: &mut Vec<(String, Vec<String>)>) {
    let piece: String = chars.iter().collect();
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push((piece.to_owned(), path.to_vec()));
    }
}
