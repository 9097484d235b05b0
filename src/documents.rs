//! Filesystem document loader.
//!
//! Walks a directory of `.md` and `.txt` files and splits each body into
//! paragraph-boundary fragments, the pre-chunked inputs the store
//! ingests. Chunk boundaries are greedy: paragraphs are packed into a
//! fragment until the char budget is hit; an oversized paragraph is
//! hard-split at whitespace.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;
use walkdir::WalkDir;

use crate::models::{FragmentInput, SourceDescriptor};

/// Default char budget per fragment.
pub const DEFAULT_FRAGMENT_CHARS: usize = 1000;

/// Load every supported file under `dir` into fragment inputs.
///
/// Unsupported extensions are skipped silently; unreadable files are
/// skipped with a log line. An absent directory yields no fragments.
pub fn load_documents(dir: &Path, max_chars: usize) -> Result<Vec<FragmentInput>> {
    let mut inputs = Vec::new();
    if !dir.exists() {
        return Ok(inputs);
    }

    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.with_context(|| format!("failed to walk {}", dir.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("md") | Some("txt") => {}
            _ => continue,
        }

        let name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        let body = match std::fs::read_to_string(path) {
            Ok(b) => b,
            Err(e) => {
                debug!(file = %path.display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        inputs.extend(split_fragments(&name, &body, max_chars));
    }

    Ok(inputs)
}

/// Split a document body into fragment inputs on paragraph boundaries.
/// Sub-indices are contiguous starting at 0.
pub fn split_fragments(name: &str, body: &str, max_chars: usize) -> Vec<FragmentInput> {
    let max_chars = max_chars.max(1);
    let mut pieces: Vec<String> = Vec::new();
    let mut buf = String::new();

    for para in body.split("\n\n") {
        let trimmed = para.trim();
        if trimmed.is_empty() {
            continue;
        }

        let would_be = if buf.is_empty() {
            trimmed.len()
        } else {
            buf.len() + 2 + trimmed.len()
        };
        if would_be > max_chars && !buf.is_empty() {
            pieces.push(std::mem::take(&mut buf));
        }

        if trimmed.len() > max_chars {
            if !buf.is_empty() {
                pieces.push(std::mem::take(&mut buf));
            }
            let mut remaining = trimmed;
            while !remaining.is_empty() {
                let split_at = floor_char_boundary(remaining, remaining.len().min(max_chars));
                let mut cut = if split_at < remaining.len() {
                    // Cut past the whitespace char, which may be wider
                    // than one byte (NBSP, ideographic space).
                    remaining[..split_at]
                        .rfind(char::is_whitespace)
                        .map(|pos| {
                            pos + remaining[pos..]
                                .chars()
                                .next()
                                .map(char::len_utf8)
                                .unwrap_or(1)
                        })
                        .unwrap_or(split_at)
                } else {
                    split_at
                };
                if cut == 0 {
                    // Budget smaller than the first char; take it whole.
                    cut = remaining.chars().next().map(char::len_utf8).unwrap_or(1);
                }
                pieces.push(remaining[..cut].trim().to_string());
                remaining = &remaining[cut..];
            }
        } else {
            if !buf.is_empty() {
                buf.push_str("\n\n");
            }
            buf.push_str(trimmed);
        }
    }

    if !buf.is_empty() {
        pieces.push(buf);
    }

    pieces
        .into_iter()
        .filter(|p| !p.is_empty())
        .enumerate()
        .map(|(i, text)| {
            FragmentInput::new(text, SourceDescriptor::local(name)).with_sub_index(i as u32)
        })
        .collect()
}

fn floor_char_boundary(s: &str, mut idx: usize) -> usize {
    while idx > 0 && !s.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}
