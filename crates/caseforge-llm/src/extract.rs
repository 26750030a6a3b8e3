//! JSON extraction from raw model output.
//!
//! Models often wrap JSON in markdown fences or lead with reasoning
//! prose. Extraction tries three strategies in order:
//!
//! 1. The **last** markdown-fenced block whose contents parse as JSON.
//! 2. The **last** `{` or `[` whose tail parses as JSON (JSON at the end
//!    of the text).
//! 3. The **first** `{` or `[` whose balanced bracket slice parses
//!    (JSON followed by trailing prose).
//!
//! Each candidate is tried verbatim first, then with trailing commas
//! stripped (a common model error). If every strategy fails, the raw
//! text is surfaced in the error so it can be fed back to the model.
//! Reasoning text before the JSON is preserved separately, for logging
//! only.

use crate::error::LlmError;

/// A successful extraction: the parsed value plus any reasoning text the
/// model emitted before the JSON.
#[derive(Debug, Clone)]
pub struct Extraction {
    /// The parsed JSON payload.
    pub value: serde_json::Value,
    /// Text preceding the JSON, kept for logging only.
    pub preamble: Option<String>,
}

/// Extract a JSON value from raw model output.
///
/// # Errors
///
/// Returns [`LlmError::Parse`] carrying the raw text when no strategy
/// yields parseable JSON.
pub fn extract_json(raw: &str) -> Result<Extraction, LlmError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(LlmError::Parse {
            message: String::from("model returned empty text"),
            raw: String::new(),
        });
    }

    // Strategy 1: last fenced block that parses.
    for (start, content) in fenced_blocks(trimmed).into_iter().rev() {
        if let Some(value) = try_parse_candidate(content) {
            return Ok(Extraction {
                value,
                preamble: preamble_before(trimmed, start),
            });
        }
    }

    // Strategy 2: last bracket whose tail parses (JSON ends the text).
    let brackets: Vec<usize> = trimmed
        .char_indices()
        .filter(|&(_, c)| c == '{' || c == '[')
        .map(|(i, _)| i)
        .collect();
    for &pos in brackets.iter().rev() {
        if let Some(tail) = trimmed.get(pos..)
            && let Some(value) = try_parse_candidate(tail.trim_end())
        {
            return Ok(Extraction {
                value,
                preamble: preamble_before(trimmed, pos),
            });
        }
    }

    // Strategy 3: first bracket whose balanced slice parses (JSON with
    // trailing prose).
    for &pos in &brackets {
        if let Some(slice) = balanced_slice(trimmed, pos)
            && let Some(value) = try_parse_candidate(slice)
        {
            return Ok(Extraction {
                value,
                preamble: preamble_before(trimmed, pos),
            });
        }
    }

    Err(LlmError::Parse {
        message: String::from("no JSON found in model response"),
        raw: String::from(trimmed),
    })
}

/// Try a candidate slice verbatim, then with trailing commas stripped.
fn try_parse_candidate(candidate: &str) -> Option<serde_json::Value> {
    if let Ok(value) = serde_json::from_str(candidate) {
        return Some(value);
    }
    let cleaned = strip_trailing_commas(candidate);
    serde_json::from_str(&cleaned).ok()
}

/// Text before byte offset `start`, trimmed; `None` when blank.
fn preamble_before(text: &str, start: usize) -> Option<String> {
    let head = text.get(..start)?.trim();
    if head.is_empty() {
        None
    } else {
        Some(String::from(head))
    }
}

/// Collect all markdown-fenced blocks as (start offset, contents).
///
/// Handles both ```` ```json ```` and bare ```` ``` ```` fences; the
/// language tag line is excluded from the contents.
fn fenced_blocks(text: &str) -> Vec<(usize, &str)> {
    let mut blocks = Vec::new();
    let mut cursor = 0usize;

    while let Some(rel_open) = text.get(cursor..).and_then(|s| s.find("```")) {
        let open = cursor.saturating_add(rel_open);
        let after_fence = open.saturating_add(3);
        // Content starts after the fence's language-tag line.
        let content_start = text
            .get(after_fence..)
            .and_then(|s| s.find('\n'))
            .map_or(after_fence, |nl| {
                after_fence.saturating_add(nl).saturating_add(1)
            });
        let Some(rel_close) = text.get(content_start..).and_then(|s| s.find("```")) else {
            break;
        };
        let close = content_start.saturating_add(rel_close);
        if let Some(content) = text.get(content_start..close) {
            blocks.push((open, content.trim()));
        }
        cursor = close.saturating_add(3);
    }

    blocks
}

/// Slice from `start` to the matching close bracket, honoring strings
/// and escapes. Returns `None` when brackets never balance.
fn balanced_slice(text: &str, start: usize) -> Option<&str> {
    let mut depth: u32 = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text.get(start..)?.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth = depth.saturating_add(1),
            '}' | ']' if !in_string => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    let end = start.saturating_add(offset).saturating_add(c.len_utf8());
                    return text.get(start..end);
                }
            }
            _ => {}
        }
    }

    None
}

/// Strip trailing commas before closing braces and brackets (common
/// model error).
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    let mut i = 0;
    while i < len {
        let c = chars.get(i).copied().unwrap_or(' ');
        if c == ',' {
            // Look ahead past whitespace for } or ]
            let mut j = i.saturating_add(1);
            while j < len && chars.get(j).copied().unwrap_or(' ').is_whitespace() {
                j = j.saturating_add(1);
            }
            let next = chars.get(j).copied().unwrap_or(' ');
            if next == '}' || next == ']' {
                i = i.saturating_add(1);
                continue;
            }
        }
        result.push(c);
        i = i.saturating_add(1);
    }

    result
}
