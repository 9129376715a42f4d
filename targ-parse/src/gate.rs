//! Build-gate detection.
//!
//! A file participates iff its header region contains an inner `#![cfg(...)]`
//! attribute whose predicate mentions the gate token as a bare identifier.
//! The header region is the run of lines preceding the first line that is
//! neither blank, a comment, nor an inner attribute, so gatedness is
//! answered without a full parse.

/// Returns true when `src` carries the build gate for `token`.
pub fn source_is_gated(src: &str, token: &str) -> bool {
    let mut in_block_comment = false;
    for line in src.lines() {
        let trimmed = line.trim();
        if in_block_comment {
            if let Some(rest) = close_of_block(trimmed) {
                in_block_comment = false;
                if rest.starts_with("#![") && is_gate_attribute(rest, token) {
                    return true;
                }
                if !is_header_line(rest) {
                    return false;
                }
            }
            continue;
        }
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        if trimmed.starts_with("/*") {
            match close_of_block(&trimmed[2..]) {
                None => in_block_comment = true,
                Some(rest) => {
                    if rest.starts_with("#![") && is_gate_attribute(rest, token) {
                        return true;
                    }
                    if !is_header_line(rest) {
                        return false;
                    }
                }
            }
            continue;
        }
        if trimmed.starts_with("#![") {
            if is_gate_attribute(trimmed, token) {
                return true;
            }
            continue;
        }
        // First real item line ends the header region.
        return false;
    }
    false
}

fn close_of_block(line: &str) -> Option<&str> {
    line.find("*/").map(|i| line[i + 2..].trim())
}

fn is_header_line(trimmed: &str) -> bool {
    trimmed.is_empty()
        || trimmed.starts_with("//")
        || trimmed.starts_with("/*")
        || trimmed.starts_with("#![")
}

/// Matches `#![cfg(<pred>)]` where `<pred>` mentions `token` as a bare
/// identifier, including inside `any(...)` / `all(...)` combinators.
fn is_gate_attribute(line: &str, token: &str) -> bool {
    let rest = match line.strip_prefix("#![") {
        Some(r) => r,
        None => return false,
    };
    let rest = rest.trim_start();
    let pred = match rest.strip_prefix("cfg") {
        Some(p) => p.trim_start(),
        None => return false,
    };
    let Some(open) = pred.strip_prefix('(') else {
        return false;
    };
    let Some(close) = open.rfind(')') else {
        return false;
    };
    mentions_ident(&open[..close], token)
}

/// True when `text` contains `word` delimited by non-identifier characters.
fn mentions_ident(text: &str, word: &str) -> bool {
    if word.is_empty() {
        return false;
    }
    let is_ident = |c: char| c.is_alphanumeric() || c == '_';
    let mut start = 0;
    while let Some(found) = text[start..].find(word) {
        let at = start + found;
        let before_ok =
            at == 0 || !text[..at].chars().next_back().map_or(false, is_ident);
        let after = at + word.len();
        let after_ok =
            after == text.len() || !text[after..].chars().next().map_or(false, is_ident);
        if before_ok && after_ok {
            return true;
        }
        start = at + word.len();
    }
    false
}
