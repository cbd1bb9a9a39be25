//! Narrow AST surface consumed by the instruction model.
//!
//! The production tokenizer lives outside this crate; it hands us one
//! [`Node`] per instruction. The text adapter at the bottom of this module
//! builds the same nodes from Dockerfile text for tests and fixtures. It
//! supports line continuations (`\`), comments, JSON (exec) argument form,
//! and heredoc bodies.

use basalt_core::error::{FrontendError, Result};
use basalt_core::location::{Position, SourceRange};

/// A single pre-parsed instruction.
#[derive(Debug, Clone)]
pub struct Node {
    /// Instruction keyword as written (e.g. `FROM`, `run`)
    pub value: String,
    /// Positional tokens with quoting preserved
    pub args: Vec<String>,
    /// Raw `--name[=value]` tokens
    pub flags: Vec<String>,
    /// Arguments came from a JSON array
    pub json: bool,
    /// Heredoc bodies attached to this instruction
    pub heredocs: Vec<Heredoc>,
    /// Original source text
    pub original: String,
    /// Source range of the instruction
    pub location: SourceRange,
    /// Comment lines directly above the instruction
    pub prev_comments: Vec<String>,
}

/// A heredoc body attached to an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heredoc {
    pub name: String,
    pub content: String,
    /// Body is subject to variable expansion (unquoted delimiter)
    pub expand: bool,
    /// `<<-` form: strip the trailing newline when consumed inline
    pub chomp: bool,
}

/// The `<<NAME` token introducing a heredoc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeredocToken {
    pub name: String,
    pub expand: bool,
    pub chomp: bool,
}

/// Parse a word as a heredoc introduction, if it is one.
pub fn parse_heredoc_token(word: &str) -> Option<HeredocToken> {
    let rest = word.strip_prefix("<<")?;
    let (chomp, rest) = match rest.strip_prefix('-') {
        Some(r) => (true, r),
        None => (false, rest),
    };
    let (name, expand) = if (rest.starts_with('\'') && rest.ends_with('\'') && rest.len() >= 2)
        || (rest.starts_with('"') && rest.ends_with('"') && rest.len() >= 2)
    {
        (&rest[1..rest.len() - 1], false)
    } else {
        (rest, true)
    };
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    Some(HeredocToken {
        name: name.to_string(),
        expand,
        chomp,
    })
}

/// Strip the trailing newline from a chomped heredoc body.
pub fn chomp_heredoc_content(content: &str) -> String {
    content.strip_suffix('\n').unwrap_or(content).to_string()
}

// =============================================================================
// Text adapter
// =============================================================================

/// Parse Dockerfile text into AST nodes.
///
/// A compact stand-in for the external tokenizer, used by tests and
/// fixtures. Handles comments, continuations, quote-aware word splitting,
/// leading flags, JSON argument arrays, and heredocs.
pub fn parse_text(input: &str) -> Result<Vec<Node>> {
    let mut nodes = Vec::new();
    let mut comments: Vec<String> = Vec::new();
    let mut lines = input.lines().enumerate().peekable();

    while let Some((idx, line)) = lines.next() {
        let line_no = (idx + 1) as u32;
        let trimmed = line.trim();

        if trimmed.is_empty() {
            comments.clear();
            continue;
        }
        if let Some(comment) = trimmed.strip_prefix('#') {
            comments.push(comment.trim().to_string());
            continue;
        }

        // Join continuation lines into one logical line.
        let mut logical = String::new();
        let mut end_line = line_no;
        let mut current = line.to_string();
        loop {
            if let Some(stripped) = current.trim_end().strip_suffix('\\') {
                logical.push_str(stripped.trim_end());
                logical.push(' ');
                match lines.next() {
                    Some((next_idx, next_line)) => {
                        end_line = (next_idx + 1) as u32;
                        // comments may interleave continuations
                        if next_line.trim().starts_with('#') {
                            current = String::from("\\");
                            continue;
                        }
                        current = next_line.to_string();
                    }
                    None => break,
                }
            } else {
                logical.push_str(&current);
                break;
            }
        }

        let logical = logical.trim().to_string();
        if logical.is_empty() {
            continue;
        }

        let (keyword, rest) = split_first_word(&logical);
        let (flags, remainder) = split_flags(rest);

        let (args, json) = if remainder.trim_start().starts_with('[') {
            match serde_json::from_str::<Vec<String>>(remainder.trim()) {
                Ok(elements) => (elements, true),
                Err(_) => (split_words(remainder), false),
            }
        } else {
            (split_words(remainder), false)
        };

        // Collect heredoc bodies in token order.
        let mut heredocs = Vec::new();
        for word in &args {
            if let Some(token) = parse_heredoc_token(word) {
                let mut content = String::new();
                let mut terminated = false;
                for (body_idx, body_line) in lines.by_ref() {
                    end_line = (body_idx + 1) as u32;
                    let candidate = if token.chomp {
                        body_line.trim_start_matches('\t')
                    } else {
                        body_line
                    };
                    if candidate == token.name {
                        terminated = true;
                        break;
                    }
                    content.push_str(body_line);
                    content.push('\n');
                }
                if !terminated {
                    return Err(FrontendError::parse(format!(
                        "unterminated heredoc {:?}",
                        token.name
                    ))
                    .at(SourceRange::line(line_no)));
                }
                heredocs.push(Heredoc {
                    name: token.name,
                    content,
                    expand: token.expand,
                    chomp: token.chomp,
                });
            }
        }

        nodes.push(Node {
            value: keyword.to_string(),
            args,
            flags,
            json,
            heredocs,
            original: logical,
            location: SourceRange {
                start: Position {
                    line: line_no,
                    column: 0,
                },
                end: Position {
                    line: end_line,
                    column: 0,
                },
            },
            prev_comments: std::mem::take(&mut comments),
        });
    }

    Ok(nodes)
}

/// Split a string into the first word and the rest.
fn split_first_word(s: &str) -> (&str, &str) {
    let s = s.trim();
    match s.find(char::is_whitespace) {
        Some(pos) => (&s[..pos], s[pos..].trim_start()),
        None => (s, ""),
    }
}

/// Peel leading `--flag` tokens off the front of an argument string.
fn split_flags(rest: &str) -> (Vec<String>, &str) {
    let mut flags = Vec::new();
    let mut remainder = rest.trim_start();
    while remainder.starts_with("--") {
        let token_end = scan_word(remainder);
        flags.push(remainder[..token_end].to_string());
        remainder = remainder[token_end..].trim_start();
    }
    (flags, remainder)
}

/// Length of the leading word, honoring quotes and escapes.
fn scan_word(s: &str) -> usize {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match (c, quote) {
            ('\\', _) => escaped = true,
            (q, Some(open)) if q == open => quote = None,
            ('\'' | '"', None) => quote = Some(c),
            (c, None) if c.is_whitespace() => return i,
            _ => {}
        }
    }
    s.len()
}

/// Split into whitespace-separated words, preserving quotes and escapes.
fn split_words(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut rest = s.trim();
    while !rest.is_empty() {
        let end = scan_word(rest);
        words.push(rest[..end].to_string());
        rest = rest[end..].trim_start();
    }
    words
}
