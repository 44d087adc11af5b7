//! Translation of Password Commander auto-type macros into KeePass sequences.
//!
//! A macro is plain text with three kinds of tokens mixed in:
//!
//! - the characters `+ ^ ~ ( )`, which KeePass treats as modifiers and
//!   therefore need bracing,
//! - brace commands such as `{Tab}`, `{Enter3}` or `{Shift+Tab}`, with an
//!   optional repeat count,
//! - field placeholders such as `%Login%`, resolved against the schema of
//!   the group that owns the record.
//!
//! Everything else is copied through unchanged.

use crate::error::UnresolvedReference;
use crate::models::{FieldType, Group};

/// Placeholder that always stands for the entry title.
const RECORD_NAME: &str = "Record Name";

/// Characters KeePass would otherwise read as key modifiers.
const SPECIAL_CHARS: [u8; 5] = [b'+', b'^', b'~', b'(', b')'];

/// Brace command names understood by the scanner, matched case-insensitively.
const COMMANDS: [&str; 10] = [
    "Clear",
    "Tab",
    "Enter",
    "Esc",
    "Space",
    "Up",
    "Down",
    "Right",
    "Left",
    "Shift+Tab",
];

/// A lexical piece of a macro.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    /// Text copied through as-is.
    Literal(&'a str),
    /// One of `+ ^ ~ ( )`.
    Special(char),
    /// `{Name}` or `{NameN}`. `name` keeps the source spelling, including
    /// the `m` prefix of mouse variants.
    Command { name: &'a str, count: &'a str },
    /// `%Name%`.
    Field(&'a str),
}

/// Split a macro into tokens, left to right.
pub fn scan(sequence: &str) -> Vec<Token<'_>> {
    let bytes = sequence.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let matched = match bytes[i] {
            b if SPECIAL_CHARS.contains(&b) => Some((Token::Special(b as char), i + 1)),
            b'{' => scan_command(sequence, i),
            b'%' => scan_field(sequence, i),
            _ => None,
        };

        match matched {
            Some((token, end)) => {
                if literal_start < i {
                    tokens.push(Token::Literal(&sequence[literal_start..i]));
                }
                tokens.push(token);
                i = end;
                literal_start = end;
            }
            None => i += 1,
        }
    }

    if literal_start < bytes.len() {
        tokens.push(Token::Literal(&sequence[literal_start..]));
    }
    tokens
}

/// Match `{[m]Command[digits]}` starting at the brace at `start`.
fn scan_command(sequence: &str, start: usize) -> Option<(Token<'_>, usize)> {
    let body_start = start + 1;
    let body = &sequence[body_start..];
    let name_start = usize::from(body.starts_with(['m', 'M']));

    let command = COMMANDS.iter().find(|command| {
        body.get(name_start..name_start + command.len())
            .is_some_and(|candidate| candidate.eq_ignore_ascii_case(command))
    })?;
    let name_end = name_start + command.len();

    let digits = body[name_end..]
        .bytes()
        .take_while(u8::is_ascii_digit)
        .count();
    let close = name_end + digits;
    if body.as_bytes().get(close) != Some(&b'}') {
        return None;
    }

    let token = Token::Command {
        name: &body[..name_end],
        count: &body[name_end..close],
    };
    Some((token, body_start + close + 1))
}

/// Match `%Name%` starting at the percent sign at `start`.
fn scan_field(sequence: &str, start: usize) -> Option<(Token<'_>, usize)> {
    let name_start = start + 1;
    let len = sequence[name_start..].find('%')?;
    if len == 0 {
        return None;
    }
    let name = &sequence[name_start..name_start + len];
    Some((Token::Field(name), name_start + len + 1))
}

/// Translate a macro into KeePass auto-type syntax.
///
/// Fails on the first command or field reference that has no KeePass
/// counterpart; callers drop the affected rule.
pub fn translate(sequence: &str, group: &Group) -> Result<String, UnresolvedReference> {
    let mut out = String::with_capacity(sequence.len());
    for token in scan(sequence) {
        match token {
            Token::Literal(text) => out.push_str(text),
            Token::Special(c) => {
                out.push('{');
                out.push(c);
                out.push('}');
            }
            Token::Command { name, count } => out.push_str(&command(name, count)?),
            Token::Field(name) => out.push_str(&field(name, group)?),
        }
    }
    Ok(out)
}

fn command(name: &str, count: &str) -> Result<String, UnresolvedReference> {
    let unresolved = || UnresolvedReference::new(format!("{{{name}{count}}}"));
    let count: u32 = if count.is_empty() {
        0
    } else {
        count.parse().map_err(|_| unresolved())?
    };

    let translated = match name.to_ascii_uppercase().as_str() {
        "CLEAR" => "{CLEARFIELD}".to_string(),
        "SPACE" => " ".to_string(),
        "SHIFT+TAB" => format!("+{}", repeated("TAB", count)),
        key @ ("TAB" | "ENTER" | "ESC" | "UP" | "DOWN" | "RIGHT" | "LEFT") => repeated(key, count),
        // Mouse variants have no keyboard equivalent.
        _ => return Err(unresolved()),
    };
    Ok(translated)
}

fn repeated(key: &str, count: u32) -> String {
    if count > 0 {
        format!("{{{key} {count}}}")
    } else {
        format!("{{{key}}}")
    }
}

fn field(name: &str, group: &Group) -> Result<String, UnresolvedReference> {
    if name == RECORD_NAME {
        return Ok("{TITLE}".to_string());
    }

    let def = group
        .field_named(name)
        .ok_or_else(|| UnresolvedReference::new(format!("%{name}%")))?;

    let first_url = group.first_field_of(FieldType::Url).map(|first| first.id);
    let translated = match def.field_type {
        FieldType::Login => "{USERNAME}".to_string(),
        FieldType::Password => "{PASSWORD}".to_string(),
        FieldType::Url if first_url == Some(def.id) => "{URL}".to_string(),
        _ => format!("{{S:{name}}}"),
    };
    Ok(translated)
}
