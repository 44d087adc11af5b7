//! Tokenizer for the CSV dialect written by the Password Commander exporter.
//!
//! The dialect is close to RFC 4180 but not quite: a doubled quote that sits
//! alone between two field boundaries is dropped instead of producing a
//! literal quote, and a quote inside a quoted field that neither escapes nor
//! closes it is an error rather than literal text.

use crate::error::{ImportError, Location, Result};

/// Field separator used by Password Commander exports.
pub const SEPARATOR: char = ';';

/// One logical line of the export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based physical line on which the row starts.
    pub line: usize,
    pub fields: Vec<String>,
}

impl Row {
    pub fn new(line: usize, fields: Vec<String>) -> Self {
        Self { line, fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Field `index`, or `None` past the end of the row.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.fields.get(index).map(String::as_str)
    }
}

/// Split `text` into rows of fields.
///
/// The whole text has to be available up front: quoted fields may span
/// several physical lines.
pub fn tokenize(text: &str, separator: char) -> Result<Vec<Row>> {
    let chars: Vec<char> = text.chars().collect();
    let at = |index: usize| chars.get(index).copied();
    // Start and end of input count as boundaries too.
    let is_boundary = |c: Option<char>| match c {
        None | Some('\r') | Some('\n') => true,
        Some(c) => c == separator,
    };

    let mut rows = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;

    let mut line = 1;
    let mut row_line = 1;
    let mut column = 0;
    let mut i = 0;

    while i < chars.len() {
        let ch = chars[i];

        if ch == '"' {
            if at(i + 1) == Some('"') {
                let before = i.checked_sub(1).and_then(at);
                let after = at(i + 2);
                if !(is_boundary(before) && is_boundary(after)) {
                    field.push('"');
                }
                i += 2;
                column += 2;
                continue;
            }

            if !quoted {
                quoted = true;
            } else if is_boundary(at(i + 1)) {
                quoted = false;
            } else {
                return Err(ImportError::malformed(
                    Location::at(line, column + 1),
                    "unexpected quote inside quoted field",
                ));
            }
        } else if ch == separator {
            if quoted {
                field.push(ch);
            } else {
                fields.push(std::mem::take(&mut field));
            }
        } else if ch == '\r' || ch == '\n' {
            if quoted {
                field.push(ch);
            } else {
                fields.push(std::mem::take(&mut field));
                rows.push(Row::new(row_line, std::mem::take(&mut fields)));
            }

            // CRLF and LFCR both count as a single terminator.
            let pair = if ch == '\r' { '\n' } else { '\r' };
            if at(i + 1) == Some(pair) {
                i += 1;
                if quoted {
                    field.push(pair);
                }
            }

            line += 1;
            column = 0;
            if !quoted {
                row_line = line;
            }
            i += 1;
            continue;
        } else {
            field.push(ch);
        }

        i += 1;
        column += 1;
    }

    if quoted {
        return Err(ImportError::malformed(
            Location::line(line),
            "unterminated quoted field",
        ));
    }

    fields.push(field);
    rows.push(Row::new(row_line, fields));
    Ok(rows)
}

/// Render rows back into the dialect, for building fixtures.
///
/// Fields containing the separator, a quote or a line break are quoted with
/// inner quotes doubled; rows are joined with CRLF and no trailing
/// terminator is written.
pub fn serialize<R, F>(rows: R, separator: char) -> String
where
    R: IntoIterator<Item = F>,
    F: IntoIterator,
    F::Item: AsRef<str>,
{
    let mut out = String::new();
    for (index, row) in rows.into_iter().enumerate() {
        if index > 0 {
            out.push_str("\r\n");
        }
        for (column, field) in row.into_iter().enumerate() {
            if column > 0 {
                out.push(separator);
            }
            let field = field.as_ref();
            if field.contains([separator, '"', '\r', '\n']) {
                out.push('"');
                out.push_str(&field.replace('"', "\"\""));
                out.push('"');
            } else {
                out.push_str(field);
            }
        }
    }
    out
}
