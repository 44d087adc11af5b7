//! Rebuilds the document tree from tokenized rows.
//!
//! An export is a banner line, an account line and then a flat list of
//! blocks. Each block is opened by a dashed marker line and closed by
//! [`END_OF_RECORD`]. The first column of a block's first data row gives its
//! record type (group, folder or record) and the meaning of every following
//! row depends on that type and on the row's position inside the block.
//! Single-field lines met outside any block switch to the attached-files
//! section, whose rows map file keys to base64 payloads.

use crate::error::{ImportError, Location, Result};
use crate::models::{
    AutoTypeRule, DefaultValue, Document, FieldDef, FieldType, Folder, Group, Node, NodeId,
    Record, Value, MISSING_DEFAULT,
};
use crate::tokenizer::{Row, SEPARATOR};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// First line of every export starts with this.
pub const BANNER: &str = "Password Commander";
/// Closes a block.
pub const END_OF_RECORD: &str = "---------------";
/// Any other line starting with this opens a block.
const BLOCK_MARKER: &str = "-----";
/// Separates auto-type rules in a record trailer.
const RULE_SEPARATOR: &str = "%%#";
/// Separates the parts of one auto-type rule.
const RULE_PART_SEPARATOR: &str = "||";
/// Trailing control characters the exporter leaves on rule sequences.
const SEQUENCE_JUNK: [char; 3] = ['\u{7}', '\u{b}', '\u{3}'];

const GROUP: i32 = 0;
const FOLDER: i32 = 1;
const RECORD: i32 = 2;

/// Knobs for reading an export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeOptions {
    /// Field separator of the CSV dialect.
    pub separator: char,
    /// `chrono` formats tried in order for date columns.
    pub date_formats: Vec<String>,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            separator: SEPARATOR,
            date_formats: default_date_formats(),
        }
    }
}

fn default_date_formats() -> Vec<String> {
    [
        "%d.%m.%Y %H:%M:%S",
        "%d.%m.%Y %H:%M",
        "%d.%m.%Y",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d",
        "%m/%d/%Y %H:%M:%S",
        "%m/%d/%Y",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// How far into the export header we are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Banner,
    Account,
    Body,
}

/// Everything the decoder tracks between rows.
#[derive(Debug, Default)]
struct DecoderState {
    phase: Phase,
    inside_record: bool,
    inside_files: bool,
    /// Position of the current row inside its block.
    record_line: usize,
    /// Fixed by the first data row of a block.
    record_type: Option<i32>,
    /// Most recently opened group, folder or record.
    current: Option<NodeId>,
    last_group: Option<NodeId>,
}

/// Decode rows with the default options.
pub fn decode(rows: &[Row]) -> Result<Document> {
    decode_with(rows, &DecodeOptions::default())
}

/// Decode rows into a document. Any structural problem aborts the decode.
pub fn decode_with(rows: &[Row], options: &DecodeOptions) -> Result<Document> {
    let mut doc = Document::default();
    let mut state = DecoderState::default();

    for row in rows {
        match row.len() {
            0 => continue,
            1 => single_field(&mut doc, &mut state, row)?,
            _ => data_row(&mut doc, &mut state, row, options)?,
        }
    }

    if state.inside_record {
        tracing::warn!("Export ended inside a block; keeping what was decoded");
    }

    tracing::info!(
        "Decoded export: {} groups, {} records, {} files",
        doc.groups().len(),
        doc.record_count(),
        doc.files().len()
    );
    Ok(doc)
}

fn single_field(doc: &mut Document, state: &mut DecoderState, row: &Row) -> Result<()> {
    let text = row.fields[0].as_str();

    match state.phase {
        Phase::Banner => {
            if !text.starts_with(BANNER) {
                return Err(malformed(row, "not a recognized Password Commander export"));
            }
            state.phase = Phase::Account;
        }
        Phase::Account => {
            let (_, account) = text
                .split_once(':')
                .ok_or_else(|| malformed(row, "expected `<label>: <account name>`"))?;
            doc.set_account(account.trim().to_string());
            state.phase = Phase::Body;
        }
        Phase::Body => {
            if text.is_empty() {
                return Ok(());
            }
            if text.starts_with(BLOCK_MARKER) {
                if text == END_OF_RECORD {
                    state.inside_record = false;
                } else {
                    state.inside_record = true;
                    state.record_line = 0;
                    state.record_type = None;
                }
            } else if state.inside_record {
                state.record_line += 1;
            } else {
                if !state.inside_files {
                    tracing::debug!("Entering attached files section at line {}", row.line);
                }
                state.inside_files = true;
            }
        }
    }
    Ok(())
}

fn data_row(
    doc: &mut Document,
    state: &mut DecoderState,
    row: &Row,
    options: &DecodeOptions,
) -> Result<()> {
    if state.phase == Phase::Banner {
        return Err(malformed(row, "not a recognized Password Commander export"));
    }

    if !state.inside_record {
        if !state.inside_files {
            return Err(malformed(row, "data row outside of any block"));
        }
        let key = required(row, 1, "file key")?;
        let payload = required(row, 2, "file payload")?;
        if !doc.insert_file(key.to_string(), payload.to_string()) {
            tracing::warn!("Duplicate file key {:?}; keeping the first payload", key);
        }
        return Ok(());
    }

    let record_type = match state.record_type {
        Some(record_type) => record_type,
        None => {
            let record_type = parse_int(row, 0, "record type")?;
            state.record_type = Some(record_type);
            record_type
        }
    };

    match (state.record_line, record_type) {
        (0, GROUP) => group_header(doc, state, row)?,
        (1, GROUP) => group_field_types(doc, state, row)?,
        (2, GROUP) => group_field_names(doc, state, row)?,
        (3, GROUP) => group_defaults(doc, state, row)?,
        (4, GROUP) => group_trailer(doc, state, row, options)?,
        (0, FOLDER) => {
            let folder = Folder {
                name: required(row, 1, "folder name")?.to_string(),
                comment: required(row, 3, "folder comment")?.to_string(),
                children: Vec::new(),
            };
            tracing::debug!("Folder {:?} at line {}", folder.name, row.line);
            place(doc, state, row, Node::Folder(folder))?;
        }
        (0, RECORD) => {
            let record = Record {
                name: required(row, 1, "record name")?.to_string(),
                comment: required(row, 3, "record comment")?.to_string(),
                ..Record::default()
            };
            tracing::debug!("Record {:?} at line {}", record.name, row.line);
            place(doc, state, row, Node::Record(record))?;
        }
        (1, RECORD) => record_values(doc, state, row)?,
        (2, RECORD) => record_trailer(doc, state, row, options)?,
        (line, record_type) => {
            tracing::trace!(
                "Ignoring line {} of a type {} block at line {}",
                line,
                record_type,
                row.line
            );
        }
    }

    state.record_line += 1;
    Ok(())
}

fn group_header(doc: &mut Document, state: &mut DecoderState, row: &Row) -> Result<()> {
    let group = Group {
        name: required(row, 1, "group name")?.to_string(),
        comment: required(row, 2, "group comment")?.to_string(),
        ..Group::default()
    };
    tracing::debug!("Group {:?} at line {}", group.name, row.line);
    let id = doc.push_group(group);
    state.current = Some(id);
    state.last_group = Some(id);
    Ok(())
}

fn group_field_types(doc: &mut Document, state: &DecoderState, row: &Row) -> Result<()> {
    let fields = (1..row.len())
        .map(|column| {
            Ok(FieldDef {
                id: column - 1,
                field_type: FieldType::from_code(parse_int(row, column, "field type")?),
                name: String::new(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    current_group(doc, state, row)?.fields.extend(fields);
    Ok(())
}

fn group_field_names(doc: &mut Document, state: &DecoderState, row: &Row) -> Result<()> {
    let group = current_group(doc, state, row)?;
    for (column, name) in row.fields.iter().enumerate().skip(1) {
        let field = group
            .fields
            .iter_mut()
            .find(|field| field.id == column - 1)
            .ok_or_else(|| malformed(row, format!("field name in column {column} has no type")))?;
        field.name = name.clone();
    }
    Ok(())
}

fn group_defaults(doc: &mut Document, state: &DecoderState, row: &Row) -> Result<()> {
    let group = current_group(doc, state, row)?;
    let defaults: Vec<DefaultValue> = row.fields[1..]
        .iter()
        .filter_map(|name| group.field_named(name))
        .map(|field| DefaultValue {
            id: field.id,
            name: field.name.clone(),
            value: MISSING_DEFAULT.to_string(),
        })
        .collect();
    group.defaults.extend(defaults);
    Ok(())
}

fn group_trailer(
    doc: &mut Document,
    state: &DecoderState,
    row: &Row,
    options: &DecodeOptions,
) -> Result<()> {
    required(row, 7, "group auto-type")?;
    let valid_till = optional(row, 1)
        .map(|text| parse_date(row, text, options))
        .transpose()?;

    let group = current_group(doc, state, row)?;
    group.valid_till = valid_till;
    group.valid_days = optional(row, 3).map(String::from);
    group.auto_type = optional(row, 7).map(String::from);
    Ok(())
}

fn record_values(doc: &mut Document, state: &mut DecoderState, row: &Row) -> Result<()> {
    // Values bind to the newest top-level group, which is not necessarily
    // the group the record is nested under.
    state.last_group = doc.last_group();
    let group = state
        .last_group
        .and_then(|id| doc.node(id).as_group())
        .ok_or_else(|| malformed(row, "record values before any group"))?;

    let values: Vec<Value> = row
        .fields
        .iter()
        .enumerate()
        .skip(1)
        .filter_map(|(column, text)| {
            group.field(column - 1).map(|field| Value {
                id: field.id,
                field_type: field.field_type,
                name: field.name.clone(),
                text: text.clone(),
            })
        })
        .collect();

    current_record(doc, state, row)?.values.extend(values);
    Ok(())
}

fn record_trailer(
    doc: &mut Document,
    state: &DecoderState,
    row: &Row,
    options: &DecodeOptions,
) -> Result<()> {
    required(row, 6, "record auto-type")?;
    let modified = optional(row, 2)
        .map(|text| parse_date(row, text, options))
        .transpose()?;
    let valid_till = optional(row, 1)
        .map(|text| parse_date(row, text, options))
        .transpose()?;
    let rules = match optional(row, 6) {
        Some(text) => parse_rules(row, text)?,
        None => Vec::new(),
    };

    let record = current_record(doc, state, row)?;
    record.modified = modified;
    record.valid_till = valid_till;
    record.valid_days = optional(row, 3).map(String::from);
    record.auto_type = rules;
    Ok(())
}

/// Parse the `%%#`-separated rule list of a record trailer.
fn parse_rules(row: &Row, text: &str) -> Result<Vec<AutoTypeRule>> {
    text.split(RULE_SEPARATOR)
        .map(|chunk| {
            let parts: Vec<&str> = chunk.split(RULE_PART_SEPARATOR).collect();
            if parts.len() < 4 {
                return Err(malformed(
                    row,
                    format!("auto-type rule {chunk:?} has {} of 4 parts", parts.len()),
                ));
            }
            let rule_type = parts[1].trim().parse::<i32>().map_err(|_| {
                malformed(row, format!("auto-type rule type {:?} is not a number", parts[1]))
            })?;
            Ok(AutoTypeRule {
                use_mask: parts[0].to_string(),
                rule_type,
                pattern: parts[2].trim().to_string(),
                sequence: parts[3].trim_end_matches(SEQUENCE_JUNK).to_string(),
            })
        })
        .collect()
}

/// Attach a folder or record under the container its nesting level names.
fn place(doc: &mut Document, state: &mut DecoderState, row: &Row, node: Node) -> Result<()> {
    let level: usize = required(row, 2, "nesting level")?
        .trim()
        .parse()
        .map_err(|_| malformed(row, format!("nesting level {:?} is not a number", row.fields[2])))?;
    let parent = locate_parent(doc, row, level)?;
    state.current = Some(doc.push_child(parent, node));
    Ok(())
}

/// Walk `level` steps down from the root, always into the last group or
/// folder at each depth.
fn locate_parent(doc: &Document, row: &Row, level: usize) -> Result<NodeId> {
    if level == 0 {
        return Err(malformed(row, "nesting level 0 is outside of any group"));
    }
    let mut parent = doc
        .last_group()
        .ok_or_else(|| malformed(row, "no group to nest under"))?;
    for depth in 1..level {
        parent = doc
            .children(parent)
            .iter()
            .rev()
            .copied()
            .find(|&child| doc.node(child).is_container())
            .ok_or_else(|| malformed(row, format!("no folder at nesting level {}", depth + 1)))?;
    }
    Ok(parent)
}

fn current_group<'d>(
    doc: &'d mut Document,
    state: &DecoderState,
    row: &Row,
) -> Result<&'d mut Group> {
    let Some(id) = state.current else {
        return Err(malformed(row, "group line without an open group"));
    };
    match doc.node_mut(id) {
        Node::Group(group) => Ok(group),
        _ => Err(malformed(row, "group line without an open group")),
    }
}

fn current_record<'d>(
    doc: &'d mut Document,
    state: &DecoderState,
    row: &Row,
) -> Result<&'d mut Record> {
    let Some(id) = state.current else {
        return Err(malformed(row, "record line without an open record"));
    };
    match doc.node_mut(id) {
        Node::Record(record) => Ok(record),
        _ => Err(malformed(row, "record line without an open record")),
    }
}

fn required<'r>(row: &'r Row, index: usize, what: &str) -> Result<&'r str> {
    row.get(index).ok_or_else(|| {
        malformed(
            row,
            format!("missing {what}: expected at least {} fields, found {}", index + 1, row.len()),
        )
    })
}

/// A column that may be absent or empty.
fn optional(row: &Row, index: usize) -> Option<&str> {
    row.get(index).filter(|text| !text.is_empty())
}

fn parse_int(row: &Row, index: usize, what: &str) -> Result<i32> {
    let text = required(row, index, what)?;
    text.trim()
        .parse()
        .map_err(|_| malformed(row, format!("{what} {text:?} is not a number")))
}

fn parse_date(row: &Row, text: &str, options: &DecodeOptions) -> Result<NaiveDate> {
    let text = text.trim();
    options
        .date_formats
        .iter()
        .find_map(|format| {
            NaiveDateTime::parse_from_str(text, format)
                .map(|stamp| stamp.date())
                .or_else(|_| NaiveDate::parse_from_str(text, format))
                .ok()
        })
        .ok_or_else(|| malformed(row, format!("unrecognized date {text:?}")))
}

fn malformed(row: &Row, message: impl Into<String>) -> ImportError {
    ImportError::malformed(Location::line(row.line), message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokenizer::{serialize, tokenize};
    use proptest::prelude::*;
    use rstest::rstest;

    const OPEN: &str = "------------------------------";

    fn rows(lines: &[&[&str]]) -> Vec<Row> {
        tokenize(&serialize(lines.iter().copied(), SEPARATOR), SEPARATOR).unwrap()
    }

    fn group_block(
        name: &'static str,
        types: &'static [&'static str],
        names: &'static [&'static str],
    ) -> Vec<Vec<&'static str>> {
        let mut type_row = vec!["0"];
        type_row.extend_from_slice(types);
        let mut name_row = vec!["0"];
        name_row.extend_from_slice(names);
        vec![
            vec![OPEN],
            vec!["0", name, "comment"],
            type_row,
            name_row,
            vec!["0", ""],
            vec!["0", "", "", "", "", "", "", ""],
            vec![END_OF_RECORD],
        ]
    }

    fn decode_lines(lines: Vec<Vec<&str>>) -> Result<Document> {
        let borrowed: Vec<&[&str]> = lines.iter().map(Vec::as_slice).collect();
        decode(&rows(&borrowed))
    }

    fn with_header(blocks: Vec<Vec<Vec<&'static str>>>) -> Vec<Vec<&'static str>> {
        let mut lines = vec![
            vec!["Password Commander 4.8 export"],
            vec!["Account: Sample"],
        ];
        for block in blocks {
            lines.extend(block);
        }
        lines
    }

    fn record_block(
        name: &'static str,
        level: &'static str,
        values: &'static [&'static str],
        rules: &'static str,
    ) -> Vec<Vec<&'static str>> {
        let mut value_row = vec!["2"];
        value_row.extend_from_slice(values);
        vec![
            vec![OPEN],
            vec!["2", name, level, "note"],
            value_row,
            vec!["2", "", "", "", "", "", rules],
            vec![END_OF_RECORD],
        ]
    }

    #[test]
    fn minimal_export_decodes_group_and_record() {
        let doc = decode_lines(with_header(vec![
            group_block("Web", &["0", "1"], &["Login", "Password"]),
            record_block("Mail", "1", &["alice", "secret"], ""),
        ]))
        .unwrap();

        assert_eq!(doc.account(), Some("Sample"));
        assert_eq!(doc.groups().len(), 1);

        let group_id = doc.groups()[0];
        let group = doc.node(group_id).as_group().unwrap();
        assert_eq!(group.name, "Web");
        assert_eq!(group.children.len(), 1);

        let record = doc.node(group.children[0]).as_record().unwrap();
        assert_eq!(record.name, "Mail");
        assert_eq!(record.comment, "note");
        assert_eq!(record.value_named("Login").unwrap().text, "alice");
        assert_eq!(record.value_named("Password").unwrap().text, "secret");
        assert_eq!(
            record.value_named("Password").unwrap().field_type,
            FieldType::Password
        );
        assert!(record.auto_type.is_empty());
    }

    #[rstest]
    #[case::wrong_banner(vec![vec!["KeePass export"]])]
    #[case::data_before_banner(vec![vec!["a", "b"]])]
    fn rejects_unknown_exports(#[case] lines: Vec<Vec<&'static str>>) {
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("not a recognized"));
        assert_eq!(err.line(), Some(1));
    }

    #[test]
    fn account_line_needs_a_label() {
        let err = decode_lines(vec![vec!["Password Commander"], vec!["Sample"]]).unwrap_err();
        assert_eq!(err.line(), Some(2));
    }

    #[test]
    fn account_name_keeps_everything_after_first_colon() {
        let doc = decode_lines(vec![vec!["Password Commander"], vec!["Account:  a:b "]]).unwrap();
        assert_eq!(doc.account(), Some("a:b"));
    }

    #[test]
    fn data_row_outside_block_is_malformed() {
        let mut lines = with_header(vec![]);
        lines.push(vec!["0", "stray"]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("outside of any block"));
        assert_eq!(err.line(), Some(3));
    }

    #[test]
    fn group_schema_and_trailer() {
        let mut lines = with_header(vec![]);
        lines.extend([
            vec![OPEN],
            vec!["0", "Servers", "shell boxes"],
            vec!["0", "0", "1", "2", "2", "8"],
            vec!["0", "User", "Pass", "Site", "Mirror", "Host"],
            vec!["0", "Pass", "Nope"],
            vec!["0", "31.12.2030", "", "90", "", "", "", "%User%{Tab}%Pass%"],
            vec![END_OF_RECORD],
        ]);
        let doc = decode_lines(lines).unwrap();
        let group = doc.node(doc.groups()[0]).as_group().unwrap();

        let ids: Vec<usize> = group.fields.iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
        assert_eq!(group.field(4).unwrap().field_type, FieldType::Ip);
        assert_eq!(group.field(3).unwrap().name, "Mirror");
        assert_eq!(
            group.defaults,
            vec![DefaultValue {
                id: 1,
                name: "Pass".into(),
                value: MISSING_DEFAULT.into()
            }]
        );
        assert_eq!(group.valid_till, NaiveDate::from_ymd_opt(2030, 12, 31));
        assert_eq!(group.valid_days.as_deref(), Some("90"));
        assert_eq!(group.auto_type.as_deref(), Some("%User%{Tab}%Pass%"));
    }

    #[test]
    fn folders_nest_by_level() {
        let mut lines = with_header(vec![group_block("G", &["0"], &["Login"])]);
        lines.extend([
            vec![OPEN],
            vec!["1", "Outer", "1", ""],
            vec![END_OF_RECORD],
            vec![OPEN],
            vec!["1", "Inner", "2", ""],
            vec![END_OF_RECORD],
        ]);
        lines.extend(record_block("Deep", "3", &["bob"], ""));
        lines.extend(record_block("Shallow", "1", &["carol"], ""));
        let doc = decode_lines(lines).unwrap();

        let group_id = doc.groups()[0];
        let group = doc.node(group_id).as_group().unwrap();
        let names: Vec<&str> = group
            .children
            .iter()
            .map(|&id| doc.node(id).name())
            .collect();
        assert_eq!(names, vec!["Outer", "Shallow"]);

        let outer = doc.node(group.children[0]).as_folder().unwrap();
        let inner_id = outer.children[0];
        assert_eq!(doc.node(inner_id).name(), "Inner");
        let deep_id = doc.children(inner_id)[0];
        assert_eq!(doc.node(deep_id).name(), "Deep");
        assert_eq!(doc.owning_group(deep_id), Some(group_id));
    }

    #[rstest]
    #[case::level_zero("0", "outside of any group")]
    #[case::too_deep("2", "no folder at nesting level 2")]
    #[case::not_a_number("x", "not a number")]
    fn bad_nesting_is_malformed(#[case] level: &'static str, #[case] message: &str) {
        let mut lines = with_header(vec![group_block("G", &["0"], &["Login"])]);
        lines.extend([vec![OPEN], vec!["2", "Lost", level, ""], vec![END_OF_RECORD]]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains(message), "{err}");
    }

    #[test]
    fn record_without_any_group_is_malformed() {
        let lines = with_header(vec![record_block("Orphan", "1", &["x"], "")]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("no group to nest under"));
    }

    #[test]
    fn values_bind_to_newest_group() {
        let mut lines = with_header(vec![
            group_block("First", &["0", "1"], &["Login", "Password"]),
            group_block("Second", &["6", "2"], &["Notes", "Site"]),
        ]);
        // The record sits in a folder of the second group; its values must
        // use that group's schema, not the first one's.
        lines.extend([vec![OPEN], vec!["1", "Folder", "1", ""], vec![END_OF_RECORD]]);
        lines.extend(record_block("Entry", "2", &["hello", "example.com"], ""));
        let doc = decode_lines(lines).unwrap();

        let second = doc.groups()[1];
        let folder = doc.children(second)[0];
        let record_id = doc.children(folder)[0];
        let record = doc.node(record_id).as_record().unwrap();
        assert_eq!(record.values[0].name, "Notes");
        assert_eq!(record.values[0].field_type, FieldType::Text);
        assert_eq!(record.values[1].name, "Site");
        assert_eq!(record.values[1].field_type, FieldType::Url);
    }

    #[test]
    fn extra_value_columns_without_schema_are_dropped() {
        let doc = decode_lines(with_header(vec![
            group_block("G", &["0"], &["Login"]),
            record_block("R", "1", &["alice", "surplus"], ""),
        ]))
        .unwrap();
        let group = doc.node(doc.groups()[0]).as_group().unwrap();
        let record = doc.node(group.children[0]).as_record().unwrap();
        assert_eq!(record.values.len(), 1);
    }

    #[test]
    fn record_trailer_reads_dates_and_rules() {
        let rules = "1||1||  Inbox - Mail ||%Login%{Tab}%Password%{Enter}\u{7}\u{3}%%#0||2||example.com||{Clear}";
        let mut lines = with_header(vec![group_block("G", &["0", "1"], &["Login", "Password"])]);
        lines.extend([
            vec![OPEN],
            vec!["2", "Mail", "1", ""],
            vec!["2", "alice", "secret"],
            vec!["2", "2031-01-15", "01.02.2020 10:30:00", "30", "", "", rules],
            vec![END_OF_RECORD],
        ]);
        let doc = decode_lines(lines).unwrap();
        let group = doc.node(doc.groups()[0]).as_group().unwrap();
        let record = doc.node(group.children[0]).as_record().unwrap();

        assert_eq!(record.valid_till, NaiveDate::from_ymd_opt(2031, 1, 15));
        assert_eq!(record.modified, NaiveDate::from_ymd_opt(2020, 2, 1));
        assert_eq!(record.valid_days.as_deref(), Some("30"));
        assert_eq!(
            record.auto_type,
            vec![
                AutoTypeRule {
                    use_mask: "1".into(),
                    rule_type: 1,
                    pattern: "Inbox - Mail".into(),
                    sequence: "%Login%{Tab}%Password%{Enter}".into(),
                },
                AutoTypeRule {
                    use_mask: "0".into(),
                    rule_type: 2,
                    pattern: "example.com".into(),
                    sequence: "{Clear}".into(),
                },
            ]
        );
    }

    #[test]
    fn short_rule_aborts_the_import() {
        let mut lines = with_header(vec![group_block("G", &["0"], &["Login"])]);
        lines.extend(record_block("R", "1", &["a"], "1||1||only three"));
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("3 of 4 parts"), "{err}");
    }

    #[test]
    fn unparseable_date_is_malformed() {
        let mut lines = with_header(vec![]);
        lines.extend([
            vec![OPEN],
            vec!["0", "G", ""],
            vec!["0", "0"],
            vec!["0", "Login"],
            vec!["0", ""],
            vec!["0", "someday", "", "", "", "", "", ""],
            vec![END_OF_RECORD],
        ]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("unrecognized date"));
        assert_eq!(err.line(), Some(8));
    }

    #[test]
    fn rows_past_the_known_lines_are_ignored() {
        let mut lines = with_header(vec![group_block("G", &["0"], &["Login"])]);
        lines.extend([
            vec![OPEN],
            vec!["2", "R", "1", ""],
            vec!["2", "alice"],
            vec!["2", "", "", "", "", "", ""],
            vec!["2", "whatever", "else"],
            vec![END_OF_RECORD],
        ]);
        let doc = decode_lines(lines).unwrap();
        assert_eq!(doc.record_count(), 1);
    }

    #[test]
    fn files_section_collects_payloads() {
        let mut lines = with_header(vec![group_block("G", &["5"], &["Attachment"])]);
        lines.extend([
            vec!["Files"],
            vec!["0", "key-1", "aGVsbG8="],
            vec!["0", "key-2", "d29ybGQ="],
        ]);
        let doc = decode_lines(lines).unwrap();
        assert_eq!(doc.file("key-1"), Some("aGVsbG8="));
        assert_eq!(doc.file("key-2"), Some("d29ybGQ="));
    }

    #[test]
    fn custom_date_formats_are_honoured() {
        let options = DecodeOptions {
            date_formats: vec!["%Y/%m/%d".into()],
            ..DecodeOptions::default()
        };
        let lines = with_header(vec![vec![
            vec![OPEN],
            vec!["0", "G", ""],
            vec!["0", "0"],
            vec!["0", "Login"],
            vec!["0", ""],
            vec!["0", "2029/07/04", "", "", "", "", "", ""],
            vec![END_OF_RECORD],
        ]]);
        let borrowed: Vec<&[&str]> = lines.iter().map(Vec::as_slice).collect();
        let doc = decode_with(&rows(&borrowed), &options).unwrap();
        let group = doc.node(doc.groups()[0]).as_group().unwrap();
        assert_eq!(group.valid_till, NaiveDate::from_ymd_opt(2029, 7, 4));
        assert_eq!(group.auto_type, None);
    }

    #[test]
    fn short_group_trailer_is_malformed() {
        let lines = with_header(vec![vec![
            vec![OPEN],
            vec!["0", "G", ""],
            vec!["0", "0"],
            vec!["0", "Login"],
            vec!["0", ""],
            vec!["0", "31.12.2030", "", "90"],
            vec![END_OF_RECORD],
        ]]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("missing group auto-type"), "{err}");
        assert_eq!(err.line(), Some(8));
    }

    #[test]
    fn short_record_trailer_is_malformed() {
        let mut lines = with_header(vec![group_block("G", &["0"], &["Login"])]);
        lines.extend([
            vec![OPEN],
            vec!["2", "R", "1", ""],
            vec!["2", "alice"],
            vec!["2", "", "", ""],
            vec![END_OF_RECORD],
        ]);
        let err = decode_lines(lines).unwrap_err();
        assert!(err.to_string().contains("missing record auto-type"), "{err}");
        assert!(matches!(err, ImportError::Malformed { .. }));
    }

    proptest! {
        #[test]
        fn field_ids_are_dense(codes in prop::collection::vec(0i32..12, 1..20)) {
            let mut type_row = vec!["0".to_string()];
            type_row.extend(codes.iter().map(|c| c.to_string()));
            let mut name_row = vec!["0".to_string()];
            name_row.extend((0..codes.len()).map(|i| format!("Field {i}")));

            let text = serialize(
                vec![
                    vec!["Password Commander".to_string()],
                    vec!["Account: A".to_string()],
                    vec![OPEN.to_string()],
                    vec!["0".into(), "G".into(), String::new()],
                    type_row,
                    name_row,
                    vec![END_OF_RECORD.to_string()],
                ],
                SEPARATOR,
            );
            let doc = decode(&tokenize(&text, SEPARATOR).unwrap()).unwrap();
            let group = doc.node(doc.groups()[0]).as_group().unwrap();
            let ids: Vec<usize> = group.fields.iter().map(|f| f.id).collect();
            prop_assert_eq!(ids, (0..codes.len()).collect::<Vec<_>>());
            for (field, code) in group.fields.iter().zip(&codes) {
                prop_assert_eq!(field.field_type.code(), *code);
            }
        }
    }
}
