//! Building a KeePass database from a decoded export.

use crate::autotype;
use crate::error::{ImportError, Result};
use crate::models::{Document, FieldType, Group, Node, NodeId, Record};
use anyhow::Context;
use base64::Engine as _;
use chrono::NaiveDate;
use keepass::db::{fields, AutoType, AutoTypeAssociation, EntryMut, GroupMut, Times, Value};
use keepass::{Database, DatabaseKey};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Window-match prefix that makes KeePass compare against the browser URL.
pub const DEFAULT_URL_MATCH_PREFIX: &str = "??:URL:";

/// Name used for groups and folders exported without one.
const UNNAMED: &str = "Unknown";

/// Line break escape used in exported comments.
const LINE_BREAK: &str = "&linebreak;";

/// Knobs for turning a document into a KeePass database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssembleOptions {
    /// Prefix for auto-type rules that match URLs rather than window titles.
    pub url_match_prefix: String,
    /// Database name; the export's account name when unset.
    pub database_name: Option<String>,
}

impl Default for AssembleOptions {
    fn default() -> Self {
        Self {
            url_match_prefix: DEFAULT_URL_MATCH_PREFIX.to_string(),
            database_name: None,
        }
    }
}

/// Counters reported after assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblyStats {
    pub groups: usize,
    pub entries: usize,
    pub attachments: usize,
    pub auto_type_rules: usize,
    pub dropped_rules: usize,
}

/// Create an in-memory KeePass database mirroring `doc`.
pub fn assemble(doc: &Document, options: &AssembleOptions) -> Result<Database> {
    assemble_with_stats(doc, options).map(|(db, _)| db)
}

/// Like [`assemble`], also returning what was created.
pub fn assemble_with_stats(
    doc: &Document,
    options: &AssembleOptions,
) -> Result<(Database, AssemblyStats)> {
    let mut db = Database::new();

    let name = options
        .database_name
        .clone()
        .or_else(|| doc.account().map(String::from));
    if let Some(name) = &name {
        db.meta.database_name = Some(name.clone());
    }

    let mut assembler = Assembler {
        doc,
        options,
        stats: AssemblyStats::default(),
    };

    let mut root = db.root_mut();
    if let Some(name) = name {
        root.name = name;
    }
    for &group in doc.groups() {
        assembler.convert_container(&mut root, group)?;
    }

    let stats = assembler.stats;
    tracing::info!(
        "Assembled {} groups and {} entries ({} attachments, {} auto-type rules, {} dropped)",
        stats.groups,
        stats.entries,
        stats.attachments,
        stats.auto_type_rules,
        stats.dropped_rules
    );
    Ok((db, stats))
}

/// Write the database to `path` as KDBX4, protected by `password`.
pub fn save(db: &Database, path: impl AsRef<Path>, password: &str) -> anyhow::Result<()> {
    let path = path.as_ref();
    let key = DatabaseKey::new().with_password(password);

    let mut file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create database file: {}", path.display()))?;

    db.save(&mut file, key)
        .with_context(|| format!("Failed to save database: {}", path.display()))?;

    Ok(())
}

struct Assembler<'d> {
    doc: &'d Document,
    options: &'d AssembleOptions,
    stats: AssemblyStats,
}

impl Assembler<'_> {
    /// Add a group or folder, and everything below it, under `parent`.
    fn convert_container(&mut self, parent: &mut GroupMut<'_>, id: NodeId) -> Result<()> {
        let node = self.doc.node(id);
        let mut kg = parent.add_group();
        kg.name = display_name(node.name()).to_string();

        match node {
            Node::Group(group) => {
                kg.notes = notes(&group.comment);
                set_expiry(&mut kg.times, group.valid_till);
                if let Some(source) = &group.auto_type {
                    match autotype::translate(source, group) {
                        Ok(sequence) if !sequence.is_empty() => {
                            kg.default_autotype_sequence = Some(sequence);
                        }
                        Ok(_) => {}
                        Err(err) => {
                            tracing::debug!("Dropping default auto-type of {:?}: {}", group.name, err);
                        }
                    }
                }
            }
            Node::Folder(folder) => kg.notes = notes(&folder.comment),
            Node::Record(_) => {
                return Err(ImportError::Assembly(format!(
                    "record {:?} used as a container",
                    node.name()
                )))
            }
        }

        for &child in node.children() {
            match self.doc.node(child) {
                Node::Record(record) => {
                    let mut entry = kg.add_entry();
                    self.convert_record(&mut entry, child, record)?;
                }
                _ => self.convert_container(&mut kg, child)?,
            }
        }

        self.stats.groups += 1;
        Ok(())
    }

    fn convert_record(&mut self, entry: &mut EntryMut<'_>, id: NodeId, record: &Record) -> Result<()> {
        entry.set_unprotected(fields::TITLE, record.name.as_str());
        if let Some(notes) = notes(&record.comment) {
            entry.set_unprotected(fields::NOTES, notes);
        }

        for value in &record.values {
            match value.field_type {
                FieldType::Login => entry.set_unprotected(fields::USERNAME, value.text.as_str()),
                FieldType::Password => entry.set_protected(fields::PASSWORD, value.text.as_str()),
                FieldType::Url => entry.set_unprotected(fields::URL, value.text.as_str()),
                FieldType::Cmd | FieldType::Email | FieldType::Text | FieldType::Ip => {
                    entry.set_unprotected(value.name.as_str(), value.text.as_str())
                }
                FieldType::AdditionalPassword => {
                    entry.set_protected(value.name.as_str(), value.text.as_str())
                }
                FieldType::File => {
                    if value.text.is_empty() {
                        continue;
                    }
                    let (filename, data) = self.attachment(record, &value.text)?;
                    entry.add_attachment(filename, Value::unprotected(data));
                    self.stats.attachments += 1;
                }
                FieldType::Unknown(code) => {
                    tracing::debug!(
                        "Skipping value {:?} of {:?} with unknown type {}",
                        value.name,
                        record.name,
                        code
                    );
                }
            }
        }

        let group = self
            .doc
            .owning_group(id)
            .and_then(|group| self.doc.node(group).as_group());

        set_expiry(
            &mut entry.times,
            record.valid_till.or_else(|| group.and_then(|group| group.valid_till)),
        );

        let associations = match group {
            Some(group) => self.associations(record, group),
            None => Vec::new(),
        };
        entry.autotype = Some(AutoType {
            enabled: !associations.is_empty(),
            associations,
            ..AutoType::default()
        });

        self.stats.entries += 1;
        Ok(())
    }

    /// Translate the record's auto-type rules, dropping those that fail.
    fn associations(&mut self, record: &Record, group: &Group) -> Vec<AutoTypeAssociation> {
        let mut associations = Vec::new();
        for rule in &record.auto_type {
            let Some(window) = rule.window(&self.options.url_match_prefix) else {
                continue;
            };
            if window.is_empty() || rule.sequence.is_empty() {
                continue;
            }
            match autotype::translate(&rule.sequence, group) {
                Ok(sequence) if !sequence.is_empty() => {
                    associations.push(AutoTypeAssociation { window, sequence });
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(
                        "Dropping auto-type rule {:?} of {:?}: {}",
                        window,
                        record.name,
                        err
                    );
                    self.stats.dropped_rules += 1;
                }
            }
        }
        self.stats.auto_type_rules += associations.len();
        associations
    }

    /// Resolve a `<filename>|<file key>` value against the files table.
    fn attachment(&self, record: &Record, reference: &str) -> Result<(String, Vec<u8>)> {
        let (filename, key) = reference.split_once('|').ok_or_else(|| {
            ImportError::Assembly(format!(
                "file value {reference:?} of {:?} has no file key",
                record.name
            ))
        })?;

        let Some(payload) = self.doc.file(key) else {
            tracing::warn!(
                "File {:?} of {:?} is missing from the export; attaching it empty",
                filename,
                record.name
            );
            return Ok((filename.to_string(), Vec::new()));
        };

        let data = base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|err| {
                ImportError::Assembly(format!("file {key:?} is not valid base64: {err}"))
            })?;
        Ok((filename.to_string(), data))
    }
}

/// Mark `times` as expiring at midnight of `date`, if there is one.
fn set_expiry(times: &mut Times, date: Option<NaiveDate>) {
    if let Some(expiry) = date.and_then(|date| date.and_hms_opt(0, 0, 0)) {
        times.expires = Some(true);
        times.expiry = Some(expiry);
    }
}

fn display_name(name: &str) -> &str {
    if name.is_empty() {
        UNNAMED
    } else {
        name
    }
}

fn notes(comment: &str) -> Option<String> {
    (!comment.is_empty()).then(|| comment.replace(LINE_BREAK, "\n"))
}
