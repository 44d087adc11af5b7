//! Decoder for Password Commander CSV exports.
//!
//! The pipeline runs in three steps: [`tokenizer::tokenize`] splits the
//! export text into rows, [`decoder::decode`] rebuilds the tree of groups,
//! folders and records, and [`database::assemble`] turns that tree into a
//! KeePass database, translating auto-type macros with
//! [`autotype::translate`] on the way.

pub mod autotype;
pub mod database;
pub mod decoder;
pub mod error;
pub mod models;
pub mod tokenizer;

pub use database::{assemble, AssembleOptions};
pub use decoder::{decode, decode_with, DecodeOptions};
pub use error::{ImportError, Result, UnresolvedReference};
pub use models::{
    AutoTypeRule, DefaultValue, Document, FieldDef, FieldType, Folder, Group, Node, NodeId,
    Record, Value,
};
pub use tokenizer::{tokenize, Row, SEPARATOR};

/// Tokenize and decode an export with the default options.
pub fn parse(text: &str) -> Result<Document> {
    parse_with(text, &DecodeOptions::default())
}

/// Tokenize and decode an export.
pub fn parse_with(text: &str, options: &DecodeOptions) -> Result<Document> {
    let rows = tokenize(text, options.separator)?;
    tracing::debug!("Tokenized {} rows", rows.len());
    decode_with(&rows, options)
}
