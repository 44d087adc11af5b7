//! Plain-text rendering of a decoded export, for `--dump`.

use passcomm_core::{Document, Node, NodeId};
use std::io::{self, Write};

/// Write an indented outline of `doc` to `out`.
pub fn write_tree(doc: &Document, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Account: {}", doc.account().unwrap_or("(none)"))?;
    for &group in doc.groups() {
        write_node(doc, group, 0, out)?;
    }

    let mut keys: Vec<&String> = doc.files().keys().collect();
    keys.sort();
    writeln!(out, "Files: {}", keys.len())?;
    for key in keys {
        writeln!(out, "  {key}")?;
    }
    Ok(())
}

fn write_node(doc: &Document, id: NodeId, depth: usize, out: &mut impl Write) -> io::Result<()> {
    let indent = "  ".repeat(depth);
    match doc.node(id) {
        Node::Group(group) => {
            let fields: Vec<&str> = group.fields.iter().map(|f| f.name.as_str()).collect();
            writeln!(out, "{indent}[group] {} ({})", group.name, fields.join(", "))?;
            if let Some(valid_till) = group.valid_till {
                writeln!(out, "{indent}  valid till {valid_till}")?;
            }
        }
        Node::Folder(folder) => writeln!(out, "{indent}[folder] {}", folder.name)?,
        Node::Record(record) => {
            writeln!(
                out,
                "{indent}[record] {} ({} values, {} auto-type rules)",
                record.name,
                record.values.len(),
                record.auto_type.len()
            )?;
        }
    }

    for &child in doc.children(id) {
        write_node(doc, child, depth + 1, out)?;
    }
    Ok(())
}
