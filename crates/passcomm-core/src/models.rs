//! The decoded document tree.
//!
//! Nodes live in an arena owned by [`Document`] and refer to their children
//! by [`NodeId`]. There are no parent links; questions such as "which group
//! owns this record" are answered by searching down from the top-level
//! groups.

use chrono::NaiveDate;
use std::collections::HashMap;

/// Value written for every group default; the exporter never supplies real
/// default values.
pub const MISSING_DEFAULT: &str = "Missed!";

/// Index of a node in a [`Document`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Column type codes used by Password Commander field schemas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Login,
    Password,
    Url,
    Cmd,
    Email,
    File,
    Text,
    AdditionalPassword,
    Ip,
    /// A code this decoder does not know about.
    Unknown(i32),
}

impl FieldType {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Login,
            1 => Self::Password,
            2 => Self::Url,
            3 => Self::Cmd,
            4 => Self::Email,
            5 => Self::File,
            6 => Self::Text,
            7 => Self::AdditionalPassword,
            8 => Self::Ip,
            other => Self::Unknown(other),
        }
    }

    pub fn code(self) -> i32 {
        match self {
            Self::Login => 0,
            Self::Password => 1,
            Self::Url => 2,
            Self::Cmd => 3,
            Self::Email => 4,
            Self::File => 5,
            Self::Text => 6,
            Self::AdditionalPassword => 7,
            Self::Ip => 8,
            Self::Unknown(code) => code,
        }
    }
}

/// A typed, named column of a group's schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    /// 0-based column position; dense within a group.
    pub id: usize,
    pub field_type: FieldType,
    pub name: String,
}

/// A default value declared on a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefaultValue {
    pub id: usize,
    pub name: String,
    /// Always [`MISSING_DEFAULT`].
    pub value: String,
}

/// A record's value for one column of its group's schema.
///
/// Type and name are copied from the [`FieldDef`] when the value is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub id: usize,
    pub field_type: FieldType,
    pub name: String,
    pub text: String,
}

/// One auto-type association of a record, still in the source macro syntax.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutoTypeRule {
    /// Opaque flag carried over from the export.
    pub use_mask: String,
    /// 0 disables the rule, 1 matches window titles, anything else URLs.
    pub rule_type: i32,
    pub pattern: String,
    pub sequence: String,
}

impl AutoTypeRule {
    /// The window match KeePass should use, or `None` for a disabled rule.
    ///
    /// URL rules are prefixed with `url_prefix`.
    pub fn window(&self, url_prefix: &str) -> Option<String> {
        match self.rule_type {
            0 => None,
            1 => Some(self.pattern.clone()),
            _ => Some(format!("{url_prefix}{}", self.pattern)),
        }
    }
}

/// Top-level container carrying the field schema for its records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Group {
    pub name: String,
    pub comment: String,
    pub valid_till: Option<NaiveDate>,
    pub valid_days: Option<String>,
    /// Default auto-type macro, untranslated.
    pub auto_type: Option<String>,
    pub fields: Vec<FieldDef>,
    pub defaults: Vec<DefaultValue>,
    pub children: Vec<NodeId>,
}

impl Group {
    pub fn field(&self, id: usize) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.id == id)
    }

    pub fn field_named(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    /// The first field of the given type, in column order.
    pub fn first_field_of(&self, field_type: FieldType) -> Option<&FieldDef> {
        self.fields
            .iter()
            .find(|field| field.field_type == field_type)
    }
}

/// Organizational node below a group.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Folder {
    pub name: String,
    pub comment: String,
    pub children: Vec<NodeId>,
}

/// A single password entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub comment: String,
    pub modified: Option<NaiveDate>,
    pub valid_till: Option<NaiveDate>,
    pub valid_days: Option<String>,
    pub values: Vec<Value>,
    pub auto_type: Vec<AutoTypeRule>,
}

impl Record {
    pub fn value_named(&self, name: &str) -> Option<&Value> {
        self.values.iter().find(|value| value.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Group(Group),
    Folder(Folder),
    Record(Record),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Group(group) => &group.name,
            Node::Folder(folder) => &folder.name,
            Node::Record(record) => &record.name,
        }
    }

    /// Child ids; records have none.
    pub fn children(&self) -> &[NodeId] {
        match self {
            Node::Group(group) => &group.children,
            Node::Folder(folder) => &folder.children,
            Node::Record(_) => &[],
        }
    }

    /// Whether records and folders can be nested under this node.
    pub fn is_container(&self) -> bool {
        !matches!(self, Node::Record(_))
    }

    pub fn as_group(&self) -> Option<&Group> {
        match self {
            Node::Group(group) => Some(group),
            _ => None,
        }
    }

    pub fn as_folder(&self) -> Option<&Folder> {
        match self {
            Node::Folder(folder) => Some(folder),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Node::Record(record) => Some(record),
            _ => None,
        }
    }
}

/// A fully decoded export.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    account: Option<String>,
    nodes: Vec<Node>,
    groups: Vec<NodeId>,
    files: HashMap<String, String>,
}

impl Document {
    /// Account name from the export header.
    pub fn account(&self) -> Option<&str> {
        self.account.as_deref()
    }

    /// Top-level groups in export order.
    pub fn groups(&self) -> &[NodeId] {
        &self.groups
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.0]
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.node(id).children()
    }

    /// The most recently added top-level group.
    pub fn last_group(&self) -> Option<NodeId> {
        self.groups.last().copied()
    }

    /// The nearest group above `id`, or `id` itself when it is a group.
    pub fn owning_group(&self, id: NodeId) -> Option<NodeId> {
        self.groups
            .iter()
            .copied()
            .find(|&group| self.contains(group, id))
    }

    fn contains(&self, ancestor: NodeId, id: NodeId) -> bool {
        ancestor == id
            || self
                .children(ancestor)
                .iter()
                .any(|&child| self.contains(child, id))
    }

    /// Base64 payload of an attached file.
    pub fn file(&self, key: &str) -> Option<&str> {
        self.files.get(key).map(String::as_str)
    }

    pub fn files(&self) -> &HashMap<String, String> {
        &self.files
    }

    pub fn record_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Record(_)))
            .count()
    }

    pub(crate) fn set_account(&mut self, account: String) {
        self.account = Some(account);
    }

    pub(crate) fn push_group(&mut self, group: Group) -> NodeId {
        let id = self.alloc(Node::Group(group));
        self.groups.push(id);
        id
    }

    /// Append `node` under the container `parent`.
    pub(crate) fn push_child(&mut self, parent: NodeId, node: Node) -> NodeId {
        let id = self.alloc(node);
        match &mut self.nodes[parent.0] {
            Node::Group(group) => group.children.push(id),
            Node::Folder(folder) => folder.children.push(id),
            Node::Record(_) => unreachable!("records cannot hold children"),
        }
        id
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.0]
    }

    /// Keep the first payload seen for a key.
    pub(crate) fn insert_file(&mut self, key: String, payload: String) -> bool {
        match self.files.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(payload);
                true
            }
        }
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        self.nodes.push(node);
        NodeId(self.nodes.len() - 1)
    }
}
