//! Build members, operations and protocols from XML metadata.
//!
//! Attribute and element names are matched case-insensitively. Unknown attributes
//! are rejected so that misspelled metadata does not silently fall back to defaults.

use crate::error::MetadataError;
use crate::layout::LayoutRules;
use crate::member::Member;
use crate::protocol::{Operation, Protocol, SummaryAttributes};
use crate::types::{BaseType, Extent, TypeKind, ValueType};
use crate::value::Value;
use log::trace;
use roxmltree::{Document, Node};
use std::collections::HashSet;
use std::path::Path;

const MEMBER_ATTRS: &[&str] = &[
    "Name",
    "Type",
    "StringLength",
    "Size",
    "SequenceLength",
    "SequenceSize",
    "ArrayLength",
    "ArrayDimensions",
    "Key",
    "In",
    "Out",
    "Enums",
    "Description",
    "Format",
    "Abbrev",
];

const OPERATION_ATTRS: &[&str] = &["Name", "TwoWay", "Description"];

const PROTOCOL_ATTRS: &[&str] = &[
    "Name",
    "DataValueWidth",
    "DataValueGranularity",
    "DiverseDataSizes",
    "MaxMessageValues",
    "MinMessageValues",
    "VariableMessageLength",
    "ZeroLengthMessages",
    "Unbounded",
    "NumberOfOpcodes",
    "TwoWay",
    "DefaultBufferSize",
];

/// Options for parsing member metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOptions {
    /// Attribute holding a member's default value (`None` disables defaults).
    pub default_attr: Option<String>,
    pub rules: LayoutRules,
}

impl Default for ParseOptions {
    fn default() -> Self {
        ParseOptions {
            default_attr: Some("Default".to_string()),
            rules: LayoutRules::message(),
        }
    }
}

impl ParseOptions {
    /// Worker property context: bounded sequences and strings only.
    pub fn property() -> Self {
        ParseOptions {
            rules: LayoutRules::property(),
            ..ParseOptions::default()
        }
    }
}

fn tag<'a>(node: Node<'a, '_>) -> &'a str {
    node.tag_name().name()
}

fn is_tag(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && tag(node).eq_ignore_ascii_case(name)
}

fn attr<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attributes()
        .find(|a| a.name().eq_ignore_ascii_case(name))
        .map(|a| a.value())
}

fn owner(node: Node<'_, '_>) -> String {
    match attr(node, "Name") {
        Some(name) => format!("{} \"{}\"", tag(node), name),
        None => tag(node).to_string(),
    }
}

fn check_attrs(node: Node<'_, '_>, allowed: &[&str], extra: Option<&str>) -> Result<(), MetadataError> {
    for a in node.attributes() {
        let known = allowed.iter().any(|n| n.eq_ignore_ascii_case(a.name()))
            || extra.is_some_and(|n| n.eq_ignore_ascii_case(a.name()));
        if !known {
            return Err(MetadataError::InvalidAttribute {
                owner: owner(node),
                attribute: a.name().to_string(),
                message: "unknown attribute".to_string(),
            });
        }
    }
    Ok(())
}

fn bad_attr(node: Node<'_, '_>, name: &str, message: impl Into<String>) -> MetadataError {
    MetadataError::InvalidAttribute {
        owner: owner(node),
        attribute: name.to_string(),
        message: message.into(),
    }
}

fn bool_attr(node: Node<'_, '_>, name: &str) -> Result<Option<bool>, MetadataError> {
    match attr(node, name).map(str::trim) {
        None => Ok(None),
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => Ok(Some(true)),
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => Ok(Some(false)),
        Some(v) => Err(bad_attr(node, name, format!("\"{}\" is not a boolean", v))),
    }
}

fn usize_attr(node: Node<'_, '_>, name: &str) -> Result<Option<usize>, MetadataError> {
    match attr(node, name) {
        None => Ok(None),
        Some(v) => match Extent::parse(v)? {
            Extent::Resolved(n) => Ok(Some(n)),
            Extent::Unresolved(_) => Err(bad_attr(node, name, format!("\"{}\" is not a number", v))),
        },
    }
}

fn extent_attr(node: Node<'_, '_>, names: [&'static str; 2]) -> Result<Option<Extent>, MetadataError> {
    match (attr(node, names[0]), attr(node, names[1])) {
        (Some(_), Some(_)) => Err(bad_attr(
            node,
            names[1],
            format!("cannot be given together with {}", names[0]),
        )),
        (Some(v), None) | (None, Some(v)) => Extent::parse(v).map(Some),
        (None, None) => Ok(None),
    }
}

fn comma_list(text: &str) -> Vec<&str> {
    text.split(',').map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Parse one member element (property, argument, struct member or wrapped type).
///
/// Layout is not computed here: a tree can still hold symbolic extents.
pub fn parse_member(node: Node<'_, '_>, options: &ParseOptions) -> Result<Member, MetadataError> {
    parse_member_named(node, options, None)
}

fn parse_member_named(
    node: Node<'_, '_>,
    options: &ParseOptions,
    inherited_name: Option<&str>,
) -> Result<Member, MetadataError> {
    check_attrs(node, MEMBER_ATTRS, options.default_attr.as_deref())?;
    let name = match (attr(node, "Name"), inherited_name) {
        (Some(n), _) => n.trim().to_string(),
        (None, Some(n)) => n.to_string(),
        (None, None) => {
            return Err(MetadataError::MissingAttribute {
                element: tag(node).to_string(),
                attribute: "Name".to_string(),
            })
        }
    };
    let type_name = attr(node, "Type").unwrap_or("ULong").trim();
    let base = BaseType::from_name(type_name).ok_or_else(|| MetadataError::UnknownType {
        member: name.clone(),
        type_name: type_name.to_string(),
    })?;
    let kind = match base {
        BaseType::String => TypeKind::String {
            length: extent_attr(node, ["StringLength", "Size"])?.unwrap_or(Extent::Resolved(0)),
        },
        BaseType::Enum => {
            let text = attr(node, "Enums").ok_or_else(|| MetadataError::MissingAttribute {
                element: owner(node),
                attribute: "Enums".to_string(),
            })?;
            let names: Vec<String> = comma_list(text).into_iter().map(String::from).collect();
            if names.is_empty() {
                return Err(bad_attr(node, "Enums", "no enumeration values"));
            }
            let mut seen = HashSet::new();
            if let Some(dup) = names.iter().find(|n| !seen.insert(n.to_ascii_lowercase())) {
                return Err(MetadataError::DuplicateName {
                    name: dup.clone(),
                    context: format!("enumeration of \"{}\"", name),
                });
            }
            TypeKind::Enum(names)
        }
        BaseType::Struct => TypeKind::Struct(parse_members(node, "Member", options)?),
        BaseType::Type => {
            let mut children = node.children().filter(|c| c.is_element());
            let inner = match (children.next(), children.next()) {
                (Some(child), None) if is_tag(child, "Type") => parse_member_named(child, options, Some(&name))?,
                _ => {
                    return Err(MetadataError::invalid(
                        &name,
                        "a recursive type needs exactly one <type> child element",
                    ))
                }
            };
            TypeKind::Type(Box::new(inner))
        }
        scalar => TypeKind::Scalar(scalar),
    };
    let mut value_type = ValueType::new(kind);
    if let Some(dims) = attr(node, "ArrayDimensions") {
        if attr(node, "ArrayLength").is_some() {
            return Err(bad_attr(node, "ArrayDimensions", "cannot be given together with ArrayLength"));
        }
        let dims = comma_list(dims);
        if dims.is_empty() {
            return Err(bad_attr(node, "ArrayDimensions", "no dimensions"));
        }
        value_type.array_dimensions = dims.into_iter().map(Extent::parse).collect::<Result<_, _>>()?;
    } else if let Some(len) = attr(node, "ArrayLength") {
        value_type.array_dimensions = vec![Extent::parse(len)?];
    }
    value_type.sequence = extent_attr(node, ["SequenceLength", "SequenceSize"])?;

    let mut m = Member::new(name, value_type);
    m.description = attr(node, "Description").unwrap_or_default().to_string();
    m.format = attr(node, "Format").unwrap_or_default().to_string();
    m.abbrev = attr(node, "Abbrev").unwrap_or_default().to_string();
    m.is_key = bool_attr(node, "Key")?.unwrap_or(false);
    m.is_in = bool_attr(node, "In")?.unwrap_or(false);
    m.is_out = bool_attr(node, "Out")?.unwrap_or(false);

    if let Some(text) = options.default_attr.as_deref().and_then(|a| attr(node, a)) {
        if m.uses_parameters() {
            m.default_expr = Some(text.to_string());
        } else {
            let v = Value::parse(&m, text).map_err(|source| MetadataError::Default {
                member: m.name.clone(),
                source,
            })?;
            m.default = Some(v);
        }
    }
    trace!("parsed member {} of type {}", m.name, m.base_type());
    Ok(m)
}

/// Parse the child elements named `child_tag` of `parent`, rejecting duplicate names.
pub fn parse_members(
    parent: Node<'_, '_>,
    child_tag: &str,
    options: &ParseOptions,
) -> Result<Vec<Member>, MetadataError> {
    let mut members = Vec::new();
    let mut seen = HashSet::new();
    for child in parent.children().filter(|c| c.is_element()) {
        if !is_tag(child, child_tag) {
            return Err(MetadataError::Xml(format!(
                "unexpected element <{}> in {}",
                tag(child),
                owner(parent)
            )));
        }
        let mut m = parse_member(child, options)?;
        if !seen.insert(m.name.to_ascii_lowercase()) {
            return Err(MetadataError::DuplicateName {
                name: m.name,
                context: owner(parent),
            });
        }
        m.ordinal = members.len();
        members.push(m);
    }
    Ok(members)
}

/// Parse `<Operation>`: `<Argument>` children and, for two-way operations,
/// `<Exception>` children. The operation is not laid out yet.
pub fn parse_operation(node: Node<'_, '_>, options: &ParseOptions) -> Result<Operation, MetadataError> {
    check_attrs(node, OPERATION_ATTRS, None)?;
    let name = attr(node, "Name").ok_or_else(|| MetadataError::MissingAttribute {
        element: tag(node).to_string(),
        attribute: "Name".to_string(),
    })?;
    let mut args = Vec::new();
    let mut exceptions = Vec::new();
    let mut seen = HashSet::new();
    for child in node.children().filter(|c| c.is_element()) {
        if is_tag(child, "Argument") {
            let m = parse_member(child, options)?;
            if !seen.insert(m.name.to_ascii_lowercase()) {
                return Err(MetadataError::DuplicateName {
                    name: m.name,
                    context: owner(node),
                });
            }
            args.push(m);
        } else if is_tag(child, "Exception") {
            exceptions.push(parse_operation(child, options)?);
        } else {
            return Err(MetadataError::Xml(format!(
                "unexpected element <{}> in {}",
                tag(child),
                owner(node)
            )));
        }
    }
    let mut op = Operation::new(name.trim(), args);
    op.is_two_way = bool_attr(node, "TwoWay")?.unwrap_or(false);
    if !exceptions.is_empty() && !op.is_two_way {
        return Err(MetadataError::Operation {
            operation: op.name,
            message: "exceptions are only allowed on two-way operations".to_string(),
        });
    }
    op.exceptions = exceptions;
    Ok(op)
}

fn parse_summary(node: Node<'_, '_>) -> Result<SummaryAttributes, MetadataError> {
    Ok(SummaryAttributes {
        data_value_width: usize_attr(node, "DataValueWidth")?,
        data_value_granularity: usize_attr(node, "DataValueGranularity")?,
        diverse_data_sizes: bool_attr(node, "DiverseDataSizes")?,
        min_message_values: usize_attr(node, "MinMessageValues")?,
        max_message_values: usize_attr(node, "MaxMessageValues")?,
        variable_message_length: bool_attr(node, "VariableMessageLength")?,
        zero_length_messages: bool_attr(node, "ZeroLengthMessages")?,
        is_unbounded: bool_attr(node, "Unbounded")?,
        n_opcodes: usize_attr(node, "NumberOfOpcodes")?,
        is_two_way: bool_attr(node, "TwoWay")?,
        default_buffer_size: usize_attr(node, "DefaultBufferSize")?,
    })
}

/// Parse `<Protocol>`: its operations in opcode order and any summary attributes.
pub fn parse_protocol(node: Node<'_, '_>, options: &ParseOptions) -> Result<Protocol, MetadataError> {
    if !is_tag(node, "Protocol") {
        return Err(MetadataError::Xml(format!("expected <Protocol>, found <{}>", tag(node))));
    }
    check_attrs(node, PROTOCOL_ATTRS, None)?;
    let mut p = Protocol::new(attr(node, "Name").unwrap_or_default().trim());
    p.rules = options.rules;
    p.summary = parse_summary(node)?;
    for child in node.children().filter(|c| c.is_element()) {
        if !is_tag(child, "Operation") {
            return Err(MetadataError::Xml(format!(
                "unexpected element <{}> in {}",
                tag(child),
                owner(node)
            )));
        }
        p.finish_operation(parse_operation(child, options)?)?;
    }
    p.finish_parse()?;
    Ok(p)
}

fn document(text: &str) -> Result<Document<'_>, MetadataError> {
    Document::parse(text).map_err(|e| MetadataError::Xml(e.to_string()))
}

pub fn parse_protocol_str(text: &str, options: &ParseOptions) -> Result<Protocol, MetadataError> {
    let doc = document(text)?;
    parse_protocol(doc.root_element(), options)
}

pub fn load_protocol(path: &Path, options: &ParseOptions) -> Result<Protocol, MetadataError> {
    let text = std::fs::read_to_string(path).map_err(|source| MetadataError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_protocol_str(&text, options)
}

/// Parse a standalone member document (e.g. a property) and lay it out unless it
/// depends on parameters.
pub fn parse_member_str(text: &str, options: &ParseOptions) -> Result<Member, MetadataError> {
    let doc = document(text)?;
    let mut m = parse_member(doc.root_element(), options)?;
    if !m.uses_parameters() {
        m.compute_layout(&options.rules)?;
    }
    Ok(m)
}
