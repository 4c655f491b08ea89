//! Metadata errors: everything that can go wrong while parsing member/protocol
//! metadata, resolving symbolic extents or computing layout.
//!
//! Runtime walking errors live in [`crate::codec::CodecError`].

use crate::value::ValueError;

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("XML: {0}")]
    Xml(String),
    #[error("reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("missing required attribute \"{attribute}\" in {element}")]
    MissingAttribute { element: String, attribute: String },
    #[error("unknown type \"{type_name}\" for member \"{member}\"")]
    UnknownType { member: String, type_name: String },
    #[error("invalid attribute \"{attribute}\" for \"{owner}\": {message}")]
    InvalidAttribute {
        owner: String,
        attribute: String,
        message: String,
    },
    #[error("duplicate name \"{name}\" in {context}")]
    DuplicateName { name: String, context: String },
    #[error("member \"{member}\": {message}")]
    Invalid { member: String, message: String },
    #[error("member \"{0}\": sequence must be bounded")]
    UnboundedSequence(String),
    #[error("member \"{0}\": string must be bounded")]
    UnboundedString(String),
    #[error("member \"{0}\": sequences of strings are not supported")]
    StringSequence(String),
    #[error("member \"{0}\": total array size in bytes is too large")]
    SizeOverflow(String),
    #[error("member \"{0}\": total number of elements is too large")]
    CountOverflow(String),
    #[error("member \"{member}\": extent \"{expr}\" is not resolved")]
    Unresolved { member: String, expr: String },
    #[error("expression \"{expr}\": {message}")]
    Expression { expr: String, message: String },
    #[error("member \"{member}\": invalid default value: {source}")]
    Default {
        member: String,
        #[source]
        source: ValueError,
    },
    #[error("operation \"{operation}\": {message}")]
    Operation { operation: String, message: String },
    #[error("protocol \"{protocol}\": {message}")]
    Protocol { protocol: String, message: String },
}

impl MetadataError {
    pub(crate) fn invalid(member: &str, message: impl Into<String>) -> Self {
        MetadataError::Invalid {
            member: member.to_string(),
            message: message.into(),
        }
    }
}
