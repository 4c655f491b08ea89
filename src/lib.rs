//! # protolayout: typed data layout and serialization
//!
//! Computes the flat-buffer layout of nested typed values (scalars, strings, enums,
//! structs, recursive type wrappers, fixed arrays, bounded and unbounded sequences)
//! and walks that layout to stream values into and out of abstract
//! [`Writer`]/[`Reader`] sinks. Operations and protocols aggregate argument layout
//! into the summary figures (message sizes, data value width, granularity) that
//! transports use to size buffers.
//!
//! ## Pipeline
//!
//! 1. Metadata is parsed from XML ([`xml`]) or built directly ([`Member::scalar`],
//!    [`Member::structure`], ...).
//! 2. [`Member::compute_layout`] / [`Operation::finish`] assign offsets and sizes, or
//!    [`Member::finalize`] does so once symbolic extents are resolved by an
//!    [`IdentResolver`].
//! 3. [`Member::write`] / [`Protocol::write_message`] walk a flat buffer into a writer;
//!    [`Member::read`] / [`Protocol::read_message`] lay out what a reader supplies.
//!
//! ## Example XML
//!
//! ```text
//! <Protocol Name="samples">
//!   <Operation Name="data">
//!     <Argument Name="values" Type="Short" SequenceLength="2048"/>
//!   </Operation>
//!   <Operation Name="tune">
//!     <Argument Name="frequency" Type="Double"/>
//!     <Argument Name="label" Type="String" StringLength="16"/>
//!   </Operation>
//! </Protocol>
//! ```

pub mod codec;
pub mod dump;
pub mod error;
pub mod expr;
pub mod layout;
pub mod member;
pub mod parser;
pub mod protocol;
pub mod types;
pub mod value;
pub mod xml;

pub use codec::{CodecError, Cursor, CursorMut, Reader, StructureHooks, Writer};
pub use dump::TextWriter;
pub use error::MetadataError;
pub use expr::{ExprValue, IdentResolver, NoSymbols};
pub use layout::{align_members, GroupLayout, LayoutRow, LayoutRules};
pub use member::{Layout, Member};
pub use protocol::{Operation, Protocol, SummaryAttributes};
pub use types::{BaseType, Extent, TypeKind, ValueType};
pub use value::{Value, ValueError, ValueReader, ValueWriter};
pub use xml::{load_protocol, parse_member_str, parse_protocol_str, ParseOptions};
