//! Operations (one message kind each) and protocols (a port's message vocabulary),
//! with the protocol-wide summary used to size buffers.

use crate::codec::{CodecError, Cursor, CursorMut, MeasureSink, Reader, Sink, Writer};
use crate::error::MetadataError;
use crate::expr::IdentResolver;
use crate::layout::{align_members, GroupLayout, LayoutRules};
use crate::member::{round_up, Member};
use crate::types::{BaseType, TypeKind};
use std::borrow::Cow;
use crate::value::{Value, ValueReader, ValueWriter};
use log::{debug, warn};
use std::collections::HashSet;

/// Buffer size used when a protocol has no maximum message size.
pub const DEFAULT_BUFFER_SIZE: usize = 2048;

/// Opcodes are 8 bits wide.
pub const MAX_OPCODES: usize = 256;

/// Argument name under which a port without operations carries a whole message.
pub const OPAQUE_ARG: &str = "data";

/// An unbounded octet sequence standing for a message body of unknown structure.
fn opaque_message() -> Result<Member, CodecError> {
    let mut m = Member::scalar(OPAQUE_ARG, BaseType::Octet).with_sequence(0);
    match m.compute_layout(&LayoutRules::message()) {
        Ok(_) => Ok(m),
        Err(e) => Err(CodecError::value(&m, e.to_string())),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub name: String,
    pub args: Vec<Member>,
    /// Replies of a two-way operation.
    pub exceptions: Vec<Operation>,
    pub is_two_way: bool,
    /// The single argument is a bounded sequence or a plain string whose count
    /// is implied by the message length.
    pub top_fixed_sequence: bool,
    /// Size of the argument list with every sequence and string at its maximum.
    pub my_offset: usize,
    /// Smallest possible message for this operation.
    pub min_bytes: usize,
    /// Alignment and summary flags of the argument list.
    pub layout: GroupLayout,
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>, context: &str) -> Result<(), MetadataError> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name.to_ascii_lowercase()) {
            return Err(MetadataError::DuplicateName {
                name: name.to_string(),
                context: context.to_string(),
            });
        }
    }
    Ok(())
}

fn gcd(a: usize, b: usize) -> usize {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

impl Operation {
    pub fn new(name: impl Into<String>, mut args: Vec<Member>) -> Self {
        for (i, m) in args.iter_mut().enumerate() {
            m.ordinal = i;
        }
        Operation {
            name: name.into(),
            args,
            exceptions: Vec::new(),
            is_two_way: false,
            top_fixed_sequence: false,
            my_offset: 0,
            min_bytes: 0,
            layout: GroupLayout::default(),
        }
    }

    pub fn find_arg(&self, name: &str) -> Option<&Member> {
        self.args.iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn uses_parameters(&self) -> bool {
        self.args.iter().any(Member::uses_parameters)
            || self.exceptions.iter().any(Operation::uses_parameters)
    }

    fn top_candidate(&self) -> bool {
        match self.args.as_slice() {
            [m] => {
                let bounded_sequence = m.sequence_length().is_some_and(|b| b > 0);
                let plain_string = !m.is_sequence()
                    && m.array_rank() == 0
                    && matches!(m.value_type.kind, TypeKind::String { .. });
                bounded_sequence || plain_string
            }
            _ => false,
        }
    }

    /// Check argument names, decide the top-fixed sequence and lay out the arguments.
    pub fn finish(&mut self, rules: &LayoutRules) -> Result<(), MetadataError> {
        check_unique(self.args.iter().map(|m| m.name.as_str()), &format!("operation \"{}\"", self.name))?;
        let mut top = self.top_candidate();
        if top && self.args[0].is_sequence() {
            // a sequence only goes without its count when its elements have a fixed size
            self.args[0].compute_layout(rules)?;
            top = self.args[0].layout.element_fixed;
        }
        self.top_fixed_sequence = top;
        let mut group = GroupLayout::default();
        if top {
            self.args[0].offset(&mut group, rules, true)?;
        } else {
            align_members(&mut self.args, &mut group, rules)?;
        }
        self.my_offset = group.offset;
        self.min_bytes = self
            .args
            .iter()
            .fold(0, |off, m| round_up(off, m.layout.align.max(1)) + m.min_bytes());
        self.layout = group;
        for e in self.exceptions.iter_mut() {
            e.finish(rules)?;
        }
        debug!(
            "operation {}: {} args, size {} min {} align {} top {} variable {} unbounded {}",
            self.name,
            self.args.len(),
            self.my_offset,
            self.min_bytes,
            group.max_align,
            top,
            group.variable,
            group.unbounded
        );
        Ok(())
    }

    /// Resolve symbolic extents and deferred defaults of every argument, then lay out.
    pub fn finalize(&mut self, resolver: &dyn IdentResolver, rules: &LayoutRules) -> Result<(), MetadataError> {
        for m in self.args.iter_mut() {
            m.resolve_extents(resolver)?;
            m.finalize_defaults()?;
        }
        for e in self.exceptions.iter_mut() {
            e.finalize(resolver, rules)?;
        }
        self.finish(rules)
    }

    /// Largest message in bytes; `None` when unbounded.
    pub fn max_bytes(&self) -> Option<usize> {
        if self.layout.unbounded {
            None
        } else {
            Some(self.my_offset)
        }
    }

    /// GCD of the argument element sizes in bytes (0 without arguments).
    fn granularity_bytes(&self) -> usize {
        self.args.iter().fold(0, |g, m| {
            let l = &m.layout;
            let size = if !l.element_fixed {
                1
            } else if m.is_sequence() {
                m.sequence_stride()
            } else {
                l.element_bytes
            };
            gcd(g, size)
        })
    }
}

/// Summary attributes given explicitly in metadata. Each one that is set overrides the
/// value derived from the operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryAttributes {
    pub data_value_width: Option<usize>,
    pub data_value_granularity: Option<usize>,
    pub diverse_data_sizes: Option<bool>,
    pub min_message_values: Option<usize>,
    pub max_message_values: Option<usize>,
    pub variable_message_length: Option<bool>,
    pub zero_length_messages: Option<bool>,
    pub is_unbounded: Option<bool>,
    pub n_opcodes: Option<usize>,
    pub is_two_way: Option<bool>,
    pub default_buffer_size: Option<usize>,
}

impl SummaryAttributes {
    pub fn is_empty(&self) -> bool {
        *self == SummaryAttributes::default()
    }
}

/// Byte-level running totals over the finished operations.
#[derive(Debug, Clone, Default, PartialEq)]
struct Totals {
    group: GroupLayout,
    min_bytes: Option<usize>,
    max_bytes: usize,
    /// Size shared by every operation so far, while they agree.
    common_bytes: Option<usize>,
    disagree: bool,
    granularity_bytes: usize,
    two_way: bool,
}

/// A port's message vocabulary and its summary.
///
/// The summary fields hold placeholders until [`Protocol::summary_ready`] is true:
/// `finish_parse` leaves them untouched while operations wait on parameters, and
/// `finalize` fills them in.
#[derive(Debug, Clone, PartialEq)]
pub struct Protocol {
    pub name: String,
    pub operations: Vec<Operation>,
    /// Smallest scalar width in bits.
    pub data_value_width: usize,
    /// Every message is a multiple of this many data values.
    pub data_value_granularity: usize,
    pub diverse_data_sizes: bool,
    pub min_message_values: usize,
    /// `None` when messages have no upper bound.
    pub max_message_values: Option<usize>,
    pub variable_message_length: bool,
    pub zero_length_messages: bool,
    pub is_two_way: bool,
    pub is_unbounded: bool,
    pub n_opcodes: usize,
    pub default_buffer_size: usize,
    /// Largest alignment of any argument.
    pub max_align: usize,
    pub summary: SummaryAttributes,
    pub rules: LayoutRules,
    totals: Totals,
    summary_ready: bool,
}

impl Default for Protocol {
    fn default() -> Self {
        Protocol::new("")
    }
}

impl Protocol {
    pub fn new(name: impl Into<String>) -> Self {
        Protocol {
            name: name.into(),
            operations: Vec::new(),
            data_value_width: 8,
            data_value_granularity: 1,
            diverse_data_sizes: false,
            min_message_values: 0,
            max_message_values: Some(0),
            variable_message_length: false,
            zero_length_messages: false,
            is_two_way: false,
            is_unbounded: false,
            n_opcodes: 0,
            default_buffer_size: 0,
            max_align: 1,
            summary: SummaryAttributes::default(),
            rules: LayoutRules::message(),
            totals: Totals::default(),
            summary_ready: false,
        }
    }

    /// A port without a protocol accepts anything.
    pub fn no_protocol() -> Self {
        let mut p = Protocol::new("");
        p.init_no_protocol();
        p
    }

    pub fn init_no_protocol(&mut self) {
        warn!("port has no protocol \"{}\": accepting any message", self.name);
        self.operations.clear();
        self.totals = Totals::default();
        self.data_value_width = 8;
        self.data_value_granularity = 1;
        self.diverse_data_sizes = true;
        self.min_message_values = 0;
        self.max_message_values = None;
        self.variable_message_length = true;
        self.zero_length_messages = true;
        self.is_two_way = false;
        self.is_unbounded = true;
        self.n_opcodes = MAX_OPCODES;
        self.default_buffer_size = DEFAULT_BUFFER_SIZE;
        self.max_align = 1;
        self.summary_ready = true;
    }

    pub fn find_operation(&self, name: &str) -> Option<(usize, &Operation)> {
        self.operations
            .iter()
            .enumerate()
            .find(|(_, op)| op.name.eq_ignore_ascii_case(name))
    }

    pub fn operation(&self, opcode: usize) -> Result<&Operation, CodecError> {
        self.operations.get(opcode).ok_or(CodecError::UnknownOpcode(opcode))
    }

    pub fn max_alignment(&self) -> usize {
        self.max_align
    }

    pub fn default_buffer_size(&self) -> usize {
        self.default_buffer_size
    }

    /// Whether the summary fields describe the operations. False before `finish_parse`
    /// and while any operation still depends on unresolved parameters.
    pub fn summary_ready(&self) -> bool {
        self.summary_ready
    }

    fn pending(&self) -> bool {
        self.operations.iter().any(Operation::uses_parameters)
    }

    /// Add an operation, laying it out unless it depends on parameters, and fold it
    /// into the running totals.
    pub fn finish_operation(&mut self, mut op: Operation) -> Result<(), MetadataError> {
        if self.find_operation(&op.name).is_some() {
            return Err(MetadataError::DuplicateName {
                name: op.name.clone(),
                context: format!("protocol \"{}\"", self.name),
            });
        }
        if !op.uses_parameters() {
            op.finish(&self.rules)?;
            self.fold(&op);
        }
        self.operations.push(op);
        Ok(())
    }

    fn fold(&mut self, op: &Operation) {
        let t = &mut self.totals;
        t.group.max_align = t.group.max_align.max(op.layout.max_align);
        t.group.fold_flags(&op.layout);
        t.min_bytes = Some(t.min_bytes.map_or(op.min_bytes, |m| m.min(op.min_bytes)));
        t.max_bytes = t.max_bytes.max(op.my_offset);
        match t.common_bytes {
            None if !t.disagree => t.common_bytes = Some(op.my_offset),
            Some(n) if n != op.my_offset => {
                t.disagree = true;
                t.common_bytes = None;
            }
            _ => {}
        }
        if op.layout.variable {
            t.disagree = true;
        }
        t.granularity_bytes = gcd(t.granularity_bytes, op.granularity_bytes());
        t.two_way |= op.is_two_way;
    }

    fn derive(&mut self) {
        let t = &self.totals;
        let width = if t.group.min_size_bits == 0 { 8 } else { t.group.min_size_bits };
        let values = |bytes: usize| (bytes * 8).div_ceil(width);
        self.data_value_width = width;
        let granularity_bits = t.granularity_bytes * 8;
        self.data_value_granularity = if granularity_bits != 0 && granularity_bits % width == 0 {
            granularity_bits / width
        } else {
            1
        };
        self.diverse_data_sizes = t.group.diverse_sizes;
        self.min_message_values = values(t.min_bytes.unwrap_or(0));
        self.is_unbounded = t.group.unbounded;
        self.max_message_values = if t.group.unbounded { None } else { Some(values(t.max_bytes)) };
        self.variable_message_length = t.disagree || t.group.variable;
        self.zero_length_messages = t.min_bytes == Some(0);
        self.is_two_way = t.two_way;
        self.n_opcodes = self.operations.len();
        self.max_align = t.group.max_align;
    }

    fn apply_summary(&mut self) {
        let s = self.summary.clone();
        if let Some(v) = s.data_value_width {
            self.data_value_width = v;
        }
        if let Some(v) = s.data_value_granularity {
            self.data_value_granularity = v;
        }
        if let Some(v) = s.diverse_data_sizes {
            self.diverse_data_sizes = v;
        }
        if let Some(v) = s.min_message_values {
            self.min_message_values = v;
        }
        if let Some(v) = s.max_message_values {
            self.max_message_values = Some(v);
            if s.is_unbounded.is_none() {
                self.is_unbounded = false;
            }
        }
        if let Some(v) = s.is_unbounded {
            self.is_unbounded = v;
            if v && s.max_message_values.is_none() {
                self.max_message_values = None;
            }
        }
        if let Some(v) = s.variable_message_length {
            self.variable_message_length = v;
        }
        if let Some(v) = s.zero_length_messages {
            self.zero_length_messages = v;
        }
        if let Some(v) = s.n_opcodes {
            self.n_opcodes = v;
        }
        if let Some(v) = s.is_two_way {
            self.is_two_way = v;
        }
    }

    fn error(&self, message: impl Into<String>) -> MetadataError {
        MetadataError::Protocol {
            protocol: self.name.clone(),
            message: message.into(),
        }
    }

    /// Derive the summary from the operations (or the no-protocol defaults when there
    /// are none), apply explicit summary attributes, then check that the result is
    /// consistent and size the default buffer.
    pub fn finish_parse(&mut self) -> Result<(), MetadataError> {
        if self.pending() {
            debug!("protocol {}: summary deferred until parameters are resolved", self.name);
            self.summary_ready = false;
            return Ok(());
        }
        if self.operations.is_empty() {
            self.init_no_protocol();
        } else {
            self.derive();
        }
        self.apply_summary();
        self.summary_ready = false;
        self.check()?;
        self.default_buffer_size = match (self.summary.default_buffer_size, self.max_message_values) {
            (Some(size), _) => size,
            (None, Some(max)) => (max * self.data_value_width).div_ceil(8),
            (None, None) => DEFAULT_BUFFER_SIZE,
        };
        debug!(
            "protocol {}: {} opcodes, width {} granularity {} min {} max {:?} variable {} zero {} unbounded {} buffer {}",
            self.name,
            self.n_opcodes,
            self.data_value_width,
            self.data_value_granularity,
            self.min_message_values,
            self.max_message_values,
            self.variable_message_length,
            self.zero_length_messages,
            self.is_unbounded,
            self.default_buffer_size
        );
        self.summary_ready = true;
        Ok(())
    }

    fn check(&self) -> Result<(), MetadataError> {
        if self.data_value_width == 0 {
            return Err(self.error("DataValueWidth must be positive"));
        }
        if self.data_value_granularity == 0 {
            return Err(self.error("DataValueGranularity must be positive"));
        }
        if self.zero_length_messages && self.min_message_values > 0 {
            return Err(self.error(format!(
                "ZeroLengthMessages is true but MinMessageValues is {}",
                self.min_message_values
            )));
        }
        match self.max_message_values {
            None if !(self.is_unbounded && self.variable_message_length) => {
                return Err(self.error(
                    "no MaxMessageValues requires the protocol to be unbounded with variable message length",
                ))
            }
            Some(_) if self.is_unbounded => {
                return Err(self.error("an unbounded protocol cannot have MaxMessageValues"))
            }
            Some(max) if max < self.min_message_values => {
                return Err(self.error(format!(
                    "MaxMessageValues {} is less than MinMessageValues {}",
                    max, self.min_message_values
                )))
            }
            _ => {}
        }
        if self.n_opcodes > MAX_OPCODES {
            return Err(self.error(format!("NumberOfOpcodes {} exceeds {}", self.n_opcodes, MAX_OPCODES)));
        }
        if self.n_opcodes < self.operations.len() {
            return Err(self.error(format!(
                "NumberOfOpcodes {} is less than the {} operations",
                self.n_opcodes,
                self.operations.len()
            )));
        }
        Ok(())
    }

    /// Resolve parameters of every operation and recompute the summary.
    pub fn finalize(&mut self, resolver: &dyn IdentResolver) -> Result<(), MetadataError> {
        self.totals = Totals::default();
        let mut operations = std::mem::take(&mut self.operations);
        for op in operations.iter_mut() {
            op.finalize(resolver, &self.rules)?;
            self.fold(op);
        }
        self.operations = operations;
        self.finish_parse()
    }

    /// Arguments of `opcode` with its operation name and top-fixed flag. Without
    /// operations, any opcode below `n_opcodes` carries its body unchanged as one
    /// unbounded octet sequence named [`OPAQUE_ARG`].
    fn message_args(&self, opcode: usize) -> Result<(&str, Cow<'_, [Member]>, bool), CodecError> {
        if self.operations.is_empty() && opcode < self.n_opcodes {
            return Ok(("", Cow::Owned(vec![opaque_message()?]), true));
        }
        let op = self.operation(opcode)?;
        Ok((op.name.as_str(), Cow::Borrowed(op.args.as_slice()), op.top_fixed_sequence))
    }

    /// Walk one message: `write_opcode`, each argument, then `end`.
    ///
    /// Returns the bytes consumed from `data`. Bytes after the last argument are not an
    /// error; compare the result with `data.len()` to detect them.
    pub fn write_message<W: Writer + ?Sized>(&self, writer: &mut W, opcode: usize, data: &[u8]) -> Result<usize, CodecError> {
        let (name, args, top) = self.message_args(opcode)?;
        writer.write_opcode(name, opcode)?;
        let mut cursor = Cursor::new(data);
        for m in args.iter() {
            m.write(writer, &mut cursor, top)?;
        }
        writer.end()?;
        if cursor.remaining() > 0 {
            debug!(
                "protocol {} opcode {}: {} bytes after the last argument",
                self.name,
                opcode,
                cursor.remaining()
            );
        }
        Ok(cursor.position())
    }

    /// Lay out one message supplied by `reader` in `out`; returns the message length.
    pub fn read_message<R: Reader + ?Sized>(&self, reader: &mut R, opcode: usize, out: &mut [u8]) -> Result<usize, CodecError> {
        let (_, args, top) = self.message_args(opcode)?;
        let mut cursor = CursorMut::new(out);
        for m in args.iter() {
            m.read_into(reader, &mut cursor, top)?;
        }
        reader.end()?;
        Ok(cursor.position())
    }

    /// Length `read_message` would produce, without a buffer.
    pub fn measure_message<R: Reader + ?Sized>(&self, reader: &mut R, opcode: usize) -> Result<usize, CodecError> {
        let (_, args, top) = self.message_args(opcode)?;
        let mut sink = MeasureSink::default();
        for m in args.iter() {
            m.read_into(reader, &mut sink, top)?;
        }
        reader.end()?;
        Ok(sink.position())
    }

    /// Lay out a message from a struct value keyed by argument name.
    pub fn encode_message(&self, opcode: usize, args: &Value) -> Result<Vec<u8>, CodecError> {
        let fields = match args {
            Value::Struct(fields) => fields.as_slice(),
            other => {
                return Err(CodecError::Value {
                    member: self.message_args(opcode)?.0.to_string(),
                    message: format!("message arguments must be a struct value, found {}", other),
                })
            }
        };
        let n = self.measure_message(&mut ValueReader::for_message(fields), opcode)?;
        let mut buf = vec![0u8; n];
        self.read_message(&mut ValueReader::for_message(fields), opcode, &mut buf)?;
        Ok(buf)
    }

    /// Rebuild a message's arguments as a struct value.
    pub fn decode_message(&self, opcode: usize, data: &[u8]) -> Result<Value, CodecError> {
        let mut writer = ValueWriter::for_message();
        self.write_message(&mut writer, opcode, data)?;
        Ok(writer.into_value().unwrap_or(Value::Struct(Vec::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcd_of_sizes() {
        assert_eq!(gcd(0, 12), 12);
        assert_eq!(gcd(12, 8), 4);
        assert_eq!(gcd(7, 4), 1);
    }

    #[test]
    fn summary_override_clears_unbounded() {
        let mut p = Protocol::new("p");
        p.summary.max_message_values = Some(64);
        p.summary.data_value_width = Some(32);
        p.finish_parse().expect("finish");
        assert!(!p.is_unbounded);
        assert_eq!(p.max_message_values, Some(64));
        assert_eq!(p.default_buffer_size, 256);
    }
}
