//! Walk flat, pre-laid-out buffers in lock-step with member layout.
//!
//! [`Member::write`] consumes bytes from a buffer and emits structured calls on a
//! [`Writer`]; [`Member::read`] takes structured calls from a [`Reader`] and lays the
//! bytes out in a buffer. [`Member::measure_length`] runs the same traversal as `read`
//! against a sink that only counts bytes, for sizing buffers up front. It never
//! allocates a payload buffer; readers see `skip_data` instead of `read_data`.
//!
//! ## Wire rules
//!
//! - Sequences start with a 32-bit element count in native byte order, occupying
//!   the sequence's alignment (at least 4 bytes), except for an operation's top-fixed
//!   sequence, whose count is the remaining message length divided by the element stride.
//! - A zero count skips the payload without struct/array callbacks.
//! - Scalar runs are handed over in one `write_data`/`read_data` call per array block
//!   (per whole sequence when there are no array dimensions).
//! - Arrays nest inside sequences: array brackets are emitted once per sequence element.
//! - Fixed strings occupy exactly their element size; variable strings take their
//!   characters plus the NUL.
//! - A member with a fixed layout always consumes exactly its `n_bytes`, whatever the
//!   actual sequence count.

use crate::member::{round_up, Member};
use crate::types::TypeKind;
use byteorder::{ByteOrder, NativeEndian};

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Aligning data exceeds buffer: need {need} bytes at offset {offset}, buffer has {len}")]
    Underrun { offset: usize, need: usize, len: usize },
    #[error("Sequence \"{member}\" exceeds max length ({bound}): {count}")]
    SequenceTooLong {
        member: String,
        count: usize,
        bound: usize,
    },
    #[error("String \"{member}\" exceeds max length ({bound}): {len}")]
    StringTooLong {
        member: String,
        len: usize,
        bound: usize,
    },
    #[error("String \"{member}\" is not terminated within {space} bytes")]
    UnterminatedString { member: String, space: usize },
    #[error("Top-level sequence \"{member}\": {remaining} bytes is not a whole number of {stride}-byte elements")]
    TopSequenceLength {
        member: String,
        remaining: usize,
        stride: usize,
    },
    #[error("Unknown opcode {0}")]
    UnknownOpcode(usize),
    #[error("Member \"{member}\": {message}")]
    Value { member: String, message: String },
}

impl CodecError {
    pub fn value(member: &Member, message: impl Into<String>) -> Self {
        CodecError::Value {
            member: member.name.clone(),
            message: message.into(),
        }
    }
}

/// Optional structural callbacks shared by writers and readers. Every method
/// defaults to a no-op, so `impl StructureHooks for MySink {}` is enough for sinks
/// that only care about data.
pub trait StructureHooks {
    fn begin_struct(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    fn end_struct(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    fn begin_array(&mut self, _member: &Member, _n_items: usize) -> Result<(), CodecError> {
        Ok(())
    }
    fn end_array(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    fn begin_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    fn end_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    fn end_sequence(&mut self, _member: &Member) -> Result<(), CodecError> {
        Ok(())
    }
    /// End of a whole message.
    fn end(&mut self) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Receives the contents of a flat buffer.
pub trait Writer: StructureHooks {
    fn write_opcode(&mut self, _name: &str, _opcode: usize) -> Result<(), CodecError> {
        Ok(())
    }
    fn begin_sequence(&mut self, member: &Member, n_elements: usize) -> Result<(), CodecError>;
    /// `data` excludes the NUL and any padding.
    fn write_string(&mut self, member: &Member, data: &[u8], first: bool, top: bool) -> Result<(), CodecError>;
    /// `data` holds `n_elements` contiguous scalars of the member's base type.
    fn write_data(&mut self, member: &Member, data: &[u8], n_elements: usize) -> Result<(), CodecError>;
}

/// Supplies the contents to be laid out in a flat buffer.
pub trait Reader: StructureHooks {
    /// Number of elements of the sequence about to be read.
    fn begin_sequence(&mut self, member: &Member) -> Result<usize, CodecError>;
    /// Characters of the next string, without NUL.
    fn begin_string(&mut self, member: &Member, first: bool) -> Result<&[u8], CodecError>;
    /// Fill `data` with `n_elements` contiguous scalars of the member's base type.
    fn read_data(&mut self, member: &Member, data: &mut [u8], n_elements: usize) -> Result<(), CodecError>;
    /// Called instead of `read_data` while measuring: consume `n_elements` scalars
    /// without producing their bytes.
    fn skip_data(&mut self, _member: &Member, _n_elements: usize) -> Result<(), CodecError> {
        Ok(())
    }
}

/// Read position over a borrowed flat buffer.
#[derive(Debug, Clone)]
pub struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Cursor { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Bytes from the current position to the end.
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(CodecError::Underrun {
                offset: self.pos,
                need: pos.saturating_sub(self.pos),
                len: self.data.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn align(&mut self, align: usize) -> Result<(), CodecError> {
        self.seek(round_up(self.pos, align.max(1)))
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        let start = self.pos;
        let end = start.checked_add(n).unwrap_or(usize::MAX);
        self.seek(end)?;
        Ok(&self.data[start..end])
    }

    fn read_count(&mut self) -> Result<usize, CodecError> {
        let b = self.take(4)?;
        Ok(NativeEndian::read_u32(b) as usize)
    }
}

/// Destination of a read traversal.
pub(crate) trait Sink {
    fn position(&self) -> usize;
    /// Advance by `n` bytes; the slot is `None` when there is no buffer behind the sink.
    fn take(&mut self, n: usize) -> Result<Option<&mut [u8]>, CodecError>;
    /// Move forward to `pos`; skipped bytes are zeroed where a buffer exists.
    fn skip_to(&mut self, pos: usize) -> Result<(), CodecError>;

    fn align(&mut self, align: usize) -> Result<(), CodecError> {
        let p = round_up(self.position(), align.max(1));
        self.skip_to(p)
    }
}

/// Write position over a mutable flat buffer.
#[derive(Debug)]
pub struct CursorMut<'a> {
    data: &'a mut [u8],
    pos: usize,
}

impl<'a> CursorMut<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        CursorMut { data, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn underrun(&self, need: usize) -> CodecError {
        CodecError::Underrun {
            offset: self.pos,
            need,
            len: self.data.len(),
        }
    }
}

impl Sink for CursorMut<'_> {
    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<Option<&mut [u8]>, CodecError> {
        let start = self.pos;
        let end = match start.checked_add(n) {
            Some(end) if end <= self.data.len() => end,
            _ => return Err(self.underrun(n)),
        };
        self.pos = end;
        Ok(Some(&mut self.data[start..end]))
    }

    fn skip_to(&mut self, pos: usize) -> Result<(), CodecError> {
        if pos > self.data.len() {
            return Err(self.underrun(pos.saturating_sub(self.pos)));
        }
        if pos > self.pos {
            self.data[self.pos..pos].fill(0);
        }
        self.pos = pos;
        Ok(())
    }
}

/// Counts bytes without a destination buffer.
#[derive(Debug, Default)]
pub(crate) struct MeasureSink {
    pos: usize,
}

impl Sink for MeasureSink {
    fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize) -> Result<Option<&mut [u8]>, CodecError> {
        self.pos = self.pos.checked_add(n).ok_or(CodecError::Underrun {
            offset: self.pos,
            need: n,
            len: usize::MAX,
        })?;
        Ok(None)
    }

    fn skip_to(&mut self, pos: usize) -> Result<(), CodecError> {
        self.pos = pos;
        Ok(())
    }
}

fn span(count: usize, size: usize) -> Result<usize, CodecError> {
    count.checked_mul(size).ok_or(CodecError::Underrun {
        offset: 0,
        need: usize::MAX,
        len: 0,
    })
}

fn check_bound(m: &Member, count: usize) -> Result<(), CodecError> {
    match m.sequence_length() {
        Some(bound) if bound > 0 && count > bound => Err(CodecError::SequenceTooLong {
            member: m.name.clone(),
            count,
            bound,
        }),
        _ => Ok(()),
    }
}

fn check_string(m: &Member, len: usize) -> Result<(), CodecError> {
    match m.string_length() {
        Some(bound) if bound > 0 && len > bound => Err(CodecError::StringTooLong {
            member: m.name.clone(),
            len,
            bound,
        }),
        _ => Ok(()),
    }
}

fn implied_count(m: &Member, remaining: usize) -> Result<usize, CodecError> {
    let stride = m.sequence_stride();
    if stride == 0 || remaining % stride != 0 {
        return Err(CodecError::TopSequenceLength {
            member: m.name.clone(),
            remaining,
            stride,
        });
    }
    Ok(remaining / stride)
}

fn is_scalar_kind(m: &Member) -> bool {
    matches!(m.value_type.kind, TypeKind::Scalar(_) | TypeKind::Enum(_))
}

impl Member {
    /// Emit the value at `cursor` to `writer`, advancing past exactly the bytes it occupies.
    ///
    /// `top` is the operation's top-fixed-sequence flag for its single argument.
    pub fn write<W: Writer + ?Sized>(&self, writer: &mut W, cursor: &mut Cursor<'_>, top: bool) -> Result<(), CodecError> {
        let l = &self.layout;
        cursor.align(l.align)?;
        let start = cursor.position();
        if self.is_sequence() {
            let implied = top && !l.fixed_layout;
            let count = if implied {
                implied_count(self, cursor.remaining())?
            } else {
                let count = cursor.read_count()?;
                cursor.seek(start + l.align)?;
                // every element occupies at least one byte
                if count > cursor.remaining() {
                    return Err(CodecError::Underrun {
                        offset: cursor.position(),
                        need: count,
                        len: cursor.position() + cursor.remaining(),
                    });
                }
                count
            };
            check_bound(self, count)?;
            writer.begin_sequence(self, count)?;
            if count > 0 {
                self.write_elements(writer, cursor, count, implied)?;
            }
            writer.end_sequence(self)?;
        } else {
            self.write_elements(writer, cursor, 1, top)?;
        }
        if l.fixed_layout {
            cursor.seek(start + l.n_bytes)?;
        }
        Ok(())
    }

    /// Walk a whole buffer holding this member at offset 0; returns the bytes consumed.
    pub fn write_buffer<W: Writer + ?Sized>(&self, writer: &mut W, data: &[u8]) -> Result<usize, CodecError> {
        let mut cursor = Cursor::new(data);
        self.write(writer, &mut cursor, false)?;
        Ok(cursor.position())
    }

    fn write_elements<W: Writer + ?Sized>(
        &self,
        writer: &mut W,
        cursor: &mut Cursor<'_>,
        count: usize,
        top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        let rank = self.array_rank();
        if rank == 0 && is_scalar_kind(self) {
            cursor.align(l.data_align)?;
            let data = cursor.take(span(count, l.element_bytes)?)?;
            return writer.write_data(self, data, count);
        }
        let stride = self.sequence_stride();
        for i in 0..count {
            cursor.align(l.data_align)?;
            let element_start = cursor.position();
            if rank > 0 {
                writer.begin_array(self, l.n_items)?;
            }
            self.write_items(writer, cursor, i == 0, top)?;
            if rank > 0 {
                writer.end_array(self)?;
            }
            if self.is_sequence() && l.element_fixed {
                cursor.seek(element_start + stride)?;
            }
        }
        Ok(())
    }

    /// One array block (or one element when not an array).
    fn write_items<W: Writer + ?Sized>(
        &self,
        writer: &mut W,
        cursor: &mut Cursor<'_>,
        first: bool,
        top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        let n = l.n_items;
        match &self.value_type.kind {
            TypeKind::Scalar(_) | TypeKind::Enum(_) => {
                cursor.align(l.data_align)?;
                let data = cursor.take(span(n, l.element_bytes)?)?;
                writer.write_data(self, data, n)
            }
            TypeKind::String { .. } => {
                for i in 0..n {
                    self.write_string_item(writer, cursor, first && i == 0, top)?;
                }
                Ok(())
            }
            TypeKind::Struct(members) => {
                for _ in 0..n {
                    cursor.align(l.data_align)?;
                    writer.begin_struct(self)?;
                    for m in members {
                        m.write(writer, cursor, false)?;
                    }
                    writer.end_struct(self)?;
                }
                Ok(())
            }
            TypeKind::Type(inner) => {
                for _ in 0..n {
                    cursor.align(l.data_align)?;
                    writer.begin_type(self)?;
                    inner.write(writer, cursor, false)?;
                    writer.end_type(self)?;
                }
                Ok(())
            }
        }
    }

    fn write_string_item<W: Writer + ?Sized>(
        &self,
        writer: &mut W,
        cursor: &mut Cursor<'_>,
        first: bool,
        top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        cursor.align(4)?;
        let begin = cursor.position();
        let slot = if l.element_fixed {
            cursor.take(l.element_bytes)?
        } else {
            cursor.rest()
        };
        let len = slot
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| CodecError::UnterminatedString {
                member: self.name.clone(),
                space: slot.len(),
            })?;
        check_string(self, len)?;
        writer.write_string(self, &slot[..len], first, top)?;
        if !l.element_fixed {
            cursor.seek(begin + len + 1)?;
        }
        Ok(())
    }

    /// Lay out the value supplied by `reader` at `cursor`.
    pub fn read<R: Reader + ?Sized>(&self, reader: &mut R, cursor: &mut CursorMut<'_>, top: bool) -> Result<(), CodecError> {
        self.read_into(reader, cursor, top)
    }

    /// Lay out this member at offset 0 of `out`; returns the bytes used.
    pub fn read_buffer<R: Reader + ?Sized>(&self, reader: &mut R, out: &mut [u8]) -> Result<usize, CodecError> {
        let mut cursor = CursorMut::new(out);
        self.read_into(reader, &mut cursor, false)?;
        Ok(cursor.position())
    }

    /// Bytes `read` would use for the value supplied by `reader`, without a buffer.
    pub fn measure_length<R: Reader + ?Sized>(&self, reader: &mut R, top: bool) -> Result<usize, CodecError> {
        let mut sink = MeasureSink::default();
        self.read_into(reader, &mut sink, top)?;
        Ok(sink.position())
    }

    pub(crate) fn read_into<R: Reader + ?Sized, S: Sink>(
        &self,
        reader: &mut R,
        sink: &mut S,
        top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        sink.align(l.align)?;
        let start = sink.position();
        if self.is_sequence() {
            let implied = top && !l.fixed_layout;
            let count = reader.begin_sequence(self)?;
            check_bound(self, count)?;
            if !implied {
                let n = u32::try_from(count)
                    .map_err(|_| CodecError::value(self, format!("sequence count {} does not fit 32 bits", count)))?;
                if let Some(slot) = sink.take(l.align)? {
                    NativeEndian::write_u32(&mut slot[..4], n);
                    slot[4..].fill(0);
                }
            }
            if count > 0 {
                self.read_elements(reader, sink, count, implied)?;
            }
            reader.end_sequence(self)?;
        } else {
            self.read_elements(reader, sink, 1, top)?;
        }
        if l.fixed_layout {
            sink.skip_to(start + l.n_bytes)?;
        }
        Ok(())
    }

    fn read_elements<R: Reader + ?Sized, S: Sink>(
        &self,
        reader: &mut R,
        sink: &mut S,
        count: usize,
        top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        let rank = self.array_rank();
        if rank == 0 && is_scalar_kind(self) {
            sink.align(l.data_align)?;
            return match sink.take(span(count, l.element_bytes)?)? {
                Some(data) => reader.read_data(self, data, count),
                None => reader.skip_data(self, count),
            };
        }
        let stride = self.sequence_stride();
        for i in 0..count {
            sink.align(l.data_align)?;
            let element_start = sink.position();
            if rank > 0 {
                reader.begin_array(self, l.n_items)?;
            }
            self.read_items(reader, sink, i == 0, top)?;
            if rank > 0 {
                reader.end_array(self)?;
            }
            if self.is_sequence() && l.element_fixed {
                sink.skip_to(element_start + stride)?;
            }
        }
        Ok(())
    }

    fn read_items<R: Reader + ?Sized, S: Sink>(
        &self,
        reader: &mut R,
        sink: &mut S,
        first: bool,
        _top: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        let n = l.n_items;
        match &self.value_type.kind {
            TypeKind::Scalar(_) | TypeKind::Enum(_) => {
                sink.align(l.data_align)?;
                match sink.take(span(n, l.element_bytes)?)? {
                    Some(data) => reader.read_data(self, data, n),
                    None => reader.skip_data(self, n),
                }
            }
            TypeKind::String { .. } => {
                for i in 0..n {
                    self.read_string_item(reader, sink, first && i == 0)?;
                }
                Ok(())
            }
            TypeKind::Struct(members) => {
                for _ in 0..n {
                    sink.align(l.data_align)?;
                    reader.begin_struct(self)?;
                    for m in members {
                        m.read_into(reader, sink, false)?;
                    }
                    reader.end_struct(self)?;
                }
                Ok(())
            }
            TypeKind::Type(inner) => {
                for _ in 0..n {
                    sink.align(l.data_align)?;
                    reader.begin_type(self)?;
                    inner.read_into(reader, sink, false)?;
                    reader.end_type(self)?;
                }
                Ok(())
            }
        }
    }

    fn read_string_item<R: Reader + ?Sized, S: Sink>(
        &self,
        reader: &mut R,
        sink: &mut S,
        first: bool,
    ) -> Result<(), CodecError> {
        let l = &self.layout;
        sink.align(4)?;
        let chars = reader.begin_string(self, first)?;
        let len = chars.len();
        check_string(self, len)?;
        if chars.contains(&0) {
            return Err(CodecError::value(self, "string contains a NUL character"));
        }
        let n = if l.element_fixed { l.element_bytes } else { len + 1 };
        if let Some(slot) = sink.take(n)? {
            slot[..len].copy_from_slice(chars);
            slot[len..].fill(0);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_bounds() {
        let buf = [1u8, 2, 3, 4, 5];
        let mut c = Cursor::new(&buf);
        assert_eq!(c.take(1).expect("take"), &[1]);
        c.align(4).expect("align");
        assert_eq!(c.position(), 4);
        assert!(matches!(c.take(2), Err(CodecError::Underrun { .. })));
        assert!(c.align(8).is_err());
    }

    #[test]
    fn mutable_cursor_zero_fills_skips() {
        let mut buf = [0xffu8; 8];
        let mut c = CursorMut::new(&mut buf);
        if let Some(slot) = c.take(1).expect("take") {
            slot[0] = 7;
        }
        c.align(4).expect("align");
        assert!(c.take(5).is_err());
        assert_eq!(buf, [7, 0, 0, 0, 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn measure_sink_has_no_buffer() {
        let mut sink = MeasureSink::default();
        assert!(sink.take(1 << 30).expect("take").is_none());
        sink.align(8).expect("align");
        assert_eq!(sink.position(), 1 << 30);
    }
}
