//! Format flat buffers for display: a [`Writer`] that renders each member as an
//! indented `name: value` line, with enum names and nested structure.

use crate::codec::{CodecError, StructureHooks, Writer};
use crate::member::Member;
use crate::parser;
use crate::types::TypeKind;
use crate::value::{scalar_from_bytes, Value};

/// Collects dump lines; two spaces of indentation per nesting level.
#[derive(Debug, Default)]
pub struct TextWriter {
    lines: Vec<String>,
    indent: usize,
}

fn hex_string(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect::<Vec<_>>().join(" ")
}

/// Scalar as text, enum values by name.
fn format_scalar(m: &Member, v: &Value) -> String {
    match (&m.value_type.kind, v) {
        (TypeKind::Enum(names), Value::Enum(i)) => match names.get(*i as usize) {
            Some(name) => name.clone(),
            None => format!("<invalid enum {}>", i),
        },
        _ => v.to_string(),
    }
}

impl TextWriter {
    pub fn new() -> Self {
        TextWriter::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn into_text(self) -> String {
        let mut text = self.lines.join("\n");
        if !text.is_empty() {
            text.push('\n');
        }
        text
    }

    fn push(&mut self, line: String) {
        self.lines.push(format!("{}{}", "  ".repeat(self.indent), line));
    }

    fn open(&mut self, line: String) {
        self.push(line);
        self.indent += 1;
    }

    fn close(&mut self) {
        self.indent = self.indent.saturating_sub(1);
    }
}

impl StructureHooks for TextWriter {
    fn begin_struct(&mut self, member: &Member) -> Result<(), CodecError> {
        self.open(format!("{}:", member.name));
        Ok(())
    }

    fn end_struct(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.close();
        Ok(())
    }

    fn begin_array(&mut self, member: &Member, n_items: usize) -> Result<(), CodecError> {
        self.open(format!("{}: array of {}", member.name, n_items));
        Ok(())
    }

    fn end_array(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.close();
        Ok(())
    }

    fn begin_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.indent += 1;
        Ok(())
    }

    fn end_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.close();
        Ok(())
    }

    fn end_sequence(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.close();
        Ok(())
    }
}

impl Writer for TextWriter {
    fn write_opcode(&mut self, name: &str, opcode: usize) -> Result<(), CodecError> {
        if name.is_empty() {
            self.push(format!("opcode {}", opcode));
        } else {
            self.push(format!("operation {} (opcode {})", name, opcode));
        }
        Ok(())
    }

    fn begin_sequence(&mut self, member: &Member, n_elements: usize) -> Result<(), CodecError> {
        self.open(format!("{}: sequence of {}", member.name, n_elements));
        Ok(())
    }

    fn write_string(&mut self, member: &Member, data: &[u8], _first: bool, _top: bool) -> Result<(), CodecError> {
        let text = match std::str::from_utf8(data) {
            Ok(s) => format!("\"{}\"", parser::escape(s, '"')),
            Err(_) => format!("hex({})", hex_string(data)),
        };
        self.push(format!("{}: {}", member.name, text));
        Ok(())
    }

    fn write_data(&mut self, member: &Member, data: &[u8], n_elements: usize) -> Result<(), CodecError> {
        let size = member.layout.element_bytes;
        let values = data
            .chunks_exact(size)
            .take(n_elements)
            .map(|chunk| scalar_from_bytes(member, chunk).map(|v| format_scalar(member, &v)))
            .collect::<Result<Vec<_>, _>>()?;
        self.push(format!("{}: {}", member.name, values.join(", ")));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_for_binary_strings() {
        assert_eq!(hex_string(&[0xde, 0xad]), "de ad");
    }
}
