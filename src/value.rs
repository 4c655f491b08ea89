//! Owned values of a member's type, their textual syntax, and the adapters that move
//! them in and out of flat buffers.
//!
//! Shape of a [`Value`] for a member:
//! - a sequence is a [`Value::List`] of elements;
//! - an element of an array member is a [`Value::List`] of its items, row-major;
//! - an item is a scalar, a string, an enum index, a [`Value::Struct`] of
//!   `(member name, value)` pairs in declaration order, or, for a type wrapper, the
//!   value of the wrapped member.
//!
//! Text follows the same nesting: items of the outermost sequence or array are bare
//! comma-separated, anything nested is braced.

use crate::codec::{CodecError, Reader, StructureHooks, Writer};
use crate::member::Member;
use crate::parser::{self, TextNode};
use crate::types::{BaseType, TypeKind};
use byteorder::{ByteOrder, NativeEndian};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Char(u8),
    Octet(u8),
    Short(i16),
    UShort(u16),
    Long(i32),
    ULong(u32),
    LongLong(i64),
    ULongLong(u64),
    Float(f32),
    Double(f64),
    String(String),
    /// Index into the member's enum names.
    Enum(u32),
    Struct(Vec<(String, Value)>),
    List(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("syntax error: {0}")]
    Syntax(String),
    #[error("value for \"{member}\": {message}")]
    Invalid { member: String, message: String },
}

fn invalid(m: &Member, message: impl Into<String>) -> ValueError {
    ValueError::Invalid {
        member: m.name.clone(),
        message: message.into(),
    }
}

impl Value {
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Octet(x) | Value::Char(x) => Some(*x as u64),
            Value::UShort(x) => Some(*x as u64),
            Value::ULong(x) | Value::Enum(x) => Some(*x as u64),
            Value::ULongLong(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Short(x) => Some(*x as i64),
            Value::Long(x) => Some(*x as i64),
            Value::LongLong(x) => Some(*x),
            Value::Octet(x) | Value::Char(x) => Some(*x as i64),
            Value::UShort(x) => Some(*x as i64),
            Value::ULong(x) | Value::Enum(x) => Some(*x as i64),
            Value::ULongLong(x) => i64::try_from(*x).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(x) => Some(*x as f64),
            Value::Double(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&[(String, Value)]> {
        match self {
            Value::Struct(fields) => Some(fields),
            _ => None,
        }
    }

    /// Field of a struct value, by case-insensitive name.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_struct()?
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v)
    }

    /// The all-zero value of `member`: empty sequences and strings, zero scalars,
    /// first enum value.
    pub fn zero(member: &Member) -> Value {
        if member.is_sequence() {
            return Value::List(Vec::new());
        }
        if member.array_rank() > 0 {
            let n = member.value_type.n_items().unwrap_or(0);
            return Value::List(vec![zero_item(member); n]);
        }
        zero_item(member)
    }

    /// Parse `text` as a value of `member`.
    pub fn parse(member: &Member, text: &str) -> Result<Value, ValueError> {
        let nodes = parser::parse_value_text(text).map_err(ValueError::Syntax)?;
        from_nodes(member, nodes)
    }

    /// Render as text that [`Value::parse`] reads back.
    pub fn unparse(&self, member: &Member) -> Result<String, ValueError> {
        let mut out = String::new();
        unparse_value(member, self, &mut out)?;
        Ok(out)
    }
}

fn zero_item(m: &Member) -> Value {
    match &m.value_type.kind {
        TypeKind::Scalar(bt) => match bt {
            BaseType::Boolean => Value::Bool(false),
            BaseType::Char => Value::Char(0),
            BaseType::Octet => Value::Octet(0),
            BaseType::Short => Value::Short(0),
            BaseType::UShort => Value::UShort(0),
            BaseType::Long => Value::Long(0),
            BaseType::ULong => Value::ULong(0),
            BaseType::LongLong => Value::LongLong(0),
            BaseType::ULongLong => Value::ULongLong(0),
            BaseType::Float => Value::Float(0.0),
            BaseType::Double => Value::Double(0.0),
            BaseType::String | BaseType::Struct | BaseType::Enum | BaseType::Type => Value::ULong(0),
        },
        TypeKind::String { .. } => Value::String(String::new()),
        TypeKind::Enum(_) => Value::Enum(0),
        TypeKind::Struct(members) => Value::Struct(
            members
                .iter()
                .map(|f| (f.name.clone(), Value::zero(f)))
                .collect(),
        ),
        TypeKind::Type(inner) => Value::zero(inner),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Char(c) => write!(f, "'{}'", parser::escape(&(*c as char).to_string(), '\'')),
            Value::Octet(x) => write!(f, "{}", x),
            Value::Short(x) => write!(f, "{}", x),
            Value::UShort(x) => write!(f, "{}", x),
            Value::Long(x) => write!(f, "{}", x),
            Value::ULong(x) => write!(f, "{}", x),
            Value::LongLong(x) => write!(f, "{}", x),
            Value::ULongLong(x) => write!(f, "{}", x),
            Value::Float(x) => write!(f, "{}", x),
            Value::Double(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "\"{}\"", parser::escape(s, '"')),
            Value::Enum(i) => write!(f, "#{}", i),
            Value::Struct(fields) => {
                f.write_str("{")?;
                for (i, (name, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{} {}", name, v)?;
                }
                f.write_str("}")
            }
            Value::List(items) => {
                f.write_str("{")?;
                for (i, v) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                f.write_str("}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parsing

fn has_container(m: &Member) -> bool {
    m.is_sequence() || m.array_rank() > 0
}

fn is_scalar_like(m: &Member) -> bool {
    matches!(
        m.value_type.kind,
        TypeKind::Scalar(_) | TypeKind::Enum(_) | TypeKind::String { .. }
    )
}

/// Top-level (bare) text of a whole member value.
fn from_nodes(m: &Member, mut nodes: Vec<TextNode>) -> Result<Value, ValueError> {
    // a lone braced list around scalar items is accepted too
    let nested_arrays = m.is_sequence() && m.array_rank() > 0;
    if is_scalar_like(m) && !nested_arrays && nodes.len() == 1 && matches!(nodes[0], TextNode::Braced(_)) {
        if let Some(TextNode::Braced(inner)) = nodes.pop() {
            nodes = inner;
        }
    }
    if m.is_sequence() {
        if let Some(bound) = m.sequence_length() {
            if bound > 0 && nodes.len() > bound {
                return Err(invalid(
                    m,
                    format!("{} elements exceed the sequence bound of {}", nodes.len(), bound),
                ));
            }
        }
        let elements = nodes
            .into_iter()
            .map(|n| {
                if m.array_rank() > 0 {
                    match n {
                        TextNode::Braced(items) => array_from_nodes(m, items),
                        other => Err(invalid(m, format!("expected a braced array, found {:?}", other))),
                    }
                } else {
                    item_from_node(m, n)
                }
            })
            .collect::<Result<_, _>>()?;
        return Ok(Value::List(elements));
    }
    if m.array_rank() > 0 {
        return array_from_nodes(m, nodes);
    }
    match &m.value_type.kind {
        TypeKind::Struct(_) => {
            if nodes.len() == 1 && matches!(nodes[0], TextNode::Braced(_)) {
                match nodes.pop() {
                    Some(TextNode::Braced(fields)) => struct_from_fields(m, fields),
                    _ => Err(invalid(m, "expected struct fields")),
                }
            } else {
                struct_from_fields(m, nodes)
            }
        }
        TypeKind::Type(inner) => from_nodes(inner, nodes),
        _ => {
            if nodes.len() != 1 {
                return Err(invalid(m, format!("expected one value, found {}", nodes.len())));
            }
            match nodes.pop() {
                Some(n) => item_from_node(m, n),
                None => Err(invalid(m, "missing value")),
            }
        }
    }
}

fn array_from_nodes(m: &Member, nodes: Vec<TextNode>) -> Result<Value, ValueError> {
    let n_items = m
        .value_type
        .n_items()
        .ok_or_else(|| invalid(m, "array dimensions are not resolved"))?;
    if nodes.len() > n_items {
        return Err(invalid(
            m,
            format!("{} items exceed the array size of {}", nodes.len(), n_items),
        ));
    }
    let mut items = nodes
        .into_iter()
        .map(|n| item_from_node(m, n))
        .collect::<Result<Vec<_>, _>>()?;
    items.resize(n_items, zero_item(m));
    Ok(Value::List(items))
}

fn struct_from_fields(m: &Member, nodes: Vec<TextNode>) -> Result<Value, ValueError> {
    let members = m.members();
    let mut given: Vec<Option<Value>> = vec![None; members.len()];
    for node in nodes {
        let (name, node) = match node {
            TextNode::Field(name, node) => (name, *node),
            other => return Err(invalid(m, format!("expected \"name value\", found {:?}", other))),
        };
        let idx = members
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(&name))
            .ok_or_else(|| invalid(m, format!("no member named \"{}\"", name)))?;
        if given[idx].is_some() {
            return Err(invalid(m, format!("member \"{}\" given twice", name)));
        }
        given[idx] = Some(field_from_node(&members[idx], node)?);
    }
    Ok(Value::Struct(
        members
            .iter()
            .zip(given)
            .map(|(f, v)| (f.name.clone(), v.unwrap_or_else(|| Value::zero(f))))
            .collect(),
    ))
}

/// Value of a struct field: containers are braced, anything else is a single item.
fn field_from_node(m: &Member, node: TextNode) -> Result<Value, ValueError> {
    if has_container(m) {
        return match node {
            TextNode::Braced(items) => from_nodes(m, items),
            other => Err(invalid(m, format!("expected a braced list, found {:?}", other))),
        };
    }
    item_from_node(m, node)
}

fn item_from_node(m: &Member, node: TextNode) -> Result<Value, ValueError> {
    match (&m.value_type.kind, node) {
        (TypeKind::Struct(_), TextNode::Braced(fields)) => struct_from_fields(m, fields),
        (TypeKind::Type(inner), TextNode::Braced(items)) => from_nodes(inner, items),
        (TypeKind::String { length }, TextNode::Str(s)) => {
            let bound = length.value().unwrap_or(0);
            if bound > 0 && s.len() > bound {
                return Err(invalid(m, format!("string of {} bytes exceeds the bound of {}", s.len(), bound)));
            }
            if s.contains('\0') {
                return Err(invalid(m, "string contains a NUL character"));
            }
            Ok(Value::String(s))
        }
        (TypeKind::Enum(names), TextNode::Ident(name)) => names
            .iter()
            .position(|n| n.eq_ignore_ascii_case(&name))
            .map(|i| Value::Enum(i as u32))
            .ok_or_else(|| invalid(m, format!("\"{}\" is not one of {}", name, names.join(", ")))),
        (TypeKind::Enum(names), TextNode::Number(text)) => {
            let i = parse_int(&text).map_err(|e| invalid(m, e))?;
            if i < 0 || i as usize >= names.len() {
                return Err(invalid(m, format!("enum index {} out of range", i)));
            }
            Ok(Value::Enum(i as u32))
        }
        (TypeKind::Scalar(bt), node) => scalar_from_node(m, *bt, node),
        (_, other) => Err(invalid(m, format!("unexpected {:?}", other))),
    }
}

fn is_non_finite(text: &str) -> bool {
    matches!(text.to_ascii_lowercase().as_str(), "nan" | "inf" | "infinity")
}

fn parse_int(text: &str) -> Result<i128, String> {
    let (neg, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let v = match digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        Some(hex) => i128::from_str_radix(hex, 16),
        None => digits.parse::<i128>(),
    }
    .map_err(|e| format!("bad integer \"{}\": {}", text, e))?;
    Ok(if neg { -v } else { v })
}

fn scalar_from_node(m: &Member, bt: BaseType, node: TextNode) -> Result<Value, ValueError> {
    macro_rules! int {
        ($variant:ident, $t:ty) => {{
            let text = match node {
                TextNode::Number(t) => t,
                other => return Err(invalid(m, format!("expected a number, found {:?}", other))),
            };
            let v = parse_int(&text).map_err(|e| invalid(m, e))?;
            <$t>::try_from(v)
                .map(Value::$variant)
                .map_err(|_| invalid(m, format!("{} is out of range for {}", text, bt)))
        }};
    }
    match bt {
        BaseType::Boolean => match node {
            TextNode::Bool(b) => Ok(Value::Bool(b)),
            TextNode::Number(t) if t == "0" || t == "1" => Ok(Value::Bool(t == "1")),
            other => Err(invalid(m, format!("expected true or false, found {:?}", other))),
        },
        BaseType::Char => match node {
            TextNode::Char(c) => Ok(Value::Char(c)),
            TextNode::Number(text) => {
                let v = parse_int(&text).map_err(|e| invalid(m, e))?;
                u8::try_from(v)
                    .map(Value::Char)
                    .map_err(|_| invalid(m, format!("{} is out of range for {}", text, bt)))
            }
            other => Err(invalid(m, format!("expected a character, found {:?}", other))),
        },
        BaseType::Octet => int!(Octet, u8),
        BaseType::Short => int!(Short, i16),
        BaseType::UShort => int!(UShort, u16),
        BaseType::Long => int!(Long, i32),
        BaseType::ULong => int!(ULong, u32),
        BaseType::LongLong => int!(LongLong, i64),
        BaseType::ULongLong => int!(ULongLong, u64),
        BaseType::Float | BaseType::Double => {
            let text = match node {
                TextNode::Number(t) => t,
                // nan, inf and infinity read as identifiers
                TextNode::Ident(t) if is_non_finite(&t) => t,
                other => return Err(invalid(m, format!("expected a number, found {:?}", other))),
            };
            let v = match text.parse::<f64>() {
                Ok(v) => v,
                Err(_) => parse_int(&text).map_err(|e| invalid(m, e))? as f64,
            };
            Ok(if bt == BaseType::Float {
                Value::Float(v as f32)
            } else {
                Value::Double(v)
            })
        }
        BaseType::String | BaseType::Struct | BaseType::Enum | BaseType::Type => {
            Err(invalid(m, format!("{} is not a scalar type", bt)))
        }
    }
}

// ---------------------------------------------------------------------------
// Unparsing

fn list<'a>(m: &Member, v: &'a Value) -> Result<&'a [Value], ValueError> {
    v.as_list()
        .ok_or_else(|| invalid(m, format!("expected a list, found {}", v)))
}

fn join<T>(
    out: &mut String,
    items: &[T],
    mut each: impl FnMut(&T, &mut String) -> Result<(), ValueError>,
) -> Result<(), ValueError> {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        each(item, out)?;
    }
    Ok(())
}

fn unparse_value(m: &Member, v: &Value, out: &mut String) -> Result<(), ValueError> {
    if m.is_sequence() {
        return join(out, list(m, v)?, |e, out| {
            if m.array_rank() > 0 {
                out.push('{');
                join(out, list(m, e)?, |item, out| unparse_item(m, item, out))?;
                out.push('}');
                Ok(())
            } else {
                unparse_item(m, e, out)
            }
        });
    }
    if m.array_rank() > 0 {
        return join(out, list(m, v)?, |item, out| unparse_item(m, item, out));
    }
    match &m.value_type.kind {
        TypeKind::Type(inner) => unparse_value(inner, v, out),
        _ => unparse_item(m, v, out),
    }
}

fn unparse_item(m: &Member, v: &Value, out: &mut String) -> Result<(), ValueError> {
    match (&m.value_type.kind, v) {
        (TypeKind::Struct(members), Value::Struct(fields)) => {
            out.push('{');
            let mut first = true;
            for f in members {
                let fv = fields
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&f.name))
                    .map(|(_, v)| v)
                    .ok_or_else(|| invalid(m, format!("missing member \"{}\"", f.name)))?;
                if !first {
                    out.push_str(", ");
                }
                first = false;
                out.push_str(&f.name);
                out.push(' ');
                if has_container(f) {
                    out.push('{');
                    unparse_value(f, fv, out)?;
                    out.push('}');
                } else {
                    unparse_item(f, fv, out)?;
                }
            }
            out.push('}');
            Ok(())
        }
        (TypeKind::Type(inner), v) => {
            out.push('{');
            unparse_value(inner, v, out)?;
            out.push('}');
            Ok(())
        }
        (TypeKind::Enum(names), Value::Enum(i)) => {
            let name = names
                .get(*i as usize)
                .ok_or_else(|| invalid(m, format!("enum index {} out of range", i)))?;
            out.push_str(name);
            Ok(())
        }
        (TypeKind::String { .. }, Value::String(_))
        | (TypeKind::Scalar(BaseType::Boolean), Value::Bool(_))
        | (TypeKind::Scalar(BaseType::Octet), Value::Octet(_))
        | (TypeKind::Scalar(BaseType::Short), Value::Short(_))
        | (TypeKind::Scalar(BaseType::UShort), Value::UShort(_))
        | (TypeKind::Scalar(BaseType::Long), Value::Long(_))
        | (TypeKind::Scalar(BaseType::ULong), Value::ULong(_))
        | (TypeKind::Scalar(BaseType::LongLong), Value::LongLong(_))
        | (TypeKind::Scalar(BaseType::ULongLong), Value::ULongLong(_))
        | (TypeKind::Scalar(BaseType::Float), Value::Float(_))
        | (TypeKind::Scalar(BaseType::Double), Value::Double(_)) => {
            out.push_str(&v.to_string());
            Ok(())
        }
        (TypeKind::Scalar(BaseType::Char), Value::Char(c)) => {
            if (0x20..0x7f).contains(c) {
                out.push_str(&v.to_string());
            } else {
                out.push_str(&c.to_string());
            }
            Ok(())
        }
        (_, v) => Err(invalid(m, format!("{} does not match type {}", v, m.base_type()))),
    }
}

// ---------------------------------------------------------------------------
// Flat buffer conversion

pub(crate) fn scalar_from_bytes(m: &Member, b: &[u8]) -> Result<Value, CodecError> {
    Ok(match &m.value_type.kind {
        TypeKind::Enum(_) => Value::Enum(NativeEndian::read_u32(b)),
        TypeKind::Scalar(bt) => match bt {
            BaseType::Boolean => Value::Bool(b[0] != 0),
            BaseType::Char => Value::Char(b[0]),
            BaseType::Octet => Value::Octet(b[0]),
            BaseType::Short => Value::Short(NativeEndian::read_i16(b)),
            BaseType::UShort => Value::UShort(NativeEndian::read_u16(b)),
            BaseType::Long => Value::Long(NativeEndian::read_i32(b)),
            BaseType::ULong => Value::ULong(NativeEndian::read_u32(b)),
            BaseType::LongLong => Value::LongLong(NativeEndian::read_i64(b)),
            BaseType::ULongLong => Value::ULongLong(NativeEndian::read_u64(b)),
            BaseType::Float => Value::Float(NativeEndian::read_f32(b)),
            BaseType::Double => Value::Double(NativeEndian::read_f64(b)),
            other => return Err(CodecError::value(m, format!("{} is not a scalar type", other))),
        },
        _ => return Err(CodecError::value(m, "not a scalar member")),
    })
}

fn scalar_to_bytes(m: &Member, v: &Value, b: &mut [u8]) -> Result<(), CodecError> {
    match (&m.value_type.kind, v) {
        (TypeKind::Enum(names), Value::Enum(i)) => {
            if *i as usize >= names.len() {
                return Err(CodecError::value(m, format!("enum index {} out of range", i)));
            }
            NativeEndian::write_u32(b, *i);
        }
        (TypeKind::Scalar(BaseType::Boolean), Value::Bool(x)) => b[0] = *x as u8,
        (TypeKind::Scalar(BaseType::Char), Value::Char(x)) => b[0] = *x,
        (TypeKind::Scalar(BaseType::Octet), Value::Octet(x)) => b[0] = *x,
        (TypeKind::Scalar(BaseType::Short), Value::Short(x)) => NativeEndian::write_i16(b, *x),
        (TypeKind::Scalar(BaseType::UShort), Value::UShort(x)) => NativeEndian::write_u16(b, *x),
        (TypeKind::Scalar(BaseType::Long), Value::Long(x)) => NativeEndian::write_i32(b, *x),
        (TypeKind::Scalar(BaseType::ULong), Value::ULong(x)) => NativeEndian::write_u32(b, *x),
        (TypeKind::Scalar(BaseType::LongLong), Value::LongLong(x)) => NativeEndian::write_i64(b, *x),
        (TypeKind::Scalar(BaseType::ULongLong), Value::ULongLong(x)) => NativeEndian::write_u64(b, *x),
        (TypeKind::Scalar(BaseType::Float), Value::Float(x)) => NativeEndian::write_f32(b, *x),
        (TypeKind::Scalar(BaseType::Double), Value::Double(x)) => NativeEndian::write_f64(b, *x),
        (_, v) => {
            return Err(CodecError::value(
                m,
                format!("{} does not match type {}", v, m.base_type()),
            ))
        }
    }
    Ok(())
}

enum BuildFrame {
    List(Vec<Value>),
    Struct(Vec<(String, Value)>),
    Type(Option<Value>),
}

/// A [`Writer`] that rebuilds an owned [`Value`] from a flat buffer.
///
/// For a single member the result is that member's value; for a message it is a
/// [`Value::Struct`] of the arguments.
#[derive(Default)]
pub struct ValueWriter {
    stack: Vec<BuildFrame>,
    root: Option<Value>,
    opcode: Option<usize>,
}

impl ValueWriter {
    pub fn new() -> Self {
        ValueWriter::default()
    }

    /// Collects the arguments of a message into a struct value.
    pub fn for_message() -> Self {
        ValueWriter {
            stack: vec![BuildFrame::Struct(Vec::new())],
            ..ValueWriter::default()
        }
    }

    /// Opcode seen by `write_opcode`, if any.
    pub fn opcode(&self) -> Option<usize> {
        self.opcode
    }

    pub fn into_value(mut self) -> Option<Value> {
        match self.stack.pop() {
            Some(BuildFrame::Struct(fields)) if self.stack.is_empty() && self.root.is_none() => {
                Some(Value::Struct(fields))
            }
            _ => self.root,
        }
    }

    fn finish_item(&mut self, m: &Member, v: Value) -> Result<(), CodecError> {
        match self.stack.last_mut() {
            Some(BuildFrame::List(items)) => items.push(v),
            Some(BuildFrame::Struct(fields)) => fields.push((m.name.clone(), v)),
            Some(BuildFrame::Type(slot)) => {
                if slot.replace(v).is_some() {
                    return Err(CodecError::value(m, "type wrapper received two values"));
                }
            }
            None => self.root = Some(v),
        }
        Ok(())
    }

    fn pop_list(&mut self, m: &Member) -> Result<(), CodecError> {
        match self.stack.pop() {
            Some(BuildFrame::List(items)) => self.finish_item(m, Value::List(items)),
            _ => Err(CodecError::value(m, "unbalanced list")),
        }
    }
}

impl StructureHooks for ValueWriter {
    fn begin_struct(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.push(BuildFrame::Struct(Vec::new()));
        Ok(())
    }

    fn end_struct(&mut self, member: &Member) -> Result<(), CodecError> {
        match self.stack.pop() {
            Some(BuildFrame::Struct(fields)) => self.finish_item(member, Value::Struct(fields)),
            _ => Err(CodecError::value(member, "unbalanced struct")),
        }
    }

    fn begin_array(&mut self, _member: &Member, n_items: usize) -> Result<(), CodecError> {
        self.stack.push(BuildFrame::List(Vec::with_capacity(n_items)));
        Ok(())
    }

    fn end_array(&mut self, member: &Member) -> Result<(), CodecError> {
        self.pop_list(member)
    }

    fn begin_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.push(BuildFrame::Type(None));
        Ok(())
    }

    fn end_type(&mut self, member: &Member) -> Result<(), CodecError> {
        match self.stack.pop() {
            Some(BuildFrame::Type(Some(v))) => self.finish_item(member, v),
            _ => Err(CodecError::value(member, "unbalanced type wrapper")),
        }
    }

    fn end_sequence(&mut self, member: &Member) -> Result<(), CodecError> {
        self.pop_list(member)
    }
}

impl Writer for ValueWriter {
    fn write_opcode(&mut self, _name: &str, opcode: usize) -> Result<(), CodecError> {
        self.opcode = Some(opcode);
        Ok(())
    }

    fn begin_sequence(&mut self, _member: &Member, n_elements: usize) -> Result<(), CodecError> {
        self.stack.push(BuildFrame::List(Vec::with_capacity(n_elements)));
        Ok(())
    }

    fn write_string(&mut self, member: &Member, data: &[u8], _first: bool, _top: bool) -> Result<(), CodecError> {
        let s = std::str::from_utf8(data)
            .map_err(|e| CodecError::value(member, format!("string is not UTF-8: {}", e)))?;
        self.finish_item(member, Value::String(s.to_string()))
    }

    fn write_data(&mut self, member: &Member, data: &[u8], n_elements: usize) -> Result<(), CodecError> {
        let size = member.layout.element_bytes;
        for chunk in data.chunks_exact(size).take(n_elements) {
            let v = scalar_from_bytes(member, chunk)?;
            self.finish_item(member, v)?;
        }
        Ok(())
    }
}

enum FeedFrame<'v> {
    List(&'v [Value], usize),
    Struct(&'v [(String, Value)]),
    Type(Option<&'v Value>),
}

/// A [`Reader`] that lays an owned [`Value`] out in a flat buffer.
pub struct ValueReader<'v> {
    stack: Vec<FeedFrame<'v>>,
    root: Option<&'v Value>,
}

impl<'v> ValueReader<'v> {
    pub fn new(value: &'v Value) -> Self {
        ValueReader {
            stack: Vec::new(),
            root: Some(value),
        }
    }

    /// Feeds message arguments from a struct value keyed by argument name.
    pub fn for_message(args: &'v [(String, Value)]) -> Self {
        ValueReader {
            stack: vec![FeedFrame::Struct(args)],
            root: None,
        }
    }

    fn next_item(&mut self, m: &Member) -> Result<&'v Value, CodecError> {
        let v = match self.stack.last_mut() {
            Some(FeedFrame::List(items, next)) => {
                let items: &'v [Value] = *items;
                let v = items.get(*next);
                *next += 1;
                v
            }
            Some(FeedFrame::Struct(fields)) => {
                let fields: &'v [(String, Value)] = *fields;
                fields
                    .iter()
                    .find(|(n, _)| n.eq_ignore_ascii_case(&m.name))
                    .map(|(_, v)| v)
            }
            Some(FeedFrame::Type(slot)) => slot.take(),
            None => self.root.take(),
        };
        v.ok_or_else(|| CodecError::value(m, "no value supplied"))
    }

    fn push_list(&mut self, m: &Member) -> Result<usize, CodecError> {
        let v = self.next_item(m)?;
        let items = v
            .as_list()
            .ok_or_else(|| CodecError::value(m, format!("expected a list, found {}", v)))?;
        self.stack.push(FeedFrame::List(items, 0));
        Ok(items.len())
    }
}

impl StructureHooks for ValueReader<'_> {
    fn begin_struct(&mut self, member: &Member) -> Result<(), CodecError> {
        let v = self.next_item(member)?;
        let fields = v
            .as_struct()
            .ok_or_else(|| CodecError::value(member, format!("expected a struct, found {}", v)))?;
        self.stack.push(FeedFrame::Struct(fields));
        Ok(())
    }

    fn end_struct(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.pop();
        Ok(())
    }

    fn begin_array(&mut self, member: &Member, n_items: usize) -> Result<(), CodecError> {
        let n = self.push_list(member)?;
        if n != n_items {
            return Err(CodecError::value(
                member,
                format!("array needs {} items, value has {}", n_items, n),
            ));
        }
        Ok(())
    }

    fn end_array(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.pop();
        Ok(())
    }

    fn begin_type(&mut self, member: &Member) -> Result<(), CodecError> {
        let v = self.next_item(member)?;
        self.stack.push(FeedFrame::Type(Some(v)));
        Ok(())
    }

    fn end_type(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.pop();
        Ok(())
    }

    fn end_sequence(&mut self, _member: &Member) -> Result<(), CodecError> {
        self.stack.pop();
        Ok(())
    }
}

impl Reader for ValueReader<'_> {
    fn begin_sequence(&mut self, member: &Member) -> Result<usize, CodecError> {
        self.push_list(member)
    }

    fn begin_string(&mut self, member: &Member, _first: bool) -> Result<&[u8], CodecError> {
        let v = self.next_item(member)?;
        v.as_str()
            .map(str::as_bytes)
            .ok_or_else(|| CodecError::value(member, format!("expected a string, found {}", v)))
    }

    fn read_data(&mut self, member: &Member, data: &mut [u8], n_elements: usize) -> Result<(), CodecError> {
        let size = member.layout.element_bytes;
        for chunk in data.chunks_exact_mut(size).take(n_elements) {
            let v = self.next_item(member)?;
            scalar_to_bytes(member, v, chunk)?;
        }
        Ok(())
    }

    fn skip_data(&mut self, member: &Member, n_elements: usize) -> Result<(), CodecError> {
        let mut scratch = [0u8; 8];
        let slot = scratch
            .get_mut(..member.layout.element_bytes)
            .ok_or_else(|| CodecError::value(member, "scalar wider than 8 bytes"))?;
        for _ in 0..n_elements {
            let v = self.next_item(member)?;
            scalar_to_bytes(member, v, slot)?;
        }
        Ok(())
    }
}

impl Member {
    /// Lay `value` out in a new buffer of exactly the size it needs.
    pub fn encode_value(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let n = self.measure_length(&mut ValueReader::new(value), false)?;
        let mut buf = vec![0u8; n];
        self.read_buffer(&mut ValueReader::new(value), &mut buf)?;
        Ok(buf)
    }

    /// Rebuild this member's value from a flat buffer starting at offset 0.
    pub fn decode_value(&self, data: &[u8]) -> Result<Value, CodecError> {
        let mut writer = ValueWriter::new();
        self.write_buffer(&mut writer, data)?;
        writer
            .into_value()
            .ok_or_else(|| CodecError::value(self, "no value decoded"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_text() {
        assert_eq!(parse_int("-0x10"), Ok(-16));
        assert_eq!(parse_int("42"), Ok(42));
        assert!(parse_int("4x").is_err());
    }

    #[test]
    fn scalar_range_is_checked() {
        let m = Member::scalar("s", BaseType::Short);
        assert_eq!(Value::parse(&m, "-300").expect("parse"), Value::Short(-300));
        assert!(Value::parse(&m, "40000").is_err());
        let b = Member::scalar("b", BaseType::Boolean);
        assert_eq!(Value::parse(&b, "1").expect("parse"), Value::Bool(true));
    }

    #[test]
    fn non_finite_floats_read_back() {
        let d = Member::scalar("d", BaseType::Double);
        for v in [f64::INFINITY, f64::NEG_INFINITY] {
            let text = Value::Double(v).unparse(&d).expect("unparse");
            assert_eq!(Value::parse(&d, &text).expect(&text), Value::Double(v));
        }
        let text = Value::Double(f64::NAN).unparse(&d).expect("unparse");
        assert!(Value::parse(&d, &text).expect("nan").as_f64().is_some_and(f64::is_nan));
        let f = Member::scalar("f", BaseType::Float).with_array(&[2]);
        let v = Value::parse(&f, "-inf, Infinity").expect("parse");
        assert_eq!(v, Value::List(vec![Value::Float(f32::NEG_INFINITY), Value::Float(f32::INFINITY)]));
        assert!(Value::parse(&Member::scalar("n", BaseType::Long), "-inf").is_err());
        assert!(Value::parse(&d, "information").is_err());
    }
}
