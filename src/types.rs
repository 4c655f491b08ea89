//! Type descriptors: the shape of a value (base kind, array rank, sequence bound,
//! string bound) without any layout numbers.

use crate::member::Member;

/// Base kind of a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BaseType {
    Boolean,
    Char,
    Double,
    Float,
    Short,
    Long,
    Octet,
    ULong,
    UShort,
    LongLong,
    ULongLong,
    String,
    Struct,
    Enum,
    Type,
}

impl BaseType {
    pub const ALL: [BaseType; 15] = [
        BaseType::Boolean,
        BaseType::Char,
        BaseType::Double,
        BaseType::Float,
        BaseType::Short,
        BaseType::Long,
        BaseType::Octet,
        BaseType::ULong,
        BaseType::UShort,
        BaseType::LongLong,
        BaseType::ULongLong,
        BaseType::String,
        BaseType::Struct,
        BaseType::Enum,
        BaseType::Type,
    ];

    /// Name used in metadata `Type` attributes.
    pub fn name(self) -> &'static str {
        match self {
            BaseType::Boolean => "Bool",
            BaseType::Char => "Char",
            BaseType::Double => "Double",
            BaseType::Float => "Float",
            BaseType::Short => "Short",
            BaseType::Long => "Long",
            BaseType::Octet => "UChar",
            BaseType::ULong => "ULong",
            BaseType::UShort => "UShort",
            BaseType::LongLong => "LongLong",
            BaseType::ULongLong => "ULongLong",
            BaseType::String => "String",
            BaseType::Struct => "Struct",
            BaseType::Enum => "Enum",
            BaseType::Type => "Type",
        }
    }

    /// Case-insensitive lookup by metadata name. `Octet` and `Boolean` are accepted as aliases.
    pub fn from_name(name: &str) -> Option<BaseType> {
        if name.eq_ignore_ascii_case("octet") {
            return Some(BaseType::Octet);
        }
        if name.eq_ignore_ascii_case("boolean") {
            return Some(BaseType::Boolean);
        }
        BaseType::ALL
            .iter()
            .copied()
            .find(|bt| bt.name().eq_ignore_ascii_case(name))
    }

    /// Storage width in bits. Zero for kinds whose size comes from their contents.
    pub fn bits(self) -> usize {
        match self {
            BaseType::Boolean | BaseType::Char | BaseType::Octet => 8,
            BaseType::Short | BaseType::UShort => 16,
            BaseType::Long | BaseType::ULong | BaseType::Float | BaseType::Enum => 32,
            BaseType::Double | BaseType::LongLong | BaseType::ULongLong => 64,
            BaseType::String | BaseType::Struct | BaseType::Type => 0,
        }
    }

    /// True for kinds that are stored as a fixed-width scalar (enums included).
    pub fn is_scalar(self) -> bool {
        self.bits() != 0
    }
}

impl std::fmt::Display for BaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A dimension, bound or length: either a known number or an expression waiting
/// for an [`IdentResolver`](crate::expr::IdentResolver).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extent {
    Resolved(usize),
    Unresolved(String),
}

impl Extent {
    pub fn value(&self) -> Option<usize> {
        match self {
            Extent::Resolved(v) => Some(*v),
            Extent::Unresolved(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Extent::Resolved(_))
    }
}

impl From<usize> for Extent {
    fn from(v: usize) -> Self {
        Extent::Resolved(v)
    }
}

/// Base shape of a value. Struct members and the wrapped member of a `Type` are owned.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    /// Fixed-width scalar: anything with [`BaseType::is_scalar`] except `Enum`.
    Scalar(BaseType),
    /// String with a bound excluding the terminating NUL (0 = unbounded).
    String { length: Extent },
    Enum(Vec<String>),
    Struct(Vec<Member>),
    /// Recursive wrapper around one member, which must itself be a sequence.
    Type(Box<Member>),
}

/// Type descriptor. Array dimensions and the sequence bound are modifiers that
/// combine with any kind; the sequence is always outside the array dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueType {
    pub kind: TypeKind,
    pub array_dimensions: Vec<Extent>,
    /// `Some(0)` is an unbounded sequence.
    pub sequence: Option<Extent>,
}

impl ValueType {
    pub fn new(kind: TypeKind) -> Self {
        ValueType {
            kind,
            array_dimensions: Vec::new(),
            sequence: None,
        }
    }

    pub fn base_type(&self) -> BaseType {
        match &self.kind {
            TypeKind::Scalar(bt) => *bt,
            TypeKind::String { .. } => BaseType::String,
            TypeKind::Enum(_) => BaseType::Enum,
            TypeKind::Struct(_) => BaseType::Struct,
            TypeKind::Type(_) => BaseType::Type,
        }
    }

    pub fn array_rank(&self) -> usize {
        self.array_dimensions.len()
    }

    pub fn is_sequence(&self) -> bool {
        self.sequence.is_some()
    }

    /// Sequence bound, `Some(0)` when unbounded, `None` when not a sequence or unresolved.
    pub fn sequence_length(&self) -> Option<usize> {
        self.sequence.as_ref().and_then(Extent::value)
    }

    /// String bound (0 = unbounded); `None` for non-strings or unresolved bounds.
    pub fn string_length(&self) -> Option<usize> {
        match &self.kind {
            TypeKind::String { length } => length.value(),
            _ => None,
        }
    }

    /// Product of the array dimensions, or `None` while any is unresolved or on overflow.
    pub fn n_items(&self) -> Option<usize> {
        self.array_dimensions
            .iter()
            .try_fold(1usize, |acc, d| d.value().and_then(|v| acc.checked_mul(v)))
    }

    pub fn enums(&self) -> &[String] {
        match &self.kind {
            TypeKind::Enum(names) => names,
            _ => &[],
        }
    }

    pub fn members(&self) -> &[Member] {
        match &self.kind {
            TypeKind::Struct(members) => members,
            _ => &[],
        }
    }

    /// True when any dimension or bound here or in a nested member is still symbolic.
    pub fn uses_parameters(&self) -> bool {
        let own = self.array_dimensions.iter().any(|d| !d.is_resolved())
            || self.sequence.as_ref().is_some_and(|s| !s.is_resolved());
        own || match &self.kind {
            TypeKind::String { length } => !length.is_resolved(),
            TypeKind::Struct(members) => members.iter().any(|m| m.value_type.uses_parameters()),
            TypeKind::Type(inner) => inner.value_type.uses_parameters(),
            TypeKind::Scalar(_) | TypeKind::Enum(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_size_table() {
        assert_eq!(BaseType::Long.bits(), 32);
        assert_eq!(BaseType::Octet.bits(), 8);
        assert_eq!(BaseType::Double.bits(), 64);
        assert_eq!(BaseType::Enum.bits(), 32);
        assert!(!BaseType::String.is_scalar());
    }

    #[test]
    fn names_round_trip() {
        for bt in BaseType::ALL {
            assert_eq!(BaseType::from_name(bt.name()), Some(bt));
        }
        assert_eq!(BaseType::from_name("ulong"), Some(BaseType::ULong));
        assert_eq!(BaseType::from_name("octet"), Some(BaseType::Octet));
        assert_eq!(BaseType::from_name("int"), None);
    }
}
