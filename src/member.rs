//! Named members: a value type plus identity, roles, default value and computed layout.

use crate::types::{BaseType, Extent, TypeKind, ValueType};
use crate::value::Value;

/// Layout numbers computed by [`Member::offset`]. All zero until layout runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Layout {
    /// Byte offset within the enclosing group.
    pub offset: usize,
    /// Alignment of the member as a whole (at least 4 for sequences).
    pub align: usize,
    /// Alignment of one data element, before any sequence adjustment.
    pub data_align: usize,
    /// Scalar width in bits, 0 for strings and aggregates.
    pub n_bits: usize,
    /// Size of one element, ignoring array and sequence multiplicity.
    pub element_bytes: usize,
    /// Total size including multiplicity and the sequence count prefix.
    pub n_bytes: usize,
    /// Product of array dimensions (1 when not an array).
    pub n_items: usize,
    /// Size and position known without runtime data.
    pub fixed_layout: bool,
    /// One element (array block included) has a fixed size.
    pub element_fixed: bool,
    /// Single top-level argument whose count is implied by the message length.
    pub top_sequence: bool,
    pub computed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub abbrev: String,
    pub description: String,
    pub format: String,
    /// Position in the enclosing group.
    pub ordinal: usize,
    pub value_type: ValueType,
    pub default: Option<Value>,
    /// Default text that could not be parsed before symbolic extents are resolved.
    pub default_expr: Option<String>,
    pub is_in: bool,
    pub is_out: bool,
    pub is_key: bool,
    pub layout: Layout,
}

impl Member {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Member {
            name: name.into(),
            abbrev: String::new(),
            description: String::new(),
            format: String::new(),
            ordinal: 0,
            value_type,
            default: None,
            default_expr: None,
            is_in: false,
            is_out: false,
            is_key: false,
            layout: Layout::default(),
        }
    }

    /// Fixed-width scalar member. `Enum`, `String`, `Struct` and `Type` have their own constructors.
    pub fn scalar(name: impl Into<String>, base: BaseType) -> Self {
        Member::new(name, ValueType::new(TypeKind::Scalar(base)))
    }

    /// String member with a bound excluding the NUL (0 = unbounded).
    pub fn string(name: impl Into<String>, length: usize) -> Self {
        Member::new(
            name,
            ValueType::new(TypeKind::String {
                length: Extent::Resolved(length),
            }),
        )
    }

    pub fn enumeration<S: Into<String>>(name: impl Into<String>, enums: impl IntoIterator<Item = S>) -> Self {
        let enums = enums.into_iter().map(Into::into).collect();
        Member::new(name, ValueType::new(TypeKind::Enum(enums)))
    }

    /// Struct member; ordinals of `members` are renumbered in declaration order.
    pub fn structure(name: impl Into<String>, mut members: Vec<Member>) -> Self {
        for (i, m) in members.iter_mut().enumerate() {
            m.ordinal = i;
        }
        Member::new(name, ValueType::new(TypeKind::Struct(members)))
    }

    /// Recursive wrapper around `inner`, which must be a sequence.
    pub fn wrapper(name: impl Into<String>, inner: Member) -> Self {
        Member::new(name, ValueType::new(TypeKind::Type(Box::new(inner))))
    }

    pub fn with_array(mut self, dimensions: &[usize]) -> Self {
        self.value_type.array_dimensions = dimensions.iter().map(|&d| Extent::Resolved(d)).collect();
        self
    }

    /// Makes this a sequence with the given bound (0 = unbounded).
    pub fn with_sequence(mut self, bound: usize) -> Self {
        self.value_type.sequence = Some(Extent::Resolved(bound));
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn base_type(&self) -> BaseType {
        self.value_type.base_type()
    }

    pub fn is_sequence(&self) -> bool {
        self.value_type.is_sequence()
    }

    pub fn sequence_length(&self) -> Option<usize> {
        self.value_type.sequence_length()
    }

    pub fn array_rank(&self) -> usize {
        self.value_type.array_rank()
    }

    pub fn string_length(&self) -> Option<usize> {
        self.value_type.string_length()
    }

    pub fn members(&self) -> &[Member] {
        self.value_type.members()
    }

    pub fn find_member(&self, name: &str) -> Option<&Member> {
        self.members().iter().find(|m| m.name.eq_ignore_ascii_case(name))
    }

    pub fn uses_parameters(&self) -> bool {
        self.value_type.uses_parameters()
    }

    /// Byte size of one sequence element: an element rounded to its alignment,
    /// times the array items.
    pub fn sequence_stride(&self) -> usize {
        let l = &self.layout;
        round_up(l.element_bytes, l.data_align.max(1)) * l.n_items
    }
}

/// Round `n` up to a multiple of `align` (`align` > 0).
pub fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}
