//! Layout computation: offsets, alignment, element and total sizes of nested
//! members, plus the summary flags folded up into the enclosing group.
//!
//! ## Rules
//!
//! - **Scalars** occupy `ceil(bits / 8)` bytes aligned to their own size.
//! - **Strings** occupy `(length + 4) & !3` bytes (always room for the NUL, always
//!   whole 32-bit words) and are 4-byte aligned. A zero length is unbounded.
//! - **Structs** lay out their members in declaration order; the struct's element
//!   size is the offset after the last member and its alignment is the largest member
//!   alignment.
//! - **Arrays** round the element up to its alignment and multiply by each dimension.
//! - **Sequences** round again, multiply by the bound and reserve a 32-bit count
//!   prefix padded to the sequence's alignment (forced to at least 4), except for the
//!   single top-level argument of an operation with a top-fixed sequence.
//! - Byte sizes and element counts above `u32::MAX` are rejected.

use crate::error::MetadataError;
use crate::expr::IdentResolver;
use crate::member::{round_up, Layout, Member};
use crate::types::TypeKind;
use crate::value::Value;
use log::trace;

const MAX_SIZE: usize = u32::MAX as usize;

/// Running state while laying out a group of members (struct members or operation
/// arguments).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupLayout {
    pub max_align: usize,
    /// Next free byte offset; after layout, the group's size.
    pub offset: usize,
    /// Smallest scalar width seen, in bits (0 = none yet).
    pub min_size_bits: usize,
    /// Scalars of more than one width were seen.
    pub diverse_sizes: bool,
    /// Some member has an alignment below 32 bits.
    pub sub32: bool,
    /// Some member has no upper size bound.
    pub unbounded: bool,
    /// The group's size depends on runtime data.
    pub variable: bool,
}

impl Default for GroupLayout {
    fn default() -> Self {
        GroupLayout {
            max_align: 1,
            offset: 0,
            min_size_bits: 0,
            diverse_sizes: false,
            sub32: false,
            unbounded: false,
            variable: false,
        }
    }
}

impl GroupLayout {
    pub(crate) fn note_width(&mut self, bits: usize) {
        if self.min_size_bits != 0 && self.min_size_bits != bits {
            self.diverse_sizes = true;
        }
        if self.min_size_bits == 0 || bits < self.min_size_bits {
            self.min_size_bits = bits;
        }
    }

    /// Fold the summary flags of `other` into `self` (offset and alignment untouched).
    pub(crate) fn fold_flags(&mut self, other: &GroupLayout) {
        if other.min_size_bits != 0 {
            self.note_width(other.min_size_bits);
        }
        self.diverse_sizes |= other.diverse_sizes;
        self.sub32 |= other.sub32;
        self.unbounded |= other.unbounded;
        self.variable |= other.variable;
    }
}

/// Context constraints applied during layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRules {
    /// Every sequence and string must have a bound (hardware property context).
    pub bounded_only: bool,
    /// Sequences of strings are accepted.
    pub string_sequences: bool,
}

impl LayoutRules {
    /// Message arguments: anything goes.
    pub fn message() -> Self {
        LayoutRules {
            bounded_only: false,
            string_sequences: true,
        }
    }

    /// Worker properties: fixed layout required, no string sequences.
    pub fn property() -> Self {
        LayoutRules {
            bounded_only: true,
            string_sequences: false,
        }
    }
}

impl Default for LayoutRules {
    fn default() -> Self {
        LayoutRules::message()
    }
}

/// Lay out `members` in order, updating `group`.
pub fn align_members(
    members: &mut [Member],
    group: &mut GroupLayout,
    rules: &LayoutRules,
) -> Result<(), MetadataError> {
    for m in members.iter_mut() {
        m.offset(group, rules, false)?;
    }
    Ok(())
}

fn checked(member: &str, v: Option<usize>) -> Result<usize, MetadataError> {
    match v {
        Some(v) if v <= MAX_SIZE => Ok(v),
        _ => Err(MetadataError::SizeOverflow(member.to_string())),
    }
}

impl Member {
    /// Compute this member's layout and place it in `group`.
    ///
    /// `top` is true only for the single argument of an operation with a top-fixed
    /// sequence: its sequence count prefix is omitted and its size becomes variable.
    pub fn offset(
        &mut self,
        group: &mut GroupLayout,
        rules: &LayoutRules,
        top: bool,
    ) -> Result<(), MetadataError> {
        if let Some(expr) = first_unresolved(self) {
            return Err(MetadataError::Unresolved {
                member: self.name.clone(),
                expr,
            });
        }
        let name = self.name.clone();
        let mut local = GroupLayout::default();
        let mut n_bits = 0;
        let (mut bytes, mut align) = match &mut self.value_type.kind {
            TypeKind::Struct(members) => {
                if members.is_empty() {
                    return Err(MetadataError::invalid(&name, "struct has no members"));
                }
                align_members(members, &mut local, rules)?;
                (local.offset, local.max_align)
            }
            TypeKind::Type(inner) => {
                if !inner.is_sequence() {
                    return Err(MetadataError::invalid(
                        &name,
                        "a recursive type must wrap a sequence; arrays of sequences need a type wrapper",
                    ));
                }
                align_members(std::slice::from_mut(inner.as_mut()), &mut local, rules)?;
                (local.offset, local.max_align)
            }
            TypeKind::String { length } => {
                let len = length.value().unwrap_or(0);
                if len == 0 {
                    if rules.bounded_only {
                        return Err(MetadataError::UnboundedString(name));
                    }
                    local.unbounded = true;
                    local.variable = true;
                }
                local.note_width(8);
                (checked(&name, len.checked_add(4))? & !3, 4)
            }
            TypeKind::Enum(enums) => {
                if enums.is_empty() {
                    return Err(MetadataError::invalid(&name, "enumeration has no values"));
                }
                n_bits = 32;
                local.note_width(n_bits);
                (4, 4)
            }
            TypeKind::Scalar(bt) => {
                if !bt.is_scalar() {
                    return Err(MetadataError::invalid(&name, format!("{} is not a scalar type", bt)));
                }
                n_bits = bt.bits();
                local.note_width(n_bits);
                let a = n_bits.div_ceil(8);
                (a, a)
            }
        };
        let is_string = matches!(self.value_type.kind, TypeKind::String { .. });
        let rank = self.value_type.array_rank();
        if top && is_string && rank == 0 && !self.is_sequence() {
            local.variable = true;
        }
        let element_fixed = !local.variable;
        let element_bytes = bytes;
        let data_align = align;

        let mut n_items = 1usize;
        if rank > 0 {
            bytes = round_up(bytes, align);
            for d in &self.value_type.array_dimensions {
                let d = d.value().unwrap_or(0);
                if d == 0 {
                    return Err(MetadataError::invalid(&name, "array dimensions must be positive"));
                }
                n_items = n_items
                    .checked_mul(d)
                    .filter(|&n| n <= MAX_SIZE)
                    .ok_or_else(|| MetadataError::CountOverflow(name.clone()))?;
                bytes = checked(&name, bytes.checked_mul(d))?;
            }
        }

        if let Some(seq) = &self.value_type.sequence {
            if is_string && !rules.string_sequences {
                return Err(MetadataError::StringSequence(name));
            }
            let bound = seq.value().unwrap_or(0);
            bytes = round_up(bytes, align);
            if bound > 0 {
                bytes = checked(&name, bytes.checked_mul(bound))?;
            } else {
                if rules.bounded_only {
                    return Err(MetadataError::UnboundedSequence(name));
                }
                local.unbounded = true;
                local.variable = true;
            }
            if top {
                if !element_fixed {
                    return Err(MetadataError::invalid(
                        &name,
                        "elements of a top-level sequence must have a fixed size",
                    ));
                }
                local.variable = true;
            } else {
                align = align.max(4);
                bytes = checked(&name, bytes.checked_add(align))?;
            }
        }

        group.max_align = group.max_align.max(align);
        if align < 4 {
            group.sub32 = true;
        }
        let offset = round_up(group.offset, align);
        group.offset = checked(&name, offset.checked_add(bytes))?;
        group.fold_flags(&local);
        self.layout = Layout {
            offset,
            align,
            data_align,
            n_bits,
            element_bytes,
            n_bytes: bytes,
            n_items,
            fixed_layout: !local.variable,
            element_fixed,
            top_sequence: top && self.is_sequence(),
            computed: true,
        };
        trace!(
            "layout {}: offset {} size {} align {} element {} fixed {}",
            self.name,
            offset,
            bytes,
            align,
            element_bytes,
            !local.variable
        );
        Ok(())
    }

    /// Lay out this member on its own, at offset 0.
    pub fn compute_layout(&mut self, rules: &LayoutRules) -> Result<GroupLayout, MetadataError> {
        let mut group = GroupLayout::default();
        self.offset(&mut group, rules, false)?;
        Ok(group)
    }

    /// Resolve symbolic extents, parse a deferred default, then compute layout.
    pub fn finalize(
        &mut self,
        resolver: &dyn IdentResolver,
        rules: &LayoutRules,
    ) -> Result<GroupLayout, MetadataError> {
        self.resolve_extents(resolver)?;
        self.finalize_defaults()?;
        self.compute_layout(rules)
    }

    pub(crate) fn finalize_defaults(&mut self) -> Result<(), MetadataError> {
        if let Some(text) = self.default_expr.take() {
            let v = Value::parse(self, &text).map_err(|source| MetadataError::Default {
                member: self.name.clone(),
                source,
            })?;
            self.default = Some(v);
        }
        if let TypeKind::Struct(members) = &mut self.value_type.kind {
            for m in members.iter_mut() {
                m.finalize_defaults()?;
            }
        }
        Ok(())
    }

    /// Smallest number of bytes this member can occupy: non-fixed sequences
    /// empty, non-fixed strings empty.
    pub fn min_bytes(&self) -> usize {
        let l = &self.layout;
        if l.fixed_layout {
            return l.n_bytes;
        }
        if self.is_sequence() {
            return if l.top_sequence { 0 } else { l.align };
        }
        let element = self.element_min_bytes();
        round_up(element, l.data_align.max(1)) * (l.n_items - 1) + element
    }

    fn element_min_bytes(&self) -> usize {
        let l = &self.layout;
        if l.element_fixed {
            return l.element_bytes;
        }
        match &self.value_type.kind {
            TypeKind::String { .. } => 1,
            TypeKind::Struct(members) => members
                .iter()
                .fold(0, |off, m| round_up(off, m.layout.align) + m.min_bytes()),
            TypeKind::Type(inner) => inner.min_bytes(),
            TypeKind::Scalar(_) | TypeKind::Enum(_) => l.element_bytes,
        }
    }

    /// Flatten the tree into rows for display; offsets are relative to the enclosing group.
    pub fn layout_rows(&self) -> Vec<LayoutRow> {
        let mut rows = Vec::new();
        self.push_rows("", 0, &mut rows);
        rows
    }

    fn push_rows(&self, prefix: &str, depth: usize, rows: &mut Vec<LayoutRow>) {
        let path = if prefix.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", prefix, self.name)
        };
        let l = &self.layout;
        rows.push(LayoutRow {
            path: path.clone(),
            depth,
            offset: l.offset,
            n_bytes: l.n_bytes,
            element_bytes: l.element_bytes,
            align: l.align,
            fixed_layout: l.fixed_layout,
        });
        match &self.value_type.kind {
            TypeKind::Struct(members) => {
                for m in members {
                    m.push_rows(&path, depth + 1, rows);
                }
            }
            TypeKind::Type(inner) => inner.push_rows(&path, depth + 1, rows),
            _ => {}
        }
    }
}

fn first_unresolved(m: &Member) -> Option<String> {
    use crate::types::Extent;
    let vt = &m.value_type;
    let own = vt
        .array_dimensions
        .iter()
        .chain(vt.sequence.iter())
        .chain(match &vt.kind {
            TypeKind::String { length } => Some(length),
            _ => None,
        })
        .find_map(|e| match e {
            Extent::Unresolved(text) => Some(text.clone()),
            Extent::Resolved(_) => None,
        });
    own.or_else(|| match &vt.kind {
        TypeKind::Struct(members) => members.iter().find_map(first_unresolved),
        TypeKind::Type(inner) => first_unresolved(inner),
        _ => None,
    })
}

/// One row of [`Member::layout_rows`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutRow {
    pub path: String,
    pub depth: usize,
    pub offset: usize,
    pub n_bytes: usize,
    pub element_bytes: usize,
    pub align: usize,
    pub fixed_layout: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BaseType;

    #[test]
    fn group_width_tracking() {
        let mut g = GroupLayout::default();
        g.note_width(32);
        assert!(!g.diverse_sizes);
        g.note_width(8);
        assert!(g.diverse_sizes);
        assert_eq!(g.min_size_bits, 8);
    }

    #[test]
    fn struct_minimum_skips_variable_tail() {
        let mut m = Member::structure(
            "s",
            vec![
                Member::scalar("a", BaseType::Octet),
                Member::scalar("b", BaseType::ULong).with_sequence(0),
            ],
        );
        m.compute_layout(&LayoutRules::message()).expect("layout");
        // 1 byte, padded to 4, then the count word
        assert_eq!(m.min_bytes(), 8);
        assert!(!m.layout.fixed_layout);
    }
}
