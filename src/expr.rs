//! Symbolic extents: parsing, evaluation against an [`IdentResolver`], and the
//! transition of a member tree from unresolved to resolved extents.

use crate::error::MetadataError;
use crate::member::Member;
use crate::parser::{self, BinOp, Expr};
use crate::types::{Extent, TypeKind};
use std::collections::HashMap;

/// Value of a symbol supplied by a resolver.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprValue {
    Number(i64),
    Text(String),
}

/// Supplies values for identifiers used in extent and default expressions
/// (e.g. worker parameters or assembly-level overrides).
pub trait IdentResolver {
    fn get_value(&self, symbol: &str) -> Result<ExprValue, String>;
}

impl IdentResolver for HashMap<String, i64> {
    fn get_value(&self, symbol: &str) -> Result<ExprValue, String> {
        self.get(symbol)
            .map(|v| ExprValue::Number(*v))
            .ok_or_else(|| format!("unknown symbol \"{}\"", symbol))
    }
}

impl IdentResolver for HashMap<String, ExprValue> {
    fn get_value(&self, symbol: &str) -> Result<ExprValue, String> {
        self.get(symbol)
            .cloned()
            .ok_or_else(|| format!("unknown symbol \"{}\"", symbol))
    }
}

/// Resolver that knows no symbols.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSymbols;

impl IdentResolver for NoSymbols {
    fn get_value(&self, symbol: &str) -> Result<ExprValue, String> {
        Err(format!("unknown symbol \"{}\"", symbol))
    }
}

impl Extent {
    /// Parse extent text. Constant expressions are evaluated at once; anything
    /// naming a symbol is kept as [`Extent::Unresolved`].
    pub fn parse(text: &str) -> Result<Extent, MetadataError> {
        let expr = parser::parse_expr(text).map_err(|message| MetadataError::Expression {
            expr: text.to_string(),
            message,
        })?;
        if has_symbols(&expr) {
            return Ok(Extent::Unresolved(text.trim().to_string()));
        }
        evaluate_extent(text, &expr, &NoSymbols).map(Extent::Resolved)
    }

    /// Evaluate against `resolver`. Already-resolved extents are returned unchanged.
    pub fn resolve(&self, resolver: &dyn IdentResolver) -> Result<Extent, MetadataError> {
        match self {
            Extent::Resolved(v) => Ok(Extent::Resolved(*v)),
            Extent::Unresolved(text) => {
                let expr = parser::parse_expr(text).map_err(|message| MetadataError::Expression {
                    expr: text.clone(),
                    message,
                })?;
                evaluate_extent(text, &expr, resolver).map(Extent::Resolved)
            }
        }
    }
}

fn has_symbols(expr: &Expr) -> bool {
    match expr {
        Expr::Number(_) => false,
        Expr::Ident(_) => true,
        Expr::Binary(l, _, r) => has_symbols(l) || has_symbols(r),
    }
}

fn evaluate_extent(text: &str, expr: &Expr, resolver: &dyn IdentResolver) -> Result<usize, MetadataError> {
    let err = |message: String| MetadataError::Expression {
        expr: text.to_string(),
        message,
    };
    let v = evaluate(expr, resolver).map_err(err)?;
    if v < 0 || v > u32::MAX as i64 {
        return Err(err(format!("value {} is out of range", v)));
    }
    Ok(v as usize)
}

/// Evaluate an integer expression with checked arithmetic.
pub fn evaluate(expr: &Expr, resolver: &dyn IdentResolver) -> Result<i64, String> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Ident(name) => match resolver.get_value(name)? {
            ExprValue::Number(n) => Ok(n),
            ExprValue::Text(t) => Err(format!("symbol \"{}\" is not numeric (\"{}\")", name, t)),
        },
        Expr::Binary(l, op, r) => {
            let (a, b) = (evaluate(l, resolver)?, evaluate(r, resolver)?);
            let v = match op {
                BinOp::Add => a.checked_add(b),
                BinOp::Sub => a.checked_sub(b),
                BinOp::Mul => a.checked_mul(b),
                BinOp::Div => a.checked_div(b),
                BinOp::Rem => a.checked_rem(b),
            };
            v.ok_or_else(|| format!("arithmetic overflow or division by zero in {} {:?} {}", a, op, b))
        }
    }
}

impl Member {
    /// Replace every symbolic extent in this tree with its value.
    pub fn resolve_extents(&mut self, resolver: &dyn IdentResolver) -> Result<(), MetadataError> {
        let vt = &mut self.value_type;
        for d in vt.array_dimensions.iter_mut() {
            *d = d.resolve(resolver)?;
        }
        if let Some(s) = vt.sequence.as_mut() {
            *s = s.resolve(resolver)?;
        }
        match &mut vt.kind {
            TypeKind::String { length } => *length = length.resolve(resolver)?,
            TypeKind::Struct(members) => {
                for m in members.iter_mut() {
                    m.resolve_extents(resolver)?;
                }
            }
            TypeKind::Type(inner) => inner.resolve_extents(resolver)?,
            TypeKind::Scalar(_) | TypeKind::Enum(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_extents_resolve_immediately() {
        assert_eq!(Extent::parse("4*4+1").expect("parse"), Extent::Resolved(17));
        assert_eq!(
            Extent::parse(" nchan * 2 ").expect("parse"),
            Extent::Unresolved("nchan * 2".to_string())
        );
        assert!(Extent::parse("1 - 2").is_err());
    }

    #[test]
    fn symbolic_extents_use_resolver() {
        let mut symbols = HashMap::new();
        symbols.insert("nchan".to_string(), 6i64);
        let e = Extent::parse("nchan * 2").expect("parse");
        assert_eq!(e.resolve(&symbols).expect("resolve"), Extent::Resolved(12));
        assert!(e.resolve(&NoSymbols).is_err());
    }
}
