//! Parse extent expressions and value text into small syntax trees using PEST.
//!
//! Only syntax lives here: [`crate::expr`] evaluates [`Expr`] trees and
//! [`crate::value`] turns [`TextNode`] trees into typed values.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser as PestParser;

#[derive(PestParser)]
#[grammar = "grammar.pest"]
struct TextParser;

/// Integer expression used for array dimensions, sequence bounds and string lengths.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(i64),
    Ident(String),
    Binary(Box<Expr>, BinOp, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

/// Untyped value text.
#[derive(Debug, Clone, PartialEq)]
pub enum TextNode {
    Braced(Vec<TextNode>),
    Field(String, Box<TextNode>),
    Str(String),
    Char(u8),
    Number(String),
    Bool(bool),
    Ident(String),
}

/// Parse an extent expression such as `4`, `0x10` or `nchan * 2`.
pub fn parse_expr(source: &str) -> Result<Expr, String> {
    let pairs = TextParser::parse(Rule::extent, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs
        .into_iter()
        .find(|p| p.as_rule() == Rule::expr)
        .ok_or("Empty expression")?;
    build_expr(pair)
}

fn build_expr(pair: Pair<Rule>) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or("expr: missing term")?;
    let mut lhs = build_term(first)?;
    while let Some(op) = inner.next() {
        let rhs = build_term(inner.next().ok_or("expr: missing operand")?)?;
        let op = match op.as_str() {
            "+" => BinOp::Add,
            "-" => BinOp::Sub,
            other => return Err(format!("Unknown operator: {}", other)),
        };
        lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
    }
    Ok(lhs)
}

fn build_term(pair: Pair<Rule>) -> Result<Expr, String> {
    let mut inner = pair.into_inner();
    let first = inner.next().ok_or("term: missing factor")?;
    let mut lhs = build_factor(first)?;
    while let Some(op) = inner.next() {
        let rhs = build_factor(inner.next().ok_or("term: missing operand")?)?;
        let op = match op.as_str() {
            "*" => BinOp::Mul,
            "/" => BinOp::Div,
            "%" => BinOp::Rem,
            other => return Err(format!("Unknown operator: {}", other)),
        };
        lhs = Expr::Binary(Box::new(lhs), op, Box::new(rhs));
    }
    Ok(lhs)
}

fn build_factor(pair: Pair<Rule>) -> Result<Expr, String> {
    match pair.as_rule() {
        Rule::dec => pair
            .as_str()
            .parse()
            .map(Expr::Number)
            .map_err(|e| format!("Bad number {}: {}", pair.as_str(), e)),
        Rule::hex => i64::from_str_radix(&pair.as_str()[2..], 16)
            .map(Expr::Number)
            .map_err(|e| format!("Bad number {}: {}", pair.as_str(), e)),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::expr => build_expr(pair),
        other => Err(format!("Unexpected rule in expression: {:?}", other)),
    }
}

/// Parse value text into its top-level comma-separated items.
pub fn parse_value_text(source: &str) -> Result<Vec<TextNode>, String> {
    let pairs =
        TextParser::parse(Rule::value_text, source).map_err(|e| format!("Parse error: {}", e))?;
    let pair = pairs.into_iter().next().ok_or("Empty parse")?;
    pair.into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_node)
        .collect()
}

fn build_node(pair: Pair<Rule>) -> Result<TextNode, String> {
    match pair.as_rule() {
        Rule::braced => Ok(TextNode::Braced(
            pair.into_inner().map(build_node).collect::<Result<_, _>>()?,
        )),
        Rule::field => {
            let mut it = pair.into_inner();
            let name = it.next().ok_or("field: name")?.as_str().to_string();
            let value = build_node(it.next().ok_or("field: value")?)?;
            Ok(TextNode::Field(name, Box::new(value)))
        }
        Rule::string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(TextNode::Str(unescape(raw)?))
        }
        Rule::char_lit => {
            let raw = pair.into_inner().next().ok_or("char: empty")?.as_str();
            let s = unescape(raw)?;
            match s.as_bytes() {
                [b] => Ok(TextNode::Char(*b)),
                _ => Err(format!("Not a single-byte character: '{}'", raw)),
            }
        }
        Rule::number => Ok(TextNode::Number(pair.as_str().to_string())),
        Rule::boolean => Ok(TextNode::Bool(pair.as_str() == "true")),
        Rule::ident => Ok(TextNode::Ident(pair.as_str().to_string())),
        other => Err(format!("Unexpected rule in value: {:?}", other)),
    }
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(c @ ('\\' | '"' | '\'')) => out.push(c),
            Some(other) => return Err(format!("Unknown escape: \\{}", other)),
            None => return Err("Dangling escape".to_string()),
        }
    }
    Ok(out)
}

/// Inverse of the string unescaping, used when unparsing.
pub fn escape(s: &str, quote: char) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\\' => out.push_str("\\\\"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}
