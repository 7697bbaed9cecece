// SPDX-License-Identifier: MIT
//! Postfix expression VM.
//!
//! Expressions arrive as whitespace-separated postfix text (`"#1 @2 A"`),
//! compile into a flat token stream plus a literal register file, and run on
//! a small stack machine bound to an optional node/object context. The VM is
//! the filter/selector runtime for subscriptions and traversals.

pub mod vm;

use std::sync::Arc;

use thiserror::Error;

use crate::error::GroveError;
use crate::ident::{NodeId, NODE_ID_SIZE};
use crate::object::TypedSet;

/// Maximum evaluation stack depth.
pub const MAX_STACK_DEPTH: usize = 128;

/// Exclusive upper bound for jump label numbers.
pub const MAX_LABELS: usize = 32;

/// Expression compile/runtime errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExprError {
    /// Unknown or reserved operator.
    #[error("illegal operator")]
    IllegalOpcode,
    /// Malformed operand (bad literal, bad label, bad set notation).
    #[error("illegal operand")]
    IllegalOperand,
    /// A numeric literal or numeric register read did not hold a number.
    #[error("not a number")]
    NotANumber,
    /// Stack underflow/overflow, duplicate label, or leftover operands.
    #[error("stack error")]
    StackError,
    /// Register index out of bounds.
    #[error("register index out of bounds")]
    RegisterBounds,
    /// A required register or binding was absent.
    #[error("null pointer exception")]
    NullPointer,
    /// Operand type mismatch.
    #[error("type error")]
    WrongType,
    /// Division (or modulo) by zero.
    #[error("divide by zero")]
    DivideByZero,
    /// Allocation failure.
    #[error("out of memory")]
    OutOfMemory,
}

impl From<ExprError> for GroveError {
    fn from(e: ExprError) -> Self {
        match e {
            ExprError::IllegalOpcode
            | ExprError::IllegalOperand
            | ExprError::NotANumber
            | ExprError::StackError => GroveError::ExprCompile,
            ExprError::WrongType => GroveError::WrongType,
            ExprError::OutOfMemory => GroveError::OutOfMemory,
            ExprError::RegisterBounds | ExprError::NullPointer | ExprError::DivideByZero => {
                GroveError::General
            }
        }
    }
}

/// A typed operand on the evaluation stack or in a register.
///
/// String operands carry a parallel numeric interpretation (the parsed prefix
/// of the string, NaN when unparsable) so the same register can be read with
/// `@i` or `$i`.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    /// Plain number.
    Num(f64),
    /// String with its numeric interpretation.
    Str {
        /// The string value.
        s: Arc<str>,
        /// Parsed numeric prefix, NaN when the string is not number-like.
        d: f64,
    },
    /// Typed set.
    Set(Arc<TypedSet>),
}

impl Operand {
    /// String operand with the numeric interpretation computed.
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str {
            d: parse_prefix_f64(s),
            s: Arc::from(s),
        }
    }

    /// String operand forced to a NaN numeric interpretation.
    #[must_use]
    pub fn str_nan(s: &str) -> Self {
        Self::Str {
            d: f64::NAN,
            s: Arc::from(s),
        }
    }

    /// Truthiness per the operand typing rules.
    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Self::Num(d) => {
                #[allow(clippy::cast_possible_truncation)]
                let t = if d.is_nan() { 0 } else { *d as i64 };
                t != 0
            }
            Self::Str { s, d } => {
                if d.is_nan() {
                    !s.is_empty() && s.as_bytes()[0] != 0
                } else {
                    #[allow(clippy::cast_possible_truncation)]
                    let t = *d as i64;
                    t != 0
                }
            }
            Self::Set(s) => !s.is_empty(),
        }
    }

    /// Numeric interpretation; NaN for sets.
    #[must_use]
    pub fn num(&self) -> f64 {
        match self {
            Self::Num(d) | Self::Str { d, .. } => *d,
            Self::Set(_) => f64::NAN,
        }
    }

    /// String interpretation; empty for numbers and sets.
    #[must_use]
    pub fn str_val(&self) -> &str {
        match self {
            Self::Str { s, .. } => s,
            _ => "",
        }
    }

    /// Set interpretation, when this operand is a set.
    #[must_use]
    pub fn set(&self) -> Option<&TypedSet> {
        match self {
            Self::Set(s) => Some(s),
            _ => None,
        }
    }
}

/// Parses the leading number-like prefix of `s`; NaN when absent.
#[must_use]
fn parse_prefix_f64(s: &str) -> f64 {
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'+' | b'-' if end == 0 || bytes[end - 1] == b'e' || bytes[end - 1] == b'E' => {}
            b'0'..=b'9' => seen_digit = true,
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => {
                seen_exp = true;
            }
            _ => break,
        }
        end += 1;
    }
    if !seen_digit {
        return f64::NAN;
    }
    // Trim a trailing exponent marker or sign that never got digits.
    let mut slice = &s[..end];
    while slice.ends_with(['e', 'E', '+', '-']) {
        slice = &slice[..slice.len() - 1];
    }
    slice.parse::<f64>().unwrap_or(f64::NAN)
}

/// One compiled instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Token {
    /// Call the operator identified by its ASCII opcode.
    Call(u8),
    /// Push user register `i` checked as a number.
    RegNum(u32),
    /// Push user register `i` as a string.
    RegStr(u32),
    /// Push user register `i` checked as a set.
    RegSet(u32),
    /// Push literal `i` from the literal register file.
    Lit(u32),
    /// Pop; when truthy, continue execution at the absolute token index.
    JmpFwd(u32),
}

/// A compiled expression: token stream plus literal register file.
///
/// The literal file is immutable after compile and shared across
/// evaluations; per-call state lives in the user [`RegisterFile`] and the
/// evaluation stack.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub(crate) tokens: Vec<Token>,
    pub(crate) literals: Vec<Operand>,
    src: String,
}

impl Expression {
    /// Compiles postfix source text.
    ///
    /// # Errors
    /// Compile-time errors per the syntax rules: [`ExprError::IllegalOpcode`],
    /// [`ExprError::IllegalOperand`], [`ExprError::NotANumber`], and
    /// [`ExprError::StackError`] for duplicate labels.
    pub fn compile(input: &str) -> Result<Self, ExprError> {
        let toks = tokenize(input)?;

        // First pass: map labels to token indexes.
        let mut labels = [usize::MAX; MAX_LABELS];
        for (i, tok) in toks.iter().enumerate() {
            match parse_label(tok) {
                LabelParse::None => {}
                LabelParse::Invalid => return Err(ExprError::IllegalOperand),
                LabelParse::Label(l, _) => {
                    if labels[l] != usize::MAX {
                        return Err(ExprError::StackError);
                    }
                    labels[l] = i;
                }
            }
        }

        let mut tokens = Vec::with_capacity(toks.len());
        let mut literals = Vec::new();
        for (i, raw) in toks.iter().enumerate() {
            let tok = match parse_label(raw) {
                LabelParse::Label(_, rest) => rest,
                _ => raw.as_str(),
            };
            if tok.is_empty() {
                return Err(ExprError::IllegalOperand);
            }
            let lit_index = u32::try_from(literals.len()).map_err(|_| ExprError::StackError)?;
            match tok.as_bytes()[0] {
                b'#' => {
                    let d = tok[1..].parse::<f64>().map_err(|_| ExprError::NotANumber)?;
                    literals.push(Operand::Num(d));
                    tokens.push(Token::Lit(lit_index));
                }
                b'"' => {
                    let inner = tok
                        .strip_prefix('"')
                        .and_then(|t| t.strip_suffix('"'))
                        .ok_or(ExprError::IllegalOperand)?;
                    literals.push(Operand::str_nan(inner));
                    tokens.push(Token::Lit(lit_index));
                }
                b'{' => {
                    literals.push(Operand::Set(Arc::new(parse_set_literal(tok)?)));
                    tokens.push(Token::Lit(lit_index));
                }
                b'@' => tokens.push(Token::RegNum(parse_reg_index(&tok[1..])?)),
                b'$' => tokens.push(Token::RegStr(parse_reg_index(&tok[1..])?)),
                b'&' => tokens.push(Token::RegSet(parse_reg_index(&tok[1..])?)),
                b'>' => {
                    let l = tok[1..]
                        .parse::<usize>()
                        .map_err(|_| ExprError::IllegalOperand)?;
                    if l == 0 || l >= MAX_LABELS {
                        return Err(ExprError::IllegalOperand);
                    }
                    let target = labels[l];
                    if target == usize::MAX || target <= i {
                        // Unknown label or a backward jump.
                        return Err(ExprError::IllegalOperand);
                    }
                    let target = u32::try_from(target).map_err(|_| ExprError::StackError)?;
                    tokens.push(Token::JmpFwd(target));
                }
                op => {
                    if tok.len() != 1 || !vm::is_known_opcode(op) {
                        return Err(ExprError::IllegalOpcode);
                    }
                    tokens.push(Token::Call(op));
                }
            }
        }

        Ok(Self {
            tokens,
            literals,
            src: input.to_owned(),
        })
    }

    /// The original source text.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.src
    }
}

/// Label parse outcome.
enum LabelParse<'a> {
    None,
    Invalid,
    Label(usize, &'a str),
}

/// Parses a potential `.N:` jump label prefix.
fn parse_label(tok: &str) -> LabelParse<'_> {
    let Some(rest) = tok.strip_prefix('.') else {
        return LabelParse::None;
    };
    let Some(colon) = rest.find(':') else {
        return if rest.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            LabelParse::Invalid
        } else {
            LabelParse::None
        };
    };
    let digits = &rest[..colon];
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return LabelParse::Invalid;
    }
    match digits.parse::<usize>() {
        Ok(l) if l > 0 && l < MAX_LABELS => LabelParse::Label(l, &rest[colon + 1..]),
        _ => LabelParse::Invalid,
    }
}

fn parse_reg_index(s: &str) -> Result<u32, ExprError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ExprError::IllegalOperand);
    }
    s.parse::<u32>().map_err(|_| ExprError::IllegalOperand)
}

/// Parses a `{ "a", "b" }` set literal. Only string sets are supported.
fn parse_set_literal(tok: &str) -> Result<TypedSet, ExprError> {
    let inner = tok
        .strip_prefix('{')
        .and_then(|t| t.strip_suffix('}'))
        .ok_or(ExprError::IllegalOperand)?
        .trim();
    let mut set = TypedSet::new(crate::object::SetType::String);
    if inner.is_empty() {
        return Ok(set);
    }
    for item in inner.split(',') {
        let item = item.trim();
        let s = item
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .ok_or(ExprError::IllegalOperand)?;
        set.add(crate::object::SetValue::Str(s.to_owned()))
            .map_err(|_| ExprError::WrongType)?;
    }
    Ok(set)
}

/// Splits the source into tokens, honoring `"…"` and `{…}` grouping.
fn tokenize(input: &str) -> Result<Vec<String>, ExprError> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i].is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let start = i;
        // A token that contains a grouping char extends to its closer even
        // across whitespace (set literals contain spaces).
        let mut close: Option<u8> = None;
        while i < bytes.len() {
            let c = bytes[i];
            if let Some(cl) = close {
                if c == cl {
                    close = None;
                    if cl == b'}' {
                        i += 1;
                        break;
                    }
                }
            } else if c == b'"' {
                close = Some(b'"');
            } else if c == b'{' {
                close = Some(b'}');
            } else if c.is_ascii_whitespace() {
                break;
            }
            i += 1;
        }
        if close.is_some() {
            // Unterminated quote or set literal.
            return Err(ExprError::IllegalOperand);
        }
        out.push(input[start..i].trim().to_owned());
    }
    Ok(out)
}

/// Per-call register file for user registers.
#[derive(Debug, Clone, Default)]
pub struct RegisterFile {
    regs: Vec<Option<Operand>>,
}

impl RegisterFile {
    /// Creates a file with `n` registers, all unset.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self {
            regs: vec![None; n.max(1)],
        }
    }

    /// Number of registers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regs.len()
    }

    /// Returns `true` when the file has no registers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty()
    }

    /// Sets register `i` to a string value (with numeric interpretation).
    ///
    /// # Errors
    /// [`ExprError::RegisterBounds`] when `i` is out of range.
    pub fn set_str(&mut self, i: usize, s: &str) -> Result<(), ExprError> {
        let slot = self.regs.get_mut(i).ok_or(ExprError::RegisterBounds)?;
        *slot = Some(Operand::str(s));
        Ok(())
    }

    /// Sets register `i` to the 10-byte padded form of a node id.
    ///
    /// # Errors
    /// [`ExprError::RegisterBounds`] when `i` is out of range.
    pub fn set_id(&mut self, i: usize, id: NodeId) -> Result<(), ExprError> {
        let mut s = String::with_capacity(NODE_ID_SIZE);
        for b in id.as_bytes() {
            s.push(char::from(*b));
        }
        let slot = self.regs.get_mut(i).ok_or(ExprError::RegisterBounds)?;
        *slot = Some(Operand::str_nan(&s));
        Ok(())
    }

    /// Sets register `i` to a number.
    ///
    /// # Errors
    /// [`ExprError::RegisterBounds`] when `i` is out of range.
    pub fn set_num(&mut self, i: usize, d: f64) -> Result<(), ExprError> {
        let slot = self.regs.get_mut(i).ok_or(ExprError::RegisterBounds)?;
        *slot = Some(Operand::Num(d));
        Ok(())
    }

    /// Sets register `i` to a set.
    ///
    /// # Errors
    /// [`ExprError::RegisterBounds`] when `i` is out of range.
    pub fn set_set(&mut self, i: usize, set: TypedSet) -> Result<(), ExprError> {
        let slot = self.regs.get_mut(i).ok_or(ExprError::RegisterBounds)?;
        *slot = Some(Operand::Set(Arc::new(set)));
        Ok(())
    }

    /// Clears register `i`.
    pub fn clear(&mut self, i: usize) {
        if let Some(slot) = self.regs.get_mut(i) {
            *slot = None;
        }
    }

    pub(crate) fn get(&self, i: usize) -> Result<&Operand, ExprError> {
        self.regs
            .get(i)
            .ok_or(ExprError::RegisterBounds)?
            .as_ref()
            .ok_or(ExprError::NullPointer)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn compiles_simple_literals() {
        let e = Expression::compile("#1 #2 A").unwrap();
        assert_eq!(e.tokens.len(), 3);
        assert_eq!(e.literals.len(), 2);
    }

    #[test]
    fn rejects_bad_number_literal() {
        assert_eq!(Expression::compile("#r"), Err(ExprError::NotANumber));
    }

    #[test]
    fn rejects_unknown_operator() {
        assert_eq!(Expression::compile("#1 Y"), Err(ExprError::IllegalOpcode));
        assert_eq!(Expression::compile("#1 q"), Err(ExprError::IllegalOpcode));
    }

    #[test]
    fn set_literal_parses_including_empty() {
        let e = Expression::compile(r#"{ "a", "b" }"#).unwrap();
        assert!(matches!(&e.literals[0], Operand::Set(s) if s.len() == 2));
        let e = Expression::compile("{}").unwrap();
        assert!(matches!(&e.literals[0], Operand::Set(s) if s.is_empty()));
    }

    #[test]
    fn labels_must_be_unique_and_jumps_forward() {
        assert!(Expression::compile("#1 >1 #0 .1:X").is_ok());
        assert_eq!(
            Expression::compile(".1:X #1 >1"),
            Err(ExprError::IllegalOperand)
        );
        assert_eq!(
            Expression::compile(".1:X .1:X"),
            Err(ExprError::StackError)
        );
        assert_eq!(Expression::compile("#1 >9"), Err(ExprError::IllegalOperand));
    }

    #[test]
    fn string_numeric_interpretation() {
        assert!((parse_prefix_f64("42abc") - 42.0).abs() < f64::EPSILON);
        assert!((parse_prefix_f64("-1.5") + 1.5).abs() < f64::EPSILON);
        assert!(parse_prefix_f64("abc").is_nan());
        assert!(parse_prefix_f64("").is_nan());
    }

    #[test]
    fn operand_truthiness() {
        assert!(Operand::Num(1.0).truthy());
        assert!(!Operand::Num(0.0).truthy());
        // Fractional magnitudes below one truncate to zero.
        assert!(!Operand::Num(0.5).truthy());
        assert!(!Operand::Num(f64::NAN).truthy());
        assert!(!Operand::str("0").truthy());
        assert!(Operand::str("1").truthy());
        assert!(Operand::str_nan("x").truthy());
        assert!(!Operand::str_nan("").truthy());
    }
}
