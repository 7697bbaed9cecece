// SPDX-License-Identifier: MIT
//! Stack machine executing compiled expressions.

use std::sync::Arc;

use crate::hierarchy::Node;
use crate::object::{Object, SetType, SetValue, TypedSet};

use super::{ExprError, Expression, Operand, RegisterFile, Token, MAX_STACK_DEPTH};

/// Evaluation context bindings.
///
/// `node` and `obj` are the current node and the object the filter runs
/// against (the node's data object, or an edge metadata object for edge
/// filters). `now_ms` feeds the clock opcode so evaluation stays a pure
/// function of its inputs.
#[derive(Debug, Clone, Copy)]
pub struct Bindings<'a> {
    /// Current node, when evaluating against one.
    pub node: Option<&'a Node>,
    /// Current object (node data or edge metadata).
    pub obj: Option<&'a Object>,
    /// Millisecond clock value for the `n` opcode.
    pub now_ms: i64,
}

impl Bindings<'_> {
    /// Bindings with no node or object attached.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            node: None,
            obj: None,
            now_ms: 0,
        }
    }
}

/// Returns `true` for opcodes in the implemented alphabet.
pub(crate) fn is_known_opcode(op: u8) -> bool {
    matches!(op, b'A'..=b'X' | b'Z' | b'a'..=b'o' | b'z')
}

/// JS-style modulo: the result has the sign of the dividend and a positive
/// magnitude below `|y|`.
fn js_fmod(x: f64, y: f64) -> f64 {
    let y = libm::fabs(y);
    let mut result = libm::remainder(libm::fabs(x), y);
    if result.is_sign_negative() {
        result += y;
    }
    libm::copysign(result, x)
}

struct Vm<'a, 'b> {
    stack: Vec<Operand>,
    expr: &'a Expression,
    regs: &'a RegisterFile,
    b: &'a Bindings<'b>,
}

enum Flow {
    Next,
    Break,
}

impl Vm<'_, '_> {
    fn pop(&mut self) -> Result<Operand, ExprError> {
        self.stack.pop().ok_or(ExprError::StackError)
    }

    fn push(&mut self, v: Operand) -> Result<(), ExprError> {
        if self.stack.len() >= MAX_STACK_DEPTH {
            return Err(ExprError::StackError);
        }
        self.stack.push(v);
        Ok(())
    }

    fn push_num(&mut self, d: f64) -> Result<(), ExprError> {
        self.push(Operand::Num(d))
    }

    fn push_bool(&mut self, v: bool) -> Result<(), ExprError> {
        self.push(Operand::Num(f64::from(u8::from(v))))
    }

    fn push_set(&mut self, s: TypedSet) -> Result<(), ExprError> {
        self.push(Operand::Set(Arc::new(s)))
    }

    /// Resolves a set-or-field-name operand into a set value.
    fn resolve_set(&self, op: &Operand) -> Option<TypedSet> {
        if let Some(s) = op.set() {
            return Some(s.clone());
        }
        let field = op.str_val();
        if let Some(obj) = self.b.obj {
            if let Ok(s) = obj.get_set(field) {
                return Some(s.clone());
            }
        }
        self.b.node.and_then(|n| n.field_string_set(field))
    }

    fn op_has(&mut self) -> Result<Flow, ExprError> {
        let s = self.pop()?;
        let v = self.pop()?;
        let set = match s.set() {
            Some(set) => Some(set.clone()),
            None => {
                if self.b.obj.is_none() && self.b.node.is_none() {
                    return Err(ExprError::NullPointer);
                }
                self.resolve_set(&s)
            }
        };
        let res = set.is_some_and(|set| match set.set_type() {
            SetType::String => set.has_str(v.str_val()),
            SetType::Double => set.has(&SetValue::Double(v.num())),
            #[allow(clippy::cast_possible_truncation)]
            SetType::Long => set.has(&SetValue::Long(v.num() as i64)),
        });
        self.push_bool(res)?;
        Ok(Flow::Next)
    }

    fn op_rec_filter(&mut self) -> Result<Flow, ExprError> {
        let a = self.pop()?;
        let b = self.pop()?;
        let c = self.pop()?;
        let field = a.str_val().to_owned();
        let opspec = b.str_val();
        if opspec.len() != 2 {
            return Err(ExprError::IllegalOpcode);
        }
        let sel = opspec.as_bytes()[0];
        let op = opspec.as_bytes()[1];
        if !matches!(sel, b'a' | b'f' | b'l') {
            return Err(ExprError::IllegalOperand);
        }
        let v = c.str_val().to_owned();
        if v.is_empty() {
            return Err(ExprError::IllegalOperand);
        }
        let Some(node) = self.b.node else {
            return Err(ExprError::NullPointer);
        };
        let Some(keys) = node.edge_record_keys(&field) else {
            return self.push(Operand::str_nan("")).map(|()| Flow::Next);
        };

        let mut out = TypedSet::new(SetType::String);
        let mut last: Option<String> = None;
        for key in keys {
            let r = key.as_str().cmp(v.as_str());
            let matched = match op {
                b'F' => r.is_eq(),
                b'G' => r.is_ne(),
                b'H' => r.is_lt(),
                b'I' => r.is_gt(),
                b'J' => r.is_le(),
                b'K' => r.is_ge(),
                b'm' => key.contains(&v),
                _ => return Err(ExprError::IllegalOpcode),
            };
            if matched {
                if sel == b'l' {
                    last = Some(key);
                } else {
                    out.add(SetValue::Str(format!("{field}.{key}")))
                        .map_err(|_| ExprError::WrongType)?;
                    if sel == b'f' {
                        break;
                    }
                }
            }
        }
        if let Some(key) = last {
            out.add(SetValue::Str(format!("{field}.{key}")))
                .map_err(|_| ExprError::WrongType)?;
        }
        self.push_set(out)?;
        Ok(Flow::Next)
    }

    fn call(&mut self, op: u8) -> Result<Flow, ExprError> {
        match op {
            // Arithmetic over the numeric interpretation; `a` is the top of
            // the stack.
            b'A' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_num(a.num() + b.num())?;
            }
            b'B' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_num(a.num() - b.num())?;
            }
            b'C' => {
                let (a, b) = (self.pop()?, self.pop()?);
                if b.num() == 0.0 {
                    return Err(ExprError::DivideByZero);
                }
                self.push_num(a.num() / b.num())?;
            }
            b'D' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_num(a.num() * b.num())?;
            }
            b'E' => {
                let (a, b) = (self.pop()?, self.pop()?);
                if b.num() == 0.0 {
                    return Err(ExprError::DivideByZero);
                }
                self.push_num(js_fmod(a.num(), b.num()))?;
            }
            b'F' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() == b.num())?;
            }
            b'G' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() != b.num())?;
            }
            b'H' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() < b.num())?;
            }
            b'I' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() > b.num())?;
            }
            b'J' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() <= b.num())?;
            }
            b'K' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.num() >= b.num())?;
            }
            b'L' => {
                let a = self.pop()?;
                self.push_bool(!a.truthy())?;
            }
            b'M' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.truthy() && b.truthy())?;
            }
            b'N' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.truthy() || b.truthy())?;
            }
            b'O' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.truthy() ^ b.truthy())?;
            }
            // Modal short-circuiters.
            b'P' => {
                let a = self.pop()?;
                if a.truthy() {
                    self.push(a)?;
                } else {
                    self.push_num(0.0)?;
                    return Ok(Flow::Break);
                }
            }
            b'Q' => {
                let a = self.pop()?;
                if a.truthy() {
                    self.push(a)?;
                    return Ok(Flow::Break);
                }
                self.push(a)?;
            }
            // Stack shuffles.
            b'R' => {
                let a = self.pop()?;
                self.push(a.clone())?;
                self.push(a)?;
            }
            b'S' => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(a)?;
                self.push(b)?;
            }
            b'T' => {
                let a = self.pop()?;
                let b = self.pop()?;
                let c = self.pop()?;
                self.push(if a.truthy() { b } else { c })?;
            }
            b'U' => {
                let _ = self.pop()?;
            }
            b'V' => {
                let a = self.pop()?;
                let b = self.pop()?;
                self.push(b.clone())?;
                self.push(a)?;
                self.push(b)?;
            }
            b'W' => {
                let a = self.pop()?;
                let b = self.pop()?;
                let c = self.pop()?;
                self.push(b)?;
                self.push(c)?;
                self.push(a)?;
            }
            b'X' => {}
            b'Z' => return Ok(Flow::Break),
            // Data operations.
            b'a' => return self.op_has(),
            b'b' => {
                let a = self.pop()?;
                let s = a.str_val();
                if s.len() < crate::ident::NODE_ID_SIZE {
                    return Err(ExprError::WrongType);
                }
                let ty: String = s.chars().take(crate::ident::NODE_TYPE_SIZE).collect();
                self.push(Operand::str_nan(&ty))?;
            }
            b'c' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.str_val() == b.str_val())?;
            }
            b'd' => {
                let (a, b) = (self.pop()?, self.pop()?);
                let (sa, sb) = (a.str_val().as_bytes(), b.str_val().as_bytes());
                let n = crate::ident::NODE_ID_SIZE;
                self.push_bool(sa.len() >= n && sb.len() >= n && sa[..n] == sb[..n])?;
            }
            b'e' => {
                let a = self.pop()?;
                let reg0 = self.regs.get(0)?;
                let ta = type_prefix(a.str_val());
                let tb = type_prefix(reg0.str_val());
                self.push_bool(ta == tb)?;
            }
            b'f' => {
                let a = self.pop()?;
                self.get_field(a.str_val(), FieldKind::String)?;
            }
            b'g' => {
                let a = self.pop()?;
                self.get_field(a.str_val(), FieldKind::Number)?;
            }
            b'h' => {
                let a = self.pop()?;
                let field = a.str_val();
                let present = self
                    .b
                    .node
                    .is_some_and(|n| n.is_nonempty_field(field))
                    || self.b.obj.is_some_and(|o| o.exists(field));
                self.push_bool(present)?;
            }
            b'i' => {
                let a = self.pop()?;
                let b = self.pop()?;
                let c = self.pop()?;
                self.push_bool(a.num() <= b.num() && b.num() <= c.num())?;
            }
            b'j' => {
                let a = self.pop()?;
                let node = self.b.node.ok_or(ExprError::IllegalOperand)?;
                let Some(set) = a.set().filter(|s| s.set_type() == SetType::String) else {
                    return Err(ExprError::WrongType);
                };
                let mut out = TypedSet::new(SetType::String);
                for field in set.iter_str() {
                    if node.is_nonempty_field(field) {
                        out.add(SetValue::Str(field.to_owned()))
                            .map_err(|_| ExprError::WrongType)?;
                        break;
                    }
                }
                self.push_set(out)?;
            }
            b'k' => {
                let a = self.pop()?;
                let node = self.b.node.ok_or(ExprError::IllegalOperand)?;
                let all = match a.set().filter(|s| s.set_type() == SetType::String) {
                    Some(set) => set.iter_str().all(|f| node.is_nonempty_field(f)),
                    None => return Err(ExprError::WrongType),
                };
                if all {
                    self.push(a)?;
                } else {
                    self.push_set(TypedSet::new(SetType::String))?;
                }
            }
            b'l' => {
                let a = self.pop()?;
                let b = self.pop()?;
                let res = match (self.resolve_set(&a), self.resolve_set(&b)) {
                    (Some(sa), Some(sb)) => sa.is_subset(&sb),
                    _ => false,
                };
                self.push_bool(res)?;
            }
            b'm' => {
                let (a, b) = (self.pop()?, self.pop()?);
                self.push_bool(a.str_val().contains(b.str_val()))?;
            }
            b'n' => {
                #[allow(clippy::cast_precision_loss)]
                self.push_num(self.b.now_ms as f64)?;
            }
            b'o' => return self.op_rec_filter(),
            b'z' => {
                let a = self.pop()?;
                let b = self.pop()?;
                let (Some(sa), Some(sb)) = (a.set(), b.set()) else {
                    return Err(ExprError::WrongType);
                };
                let u = sa.union(sb).map_err(|_| ExprError::WrongType)?;
                self.push_set(u)?;
            }
            _ => return Err(ExprError::IllegalOpcode),
        }
        Ok(Flow::Next)
    }

    fn get_field(&mut self, field: &str, kind: FieldKind) -> Result<(), ExprError> {
        let Some(obj) = self.b.obj else {
            return Err(ExprError::NullPointer);
        };
        match obj.get_path(field) {
            Err(_) => match kind {
                FieldKind::Number => self.push_num(f64::NAN),
                FieldKind::String => self.push(Operand::str_nan("")),
            },
            Ok(crate::object::Value::Set(s)) => self.push_set(s.clone()),
            Ok(v) => match kind {
                FieldKind::Number => match v.as_double() {
                    Ok(d) => self.push_num(d),
                    Err(_) => Err(ExprError::NotANumber),
                },
                FieldKind::String => match v.as_str() {
                    Ok(s) => self.push(Operand::str_nan(s)),
                    Err(_) => self.push(Operand::str_nan("")),
                },
            },
        }
    }
}

/// First two bytes of a string, NUL-padded.
fn type_prefix(s: &str) -> [u8; 2] {
    let b = s.as_bytes();
    [
        b.first().copied().unwrap_or(0),
        b.get(1).copied().unwrap_or(0),
    ]
}

enum FieldKind {
    Number,
    String,
}

impl Expression {
    fn run(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<Operand, ExprError> {
        let mut vm = Vm {
            stack: Vec::new(),
            expr: self,
            regs,
            b,
        };
        let mut ip = 0usize;
        while ip < vm.expr.tokens.len() {
            let token = vm.expr.tokens[ip];
            ip += 1;
            match token {
                Token::Call(op) => match vm.call(op)? {
                    Flow::Next => {}
                    Flow::Break => {
                        // Unwind: keep only the final operand.
                        let last = vm.pop()?;
                        return Ok(last);
                    }
                },
                Token::RegNum(i) => {
                    let r = vm.regs.get(i as usize)?;
                    if r.num().is_nan() {
                        return Err(ExprError::NotANumber);
                    }
                    let r = r.clone();
                    vm.push(r)?;
                }
                Token::RegStr(i) => {
                    let r = vm.regs.get(i as usize)?.clone();
                    vm.push(r)?;
                }
                Token::RegSet(i) => {
                    let r = vm.regs.get(i as usize)?;
                    if r.set().is_none() {
                        return Err(ExprError::WrongType);
                    }
                    let r = r.clone();
                    vm.push(r)?;
                }
                Token::Lit(i) => {
                    let v = vm
                        .expr
                        .literals
                        .get(i as usize)
                        .ok_or(ExprError::StackError)?
                        .clone();
                    vm.push(v)?;
                }
                Token::JmpFwd(target) => {
                    let cond = vm.pop()?;
                    if cond.truthy() {
                        ip = target as usize;
                    }
                }
            }
        }
        if vm.stack.len() != 1 {
            return Err(ExprError::StackError);
        }
        vm.pop()
    }

    /// Evaluates to a boolean.
    ///
    /// # Errors
    /// Runtime errors per [`ExprError`].
    pub fn eval_bool(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<bool, ExprError> {
        Ok(self.run(regs, b)?.truthy())
    }

    /// Evaluates to a double.
    ///
    /// # Errors
    /// Runtime errors per [`ExprError`].
    pub fn eval_double(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<f64, ExprError> {
        Ok(self.run(regs, b)?.num())
    }

    /// Evaluates to an integer (rounded).
    ///
    /// # Errors
    /// Runtime errors per [`ExprError`].
    pub fn eval_integer(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<i64, ExprError> {
        #[allow(clippy::cast_possible_truncation)]
        Ok(self.run(regs, b)?.num().round() as i64)
    }

    /// Evaluates to a string.
    ///
    /// # Errors
    /// Runtime errors per [`ExprError`].
    pub fn eval_string(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<String, ExprError> {
        Ok(self.run(regs, b)?.str_val().to_owned())
    }

    /// Evaluates to a set.
    ///
    /// # Errors
    /// [`ExprError::WrongType`] when the result is not a set, plus runtime
    /// errors per [`ExprError`].
    pub fn eval_set(&self, regs: &RegisterFile, b: &Bindings<'_>) -> Result<TypedSet, ExprError> {
        match self.run(regs, b)? {
            Operand::Set(s) => Ok((*s).clone()),
            _ => Err(ExprError::WrongType),
        }
    }
}
