//! Reference lowered-body language.
//!
//! A small expression tree ([`LambdaBody`]) with one implementation per tier:
//! [`TreeInterpreter`] walks the tree on every call, [`ClosureCompiler`] lowers
//! it once into pre-resolved Rust closures. Both share operator semantics
//! through [`ops`], so a body behaves identically on either tier.
//!
//! ## Example
//!
//! ```ignore
//! // fn bump(ref counter, by) -> value { counter = counter + by; counter }
//! let body = LambdaBody::new(Expr::block(vec![
//!     Expr::set_param(0, Expr::binary(BinOp::Add, Expr::param(0), Expr::param(1))),
//!     Expr::param(0),
//! ]));
//! let def = FunctionDefinition::builder("bump", body).by_ref("counter").param("by").build()?;
//! ```

pub mod compiler;
pub mod interpreter;
pub mod ops;

use std::fmt;
use std::sync::Arc;

use crate::backend::config::{ConfigError, TierConfig};
use crate::backend::definition::{FunctionBody, Signature};
use crate::backend::errors::{DefinitionError, RuntimeError};
use crate::backend::models::Value;
use crate::backend::tiered::TieredEngine;

pub use compiler::ClosureCompiler;
pub use interpreter::TreeInterpreter;

/// Tiered engine over the reference body language
pub type LambdaEngine = TieredEngine<LambdaBody>;

impl TieredEngine<LambdaBody> {
    /// Engine wired to [`TreeInterpreter`] and [`ClosureCompiler`]
    pub fn reference(config: &TierConfig) -> Result<Self, ConfigError> {
        TieredEngine::from_config(
            Arc::new(TreeInterpreter),
            Arc::new(ClosureCompiler::new()),
            config,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Not => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Rem => "%",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

/// Expression node of a lowered body
///
/// Every expression yields a value: assignments yield the assigned value,
/// `While` and an empty `Block` yield `Value::Unit`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),

    Param(usize),
    SetParam(usize, Box<Expr>),

    Local(usize),
    SetLocal(usize, Box<Expr>),

    Captured(usize),
    SetCaptured(usize, Box<Expr>),

    Unary(UnaryOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),

    If(Box<Expr>, Box<Expr>, Box<Expr>),
    While(Box<Expr>, Box<Expr>),
    Block(Vec<Expr>),

    /// Leave the function with a value
    Return(Box<Expr>),
    /// Leave the function with `RuntimeError::Raised`
    Raise(Box<Expr>),
}

impl Expr {
    pub fn int(n: i64) -> Expr {
        Expr::Const(Value::Int(n))
    }

    pub fn param(index: usize) -> Expr {
        Expr::Param(index)
    }

    pub fn set_param(index: usize, value: Expr) -> Expr {
        Expr::SetParam(index, Box::new(value))
    }

    pub fn local(index: usize) -> Expr {
        Expr::Local(index)
    }

    pub fn set_local(index: usize, value: Expr) -> Expr {
        Expr::SetLocal(index, Box::new(value))
    }

    pub fn captured(slot: usize) -> Expr {
        Expr::Captured(slot)
    }

    pub fn set_captured(slot: usize, value: Expr) -> Expr {
        Expr::SetCaptured(slot, Box::new(value))
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Expr {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn binary(op: BinOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn if_else(cond: Expr, then: Expr, otherwise: Expr) -> Expr {
        Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn while_loop(cond: Expr, body: Expr) -> Expr {
        Expr::While(Box::new(cond), Box::new(body))
    }

    pub fn block(exprs: Vec<Expr>) -> Expr {
        Expr::Block(exprs)
    }

    pub fn ret(value: Expr) -> Expr {
        Expr::Return(Box::new(value))
    }

    pub fn raise(value: Expr) -> Expr {
        Expr::Raise(Box::new(value))
    }

    /// Number of nodes in this expression tree
    pub fn node_count(&self) -> usize {
        1 + self.children().map(Expr::node_count).sum::<usize>()
    }

    fn children(&self) -> impl Iterator<Item = &Expr> {
        let (fixed, rest): ([Option<&Expr>; 3], &[Expr]) = match self {
            Expr::Const(_) | Expr::Param(_) | Expr::Local(_) | Expr::Captured(_) => {
                ([None, None, None], &[])
            }
            Expr::SetParam(_, e)
            | Expr::SetLocal(_, e)
            | Expr::SetCaptured(_, e)
            | Expr::Unary(_, e)
            | Expr::Return(e)
            | Expr::Raise(e) => ([Some(&**e), None, None], &[]),
            Expr::Binary(_, a, b) | Expr::While(a, b) => ([Some(&**a), Some(&**b), None], &[]),
            Expr::If(c, t, e) => ([Some(&**c), Some(&**t), Some(&**e)], &[]),
            Expr::Block(items) => ([None, None, None], items.as_slice()),
        };
        fixed.into_iter().flatten().chain(rest.iter())
    }

    fn check(&self, arity: usize, locals: usize, slots: usize) -> Result<(), DefinitionError> {
        match self {
            Expr::Param(i) | Expr::SetParam(i, _) if *i >= arity => {
                return Err(DefinitionError::UnknownParameter(*i))
            }
            Expr::Local(i) | Expr::SetLocal(i, _) if *i >= locals => {
                return Err(DefinitionError::UnknownLocal(*i))
            }
            Expr::Captured(i) | Expr::SetCaptured(i, _) if *i >= slots => {
                return Err(DefinitionError::UnknownClosureSlot(*i))
            }
            _ => {}
        }
        self.children()
            .try_for_each(|child| child.check(arity, locals, slots))
    }
}

/// A lowered function body: an expression plus its local slot count
#[derive(Debug, Clone, PartialEq)]
pub struct LambdaBody {
    pub locals: usize,
    pub expr: Expr,
}

impl LambdaBody {
    pub fn new(expr: Expr) -> Self {
        LambdaBody { locals: 0, expr }
    }

    pub fn with_locals(locals: usize, expr: Expr) -> Self {
        LambdaBody { locals, expr }
    }

    pub fn node_count(&self) -> usize {
        self.expr.node_count()
    }
}

impl FunctionBody for LambdaBody {
    fn check(&self, signature: &Signature, closure_slots: usize) -> Result<(), DefinitionError> {
        self.expr
            .check(signature.arity(), self.locals, closure_slots)
    }
}

/// Non-local exit from expression evaluation
#[derive(Debug)]
pub(crate) enum Flow {
    Return(Value),
    Raise(RuntimeError),
}

impl From<RuntimeError> for Flow {
    fn from(e: RuntimeError) -> Self {
        Flow::Raise(e)
    }
}

impl Flow {
    /// Collapse a body's outcome into the function result
    pub(crate) fn finish(outcome: Result<Value, Flow>) -> Result<Value, RuntimeError> {
        match outcome {
            Ok(value) | Err(Flow::Return(value)) => Ok(value),
            Err(Flow::Raise(e)) => Err(e),
        }
    }
}
