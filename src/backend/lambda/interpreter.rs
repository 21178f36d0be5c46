//! Tree-walking interpreter for [`LambdaBody`].

use smallvec::SmallVec;

use crate::backend::closure::{ClosureBinding, ClosureCell};
use crate::backend::definition::FunctionDefinition;
use crate::backend::errors::{RuntimeError, RuntimeResult};
use crate::backend::models::Value;
use crate::backend::tiered::Interpreter;

use super::{ops, Expr, Flow, LambdaBody};

/// Evaluates a body directly on every call
///
/// Stateless; one instance can serve any number of threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct TreeInterpreter;

struct Frame<'a> {
    params: SmallVec<[Value; 8]>,
    locals: SmallVec<[Value; 8]>,
    closure: Option<&'a ClosureBinding>,
}

impl Interpreter<LambdaBody> for TreeInterpreter {
    fn interpret(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        args: &mut [Value],
        closure: Option<&ClosureBinding>,
    ) -> RuntimeResult<Value> {
        let signature = definition.signature();
        if args.len() != signature.arity() {
            return Err(RuntimeError::ArityMismatch {
                expected: signature.arity(),
                got: args.len(),
            });
        }

        let body = definition.body();
        let mut frame = Frame {
            params: args.iter().cloned().collect(),
            locals: (0..body.locals).map(|_| Value::Unit).collect(),
            closure,
        };

        let outcome = Flow::finish(frame.eval(&body.expr));

        for index in signature.by_ref_indices() {
            args[index] = std::mem::take(&mut frame.params[index]);
        }

        if signature.is_void() {
            outcome.map(|_| Value::Unit)
        } else {
            outcome
        }
    }
}

impl Frame<'_> {
    fn eval(&mut self, expr: &Expr) -> Result<Value, Flow> {
        match expr {
            Expr::Const(value) => Ok(value.clone()),

            Expr::Param(i) => Ok(self.params[*i].clone()),
            Expr::SetParam(i, value) => {
                let value = self.eval(value)?;
                self.params[*i] = value.clone();
                Ok(value)
            }

            Expr::Local(i) => Ok(self.locals[*i].clone()),
            Expr::SetLocal(i, value) => {
                let value = self.eval(value)?;
                self.locals[*i] = value.clone();
                Ok(value)
            }

            Expr::Captured(slot) => Ok(self.cell(*slot)?.get()),
            Expr::SetCaptured(slot, value) => {
                let value = self.eval(value)?;
                self.cell(*slot)?.set(value.clone());
                Ok(value)
            }

            Expr::Unary(op, operand) => {
                let operand = self.eval(operand)?;
                Ok(ops::unary(*op, &operand)?)
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(ops::binary(*op, &left, &right)?)
            }

            Expr::If(cond, then, otherwise) => {
                let cond = self.eval(cond)?;
                if ops::condition("if", &cond)? {
                    self.eval(then)
                } else {
                    self.eval(otherwise)
                }
            }
            Expr::While(cond, body) => {
                loop {
                    let test = self.eval(cond)?;
                    if !ops::condition("while", &test)? {
                        break;
                    }
                    self.eval(body)?;
                }
                Ok(Value::Unit)
            }
            Expr::Block(exprs) => {
                let mut last = Value::Unit;
                for expr in exprs {
                    last = self.eval(expr)?;
                }
                Ok(last)
            }

            Expr::Return(value) => Err(Flow::Return(self.eval(value)?)),
            Expr::Raise(value) => Err(Flow::Raise(RuntimeError::Raised(self.eval(value)?))),
        }
    }

    fn cell(&self, slot: usize) -> Result<&ClosureCell, Flow> {
        self.closure
            .and_then(|binding| binding.cell(slot))
            .ok_or(Flow::Raise(RuntimeError::UnboundCapture(slot)))
    }
}
