//! Closure compiler for [`LambdaBody`].
//!
//! Lowers a body once into a tree of boxed Rust closures. Everything the
//! interpreter looks up per call is resolved while lowering: operator
//! dispatch, the access mode of every parameter (plain slot or boxed
//! by-reference argument) and the frame slot of every local and capture.
//!
//! The compiled body is shared behind an `Arc`; entry points of every
//! [`NativeShape`] are thin wrappers that build a frame and run it.

use std::sync::Arc;

use smallvec::SmallVec;

use crate::backend::closure::{ClosureBinding, ClosureCell};
use crate::backend::definition::{FunctionDefinition, Signature};
use crate::backend::errors::{CompileError, CompileResult, RuntimeError, RuntimeResult};
use crate::backend::models::Value;
use crate::backend::tiered::{select_shape, ClosureFactory, NativeCompiler, NativeFn, NativeShape};

use super::{ops, Expr, Flow, LambdaBody};

type Node = Box<dyn Fn(&mut NativeFrame<'_>) -> Result<Value, Flow> + Send + Sync>;

struct NativeFrame<'a> {
    params: SmallVec<[Value; 8]>,
    locals: SmallVec<[Value; 8]>,
    cells: &'a [ClosureCell],
}

/// How compiled code reaches a parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParamMode {
    /// The frame slot holds the value
    Direct,
    /// The frame slot holds a `Value::Ref` box owned by the caller
    Boxed,
}

struct CompiledBody {
    root: Node,
    locals: usize,
}

impl CompiledBody {
    /// Run with the given parameter slots, handing the slots back so
    /// by-reference values can be copied out
    fn run(
        &self,
        params: SmallVec<[Value; 8]>,
        cells: &[ClosureCell],
    ) -> (RuntimeResult<Value>, SmallVec<[Value; 8]>) {
        let mut frame = NativeFrame {
            params,
            locals: (0..self.locals).map(|_| Value::Unit).collect(),
            cells,
        };
        let outcome = Flow::finish((self.root)(&mut frame));
        (outcome, frame.params)
    }
}

/// Reference [`NativeCompiler`] for [`LambdaBody`]
#[derive(Debug, Default, Clone)]
pub struct ClosureCompiler {
    node_limit: Option<usize>,
}

impl ClosureCompiler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse bodies with more than `limit` expression nodes
    pub fn with_node_limit(limit: usize) -> Self {
        ClosureCompiler {
            node_limit: Some(limit),
        }
    }

    fn lower_body(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        shape: NativeShape,
    ) -> CompileResult<Arc<CompiledBody>> {
        let signature = definition.signature();
        let expected = select_shape(signature).shape;
        if shape != expected {
            return Err(CompileError::Unsupported(format!(
                "shape {} for signature {} (expected {})",
                shape, signature, expected
            )));
        }

        let body = definition.body();
        if let Some(limit) = self.node_limit {
            let nodes = body.node_count();
            if nodes > limit {
                return Err(CompileError::Unsupported(format!(
                    "body of {} has {} nodes (limit {})",
                    definition.name(),
                    nodes,
                    limit
                )));
            }
        }

        let modes = param_modes(signature, shape);
        Ok(Arc::new(CompiledBody {
            root: lower(&body.expr, &modes),
            locals: body.locals,
        }))
    }
}

impl NativeCompiler<LambdaBody> for ClosureCompiler {
    fn compile_to_native(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        shape: NativeShape,
    ) -> CompileResult<NativeFn> {
        let compiled = self.lower_body(definition, shape)?;
        Ok(entry_point(compiled, shape, None))
    }

    fn compile_to_native_factory(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        shape: NativeShape,
    ) -> CompileResult<ClosureFactory> {
        let compiled = self.lower_body(definition, shape)?;
        Ok(Arc::new(move |binding: &ClosureBinding| {
            entry_point(Arc::clone(&compiled), shape, Some(binding.clone()))
        }))
    }
}

fn param_modes(signature: &Signature, shape: NativeShape) -> SmallVec<[ParamMode; 8]> {
    let uniform = matches!(shape, NativeShape::Uniform { .. });
    signature
        .params()
        .iter()
        .map(|p| {
            if uniform && p.is_by_ref() {
                ParamMode::Boxed
            } else {
                ParamMode::Direct
            }
        })
        .collect()
}

fn entry_point(
    compiled: Arc<CompiledBody>,
    shape: NativeShape,
    binding: Option<ClosureBinding>,
) -> NativeFn {
    match shape {
        NativeShape::Func { arity } => NativeFn::Func {
            arity,
            f: Arc::new(move |args: &[Value]| {
                compiled.run(args.iter().cloned().collect(), cells(&binding)).0
            }),
        },
        NativeShape::Action { arity } => NativeFn::Action {
            arity,
            f: Arc::new(move |args: &[Value]| {
                compiled
                    .run(args.iter().cloned().collect(), cells(&binding))
                    .0
                    .map(|_| ())
            }),
        },
        NativeShape::ActionRef2 => NativeFn::ActionRef2(Arc::new(
            move |a: &mut Value, b: &mut Value| {
                let params = [a.clone(), b.clone()].into_iter().collect();
                let (outcome, mut params) = compiled.run(params, cells(&binding));
                *a = std::mem::take(&mut params[0]);
                *b = std::mem::take(&mut params[1]);
                outcome.map(|_| ())
            },
        )),
        NativeShape::Uniform { arity, returns } => NativeFn::Uniform {
            arity,
            returns,
            f: Arc::new(move |args: &[Value]| {
                let outcome = compiled.run(args.iter().cloned().collect(), cells(&binding)).0;
                if returns {
                    outcome
                } else {
                    outcome.map(|_| Value::Unit)
                }
            }),
        },
    }
}

#[inline]
fn cells(binding: &Option<ClosureBinding>) -> &[ClosureCell] {
    binding.as_ref().map_or(&[][..], |b| b.cells())
}

#[inline]
fn node<F>(f: F) -> Node
where
    F: Fn(&mut NativeFrame<'_>) -> Result<Value, Flow> + Send + Sync + 'static,
{
    Box::new(f)
}

fn lower(expr: &Expr, modes: &[ParamMode]) -> Node {
    match expr {
        Expr::Const(value) => {
            let value = value.clone();
            node(move |_| Ok(value.clone()))
        }

        Expr::Param(i) => {
            let i = *i;
            match modes[i] {
                ParamMode::Direct => node(move |f| Ok(f.params[i].clone())),
                ParamMode::Boxed => node(move |f| {
                    Ok(match &f.params[i] {
                        Value::Ref(boxed) => boxed.get(),
                        other => other.clone(),
                    })
                }),
            }
        }
        Expr::SetParam(i, value) => {
            let i = *i;
            let value = lower(value, modes);
            match modes[i] {
                ParamMode::Direct => node(move |f| {
                    let v = value(f)?;
                    f.params[i] = v.clone();
                    Ok(v)
                }),
                ParamMode::Boxed => node(move |f| {
                    let v = value(f)?;
                    match &mut f.params[i] {
                        Value::Ref(boxed) => boxed.set(v.clone()),
                        slot => *slot = v.clone(),
                    }
                    Ok(v)
                }),
            }
        }

        Expr::Local(i) => {
            let i = *i;
            node(move |f| Ok(f.locals[i].clone()))
        }
        Expr::SetLocal(i, value) => {
            let i = *i;
            let value = lower(value, modes);
            node(move |f| {
                let v = value(f)?;
                f.locals[i] = v.clone();
                Ok(v)
            })
        }

        Expr::Captured(slot) => {
            let slot = *slot;
            node(move |f| {
                f.cells
                    .get(slot)
                    .map(ClosureCell::get)
                    .ok_or(Flow::Raise(RuntimeError::UnboundCapture(slot)))
            })
        }
        Expr::SetCaptured(slot, value) => {
            let slot = *slot;
            let value = lower(value, modes);
            node(move |f| {
                let v = value(f)?;
                let cell = f
                    .cells
                    .get(slot)
                    .ok_or(Flow::Raise(RuntimeError::UnboundCapture(slot)))?;
                cell.set(v.clone());
                Ok(v)
            })
        }

        Expr::Unary(op, operand) => {
            let op = *op;
            let operand = lower(operand, modes);
            node(move |f| {
                let v = operand(f)?;
                Ok(ops::unary(op, &v)?)
            })
        }
        Expr::Binary(op, left, right) => {
            let op = *op;
            let left = lower(left, modes);
            let right = lower(right, modes);
            node(move |f| {
                let l = left(f)?;
                let r = right(f)?;
                Ok(ops::binary(op, &l, &r)?)
            })
        }

        Expr::If(cond, then, otherwise) => {
            let cond = lower(cond, modes);
            let then = lower(then, modes);
            let otherwise = lower(otherwise, modes);
            node(move |f| {
                let c = cond(f)?;
                if ops::condition("if", &c)? {
                    then(f)
                } else {
                    otherwise(f)
                }
            })
        }
        Expr::While(cond, body) => {
            let cond = lower(cond, modes);
            let body = lower(body, modes);
            node(move |f| {
                loop {
                    let c = cond(f)?;
                    if !ops::condition("while", &c)? {
                        break;
                    }
                    body(f)?;
                }
                Ok(Value::Unit)
            })
        }
        Expr::Block(exprs) => {
            let nodes: Vec<Node> = exprs.iter().map(|e| lower(e, modes)).collect();
            node(move |f| {
                let mut last = Value::Unit;
                for node in &nodes {
                    last = node(f)?;
                }
                Ok(last)
            })
        }

        Expr::Return(value) => {
            let value = lower(value, modes);
            node(move |f| Err(Flow::Return(value(f)?)))
        }
        Expr::Raise(value) => {
            let value = lower(value, modes);
            node(move |f| Err(Flow::Raise(RuntimeError::Raised(value(f)?))))
        }
    }
}
