//! Native calling-convention shapes and compiled entry points.
//!
//! Compiled code is produced in one of a small fixed set of shapes:
//!
//! ```text
//! Func   { arity }          fn(&[Value]) -> Result<Value>        by-value params, returns
//! Action { arity }          fn(&[Value]) -> Result<()>           by-value params, void
//! ActionRef2                fn(&mut Value, &mut Value) -> Result<()>   void, two by-ref params
//! Uniform { arity, .. }     fn(&[Value]) -> Result<Value>        canonical: by-ref args boxed
//! ```
//!
//! The first three serve a declared signature exactly. Every other signature
//! is compiled to `Uniform` and needs a call-time [`super::SignatureAdapter`].

use std::fmt;
use std::sync::Arc;

use crate::backend::closure::ClosureBinding;
use crate::backend::definition::Signature;
use crate::backend::errors::RuntimeResult;
use crate::backend::models::Value;

/// Largest arity served by the direct `Func`/`Action` shapes
pub const MAX_DIRECT_ARITY: usize = 16;

/// Calling convention of a compiled entry point
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NativeShape {
    /// By-value parameters, returns a value
    Func { arity: usize },
    /// By-value parameters, returns nothing
    Action { arity: usize },
    /// Exactly two by-reference parameters, returns nothing
    ActionRef2,
    /// Canonical shape: arguments as a slice, by-ref arguments boxed in
    /// [`Value::Ref`]
    Uniform { arity: usize, returns: bool },
}

impl NativeShape {
    /// Number of arguments the entry point takes
    pub fn arity(&self) -> usize {
        match self {
            NativeShape::Func { arity }
            | NativeShape::Action { arity }
            | NativeShape::Uniform { arity, .. } => *arity,
            NativeShape::ActionRef2 => 2,
        }
    }
}

impl fmt::Display for NativeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NativeShape::Func { arity } => write!(f, "Func/{}", arity),
            NativeShape::Action { arity } => write!(f, "Action/{}", arity),
            NativeShape::ActionRef2 => write!(f, "ActionRef/2"),
            NativeShape::Uniform { arity, returns } => {
                write!(f, "Uniform/{}{}", arity, if *returns { "" } else { " void" })
            }
        }
    }
}

/// Shape chosen for a signature, and whether it serves the signature exactly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeSelection {
    pub shape: NativeShape,
    /// `false` when call-time signature adaptation is required
    pub exact: bool,
}

/// Pick the native shape for a declared signature
pub fn select_shape(signature: &Signature) -> ShapeSelection {
    let arity = signature.arity();
    let by_ref = signature.by_ref_indices().count();
    let void = signature.is_void();

    if void && arity == 2 && by_ref == 2 {
        return ShapeSelection {
            shape: NativeShape::ActionRef2,
            exact: true,
        };
    }

    if by_ref == 0 && arity <= MAX_DIRECT_ARITY {
        let shape = if void {
            NativeShape::Action { arity }
        } else {
            NativeShape::Func { arity }
        };
        return ShapeSelection { shape, exact: true };
    }

    ShapeSelection {
        shape: NativeShape::Uniform {
            arity,
            returns: !void,
        },
        exact: false,
    }
}

pub type FuncFn = Arc<dyn Fn(&[Value]) -> RuntimeResult<Value> + Send + Sync>;
pub type ActionFn = Arc<dyn Fn(&[Value]) -> RuntimeResult<()> + Send + Sync>;
pub type ActionRef2Fn = Arc<dyn Fn(&mut Value, &mut Value) -> RuntimeResult<()> + Send + Sync>;

/// A compiled, natively callable entry point of a specific shape
#[derive(Clone)]
pub enum NativeFn {
    Func { arity: usize, f: FuncFn },
    Action { arity: usize, f: ActionFn },
    ActionRef2(ActionRef2Fn),
    Uniform { arity: usize, returns: bool, f: FuncFn },
}

impl NativeFn {
    /// Get the shape of this entry point
    pub fn shape(&self) -> NativeShape {
        match self {
            NativeFn::Func { arity, .. } => NativeShape::Func { arity: *arity },
            NativeFn::Action { arity, .. } => NativeShape::Action { arity: *arity },
            NativeFn::ActionRef2(_) => NativeShape::ActionRef2,
            NativeFn::Uniform { arity, returns, .. } => NativeShape::Uniform {
                arity: *arity,
                returns: *returns,
            },
        }
    }
}

impl fmt::Debug for NativeFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NativeFn").field(&self.shape()).finish()
    }
}

/// Compiled code of a capturing function: applies a closure binding and
/// yields the final entry point for that capture
pub type ClosureFactory = Arc<dyn Fn(&ClosureBinding) -> NativeFn + Send + Sync>;

/// Contents of a populated compiled-code slot
#[derive(Clone)]
pub enum CompiledCode {
    /// Entry point of a function without captured variables
    Direct(NativeFn),
    /// Closure-applying factory of a capturing function
    Factory(ClosureFactory),
}

impl CompiledCode {
    /// Resolve the entry point for a binding
    ///
    /// Factories are applied to the binding; direct code ignores it.
    /// Returns `None` if a factory is resolved without a binding.
    pub fn entry_point(&self, closure: Option<&ClosureBinding>) -> Option<NativeFn> {
        match (self, closure) {
            (CompiledCode::Direct(native), _) => Some(native.clone()),
            (CompiledCode::Factory(apply), Some(binding)) => Some(apply(binding)),
            (CompiledCode::Factory(_), None) => None,
        }
    }
}

impl fmt::Debug for CompiledCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompiledCode::Direct(native) => f.debug_tuple("Direct").field(native).finish(),
            CompiledCode::Factory(_) => f.write_str("Factory"),
        }
    }
}
