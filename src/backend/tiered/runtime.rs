//! Contracts of the two execution tiers.
//!
//! The tiering core drives an [`Interpreter`] and a [`NativeCompiler`] without
//! knowing anything about the body type `B` they work on.

use crate::backend::closure::ClosureBinding;
use crate::backend::definition::FunctionDefinition;
use crate::backend::errors::{CompileResult, RuntimeResult};
use crate::backend::models::Value;

use super::shape::{ClosureFactory, NativeFn, NativeShape};

/// Tier 0: executes a body directly
///
/// Implementations must be re-entrant and safe to call from many threads at
/// once. By-reference results are written back into `args` before returning,
/// whether the body completed or raised.
pub trait Interpreter<B>: Send + Sync {
    fn interpret(
        &self,
        definition: &FunctionDefinition<B>,
        args: &mut [Value],
        closure: Option<&ClosureBinding>,
    ) -> RuntimeResult<Value>;
}

/// Tier 1: turns a body into natively callable code
///
/// Compilers are deterministic and keep no cache of their own; the tier
/// controller calls them at most once per successful definition.
pub trait NativeCompiler<B>: Send + Sync {
    /// Compile a function without captured variables to an entry point of
    /// the requested shape
    fn compile_to_native(
        &self,
        definition: &FunctionDefinition<B>,
        shape: NativeShape,
    ) -> CompileResult<NativeFn>;

    /// Compile a capturing function to a factory that, given a closure
    /// binding, yields an entry point of the requested shape
    fn compile_to_native_factory(
        &self,
        definition: &FunctionDefinition<B>,
        shape: NativeShape,
    ) -> CompileResult<ClosureFactory>;
}
