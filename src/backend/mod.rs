// Backend for tiered lambda execution
//
// - `definition` / `closure`: what the front-end hands over
// - `tiered`: interpret/compile tiering core
// - `lambda`: reference body language with an interpreter and a compiler
// - `config`: TOML and environment configuration

pub mod closure;
pub mod config;
pub mod definition;
pub mod errors;
pub mod lambda;
pub mod models;
pub mod tiered;

pub use closure::{ClosureBinding, ClosureCell, ClosureSlot};
pub use config::{ConfigError, SchedulerKind, TierConfig};
pub use definition::{
    DefinitionBuilder, DefinitionId, FunctionBody, FunctionDefinition, Parameter, PassMode,
    ReturnType, Signature, MAX_PARAMETERS,
};
pub use errors::{
    CompileError, CompileResult, DefinitionError, RuntimeError, RuntimeResult, SignatureMismatch,
    TierError,
};
pub use models::{RefBox, Value, ValueType};
pub use tiered::{
    CallableHandle, CompileScheduler, DeferredScheduler, EngineStats, HandleState, Interpreter,
    NativeCompiler, NativeFn, NativeShape, PromotionPolicy, PromotionState, TierController,
    TierServices, TieredEngine, DEFAULT_COMPILATION_THRESHOLD,
};
