//! Interpret/compile tiering.
//!
//! ```text
//! FunctionDefinition ──> TieredEngine ──> TierController (one per definition)
//!                                               │
//!                               bind(closure)   ▼
//!                                         CallableHandle ──┬──> Interpreter      (cold)
//!                                                          └──> compiled code    (warm)
//! ```
//!
//! - [`controller`]: execution counting and the exactly-once promotion protocol
//! - [`handle`]: per-binding dispatch, switching tiers without changing behavior
//! - [`shape`] / [`adapter`]: native calling shapes and call-time signature adaptation
//! - [`scheduler`] / [`thread_pool`]: where background compilation runs
//! - [`engine`]: lazily created controllers keyed by definition

pub mod adapter;
pub mod controller;
pub mod engine;
pub mod handle;
pub mod runtime;
pub mod scheduler;
pub mod shape;
pub mod stats;
pub mod thread_pool;

pub use adapter::{CompiledEntry, SignatureAdapter};
pub use controller::{
    PromotionPolicy, PromotionState, TierController, TierServices, DEFAULT_COMPILATION_THRESHOLD,
    MAX_EXECUTION_COUNT,
};
pub use engine::{EngineStats, TieredEngine};
pub use handle::{CallableHandle, HandleState};
pub use runtime::{Interpreter, NativeCompiler};
pub use scheduler::{CompileScheduler, CompileTask, DeferredScheduler, RayonScheduler};
pub use shape::{
    select_shape, ClosureFactory, CompiledCode, NativeFn, NativeShape, ShapeSelection,
    MAX_DIRECT_ARITY,
};
pub use stats::{TierStats, TierStatsSnapshot};
pub use thread_pool::CompileWorkerPool;
