//! tiered-lambda - Tiered Execution Engine for Lambdas
//!
//! Every function starts out on a portable interpreter and is promoted to
//! compiled code once it has run often enough, without changing what callers
//! observe: same results, same errors, same by-reference write-backs, same
//! closure sharing.
//!
//! # Architecture
//!
//! 1. **Definitions** (`backend::definition`, `backend::closure`)
//!    - Immutable `FunctionDefinition` with its declared `Signature`
//!    - Per-activation `ClosureBinding` of shared, mutable cells
//!
//! 2. **Tiering core** (`backend::tiered`)
//!    - `TierController`: invocation counting and exactly-once promotion
//!    - `CallableHandle`: one-way switch from interpreted to compiled dispatch
//!    - `SignatureAdapter`: by-reference arguments through the canonical shape
//!    - Background compilation on rayon, a dedicated pool, or a host-drained queue
//!
//! 3. **Reference tiers** (`backend::lambda`)
//!    - `TreeInterpreter` and `ClosureCompiler` over a small expression language
//!
//! # Example
//!
//! ```rust
//! use tiered_lambda::backend::lambda::{BinOp, Expr, LambdaBody, LambdaEngine};
//! use tiered_lambda::backend::{FunctionDefinition, TierConfig, Value};
//!
//! let body = LambdaBody::new(Expr::binary(BinOp::Add, Expr::param(0), Expr::param(1)));
//! let add = FunctionDefinition::builder("add", body)
//!     .param("a")
//!     .param("b")
//!     .build()
//!     .unwrap();
//!
//! let engine = LambdaEngine::reference(&TierConfig::default()).unwrap();
//! let handle = engine.bind(&add, None).unwrap();
//! for _ in 0..100 {
//!     assert_eq!(handle.call(&[Value::Int(2), Value::Int(3)]), Ok(Value::Int(5)));
//! }
//! ```
//!
//! # Configuration
//!
//! `TierConfig` is read from TOML and `TIERED_LAMBDA_*` environment
//! variables; see `backend::config`.

pub mod backend;

pub use backend::{
    CallableHandle, ClosureBinding, ClosureCell, FunctionDefinition, HandleState, Signature,
    TierConfig, TierController, TieredEngine, Value,
};
