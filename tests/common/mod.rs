//! Shared fixtures for the tiering integration tests
//!
//! - Counting wrappers around the reference interpreter and compiler, so
//!   tests can tell which tier served a call
//! - Builders for the handful of functions the tests exercise
//! - Engine constructors with a host-drained scheduler for determinism

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tiered_lambda::backend::lambda::{
    BinOp, ClosureCompiler, Expr, LambdaBody, LambdaEngine, TreeInterpreter,
};
use tiered_lambda::backend::{
    ClosureBinding, CompileError, CompileResult, DeferredScheduler, FunctionDefinition, Interpreter,
    NativeCompiler, NativeFn, NativeShape, PromotionPolicy, RuntimeResult, TierServices,
    TieredEngine, Value,
};
use tiered_lambda::backend::tiered::ClosureFactory;

pub type Definition = Arc<FunctionDefinition<LambdaBody>>;

/// Install a test-friendly subscriber; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

// ============================================================================
// Counting tiers
// ============================================================================

/// [`TreeInterpreter`] that counts how often it runs
#[derive(Default)]
pub struct CountingInterpreter {
    calls: AtomicUsize,
}

impl CountingInterpreter {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Interpreter<LambdaBody> for CountingInterpreter {
    fn interpret(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        args: &mut [Value],
        closure: Option<&ClosureBinding>,
    ) -> RuntimeResult<Value> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        TreeInterpreter.interpret(definition, args, closure)
    }
}

/// How a [`CountingCompiler`] treats the functions it is asked to compile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sabotage {
    None,
    /// Return a codegen error
    Fail,
    /// Panic inside the compiler
    Panic,
}

/// [`ClosureCompiler`] that counts compilations and can be told to break
/// on one function
pub struct CountingCompiler {
    inner: ClosureCompiler,
    calls: AtomicUsize,
    target: Option<String>,
    sabotage: Sabotage,
}

impl CountingCompiler {
    pub fn new() -> Self {
        CountingCompiler {
            inner: ClosureCompiler::new(),
            calls: AtomicUsize::new(0),
            target: None,
            sabotage: Sabotage::None,
        }
    }

    /// Break compilation of the named function only
    pub fn sabotaging(name: &str, sabotage: Sabotage) -> Self {
        CountingCompiler {
            target: Some(name.to_string()),
            sabotage,
            ..Self::new()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn before_compile(&self, definition: &FunctionDefinition<LambdaBody>) -> CompileResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.target.as_deref() != Some(definition.name()) {
            return Ok(());
        }
        match self.sabotage {
            Sabotage::None => Ok(()),
            Sabotage::Fail => Err(CompileError::Codegen(format!(
                "refusing to compile {}",
                definition.name()
            ))),
            Sabotage::Panic => panic!("compiler crashed on {}", definition.name()),
        }
    }
}

impl NativeCompiler<LambdaBody> for CountingCompiler {
    fn compile_to_native(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        shape: NativeShape,
    ) -> CompileResult<NativeFn> {
        self.before_compile(definition)?;
        self.inner.compile_to_native(definition, shape)
    }

    fn compile_to_native_factory(
        &self,
        definition: &FunctionDefinition<LambdaBody>,
        shape: NativeShape,
    ) -> CompileResult<ClosureFactory> {
        self.before_compile(definition)?;
        self.inner.compile_to_native_factory(definition, shape)
    }
}

// ============================================================================
// Engines
// ============================================================================

pub struct Harness {
    pub engine: LambdaEngine,
    pub interpreter: Arc<CountingInterpreter>,
    pub compiler: Arc<CountingCompiler>,
    pub deferred: Arc<DeferredScheduler>,
}

impl Harness {
    /// Engine with the default threshold whose compilations wait for
    /// `engine.run_pending_compilations()`
    pub fn deferred() -> Self {
        Self::with_compiler(CountingCompiler::new(), PromotionPolicy::default())
    }

    pub fn with_compiler(compiler: CountingCompiler, policy: PromotionPolicy) -> Self {
        init_tracing();
        let interpreter = Arc::new(CountingInterpreter::default());
        let compiler = Arc::new(compiler);
        let deferred = Arc::new(DeferredScheduler::new());
        let services = TierServices::<LambdaBody>::new(interpreter.clone(), compiler.clone())
            .with_policy(policy);
        let engine = TieredEngine::new(services).with_deferred_scheduler(Arc::clone(&deferred));
        Harness {
            engine,
            interpreter,
            compiler,
            deferred,
        }
    }
}

/// Engine that never compiles
pub fn interpreting_engine() -> LambdaEngine {
    init_tracing();
    let policy = PromotionPolicy {
        enabled: false,
        ..PromotionPolicy::default()
    };
    TieredEngine::new(
        TierServices::<LambdaBody>::new(Arc::new(TreeInterpreter), Arc::new(ClosureCompiler::new()))
            .with_policy(policy),
    )
}

/// Engine without an interpreter: every bind compiles synchronously
pub fn compiling_engine() -> LambdaEngine {
    init_tracing();
    TieredEngine::new(TierServices::<LambdaBody>::compile_only(Arc::new(
        ClosureCompiler::new(),
    )))
}

// ============================================================================
// Functions
// ============================================================================

/// `add(a, b) -> a + b`
pub fn add() -> Definition {
    FunctionDefinition::builder(
        "add",
        LambdaBody::new(Expr::binary(BinOp::Add, Expr::param(0), Expr::param(1))),
    )
    .param("a")
    .param("b")
    .build()
    .unwrap()
}

/// `sum_to(n) -> 1 + 2 + ... + n`
pub fn sum_to() -> Definition {
    let body = LambdaBody::with_locals(
        2,
        Expr::block(vec![
            Expr::set_local(0, Expr::int(0)),
            Expr::set_local(1, Expr::int(0)),
            Expr::while_loop(
                Expr::binary(BinOp::Lt, Expr::local(1), Expr::param(0)),
                Expr::block(vec![
                    Expr::set_local(1, Expr::binary(BinOp::Add, Expr::local(1), Expr::int(1))),
                    Expr::set_local(0, Expr::binary(BinOp::Add, Expr::local(0), Expr::local(1))),
                ]),
            ),
            Expr::local(0),
        ]),
    );
    FunctionDefinition::builder("sum_to", body)
        .param("n")
        .build()
        .unwrap()
}

/// `bump(ref counter, by) -> counter += by; counter`
///
/// Mixed by-ref/by-value, so it compiles to the canonical shape.
pub fn bump() -> Definition {
    let body = LambdaBody::new(Expr::block(vec![
        Expr::set_param(
            0,
            Expr::binary(BinOp::Add, Expr::param(0), Expr::param(1)),
        ),
        Expr::param(0),
    ]));
    FunctionDefinition::builder("bump", body)
        .by_ref("counter")
        .param("by")
        .build()
        .unwrap()
}

/// `swap(ref a, ref b)`, void
pub fn swap() -> Definition {
    let body = LambdaBody::with_locals(
        1,
        Expr::block(vec![
            Expr::set_local(0, Expr::param(0)),
            Expr::set_param(0, Expr::param(1)),
            Expr::set_param(1, Expr::local(0)),
        ]),
    );
    FunctionDefinition::builder("swap", body)
        .by_ref("a")
        .by_ref("b")
        .void()
        .build()
        .unwrap()
}

/// `divide(a, b) -> a / b`
pub fn divide() -> Definition {
    FunctionDefinition::builder(
        "divide",
        LambdaBody::new(Expr::binary(BinOp::Div, Expr::param(0), Expr::param(1))),
    )
    .param("a")
    .param("b")
    .build()
    .unwrap()
}

/// `next() -> count += 1; count` over one captured `count`
pub fn counter() -> Definition {
    let body = LambdaBody::new(Expr::set_captured(
        0,
        Expr::binary(BinOp::Add, Expr::captured(0), Expr::int(1)),
    ));
    FunctionDefinition::builder("next", body)
        .capture("count")
        .build()
        .unwrap()
}

pub fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().copied().map(Value::Int).collect()
}
