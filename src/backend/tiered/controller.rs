//! Per-function tier controller.
//!
//! One [`TierController`] exists per function definition. It owns the
//! function's promotion state and is the only state shared between the
//! callable handles created from that definition:
//!
//! ```text
//!   Cold ──(count reaches threshold)──> Scheduled ──(compile ok)──> Compiled
//!     │                                     │
//!     └──────(compile_now / forced)─────────┴──────(compile err)───> Failed
//! ```
//!
//! The compiled-code slot is a `OnceLock`: it goes from absent to present at
//! most once and is never cleared. Readers take the lock-free fast path; the
//! `compile_lock` only serializes writers (check, lock, check again).

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::backend::closure::ClosureBinding;
use crate::backend::definition::{FunctionBody, FunctionDefinition};
use crate::backend::errors::{
    CompileError, CompileResult, DefinitionError, RuntimeResult, SignatureMismatch, TierError,
};
use crate::backend::models::Value;

use super::adapter::CompiledEntry;
use super::handle::CallableHandle;
use super::runtime::{Interpreter, NativeCompiler};
use super::scheduler::{CompileScheduler, RayonScheduler};
use super::shape::{select_shape, CompiledCode, ShapeSelection};
use super::stats::TierStats;

/// Default number of interpreted invocations before compilation is scheduled
pub const DEFAULT_COMPILATION_THRESHOLD: u32 = 32;

/// Counting stops here so the counter can never wrap
pub const MAX_EXECUTION_COUNT: u32 = u32::MAX - 1;

/// Promotion progress of one function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PromotionState {
    /// Interpreted, compilation not yet requested
    Cold = 0,
    /// Background compilation handed to the scheduler
    Scheduled = 1,
    /// Compiled code is published
    Compiled = 2,
    /// Compilation failed; the function stays interpreted for good
    Failed = 3,
}

impl From<u8> for PromotionState {
    fn from(v: u8) -> Self {
        match v {
            1 => PromotionState::Scheduled,
            2 => PromotionState::Compiled,
            3 => PromotionState::Failed,
            _ => PromotionState::Cold,
        }
    }
}

/// When to promote
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromotionPolicy {
    /// Invocation count that triggers background compilation
    pub threshold: u32,
    /// `false` keeps every function on the interpreter
    pub enabled: bool,
}

impl Default for PromotionPolicy {
    fn default() -> Self {
        PromotionPolicy {
            threshold: DEFAULT_COMPILATION_THRESHOLD,
            enabled: true,
        }
    }
}

/// Collaborators a tier controller drives
pub struct TierServices<B> {
    interpreter: Option<Arc<dyn Interpreter<B>>>,
    compiler: Arc<dyn NativeCompiler<B>>,
    scheduler: Arc<dyn CompileScheduler>,
    policy: PromotionPolicy,
}

impl<B> Clone for TierServices<B> {
    fn clone(&self) -> Self {
        TierServices {
            interpreter: self.interpreter.clone(),
            compiler: Arc::clone(&self.compiler),
            scheduler: Arc::clone(&self.scheduler),
            policy: self.policy,
        }
    }
}

impl<B> TierServices<B> {
    /// Interpreter plus compiler, compiling on rayon's global pool
    pub fn new(interpreter: Arc<dyn Interpreter<B>>, compiler: Arc<dyn NativeCompiler<B>>) -> Self {
        TierServices {
            interpreter: Some(interpreter),
            compiler,
            scheduler: Arc::new(RayonScheduler),
            policy: PromotionPolicy::default(),
        }
    }

    /// Compiler only; every binding compiles synchronously
    pub fn compile_only(compiler: Arc<dyn NativeCompiler<B>>) -> Self {
        TierServices {
            interpreter: None,
            compiler,
            scheduler: Arc::new(RayonScheduler),
            policy: PromotionPolicy::default(),
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn CompileScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_policy(mut self, policy: PromotionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn interpreter(&self) -> Option<&Arc<dyn Interpreter<B>>> {
        self.interpreter.as_ref()
    }

    pub fn scheduler(&self) -> &Arc<dyn CompileScheduler> {
        &self.scheduler
    }

    pub fn policy(&self) -> PromotionPolicy {
        self.policy
    }
}

/// Tiering state and promotion protocol for one function definition
pub struct TierController<B> {
    definition: Arc<FunctionDefinition<B>>,
    services: TierServices<B>,
    selection: ShapeSelection,

    /// Interpreted invocations so far (relaxed, no ordering needed)
    execution_count: AtomicU32,

    /// PromotionState as u8
    promotion: AtomicU8,

    /// Write-once compiled code
    compiled: OnceLock<CompiledCode>,

    /// Serializes the absent-to-present transition
    compile_lock: Mutex<()>,

    /// Recorded once compilation fails, so it is never retried
    failure: OnceLock<CompileError>,

    stats: TierStats,
}

impl<B: FunctionBody> TierController<B> {
    /// Create the controller for a definition. Nothing is compiled.
    pub fn create(definition: Arc<FunctionDefinition<B>>, services: TierServices<B>) -> Arc<Self> {
        let selection = select_shape(definition.signature());
        Arc::new(TierController {
            definition,
            services,
            selection,
            execution_count: AtomicU32::new(0),
            promotion: AtomicU8::new(PromotionState::Cold as u8),
            compiled: OnceLock::new(),
            compile_lock: Mutex::new(()),
            failure: OnceLock::new(),
            stats: TierStats::new(),
        })
    }

    /// Produce a callable handle for one activation of the defining scope
    ///
    /// Returns a compiled handle when exact-shape code is already available,
    /// or when there is no interpreter to fall back on (compiling
    /// synchronously first). Otherwise the handle starts interpreted.
    pub fn bind(
        self: &Arc<Self>,
        closure: Option<ClosureBinding>,
    ) -> Result<CallableHandle<B>, TierError> {
        self.validate_closure(closure.as_ref())?;

        let interpreter = match &self.services.interpreter {
            Some(interpreter) => Arc::clone(interpreter),
            None => {
                self.compile()?;
                return match self.entry_for(closure.as_ref()) {
                    Some(Ok(entry)) => Ok(CallableHandle::compiled(self.definition.clone(), entry)),
                    Some(Err(mismatch)) => Err(CompileError::UnexpectedShape {
                        expected: self.selection.shape,
                        got: mismatch.got,
                    }
                    .into()),
                    None => Err(CompileError::Codegen(format!(
                        "no compiled code published for {}",
                        self.definition.name()
                    ))
                    .into()),
                };
            }
        };

        if self.selection.exact {
            if let Some(Ok(entry)) = self.entry_for(closure.as_ref()) {
                return Ok(CallableHandle::compiled(self.definition.clone(), entry));
            }
        }

        Ok(CallableHandle::interpreted(Arc::clone(self), interpreter, closure))
    }

    /// Count one interpreted invocation, scheduling compilation once the
    /// threshold is reached. Never blocks.
    #[inline]
    pub fn record_invocation(self: &Arc<Self>) {
        let policy = self.services.policy;
        if !policy.enabled {
            return;
        }
        // Saturates in one atomic step; racing callers cannot push past the cap
        let Ok(previous) =
            self.execution_count
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                    (n < MAX_EXECUTION_COUNT).then_some(n + 1)
                })
        else {
            return;
        };
        let count = previous + 1;
        if count >= policy.threshold && self.promotion_state() == PromotionState::Cold {
            self.schedule_compile(count);
        }
    }

    fn schedule_compile(self: &Arc<Self>, count: u32) {
        if self
            .promotion
            .compare_exchange(
                PromotionState::Cold as u8,
                PromotionState::Scheduled as u8,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .is_err()
        {
            return;
        }

        self.stats.record_scheduled();
        debug!(
            target: "tiered_lambda::tiered::compile",
            function = %self.definition.name(),
            count,
            scheduler = self.services.scheduler.name(),
            "Scheduling background compilation"
        );

        // A queued task must not keep a dropped controller alive
        let controller = Arc::downgrade(self);
        self.services.scheduler.schedule(Box::new(move || {
            let Some(controller) = controller.upgrade() else {
                return;
            };
            if let Err(e) = controller.compile() {
                warn!(
                    target: "tiered_lambda::tiered::compile",
                    function = %controller.definition.name(),
                    error = %e,
                    "Background compilation failed, function stays interpreted"
                );
            }
        }));
    }

    /// Compile and publish the function's native code
    ///
    /// Idempotent and safe to call concurrently: exactly one caller runs the
    /// compiler, the rest observe the published slot. A failure is recorded
    /// and returned to every later caller without recompiling.
    pub fn compile(&self) -> Result<(), CompileError> {
        if self.compiled.get().is_some() {
            return Ok(());
        }
        if let Some(e) = self.failure.get() {
            return Err(e.clone());
        }

        let _guard = self.compile_lock.lock();
        if self.compiled.get().is_some() {
            return Ok(());
        }
        if let Some(e) = self.failure.get() {
            return Err(e.clone());
        }

        let start = Instant::now();
        let result = self.generate();
        let elapsed_us = start.elapsed().as_micros() as u64;

        match result {
            Ok(code) => {
                // Only this thread can reach here while holding the lock
                let _ = self.compiled.set(code);
                self.promotion
                    .store(PromotionState::Compiled as u8, Ordering::Release);
                self.stats.record_completed(elapsed_us);
                debug!(
                    target: "tiered_lambda::tiered::compile",
                    function = %self.definition.name(),
                    shape = %self.selection.shape,
                    adapted = !self.selection.exact,
                    elapsed_us,
                    "Compiled function"
                );
                Ok(())
            }
            Err(e) => {
                let _ = self.failure.set(e.clone());
                self.promotion
                    .store(PromotionState::Failed as u8, Ordering::Release);
                self.stats.record_failed(elapsed_us);
                Err(e)
            }
        }
    }

    fn generate(&self) -> CompileResult<CompiledCode> {
        let definition = &*self.definition;
        let compiler = &self.services.compiler;
        let shape = self.selection.shape;

        let generated = panic::catch_unwind(AssertUnwindSafe(|| {
            if definition.has_closure() {
                compiler
                    .compile_to_native_factory(definition, shape)
                    .map(CompiledCode::Factory)
            } else {
                let native = compiler.compile_to_native(definition, shape)?;
                if native.shape() != shape {
                    return Err(CompileError::UnexpectedShape {
                        expected: shape,
                        got: native.shape(),
                    });
                }
                Ok(CompiledCode::Direct(native))
            }
        }));

        generated.unwrap_or_else(|payload| Err(CompileError::Panicked(panic_message(&*payload))))
    }

    fn validate_closure(&self, closure: Option<&ClosureBinding>) -> Result<(), DefinitionError> {
        let expected = self.definition.closure_slots().len();
        match (expected, closure) {
            (0, None) => Ok(()),
            (0, Some(binding)) => Err(DefinitionError::UnexpectedClosure { got: binding.len() }),
            (expected, None) => Err(DefinitionError::MissingClosure { expected }),
            (expected, Some(binding)) if binding.len() != expected => {
                Err(DefinitionError::ClosureArityMismatch {
                    expected,
                    got: binding.len(),
                })
            }
            _ => Ok(()),
        }
    }
}

impl<B> TierController<B> {
    /// Resolve the published code for a binding, if any
    ///
    /// Factories are applied to the binding; entry points that need
    /// call-time adaptation come back wrapped in their adapter.
    pub(crate) fn entry_for(
        &self,
        closure: Option<&ClosureBinding>,
    ) -> Option<Result<CompiledEntry, SignatureMismatch>> {
        let code = self.compiled.get()?;
        let signature = self.definition.signature();
        Some(match code.entry_point(closure) {
            Some(native) => CompiledEntry::new(signature, native),
            None => Err(SignatureMismatch {
                signature: signature.to_string(),
                got: self.selection.shape,
            }),
        })
    }

    /// Run the interpreter on behalf of a handle
    #[inline]
    pub(crate) fn interpret(
        &self,
        interpreter: &dyn Interpreter<B>,
        args: &mut [Value],
        closure: Option<&ClosureBinding>,
    ) -> RuntimeResult<Value> {
        self.stats.record_interpreted_call();
        interpreter.interpret(&self.definition, args, closure)
    }

    pub fn definition(&self) -> &Arc<FunctionDefinition<B>> {
        &self.definition
    }

    /// Shape the compiler is asked for
    pub fn selection(&self) -> ShapeSelection {
        self.selection
    }

    /// Check if compiled code serves the declared signature without an
    /// adapter
    pub fn is_exact(&self) -> bool {
        self.selection.exact
    }

    /// Check if compiled code has been published
    #[inline]
    pub fn has_compiled(&self) -> bool {
        self.compiled.get().is_some()
    }

    #[inline]
    pub fn execution_count(&self) -> u32 {
        self.execution_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn promotion_state(&self) -> PromotionState {
        PromotionState::from(self.promotion.load(Ordering::Acquire))
    }

    /// The recorded compilation failure, if compilation failed
    pub fn failure(&self) -> Option<CompileError> {
        self.failure.get().cloned()
    }

    pub fn stats(&self) -> &TierStats {
        &self.stats
    }
}

impl<B> fmt::Debug for TierController<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TierController")
            .field("function", &self.definition.name())
            .field("shape", &self.selection.shape)
            .field("exact", &self.selection.exact)
            .field("execution_count", &self.execution_count())
            .field("promotion", &self.promotion_state())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::definition::FunctionDefinition;
    use crate::backend::errors::RuntimeError;
    use crate::backend::tiered::handle::HandleState;
    use crate::backend::tiered::scheduler::DeferredScheduler;
    use crate::backend::tiered::shape::{ClosureFactory, NativeFn, NativeShape};
    use std::sync::atomic::AtomicUsize;
    use std::thread;
    use std::time::Duration;

    struct Opaque;
    impl FunctionBody for Opaque {}

    /// Returns the first argument (or the constant 7 for nullary functions)
    struct Echo;

    impl Interpreter<Opaque> for Echo {
        fn interpret(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            args: &mut [Value],
            _closure: Option<&ClosureBinding>,
        ) -> RuntimeResult<Value> {
            Ok(args.first().cloned().unwrap_or(Value::Int(7)))
        }
    }

    #[derive(Default)]
    struct EchoCompiler {
        calls: AtomicUsize,
        fail: bool,
    }

    impl NativeCompiler<Opaque> for EchoCompiler {
        fn compile_to_native(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            shape: NativeShape,
        ) -> CompileResult<NativeFn> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(CompileError::Unsupported("echo".to_string()));
            }
            // Always a Func, whatever was asked for
            Ok(NativeFn::Func {
                arity: shape.arity(),
                f: Arc::new(|args: &[Value]| Ok(args.first().cloned().unwrap_or(Value::Int(7)))),
            })
        }

        fn compile_to_native_factory(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<ClosureFactory> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(CompileError::Unsupported("closures".to_string()))
        }
    }

    fn controller(
        compiler: Arc<EchoCompiler>,
        scheduler: Arc<DeferredScheduler>,
        threshold: u32,
    ) -> Arc<TierController<Opaque>> {
        let def = FunctionDefinition::builder("echo", Opaque)
            .param("x")
            .build()
            .unwrap();
        let services = TierServices::<Opaque>::new(Arc::new(Echo), compiler)
            .with_scheduler(scheduler)
            .with_policy(PromotionPolicy {
                threshold,
                enabled: true,
            });
        TierController::create(def, services)
    }

    #[test]
    fn test_create_does_not_compile() {
        let compiler = Arc::new(EchoCompiler::default());
        let ctl = controller(compiler.clone(), Arc::new(DeferredScheduler::new()), 32);
        assert_eq!(ctl.promotion_state(), PromotionState::Cold);
        assert!(!ctl.has_compiled());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_threshold_schedules_once() {
        let scheduler = Arc::new(DeferredScheduler::new());
        let ctl = controller(Arc::new(EchoCompiler::default()), scheduler.clone(), 3);

        ctl.record_invocation();
        ctl.record_invocation();
        assert_eq!(scheduler.pending(), 0);
        ctl.record_invocation();
        assert_eq!(ctl.promotion_state(), PromotionState::Scheduled);
        ctl.record_invocation();
        assert_eq!(scheduler.submitted(), 1);

        scheduler.run_pending();
        assert_eq!(ctl.promotion_state(), PromotionState::Compiled);
        assert_eq!(ctl.stats().snapshot().compilations_completed, 1);
    }

    #[test]
    fn test_disabled_policy_never_schedules() {
        let scheduler = Arc::new(DeferredScheduler::new());
        let def = FunctionDefinition::builder("f", Opaque).build().unwrap();
        let compiler = Arc::new(EchoCompiler::default());
        let services = TierServices::<Opaque>::new(Arc::new(Echo), compiler)
            .with_scheduler(scheduler.clone())
            .with_policy(PromotionPolicy {
                threshold: 1,
                enabled: false,
            });
        let ctl = TierController::create(def, services);
        for _ in 0..10 {
            ctl.record_invocation();
        }
        assert_eq!(scheduler.submitted(), 0);
        assert_eq!(ctl.execution_count(), 0);
    }

    #[test]
    fn test_compile_is_idempotent() {
        let compiler = Arc::new(EchoCompiler::default());
        let ctl = controller(compiler.clone(), Arc::new(DeferredScheduler::new()), 32);
        ctl.compile().unwrap();
        ctl.compile().unwrap();
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failure_is_permanent() {
        let compiler = Arc::new(EchoCompiler {
            fail: true,
            ..Default::default()
        });
        let ctl = controller(compiler.clone(), Arc::new(DeferredScheduler::new()), 32);
        assert!(ctl.compile().is_err());
        assert!(ctl.compile().is_err());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.promotion_state(), PromotionState::Failed);
        assert!(matches!(ctl.failure(), Some(CompileError::Unsupported(_))));
    }

    #[test]
    fn test_bind_validates_closure() {
        let ctl = controller(
            Arc::new(EchoCompiler::default()),
            Arc::new(DeferredScheduler::new()),
            32,
        );
        let err = ctl
            .bind(Some(ClosureBinding::from_values([Value::Int(1)])))
            .err()
            .unwrap();
        assert_eq!(
            err,
            TierError::Definition(DefinitionError::UnexpectedClosure { got: 1 })
        );
    }

    #[test]
    fn test_bind_after_compile_is_compiled_handle() {
        let ctl = controller(
            Arc::new(EchoCompiler::default()),
            Arc::new(DeferredScheduler::new()),
            32,
        );
        ctl.compile().unwrap();
        let handle = ctl.bind(None).unwrap();
        assert!(handle.is_compiled());
        assert_eq!(handle.call(&[Value::Int(5)]), Ok(Value::Int(5)));
    }

    #[test]
    fn test_compile_only_services_force_compile() {
        let compiler = Arc::new(EchoCompiler::default());
        let def = FunctionDefinition::builder("f", Opaque)
            .param("x")
            .build()
            .unwrap();
        let services = TierServices::<Opaque>::compile_only(compiler.clone());
        let ctl = TierController::create(def, services);
        let handle = ctl.bind(None).unwrap();
        assert!(handle.is_compiled());
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_compile_only_failure_surfaces() {
        let compiler = Arc::new(EchoCompiler {
            fail: true,
            ..Default::default()
        });
        let def = FunctionDefinition::builder("f", Opaque).build().unwrap();
        let ctl = TierController::create(def, TierServices::<Opaque>::compile_only(compiler));
        assert!(matches!(
            ctl.bind(None).err(),
            Some(TierError::Compile(CompileError::Unsupported(_)))
        ));
    }

    #[test]
    fn test_wrong_shape_is_compile_error() {
        // Void signature asks for Action
        let def = FunctionDefinition::builder("f", Opaque)
            .param("x")
            .void()
            .build()
            .unwrap();
        let ctl = TierController::create(
            def,
            TierServices::<Opaque>::new(Arc::new(Echo), Arc::new(EchoCompiler::default())),
        );
        assert_eq!(
            ctl.compile(),
            Err(CompileError::UnexpectedShape {
                expected: NativeShape::Action { arity: 1 },
                got: NativeShape::Func { arity: 1 },
            })
        );
        assert!(!ctl.has_compiled());
    }

    struct Panicking;

    impl NativeCompiler<Opaque> for Panicking {
        fn compile_to_native(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<NativeFn> {
            panic!("register allocator exploded")
        }

        fn compile_to_native_factory(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<ClosureFactory> {
            Err(CompileError::Codegen("unused".to_string()))
        }
    }

    #[test]
    fn test_compiler_panic_becomes_error() {
        let def = FunctionDefinition::builder("f", Opaque).build().unwrap();
        let services = TierServices::<Opaque>::new(Arc::new(Echo), Arc::new(Panicking));
        let ctl = TierController::create(def, services);
        assert_eq!(
            ctl.compile(),
            Err(CompileError::Panicked("register allocator exploded".to_string()))
        );
        assert_eq!(ctl.promotion_state(), PromotionState::Failed);

        // Still callable on the interpreter
        let handle = ctl.bind(None).unwrap();
        assert_eq!(handle.call(&[]), Ok(Value::Int(7)));
        assert_eq!(
            handle.call(&[Value::Unit]),
            Err(RuntimeError::ArityMismatch {
                expected: 0,
                got: 1
            })
        );
    }

    #[test]
    fn test_dropped_controller_skips_queued_compile() {
        let compiler = Arc::new(EchoCompiler::default());
        let scheduler = Arc::new(DeferredScheduler::new());
        let ctl = controller(compiler.clone(), scheduler.clone(), 1);
        ctl.record_invocation();
        drop(ctl);
        assert_eq!(scheduler.run_pending(), 1);
        assert_eq!(compiler.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_execution_count_saturates_under_contention() {
        let scheduler = Arc::new(DeferredScheduler::new());
        let ctl = controller(Arc::new(EchoCompiler::default()), scheduler.clone(), 32);
        ctl.execution_count
            .store(MAX_EXECUTION_COUNT - 4, Ordering::Relaxed);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..100 {
                        ctl.record_invocation();
                    }
                });
            }
        });

        assert_eq!(ctl.execution_count(), MAX_EXECUTION_COUNT);
        assert_eq!(scheduler.submitted(), 1);
    }

    /// Holds code generation open until released, then fails
    struct Gated {
        entered: crossbeam_channel::Sender<()>,
        release: crossbeam_channel::Receiver<()>,
    }

    impl NativeCompiler<Opaque> for Gated {
        fn compile_to_native(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<NativeFn> {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            Err(CompileError::Codegen("gate closed".to_string()))
        }

        fn compile_to_native_factory(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<ClosureFactory> {
            Err(CompileError::Codegen("unused".to_string()))
        }
    }

    #[test]
    fn test_failure_readable_while_compiling() {
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(1);
        let (release_tx, release_rx) = crossbeam_channel::bounded(1);
        let compiler = Gated {
            entered: entered_tx,
            release: release_rx,
        };
        let def = FunctionDefinition::builder("slow", Opaque).build().unwrap();
        let ctl = TierController::create(
            def,
            TierServices::<Opaque>::new(Arc::new(Echo), Arc::new(compiler)),
        );

        thread::scope(|s| {
            let compiling = s.spawn(|| ctl.compile());
            entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

            // Code generation is in flight and holds the compile lock
            assert_eq!(ctl.failure(), None);
            release_tx.send(()).unwrap();
            assert!(compiling.join().unwrap().is_err());
        });

        assert_eq!(
            ctl.failure(),
            Some(CompileError::Codegen("gate closed".to_string()))
        );
    }

    /// Factory whose entry point claims no return value, whatever the
    /// signature declares
    struct VoidFactory;

    impl NativeCompiler<Opaque> for VoidFactory {
        fn compile_to_native(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            _shape: NativeShape,
        ) -> CompileResult<NativeFn> {
            Err(CompileError::Codegen("unused".to_string()))
        }

        fn compile_to_native_factory(
            &self,
            _definition: &FunctionDefinition<Opaque>,
            shape: NativeShape,
        ) -> CompileResult<ClosureFactory> {
            let arity = shape.arity();
            Ok(Arc::new(move |_: &ClosureBinding| NativeFn::Uniform {
                arity,
                returns: false,
                f: Arc::new(|_: &[Value]| Ok(Value::Int(99))),
            }))
        }
    }

    /// fn(ref a) -> value, capturing one variable
    fn fill() -> Arc<FunctionDefinition<Opaque>> {
        FunctionDefinition::builder("fill", Opaque)
            .by_ref("a")
            .capture("seed")
            .build()
            .unwrap()
    }

    fn seed() -> Option<ClosureBinding> {
        Some(ClosureBinding::from_values([Value::Int(0)]))
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "Signature mismatch")]
    fn test_mismatched_entry_asserts_in_debug() {
        let services = TierServices::<Opaque>::new(Arc::new(Echo), Arc::new(VoidFactory));
        let ctl = TierController::create(fill(), services);
        let handle = ctl.bind(seed()).unwrap();
        ctl.compile().unwrap();
        let _ = handle.invoke(&mut [Value::Int(7)]);
    }

    #[test]
    fn test_mismatched_entry_keeps_handle_interpreted() {
        let services = TierServices::<Opaque>::new(Arc::new(Echo), Arc::new(VoidFactory));
        let ctl = TierController::create(fill(), services);
        let handle = ctl.bind(seed()).unwrap();
        assert_eq!(handle.call(&[Value::Int(7)]), Ok(Value::Int(7)));

        ctl.compile().unwrap();
        assert_eq!(ctl.promotion_state(), PromotionState::Compiled);

        // The first call after publication sees the defect; debug builds
        // assert on it
        let first = panic::catch_unwind(AssertUnwindSafe(|| handle.call(&[Value::Int(7)])));
        if cfg!(debug_assertions) {
            assert!(first.is_err());
        } else {
            assert_eq!(first.ok(), Some(Ok(Value::Int(7))));
        }

        assert_eq!(handle.state(), HandleState::Cold);
        assert_eq!(handle.call(&[Value::Int(7)]), Ok(Value::Int(7)));
        assert_eq!(ctl.stats().snapshot().handles_promoted, 0);
    }

    #[test]
    fn test_compile_only_bind_reports_mismatch() {
        let ctl = TierController::create(
            fill(),
            TierServices::<Opaque>::compile_only(Arc::new(VoidFactory)),
        );
        assert_eq!(
            ctl.bind(seed()).err(),
            Some(TierError::Compile(CompileError::UnexpectedShape {
                expected: NativeShape::Uniform {
                    arity: 1,
                    returns: true
                },
                got: NativeShape::Uniform {
                    arity: 1,
                    returns: false
                },
            }))
        );
    }
}
