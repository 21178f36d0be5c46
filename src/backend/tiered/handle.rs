//! Callable handles: the object a host invokes.
//!
//! A handle presents the function's declared signature no matter which tier
//! serves it. Dispatch is a single branch on a tagged variant:
//!
//! - `Compiled` handles call native code directly and never touch the
//!   interpreter or the invocation counter.
//! - `Interpreted` handles count the call and run the interpreter until the
//!   controller publishes compiled code; the next call then switches the
//!   handle's dispatch target, once and for good.

use std::fmt;
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;
use tracing::{error, trace};

use crate::backend::closure::ClosureBinding;
use crate::backend::definition::{FunctionBody, FunctionDefinition};
use crate::backend::errors::{RuntimeError, RuntimeResult, SignatureMismatch};
use crate::backend::models::Value;

use super::adapter::CompiledEntry;
use super::controller::{PromotionState, TierController};
use super::runtime::Interpreter;

/// Observable tier of a single handle
///
/// Moves only forward: `Cold` → `HotPending` → `Warm`. The one exception is
/// a failed compilation, after which the handle reports `Cold` for good.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandleState {
    /// Served by the interpreter, no compiled code in sight
    Cold,
    /// Still interpreted, compilation scheduled or just published
    HotPending,
    /// Served by compiled code
    Warm,
}

/// A function bound to one closure environment, callable under its
/// declared signature
pub struct CallableHandle<B> {
    definition: Arc<FunctionDefinition<B>>,
    dispatch: Dispatch<B>,
}

enum Dispatch<B> {
    Compiled(CompiledEntry),
    Interpreted(InterpretedLambda<B>),
}

struct InterpretedLambda<B> {
    controller: Arc<TierController<B>>,
    interpreter: Arc<dyn Interpreter<B>>,
    closure: Option<ClosureBinding>,
    /// `Some` once switched to compiled code; `None` if the published code
    /// could not be adapted and this handle keeps interpreting
    promoted: OnceLock<Option<CompiledEntry>>,
}

impl<B: FunctionBody> CallableHandle<B> {
    pub(crate) fn compiled(definition: Arc<FunctionDefinition<B>>, entry: CompiledEntry) -> Self {
        CallableHandle {
            definition,
            dispatch: Dispatch::Compiled(entry),
        }
    }

    pub(crate) fn interpreted(
        controller: Arc<TierController<B>>,
        interpreter: Arc<dyn Interpreter<B>>,
        closure: Option<ClosureBinding>,
    ) -> Self {
        CallableHandle {
            definition: Arc::clone(controller.definition()),
            dispatch: Dispatch::Interpreted(InterpretedLambda {
                controller,
                interpreter,
                closure,
                promoted: OnceLock::new(),
            }),
        }
    }

    /// Invoke with arguments in declared order
    ///
    /// By-reference slots of `args` hold the callee's final values afterwards,
    /// also when the call returns an error. Void functions return
    /// `Value::Unit`.
    pub fn invoke(&self, args: &mut [Value]) -> RuntimeResult<Value> {
        let expected = self.definition.signature().arity();
        if args.len() != expected {
            return Err(RuntimeError::ArityMismatch {
                expected,
                got: args.len(),
            });
        }

        match &self.dispatch {
            Dispatch::Compiled(entry) => entry.call(args),
            Dispatch::Interpreted(lambda) => lambda.invoke(args),
        }
    }

    /// Invoke with by-value semantics for every argument
    ///
    /// Writes to by-reference parameters are discarded.
    pub fn call(&self, args: &[Value]) -> RuntimeResult<Value> {
        let mut args: SmallVec<[Value; 8]> = args.iter().cloned().collect();
        self.invoke(&mut args)
    }

    pub fn state(&self) -> HandleState {
        match &self.dispatch {
            Dispatch::Compiled(_) => HandleState::Warm,
            Dispatch::Interpreted(lambda) => lambda.state(),
        }
    }

    /// Check if this handle was bound directly to compiled code
    pub fn is_compiled(&self) -> bool {
        matches!(self.dispatch, Dispatch::Compiled(_))
    }

    pub fn definition(&self) -> &Arc<FunctionDefinition<B>> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        self.definition.name()
    }

    /// Bound closure, for interpreted handles
    pub fn closure(&self) -> Option<&ClosureBinding> {
        match &self.dispatch {
            Dispatch::Compiled(_) => None,
            Dispatch::Interpreted(lambda) => lambda.closure.as_ref(),
        }
    }
}

impl<B: FunctionBody> InterpretedLambda<B> {
    #[inline]
    fn invoke(&self, args: &mut [Value]) -> RuntimeResult<Value> {
        if let Some(entry) = self.target() {
            return entry.call(args);
        }

        self.controller.record_invocation();
        self.controller
            .interpret(&*self.interpreter, args, self.closure.as_ref())
    }

    /// Current compiled dispatch target, switching to it on first sight
    fn target(&self) -> Option<&CompiledEntry> {
        if let Some(resolved) = self.promoted.get() {
            return resolved.as_ref();
        }

        let resolved = self.controller.entry_for(self.closure.as_ref())?;
        let mut mismatch = None;
        let target = self
            .promoted
            .get_or_init(|| match resolved {
                Ok(entry) => {
                    trace!(
                        target: "tiered_lambda::tiered::dispatch",
                        function = %self.controller.definition().name(),
                        adapted = entry.is_adapted(),
                        "Handle switched to compiled code"
                    );
                    self.controller.stats().record_promoted_handle();
                    Some(entry)
                }
                Err(defect) => {
                    self.report_mismatch(&defect);
                    mismatch = Some(defect);
                    None
                }
            })
            .as_ref();

        // Asserted only after the handle is pinned to the interpreter
        if let Some(defect) = mismatch {
            debug_assert!(false, "{}", defect);
        }
        target
    }

    fn report_mismatch(&self, mismatch: &SignatureMismatch) {
        error!(
            target: "tiered_lambda::tiered::dispatch",
            function = %self.controller.definition().name(),
            error = %mismatch,
            "Compiled code cannot serve declared signature, staying interpreted"
        );
    }

    fn state(&self) -> HandleState {
        match self.promoted.get() {
            Some(Some(_)) => return HandleState::Warm,
            Some(None) => return HandleState::Cold,
            None => {}
        }
        match self.controller.promotion_state() {
            PromotionState::Cold | PromotionState::Failed => HandleState::Cold,
            PromotionState::Scheduled | PromotionState::Compiled => HandleState::HotPending,
        }
    }
}

impl<B> fmt::Debug for CallableHandle<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tier = match &self.dispatch {
            Dispatch::Compiled(entry) => format!("compiled {}", entry.shape()),
            Dispatch::Interpreted(_) => "interpreted".to_string(),
        };
        f.debug_struct("CallableHandle")
            .field("function", &self.definition.name())
            .field("dispatch", &tier)
            .finish()
    }
}
