//! Registry of tier controllers.
//!
//! The engine hands out one [`TierController`] per function definition,
//! created lazily on first use and shared by every binding of that
//! definition. Lookups go through a `DashMap` so concurrent binds of
//! different functions never contend.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::backend::closure::ClosureBinding;
use crate::backend::config::{ConfigError, TierConfig};
use crate::backend::definition::{DefinitionId, FunctionBody, FunctionDefinition};
use crate::backend::errors::{CompileError, TierError};

use super::controller::{PromotionState, TierController, TierServices};
use super::handle::CallableHandle;
use super::runtime::{Interpreter, NativeCompiler};
use super::scheduler::{CompileScheduler, DeferredScheduler};
use super::stats::TierStatsSnapshot;

/// Engine-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Definitions with a live controller
    pub tracked_functions: usize,

    /// Of those, how many have compiled code
    pub compiled_functions: usize,

    /// Of those, how many failed to compile
    pub failed_functions: usize,

    /// Counters summed over every controller
    pub totals: TierStatsSnapshot,
}

/// Tiered execution engine over function bodies of type `B`
pub struct TieredEngine<B> {
    services: TierServices<B>,
    controllers: DashMap<DefinitionId, Arc<TierController<B>>>,
    deferred: Option<Arc<DeferredScheduler>>,
}

impl<B: FunctionBody> TieredEngine<B> {
    pub fn new(services: TierServices<B>) -> Self {
        TieredEngine {
            services,
            controllers: DashMap::new(),
            deferred: None,
        }
    }

    /// Build an engine from configuration
    pub fn from_config(
        interpreter: Arc<dyn Interpreter<B>>,
        compiler: Arc<dyn NativeCompiler<B>>,
        config: &TierConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let built = config.build_scheduler()?;
        debug!(
            target: "tiered_lambda::engine",
            threshold = config.compilation_threshold,
            tiering = config.tiering_enabled,
            scheduler = built.scheduler.name(),
            "Creating tiered engine"
        );
        let services = TierServices::new(interpreter, compiler)
            .with_scheduler(built.scheduler)
            .with_policy(config.policy());
        Ok(TieredEngine {
            services,
            controllers: DashMap::new(),
            deferred: built.deferred,
        })
    }

    /// Replace the compile scheduler for controllers created from now on
    pub fn with_scheduler(mut self, scheduler: Arc<dyn CompileScheduler>) -> Self {
        self.services = self.services.with_scheduler(scheduler);
        self.deferred = None;
        self
    }

    /// Use a host-drained scheduler for controllers created from now on
    pub fn with_deferred_scheduler(mut self, deferred: Arc<DeferredScheduler>) -> Self {
        self.services = self.services.with_scheduler(deferred.clone());
        self.deferred = Some(deferred);
        self
    }

    /// Get or create the controller for a definition
    pub fn controller(&self, definition: &Arc<FunctionDefinition<B>>) -> Arc<TierController<B>> {
        if let Some(existing) = self.controllers.get(&definition.id()) {
            return Arc::clone(existing.value());
        }

        let entry = self.controllers.entry(definition.id()).or_insert_with(|| {
            debug!(
                target: "tiered_lambda::engine",
                function = %definition.name(),
                id = definition.id().as_u64(),
                "Tracking function"
            );
            TierController::create(Arc::clone(definition), self.services.clone())
        });
        Arc::clone(entry.value())
    }

    /// Bind a definition to a closure environment
    pub fn bind(
        &self,
        definition: &Arc<FunctionDefinition<B>>,
        closure: Option<ClosureBinding>,
    ) -> Result<CallableHandle<B>, TierError> {
        self.controller(definition).bind(closure)
    }

    /// Compile a definition synchronously, ignoring the threshold
    pub fn compile_now(&self, definition: &Arc<FunctionDefinition<B>>) -> Result<(), CompileError> {
        self.controller(definition).compile()
    }

    /// Stop tracking a definition whose defining scope has ended
    ///
    /// Existing handles keep working; a later bind starts a fresh controller.
    pub fn release(&self, id: DefinitionId) -> bool {
        self.controllers.remove(&id).is_some()
    }

    /// Run queued compilations of a deferred scheduler
    ///
    /// Returns how many ran; always 0 for other schedulers.
    pub fn run_pending_compilations(&self) -> usize {
        self.deferred
            .as_ref()
            .map_or(0, |deferred| deferred.run_pending())
    }

    pub fn tracked_functions(&self) -> usize {
        self.controllers.len()
    }

    pub fn stats(&self) -> EngineStats {
        self.controllers
            .iter()
            .fold(EngineStats::default(), |mut stats, entry| {
                let controller = entry.value();
                stats.tracked_functions += 1;
                match controller.promotion_state() {
                    PromotionState::Compiled => stats.compiled_functions += 1,
                    PromotionState::Failed => stats.failed_functions += 1,
                    _ => {}
                }
                stats.totals = stats.totals + controller.stats().snapshot();
                stats
            })
    }

    pub fn services(&self) -> &TierServices<B> {
        &self.services
    }
}
