//! Function definitions: the immutable description of a callable.
//!
//! A [`FunctionDefinition`] is produced once by the front-end and shared via
//! `Arc` for as long as its defining scope lives. The body type `B` is opaque
//! to the tiering core; it is handed through to the interpreter and the
//! native compiler unchanged.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use itertools::Itertools;

use crate::backend::closure::ClosureSlot;
use crate::backend::errors::DefinitionError;

/// Upper bound on declared parameters
pub const MAX_PARAMETERS: usize = 255;

static NEXT_DEFINITION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a function definition
///
/// Used as the key under which a [`crate::backend::tiered::TieredEngine`]
/// keeps the definition's tier controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(u64);

impl DefinitionId {
    fn next() -> Self {
        DefinitionId(NEXT_DEFINITION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw u64 value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

/// How an argument is passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassMode {
    /// Callee works on its own copy
    ByValue,
    /// Callee writes are visible in the caller's slot after the call
    ByRef,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    name: Arc<str>,
    mode: PassMode,
}

impl Parameter {
    pub fn by_value(name: impl AsRef<str>) -> Self {
        Parameter {
            name: Arc::from(name.as_ref()),
            mode: PassMode::ByValue,
        }
    }

    pub fn by_ref(name: impl AsRef<str>) -> Self {
        Parameter {
            name: Arc::from(name.as_ref()),
            mode: PassMode::ByRef,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn mode(&self) -> PassMode {
        self.mode
    }

    #[inline]
    pub fn is_by_ref(&self) -> bool {
        self.mode == PassMode::ByRef
    }
}

/// Declared return type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReturnType {
    /// Function produces a value
    Value,
    /// Function produces no value; callers observe `Value::Unit`
    Void,
}

/// Declared calling signature of a function
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    params: Vec<Parameter>,
    returns: ReturnType,
}

impl Signature {
    pub fn new(params: Vec<Parameter>, returns: ReturnType) -> Self {
        Signature { params, returns }
    }

    #[inline]
    pub fn params(&self) -> &[Parameter] {
        &self.params
    }

    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    #[inline]
    pub fn returns(&self) -> ReturnType {
        self.returns
    }

    #[inline]
    pub fn is_void(&self) -> bool {
        self.returns == ReturnType::Void
    }

    /// Indices of by-reference parameters, in order
    pub fn by_ref_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_by_ref())
            .map(|(i, _)| i)
    }

    /// Check if any parameter is passed by reference
    pub fn has_by_ref(&self) -> bool {
        self.params.iter().any(Parameter::is_by_ref)
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params = self
            .params
            .iter()
            .map(|p| match p.mode {
                PassMode::ByValue => p.name.to_string(),
                PassMode::ByRef => format!("ref {}", p.name),
            })
            .join(", ");
        match self.returns {
            ReturnType::Value => write!(f, "fn({}) -> value", params),
            ReturnType::Void => write!(f, "fn({})", params),
        }
    }
}

/// Front-end contract for a lowered function body
///
/// The tiering core never inspects a body. `check` lets the body report
/// references that do not fit the declared signature or closure slots when
/// the definition is built.
pub trait FunctionBody: Send + Sync + 'static {
    fn check(&self, _signature: &Signature, _closure_slots: usize) -> Result<(), DefinitionError> {
        Ok(())
    }
}

/// Immutable description of a callable
pub struct FunctionDefinition<B> {
    id: DefinitionId,
    name: Arc<str>,
    signature: Signature,
    closure_slots: Vec<ClosureSlot>,
    body: B,
}

impl<B: FunctionBody> FunctionDefinition<B> {
    /// Start building a definition for the given body
    pub fn builder(name: impl AsRef<str>, body: B) -> DefinitionBuilder<B> {
        DefinitionBuilder {
            name: Arc::from(name.as_ref()),
            params: Vec::new(),
            returns: ReturnType::Value,
            closure_slots: Vec::new(),
            body,
        }
    }
}

impl<B> FunctionDefinition<B> {
    #[inline]
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    #[inline]
    pub fn closure_slots(&self) -> &[ClosureSlot] {
        &self.closure_slots
    }

    #[inline]
    pub fn has_closure(&self) -> bool {
        !self.closure_slots.is_empty()
    }

    #[inline]
    pub fn body(&self) -> &B {
        &self.body
    }
}

impl<B> fmt::Debug for FunctionDefinition<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("signature", &self.signature.to_string())
            .field("closure_slots", &self.closure_slots.len())
            .finish()
    }
}

/// Builder for [`FunctionDefinition`]
pub struct DefinitionBuilder<B> {
    name: Arc<str>,
    params: Vec<Parameter>,
    returns: ReturnType,
    closure_slots: Vec<ClosureSlot>,
    body: B,
}

impl<B: FunctionBody> DefinitionBuilder<B> {
    /// Add a by-value parameter
    pub fn param(mut self, name: impl AsRef<str>) -> Self {
        self.params.push(Parameter::by_value(name));
        self
    }

    /// Add a by-reference parameter
    pub fn by_ref(mut self, name: impl AsRef<str>) -> Self {
        self.params.push(Parameter::by_ref(name));
        self
    }

    /// Declare the return type (default: `ReturnType::Value`)
    pub fn returns(mut self, returns: ReturnType) -> Self {
        self.returns = returns;
        self
    }

    /// Shorthand for `returns(ReturnType::Void)`
    pub fn void(self) -> Self {
        self.returns(ReturnType::Void)
    }

    /// Add a captured-variable slot
    pub fn capture(mut self, name: impl AsRef<str>) -> Self {
        self.closure_slots.push(ClosureSlot::new(name));
        self
    }

    /// Validate and freeze the definition
    pub fn build(self) -> Result<Arc<FunctionDefinition<B>>, DefinitionError> {
        if self.params.len() > MAX_PARAMETERS {
            return Err(DefinitionError::TooManyParameters {
                count: self.params.len(),
                max: MAX_PARAMETERS,
            });
        }

        let mut seen = HashSet::new();
        for p in &self.params {
            if !seen.insert(p.name()) {
                return Err(DefinitionError::DuplicateParameter(p.name().to_string()));
            }
        }

        let mut seen = HashSet::new();
        for slot in &self.closure_slots {
            if !seen.insert(slot.name()) {
                return Err(DefinitionError::DuplicateClosureSlot(slot.name().to_string()));
            }
        }

        let signature = Signature::new(self.params, self.returns);
        self.body.check(&signature, self.closure_slots.len())?;

        Ok(Arc::new(FunctionDefinition {
            id: DefinitionId::next(),
            name: self.name,
            signature,
            closure_slots: self.closure_slots,
            body: self.body,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Opaque;
    impl FunctionBody for Opaque {}

    #[test]
    fn test_build_assigns_unique_ids() {
        let a = FunctionDefinition::builder("a", Opaque).build().unwrap();
        let b = FunctionDefinition::builder("b", Opaque).build().unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_duplicate_parameter_rejected() {
        let result = FunctionDefinition::builder("f", Opaque)
            .param("x")
            .by_ref("x")
            .build();
        assert_eq!(
            result.unwrap_err(),
            DefinitionError::DuplicateParameter("x".to_string())
        );
    }

    #[test]
    fn test_duplicate_slot_rejected() {
        let result = FunctionDefinition::builder("f", Opaque)
            .capture("c")
            .capture("c")
            .build();
        assert!(matches!(result, Err(DefinitionError::DuplicateClosureSlot(_))));
    }

    #[test]
    fn test_too_many_parameters() {
        let mut builder = FunctionDefinition::builder("f", Opaque);
        for i in 0..=MAX_PARAMETERS {
            builder = builder.param(format!("p{}", i));
        }
        assert!(matches!(
            builder.build(),
            Err(DefinitionError::TooManyParameters { .. })
        ));
    }

    #[test]
    fn test_signature_display_and_by_ref_indices() {
        let def = FunctionDefinition::builder("swap", Opaque)
            .by_ref("a")
            .param("n")
            .by_ref("b")
            .void()
            .build()
            .unwrap();
        let sig = def.signature();
        assert_eq!(sig.to_string(), "fn(ref a, n, ref b)");
        assert_eq!(sig.by_ref_indices().collect::<Vec<_>>(), vec![0, 2]);
        assert!(sig.has_by_ref());
        assert!(sig.is_void());
    }
}
