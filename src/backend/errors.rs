//! Error types for definitions, execution, compilation and tiering.
//!
//! Errors raised while executing a lambda body ([`RuntimeError`]) are
//! propagated verbatim through a callable handle regardless of which tier
//! served the call. Tiering bookkeeping never adds wrapping to them.

use std::fmt;

use crate::backend::models::{Value, ValueType};
use crate::backend::tiered::NativeShape;

// =============================================================================
// RuntimeError
// =============================================================================

/// Error raised while executing a lambda body, on either tier
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeError {
    /// User-level raise carrying an arbitrary value
    Raised(Value),

    /// Integer division or remainder by zero
    DivisionByZero,

    /// Checked integer arithmetic overflowed
    IntegerOverflow { op: &'static str },

    /// Binary operator applied to incompatible operands
    OperandMismatch {
        op: &'static str,
        left: ValueType,
        right: ValueType,
    },

    /// Unary operator or condition applied to a value of the wrong type
    TypeMismatch { op: &'static str, found: ValueType },

    /// Callable invoked with the wrong number of arguments
    ArityMismatch { expected: usize, got: usize },

    /// Body read or wrote a closure slot with no cell bound to it
    UnboundCapture(usize),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Raised(value) => write!(f, "Raised: {}", value),
            RuntimeError::DivisionByZero => write!(f, "Division by zero"),
            RuntimeError::IntegerOverflow { op } => write!(f, "Integer overflow in {}", op),
            RuntimeError::OperandMismatch { op, left, right } => {
                write!(f, "Type error: cannot apply {} to {} and {}", op, left, right)
            }
            RuntimeError::TypeMismatch { op, found } => {
                write!(f, "Type error: {} does not accept {}", op, found)
            }
            RuntimeError::ArityMismatch { expected, got } => {
                write!(f, "Arity mismatch: expected {} arguments, got {}", expected, got)
            }
            RuntimeError::UnboundCapture(slot) => {
                write!(f, "No closure cell bound to slot {}", slot)
            }
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Result type for lambda execution
pub type RuntimeResult<T> = Result<T, RuntimeError>;

// =============================================================================
// DefinitionError
// =============================================================================

/// A malformed function definition or a binding that does not fit it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// Two parameters share a name
    DuplicateParameter(String),

    /// Two closure slots share a name
    DuplicateClosureSlot(String),

    /// More parameters than any calling convention supports
    TooManyParameters { count: usize, max: usize },

    /// Body reads or writes a parameter index past the parameter list
    UnknownParameter(usize),

    /// Body reads or writes a local index past the declared locals
    UnknownLocal(usize),

    /// Body reads or writes a closure slot index past the slot list
    UnknownClosureSlot(usize),

    /// Function captures variables but was bound without a closure
    MissingClosure { expected: usize },

    /// Function captures nothing but was bound with a closure
    UnexpectedClosure { got: usize },

    /// Closure binding has a different number of cells than slots
    ClosureArityMismatch { expected: usize, got: usize },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DefinitionError::DuplicateParameter(name) => {
                write!(f, "Duplicate parameter: {}", name)
            }
            DefinitionError::DuplicateClosureSlot(name) => {
                write!(f, "Duplicate closure slot: {}", name)
            }
            DefinitionError::TooManyParameters { count, max } => {
                write!(f, "Too many parameters: {} (max {})", count, max)
            }
            DefinitionError::UnknownParameter(idx) => write!(f, "Unknown parameter index: {}", idx),
            DefinitionError::UnknownLocal(idx) => write!(f, "Unknown local index: {}", idx),
            DefinitionError::UnknownClosureSlot(idx) => {
                write!(f, "Unknown closure slot index: {}", idx)
            }
            DefinitionError::MissingClosure { expected } => {
                write!(f, "Missing closure: function captures {} variables", expected)
            }
            DefinitionError::UnexpectedClosure { got } => {
                write!(f, "Unexpected closure with {} cells: function captures nothing", got)
            }
            DefinitionError::ClosureArityMismatch { expected, got } => {
                write!(f, "Closure arity mismatch: expected {} cells, got {}", expected, got)
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

// =============================================================================
// CompileError
// =============================================================================

/// The native compiler could not produce code for a body
#[derive(Debug, Clone, PartialEq)]
pub enum CompileError {
    /// Body uses something the compiler does not support
    Unsupported(String),

    /// Code generation failed
    Codegen(String),

    /// The code generator panicked
    Panicked(String),

    /// Compiler produced an entry point of a different shape than requested
    UnexpectedShape {
        expected: NativeShape,
        got: NativeShape,
    },
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Unsupported(msg) => write!(f, "Not compilable: {}", msg),
            CompileError::Codegen(msg) => write!(f, "Compilation error: {}", msg),
            CompileError::Panicked(msg) => write!(f, "Compiler panicked: {}", msg),
            CompileError::UnexpectedShape { expected, got } => {
                write!(f, "Compiler produced shape {} but {} was requested", got, expected)
            }
        }
    }
}

impl std::error::Error for CompileError {}

/// Result type for native compilation
pub type CompileResult<T> = Result<T, CompileError>;

// =============================================================================
// SignatureMismatch
// =============================================================================

/// Internal defect: the adaptation machinery received a native entry point
/// whose shape cannot serve the declared signature.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureMismatch {
    /// Declared signature, rendered
    pub signature: String,
    /// Shape that was actually produced
    pub got: NativeShape,
}

impl fmt::Display for SignatureMismatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Signature mismatch: native shape {} cannot serve {}",
            self.got, self.signature
        )
    }
}

impl std::error::Error for SignatureMismatch {}

// =============================================================================
// TierError
// =============================================================================

/// Error returned when producing a callable handle
#[derive(Debug, Clone, PartialEq)]
pub enum TierError {
    /// The definition or closure binding is malformed
    Definition(DefinitionError),

    /// A synchronous compilation forced by the caller failed
    Compile(CompileError),
}

impl fmt::Display for TierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TierError::Definition(e) => write!(f, "{}", e),
            TierError::Compile(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for TierError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TierError::Definition(e) => Some(e),
            TierError::Compile(e) => Some(e),
        }
    }
}

impl From<DefinitionError> for TierError {
    fn from(e: DefinitionError) -> Self {
        TierError::Definition(e)
    }
}

impl From<CompileError> for TierError {
    fn from(e: CompileError) -> Self {
        TierError::Compile(e)
    }
}
