//! Closure environment: captured-variable slots and their storage cells.
//!
//! A [`ClosureSlot`] is the declared identity of a captured variable inside a
//! function definition. A [`ClosureBinding`] assigns one [`ClosureCell`] to
//! each slot for a particular activation of the enclosing scope. Cells are
//! independently allocated and reference-counted: the defining scope and
//! every callable created from it share them.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::backend::models::Value;

/// Declared identity of a captured variable
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClosureSlot {
    name: Arc<str>,
}

impl ClosureSlot {
    pub fn new(name: impl AsRef<str>) -> Self {
        ClosureSlot {
            name: Arc::from(name.as_ref()),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Storage cell for one captured variable
///
/// Cloning a cell shares it; writes through any clone are visible to all.
#[derive(Clone, Default)]
pub struct ClosureCell(Arc<RwLock<Value>>);

impl ClosureCell {
    pub fn new(value: Value) -> Self {
        ClosureCell(Arc::new(RwLock::new(value)))
    }

    /// Read the current contents
    #[inline]
    pub fn get(&self) -> Value {
        self.0.read().clone()
    }

    /// Overwrite the contents
    #[inline]
    pub fn set(&self, value: Value) {
        *self.0.write() = value;
    }

    /// Check if two cells are the same storage
    #[inline]
    pub fn ptr_eq(&self, other: &ClosureCell) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ClosureCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClosureCell").field(&*self.0.read()).finish()
    }
}

/// Concrete cells for a definition's closure slots, in slot order
///
/// Cheap to clone; clones share the same cells.
#[derive(Clone, Debug)]
pub struct ClosureBinding {
    cells: Arc<[ClosureCell]>,
}

impl ClosureBinding {
    /// Bind existing cells (shared with whoever else holds them)
    pub fn new(cells: Vec<ClosureCell>) -> Self {
        ClosureBinding {
            cells: cells.into(),
        }
    }

    /// Allocate fresh cells holding the given initial values
    pub fn from_values(values: impl IntoIterator<Item = Value>) -> Self {
        Self::new(values.into_iter().map(ClosureCell::new).collect())
    }

    /// Get the cell bound to a slot index
    #[inline]
    pub fn cell(&self, index: usize) -> Option<&ClosureCell> {
        self.cells.get(index)
    }

    /// All cells in slot order
    #[inline]
    pub fn cells(&self) -> &[ClosureCell] {
        &self.cells
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
