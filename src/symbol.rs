//! Interned identifiers for port keys and symbolic dimensions.

use std::num::NonZero;

use rustc_hash::FxHashMap;

/// ID of an interned port key or external key name.
///
/// Key IDs are u32 values. Internally the value is stored offset by one so
/// that `Option<KeyId>` is the same size as `KeyId`.
#[derive(Copy, Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct KeyId(NonZero<u32>);

impl KeyId {
    /// Return the underlying u32 value of the ID.
    pub fn as_u32(self) -> u32 {
        self.0.get() - 1
    }

    /// Return the underlying ID value as a usize, for slice indexing.
    pub fn as_usize(self) -> usize {
        self.as_u32() as usize
    }

    fn from_u32(value: u32) -> KeyId {
        assert!(value < u32::MAX);
        KeyId(unsafe {
            // Safety: `value + 1` cannot be zero
            NonZero::new_unchecked(value + 1)
        })
    }
}

impl std::fmt::Debug for KeyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyId({})", self.as_u32())
    }
}

/// ID of a symbolic dimension variable.
///
/// Dim vars have no intrinsic name. They print as `u1`, `u2`, … with numbers
/// assigned in first-seen order when a graph is finalized or rendered.
#[derive(Copy, Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct DimVarId(pub(crate) u32);

impl DimVarId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// ID of a variadic dimension-sequence variable (the `...` prefix in a shape
/// template).
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct SeqVarId(pub(crate) u32);

impl SeqVarId {
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

/// Interner for key names plus the allocator for dim and sequence variables.
///
/// Key interning is idempotent: interning the same name twice returns the
/// same ID. Dim-var and seq-var allocation is monotonic; IDs are never
/// reused within one table.
#[derive(Default)]
pub struct SymbolTable {
    names: Vec<String>,
    ids: FxHashMap<String, KeyId>,
    next_dim: u32,
    next_seq: u32,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// Intern `name`, returning the existing ID if it was interned before.
    pub fn intern_key(&mut self, name: &str) -> KeyId {
        if let Some(id) = self.ids.get(name) {
            return *id;
        }
        let id = KeyId::from_u32(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }

    /// Return the textual name of an interned key.
    pub fn name_of(&self, id: KeyId) -> &str {
        &self.names[id.as_usize()]
    }

    /// Allocate a fresh dimension variable.
    pub fn fresh_dim_var(&mut self) -> DimVarId {
        let id = DimVarId(self.next_dim);
        self.next_dim += 1;
        id
    }

    /// Allocate a fresh variadic sequence variable.
    pub fn fresh_seq_var(&mut self) -> SeqVarId {
        let id = SeqVarId(self.next_seq);
        self.next_seq += 1;
        id
    }

    /// Number of dim vars allocated so far.
    pub fn dim_var_count(&self) -> usize {
        self.next_dim as usize
    }
}
