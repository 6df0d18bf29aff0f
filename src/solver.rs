//! Equivalence-class solver for symbolic dimensions.
//!
//! The solver maintains a union-find over dim vars with an optional concrete
//! size per class, plus bindings for variadic sequence variables. It is an
//! explicit context owned by a single inference run; nothing here is global.

use rustc_hash::FxHashMap;

use crate::shape::{DimAtom, DimVec, ShapeTerm};
use crate::symbol::{DimVarId, SeqVarId};

/// Failure while unifying two shape terms.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum UnifyError {
    /// The two terms have different ranks. For a variadic term the reported
    /// rank is the minimum rank it can take.
    RankMismatch { left: usize, right: usize },

    /// Two concrete dimensions with different sizes were unified.
    DimMismatch { left: usize, right: usize },
}

/// Union-find over dimension variables.
#[derive(Default)]
pub struct DimSolver {
    parent: Vec<u32>,
    value: Vec<Option<usize>>,
    seq_parent: Vec<u32>,
    seq_binding: Vec<Option<DimVec>>,
}

impl DimSolver {
    pub fn new() -> DimSolver {
        DimSolver::default()
    }

    fn ensure_var(&mut self, var: DimVarId) {
        let idx = var.as_usize();
        while self.parent.len() <= idx {
            self.parent.push(self.parent.len() as u32);
            self.value.push(None);
        }
    }

    fn ensure_seq(&mut self, seq: SeqVarId) {
        let idx = seq.as_usize();
        while self.seq_parent.len() <= idx {
            self.seq_parent.push(self.seq_parent.len() as u32);
            self.seq_binding.push(None);
        }
    }

    /// Return the representative of `var`'s class, with path halving.
    pub fn find(&mut self, var: DimVarId) -> DimVarId {
        self.ensure_var(var);
        let mut v = var.as_usize();
        while self.parent[v] as usize != v {
            let grandparent = self.parent[self.parent[v] as usize];
            self.parent[v] = grandparent;
            v = grandparent as usize;
        }
        DimVarId(v as u32)
    }

    fn find_seq(&mut self, seq: SeqVarId) -> SeqVarId {
        self.ensure_seq(seq);
        let mut s = seq.as_usize();
        while self.seq_parent[s] as usize != s {
            let grandparent = self.seq_parent[self.seq_parent[s] as usize];
            self.seq_parent[s] = grandparent;
            s = grandparent as usize;
        }
        SeqVarId(s as u32)
    }

    /// The concrete size bound to `var`'s class, if any.
    pub fn value_of(&mut self, var: DimVarId) -> Option<usize> {
        let root = self.find(var);
        self.value[root.as_usize()]
    }

    /// Constrain `var`'s class to the concrete size `size`.
    pub fn bind(&mut self, var: DimVarId, size: usize) -> Result<bool, UnifyError> {
        let root = self.find(var);
        match self.value[root.as_usize()] {
            None => {
                self.value[root.as_usize()] = Some(size);
                Ok(true)
            }
            Some(existing) if existing == size => Ok(false),
            Some(existing) => Err(UnifyError::DimMismatch {
                left: existing,
                right: size,
            }),
        }
    }

    /// Resolve an atom to its class representative, or to a fixed size if the
    /// class has one.
    pub fn resolve_atom(&mut self, atom: DimAtom) -> DimAtom {
        match atom {
            DimAtom::Fixed(n) => DimAtom::Fixed(n),
            DimAtom::Var(v) => {
                let root = self.find(v);
                match self.value[root.as_usize()] {
                    Some(n) => DimAtom::Fixed(n),
                    None => DimAtom::Var(root),
                }
            }
        }
    }

    /// Unify two atoms. Returns whether the solver state changed.
    pub fn unify_atoms(&mut self, a: DimAtom, b: DimAtom) -> Result<bool, UnifyError> {
        let a = self.resolve_atom(a);
        let b = self.resolve_atom(b);
        match (a, b) {
            (DimAtom::Fixed(x), DimAtom::Fixed(y)) => {
                if x == y {
                    Ok(false)
                } else {
                    Err(UnifyError::DimMismatch { left: x, right: y })
                }
            }
            (DimAtom::Var(v), DimAtom::Fixed(n)) | (DimAtom::Fixed(n), DimAtom::Var(v)) => {
                self.bind(v, n)
            }
            (DimAtom::Var(x), DimAtom::Var(y)) => {
                if x == y {
                    Ok(false)
                } else {
                    // Both are unbound roots after resolution; keep the lower
                    // id as representative so results do not depend on
                    // argument order.
                    let (keep, merge) = if x < y { (x, y) } else { (y, x) };
                    self.parent[merge.as_usize()] = keep.0;
                    Ok(true)
                }
            }
        }
    }

    /// Substitute bound sequence variables and resolve every atom in `term`.
    pub fn resolve(&mut self, term: &ShapeTerm) -> ShapeTerm {
        match term {
            ShapeTerm::Scalar => ShapeTerm::Scalar,
            ShapeTerm::Ranked(dims) => {
                ShapeTerm::Ranked(dims.iter().map(|d| self.resolve_atom(*d)).collect())
            }
            ShapeTerm::Variadic { seq, suffix } => {
                let root = self.find_seq(*seq);
                if let Some(prefix) = self.seq_binding[root.as_usize()].clone() {
                    let dims: DimVec = prefix
                        .iter()
                        .chain(suffix.iter())
                        .map(|d| self.resolve_atom(*d))
                        .collect();
                    ShapeTerm::Ranked(dims)
                } else {
                    ShapeTerm::Variadic {
                        seq: root,
                        suffix: suffix.iter().map(|d| self.resolve_atom(*d)).collect(),
                    }
                }
            }
        }
    }

    /// Unify two shape terms, merging dim classes and binding variadic
    /// prefixes as needed. Returns whether the solver state changed.
    pub fn unify(&mut self, a: &ShapeTerm, b: &ShapeTerm) -> Result<bool, UnifyError> {
        let a = self.resolve(a);
        let b = self.resolve(b);

        match (&a, &b) {
            (ShapeTerm::Scalar, ShapeTerm::Scalar) => Ok(false),

            (ShapeTerm::Ranked(x), ShapeTerm::Ranked(y)) => {
                if x.len() != y.len() {
                    return Err(UnifyError::RankMismatch {
                        left: x.len(),
                        right: y.len(),
                    });
                }
                let mut changed = false;
                for (da, db) in x.iter().zip(y.iter()) {
                    changed |= self.unify_atoms(*da, *db)?;
                }
                Ok(changed)
            }

            (ShapeTerm::Scalar, ShapeTerm::Ranked(dims)) => Err(UnifyError::RankMismatch {
                left: 0,
                right: dims.len(),
            }),
            (ShapeTerm::Ranked(dims), ShapeTerm::Scalar) => Err(UnifyError::RankMismatch {
                left: dims.len(),
                right: 0,
            }),

            (ShapeTerm::Variadic { seq, suffix }, ShapeTerm::Ranked(dims)) => {
                self.bind_variadic(*seq, suffix, dims)
            }
            (ShapeTerm::Ranked(dims), ShapeTerm::Variadic { seq, suffix }) => {
                self.bind_variadic(*seq, suffix, dims)
            }

            (ShapeTerm::Variadic { suffix, .. }, ShapeTerm::Scalar) => {
                Err(UnifyError::RankMismatch {
                    left: suffix.len() + 1,
                    right: 0,
                })
            }
            (ShapeTerm::Scalar, ShapeTerm::Variadic { suffix, .. }) => {
                Err(UnifyError::RankMismatch {
                    left: 0,
                    right: suffix.len() + 1,
                })
            }

            (
                ShapeTerm::Variadic {
                    seq: sa,
                    suffix: xa,
                },
                ShapeTerm::Variadic {
                    seq: sb,
                    suffix: xb,
                },
            ) => {
                let mut changed = false;
                // Unify the overlapping tail of the suffixes.
                let overlap = xa.len().min(xb.len());
                for (da, db) in xa[xa.len() - overlap..]
                    .iter()
                    .zip(xb[xb.len() - overlap..].iter())
                {
                    changed |= self.unify_atoms(*da, *db)?;
                }
                if xa.len() == xb.len() {
                    let ra = self.find_seq(*sa);
                    let rb = self.find_seq(*sb);
                    if ra != rb {
                        let (keep, merge) = if ra.as_usize() < rb.as_usize() {
                            (ra, rb)
                        } else {
                            (rb, ra)
                        };
                        self.seq_parent[merge.as_usize()] = keep.0;
                        changed = true;
                    }
                }
                // Suffixes of different length leave the relation between the
                // two prefixes underdetermined; later rank information
                // resolves it through the ranked case.
                Ok(changed)
            }
        }
    }

    fn bind_variadic(
        &mut self,
        seq: SeqVarId,
        suffix: &[DimAtom],
        dims: &[DimAtom],
    ) -> Result<bool, UnifyError> {
        // The prefix must bind to at least one dimension.
        if dims.len() < suffix.len() + 1 {
            return Err(UnifyError::RankMismatch {
                left: suffix.len() + 1,
                right: dims.len(),
            });
        }
        let split = dims.len() - suffix.len();
        let mut changed = false;
        for (da, db) in suffix.iter().zip(dims[split..].iter()) {
            changed |= self.unify_atoms(*da, *db)?;
        }
        let prefix: DimVec = dims[..split].iter().copied().collect();
        let root = self.find_seq(seq);
        self.seq_binding[root.as_usize()] = Some(prefix);
        Ok(true)
    }
}

/// Assigns canonical `uN` labels to unbound dimension classes in first-seen
/// order.
///
/// One namer is shared across everything rendered together so that the same
/// class gets the same label in every table; a fresh namer restarts the
/// numbering at `u1`.
#[derive(Default)]
pub struct DimNamer {
    names: FxHashMap<u32, usize>,
}

impl DimNamer {
    pub fn new() -> DimNamer {
        DimNamer::default()
    }

    /// Text for a single atom: its concrete size if the class has one, else
    /// the class's `uN` label.
    pub fn atom_text(&mut self, solver: &mut DimSolver, atom: DimAtom) -> String {
        match solver.resolve_atom(atom) {
            DimAtom::Fixed(n) => n.to_string(),
            DimAtom::Var(root) => {
                let next = self.names.len() + 1;
                let index = *self.names.entry(root.0).or_insert(next);
                format!("u{}", index)
            }
        }
    }

    /// The atoms of `term` as display strings. A scalar has no atoms; an
    /// unresolved variadic prefix renders as `...`.
    pub fn term_atoms(&mut self, solver: &mut DimSolver, term: &ShapeTerm) -> Option<Vec<String>> {
        match solver.resolve(term) {
            ShapeTerm::Scalar => None,
            ShapeTerm::Ranked(dims) => Some(
                dims.iter()
                    .map(|d| self.atom_text(solver, *d))
                    .collect(),
            ),
            ShapeTerm::Variadic { suffix, .. } => {
                let mut atoms = vec!["...".to_string()];
                atoms.extend(suffix.iter().map(|d| self.atom_text(solver, *d)));
                Some(atoms)
            }
        }
    }

    /// Render `term` as `[a, b, c]`, or `--` for a scalar.
    pub fn term_text(&mut self, solver: &mut DimSolver, term: &ShapeTerm) -> String {
        match self.term_atoms(solver, term) {
            None => "--".to_string(),
            Some(atoms) => format!("[{}]", atoms.join(", ")),
        }
    }
}
