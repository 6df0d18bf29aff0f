//! Symbolic tensor shapes.
//!
//! A shape term is an ordered sequence of dimension atoms, each either a
//! concrete size or a symbolic variable resolved by the
//! [`DimSolver`](crate::solver::DimSolver). Two markers extend plain ranked
//! shapes: the scalar shape (displayed `--`) and a variadic prefix
//! (displayed `...`) that binds to the leading dimensions of whatever shape
//! it is unified with.

use smallvec::SmallVec;

use crate::symbol::{DimVarId, SeqVarId};

/// One dimension of a shape: a fixed size or a symbolic variable.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DimAtom {
    /// A dimension with a known size.
    Fixed(usize),

    /// A dimension whose size is a solver variable.
    Var(DimVarId),
}

pub(crate) type DimVec = SmallVec<[DimAtom; 4]>;

/// A symbolic shape.
#[derive(Clone, Debug, PartialEq)]
pub enum ShapeTerm {
    /// The shape of a scalar value. Distinct from a rank-1 shape `[1]`.
    Scalar,

    /// A shape of known rank.
    Ranked(DimVec),

    /// A shape with an unknown number of leading dimensions followed by a
    /// fixed suffix. The prefix binds to a non-empty dimension sequence once
    /// the solver learns the full rank.
    Variadic { seq: SeqVarId, suffix: DimVec },
}

impl ShapeTerm {
    pub fn scalar() -> ShapeTerm {
        ShapeTerm::Scalar
    }

    pub fn ranked<I: IntoIterator<Item = DimAtom>>(dims: I) -> ShapeTerm {
        ShapeTerm::Ranked(dims.into_iter().collect())
    }

    /// Build a shape with only fixed dimensions.
    pub fn fixed(dims: &[usize]) -> ShapeTerm {
        ShapeTerm::Ranked(dims.iter().copied().map(DimAtom::Fixed).collect())
    }

    pub fn variadic(seq: SeqVarId) -> ShapeTerm {
        ShapeTerm::Variadic {
            seq,
            suffix: SmallVec::new(),
        }
    }

    /// The rank, if this term has a known one.
    pub fn rank(&self) -> Option<usize> {
        match self {
            ShapeTerm::Scalar => Some(0),
            ShapeTerm::Ranked(dims) => Some(dims.len()),
            ShapeTerm::Variadic { .. } => None,
        }
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, ShapeTerm::Scalar)
    }
}
