//! Symbolic shape, type and staticness inference for hierarchical operator
//! graphs.
//!
//! # About
//!
//! Users declare *models*: directed graphs whose vertices are either
//! primitive operators (`Relu`, `Add`, `Linear`, `RBFKernel`, …) or nested
//! sub-models, with vertex ports wired by name. Without executing any
//! numeric computation, the engine infers for every port:
//!
//! 1. its tensor **shape**, a sequence of concrete sizes and symbolic
//!    dimension variables unified across connected ports;
//! 2. its value **type**, from a lattice of scalar and tensor types with
//!    union refinement;
//! 3. its **staticness**: whether the value is determined at graph-build
//!    time or must be supplied at runtime.
//!
//! Models come from the JSON description format ([`desc::parse`]) or the
//! [`Composite`] builder API. A successful [`infer`] run yields an
//! [`Inferred`] graph exposing per-port results, the set of static keys and
//! the hierarchical summary tables.
//!
//! ```
//! use symgraph::{infer, Composite, OpKind};
//!
//! let mut model = Composite::new("Model");
//! model
//!     .add_primitive("m1", OpKind::Relu)
//!     .connect_external("m1", "input", "input1")
//!     .connect_external("m1", "output", "output1")
//!     .expose(&["input1", "output1"])
//!     .set_static_input_shape("input1", &[8, 16]);
//!
//! let inferred = infer(&model).unwrap();
//! assert_eq!(inferred.port("m1.output").unwrap().shape, "[8, 16]");
//! assert_eq!(inferred.static_keys(), ["output1"]);
//! ```

mod graph;
mod infer;
mod ops;
mod shape;
mod solver;
mod summary;
mod symbol;
mod typeset;

pub mod desc;

pub use graph::{Composite, ConnSpec, Literal, VertexDef};
pub use infer::{infer, infer_with_options, InferError, InferErrorKind, InferOptions, Inferred, PortView};
pub use ops::{OpKind, Role};
pub use shape::{DimAtom, ShapeTerm};
pub use solver::{DimNamer, DimSolver, UnifyError};
pub use symbol::{DimVarId, KeyId, SeqVarId, SymbolTable};
pub use typeset::{ScalarSet, ScalarType, TypeSet};

#[cfg(test)]
mod test_util;
