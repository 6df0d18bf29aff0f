//! Hierarchical model graphs.
//!
//! A [`Composite`] is a named collection of sub-vertices (primitives or
//! nested composites) plus a connections table wiring their ports to each
//! other, to external keys, or to literal values. Composites are plain
//! data: they are built once, frozen, and handed to
//! [`infer`](crate::infer::infer), which owns all mutable solver state.
//!
//! Declaration order is significant everywhere. Submodels and connection
//! entries keep their insertion order, which drives dim-var allocation and
//! summary rendering.

use std::fmt;

use crate::ops::OpKind;
use crate::typeset::{ScalarType, TypeSet};

/// A literal value pinned to a port.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl Literal {
    /// The scalar kind of this literal.
    pub fn scalar_type(&self) -> ScalarType {
        match self {
            Literal::Bool(_) => ScalarType::Bool,
            Literal::Int(_) => ScalarType::Int,
            Literal::Float(_) => ScalarType::Float,
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Bool(v) => write!(f, "{}", v),
            Literal::Int(v) => write!(f, "{}", v),
            Literal::Float(v) => write!(f, "{}", v),
        }
    }
}

/// The facets of one connections-table entry for a single port.
///
/// An entry may carry several at once: an annotated external alias has both
/// `alias` and `ty`; a multi-producer input lists them all in `producers`.
#[derive(Clone, Debug, Default)]
pub struct ConnSpec {
    /// External key at the enclosing scope.
    pub alias: Option<String>,

    /// `(submodel, port)` references this port is connected to.
    pub producers: Vec<(String, String)>,

    /// Literal pin.
    pub literal: Option<Literal>,

    /// Type bound applied before connection.
    pub ty: Option<TypeSet>,
}

impl ConnSpec {
    pub fn alias(key: &str) -> ConnSpec {
        ConnSpec {
            alias: Some(key.to_string()),
            ..ConnSpec::default()
        }
    }

    pub fn literal(value: Literal) -> ConnSpec {
        ConnSpec {
            literal: Some(value),
            ..ConnSpec::default()
        }
    }

    pub fn connect(producers: &[(&str, &str)]) -> ConnSpec {
        ConnSpec {
            producers: producers
                .iter()
                .map(|(s, p)| (s.to_string(), p.to_string()))
                .collect(),
            ..ConnSpec::default()
        }
    }

    /// Add a type bound to this spec.
    pub fn with_type(mut self, ty: TypeSet) -> ConnSpec {
        self.ty = Some(ty);
        self
    }
}

/// A sub-vertex of a composite.
#[derive(Debug)]
pub enum VertexDef {
    Primitive(OpKind),
    Composite(Composite),
}

impl VertexDef {
    /// The display name of the vertex's operator or model.
    pub fn type_name(&self) -> &str {
        match self {
            VertexDef::Primitive(op) => op.name(),
            VertexDef::Composite(model) => model.name(),
        }
    }
}

/// A composite vertex: a nested graph with its own exposed keys.
#[derive(Debug, Default)]
pub struct Composite {
    name: String,
    pub(crate) submodels: Vec<(String, VertexDef)>,
    pub(crate) connections: Vec<(String, String, ConnSpec)>,
    pub(crate) exposed_keys: Option<Vec<String>>,
    pub(crate) static_input_shapes: Vec<(String, Vec<usize>)>,
}

impl Composite {
    pub fn new(name: &str) -> Composite {
        Composite {
            name: name.to_string(),
            ..Composite::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a primitive sub-vertex under the local name `local`.
    pub fn add_primitive(&mut self, local: &str, op: OpKind) -> &mut Self {
        self.submodels
            .push((local.to_string(), VertexDef::Primitive(op)));
        self
    }

    /// Add a nested composite under the local name `local`.
    pub fn add_composite(&mut self, local: &str, inner: Composite) -> &mut Self {
        self.submodels
            .push((local.to_string(), VertexDef::Composite(inner)));
        self
    }

    /// Add a connections-table entry for `submodel.port`.
    pub fn set_conn(&mut self, submodel: &str, port: &str, spec: ConnSpec) -> &mut Self {
        self.connections
            .push((submodel.to_string(), port.to_string(), spec));
        self
    }

    /// Alias `submodel.port` to the external key `key`.
    pub fn connect_external(&mut self, submodel: &str, port: &str, key: &str) -> &mut Self {
        self.set_conn(submodel, port, ConnSpec::alias(key))
    }

    /// Connect `submodel.port` to one or more `(submodel, port)` references.
    pub fn connect(&mut self, submodel: &str, port: &str, refs: &[(&str, &str)]) -> &mut Self {
        self.set_conn(submodel, port, ConnSpec::connect(refs))
    }

    /// Pin `submodel.port` to a literal value.
    pub fn connect_literal(&mut self, submodel: &str, port: &str, value: Literal) -> &mut Self {
        self.set_conn(submodel, port, ConnSpec::literal(value))
    }

    /// Declare the keys promoted to the enclosing scope. Without this, every
    /// alias mentioned in the connections table is exposed.
    pub fn expose(&mut self, keys: &[&str]) -> &mut Self {
        self.exposed_keys = Some(keys.iter().map(|k| k.to_string()).collect());
        self
    }

    /// Declare a concrete shape for an outermost-level key. The dims refine
    /// the key's shape via the solver and seed static propagation.
    pub fn set_static_input_shape(&mut self, key: &str, dims: &[usize]) -> &mut Self {
        self.static_input_shapes
            .push((key.to_string(), dims.to_vec()));
        self
    }
}
