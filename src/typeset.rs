//! The value-type lattice.
//!
//! A type is a set of atoms drawn from the universe `{bool, int, float,
//! Tensor<E>}` where `E` is a non-empty subset of the scalar atoms. The
//! lattice is the powerset ordered by inclusion: `join` is union, `meet` is
//! intersection and the empty set is the error bottom. Since the scalar
//! universe is fixed, sets are bit-packed.

use std::fmt;

/// A scalar value type.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ScalarType {
    Bool,
    Float,
    Int,
}

impl ScalarType {
    fn bit(self) -> u8 {
        match self {
            ScalarType::Bool => 1,
            ScalarType::Float => 2,
            ScalarType::Int => 4,
        }
    }

    /// Display name, also the spelling accepted by the description format.
    pub fn name(self) -> &'static str {
        match self {
            ScalarType::Bool => "bool",
            ScalarType::Float => "float",
            ScalarType::Int => "int",
        }
    }

    pub fn from_name(name: &str) -> Option<ScalarType> {
        match name {
            "bool" => Some(ScalarType::Bool),
            "float" => Some(ScalarType::Float),
            "int" => Some(ScalarType::Int),
            _ => None,
        }
    }
}

/// Canonical display order for scalar atoms.
const CANONICAL: [ScalarType; 3] = [ScalarType::Bool, ScalarType::Float, ScalarType::Int];

/// Bit-packed set of scalar types.
#[derive(Copy, Clone, Default, Eq, Hash, PartialEq)]
pub struct ScalarSet(u8);

impl ScalarSet {
    pub const EMPTY: ScalarSet = ScalarSet(0);
    pub const ALL: ScalarSet = ScalarSet(1 | 2 | 4);

    pub fn single(ty: ScalarType) -> ScalarSet {
        ScalarSet(ty.bit())
    }

    pub fn union(self, other: ScalarSet) -> ScalarSet {
        ScalarSet(self.0 | other.0)
    }

    pub fn intersect(self, other: ScalarSet) -> ScalarSet {
        ScalarSet(self.0 & other.0)
    }

    pub fn contains(self, ty: ScalarType) -> bool {
        self.0 & ty.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterate the members in canonical order (`bool`, `float`, `int`).
    pub fn iter(self) -> impl Iterator<Item = ScalarType> {
        CANONICAL.into_iter().filter(move |ty| self.contains(*ty))
    }
}

impl FromIterator<ScalarType> for ScalarSet {
    fn from_iter<I: IntoIterator<Item = ScalarType>>(iter: I) -> ScalarSet {
        iter.into_iter()
            .fold(ScalarSet::EMPTY, |set, ty| set.union(ScalarSet::single(ty)))
    }
}

impl fmt::Display for ScalarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for ty in self.iter() {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{}", ty.name())?;
            first = false;
        }
        Ok(())
    }
}

impl fmt::Debug for ScalarSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self)
    }
}

/// An element of the type lattice: a set of scalar atoms plus at most one
/// tensor atom carrying its own element-type set.
///
/// An empty `tensor` set means the tensor atom is absent. The all-empty value
/// is the lattice bottom, produced only by a failed `meet`.
#[derive(Copy, Clone, Eq, Hash, PartialEq)]
pub struct TypeSet {
    scalars: ScalarSet,
    tensor: ScalarSet,
}

impl TypeSet {
    /// The top of the lattice: every scalar atom and a tensor of any element
    /// type.
    pub const ANY: TypeSet = TypeSet {
        scalars: ScalarSet::ALL,
        tensor: ScalarSet::ALL,
    };

    /// The bottom of the lattice.
    pub const NONE: TypeSet = TypeSet {
        scalars: ScalarSet::EMPTY,
        tensor: ScalarSet::EMPTY,
    };

    /// A set of scalar atoms with no tensor atom.
    pub fn scalar(set: ScalarSet) -> TypeSet {
        TypeSet {
            scalars: set,
            tensor: ScalarSet::EMPTY,
        }
    }

    /// A single tensor atom with the given element types.
    pub fn tensor(elems: ScalarSet) -> TypeSet {
        TypeSet {
            scalars: ScalarSet::EMPTY,
            tensor: elems,
        }
    }

    /// Atoms for a value of scalar kind `ty` that may be either a bare scalar
    /// or a tensor of that element type. This is the bound contributed by a
    /// literal pin.
    pub fn scalar_or_tensor(ty: ScalarType) -> TypeSet {
        TypeSet {
            scalars: ScalarSet::single(ty),
            tensor: ScalarSet::single(ty),
        }
    }

    /// Least upper bound: set union.
    pub fn join(self, other: TypeSet) -> TypeSet {
        TypeSet {
            scalars: self.scalars.union(other.scalars),
            tensor: self.tensor.union(other.tensor),
        }
    }

    /// Greatest lower bound: set intersection. Two tensor atoms meet by
    /// intersecting their element sets; the atom vanishes when that
    /// intersection is empty.
    pub fn meet(self, other: TypeSet) -> TypeSet {
        TypeSet {
            scalars: self.scalars.intersect(other.scalars),
            tensor: self.tensor.intersect(other.tensor),
        }
    }

    pub fn is_empty(self) -> bool {
        self.scalars.is_empty() && self.tensor.is_empty()
    }

    /// The scalar atoms in this set.
    pub fn scalar_part(self) -> ScalarSet {
        self.scalars
    }

    /// The tensor atom's element set; empty when the atom is absent.
    pub fn tensor_part(self) -> ScalarSet {
        self.tensor
    }
}

impl fmt::Display for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "(none)");
        }
        write!(f, "{}", self.scalars)?;
        if !self.tensor.is_empty() {
            if !self.scalars.is_empty() {
                write!(f, " | ")?;
            }
            write!(f, "Tensor[{}]", self.tensor)?;
        }
        Ok(())
    }
}

impl fmt::Debug for TypeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}
