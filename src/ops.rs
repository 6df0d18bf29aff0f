//! The primitive operator registry.
//!
//! Each primitive declares its ports as templates: a shape pattern over
//! per-instance dimension symbols plus a type upper bound. Instantiating a
//! template freshens the symbols, so every vertex gets its own dim classes
//! which connections then unify. The op set is a closed enum; adding a
//! primitive means adding a tag and its template row.

use smallvec::SmallVec;

use crate::shape::{DimAtom, ShapeTerm};
use crate::symbol::SymbolTable;
use crate::typeset::{ScalarSet, ScalarType, TypeSet};

/// Tag identifying a primitive operator.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum OpKind {
    Relu,
    Sigmoid,
    Tanh,
    LeakyRelu,
    Buffer,
    Add,
    Multiply,
    Linear,
    RbfKernel,
}

impl OpKind {
    /// The operator name as it appears in graph descriptions and summaries.
    pub fn name(self) -> &'static str {
        match self {
            OpKind::Relu => "Relu",
            OpKind::Sigmoid => "Sigmoid",
            OpKind::Tanh => "Tanh",
            OpKind::LeakyRelu => "LeakyRelu",
            OpKind::Buffer => "Buffer",
            OpKind::Add => "Add",
            OpKind::Multiply => "Multiply",
            OpKind::Linear => "Linear",
            OpKind::RbfKernel => "RBFKernel",
        }
    }

    pub fn from_name(name: &str) -> Option<OpKind> {
        match name {
            "Relu" => Some(OpKind::Relu),
            "Sigmoid" => Some(OpKind::Sigmoid),
            "Tanh" => Some(OpKind::Tanh),
            "LeakyRelu" => Some(OpKind::LeakyRelu),
            "Buffer" => Some(OpKind::Buffer),
            "Add" => Some(OpKind::Add),
            "Multiply" => Some(OpKind::Multiply),
            "Linear" => Some(OpKind::Linear),
            "RBFKernel" => Some(OpKind::RbfKernel),
            _ => None,
        }
    }
}

/// Whether a port consumes or produces a value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Role {
    Input,
    Output,
}

/// Shape pattern in a port template. `Sym` indexes the instance's symbol
/// table; equal indices share a dim class. `Variadic` ports of one instance
/// share a single sequence variable.
#[derive(Copy, Clone, Debug)]
enum TemplateShape {
    Scalar,
    Dims(&'static [TemplateDim]),
    Variadic,
}

#[derive(Copy, Clone, Debug)]
enum TemplateDim {
    Fixed(usize),
    Sym(u8),
}

#[derive(Copy, Clone, Debug)]
enum TemplateType {
    /// A tensor of any element type.
    AnyTensor,
    /// A float tensor.
    FloatTensor,
    /// A bare float scalar.
    FloatScalar,
}

impl TemplateType {
    fn type_set(self) -> TypeSet {
        match self {
            TemplateType::AnyTensor => TypeSet::tensor(ScalarSet::ALL),
            TemplateType::FloatTensor => TypeSet::tensor(ScalarSet::single(ScalarType::Float)),
            TemplateType::FloatScalar => TypeSet::scalar(ScalarSet::single(ScalarType::Float)),
        }
    }
}

struct PortTemplate {
    name: &'static str,
    role: Role,
    shape: TemplateShape,
    ty: TemplateType,
    /// Ports of one instance with equal group ids share one element type,
    /// the `T` of rules like `Add(left: T, right: T) -> output: T`.
    ty_group: u8,
}

const fn input(
    name: &'static str,
    shape: TemplateShape,
    ty: TemplateType,
    ty_group: u8,
) -> PortTemplate {
    PortTemplate {
        name,
        role: Role::Input,
        shape,
        ty,
        ty_group,
    }
}

const fn output(
    name: &'static str,
    shape: TemplateShape,
    ty: TemplateType,
    ty_group: u8,
) -> PortTemplate {
    PortTemplate {
        name,
        role: Role::Output,
        shape,
        ty,
        ty_group,
    }
}

use TemplateDim::{Fixed, Sym};
use TemplateShape::{Dims, Scalar, Variadic};
use TemplateType::{AnyTensor, FloatScalar, FloatTensor};

/// `input: T[...] -> output: T[...]`
const UNARY: &[PortTemplate] = &[
    input("input", Variadic, AnyTensor, 0),
    output("output", Variadic, AnyTensor, 0),
];

const LEAKY_RELU: &[PortTemplate] = &[
    input("input", Variadic, AnyTensor, 0),
    input("slope", Scalar, FloatScalar, 1),
    output("output", Variadic, AnyTensor, 0),
];

/// `left: T[...], right: T[...] -> output: T[...]` with shape equality.
const BINARY: &[PortTemplate] = &[
    input("left", Variadic, AnyTensor, 0),
    input("right", Variadic, AnyTensor, 0),
    output("output", Variadic, AnyTensor, 0),
];

/// `weight: [o, i], input: [b, i], bias: [o] -> output: [b, o]`
const LINEAR: &[PortTemplate] = &[
    input("weight", Dims(&[Sym(0), Sym(1)]), FloatTensor, 0),
    input("input", Dims(&[Sym(2), Sym(1)]), FloatTensor, 1),
    input("bias", Dims(&[Sym(0)]), FloatTensor, 2),
    output("output", Dims(&[Sym(2), Sym(0)]), FloatTensor, 3),
];

/// `input1: [n, d], input2: [m, d], sigma: [1], l_scale: [1]
///  -> output: [n, m]`
const RBF_KERNEL: &[PortTemplate] = &[
    input("input1", Dims(&[Sym(0), Sym(1)]), FloatTensor, 0),
    input("input2", Dims(&[Sym(2), Sym(1)]), FloatTensor, 1),
    input("sigma", Dims(&[Fixed(1)]), FloatTensor, 2),
    input("l_scale", Dims(&[Fixed(1)]), FloatTensor, 3),
    output("output", Dims(&[Sym(0), Sym(2)]), FloatTensor, 4),
];

fn templates(kind: OpKind) -> &'static [PortTemplate] {
    match kind {
        OpKind::Relu | OpKind::Sigmoid | OpKind::Tanh | OpKind::Buffer => UNARY,
        OpKind::LeakyRelu => LEAKY_RELU,
        OpKind::Add | OpKind::Multiply => BINARY,
        OpKind::Linear => LINEAR,
        OpKind::RbfKernel => RBF_KERNEL,
    }
}

/// An instantiated port of a primitive vertex.
#[derive(Clone, Debug)]
pub struct PortDef {
    pub name: &'static str,
    pub role: Role,
    pub shape: ShapeTerm,
    pub ty: TypeSet,
    /// Ports of one instance with the same group share an element type.
    pub ty_group: u8,
}

/// Instantiate the ports of `kind`, allocating fresh dim and sequence
/// variables from `symtab`.
pub fn instantiate(kind: OpKind, symtab: &mut SymbolTable) -> SmallVec<[PortDef; 5]> {
    let mut seq = None;
    let mut syms: [Option<crate::symbol::DimVarId>; 4] = [None; 4];

    templates(kind)
        .iter()
        .map(|tpl| {
            let shape = match tpl.shape {
                Scalar => ShapeTerm::Scalar,
                Variadic => {
                    let seq = *seq.get_or_insert_with(|| symtab.fresh_seq_var());
                    ShapeTerm::variadic(seq)
                }
                Dims(dims) => ShapeTerm::ranked(dims.iter().map(|d| match d {
                    Fixed(n) => DimAtom::Fixed(*n),
                    Sym(i) => DimAtom::Var(
                        *syms[*i as usize].get_or_insert_with(|| symtab.fresh_dim_var()),
                    ),
                })),
            };
            PortDef {
                name: tpl.name,
                role: tpl.role,
                shape,
                ty: tpl.ty.type_set(),
                ty_group: tpl.ty_group,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::{instantiate, OpKind, Role};
    use crate::shape::{DimAtom, ShapeTerm};
    use crate::solver::DimSolver;
    use crate::symbol::SymbolTable;

    #[test]
    fn test_op_names_round_trip() {
        let kinds = [
            OpKind::Relu,
            OpKind::Sigmoid,
            OpKind::Tanh,
            OpKind::LeakyRelu,
            OpKind::Buffer,
            OpKind::Add,
            OpKind::Multiply,
            OpKind::Linear,
            OpKind::RbfKernel,
        ];
        for kind in kinds {
            assert_eq!(OpKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(OpKind::from_name("Conv"), None);
    }

    #[test]
    fn test_unary_ports_share_shape() {
        let mut symtab = SymbolTable::new();
        let mut solver = DimSolver::new();
        let ports = instantiate(OpKind::Relu, &mut symtab);

        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "input");
        assert_eq!(ports[1].role, Role::Output);

        // Fixing the input rank fixes the output.
        solver
            .unify(&ports[0].shape, &ShapeTerm::fixed(&[4, 2]))
            .unwrap();
        assert_eq!(solver.resolve(&ports[1].shape), ShapeTerm::fixed(&[4, 2]));
    }

    #[test]
    fn test_linear_template_propagates_dims() {
        let mut symtab = SymbolTable::new();
        let mut solver = DimSolver::new();
        let ports = instantiate(OpKind::Linear, &mut symtab);

        let weight = &ports[0];
        let input = &ports[1];
        let bias = &ports[2];
        let out = &ports[3];

        solver.unify(&weight.shape, &ShapeTerm::fixed(&[3, 5])).unwrap();
        solver
            .unify(&input.shape, &ShapeTerm::fixed(&[8, 5]))
            .unwrap();

        assert_eq!(solver.resolve(&bias.shape), ShapeTerm::fixed(&[3]));
        assert_eq!(solver.resolve(&out.shape), ShapeTerm::fixed(&[8, 3]));
    }

    #[test]
    fn test_instances_do_not_share_symbols() {
        let mut symtab = SymbolTable::new();
        let mut solver = DimSolver::new();
        let a = instantiate(OpKind::Linear, &mut symtab);
        let b = instantiate(OpKind::Linear, &mut symtab);

        solver.unify(&a[0].shape, &ShapeTerm::fixed(&[3, 5])).unwrap();
        // The second instance's weight is untouched.
        let resolved = solver.resolve(&b[0].shape);
        match resolved {
            ShapeTerm::Ranked(dims) => {
                assert!(dims.iter().all(|d| matches!(d, DimAtom::Var(_))))
            }
            other => panic!("unexpected shape {:?}", other),
        }
    }

    #[test]
    fn test_rbf_kernel_output_dims() {
        let mut symtab = SymbolTable::new();
        let mut solver = DimSolver::new();
        let ports = instantiate(OpKind::RbfKernel, &mut symtab);

        solver
            .unify(&ports[0].shape, &ShapeTerm::fixed(&[10, 4]))
            .unwrap();
        solver
            .unify(&ports[1].shape, &ShapeTerm::fixed(&[7, 4]))
            .unwrap();
        assert_eq!(solver.resolve(&ports[4].shape), ShapeTerm::fixed(&[10, 7]));
        assert_eq!(solver.resolve(&ports[2].shape), ShapeTerm::fixed(&[1]));
    }
}
