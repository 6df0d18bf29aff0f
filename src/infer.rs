//! The inference driver.
//!
//! Inference lowers a [`Composite`] tree into a flat arena of primitive
//! vertices and ports. Ports that connections, aliases and exposure rules
//! identify are merged into shared *port classes*: a class holds one value,
//! so its members agree on shape, element type, any literal pin and
//! staticness. Element types additionally flow through the per-operator
//! type groups (the shared `T` of a rule like `Add(left: T, right: T) ->
//! output: T`), which get their own union-find since they cross value
//! boundaries.
//!
//! Merging is eager: unifying shapes in the [`DimSolver`] and meeting types
//! at merge time reaches the constraint fixpoint in a single lowering pass.
//! The union-find only ever shrinks the class count and the type lattice
//! only ever descends, which keeps the result order-independent.
//!
//! After lowering, the driver checks the producer/consumer relation for
//! cycles, propagates staticness to its least fixpoint and finalizes every
//! port's `(shape, type, connection label)` triple with canonical `uN` dim
//! names assigned in preorder.

use std::error::Error;
use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::graph::{Composite, Literal, VertexDef};
use crate::ops::{self, OpKind, Role};
use crate::shape::ShapeTerm;
use crate::solver::{DimNamer, DimSolver, UnifyError};
use crate::symbol::{KeyId, SymbolTable};
use crate::typeset::TypeSet;

/// Categories of inference failure.
///
/// Every error is fatal for the run; no partial results are produced.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InferErrorKind {
    /// Two shape terms with different ranks were unified. For a variadic
    /// term the reported rank is the minimum rank it can take.
    RankMismatch {
        left_port: String,
        right_port: String,
        left: usize,
        right: usize,
    },

    /// Two concrete dimensions with different sizes were unified.
    DimMismatch {
        left_port: String,
        right_port: String,
        left: usize,
        right: usize,
    },

    /// The meet of two types is empty, or two different literals were pinned
    /// to the same value.
    TypeConflict {
        left_port: String,
        right_port: String,
    },

    /// A connection names a submodel, port or key that does not exist.
    UnknownReference { reference: String },

    /// Connections form a directed cycle among vertices.
    Cycle { through: Vec<String> },

    /// A primitive's declared input is neither connected, aliased nor
    /// annotated, and implicit inputs are disabled.
    MissingPort { vertex: String, port: String },

    /// Two output ports claim the same outward alias with incompatible
    /// shapes or types.
    AmbiguousExposure {
        key: String,
        left_port: String,
        right_port: String,
    },
}

/// Error produced when building or inferring a graph.
#[derive(Clone, Debug, PartialEq)]
pub struct InferError {
    path: String,
    kind: InferErrorKind,
}

impl InferError {
    fn new(path: &str, kind: InferErrorKind) -> InferError {
        InferError {
            path: path.to_string(),
            kind,
        }
    }

    /// The fully qualified path of the composite where the error occurred,
    /// eg. `Model.m3.m2`.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The category of error.
    pub fn kind(&self) -> &InferErrorKind {
        &self.kind
    }
}

impl fmt::Display for InferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "in {}: ", self.path)?;
        match &self.kind {
            InferErrorKind::RankMismatch {
                left_port,
                right_port,
                left,
                right,
            } => write!(
                f,
                "rank mismatch between {} and {}: {} vs {}",
                left_port, right_port, left, right
            ),
            InferErrorKind::DimMismatch {
                left_port,
                right_port,
                left,
                right,
            } => write!(
                f,
                "dimension mismatch between {} and {}: {} vs {}",
                left_port, right_port, left, right
            ),
            InferErrorKind::TypeConflict {
                left_port,
                right_port,
            } => write!(f, "type conflict between {} and {}", left_port, right_port),
            InferErrorKind::UnknownReference { reference } => {
                write!(f, "unknown reference \"{}\"", reference)
            }
            InferErrorKind::Cycle { through } => {
                write!(f, "connection cycle through {}", through.join(" -> "))
            }
            InferErrorKind::MissingPort { vertex, port } => write!(
                f,
                "port {}.{} is neither connected, aliased nor annotated",
                vertex, port
            ),
            InferErrorKind::AmbiguousExposure {
                key,
                left_port,
                right_port,
            } => write!(
                f,
                "outputs {} and {} both claim key \"{}\" with incompatible ports",
                left_port, right_port, key
            ),
        }
    }
}

impl Error for InferError {}

/// Options controlling graph lowering.
#[derive(Copy, Clone, Debug)]
pub struct InferOptions {
    /// Auto-alias unbound inputs to generated `$`-keys promoted to the
    /// enclosing scope. With this disabled an unbound, unannotated primitive
    /// input is a [`MissingPort`](InferErrorKind::MissingPort) error.
    pub implicit_inputs: bool,
}

impl Default for InferOptions {
    fn default() -> InferOptions {
        InferOptions {
            implicit_inputs: true,
        }
    }
}

type PortIx = usize;
type VertIx = usize;
type ScopeIx = usize;
type TypeIx = usize;

struct FlatPort {
    key: String,
    role: Role,
    vertex: VertIx,
    ty: TypeIx,
}

struct FlatVertex {
    path: String,
    local: String,
    inputs: SmallVec<[PortIx; 4]>,
    outputs: SmallVec<[PortIx; 2]>,
}

/// Mutable per-class inference state, stored on union-find roots. A class
/// holds a single value flowing through all its member ports.
#[derive(Clone)]
struct ClassState {
    shape: ShapeTerm,
    literal: Option<Literal>,
    /// Static seed: literal-pinned or named in `static_input_shapes`.
    seeded: bool,
}

#[derive(Default)]
struct Classes {
    parent: Vec<u32>,
    state: Vec<Option<ClassState>>,
}

impl Classes {
    fn push(&mut self, state: ClassState) -> PortIx {
        let ix = self.parent.len();
        self.parent.push(ix as u32);
        self.state.push(Some(state));
        ix
    }

    fn find(&mut self, port: PortIx) -> PortIx {
        let mut p = port;
        while self.parent[p] as usize != p {
            let grandparent = self.parent[self.parent[p] as usize];
            self.parent[p] = grandparent;
            p = grandparent as usize;
        }
        p
    }

    fn state(&mut self, port: PortIx) -> &mut ClassState {
        let root = self.find(port);
        self.state[root].as_mut().unwrap()
    }
}

/// Union-find over element-type variables. Merging meets the two bounds;
/// an empty meet is a type conflict.
#[derive(Default)]
struct Types {
    parent: Vec<u32>,
    state: Vec<TypeSet>,
}

impl Types {
    fn push(&mut self, ty: TypeSet) -> TypeIx {
        let ix = self.parent.len();
        self.parent.push(ix as u32);
        self.state.push(ty);
        ix
    }

    fn find(&mut self, var: TypeIx) -> TypeIx {
        let mut v = var;
        while self.parent[v] as usize != v {
            let grandparent = self.parent[self.parent[v] as usize];
            self.parent[v] = grandparent;
            v = grandparent as usize;
        }
        v
    }

    fn get(&mut self, var: TypeIx) -> TypeSet {
        let root = self.find(var);
        self.state[root]
    }

    /// Narrow `var` by `bound`. Fails when the meet is empty.
    fn refine(&mut self, var: TypeIx, bound: TypeSet) -> Result<(), ()> {
        let root = self.find(var);
        let ty = self.state[root].meet(bound);
        if ty.is_empty() {
            return Err(());
        }
        self.state[root] = ty;
        Ok(())
    }

    fn union(&mut self, a: TypeIx, b: TypeIx) -> Result<(), ()> {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return Ok(());
        }
        let ty = self.state[ra].meet(self.state[rb]);
        if ty.is_empty() {
            return Err(());
        }
        let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.parent[drop] = keep as u32;
        self.state[keep] = ty;
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum ConnLabel {
    Edge(String),
    External(String),
    Literal(String),
}

struct RowEntry {
    key: String,
    role: Role,
    port: PortIx,
    labels: Vec<ConnLabel>,
    annotated: bool,
    /// For entries projected from a generated child key: the base name used
    /// when the key has to bubble further up.
    gen_base: Option<String>,
}

enum RowChild {
    Prim(VertIx),
    Nested(ScopeIx),
}

struct RowGroup {
    local: String,
    child: RowChild,
    entries: Vec<RowEntry>,
}

struct KeyGroup {
    members: SmallVec<[PortIx; 2]>,
    exposed: bool,
    generated: bool,
    gen_base: Option<String>,
}

struct Scope {
    path: String,
    title: String,
    rows: Vec<RowGroup>,
    keys: Vec<(KeyId, KeyGroup)>,
}

struct Lowering {
    opts: InferOptions,
    symtab: SymbolTable,
    solver: DimSolver,
    ports: Vec<FlatPort>,
    verts: Vec<FlatVertex>,
    classes: Classes,
    types: Types,
    scopes: Vec<Scope>,
}

impl Lowering {
    fn new(opts: InferOptions) -> Lowering {
        Lowering {
            opts,
            symtab: SymbolTable::new(),
            solver: DimSolver::new(),
            ports: Vec::new(),
            verts: Vec::new(),
            classes: Classes::default(),
            types: Types::default(),
            scopes: Vec::new(),
        }
    }

    fn port_label(&self, port: PortIx) -> String {
        let p = &self.ports[port];
        format!("{}.{}", self.verts[p.vertex].local, p.key)
    }

    fn type_conflict(&self, path: &str, a: PortIx, b: PortIx) -> InferError {
        InferError::new(
            path,
            InferErrorKind::TypeConflict {
                left_port: self.port_label(a),
                right_port: self.port_label(b),
            },
        )
    }

    /// Merge the classes of `a` and `b`, unifying shapes and meeting element
    /// types.
    fn merge(&mut self, path: &str, a: PortIx, b: PortIx) -> Result<(), InferError> {
        let ty_a = self.ports[a].ty;
        let ty_b = self.ports[b].ty;
        self.types
            .union(ty_a, ty_b)
            .map_err(|_| self.type_conflict(path, a, b))?;

        let ra = self.classes.find(a);
        let rb = self.classes.find(b);
        if ra == rb {
            return Ok(());
        }

        let sa = self.classes.state[ra].clone().unwrap();
        let sb = self.classes.state[rb].clone().unwrap();

        self.solver.unify(&sa.shape, &sb.shape).map_err(|err| {
            let (left_port, right_port) = (self.port_label(a), self.port_label(b));
            let kind = match err {
                UnifyError::RankMismatch { left, right } => InferErrorKind::RankMismatch {
                    left_port,
                    right_port,
                    left,
                    right,
                },
                UnifyError::DimMismatch { left, right } => InferErrorKind::DimMismatch {
                    left_port,
                    right_port,
                    left,
                    right,
                },
            };
            InferError::new(path, kind)
        })?;

        let literal = match (sa.literal, sb.literal) {
            (Some(x), Some(y)) if x != y => {
                return Err(self.type_conflict(path, a, b));
            }
            (lit @ Some(_), _) | (_, lit) => lit,
        };

        // Keep the lower root so the merge result does not depend on
        // argument order.
        let (keep, drop) = if ra < rb { (ra, rb) } else { (rb, ra) };
        self.classes.parent[drop] = keep as u32;
        self.classes.state[drop] = None;
        self.classes.state[keep] = Some(ClassState {
            // The shapes are congruent now; prefer the one with known rank
            // so later resolution is direct.
            shape: if sa.shape.rank().is_some() {
                sa.shape
            } else {
                sb.shape
            },
            literal,
            seeded: sa.seeded || sb.seeded,
        });
        Ok(())
    }

    fn lower(&mut self, model: &Composite, path: &str, title: &str) -> Result<ScopeIx, InferError> {
        let scope_ix = self.scopes.len();
        self.scopes.push(Scope {
            path: path.to_string(),
            title: title.to_string(),
            rows: Vec::new(),
            keys: Vec::new(),
        });

        // Instantiate sub-vertices in declaration order. This drives dim-var
        // allocation, so it must stay a strict preorder walk.
        let mut locals: FxHashMap<String, usize> = FxHashMap::default();
        for (local, def) in &model.submodels {
            let row = match def {
                VertexDef::Primitive(op) => self.lower_primitive(path, local, *op),
                VertexDef::Composite(inner) => {
                    let child_path = format!("{}.{}", path, local);
                    let child = self.lower(inner, &child_path, local)?;
                    self.project_child(local, child)
                }
            };
            let row_ix = self.scopes[scope_ix].rows.len();
            if locals.insert(local.clone(), row_ix).is_some() {
                return Err(InferError::new(
                    path,
                    InferErrorKind::UnknownReference {
                        reference: format!("duplicate submodel \"{}\"", local),
                    },
                ));
            }
            self.scopes[scope_ix].rows.push(row);
        }

        // Apply the connections table in declaration order.
        for (sub, port, spec) in &model.connections {
            let (row_ix, entry_ix) = self.resolve_entry(scope_ix, path, &locals, sub, port)?;
            let target = self.scopes[scope_ix].rows[row_ix].entries[entry_ix].port;

            // Annotations refine the port's type before connection.
            if let Some(bound) = spec.ty {
                self.scopes[scope_ix].rows[row_ix].entries[entry_ix].annotated = true;
                let ty_var = self.ports[target].ty;
                self.types.refine(ty_var, bound).map_err(|_| {
                    InferError::new(
                        path,
                        InferErrorKind::TypeConflict {
                            left_port: self.port_label(target),
                            right_port: "type annotation".to_string(),
                        },
                    )
                })?;
            }

            if let Some(lit) = spec.literal {
                let conflict = |lw: &Lowering| {
                    InferError::new(
                        path,
                        InferErrorKind::TypeConflict {
                            left_port: lw.port_label(target),
                            right_port: format!("literal {}", lit),
                        },
                    )
                };
                let state = self.classes.state(target);
                if matches!(state.literal, Some(prev) if prev != lit) {
                    return Err(conflict(self));
                }
                state.literal = Some(lit);
                state.seeded = true;
                let ty_var = self.ports[target].ty;
                self.types
                    .refine(ty_var, TypeSet::scalar_or_tensor(lit.scalar_type()))
                    .map_err(|_| conflict(self))?;
                self.scopes[scope_ix].rows[row_ix].entries[entry_ix]
                    .labels
                    .push(ConnLabel::Literal(lit.to_string()));
            }

            if let Some(alias) = &spec.alias {
                self.scopes[scope_ix].rows[row_ix].entries[entry_ix]
                    .labels
                    .push(ConnLabel::External(alias.clone()));
                self.add_key_member(scope_ix, alias, target, false, None);
            }

            for (other_sub, other_port) in &spec.producers {
                let (other_row, other_entry) =
                    self.resolve_entry(scope_ix, path, &locals, other_sub, other_port)?;
                let other = self.scopes[scope_ix].rows[other_row].entries[other_entry].port;
                self.scopes[scope_ix].rows[row_ix].entries[entry_ix]
                    .labels
                    .push(ConnLabel::Edge(format!("{}.{}", other_sub, other_port)));
                self.scopes[scope_ix].rows[other_row].entries[other_entry]
                    .labels
                    .push(ConnLabel::Edge(format!("{}.{}", sub, port)));
                self.merge(path, target, other)?;
            }
        }

        self.generate_implicit_inputs(scope_ix, path)?;
        self.apply_exposure(scope_ix, path, model)?;
        self.finalize_keys(scope_ix, path)?;

        Ok(scope_ix)
    }

    fn lower_primitive(&mut self, path: &str, local: &str, op: OpKind) -> RowGroup {
        let vert_ix = self.verts.len();
        self.verts.push(FlatVertex {
            path: format!("{}.{}", path, local),
            local: local.to_string(),
            inputs: SmallVec::new(),
            outputs: SmallVec::new(),
        });

        let mut group_vars: [Option<TypeIx>; 5] = [None; 5];
        let mut entries = Vec::new();
        for def in ops::instantiate(op, &mut self.symtab) {
            let ty = match group_vars[def.ty_group as usize] {
                Some(var) => {
                    // Shared group: the bound was installed by the first
                    // member and is identical across the group.
                    var
                }
                None => {
                    let var = self.types.push(def.ty);
                    group_vars[def.ty_group as usize] = Some(var);
                    var
                }
            };
            let port_ix = self.ports.len();
            self.ports.push(FlatPort {
                key: def.name.to_string(),
                role: def.role,
                vertex: vert_ix,
                ty,
            });
            let class = self.classes.push(ClassState {
                shape: def.shape,
                literal: None,
                seeded: false,
            });
            debug_assert_eq!(class, port_ix);
            match def.role {
                Role::Input => self.verts[vert_ix].inputs.push(port_ix),
                Role::Output => self.verts[vert_ix].outputs.push(port_ix),
            }
            entries.push(RowEntry {
                key: def.name.to_string(),
                role: def.role,
                port: port_ix,
                labels: Vec::new(),
                annotated: false,
                gen_base: None,
            });
        }

        RowGroup {
            local: local.to_string(),
            child: RowChild::Prim(vert_ix),
            entries,
        }
    }

    /// Build the parent-side row for a nested composite from its exposed
    /// keys.
    fn project_child(&mut self, local: &str, child: ScopeIx) -> RowGroup {
        let mut entries = Vec::new();
        for ix in 0..self.scopes[child].keys.len() {
            let key_id = self.scopes[child].keys[ix].0;
            if !self.scopes[child].keys[ix].1.exposed {
                continue;
            }
            let members = self.scopes[child].keys[ix].1.members.clone();
            let gen_base = self.scopes[child].keys[ix].1.gen_base.clone();
            let rep = members[0];
            let has_output = members.iter().any(|p| self.ports[*p].role == Role::Output);
            entries.push(RowEntry {
                key: self.symtab.name_of(key_id).to_string(),
                role: if has_output { Role::Output } else { Role::Input },
                port: rep,
                labels: Vec::new(),
                annotated: false,
                gen_base,
            });
        }
        RowGroup {
            local: local.to_string(),
            child: RowChild::Nested(child),
            entries,
        }
    }

    fn resolve_entry(
        &mut self,
        scope_ix: ScopeIx,
        path: &str,
        locals: &FxHashMap<String, usize>,
        sub: &str,
        port: &str,
    ) -> Result<(usize, usize), InferError> {
        let Some(&row_ix) = locals.get(sub) else {
            return Err(InferError::new(
                path,
                InferErrorKind::UnknownReference {
                    reference: sub.to_string(),
                },
            ));
        };
        let row = &self.scopes[scope_ix].rows[row_ix];
        let Some(entry_ix) = row.entries.iter().position(|e| e.key == port) else {
            return Err(InferError::new(
                path,
                InferErrorKind::UnknownReference {
                    reference: format!("{}.{}", sub, port),
                },
            ));
        };
        Ok((row_ix, entry_ix))
    }

    fn add_key_member(
        &mut self,
        scope_ix: ScopeIx,
        name: &str,
        port: PortIx,
        generated: bool,
        gen_base: Option<String>,
    ) {
        let key_id = self.symtab.intern_key(name);
        let scope = &mut self.scopes[scope_ix];
        if let Some((_, group)) = scope.keys.iter_mut().find(|(id, _)| *id == key_id) {
            group.members.push(port);
        } else {
            scope.keys.push((
                key_id,
                KeyGroup {
                    members: SmallVec::from_slice(&[port]),
                    exposed: false,
                    generated,
                    gen_base,
                },
            ));
        }
    }

    /// Auto-alias unbound inputs to generated `$`-keys, or fail with
    /// missing-port when implicit inputs are disabled.
    fn generate_implicit_inputs(
        &mut self,
        scope_ix: ScopeIx,
        path: &str,
    ) -> Result<(), InferError> {
        // (row, entry, base name) in declaration order.
        let mut candidates: Vec<(usize, usize, String)> = Vec::new();
        for (row_ix, row) in self.scopes[scope_ix].rows.iter().enumerate() {
            for (entry_ix, entry) in row.entries.iter().enumerate() {
                if entry.role != Role::Input || !entry.labels.is_empty() {
                    continue;
                }
                if !self.opts.implicit_inputs {
                    if entry.annotated {
                        continue;
                    }
                    return Err(InferError::new(
                        path,
                        InferErrorKind::MissingPort {
                            vertex: row.local.clone(),
                            port: entry.key.clone(),
                        },
                    ));
                }
                let base = entry.gen_base.clone().unwrap_or_else(|| entry.key.clone());
                candidates.push((row_ix, entry_ix, base));
            }
        }

        let mut base_counts: FxHashMap<&str, usize> = FxHashMap::default();
        for (_, _, base) in &candidates {
            *base_counts.entry(base.as_str()).or_insert(0) += 1;
        }
        let unique: FxHashSet<String> = base_counts
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(base, _)| base.to_string())
            .collect();
        let mut next_index: FxHashMap<String, usize> = FxHashMap::default();

        for (row_ix, entry_ix, base) in &candidates {
            let name = if unique.contains(base) {
                format!("${}", base)
            } else {
                let n = next_index.entry(base.clone()).or_insert(0);
                let name = format!("${}_{}", base, n);
                *n += 1;
                name
            };
            let port = self.scopes[scope_ix].rows[*row_ix].entries[*entry_ix].port;
            self.scopes[scope_ix].rows[*row_ix].entries[*entry_ix]
                .labels
                .push(ConnLabel::External(name.clone()));
            self.add_key_member(scope_ix, &name, port, true, Some(base.clone()));
        }
        Ok(())
    }

    fn apply_exposure(
        &mut self,
        scope_ix: ScopeIx,
        path: &str,
        model: &Composite,
    ) -> Result<(), InferError> {
        match &model.exposed_keys {
            Some(list) => {
                let ids: Vec<KeyId> = list.iter().map(|k| self.symtab.intern_key(k)).collect();
                for (key, id) in list.iter().zip(&ids) {
                    if !self.scopes[scope_ix].keys.iter().any(|(k, _)| k == id) {
                        return Err(InferError::new(
                            path,
                            InferErrorKind::UnknownReference {
                                reference: key.clone(),
                            },
                        ));
                    }
                }
                for (id, group) in &mut self.scopes[scope_ix].keys {
                    group.exposed = group.generated || ids.contains(id);
                }
            }
            // Without an exposed_keys list, every alias mentioned in the
            // connections table is visible to the enclosing scope.
            None => {
                for (_, group) in &mut self.scopes[scope_ix].keys {
                    group.exposed = true;
                }
            }
        }
        Ok(())
    }

    /// Merge the classes of all ports sharing each external key.
    fn finalize_keys(&mut self, scope_ix: ScopeIx, path: &str) -> Result<(), InferError> {
        for key_ix in 0..self.scopes[scope_ix].keys.len() {
            let members = self.scopes[scope_ix].keys[key_ix].1.members.clone();
            let rep = members[0];
            for other in members.iter().skip(1) {
                self.merge(path, rep, *other).map_err(|err| {
                    let output_members = members
                        .iter()
                        .filter(|p| self.ports[**p].role == Role::Output)
                        .count();
                    if output_members >= 2 {
                        let key_id = self.scopes[scope_ix].keys[key_ix].0;
                        InferError::new(
                            path,
                            InferErrorKind::AmbiguousExposure {
                                key: self.symtab.name_of(key_id).to_string(),
                                left_port: self.port_label(rep),
                                right_port: self.port_label(*other),
                            },
                        )
                    } else {
                        err
                    }
                })?;
            }
        }
        Ok(())
    }
}

/// A finalized port: its resolved shape, type and connection labels.
#[derive(Clone, Debug)]
pub struct PortView {
    /// Rendered shape, eg. `[u1, 37]` or `--`.
    pub shape: String,
    /// Rendered type, eg. `Tensor[float | int]`.
    pub ty: String,
    /// Connection labels in render order: edges, then external aliases,
    /// then a literal.
    pub labels: Vec<String>,
    /// Whether the port's value is determined at build time.
    pub is_static: bool,
}

#[derive(Debug)]
pub(crate) struct EntryOut {
    pub(crate) key: String,
    pub(crate) shape_atoms: Option<Vec<String>>,
    pub(crate) ty: String,
    pub(crate) labels: Vec<String>,
    pub(crate) is_static: bool,
}

#[derive(Debug)]
pub(crate) struct RowOut {
    pub(crate) local: String,
    pub(crate) nested: Option<ScopeIx>,
    pub(crate) entries: Vec<EntryOut>,
}

#[derive(Debug)]
pub(crate) struct ScopeOut {
    pub(crate) title: String,
    pub(crate) rows: Vec<RowOut>,
}

/// The result of a successful inference run.
#[derive(Debug)]
pub struct Inferred {
    pub(crate) scopes: Vec<ScopeOut>,
    static_keys: Vec<String>,
}

impl Inferred {
    /// External keys at the outermost scope whose values are determined at
    /// build time, sorted by name.
    pub fn static_keys(&self) -> &[String] {
        &self.static_keys
    }

    /// Look up a port by its path relative to the outermost composite, eg.
    /// `"m3.m1.output"`.
    pub fn port(&self, path: &str) -> Option<PortView> {
        let mut segments: Vec<&str> = path.split('.').collect();
        if segments.len() < 2 {
            return None;
        }
        let key = segments.pop().unwrap();

        let mut scope = 0usize;
        let last = segments.len() - 1;
        for (ix, segment) in segments.iter().enumerate() {
            let row = self.scopes[scope]
                .rows
                .iter()
                .find(|r| r.local == *segment)?;
            if ix == last {
                let entry = row.entries.iter().find(|e| e.key == key)?;
                return Some(PortView {
                    shape: match &entry.shape_atoms {
                        None => "--".to_string(),
                        Some(atoms) => format!("[{}]", atoms.join(", ")),
                    },
                    ty: entry.ty.clone(),
                    labels: entry.labels.clone(),
                    is_static: entry.is_static,
                });
            }
            scope = row.nested?;
        }
        None
    }
}

/// Infer shapes, types and static keys for `model` with default options.
pub fn infer(model: &Composite) -> Result<Inferred, InferError> {
    infer_with_options(model, InferOptions::default())
}

/// Infer shapes, types and static keys for `model`.
pub fn infer_with_options(model: &Composite, opts: InferOptions) -> Result<Inferred, InferError> {
    let mut lw = Lowering::new(opts);
    let root = lw.lower(model, model.name(), model.name())?;
    debug_assert_eq!(root, 0);

    // Refine outermost keys with the declared static input shapes.
    let mut supplied: FxHashSet<String> = FxHashSet::default();
    for (key, dims) in &model.static_input_shapes {
        let key_id = lw.symtab.intern_key(key);
        let Some(pos) = lw.scopes[root].keys.iter().position(|(id, _)| *id == key_id) else {
            return Err(InferError::new(
                model.name(),
                InferErrorKind::UnknownReference {
                    reference: key.clone(),
                },
            ));
        };
        let rep = lw.scopes[root].keys[pos].1.members[0];
        let declared = lw.classes.state(rep).shape.clone();
        lw.solver
            .unify(&declared, &ShapeTerm::fixed(dims))
            .map_err(|err| {
                let left_port = lw.port_label(rep);
                let right_port = format!("static shape of \"{}\"", key);
                let kind = match err {
                    UnifyError::RankMismatch { left, right } => InferErrorKind::RankMismatch {
                        left_port,
                        right_port,
                        left,
                        right,
                    },
                    UnifyError::DimMismatch { left, right } => InferErrorKind::DimMismatch {
                        left_port,
                        right_port,
                        left,
                        right,
                    },
                };
                InferError::new(model.name(), kind)
            })?;
        lw.classes.state(rep).seeded = true;
        supplied.insert(key.clone());
    }

    check_cycles(&mut lw, model.name())?;
    let class_static = propagate_static(&mut lw);
    let class_live = propagate_live(&mut lw, root);

    // Reported static keys at the outermost scope.
    let mut static_keys = Vec::new();
    for ix in 0..lw.scopes[root].keys.len() {
        if !lw.scopes[root].keys[ix].1.exposed {
            continue;
        }
        let key_id = lw.scopes[root].keys[ix].0;
        let name = lw.symtab.name_of(key_id).to_string();
        if supplied.contains(&name) {
            continue;
        }
        let members = lw.scopes[root].keys[ix].1.members.clone();
        let root_class = lw.classes.find(members[0]);
        let has_output = members.iter().any(|p| lw.ports[*p].role == Role::Output);
        let is_static = class_static.contains(&root_class);
        let report = if has_output {
            is_static
        } else {
            // An input key is reported when its value is determined at
            // build time, or when no live vertex ever demands it.
            is_static || !class_live.contains(&root_class)
        };
        if report {
            static_keys.push(name);
        }
    }
    static_keys.sort();
    static_keys.dedup();

    Ok(finalize(lw, class_static, static_keys))
}

/// Derive the producer -> consumer vertex relation from port classes.
///
/// Every port class is a connected component of the port graph; each output
/// member produces the class's value and each input member consumes it.
fn vertex_edges(lw: &mut Lowering) -> FxHashMap<VertIx, Vec<VertIx>> {
    let mut by_class: FxHashMap<PortIx, (Vec<VertIx>, Vec<VertIx>)> = FxHashMap::default();
    for port_ix in 0..lw.ports.len() {
        let root = lw.classes.find(port_ix);
        let slot = by_class.entry(root).or_default();
        let vertex = lw.ports[port_ix].vertex;
        match lw.ports[port_ix].role {
            Role::Output => slot.0.push(vertex),
            Role::Input => slot.1.push(vertex),
        }
    }

    let mut edges: FxHashMap<VertIx, Vec<VertIx>> = FxHashMap::default();
    let mut seen: FxHashSet<(VertIx, VertIx)> = FxHashSet::default();
    let mut roots: Vec<PortIx> = by_class.keys().copied().collect();
    roots.sort_unstable();
    for root in roots {
        let (producers, consumers) = &by_class[&root];
        for p in producers {
            for c in consumers {
                if seen.insert((*p, *c)) {
                    edges.entry(*p).or_default().push(*c);
                }
            }
        }
    }
    edges
}

fn check_cycles(lw: &mut Lowering, path: &str) -> Result<(), InferError> {
    let edges = vertex_edges(lw);

    // Iterative DFS with colors: 0 unvisited, 1 on stack, 2 done.
    let mut color = vec![0u8; lw.verts.len()];
    for start in 0..lw.verts.len() {
        if color[start] != 0 {
            continue;
        }
        let mut stack: Vec<(VertIx, usize)> = vec![(start, 0)];
        color[start] = 1;
        while let Some((vertex, next)) = stack.last().copied() {
            let successors = edges.get(&vertex).map(Vec::as_slice).unwrap_or(&[]);
            if next < successors.len() {
                stack.last_mut().unwrap().1 += 1;
                let succ = successors[next];
                match color[succ] {
                    0 => {
                        color[succ] = 1;
                        stack.push((succ, 0));
                    }
                    1 => {
                        let from = stack.iter().position(|(v, _)| *v == succ).unwrap();
                        let mut through: Vec<String> = stack[from..]
                            .iter()
                            .map(|(v, _)| lw.verts[*v].path.clone())
                            .collect();
                        through.push(lw.verts[succ].path.clone());
                        return Err(InferError::new(path, InferErrorKind::Cycle { through }));
                    }
                    _ => {}
                }
            } else {
                color[vertex] = 2;
                stack.pop();
            }
        }
    }
    Ok(())
}

/// Least fixpoint of staticness: a class is static when seeded, or when
/// produced by a vertex all of whose inputs are static.
fn propagate_static(lw: &mut Lowering) -> FxHashSet<PortIx> {
    let mut static_classes: FxHashSet<PortIx> = FxHashSet::default();
    for port_ix in 0..lw.ports.len() {
        let root = lw.classes.find(port_ix);
        if lw.classes.state[root].as_ref().unwrap().seeded {
            static_classes.insert(root);
        }
    }

    loop {
        let mut changed = false;
        for vert_ix in 0..lw.verts.len() {
            let inputs = lw.verts[vert_ix].inputs.clone();
            let all_inputs_static = inputs.iter().all(|p| {
                let root = lw.classes.find(*p);
                static_classes.contains(&root)
            });
            if !all_inputs_static {
                continue;
            }
            for p in lw.verts[vert_ix].outputs.clone() {
                let root = lw.classes.find(p);
                changed |= static_classes.insert(root);
            }
        }
        if !changed {
            break;
        }
    }
    static_classes
}

/// Classes whose values are demanded when computing the outermost exposed
/// output keys.
fn propagate_live(lw: &mut Lowering, root_scope: ScopeIx) -> FxHashSet<PortIx> {
    let mut live: FxHashSet<PortIx> = FxHashSet::default();
    for ix in 0..lw.scopes[root_scope].keys.len() {
        if !lw.scopes[root_scope].keys[ix].1.exposed {
            continue;
        }
        let members = lw.scopes[root_scope].keys[ix].1.members.clone();
        if members.iter().any(|p| lw.ports[*p].role == Role::Output) {
            let class = lw.classes.find(members[0]);
            live.insert(class);
        }
    }

    loop {
        let mut changed = false;
        for vert_ix in 0..lw.verts.len() {
            let outputs = lw.verts[vert_ix].outputs.clone();
            let vertex_live = outputs.iter().any(|p| {
                let root = lw.classes.find(*p);
                live.contains(&root)
            });
            if !vertex_live {
                continue;
            }
            for p in lw.verts[vert_ix].inputs.clone() {
                let root = lw.classes.find(p);
                changed |= live.insert(root);
            }
        }
        if !changed {
            break;
        }
    }
    live
}

/// Render an external alias label: keys already carrying the generated `$`
/// prefix print as-is, user keys get one.
fn alias_label(name: &str) -> String {
    if name.starts_with('$') {
        name.to_string()
    } else {
        format!("${}", name)
    }
}

/// Canonicalize dim-var naming and freeze every port's display triple.
fn finalize(
    mut lw: Lowering,
    class_static: FxHashSet<PortIx>,
    static_keys: Vec<String>,
) -> Inferred {
    let mut namer = DimNamer::new();
    let mut scopes = Vec::with_capacity(lw.scopes.len());

    for scope_ix in 0..lw.scopes.len() {
        let mut rows = Vec::with_capacity(lw.scopes[scope_ix].rows.len());
        for row_ix in 0..lw.scopes[scope_ix].rows.len() {
            // Inputs render before outputs within each row group.
            let order: Vec<usize> = {
                let entries = &lw.scopes[scope_ix].rows[row_ix].entries;
                (0..entries.len())
                    .filter(|ix| entries[*ix].role == Role::Input)
                    .chain((0..entries.len()).filter(|ix| entries[*ix].role == Role::Output))
                    .collect()
            };

            let mut entries = Vec::with_capacity(order.len());
            for entry_ix in order {
                let (port, key, raw_labels) = {
                    let entry = &lw.scopes[scope_ix].rows[row_ix].entries[entry_ix];
                    (entry.port, entry.key.clone(), entry.labels.clone())
                };
                let root = lw.classes.find(port);
                let shape = lw.classes.state[root].as_ref().unwrap().shape.clone();
                let shape_atoms = namer.term_atoms(&mut lw.solver, &shape);
                let ty = lw.types.get(lw.ports[port].ty).to_string();

                let mut labels: Vec<String> = Vec::with_capacity(raw_labels.len());
                for label in &raw_labels {
                    if let ConnLabel::Edge(text) = label {
                        labels.push(text.clone());
                    }
                }
                for label in &raw_labels {
                    if let ConnLabel::External(name) = label {
                        labels.push(alias_label(name));
                    }
                }
                for label in &raw_labels {
                    if let ConnLabel::Literal(text) = label {
                        labels.push(text.clone());
                    }
                }

                entries.push(EntryOut {
                    key,
                    shape_atoms,
                    ty,
                    labels,
                    is_static: class_static.contains(&root),
                });
            }
            let (local, nested) = {
                let row = &lw.scopes[scope_ix].rows[row_ix];
                let nested = match row.child {
                    RowChild::Prim(_) => None,
                    RowChild::Nested(scope) => Some(scope),
                };
                (row.local.clone(), nested)
            };
            rows.push(RowOut {
                local,
                nested,
                entries,
            });
        }
        scopes.push(ScopeOut {
            title: lw.scopes[scope_ix].title.clone(),
            rows,
        });
    }

    Inferred {
        scopes,
        static_keys,
    }
}
