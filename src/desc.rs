//! The JSON graph-description format.
//!
//! A description is a structural document: composites carry `name`
//! (`"Model"`), `submodels`, `connections` and optionally `exposed_keys`
//! and `static_input_shapes`; primitive vertices are just their operator
//! name. Endpoint specs come in four forms:
//!
//! ```json
//! "input1"
//! -0.5
//! {"key": {"connect": [["m1", "output"], ["m2", "output"]]}}
//! {"key": {"name": "input1", "type": {"Tensor": ["int", "float", "bool"]}}}
//! ```
//!
//! Document order of `submodels` and `connections` is significant, so maps
//! deserialize through [`ordered_map`] into ordered entry lists instead of
//! serde_json's default map type.

use std::error::Error;
use std::fmt;
use std::marker::PhantomData;

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer};

use crate::graph::{Composite, ConnSpec, Literal, VertexDef};
use crate::ops::OpKind;
use crate::typeset::{ScalarSet, ScalarType, TypeSet};

/// Error produced when a graph description cannot be parsed.
#[derive(Debug)]
pub struct ParseError {
    message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> ParseError {
        ParseError {
            message: message.into(),
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid graph description: {}", self.message)
    }
}

impl Error for ParseError {}

impl From<serde_json::Error> for ParseError {
    fn from(err: serde_json::Error) -> ParseError {
        ParseError::new(err.to_string())
    }
}

/// Deserialize a JSON map into a `Vec` of entries, preserving document
/// order.
fn ordered_map<'de, D, T>(deserializer: D) -> Result<Vec<(String, T)>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    struct OrderedMapVisitor<T>(PhantomData<T>);

    impl<'de, T: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<T> {
        type Value = Vec<(String, T)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a map")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::new();
            while let Some(entry) = map.next_entry::<String, T>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedMapVisitor(PhantomData))
}

#[derive(Deserialize)]
struct ModelDesc {
    name: String,
    #[serde(default, deserialize_with = "ordered_map")]
    submodels: Vec<(String, ModelDesc)>,
    #[serde(default, deserialize_with = "ordered_map")]
    connections: Vec<(String, PortMap)>,
    #[serde(default)]
    exposed_keys: Option<Vec<String>>,
    #[serde(default, deserialize_with = "ordered_map")]
    static_input_shapes: Vec<(String, Vec<usize>)>,
}

#[derive(Deserialize)]
struct PortMap(#[serde(deserialize_with = "ordered_map")] Vec<(String, EndpointSpec)>);

#[derive(Deserialize)]
#[serde(untagged)]
enum EndpointSpec {
    Alias(String),
    Literal(LiteralSpec),
    Spec { key: KeySpec },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LiteralSpec {
    Bool(bool),
    Int(i64),
    Float(f64),
}

#[derive(Deserialize)]
struct KeySpec {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    ty: Option<TypeSpec>,
    #[serde(default)]
    connect: Option<Vec<(String, String)>>,
    #[serde(default)]
    value: Option<LiteralSpec>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TypeSpec {
    Scalar(String),
    Tensor {
        #[serde(rename = "Tensor")]
        elems: Vec<String>,
    },
}

/// Parse a JSON graph description into a [`Composite`].
pub fn parse(json: &str) -> Result<Composite, ParseError> {
    let desc: ModelDesc = serde_json::from_str(json)?;
    lower(&desc, true)
}

fn lower(desc: &ModelDesc, outermost: bool) -> Result<Composite, ParseError> {
    if desc.name != "Model" {
        return Err(ParseError::new(format!(
            "expected a composite named \"Model\", found \"{}\"",
            desc.name
        )));
    }
    if !outermost && !desc.static_input_shapes.is_empty() {
        return Err(ParseError::new(
            "static_input_shapes is only allowed at the outermost level",
        ));
    }

    let mut model = Composite::new(&desc.name);
    for (local, sub) in &desc.submodels {
        if sub.name == "Model" {
            model.add_composite(local, lower(sub, false)?);
        } else {
            let Some(op) = OpKind::from_name(&sub.name) else {
                return Err(ParseError::new(format!(
                    "unknown operator \"{}\" for submodel \"{}\"",
                    sub.name, local
                )));
            };
            if !sub.submodels.is_empty() || !sub.connections.is_empty() {
                return Err(ParseError::new(format!(
                    "primitive \"{}\" cannot have submodels or connections",
                    local
                )));
            }
            model.add_primitive(local, op);
        }
    }

    for (sub, ports) in &desc.connections {
        for (port, spec) in &ports.0 {
            model.set_conn(sub, port, lower_endpoint(spec)?);
        }
    }

    if let Some(keys) = &desc.exposed_keys {
        let refs: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
        model.expose(&refs);
    }
    for (key, dims) in &desc.static_input_shapes {
        model.set_static_input_shape(key, dims);
    }
    Ok(model)
}

fn lower_literal(lit: &LiteralSpec) -> Literal {
    match lit {
        LiteralSpec::Bool(v) => Literal::Bool(*v),
        LiteralSpec::Int(v) => Literal::Int(*v),
        LiteralSpec::Float(v) => Literal::Float(*v),
    }
}

fn lower_endpoint(spec: &EndpointSpec) -> Result<ConnSpec, ParseError> {
    match spec {
        EndpointSpec::Alias(key) => Ok(ConnSpec::alias(key)),
        EndpointSpec::Literal(lit) => Ok(ConnSpec::literal(lower_literal(lit))),
        EndpointSpec::Spec { key } => {
            let mut conn = ConnSpec::default();
            conn.alias = key.name.clone();
            conn.literal = key.value.as_ref().map(lower_literal);
            if let Some(producers) = &key.connect {
                conn.producers = producers.clone();
            }
            if let Some(ty) = &key.ty {
                conn.ty = Some(lower_type(ty)?);
            }
            if conn.alias.is_none()
                && conn.producers.is_empty()
                && conn.ty.is_none()
                && conn.literal.is_none()
            {
                return Err(ParseError::new("empty key spec"));
            }
            Ok(conn)
        }
    }
}

fn lower_type(spec: &TypeSpec) -> Result<TypeSet, ParseError> {
    let scalar = |name: &str| {
        ScalarType::from_name(name)
            .ok_or_else(|| ParseError::new(format!("unknown type \"{}\"", name)))
    };
    match spec {
        // A bare scalar name bounds the value to that kind, scalar or
        // tensor.
        TypeSpec::Scalar(name) => Ok(TypeSet::scalar_or_tensor(scalar(name)?)),
        TypeSpec::Tensor { elems } => {
            if elems.is_empty() {
                return Err(ParseError::new("empty Tensor element list"));
            }
            let mut set = ScalarSet::EMPTY;
            for name in elems {
                set = set.union(ScalarSet::single(scalar(name)?));
            }
            Ok(TypeSet::tensor(set))
        }
    }
}

/// Emit the canonical description of a graph.
///
/// Parsing the emitted document yields a structurally identical graph.
pub fn to_json(model: &Composite) -> serde_json::Value {
    use serde_json::{json, Map, Value};

    fn emit(model: &Composite, outermost: bool) -> Value {
        let mut obj = Map::new();
        obj.insert("name".to_string(), json!(model.name()));

        if !model.submodels.is_empty() {
            let mut submodels = Map::new();
            for (local, def) in &model.submodels {
                let value = match def {
                    VertexDef::Primitive(op) => json!({ "name": op.name() }),
                    VertexDef::Composite(inner) => emit(inner, false),
                };
                submodels.insert(local.clone(), value);
            }
            obj.insert("submodels".to_string(), Value::Object(submodels));
        }

        if !model.connections.is_empty() {
            let mut connections = Map::new();
            for (sub, port, spec) in &model.connections {
                let entry = connections
                    .entry(sub.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                entry
                    .as_object_mut()
                    .unwrap()
                    .insert(port.clone(), emit_endpoint(spec));
            }
            obj.insert("connections".to_string(), Value::Object(connections));
        }

        if let Some(keys) = &model.exposed_keys {
            obj.insert("exposed_keys".to_string(), json!(keys));
        }
        if outermost && !model.static_input_shapes.is_empty() {
            let mut statics = Map::new();
            for (key, dims) in &model.static_input_shapes {
                statics.insert(key.clone(), json!(dims));
            }
            obj.insert("static_input_shapes".to_string(), Value::Object(statics));
        }
        Value::Object(obj)
    }

    fn emit_endpoint(spec: &ConnSpec) -> Value {
        // Plain aliases and literals use the short forms.
        if spec.ty.is_none() && spec.producers.is_empty() && spec.literal.is_none() {
            if let Some(alias) = &spec.alias {
                return json!(alias);
            }
        }
        if spec.ty.is_none() && spec.producers.is_empty() && spec.alias.is_none() {
            if let Some(lit) = &spec.literal {
                return match lit {
                    Literal::Bool(v) => json!(v),
                    Literal::Int(v) => json!(v),
                    Literal::Float(v) => json!(v),
                };
            }
        }

        let mut key = Map::new();
        if let Some(alias) = &spec.alias {
            key.insert("name".to_string(), json!(alias));
        }
        if let Some(ty) = &spec.ty {
            key.insert("type".to_string(), emit_type(ty));
        }
        if !spec.producers.is_empty() {
            key.insert("connect".to_string(), json!(spec.producers));
        }
        if let Some(lit) = &spec.literal {
            let value = match lit {
                Literal::Bool(v) => json!(v),
                Literal::Int(v) => json!(v),
                Literal::Float(v) => json!(v),
            };
            key.insert("value".to_string(), value);
        }
        json!({ "key": Value::Object(key) })
    }

    fn emit_type(ty: &TypeSet) -> Value {
        let names = |set: ScalarSet| -> Vec<&'static str> { set.iter().map(|s| s.name()).collect() };
        let scalars = ty.scalar_part();
        let tensor = ty.tensor_part();
        // A bound of the `scalar_or_tensor` form emits as the bare scalar
        // name; a pure tensor bound as the Tensor list.
        if scalars.is_empty() {
            json!({ "Tensor": names(tensor) })
        } else if scalars == tensor && names(scalars).len() == 1 {
            json!(names(scalars)[0])
        } else {
            json!({ "Tensor": names(scalars.union(tensor)) })
        }
    }

    emit(model, true)
}

#[cfg(test)]
mod tests {
    use super::{parse, to_json};
    use crate::infer::infer;

    const DESCRIPTION: &str = r#"{
        "name": "Model",
        "submodels": {
            "m1": {"name": "Relu"},
            "m2": {"name": "Relu"}
        },
        "connections": {
            "m1": {"input": "input1"},
            "m2": {
                "input": {"key": {"connect": [["m1", "output"]]}},
                "output": "output1"
            }
        },
        "exposed_keys": ["input1", "output1"],
        "static_input_shapes": {"input1": [4, 7]}
    }"#;

    #[test]
    fn test_parse_and_infer() {
        let model = parse(DESCRIPTION).unwrap();
        let inferred = infer(&model).unwrap();
        assert_eq!(inferred.static_keys(), ["output1"]);
        assert_eq!(inferred.port("m2.output").unwrap().shape, "[4, 7]");
    }

    #[test]
    fn test_parse_annotated_alias() {
        let json = r#"{
            "name": "Model",
            "submodels": {"m1": {"name": "Add"}},
            "connections": {
                "m1": {
                    "left": {"key": {"name": "input1",
                                     "type": {"Tensor": ["int", "float", "bool"]}}},
                    "right": -0.5,
                    "output": "output1"
                }
            },
            "exposed_keys": ["input1", "output1"]
        }"#;
        let model = parse(json).unwrap();
        let inferred = infer(&model).unwrap();
        // The float literal narrows the shared element type.
        assert_eq!(inferred.port("m1.left").unwrap().ty, "Tensor[float]");
        assert_eq!(inferred.port("m1.right").unwrap().labels, ["-0.5"]);
    }

    #[test]
    fn test_unknown_operator() {
        let json = r#"{
            "name": "Model",
            "submodels": {"m1": {"name": "Conv"}}
        }"#;
        let err = parse(json).unwrap_err();
        assert!(err.to_string().contains("unknown operator \"Conv\""));
    }

    #[test]
    fn test_unknown_type_name() {
        let json = r#"{
            "name": "Model",
            "submodels": {"m1": {"name": "Relu"}},
            "connections": {
                "m1": {"input": {"key": {"name": "x", "type": {"Tensor": ["complex"]}}}}
            }
        }"#;
        let err = parse(json).unwrap_err();
        assert!(err.to_string().contains("unknown type \"complex\""));
    }

    #[test]
    fn test_static_input_shapes_rejected_in_nested_scope() {
        let json = r#"{
            "name": "Model",
            "submodels": {
                "inner": {
                    "name": "Model",
                    "submodels": {"m1": {"name": "Relu"}},
                    "static_input_shapes": {"x": [1]}
                }
            }
        }"#;
        assert!(parse(json).is_err());
    }

    #[test]
    fn test_round_trip() {
        let model = parse(DESCRIPTION).unwrap();
        let emitted = to_json(&model).to_string();
        let reparsed = parse(&emitted).unwrap();

        // Same structure, same inference results.
        assert_eq!(to_json(&reparsed), to_json(&model));
        let a = infer(&model).unwrap();
        let b = infer(&reparsed).unwrap();
        assert_eq!(a.static_keys(), b.static_keys());
        assert_eq!(
            a.port("m2.output").unwrap().shape,
            b.port("m2.output").unwrap().shape
        );
    }
}
