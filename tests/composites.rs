//! End-to-end inference scenarios over composite models.

use symgraph::{desc, infer, Composite, ConnSpec, Literal, OpKind, ScalarSet, ScalarType, TypeSet};

fn tensor_any() -> TypeSet {
    TypeSet::tensor(ScalarSet::ALL)
}

/// An RBF kernel feeding a linear layer, with every boundary key exposed.
fn kernelized_svm() -> Composite {
    let mut svm = Composite::new("Model");
    svm.add_primitive("kernel", OpKind::RbfKernel)
        .add_primitive("linear", OpKind::Linear)
        .connect_external("kernel", "input1", "input1")
        .connect_external("kernel", "input2", "input2")
        .connect_external("kernel", "sigma", "sigma")
        .connect_external("kernel", "l_scale", "l_scale")
        .connect("linear", "input", &[("kernel", "output")])
        .connect_external("linear", "weight", "weight")
        .connect_external("linear", "bias", "bias")
        .connect_external("linear", "output", "output")
        .expose(&[
            "input1", "input2", "sigma", "l_scale", "weight", "bias", "output",
        ]);
    svm
}

/// Four linear layers with sigmoid/tanh/relu/leaky-relu activations.
///
/// Weights and biases stay unbound; the engine promotes them as generated
/// keys. No exposed_keys list, so every alias is implicitly exposed.
fn mlp() -> Composite {
    let mut mlp = Composite::new("Model");
    mlp.add_primitive("lin0", OpKind::Linear)
        .add_primitive("act0", OpKind::Sigmoid)
        .add_primitive("lin1", OpKind::Linear)
        .add_primitive("act1", OpKind::Tanh)
        .add_primitive("lin2", OpKind::Linear)
        .add_primitive("act2", OpKind::Relu)
        .add_primitive("lin3", OpKind::Linear)
        .add_primitive("act3", OpKind::LeakyRelu)
        .connect_external("lin0", "input", "input")
        .connect("act0", "input", &[("lin0", "output")])
        .connect("lin1", "input", &[("act0", "output")])
        .connect("act1", "input", &[("lin1", "output")])
        .connect("lin2", "input", &[("act1", "output")])
        .connect("act2", "input", &[("lin2", "output")])
        .connect("lin3", "input", &[("act2", "output")])
        .connect("act3", "input", &[("lin3", "output")])
        .connect_literal("act3", "slope", Literal::Float(0.01))
        .connect_external("act3", "output", "output");
    mlp
}

// A relu chain that splits in two, recombines through an Add whose result
// is never exposed, plus a separate relu pair producing output2 from
// input1 and a dead consumer of input2.
fn chain_with_dead_branch() -> Composite {
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::Relu)
        .add_primitive("m2", OpKind::Relu)
        .add_primitive("m3", OpKind::Relu)
        .add_primitive("m4", OpKind::Relu)
        .add_primitive("m5", OpKind::Add)
        .add_primitive("m6", OpKind::Relu)
        .add_primitive("m7", OpKind::Relu)
        .add_primitive("m8", OpKind::Relu)
        .connect_external("m1", "input", "input1")
        .connect("m2", "input", &[("m1", "output")])
        .connect("m3", "input", &[("m2", "output")])
        .connect("m4", "input", &[("m2", "output")])
        .connect("m5", "left", &[("m3", "output")])
        .connect("m5", "right", &[("m4", "output")])
        .connect_external("m6", "input", "input1")
        .connect("m7", "input", &[("m6", "output")])
        .connect_external("m7", "output", "output2")
        .connect_external("m8", "input", "input2")
        .expose(&["input1", "input2", "output2"]);
    model
}

#[test]
fn test_static_keys_chain_with_dead_branch() {
    let mut model = chain_with_dead_branch();
    model.set_static_input_shape("input1", &[1, 1, 1, 1, 1, 1, 1, 37, 43]);

    let inferred = infer(&model).unwrap();
    // output2 resolves entirely from input1; input2 is consumed by nothing
    // that feeds an output. input1 itself was supplied, so it is not
    // reported.
    assert_eq!(inferred.static_keys(), ["input2", "output2"]);

    let shape = "[1, 1, 1, 1, 1, 1, 1, 37, 43]";
    assert_eq!(inferred.port("m7.output").unwrap().shape, shape);
    // The unexposed Add result is still resolved and static internally.
    let add_out = inferred.port("m5.output").unwrap();
    assert_eq!(add_out.shape, shape);
    assert!(add_out.is_static);
}

#[test]
fn test_static_keys_all_outputs_derived() {
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::Relu)
        .add_primitive("m2", OpKind::Sigmoid)
        .add_primitive("m3", OpKind::Relu)
        .add_primitive("m4", OpKind::Sigmoid)
        .connect_external("m1", "input", "input1")
        .connect_external("m2", "input", "input1")
        .connect_external("m3", "input", "input2")
        .connect_external("m4", "input", "input2")
        .connect_external("m1", "output", "output1")
        .connect_external("m2", "output", "output2")
        .connect_external("m3", "output", "output3")
        .connect_external("m4", "output", "output4")
        .expose(&[
            "input1", "input2", "output1", "output2", "output3", "output4",
        ])
        .set_static_input_shape("input1", &[5, 5])
        .set_static_input_shape("input2", &[7, 2]);

    let inferred = infer(&model).unwrap();
    assert_eq!(
        inferred.static_keys(),
        ["output1", "output2", "output3", "output4"]
    );
}

#[test]
fn test_static_keys_nothing_determined() {
    // No static inputs: nothing resolves, and the two dangling external
    // inputs are reported. The input-to-input connect aliases the ports
    // without creating an edge.
    let mut model = Composite::new("Model");
    model
        .add_primitive("m3", OpKind::Relu)
        .add_primitive("m4", OpKind::Relu)
        .connect_external("m3", "input", "input1")
        .connect_external("m4", "input", "input2")
        .connect("m3", "input", &[("m4", "input")])
        .expose(&["input1", "input2"]);

    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["input1", "input2"]);

    // Aliased inputs share their shape class.
    assert_eq!(
        inferred.port("m3.input").unwrap().shape,
        inferred.port("m4.input").unwrap().shape
    );
}

#[test]
fn test_static_keys_arithmetic_with_literals() {
    // output1 is derived from input1 and literal pins; input2 and input3
    // feed an Add whose result reaches no output.
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::Add)
        .add_primitive("m2", OpKind::Multiply)
        .add_primitive("m3", OpKind::Add)
        .set_conn(
            "m1",
            "left",
            ConnSpec::alias("input1").with_type(tensor_any()),
        )
        .connect_literal("m1", "right", Literal::Float(-0.5))
        .connect("m2", "left", &[("m1", "output")])
        .connect_literal("m2", "right", Literal::Float(2.0))
        .connect_external("m2", "output", "output1")
        .set_conn(
            "m3",
            "left",
            ConnSpec::alias("input2").with_type(tensor_any()),
        )
        .set_conn(
            "m3",
            "right",
            ConnSpec::alias("input3").with_type(tensor_any()),
        )
        .expose(&["input1", "input2", "input3", "output1"])
        .set_static_input_shape("input1", &[3, 4, 5]);

    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["input2", "input3", "output1"]);

    let out = inferred.port("m2.output").unwrap();
    assert_eq!(out.shape, "[3, 4, 5]");
    // The float literals narrow every element type in the chain.
    assert_eq!(out.ty, "Tensor[float]");
}

#[test]
fn test_literal_pinned_key_reported_static() {
    // A key aliased to a literal-pinned port is determined at build time.
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::Add)
        .set_conn(
            "m1",
            "right",
            ConnSpec {
                alias: Some("c".to_string()),
                literal: Some(Literal::Float(1.5)),
                ..ConnSpec::default()
            },
        )
        .connect_external("m1", "left", "input1")
        .connect_external("m1", "output", "output1")
        .expose(&["c", "input1", "output1"]);

    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["c"]);
}

#[test]
fn test_exact_key_names_not_normalized() {
    // output3 and output_3 are different keys; reporting must not
    // normalize one into the other.
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::Relu)
        .connect_external("m1", "input", "input1")
        .connect_external("m1", "output", "output3")
        .expose(&["input1", "output3"])
        .set_static_input_shape("input1", &[2, 2]);

    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["output3"]);
    assert!(!inferred.static_keys().contains(&"output_3".to_string()));
}

#[test]
fn test_composite_without_exposed_keys() {
    // The inner composite has no exposed_keys list; aliases mentioned in
    // its connections are still reachable from the enclosing scope.
    let mut inner = Composite::new("Model");
    inner
        .add_primitive("r", OpKind::Relu)
        .connect_external("r", "input", "input")
        .connect_external("r", "output", "output");

    let mut model = Composite::new("Model");
    model
        .add_composite("m1", inner)
        .connect_external("m1", "input", "input1")
        .connect_external("m1", "output", "output1")
        .expose(&["input1", "output1"])
        .set_static_input_shape("input1", &[6, 6]);

    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["output1"]);
    assert_eq!(inferred.port("m1.r.output").unwrap().shape, "[6, 6]");
}

#[test]
fn test_scalar_vs_rank_one_distinct() {
    // A scalar-shaped port cannot unify with a rank-1 key shape.
    let mut model = Composite::new("Model");
    model
        .add_primitive("m1", OpKind::LeakyRelu)
        .connect_external("m1", "input", "input1")
        .connect_external("m1", "slope", "slope")
        .expose(&["input1", "slope"])
        .set_static_input_shape("slope", &[1]);

    let err = infer(&model).unwrap_err();
    assert!(matches!(
        err.kind(),
        symgraph::InferErrorKind::RankMismatch { left: 0, right: 1, .. }
    ));
}

#[test]
fn test_json_description_end_to_end() {
    let json = r#"{
        "name": "Model",
        "submodels": {
            "m1": {"name": "Relu"},
            "m2": {"name": "Sigmoid"},
            "m3": {"name": "Add"}
        },
        "connections": {
            "m1": {"input": "input1"},
            "m2": {"input": "input2"},
            "m3": {
                "left": {"key": {"connect": [["m1", "output"], ["m2", "output"]]}},
                "right": -0.5,
                "output": {"key": {"name": "output1",
                                   "type": {"Tensor": ["int", "float", "bool"]}}}
            }
        },
        "exposed_keys": ["input1", "input2", "output1"],
        "static_input_shapes": {"input1": [3, 3], "input2": [3, 3]}
    }"#;

    let model = desc::parse(json).unwrap();
    let inferred = infer(&model).unwrap();
    assert_eq!(inferred.static_keys(), ["output1"]);
    assert_eq!(inferred.port("m3.left").unwrap().shape, "[3, 3]");
    assert_eq!(inferred.port("m3.output").unwrap().ty, "Tensor[float]");

    // Emitting the canonical description and re-parsing it preserves the
    // inference results.
    let reparsed = desc::parse(&desc::to_json(&model).to_string()).unwrap();
    let again = infer(&reparsed).unwrap();
    assert_eq!(again.static_keys(), inferred.static_keys());
    assert_eq!(
        again.port("m3.output").unwrap().shape,
        inferred.port("m3.output").unwrap().shape
    );
}

#[test]
fn test_type_annotation_must_overlap_scalar_universe() {
    let mut model = Composite::new("Model");
    model.add_primitive("m1", OpKind::Linear).set_conn(
        "m1",
        "weight",
        ConnSpec::alias("w").with_type(TypeSet::tensor(ScalarSet::single(ScalarType::Bool))),
    );

    // Linear weights are float tensors; a bool bound empties the meet.
    let err = infer(&model).unwrap_err();
    assert!(matches!(
        err.kind(),
        symgraph::InferErrorKind::TypeConflict { .. }
    ));
}

#[test]
fn test_two_level_summary() {
    let mut model = Composite::new("Model");
    model
        .add_composite("KernelizedSVM", kernelized_svm())
        .add_composite("MLP", mlp())
        .connect_external("KernelizedSVM", "input1", "input1")
        .connect_external("KernelizedSVM", "input2", "input2")
        .connect("MLP", "input", &[("KernelizedSVM", "output")])
        .connect_external("MLP", "output", "output")
        .expose(&["input1", "input2", "output"]);

    let inferred = infer(&model).unwrap();
    // Everything depends on runtime inputs and parameters.
    assert!(inferred.static_keys().is_empty());

    // The SVM result flows into the first linear layer of the MLP.
    assert_eq!(
        inferred.port("KernelizedSVM.linear.output").unwrap().shape,
        inferred.port("MLP.lin0.input").unwrap().shape
    );
    assert_eq!(inferred.port("MLP.lin0.input").unwrap().shape, "[u1, u4]");

    let expected = "\
                                   Model
===========================================================================
Sub-model     | Keys      : Shapes   : Types         : Connections
---------------------------------------------------------------------------
KernelizedSVM | input1    : [u1, u2] : Tensor[float] : $input1
              | input2    : [u3, u2] : Tensor[float] : $input2
              | sigma     : [ 1]     : Tensor[float] : $sigma
              | l_scale   : [ 1]     : Tensor[float] : $l_scale
              | weight    : [u4, u3] : Tensor[float] : $weight_0
              | bias      : [u4]     : Tensor[float] : $bias_0
              | output    : [u1, u4] : Tensor[float] : MLP.input
---------------------------------------------------------------------------
MLP           | input     : [u1, u4] : Tensor[float] : KernelizedSVM.output
              | $weight_0 : [u5, u4] : Tensor[float] : $weight_1
              | $bias_0   : [u5]     : Tensor[float] : $bias_1
              | $weight_1 : [u6, u5] : Tensor[float] : $weight_2
              | $bias_1   : [u6]     : Tensor[float] : $bias_2
              | $weight_2 : [u7, u6] : Tensor[float] : $weight_3
              | $bias_2   : [u7]     : Tensor[float] : $bias_3
              | $weight_3 : [u8, u7] : Tensor[float] : $weight_4
              | $bias_3   : [u8]     : Tensor[float] : $bias_4
              | output    : [u1, u8] : Tensor[float] : $output
---------------------------------------------------------------------------

                        KernelizedSVM
==============================================================
Sub-model | Keys    : Shapes   : Types         : Connections
--------------------------------------------------------------
kernel    | input1  : [u1, u2] : Tensor[float] : $input1
          | input2  : [u3, u2] : Tensor[float] : $input2
          | sigma   : [ 1]     : Tensor[float] : $sigma
          | l_scale : [ 1]     : Tensor[float] : $l_scale
          | output  : [u1, u3] : Tensor[float] : linear.input
--------------------------------------------------------------
linear    | weight  : [u4, u3] : Tensor[float] : $weight
          | input   : [u1, u3] : Tensor[float] : kernel.output
          | bias    : [u4]     : Tensor[float] : $bias
          | output  : [u1, u4] : Tensor[float] : $output
--------------------------------------------------------------

                            MLP
===========================================================
Sub-model | Keys   : Shapes   : Types         : Connections
-----------------------------------------------------------
lin0      | weight : [u5, u4] : Tensor[float] : $weight_0
          | input  : [u1, u4] : Tensor[float] : $input
          | bias   : [u5]     : Tensor[float] : $bias_0
          | output : [u1, u5] : Tensor[float] : act0.input
-----------------------------------------------------------
act0      | input  : [u1, u5] : Tensor[float] : lin0.output
          | output : [u1, u5] : Tensor[float] : lin1.input
-----------------------------------------------------------
lin1      | weight : [u6, u5] : Tensor[float] : $weight_1
          | input  : [u1, u5] : Tensor[float] : act0.output
          | bias   : [u6]     : Tensor[float] : $bias_1
          | output : [u1, u6] : Tensor[float] : act1.input
-----------------------------------------------------------
act1      | input  : [u1, u6] : Tensor[float] : lin1.output
          | output : [u1, u6] : Tensor[float] : lin2.input
-----------------------------------------------------------
lin2      | weight : [u7, u6] : Tensor[float] : $weight_2
          | input  : [u1, u6] : Tensor[float] : act1.output
          | bias   : [u7]     : Tensor[float] : $bias_2
          | output : [u1, u7] : Tensor[float] : act2.input
-----------------------------------------------------------
act2      | input  : [u1, u7] : Tensor[float] : lin2.output
          | output : [u1, u7] : Tensor[float] : lin3.input
-----------------------------------------------------------
lin3      | weight : [u8, u7] : Tensor[float] : $weight_3
          | input  : [u1, u7] : Tensor[float] : act2.output
          | bias   : [u8]     : Tensor[float] : $bias_3
          | output : [u1, u8] : Tensor[float] : act3.input
-----------------------------------------------------------
act3      | input  : [u1, u8] : Tensor[float] : lin3.output
          | slope  : --       : float         : 0.01
          | output : [u1, u8] : Tensor[float] : $output
-----------------------------------------------------------
";
    assert_eq!(inferred.summary(), expected);
}
