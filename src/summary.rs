//! Rendering inferred graphs as hierarchical summary tables.
//!
//! Each composite gets one table with a row group per immediate sub-vertex
//! (inputs before outputs) and the columns Keys, Shapes, Types and
//! Connections. Nested composites are not expanded inline; they get their
//! own table afterwards, in pre-order. Column widths are computed once per
//! table and shape atoms are right-aligned to the widest atom in the table,
//! so the byte output is deterministic.

use crate::infer::{EntryOut, Inferred, ScopeOut};

const HEADINGS: [&str; 5] = ["Sub-model", "Keys", "Shapes", "Types", "Connections"];
const SEPARATORS: [&str; 4] = [" | ", " : ", " : ", " : "];

impl Inferred {
    /// Render the hierarchical summary.
    ///
    /// The outermost table is titled with the model's name; sub-tables carry
    /// the local submodel name.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (ix, scope) in self.scopes.iter().enumerate() {
            if ix > 0 {
                out.push('\n');
            }
            render_scope(scope, &mut out);
        }
        out
    }
}

fn shape_cell(entry: &EntryOut, atom_width: usize) -> String {
    match &entry.shape_atoms {
        None => "--".to_string(),
        Some(atoms) => {
            let cells: Vec<String> = atoms
                .iter()
                .map(|atom| format!("{:>width$}", atom, width = atom_width))
                .collect();
            format!("[{}]", cells.join(", "))
        }
    }
}

fn render_scope(scope: &ScopeOut, out: &mut String) {
    let atom_width = scope
        .rows
        .iter()
        .flat_map(|row| &row.entries)
        .filter_map(|entry| entry.shape_atoms.as_ref())
        .flatten()
        .map(|atom| atom.len())
        .max()
        .unwrap_or(0);

    // One cell line per port, grouped by sub-vertex.
    let mut groups: Vec<Vec<[String; 5]>> = Vec::new();
    for row in &scope.rows {
        let mut lines = Vec::new();
        for (ix, entry) in row.entries.iter().enumerate() {
            let sub = if ix == 0 {
                row.local.clone()
            } else {
                String::new()
            };
            let conns = if entry.labels.is_empty() {
                "--".to_string()
            } else {
                entry.labels.join(", ")
            };
            lines.push([
                sub,
                entry.key.clone(),
                shape_cell(entry, atom_width),
                entry.ty.clone(),
                conns,
            ]);
        }
        if !lines.is_empty() {
            groups.push(lines);
        }
    }

    // Column widths are fixed once per table.
    let mut widths: [usize; 5] = HEADINGS.map(str::len);
    for line in groups.iter().flatten() {
        for (width, cell) in widths.iter_mut().zip(line.iter()) {
            *width = (*width).max(cell.len());
        }
    }
    let total =
        widths.iter().sum::<usize>() + SEPARATORS.iter().map(|s| s.len()).sum::<usize>();

    let push_line = |out: &mut String, line: &str| {
        out.push_str(line.trim_end());
        out.push('\n');
    };
    let format_row = |cells: &[String; 5]| {
        let mut line = String::new();
        for (col, cell) in cells.iter().enumerate() {
            if col > 0 {
                line.push_str(SEPARATORS[col - 1]);
            }
            if col == cells.len() - 1 {
                // The last column is never padded.
                line.push_str(cell);
            } else {
                line.push_str(&format!("{:<width$}", cell, width = widths[col]));
            }
        }
        line
    };

    push_line(out, &format!("{:^width$}", scope.title, width = total));
    push_line(out, &"=".repeat(total));
    push_line(out, &format_row(&HEADINGS.map(String::from)));
    push_line(out, &"-".repeat(total));
    for group in &groups {
        for line in group {
            push_line(out, &format_row(line));
        }
        push_line(out, &"-".repeat(total));
    }
}

#[cfg(test)]
mod tests {
    use crate::graph::{Composite, Literal};
    use crate::infer::infer;
    use crate::ops::OpKind;

    #[test]
    fn test_chain_summary_golden() {
        let mut model = Composite::new("Model");
        model
            .add_primitive("m1", OpKind::Relu)
            .add_primitive("m2", OpKind::Relu)
            .connect_external("m1", "input", "input1")
            .connect("m2", "input", &[("m1", "output")])
            .connect_external("m2", "output", "output1")
            .expose(&["input1", "output1"])
            .set_static_input_shape("input1", &[4, 7]);

        let summary = infer(&model).unwrap().summary();
        let expected = "\
                                Model
======================================================================
Sub-model | Keys   : Shapes : Types                      : Connections
----------------------------------------------------------------------
m1        | input  : [4, 7] : Tensor[bool | float | int] : $input1
          | output : [4, 7] : Tensor[bool | float | int] : m2.input
----------------------------------------------------------------------
m2        | input  : [4, 7] : Tensor[bool | float | int] : m1.output
          | output : [4, 7] : Tensor[bool | float | int] : $output1
----------------------------------------------------------------------
";
        assert_eq!(summary, expected);
    }

    #[test]
    fn test_shape_atoms_right_aligned() {
        let mut model = Composite::new("Model");
        model
            .add_primitive("m1", OpKind::Relu)
            .connect_external("m1", "input", "input1")
            .connect_external("m1", "output", "output1")
            .expose(&["input1", "output1"])
            .set_static_input_shape("input1", &[1, 1, 37, 43]);

        let summary = infer(&model).unwrap().summary();
        // Single-digit atoms pad to the width of the widest atom.
        assert!(summary.contains("[ 1,  1, 37, 43]"));
    }

    #[test]
    fn test_scalar_and_literal_cells() {
        let mut model = Composite::new("Model");
        model
            .add_primitive("m1", OpKind::LeakyRelu)
            .connect_external("m1", "input", "input1")
            .connect_literal("m1", "slope", Literal::Float(-0.5))
            .expose(&["input1"]);

        let summary = infer(&model).unwrap().summary();
        // Scalar shape renders as `--`; the literal pin shows its value and
        // the unconnected output shows `--`.
        assert!(summary.contains("slope  : --"));
        assert!(summary.contains(": -0.5"));
        let output_line = summary
            .lines()
            .find(|l| l.contains("output"))
            .unwrap();
        assert!(output_line.trim_end().ends_with(": --"));
    }

    #[test]
    fn test_nested_tables_in_preorder() {
        let mut inner = Composite::new("Model");
        inner
            .add_primitive("r", OpKind::Relu)
            .connect_external("r", "input", "input")
            .connect_external("r", "output", "output")
            .expose(&["input", "output"]);

        let mut model = Composite::new("Model");
        model
            .add_composite("first", inner)
            .add_primitive("second", OpKind::Sigmoid)
            .connect_external("first", "input", "input1")
            .connect("second", "input", &[("first", "output")])
            .connect_external("second", "output", "output1")
            .expose(&["input1", "output1"]);

        let summary = infer(&model).unwrap().summary();
        let model_pos = summary.find("Model").unwrap();
        let first_pos = summary.find("\n\n").unwrap();
        // The nested table comes after the outer one, titled by its local
        // name.
        assert!(model_pos < first_pos);
        let nested = &summary[first_pos..];
        assert!(nested.contains("first"));
        assert!(nested.contains("r "));
    }
}
