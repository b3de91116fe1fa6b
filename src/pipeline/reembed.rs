//! Restores original cell outputs into a completed notebook so it can be
//! compared against the sample output the assignment shipped with.

use std::collections::HashMap;

use serde_json::Value;

use crate::notebook::Notebook;

/// Copies outputs from `original` into the code cells of `completed` that
/// share a cell id and carry no image output of their own. Returns the
/// number of cells restored.
pub fn reembed_outputs(original: &Notebook, completed: &mut Notebook) -> usize {
    let by_id: HashMap<&str, &Vec<Value>> = original
        .cells
        .iter()
        .filter(|cell| cell.is_code())
        .filter_map(|cell| {
            let outputs = cell.outputs.as_ref().filter(|outputs| !outputs.is_empty())?;
            Some((cell.id.as_deref()?, outputs))
        })
        .collect();

    let mut restored = 0;
    for cell in completed.cells.iter_mut().filter(|cell| cell.is_code()) {
        let Some(outputs) = cell.id.as_deref().and_then(|id| by_id.get(id)) else {
            continue;
        };
        let has_image = cell
            .outputs
            .as_deref()
            .unwrap_or_default()
            .iter()
            .any(has_image_data);
        if !has_image {
            cell.outputs = Some((*outputs).clone());
            restored += 1;
        }
    }
    restored
}

fn has_image_data(output: &Value) -> bool {
    output
        .get("data")
        .and_then(Value::as_object)
        .is_some_and(|data| data.keys().any(|mime| mime.starts_with("image/")))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::notebook::fixtures::{code_cell, markdown_cell, notebook, png_base64};

    fn parse(raw: Value) -> Notebook {
        let bytes = serde_json::to_vec(&raw).expect("serialize fixture");
        Notebook::from_slice(&bytes, "nb.ipynb").expect("parse fixture")
    }

    fn image_output() -> Value {
        json!({
            "output_type": "display_data",
            "metadata": {},
            "data": {"image/png": png_base64()}
        })
    }

    #[test]
    fn restores_outputs_by_cell_id() {
        let original = parse(notebook(vec![
            markdown_cell("m0", "intro"),
            code_cell("plot", "plot()", vec![image_output()]),
            code_cell("calc", "1 + 1", vec![json!({"output_type": "stream", "name": "stdout", "text": "2"})]),
        ]));
        let mut completed = parse(notebook(vec![
            markdown_cell("m0", "intro"),
            code_cell("calc", "1 + 1", vec![]),
            code_cell("plot", "plot()", vec![]),
            code_cell("new", "extra()", vec![]),
        ]));

        let restored = reembed_outputs(&original, &mut completed);
        assert_eq!(restored, 2);
        let plot = completed.cells[2].outputs.as_ref().expect("outputs");
        assert_eq!(plot[0]["data"]["image/png"], png_base64());
        assert_eq!(completed.cells[1].outputs.as_ref().expect("outputs")[0]["text"], "2");
        assert_eq!(completed.cells[3].outputs.as_deref(), Some(&[][..]));
    }

    #[test]
    fn keeps_cells_that_already_have_images() {
        let original = parse(notebook(vec![code_cell(
            "plot",
            "plot()",
            vec![json!({"output_type": "stream", "name": "stdout", "text": "old"})],
        )]));
        let mut completed = parse(notebook(vec![code_cell("plot", "plot()", vec![image_output()])]));

        assert_eq!(reembed_outputs(&original, &mut completed), 0);
        let outputs = completed.cells[0].outputs.as_ref().expect("outputs");
        assert!(has_image_data(&outputs[0]));
    }
}
