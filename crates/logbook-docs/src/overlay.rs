//! Stamp the signature table onto the last page of a rendered PDF.

use logbook_types::{DocumentError, Signature};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::Path;

const MARGIN_X: f32 = 50.0;
const START_Y: f32 = 50.0;
const LINE_HEIGHT: f32 = 12.0;
const COLUMNS: [f32; 4] = [0.0, 100.0, 250.0, 400.0];
const HEADERS: [&str; 4] = ["Role", "Name", "Emp Code", "Date/Time"];

fn overlay_err(e: impl std::fmt::Display) -> DocumentError {
    DocumentError::Overlay(e.to_string())
}

fn text(ops: &mut Vec<Operation>, font: &str, size: f32, x: f32, y: f32, value: &str) {
    ops.push(Operation::new("BT", vec![]));
    ops.push(Operation::new("Tf", vec![font.into(), size.into()]));
    ops.push(Operation::new("Td", vec![x.into(), y.into()]));
    ops.push(Operation::new("Tj", vec![Object::string_literal(value)]));
    ops.push(Operation::new("ET", vec![]));
}

/// Content operations for the table: title, header row, then one row per signer,
/// laid out bottom-up from the page margin.
fn table_operations(signatures: &[Signature]) -> Vec<Operation> {
    let n = signatures.len() as f32;
    let mut ops = Vec::new();
    text(
        &mut ops,
        "F2",
        10.0,
        MARGIN_X,
        START_Y + (n + 1.0) * LINE_HEIGHT,
        "Digital Signatures",
    );
    for (col, header) in COLUMNS.iter().zip(HEADERS) {
        text(&mut ops, "F2", 8.0, MARGIN_X + col, START_Y + n * LINE_HEIGHT, header);
    }
    for (i, sig) in signatures.iter().enumerate() {
        let y = START_Y + (n - i as f32 - 1.0) * LINE_HEIGHT;
        let cells = [
            format!("{}:", sig.role_label),
            sig.name.clone(),
            sig.emp_code.clone(),
            sig.local_timestamp(),
        ];
        for (col, cell) in COLUMNS.iter().zip(cells.iter()) {
            text(&mut ops, "F1", 8.0, MARGIN_X + col, y, cell);
        }
    }
    ops
}

/// Merge the signature table onto the last page of `input` and write the result to `output`.
///
/// Earlier pages pass through untouched. `output` is replaced by rename, so it is
/// either the complete stamped document or absent.
pub fn overlay_signatures(
    input: &Path,
    output: &Path,
    signatures: &[Signature],
) -> Result<(), DocumentError> {
    let mut doc = Document::load(input)
        .map_err(|e| DocumentError::Overlay(format!("cannot read {}: {}", input.display(), e)))?;
    let last_page = doc
        .get_pages()
        .values()
        .last()
        .copied()
        .ok_or_else(|| DocumentError::Overlay(format!("{} has no pages", input.display())))?;

    if !signatures.is_empty() {
        let regular = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica",
        });
        let bold = doc.add_object(dictionary! {
            "Type" => "Font",
            "Subtype" => "Type1",
            "BaseFont" => "Helvetica-Bold",
        });
        let content = Content {
            operations: table_operations(signatures),
        }
        .encode()
        .map_err(overlay_err)?;
        let form = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Form",
                "BBox" => vec![
                    Object::Integer(0),
                    Object::Integer(0),
                    Object::Integer(612),
                    Object::Integer(792),
                ],
                "Resources" => dictionary! {
                    "Font" => dictionary! {
                        "F1" => regular,
                        "F2" => bold,
                    },
                },
            },
            content,
        );
        doc.insert_form_object(last_page, form).map_err(overlay_err)?;
    }

    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(overlay_err)?;
    let tmp = tempfile::Builder::new()
        .prefix(".stamping-")
        .suffix(".pdf")
        .tempfile_in(dir)
        .map_err(overlay_err)?;
    doc.save(tmp.path()).map_err(overlay_err)?;
    tmp.persist(output).map_err(overlay_err)?;
    Ok(())
}
