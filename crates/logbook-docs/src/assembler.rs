//! Fill a spreadsheet template with report fields and append the signature table.

use crate::placeholder::{placeholders, substitute};
use logbook_types::{DocumentError, FieldMap, Signature};
use std::path::{Path, PathBuf};
use umya_spreadsheet::{Spreadsheet, Worksheet};

/// Everything needed to produce one filled spreadsheet.
#[derive(Debug, Clone)]
pub struct AssemblyRequest {
    pub template: PathBuf,
    pub fields: FieldMap,
    pub signatures: Vec<Signature>,
    /// Spreadsheet the owner filled directly; used verbatim when readable.
    pub user_artifact: Option<PathBuf>,
    pub output: PathBuf,
}

/// Where the assembled spreadsheet started from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    Template,
    UserArtifact,
}

#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub path: PathBuf,
    pub source: DocumentSource,
    pub substituted_cells: usize,
    pub signature_rows: usize,
}

/// Builds filled spreadsheets. Stateless; one instance can serve every report.
#[derive(Debug, Clone, Default)]
pub struct DocumentAssembler;

impl DocumentAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Produce the filled spreadsheet at `req.output`.
    ///
    /// The output path is only ever written by an atomic rename of a finished
    /// temporary file, so a failure leaves no partial artifact behind.
    pub fn assemble(&self, req: &AssemblyRequest) -> Result<AssembledDocument, DocumentError> {
        let (mut book, source, substituted_cells) = self.starting_workbook(req)?;

        let sheet = book
            .get_sheet_mut(&0)
            .ok_or_else(|| DocumentError::AssemblyFailed("workbook has no sheets".to_string()))?;
        append_signature_table(sheet, &req.signatures);

        write_atomically(&book, &req.output)?;
        tracing::debug!(
            output = %req.output.display(),
            ?source,
            substituted_cells,
            signatures = req.signatures.len(),
            "spreadsheet assembled"
        );
        Ok(AssembledDocument {
            path: req.output.clone(),
            source,
            substituted_cells,
            signature_rows: req.signatures.len(),
        })
    }

    /// Field names a template asks for, in sheet then row-major order, each once.
    pub fn template_fields(&self, template: &Path) -> Result<Vec<String>, DocumentError> {
        let book = umya_spreadsheet::reader::xlsx::read(template).map_err(|e| {
            DocumentError::Template(format!("cannot read {}: {}", template.display(), e))
        })?;
        let mut fields: Vec<String> = Vec::new();
        for sheet in book.get_sheet_collection() {
            for row in 1..=sheet.get_highest_row() {
                for col in 1..=sheet.get_highest_column() {
                    let value = sheet.get_value((col, row));
                    for name in placeholders(&value) {
                        if !fields.iter().any(|f| f == name) {
                            fields.push(name.to_string());
                        }
                    }
                }
            }
        }
        Ok(fields)
    }

    fn starting_workbook(
        &self,
        req: &AssemblyRequest,
    ) -> Result<(Spreadsheet, DocumentSource, usize), DocumentError> {
        if let Some(artifact) = req.user_artifact.as_deref().filter(|p| p.exists()) {
            match umya_spreadsheet::reader::xlsx::read(artifact) {
                Ok(book) => return Ok((book, DocumentSource::UserArtifact, 0)),
                Err(e) => tracing::warn!(
                    artifact = %artifact.display(),
                    error = %e,
                    "user-filled spreadsheet unreadable, filling template instead"
                ),
            }
        }

        let mut book = umya_spreadsheet::reader::xlsx::read(&req.template).map_err(|e| {
            DocumentError::AssemblyFailed(format!(
                "cannot read template {}: {}",
                req.template.display(),
                e
            ))
        })?;
        let mut substituted = 0;
        for sheet in book.get_sheet_collection_mut() {
            substituted += fill_placeholders(sheet, &req.fields);
        }
        Ok((book, DocumentSource::Template, substituted))
    }
}

/// Substitute placeholders cell by cell over the used range. Returns the number of cells changed.
fn fill_placeholders(sheet: &mut Worksheet, fields: &FieldMap) -> usize {
    let max_row = sheet.get_highest_row();
    let max_col = sheet.get_highest_column();
    let mut changed = 0;
    for row in 1..=max_row {
        for col in 1..=max_col {
            let current = sheet.get_value((col, row));
            if !current.contains("{{") {
                continue;
            }
            if let Some(filled) = substitute(&current, fields) {
                sheet.get_cell_mut((col, row)).set_value(filled);
                changed += 1;
            }
        }
    }
    changed
}

/// Title, header, then one row per signature, starting two rows below the used range.
fn append_signature_table(sheet: &mut Worksheet, signatures: &[Signature]) {
    if signatures.is_empty() {
        return;
    }
    let mut row = sheet.get_highest_row() + 2;
    sheet.get_cell_mut((1u32, row)).set_value("Digital Signatures");
    row += 1;
    for (col, header) in ["Role", "Name", "Emp Code", "Date/Time"].iter().enumerate() {
        sheet.get_cell_mut((col as u32 + 1, row)).set_value(*header);
    }
    for sig in signatures {
        row += 1;
        sheet
            .get_cell_mut((1u32, row))
            .set_value(format!("{}:", sig.role_label));
        sheet.get_cell_mut((2u32, row)).set_value(sig.name.clone());
        sheet.get_cell_mut((3u32, row)).set_value(sig.emp_code.clone());
        sheet.get_cell_mut((4u32, row)).set_value(sig.local_timestamp());
    }
}

/// Write next to `output` under a temporary name, then rename into place.
fn write_atomically(book: &Spreadsheet, output: &Path) -> Result<(), DocumentError> {
    let dir = match output.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| DocumentError::AssemblyFailed(format!("{}: {}", dir.display(), e)))?;
    let tmp = tempfile::Builder::new()
        .prefix(".assembling-")
        .suffix(".xlsx")
        .tempfile_in(dir)
        .map_err(|e| DocumentError::AssemblyFailed(e.to_string()))?;
    umya_spreadsheet::writer::xlsx::write(book, tmp.path())
        .map_err(|e| DocumentError::AssemblyFailed(format!("cannot write spreadsheet: {}", e)))?;
    tmp.persist(output)
        .map_err(|e| DocumentError::AssemblyFailed(e.to_string()))?;
    Ok(())
}
