//! Assemble -> convert -> stamp, producing the final signed PDF.

use crate::assembler::{AssemblyRequest, DocumentAssembler};
use crate::convert::fit_to_single_page;
use crate::overlay::overlay_signatures;
use logbook_types::{DocumentConverter, DocumentError, FieldMap, Signature};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Turns a filled spreadsheet into the signed PDF.
pub struct PdfRenderer {
    converter: Arc<dyn DocumentConverter>,
}

impl PdfRenderer {
    pub fn new(converter: Arc<dyn DocumentConverter>) -> Self {
        Self { converter }
    }

    /// Convert `filled` and overlay `signatures` onto its last page, writing `output`.
    ///
    /// The unsigned intermediate PDF is removed whether or not the overlay succeeds.
    pub async fn render(
        &self,
        filled: &Path,
        signatures: &[Signature],
        output: &Path,
    ) -> Result<(), DocumentError> {
        let owned = filled.to_path_buf();
        tokio::task::spawn_blocking(move || fit_to_single_page(&owned))
            .await
            .map_err(|e| DocumentError::ConversionFailed(e.to_string()))??;

        let work_dir = match filled.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let unsigned = self.converter.convert_to_pdf(filled, &work_dir).await?;

        let (src, dst, sigs) = (unsigned.clone(), output.to_path_buf(), signatures.to_vec());
        let stamped = tokio::task::spawn_blocking(move || overlay_signatures(&src, &dst, &sigs))
            .await
            .map_err(|e| DocumentError::Overlay(e.to_string()));

        if let Err(e) = tokio::fs::remove_file(&unsigned).await {
            tracing::debug!(path = %unsigned.display(), error = %e, "intermediate pdf not removed");
        }
        stamped??;
        tracing::info!(output = %output.display(), signatures = signatures.len(), "signed pdf rendered");
        Ok(())
    }
}

/// Owned inputs for one end-to-end document run.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub report_id: i64,
    pub template: PathBuf,
    pub fields: FieldMap,
    pub signatures: Vec<Signature>,
    pub user_artifact: Option<PathBuf>,
    pub output: PathBuf,
}

/// Runs assembly and rendering in a scratch directory that is dropped afterwards.
pub struct DocumentPipeline {
    assembler: DocumentAssembler,
    renderer: PdfRenderer,
}

impl DocumentPipeline {
    pub fn new(converter: Arc<dyn DocumentConverter>) -> Self {
        Self {
            assembler: DocumentAssembler::new(),
            renderer: PdfRenderer::new(converter),
        }
    }

    /// Placeholder names in `template`, for building a report's field form.
    pub async fn template_fields(&self, template: &Path) -> Result<Vec<String>, DocumentError> {
        let (assembler, path) = (self.assembler.clone(), template.to_path_buf());
        tokio::task::spawn_blocking(move || assembler.template_fields(&path))
            .await
            .map_err(|e| DocumentError::Template(e.to_string()))?
    }

    /// Produce `req.output`. Nothing but the final PDF outlives the call.
    pub async fn run(&self, req: PipelineRequest) -> Result<PathBuf, DocumentError> {
        if !req.template.exists() && req.user_artifact.as_deref().map_or(true, |p| !p.exists()) {
            return Err(DocumentError::Template(format!(
                "{} not found",
                req.template.display()
            )));
        }
        let scratch = tempfile::Builder::new()
            .prefix("logbook-render-")
            .tempdir()
            .map_err(|e| DocumentError::AssemblyFailed(e.to_string()))?;
        let filled = scratch.path().join(format!("report_{}.xlsx", req.report_id));

        let assembly = AssemblyRequest {
            template: req.template,
            fields: req.fields,
            signatures: req.signatures.clone(),
            user_artifact: req.user_artifact,
            output: filled.clone(),
        };
        let assembler = self.assembler.clone();
        tokio::task::spawn_blocking(move || assembler.assemble(&assembly))
            .await
            .map_err(|e| DocumentError::AssemblyFailed(e.to_string()))??;

        self.renderer
            .render(&filled, &req.signatures, &req.output)
            .await?;
        Ok(req.output)
    }
}
