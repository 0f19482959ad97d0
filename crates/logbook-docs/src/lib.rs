//! Document pipeline: fill the spreadsheet template, convert it to PDF, stamp signatures.

mod assembler;
mod convert;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
mod overlay;
mod pipeline;
mod placeholder;

pub use assembler::{AssembledDocument, AssemblyRequest, DocumentAssembler, DocumentSource};
pub use convert::{fit_to_single_page, SofficeConverter};
pub use logbook_types::{DocumentConverter, DocumentError};
pub use overlay::overlay_signatures;
pub use pipeline::{DocumentPipeline, PdfRenderer, PipelineRequest};
pub use placeholder::substitute;

#[cfg(feature = "test-util")]
pub use mock::StubConverter;
