//! Converter double that writes a blank PDF instead of running an office suite.

use async_trait::async_trait;
use logbook_types::{DocumentConverter, DocumentError};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Write a US-letter PDF with `pages` empty pages to `path`.
pub fn write_blank_pdf(path: &Path, pages: usize) -> Result<(), DocumentError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids = Vec::with_capacity(pages);
    for _ in 0..pages.max(1) {
        let content = Content {
            operations: vec![Operation::new("q", vec![]), Operation::new("Q", vec![])],
        }
        .encode()
        .map_err(|e| DocumentError::ConversionFailed(e.to_string()))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, content));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(612),
                Object::Integer(792),
            ],
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.save(path)
        .map_err(|e| DocumentError::ConversionFailed(e.to_string()))?;
    Ok(())
}

/// Produces `<stem>.pdf` in the output directory, or fails on demand.
#[derive(Debug)]
pub struct StubConverter {
    pages: usize,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl StubConverter {
    pub fn new() -> Self {
        Self::with_pages(1)
    }

    pub fn with_pages(pages: usize) -> Self {
        Self {
            pages,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make subsequent conversions fail (or succeed again).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Default for StubConverter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentConverter for StubConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocumentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(DocumentError::ConversionFailed(
                "stub converter set to fail".to_string(),
            ));
        }
        if !input.exists() {
            return Err(DocumentError::ConversionFailed(format!(
                "{} does not exist",
                input.display()
            )));
        }
        let stem = input
            .file_stem()
            .ok_or_else(|| DocumentError::ConversionFailed("input has no file name".to_string()))?;
        let out = out_dir.join(stem).with_extension("pdf");
        write_blank_pdf(&out, self.pages)?;
        Ok(out)
    }
}
