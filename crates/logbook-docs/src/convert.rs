//! Spreadsheet -> PDF conversion through a headless office suite.

use async_trait::async_trait;
use logbook_types::{ConversionConfig, DocumentConverter, DocumentError};
use regex::{NoExpand, Regex};
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tokio::process::Command;
use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

const FIT_FLAG: &str = r#"<pageSetUpPr fitToPage="1"/>"#;

static SHEET_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^xl/worksheets/sheet\d+\.xml$").expect("sheet part pattern is valid")
});
static WORKSHEET_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<worksheet\b[^>]*>").expect("worksheet pattern is valid"));
static SHEET_PR_EMPTY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<sheetPr\b([^>]*?)\s*/>").expect("sheetPr pattern is valid"));
static PAGE_SETUP_PR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<pageSetUpPr\b([^>]*?)\s*/>").expect("pageSetUpPr pattern is valid")
});
static FIT_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\sfitToPage="[^"]*""#).expect("fitToPage pattern is valid"));

/// Force every sheet to print one page wide by one page tall.
///
/// The 1x1 fit lives in each sheet's page setup, but readers only apply it when the
/// sheet properties carry `fitToPage="1"`. The workbook writer cannot emit that flag,
/// so it is patched into the written sheet parts.
pub fn fit_to_single_page(path: &Path) -> Result<(), DocumentError> {
    let mut book = umya_spreadsheet::reader::xlsx::read(path).map_err(|e| {
        DocumentError::ConversionFailed(format!("cannot read {}: {}", path.display(), e))
    })?;
    for sheet in book.get_sheet_collection_mut() {
        let setup = sheet.get_page_setup_mut();
        setup.set_fit_to_width(1);
        setup.set_fit_to_height(1);
    }
    umya_spreadsheet::writer::xlsx::write(&book, path).map_err(|e| {
        DocumentError::ConversionFailed(format!("cannot write {}: {}", path.display(), e))
    })?;
    flag_fit_to_page(path)
}

/// Rewrite the package at `path` with `fitToPage="1"` set on every worksheet.
fn flag_fit_to_page(path: &Path) -> Result<(), DocumentError> {
    let failed = |what: &str, e: &dyn std::fmt::Display| {
        DocumentError::ConversionFailed(format!("{} {}: {}", what, path.display(), e))
    };
    let file = File::open(path).map_err(|e| failed("cannot open", &e))?;
    let mut archive = ZipArchive::new(file).map_err(|e| failed("cannot unpack", &e))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::Builder::new()
        .prefix(".scaling-")
        .suffix(".xlsx")
        .tempfile_in(dir)
        .map_err(|e| failed("cannot stage", &e))?;
    let mut writer = ZipWriter::new(tmp);

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|e| failed("cannot unpack", &e))?;
        if !SHEET_PART.is_match(entry.name()) {
            writer
                .raw_copy_file(entry)
                .map_err(|e| failed("cannot repack", &e))?;
            continue;
        }
        let name = entry.name().to_string();
        let options = FileOptions::default().compression_method(entry.compression());
        let mut xml = String::new();
        entry
            .read_to_string(&mut xml)
            .map_err(|e| failed("cannot read sheet of", &e))?;
        writer
            .start_file(name, options)
            .map_err(|e| failed("cannot repack", &e))?;
        writer
            .write_all(with_fit_to_page(&xml).as_bytes())
            .map_err(|e| failed("cannot repack", &e))?;
    }

    let tmp = writer.finish().map_err(|e| failed("cannot repack", &e))?;
    tmp.persist(path).map_err(|e| failed("cannot replace", &e))?;
    Ok(())
}

/// `xml` with `fitToPage="1"` in its `<sheetPr>`, creating the element when absent.
fn with_fit_to_page(xml: &str) -> String {
    if let Some(found) = PAGE_SETUP_PR.captures(xml) {
        let attrs = FIT_ATTR.replace(&found[1], "");
        let tag = format!(r#"<pageSetUpPr{} fitToPage="1"/>"#, attrs);
        return PAGE_SETUP_PR.replace(xml, NoExpand(&tag)).into_owned();
    }
    if SHEET_PR_EMPTY.is_match(xml) {
        let tag = format!("<sheetPr${{1}}>{}</sheetPr>", FIT_FLAG);
        return SHEET_PR_EMPTY.replace(xml, tag.as_str()).into_owned();
    }
    if let Some(close) = xml.find("</sheetPr>") {
        return format!("{}{}{}", &xml[..close], FIT_FLAG, &xml[close..]);
    }
    match WORKSHEET_OPEN.find(xml) {
        Some(open) => format!(
            "{}<sheetPr>{}</sheetPr>{}",
            &xml[..open.end()],
            FIT_FLAG,
            &xml[open.end()..]
        ),
        None => xml.to_string(),
    }
}

/// Runs `soffice --headless --convert-to pdf --outdir <dir> <file>`.
///
/// The office suite names its output after the input file stem; a missing
/// binary, a non-zero exit, or an absent output file are all failures.
pub struct SofficeConverter {
    binary: String,
}

impl SofficeConverter {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn from_config(cfg: &ConversionConfig) -> Self {
        Self::new(cfg.soffice_bin.clone())
    }
}

#[async_trait]
impl DocumentConverter for SofficeConverter {
    async fn convert_to_pdf(&self, input: &Path, out_dir: &Path) -> Result<PathBuf, DocumentError> {
        let stem = input.file_stem().ok_or_else(|| {
            DocumentError::ConversionFailed(format!("{} has no file name", input.display()))
        })?;
        let expected = out_dir.join(stem).with_extension("pdf");

        let output = Command::new(&self.binary)
            .arg("--headless")
            .arg("--convert-to")
            .arg("pdf")
            .arg("--outdir")
            .arg(out_dir)
            .arg(input)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => DocumentError::ConversionFailed(format!(
                    "{} not found; install LibreOffice and put it on PATH",
                    self.binary
                )),
                _ => DocumentError::ConversionFailed(format!("cannot run {}: {}", self.binary, e)),
            })?;

        if !output.status.success() {
            return Err(DocumentError::ConversionFailed(format!(
                "{} exited with {}: {}",
                self.binary,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        if !expected.exists() {
            return Err(DocumentError::ConversionFailed(format!(
                "{} produced no {}",
                self.binary,
                expected.display()
            )));
        }
        tracing::debug!(input = %input.display(), pdf = %expected.display(), "converted to pdf");
        Ok(expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_binary_is_a_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let conv = SofficeConverter::new("logbook-no-such-office-binary");
        let err = conv
            .convert_to_pdf(&dir.path().join("r.xlsx"), dir.path())
            .await
            .unwrap_err();
        match err {
            DocumentError::ConversionFailed(msg) => assert!(msg.contains("not found")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_zero_exit_and_missing_output_fail() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("r.xlsx");
        let err = SofficeConverter::new("false")
            .convert_to_pdf(&input, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::ConversionFailed(m) if m.contains("exited")));

        let err = SofficeConverter::new("true")
            .convert_to_pdf(&input, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::ConversionFailed(m) if m.contains("produced no")));
    }

    fn sheet_xml(path: &Path) -> String {
        let mut archive = ZipArchive::new(File::open(path).unwrap()).unwrap();
        let mut xml = String::new();
        archive
            .by_name("xl/worksheets/sheet1.xml")
            .unwrap()
            .read_to_string(&mut xml)
            .unwrap();
        xml
    }

    #[test]
    fn fit_to_page_rewrites_workbook() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("r.xlsx");
        let mut book = umya_spreadsheet::new_file();
        book.get_sheet_mut(&0)
            .unwrap()
            .get_cell_mut("A1")
            .set_value("kept");
        umya_spreadsheet::writer::xlsx::write(&book, &path).unwrap();

        fit_to_single_page(&path).unwrap();
        let xml = sheet_xml(&path);
        assert_eq!(xml.matches(r#"fitToPage="1""#).count(), 1);
        assert!(xml.find("<sheetPr").unwrap() < xml.find("<sheetData").unwrap());

        let book = umya_spreadsheet::reader::xlsx::read(&path).unwrap();
        let sheet = book.get_sheet(&0).unwrap();
        assert_eq!(sheet.get_value("A1"), "kept");
        assert_eq!(*sheet.get_page_setup().get_fit_to_width(), 1);
        assert_eq!(*sheet.get_page_setup().get_fit_to_height(), 1);

        // a second pass keeps a single flag
        fit_to_single_page(&path).unwrap();
        assert_eq!(sheet_xml(&path).matches(r#"fitToPage="1""#).count(), 1);
        assert!(fit_to_single_page(&dir.path().join("absent.xlsx")).is_err());
    }

    #[test]
    fn fit_flag_lands_in_sheet_properties() {
        let open = r#"<worksheet xmlns="m"><dimension ref="A1"/></worksheet>"#;
        assert_eq!(
            with_fit_to_page(open),
            r#"<worksheet xmlns="m"><sheetPr><pageSetUpPr fitToPage="1"/></sheetPr><dimension ref="A1"/></worksheet>"#
        );

        let empty = r#"<worksheet><sheetPr codeName="S1"/><dimension/></worksheet>"#;
        assert_eq!(
            with_fit_to_page(empty),
            r#"<worksheet><sheetPr codeName="S1"><pageSetUpPr fitToPage="1"/></sheetPr><dimension/></worksheet>"#
        );

        let tinted = r#"<worksheet><sheetPr><tabColor rgb="FF00FF00"/></sheetPr></worksheet>"#;
        assert_eq!(
            with_fit_to_page(tinted),
            r#"<worksheet><sheetPr><tabColor rgb="FF00FF00"/><pageSetUpPr fitToPage="1"/></sheetPr></worksheet>"#
        );

        let off = r#"<worksheet><sheetPr><pageSetUpPr autoPageBreaks="0" fitToPage="0"/></sheetPr></worksheet>"#;
        assert_eq!(
            with_fit_to_page(off),
            r#"<worksheet><sheetPr><pageSetUpPr autoPageBreaks="0" fitToPage="1"/></sheetPr></worksheet>"#
        );
    }
}
