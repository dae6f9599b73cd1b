use crate::backend::BlobStore;
use crate::batch::{BatchResult, ItemFailure};
use crate::entry::Entry;
use crate::error::ExportError;
use futures::FutureExt;
use futures::stream::{self, StreamExt};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::str::FromStr;
use zip::{CompressionMethod, ZipWriter, write::FileOptions};

/// Worksheet name used by the table exports
pub const SHEET_NAME: &str = "Entries";

/// Column headers of the table exports
pub const HEADERS: [&str; 2] = ["Medicine Name", "Image Count"];

/// Text file written into every archive folder
pub const NAME_FILE: &str = "medicine_name.txt";

pub const ARCHIVE_FILENAME: &str = "entries.zip";

/// Extension used when a resolved image location has none
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

lazy_static! {
    static ref NON_ALPHANUMERIC: Regex = Regex::new("[^A-Za-z0-9]").unwrap();
}

/// Spreadsheet format for the table export
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TableFormat {
    Csv,
    Xlsx,
}

impl TableFormat {
    pub fn filename(self) -> &'static str {
        match self {
            TableFormat::Csv => "entries.csv",
            TableFormat::Xlsx => "entries.xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            TableFormat::Csv => "text/csv; charset=utf-8",
            TableFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

impl FromStr for TableFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(TableFormat::Csv),
            "xlsx" => Ok(TableFormat::Xlsx),
            other => Err(format!("Unsupported export format: {}", other)),
        }
    }
}

/// A finished export, ready to hand to the client as a download
#[derive(Clone, Debug)]
pub struct Download {
    pub filename: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Convert entries to CSV
///
/// Writes a header row (`Medicine Name,Image Count`) followed by one row per
/// entry. Labels containing commas, quotes or newlines are quoted with inner
/// quotes doubled.
///
/// # Arguments
/// * `entries` - Entries to export, in display order
///
/// # Returns
/// * `String` - CSV content
///
/// # Examples
/// ```
/// use medlog::downloader::to_csv;
///
/// assert_eq!(to_csv(&[]), "Medicine Name,Image Count\n");
/// ```
pub fn to_csv(entries: &[Entry]) -> String {
    let mut csv_content = HEADERS.join(",");
    csv_content.push('\n');

    for entry in entries {
        csv_content.push_str(&escape_csv(&entry.medicine_name));
        csv_content.push(',');
        csv_content.push_str(&entry.image_count().to_string());
        csv_content.push('\n');
    }

    csv_content
}

fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Convert entries to XLSX format
///
/// Produces a workbook with a single worksheet named `Entries` holding the
/// same two columns as the CSV export. Image counts are numeric cells.
///
/// # Returns
/// * `Result<Vec<u8>, ExportError>` - XLSX file content as bytes or an error
pub fn to_xlsx(entries: &[Entry]) -> Result<Vec<u8>, ExportError> {
    use rust_xlsxwriter::{Workbook, Worksheet};

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(SHEET_NAME)?;

    for (col, header) in HEADERS.iter().enumerate() {
        worksheet.write_string(0, col as u16, *header)?;
    }

    for (i, entry) in entries.iter().enumerate() {
        let row = (i + 1) as u32;
        worksheet.write_string(row, 0, entry.medicine_name.as_str())?;
        worksheet.write_number(row, 1, entry.image_count() as f64)?;
    }

    workbook.push_worksheet(worksheet);
    let buffer = workbook.save_to_buffer()?;

    Ok(buffer)
}

/// Table export in the requested format
pub fn export_table(entries: &[Entry], format: TableFormat) -> Result<Download, ExportError> {
    let bytes = match format {
        TableFormat::Csv => to_csv(entries).into_bytes(),
        TableFormat::Xlsx => to_xlsx(entries)?,
    };
    log::info!("Exported {} entries as {}", entries.len(), format.filename());

    Ok(Download {
        filename: format.filename().to_string(),
        content_type: format.content_type(),
        bytes,
    })
}

/// Archive folder name for a label
///
/// Every character outside `A-Z`, `a-z`, `0-9` becomes `_`. Distinct labels
/// can map to the same folder (`A/B` and `A-B` both give `A_B`).
///
/// # Examples
/// ```
/// use medlog::downloader::sanitize_folder_name;
///
/// assert_eq!(sanitize_folder_name("Vitamin D3 (1000 IU)"), "Vitamin_D3__1000_IU_");
/// ```
pub fn sanitize_folder_name(label: &str) -> String {
    NON_ALPHANUMERIC.replace_all(label, "_").into_owned()
}

/// Extension of the trailing path segment of a location, or `jpg`
///
/// Query strings and fragments are ignored.
pub fn image_extension(location: &str) -> String {
    let path = location
        .split(['?', '#'])
        .next()
        .unwrap_or(location);
    let segment = path.rsplit('/').next().unwrap_or(path);

    match segment.rsplit_once('.') {
        Some((_, ext)) if !ext.is_empty() => ext.to_string(),
        _ => DEFAULT_IMAGE_EXTENSION.to_string(),
    }
}

/// Archive contents keyed by path; writing an existing path replaces it
#[derive(Debug, Default)]
struct ArchiveLayout {
    files: Vec<(String, Vec<u8>)>,
    index: HashMap<String, usize>,
}

impl ArchiveLayout {
    fn put(&mut self, path: String, bytes: Vec<u8>) {
        match self.index.get(&path) {
            Some(&i) => self.files[i].1 = bytes,
            None => {
                self.index.insert(path.clone(), self.files.len());
                self.files.push((path, bytes));
            }
        }
    }

    fn write_zip(&self) -> Result<Vec<u8>, ExportError> {
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut zip = ZipWriter::new(&mut cursor);
            let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

            for (path, bytes) in &self.files {
                zip.start_file(path.as_str(), options)?;
                zip.write_all(bytes)?;
            }
            zip.finish()?;
        }
        Ok(cursor.into_inner())
    }
}

/// A finished archive plus the per-image fetch outcomes
#[derive(Debug)]
pub struct ArchiveExport {
    pub download: Download,

    /// Archive paths written, and images that could not be fetched
    pub images: BatchResult<String>,
}

struct FetchedImage {
    entry: usize,
    position: usize,
    outcome: Result<(String, Vec<u8>), ItemFailure>,
}

async fn fetch_image(
    blobs: &dyn BlobStore,
    entry: usize,
    position: usize,
    path: &str,
) -> FetchedImage {
    let location = blobs.resolve(path);
    let outcome = match blobs.fetch(&location).await {
        Ok(bytes) => Ok((image_extension(&location), bytes)),
        Err(e) => {
            log::warn!("Skipping image {} in export: {}", path, e);
            Err(ItemFailure {
                item: path.to_string(),
                reason: e.to_string(),
            })
        }
    };
    FetchedImage {
        entry,
        position,
        outcome,
    }
}

/// Build a zip with one folder per entry
///
/// Each folder (named by [`sanitize_folder_name`]) gets `medicine_name.txt`
/// with the raw label and `image_{n}.{ext}` for each image in order, `n`
/// counting from 1. An image that cannot be fetched is logged and left out;
/// the rest of the archive is unaffected. Entries sharing a folder name merge,
/// later files replacing earlier ones at the same path.
///
/// # Arguments
/// * `entries` - The currently loaded entries
/// * `blobs` - Store used to resolve and fetch image bytes
/// * `concurrency` - Maximum simultaneous fetches
pub async fn export_archive(
    entries: &[Entry],
    blobs: &dyn BlobStore,
    concurrency: usize,
) -> Result<ArchiveExport, ExportError> {
    let jobs: Vec<(usize, usize, &str)> = entries
        .iter()
        .enumerate()
        .flat_map(|(e, entry)| {
            entry
                .images
                .iter()
                .enumerate()
                .map(move |(i, path)| (e, i, path.as_str()))
        })
        .collect();

    let fetches: Vec<_> = jobs
        .into_iter()
        .map(|(entry, position, path)| fetch_image(blobs, entry, position, path).boxed())
        .collect();
    let fetched: Vec<FetchedImage> = stream::iter(fetches)
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut layout = ArchiveLayout::default();
    let mut images = BatchResult::new();
    let mut fetched = fetched.into_iter().peekable();

    for (e, entry) in entries.iter().enumerate() {
        let folder = sanitize_folder_name(&entry.medicine_name);
        layout.put(
            format!("{}/{}", folder, NAME_FILE),
            entry.medicine_name.clone().into_bytes(),
        );

        while let Some(image) = fetched.next_if(|image| image.entry == e) {
            match image.outcome {
                Ok((ext, bytes)) => {
                    let path = format!("{}/image_{}.{}", folder, image.position + 1, ext);
                    layout.put(path.clone(), bytes);
                    images.push_ok(path);
                }
                Err(failure) => images.failed.push(failure),
            }
        }
    }

    let bytes = layout.write_zip()?;
    log::info!(
        "Exported {} entries to archive ({} images, {} skipped)",
        entries.len(),
        images.succeeded.len(),
        images.failed.len()
    );

    Ok(ArchiveExport {
        download: Download {
            filename: ARCHIVE_FILENAME.to_string(),
            content_type: "application/zip",
            bytes,
        },
        images,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(name: &str, images: &[&str]) -> Entry {
        Entry {
            id: name.to_string(),
            user_id: "u1".to_string(),
            medicine_name: name.to_string(),
            images: images.iter().map(|s| s.to_string()).collect(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn csv_has_header_and_counts() {
        let csv = to_csv(&[entry("Ibuprofen", &["u1/a.png", "u1/b.png"]), entry("Zinc", &[])]);
        assert_eq!(csv, "Medicine Name,Image Count\nIbuprofen,2\nZinc,0\n");
    }

    #[test]
    fn csv_quotes_special_characters() {
        assert_eq!(escape_csv("plain"), "plain");
        assert_eq!(escape_csv("a,b"), "\"a,b\"");
        assert_eq!(escape_csv("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(escape_csv("two\nlines"), "\"two\nlines\"");
    }

    #[test]
    fn colliding_labels_share_a_folder() {
        assert_eq!(sanitize_folder_name("A/B"), "A_B");
        assert_eq!(sanitize_folder_name("A-B"), "A_B");
        assert_eq!(sanitize_folder_name("Ibuprofen"), "Ibuprofen");
        assert_eq!(sanitize_folder_name("Café"), "Caf_");
    }

    #[test]
    fn extension_from_trailing_segment() {
        assert_eq!(image_extension("https://h/storage/u1/a.png"), "png");
        assert_eq!(image_extension("https://h/storage/u1/a.png?token=x"), "png");
        assert_eq!(image_extension("https://h/storage/u1/abc"), "jpg");
        assert_eq!(image_extension("https://h.example/u1.dir/abc"), "jpg");
        assert_eq!(image_extension("file:///data/u1/a.webp"), "webp");
    }

    #[test]
    fn table_format_parsing() {
        assert_eq!("CSV".parse::<TableFormat>(), Ok(TableFormat::Csv));
        assert_eq!("xlsx".parse::<TableFormat>(), Ok(TableFormat::Xlsx));
        assert!("pdf".parse::<TableFormat>().is_err());
        assert_eq!(TableFormat::Xlsx.filename(), "entries.xlsx");
    }

    #[test]
    fn layout_overwrites_in_place() {
        let mut layout = ArchiveLayout::default();
        layout.put("A_B/medicine_name.txt".into(), b"A/B".to_vec());
        layout.put("A_B/image_1.png".into(), b"1".to_vec());
        layout.put("A_B/medicine_name.txt".into(), b"A-B".to_vec());

        assert_eq!(layout.files.len(), 2);
        assert_eq!(layout.files[0], ("A_B/medicine_name.txt".to_string(), b"A-B".to_vec()));
    }
}
