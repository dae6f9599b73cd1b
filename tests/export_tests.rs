mod common;

use common::{USER, context_for, signed_in_backend};
use medlog::backend::memory::{Failures, MemoryBackend};
use medlog::downloader::{self, TableFormat};
use medlog::entry::Entry;
use std::collections::HashSet;
use std::io::{Cursor, Read};
use zip::ZipArchive;

fn read_zip(bytes: &[u8]) -> ZipArchive<Cursor<Vec<u8>>> {
    ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap()
}

fn zip_text(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> String {
    let mut text = String::new();
    archive
        .by_name(name)
        .unwrap()
        .read_to_string(&mut text)
        .unwrap();
    text
}

fn zip_bytes(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    archive.by_name(name).unwrap().read_to_end(&mut bytes).unwrap();
    bytes
}

fn names(archive: &mut ZipArchive<Cursor<Vec<u8>>>) -> HashSet<String> {
    (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect()
}

#[tokio::test]
async fn csv_export_lists_name_and_image_count() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    let context = context_for(&backend).await;

    let download = context.export_table(TableFormat::Csv).unwrap();

    assert_eq!(download.filename, "entries.csv");
    assert_eq!(
        String::from_utf8(download.bytes).unwrap(),
        "Medicine Name,Image Count\nIbuprofen,2\n"
    );
}

#[tokio::test]
async fn xlsx_export_has_one_named_sheet() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png"], 20);
    backend.seed_entry(USER, "Aspirin", &[], 10);
    let context = context_for(&backend).await;

    let download = context.export_table(TableFormat::Xlsx).unwrap();
    assert_eq!(download.filename, "entries.xlsx");

    // An xlsx workbook is itself a zip of XML parts
    let mut workbook = read_zip(&download.bytes);
    let mut xml = String::new();
    for i in 0..workbook.len() {
        let mut part = workbook.by_index(i).unwrap();
        if part.name().ends_with(".xml") {
            part.read_to_string(&mut xml).unwrap();
        }
    }
    assert!(xml.contains("name=\"Entries\""));
    assert!(xml.contains("Medicine Name"));
    assert!(xml.contains("Image Count"));
    assert!(xml.contains("Ibuprofen"));
    assert!(xml.contains("Aspirin"));
}

#[tokio::test]
async fn archive_groups_images_by_medicine() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    backend.seed_blob("u1/a.png", b"first");
    backend.seed_blob("u1/b.png", b"second");
    let context = context_for(&backend).await;

    let export = context.export_archive().await.unwrap();
    assert_eq!(export.download.filename, "entries.zip");
    assert!(export.images.is_complete());

    let mut archive = read_zip(&export.download.bytes);
    let expected: HashSet<String> = [
        "Ibuprofen/medicine_name.txt",
        "Ibuprofen/image_1.png",
        "Ibuprofen/image_2.png",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(names(&mut archive), expected);
    assert_eq!(zip_text(&mut archive, "Ibuprofen/medicine_name.txt"), "Ibuprofen");
    assert_eq!(zip_bytes(&mut archive, "Ibuprofen/image_1.png"), b"first");
    assert_eq!(zip_bytes(&mut archive, "Ibuprofen/image_2.png"), b"second");
}

#[tokio::test]
async fn unfetchable_image_is_left_out() {
    let backend = signed_in_backend();
    backend.seed_entry(USER, "Ibuprofen", &["u1/a.png", "u1/b.png"], 20);
    backend.seed_blob("u1/a.png", b"first");
    backend.seed_blob("u1/b.png", b"second");
    backend.set_failures(Failures {
        fetch_paths: ["u1/a.png".to_string()].into_iter().collect(),
        ..Failures::default()
    });
    let context = context_for(&backend).await;

    let export = context.export_archive().await.unwrap();
    assert_eq!(export.images.failed.len(), 1);
    assert_eq!(export.images.failed[0].item, "u1/a.png");

    let mut archive = read_zip(&export.download.bytes);
    let found = names(&mut archive);
    assert!(found.contains("Ibuprofen/medicine_name.txt"));
    assert!(!found.contains("Ibuprofen/image_1.png"));
    assert_eq!(zip_bytes(&mut archive, "Ibuprofen/image_2.png"), b"second");
}

#[tokio::test]
async fn colliding_folder_names_merge() {
    let blobs = MemoryBackend::new();
    blobs.seed_blob("u1/one.png", b"slash");
    blobs.seed_blob("u1/two.png", b"dash");
    let slash = blobs.seed_entry(USER, "A/B", &["u1/one.png"], 20);
    let dash = blobs.seed_entry(USER, "A-B", &["u1/two.png"], 10);

    let entries: Vec<Entry> = vec![slash, dash];
    let export = downloader::export_archive(&entries, &blobs, 2).await.unwrap();

    let mut archive = read_zip(&export.download.bytes);
    assert_eq!(archive.len(), 2);
    assert_eq!(zip_text(&mut archive, "A_B/medicine_name.txt"), "A-B");
    assert_eq!(zip_bytes(&mut archive, "A_B/image_1.png"), b"dash");
}

#[tokio::test]
async fn missing_extension_defaults_to_jpg() {
    let blobs = MemoryBackend::new();
    blobs.seed_blob("u1/raw", b"bytes");
    let entry = blobs.seed_entry(USER, "Vitamin D3", &["u1/raw"], 20);

    let export = downloader::export_archive(&[entry], &blobs, 1).await.unwrap();

    let mut archive = read_zip(&export.download.bytes);
    assert_eq!(zip_bytes(&mut archive, "Vitamin_D3/image_1.jpg"), b"bytes");
    assert_eq!(zip_text(&mut archive, "Vitamin_D3/medicine_name.txt"), "Vitamin D3");
}

#[tokio::test]
async fn empty_list_exports_headers_and_an_empty_archive() {
    let backend = signed_in_backend();
    let context = context_for(&backend).await;

    let csv = context.export_table(TableFormat::Csv).unwrap();
    assert_eq!(
        String::from_utf8(csv.bytes).unwrap(),
        "Medicine Name,Image Count\n"
    );

    let export = context.export_archive().await.unwrap();
    assert_eq!(read_zip(&export.download.bytes).len(), 0);
}
