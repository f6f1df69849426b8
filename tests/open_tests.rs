//! Opening archives: EOCD discovery, ZIP64, CRX prefixes and entry metadata.

mod common;

use common::*;
use streamzip::zip::EntryType;
use streamzip::{LocalFileReader, OpenOptions, ZipArchive, ZipError};

fn kind(err: &anyhow::Error) -> &ZipError {
    ZipError::find(err).unwrap_or_else(|| panic!("not a ZipError: {err:#}"))
}

#[tokio::test]
async fn lists_every_central_directory_record() {
    let archive = ZipArchive::open(source(sample_builder().build()))
        .await
        .unwrap();

    assert_eq!(archive.record_count(), 5);
    assert_eq!(archive.entries().len(), 5);

    let paths: Vec<&str> = archive.entries().iter().map(|e| e.path.as_str()).collect();
    assert_eq!(
        paths,
        [
            "hello.txt",
            "docs/",
            "docs/lorem.txt",
            "docs/noise.bin",
            "empty.txt"
        ]
    );
    assert!(!archive.info().zip64);
    assert!(archive.info().crx.is_none());
}

#[tokio::test]
async fn entry_metadata() {
    let archive = ZipArchive::open(source(sample_builder().build()))
        .await
        .unwrap();

    let dir = archive.find("docs/").unwrap();
    assert_eq!(dir.entry_type, EntryType::Directory);
    assert!(dir.is_directory());

    let lorem = archive.find("docs/lorem.txt").unwrap();
    assert_eq!(lorem.entry_type, EntryType::File);
    assert_eq!(lorem.uncompressed_size, 20_000);
    assert!(lorem.compressed_size < lorem.uncompressed_size);
    assert_eq!(lorem.crc32, crc32fast::hash(&common::lorem(20_000)));
    assert!(!lorem.is_encrypted());

    let dt = lorem.last_modified;
    assert_eq!((dt.year, dt.month, dt.day), (2021, 6, 15));
    assert_eq!((dt.hour, dt.minute, dt.second), (13, 45, 30));

    assert!(archive.find("missing.txt").is_none());
}

#[tokio::test]
async fn archive_and_entry_comments() {
    let bytes = ZipBuilder::new()
        .entry(TestEntry::stored("a.txt", b"a").comment("first file"))
        .comment("built for tests")
        .build();
    let archive = ZipArchive::open(source(bytes)).await.unwrap();

    assert_eq!(archive.comment(), "built for tests");
    assert_eq!(archive.find("a.txt").unwrap().comment, "first file");
}

#[tokio::test]
async fn empty_archive() {
    let archive = ZipArchive::open(source(ZipBuilder::new().build()))
        .await
        .unwrap();
    assert_eq!(archive.record_count(), 0);
    assert!(archive.entries().is_empty());
}

#[tokio::test]
async fn non_archive_has_no_signature() {
    let bytes = b"this is not a zip archive, only text. ".repeat(10);
    let err = ZipArchive::open(source(bytes)).await.err().unwrap();
    assert!(matches!(kind(&err), ZipError::SignatureNotFound));

    let err = ZipArchive::open(source(Vec::new())).await.err().unwrap();
    assert!(matches!(kind(&err), ZipError::SignatureNotFound));
}

#[tokio::test]
async fn truncated_archive_has_no_signature() {
    let mut bytes = sample_builder().build();
    // drop the 22-byte EOCD record
    bytes.truncate(bytes.len() - 22);

    let err = ZipArchive::open(source(bytes)).await.err().unwrap();
    assert!(matches!(kind(&err), ZipError::SignatureNotFound));
}

#[tokio::test]
async fn long_comment_needs_larger_tail() {
    let comment = "c".repeat(200);
    let bytes = sample_builder().comment(&comment).build();

    let err = ZipArchive::open(source(bytes.clone())).await.err().unwrap();
    assert!(matches!(kind(&err), ZipError::SignatureNotFound));

    let archive = ZipArchive::open_with(source(bytes), OpenOptions::default().tail_size(300))
        .await
        .unwrap();
    assert_eq!(archive.comment(), comment);
    assert_eq!(archive.entries().len(), 5);
}

#[tokio::test]
async fn zip64_matches_plain_archive() {
    let plain = ZipArchive::open(source(sample_builder().build()))
        .await
        .unwrap();
    let zip64 = ZipArchive::open(source(sample_builder().zip64().build()))
        .await
        .unwrap();

    assert!(zip64.info().zip64);
    assert_eq!(zip64.record_count(), plain.record_count());

    for (a, b) in plain.entries().iter().zip(zip64.entries()) {
        assert_eq!(a.path, b.path);
        assert_eq!(a.lfh_offset, b.lfh_offset);
        assert_eq!(a.compressed_size, b.compressed_size);
        assert_eq!(
            a.buffer(None).await.unwrap(),
            b.buffer(None).await.unwrap(),
            "{}",
            a.path
        );
    }
}

#[tokio::test]
async fn zip64_locator_with_wrong_signature() {
    let mut bytes = sample_builder().zip64().build();
    // locator sits right before the 22-byte EOCD
    let locator = bytes.len() - 22 - 20;
    bytes[locator..locator + 4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());

    let err = ZipArchive::open(source(bytes)).await.err().unwrap();
    match kind(&err) {
        ZipError::Zip64SignatureMismatch {
            expected, found, ..
        } => {
            assert_eq!(*expected, 0x0706_4b50);
            assert_eq!(*found, 0xDEAD_BEEF);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn zip64_record_with_wrong_signature() {
    let mut bytes = sample_builder().zip64().build();
    let record = bytes.len() - 22 - 20 - 56;
    bytes[record..record + 4].copy_from_slice(&0u32.to_le_bytes());

    let err = ZipArchive::open(source(bytes)).await.err().unwrap();
    assert!(matches!(
        kind(&err),
        ZipError::Zip64SignatureMismatch {
            expected: 0x0606_4b50,
            found: 0,
            ..
        }
    ));
}

#[tokio::test]
async fn crx_prefix_shifts_offsets() {
    let key = b"public-key";
    let signature = b"sig";
    let built = sample_builder().crx(key, signature).build_with_layout();
    let prefix = 16 + key.len() as u64 + signature.len() as u64;

    let archive = ZipArchive::open(source(built.bytes)).await.unwrap();
    let crx = archive.info().crx.as_ref().unwrap();
    assert_eq!(crx.version, 2);
    assert_eq!(crx.public_key, key);
    assert_eq!(crx.signature, signature);
    assert_eq!(crx.size, prefix);

    for (entry, offset) in archive.entries().iter().zip(&built.local_offsets) {
        assert_eq!(entry.lfh_offset, offset + prefix);
    }
    assert_eq!(
        archive.find("hello.txt").unwrap().buffer(None).await.unwrap(),
        b"Hello, World!"
    );
}

#[tokio::test]
async fn crx_prefix_with_zip64() {
    let bytes = sample_builder().zip64().crx(b"k", b"s").build();
    let archive = ZipArchive::open(source(bytes)).await.unwrap();

    assert!(archive.info().zip64);
    assert_eq!(archive.entries().len(), 5);
    let lorem = archive.find("docs/lorem.txt").unwrap();
    assert_eq!(lorem.buffer(None).await.unwrap(), common::lorem(20_000));
}

#[tokio::test]
async fn crx_prefix_cannot_push_offsets_past_u64() {
    let bytes = sample_builder().zip64().crx(b"k", b"s").build();
    let locator = bytes.len() - 22 - 20;
    let record = locator - 56;

    let mut far_record = bytes.clone();
    far_record[locator + 8..locator + 16].copy_from_slice(&u64::MAX.to_le_bytes());
    let err = ZipArchive::open(source(far_record)).await.err().unwrap();
    assert!(matches!(
        kind(&err),
        ZipError::OffsetOverflow {
            record: "zip64 end of central directory"
        }
    ));

    let mut far_directory = bytes;
    far_directory[record + 48..record + 56].copy_from_slice(&u64::MAX.to_le_bytes());
    let err = ZipArchive::open(source(far_directory)).await.err().unwrap();
    assert!(matches!(
        kind(&err),
        ZipError::OffsetOverflow {
            record: "central directory"
        }
    ));
}

#[tokio::test]
async fn crx_detection_can_be_disabled() {
    let bytes = sample_builder().crx(b"key", b"sig").build();
    let result = ZipArchive::open_with(source(bytes), OpenOptions::default().crx(false)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn cp437_names() {
    let bytes = ZipBuilder::new()
        .entry(TestEntry::stored("", b"x").raw_name(b"caf\x82.txt"))
        .build();
    let archive = ZipArchive::open(source(bytes)).await.unwrap();

    let entry = &archive.entries()[0];
    assert_eq!(entry.path, "café.txt");
    assert_eq!(entry.raw_path, b"caf\x82.txt");
    assert!(!entry.is_utf8());
}

#[tokio::test]
async fn utf8_flagged_names() {
    let bytes = ZipBuilder::new()
        .entry(TestEntry::stored("naïve/日本.txt", b"x").utf8())
        .build();
    let archive = ZipArchive::open(source(bytes)).await.unwrap();

    let entry = &archive.entries()[0];
    assert!(entry.is_utf8());
    assert_eq!(entry.path, "naïve/日本.txt");
    assert_eq!(entry.buffer(None).await.unwrap(), b"x");
}

#[tokio::test]
async fn unicode_path_extra_overrides_name() {
    let raw = b"old.txt";
    let mut body = vec![1u8];
    body.extend_from_slice(&crc32fast::hash(raw).to_le_bytes());
    body.extend_from_slice("grüße.txt".as_bytes());

    let stale = {
        let mut body = vec![1u8];
        body.extend_from_slice(&0u32.to_le_bytes());
        body.extend_from_slice(b"ignored.txt");
        body
    };

    let bytes = ZipBuilder::new()
        .entry(TestEntry::stored("old.txt", b"1").central_extra(extra_block(0x7075, &body)))
        .entry(TestEntry::stored("kept.txt", b"2").central_extra(extra_block(0x7075, &stale)))
        .build();
    let archive = ZipArchive::open(source(bytes)).await.unwrap();

    assert_eq!(archive.entries()[0].path, "grüße.txt");
    assert_eq!(archive.entries()[1].path, "kept.txt");
    assert_eq!(archive.entries()[0].buffer(None).await.unwrap(), b"1");
}

#[tokio::test]
async fn local_file_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sample.zip");
    std::fs::write(&path, sample_builder().build()).unwrap();

    let reader = std::sync::Arc::new(LocalFileReader::new(&path).unwrap());
    let archive = ZipArchive::open(reader).await.unwrap();

    assert_eq!(archive.entries().len(), 5);
    let noise = archive.find("docs/noise.bin").unwrap();
    assert_eq!(noise.buffer(None).await.unwrap(), common::noise(3_000, 7));
}
