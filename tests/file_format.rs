//! # File Format and Corruption Tests
//!
//! Header validation on open, and the checksum/packet guarantees: any
//! single-byte mutation inside a written binary section surfaces as
//! `BadChecksum` (raw flip) or `BadCvPacket` (flip with the page checksum
//! recomputed, corrupting the packet structure itself).

use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crc::{Crc, CRC_32_ISCSI};
use e57rs::{ErrorCode, ImageFile, MemoryRepresentation, SourceDestBuffer};
use tempfile::tempdir;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);
const PAGE: u64 = 1024;
const PAYLOAD: usize = 1020;

/// Flips one byte at a physical offset, leaving the page checksum stale.
fn flip_byte_raw(path: &Path, physical_offset: u64) {
    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut byte = [0u8; 1];
    file.seek(SeekFrom::Start(physical_offset)).unwrap();
    file.read_exact(&mut byte).unwrap();
    byte[0] ^= 0xFF;
    file.seek(SeekFrom::Start(physical_offset)).unwrap();
    file.write_all(&byte).unwrap();
}

/// Overwrites bytes at a physical offset and restamps the page checksum,
/// so only the content mutation is observable.
fn patch_fixing_checksum(path: &Path, physical_offset: u64, bytes: &[u8]) {
    let page_no = physical_offset / PAGE;
    assert!(
        (physical_offset + bytes.len() as u64 - 1) / PAGE == page_no,
        "patch must stay within one page"
    );

    let mut file = OpenOptions::new().read(true).write(true).open(path).unwrap();
    let mut page = [0u8; PAGE as usize];
    file.seek(SeekFrom::Start(page_no * PAGE)).unwrap();
    file.read_exact(&mut page).unwrap();

    let within = (physical_offset % PAGE) as usize;
    page[within..within + bytes.len()].copy_from_slice(bytes);
    let checksum = CRC32.checksum(&page[..PAYLOAD]);
    page[PAYLOAD..].copy_from_slice(&checksum.to_le_bytes());

    file.seek(SeekFrom::Start(page_no * PAGE)).unwrap();
    file.write_all(&page).unwrap();
}

/// Writes a container holding one integer vector large enough to span
/// several physical pages.
fn build_container(dir: &Path) -> (PathBuf, Vec<i64>) {
    let path = dir.join("scan.e57");
    let values: Vec<i64> = (0..5000i64).map(|i| i % 4096).collect();

    let imf = ImageFile::create(&path).unwrap();
    let points = imf.new_compressed_vector();
    let proto = imf.new_structure();
    proto.set_child("x", &imf.new_integer(0, 4095)).unwrap();
    points.set_prototype(&proto).unwrap();
    imf.root().set_child("points", &points).unwrap();

    let mut writer = points
        .writer(vec![SourceDestBuffer::i64_values("x", values.clone())])
        .unwrap();
    writer.write(values.len()).unwrap();
    writer.close().unwrap();
    imf.close().unwrap();

    (path, values)
}

fn read_all(path: &Path, capacity: usize) -> e57rs::Result<Vec<i64>> {
    let imf = ImageFile::open(path)?;
    let points = imf.root().get("points")?;
    let out = SourceDestBuffer::destination("x", MemoryRepresentation::Int64, capacity);
    let mut reader = points.reader(vec![out.clone()])?;
    let mut collected = Vec::new();
    loop {
        let produced = reader.read()?;
        if produced == 0 {
            break;
        }
        collected.extend_from_slice(&out.i64_data()?[..produced]);
    }
    reader.close()?;
    Ok(collected)
}

mod header_validation {
    use super::*;

    #[test]
    fn wrong_signature_is_rejected() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());
        patch_fixing_checksum(&path, 0, b"NOT-E57!");

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadFileSignature);
    }

    #[test]
    fn unknown_major_version_is_rejected() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());
        patch_fixing_checksum(&path, 8, &99u32.to_le_bytes());

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::UnknownFileVersion);
    }

    #[test]
    fn truncated_file_is_rejected() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - PAGE).unwrap();

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadFileLength);
    }

    #[test]
    fn extended_file_is_rejected() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());
        let len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len + PAGE).unwrap();

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadFileLength);
    }

    #[test]
    fn header_length_field_must_match_observed_length() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());
        patch_fixing_checksum(&path, 16, &(123_456u64).to_le_bytes());

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadFileLength);
    }

    #[test]
    fn intact_container_reads_back_fully() {
        let dir = tempdir().unwrap();
        let (path, values) = build_container(dir.path());
        assert_eq!(read_all(&path, 1000).unwrap(), values);
    }
}

mod section_corruption {
    use super::*;

    #[test]
    fn raw_byte_flip_in_section_fails_bad_checksum() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());

        // the binary section begins right after the 48-byte header; offset
        // 3000 lands inside the packet payloads on the third physical page
        flip_byte_raw(&path, 3000);

        let err = read_all(&path, 1000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadChecksum);
    }

    #[test]
    fn packet_header_corruption_fails_bad_cv_packet() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());

        // first data packet starts at logical 80 = physical 80; byte 4 of
        // its header is the low byte of bytestreamCount
        patch_fixing_checksum(&path, 84, &[7]);

        let err = read_all(&path, 1000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadCvPacket);
    }

    #[test]
    fn section_header_corruption_fails_bad_cv_header() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());

        // the section header's id byte sits at logical 48 = physical 48
        patch_fixing_checksum(&path, 48, &[9]);

        let err = read_all(&path, 1000).unwrap_err();
        assert_eq!(err.code(), ErrorCode::BadCvHeader);
    }

    #[test]
    fn xml_corruption_fails_at_open() {
        let dir = tempdir().unwrap();
        let (path, _) = build_container(dir.path());

        // find the opening e57Root tag in the serialized XML and break it
        let bytes = std::fs::read(&path).unwrap();
        let needle = b"<e57Root";
        let at = bytes
            .windows(needle.len())
            .position(|w| w == needle)
            .expect("XML section contains the root tag") as u64;
        patch_fixing_checksum(&path, at + 1, b"x");

        let err = ImageFile::open(&path).unwrap_err();
        assert_eq!(err.code(), ErrorCode::XmlParser);
    }
}
