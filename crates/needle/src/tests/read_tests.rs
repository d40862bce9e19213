use std::io::Cursor;

use super::full_needle;
use crate::{Needle, NeedleError, Version};

#[test]
fn round_trip_v2_all_fields() {
    let n = full_needle();
    let bytes = n.encode(Version::V2).unwrap();
    let mut cur = Cursor::new(bytes.clone());

    let (decoded, consumed) = Needle::read_at(&mut cur, 0, Version::V2).unwrap();
    assert_eq!(decoded, n);
    assert_eq!(consumed as usize, bytes.len());
}

#[test]
fn round_trip_v1_plain() {
    let n = Needle::new(5, 0xcafe, b"version one".to_vec());
    let bytes = n.encode(Version::V1).unwrap();
    let mut cur = Cursor::new(bytes.clone());

    let (decoded, consumed) = Needle::read_at(&mut cur, 0, Version::V1).unwrap();
    assert_eq!(decoded, n);
    assert_eq!(consumed as usize, bytes.len());
}

#[test]
fn round_trip_without_optional_fields() {
    let n = Needle::new(1, 2, b"data only".to_vec());
    let bytes = n.encode(Version::V3).unwrap();
    let mut cur = Cursor::new(bytes);
    let (decoded, _) = Needle::read_at(&mut cur, 0, Version::V3).unwrap();
    assert_eq!(decoded, n);
}

#[test]
fn sequential_records_decode_back_to_back() {
    let a = full_needle();
    let b = Needle::new(43, 7, b"second".to_vec());

    let mut buf = a.encode(Version::V2).unwrap();
    let a_len = buf.len() as u64;
    buf.extend_from_slice(&b.encode(Version::V2).unwrap());

    let mut cur = Cursor::new(buf);
    let (da, ca) = Needle::read_at(&mut cur, 0, Version::V2).unwrap();
    let (db, _) = Needle::read_at(&mut cur, a_len, Version::V2).unwrap();
    assert_eq!(da, a);
    assert_eq!(db, b);
    assert_eq!(u64::from(ca), a_len);
}

#[test]
fn checksum_mismatch_is_corrupt() {
    let n = full_needle();
    let mut bytes = n.encode(Version::V2).unwrap();
    // flip a data byte (data starts right after the 16-byte header)
    bytes[16] ^= 0xFF;

    let mut cur = Cursor::new(bytes);
    let err = Needle::read_at(&mut cur, 0, Version::V2).unwrap_err();
    assert!(matches!(err, NeedleError::Corrupt { offset: 0, .. }));
}

#[test]
fn truncated_record_is_corrupt() {
    let n = full_needle();
    let bytes = n.encode(Version::V2).unwrap();
    let cut = bytes.len() - 3;

    let mut cur = Cursor::new(bytes[..cut].to_vec());
    let err = Needle::read_at(&mut cur, 0, Version::V2).unwrap_err();
    assert!(matches!(err, NeedleError::Corrupt { offset: 0, .. }));
}

#[test]
fn truncated_header_is_corrupt() {
    let mut cur = Cursor::new(vec![0u8; 10]);
    let err = Needle::read_at(&mut cur, 0, Version::V2).unwrap_err();
    assert!(matches!(err, NeedleError::Corrupt { .. }));
}

#[test]
fn corrupt_offset_reports_record_start() {
    let a = Needle::new(1, 0, b"first".to_vec());
    let mut buf = a.encode(Version::V2).unwrap();
    let second_start = buf.len() as u64;
    let b = full_needle();
    buf.extend_from_slice(&b.encode(Version::V2).unwrap());
    buf.truncate(buf.len() - 5);

    let mut cur = Cursor::new(buf);
    let (da, _) = Needle::read_at(&mut cur, 0, Version::V2).unwrap();
    assert_eq!(da, a);

    let err = Needle::read_at(&mut cur, second_start, Version::V2).unwrap_err();
    match err {
        NeedleError::Corrupt { offset, .. } => assert_eq!(offset, second_start),
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn skip_body_keeps_metadata_drops_payload() {
    let n = full_needle();
    let bytes = n.encode(Version::V2).unwrap();
    let total = bytes.len();

    let mut cur = Cursor::new(bytes);
    let (meta, consumed) = Needle::read_at_skip_body(&mut cur, 0, Version::V2).unwrap();

    assert_eq!(consumed as usize, total, "skip mode must still consume the padding");
    assert!(meta.data.is_empty());
    assert!(meta.pairs.is_empty());
    assert_eq!(meta.size as usize, n.data.len(), "payload length survives");
    assert_eq!(meta.id, n.id);
    assert_eq!(meta.cookie, n.cookie);
    assert_eq!(meta.name, n.name);
    assert_eq!(meta.mime, n.mime);
    assert_eq!(meta.last_modified, n.last_modified);
    assert_eq!(meta.ttl, n.ttl);
    assert_eq!(meta.flags, n.flags);
}

#[test]
fn skip_body_ignores_corrupt_payload() {
    let n = full_needle();
    let mut bytes = n.encode(Version::V2).unwrap();
    bytes[16] ^= 0xFF; // would fail CRC in full mode

    let mut cur = Cursor::new(bytes);
    assert!(Needle::read_at_skip_body(&mut cur, 0, Version::V2).is_ok());
}

#[test]
fn absurd_size_field_is_corrupt_not_oom() {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&1u32.to_be_bytes()); // cookie
    bytes.extend_from_slice(&1u64.to_be_bytes()); // id
    bytes.extend_from_slice(&u32::MAX.to_be_bytes()); // size
    bytes.extend_from_slice(&[0u8; 8]);

    let mut cur = Cursor::new(bytes);
    let err = Needle::read_at(&mut cur, 0, Version::V2).unwrap_err();
    assert!(matches!(err, NeedleError::Corrupt { .. }));
}
