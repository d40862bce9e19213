use super::*;
use std::fs;
use std::io::Cursor;
use tempfile::tempdir;

// -------------------- Helpers --------------------

fn entry(id: u64, offset_units: u32, size: u32) -> IndexEntry {
    IndexEntry {
        id,
        offset_units,
        size,
    }
}

fn replay_all(path: &std::path::Path) -> Result<Vec<IndexEntry>, IndexError> {
    let mut reader = IndexReader::open(path)?;
    let mut entries = Vec::new();
    reader.replay(|e| entries.push(e))?;
    Ok(entries)
}

fn replay_from_bytes(data: &[u8]) -> Result<Vec<IndexEntry>, IndexError> {
    let mut reader = IndexReader::from_reader(Cursor::new(data.to_vec()));
    let mut entries = Vec::new();
    reader.replay(|e| entries.push(e))?;
    Ok(entries)
}

// -------------------- Basic write & replay --------------------

#[test]
fn write_and_replay_in_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(1, 1, 40)).unwrap();
        w.append(&entry(2, 6, 48)).unwrap();
        w.append(&IndexEntry::tombstone(1)).unwrap();
    }

    assert_eq!(fs::metadata(&path).unwrap().len(), 48);
    let entries = replay_all(&path).unwrap();
    assert_eq!(
        entries,
        vec![entry(1, 1, 40), entry(2, 6, 48), IndexEntry::tombstone(1)]
    );
    assert!(entries[2].is_tombstone());
}

#[test]
fn entry_is_big_endian_on_disk() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(0x0102_0304_0506_0708, 0x0A0B_0C0D, 0x1122_3344))
            .unwrap();
    }

    let bytes = fs::read(&path).unwrap();
    assert_eq!(
        bytes,
        vec![
            0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, // id
            0x0A, 0x0B, 0x0C, 0x0D, // offset_units
            0x11, 0x22, 0x33, 0x44, // size
        ]
    );
}

#[test]
fn byte_offset_is_units_times_eight() {
    assert_eq!(entry(1, 1, 40).byte_offset(), 8);
    assert_eq!(entry(1, u32::MAX, 40).byte_offset(), u64::from(u32::MAX) * 8);
}

#[test]
fn replay_empty_file() {
    let entries = replay_from_bytes(b"").unwrap();
    assert!(entries.is_empty());
}

#[test]
fn append_to_existing_index() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(1, 1, 40)).unwrap();
    }
    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(2, 6, 48)).unwrap();
    }

    let entries = replay_all(&path).unwrap();
    assert_eq!(entries.len(), 2);
}

#[test]
fn open_non_existent_file_returns_io_error() {
    let result = IndexReader::open("/tmp/non_existent_volume.idx");
    assert!(matches!(result, Err(IndexError::Io(_))));
}

// -------------------- Corrupt tail --------------------

#[test]
fn trailing_fragment_reports_valid_prefix() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(1, 1, 40)).unwrap();
        w.append(&entry(2, 6, 48)).unwrap();
    }

    // crash mid-append: 5 stray bytes
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&[0xAA; 5]);
    fs::write(&path, &data).unwrap();

    let mut reader = IndexReader::open(&path).unwrap();
    let mut seen = Vec::new();
    let err = reader.replay(|e| seen.push(e)).unwrap_err();

    // both complete entries were delivered before the error
    assert_eq!(seen, vec![entry(1, 1, 40), entry(2, 6, 48)]);
    match err {
        IndexError::Corrupt { valid_len } => assert_eq!(valid_len, 32),
        other => panic!("expected Corrupt, got {other:?}"),
    }
}

#[test]
fn fragment_only_file_has_zero_valid_prefix() {
    let err = replay_from_bytes(&[1, 2, 3]).unwrap_err();
    assert!(matches!(err, IndexError::Corrupt { valid_len: 0 }));
}

#[test]
fn truncating_to_valid_len_recovers() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&entry(1, 1, 40)).unwrap();
    }
    let mut data = fs::read(&path).unwrap();
    data.extend_from_slice(&[0xAA; 7]);
    fs::write(&path, &data).unwrap();

    let valid_len = match replay_all(&path) {
        Err(IndexError::Corrupt { valid_len }) => valid_len,
        other => panic!("expected Corrupt, got {other:?}"),
    };

    let data = fs::read(&path).unwrap();
    fs::write(&path, &data[..valid_len as usize]).unwrap();

    let entries = replay_all(&path).unwrap();
    assert_eq!(entries, vec![entry(1, 1, 40)]);
}

// -------------------- Incremental walk --------------------

#[test]
fn walk_from_resumes_where_replay_stopped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    {
        let mut w = IndexWriter::create(&path, false).unwrap();
        w.append(&entry(1, 1, 40)).unwrap();
        w.append(&entry(2, 6, 48)).unwrap();
        w.sync_to_disk().unwrap();
    }

    let mut reader = IndexReader::open(&path).unwrap();
    let mut first = Vec::new();
    let next = reader.walk_from(0, |e| first.push(e)).unwrap();
    assert_eq!(next, 32);
    assert_eq!(first.len(), 2);

    // more entries arrive
    {
        let mut w = IndexWriter::create(&path, true).unwrap();
        w.append(&IndexEntry::tombstone(1)).unwrap();
    }

    let mut reader = IndexReader::open(&path).unwrap();
    let mut second = Vec::new();
    let next = reader.walk_from(next, |e| second.push(e)).unwrap();
    assert_eq!(next, 48);
    assert_eq!(second, vec![IndexEntry::tombstone(1)]);
}

#[test]
fn walk_from_rejects_misaligned_offset() {
    let mut reader = IndexReader::from_reader(Cursor::new(vec![0u8; 32]));
    let result = reader.walk_from(9, |_| {});
    assert!(matches!(result, Err(IndexError::Corrupt { .. })));
}

// -------------------- Volume-scale --------------------

#[test]
fn many_entries_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("1.idx");

    let n = 5_000u64;
    {
        let mut w = IndexWriter::create(&path, false).unwrap();
        for i in 1..=n {
            w.append(&entry(i, i as u32, 24)).unwrap();
        }
        w.sync_to_disk().unwrap();
    }

    let entries = replay_all(&path).unwrap();
    assert_eq!(entries.len(), n as usize);
    for (i, e) in entries.iter().enumerate() {
        assert_eq!(e.id, i as u64 + 1);
    }
}
