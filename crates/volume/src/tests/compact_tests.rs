use std::fs;

use anyhow::Result;
use tempfile::tempdir;

use needle::Version;
use needlemap::NeedleMapKind;

use super::helpers::{VID, create_volume, data_needle, hello_needle, reopen_volume};
use crate::{
    ScanNext, ScanOptions, Superblock, Volume, VolumeError, compact_volume, copy_live_needles,
    dat_path, scan_volume_file,
};

#[test]
fn copy_carries_only_the_live_set() -> Result<()> {
    let src = tempdir()?;
    let dst_dir = tempdir()?;
    {
        let mut vol = create_volume(src.path(), Version::V2);
        vol.append_needle(&data_needle(1, b"keep me"))?;
        vol.append_needle(&data_needle(2, b"stale"))?;
        vol.append_needle(&data_needle(2, b"fresh"))?; // supersedes
        vol.append_needle(&data_needle(3, b"doomed"))?;
        vol.delete_needle(3)?;
    }

    let mut dst = Volume::create(
        dst_dir.path(),
        "",
        VID,
        Superblock::new(Version::V2, 0, 0),
        true,
    )?;
    let copied = copy_live_needles(src.path(), "", VID, NeedleMapKind::Memory, &mut dst)?;

    assert_eq!(copied, 2);
    assert_eq!(dst.read_needle(1)?.data, b"keep me");
    assert_eq!(dst.read_needle(2)?.data, b"fresh");
    assert!(matches!(dst.read_needle(3), Err(VolumeError::NotFound(_))));
    Ok(())
}

#[test]
fn fully_deleted_volume_copies_nothing() -> Result<()> {
    let src = tempdir()?;
    let dst_dir = tempdir()?;
    {
        let mut vol = create_volume(src.path(), Version::V2);
        vol.append_needle(&data_needle(7, b"a"))?;
        vol.append_needle(&data_needle(7, b"bb"))?;
        vol.delete_needle(7)?;
    }

    let mut dst = Volume::create(
        dst_dir.path(),
        "",
        VID,
        Superblock::new(Version::V2, 0, 0),
        true,
    )?;
    let copied = copy_live_needles(src.path(), "", VID, NeedleMapKind::Memory, &mut dst)?;
    assert_eq!(copied, 0);
    assert!(dst.is_empty());
    Ok(())
}

#[test]
fn compact_swaps_in_a_smaller_volume() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut vol = create_volume(dir.path(), Version::V2);
        vol.append_needle(&hello_needle())?;
        vol.append_needle(&data_needle(2, &vec![b'x'; 1000]))?;
        vol.append_needle(&data_needle(2, b"small now"))?;
        vol.append_needle(&data_needle(3, &vec![b'y'; 500]))?;
        vol.delete_needle(3)?;
    }
    let before = fs::metadata(dat_path(dir.path(), "", VID))?.len();

    let outcome = compact_volume(dir.path(), "", VID, NeedleMapKind::Memory)?;
    assert_eq!(outcome.copied, 2);
    assert!(outcome.reclaimed_bytes > 0);

    let after = fs::metadata(dat_path(dir.path(), "", VID))?.len();
    assert_eq!(before - after, outcome.reclaimed_bytes);

    // the temporaries are gone
    assert!(!dir.path().join("1.cpd").exists());
    assert!(!dir.path().join("1.cpx").exists());

    // the compacted volume opens clean and serves the survivors
    let vol = reopen_volume(dir.path());
    assert_eq!(vol.len(), 2);
    assert_eq!(vol.read_needle(42)?, hello_needle());
    assert_eq!(vol.read_needle(2)?.data, b"small now");
    assert!(matches!(vol.read_needle(3), Err(VolumeError::NotFound(_))));
    assert_eq!(vol.deleted_bytes(), 0);
    Ok(())
}

#[test]
fn compact_preserves_physical_order_of_survivors() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut vol = create_volume(dir.path(), Version::V2);
        vol.append_needle(&data_needle(5, b"five"))?;
        vol.append_needle(&data_needle(9, b"nine"))?;
        vol.append_needle(&data_needle(1, b"one"))?;
    }

    compact_volume(dir.path(), "", VID, NeedleMapKind::Memory)?;

    let mut ids = Vec::new();
    scan_volume_file(
        dir.path(),
        "",
        VID,
        &ScanOptions::default(),
        |_| Ok(()),
        |n, _| {
            ids.push(n.id);
            Ok(ScanNext::Continue)
        },
    )?;
    assert_eq!(ids, vec![5, 9, 1]);
    Ok(())
}

#[test]
fn compact_keeps_the_pinned_version() -> Result<()> {
    let dir = tempdir()?;
    {
        let mut vol = create_volume(dir.path(), Version::V1);
        vol.append_needle(&data_needle(1, b"v1 data"))?;
    }

    compact_volume(dir.path(), "", VID, NeedleMapKind::Memory)?;

    let vol = reopen_volume(dir.path());
    assert_eq!(vol.version(), Version::V1);
    assert_eq!(vol.read_needle(1)?.data, b"v1 data");
    Ok(())
}

#[test]
fn compact_with_the_compact_map_matches_the_memory_map() -> Result<()> {
    let dir_a = tempdir()?;
    let dir_b = tempdir()?;
    for dir in [dir_a.path(), dir_b.path()] {
        let mut vol = create_volume(dir, Version::V2);
        for i in 1..=50u64 {
            vol.append_needle(&data_needle(i, format!("payload {i}").as_bytes()))?;
        }
        for i in (1..=50u64).step_by(3) {
            vol.delete_needle(i)?;
        }
        drop(vol);
    }

    let a = compact_volume(dir_a.path(), "", VID, NeedleMapKind::Memory)?;
    let b = compact_volume(dir_b.path(), "", VID, NeedleMapKind::Compact)?;
    assert_eq!(a, b);
    Ok(())
}
