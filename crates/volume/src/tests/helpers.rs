use std::path::Path;

use needle::{Needle, Version, VolumeId};
use needlemap::NeedleMapKind;

use crate::{Superblock, Volume};

pub const VID: VolumeId = VolumeId(1);

/// A fresh empty volume in `dir` with an empty collection name.
pub fn create_volume(dir: &Path, version: Version) -> Volume {
    Volume::create(dir, "", VID, Superblock::new(version, 0, 0), true).unwrap()
}

pub fn reopen_volume(dir: &Path) -> Volume {
    Volume::open(dir, "", VID, NeedleMapKind::Memory, true).unwrap()
}

/// The S1 needle: data plus name and mime.
pub fn hello_needle() -> Needle {
    let mut n = Needle::new(42, 0xdead_beef, b"hello".to_vec());
    n.set_name(b"h.txt".to_vec());
    n.set_mime(b"text/plain".to_vec());
    n
}

pub fn data_needle(id: u64, data: &[u8]) -> Needle {
    Needle::new(id, 0, data.to_vec())
}
