//! External file identifier: `<volume_id>,<needle_id hex><cookie hex>`.

use std::fmt;
use std::str::FromStr;

use crate::{Cookie, NeedleError, NeedleId, VolumeId};

/// The identifier handed to external callers for one stored blob.
///
/// Rendered as `<volume_id>,<key hex><cookie hex>`: lowercase, the key
/// printed without leading zeros, the cookie always zero-padded to 8
/// digits. `parse(format(fid)) == fid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileId {
    pub volume_id: VolumeId,
    pub key: NeedleId,
    pub cookie: Cookie,
}

impl FileId {
    #[must_use]
    pub fn new(volume_id: VolumeId, key: NeedleId, cookie: Cookie) -> Self {
        FileId {
            volume_id,
            key,
            cookie,
        }
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{:x}{:08x}", self.volume_id, self.key, self.cookie)
    }
}

impl FromStr for FileId {
    type Err = NeedleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| NeedleError::InvalidField {
            field: "file_id",
            reason: reason.to_string(),
        };

        let (vid, rest) = s.split_once(',').ok_or_else(|| invalid("missing comma"))?;
        let volume_id = vid
            .parse::<VolumeId>()
            .map_err(|_| invalid("bad volume id"))?;

        // the cookie is the fixed-width 8-digit suffix; everything before
        // it is the key
        if rest.len() <= 8 {
            return Err(invalid("key+cookie part too short"));
        }
        let (key_hex, cookie_hex) = rest.split_at(rest.len() - 8);
        let key = NeedleId::from_str_radix(key_hex, 16).map_err(|_| invalid("bad key hex"))?;
        let cookie = Cookie::from_str_radix(cookie_hex, 16).map_err(|_| invalid("bad cookie hex"))?;

        Ok(FileId {
            volume_id,
            key,
            cookie,
        })
    }
}
