use serde::{Deserialize, Serialize};

pub const SIGNATURE_WINDOW: usize = 11;

// Jump instruction plus OEM name.
pub const NTFS_BOOT_PREFIX: [u8; SIGNATURE_WINDOW] = [
    0xEB, 0x52, 0x90, b'N', b'T', b'F', b'S', b' ', b' ', b' ', b' ',
];

const NAME_FIELD: std::ops::Range<usize> = 3..SIGNATURE_WINDOW;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SignatureMatch {
    FullSignature,
    PartialSignature,
    NoMatch,
}

pub fn match_signature(window: &[u8]) -> SignatureMatch {
    let Some(window) = window.get(..SIGNATURE_WINDOW) else {
        return SignatureMatch::NoMatch;
    };

    if window == NTFS_BOOT_PREFIX {
        SignatureMatch::FullSignature
    } else if window[NAME_FIELD] == NTFS_BOOT_PREFIX[NAME_FIELD] {
        SignatureMatch::PartialSignature
    } else {
        SignatureMatch::NoMatch
    }
}
