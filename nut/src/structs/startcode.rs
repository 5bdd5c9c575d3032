//! Startcodes and structure dispatch.
//!
//! Every packet begins with a 64-bit startcode whose first byte is `'N'`.
//! Frames never start with that byte, so a single peeked byte is enough to
//! tell a frame from a packet.

/// Magic string at the very start of a NUT file, including the trailing NUL.
pub const FILE_ID_STRING: &[u8] = b"nut/multimedia container\0";

pub const MAIN_STARTCODE: u64 = 0x4E4D_7A56_1F5F_04AD;
pub const STREAM_STARTCODE: u64 = 0x4E53_1140_5BF2_F9DB;
pub const SYNCPOINT_STARTCODE: u64 = 0x4E4B_E4AD_EECA_4569;
pub const INDEX_STARTCODE: u64 = 0x4E58_DD67_2F23_E64E;
pub const INFO_STARTCODE: u64 = 0x4E49_AB68_B596_BA78;

/// First byte of every startcode, never a valid frame code.
pub const STARTCODE_PREFIX: u8 = b'N';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Structure {
    MainHeader,
    StreamHeader,
    Syncpoint,
    Index,
    Info,
    Frame(u8),
}

impl Structure {
    pub fn from_startcode(startcode: u64) -> Option<Self> {
        match startcode {
            MAIN_STARTCODE => Some(Self::MainHeader),
            STREAM_STARTCODE => Some(Self::StreamHeader),
            SYNCPOINT_STARTCODE => Some(Self::Syncpoint),
            INDEX_STARTCODE => Some(Self::Index),
            INFO_STARTCODE => Some(Self::Info),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::MainHeader => "main header",
            Self::StreamHeader => "stream header",
            Self::Syncpoint => "syncpoint",
            Self::Index => "index",
            Self::Info => "info packet",
            Self::Frame(_) => "frame",
        }
    }
}

#[test]
fn startcodes_share_prefix() {
    for code in [
        MAIN_STARTCODE,
        STREAM_STARTCODE,
        SYNCPOINT_STARTCODE,
        INDEX_STARTCODE,
        INFO_STARTCODE,
    ] {
        assert_eq!((code >> 56) as u8, STARTCODE_PREFIX);
        assert!(Structure::from_startcode(code).is_some());
    }
    assert_eq!(
        Structure::from_startcode(SYNCPOINT_STARTCODE),
        Some(Structure::Syncpoint)
    );
    assert_eq!(Structure::from_startcode(0x4E00_0000_0000_0000), None);
}
