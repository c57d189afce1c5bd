//! Protocol data types and constants.
//!
//! Every structure here is packed: its encoded size is the sum of its field
//! sizes and the client relies on those sizes to frame replies. All
//! multi-byte integers travel in network byte order, see [`crate::serialize`].

use std::fs;
use std::mem::size_of;
use std::os::unix::fs::MetadataExt;

use enum_primitive::*;

use crate::error::Error;

/// Default TCP port of the server
pub const DEFAULT_PORT: u16 = 38008;

/// Lowest port the server agrees to listen on
pub const LOWEST_PORT: u16 = 1024;

/// Default size of the per-session transfer buffer
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Status reply for a successful command
pub const STATUS_OK: u32 = 0;

/// Status reply for a failed command, -1 as u32
pub const STATUS_FAILED: u32 = !0;

/// Sentinel size: "not found" or "end of listing"
pub const SIZE_SENTINEL: i64 = -1;

/*
 * Optical-disc sector layout used by CustomReadFile
 */
/// Raw sector size
pub const SECTOR_SIZE: u64 = 2352;
/// Sync and header bytes preceding the payload of a raw sector
pub const SECTOR_HEADER_SIZE: u64 = 24;
/// User data carried by one sector
pub const SECTOR_PAYLOAD_SIZE: usize = 2048;

/// Width of the fixed name slot in a batch listing record
pub const NAME_FIELD_SIZE: usize = 512;

/// Longest name a batch record can carry, leaving room for the terminator
pub const MAX_NAME_LEN: usize = NAME_FIELD_SIZE - 1;

enum_from_primitive! {
    #[doc = "Command codes understood by the server"]
    #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub enum CommandCode {
        OpenFileForReading      = 0x1224,
        ReadFile                = 0x1225,
        CustomReadFile          = 0x1226,
        ReadShortFile           = 0x1227,
        OpenFileForWriting      = 0x1228,
        WriteToFile             = 0x1229,
        OpenDirectory           = 0x122a,
        ListDirectoryEntryShort = 0x122b,
        DeleteFile              = 0x122c,
        MakeDirectory           = 0x122d,
        RemoveDirectory         = 0x122e,
        ListDirectoryEntryLong  = 0x122f,
        GetFileStats            = 0x1230,
        GetDirectorySize        = 0x1231,
        GetDirectoryContents    = 0x1232,
    }
}

impl CommandCode {
    /// If a path string of `Command::size` bytes follows the header
    pub fn takes_path(&self) -> bool {
        use crate::CommandCode::*;

        matches!(
            *self,
            OpenFileForReading
                | OpenFileForWriting
                | OpenDirectory
                | DeleteFile
                | MakeDirectory
                | RemoveDirectory
                | GetFileStats
                | GetDirectorySize
        )
    }
}

/// Fixed 16-byte command header sent by the client
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Command {
    /// Raw opcode, see [`CommandCode`]
    pub code: u16,
    /// Length of the path string following the header
    pub size: u16,
    /// Byte count, or first sector for `CustomReadFile`
    pub count: u32,
    /// Byte offset, or packed sector count for `CustomReadFile`
    pub offset: u64,
}

impl Command {
    pub const SIZE: usize = size_of::<u16>() * 2 + size_of::<u32>() + size_of::<u64>();

    /// Decode the opcode.
    pub fn command_code(&self) -> Result<CommandCode, Error> {
        CommandCode::from_u16(self.code).ok_or(Error::UnknownCommand(self.code))
    }

    /// Unpack the parameters of a `CustomReadFile` command.
    pub fn sector_read(&self) -> SectorRead {
        SectorRead {
            first: self.count,
            chunks: (self.offset >> 32) as u32,
        }
    }
}

/// Named view of the packed `CustomReadFile` parameters
///
/// On the wire the first sector lives in `count` and the number of sectors in
/// the upper half of `offset`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SectorRead {
    pub first: u32,
    pub chunks: u32,
}

impl SectorRead {
    /// Byte offset of the first raw sector in the image.
    pub fn byte_offset(&self) -> u64 {
        SECTOR_SIZE * self.first as u64
    }

    /// Number of payload bytes the reply carries.
    pub fn payload_len(&self) -> u64 {
        self.chunks as u64 * SECTOR_PAYLOAD_SIZE as u64
    }
}

/// Reply to `OpenFileForReading`
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct OpenReadReply {
    pub size: i64,
    pub mtime: u64,
}

impl OpenReadReply {
    pub const SIZE: usize = size_of::<i64>() + size_of::<u64>();

    pub const FAILED: OpenReadReply = OpenReadReply {
        size: SIZE_SENTINEL,
        mtime: 0,
    };
}

/// Timestamps in seconds since the epoch, as reported by `stat(2)`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Times {
    pub mtime: u64,
    pub ctime: u64,
    pub atime: u64,
}

impl<'a> From<&'a fs::Metadata> for Times {
    fn from(attr: &'a fs::Metadata) -> Self {
        Times {
            mtime: attr.mtime().max(0) as u64,
            ctime: attr.ctime().max(0) as u64,
            atime: attr.atime().max(0) as u64,
        }
    }
}

/// Reply to `GetFileStats`
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FileStatReply {
    pub size: i64,
    pub times: Times,
    pub is_directory: bool,
}

impl FileStatReply {
    pub const SIZE: usize = size_of::<i64>() + size_of::<u64>() * 3 + size_of::<u8>();

    pub const FAILED: FileStatReply = FileStatReply {
        size: SIZE_SENTINEL,
        times: Times {
            mtime: 0,
            ctime: 0,
            atime: 0,
        },
        is_directory: false,
    };
}

impl<'a> From<&'a fs::Metadata> for FileStatReply {
    fn from(attr: &'a fs::Metadata) -> Self {
        FileStatReply {
            size: crate::utils::signed_size(attr.size()),
            times: From::from(attr),
            is_directory: attr.is_dir(),
        }
    }
}

/// One entry of `ListDirectoryEntryShort`; the name follows the fixed part
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShortEntryReply {
    pub size: i64,
    pub is_directory: bool,
    pub name: Vec<u8>,
}

impl ShortEntryReply {
    /// Size of the fixed part preceding the name
    pub const SIZE: usize = size_of::<i64>() + size_of::<u16>() + size_of::<u8>();

    /// End-of-listing (or failure) marker.
    pub fn sentinel() -> Self {
        ShortEntryReply {
            size: SIZE_SENTINEL,
            is_directory: false,
            name: Vec::new(),
        }
    }
}

/// One entry of `ListDirectoryEntryLong`; the name follows the fixed part
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LongEntryReply {
    pub size: i64,
    pub times: Times,
    pub is_directory: bool,
    pub name: Vec<u8>,
}

impl LongEntryReply {
    /// Size of the fixed part preceding the name
    pub const SIZE: usize =
        size_of::<i64>() + size_of::<u64>() * 3 + size_of::<u16>() + size_of::<u8>();

    /// End-of-listing (or failure) marker.
    pub fn sentinel() -> Self {
        LongEntryReply {
            size: SIZE_SENTINEL,
            times: Times::default(),
            is_directory: false,
            name: Vec::new(),
        }
    }
}

/// A file name checked to fit the fixed name slot of a batch record
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Name(Vec<u8>);

impl Name {
    pub fn new(bytes: &[u8]) -> Result<Name, Error> {
        if bytes.len() > MAX_NAME_LEN {
            return Err(Error::NameTooLong {
                len: bytes.len(),
                max: MAX_NAME_LEN,
            });
        }
        Ok(Name(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// One record of `GetDirectoryContents`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchEntry {
    pub size: i64,
    pub mtime: u64,
    pub is_directory: bool,
    pub name: Name,
}

impl BatchEntry {
    pub const SIZE: usize = size_of::<i64>() + size_of::<u64>() + size_of::<u8>() + NAME_FIELD_SIZE;
}

/// Reply to `GetDirectoryContents`: an entry count, then the records
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DirectoryBatchReply {
    pub entries: Vec<BatchEntry>,
}

impl DirectoryBatchReply {
    /// Size of the count header
    pub const HEADER_SIZE: usize = size_of::<i64>();

    pub fn size(&self) -> usize {
        Self::HEADER_SIZE + self.entries.len() * BatchEntry::SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packed_sizes() {
        assert_eq!(Command::SIZE, 16);
        assert_eq!(OpenReadReply::SIZE, 16);
        assert_eq!(FileStatReply::SIZE, 33);
        assert_eq!(ShortEntryReply::SIZE, 11);
        assert_eq!(LongEntryReply::SIZE, 35);
        assert_eq!(BatchEntry::SIZE, 529);
    }

    #[test]
    fn command_codes() {
        let cmd = Command {
            code: 0x1232,
            ..Default::default()
        };
        assert_eq!(cmd.command_code().unwrap(), CommandCode::GetDirectoryContents);

        let bad = Command {
            code: 0x1223,
            ..Default::default()
        };
        assert!(matches!(
            bad.command_code(),
            Err(Error::UnknownCommand(0x1223))
        ));
    }

    #[test]
    fn sector_read_unpacks_offset() {
        let cmd = Command {
            code: CommandCode::CustomReadFile as u16,
            size: 0,
            count: 10,
            offset: (3u64 << 32) | 0xdead,
        };
        let sr = cmd.sector_read();
        assert_eq!(sr, SectorRead { first: 10, chunks: 3 });
        assert_eq!(sr.byte_offset(), 23520);
        assert_eq!(sr.payload_len(), 6144);
    }

    #[test]
    fn name_bound() {
        assert!(Name::new(&[b'a'; MAX_NAME_LEN]).is_ok());
        assert!(matches!(
            Name::new(&[b'a'; NAME_FIELD_SIZE]),
            Err(Error::NameTooLong { len: 512, max: 511 })
        ));
    }

    #[test]
    fn path_taking_commands() {
        assert!(CommandCode::OpenFileForReading.takes_path());
        assert!(CommandCode::GetDirectorySize.takes_path());
        assert!(!CommandCode::ReadFile.takes_path());
        assert!(!CommandCode::ListDirectoryEntryLong.takes_path());
    }
}
