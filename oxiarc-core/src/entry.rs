//! Archive entry header metadata.
//!
//! This module defines [`EntryHeader`], the metadata an engine reports for
//! each entry (path, type, size, timestamps, permissions, ownership and link
//! targets). The bridge treats it as an opaque payload: it is produced by the
//! engine, carried through an [`EntryHandle`](crate::handle::EntryHandle) and
//! handed back to the engine when writing.

use std::path::PathBuf;
use std::time::SystemTime;

/// File type mask for mode bits.
pub const AE_IFMT: u32 = 0o170000;
/// Regular file.
pub const AE_IFREG: u32 = 0o100000;
/// Symbolic link.
pub const AE_IFLNK: u32 = 0o120000;
/// Socket.
pub const AE_IFSOCK: u32 = 0o140000;
/// Character device.
pub const AE_IFCHR: u32 = 0o020000;
/// Block device.
pub const AE_IFBLK: u32 = 0o060000;
/// Directory.
pub const AE_IFDIR: u32 = 0o040000;
/// Named pipe.
pub const AE_IFIFO: u32 = 0o010000;

/// Entry type (file, directory, symlink, etc.).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum EntryType {
    /// Regular file.
    #[default]
    File,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to an earlier entry.
    Hardlink,
    /// Unix domain socket.
    Socket,
    /// Character device.
    CharDevice,
    /// Block device.
    BlockDevice,
    /// Named pipe (FIFO).
    NamedPipe,
    /// Unknown type.
    Unknown,
}

impl EntryType {
    /// Decode the type from Unix mode bits.
    pub fn from_mode(mode: u32) -> Self {
        match mode & AE_IFMT {
            AE_IFREG => Self::File,
            AE_IFDIR => Self::Directory,
            AE_IFLNK => Self::Symlink,
            AE_IFSOCK => Self::Socket,
            AE_IFCHR => Self::CharDevice,
            AE_IFBLK => Self::BlockDevice,
            AE_IFIFO => Self::NamedPipe,
            _ => Self::Unknown,
        }
    }

    /// The `AE_IF*` type bits for this entry type.
    ///
    /// Hard links are stored as regular files with a link target.
    pub fn mode_bits(&self) -> u32 {
        match self {
            Self::File | Self::Hardlink => AE_IFREG,
            Self::Directory => AE_IFDIR,
            Self::Symlink => AE_IFLNK,
            Self::Socket => AE_IFSOCK,
            Self::CharDevice => AE_IFCHR,
            Self::BlockDevice => AE_IFBLK,
            Self::NamedPipe => AE_IFIFO,
            Self::Unknown => 0,
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        matches!(self, Self::File)
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, Self::Directory)
    }

    /// Check if this is a symlink.
    pub fn is_symlink(&self) -> bool {
        matches!(self, Self::Symlink)
    }

    /// Single-character tag used in listings.
    pub fn type_char(&self) -> char {
        match self {
            Self::Directory => 'd',
            Self::Symlink => 'l',
            Self::Hardlink => 'h',
            Self::Socket => 's',
            Self::CharDevice => 'c',
            Self::BlockDevice => 'b',
            Self::NamedPipe => 'p',
            Self::File | Self::Unknown => '-',
        }
    }
}

/// Owner information.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ownership {
    /// User ID.
    pub uid: Option<u64>,
    /// Group ID.
    pub gid: Option<u64>,
    /// User name.
    pub uname: Option<String>,
    /// Group name.
    pub gname: Option<String>,
}

impl Ownership {
    /// Create new empty ownership.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set numeric IDs.
    pub fn with_ids(mut self, uid: u64, gid: u64) -> Self {
        self.uid = Some(uid);
        self.gid = Some(gid);
        self
    }

    /// Set user and group names.
    pub fn with_names(mut self, uname: impl Into<String>, gname: impl Into<String>) -> Self {
        self.uname = Some(uname.into());
        self.gname = Some(gname.into());
        self
    }
}

/// Header of an entry in an archive.
///
/// This is format-agnostic: engines fill in whatever fields their format
/// carries and leave the rest as `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntryHeader {
    /// The path of the entry within the archive.
    pub path: String,
    /// The type of entry.
    pub entry_type: EntryType,
    /// Logical size in bytes, if the format records it.
    pub size: Option<u64>,
    /// Permission bits (the low 12 mode bits).
    pub permissions: Option<u32>,
    /// Last modification time.
    pub modified: Option<SystemTime>,
    /// Last access time.
    pub accessed: Option<SystemTime>,
    /// Last status change time.
    pub changed: Option<SystemTime>,
    /// Creation (birth) time.
    pub created: Option<SystemTime>,
    /// Owner information.
    pub ownership: Ownership,
    /// Symlink target.
    pub symlink: Option<PathBuf>,
    /// Hard link target.
    pub hardlink: Option<PathBuf>,
    /// Path the entry was read from on disk, if any.
    pub source_path: Option<PathBuf>,
}

impl EntryHeader {
    /// Create a header for a regular file.
    pub fn file(path: impl Into<String>, size: u64) -> Self {
        Self {
            path: path.into(),
            entry_type: EntryType::File,
            size: Some(size),
            permissions: None,
            modified: None,
            accessed: None,
            changed: None,
            created: None,
            ownership: Ownership::default(),
            symlink: None,
            hardlink: None,
            source_path: None,
        }
    }

    /// Create a header for a directory.
    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            entry_type: EntryType::Directory,
            size: Some(0),
            ..Self::file(path, 0)
        }
    }

    /// Create a header for a symbolic link.
    pub fn symlink(path: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        Self {
            entry_type: EntryType::Symlink,
            size: Some(0),
            symlink: Some(target.into()),
            ..Self::file(path, 0)
        }
    }

    /// Check if this is a file.
    pub fn is_file(&self) -> bool {
        self.entry_type.is_file()
    }

    /// Check if this is a directory.
    pub fn is_dir(&self) -> bool {
        self.entry_type.is_dir()
    }

    /// Full Unix mode: type bits plus permission bits.
    pub fn mode(&self) -> u32 {
        self.entry_type.mode_bits() | (self.permissions.unwrap_or(0) & 0o7777)
    }

    /// Set type and permissions from a Unix mode.
    pub fn set_mode(&mut self, mode: u32) {
        self.entry_type = EntryType::from_mode(mode);
        self.permissions = Some(mode & 0o7777);
    }

    /// Builder method to set permissions.
    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = Some(permissions & 0o7777);
        self
    }

    /// Builder method to set the size.
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    /// Builder method to set modification time.
    pub fn with_modified(mut self, time: SystemTime) -> Self {
        self.modified = Some(time);
        self
    }

    /// Builder method to set ownership.
    pub fn with_ownership(mut self, ownership: Ownership) -> Self {
        self.ownership = ownership;
        self
    }

    /// Builder method to set a hard link target.
    pub fn with_hardlink(mut self, target: impl Into<PathBuf>) -> Self {
        self.entry_type = EntryType::Hardlink;
        self.hardlink = Some(target.into());
        self
    }

    /// Builder method to set the on-disk source path.
    pub fn with_source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_path = Some(path.into());
        self
    }
}

impl Default for EntryHeader {
    fn default() -> Self {
        Self::file("", 0)
    }
}

impl std::fmt::Display for EntryHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let perms = self.permissions.unwrap_or(0);
        let mut rwx = String::with_capacity(9);
        for shift in [6, 3, 0] {
            let bits = (perms >> shift) & 0o7;
            rwx.push(if bits & 0o4 != 0 { 'r' } else { '-' });
            rwx.push(if bits & 0o2 != 0 { 'w' } else { '-' });
            rwx.push(if bits & 0o1 != 0 { 'x' } else { '-' });
        }
        let size = self.size.map_or_else(|| "?".to_string(), |s| s.to_string());
        write!(
            f,
            "{}{} {:>10} {}",
            self.entry_type.type_char(),
            rwx,
            size,
            self.path
        )?;
        if let Some(target) = &self.symlink {
            write!(f, " -> {}", target.display())?;
        } else if let Some(target) = &self.hardlink {
            write!(f, " link to {}", target.display())?;
        }
        Ok(())
    }
}
