//! Error classes registered by the persistent memory layer
//!
//! Every failure surfaced to a process group carries one of these classes. The
//! numeric code is what `Communicator::abort` receives in fail-fast mode and the
//! string is the registered human-readable description.

use std::fmt;

/// Error class of a failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorClass {
    /// General persistent memory error (parent class of the window codes)
    General = 1,
    /// Root path missing, too long, or not a directory
    RootPath = 2,
    /// Window name missing, too long, or unknown
    Name = 3,
    /// Checkpoint version missing or inconsistent
    CheckpointVersion = 4,
    /// Unknown window mode
    Mode = 5,
    /// Window directory could not be read
    Windows = 6,
    /// Version log could not be read
    Versions = 7,
    /// Argument of some other kind
    Argument = 8,
    /// Memory or disk space exhausted
    NoMemory = 9,
    /// Mapping a file into memory failed
    Map = 20,
    /// Spawning or joining a thread failed
    Thread = 21,
    /// Unclassified POSIX failure
    Posix = 22,
    /// Opening a file failed
    FileOpen = 23,
    /// Creating a directory failed
    Mkdir = 24,
    /// Removing a directory failed
    Rmdir = 25,
    /// Cache manager thread failed
    CacheManagerThread = 26,
    /// Operation not supported by the io mode
    Unsupported = 27,
    /// Unknown io mode
    WrongMode = 28,
    /// Failure inside the communication layer
    Communication = 29,
}

impl ErrorClass {
    /// Numeric code of the class
    #[inline]
    pub const fn code(&self) -> i32 {
        *self as i32
    }

    /// Check whether the class belongs to the file I/O family
    #[inline]
    pub const fn is_io(&self) -> bool {
        (*self as u8) >= 20
    }

    /// Registered description of the class
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::General => "General MPI PMEM error",
            ErrorClass::RootPath => "Invalid root path",
            ErrorClass::Name => "Invalid persistent memory area name",
            ErrorClass::CheckpointVersion => "Invalid checkpoint version",
            ErrorClass::Mode => "Invalid mode",
            ErrorClass::Windows => "Invalid windows argument",
            ErrorClass::Versions => "Invalid versions argument",
            ErrorClass::Argument => "Invalid argument of some other kind",
            ErrorClass::NoMemory => "Unable to allocate memory",
            ErrorClass::Map => "Unable to map file into memory.",
            ErrorClass::Thread => "Unable to start or join thread.",
            ErrorClass::Posix => "Unknown POSIX error.",
            ErrorClass::FileOpen => {
                "Cannot open file. Please check provided paths and process permissions."
            }
            ErrorClass::Mkdir => "Unable to create directory.",
            ErrorClass::Rmdir => "Unable to remove directory.",
            ErrorClass::CacheManagerThread => "Unexpected error in cache manager thread occured.",
            ErrorClass::Unsupported => "This operation is unsupported.",
            ErrorClass::WrongMode => "Wrong io mode.",
            ErrorClass::Communication => "Communication layer error.",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            ErrorClass::General,
            ErrorClass::RootPath,
            ErrorClass::Name,
            ErrorClass::CheckpointVersion,
            ErrorClass::Mode,
            ErrorClass::Windows,
            ErrorClass::Versions,
            ErrorClass::Argument,
            ErrorClass::NoMemory,
            ErrorClass::Map,
            ErrorClass::Thread,
            ErrorClass::Posix,
            ErrorClass::FileOpen,
            ErrorClass::Mkdir,
            ErrorClass::Rmdir,
            ErrorClass::CacheManagerThread,
            ErrorClass::Unsupported,
            ErrorClass::WrongMode,
            ErrorClass::Communication,
        ];
        let mut codes: Vec<i32> = all.iter().map(|c| c.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
    }

    #[test]
    fn test_io_family() {
        assert!(!ErrorClass::CheckpointVersion.is_io());
        assert!(ErrorClass::Unsupported.is_io());
        assert_eq!(ErrorClass::RootPath.to_string(), "Invalid root path");
    }
}
