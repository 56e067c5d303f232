//! The format-independent logical view of an archive entry, shared by all
//! four container formats.

use std::time::SystemTime;

/// Which of the five on-disk layouts an archive was read as (or is being
/// written as).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Format {
    Hw1,
    Hw1Classic,
    Hw2,
    Hw2Classic,
    Hwrm,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Hw1 => "hw1",
            Format::Hw1Classic => "hw1c",
            Format::Hw2 => "hw2",
            Format::Hw2Classic => "hw2c",
            Format::Hwrm => "hwrm",
        }
    }
}

/// One stored file, decoupled from whichever format-specific record
/// declared it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    /// Forward-slash normalized in-archive path.
    pub name: String,
    pub mtime: SystemTime,
    pub real_size: u64,
    pub stored_size: u64,
}

impl Member {
    pub fn is_compressed(&self) -> bool {
        self.stored_size < self.real_size
    }
}

/// Replaces `\` with `/`, the canonical in-memory path separator.
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/")
}

/// Replaces `/` with `\`, the on-disk path separator for every format here.
pub fn denormalize(path: &str) -> String {
    path.replace('/', "\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_normalize() {
        for p in ["a/b/c", "file.txt", "x/y/z/deep/path.bin"] {
            assert_eq!(normalize(&denormalize(p)), p);
        }
    }

    #[test]
    fn compressed_flag_matches_sizes() {
        let m = Member {
            name: "a".into(),
            mtime: SystemTime::UNIX_EPOCH,
            real_size: 100,
            stored_size: 100,
        };
        assert!(!m.is_compressed());
        let m2 = Member {
            stored_size: 40,
            ..m
        };
        assert!(m2.is_compressed());
    }
}
