//! Format auto-detection (component H): tries candidate containers in
//! strict-to-loose order, `check_format` first as a cheap filter, then a
//! full `load` — first to fully succeed wins.

use std::io::{Read, Seek, Write};

use log::debug;

use crate::bin::DataSource;
use crate::error::{BigError, Result};
use crate::hw1::{self, Hw1ClassicTocEntry, Hw1TocEntry};
use crate::hw2::{self, ExtractOptions};
use crate::hwrm;
use crate::member::{Format, Member};

/// A successfully opened archive of any of the four formats.
pub enum AnyBig<R> {
    Hwrm(hwrm::HwrmReader<R>),
    Hw2(hw2::Hw2Reader<R>),
    Hw1Classic(hw1::Hw1Reader<R, Hw1ClassicTocEntry>),
    Hw1(hw1::Hw1Reader<R, Hw1TocEntry>),
}

impl<R: Read + Seek> AnyBig<R> {
    pub fn members(&self) -> &[Member] {
        match self {
            AnyBig::Hwrm(r) => r.members(),
            AnyBig::Hw2(r) => r.members(),
            AnyBig::Hw1Classic(r) => r.members(),
            AnyBig::Hw1(r) => r.members(),
        }
    }

    /// Extracts one member. `opts` is honored by HW2/HWRM; HW1/HW1-Classic
    /// have no per-file CRC or optional decompression to tune, so it's
    /// ignored there.
    pub fn extract<W: Write>(&mut self, index: usize, opts: ExtractOptions, writer: W) -> Result<()> {
        match self {
            AnyBig::Hwrm(r) => r.extract(index, opts, writer),
            AnyBig::Hw2(r) => r.extract(index, opts, writer),
            AnyBig::Hw1Classic(r) => r.extract(index, writer),
            AnyBig::Hw1(r) => r.extract(index, writer),
        }
    }
}

/// Opens `source`, trying each container format in strict-to-loose order
/// (HWRM, HW2, HW1-Classic, HW1). Needs to reopen the source per attempt
/// since a failed `load` may have consumed/corrupted its reader's cursor
/// state; `DataSource::open` gives each attempt a fresh stream.
pub fn open<D>(source: &D) -> Result<(Format, AnyBig<D::Read>)>
where
    D: DataSource,
    D::Read: Seek,
{
    if let Ok(mut r) = source.open() {
        if hwrm::check_format(&mut r).is_ok() {
            if let Ok(r2) = source.open() {
                if let Ok(reader) = hwrm::HwrmReader::load(r2) {
                    debug!("format detected: hwrm");
                    return Ok((Format::Hwrm, AnyBig::Hwrm(reader)));
                }
            }
        }
    }

    if let Ok(mut r) = source.open() {
        if hw2::check_format(&mut r).is_ok() {
            if let Ok(r2) = source.open() {
                if let Ok(reader) = hw2::Hw2Reader::load(r2) {
                    debug!("format detected: hw2");
                    return Ok((Format::Hw2, AnyBig::Hw2(reader)));
                }
            }
        }
    }

    if let Ok(mut r) = source.open() {
        if hw1::check_format(&mut r).is_ok() {
            if let Ok(r2) = source.open() {
                if let Ok(reader) = hw1::Hw1Reader::<_, Hw1ClassicTocEntry>::load(r2) {
                    debug!("format detected: hw1-classic");
                    return Ok((Format::Hw1Classic, AnyBig::Hw1Classic(reader)));
                }
            }
        }
    }

    if let Ok(mut r) = source.open() {
        if hw1::check_format(&mut r).is_ok() {
            if let Ok(r2) = source.open() {
                if let Ok(reader) = hw1::Hw1Reader::<_, Hw1TocEntry>::load(r2) {
                    debug!("format detected: hw1");
                    return Ok((Format::Hw1, AnyBig::Hw1(reader)));
                }
            }
        }
    }

    Err(BigError::value("unable to determine format"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw1::Hw1MemberSource;
    use std::io::Cursor;
    use std::time::SystemTime;

    #[test]
    fn detects_hw1_archive() {
        let members = vec![Hw1MemberSource {
            name: "readme.txt".to_string(),
            mtime: SystemTime::UNIX_EPOCH,
            compress: false,
            data: b"hello world".to_vec(),
        }];
        let mut out = Cursor::new(Vec::new());
        hw1::write::<Hw1TocEntry, Vec<u8>, _>(members, &mut out).unwrap();
        let bytes = out.into_inner();

        let (format, archive) = open(&bytes).unwrap();
        assert_eq!(format, Format::Hw1);
        assert_eq!(archive.members().len(), 1);
    }

    #[test]
    fn detects_hw2_archive() {
        let root = hw2::Hw2FolderSource {
            name: String::new(),
            files: vec![hw2::Hw2MemberSource {
                name: "a.txt".to_string(),
                mtime: SystemTime::UNIX_EPOCH,
                compress: false,
                data: b"x".to_vec(),
            }],
            subfolders: vec![],
        };
        let mut out = Cursor::new(Vec::new());
        hw2::write::<Vec<u8>, _>("data", "Root", root, "Arch", &mut out).unwrap();
        let bytes = out.into_inner();

        let (format, archive) = open(&bytes).unwrap();
        assert_eq!(format, Format::Hw2);
        assert_eq!(archive.members().len(), 1);
    }

    #[test]
    fn garbage_is_rejected() {
        let bytes = vec![0u8; 64];
        assert!(open(&bytes).is_err());
    }
}
