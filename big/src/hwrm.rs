//! HWRM container (component G): an HW2 body wrapped in the Gearbox
//! stream-cipher envelope. Parses the trailing footer to derive the
//! cipher, then exposes a decrypting `Read + Seek` view of the body to the
//! HW2 reader/writer underneath.

use std::io::{Cursor, Read, Result as IoResult, Seek, SeekFrom, Write};

use log::debug;

use crate::bin::DataSource;
use crate::error::Result;
use crate::gbx_crypt::{self, GearboxCipher, ENCRYPTION_KEY_MARKER};
use crate::hw2::{self, ExtractOptions, Hw2FolderSource, Hw2Reader};
use crate::member::Member;
use crate::util::FileInFile;

/// Stand-in for `GEARBOX_HOMEWORLD_REMASTERED_KEY`: a fixed 1024-byte
/// master secret baked into the original tool and never published in the
/// distilled spec. Word count matches `ENCRYPTION_KEY_MAX_SIZE` so every
/// local-key byte offset used by [`gbx_crypt::combine_keys`]'s lookup stays
/// in bounds.
pub fn master_key() -> Vec<u8> {
    (0u32..1024)
        .map(|i| i.wrapping_mul(2_654_435_761).to_le_bytes()[0])
        .collect()
}

fn write_u32_le<W: Write>(w: &mut W, v: u32) -> IoResult<()> {
    w.write_all(&v.to_le_bytes())
}
fn write_u16_le<W: Write>(w: &mut W, v: u16) -> IoResult<()> {
    w.write_all(&v.to_le_bytes())
}
fn read_u32_le<R: Read>(r: &mut R) -> IoResult<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// A `Read + Seek` view over the plaintext HW2 body: bounds reads to
/// `[0, data_size)` and decrypts each byte as it's read.
pub struct DecryptingView<R> {
    inner: FileInFile<R>,
    cipher: GearboxCipher,
}

impl<R: Read + Seek> DecryptingView<R> {
    fn new(mut store: R, cipher: GearboxCipher) -> IoResult<Self> {
        store.seek(SeekFrom::Start(0))?;
        let data_size = cipher.data_size();
        Ok(DecryptingView {
            inner: FileInFile::new(store, 0, data_size),
            cipher,
        })
    }
}

impl<R: Read + Seek> Read for DecryptingView<R> {
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        let pos = self.inner.stream_position()?;
        let n = self.inner.read(buf)?;
        let plain = self.cipher.decrypt(&buf[..n], pos);
        buf[..n].copy_from_slice(&plain);
        Ok(n)
    }
}

impl<R: Read + Seek> Seek for DecryptingView<R> {
    fn seek(&mut self, pos: SeekFrom) -> IoResult<u64> {
        self.inner.seek(pos)
    }
}

/// Parses only the footer plus the HW2 header beneath it. Exceptions are
/// expected and caught by the detector.
pub fn check_format<R: Read + Seek>(mut reader: R) -> Result<()> {
    let footer = gbx_crypt::load_footer(&mut reader, &master_key(), ENCRYPTION_KEY_MARKER)?;
    debug!("HWRM footer ok, body size {}", footer.cipher.data_size());
    let mut view = DecryptingView::new(reader, footer.cipher)?;
    hw2::check_format(&mut view)?;
    Ok(())
}

/// A loaded HWRM archive: a decrypted HW2 body underneath.
pub struct HwrmReader<R> {
    inner: Hw2Reader<DecryptingView<R>>,
}

impl<R: Read + Seek> HwrmReader<R> {
    pub fn load(mut store: R) -> Result<Self> {
        let footer = gbx_crypt::load_footer(&mut store, &master_key(), ENCRYPTION_KEY_MARKER)?;
        debug!("HWRM footer ok, body size {}", footer.cipher.data_size());
        let view = DecryptingView::new(store, footer.cipher)?;
        let inner = Hw2Reader::load(view)?;
        Ok(HwrmReader { inner })
    }

    pub fn members(&self) -> &[Member] {
        self.inner.members()
    }

    pub fn extract<W: Write>(&mut self, index: usize, opts: ExtractOptions, writer: W) -> Result<()> {
        self.inner.extract(index, opts, writer)
    }
}

/// Writes a new HWRM archive: builds the plaintext HW2 body in memory,
/// encrypts it under a fresh `local_key`, then appends the Gearbox footer.
pub fn write<D: DataSource, W: Write + Seek>(
    namespace: &str,
    root_name: &str,
    root: Hw2FolderSource<D>,
    archive_name: &str,
    local_key: &[u8],
    mut out: W,
) -> Result<()> {
    let mut body = Cursor::new(Vec::new());
    hw2::write(namespace, root_name, root, archive_name, &mut body)?;
    let plain = body.into_inner();
    let data_size = plain.len() as u64;

    let cipher = GearboxCipher::new(local_key, &master_key(), data_size);
    let cipher_bytes = cipher.encrypt(&plain, 0);
    out.write_all(&cipher_bytes)?;

    write_u32_le(&mut out, ENCRYPTION_KEY_MARKER)?;
    write_u16_le(&mut out, local_key.len() as u16)?;
    out.write_all(local_key)?;

    let marker_offset_pos = out.stream_position()?;
    let marker_offset = (marker_offset_pos - data_size) as u32;
    write_u32_le(&mut out, marker_offset)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;

    #[test]
    fn write_then_load_round_trip() {
        let root = Hw2FolderSource {
            name: String::new(),
            files: vec![],
            subfolders: vec![hw2::Hw2FolderSource {
                name: "Data".to_string(),
                files: vec![hw2::Hw2MemberSource {
                    name: "ship.lua".to_string(),
                    mtime: SystemTime::UNIX_EPOCH,
                    compress: true,
                    data: b"return { hull = 100 }".to_vec(),
                }],
                subfolders: vec![],
            }],
        };
        let local_key = vec![1u8, 2, 3, 4, 5, 6, 7, 8];

        let mut out = Cursor::new(Vec::new());
        write::<Vec<u8>, _>("data", "Root", root, "TestArchive", &local_key, &mut out).unwrap();

        let mut reader = HwrmReader::load(Cursor::new(out.into_inner())).unwrap();
        assert_eq!(reader.members().len(), 1);
        assert_eq!(reader.members()[0].name, "Root/Data/ship.lua");

        let mut extracted = Vec::new();
        reader
            .extract(0, ExtractOptions::default(), &mut extracted)
            .unwrap();
        assert_eq!(extracted, b"return { hull = 100 }");
    }

    #[test]
    fn bad_marker_is_rejected() {
        let mut buf = Cursor::new(vec![0u8; 32]);
        assert!(check_format(&mut buf).is_err());
    }

    #[test]
    fn footer_roundtrip_matches_computed_offset() {
        let mut out = Cursor::new(Vec::new());
        write_u32_le(&mut out, ENCRYPTION_KEY_MARKER).unwrap();
        write_u16_le(&mut out, 4).unwrap();
        out.write_all(&[9, 9, 9, 9]).unwrap();
        let marker_offset_pos = out.stream_position().unwrap();
        write_u32_le(&mut out, marker_offset_pos as u32).unwrap();

        let bytes = out.into_inner();
        let mut cursor = Cursor::new(bytes);
        cursor.seek(SeekFrom::End(-4)).unwrap();
        let read_back = read_u32_le(&mut cursor).unwrap();
        assert_eq!(read_back, marker_offset_pos as u32);
    }
}
