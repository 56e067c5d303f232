//! HW1 and HW1-Classic containers (component E): a flat table of contents,
//! XOR-masked filenames, and per-file LZSS compression.
//!
//! The two variants share everything but the TOC entry's byte layout, so
//! the reader/writer here are generic over a [`TocEntry`] implementation.

use std::io::{Cursor, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::time::SystemTime;

use log::{debug, trace, warn};

use crate::bin::{le, DataSource};
use crate::error::{BigError, Result};
use crate::lzss;
use crate::member::{denormalize, normalize, Member};
use crate::util::{self, ONE_YEAR_SECS};

pub const MAGIC: &[u8; 7] = b"RBF1.23";
const HEADER_SIZE: usize = 7 + 4 + 4;
const MAX_NAME_LENGTH: u32 = 128;

/// The fields common to both TOC entry layouts, decoupled from their
/// on-disk byte width.
#[derive(Clone, Copy, Debug)]
pub struct TocFields {
    pub crc_start: u32,
    pub crc_end: u32,
    pub name_length: u32,
    pub stored_size: u32,
    pub real_size: u32,
    pub entry_offset: u32,
    pub timestamp: u32,
    pub compressed: bool,
}

/// A HW1-family TOC entry: fixed byte width, LE field codec, variant-
/// specific padding.
pub trait TocEntry: Sized + Copy {
    const SIZE: usize;
    fn read<R: Read>(r: &mut R) -> IoResult<Self>;
    fn write<W: Write>(&self, w: &mut W) -> IoResult<()>;
    fn new(fields: TocFields) -> Self;
    fn fields(&self) -> TocFields;
}

/// HW1's 32-byte TOC entry: u8 compression flag, 3 bytes of trailing
/// padding.
#[derive(Clone, Copy, Debug)]
pub struct Hw1TocEntry {
    pub fields: TocFields,
}
impl TocEntry for Hw1TocEntry {
    const SIZE: usize = 32;

    fn read<R: Read>(r: &mut R) -> IoResult<Self> {
        let crc_start = le::read_u32(r)?;
        let crc_end = le::read_u32(r)?;
        let name_length = le::read_u32(r)?;
        let stored_size = le::read_u32(r)?;
        let real_size = le::read_u32(r)?;
        let entry_offset = le::read_u32(r)?;
        let timestamp = le::read_u32(r)?;
        let compressed = le::read_u8(r)? != 0;
        let _padding: [u8; 3] = le::read_fixed(r)?;
        Ok(Hw1TocEntry {
            fields: TocFields {
                crc_start,
                crc_end,
                name_length,
                stored_size,
                real_size,
                entry_offset,
                timestamp,
                compressed,
            },
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        let f = self.fields;
        le::write_u32(w, f.crc_start)?;
        le::write_u32(w, f.crc_end)?;
        le::write_u32(w, f.name_length)?;
        le::write_u32(w, f.stored_size)?;
        le::write_u32(w, f.real_size)?;
        le::write_u32(w, f.entry_offset)?;
        le::write_u32(w, f.timestamp)?;
        le::write_u8(w, f.compressed as u8)?;
        w.write_all(&[0u8; 3])
    }

    fn new(fields: TocFields) -> Self {
        Hw1TocEntry { fields }
    }
    fn fields(&self) -> TocFields {
        self.fields
    }
}

/// The default value of HW1-Classic's undocumented `unknown1` field. Never
/// validated on read; preserved verbatim for round-trip fidelity.
pub const CLASSIC_UNKNOWN1_DEFAULT: u16 = 0x00A7;

/// HW1-Classic's 36-byte TOC entry: u16 name length + u16 `unknown1`, an
/// extra compiler-added u32 padding field ahead of a u32 compression flag
/// (one word wider than HW1's u8 flag + 3-byte pad). Confirmed against the
/// original tool's field list, which the distilled spec doesn't fully spell
/// out.
#[derive(Clone, Copy, Debug)]
pub struct Hw1ClassicTocEntry {
    pub fields: TocFields,
    pub unknown1: u16,
}
impl TocEntry for Hw1ClassicTocEntry {
    const SIZE: usize = 36;

    fn read<R: Read>(r: &mut R) -> IoResult<Self> {
        let crc_start = le::read_u32(r)?;
        let crc_end = le::read_u32(r)?;
        let name_length = le::read_u16(r)? as u32;
        let unknown1 = le::read_u16(r)?;
        let stored_size = le::read_u32(r)?;
        let real_size = le::read_u32(r)?;
        let entry_offset = le::read_u32(r)?;
        let timestamp = le::read_u32(r)?;
        let _padding1 = le::read_u32(r)?;
        let compressed = le::read_u32(r)? != 0;
        Ok(Hw1ClassicTocEntry {
            fields: TocFields {
                crc_start,
                crc_end,
                name_length,
                stored_size,
                real_size,
                entry_offset,
                timestamp,
                compressed,
            },
            unknown1,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        let f = self.fields;
        le::write_u32(w, f.crc_start)?;
        le::write_u32(w, f.crc_end)?;
        le::write_u16(w, f.name_length as u16)?;
        le::write_u16(w, self.unknown1)?;
        le::write_u32(w, f.stored_size)?;
        le::write_u32(w, f.real_size)?;
        le::write_u32(w, f.entry_offset)?;
        le::write_u32(w, f.timestamp)?;
        le::write_u32(w, 0)?;
        le::write_u32(w, f.compressed as u32)
    }

    fn new(fields: TocFields) -> Self {
        Hw1ClassicTocEntry {
            fields,
            unknown1: CLASSIC_UNKNOWN1_DEFAULT,
        }
    }
    fn fields(&self) -> TocFields {
        self.fields
    }
}

/// Decodes an XOR-masked filename: `out[i] = out[i-1] XOR cipher[i]`,
/// `out[-1] = 0xD5`.
pub fn decode_filename(cipher: &[u8]) -> Vec<u8> {
    let mut prev = 0xD5u8;
    cipher
        .iter()
        .map(|&c| {
            let p = prev ^ c;
            prev = p;
            p
        })
        .collect()
}

/// Encodes a plaintext filename: `cipher[i] = plain[i] XOR plain[i-1]`,
/// `plain[-1] = 0xD5`.
pub fn encode_filename(plain: &[u8]) -> Vec<u8> {
    let mut prev = 0xD5u8;
    plain
        .iter()
        .map(|&p| {
            let c = p ^ prev;
            prev = p;
            c
        })
        .collect()
}

/// The CRC-pair sort key described in §4.E: lowercased, backslash-form
/// name, split at the integer half with the odd trailing byte dropped
/// from *both* halves. Preserves a bug in the original tool.
pub fn crc_pair(denormalized_lowercase_name: &str) -> (u32, u32) {
    let bytes = denormalized_lowercase_name.as_bytes();
    let half = bytes.len() / 2;
    let crc_start = util::crc32(&bytes[..half]);
    let crc_end = util::crc32(&bytes[half..2 * half]);
    (crc_start, crc_end)
}

fn sort_key(crc_start: u32, crc_end: u32) -> u64 {
    ((crc_start as u64) << 32) | crc_end as u64
}

fn validate_header(magic: &[u8; 7], sorted_flag: u32) -> Result<()> {
    if magic != MAGIC {
        return Err(BigError::format(format!(
            "bad HW1 magic: {:?}",
            String::from_utf8_lossy(magic)
        )));
    }
    if sorted_flag == 0 {
        return Err(BigError::format("HW1 archive is not marked sorted"));
    }
    Ok(())
}

/// Parses only the header, the cheapest possible signal for format
/// detection. Exceptions here are expected and caught by the detector.
pub fn check_format<R: Read + Seek>(reader: &mut R) -> Result<()> {
    reader.seek(SeekFrom::Start(0))?;
    let magic: [u8; 7] = le::read_fixed(reader)?;
    let _toc_count = le::read_u32(reader)?;
    let sorted_flag = le::read_u32(reader)?;
    validate_header(&magic, sorted_flag)?;
    Ok(())
}

/// A loaded HW1 or HW1-Classic archive.
pub struct Hw1Reader<R, T> {
    store: R,
    entries: Vec<T>,
    members: Vec<Member>,
}

impl<R: Read + Seek, T: TocEntry> Hw1Reader<R, T> {
    pub fn load(mut store: R) -> Result<Self> {
        store.seek(SeekFrom::Start(0))?;
        let magic: [u8; 7] = le::read_fixed(&mut store)?;
        let toc_count = le::read_u32(&mut store)?;
        let sorted_flag = le::read_u32(&mut store)?;
        validate_header(&magic, sorted_flag)?;
        debug!("HW1 header ok, {} entries", toc_count);

        let mut entries = Vec::with_capacity(toc_count as usize);
        for _ in 0..toc_count {
            entries.push(T::read(&mut store)?);
        }

        let mut members = Vec::with_capacity(entries.len());
        for entry in &entries {
            let f = entry.fields();
            if f.name_length > MAX_NAME_LENGTH {
                return Err(BigError::format(format!(
                    "HW1 entry name too long: {} > {}",
                    f.name_length, MAX_NAME_LENGTH
                )));
            }
            if f.stored_size > f.real_size {
                return Err(BigError::format("HW1 entry stored_size > real_size"));
            }
            store.seek(SeekFrom::Start(f.entry_offset as u64))?;
            let cipher = le::read_padded_str(&mut store, f.name_length as usize + 1)?;
            let plain = decode_filename(&cipher);
            let name = normalize(&String::from_utf8_lossy(&plain));
            members.push(Member {
                name,
                mtime: util::timestamp_to_system_time(f.timestamp),
                real_size: f.real_size as u64,
                stored_size: f.stored_size as u64,
            });
        }

        Ok(Hw1Reader {
            store,
            entries,
            members,
        })
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn extract<W: Write>(&mut self, index: usize, mut writer: W) -> Result<()> {
        let entry = self.entries[index];
        let f = entry.fields();
        let data_offset = f.entry_offset as u64 + f.name_length as u64 + 1;
        self.store.seek(SeekFrom::Start(data_offset))?;
        let mut raw = vec![0u8; f.stored_size as usize];
        self.store.read_exact(&mut raw)?;
        if f.compressed {
            trace!(
                "lzss decompress: {} -> {} bytes",
                raw.len(),
                f.real_size
            );
            lzss::decompress(Cursor::new(raw), &mut writer)?;
        } else {
            writer.write_all(&raw)?;
        }
        Ok(())
    }
}

/// One member to be written into a new HW1-family archive.
pub struct Hw1MemberSource<D> {
    pub name: String,
    pub mtime: SystemTime,
    pub compress: bool,
    pub data: D,
}

fn write_header<W: Write>(count: u32, w: &mut W) -> IoResult<()> {
    w.write_all(MAGIC)?;
    le::write_u32(w, count)?;
    le::write_u32(w, 1)
}

/// Writes a new HW1 or HW1-Classic archive: sorts members by CRC-pair key,
/// compresses each one whose `compress` flag is set (subject to the
/// `MIN_COMPRESSION_RATIO` gate), then backpatches the header and TOC.
pub fn write<T: TocEntry, D: DataSource, W: Write + Seek>(
    members: impl IntoIterator<Item = Hw1MemberSource<D>>,
    mut out: W,
) -> Result<()> {
    let mut keyed: Vec<(u64, u32, u32, Hw1MemberSource<D>)> = members
        .into_iter()
        .map(|m| {
            let denorm = denormalize(&m.name).to_lowercase();
            let (crc_start, crc_end) = crc_pair(&denorm);
            (sort_key(crc_start, crc_end), crc_start, crc_end, m)
        })
        .collect();
    keyed.sort_by_key(|(key, ..)| *key);

    let count = keyed.len() as u32;
    let reserved = HEADER_SIZE + T::SIZE * keyed.len();
    out.seek(SeekFrom::Start(reserved as u64))?;

    let mut records = Vec::with_capacity(keyed.len());
    for (_, crc_start, crc_end, m) in &keyed {
        let entry_offset = out.stream_position()? as u32;
        let denorm = denormalize(&m.name);
        let encoded = encode_filename(denorm.as_bytes());
        if encoded.len() as u32 > MAX_NAME_LENGTH {
            return Err(BigError::value(format!(
                "name too long for HW1: {}",
                m.name
            )));
        }
        out.write_all(&encoded)?;
        out.write_all(&[0u8])?;

        let mut raw = Vec::new();
        m.data.open()?.read_to_end(&mut raw)?;
        let real_size = raw.len() as u32;

        let (stored, compressed) = if m.compress && real_size > 0 {
            let mut buf = Cursor::new(Vec::new());
            lzss::compress(Cursor::new(raw.clone()), &mut buf)?;
            let compressed_bytes = buf.into_inner();
            let ratio = compressed_bytes.len() as f64 / real_size as f64;
            trace!("lzss compress ratio {:.3} for {}", ratio, m.name);
            if ratio < lzss::MIN_COMPRESSION_RATIO {
                (compressed_bytes, true)
            } else {
                (raw, false)
            }
        } else {
            (raw, false)
        };
        let stored_size = stored.len() as u32;
        out.write_all(&stored)?;

        records.push(T::new(TocFields {
            crc_start: *crc_start,
            crc_end: *crc_end,
            name_length: encoded.len() as u32,
            stored_size,
            real_size,
            entry_offset,
            timestamp: util::system_time_to_timestamp(m.mtime),
            compressed,
        }));
    }

    out.seek(SeekFrom::Start(0))?;
    write_header(count, &mut out)?;
    for record in &records {
        record.write(&mut out)?;
    }
    Ok(())
}

/// Validates that a timestamp is not implausibly far in the future.
pub fn check_timestamp_plausible(ts: u32, now: SystemTime) -> Result<()> {
    let max = util::system_time_to_timestamp(now) as u64 + ONE_YEAR_SECS;
    if ts as u64 > max {
        warn!("HW1 entry timestamp {} is implausibly far in the future", ts);
        return Err(BigError::format("implausible future timestamp"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s5_filename_round_trip_and_first_byte() {
        let p = "test/path/to/file.ext";
        let denorm = denormalize(p);
        let encoded = encode_filename(denorm.as_bytes());
        assert_eq!(encoded[0], 0xD5 ^ b't');
        let decoded = decode_filename(&encoded);
        assert_eq!(String::from_utf8(decoded).unwrap(), denorm);
    }

    #[test]
    fn crc_pair_drops_odd_trailing_byte() {
        // 5-byte name: half = 2, so both halves are 2 bytes and the 5th
        // byte never participates in either CRC.
        let name = "abcde";
        let (s1, e1) = crc_pair(name);
        let name_changed_last = "abcdX";
        let (s2, e2) = crc_pair(name_changed_last);
        assert_eq!((s1, e1), (s2, e2));
    }

    #[test]
    fn toc_entry_round_trip() {
        let fields = TocFields {
            crc_start: 1,
            crc_end: 2,
            name_length: 10,
            stored_size: 100,
            real_size: 200,
            entry_offset: 300,
            timestamp: 400,
            compressed: true,
        };
        let mut buf = Cursor::new(Vec::new());
        Hw1TocEntry::new(fields).write(&mut buf).unwrap();
        let mut input = Cursor::new(buf.into_inner());
        let back = Hw1TocEntry::read(&mut input).unwrap();
        assert_eq!(back.fields().crc_start, 1);
        assert_eq!(back.fields().compressed, true);

        let mut buf = Cursor::new(Vec::new());
        Hw1ClassicTocEntry::new(fields).write(&mut buf).unwrap();
        assert_eq!(buf.get_ref().len(), Hw1ClassicTocEntry::SIZE);
        let mut input = Cursor::new(buf.into_inner());
        let back = Hw1ClassicTocEntry::read(&mut input).unwrap();
        assert_eq!(back.unknown1, CLASSIC_UNKNOWN1_DEFAULT);
        assert_eq!(back.fields().real_size, 200);
    }

    #[test]
    fn write_then_load_round_trip() {
        let members = vec![
            Hw1MemberSource {
                name: "b/two.txt".to_string(),
                mtime: SystemTime::UNIX_EPOCH,
                compress: true,
                data: b"bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb".to_vec(),
            },
            Hw1MemberSource {
                name: "a/one.txt".to_string(),
                mtime: SystemTime::UNIX_EPOCH,
                compress: false,
                data: b"hello".to_vec(),
            },
        ];
        let mut out = Cursor::new(Vec::new());
        write::<Hw1TocEntry, Vec<u8>, _>(members, &mut out).unwrap();

        let mut reader = Hw1Reader::<_, Hw1TocEntry>::load(Cursor::new(out.into_inner())).unwrap();
        let names: Vec<&str> = reader.members().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"b/two.txt"));
        assert!(names.contains(&"a/one.txt"));

        let idx_one = reader
            .members()
            .iter()
            .position(|m| m.name == "a/one.txt")
            .unwrap();
        let mut extracted = Vec::new();
        reader.extract(idx_one, &mut extracted).unwrap();
        assert_eq!(extracted, b"hello");
    }
}
