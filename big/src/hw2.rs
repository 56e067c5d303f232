//! HW2 (+ HW2-Classic, which is byte-for-byte the same on-disk format)
//! container (component F): a section header pointing at four parallel
//! tables — TOC roots, folders, file-infos, and a filename pool — plus a
//! folder-tree walk that reconstructs each member's full path.

use std::collections::HashMap;
use std::io::{Cursor, Read, Result as IoResult, Seek, SeekFrom, Write};
use std::time::SystemTime;

use log::{debug, trace, warn};
use md5::{Digest, Md5};

use crate::bin::{le, DataSource};
use crate::error::{BigError, Result};
use crate::member::{denormalize, normalize, Member};
use crate::util::{self, crc32};

pub const MAGIC: &[u8; 8] = b"_ARCHIVE";
pub const VERSION: u32 = 2;
pub const ARCHIVE_HEADER_SIZE: u64 = 180;
const ARCHIVE_NAME_UTF16_UNITS: usize = 64; // 128 bytes
const MAX_FILENAME_LENGTH: usize = 256;

const TOC_ROOT_SIZE: u64 = 64 + 64 + 2 * 5;
const FOLDER_SIZE: u64 = 4 + 2 * 4;
const FILE_INFO_SIZE: u64 = 4 + 1 + 4 + 4 + 4;
const FILE_ENTRY_SIZE: u64 = MAX_FILENAME_LENGTH as u64 + 4 + 4;

/// Placeholder secrets standing in for the real (proprietary, unavailable)
/// `RELIC_HW2_TOOL_SECURITY_KEY` / `RELIC_HW2_ROOT_SECURITY_KEY`. Write-side
/// hash computation is fully correct against whatever secret is configured
/// here; read-side verification is optional per spec and never wired in by
/// default, so a placeholder does not affect interop with real archives.
pub const TOOL_KEY: &[u8] = b"big-rs-placeholder-tool-security-key-0000000000000000";
pub const ROOT_KEY: &[u8] = b"big-rs-placeholder-root-security-key-0000000000000000";

fn md5_of(secret: &[u8], body: &[u8]) -> [u8; 16] {
    let mut hasher = Md5::new();
    hasher.update(secret);
    hasher.update(body);
    let digest = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

#[derive(Clone, Debug)]
pub struct ArchiveHeader {
    pub tool_key_hash: [u8; 16],
    pub archive_name: String,
    pub root_key_hash: [u8; 16],
    pub section_header_size: u32,
    pub file_data_offset: u32,
}

fn decode_utf16_name(bytes: &[u8]) -> String {
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();
    let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
    String::from_utf16_lossy(&units[..end])
}

fn encode_utf16_name(name: &str) -> [u8; 128] {
    let mut buf = [0u8; 128];
    let units: Vec<u16> = name.encode_utf16().take(ARCHIVE_NAME_UTF16_UNITS - 1).collect();
    for (i, u) in units.iter().enumerate() {
        let b = u.to_le_bytes();
        buf[i * 2] = b[0];
        buf[i * 2 + 1] = b[1];
    }
    buf
}

fn read_archive_header<R: Read>(r: &mut R) -> Result<ArchiveHeader> {
    let magic: [u8; 8] = le::read_fixed(r)?;
    if &magic != MAGIC {
        return Err(BigError::format(format!(
            "bad HW2 magic: {:?}",
            String::from_utf8_lossy(&magic)
        )));
    }
    let version = le::read_u32(r)?;
    if version != VERSION {
        return Err(BigError::format(format!(
            "unsupported HW2 version: {}",
            version
        )));
    }
    let tool_key_hash: [u8; 16] = le::read_fixed(r)?;
    let name_bytes: [u8; 128] = le::read_fixed(r)?;
    let archive_name = decode_utf16_name(&name_bytes);
    let root_key_hash: [u8; 16] = le::read_fixed(r)?;
    let section_header_size = le::read_u32(r)?;
    let file_data_offset = le::read_u32(r)?;
    Ok(ArchiveHeader {
        tool_key_hash,
        archive_name,
        root_key_hash,
        section_header_size,
        file_data_offset,
    })
}

fn write_archive_header<W: Write>(
    w: &mut W,
    archive_name: &str,
    tool_key_hash: [u8; 16],
    root_key_hash: [u8; 16],
    section_header_size: u32,
    file_data_offset: u32,
) -> IoResult<()> {
    w.write_all(MAGIC)?;
    le::write_u32(w, VERSION)?;
    w.write_all(&tool_key_hash)?;
    w.write_all(&encode_utf16_name(archive_name))?;
    w.write_all(&root_key_hash)?;
    le::write_u32(w, section_header_size)?;
    le::write_u32(w, file_data_offset)
}

#[derive(Clone, Copy, Debug, Default)]
struct SectionHeader {
    toc_offset: u32,
    toc_count: u16,
    folder_offset: u32,
    folder_count: u16,
    file_info_offset: u32,
    file_info_count: u16,
    filename_offset: u32,
    filename_count: u16,
}

impl SectionHeader {
    const SIZE: u64 = 4 * (4 + 2);

    fn read<R: Read>(r: &mut R) -> IoResult<Self> {
        Ok(SectionHeader {
            toc_offset: le::read_u32(r)?,
            toc_count: le::read_u16(r)?,
            folder_offset: le::read_u32(r)?,
            folder_count: le::read_u16(r)?,
            file_info_offset: le::read_u32(r)?,
            file_info_count: le::read_u16(r)?,
            filename_offset: le::read_u32(r)?,
            filename_count: le::read_u16(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        le::write_u32(w, self.toc_offset)?;
        le::write_u16(w, self.toc_count)?;
        le::write_u32(w, self.folder_offset)?;
        le::write_u16(w, self.folder_count)?;
        le::write_u32(w, self.file_info_offset)?;
        le::write_u16(w, self.file_info_count)?;
        le::write_u32(w, self.filename_offset)?;
        le::write_u16(w, self.filename_count)
    }
}

#[derive(Clone, Debug)]
struct TocRoot {
    namespace: String,
    filename: String,
    first_folder: u16,
    last_folder: u16,
    first_fileinfo: u16,
    last_fileinfo: u16,
    start_folder: u16,
}

impl TocRoot {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        let namespace = String::from_utf8_lossy(&le::read_padded_str(r, 64)?).into_owned();
        let filename = String::from_utf8_lossy(&le::read_padded_str(r, 64)?).into_owned();
        Ok(TocRoot {
            namespace,
            filename,
            first_folder: le::read_u16(r)?,
            last_folder: le::read_u16(r)?,
            first_fileinfo: le::read_u16(r)?,
            last_fileinfo: le::read_u16(r)?,
            start_folder: le::read_u16(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        le::write_padded_str(w, self.namespace.as_bytes(), 64)?;
        le::write_padded_str(w, self.filename.as_bytes(), 64)?;
        le::write_u16(w, self.first_folder)?;
        le::write_u16(w, self.last_folder)?;
        le::write_u16(w, self.first_fileinfo)?;
        le::write_u16(w, self.last_fileinfo)?;
        le::write_u16(w, self.start_folder)
    }
}

#[derive(Clone, Copy, Debug)]
struct Folder {
    filename_offset: u32,
    first_subfolder: u16,
    last_subfolder: u16,
    first_fileinfo: u16,
    last_fileinfo: u16,
}

impl Folder {
    fn read<R: Read>(r: &mut R) -> IoResult<Self> {
        Ok(Folder {
            filename_offset: le::read_u32(r)?,
            first_subfolder: le::read_u16(r)?,
            last_subfolder: le::read_u16(r)?,
            first_fileinfo: le::read_u16(r)?,
            last_fileinfo: le::read_u16(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        le::write_u32(w, self.filename_offset)?;
        le::write_u16(w, self.first_subfolder)?;
        le::write_u16(w, self.last_subfolder)?;
        le::write_u16(w, self.first_fileinfo)?;
        le::write_u16(w, self.last_fileinfo)
    }
}

#[derive(Clone, Copy, Debug)]
struct FileInfo {
    filename_offset: u32,
    compression_flag: u8,
    file_data_offset: u32,
    stored_size: u32,
    real_size: u32,
}

impl FileInfo {
    fn read<R: Read>(r: &mut R) -> IoResult<Self> {
        Ok(FileInfo {
            filename_offset: le::read_u32(r)?,
            compression_flag: le::read_u8(r)?,
            file_data_offset: le::read_u32(r)?,
            stored_size: le::read_u32(r)?,
            real_size: le::read_u32(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> IoResult<()> {
        le::write_u32(w, self.filename_offset)?;
        le::write_u8(w, self.compression_flag)?;
        le::write_u32(w, self.file_data_offset)?;
        le::write_u32(w, self.stored_size)?;
        le::write_u32(w, self.real_size)
    }
}

fn read_file_entry<R: Read>(r: &mut R) -> Result<(String, u32, u32)> {
    let name = String::from_utf8_lossy(&le::read_padded_str(r, MAX_FILENAME_LENGTH)?).into_owned();
    let timestamp = le::read_u32(r)?;
    let crc = le::read_u32(r)?;
    Ok((name, timestamp, crc))
}

fn write_file_entry<W: Write>(w: &mut W, name: &str, timestamp: u32, crc: u32) -> IoResult<()> {
    le::write_padded_str(w, name.as_bytes(), MAX_FILENAME_LENGTH)?;
    le::write_u32(w, timestamp)?;
    le::write_u32(w, crc)
}

/// Options controlling extraction leniency, per §7's "CRC mismatches are
/// surfaced by default and may be downgraded by a configuration flag".
#[derive(Clone, Copy, Debug)]
pub struct ExtractOptions {
    pub verify_crc: bool,
    pub decompress: bool,
}
impl Default for ExtractOptions {
    fn default() -> Self {
        ExtractOptions {
            verify_crc: true,
            decompress: true,
        }
    }
}

/// Parses only the archive header and section header, suppressing failures
/// for format detection.
pub fn check_format<R: Read + Seek>(reader: &mut R) -> Result<()> {
    reader.seek(SeekFrom::Start(0))?;
    let header = read_archive_header(reader)?;
    let _section = SectionHeader::read(reader)?;
    if (header.section_header_size as u64) < SectionHeader::SIZE {
        return Err(BigError::format("HW2 section header size too small"));
    }
    Ok(())
}

struct FilenamePool<R> {
    store: R,
    base: u64,
    cache: HashMap<u32, String>,
}

impl<R: Read + Seek> FilenamePool<R> {
    fn resolve(&mut self, offset: u32) -> Result<String> {
        if offset == 0 {
            return Ok(String::new());
        }
        if let Some(name) = self.cache.get(&offset) {
            return Ok(name.clone());
        }
        self.store.seek(SeekFrom::Start(self.base + offset as u64))?;
        let bytes = le::read_padded_str(&mut self.store, MAX_FILENAME_LENGTH)?;
        let name = normalize(&String::from_utf8_lossy(&bytes));
        self.cache.insert(offset, name.clone());
        Ok(name)
    }
}

fn join(prefix: &str, name: &str) -> String {
    if name.is_empty() {
        prefix.to_string()
    } else if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", prefix, name)
    }
}

/// A loaded HW2 (or HW2-Classic) archive.
pub struct Hw2Reader<R> {
    store: R,
    header: ArchiveHeader,
    section: SectionHeader,
    file_infos: Vec<FileInfo>,
    paths: Vec<String>, // parallel to file_infos, full in-archive path
    members: Vec<Member>,
}

impl<R: Read + Seek> Hw2Reader<R> {
    pub fn load(mut store: R) -> Result<Self> {
        store.seek(SeekFrom::Start(0))?;
        let header = read_archive_header(&mut store)?;
        let section = SectionHeader::read(&mut store)?;
        debug!(
            "HW2 header ok: {} toc roots, {} folders, {} file-infos",
            section.toc_count, section.folder_count, section.file_info_count
        );

        store.seek(SeekFrom::Start(
            ARCHIVE_HEADER_SIZE + section.toc_offset as u64,
        ))?;
        let mut toc_roots = Vec::with_capacity(section.toc_count as usize);
        for _ in 0..section.toc_count {
            toc_roots.push(TocRoot::read(&mut store)?);
        }

        store.seek(SeekFrom::Start(
            ARCHIVE_HEADER_SIZE + section.folder_offset as u64,
        ))?;
        let mut folders = Vec::with_capacity(section.folder_count as usize);
        for _ in 0..section.folder_count {
            folders.push(Folder::read(&mut store)?);
        }

        store.seek(SeekFrom::Start(
            ARCHIVE_HEADER_SIZE + section.file_info_offset as u64,
        ))?;
        let mut file_infos = Vec::with_capacity(section.file_info_count as usize);
        for _ in 0..section.file_info_count {
            file_infos.push(FileInfo::read(&mut store)?);
        }

        let mut pool = FilenamePool {
            store,
            base: ARCHIVE_HEADER_SIZE + section.filename_offset as u64,
            cache: HashMap::new(),
        };

        let mut paths = vec![String::new(); file_infos.len()];
        for root in &toc_roots {
            walk_folder(
                &folders,
                &file_infos,
                root.start_folder as usize,
                normalize(&root.filename),
                &mut pool,
                &mut paths,
            )?;
        }

        let mut members = Vec::with_capacity(file_infos.len());
        for (i, fi) in file_infos.iter().enumerate() {
            if fi.stored_size > fi.real_size {
                return Err(BigError::format("HW2 file-info stored_size > real_size"));
            }
            let store = &mut pool.store;
            store.seek(SeekFrom::Start(
                header.file_data_offset as u64 + fi.file_data_offset as u64 - FILE_ENTRY_SIZE,
            ))?;
            let (_name, timestamp, _crc) = read_file_entry(store)?;
            members.push(Member {
                name: paths[i].clone(),
                mtime: util::timestamp_to_system_time(timestamp),
                real_size: fi.real_size as u64,
                stored_size: fi.stored_size as u64,
            });
        }

        Ok(Hw2Reader {
            store: pool.store,
            header,
            section,
            file_infos,
            paths,
            members,
        })
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn extract<W: Write>(&mut self, index: usize, opts: ExtractOptions, mut writer: W) -> Result<()> {
        let fi = self.file_infos[index];
        let data_offset = self.header.file_data_offset as u64 + fi.file_data_offset as u64;
        self.store
            .seek(SeekFrom::Start(data_offset - FILE_ENTRY_SIZE))?;
        let (_name, _timestamp, expected_crc) = read_file_entry(&mut self.store)?;

        self.store.seek(SeekFrom::Start(data_offset))?;
        let mut raw = vec![0u8; fi.stored_size as usize];
        self.store.read_exact(&mut raw)?;

        let decompress = fi.compression_flag != 0 && opts.decompress;
        let plain = if decompress {
            let mut out = Vec::with_capacity(fi.real_size as usize);
            libflate::zlib::Decoder::new(Cursor::new(&raw[..]))
                .and_then(|mut d| d.read_to_end(&mut out))
                .map_err(|e| BigError::format(format!("zlib inflate failed: {}", e)))?;
            out
        } else {
            raw
        };

        if opts.verify_crc {
            let actual = crc32(&plain);
            if actual != expected_crc {
                warn!(
                    "HW2 CRC mismatch for {}: expected {:08x}, got {:08x}",
                    self.paths.get(index).map(String::as_str).unwrap_or("?"),
                    expected_crc,
                    actual
                );
                return Err(BigError::integrity(format!(
                    "CRC mismatch for {}",
                    self.paths.get(index).map(String::as_str).unwrap_or("?")
                )));
            }
        }

        writer.write_all(&plain)?;
        Ok(())
    }

    /// Computed hashes verification is optional (§4.F, §9 open question);
    /// this recomputes both and compares.
    pub fn verify_key_hashes(&mut self) -> Result<bool> {
        self.store.seek(SeekFrom::Start(ARCHIVE_HEADER_SIZE))?;
        let mut tail = Vec::new();
        self.store.read_to_end(&mut tail)?;
        let tool_ok = md5_of(TOOL_KEY, &tail) == self.header.tool_key_hash;

        let root_region_len = (self.header.file_data_offset as u64)
            .saturating_sub(ARCHIVE_HEADER_SIZE) as usize;
        let root_ok = root_region_len <= tail.len()
            && md5_of(ROOT_KEY, &tail[..root_region_len]) == self.header.root_key_hash;

        Ok(tool_ok && root_ok)
    }
}

fn walk_folder<R: Read + Seek>(
    folders: &[Folder],
    file_infos: &[FileInfo],
    folder_idx: usize,
    prefix: String,
    pool: &mut FilenamePool<R>,
    paths: &mut [String],
) -> Result<()> {
    let folder = folders[folder_idx];
    for sub in folder.first_subfolder..folder.last_subfolder {
        let sub_folder = folders[sub as usize];
        let sub_name = pool.resolve(sub_folder.filename_offset)?;
        let sub_prefix = join(&prefix, &sub_name);
        walk_folder(folders, file_infos, sub as usize, sub_prefix, pool, paths)?;
    }
    for fi_idx in folder.first_fileinfo..folder.last_fileinfo {
        let fi = file_infos[fi_idx as usize];
        let name = pool.resolve(fi.filename_offset)?;
        paths[fi_idx as usize] = join(&prefix, &name);
    }
    Ok(())
}

/// A folder-tree shape to write: each node has a name (empty for the
/// invisible root folder) plus member files and nested subfolders.
pub struct Hw2FolderSource<D> {
    pub name: String,
    pub files: Vec<Hw2MemberSource<D>>,
    pub subfolders: Vec<Hw2FolderSource<D>>,
}

pub struct Hw2MemberSource<D> {
    pub name: String,
    pub mtime: SystemTime,
    pub compress: bool,
    pub data: D,
}

struct FlatFolder<D> {
    filename: String,
    first_subfolder: u16,
    last_subfolder: u16,
    first_fileinfo: u16,
    last_fileinfo: u16,
    files: Vec<Hw2MemberSource<D>>,
}

impl<D> FlatFolder<D> {
    fn empty() -> Self {
        FlatFolder {
            filename: String::new(),
            first_subfolder: 0,
            last_subfolder: 0,
            first_fileinfo: 0,
            last_fileinfo: 0,
            files: Vec::new(),
        }
    }
}

fn flatten_folders<D>(root: Hw2FolderSource<D>, out: &mut Vec<FlatFolder<D>>) -> usize {
    let idx = out.len();
    out.push(FlatFolder::empty());
    fill_folder(idx, root, out);
    idx
}

/// Fills in the folder node already allocated at `idx`, reserving a
/// contiguous slot for every *direct* child before recursing into any of
/// them. `walk_folder` treats `first_subfolder..last_subfolder` as direct
/// children only, so siblings have to stay contiguous instead of having
/// descendants pushed in between them.
fn fill_folder<D>(idx: usize, folder: Hw2FolderSource<D>, out: &mut Vec<FlatFolder<D>>) {
    out[idx].filename = folder.name;
    out[idx].files = folder.files;

    let first_subfolder = out.len() as u16;
    let reserved: Vec<usize> = folder
        .subfolders
        .iter()
        .map(|_| {
            let slot = out.len();
            out.push(FlatFolder::empty());
            slot
        })
        .collect();
    let last_subfolder = out.len() as u16;
    out[idx].first_subfolder = first_subfolder;
    out[idx].last_subfolder = last_subfolder;

    for (sub, slot) in folder.subfolders.into_iter().zip(reserved) {
        fill_folder(slot, sub, out);
    }
}

/// Writes a new HW2 archive from a single namespace's folder tree. Computes
/// both key hashes; only ever one TOC root (`namespace`/`root_name`) since
/// the source format rarely uses more than one in practice.
pub fn write<D: DataSource, W: Write + Seek>(
    namespace: &str,
    root_name: &str,
    root: Hw2FolderSource<D>,
    archive_name: &str,
    mut out: W,
) -> Result<()> {
    let mut flat: Vec<FlatFolder<D>> = Vec::new();
    flatten_folders(root, &mut flat);

    // Assign contiguous file-info ranges per folder and collect filenames.
    let mut file_infos_src: Vec<(usize, Hw2MemberSource<D>)> = Vec::new();
    for (folder_idx, folder) in flat.iter_mut().enumerate() {
        let first = file_infos_src.len() as u16;
        for file in std::mem::take(&mut folder.files) {
            file_infos_src.push((folder_idx, file));
        }
        folder.first_fileinfo = first;
        folder.last_fileinfo = file_infos_src.len() as u16;
    }

    // Filename pool: folder names (skip empty) then file names, in that
    // order, each as a null-terminated blob; offset 0 means "no name".
    let mut pool_bytes: Vec<u8> = Vec::new();
    let mut folder_name_offset = vec![0u32; flat.len()];
    for (i, folder) in flat.iter().enumerate() {
        if !folder.filename.is_empty() {
            folder_name_offset[i] = pool_bytes.len() as u32;
            pool_bytes.extend_from_slice(folder.filename.as_bytes());
            pool_bytes.push(0);
        }
    }
    let mut file_name_offset = vec![0u32; file_infos_src.len()];
    for (i, (_, file)) in file_infos_src.iter().enumerate() {
        file_name_offset[i] = pool_bytes.len() as u32;
        pool_bytes.extend_from_slice(file.name.as_bytes());
        pool_bytes.push(0);
    }

    let toc_root = TocRoot {
        namespace: namespace.to_string(),
        filename: root_name.to_string(),
        first_folder: 0,
        last_folder: flat.len() as u16,
        first_fileinfo: 0,
        last_fileinfo: file_infos_src.len() as u16,
        start_folder: 0,
    };

    let section = SectionHeader {
        toc_offset: 0,
        toc_count: 1,
        folder_offset: TOC_ROOT_SIZE as u32,
        folder_count: flat.len() as u16,
        file_info_offset: (TOC_ROOT_SIZE + FOLDER_SIZE * flat.len() as u64) as u32,
        file_info_count: file_infos_src.len() as u16,
        filename_offset: (TOC_ROOT_SIZE
            + FOLDER_SIZE * flat.len() as u64
            + FILE_INFO_SIZE * file_infos_src.len() as u64) as u32,
        filename_count: (flat.len() + file_infos_src.len()) as u16,
    };

    let archive_header_placeholder = [0u8; ARCHIVE_HEADER_SIZE as usize];
    out.write_all(&archive_header_placeholder)?;
    section.write(&mut out)?;
    toc_root.write(&mut out)?;

    let folder_records_pos = out.stream_position()?;
    for (i, folder) in flat.iter().enumerate() {
        Folder {
            filename_offset: folder_name_offset[i],
            first_subfolder: folder.first_subfolder,
            last_subfolder: folder.last_subfolder,
            first_fileinfo: folder.first_fileinfo,
            last_fileinfo: folder.last_fileinfo,
        }
        .write(&mut out)?;
    }
    debug_assert_eq!(
        out.stream_position()?,
        folder_records_pos + FOLDER_SIZE * flat.len() as u64
    );

    let file_info_records_pos = out.stream_position()?;
    // Reserve file-info records; backpatched once data offsets are known.
    for _ in &file_infos_src {
        out.write_all(&[0u8; FILE_INFO_SIZE as usize])?;
    }

    out.write_all(&pool_bytes)?;

    let file_data_offset = out.stream_position()? as u32;
    let mut file_infos = Vec::with_capacity(file_infos_src.len());
    for (i, (_, file)) in file_infos_src.iter().enumerate() {
        let mut raw = Vec::new();
        file.data.open()?.read_to_end(&mut raw)?;
        let real_size = raw.len() as u32;

        let (stored, flag) = if file.compress && real_size > 0 {
            let mut encoder = libflate::zlib::Encoder::new(Vec::new())
                .map_err(|e| BigError::format(format!("zlib init failed: {}", e)))?;
            encoder.write_all(&raw)?;
            let compressed = encoder
                .finish()
                .into_result()
                .map_err(|e| BigError::format(format!("zlib deflate failed: {}", e)))?;
            trace!(
                "zlib compress ratio {:.3} for {}",
                compressed.len() as f64 / real_size.max(1) as f64,
                file.name
            );
            (compressed, 1u8)
        } else {
            (raw.clone(), 0u8)
        };

        let relative_offset = out.stream_position()? as u32 - file_data_offset + FILE_ENTRY_SIZE as u32;
        let crc = crc32(&raw);
        write_file_entry(&mut out, &denormalize(&file.name), util::system_time_to_timestamp(file.mtime), crc)?;
        out.write_all(&stored)?;

        file_infos.push(FileInfo {
            filename_offset: file_name_offset[i],
            compression_flag: flag,
            file_data_offset: relative_offset,
            stored_size: stored.len() as u32,
            real_size,
        });
    }

    let end = out.stream_position()?;

    out.seek(SeekFrom::Start(file_info_records_pos))?;
    for fi in &file_infos {
        fi.write(&mut out)?;
    }

    // Root key hash covers archive-header..file_data_offset.
    out.seek(SeekFrom::Start(ARCHIVE_HEADER_SIZE))?;
    let mut root_region = vec![0u8; (file_data_offset as u64 - ARCHIVE_HEADER_SIZE) as usize];
    out.read_exact(&mut root_region)?;
    let root_key_hash = md5_of(ROOT_KEY, &root_region);

    out.seek(SeekFrom::Start(ARCHIVE_HEADER_SIZE))?;
    let mut tail = Vec::new();
    out.read_to_end(&mut tail)?;
    let tool_key_hash = md5_of(TOOL_KEY, &tail);

    out.seek(SeekFrom::Start(0))?;
    write_archive_header(
        &mut out,
        archive_name,
        tool_key_hash,
        root_key_hash,
        SectionHeader::SIZE as u32,
        file_data_offset,
    )?;

    out.seek(SeekFrom::Start(end))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s6_walk_visits_each_fileinfo_once_with_joined_paths() {
        let root = Hw2FolderSource {
            name: String::new(),
            files: vec![],
            subfolders: vec![
                Hw2FolderSource {
                    name: "a".to_string(),
                    files: vec![Hw2MemberSource {
                        name: "one.txt".to_string(),
                        mtime: SystemTime::UNIX_EPOCH,
                        compress: false,
                        data: b"aaa".to_vec(),
                    }],
                    subfolders: vec![],
                },
                Hw2FolderSource {
                    name: "b".to_string(),
                    files: vec![Hw2MemberSource {
                        name: "two.txt".to_string(),
                        mtime: SystemTime::UNIX_EPOCH,
                        compress: false,
                        data: b"bb".to_vec(),
                    }],
                    subfolders: vec![],
                },
            ],
        };

        let mut out = Cursor::new(Vec::new());
        write::<Vec<u8>, _>("data", "Root", root, "TestArchive", &mut out).unwrap();

        let mut reader = Hw2Reader::load(Cursor::new(out.into_inner())).unwrap();
        assert_eq!(reader.members().len(), 2);
        let names: Vec<&str> = reader.members().iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"Root/a/one.txt"));
        assert!(names.contains(&"Root/b/two.txt"));

        let idx = reader
            .members()
            .iter()
            .position(|m| m.name == "Root/a/one.txt")
            .unwrap();
        let mut extracted = Vec::new();
        reader
            .extract(idx, ExtractOptions::default(), &mut extracted)
            .unwrap();
        assert_eq!(extracted, b"aaa");
    }

    #[test]
    fn nested_subfolders_are_each_visited_once() {
        // Root -> a -> a1, and a sibling Root -> b, at once: checks that
        // `a`'s grandchild `a1` isn't also treated as a direct child of
        // Root (it would overwrite `b`'s or shadow `a1`'s own path).
        let root = Hw2FolderSource {
            name: String::new(),
            files: vec![],
            subfolders: vec![
                Hw2FolderSource {
                    name: "a".to_string(),
                    files: vec![],
                    subfolders: vec![Hw2FolderSource {
                        name: "a1".to_string(),
                        files: vec![Hw2MemberSource {
                            name: "deep.txt".to_string(),
                            mtime: SystemTime::UNIX_EPOCH,
                            compress: false,
                            data: b"deep".to_vec(),
                        }],
                        subfolders: vec![],
                    }],
                },
                Hw2FolderSource {
                    name: "b".to_string(),
                    files: vec![Hw2MemberSource {
                        name: "shallow.txt".to_string(),
                        mtime: SystemTime::UNIX_EPOCH,
                        compress: false,
                        data: b"shallow".to_vec(),
                    }],
                    subfolders: vec![],
                },
            ],
        };

        let mut out = Cursor::new(Vec::new());
        write::<Vec<u8>, _>("data", "Root", root, "TestArchive", &mut out).unwrap();

        let mut reader = Hw2Reader::load(Cursor::new(out.into_inner())).unwrap();
        assert_eq!(reader.members().len(), 2);
        let names: Vec<&str> = reader.members().iter().map(|m| m.name.as_str()).collect();
        assert!(names.contains(&"Root/a/a1/deep.txt"));
        assert!(names.contains(&"Root/b/shallow.txt"));

        let idx = reader
            .members()
            .iter()
            .position(|m| m.name == "Root/a/a1/deep.txt")
            .unwrap();
        let mut extracted = Vec::new();
        reader
            .extract(idx, ExtractOptions::default(), &mut extracted)
            .unwrap();
        assert_eq!(extracted, b"deep");
    }

    #[test]
    fn header_name_round_trip() {
        let name = "Data Archive 1";
        let encoded = encode_utf16_name(name);
        assert_eq!(decode_utf16_name(&encoded), name);
    }
}
