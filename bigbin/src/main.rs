use std::fs::{self, File};
use std::io::{self, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use clap::Parser;
use glob::Pattern;

use big::{
    gearbox, write_hw1, write_hw2, ExtractOptions, Hw1ClassicTocEntry, Hw1MemberSource,
    Hw1TocEntry, Hw2FolderSource, Hw2MemberSource,
};

mod cli;
mod date;

use cli::{Cli, Cmds, Create, CreateFormat, Decrypt, Diff, Extract, Ls};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let result = match &cli.cmd {
        Cmds::Ls(cmd) => run_ls(cmd),
        Cmds::Extract(cmd) => run_extract(cmd),
        Cmds::Create(cmd) => run_create(cmd),
        Cmds::Decrypt(cmd) => run_decrypt(cmd),
        Cmds::Diff(cmd) => run_diff(cmd),
    };
    if let Err(err) = &result {
        eprintln!("error: {}", err);
    }
    result.map_err(io::Error::from)
}

fn run_ls(cmd: &Ls) -> big::Result<()> {
    let (_format, archive) = big::open(&cmd.file)?;
    let now = SystemTime::now();
    for member in archive.members() {
        if cmd.long {
            let flag = if member.is_compressed() { "c" } else { "N" };
            let delta = member.real_size - member.stored_size;
            println!(
                "{} {:>8} +{:>8} {} {}",
                flag,
                member.stored_size,
                delta,
                date::format_mtime(member.mtime, now),
                member.name
            );
        } else {
            println!("{}", member.name);
        }
    }
    Ok(())
}

fn run_extract(cmd: &Extract) -> big::Result<()> {
    let (_format, mut archive) = big::open(&cmd.file)?;
    let dest = cmd.dest.clone().unwrap_or_else(|| PathBuf::from("."));
    let pattern = cmd
        .include
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .map_err(|e| big::BigError::value(e.to_string()))?;

    let opts = ExtractOptions {
        verify_crc: true,
        decompress: !cmd.no_decompress,
    };

    let indices: Vec<usize> = archive
        .members()
        .iter()
        .enumerate()
        .filter(|(_, m)| pattern.as_ref().map_or(true, |p| p.matches(&m.name)))
        .map(|(i, _)| i)
        .collect();

    for index in indices {
        let (name, real_size) = {
            let m = &archive.members()[index];
            (m.name.clone(), m.real_size)
        };
        let out_path = dest.join(&name);
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(&out_path)?;
        archive.extract(index, opts, BufWriter::new(file))?;
        println!("Extracted {:>8} bytes: {}", real_size, name);
    }
    Ok(())
}

fn run_decrypt(cmd: &Decrypt) -> big::Result<()> {
    let mut src = File::open(&cmd.src)?;
    let master = gearbox::master_key();
    let footer = gearbox::load_footer(&mut src, &master, gearbox::ENCRYPTION_KEY_MARKER)?;

    use std::io::{Read, Seek, SeekFrom};
    src.seek(SeekFrom::Start(0))?;
    let data_size = footer.cipher.data_size();
    let mut body = vec![0u8; data_size as usize];
    src.read_exact(&mut body)?;
    let plain = footer.cipher.decrypt(&body, 0);

    fs::write(&cmd.dest, plain)?;
    Ok(())
}

fn run_diff(cmd: &Diff) -> big::Result<()> {
    let (_lf, left) = big::open(&cmd.left)?;
    let (_rf, right) = big::open(&cmd.right)?;

    for (i, (l, r)) in left.members().iter().zip(right.members().iter()).enumerate() {
        println!("Checking member #{:06}", i);
        if l.name != r.name {
            println!("Member mismatch on key [name]: {:?} != {:?}", l.name, r.name);
        }
        if l.mtime != r.mtime {
            println!("Member mismatch on key [mtime]: {:?} != {:?}", l.mtime, r.mtime);
        }
        if l.real_size != r.real_size {
            println!(
                "Member mismatch on key [real_size]: {:?} != {:?}",
                l.real_size, r.real_size
            );
        }
        if l.stored_size != r.stored_size {
            println!(
                "Member mismatch on key [stored_size]: {:?} != {:?}",
                l.stored_size, r.stored_size
            );
        }
    }

    let left_total: u64 = left.members().iter().map(|m| m.stored_size).sum();
    let right_total: u64 = right.members().iter().map(|m| m.stored_size).sum();
    if left_total != right_total {
        println!(
            "Total data size does not match: {} != {} (+/- {})",
            left_total,
            right_total,
            (right_total as i64 - left_total as i64).abs()
        );
    }
    Ok(())
}

/// One file discovered while walking a source directory: its forward-slash
/// relative path, absolute path on disk, and last-modified time.
struct FoundFile {
    rel_path: String,
    abs_path: PathBuf,
    mtime: SystemTime,
}

fn walk_files(source: &Path, exclude: Option<&Pattern>) -> io::Result<Vec<FoundFile>> {
    let mut found = Vec::new();
    walk_files_into(source, &PathBuf::new(), exclude, &mut found)?;
    Ok(found)
}

fn walk_files_into(
    dir: &Path,
    rel_prefix: &Path,
    exclude: Option<&Pattern>,
    out: &mut Vec<FoundFile>,
) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let file_type = entry.file_type()?;
        let rel_path = rel_prefix.join(entry.file_name());
        if file_type.is_dir() {
            walk_files_into(&entry.path(), &rel_path, exclude, out)?;
        } else if file_type.is_file() {
            let rel_str = rel_path.to_string_lossy().replace('\\', "/");
            if exclude.map_or(false, |p| p.matches(&rel_str)) {
                continue;
            }
            let mtime = entry.metadata()?.modified()?;
            out.push(FoundFile {
                rel_path: rel_str,
                abs_path: entry.path(),
                mtime,
            });
        }
    }
    Ok(())
}

/// Builds the nested `Hw2FolderSource` tree HW2 needs, mirroring the
/// on-disk directory structure under `source`.
fn build_folder_tree(
    dir: &Path,
    name: String,
    exclude: Option<&Pattern>,
    rel_prefix: &Path,
) -> io::Result<Hw2FolderSource<PathBuf>> {
    let mut files = Vec::new();
    let mut subfolders = Vec::new();

    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    for entry in entries {
        let file_type = entry.file_type()?;
        let rel_path = rel_prefix.join(entry.file_name());
        if file_type.is_dir() {
            subfolders.push(build_folder_tree(
                &entry.path(),
                entry.file_name().to_string_lossy().into_owned(),
                exclude,
                &rel_path,
            )?);
        } else if file_type.is_file() {
            let rel_str = rel_path.to_string_lossy().replace('\\', "/");
            if exclude.map_or(false, |p| p.matches(&rel_str)) {
                continue;
            }
            let mtime = entry.metadata()?.modified()?;
            files.push(Hw2MemberSource {
                name: entry.file_name().to_string_lossy().into_owned(),
                mtime,
                compress: true,
                data: entry.path(),
            });
        }
    }

    Ok(Hw2FolderSource {
        name,
        files,
        subfolders,
    })
}

fn run_create(cmd: &Create) -> big::Result<()> {
    if cmd.file.exists() {
        println!("{} already exists", cmd.file.display());
        return Ok(());
    }
    let source = cmd
        .source
        .clone()
        .unwrap_or(std::env::current_dir().map_err(big::BigError::Io)?);
    let exclude = cmd
        .exclude
        .as_deref()
        .map(Pattern::new)
        .transpose()
        .map_err(|e| big::BigError::value(e.to_string()))?;

    let out = File::create(&cmd.file)?;
    let archive_name = cmd
        .file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "archive".to_string());

    match cmd.format {
        CreateFormat::Hw1 | CreateFormat::Hw1c => {
            let files = walk_files(&source, exclude.as_ref())?;
            let members: Vec<Hw1MemberSource<PathBuf>> = files
                .into_iter()
                .map(|f| Hw1MemberSource {
                    name: f.rel_path,
                    mtime: f.mtime,
                    compress: true,
                    data: f.abs_path,
                })
                .collect();
            match cmd.format {
                CreateFormat::Hw1 => write_hw1::<Hw1TocEntry, PathBuf, _>(members, out)?,
                CreateFormat::Hw1c => write_hw1::<Hw1ClassicTocEntry, PathBuf, _>(members, out)?,
                CreateFormat::Hw2 => unreachable!(),
            }
        }
        CreateFormat::Hw2 => {
            // The top folder's own name is never consulted by the reader's
            // walk (it uses the TOC root's `filename` as the path prefix
            // instead), so it's left empty here.
            let root = build_folder_tree(&source, String::new(), exclude.as_ref(), &PathBuf::new())?;
            write_hw2::<PathBuf, _>("data", &archive_name, root, &archive_name, out)?;
        }
    }
    Ok(())
}
