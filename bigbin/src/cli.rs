use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "big", about = "Inspect, extract, create and decrypt Homeworld .big archives")]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Cmds,
}

#[derive(Debug, Subcommand)]
pub enum Cmds {
    /// List the members of a .big archive.
    Ls(Ls),
    /// Extract members of a .big archive to a directory.
    Extract(Extract),
    /// Create a new .big archive from a directory.
    Create(Create),
    /// Write the decrypted body of an HWRM archive to a plaintext file.
    Decrypt(Decrypt),
    /// Compare two .big archives member-by-member.
    Diff(Diff),
}

#[derive(Debug, Args)]
pub struct Ls {
    /// Show compressed-flag, stored size, delta and mtime alongside each name.
    #[arg(short, long)]
    pub long: bool,

    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct Extract {
    /// Only extract members whose name matches this glob.
    #[arg(short, long)]
    pub include: Option<String>,

    /// Write members out in their stored (possibly compressed) form.
    #[arg(long = "no-decompress")]
    pub no_decompress: bool,

    pub file: PathBuf,

    pub dest: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum CreateFormat {
    #[value(name = "hw1")]
    Hw1,
    #[value(name = "hw1c")]
    Hw1c,
    #[value(name = "hw2")]
    Hw2,
}

#[derive(Debug, Args)]
pub struct Create {
    #[arg(short = 'f', long, value_enum, default_value = "hw2")]
    pub format: CreateFormat,

    /// Skip members whose relative path matches this glob.
    #[arg(short = 'x', long)]
    pub exclude: Option<String>,

    pub file: PathBuf,

    pub source: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct Decrypt {
    pub src: PathBuf,
    pub dest: PathBuf,
}

#[derive(Debug, Args)]
pub struct Diff {
    pub left: PathBuf,
    pub right: PathBuf,
}
