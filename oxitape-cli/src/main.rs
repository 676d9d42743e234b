//! OxiTape CLI - streaming ar, cpio and tar archiver
//!
//! A Pure Rust utility for listing, creating, extracting and converting
//! classic Unix archives.

mod utils;

use clap::{Parser, Subcommand, ValueEnum};
use oxitape_archive::ArchiveFormat;
use oxitape_core::{ArchiveReader, ArchiveWriter, EntryType, Header, convert};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use utils::{
    ArchiveListing, ListingRecord, copy_from_entry, copy_to_entry, create_progress_bar,
    header_from_metadata, matches_filters, print_entries,
};

type CmdResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "oxitape")]
#[command(author, version, about = "Streaming ar, cpio and tar archiver")]
#[command(long_about = "
OxiTape reads and writes ar, cpio (newc/crc) and tar (USTAR + PAX) archives
as a stream of entries.

Examples:
  oxitape list initrd.cpio
  oxitape list -v --json src.tar
  oxitape create src.tar src/ Cargo.toml
  oxitape create -f cpio initrd.img rootfs/
  oxitape extract -o out/ --preserve src.tar
  oxitape convert src.tar src.cpio
  oxitape detect libfoo.a

Set RUST_LOG=debug (or pass -v) for per-entry diagnostics.
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List contents of an archive
    #[command(alias = "l")]
    List {
        /// Archive file to list
        archive: PathBuf,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,

        /// Include only entries matching pattern (glob syntax: *.txt, src/**/*)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,
    },

    /// Create a new archive
    #[command(alias = "c")]
    Create {
        /// Output archive file
        archive: PathBuf,

        /// Files and directories to add to the archive
        files: Vec<PathBuf>,

        /// Archive format, detected from the extension if not specified
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Extract entries from an archive
    #[command(alias = "x")]
    Extract {
        /// Archive file to extract
        archive: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// Include only entries matching pattern (glob syntax)
        #[arg(short = 'I', long)]
        include: Vec<String>,

        /// Exclude entries matching pattern (glob syntax)
        #[arg(short = 'X', long)]
        exclude: Vec<String>,

        /// Restore modification times and permission bits
        #[arg(long)]
        preserve: bool,

        /// Show progress bar
        #[arg(short = 'P', long)]
        progress: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Convert an archive to another format
    Convert {
        /// Input archive file
        input: PathBuf,

        /// Output archive file
        output: PathBuf,

        /// Output format, detected from the extension if not specified
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Detect archive format
    Detect {
        /// File to detect
        file: PathBuf,
    },
}

impl Commands {
    fn verbose(&self) -> bool {
        match self {
            Self::List { verbose, .. }
            | Self::Create { verbose, .. }
            | Self::Extract { verbose, .. }
            | Self::Convert { verbose, .. } => *verbose,
            Self::Detect { .. } => false,
        }
    }
}

/// Output archive format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    /// Unix ar archive
    Ar,
    /// cpio new ASCII archive
    Cpio,
    /// TAR archive (USTAR with PAX extensions)
    Tar,
}

impl From<OutputFormat> for ArchiveFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Ar => Self::Ar,
            OutputFormat::Cpio => Self::Cpio,
            OutputFormat::Tar => Self::Tar,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.command.verbose() { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = match cli.command {
        Commands::List {
            archive,
            verbose,
            json,
            include,
            exclude,
        } => cmd_list(&archive, verbose, json, &include, &exclude),
        Commands::Create {
            archive,
            files,
            format,
            verbose,
        } => cmd_create(&archive, &files, format, verbose),
        Commands::Extract {
            archive,
            output,
            include,
            exclude,
            preserve,
            progress,
            verbose,
        } => cmd_extract(
            &archive, &output, &include, &exclude, preserve, progress, verbose,
        ),
        Commands::Convert {
            input,
            output,
            format,
            verbose,
        } => cmd_convert(&input, &output, format, verbose),
        Commands::Detect { file } => cmd_detect(&file),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Output format from `--format`, else from the file extension.
fn output_format(path: &Path, format: Option<OutputFormat>) -> Result<ArchiveFormat, String> {
    match format.map(ArchiveFormat::from) {
        Some(format) => Ok(format),
        None => match ArchiveFormat::from_extension(path) {
            ArchiveFormat::Unknown => Err(format!(
                "cannot infer archive format from {}; use --format ar|cpio|tar",
                path.display()
            )),
            format => Ok(format),
        },
    }
}

fn open_archive(
    path: &Path,
) -> Result<(ArchiveFormat, Box<dyn ArchiveReader>), Box<dyn std::error::Error>> {
    let file = File::open(path)?;
    let (format, reader) = ArchiveFormat::open(BufReader::new(file))?;
    log::debug!("{}: {}", path.display(), format);
    Ok((format, reader))
}

fn cmd_list(
    archive: &Path,
    verbose: bool,
    json: bool,
    include: &[String],
    exclude: &[String],
) -> CmdResult {
    let (format, mut reader) = open_archive(archive)?;

    let mut entries = Vec::new();
    while let Some(header) = reader.next_entry()? {
        if matches_filters(&header.name, include, exclude) {
            entries.push(header);
        }
    }

    if json {
        let listing = ArchiveListing {
            archive: archive.display().to_string(),
            format: format.to_string(),
            entries: entries.iter().map(ListingRecord::from).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!("Archive: {} ({})", archive.display(), format);
    println!();
    print_entries(&entries, verbose);

    Ok(())
}

fn cmd_create(
    archive: &Path,
    files: &[PathBuf],
    format: Option<OutputFormat>,
    verbose: bool,
) -> CmdResult {
    if files.is_empty() {
        return Err("No files specified".into());
    }

    let format = output_format(archive, format)?;
    println!("Creating {} archive: {}", format, archive.display());

    let file = File::create(archive)?;
    let mut writer = format.create_writer(BufWriter::new(file))?;

    let mut count = 0u64;
    for path in files {
        count += add_path(writer.as_mut(), format, path, path, verbose)?;
    }
    writer.close()?;

    println!("Added {} entries", count);
    Ok(())
}

/// Archive name of `path` relative to the parent of the root it was given
/// under.
fn archive_name(path: &Path, base: &Path) -> String {
    let parent = base.parent().unwrap_or(base);
    path.strip_prefix(parent)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn add_path(
    writer: &mut dyn ArchiveWriter,
    format: ArchiveFormat,
    path: &Path,
    base: &Path,
    verbose: bool,
) -> Result<u64, Box<dyn std::error::Error>> {
    let metadata = std::fs::symlink_metadata(path)?;
    let name = archive_name(path, base);
    let link_target = if metadata.file_type().is_symlink() {
        Some(std::fs::read_link(path)?)
    } else {
        None
    };
    let header = header_from_metadata(&name, &metadata, link_target.as_deref());

    if header.is_dir() {
        let mut count = 0;
        // ar has no directories; only their contents are stored.
        if format != ArchiveFormat::Ar {
            writer.write_header(&header)?;
            if verbose {
                println!("  Added: {}/", name);
            }
            count += 1;
        }

        let mut children = std::fs::read_dir(path)?.collect::<Result<Vec<_>, _>>()?;
        children.sort_by_key(|entry| entry.file_name());
        for child in children {
            count += add_path(writer, format, &child.path(), base, verbose)?;
        }
        return Ok(count);
    }

    writer.write_header(&header)?;
    if header.is_file() {
        let mut source = File::open(path)?;
        let copied = copy_to_entry(writer, &mut source)?;
        if verbose {
            println!("  Added: {} ({} bytes)", name, copied);
        }
    } else if verbose {
        println!("  Added: {}", header);
    }
    Ok(1)
}

fn cmd_extract(
    archive: &Path,
    output: &Path,
    include: &[String],
    exclude: &[String],
    preserve: bool,
    progress: bool,
    verbose: bool,
) -> CmdResult {
    let file = File::open(archive)?;
    let pb = create_progress_bar(file.metadata()?.len(), progress);
    let (format, mut reader) = ArchiveFormat::open(BufReader::new(pb.wrap_read(file)))?;

    println!(
        "Extracting {} ({}) to {}",
        archive.display(),
        format,
        output.display()
    );

    let mut extracted = 0u64;
    let mut skipped = 0u64;
    while let Some(header) = reader.next_entry()? {
        if !matches_filters(&header.name, include, exclude) {
            continue;
        }
        if let Err(e) = header.validate_path() {
            pb.println(format!("  Skipped: {}", e));
            skipped += 1;
            continue;
        }

        let target = output.join(header.sanitized_name());
        if extract_entry(reader.as_mut(), &header, &target, preserve)? {
            if verbose {
                pb.println(format!("  Extracted: {}", header));
            }
            extracted += 1;
        } else {
            skipped += 1;
        }
    }
    pb.finish_with_message("Done");

    println!("Extracted {} entries ({} skipped)", extracted, skipped);
    Ok(())
}

/// Write one entry to `target`. Returns `false` for entries that cannot be
/// materialized on this platform.
fn extract_entry(
    reader: &mut dyn ArchiveReader,
    header: &Header,
    target: &Path,
    preserve: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }

    match header.entry_type {
        EntryType::Directory => {
            std::fs::create_dir_all(target)?;
        }
        EntryType::File | EntryType::Hardlink if header.linkname.is_empty() => {
            let mut file = BufWriter::new(File::create(target)?);
            copy_from_entry(reader, &mut file)?;
            file.flush()?;
        }
        EntryType::Symlink if header.linkname.is_empty() => {
            log::warn!("skipping symlink {} with an empty target", header.name);
            return Ok(false);
        }
        EntryType::Symlink => return make_symlink(&header.linkname, target),
        _ => {
            log::warn!(
                "skipping {} ({:?} entries are not extracted)",
                header.name,
                header.entry_type
            );
            return Ok(false);
        }
    }

    if preserve {
        restore_metadata(header, target)?;
    }
    Ok(true)
}

#[cfg(unix)]
fn make_symlink(link: &str, target: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    if target.symlink_metadata().is_ok() {
        std::fs::remove_file(target)?;
    }
    std::os::unix::fs::symlink(link, target)?;
    Ok(true)
}

#[cfg(not(unix))]
fn make_symlink(link: &str, target: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    log::warn!("skipping symlink {} -> {}", target.display(), link);
    Ok(false)
}

fn restore_metadata(header: &Header, target: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(target, std::fs::Permissions::from_mode(header.mode))?;
    }

    let mtime = filetime::FileTime::from_system_time(header.modified());
    filetime::set_file_mtime(target, mtime)
}

fn cmd_convert(
    input: &Path,
    output: &Path,
    format: Option<OutputFormat>,
    verbose: bool,
) -> CmdResult {
    let output_format = output_format(output, format)?;
    let (input_format, mut reader) = open_archive(input)?;

    println!(
        "Converting {} ({}) to {} ({})",
        input.display(),
        input_format,
        output.display(),
        output_format
    );

    let file = File::create(output)?;
    let mut writer = output_format.create_writer(BufWriter::new(file))?;
    let count = convert(&mut reader, &mut writer)?;
    writer.close()?;

    if verbose {
        println!("  Converted {} entries", count);
    }
    Ok(())
}

fn cmd_detect(file: &Path) -> CmdResult {
    let f = File::open(file)?;
    let mut reader = BufReader::new(f);

    let (format, magic) = ArchiveFormat::detect(&mut reader)?;

    println!("File: {}", file.display());
    println!("Format: {}", format);
    if format != ArchiveFormat::Unknown {
        println!("Extension: .{}", format.extension());
    }
    println!("MIME type: {}", format.mime_type());
    println!("Magic bytes: {:02X?}", &magic[..magic.len().min(16)]);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format() {
        assert_eq!(
            output_format(Path::new("out.tar"), None).unwrap(),
            ArchiveFormat::Tar
        );
        assert_eq!(
            output_format(Path::new("initrd.img"), Some(OutputFormat::Cpio)).unwrap(),
            ArchiveFormat::Cpio
        );
        assert!(output_format(Path::new("initrd.img"), None).is_err());
    }

    #[test]
    fn test_archive_name() {
        assert_eq!(
            archive_name(Path::new("src/lib.rs"), Path::new("src")),
            "src/lib.rs"
        );
        assert_eq!(
            archive_name(Path::new("/tmp/x/src/a/b.rs"), Path::new("/tmp/x/src")),
            "src/a/b.rs"
        );
        assert_eq!(archive_name(Path::new("README"), Path::new("README")), "README");
    }

    #[test]
    fn test_create_then_extract_tree() {
        let root = std::env::temp_dir().join(format!("oxitape-cli-{}", std::process::id()));
        let tree = root.join("tree");
        std::fs::create_dir_all(tree.join("sub")).unwrap();
        std::fs::write(tree.join("a.txt"), b"alpha").unwrap();
        std::fs::write(tree.join("sub/b.txt"), b"bravo!").unwrap();

        let archive = root.join("tree.cpio");
        cmd_create(&archive, std::slice::from_ref(&tree), None, false).unwrap();

        let out = root.join("out");
        cmd_extract(&archive, &out, &[], &[], true, false, false).unwrap();
        assert_eq!(std::fs::read(out.join("tree/a.txt")).unwrap(), b"alpha");
        assert_eq!(std::fs::read(out.join("tree/sub/b.txt")).unwrap(), b"bravo!");

        let converted = root.join("tree.tar");
        cmd_convert(&archive, &converted, None, false).unwrap();
        let (format, mut reader) = open_archive(&converted).unwrap();
        assert_eq!(format, ArchiveFormat::Tar);
        let mut names = Vec::new();
        while let Some(header) = reader.next_entry().unwrap() {
            names.push(header.name);
        }
        assert_eq!(names, ["tree", "tree/a.txt", "tree/sub", "tree/sub/b.txt"]);

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_through_cpio() {
        let root = std::env::temp_dir().join(format!("oxitape-link-{}", std::process::id()));
        let tree = root.join("bin");
        std::fs::create_dir_all(&tree).unwrap();
        std::fs::write(tree.join("busybox"), b"elf").unwrap();
        std::os::unix::fs::symlink("busybox", tree.join("sh")).unwrap();

        let archive = root.join("bin.cpio");
        cmd_create(&archive, std::slice::from_ref(&tree), None, false).unwrap();

        let out = root.join("out");
        cmd_extract(&archive, &out, &[], &[], false, false, false).unwrap();
        assert_eq!(
            std::fs::read_link(out.join("bin/sh")).unwrap(),
            Path::new("busybox")
        );
        assert_eq!(std::fs::read(out.join("bin/sh")).unwrap(), b"elf");

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_extract_skips_unsafe_paths() {
        let root = std::env::temp_dir().join(format!("oxitape-unsafe-{}", std::process::id()));
        std::fs::create_dir_all(&root).unwrap();
        let archive = root.join("evil.tar");
        {
            let mut writer = ArchiveFormat::Tar
                .create_writer(File::create(&archive).unwrap())
                .unwrap();
            writer
                .append(&Header::file("../escape.txt", 4), b"evil")
                .unwrap();
            writer.append(&Header::file("ok.txt", 2), b"ok").unwrap();
            writer.close().unwrap();
        }

        let out = root.join("out");
        cmd_extract(&archive, &out, &[], &[], false, false, false).unwrap();
        assert!(!root.join("escape.txt").exists());
        assert_eq!(std::fs::read(out.join("ok.txt")).unwrap(), b"ok");

        std::fs::remove_dir_all(&root).unwrap();
    }
}
