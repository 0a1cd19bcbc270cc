use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fatlens_core::{Attributes, Descriptor, Geometry, PathComponents, RawEntry, ShortEntry, Volume};
use std::{
    io::{self, Write},
    path::PathBuf,
};
use tracing::{debug, info};

const CHUNK_LEN: usize = 64 * 1024;

#[derive(Debug, Parser)]
#[command(name = "fatlens")]
#[command(about = "Read-only inspection of FAT32 volume images", long_about = None)]
struct Args {
    /// FAT32 volume image to read
    #[arg(long, value_name = "PATH")]
    image: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the decoded volume geometry
    Info,
    /// List the raw entries of a directory
    Ls {
        #[arg(default_value = "/")]
        path: String,
    },
    /// Write a file's contents to stdout
    Cat {
        path: String,
        /// Byte offset to start reading from
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Maximum number of bytes to write
        #[arg(long)]
        length: Option<u64>,
    },
    /// Print the directory entry a path resolves to
    Stat { path: String },
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0} is not a directory")]
    NotADirectory(String),
    #[error("offset {offset} is past the end of {path} ({size} bytes)")]
    OffsetPastEnd { path: String, offset: u64, size: u32 },
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let mut volume = fatlens_image::mount_path(&args.image)
        .await
        .with_context(|| format!("mount {}", args.image.display()))?;
    debug!(image = %args.image.display(), "volume mounted");

    let stdout = io::stdout();
    let mut out = stdout.lock();
    match args.command {
        Command::Info => write_info(&volume, &mut out)?,
        Command::Ls { path } => list(&volume, &path, &mut out)?,
        Command::Cat {
            path,
            offset,
            length,
        } => {
            let written = cat(&mut volume, &path, offset, length, &mut out)?;
            info!(path = %path, written, "cat finished");
        }
        Command::Stat { path } => {
            let entry = volume
                .resolve(&path)
                .with_context(|| format!("resolve {path}"))?;
            writeln!(out, "{}", describe_entry(&entry))?;
        }
    }
    out.flush()?;
    Ok(())
}

fn write_info<I: AsRef<[u8]>>(volume: &Volume<I>, out: &mut impl Write) -> Result<()> {
    let image = volume.image().context("volume is not mounted")?;
    let geometry = volume.geometry().context("volume is not mounted")?;
    writeln!(out, "image bytes:         {}", image.len())?;
    write_geometry(out, geometry)?;
    Ok(())
}

fn write_geometry(out: &mut impl Write, geometry: &Geometry) -> io::Result<()> {
    writeln!(out, "bytes per sector:    {}", geometry.bytes_per_sector())?;
    writeln!(out, "sectors per cluster: {}", geometry.sectors_per_cluster())?;
    writeln!(out, "cluster bytes:       {}", geometry.cluster_bytes())?;
    writeln!(out, "reserved sectors:    {}", geometry.reserved_sectors())?;
    writeln!(out, "fat count:           {}", geometry.fat_count())?;
    writeln!(out, "sectors per fat:     {}", geometry.sectors_per_fat())?;
    writeln!(out, "root cluster:        {}", geometry.root_cluster())?;
    writeln!(out, "first data sector:   {}", geometry.first_data_sector())?;
    writeln!(out, "total sectors:       {}", geometry.total_sectors())?;
    writeln!(out, "data clusters:       {}", geometry.data_clusters())
}

fn list<I: AsRef<[u8]>>(volume: &Volume<I>, path: &str, out: &mut impl Write) -> Result<()> {
    if !PathComponents::parse(path).is_root() {
        let entry = volume
            .resolve(path)
            .with_context(|| format!("resolve {path}"))?;
        if !entry.is_directory() {
            return Err(CliError::NotADirectory(path.to_string()).into());
        }
    }
    let entries = volume.list(path).with_context(|| format!("list {path}"))?;
    for entry in &entries {
        match entry {
            RawEntry::Short(short) => writeln!(out, "{}", describe_entry(short))?,
            RawEntry::Long(fragment) => writeln!(
                out,
                "<lfn>  seq={}{} checksum={:#04x}",
                fragment.sequence(),
                if fragment.is_last() { " last" } else { "" },
                fragment.checksum
            )?,
        }
    }
    Ok(())
}

/// Stream `path` to `out` in fixed-size preads. Returns the number of bytes written.
fn cat<I: AsRef<[u8]>>(
    volume: &mut Volume<I>,
    path: &str,
    offset: u64,
    length: Option<u64>,
    out: &mut impl Write,
) -> Result<u64> {
    let fd = volume.open(path).with_context(|| format!("open {path}"))?;
    let result = copy_out(volume, fd, path, offset, length, out);
    volume.close(fd).with_context(|| format!("close {fd}"))?;
    result
}

fn copy_out<I: AsRef<[u8]>>(
    volume: &Volume<I>,
    fd: Descriptor,
    path: &str,
    offset: u64,
    length: Option<u64>,
    out: &mut impl Write,
) -> Result<u64> {
    let size = volume.stat(fd)?.size();
    if offset > u64::from(size) {
        return Err(CliError::OffsetPastEnd {
            path: path.to_string(),
            offset,
            size,
        }
        .into());
    }
    let limit = length.unwrap_or(u64::MAX);
    let mut buf = vec![0u8; CHUNK_LEN];
    let mut written = 0u64;
    while written < limit {
        let want = (limit - written).min(CHUNK_LEN as u64) as usize;
        let n = volume
            .pread(fd, &mut buf[..want], offset + written)
            .with_context(|| format!("read {path} at {}", offset + written))?;
        if n == 0 {
            break;
        }
        out.write_all(&buf[..n])?;
        written += n as u64;
    }
    Ok(written)
}

fn describe_entry(entry: &ShortEntry) -> String {
    format!(
        "{:<12} {} cluster={:<8} size={}",
        entry.short_name(),
        attribute_flags(entry.attributes()),
        entry.first_cluster(),
        entry.size()
    )
}

/// Fixed-width flag column, e.g. `d-----` for a plain directory.
fn attribute_flags(attributes: Attributes) -> String {
    [
        (Attributes::DIRECTORY, 'd'),
        (Attributes::READ_ONLY, 'r'),
        (Attributes::HIDDEN, 'h'),
        (Attributes::SYSTEM, 's'),
        (Attributes::VOLUME_ID, 'v'),
        (Attributes::ARCHIVE, 'a'),
    ]
    .iter()
    .map(|(flag, c)| if attributes.contains(*flag) { *c } else { '-' })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use fatlens_core::testing::ImageBuilder;

    fn volume() -> Volume<Vec<u8>> {
        let mut builder = ImageBuilder::new();
        let root = builder.root();
        builder.file(root, "HELLO.TXT", b"hello world");
        let big: Vec<u8> = (0..200_000u32).map(|i| i as u8).collect();
        builder.file(root, "BIG.BIN", &big);
        let docs = builder.dir(root, "DOCS");
        builder.file(docs, "NOTE.TXT", b"note");
        Volume::with_image(builder.build()).unwrap()
    }

    #[test]
    fn cat_writes_whole_file_across_chunks() {
        let mut volume = volume();
        let mut out: Vec<u8> = Vec::new();
        let written = cat(&mut volume, "BIG.BIN", 0, None, &mut out).unwrap();
        assert_eq!(written, 200_000);
        assert!(out.iter().enumerate().all(|(i, b)| *b == i as u8));
        assert_eq!(volume.open_count(), 0);
    }

    #[test]
    fn cat_honours_offset_and_length() {
        let mut volume = volume();
        let mut out: Vec<u8> = Vec::new();
        cat(&mut volume, "hello.txt", 6, Some(3), &mut out).unwrap();
        assert_eq!(out, b"wor");
    }

    #[test]
    fn cat_rejects_offset_past_end() {
        let mut volume = volume();
        let err = cat(&mut volume, "HELLO.TXT", 100, None, &mut Vec::<u8>::new()).unwrap_err();
        assert!(err.downcast_ref::<CliError>().is_some());
        assert_eq!(volume.open_count(), 0);
    }

    #[test]
    fn ls_prints_entries() {
        let volume = volume();
        let mut out: Vec<u8> = Vec::new();
        list(&volume, "/DOCS", &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let names: Vec<&str> = text
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .collect();
        assert_eq!(names, [".", "..", "NOTE.TXT"]);
        assert!(text.lines().next().unwrap().contains("d-----"));
    }

    #[test]
    fn ls_on_file_is_rejected() {
        let volume = volume();
        let err = list(&volume, "HELLO.TXT", &mut Vec::<u8>::new()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::NotADirectory(_))
        ));
    }

    #[test]
    fn info_reports_image_and_geometry() {
        let volume = volume();
        let len = volume.image().unwrap().len();
        let mut out: Vec<u8> = Vec::new();
        write_info(&volume, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(&format!("image bytes:         {len}\n")));
        assert!(text.contains("bytes per sector:    512"));
        assert!(text.contains("fat count:           2"));
    }

    #[test]
    fn flags_render_in_fixed_order() {
        assert_eq!(attribute_flags(Attributes::empty()), "------");
        assert_eq!(
            attribute_flags(Attributes::ARCHIVE | Attributes::READ_ONLY),
            "-r---a"
        );
    }
}
