//! Main entry point for the streamzip CLI application.
//!
//! Lists and extracts ZIP archives from the local filesystem or from
//! remote HTTP URLs.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio::io::AsyncWrite;

use streamzip::zip::{FsWriterFactory, WriterFactory, extract_entries};
use streamzip::{
    Cli, Entry, ExtractOptions, HttpRangeReader, LocalFileReader, ReadAt, ZipArchive, logging,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.debug);

    if cli.is_http_url() {
        // Remote ZIP file via HTTP Range requests
        let reader = Arc::new(HttpRangeReader::new(cli.file.clone()).await?);
        let transferred_before = reader.transferred_bytes();

        process_zip(reader.clone(), &cli).await?;

        if !cli.is_quiet() {
            let transferred = reader.transferred_bytes() - transferred_before;
            eprintln!("\nTotal bytes transferred: {}", format_size(transferred));
        }
    } else {
        let reader = Arc::new(LocalFileReader::new(Path::new(&cli.file))?);
        process_zip(reader, &cli).await?;
    }

    Ok(())
}

/// List or extract, depending on the CLI flags.
async fn process_zip<R: ReadAt + 'static>(reader: Arc<R>, cli: &Cli) -> Result<()> {
    let archive = ZipArchive::open_with(reader, cli.open_options()).await?;

    if cli.list || cli.verbose {
        list_files(&archive, cli.verbose);
        return Ok(());
    }

    let selected: Vec<Entry<R>> = archive
        .entries()
        .iter()
        .filter(|e| is_selected(cli, &e.path))
        .cloned()
        .collect();

    if cli.pipe {
        let show_names = selected.iter().filter(|e| !e.is_directory()).count() > 1;
        return pipe_files(&selected, cli, show_names).await;
    }

    let destination = cli.extract_dir.clone().unwrap_or_else(|| ".".to_string());
    let options = ExtractOptions::new(destination)
        .concurrency(cli.concurrency)
        .password(cli.password.clone())
        .unsafe_paths(cli.unsafe_path_policy())
        .overwrite(cli.overwrite)
        .writer(Arc::new(ReportingWriter {
            inner: FsWriterFactory::new(cli.overwrite),
            quiet: cli.is_quiet(),
        }));

    let summary = extract_entries(&selected, &options).await?;

    if !cli.is_quiet() {
        for path in &summary.unsafe_paths {
            eprintln!("Skipping: {} (outside destination)", path);
        }
        if summary.skipped > 0 {
            eprintln!(
                "Skipped {} existing file(s) (use -o to overwrite)",
                summary.skipped
            );
        }
    }

    Ok(())
}

/// Whether `path` passes the positional filters and the `-x` excludes.
fn is_selected(cli: &Cli, path: &str) -> bool {
    if !cli.files.is_empty() {
        let matches = cli.files.iter().any(|f| {
            if has_glob_chars(f) {
                glob_match(f, path)
            } else {
                let basename = Path::new(path)
                    .file_name()
                    .map(|s| s.to_string_lossy())
                    .unwrap_or_default();
                path == f || basename == *f
            }
        });
        if !matches {
            return false;
        }
    }

    !cli
        .exclude
        .iter()
        .any(|x| path.contains(x.as_str()) || glob_match(x, path))
}

/// Announces each file as it is created.
struct ReportingWriter {
    inner: FsWriterFactory,
    quiet: bool,
}

#[async_trait]
impl WriterFactory for ReportingWriter {
    async fn create(&self, path: &Path) -> Result<Option<Box<dyn AsyncWrite + Send + Unpin>>> {
        let writer = self.inner.create(path).await?;
        if writer.is_some() && !self.quiet {
            println!("  extracting: {}", path.display());
        }
        Ok(writer)
    }
}

/// Write entry contents to stdout.
async fn pipe_files<R: ReadAt + 'static>(
    entries: &[Entry<R>],
    cli: &Cli,
    show_names: bool,
) -> Result<()> {
    use tokio::io::AsyncWriteExt;

    let mut stdout = tokio::io::stdout();
    for entry in entries.iter().filter(|e| !e.is_directory()) {
        if show_names {
            stdout
                .write_all(format!("--- {} ---\n", entry.path).as_bytes())
                .await?;
        }
        let mut stream = entry.stream(cli.password.as_deref());
        while let Some(chunk) = stream.next_chunk().await {
            stdout.write_all(&chunk?).await?;
        }
    }
    stdout.flush().await?;
    Ok(())
}

/// Print the archive listing, optionally as a table with sizes and dates.
fn list_files<R: ReadAt + 'static>(archive: &ZipArchive<R>, verbose: bool) {
    if verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  Name",
            "Length", "Size", "Cmpr", "Date", "Time"
        );
        println!("{}", "-".repeat(70));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in archive.entries() {
        if !verbose {
            println!("{}", entry.path);
            continue;
        }

        let dt = entry.last_modified;
        let ratio = compression_ratio(entry.compressed_size, entry.uncompressed_size);
        let marker = if entry.is_encrypted() { "*" } else { "" };

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {}{}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio,
            dt.year,
            dt.month,
            dt.day,
            dt.hour,
            dt.minute,
            entry.path,
            marker
        );

        if !entry.is_directory() {
            total_uncompressed = total_uncompressed.saturating_add(entry.uncompressed_size);
            total_compressed = total_compressed.saturating_add(entry.compressed_size);
            file_count += 1;
        }
    }

    if verbose {
        println!("{}", "-".repeat(70));
        println!(
            "{:>10}  {:>10}  {}  {:>21}  {} files",
            total_uncompressed,
            total_compressed,
            compression_ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
        if !archive.comment().is_empty() {
            println!("{}", archive.comment());
        }
    }
}

/// Space saved, as a right-aligned percentage.
fn compression_ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed > 0 && compressed <= uncompressed {
        format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
    } else {
        "  0%".to_string()
    }
}

/// Check if a pattern contains glob wildcard characters.
fn has_glob_chars(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Glob matching with `*` (any run) and `?` (one character).
fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    // iterative matcher with single-star backtracking
    let (mut p, mut t) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, t));
            p += 1;
        } else if let Some((sp, st)) = star {
            p = sp + 1;
            t = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    pattern[p..].iter().all(|&c| c == '*')
}

/// Format a byte size into a human-readable string.
fn format_size(size: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if size >= GB {
        format!("{:.2} GB", size as f64 / GB as f64)
    } else if size >= MB {
        format!("{:.2} MB", size as f64 / MB as f64)
    } else if size >= KB {
        format!("{:.2} KB", size as f64 / KB as f64)
    } else {
        format!("{} bytes", size)
    }
}
