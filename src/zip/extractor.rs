use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::error::ZipError;
use crate::io::ReadAt;

use super::entry::Entry;

/// What to do with entries whose path would land outside the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnsafePathPolicy {
    /// Leave the entry out, log a warning and carry on.
    #[default]
    Skip,
    /// Refuse the whole extraction before writing anything.
    Fail,
}

/// Where extracted bytes go.
#[async_trait]
pub trait WriterFactory: Send + Sync {
    /// Open a writer for `path`. `None` skips the entry.
    async fn create(&self, path: &Path) -> Result<Option<Box<dyn AsyncWrite + Send + Unpin>>>;
}

/// Writes entries to the local filesystem, creating parent directories.
pub struct FsWriterFactory {
    overwrite: bool,
}

impl FsWriterFactory {
    pub fn new(overwrite: bool) -> Self {
        Self { overwrite }
    }
}

#[async_trait]
impl WriterFactory for FsWriterFactory {
    async fn create(&self, path: &Path) -> Result<Option<Box<dyn AsyncWrite + Send + Unpin>>> {
        if !self.overwrite && fs::try_exists(path).await.unwrap_or(false) {
            debug!(path = %path.display(), "exists, not overwriting");
            return Ok(None);
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let file = fs::File::create(path)
            .await
            .with_context(|| format!("cannot create {}", path.display()))?;
        Ok(Some(Box::new(file)))
    }
}

/// Extraction settings
#[derive(Clone)]
pub struct ExtractOptions {
    pub destination: Option<PathBuf>,
    /// Entries written at once; values below 2 serialize extraction.
    pub concurrency: usize,
    pub password: Option<String>,
    pub unsafe_paths: UnsafePathPolicy,
    /// Replace existing files when using the default filesystem writer.
    pub overwrite: bool,
    pub writer: Option<Arc<dyn WriterFactory>>,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            destination: None,
            concurrency: 1,
            password: None,
            unsafe_paths: UnsafePathPolicy::Skip,
            overwrite: true,
            writer: None,
        }
    }
}

impl ExtractOptions {
    pub fn new(destination: impl Into<PathBuf>) -> Self {
        Self {
            destination: Some(destination.into()),
            ..Self::default()
        }
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn password(mut self, password: Option<String>) -> Self {
        self.password = password;
        self
    }

    pub fn unsafe_paths(mut self, policy: UnsafePathPolicy) -> Self {
        self.unsafe_paths = policy;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn writer(mut self, writer: Arc<dyn WriterFactory>) -> Self {
        self.writer = Some(writer);
        self
    }
}

/// What an extraction run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub extracted: usize,
    pub directories: usize,
    /// Entries left alone because the writer declined them.
    pub skipped: usize,
    /// Entry paths that would have escaped the destination.
    pub unsafe_paths: Vec<String>,
}

enum Outcome {
    Written,
    Skipped,
}

/// Resolve `entry_path` beneath `root` without touching the filesystem.
///
/// Returns `None` if the path climbs above `root`, carries a drive or root
/// component, or names `root` itself.
pub fn safe_join(root: &Path, entry_path: &str) -> Option<PathBuf> {
    let mut out = root.to_path_buf();
    let mut depth = 0usize;

    for part in entry_path.split(['/', '\\']) {
        match part {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    return None;
                }
                out.pop();
                depth -= 1;
            }
            name => {
                if Path::new(name)
                    .components()
                    .any(|c| !matches!(c, Component::Normal(_)))
                {
                    return None;
                }
                out.push(name);
                depth += 1;
            }
        }
    }

    (depth > 0).then_some(out)
}

/// Extract `entries` according to `options`.
///
/// Directory entries are counted but not written; parent directories come
/// from the writer. Fails on the first entry error.
pub async fn extract_entries<R: ReadAt + 'static>(
    entries: &[Entry<R>],
    options: &ExtractOptions,
) -> Result<ExtractSummary> {
    let destination = options.destination.as_ref().ok_or(ZipError::PathMissing)?;
    let root = std::path::absolute(destination)?;

    let mut summary = ExtractSummary::default();
    let mut plan = Vec::new();
    for entry in entries {
        if entry.is_directory() {
            summary.directories += 1;
            continue;
        }
        match safe_join(&root, &entry.path) {
            Some(target) => plan.push((entry.clone(), target)),
            None => match options.unsafe_paths {
                UnsafePathPolicy::Skip => {
                    warn!(path = %entry.path, "skipping entry outside destination");
                    summary.unsafe_paths.push(entry.path.clone());
                }
                UnsafePathPolicy::Fail => {
                    return Err(ZipError::UnsafePath(entry.path.clone()).into());
                }
            },
        }
    }

    let writer: Arc<dyn WriterFactory> = match &options.writer {
        Some(writer) => writer.clone(),
        None => Arc::new(FsWriterFactory::new(options.overwrite)),
    };
    let permits = Arc::new(Semaphore::new(options.concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (entry, target) in plan {
        let permit = permits.clone().acquire_owned().await?;
        let writer = writer.clone();
        let password = options.password.clone();
        tasks.spawn(async move {
            let _permit = permit;
            let path = entry.path.clone();
            extract_one(entry, target, writer, password)
                .await
                .with_context(|| format!("extracting {}", path))
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined?? {
            Outcome::Written => summary.extracted += 1,
            Outcome::Skipped => summary.skipped += 1,
        }
    }

    Ok(summary)
}

async fn extract_one<R: ReadAt + 'static>(
    entry: Entry<R>,
    target: PathBuf,
    writer: Arc<dyn WriterFactory>,
    password: Option<String>,
) -> Result<Outcome> {
    let Some(mut out) = writer.create(&target).await? else {
        return Ok(Outcome::Skipped);
    };

    let mut stream = entry.stream(password.as_deref());
    while let Some(chunk) = stream.next_chunk().await {
        out.write_all(&chunk?).await?;
    }
    out.shutdown().await?;

    debug!(path = %entry.path, target = %target.display(), "extracted");
    Ok(Outcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_paths_resolve_under_root() {
        let root = Path::new("/dest");
        assert_eq!(
            safe_join(root, "a/b/c.txt"),
            Some(PathBuf::from("/dest/a/b/c.txt"))
        );
        assert_eq!(
            safe_join(root, "a/../b.txt"),
            Some(PathBuf::from("/dest/b.txt"))
        );
        assert_eq!(
            safe_join(root, "/etc/passwd"),
            Some(PathBuf::from("/dest/etc/passwd"))
        );
    }

    #[test]
    fn escaping_paths_are_rejected() {
        let root = Path::new("/dest");
        assert_eq!(safe_join(root, "../../evil.txt"), None);
        assert_eq!(safe_join(root, "a/../../evil.txt"), None);
        assert_eq!(safe_join(root, "..\\evil.txt"), None);
        assert_eq!(safe_join(root, "./"), None);
    }
}
