use anyhow::{Context, Result};
use std::fs::{self, File, Metadata};
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use xxhash_rust::xxh3::{xxh3_64, Xxh3};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync temp data and parent dir (card records)
    Durable,
    /// rename only; for the index and session log
    Fast,
}

#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub durability: DurabilityMode,
    pub idempotent_skip: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            durability: DurabilityMode::Durable,
            idempotent_skip: true,
        }
    }
}

impl WriteOptions {
    pub fn durable() -> Self {
        Self::default()
    }

    pub fn fast() -> Self {
        Self {
            durability: DurabilityMode::Fast,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct WriteStats {
    pub bytes_written: u64,
    pub skipped_unchanged: bool,
}

/// Temp-file + rename writer. A crash mid-write leaves either the old file or
/// the new one, never a truncated record.
pub struct AtomicWriter {
    options: WriteOptions,
}

impl AtomicWriter {
    pub fn new(options: WriteOptions) -> Self {
        Self { options }
    }

    pub fn write_str(&self, path: &Path, content: &str) -> Result<WriteStats> {
        self.write_bytes(path, content.as_bytes())
    }

    pub fn write_bytes(&self, path: &Path, content: &[u8]) -> Result<WriteStats> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let existing = match fs::metadata(path) {
            Ok(meta) => Some(meta),
            Err(err) if err.kind() == ErrorKind::NotFound => None,
            Err(err) => {
                return Err(err).with_context(|| format!("Failed to stat {}", path.display()));
            }
        };

        if self.options.idempotent_skip {
            if let Some(meta) = existing.as_ref() {
                if is_unchanged(path, meta, content)? {
                    return Ok(WriteStats {
                        bytes_written: 0,
                        skipped_unchanged: true,
                    });
                }
            }
        }

        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;

        let mut temp_file = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temp file in {}", parent.display()))?;
        {
            let mut writer = BufWriter::new(temp_file.as_file_mut());
            writer
                .write_all(content)
                .with_context(|| format!("Failed to write temp file for {}", path.display()))?;
            writer.flush().context("Failed to flush temp file")?;
        }

        if self.options.durability == DurabilityMode::Durable {
            temp_file
                .as_file()
                .sync_data()
                .with_context(|| format!("Failed to sync temp data for {}", path.display()))?;
        }

        temp_file.persist(path).map_err(|e| {
            anyhow::Error::new(e.error)
                .context(format!("Failed to atomically replace {}", path.display()))
        })?;

        if self.options.durability == DurabilityMode::Durable {
            fsync_parent_dir(parent)?;
        }

        Ok(WriteStats {
            bytes_written: content.len() as u64,
            skipped_unchanged: false,
        })
    }
}

/// Remove a file, treating "already gone" as `false` rather than an error.
pub fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

fn is_unchanged(path: &Path, metadata: &Metadata, content: &[u8]) -> Result<bool> {
    if metadata.len() != content.len() as u64 {
        return Ok(false);
    }
    Ok(hash_file(path)? == xxh3_64(content))
}

fn hash_file(path: &Path) -> Result<u64> {
    let mut file =
        File::open(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let mut hasher = Xxh3::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.digest())
}

#[cfg(unix)]
fn fsync_parent_dir(parent: &Path) -> Result<()> {
    let dir = File::open(parent)
        .with_context(|| format!("Failed to open parent dir {}", parent.display()))?;
    dir.sync_all()
        .with_context(|| format!("Failed to fsync parent dir {}", parent.display()))?;
    Ok(())
}

#[cfg(not(unix))]
fn fsync_parent_dir(_parent: &Path) -> Result<()> {
    Ok(())
}
