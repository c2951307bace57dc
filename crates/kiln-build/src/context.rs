//! Deterministic build contexts.
//!
//! The context is a gzip-compressed tar archive holding the project files
//! and the generated Dockerfile. Entries are sorted and carry fixed
//! metadata so the same project always yields the same bytes. Archives are
//! streamed straight into their destination and never held in memory.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::write::GzEncoder;
use kiln_common::constants::PROJECT_STATE_DIR;
use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;
use kiln_image::hash::HashingWriter;

use crate::dockerfile::DOCKERFILE_PATH;

/// Top-level names never sent to the build.
const EXCLUDED: &[&str] = &[".git", PROJECT_STATE_DIR];

/// Summary of one streamed build context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// SHA-256 digest of the compressed archive.
    pub digest: LayerDigest,
    /// Size of the compressed archive in bytes.
    pub bytes: u64,
    /// Number of project entries included (the Dockerfile not counted).
    pub files: usize,
}

/// A project directory plus the Dockerfile rendered for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSource {
    project_dir: PathBuf,
    dockerfile: String,
}

impl ContextSource {
    /// Describes the context of `project_dir` built with `dockerfile`.
    pub fn new(project_dir: impl Into<PathBuf>, dockerfile: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            dockerfile: dockerfile.into(),
        }
    }

    /// Project root.
    #[must_use]
    pub fn project_dir(&self) -> &Path {
        &self.project_dir
    }

    /// Streams the archive into `out`.
    ///
    /// # Errors
    ///
    /// Returns an error if the project cannot be walked, a file cannot be
    /// read, or `out` rejects a write.
    pub fn write_to<W: Write>(&self, out: W) -> Result<BuildContext> {
        let root = self.project_dir.as_path();
        let entries = collect_entries(root)?;

        let encoder = GzEncoder::new(HashingWriter::new(out), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        append_entries(&mut builder, root, &entries)?;
        append(
            &mut builder,
            Path::new(DOCKERFILE_PATH),
            self.dockerfile.as_bytes(),
            0o644,
        )?;

        let encoder = builder.into_inner().map_err(|e| io_err(root, e))?;
        let hashing = encoder.finish().map_err(|e| io_err(root, e))?;
        let (mut out, digest, bytes) = hashing.finish();
        out.flush().map_err(|e| io_err(root, e))?;

        tracing::debug!(
            files = entries.len(),
            bytes,
            digest = %digest,
            "build context written"
        );
        Ok(BuildContext {
            digest,
            bytes,
            files: entries.len(),
        })
    }
}

/// Digest of the project sources alone, independent of the Dockerfile.
///
/// # Errors
///
/// Returns an error if the project cannot be walked or a file cannot be read.
pub fn source_digest(project_dir: &Path) -> Result<LayerDigest> {
    let entries = collect_entries(project_dir)?;
    let mut builder = tar::Builder::new(HashingWriter::new(std::io::sink()));
    append_entries(&mut builder, project_dir, &entries)?;
    let hashing = builder.into_inner().map_err(|e| io_err(project_dir, e))?;
    let (_, digest, _) = hashing.finish();
    Ok(digest)
}

/// Computes the digest and size of the context without storing it.
///
/// # Errors
///
/// Returns an error if the project cannot be walked or a file cannot be read.
pub fn measure(source: &ContextSource) -> Result<BuildContext> {
    let context = source.write_to(std::io::sink())?;
    tracing::info!(
        files = context.files,
        bytes = context.bytes,
        digest = %context.digest,
        "build context measured"
    );
    Ok(context)
}

fn append_entries<W: Write>(builder: &mut tar::Builder<W>, root: &Path, entries: &[Entry]) -> Result<()> {
    for entry in entries {
        let path = root.join(&entry.path);
        match &entry.kind {
            EntryKind::File => {
                let data = fs::read(&path).map_err(|e| io_err(&path, e))?;
                let mode = if is_executable(&path) { 0o755 } else { 0o644 };
                append(builder, &entry.path, &data, mode)?;
            }
            EntryKind::Symlink(target) => append_symlink(builder, &entry.path, target)?,
        }
    }
    Ok(())
}

fn append<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &Path,
    data: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = fixed_header(tar::EntryType::Regular, mode);
    header.set_size(data.len() as u64);
    builder
        .append_data(&mut header, path, data)
        .map_err(|e| io_err(path, e))
}

fn append_symlink<W: Write>(builder: &mut tar::Builder<W>, path: &Path, target: &Path) -> Result<()> {
    let mut header = fixed_header(tar::EntryType::Symlink, 0o777);
    header.set_size(0);
    builder
        .append_link(&mut header, path, target)
        .map_err(|e| io_err(path, e))
}

fn fixed_header(kind: tar::EntryType, mode: u32) -> tar::Header {
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(kind);
    header.set_mode(mode);
    header.set_mtime(0);
    header.set_uid(0);
    header.set_gid(0);
    header
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum EntryKind {
    File,
    /// Link target as stored on disk, never followed.
    Symlink(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Entry {
    path: PathBuf,
    kind: EntryKind,
}

/// Lists files and symlinks below `root`, sorted by relative path.
fn collect_entries(root: &Path) -> Result<Vec<Entry>> {
    let mut entries = Vec::new();
    walk(root, Path::new(""), &mut entries)?;
    entries.sort();
    Ok(entries)
}

fn walk(root: &Path, relative: &Path, entries: &mut Vec<Entry>) -> Result<()> {
    let dir = root.join(relative);
    let listing = fs::read_dir(&dir).map_err(|e| io_err(&dir, e))?;
    for item in listing {
        let item = item.map_err(|e| io_err(&dir, e))?;
        let name = item.file_name();
        if relative.as_os_str().is_empty()
            && EXCLUDED.iter().any(|excluded| name == *excluded)
        {
            continue;
        }
        let child = relative.join(&name);
        let file_type = item.file_type().map_err(|e| io_err(&item.path(), e))?;
        if file_type.is_symlink() {
            let target = fs::read_link(item.path()).map_err(|e| io_err(&item.path(), e))?;
            entries.push(Entry {
                path: child,
                kind: EntryKind::Symlink(target),
            });
        } else if file_type.is_dir() {
            walk(root, &child, entries)?;
        } else if file_type.is_file() {
            entries.push(Entry {
                path: child,
                kind: EntryKind::File,
            });
        } else {
            tracing::warn!(path = %child.display(), "skipping special file in build context");
        }
    }
    Ok(())
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).is_ok_and(|m| m.permissions().mode() & 0o111 != 0)
}

#[cfg(not(unix))]
const fn is_executable(_path: &Path) -> bool {
    false
}

fn io_err(path: &Path, source: std::io::Error) -> KilnError {
    KilnError::Io {
        path: path.to_path_buf(),
        source,
    }
}
