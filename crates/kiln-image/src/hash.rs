//! SHA-256 content digests.
//!
//! Used to fingerprint build contexts and to check that a recorded layer
//! digest is actually part of a built image.

use std::io::{self, Read, Write};
use std::path::Path;

use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;
use sha2::{Digest, Sha256};

/// Computes the SHA-256 digest of an in-memory buffer.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> LayerDigest {
    LayerDigest::from_digest(&Sha256::digest(data))
}

/// Computes the SHA-256 digest of everything `reader` yields.
///
/// # Errors
///
/// Returns an error if reading fails.
pub fn hash_reader(path: &Path, mut reader: impl Read) -> Result<LayerDigest> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf).map_err(|e| KilnError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(LayerDigest::from_digest(&hasher.finalize()))
}

/// Writer adapter that hashes and counts every byte passed through it.
#[derive(Debug)]
pub struct HashingWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    /// Wraps `inner`.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Returns the inner writer, the digest and the byte count.
    pub fn finish(self) -> (W, LayerDigest, u64) {
        (
            self.inner,
            LayerDigest::from_digest(&self.hasher.finalize()),
            self.written,
        )
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<LayerDigest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let file = std::fs::File::open(path).map_err(|e| KilnError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    hash_reader(path, file)
}

/// Checks that `expected` appears among an image's layer digests.
///
/// # Errors
///
/// Returns `KilnError::BuildExecution` if the digest is missing.
pub fn verify_layer_present(layers: &[LayerDigest], expected: &LayerDigest) -> Result<()> {
    if layers.contains(expected) {
        tracing::debug!(digest = %expected, "base layer present in image");
        Ok(())
    } else {
        Err(KilnError::BuildExecution {
            message: format!(
                "base image layer {expected} is not among the {} layers of the built image",
                layers.len()
            ),
        })
    }
}
