//! The external build interface and its docker CLI implementation.

use std::collections::{BTreeMap, VecDeque};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc;
use std::time::Duration;

use kiln_common::config::KilnSettings;
use kiln_common::error::{KilnError, Result};
use kiln_common::types::LayerDigest;
use serde::Deserialize;

use crate::cancel::CancelToken;
use crate::context::ContextSource;

/// How often a running build polls for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Number of trailing output lines kept for failure messages.
const FAILURE_TAIL_LINES: usize = 40;

/// Everything the engine needs to produce one tagged image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBuild {
    /// Tag applied to the result.
    pub tag: String,
    /// Image the Dockerfile starts from.
    pub base_image: String,
    /// Path of the Dockerfile inside the context.
    pub dockerfile: String,
    /// Build context, streamed to the engine on demand.
    pub context: ContextSource,
    /// Labels attached to the image.
    pub labels: BTreeMap<String, String>,
}

/// What inspection reports about a built image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageInspection {
    /// Layer digests, base first.
    pub layers: Vec<LayerDigest>,
    /// Labels as stored on the image.
    pub labels: BTreeMap<String, String>,
}

impl ImageInspection {
    /// Digest of the top-most layer.
    #[must_use]
    pub fn last_layer(&self) -> Option<&LayerDigest> {
        self.layers.last()
    }
}

/// External build interface.
///
/// Implementors turn a build context into a tagged image and report what
/// they produced. Retries are the implementor's concern.
pub trait BuildEngine: Send + Sync {
    /// Builds and tags an image, streaming output lines to `on_log`.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::BuildExecution` with the build output when the
    /// build fails, or `KilnError::Cancelled` when `cancel` fires.
    fn build(
        &self,
        request: &ImageBuild,
        cancel: &CancelToken,
        on_log: &mut dyn FnMut(&str),
    ) -> Result<()>;

    /// Reports the layers and labels of an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image does not exist or cannot be inspected.
    fn inspect(&self, image: &str) -> Result<ImageInspection>;

    /// Fetches an image so it can be inspected.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be pulled.
    fn pull(&self, image: &str) -> Result<()>;

    /// Deletes an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be removed.
    fn remove(&self, image: &str) -> Result<()>;
}

/// Drives the `docker` command-line client.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: PathBuf,
}

impl DockerCli {
    /// Uses the given docker binary.
    #[must_use]
    pub const fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    /// Uses the configured docker binary, or finds `docker` on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns `KilnError::BuildExecution` if no docker binary is available.
    pub fn locate(settings: &KilnSettings) -> Result<Self> {
        if let Some(binary) = &settings.docker_binary {
            return Ok(Self::new(binary.clone()));
        }
        let binary = which::which("docker").map_err(|_| KilnError::BuildExecution {
            message: "docker not found on PATH; install docker or set KILN_DOCKER".into(),
        })?;
        tracing::debug!(binary = %binary.display(), "using docker");
        Ok(Self::new(binary))
    }

    /// The docker binary in use.
    #[must_use]
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn output(&self, args: &[&str]) -> Result<String> {
        tracing::debug!(args = ?args, "running docker");
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| KilnError::Io {
                path: self.binary.clone(),
                source: e,
            })?;
        if !output.status.success() {
            return Err(KilnError::BuildExecution {
                message: format!(
                    "docker {} failed ({}): {}",
                    args.first().copied().unwrap_or_default(),
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn build_args(request: &ImageBuild) -> Vec<String> {
        let mut args = vec![
            "build".to_string(),
            "--file".to_string(),
            request.dockerfile.clone(),
            "--tag".to_string(),
            request.tag.clone(),
        ];
        for (key, value) in &request.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push("-".to_string());
        args
    }
}

impl BuildEngine for DockerCli {
    fn build(
        &self,
        request: &ImageBuild,
        cancel: &CancelToken,
        on_log: &mut dyn FnMut(&str),
    ) -> Result<()> {
        tracing::info!(tag = %request.tag, base = %request.base_image, "starting docker build");
        let mut child = Command::new(&self.binary)
            .args(Self::build_args(request))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| KilnError::Io {
                path: self.binary.clone(),
                source: e,
            })?;

        let (tx, rx) = mpsc::channel::<String>();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, tx);
        }
        if let Some(stdin) = child.stdin.take() {
            let context = request.context.clone();
            let _ = std::thread::spawn(move || {
                if let Err(e) = context.write_to(stdin) {
                    tracing::debug!(error = %e, "build context not fully written");
                }
            });
        }

        let mut tail = VecDeque::with_capacity(FAILURE_TAIL_LINES);
        let status = wait_streaming(&mut child, &rx, cancel, &mut |line| {
            tracing::info!(target: "kiln::engine", "{line}");
            on_log(line);
            if tail.len() == FAILURE_TAIL_LINES {
                let _ = tail.pop_front();
            }
            tail.push_back(line.to_string());
        })?;

        if status.success() {
            tracing::info!(tag = %request.tag, "docker build finished");
            Ok(())
        } else {
            Err(KilnError::BuildExecution {
                message: format!(
                    "docker build exited with {status}\n{}",
                    Vec::from(tail).join("\n")
                ),
            })
        }
    }

    fn inspect(&self, image: &str) -> Result<ImageInspection> {
        let raw = self.output(&["image", "inspect", "--format", "{{json .}}", image])?;
        parse_inspection(&raw)
    }

    fn pull(&self, image: &str) -> Result<()> {
        tracing::info!(image, "pulling image");
        let _ = self.output(&["pull", "--quiet", image])?;
        Ok(())
    }

    fn remove(&self, image: &str) -> Result<()> {
        tracing::info!(image, "removing image");
        let _ = self.output(&["image", "rm", "--force", image])?;
        Ok(())
    }
}

/// Sends each line read from `reader` to `tx` on a background thread.
fn forward_lines(reader: impl Read + Send + 'static, tx: mpsc::Sender<String>) {
    let _ = std::thread::spawn(move || {
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else { break };
            if tx.send(line).is_err() {
                break;
            }
        }
    });
}

/// Waits for `child`, forwarding output and killing it on cancellation.
fn wait_streaming(
    child: &mut Child,
    rx: &mpsc::Receiver<String>,
    cancel: &CancelToken,
    on_line: &mut dyn FnMut(&str),
) -> Result<ExitStatus> {
    loop {
        if cancel.is_cancelled() {
            tracing::warn!("build cancelled; stopping docker");
            let _ = child.kill();
            let _ = child.wait();
            return Err(KilnError::Cancelled);
        }
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(line) => on_line(&line),
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return child.wait().map_err(|e| KilnError::BuildExecution {
                    message: format!("failed to wait for docker: {e}"),
                });
            }
        }
        let exited = child.try_wait().map_err(|e| KilnError::BuildExecution {
            message: format!("failed to poll docker: {e}"),
        })?;
        if let Some(status) = exited {
            while let Ok(line) = rx.recv_timeout(POLL_INTERVAL) {
                on_line(&line);
            }
            return Ok(status);
        }
    }
}

#[derive(Deserialize)]
struct RawInspection {
    #[serde(rename = "RootFS", default)]
    root_fs: RawRootFs,
    #[serde(rename = "Config", default)]
    config: RawConfig,
}

#[derive(Deserialize, Default)]
struct RawRootFs {
    #[serde(rename = "Layers", default)]
    layers: Vec<String>,
}

#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(rename = "Labels", default)]
    labels: Option<BTreeMap<String, String>>,
}

/// Parses `docker image inspect --format '{{json .}}'` output.
///
/// # Errors
///
/// Returns an error if the JSON or a layer digest is malformed.
pub fn parse_inspection(raw: &str) -> Result<ImageInspection> {
    let raw: RawInspection = serde_json::from_str(raw.trim())?;
    let layers = raw
        .root_fs
        .layers
        .iter()
        .map(|layer| LayerDigest::parse(layer))
        .collect::<Result<Vec<_>>>()?;
    Ok(ImageInspection {
        layers,
        labels: raw.config.labels.unwrap_or_default(),
    })
}
