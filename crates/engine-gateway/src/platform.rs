//! Host binding for the real engines.
//!
//! The host exposes an engine as an executable named by
//! `CONTEXTAWARE_FAST_ENGINE` or `CONTEXTAWARE_DEEP_ENGINE`. Each prompt runs
//! the executable once: the input goes to stdin, the content comes back on
//! stdout, and stdout lines are the fragments of a streaming prompt. A host
//! without the variable has no runtime and reports the engine as
//! unsupported.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use contextaware_protocol::{Availability, EngineKind};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, warn};

use crate::engine::{EngineOptions, EngineSession, FragmentStream, InferenceEngine};

/// Marker the runtime leaves next to the executable while its model weights
/// are still missing.
const DOWNLOAD_MARKER_SUFFIX: &str = "needs-download";

pub enum PlatformRuntime {
    Command(PathBuf),
    Unsupported,
}

pub struct PlatformEngine {
    kind: EngineKind,
    runtime: PlatformRuntime,
}

impl PlatformEngine {
    pub fn env_var(kind: EngineKind) -> &'static str {
        match kind {
            EngineKind::Fast => "CONTEXTAWARE_FAST_ENGINE",
            EngineKind::Deep => "CONTEXTAWARE_DEEP_ENGINE",
        }
    }

    /// Looks for the host runtime of `kind`.
    pub fn detect(kind: EngineKind) -> Self {
        let runtime = match std::env::var_os(Self::env_var(kind)) {
            Some(path) if !path.is_empty() => PlatformRuntime::Command(PathBuf::from(path)),
            _ => PlatformRuntime::Unsupported,
        };
        Self { kind, runtime }
    }

    pub fn with_command(kind: EngineKind, program: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            runtime: PlatformRuntime::Command(program.into()),
        }
    }

    pub fn is_available(&self) -> bool {
        !matches!(self.runtime, PlatformRuntime::Unsupported)
    }
}

fn download_marker(program: &Path) -> PathBuf {
    let mut marker = program.as_os_str().to_owned();
    marker.push(".");
    marker.push(DOWNLOAD_MARKER_SUFFIX);
    PathBuf::from(marker)
}

#[async_trait]
impl InferenceEngine for PlatformEngine {
    fn kind(&self) -> EngineKind {
        self.kind
    }

    async fn availability(&self) -> Result<Availability> {
        let PlatformRuntime::Command(program) = &self.runtime else {
            return Ok(Availability::Unsupported);
        };
        if tokio::fs::metadata(program).await.is_err() {
            warn!(target: "engine_gateway", kind = %self.kind, program = %program.display(), "engine runtime missing");
            return Ok(Availability::Unsupported);
        }
        if tokio::fs::metadata(download_marker(program)).await.is_ok() {
            return Ok(Availability::NeedsDownload);
        }
        Ok(Availability::Ready)
    }

    async fn create_session(&self, options: &EngineOptions) -> Result<Box<dyn EngineSession>> {
        match &self.runtime {
            PlatformRuntime::Command(program) => Ok(Box::new(CommandSession {
                kind: self.kind,
                program: program.clone(),
                options: options.clone(),
                destroyed: false,
            })),
            PlatformRuntime::Unsupported => Err(anyhow!(
                "no {} engine runtime available on this host",
                self.kind
            )),
        }
    }
}

struct CommandSession {
    kind: EngineKind,
    program: PathBuf,
    options: EngineOptions,
    destroyed: bool,
}

impl CommandSession {
    fn spawn(&self, input: &str) -> Result<Child> {
        if self.destroyed {
            return Err(anyhow!("prompt on destroyed session"));
        }
        let mut command = Command::new(&self.program);
        command
            .env("CONTEXTAWARE_ENGINE_KIND", self.kind.as_str())
            .env("CONTEXTAWARE_TEMPERATURE", self.options.temperature.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(max_tokens) = self.options.max_tokens {
            command.env("CONTEXTAWARE_MAX_TOKENS", max_tokens.to_string());
        }
        if let Some(system_prompt) = &self.options.system_prompt {
            command.env("CONTEXTAWARE_SYSTEM_PROMPT", system_prompt);
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("failed to start {}", self.program.display()))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("engine stdin unavailable"))?;
        let input = input.to_string();
        tokio::spawn(async move {
            let mut stdin = stdin;
            if let Err(err) = stdin.write_all(input.as_bytes()).await {
                debug!(target: "engine_gateway", error = %err, "engine closed stdin early");
            }
        });
        Ok(child)
    }
}

#[async_trait]
impl EngineSession for CommandSession {
    async fn prompt(&mut self, input: &str) -> Result<String> {
        let child = self.spawn(input)?;
        let output = child
            .wait_with_output()
            .await
            .context("engine process failed")?;
        if !output.status.success() {
            return Err(anyhow!("engine exited with {}", output.status));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn prompt_streaming(&mut self, input: &str) -> Result<FragmentStream> {
        let mut child = self.spawn(input)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("engine stdout unavailable"))?;
        let state = Some((BufReader::new(stdout), child));
        Ok(stream::unfold(state, next_line).boxed())
    }

    fn destroy(&mut self) {
        self.destroyed = true;
    }
}

type LineState = Option<(BufReader<ChildStdout>, Child)>;

async fn next_line(state: LineState) -> Option<(Result<String>, LineState)> {
    let (mut reader, mut child) = state?;
    let mut line = String::new();
    match reader.read_line(&mut line).await {
        Ok(0) => match child.wait().await {
            Ok(status) if status.success() => None,
            Ok(status) => Some((Err(anyhow!("engine exited with {status}")), None)),
            Err(err) => Some((Err(anyhow!(err).context("engine process failed")), None)),
        },
        Ok(_) => Some((Ok(line), Some((reader, child)))),
        Err(err) => Some((Err(anyhow!(err).context("reading engine output failed")), None)),
    }
}
