//! External programs behind the collaborator traits
//!
//! Every engine is a command line: capture streams raw RGBA frames on stdout,
//! recognition and translation read stdin and answer on stdout, speech reads
//! the text on stdin and exits when done.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::collab::{FrameSource, Recognizer, SpeechDevice, Translator};
use crate::error::{Error, Result};
use crate::frame::Frame;
use crate::speech::{PlaybackNotifier, Utterance};

/// Program plus arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path
    pub program: String,
    /// Arguments passed as-is
    #[serde(default)]
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Command with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args).kill_on_drop(true);
        cmd
    }
}

/// Run `spec` once with `input` on stdin and return trimmed stdout
///
/// The error string is ready to wrap in the caller's error variant.
async fn run_filter(spec: &CommandSpec, input: Vec<u8>, limit: Duration) -> std::result::Result<String, String> {
    let mut child = spec
        .command()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| format!("cannot start {}: {}", spec.program, e))?;

    if let Some(mut stdin) = child.stdin.take() {
        // Written on the side so a chatty child cannot deadlock on a full pipe
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                debug!("Child closed stdin early: {}", e);
            }
        });
    }

    let output = match timeout(limit, child.wait_with_output()).await {
        Ok(output) => output.map_err(|e| format!("{} failed: {}", spec.program, e))?,
        Err(_) => return Err(format!("{} timed out after {:?}", spec.program, limit)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(format!("{} exited with {}: {}", spec.program, output.status, stderr.trim()));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[derive(Default)]
struct LatestFrame {
    frame: Option<Frame>,
    lost: Option<String>,
}

/// Capture command streaming fixed-size RGBA frames on stdout
pub struct CommandFrameSource {
    child: Child,
    reader: JoinHandle<()>,
    latest: Arc<Mutex<LatestFrame>>,
}

impl CommandFrameSource {
    /// Start the capture command; needs a running tokio runtime
    pub fn spawn(spec: &CommandSpec, width: u32, height: u32) -> Result<Self> {
        let mut child = spec
            .command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| Error::CaptureLost(format!("cannot start {}: {}", spec.program, e)))?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::CaptureLost("capture command has no stdout".to_string()))?;

        let latest = Arc::new(Mutex::new(LatestFrame::default()));
        let slot = Arc::clone(&latest);
        let frame_len = Frame::byte_len(width, height);

        let reader = tokio::spawn(async move {
            let mut buf = vec![0u8; frame_len];
            let reason = loop {
                if let Err(e) = stdout.read_exact(&mut buf).await {
                    break format!("capture stream ended: {}", e);
                }
                match Frame::new(width, height, buf.clone()) {
                    Ok(frame) => slot.lock().frame = Some(frame),
                    Err(e) => break e.to_string(),
                }
            };
            slot.lock().lost = Some(reason);
        });

        info!("Capture command {} started ({}x{})", spec.program, width, height);
        Ok(Self { child, reader, latest })
    }
}

impl FrameSource for CommandFrameSource {
    fn acquire_latest_frame(&mut self) -> Result<Option<Frame>> {
        let mut latest = self.latest.lock();
        if let Some(frame) = latest.frame.take() {
            return Ok(Some(frame));
        }
        match &latest.lost {
            Some(reason) => Err(Error::CaptureLost(reason.clone())),
            None => Ok(None),
        }
    }

    fn release(&mut self) {
        self.reader.abort();
        if let Err(e) = self.child.start_kill() {
            debug!("Capture command already gone: {}", e);
        }
        info!("Capture command released");
    }
}

/// OCR command: region as binary PPM on stdin, text on stdout
pub struct CommandRecognizer {
    spec: CommandSpec,
    timeout: Duration,
}

impl CommandRecognizer {
    /// Create a recognizer with a per-call time limit
    pub fn new(spec: CommandSpec, timeout: Duration) -> Self {
        Self { spec, timeout }
    }
}

#[async_trait]
impl Recognizer for CommandRecognizer {
    async fn recognize(&self, region: &Frame) -> Result<String> {
        let ppm = region.to_ppm()?;
        run_filter(&self.spec, ppm, self.timeout)
            .await
            .map_err(Error::Recognize)
    }
}

/// Translation command: text on stdin, translation on stdout
pub struct CommandTranslator {
    spec: CommandSpec,
    prepare: Option<CommandSpec>,
    timeout: Duration,
    error_prefix: Option<String>,
}

impl CommandTranslator {
    /// Create a translator with a per-call time limit
    pub fn new(spec: CommandSpec, timeout: Duration) -> Self {
        Self {
            spec,
            prepare: None,
            timeout,
            error_prefix: None,
        }
    }

    /// Command run once by [`Translator::prepare`]
    pub fn with_prepare(mut self, prepare: Option<CommandSpec>) -> Self {
        self.prepare = prepare;
        self
    }

    /// Output starting with `prefix` is a failure, not a translation
    pub fn with_error_prefix(mut self, prefix: Option<String>) -> Self {
        self.error_prefix = prefix.filter(|p| !p.is_empty());
        self
    }
}

#[async_trait]
impl Translator for CommandTranslator {
    async fn prepare(&self) -> Result<()> {
        let Some(spec) = &self.prepare else {
            return Ok(());
        };
        info!("Preparing translation engine with {}", spec.program);
        run_filter(spec, Vec::new(), self.timeout)
            .await
            .map(|_| ())
            .map_err(Error::Translate)
    }

    async fn translate(&self, text: &str) -> Result<String> {
        let translated = run_filter(&self.spec, text.as_bytes().to_vec(), self.timeout)
            .await
            .map_err(Error::Translate)?;

        if let Some(prefix) = &self.error_prefix {
            if translated.starts_with(prefix.as_str()) {
                return Err(Error::Translate(translated));
            }
        }
        Ok(translated)
    }
}

/// TTS command per utterance, text on stdin
pub struct CommandSpeechDevice {
    spec: CommandSpec,
    cancel: Option<oneshot::Sender<()>>,
}

impl CommandSpeechDevice {
    /// Create a device; each `play` spawns `spec`
    pub fn new(spec: CommandSpec) -> Self {
        Self { spec, cancel: None }
    }
}

impl SpeechDevice for CommandSpeechDevice {
    fn play(&mut self, utterance: &Utterance, done: PlaybackNotifier) {
        let spawned = self
            .spec
            .command()
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                warn!("Cannot start {}: {}", self.spec.program, e);
                done.finished();
                return;
            }
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.cancel = Some(cancel_tx);
        let text = utterance.text.clone();
        let program = self.spec.program.clone();

        tokio::spawn(async move {
            if let Some(mut stdin) = child.stdin.take() {
                if let Err(e) = stdin.write_all(text.as_bytes()).await {
                    debug!("{} closed stdin early: {}", program, e);
                }
            }

            let cancelled = tokio::select! {
                _ = cancel_rx => true,
                status = child.wait() => {
                    match status {
                        Ok(status) if !status.success() => warn!("{} exited with {}", program, status),
                        Err(e) => warn!("{} failed: {}", program, e),
                        Ok(_) => {}
                    }
                    false
                }
            };

            if cancelled {
                if let Err(e) = child.kill().await {
                    debug!("{} already gone: {}", program, e);
                }
            }
            done.finished();
        });
    }

    fn stop_playback(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            let _ = cancel.send(());
        }
    }
}
