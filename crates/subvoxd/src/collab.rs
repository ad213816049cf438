//! Boundaries to the external engines
//!
//! Capture, recognition, translation and audio are black boxes; the pipeline
//! only sees these traits.

use async_trait::async_trait;

use crate::error::Result;
use crate::frame::Frame;
use crate::speech::{PlaybackNotifier, Utterance};

/// Source of captured frames
pub trait FrameSource: Send {
    /// Latest frame not yet returned, without blocking
    ///
    /// `Ok(None)` means nothing new since the last call. An error means the
    /// source is gone for good.
    fn acquire_latest_frame(&mut self) -> Result<Option<Frame>>;

    /// Release capture resources; called once when the loop stops
    fn release(&mut self);
}

/// Text recognition over a subtitle region
#[async_trait]
pub trait Recognizer: Send + Sync {
    /// Recognized text, empty if none
    async fn recognize(&self, region: &Frame) -> Result<String>;
}

/// Machine translation with fixed source and target languages
#[async_trait]
pub trait Translator: Send + Sync {
    /// Make the engine ready (model download, warm-up)
    async fn prepare(&self) -> Result<()> {
        Ok(())
    }

    /// Translate `text`
    async fn translate(&self, text: &str) -> Result<String>;
}

/// Audio output
///
/// `play` must not block. The device calls [`PlaybackNotifier::finished`]
/// once playback ends, whether it succeeded, failed or was stopped.
pub trait SpeechDevice: Send + 'static {
    /// Start rendering `utterance`
    fn play(&mut self, utterance: &Utterance, done: PlaybackNotifier);

    /// Halt whatever is rendering
    fn stop_playback(&mut self);
}

/// Receives finished translations for display
pub trait ResultSink: Send + Sync {
    /// Fire-and-forget
    fn translation(&self, original: &str, translated: &str);
}

/// Receives human-readable pipeline errors
pub trait ErrorSink: Send + Sync {
    /// Fire-and-forget
    fn error(&self, message: &str);
}
