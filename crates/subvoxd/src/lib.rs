//! # subvoxd
//!
//! Subtitle capture, translation and speech pipeline.
//!
//! ## Architecture
//! - **CaptureLoop**: fixed-period ticker driving [`capture::Pipeline`]
//! - **NoveltyFilter**: drops text equal to the last accepted line
//! - **SpeechQueue**: actor that plays one utterance at a time
//! - **Collaborators**: capture, OCR, translation and TTS behind traits,
//!   with command-line adapters in [`command`]

pub mod capture;
pub mod collab;
pub mod command;
pub mod config;
pub mod error;
pub mod frame;
pub mod novelty;
pub mod sink;
pub mod speech;

pub use capture::{CaptureLoop, Pipeline, TickOutcome, DEFAULT_PERIOD};
pub use collab::{ErrorSink, FrameSource, Recognizer, ResultSink, SpeechDevice, Translator};
pub use config::Config;
pub use error::{Error, Result};
pub use frame::Frame;
pub use novelty::NoveltyFilter;
pub use speech::{SpeechConfig, SpeechHandle, SpeechQueue};
