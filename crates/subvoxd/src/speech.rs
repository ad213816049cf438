//! Speech playback queue
//!
//! [`SpeechQueue`] is the state machine; [`spawn`] runs it as an actor so that
//! enqueue, stop and device completions are applied one at a time, in the
//! order they arrive on the command channel.
//!
//! ```text
//! Idle --enqueue--> Playing --enqueue(long)--> PlayingWithBacklog
//!   ^                 |  ^                           |
//!   +---finished------+  +-------finished------------+
//! enqueue(short) from any state: drop backlog, stop current, play new
//! ```

use std::collections::VecDeque;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::collab::SpeechDevice;

/// Text shorter than this (in characters) pre-empts everything queued
pub const DEFAULT_SHORT_TEXT_THRESHOLD: usize = 20;

/// Pending utterances kept behind the one playing
pub const DEFAULT_MAX_BACKLOG: usize = 8;

/// Queue tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechConfig {
    /// Pre-emption boundary in characters
    pub short_text_threshold: usize,

    /// Oldest pending items are dropped past this length
    pub max_backlog: usize,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            short_text_threshold: DEFAULT_SHORT_TEXT_THRESHOLD,
            max_backlog: DEFAULT_MAX_BACKLOG,
        }
    }
}

/// One spoken request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    /// Unique per queue, increasing
    pub id: u64,

    /// Text to speak
    pub text: String,

    /// When the request was queued
    pub enqueued_at: Instant,
}

/// Observable queue state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Nothing playing, nothing pending
    Idle,
    /// One utterance rendering, nothing pending
    Playing,
    /// One utterance rendering, more pending
    PlayingWithBacklog,
}

/// Messages processed by the speech actor
#[derive(Debug)]
pub enum SpeechCommand {
    /// Queue text for playback
    Enqueue(String),
    /// Drop everything and go idle
    Stop,
    /// Device finished the utterance with this id
    Finished(u64),
    /// Stop and end the actor
    Shutdown,
}

/// Completion callback handed to the device with each utterance
#[derive(Debug, Clone)]
pub struct PlaybackNotifier {
    id: u64,
    tx: mpsc::WeakUnboundedSender<SpeechCommand>,
}

impl PlaybackNotifier {
    /// Id of the utterance this notifier belongs to
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Report that playback ended (success and failure alike)
    pub fn finished(self) {
        // Actor already gone: nothing left to advance
        if let Some(tx) = self.tx.upgrade() {
            let _ = tx.send(SpeechCommand::Finished(self.id));
        }
    }
}

/// Playback scheduler; at most one utterance renders at a time
pub struct SpeechQueue<D> {
    device: D,
    config: SpeechConfig,
    current: Option<Utterance>,
    backlog: VecDeque<Utterance>,
    next_id: u64,
    notify_tx: mpsc::WeakUnboundedSender<SpeechCommand>,
}

impl<D: SpeechDevice> SpeechQueue<D> {
    /// Create an idle queue; completions are posted to `notify_tx`
    ///
    /// The queue only holds a weak sender, so it never keeps its own command
    /// channel open.
    pub fn new(device: D, config: SpeechConfig, notify_tx: mpsc::WeakUnboundedSender<SpeechCommand>) -> Self {
        Self {
            device,
            config,
            current: None,
            backlog: VecDeque::new(),
            next_id: 1,
            notify_tx,
        }
    }

    /// Queue `text`, pre-empting everything if it is short
    ///
    /// # Returns
    /// * `Option<u64>` - Id of the new utterance, `None` for blank text
    pub fn enqueue(&mut self, text: &str) -> Option<u64> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return None;
        }

        if trimmed.chars().count() < self.config.short_text_threshold {
            if !self.backlog.is_empty() {
                debug!("Short line pre-empts {} queued utterances", self.backlog.len());
            }
            self.backlog.clear();
            if let Some(playing) = self.current.take() {
                debug!("Short line interrupts utterance {}", playing.id);
                self.device.stop_playback();
            }
        }

        let id = self.next_id;
        self.next_id += 1;
        self.backlog.push_back(Utterance {
            id,
            text: text.to_string(),
            enqueued_at: Instant::now(),
        });

        while self.backlog.len() > self.config.max_backlog.max(1) {
            if let Some(dropped) = self.backlog.pop_front() {
                debug!("Backlog full, dropping utterance {}", dropped.id);
            }
        }

        if self.current.is_none() {
            self.start_next();
        }

        Some(id)
    }

    /// Device reported the end of utterance `id`
    ///
    /// # Returns
    /// * `bool` - false if `id` is not the utterance playing (stale report)
    pub fn on_playback_finished(&mut self, id: u64) -> bool {
        match &self.current {
            Some(playing) if playing.id == id => {
                self.current = None;
                self.start_next();
                true
            }
            _ => {
                debug!("Ignoring stale completion for utterance {}", id);
                false
            }
        }
    }

    /// Clear the backlog and halt playback
    pub fn stop(&mut self) {
        self.backlog.clear();
        if self.current.take().is_some() {
            self.device.stop_playback();
        }
    }

    fn start_next(&mut self) {
        if let Some(next) = self.backlog.pop_front() {
            let notifier = PlaybackNotifier {
                id: next.id,
                tx: self.notify_tx.clone(),
            };
            debug!("Speaking utterance {} ({} chars)", next.id, next.text.chars().count());
            self.device.play(&next, notifier);
            self.current = Some(next);
        }
    }

    /// Current state
    pub fn state(&self) -> QueueState {
        match (&self.current, self.backlog.is_empty()) {
            (None, _) => QueueState::Idle,
            (Some(_), true) => QueueState::Playing,
            (Some(_), false) => QueueState::PlayingWithBacklog,
        }
    }

    /// Utterance rendering now
    pub fn current(&self) -> Option<&Utterance> {
        self.current.as_ref()
    }

    /// Number of pending utterances behind the current one
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Apply one actor command; false once the actor should exit
    fn apply(&mut self, command: SpeechCommand) -> bool {
        match command {
            SpeechCommand::Enqueue(text) => {
                self.enqueue(&text);
            }
            SpeechCommand::Stop => self.stop(),
            SpeechCommand::Finished(id) => {
                self.on_playback_finished(id);
            }
            SpeechCommand::Shutdown => {
                self.stop();
                return false;
            }
        }
        true
    }
}

/// Producer side of the speech actor
#[derive(Debug, Clone)]
pub struct SpeechHandle {
    tx: mpsc::UnboundedSender<SpeechCommand>,
}

impl SpeechHandle {
    /// Queue text; never blocks
    pub fn enqueue(&self, text: impl Into<String>) {
        let _ = self.tx.send(SpeechCommand::Enqueue(text.into()));
    }

    /// Drop everything queued and playing
    pub fn stop(&self) {
        let _ = self.tx.send(SpeechCommand::Stop);
    }

    /// Stop playback and end the actor
    pub fn shutdown(&self) {
        let _ = self.tx.send(SpeechCommand::Shutdown);
    }
}

/// Run a [`SpeechQueue`] over `device` on its own task
///
/// The actor ends on [`SpeechHandle::shutdown`] or once every handle is
/// dropped; either way playback is stopped first.
pub fn spawn<D: SpeechDevice>(device: D, config: SpeechConfig) -> (SpeechHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let queue = SpeechQueue::new(device, config, tx.downgrade());
    let task = tokio::spawn(run(queue, rx));
    (SpeechHandle { tx }, task)
}

async fn run<D: SpeechDevice>(mut queue: SpeechQueue<D>, mut rx: mpsc::UnboundedReceiver<SpeechCommand>) {
    info!("Speech queue started");
    loop {
        match rx.recv().await {
            Some(command) => {
                if !queue.apply(command) {
                    break;
                }
            }
            None => {
                debug!("All speech handles dropped");
                queue.stop();
                break;
            }
        }
    }
    info!("Speech queue stopped");
}
