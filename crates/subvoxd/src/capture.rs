//! Capture loop: frame -> region -> text -> novelty -> cache/translate -> speech
//!
//! One task drives a fixed-period ticker. Recognition runs inline with the
//! tick; translation is spawned so the tick never waits for it. Stopping the
//! loop cancels the ticker, abandons in-flight recognition and discards any
//! translation that finishes afterwards.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use subvoxcache::TranslationCache;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::collab::{ErrorSink, FrameSource, Recognizer, ResultSink, Translator};
use crate::error::{Error, Result};
use crate::frame::{Frame, DEFAULT_REGION_FRACTION};
use crate::novelty::NoveltyFilter;
use crate::speech::SpeechHandle;

/// Default tick period
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(200);

/// How a tick ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Recognizer found no text
    Blank,
    /// Same text as the previous accepted tick
    Repeated,
    /// Translation served from cache and queued for speech
    CacheHit,
    /// Cache miss, translation running in the background
    Translating,
    /// A stage failed; reported to the error sink
    Failed,
}

/// The components one tick runs through, built once at startup
pub struct Pipeline {
    cache: Arc<TranslationCache>,
    speech: SpeechHandle,
    recognizer: Arc<dyn Recognizer>,
    translator: Arc<dyn Translator>,
    results: Arc<dyn ResultSink>,
    errors: Arc<dyn ErrorSink>,
    region_fraction: f32,
}

impl Pipeline {
    /// Wire the pipeline together
    pub fn new(
        cache: Arc<TranslationCache>,
        speech: SpeechHandle,
        recognizer: Arc<dyn Recognizer>,
        translator: Arc<dyn Translator>,
        results: Arc<dyn ResultSink>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        Self {
            cache,
            speech,
            recognizer,
            translator,
            results,
            errors,
            region_fraction: DEFAULT_REGION_FRACTION,
        }
    }

    /// Crop the bottom `fraction` of each frame instead of a quarter
    pub fn with_region_fraction(mut self, fraction: f32) -> Self {
        self.region_fraction = fraction;
        self
    }

    /// Run one frame through every stage
    ///
    /// Translation of a cache miss is spawned; its result is dropped if
    /// `cancel` fires before it arrives.
    pub async fn process_frame(
        self: &Arc<Self>,
        frame: &Frame,
        novelty: &mut NoveltyFilter,
        cancel: &CancellationToken,
    ) -> TickOutcome {
        let region = match frame.crop_bottom(self.region_fraction) {
            Ok(region) => region,
            Err(e) => return self.fail(e),
        };

        let text = match self.recognizer.recognize(&region).await {
            Ok(text) => text,
            Err(e) => return self.fail(e),
        };

        if text.trim().is_empty() {
            return TickOutcome::Blank;
        }

        if !novelty.is_new(&text) {
            return TickOutcome::Repeated;
        }

        if let Some(translated) = self.cache.lookup(&text) {
            debug!("Cache hit for {:?}", text);
            self.deliver(&text, &translated);
            return TickOutcome::CacheHit;
        }

        self.spawn_translation(text, cancel.clone());
        TickOutcome::Translating
    }

    fn spawn_translation(self: &Arc<Self>, text: String, cancel: CancellationToken) {
        let this = Arc::clone(self);

        tokio::spawn(async move {
            let result = tokio::select! {
                _ = cancel.cancelled() => return,
                result = this.translator.translate(&text) => result,
            };

            if cancel.is_cancelled() {
                debug!("Discarding translation of {:?} after stop", text);
                return;
            }

            match result {
                Ok(translated) if translated.trim().is_empty() => {
                    debug!("Translator returned nothing for {:?}", text);
                }
                Ok(translated) => {
                    this.cache.store(&text, &translated);
                    this.deliver(&text, &translated);
                }
                Err(e) => {
                    this.fail(e);
                }
            }
        });
    }

    fn deliver(&self, original: &str, translated: &str) {
        self.speech.enqueue(translated);
        self.results.translation(original, translated);
    }

    fn fail(&self, err: Error) -> TickOutcome {
        let message = err.to_string();
        warn!("{}", message);
        self.errors.error(&message);
        TickOutcome::Failed
    }
}

/// Fixed-period driver over a [`Pipeline`]
pub struct CaptureLoop {
    pipeline: Arc<Pipeline>,
    period: Duration,
    running: Arc<AtomicBool>,
    cancel: Option<CancellationToken>,
    task: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    /// Create a stopped loop
    pub fn new(pipeline: Arc<Pipeline>, period: Duration) -> Self {
        Self {
            pipeline,
            period,
            running: Arc::new(AtomicBool::new(false)),
            cancel: None,
            task: None,
        }
    }

    /// Start ticking over `source`
    ///
    /// The source is released when the loop stops, either through
    /// [`CaptureLoop::stop`] or because the source failed.
    pub fn start(&mut self, source: Box<dyn FrameSource>) -> Result<()> {
        if self.is_running() {
            return Err(Error::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        self.running.store(true, Ordering::SeqCst);

        let task = tokio::spawn(run_loop(
            Arc::clone(&self.pipeline),
            source,
            self.period,
            cancel.clone(),
            Arc::clone(&self.running),
        ));

        self.cancel = Some(cancel);
        self.task = Some(task);
        info!("Capture loop started, period {:?}", self.period);
        Ok(())
    }

    /// Stop ticking; returns once the frame source has been released
    pub async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!("Capture loop task failed: {}", e);
            }
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check whether the loop is ticking
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}

async fn run_loop(
    pipeline: Arc<Pipeline>,
    mut source: Box<dyn FrameSource>,
    period: Duration,
    cancel: CancellationToken,
    running: Arc<AtomicBool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // Each run starts from an empty filter
    let mut novelty = NoveltyFilter::new();
    let mut ticks = 0u64;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let frame = match source.acquire_latest_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => continue,
            Err(e) => {
                error!("{}", e);
                pipeline.errors.error(&e.to_string());
                break;
            }
        };

        ticks += 1;
        tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = pipeline.process_frame(&frame, &mut novelty, &cancel) => {
                debug!("Tick {}: {:?}", ticks, outcome);
            }
        }
    }

    // Late translations from this run are discarded
    cancel.cancel();
    source.release();
    running.store(false, Ordering::SeqCst);
    info!("Capture loop stopped after {} frames", ticks);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::{self, PlaybackNotifier, SpeechConfig, Utterance};
    use crate::collab::SpeechDevice;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use subvoxcache::EvictionPolicy;
    use subvoxdb::TranslationDb;

    #[derive(Default)]
    struct Recorded {
        results: Mutex<Vec<(String, String)>>,
        errors: Mutex<Vec<String>>,
    }

    impl ResultSink for Recorded {
        fn translation(&self, original: &str, translated: &str) {
            self.results.lock().push((original.to_string(), translated.to_string()));
        }
    }

    impl ErrorSink for Recorded {
        fn error(&self, message: &str) {
            self.errors.lock().push(message.to_string());
        }
    }

    /// Returns scripted texts in order, then blanks
    struct ScriptedRecognizer {
        script: Mutex<VecDeque<Result<String>>>,
    }

    impl ScriptedRecognizer {
        fn new(script: Vec<Result<String>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
            }
        }
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn recognize(&self, _region: &Frame) -> Result<String> {
            self.script.lock().pop_front().unwrap_or_else(|| Ok(String::new()))
        }
    }

    /// Uppercases after `delay`; fails on "fail"
    struct FakeTranslator {
        delay: Duration,
        calls: Mutex<Vec<String>>,
    }

    impl FakeTranslator {
        fn new(delay: Duration) -> Self {
            Self {
                delay,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Translator for FakeTranslator {
        async fn translate(&self, text: &str) -> Result<String> {
            self.calls.lock().push(text.to_string());
            tokio::time::sleep(self.delay).await;
            if text == "fail" {
                return Err(Error::Translate("model not ready".to_string()));
            }
            Ok(text.to_uppercase())
        }
    }

    #[derive(Clone, Default)]
    struct SilentDevice {
        played: Arc<Mutex<Vec<String>>>,
    }

    impl SpeechDevice for SilentDevice {
        fn play(&mut self, utterance: &Utterance, done: PlaybackNotifier) {
            self.played.lock().push(utterance.text.clone());
            done.finished();
        }

        fn stop_playback(&mut self) {}
    }

    /// Hands out queued frames, then nothing, then optionally fails
    struct QueuedSource {
        frames: VecDeque<Frame>,
        fail_when_empty: bool,
        released: Arc<AtomicBool>,
    }

    impl FrameSource for QueuedSource {
        fn acquire_latest_frame(&mut self) -> Result<Option<Frame>> {
            match self.frames.pop_front() {
                Some(frame) => Ok(Some(frame)),
                None if self.fail_when_empty => Err(Error::CaptureLost("display went away".to_string())),
                None => Ok(None),
            }
        }

        fn release(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        sinks: Arc<Recorded>,
        translator: Arc<FakeTranslator>,
        device: SilentDevice,
        cache: Arc<TranslationCache>,
    }

    fn harness(script: Vec<Result<String>>, delay: Duration) -> Harness {
        let db = Arc::new(TranslationDb::open_in_memory().unwrap());
        let cache = Arc::new(TranslationCache::with_store(db, EvictionPolicy::default()).unwrap());
        let device = SilentDevice::default();
        let (speech, _task) = speech::spawn(device.clone(), SpeechConfig::default());
        let sinks = Arc::new(Recorded::default());
        let translator = Arc::new(FakeTranslator::new(delay));

        let pipeline = Arc::new(Pipeline::new(
            Arc::clone(&cache),
            speech,
            Arc::new(ScriptedRecognizer::new(script)),
            translator.clone(),
            sinks.clone(),
            sinks.clone(),
        ));

        Harness {
            pipeline,
            sinks,
            translator,
            device,
            cache,
        }
    }

    fn frame() -> Frame {
        Frame::new(4, 8, vec![0; Frame::byte_len(4, 8)]).unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_blank_text_stops_early() {
        let h = harness(vec![Ok("   ".to_string())], Duration::ZERO);
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        let outcome = h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;

        assert_eq!(outcome, TickOutcome::Blank);
        assert_eq!(novelty.last(), None);
        assert_eq!(h.cache.stats().misses(), 0);
        assert!(h.translator.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_miss_translates_and_caches() {
        let h = harness(vec![Ok("press x".to_string())], Duration::ZERO);
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        let outcome = h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;
        assert_eq!(outcome, TickOutcome::Translating);
        settle().await;

        assert_eq!(h.cache.peek("press x").unwrap().translated_text, "PRESS X");
        assert_eq!(
            *h.sinks.results.lock(),
            vec![("press x".to_string(), "PRESS X".to_string())]
        );
        assert_eq!(*h.device.played.lock(), vec!["PRESS X".to_string()]);
    }

    #[tokio::test]
    async fn test_hit_skips_translator() {
        let h = harness(vec![Ok("Press X".to_string())], Duration::ZERO);
        h.cache.store("Press X", "Нажмите X");
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        let outcome = h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;
        settle().await;

        assert_eq!(outcome, TickOutcome::CacheHit);
        assert!(h.translator.calls.lock().is_empty());
        assert_eq!(h.cache.peek("Press X").unwrap().access_count, 2);
        assert_eq!(*h.device.played.lock(), vec!["Нажмите X".to_string()]);
    }

    #[tokio::test]
    async fn test_repeated_text_filtered() {
        let h = harness(
            vec![Ok("line".to_string()), Ok("line".to_string())],
            Duration::ZERO,
        );
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;
        let second = h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;

        assert_eq!(second, TickOutcome::Repeated);
        settle().await;
        assert_eq!(h.translator.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_recognizer_error_reported() {
        let h = harness(
            vec![Err(Error::Recognize("engine crashed".to_string()))],
            Duration::ZERO,
        );
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        let outcome = h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;

        assert_eq!(outcome, TickOutcome::Failed);
        assert_eq!(h.sinks.errors.lock().len(), 1);
        assert!(h.sinks.errors.lock()[0].contains("engine crashed"));
    }

    #[tokio::test]
    async fn test_crop_failure_reported() {
        let h = harness(vec![Ok("never read".to_string())], Duration::ZERO);
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();
        let tiny = Frame::new(4, 2, vec![0; Frame::byte_len(4, 2)]).unwrap();

        let outcome = h.pipeline.process_frame(&tiny, &mut novelty, &cancel).await;

        assert_eq!(outcome, TickOutcome::Failed);
        assert_eq!(h.sinks.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_translator_failure_not_cached() {
        let h = harness(vec![Ok("fail".to_string())], Duration::ZERO);
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;
        settle().await;

        assert!(h.cache.peek("fail").is_none());
        assert!(h.sinks.results.lock().is_empty());
        assert_eq!(h.sinks.errors.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_translation_after_cancel_discarded() {
        let h = harness(vec![Ok("slow line".to_string())], Duration::from_millis(40));
        let mut novelty = NoveltyFilter::new();
        let cancel = CancellationToken::new();

        h.pipeline.process_frame(&frame(), &mut novelty, &cancel).await;
        cancel.cancel();
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(h.cache.peek("slow line").is_none());
        assert!(h.sinks.results.lock().is_empty());
    }

    #[tokio::test]
    async fn test_loop_runs_and_stops() {
        let h = harness(
            vec![Ok("first".to_string()), Ok("second".to_string())],
            Duration::ZERO,
        );
        let released = Arc::new(AtomicBool::new(false));
        let source = QueuedSource {
            frames: vec![frame(), frame()].into(),
            fail_when_empty: false,
            released: released.clone(),
        };

        let mut capture = CaptureLoop::new(Arc::clone(&h.pipeline), Duration::from_millis(10));
        capture.start(Box::new(source)).unwrap();
        assert!(capture.is_running());
        tokio::time::sleep(Duration::from_millis(100)).await;

        capture.stop().await;

        assert!(!capture.is_running());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(
            *h.sinks.results.lock(),
            vec![
                ("first".to_string(), "FIRST".to_string()),
                ("second".to_string(), "SECOND".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_restart_forgets_last_text() {
        let h = harness(
            vec![Ok("same line".to_string()), Ok("same line".to_string())],
            Duration::ZERO,
        );
        let one_frame = || QueuedSource {
            frames: vec![frame()].into(),
            fail_when_empty: false,
            released: Arc::new(AtomicBool::new(false)),
        };
        let mut capture = CaptureLoop::new(Arc::clone(&h.pipeline), Duration::from_millis(10));

        capture.start(Box::new(one_frame())).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        capture.stop().await;

        capture.start(Box::new(one_frame())).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        capture.stop().await;

        // Second run serves the repeat from cache instead of filtering it
        assert_eq!(h.sinks.results.lock().len(), 2);
        assert_eq!(h.translator.calls.lock().len(), 1);
        assert_eq!(h.cache.peek("same line").unwrap().access_count, 2);
    }

    #[tokio::test]
    async fn test_start_twice_rejected() {
        let h = harness(Vec::new(), Duration::ZERO);
        let mut capture = CaptureLoop::new(Arc::clone(&h.pipeline), Duration::from_millis(10));
        let source = || QueuedSource {
            frames: VecDeque::new(),
            fail_when_empty: false,
            released: Arc::new(AtomicBool::new(false)),
        };

        capture.start(Box::new(source())).unwrap();
        assert!(matches!(capture.start(Box::new(source())), Err(Error::AlreadyRunning)));

        capture.stop().await;
        capture.start(Box::new(source())).unwrap();
        capture.stop().await;
    }

    #[tokio::test]
    async fn test_lost_source_stops_loop() {
        let h = harness(Vec::new(), Duration::ZERO);
        let released = Arc::new(AtomicBool::new(false));
        let source = QueuedSource {
            frames: VecDeque::new(),
            fail_when_empty: true,
            released: released.clone(),
        };

        let mut capture = CaptureLoop::new(Arc::clone(&h.pipeline), Duration::from_millis(10));
        capture.start(Box::new(source)).unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(!capture.is_running());
        assert!(released.load(Ordering::SeqCst));
        assert_eq!(h.sinks.errors.lock().len(), 1);
        assert!(h.sinks.errors.lock()[0].contains("display went away"));

        capture.stop().await;
    }
}
