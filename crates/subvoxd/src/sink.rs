//! Console output for translations and errors

use std::io::{self, Write};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{info, warn};

use crate::collab::{ErrorSink, ResultSink};

/// One finished translation as printed in JSON mode
#[derive(Debug, Serialize)]
pub struct TranslationEvent<'a> {
    pub original: &'a str,
    pub translated: &'a str,
    pub timestamp: DateTime<Utc>,
}

/// Writes results to stdout, errors to the log
pub struct ConsoleSink {
    json: bool,
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsoleSink {
    /// Sink on stdout; `json` selects one JSON object per line
    pub fn stdout(json: bool) -> Self {
        Self::with_writer(json, Box::new(io::stdout()))
    }

    /// Sink on any writer
    pub fn with_writer(json: bool, out: Box<dyn Write + Send>) -> Self {
        Self {
            json,
            out: Mutex::new(out),
        }
    }

    fn render(&self, original: &str, translated: &str) -> String {
        if !self.json {
            return format!("{} => {}", original, translated);
        }

        let event = TranslationEvent {
            original,
            translated,
            timestamp: Utc::now(),
        };
        match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode translation event: {}", e);
                format!("{} => {}", original, translated)
            }
        }
    }
}

impl ResultSink for ConsoleSink {
    fn translation(&self, original: &str, translated: &str) {
        let line = self.render(original, translated);
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write translation: {}", e);
        }
        info!("Translated {:?}", original);
    }
}

impl ErrorSink for ConsoleSink {
    fn error(&self, message: &str) {
        warn!("Pipeline error: {}", message);
    }
}
