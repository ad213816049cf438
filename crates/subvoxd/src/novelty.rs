//! Single-slot debounce for recognized subtitle text

/// Remembers only the last accepted text
///
/// This is not a history: a line that comes back after a different one is
/// new again.
#[derive(Debug, Default)]
pub struct NoveltyFilter {
    last: Option<String>,
}

impl NoveltyFilter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `text` unless it equals the remembered value
    pub fn is_new(&mut self, text: &str) -> bool {
        if self.last.as_deref().unwrap_or("") == text {
            return false;
        }
        self.last = Some(text.to_string());
        true
    }

    /// Last accepted text
    pub fn last(&self) -> Option<&str> {
        self.last.as_deref()
    }
}
