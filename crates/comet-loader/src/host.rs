//! Host integration points.
//!
//! Injecting CSS into a real page is the embedding host's job. The loader
//! only decides *what* to inject and *when* to take it back out, and talks
//! to the host through [`StyleSink`].

use std::cell::RefCell;
use std::rc::Rc;

/// Receives userstyle CSS for active addons. One combined stylesheet per
/// addon; `remove` must be idempotent.
pub trait StyleSink {
    fn inject(&mut self, addon_id: &str, css: &str);
    fn remove(&mut self, addon_id: &str);
}

/// Shared handle the loader holds onto; the host keeps its own clone.
pub type SharedSink = Rc<RefCell<dyn StyleSink>>;

/// In-memory sink. The default for tests and headless hosts.
#[derive(Debug, Default)]
pub struct RecordingSink {
    styles: Vec<(String, String)>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Rc<RefCell<RecordingSink>> {
        Rc::new(RefCell::new(Self::new()))
    }

    pub fn css_for(&self, addon_id: &str) -> Option<&str> {
        self.styles
            .iter()
            .find(|(id, _)| id == addon_id)
            .map(|(_, css)| css.as_str())
    }

    pub fn injected_ids(&self) -> Vec<&str> {
        self.styles.iter().map(|(id, _)| id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.styles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.styles.is_empty()
    }
}

impl StyleSink for RecordingSink {
    fn inject(&mut self, addon_id: &str, css: &str) {
        if let Some(entry) = self.styles.iter_mut().find(|(id, _)| id == addon_id) {
            entry.1 = css.to_string();
            return;
        }
        self.styles.push((addon_id.to_string(), css.to_string()));
    }

    fn remove(&mut self, addon_id: &str) {
        self.styles.retain(|(id, _)| id != addon_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_replaces_existing() {
        let mut sink = RecordingSink::new();
        sink.inject("a", "body { color: red; }");
        sink.inject("a", "body { color: blue; }");
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.css_for("a"), Some("body { color: blue; }"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let mut sink = RecordingSink::new();
        sink.inject("a", "x");
        sink.remove("a");
        sink.remove("a");
        assert!(sink.is_empty());
        assert_eq!(sink.css_for("a"), None);
    }
}
