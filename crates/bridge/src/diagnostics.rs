//! Diagnostics sink injected into each relay session.

/// Minimal logging capability used by the relay engine.
pub trait Diagnostics: Send + Sync {
    fn debug(&self, message: &str);
    fn info(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the `log` facade, prefixing every line with the session label.
#[derive(Debug, Clone)]
pub struct LogDiagnostics {
    label: String,
}

impl LogDiagnostics {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl Diagnostics for LogDiagnostics {
    fn debug(&self, message: &str) {
        log::debug!("[{}] {}", self.label, message);
    }

    fn info(&self, message: &str) {
        log::info!("[{}] {}", self.label, message);
    }

    fn error(&self, message: &str) {
        log::error!("[{}] {}", self.label, message);
    }
}
