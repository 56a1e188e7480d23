//! Reporter trait for dependency injection
//!
//! Core operations report progress through this trait so they stay
//! independent of the terminal front end.

/// Progress sink for long-running operations.
pub trait Reporter: Send + Sync {
    /// A new phase has started (e.g. "Updating repos...").
    fn section(&self, title: &str);

    /// An artifact download has started.
    fn downloading(&self, label: &str, version: &str);

    /// An item completed successfully.
    fn done(&self, label: &str, version: &str, detail: &str, size: Option<u64>);

    /// An item failed; the batch continues.
    fn failed(&self, label: &str, version: &str, reason: &str);

    /// Log an informational message.
    fn info(&self, msg: &str);

    /// Log a success message.
    fn success(&self, msg: &str);

    /// Log a warning message.
    fn warning(&self, msg: &str);

    /// Log an error message.
    fn error(&self, msg: &str);

    /// Final "<action> done / total" line of a batch.
    fn summary(&self, done: usize, total: usize, action: &str);
}

impl<T: Reporter + ?Sized> Reporter for std::sync::Arc<T> {
    fn section(&self, title: &str) {
        (**self).section(title);
    }
    fn downloading(&self, label: &str, version: &str) {
        (**self).downloading(label, version);
    }
    fn done(&self, label: &str, version: &str, detail: &str, size: Option<u64>) {
        (**self).done(label, version, detail, size);
    }
    fn failed(&self, label: &str, version: &str, reason: &str) {
        (**self).failed(label, version, reason);
    }
    fn info(&self, msg: &str) {
        (**self).info(msg);
    }
    fn success(&self, msg: &str) {
        (**self).success(msg);
    }
    fn warning(&self, msg: &str) {
        (**self).warning(msg);
    }
    fn error(&self, msg: &str) {
        (**self).error(msg);
    }
    fn summary(&self, done: usize, total: usize, action: &str) {
        (**self).summary(done, total, action);
    }
}

/// A reporter that discards everything (tests, quiet runs).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn section(&self, _title: &str) {}
    fn downloading(&self, _label: &str, _version: &str) {}
    fn done(&self, _label: &str, _version: &str, _detail: &str, _size: Option<u64>) {}
    fn failed(&self, _label: &str, _version: &str, _reason: &str) {}
    fn info(&self, _msg: &str) {}
    fn success(&self, _msg: &str) {}
    fn warning(&self, _msg: &str) {}
    fn error(&self, _msg: &str) {}
    fn summary(&self, _done: usize, _total: usize, _action: &str) {}
}
