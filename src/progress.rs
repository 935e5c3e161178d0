//! Progress reporting between the pipeline and whatever is watching it.
//!
//! The web server hands the pipeline a session record, the CLI hands it a
//! terminal spinner, and tests hand it [`NoopReporter`] or a recorder.

use std::sync::Arc;

/// Capability the pipeline uses to publish progress.
///
/// Only [`report`](ProgressReporter::report) is required. The lifecycle hooks
/// default to doing nothing so simple reporters stay one method long.
pub trait ProgressReporter: Send + Sync {
    /// A human-readable progress line.
    fn report(&self, message: &str);

    /// Latest generated text, for viewers that show a live preview.
    fn output(&self, _text: &str) {}

    /// The pipeline began its first stage.
    fn started(&self) {}

    /// The whole run, including rendering, finished.
    fn completed(&self, _message: &str) {}

    /// The run stopped; `message` names the stage and the cause.
    fn failed(&self, _message: &str) {}
}

/// Reporter that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _message: &str) {}
}

impl<R: ProgressReporter + ?Sized> ProgressReporter for Arc<R> {
    fn report(&self, message: &str) {
        (**self).report(message)
    }

    fn output(&self, text: &str) {
        (**self).output(text)
    }

    fn started(&self) {
        (**self).started()
    }

    fn completed(&self, message: &str) {
        (**self).completed(message)
    }

    fn failed(&self, message: &str) {
        (**self).failed(message)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::ProgressReporter;

    /// Records every call as a tagged line, in order.
    #[derive(Default)]
    pub struct RecordingReporter {
        pub events: Mutex<Vec<String>>,
    }

    impl RecordingReporter {
        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl ProgressReporter for RecordingReporter {
        fn report(&self, message: &str) {
            self.events.lock().unwrap().push(format!("report: {message}"));
        }

        fn started(&self) {
            self.events.lock().unwrap().push("started".to_string());
        }

        fn completed(&self, message: &str) {
            self.events.lock().unwrap().push(format!("completed: {message}"));
        }

        fn failed(&self, message: &str) {
            self.events.lock().unwrap().push(format!("failed: {message}"));
        }
    }
}
