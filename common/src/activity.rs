// Aggregate activity and progress reporting

use std::time::Instant;
use tracing::{debug, info};

/// Handle on a long-running activity shown to the user
pub trait Activity: Send {
    fn start(&mut self);
    fn end(&mut self);
}

/// Progress of a known amount of work
pub trait ProgressBar: Send {
    fn start(&mut self);
    fn set_total(&mut self, total: u64);
    fn tick(&mut self, amount: u64);
    fn done(&mut self);
}

/// Factory for activities and progress bars
pub trait ActivityReporter: Send + Sync {
    /// Activity without a known amount of work
    fn phantom_activity(&self, text: &str) -> Box<dyn Activity>;

    fn create_progress(&self, text: &str) -> Box<dyn ProgressBar>;
}

/// Reporter writing activity transitions to the tracing log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ActivityReporter for TracingReporter {
    fn phantom_activity(&self, text: &str) -> Box<dyn Activity> {
        Box::new(TracingActivity {
            text: text.to_string(),
            started_at: None,
        })
    }

    fn create_progress(&self, text: &str) -> Box<dyn ProgressBar> {
        Box::new(TracingProgress {
            text: text.to_string(),
            current: 0,
            total: 0,
            started_at: None,
        })
    }
}

struct TracingActivity {
    text: String,
    started_at: Option<Instant>,
}

impl Activity for TracingActivity {
    fn start(&mut self) {
        self.started_at = Some(Instant::now());
        info!(activity = %self.text, "Activity started");
    }

    fn end(&mut self) {
        let elapsed = self.started_at.take().map(|s| s.elapsed().as_secs_f64());
        info!(activity = %self.text, elapsed_seconds = elapsed, "Activity finished");
    }
}

struct TracingProgress {
    text: String,
    current: u64,
    total: u64,
    started_at: Option<Instant>,
}

impl ProgressBar for TracingProgress {
    fn start(&mut self) {
        self.started_at = Some(Instant::now());
        info!(activity = %self.text, "Progress started");
    }

    fn set_total(&mut self, total: u64) {
        self.total = total;
    }

    fn tick(&mut self, amount: u64) {
        self.current += amount;
        debug!(
            activity = %self.text,
            current = self.current,
            total = self.total,
            "Progress"
        );
    }

    fn done(&mut self) {
        let elapsed = self.started_at.take().map(|s| s.elapsed().as_secs_f64());
        info!(
            activity = %self.text,
            current = self.current,
            total = self.total,
            elapsed_seconds = elapsed,
            "Progress done"
        );
    }
}
