use crate::status::{StatusEvent, StatusRecord};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProgressCounts {
    pub steps: usize,
    pub log_lines: usize,
    pub status_updates: usize,
    pub unrecognized: usize,
    pub protocol_errors: usize,
}

/// Renders build status as it arrives, tagged with the service name.
pub struct ProgressTracker {
    service: String,
    start_time: Instant,
    quiet: bool,
    verbose: bool,
    state: Mutex<ProgressCounts>,
}

impl ProgressTracker {
    pub fn new(service: impl Into<String>, quiet: bool, verbose: bool) -> Self {
        Self {
            service: service.into(),
            start_time: Instant::now(),
            quiet,
            verbose,
            state: Mutex::new(ProgressCounts::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressCounts> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn counts(&self) -> ProgressCounts {
        self.state().clone()
    }

    pub fn build_started(&self, image_tag: &str) {
        if !self.quiet {
            info!(service = %self.service, "Building image {}", image_tag);
        }
        debug!(service = %self.service, "Build started");
    }

    /// Log one non-terminal record. Errors and image ids are handled by the caller.
    pub fn record(&self, record: &StatusRecord) {
        let mut state = self.state();
        match record.classify() {
            StatusEvent::Stream(text) => {
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    state.log_lines += 1;
                    if line.starts_with("Step ") {
                        state.steps += 1;
                    }
                    if !self.quiet {
                        info!(service = %self.service, "  {}", line.trim_end());
                    }
                }
            }
            StatusEvent::Status { status, progress } => {
                state.status_updates += 1;
                let id = record.id.as_deref().unwrap_or("");
                match progress {
                    Some(progress) if self.verbose => {
                        info!(service = %self.service, "  {} {} {}", id, status, progress)
                    }
                    Some(_) => debug!(service = %self.service, "  {} {}", id, status),
                    None if !self.quiet => info!(service = %self.service, "  {} {}", id, status),
                    None => debug!(service = %self.service, "  {} {}", id, status),
                }
            }
            StatusEvent::Unrecognized => {
                state.unrecognized += 1;
                warn!(service = %self.service, record = ?record, "Unrecognized status record");
            }
            StatusEvent::Error(_) | StatusEvent::ImageId(_) => {}
        }
    }

    pub fn protocol_error(&self, err: &dyn std::error::Error) {
        self.state().protocol_errors += 1;
        warn!(service = %self.service, "Skipping status record: {}", err);
    }

    pub fn build_completed(&self, image_id: Option<&str>) {
        let duration = self.start_time.elapsed();
        let state = self.state();

        if !self.quiet {
            info!(
                service = %self.service,
                "Build completed in {:.2}s",
                duration.as_secs_f64()
            );
            match image_id {
                Some(id) => info!(service = %self.service, "  Image ID {}", id),
                None => warn!(service = %self.service, "  Build finished without an image ID"),
            }
            info!(
                service = %self.service,
                "  {} steps, {} log lines, {} status updates",
                state.steps,
                state.log_lines,
                state.status_updates
            );
        }

        if state.unrecognized > 0 || state.protocol_errors > 0 {
            warn!(
                service = %self.service,
                unrecognized = state.unrecognized,
                protocol_errors = state.protocol_errors,
                "Build stream contained records that were skipped"
            );
        }

        debug!(service = %self.service, "Build completed in {:?}", duration);
    }

    pub fn build_failed(&self, error: &str) {
        let duration = self.start_time.elapsed();

        error!(
            service = %self.service,
            "Build failed after {:.2}s",
            duration.as_secs_f64()
        );
        error!(service = %self.service, "  Error {}", error);
    }
}
