//! Background scans for callers that own a UI or event loop.
//!
//! The scan runs on its own OS thread and reports back over a channel; the
//! owning thread drains updates with [`BackgroundScan::poll_updates`] and is
//! never blocked by analysis work.

use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::error::Result;
use crate::scanner::{ScanEngine, ScanEvent, ScanStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanMode {
    /// Sync the library and drain all pending work.
    Full,
    /// Process a single batch.
    OneBatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskState {
    Running,
    Completed,
    Cancelled,
    Failed(String),
}

pub struct BackgroundScan {
    engine: Arc<ScanEngine>,
    receiver: mpsc::Receiver<ScanEvent>,
    handle: Option<JoinHandle<()>>,
    state: TaskState,
    progress: Option<ScanStatus>,
    cancel_requested: bool,
    started_at: Instant,
}

impl BackgroundScan {
    pub fn spawn(engine: Arc<ScanEngine>, mode: ScanMode) -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let worker = Arc::clone(&engine);

        let handle = thread::Builder::new()
            .name("photosift-scan".into())
            .spawn(move || {
                // Failures reach the owner as ScanEvent::Failed.
                let _ = match mode {
                    ScanMode::Full => worker.start(Some(&tx)),
                    ScanMode::OneBatch => worker.resume_once(Some(&tx)),
                };
            })?;

        Ok(Self {
            engine,
            receiver: rx,
            handle: Some(handle),
            state: TaskState::Running,
            progress: None,
            cancel_requested: false,
            started_at: Instant::now(),
        })
    }

    /// Request a cooperative stop.
    pub fn cancel(&mut self) {
        self.cancel_requested = true;
        self.engine.stop();
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == TaskState::Running
    }

    /// True once the worker thread has exited. Updates it sent may still be
    /// waiting in the channel.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Latest progress snapshot received.
    pub fn progress(&self) -> Option<ScanStatus> {
        self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Drain pending updates without blocking.
    pub fn poll_updates(&mut self) -> Vec<ScanEvent> {
        let events: Vec<ScanEvent> = self.receiver.try_iter().collect();
        for event in &events {
            self.apply(event);
        }
        events
    }

    fn apply(&mut self, event: &ScanEvent) {
        match event {
            ScanEvent::Progress(status) => self.progress = Some(*status),
            ScanEvent::Completed => {
                self.state = if self.cancel_requested {
                    TaskState::Cancelled
                } else {
                    TaskState::Completed
                };
            }
            ScanEvent::Failed { message } => self.state = TaskState::Failed(message.clone()),
            ScanEvent::AssetScanned { .. } | ScanEvent::BatchComplete { .. } => {}
        }
    }

    /// Block until the worker exits and return its final state along with
    /// every update not yet polled.
    pub fn wait(mut self) -> (TaskState, Vec<ScanEvent>) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Scan worker panicked");
                self.state = TaskState::Failed("scan worker panicked".into());
            }
        }
        let events = self.poll_updates();
        if self.state == TaskState::Running {
            // The engine was busy with another session and returned at once.
            self.state = TaskState::Completed;
        }
        (self.state, events)
    }
}
