//! Readiness polling against `GET /status`.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::{debug, info, warn};

use crate::client::{event::Event, inference::InferenceApi, telemetry};

/// Delay before re-polling a server that answered "not ready".
pub const NOT_READY_RETRY: Duration = Duration::from_millis(1000);
/// Delay before re-polling after a failed request.
pub const FAILURE_RETRY: Duration = Duration::from_millis(2000);

const SHUTDOWN_CHECK: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollResult {
    Ready,
    NotReady,
    Failed,
}

impl PollResult {
    /// Delay before the next poll, `None` once the model is ready.
    pub fn retry_after(self) -> Option<Duration> {
        match self {
            PollResult::Ready => None,
            PollResult::NotReady => Some(NOT_READY_RETRY),
            PollResult::Failed => Some(FAILURE_RETRY),
        }
    }
}

pub fn poll_once(api: &dyn InferenceApi) -> PollResult {
    match api.status() {
        Ok(report) if report.model_ready => PollResult::Ready,
        Ok(_) => {
            debug!("model not ready yet");
            PollResult::NotReady
        }
        Err(err) => {
            warn!("Error checking model status: {err}");
            PollResult::Failed
        }
    }
}

/// Poll until the model is ready, then post [`Event::ModelReady`] and exit.
pub fn spawn_status_poller(
    api: Arc<dyn InferenceApi>,
    events: Sender<Event>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("status-poller", move || {
        while !shutdown.load(Ordering::Relaxed) {
            let result = poll_once(api.as_ref());
            let Some(delay) = result.retry_after() else {
                info!("Model ready");
                let _ = events.send(Event::ModelReady);
                return;
            };
            sleep_unless_shutdown(delay, &shutdown);
        }
    })
}

fn sleep_unless_shutdown(delay: Duration, shutdown: &AtomicBool) {
    let deadline = Instant::now() + delay;
    while !shutdown.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep(SHUTDOWN_CHECK.min(deadline - now));
    }
}
