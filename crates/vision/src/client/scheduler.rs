//! Display-refresh scheduling for the frame loop.
//!
//! The session asks for "the next refresh" the way a page would call
//! `requestAnimationFrame`: each request fires at most once and may be
//! cancelled before it does.

use std::{
    io,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::Sender;
use tracing::debug;

use crate::client::{event::Event, telemetry};

/// Handle of one pending refresh callback.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FrameRequest(pub u64);

pub trait FrameScheduler: Send {
    /// Arm a single callback for the next refresh.
    fn request_frame(&mut self) -> FrameRequest;
    /// Disarm `request` if it has not fired yet.
    fn cancel_frame(&mut self, request: FrameRequest);
}

/// Scheduler driven by a fixed-rate ticker thread.
///
/// On every refresh the armed request (if any) is delivered as
/// [`Event::Frame`] with a millisecond timestamp relative to scheduler start.
pub struct RefreshScheduler {
    next_id: u64,
    armed: Arc<Mutex<Option<FrameRequest>>>,
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RefreshScheduler {
    pub fn spawn(refresh_hz: u32, events: Sender<Event>) -> io::Result<Self> {
        let armed: Arc<Mutex<Option<FrameRequest>>> = Arc::new(Mutex::new(None));
        let running = Arc::new(AtomicBool::new(true));
        let interval = Duration::from_secs_f64(1.0 / f64::from(refresh_hz.max(1)));

        let thread_armed = armed.clone();
        let thread_running = running.clone();
        let handle = telemetry::spawn_thread("refresh-scheduler", move || {
            let origin = Instant::now();
            let mut deadline = origin + interval;
            while thread_running.load(Ordering::Relaxed) {
                let now = Instant::now();
                if deadline > now {
                    thread::sleep(deadline - now);
                }
                deadline += interval;

                let fired = match thread_armed.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(_) => break,
                };
                if let Some(request) = fired {
                    let timestamp_ms = origin.elapsed().as_secs_f64() * 1000.0;
                    if events
                        .send(Event::Frame {
                            request,
                            timestamp_ms,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            }
            debug!("refresh scheduler stopped");
        })?;

        Ok(Self {
            next_id: 0,
            armed,
            running,
            handle: Some(handle),
        })
    }
}

impl FrameScheduler for RefreshScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id = self.next_id.wrapping_add(1);
        let request = FrameRequest(self.next_id);
        if let Ok(mut guard) = self.armed.lock() {
            *guard = Some(request);
        }
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        if let Ok(mut guard) = self.armed.lock() {
            if *guard == Some(request) {
                *guard = None;
            }
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::unbounded;

    use super::*;

    #[test]
    fn armed_request_fires_once() {
        let (tx, rx) = unbounded();
        let mut scheduler = RefreshScheduler::spawn(200, tx).unwrap();
        let request = scheduler.request_frame();

        match rx.recv_timeout(Duration::from_secs(2)).unwrap() {
            Event::Frame {
                request: fired,
                timestamp_ms,
            } => {
                assert_eq!(fired, request);
                assert!(timestamp_ms > 0.0);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());
    }

    #[test]
    fn cancelled_request_never_fires() {
        let (tx, rx) = unbounded();
        let mut scheduler = RefreshScheduler::spawn(20, tx).unwrap();
        let request = scheduler.request_frame();
        scheduler.cancel_frame(request);
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
    }

    #[test]
    fn cancelling_a_stale_request_keeps_the_current_one() {
        let (tx, rx) = unbounded();
        let mut scheduler = RefreshScheduler::spawn(200, tx).unwrap();
        let stale = FrameRequest(u64::MAX);
        let request = scheduler.request_frame();
        scheduler.cancel_frame(stale);
        assert!(matches!(
            rx.recv_timeout(Duration::from_secs(2)).unwrap(),
            Event::Frame { request: fired, .. } if fired == request
        ));
    }
}
