//! Camera acquisition off the event loop.
//!
//! Opening a device waits for its first frame, which can take seconds. The
//! [`CameraWorker`] does that on its own thread and posts the result back as
//! [`Event::Acquired`], tagged with the attempt number the session handed out.

use std::{fmt, io, thread};

use crossbeam_channel::{Receiver, Sender, unbounded};
use tracing::{debug, info_span};
use video_ingest::{Camera, CaptureConstraints, CaptureError, CaptureStream, FacingMode};

use crate::client::{error::ClientError, event::Event, telemetry};

/// Result of one acquisition attempt.
pub struct Acquisition {
    pub attempt: u64,
    pub facing_mode: FacingMode,
    pub result: Result<Box<dyn CaptureStream>, CaptureError>,
}

impl fmt::Debug for Acquisition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match &self.result {
            Ok(stream) => format!("Ok({:?})", stream.dimensions()),
            Err(err) => format!("Err({err})"),
        };
        f.debug_struct("Acquisition")
            .field("attempt", &self.attempt)
            .field("facing_mode", &self.facing_mode)
            .field("result", &result)
            .finish()
    }
}

/// Starts acquisitions whose results arrive later as [`Event::Acquired`].
pub trait Acquirer: Send {
    fn begin(&mut self, attempt: u64, constraints: CaptureConstraints) -> Result<(), ClientError>;
}

struct AcquireJob {
    attempt: u64,
    constraints: CaptureConstraints,
}

/// [`Acquirer`] running a [`Camera`] on a dedicated thread.
pub struct CameraWorker {
    jobs: Option<Sender<AcquireJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraWorker {
    pub fn spawn(camera: Box<dyn Camera>, events: Sender<Event>) -> io::Result<Self> {
        let (jobs, rx) = unbounded();
        let handle = telemetry::spawn_thread("camera-acquire", move || {
            acquire_loop(camera, &rx, &events);
        })?;
        Ok(Self {
            jobs: Some(jobs),
            handle: Some(handle),
        })
    }
}

impl Acquirer for CameraWorker {
    fn begin(&mut self, attempt: u64, constraints: CaptureConstraints) -> Result<(), ClientError> {
        let jobs = self.jobs.as_ref().ok_or(ClientError::WorkerUnavailable)?;
        jobs.send(AcquireJob {
            attempt,
            constraints,
        })
        .map_err(|_| ClientError::WorkerUnavailable)
    }
}

impl Drop for CameraWorker {
    fn drop(&mut self) {
        self.jobs.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn acquire_loop(mut camera: Box<dyn Camera>, jobs: &Receiver<AcquireJob>, events: &Sender<Event>) {
    while let Ok(mut job) = jobs.recv() {
        // Only the newest request matters; older ones were superseded.
        while let Ok(newer) = jobs.try_recv() {
            debug!(skipped = job.attempt, "camera request superseded");
            job = newer;
        }

        let facing_mode = job.constraints.facing_mode;
        let span = info_span!("client.acquire", attempt = job.attempt, facing = %facing_mode);
        let result = span.in_scope(|| camera.acquire(&job.constraints));
        let acquisition = Acquisition {
            attempt: job.attempt,
            facing_mode,
            result,
        };
        if events.send(Event::Acquired(acquisition)).is_err() {
            break;
        }
    }
    debug!("camera worker exited");
}
