//! Background worker that encodes frames and runs the `/process` round trip.
//!
//! The session hands over a snapshot of the render surface and returns to
//! the event loop immediately; JPEG encoding, the HTTP call and decoding of
//! the annotated reply all happen here. The outcome is posted back as
//! [`Event::Submission`].

use std::{
    io,
    sync::Arc,
    thread,
    time::Instant,
};

use crossbeam_channel::{Sender, TrySendError, bounded};
use image::RgbaImage;
use tracing::{debug, warn};

use crate::client::{
    error::ClientError,
    event::Event,
    inference::{InferenceApi, SubmissionOutcome, classify_response},
    surface::encode_jpeg,
    telemetry,
};

/// One frame to submit.
#[derive(Clone, Debug)]
pub struct SubmitJob {
    pub frame: RgbaImage,
    pub frame_number: u64,
}

pub trait Submitter: Send {
    /// Queue `job` without blocking. An error means nothing was queued and no
    /// outcome will be delivered for it.
    fn submit(&mut self, job: SubmitJob) -> Result<(), ClientError>;
}

/// Dedicated thread performing submissions one at a time.
pub struct SubmissionWorker {
    tx: Option<Sender<SubmitJob>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SubmissionWorker {
    pub fn spawn(
        api: Arc<dyn InferenceApi>,
        jpeg_quality: u8,
        events: Sender<Event>,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded::<SubmitJob>(1);
        let handle = telemetry::spawn_thread("frame-submission", move || {
            for job in rx {
                let outcome = run_job(api.as_ref(), jpeg_quality, job);
                if events.send(Event::Submission(outcome)).is_err() {
                    break;
                }
            }
            debug!("submission worker stopped");
        })?;
        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }
}

impl Submitter for SubmissionWorker {
    fn submit(&mut self, job: SubmitJob) -> Result<(), ClientError> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(ClientError::WorkerUnavailable);
        };
        match tx.try_send(job) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(job)) => {
                warn!(frame = job.frame_number, "submission queue unexpectedly full");
                Err(ClientError::WorkerUnavailable)
            }
            Err(TrySendError::Disconnected(_)) => Err(ClientError::WorkerUnavailable),
        }
    }
}

impl Drop for SubmissionWorker {
    fn drop(&mut self) {
        drop(self.tx.take());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

/// Encode, POST and interpret one frame.
pub fn run_job(api: &dyn InferenceApi, jpeg_quality: u8, job: SubmitJob) -> SubmissionOutcome {
    let span = tracing::info_span!("submission", frame = job.frame_number);
    let _guard = span.enter();
    let started = Instant::now();

    let jpeg = match encode_jpeg(&job.frame, jpeg_quality) {
        Ok(jpeg) => jpeg,
        Err(err) => return SubmissionOutcome::Failed(err.to_string()),
    };
    let payload_bytes = jpeg.len();

    let outcome = match api.process(jpeg) {
        Ok(raw) => classify_response(raw),
        Err(err) => SubmissionOutcome::Failed(err.to_string()),
    };

    let elapsed = started.elapsed().as_secs_f64();
    metrics::histogram!("client_round_trip_seconds", "outcome" => outcome.label()).record(elapsed);
    debug!(
        payload_bytes,
        outcome = outcome.label(),
        "round trip took {:.1} ms",
        elapsed * 1000.0
    );
    outcome
}

#[cfg(test)]
mod tests {
    use std::{sync::Mutex, time::Duration};

    use crossbeam_channel::unbounded;
    use image::Rgba;

    use super::*;
    use crate::client::inference::{RawResponse, StatusReport};

    #[derive(Default)]
    struct RecordingApi {
        payloads: Mutex<Vec<Vec<u8>>>,
        fail: bool,
    }

    impl InferenceApi for RecordingApi {
        fn status(&self) -> Result<StatusReport, ClientError> {
            Ok(StatusReport { model_ready: true })
        }

        fn process(&self, jpeg: Vec<u8>) -> Result<RawResponse, ClientError> {
            if self.fail {
                return Err(ClientError::InvalidResponse("connection refused".into()));
            }
            self.payloads.lock().unwrap().push(jpeg.clone());
            Ok(RawResponse {
                status: 200,
                reason: "OK".into(),
                content_type: Some("image/jpeg".into()),
                detections: Some(r#"{"person": 1}"#.into()),
                body: jpeg,
            })
        }
    }

    fn job(frame_number: u64) -> SubmitJob {
        SubmitJob {
            frame: RgbaImage::from_pixel(32, 24, Rgba([120, 40, 40, 255])),
            frame_number,
        }
    }

    #[test]
    fn job_posts_a_jpeg_and_decodes_the_reply() {
        let api = RecordingApi::default();
        let outcome = run_job(&api, 80, job(1));
        let payloads = api.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(&payloads[0][..2], &[0xFF, 0xD8]);
        match outcome {
            SubmissionOutcome::Annotated { image, detections } => {
                assert_eq!(image.dimensions(), (32, 24));
                assert_eq!(detections.len(), 1);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[test]
    fn transport_errors_become_failed_outcomes() {
        let api = RecordingApi {
            fail: true,
            ..RecordingApi::default()
        };
        assert!(matches!(
            run_job(&api, 80, job(2)),
            SubmissionOutcome::Failed(message) if message.contains("connection refused")
        ));
    }

    #[test]
    fn worker_posts_outcomes_back_to_the_loop() {
        let (tx, rx) = unbounded();
        let mut worker =
            SubmissionWorker::spawn(Arc::new(RecordingApi::default()), 80, tx).unwrap();
        worker.submit(job(3)).unwrap();
        match rx.recv_timeout(Duration::from_secs(5)).unwrap() {
            Event::Submission(SubmissionOutcome::Annotated { .. }) => {}
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn stopped_worker_refuses_jobs() {
        let (tx, _rx) = unbounded();
        let mut worker =
            SubmissionWorker::spawn(Arc::new(RecordingApi::default()), 80, tx).unwrap();
        drop(worker.tx.take());
        assert!(matches!(
            worker.submit(job(4)),
            Err(ClientError::WorkerUnavailable)
        ));
    }
}
