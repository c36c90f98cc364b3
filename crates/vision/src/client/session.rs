//! Session controller: camera lifecycle, the per-refresh frame loop and
//! application of `/process` outcomes.
//!
//! All state lives here and is only touched from the runner thread. The
//! render surface and page state are shared with the preview server, which
//! only reads them.

use tracing::{debug, error, info, warn};
use video_ingest::{CaptureConstraints, CaptureStream, FacingMode};

use crate::client::{
    acquire::{Acquirer, Acquisition},
    data::{Controls, FullscreenIcon, ModelStatus, PageState, SharedPage},
    event::{ControlAction, Event},
    fps::{FpsMeter, format_fps},
    inference::{ServerNotice, SubmissionOutcome},
    scheduler::{FrameRequest, FrameScheduler},
    submission::{SubmitJob, Submitter},
    surface::SharedSurface,
    viewport::Viewport,
};

/// Message shown when no capture session could be opened.
pub const CAMERA_ERROR_ALERT: &str = "Error accessing webcam. Please make sure you have a webcam connected and have granted permission.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    pub ideal_width: i32,
    pub ideal_height: i32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ideal_width: 1280,
            ideal_height: 720,
        }
    }
}

pub struct Session {
    config: SessionConfig,
    acquirer: Box<dyn Acquirer>,
    scheduler: Box<dyn FrameScheduler>,
    submitter: Box<dyn Submitter>,
    viewport: Box<dyn Viewport>,
    surface: SharedSurface,
    page: SharedPage,
    stream: Option<Box<dyn CaptureStream>>,
    /// Attempt whose result the session is waiting for.
    acquiring: Option<u64>,
    attempts: u64,
    facing_mode: FacingMode,
    streaming: bool,
    in_flight: bool,
    model_ready: bool,
    hidden: bool,
    pending_frame: Option<FrameRequest>,
    fps: FpsMeter,
    frame_number: u64,
}

impl Session {
    pub fn new(
        config: SessionConfig,
        acquirer: Box<dyn Acquirer>,
        scheduler: Box<dyn FrameScheduler>,
        submitter: Box<dyn Submitter>,
        viewport: Box<dyn Viewport>,
        surface: SharedSurface,
        page: SharedPage,
    ) -> Self {
        Self {
            config,
            acquirer,
            scheduler,
            submitter,
            viewport,
            surface,
            page,
            stream: None,
            acquiring: None,
            attempts: 0,
            facing_mode: FacingMode::default(),
            streaming: false,
            in_flight: false,
            model_ready: false,
            hidden: false,
            pending_frame: None,
            fps: FpsMeter::default(),
            frame_number: 0,
        }
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::ModelReady => self.mark_model_ready(),
            Event::Control(action) => self.handle_control(action),
            Event::Visibility { hidden } => self.set_hidden(hidden),
            Event::Frame {
                request,
                timestamp_ms,
            } => self.on_frame(request, timestamp_ms),
            Event::Acquired(acquisition) => self.on_acquired(acquisition),
            Event::Submission(outcome) => self.apply_submission(outcome),
            Event::Shutdown => self.stop(true),
        }
    }

    fn handle_control(&mut self, action: ControlAction) {
        match action {
            ControlAction::Start => {
                if self.read_page(|page| page.controls.start).unwrap_or(false) {
                    self.start();
                } else {
                    debug!("start ignored: control disabled");
                }
            }
            ControlAction::Stop => self.stop(true),
            ControlAction::Flip => self.flip(),
            ControlAction::ToggleFullscreen => self.toggle_fullscreen(),
        }
    }

    pub fn mark_model_ready(&mut self) {
        if self.model_ready {
            return;
        }
        self.model_ready = true;
        let idle = !self.streaming && self.acquiring.is_none();
        self.update_page(|page| {
            page.model_status = ModelStatus::Ready;
            if idle {
                page.controls.start = true;
            }
        });
    }

    /// Request a capture session with the current facing mode. An existing
    /// session is torn down first; the frame loop starts once the camera
    /// reports back through [`Event::Acquired`].
    pub fn start(&mut self) {
        if self.stream.is_some() {
            self.stop(false);
        }

        self.acquiring = None;
        self.attempts += 1;
        let attempt = self.attempts;
        let facing = self.facing_mode;
        let constraints =
            CaptureConstraints::new(self.config.ideal_width, self.config.ideal_height, facing);
        if let Err(err) = self.acquirer.begin(attempt, constraints) {
            self.camera_failed(&err);
            return;
        }
        self.acquiring = Some(attempt);

        self.update_page(|page| {
            page.controls = Controls {
                start: false,
                stop: true,
                flip: true,
            };
            page.facing_mode = facing;
        });
        debug!(attempt, %facing, "camera requested");
    }

    fn on_acquired(&mut self, acquisition: Acquisition) {
        let Acquisition {
            attempt,
            facing_mode,
            result,
        } = acquisition;
        if self.acquiring != Some(attempt) {
            debug!(attempt, "discarding superseded camera acquisition");
            if let Ok(mut stream) = result {
                stream.stop();
            }
            return;
        }
        self.acquiring = None;

        let stream = match result {
            Ok(stream) => stream,
            Err(err) => {
                self.camera_failed(&err);
                return;
            }
        };

        let (width, height) = stream.dimensions();
        self.stream = Some(stream);
        if let Ok(mut surface) = self.surface.lock() {
            surface.resize(width.max(0) as u32, height.max(0) as u32);
        }
        self.streaming = true;

        self.update_page(|page| {
            page.controls = Controls {
                start: false,
                stop: true,
                flip: true,
            };
            page.streaming = true;
            page.facing_mode = facing_mode;
            page.alert = None;
        });
        info!(facing = %facing_mode, width, height, "camera started");
        self.schedule_frame();
    }

    /// Report a failed acquisition and return to the idle controls so Start
    /// can be tried again.
    fn camera_failed(&mut self, err: &dyn std::fmt::Display) {
        error!(facing = %self.facing_mode, "Error accessing webcam: {err}");
        metrics::counter!("client_camera_errors_total").increment(1);
        let start = self.model_ready;
        self.update_page(|page| {
            page.alert = Some(CAMERA_ERROR_ALERT.to_string());
            page.controls = Controls {
                start,
                stop: false,
                flip: false,
            };
            page.streaming = false;
            page.detections.clear();
        });
        if let Ok(mut surface) = self.surface.lock() {
            surface.clear();
        }
    }

    /// Halt the capture session (or the pending request for one) and the
    /// frame loop. With `reset_ui` the controls return to their idle state
    /// and the outputs are cleared.
    pub fn stop(&mut self, reset_ui: bool) {
        let pending = self.acquiring.take();
        let stream = self.stream.take();
        if stream.is_none() && pending.is_none() {
            return;
        }
        if let Some(mut stream) = stream {
            stream.stop();
        }
        self.streaming = false;
        if let Some(request) = self.pending_frame.take() {
            self.scheduler.cancel_frame(request);
        }
        self.fps.reset();

        self.update_page(|page| {
            page.streaming = false;
            if reset_ui {
                page.controls = Controls {
                    start: true,
                    stop: false,
                    flip: false,
                };
                page.detections.clear();
            }
        });
        if reset_ui {
            if let Ok(mut surface) = self.surface.lock() {
                surface.clear();
            }
        }
        info!(reset_ui, cancelled_request = pending.is_some(), "camera stopped");
    }

    pub fn flip(&mut self) {
        self.facing_mode = self.facing_mode.toggled();
        let facing = self.facing_mode;
        self.update_page(|page| page.facing_mode = facing);
        info!(%facing, "facing mode switched");
        if self.streaming || self.acquiring.is_some() {
            self.start();
        }
    }

    pub fn toggle_fullscreen(&mut self) {
        if !self.viewport.is_fullscreen() {
            if let Err(err) = self.viewport.request_fullscreen() {
                error!("Error attempting to enable full-screen mode: {err}");
            }
            self.update_page(|page| page.fullscreen_icon = FullscreenIcon::Compress);
        } else {
            match self.viewport.exit_fullscreen() {
                Ok(()) => self.update_page(|page| page.fullscreen_icon = FullscreenIcon::Expand),
                Err(err) => error!("Error attempting to exit full-screen mode: {err}"),
            }
        }
    }

    /// Pause the frame loop while hidden and resume it once visible again.
    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
        if !self.streaming {
            return;
        }
        if hidden {
            if let Some(request) = self.pending_frame.take() {
                self.scheduler.cancel_frame(request);
                debug!("frame loop paused");
            }
        } else if self.pending_frame.is_none() {
            self.schedule_frame();
            debug!("frame loop resumed");
        }
    }

    /// One refresh of the frame loop.
    pub fn on_frame(&mut self, request: FrameRequest, timestamp_ms: f64) {
        if !self.streaming {
            return;
        }
        if self.pending_frame != Some(request) {
            debug!(?request, "ignoring stale frame callback");
            return;
        }
        self.pending_frame = None;

        if let Some(average) = self.fps.sample(timestamp_ms) {
            metrics::gauge!("client_fps").set(average);
            let text = format_fps(average);
            self.update_page(|page| page.fps = Some(text));
        }

        if !self.in_flight {
            self.submit_current_frame();
        }

        self.schedule_frame();
    }

    fn submit_current_frame(&mut self) {
        let Some(frame) = self
            .stream
            .as_mut()
            .and_then(|stream| stream.current_frame())
        else {
            return;
        };
        let mirror = self.facing_mode.is_mirrored();

        let snapshot = {
            let Ok(mut surface) = self.surface.lock() else {
                return;
            };
            if !surface.draw_frame(frame, mirror) {
                warn!(
                    width = frame.width,
                    height = frame.height,
                    "skipping frame with mismatched buffer size"
                );
                return;
            }
            surface.snapshot()
        };

        self.in_flight = true;
        self.frame_number = self.frame_number.wrapping_add(1);
        metrics::counter!("client_submissions_total").increment(1);

        let job = SubmitJob {
            frame: snapshot,
            frame_number: self.frame_number,
        };
        if let Err(err) = self.submitter.submit(job) {
            error!("Error sending frame to server: {err}");
            metrics::counter!("client_submission_failures_total", "kind" => "queue").increment(1);
            self.in_flight = false;
        }
    }

    /// Apply a finished round trip. Every branch releases the in-flight slot.
    pub fn apply_submission(&mut self, outcome: SubmissionOutcome) {
        if !self.in_flight {
            debug!(outcome = outcome.label(), "outcome arrived with no frame in flight");
        }

        match outcome {
            SubmissionOutcome::Annotated { image, detections } => {
                let mirror = self.facing_mode.is_mirrored();
                if let Ok(mut surface) = self.surface.lock() {
                    surface.clear();
                    surface.draw(&image, mirror);
                }
                self.in_flight = false;
                debug!(
                    labels = detections.len(),
                    objects = detections.total(),
                    "processed frame applied"
                );

                let shown = detections.or_placeholder();
                self.update_page(|page| page.detections.render(&shown));
            }
            SubmissionOutcome::Notice(notice) => {
                let is_error = notice.is_error();
                match notice {
                    ServerNotice::Status { status, message } => {
                        let message = message.as_deref().unwrap_or_default();
                        if is_error {
                            warn!(%status, %message, "Server response");
                        } else {
                            info!(%status, %message, "Server response");
                        }
                    }
                    ServerNotice::Other(value) => info!("Server response: {value}"),
                }
            }
            SubmissionOutcome::Rejected { status, reason } => {
                error!(status, "Error from server: {reason}");
                metrics::counter!("client_submission_failures_total", "kind" => "status")
                    .increment(1);
            }
            SubmissionOutcome::Failed(message) => {
                error!("Error sending frame to server: {message}");
                metrics::counter!("client_submission_failures_total", "kind" => "transport")
                    .increment(1);
            }
        }
        self.in_flight = false;
    }

    fn schedule_frame(&mut self) {
        if self.pending_frame.is_none() && !self.hidden {
            self.pending_frame = Some(self.scheduler.request_frame());
        }
    }

    fn update_page(&self, apply: impl FnOnce(&mut PageState)) {
        match self.page.lock() {
            Ok(mut guard) => apply(&mut guard),
            Err(poisoned) => warn!(error = %poisoned, "page state mutex poisoned"),
        }
    }

    fn read_page<T>(&self, read: impl FnOnce(&PageState) -> T) -> Option<T> {
        self.page.lock().ok().map(|guard| read(&guard))
    }

    pub fn page_snapshot(&self) -> PageState {
        self.read_page(PageState::clone).unwrap_or_default()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn is_acquiring(&self) -> bool {
        self.acquiring.is_some()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    pub fn facing_mode(&self) -> FacingMode {
        self.facing_mode
    }

    pub fn pending_frame(&self) -> Option<FrameRequest> {
        self.pending_frame
    }
}
