use crate::client::{acquire::Acquisition, inference::SubmissionOutcome, scheduler::FrameRequest};

/// Control clicks coming from the page.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlAction {
    Start,
    Stop,
    Flip,
    ToggleFullscreen,
}

impl ControlAction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "start" => Some(ControlAction::Start),
            "stop" => Some(ControlAction::Stop),
            "flip" => Some(ControlAction::Flip),
            "fullscreen" => Some(ControlAction::ToggleFullscreen),
            _ => None,
        }
    }
}

/// Everything the session reacts to. Events are handled one at a time by the
/// runner thread.
#[derive(Debug)]
pub enum Event {
    /// `/status` reported the model as ready.
    ModelReady,
    Control(ControlAction),
    Visibility { hidden: bool },
    /// A scheduled refresh fired.
    Frame {
        request: FrameRequest,
        timestamp_ms: f64,
    },
    /// A camera acquisition attempt finished.
    Acquired(Acquisition),
    /// A `/process` round trip finished.
    Submission(SubmissionOutcome),
    Shutdown,
}
