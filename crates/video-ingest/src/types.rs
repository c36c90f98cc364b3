use std::fmt;

use anyhow::Error;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Raw frame captured from a video source.
#[derive(Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: i32,
    pub height: i32,
    pub timestamp_ms: i64,
    pub format: FrameFormat,
}

impl Frame {
    /// Expand the frame into tightly packed RGBA8 pixels.
    pub fn to_rgba(&self) -> Vec<u8> {
        match self.format {
            FrameFormat::Bgr8 => bgr_to_rgba(&self.data),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameFormat {
    Bgr8,
}

/// Which physical camera a capture session is bound to.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Back camera.
    #[default]
    Environment,
    /// Front camera; previews of it are mirrored.
    User,
}

impl FacingMode {
    pub fn toggled(self) -> Self {
        match self {
            FacingMode::Environment => FacingMode::User,
            FacingMode::User => FacingMode::Environment,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FacingMode::Environment => "environment",
            FacingMode::User => "user",
        }
    }

    /// Front camera output is shown horizontally flipped.
    pub fn is_mirrored(self) -> bool {
        matches!(self, FacingMode::User)
    }
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Requested shape of a capture session. Dimensions are a hint; the device
/// reports what it actually delivers through [`crate::CaptureStream::dimensions`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub ideal_width: i32,
    pub ideal_height: i32,
    pub facing_mode: FacingMode,
}

impl CaptureConstraints {
    pub fn new(ideal_width: i32, ideal_height: i32, facing_mode: FacingMode) -> Self {
        Self {
            ideal_width,
            ideal_height,
            facing_mode,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to open video source {uri:?}")]
    Open { uri: String },
    #[error("no {facing} camera available at {uri:?}")]
    NoDevice { facing: FacingMode, uri: String },
    #[error("video source {uri:?} produced no frame within {waited_ms} ms")]
    NoSignal { uri: String, waited_ms: u64 },
    #[error(transparent)]
    Other(#[from] Error),
}

pub(crate) fn bgr_to_rgba(input: &[u8]) -> Vec<u8> {
    let pixels = input.len() / 3;
    let mut output = Vec::with_capacity(pixels * 4);
    for chunk in input.chunks_exact(3) {
        output.push(chunk[2]);
        output.push(chunk[1]);
        output.push(chunk[0]);
        output.push(255);
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_mode_toggles_between_both_cameras() {
        assert_eq!(FacingMode::default(), FacingMode::Environment);
        assert_eq!(FacingMode::Environment.toggled(), FacingMode::User);
        assert_eq!(FacingMode::User.toggled(), FacingMode::Environment);
        assert!(FacingMode::User.is_mirrored());
        assert!(!FacingMode::Environment.is_mirrored());
    }

    #[test]
    fn facing_mode_displays_constraint_value() {
        assert_eq!(FacingMode::User.to_string(), "user");
        assert_eq!(FacingMode::Environment.to_string(), "environment");
    }

    #[test]
    fn bgr_frame_expands_to_opaque_rgba() {
        let frame = Frame {
            data: vec![10, 20, 30, 40, 50, 60],
            width: 2,
            height: 1,
            timestamp_ms: 0,
            format: FrameFormat::Bgr8,
        };
        assert_eq!(frame.to_rgba(), vec![30, 20, 10, 255, 60, 50, 40, 255]);
    }
}
