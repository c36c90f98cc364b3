//! Device addressing plus the OpenCV-backed capture reader.

/// Parse a `/dev/videoX` style URI and return the zero-based index if present.
pub(crate) fn parse_device_index(uri: &str) -> Option<i32> {
    if let Ok(index) = uri.parse::<i32>() {
        return Some(index);
    }
    if let Some(stripped) = uri.strip_prefix("/dev/video") {
        if !stripped.is_empty() && stripped.chars().all(|c| c.is_ascii_digit()) {
            if let Ok(index) = stripped.parse::<i32>() {
                return Some(index);
            }
        }
    }
    None
}

#[cfg(feature = "opencv")]
pub use self::opencv_reader::spawn_camera_reader;

#[cfg(feature = "opencv")]
mod opencv_reader {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use chrono::Utc;
    use crossbeam_channel::{Sender, bounded};
    use opencv::{
        core::MatTraitConstManual,
        prelude::*,
        videoio::{self, VideoCapture, VideoCaptureTrait, VideoCaptureTraitConst},
    };
    use tracing::{debug, warn};

    use super::parse_device_index;
    use crate::{
        ChannelStream, spawn_reader,
        types::{CaptureError, FacingMode, Frame, FrameFormat},
    };

    /// Spawns a background thread that continually captures frames from `uri`.
    ///
    /// `requested_size` is only a hint to the driver; frames keep whatever size
    /// the device delivers. The channel holds two frames so a slow consumer
    /// backpressures the capture loop.
    pub fn spawn_camera_reader(
        uri: &str,
        facing: FacingMode,
        requested_size: (i32, i32),
    ) -> Result<ChannelStream, CaptureError> {
        let mut cap = open_video_capture(uri, facing)?;
        configure_camera(&mut cap, requested_size, 30.0);
        let negotiated = negotiated_size(&cap).unwrap_or(requested_size);
        debug!(%uri, width = negotiated.0, height = negotiated.1, "opencv negotiated frame size");

        let (tx, rx) = bounded(2);
        let stop = Arc::new(AtomicBool::new(false));
        let reader_stop = stop.clone();

        let reader = spawn_reader("opencv-capture", move || {
            if let Err(err) = capture_loop(cap, &reader_stop, &tx) {
                let _ = tx.send(Err(err));
            }
        })
        .map_err(|err| CaptureError::Other(err.into()))?;

        Ok(ChannelStream::new(uri.to_string(), negotiated, rx, stop).with_reader(reader))
    }

    fn capture_loop(
        mut cap: VideoCapture,
        stop: &AtomicBool,
        tx: &Sender<Result<Frame, CaptureError>>,
    ) -> Result<(), CaptureError> {
        let mut frame = Mat::default();

        while !stop.load(Ordering::Relaxed) {
            cap.read(&mut frame)
                .map_err(|e| CaptureError::Other(e.into()))?;

            let size = frame.size().map_err(|e| CaptureError::Other(e.into()))?;
            if size.width <= 0 {
                continue;
            }

            let data = frame
                .data_bytes()
                .map_err(|e| CaptureError::Other(e.into()))?
                .to_vec();

            let sent = tx.send(Ok(Frame {
                data,
                width: size.width,
                height: size.height,
                timestamp_ms: Utc::now().timestamp_millis(),
                format: FrameFormat::Bgr8,
            }));
            if sent.is_err() {
                break;
            }
        }

        Ok(())
    }

    /// Frame size the driver settled on after [`configure_camera`].
    fn negotiated_size(cap: &VideoCapture) -> Option<(i32, i32)> {
        let width = cap.get(videoio::CAP_PROP_FRAME_WIDTH).ok()? as i32;
        let height = cap.get(videoio::CAP_PROP_FRAME_HEIGHT).ok()? as i32;
        (width > 0 && height > 0).then_some((width, height))
    }

    fn open_video_capture(uri: &str, facing: FacingMode) -> Result<VideoCapture, CaptureError> {
        if let Some(index) = parse_device_index(uri) {
            for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
                match VideoCapture::new(index, backend) {
                    Ok(cap) => {
                        if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                            return Ok(cap);
                        }
                    }
                    Err(err) => {
                        warn!("failed to open device #{index} with backend {backend}: {err}");
                    }
                }
            }
            return Err(CaptureError::NoDevice {
                facing,
                uri: uri.to_string(),
            });
        }

        for backend in [videoio::CAP_V4L, videoio::CAP_ANY] {
            match VideoCapture::from_file(uri, backend) {
                Ok(cap) => {
                    if cap.is_opened().map_err(|e| CaptureError::Other(e.into()))? {
                        return Ok(cap);
                    }
                }
                Err(err) => {
                    warn!("failed to open {uri} with backend {backend}: {err}");
                }
            }
        }

        Err(CaptureError::Open {
            uri: uri.to_string(),
        })
    }

    /// Request resolution, fps and preferred pixel format.
    fn configure_camera(cap: &mut VideoCapture, requested_size: (i32, i32), fps: f64) {
        let mut fourcc_set = false;
        if let Ok(mjpg) = videoio::VideoWriter::fourcc('M', 'J', 'P', 'G') {
            if matches!(cap.set(videoio::CAP_PROP_FOURCC, mjpg as f64), Ok(true)) {
                fourcc_set = true;
            }
        }
        if !fourcc_set {
            if let Ok(yuyv) = videoio::VideoWriter::fourcc('Y', 'U', 'Y', 'V') {
                let _ = cap.set(videoio::CAP_PROP_FOURCC, yuyv as f64);
            }
        }
        let _ = cap.set(videoio::CAP_PROP_FRAME_WIDTH, requested_size.0 as f64);
        let _ = cap.set(videoio::CAP_PROP_FRAME_HEIGHT, requested_size.1 as f64);
        let _ = cap.set(videoio::CAP_PROP_FPS, fps);
    }
}
