use std::{
    io::{BufRead, BufReader, Read},
    path::Path,
    process::{Command, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::anyhow;
use chrono::Utc;
use crossbeam_channel::{Sender, bounded};
use tracing::debug;

use crate::{
    ChannelStream, SharedChild,
    camera::parse_device_index,
    kill_child, spawn_reader,
    types::{CaptureError, FacingMode, Frame, FrameFormat},
};

/// Spawns an FFmpeg process that reads `uri` (a V4L2 device, a file or a URL)
/// and yields BGR8 frames at the source's native size via a background thread.
///
/// `requested_size` is passed to V4L2 devices as `-video_size`. The device may
/// pick another mode; the size FFmpeg reports for its output stream is the one
/// frames are cut to.
pub fn spawn_ffmpeg_reader(
    uri: &str,
    facing: FacingMode,
    requested_size: (i32, i32),
) -> Result<ChannelStream, CaptureError> {
    let (is_v4l, ffmpeg_uri) = if let Some(index) = parse_device_index(uri) {
        (true, format!("/dev/video{index}"))
    } else {
        (uri.starts_with("/dev/video"), uri.to_string())
    };

    if is_v4l && !Path::new(&ffmpeg_uri).exists() {
        return Err(CaptureError::NoDevice {
            facing,
            uri: ffmpeg_uri,
        });
    }

    let mut cmd = Command::new("ffmpeg");
    cmd.arg("-hide_banner")
        .arg("-nostats")
        .arg("-loglevel")
        .arg("info");

    if is_v4l {
        cmd.arg("-f")
            .arg("video4linux2")
            .arg("-video_size")
            .arg(format!("{}x{}", requested_size.0, requested_size.1));
    }

    cmd.arg("-i")
        .arg(&ffmpeg_uri)
        .arg("-pix_fmt")
        .arg("bgr24")
        .arg("-f")
        .arg("rawvideo")
        .arg("-")
        .stdin(Stdio::null())
        .stderr(Stdio::piped())
        .stdout(Stdio::piped());

    let mut child = cmd.spawn().map_err(|err| CaptureError::Other(err.into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stdout")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| CaptureError::Other(anyhow!("failed to capture ffmpeg stderr")))?;
    let child: SharedChild = Arc::new(Mutex::new(Some(child)));

    let (size_tx, size_rx) = bounded(1);
    let log_uri = ffmpeg_uri.clone();
    spawn_reader("ffmpeg-log", move || watch_stderr(stderr, &log_uri, &size_tx))
        .map_err(|err| CaptureError::Other(err.into()))?;

    let (tx, rx) = bounded(2);
    let stop = Arc::new(AtomicBool::new(false));
    let reader_stop = stop.clone();
    let reader_child = child.clone();
    let reader_uri = ffmpeg_uri.clone();

    let reader = spawn_reader("ffmpeg-capture", move || {
        // The log watcher drops its sender without a size if ffmpeg exits early.
        let result = match size_rx.recv() {
            Ok(size) => read_loop(stdout, size, &reader_stop, &tx),
            Err(_) => Err(CaptureError::Open { uri: reader_uri }),
        };
        kill_child(&reader_child);
        debug!("ffmpeg capture reader exited");
        if let Err(err) = result {
            let _ = tx.send(Err(err));
        }
    })
    .map_err(|err| CaptureError::Other(err.into()))?;

    Ok(ChannelStream::new(ffmpeg_uri, requested_size, rx, stop)
        .with_child(child)
        .with_reader(reader))
}

/// Forward ffmpeg's log to tracing and report the output frame size once seen.
fn watch_stderr(stderr: impl Read, uri: &str, size_tx: &Sender<(i32, i32)>) {
    let mut parser = StreamInfoParser::default();
    let mut reported = false;
    for line in BufReader::new(stderr).lines() {
        let Ok(line) = line else { break };
        if !reported {
            if let Some(size) = parser.feed(&line) {
                debug!(%uri, width = size.0, height = size.1, "ffmpeg negotiated frame size");
                let _ = size_tx.send(size);
                reported = true;
            }
        }
        debug!(%uri, "ffmpeg: {line}");
    }
}

/// Picks the video size out of the `Output #0` section of ffmpeg's stream dump.
#[derive(Default)]
struct StreamInfoParser {
    in_output: bool,
}

impl StreamInfoParser {
    fn feed(&mut self, line: &str) -> Option<(i32, i32)> {
        let trimmed = line.trim_start();
        if trimmed.starts_with("Output #") {
            self.in_output = true;
            return None;
        }
        if trimmed.starts_with("Input #") {
            self.in_output = false;
            return None;
        }
        if self.in_output && trimmed.starts_with("Stream #") && trimmed.contains("Video:") {
            return parse_frame_size(trimmed);
        }
        None
    }
}

/// First `WxH` token with both sides positive, e.g. `640x480` in
/// `Video: rawvideo (BGR[24] / 0x18524742), bgr24, 640x480, q=2-31`.
fn parse_frame_size(line: &str) -> Option<(i32, i32)> {
    line.split_whitespace().find_map(|token| {
        let token = token.trim_end_matches(',');
        let (w, h) = token.split_once('x')?;
        if w.is_empty() || h.is_empty() {
            return None;
        }
        if !w.chars().all(|c| c.is_ascii_digit()) || !h.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let (w, h) = (w.parse::<i32>().ok()?, h.parse::<i32>().ok()?);
        (w > 0 && h > 0).then_some((w, h))
    })
}

fn read_loop(
    mut stdout: impl Read,
    size: (i32, i32),
    stop: &AtomicBool,
    tx: &Sender<Result<Frame, CaptureError>>,
) -> Result<(), CaptureError> {
    let frame_bytes = (size.0 as usize) * (size.1 as usize) * 3;
    let mut buffer = vec![0u8; frame_bytes];

    loop {
        if stop.load(Ordering::Relaxed) {
            return Ok(());
        }
        match stdout.read_exact(&mut buffer) {
            Ok(()) => {
                let frame = Frame {
                    data: buffer.clone(),
                    width: size.0,
                    height: size.1,
                    timestamp_ms: Utc::now().timestamp_millis(),
                    format: FrameFormat::Bgr8,
                };
                if tx.send(Ok(frame)).is_err() {
                    return Ok(());
                }
            }
            Err(_) if stop.load(Ordering::Relaxed) => return Ok(()),
            Err(err) => return Err(CaptureError::Other(err.into())),
        }
    }
}
