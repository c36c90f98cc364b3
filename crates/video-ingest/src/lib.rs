//! Camera capture sessions for the webcam detection client.
//!
//! A [`Camera`] turns [`CaptureConstraints`] into a live [`CaptureStream`].
//! Streams are fed by a background reader (an FFmpeg child process or an
//! OpenCV `VideoCapture`) and always expose the most recent frame, which is
//! what a consumer polling at display rate wants.

use std::{
    io,
    process::Child,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use tracing::{debug, info, warn};

mod camera;
mod ffmpeg;
mod types;

#[cfg(feature = "opencv")]
pub use camera::spawn_camera_reader;
pub use ffmpeg::spawn_ffmpeg_reader;
pub use types::{CaptureConstraints, CaptureError, FacingMode, Frame, FrameFormat};

/// Default time allowed for a freshly opened source to deliver its first frame.
pub const FIRST_FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Child process owned jointly by a stream and its reader thread. Whoever
/// takes it out kills and reaps it.
pub(crate) type SharedChild = Arc<Mutex<Option<Child>>>;

/// Source of capture sessions.
pub trait Camera: Send {
    /// Open a session honouring `constraints`. Returns once the session has
    /// delivered its first frame, so its dimensions are known.
    fn acquire(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError>;
}

/// A live capture session.
pub trait CaptureStream: Send {
    /// Native (width, height) of the delivered frames.
    fn dimensions(&self) -> (i32, i32);
    /// Most recent frame, or `None` while the source has not buffered one yet.
    fn current_frame(&mut self) -> Option<&Frame>;
    /// Halt the underlying reader and release the device before returning.
    /// Idempotent.
    fn stop(&mut self);
}

/// Stream fed by a background reader thread over a bounded channel.
pub struct ChannelStream {
    uri: String,
    dimensions: (i32, i32),
    rx: Option<Receiver<Result<Frame, CaptureError>>>,
    current: Option<Frame>,
    stop: Arc<AtomicBool>,
    child: Option<SharedChild>,
    reader: Option<thread::JoinHandle<()>>,
}

impl ChannelStream {
    pub fn new(
        uri: String,
        dimensions: (i32, i32),
        rx: Receiver<Result<Frame, CaptureError>>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            uri,
            dimensions,
            rx: Some(rx),
            current: None,
            stop,
            child: None,
            reader: None,
        }
    }

    /// Join `reader` when the stream stops.
    pub(crate) fn with_reader(mut self, reader: thread::JoinHandle<()>) -> Self {
        self.reader = Some(reader);
        self
    }

    /// Kill and reap `child` when the stream stops.
    pub(crate) fn with_child(mut self, child: SharedChild) -> Self {
        self.child = Some(child);
        self
    }

    /// Block until the reader produces its first frame.
    pub fn wait_for_first_frame(&mut self, timeout: Duration) -> Result<(), CaptureError> {
        let Some(rx) = self.rx.as_ref() else {
            return Err(CaptureError::Open {
                uri: self.uri.clone(),
            });
        };
        match rx.recv_timeout(timeout) {
            Ok(Ok(frame)) => {
                self.dimensions = (frame.width, frame.height);
                self.current = Some(frame);
                Ok(())
            }
            Ok(Err(err)) => Err(err),
            Err(RecvTimeoutError::Timeout) => Err(CaptureError::NoSignal {
                uri: self.uri.clone(),
                waited_ms: timeout.as_millis() as u64,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(CaptureError::Open {
                uri: self.uri.clone(),
            }),
        }
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // Dropping the receiver unblocks a reader parked on a full channel.
        self.rx = None;
        if let Some(child) = self.child.take() {
            kill_child(&child);
        }
        if let Some(reader) = self.reader.take() {
            if reader.thread().id() != thread::current().id() && reader.join().is_err() {
                warn!(uri = %self.uri, "capture reader panicked");
            }
            debug!(uri = %self.uri, "capture reader joined");
        }
    }
}

impl CaptureStream for ChannelStream {
    fn dimensions(&self) -> (i32, i32) {
        self.dimensions
    }

    fn current_frame(&mut self) -> Option<&Frame> {
        let mut ended = false;
        if let Some(rx) = self.rx.as_ref() {
            loop {
                match rx.try_recv() {
                    Ok(Ok(frame)) => self.current = Some(frame),
                    Ok(Err(err)) => {
                        warn!(uri = %self.uri, "capture reader failed: {err}");
                        ended = true;
                        break;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        ended = true;
                        break;
                    }
                }
            }
        }
        if ended {
            self.rx = None;
        }
        self.current.as_ref()
    }

    fn stop(&mut self) {
        self.shutdown();
        self.current = None;
    }
}

impl Drop for ChannelStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Kill and reap the shared child if nobody has done so yet.
pub(crate) fn kill_child(child: &SharedChild) {
    let taken = match child.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(mut child) = taken {
        let _ = child.kill();
        let _ = child.wait();
    }
}

/// Spawn a reader thread that inherits the caller's tracing dispatcher.
pub(crate) fn spawn_reader<F, T>(name: &str, f: F) -> io::Result<thread::JoinHandle<T>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let dispatch = tracing::dispatcher::get_default(|current| current.clone());
    thread::Builder::new()
        .name(name.into())
        .spawn(move || tracing::dispatcher::with_default(&dispatch, f))
}

/// Reader implementation used for device sessions.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureBackend {
    #[default]
    Ffmpeg,
    OpenCv,
}

/// Device URIs for each facing mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceMap {
    pub environment: String,
    pub user: String,
}

impl DeviceMap {
    pub fn uri_for(&self, facing: FacingMode) -> &str {
        match facing {
            FacingMode::Environment => &self.environment,
            FacingMode::User => &self.user,
        }
    }
}

impl Default for DeviceMap {
    fn default() -> Self {
        Self {
            environment: "/dev/video0".into(),
            user: "/dev/video1".into(),
        }
    }
}

/// [`Camera`] backed by local capture devices.
pub struct DeviceCamera {
    backend: CaptureBackend,
    devices: DeviceMap,
    first_frame_timeout: Duration,
}

impl DeviceCamera {
    pub fn new(backend: CaptureBackend, devices: DeviceMap) -> Self {
        Self {
            backend,
            devices,
            first_frame_timeout: FIRST_FRAME_TIMEOUT,
        }
    }

    pub fn with_first_frame_timeout(mut self, timeout: Duration) -> Self {
        self.first_frame_timeout = timeout;
        self
    }
}

impl Camera for DeviceCamera {
    fn acquire(
        &mut self,
        constraints: &CaptureConstraints,
    ) -> Result<Box<dyn CaptureStream>, CaptureError> {
        let facing = constraints.facing_mode;
        let uri = self.devices.uri_for(facing);
        let size = (constraints.ideal_width, constraints.ideal_height);

        let mut stream = match self.backend {
            CaptureBackend::Ffmpeg => spawn_ffmpeg_reader(uri, facing, size)?,
            CaptureBackend::OpenCv => spawn_opencv(uri, facing, size)?,
        };
        stream.wait_for_first_frame(self.first_frame_timeout)?;

        let (width, height) = stream.dimensions();
        info!(%uri, %facing, width, height, backend = ?self.backend, "capture session opened");
        Ok(Box::new(stream))
    }
}

#[cfg(feature = "opencv")]
fn spawn_opencv(
    uri: &str,
    facing: FacingMode,
    size: (i32, i32),
) -> Result<ChannelStream, CaptureError> {
    spawn_camera_reader(uri, facing, size)
}

#[cfg(not(feature = "opencv"))]
fn spawn_opencv(
    uri: &str,
    _facing: FacingMode,
    _size: (i32, i32),
) -> Result<ChannelStream, CaptureError> {
    Err(CaptureError::Other(anyhow::anyhow!(
        "cannot open {uri}: built without the `opencv` feature"
    )))
}


#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crossbeam_channel::bounded;

    use super::*;

    fn frame(stamp: i64) -> Frame {
        Frame {
            data: vec![0; 2 * 2 * 3],
            width: 2,
            height: 2,
            timestamp_ms: stamp,
            format: FrameFormat::Bgr8,
        }
    }

    fn stream() -> (
        ChannelStream,
        crossbeam_channel::Sender<Result<Frame, CaptureError>>,
        Arc<AtomicBool>,
    ) {
        let (tx, rx) = bounded(4);
        let stop = Arc::new(AtomicBool::new(false));
        let stream = ChannelStream::new("test://cam".into(), (2, 2), rx, stop.clone());
        (stream, tx, stop)
    }

    #[test]
    fn current_frame_is_none_until_data_arrives() {
        let (mut stream, _tx, _stop) = stream();
        assert!(stream.current_frame().is_none());
    }

    #[test]
    fn current_frame_keeps_the_newest() {
        let (mut stream, tx, _stop) = stream();
        tx.send(Ok(frame(1))).unwrap();
        tx.send(Ok(frame(2))).unwrap();
        tx.send(Ok(frame(3))).unwrap();
        assert_eq!(stream.current_frame().map(|f| f.timestamp_ms), Some(3));
        // No new data: the last frame stays current.
        assert_eq!(stream.current_frame().map(|f| f.timestamp_ms), Some(3));
    }

    #[test]
    fn reader_failure_keeps_last_frame_and_detaches() {
        let (mut stream, tx, _stop) = stream();
        tx.send(Ok(frame(7))).unwrap();
        tx.send(Err(CaptureError::Open { uri: "x".into() })).unwrap();
        assert_eq!(stream.current_frame().map(|f| f.timestamp_ms), Some(7));
        assert!(stream.rx.is_none());
    }

    #[test]
    fn stop_signals_reader_and_drops_frames() {
        let (mut stream, tx, stop) = stream();
        tx.send(Ok(frame(1))).unwrap();
        stream.stop();
        assert!(stop.load(Ordering::SeqCst));
        assert!(stream.current_frame().is_none());
        assert!(tx.send(Ok(frame(2))).is_err());
    }

    #[test]
    fn stop_joins_the_reader_before_returning() {
        let (tx, rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));
        let reader_exited = exited.clone();
        // Parks on the full channel until the receiver goes away.
        let reader = spawn_reader("test-reader", move || {
            let mut stamp = 0;
            while tx.send(Ok(frame(stamp))).is_ok() {
                stamp += 1;
            }
            reader_exited.store(true, Ordering::SeqCst);
        })
        .unwrap();
        let mut stream =
            ChannelStream::new("test://cam".into(), (2, 2), rx, stop).with_reader(reader);
        stream.wait_for_first_frame(Duration::from_secs(1)).unwrap();

        stream.stop();
        assert!(exited.load(Ordering::SeqCst));
        // Second stop has nothing left to join.
        stream.stop();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn stop_kills_and_reaps_the_child_process() {
        let child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .unwrap();
        let proc_dir = std::path::PathBuf::from(format!("/proc/{}", child.id()));
        let shared: SharedChild = Arc::new(Mutex::new(Some(child)));
        let (_tx, rx) = bounded(1);
        let mut stream = ChannelStream::new(
            "test://cam".into(),
            (2, 2),
            rx,
            Arc::new(AtomicBool::new(false)),
        )
        .with_child(shared.clone());

        let started = Instant::now();
        stream.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(shared.lock().unwrap().is_none());
        assert!(!proc_dir.exists());
    }

    #[test]
    fn dropping_a_stream_releases_the_child() {
        let (_tx, rx) = bounded::<Result<Frame, CaptureError>>(1);
        let shared: SharedChild = Arc::new(Mutex::new(None));
        let stream = ChannelStream::new(
            "test://cam".into(),
            (2, 2),
            rx,
            Arc::new(AtomicBool::new(false)),
        )
        .with_child(shared.clone());
        drop(stream);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[test]
    fn reader_threads_inherit_the_dispatcher() {
        let dispatch = tracing::Dispatch::new(tracing_subscriber::registry());
        let inherited = tracing::dispatcher::with_default(&dispatch, || {
            spawn_reader("test-reader", || {
                tracing::dispatcher::get_default(|current| {
                    current.is::<tracing_subscriber::Registry>()
                })
            })
            .unwrap()
            .join()
            .unwrap()
        });
        assert!(inherited);
    }

    #[test]
    fn first_frame_sets_dimensions() {
        let (tx, rx) = bounded(1);
        let mut stream = ChannelStream::new(
            "test://cam".into(),
            (1280, 720),
            rx,
            Arc::new(AtomicBool::new(false)),
        );
        tx.send(Ok(frame(1))).unwrap();
        stream.wait_for_first_frame(Duration::from_millis(100)).unwrap();
        assert_eq!(stream.dimensions(), (2, 2));
    }

    #[test]
    fn silent_source_times_out() {
        let (mut stream, _tx, _stop) = stream();
        let err = stream
            .wait_for_first_frame(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, CaptureError::NoSignal { waited_ms: 10, .. }));
    }

    #[test]
    fn closed_source_reports_open_failure() {
        let (mut stream, tx, _stop) = stream();
        drop(tx);
        let err = stream
            .wait_for_first_frame(Duration::from_millis(10))
            .unwrap_err();
        assert!(matches!(err, CaptureError::Open { .. }));
    }

    #[test]
    fn missing_device_is_reported_per_facing_mode() {
        let devices = DeviceMap {
            environment: "/dev/video250".into(),
            user: "/dev/video251".into(),
        };
        let mut camera = DeviceCamera::new(CaptureBackend::Ffmpeg, devices)
            .with_first_frame_timeout(Duration::from_millis(200));
        let constraints = CaptureConstraints::new(1280, 720, FacingMode::User);
        let err = camera.acquire(&constraints).err().unwrap();
        match err {
            CaptureError::NoDevice { facing, uri } => {
                assert_eq!(facing, FacingMode::User);
                assert_eq!(uri, "/dev/video251");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
