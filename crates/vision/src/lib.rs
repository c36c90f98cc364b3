//! Live webcam detection client.
//!
//! Frames captured by [`video_ingest`] are shipped to a remote `/process`
//! endpoint, and the annotated image it returns is composited onto a render
//! surface together with a list of detected object counts. See [`client`].

pub mod client;
