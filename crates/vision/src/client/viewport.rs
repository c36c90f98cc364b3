use crate::client::error::ClientError;

/// Window the preview is presented in.
pub trait Viewport: Send {
    fn is_fullscreen(&self) -> bool;
    fn request_fullscreen(&mut self) -> Result<(), ClientError>;
    fn exit_fullscreen(&mut self) -> Result<(), ClientError>;
}

/// Viewport of the browser-hosted control page. The page applies the mode
/// itself after reading the published icon, so only the state is kept here.
#[derive(Debug, Default)]
pub struct PageViewport {
    fullscreen: bool,
}

impl Viewport for PageViewport {
    fn is_fullscreen(&self) -> bool {
        self.fullscreen
    }

    fn request_fullscreen(&mut self) -> Result<(), ClientError> {
        if self.fullscreen {
            return Err(ClientError::Fullscreen("already in full-screen mode".into()));
        }
        self.fullscreen = true;
        Ok(())
    }

    fn exit_fullscreen(&mut self) -> Result<(), ClientError> {
        if !self.fullscreen {
            return Err(ClientError::Fullscreen("not in full-screen mode".into()));
        }
        self.fullscreen = false;
        Ok(())
    }
}
