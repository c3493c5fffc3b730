use anyhow::{bail, Context, Result};
use opencv::{
    core::{Mat, Size},
    highgui, imgproc,
    prelude::*,
    videoio,
};

use crate::pipeline::{Display, FrameSource};

pub const FRAME_WIDTH: i32 = 640;
pub const FRAME_HEIGHT: i32 = 400;

#[derive(Clone, Debug, PartialEq)]
pub enum VideoSource {
    File(String),
    Camera(i32),
}

impl std::fmt::Display for VideoSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VideoSource::File(path) => f.write_str(path),
            VideoSource::Camera(index) => write!(f, "camera {}", index),
        }
    }
}

/// Owns an open capture handle and releases it when dropped.
pub struct Capture {
    inner: videoio::VideoCapture,
}

impl Capture {
    pub fn open(source: &VideoSource) -> Result<Self> {
        let inner = match source {
            VideoSource::File(path) => videoio::VideoCapture::from_file(path, videoio::CAP_ANY),
            VideoSource::Camera(index) => videoio::VideoCapture::new(*index, videoio::CAP_ANY),
        }
        .with_context(|| format!("Failed to open input source: {}", source))?;
        if !inner.is_opened()? {
            bail!("Failed to open input source: {}", source);
        }
        tracing::info!("Opened input source: {}", source);
        Ok(Self { inner })
    }
}

impl FrameSource for Capture {
    fn next_frame(&mut self) -> Result<Option<Mat>> {
        let mut frame = Mat::default();
        if !self.inner.read(&mut frame)? || frame.empty() {
            return Ok(None);
        }
        Ok(Some(frame))
    }
}

impl Drop for Capture {
    fn drop(&mut self) {
        if let Err(err) = self.inner.release() {
            tracing::warn!("Failed to release capture: {}", err);
        }
    }
}

/// Stretch a frame to 640x400; aspect ratio is not kept.
pub fn resize_frame(frame: &Mat) -> Result<Mat> {
    let mut resized = Mat::default();
    imgproc::resize(
        frame,
        &mut resized,
        Size::new(FRAME_WIDTH, FRAME_HEIGHT),
        0.0,
        0.0,
        imgproc::INTER_LINEAR,
    )
    .context("Failed to resize frame")?;
    Ok(resized)
}

const QUIT_KEY: i32 = b'q' as i32;

/// A named highgui window; all windows are destroyed on drop.
pub struct Window {
    name: String,
}

impl Window {
    pub fn open(name: &str) -> Result<Self> {
        highgui::named_window(name, highgui::WINDOW_AUTOSIZE)?;
        Ok(Self {
            name: name.to_string(),
        })
    }
}

impl Display for Window {
    fn show(&mut self, frame: &Mat) -> Result<bool> {
        highgui::imshow(&self.name, frame)?;
        let key = highgui::wait_key(1)?;
        Ok(is_quit_key(key))
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        if let Err(err) = highgui::destroy_all_windows() {
            tracing::warn!("Failed to close display windows: {}", err);
        }
    }
}

pub struct Headless;

impl Display for Headless {
    fn show(&mut self, _frame: &Mat) -> Result<bool> {
        Ok(false)
    }
}

/// Open a window, or fall back to headless when there is no display.
pub fn open_display(name: &str, headless: bool) -> Box<dyn Display> {
    if headless {
        return Box::new(Headless);
    }
    match Window::open(name) {
        Ok(window) => Box::new(window),
        Err(err) => {
            tracing::warn!("Failed to open display window: {}. Running headless.", err);
            Box::new(Headless)
        }
    }
}

fn is_quit_key(key: i32) -> bool {
    key >= 0 && (key & 0xFF) == QUIT_KEY
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencv::core::{Scalar, CV_8UC3};

    #[test]
    fn resize_ignores_aspect_ratio() {
        let frame =
            Mat::new_rows_cols_with_default(1080, 1920, CV_8UC3, Scalar::all(0.0)).unwrap();
        let resized = resize_frame(&frame).unwrap();
        assert_eq!(resized.cols(), FRAME_WIDTH);
        assert_eq!(resized.rows(), FRAME_HEIGHT);

        let square = Mat::new_rows_cols_with_default(50, 50, CV_8UC3, Scalar::all(0.0)).unwrap();
        let resized = resize_frame(&square).unwrap();
        assert_eq!((resized.cols(), resized.rows()), (FRAME_WIDTH, FRAME_HEIGHT));
    }

    #[test]
    fn missing_file_fails_to_open() {
        let source = VideoSource::File("/nonexistent/clip.mp4".to_string());
        assert!(Capture::open(&source).is_err());
    }

    #[test]
    fn source_display() {
        assert_eq!(VideoSource::Camera(0).to_string(), "camera 0");
        assert_eq!(VideoSource::File("a.mp4".into()).to_string(), "a.mp4");
    }

    #[test]
    fn only_q_quits() {
        assert!(is_quit_key(113));
        assert!(is_quit_key(0x100 | 113));
        assert!(!is_quit_key(-1));
        assert!(!is_quit_key(27));
        assert!(!is_quit_key(b'Q' as i32));
    }

    #[test]
    fn headless_never_quits() {
        let frame = Mat::default();
        assert!(!Headless.show(&frame).unwrap());
        assert!(!open_display("unused", true).show(&frame).unwrap());
    }
}
