// Frame sources for the tester: still images from disk, and (with the `camera`
// feature) a live OpenCV capture device.

use anyhow::{Context, Result};
use marker_tutor::{Frame, FrameSource, FrameSourceError};
use std::path::{Path, PathBuf};

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "bmp", "tif"];

/// Plays back a directory of images in file name order, one per cycle.
pub struct DirectorySource {
    paths: Vec<PathBuf>,
    position: usize,
    repeat: bool,
    next_id: u64,
}

impl DirectorySource {
    pub fn open(dir: &Path, repeat: bool) -> Result<Self> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("reading {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();
        if paths.is_empty() {
            anyhow::bail!("no images found in {}", dir.display());
        }
        Ok(Self {
            paths,
            position: 0,
            repeat,
            next_id: 0,
        })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }
}

impl FrameSource for DirectorySource {
    fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
        if self.position == self.paths.len() {
            if !self.repeat {
                return Err(FrameSourceError::Disconnected(
                    "no more images in directory".to_string(),
                ));
            }
            self.position = 0;
        }
        let path = &self.paths[self.position];
        self.position += 1;
        self.next_id += 1;
        let image = image::open(path)
            .map_err(|error| FrameSourceError::Decode(format!("{}: {error}", path.display())))?;
        Ok(Some(Frame::from_image(&image).with_id(self.next_id)))
    }
}

#[cfg(feature = "camera")]
pub use camera::{CameraSource, aruco_6x6_250_codes};

#[cfg(feature = "camera")]
mod camera {
    use anyhow::Result;
    use marker_tutor::core_modules::dictionary::code_from_bytes;
    use marker_tutor::{Frame, FrameSource, FrameSourceError};
    use opencv::{
        core::{Mat, Vec4b},
        imgproc, objdetect,
        prelude::*,
        videoio::{self, VideoCapture},
    };

    /// The first `count` codes of OpenCV's DICT_6X6_250, the set the printed kit
    /// markers come from.
    pub fn aruco_6x6_250_codes(count: usize) -> Result<Vec<u64>> {
        let dictionary =
            objdetect::get_predefined_dictionary(objdetect::PredefinedDictionaryType::DICT_6X6_250)?;
        let table = dictionary.bytes_list();
        (0..count as i32)
            .map(|id| {
                // One row per marker, one channel per stored orientation.
                let row = table.at_row::<Vec4b>(id)?;
                let first: Vec<u8> = row.iter().map(|cell| cell.0[0]).collect();
                Ok(code_from_bytes(&first, 6))
            })
            .collect()
    }

    pub struct CameraSource {
        capture: VideoCapture,
        next_id: u64,
    }

    impl CameraSource {
        pub fn open(index: i32) -> Result<Self> {
            let capture = VideoCapture::new(index, videoio::CAP_ANY)?;
            if !capture.is_opened()? {
                anyhow::bail!("camera {index} could not be opened");
            }
            Ok(Self {
                capture,
                next_id: 0,
            })
        }
    }

    impl FrameSource for CameraSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, FrameSourceError> {
            let mut frame = Mat::default();
            match self.capture.read(&mut frame) {
                Ok(true) if !frame.empty() => {}
                Ok(_) => return Ok(None),
                Err(error) => return Err(FrameSourceError::Disconnected(error.to_string())),
            }

            // Convert the OpenCV Mat (BGR) to an RGBA buffer for the pipeline.
            let decode = |error: opencv::Error| FrameSourceError::Decode(error.to_string());
            let mut rgba = Mat::default();
            imgproc::cvt_color(&frame, &mut rgba, imgproc::COLOR_BGR2RGBA, 0).map_err(decode)?;
            let size = rgba.size().map_err(decode)?;
            let data = rgba.data_bytes().map_err(decode)?.to_vec();

            self.next_id += 1;
            Ok(Some(
                Frame::from_rgba(size.width as u32, size.height as u32, data)
                    .with_id(self.next_id),
            ))
        }
    }
}
