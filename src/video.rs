//! Video input consumed as a luma control texture by the simulation.
//!
//! Frames come from an image sequence on disk standing in for a live
//! camera feed. Acquisition failure is recoverable by design: the
//! simulation keeps running against a blank (zero) frame rather than
//! blocking or crashing.

use std::path::Path;

use anyhow::Context;
use image::imageops::FilterType;

/// Cycling frame source, resampled to the logical resolution at load time
pub struct VideoInput {
    frames: Vec<Vec<u8>>,
    cursor: usize,
    size: u32,
}

impl VideoInput {
    /// Acquire a video source, degrading to `None` (blank input) on any
    /// failure. Never propagates an error into the frame loop.
    pub fn acquire(path: Option<&Path>, size: u32) -> Option<Self> {
        let dir = match path {
            Some(dir) => dir,
            None => {
                log::info!("No video source configured; luma input starts blank");
                return None;
            }
        };
        match Self::load_sequence(dir, size) {
            Ok(input) if !input.frames.is_empty() => {
                log::info!(
                    "Video: {} frames from {}",
                    input.frames.len(),
                    dir.display()
                );
                Some(input)
            }
            Ok(_) => {
                log::warn!("Video directory {} holds no frames", dir.display());
                None
            }
            Err(e) => {
                log::warn!("Video acquisition failed ({e:#}); continuing with blank frame");
                None
            }
        }
    }

    fn load_sequence(dir: &Path, size: u32) -> anyhow::Result<Self> {
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read video directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("png" | "jpg" | "jpeg" | "bmp")
                )
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            let image = image::open(&path)
                .with_context(|| format!("Failed to decode {}", path.display()))?;
            let resized = image.resize_exact(size, size, FilterType::Triangle);
            frames.push(resized.to_rgba8().into_raw());
        }
        Ok(Self {
            frames,
            cursor: 0,
            size,
        })
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Next frame in the cycle; RGBA, `size * size * 4` bytes
    pub fn next_frame(&mut self) -> &[u8] {
        let frame = &self.frames[self.cursor];
        self.cursor = (self.cursor + 1) % self.frames.len();
        frame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory_degrades_to_none() {
        let input = VideoInput::acquire(Some(Path::new("/nonexistent/lumafield-video")), 64);
        assert!(input.is_none());
    }

    #[test]
    fn test_unconfigured_source_is_none() {
        assert!(VideoInput::acquire(None, 64).is_none());
    }
}
