use anyhow::{Context, Result};
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use xcap::Monitor;

/// Normalized region (0.0-1.0 coordinates relative to an image)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Absolute pixel rectangle within a screenshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle lies entirely inside a `w`x`h` image
    pub fn fits(&self, w: u32, h: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x.saturating_add(self.width) <= w
            && self.y.saturating_add(self.height) <= h
    }
}

/// Well-known regions of a rendered card image
pub mod regions {
    use super::ScreenRegion;

    /// Art window of a full card render (200x303 reference image).
    /// Screen slots are located on the same window, so both sides hash the same pixels.
    pub fn card_art() -> ScreenRegion {
        ScreenRegion {
            x: 0.300,
            y: 0.234,
            width: 0.400,
            height: 0.264,
        }
    }
}

/// Crop a region from a captured frame using normalized coordinates
pub fn crop_region(frame: &RgbaImage, region: &ScreenRegion) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());
    let x = (region.x * w as f64) as u32;
    let y = (region.y * h as f64) as u32;
    let rw = (region.width * w as f64) as u32;
    let rh = (region.height * h as f64) as u32;

    // Clamp to image bounds
    let x = x.min(w.saturating_sub(1));
    let y = y.min(h.saturating_sub(1));
    let rw = rw.min(w.saturating_sub(x));
    let rh = rh.min(h.saturating_sub(y));

    image::imageops::crop_imm(frame, x, y, rw, rh).to_image()
}

/// Crop an absolute pixel rectangle, clamped to the frame
pub fn crop_rect(frame: &RgbaImage, rect: &PixelRect) -> RgbaImage {
    let (w, h) = (frame.width(), frame.height());
    let x = rect.x.min(w.saturating_sub(1));
    let y = rect.y.min(h.saturating_sub(1));
    let rw = rect.width.min(w.saturating_sub(x));
    let rh = rect.height.min(h.saturating_sub(y));

    image::imageops::crop_imm(frame, x, y, rw, rh).to_image()
}

/// Source of full-screen screenshots, one per display surface
pub trait ScreenSource: Send + Sync {
    /// Capture every display surface, in a stable order
    fn capture_all(&self) -> Result<Vec<RgbaImage>>;

    /// Capture a single display surface by its index in `capture_all` order
    fn capture(&self, index: usize) -> Result<RgbaImage>;
}

/// Screenshots taken from the physical monitors
#[derive(Debug, Default, Clone, Copy)]
pub struct MonitorCapture;

impl ScreenSource for MonitorCapture {
    fn capture_all(&self) -> Result<Vec<RgbaImage>> {
        let monitors = Monitor::all().context("Failed to enumerate monitors")?;
        let mut frames = Vec::with_capacity(monitors.len());
        for (i, monitor) in monitors.iter().enumerate() {
            match monitor.capture_image() {
                Ok(img) => frames.push(img),
                Err(e) => {
                    // Keep indices aligned with the monitor list
                    warn!("Failed to capture monitor {}: {}", i, e);
                    frames.push(RgbaImage::new(0, 0));
                }
            }
        }
        debug!("Captured {} monitor(s)", frames.len());
        Ok(frames)
    }

    fn capture(&self, index: usize) -> Result<RgbaImage> {
        let monitors = Monitor::all().context("Failed to enumerate monitors")?;
        let monitor = monitors
            .get(index)
            .with_context(|| format!("Monitor {} not present", index))?;
        monitor
            .capture_image()
            .with_context(|| format!("Failed to capture monitor {}", index))
    }
}

/// Description of a connected monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorInfo {
    pub index: usize,
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub is_primary: bool,
}

/// List connected monitors in capture order
pub fn list_monitors() -> Result<Vec<MonitorInfo>> {
    let monitors = Monitor::all().context("Failed to enumerate monitors")?;
    Ok(monitors
        .iter()
        .enumerate()
        .map(|(index, m)| MonitorInfo {
            index,
            name: m.name().unwrap_or_default(),
            width: m.width().unwrap_or_default(),
            height: m.height().unwrap_or_default(),
            is_primary: m.is_primary().unwrap_or(false),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_card_art_region_inside_card() {
        let region = regions::card_art();
        assert!(region.x >= 0.0 && region.x + region.width <= 1.0);
        assert!(region.y >= 0.0 && region.y + region.height <= 1.0);
    }

    #[test]
    fn test_crop_region() {
        let img = RgbaImage::new(1920, 1080);
        let region = ScreenRegion {
            x: 0.5,
            y: 0.5,
            width: 0.1,
            height: 0.1,
        };
        let cropped = crop_region(&img, &region);
        assert_eq!(cropped.width(), 192);
        assert_eq!(cropped.height(), 108);
    }

    #[test]
    fn test_crop_rect_clamps_to_frame() {
        let img = RgbaImage::new(100, 50);
        let cropped = crop_rect(&img, &PixelRect::new(90, 40, 30, 30));
        assert_eq!(cropped.dimensions(), (10, 10));
        assert!(!PixelRect::new(90, 40, 30, 30).fits(100, 50));
        assert!(PixelRect::new(10, 10, 30, 30).fits(100, 50));
    }
}
