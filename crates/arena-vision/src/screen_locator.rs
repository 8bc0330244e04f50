use anyhow::{Context, Result};
use arena_capture::PixelRect;
use image::{GrayImage, RgbaImage};
use imageproc::template_matching::{find_extremes, match_template, MatchTemplateMethod};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Position of the three card-art windows relative to the matched anchor,
/// in reference-resolution pixels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlotLayout {
    pub offsets: [(i32, i32); 3],
    pub size: (u32, u32),
}

impl Default for SlotLayout {
    fn default() -> Self {
        Self {
            offsets: [(-344, 180), (-20, 180), (304, 180)],
            size: (150, 100),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocatorConfig {
    /// Minimum anchor similarity (1 - normalized squared error) to count as found
    pub similarity_floor: f64,
    /// Both screen and template are shrunk by this factor before matching
    pub downscale: u32,
    /// Screen height the template and layout were authored for
    pub reference_height: u32,
    /// Template scales tried, relative to `screen height / reference_height`
    pub scale_candidates: Vec<f64>,
    pub layout: SlotLayout,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            similarity_floor: 0.6,
            downscale: 4,
            reference_height: 1080,
            scale_candidates: vec![1.0],
            layout: SlotLayout::default(),
        }
    }
}

/// Where the three draft slots are on screen
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    /// Index of the display surface the draft was found on
    pub screen_index: usize,
    pub rects: [PixelRect; 3],
    /// Screen pixels per reference pixel
    pub scale: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy)]
struct AnchorMatch {
    x: u32,
    y: u32,
    scale: f64,
    score: f64,
}

/// Finds the draft screen by template-matching a piece of its chrome
pub struct ScreenLocator {
    template: GrayImage,
    config: LocatorConfig,
}

impl ScreenLocator {
    pub fn new(template: GrayImage, config: LocatorConfig) -> Self {
        Self { template, config }
    }

    /// Load the anchor template image from disk
    pub fn load(path: &Path, config: LocatorConfig) -> Result<Self> {
        let template = image::open(path)
            .with_context(|| format!("Failed to open template {}", path.display()))?
            .to_luma8();
        Ok(Self::new(template, config))
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Search every display surface and return the slot geometry of the best
    /// anchor match above the similarity floor.
    ///
    /// Full-frame matching is expensive; callers run this off the control thread.
    pub fn locate(&self, screens: &[RgbaImage]) -> Option<ScreenGeometry> {
        let mut best: Option<ScreenGeometry> = None;

        for (screen_index, screen) in screens.iter().enumerate() {
            if screen.width() == 0 || screen.height() == 0 {
                continue;
            }
            let Some(anchor) = self.match_anchor(screen) else {
                debug!("Screen {}: no anchor candidate", screen_index);
                continue;
            };
            debug!(
                "Screen {}: anchor at ({}, {}) scale {:.2} score {:.3}",
                screen_index, anchor.x, anchor.y, anchor.scale, anchor.score
            );
            if anchor.score < self.config.similarity_floor {
                continue;
            }
            let Some(rects) = self.slot_rects(&anchor, screen.width(), screen.height()) else {
                debug!("Screen {}: slots fall outside the screen", screen_index);
                continue;
            };
            if best.as_ref().map_or(true, |b| anchor.score > b.confidence) {
                best = Some(ScreenGeometry {
                    screen_index,
                    rects,
                    scale: anchor.scale,
                    confidence: anchor.score,
                });
            }
        }

        best
    }

    /// Best anchor position on one screen across the configured scales
    fn match_anchor(&self, screen: &RgbaImage) -> Option<AnchorMatch> {
        let d = self.config.downscale.max(1);
        let gray = image::imageops::grayscale(screen);
        let small = if d > 1 {
            image::imageops::resize(
                &gray,
                (gray.width() / d).max(1),
                (gray.height() / d).max(1),
                image::imageops::FilterType::Triangle,
            )
        } else {
            gray
        };

        let base_scale = screen.height() as f64 / self.config.reference_height.max(1) as f64;
        let mut best: Option<AnchorMatch> = None;

        for &relative in &self.config.scale_candidates {
            let scale = base_scale * relative;
            let tw = (self.template.width() as f64 * scale / d as f64).round() as u32;
            let th = (self.template.height() as f64 * scale / d as f64).round() as u32;
            if tw < 4 || th < 4 || tw > small.width() || th > small.height() {
                continue;
            }
            let tmpl = if (tw, th) == self.template.dimensions() {
                self.template.clone()
            } else {
                image::imageops::resize(
                    &self.template,
                    tw,
                    th,
                    image::imageops::FilterType::Triangle,
                )
            };

            if let Some((x, y, score)) = best_match(&small, &tmpl) {
                if best.map_or(true, |b| score > b.score) {
                    best = Some(AnchorMatch {
                        x: x * d,
                        y: y * d,
                        scale,
                        score,
                    });
                }
            }
        }

        best
    }

    fn slot_rects(&self, anchor: &AnchorMatch, w: u32, h: u32) -> Option<[PixelRect; 3]> {
        let layout = &self.config.layout;
        let rw = (layout.size.0 as f64 * anchor.scale).round() as u32;
        let rh = (layout.size.1 as f64 * anchor.scale).round() as u32;

        let mut rects = [PixelRect::new(0, 0, 0, 0); 3];
        for (rect, (dx, dy)) in rects.iter_mut().zip(layout.offsets.iter()) {
            let x = anchor.x as f64 + *dx as f64 * anchor.scale;
            let y = anchor.y as f64 + *dy as f64 * anchor.scale;
            if x < 0.0 || y < 0.0 {
                return None;
            }
            *rect = PixelRect::new(x.round() as u32, y.round() as u32, rw, rh);
            if !rect.fits(w, h) {
                return None;
            }
        }
        Some(rects)
    }
}

/// Slide `tmpl` over `img` and return the top-left and similarity of the best
/// placement. Similarity is `1 - normalized squared error`, so an exact match
/// scores 1 and flat or unrelated windows fall to 0 or below.
fn best_match(img: &GrayImage, tmpl: &GrayImage) -> Option<(u32, u32, f64)> {
    let (tw, th) = tmpl.dimensions();
    if tw == 0 || th == 0 || tw > img.width() || th > img.height() {
        return None;
    }
    let raw = tmpl.as_raw();
    if raw.iter().all(|&v| v == raw[0]) {
        return None;
    }

    let errors = match_template(
        img,
        tmpl,
        MatchTemplateMethod::SumOfSquaredErrorsNormalized,
    );
    let extremes = find_extremes(&errors);
    if !extremes.min_value.is_finite() {
        return None;
    }
    let (x, y) = extremes.min_value_location;
    Some((x, y, 1.0 - extremes.min_value as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Blocky high-contrast anchor pattern, 2x2 blocks so it survives downscaling
    fn anchor_template(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            image::Luma([(((x / 2) * 3 + (y / 2) * 7) % 5 * 50) as u8])
        })
    }

    fn screen_with_anchor(w: u32, h: u32, tmpl: &GrayImage, at: (u32, u32)) -> RgbaImage {
        let mut screen = RgbaImage::from_pixel(w, h, image::Rgba([40, 40, 40, 255]));
        for (x, y, p) in tmpl.enumerate_pixels() {
            let v = p[0];
            screen.put_pixel(at.0 + x, at.1 + y, image::Rgba([v, v, v, 255]));
        }
        screen
    }

    fn test_config(reference_height: u32, downscale: u32) -> LocatorConfig {
        LocatorConfig {
            similarity_floor: 0.6,
            downscale,
            reference_height,
            scale_candidates: vec![1.0],
            layout: SlotLayout {
                offsets: [(-60, 30), (-10, 30), (40, 30)],
                size: (30, 40),
            },
        }
    }

    #[test]
    fn test_match_exact_position() {
        let tmpl = anchor_template(16, 8);
        let screen = screen_with_anchor(200, 120, &tmpl, (90, 20));
        let gray = image::imageops::grayscale(&screen);
        let (x, y, score) = best_match(&gray, &tmpl).unwrap();
        assert_eq!((x, y), (90, 20));
        assert!((score - 1.0).abs() < 1e-6, "score {}", score);
    }

    #[test]
    fn test_locate_derives_slot_rects() {
        let tmpl = anchor_template(16, 8);
        let screen = screen_with_anchor(200, 120, &tmpl, (90, 20));
        let locator = ScreenLocator::new(tmpl, test_config(120, 1));

        let geometry = locator.locate(&[screen]).expect("anchor should be found");
        assert_eq!(geometry.screen_index, 0);
        assert_eq!(geometry.scale, 1.0);
        assert_eq!(
            geometry.rects,
            [
                PixelRect::new(30, 50, 30, 40),
                PixelRect::new(80, 50, 30, 40),
                PixelRect::new(130, 50, 30, 40),
            ]
        );
    }

    #[test]
    fn test_locate_picks_the_right_monitor() {
        let tmpl = anchor_template(16, 8);
        let blank = RgbaImage::from_pixel(200, 120, image::Rgba([40, 40, 40, 255]));
        let screen = screen_with_anchor(200, 120, &tmpl, (90, 20));
        let locator = ScreenLocator::new(tmpl, test_config(120, 1));

        let geometry = locator
            .locate(&[blank, RgbaImage::new(0, 0), screen])
            .expect("anchor should be found");
        assert_eq!(geometry.screen_index, 2);
    }

    #[test]
    fn test_locate_with_downscale() {
        let tmpl = anchor_template(32, 16);
        let screen = screen_with_anchor(400, 240, &tmpl, (180, 40));
        let mut config = test_config(240, 2);
        config.layout.offsets = [(-120, 60), (-20, 60), (80, 60)];
        let locator = ScreenLocator::new(tmpl, config);

        let geometry = locator.locate(&[screen]).expect("anchor should be found");
        let first = geometry.rects[0];
        assert!((first.x as i64 - 60).abs() <= 2, "x {}", first.x);
        assert!((first.y as i64 - 100).abs() <= 2, "y {}", first.y);
        assert!(geometry.confidence >= 0.6);
    }

    #[test]
    fn test_flat_template_never_matches() {
        let flat = GrayImage::from_pixel(16, 8, image::Luma([40]));
        let gray = GrayImage::from_pixel(200, 120, image::Luma([40]));
        assert!(best_match(&gray, &flat).is_none());
    }

    #[test]
    fn test_flat_screen_scores_below_floor() {
        let tmpl = anchor_template(16, 8);
        let gray = GrayImage::from_pixel(200, 120, image::Luma([40]));
        let (_, _, score) = best_match(&gray, &tmpl).unwrap();
        assert!(score < 0.6, "score {}", score);
    }

    #[test]
    fn test_no_anchor_returns_none() {
        let tmpl = anchor_template(16, 8);
        let blank = RgbaImage::from_pixel(200, 120, image::Rgba([40, 40, 40, 255]));
        let locator = ScreenLocator::new(tmpl, test_config(120, 1));
        assert!(locator.locate(&[blank]).is_none());
    }

    #[test]
    fn test_slots_outside_screen_rejected() {
        let tmpl = anchor_template(16, 8);
        // Anchor near the left edge puts the first slot at negative x
        let screen = screen_with_anchor(200, 120, &tmpl, (10, 20));
        let locator = ScreenLocator::new(tmpl, test_config(120, 1));
        assert!(locator.locate(&[screen]).is_none());
    }
}
