use image::RgbaImage;

/// Hue bins of the color signature
pub const HUE_BINS: usize = 50;
/// Saturation bins of the color signature
pub const SAT_BINS: usize = 60;

/// Approximate number of pixels sampled per image
const SAMPLE_BUDGET: u64 = 6400;

/// Pixels more transparent than this are ignored (card render borders)
const MIN_ALPHA: u8 = 16;

/// Hue/saturation histogram of an image.
///
/// Counts are kept unnormalized so that comparing a signature with itself is exact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    counts: Vec<u32>,
    total: u64,
}

impl Signature {
    /// Build the hue/saturation histogram of an image.
    /// Large images are sampled on a regular grid instead of visiting every pixel.
    pub fn from_image(img: &RgbaImage) -> Self {
        let mut counts = vec![0u32; HUE_BINS * SAT_BINS];
        let mut total = 0u64;

        let (w, h) = img.dimensions();
        let area = w as u64 * h as u64;
        let step = if area > SAMPLE_BUDGET {
            ((area as f64 / SAMPLE_BUDGET as f64).sqrt().floor() as u32).max(1)
        } else {
            1
        };

        let mut y = 0;
        while y < h {
            let mut x = 0;
            while x < w {
                let px = img.get_pixel(x, y);
                if px[3] >= MIN_ALPHA {
                    let (hue, sat) = hue_saturation(px[0], px[1], px[2]);
                    let hb = ((hue / 360.0 * HUE_BINS as f64) as usize).min(HUE_BINS - 1);
                    let sb = ((sat * SAT_BINS as f64) as usize).min(SAT_BINS - 1);
                    counts[hb * SAT_BINS + sb] += 1;
                    total += 1;
                }
                x += step;
            }
            y += step;
        }

        Self { counts, total }
    }

    /// Number of sampled pixels
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Bhattacharyya distance between two signatures.
    ///
    /// Always in [0, 1], symmetric, and exactly 0 for identical signatures.
    /// An empty signature is at distance 1 from anything non-empty.
    pub fn distance(&self, other: &Signature) -> f64 {
        match (self.is_empty(), other.is_empty()) {
            (true, true) => return 0.0,
            (true, false) | (false, true) => return 1.0,
            _ => {}
        }

        let overlap: f64 = self
            .counts
            .iter()
            .zip(other.counts.iter())
            .filter(|(a, b)| **a > 0 && **b > 0)
            .map(|(a, b)| (*a as f64 * *b as f64).sqrt())
            .sum();
        let norm = (self.total as f64 * other.total as f64).sqrt();
        let coefficient = (overlap / norm).clamp(0.0, 1.0);

        (1.0 - coefficient).sqrt().clamp(0.0, 1.0)
    }
}

/// RGB to (hue in degrees [0, 360), saturation [0, 1])
fn hue_saturation(r: u8, g: u8, b: u8) -> (f64, f64) {
    let r = r as f64 / 255.0;
    let g = g as f64 / 255.0;
    let b = b as f64 / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let sat = if max > 0.0 { delta / max } else { 0.0 };
    if delta <= f64::EPSILON {
        return (0.0, sat);
    }

    let hue = if max == r {
        60.0 * ((g - b) / delta).rem_euclid(6.0)
    } else if max == g {
        60.0 * ((b - r) / delta + 2.0)
    } else {
        60.0 * ((r - g) / delta + 4.0)
    };
    (hue.rem_euclid(360.0), sat)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(seed: u32) -> RgbaImage {
        RgbaImage::from_fn(64, 48, |x, y| {
            let v = x.wrapping_mul(31 + seed).wrapping_add(y.wrapping_mul(17 + seed * 3));
            image::Rgba([(v % 251) as u8, (v / 3 % 241) as u8, (v / 7 % 239) as u8, 255])
        })
    }

    #[test]
    fn test_distance_to_self_is_zero() {
        for seed in 0..5 {
            let sig = Signature::from_image(&pattern(seed));
            assert_eq!(sig.distance(&sig), 0.0);
        }
    }

    #[test]
    fn test_distance_symmetric_and_bounded() {
        let sigs: Vec<Signature> = (0..6).map(|s| Signature::from_image(&pattern(s))).collect();
        for a in &sigs {
            for b in &sigs {
                let d = a.distance(b);
                assert!((0.0..=1.0).contains(&d), "distance out of range: {}", d);
                assert_eq!(d, b.distance(a));
            }
        }
    }

    #[test]
    fn test_disjoint_colors_are_far() {
        let red = Signature::from_image(&RgbaImage::from_pixel(20, 20, image::Rgba([220, 10, 10, 255])));
        let blue = Signature::from_image(&RgbaImage::from_pixel(20, 20, image::Rgba([10, 10, 220, 255])));
        assert_eq!(red.distance(&blue), 1.0);
    }

    #[test]
    fn test_half_overlap() {
        let red = image::Rgba([220, 10, 10, 255]);
        let blue = image::Rgba([10, 10, 220, 255]);
        let half = RgbaImage::from_fn(20, 20, |x, _| if x < 10 { red } else { blue });
        let all_red = RgbaImage::from_pixel(20, 20, red);
        let d = Signature::from_image(&half).distance(&Signature::from_image(&all_red));
        // BC = sqrt(0.5), distance = sqrt(1 - sqrt(0.5))
        assert!((d - (1.0 - 0.5f64.sqrt()).sqrt()).abs() < 1e-9, "got {}", d);
    }

    #[test]
    fn test_transparent_pixels_ignored() {
        let img = RgbaImage::from_pixel(10, 10, image::Rgba([200, 0, 0, 0]));
        let sig = Signature::from_image(&img);
        assert!(sig.is_empty());
        assert_eq!(sig.distance(&sig), 0.0);
        let red = Signature::from_image(&RgbaImage::from_pixel(10, 10, image::Rgba([200, 0, 0, 255])));
        assert_eq!(sig.distance(&red), 1.0);
    }

    #[test]
    fn test_large_image_is_sampled() {
        let img = RgbaImage::from_pixel(800, 600, image::Rgba([0, 128, 0, 255]));
        let sig = Signature::from_image(&img);
        assert!(sig.total() <= 2 * SAMPLE_BUDGET);
        assert!(sig.total() >= SAMPLE_BUDGET / 2);
    }

    #[test]
    fn test_hue_saturation() {
        assert_eq!(hue_saturation(255, 0, 0), (0.0, 1.0));
        let (h, s) = hue_saturation(0, 255, 0);
        assert!((h - 120.0).abs() < 1e-9 && (s - 1.0).abs() < 1e-9);
        assert_eq!(hue_saturation(128, 128, 128), (0.0, 0.0));
    }
}
