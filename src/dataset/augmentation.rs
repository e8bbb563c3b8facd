//! Training-time augmentation for coffee bean images
//!
//! Beans are photographed top-down on a tray, so the augmentations stay
//! mild: a horizontal flip, a small rotation and a lighting jitter.
//! Validation, test and serving never augment.
//!
//! Pipeline order: resize, flip, rotate, color jitter.

use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Rgb, RgbImage};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// Configuration for data augmentation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Maximum rotation angle in degrees; the angle is drawn from ±rotation_degrees
    pub rotation_degrees: f32,
    /// Brightness factor range, 1.0 ± brightness
    pub brightness: f32,
    /// Contrast factor range, 1.0 ± contrast
    pub contrast: f32,
    /// Saturation factor range, 1.0 ± saturation
    pub saturation: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self {
            horizontal_flip_prob: 0.3,
            rotation_degrees: 15.0,
            brightness: 0.2,
            contrast: 0.2,
            saturation: 0.0,
        }
    }
}

impl AugmentationConfig {
    /// Disable all augmentations
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            rotation_degrees: 0.0,
            brightness: 0.0,
            contrast: 0.0,
            saturation: 0.0,
        }
    }

    pub fn is_noop(&self) -> bool {
        *self == Self::none()
    }
}

#[derive(Clone, Copy, Debug)]
enum Jitter {
    Brightness(f32),
    Contrast(f32),
    Saturation(f32),
}

/// Image augmenter that applies random transformations
#[derive(Clone, Debug)]
pub struct Augmenter {
    config: AugmentationConfig,
    image_size: u32,
}

impl Augmenter {
    pub fn new(config: AugmentationConfig, image_size: u32) -> Self {
        Self { config, image_size }
    }

    pub fn with_defaults(image_size: u32) -> Self {
        Self::new(AugmentationConfig::default(), image_size)
    }

    pub fn no_augmentation(image_size: u32) -> Self {
        Self::new(AugmentationConfig::none(), image_size)
    }

    pub fn config(&self) -> &AugmentationConfig {
        &self.config
    }

    /// Apply the training pipeline to an image
    pub fn augment(&self, img: DynamicImage, rng: &mut ChaCha8Rng) -> DynamicImage {
        let mut result = self.resize(img);

        if self.config.horizontal_flip_prob > 0.0 && rng.gen::<f32>() < self.config.horizontal_flip_prob {
            result = result.fliph();
        }

        if self.config.rotation_degrees > 0.0 {
            let angle = rng.gen_range(-self.config.rotation_degrees..=self.config.rotation_degrees);
            result = rotate(&result, angle);
        }

        let mut jitters = Vec::with_capacity(3);
        if self.config.brightness > 0.0 {
            jitters.push(Jitter::Brightness(sample_factor(rng, self.config.brightness)));
        }
        if self.config.contrast > 0.0 {
            jitters.push(Jitter::Contrast(sample_factor(rng, self.config.contrast)));
        }
        if self.config.saturation > 0.0 {
            jitters.push(Jitter::Saturation(sample_factor(rng, self.config.saturation)));
        }
        jitters.shuffle(rng);

        for jitter in jitters {
            result = match jitter {
                Jitter::Brightness(f) => adjust_brightness(&result, f),
                Jitter::Contrast(f) => adjust_contrast(&result, f),
                Jitter::Saturation(f) => adjust_saturation(&result, f),
            };
        }

        result
    }

    /// Resize image to the target size (always applied, not random)
    pub fn resize(&self, img: DynamicImage) -> DynamicImage {
        if img.width() == self.image_size && img.height() == self.image_size {
            return img;
        }
        img.resize_exact(self.image_size, self.image_size, FilterType::Triangle)
    }
}

fn sample_factor(rng: &mut ChaCha8Rng, delta: f32) -> f32 {
    rng.gen_range((1.0 - delta).max(0.0)..=1.0 + delta)
}

/// Rotate around the image center with nearest-neighbour sampling; uncovered
/// corners are filled black
fn rotate(img: &DynamicImage, angle_degrees: f32) -> DynamicImage {
    let rgb = img.to_rgb8();
    if angle_degrees.abs() < f32::EPSILON {
        return DynamicImage::ImageRgb8(rgb);
    }

    let (width, height) = rgb.dimensions();
    let (sin_a, cos_a) = angle_degrees.to_radians().sin_cos();
    let cx = (width as f32 - 1.0) / 2.0;
    let cy = (height as f32 - 1.0) / 2.0;

    let output = ImageBuffer::from_fn(width, height, |x, y| {
        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        // counter-clockwise for positive angles
        let src_x = (cx + dx * cos_a - dy * sin_a).round();
        let src_y = (cy + dx * sin_a + dy * cos_a).round();

        if src_x < 0.0 || src_y < 0.0 || src_x >= width as f32 || src_y >= height as f32 {
            Rgb([0, 0, 0])
        } else {
            *rgb.get_pixel(src_x as u32, src_y as u32)
        }
    });

    DynamicImage::ImageRgb8(output)
}

fn blend(a: f32, b: f32, factor: f32) -> u8 {
    (factor * a + (1.0 - factor) * b).round().clamp(0.0, 255.0) as u8
}

fn gray(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

fn map_pixels(rgb: &RgbImage, f: impl Fn(&Rgb<u8>) -> Rgb<u8>) -> DynamicImage {
    let (width, height) = rgb.dimensions();
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| f(rgb.get_pixel(x, y))))
}

/// Scale every channel by `factor`
fn adjust_brightness(img: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = img.to_rgb8();
    map_pixels(&rgb, |p| Rgb([blend(p[0] as f32, 0.0, factor), blend(p[1] as f32, 0.0, factor), blend(p[2] as f32, 0.0, factor)]))
}

/// Blend with the mean grayscale level of the whole image
fn adjust_contrast(img: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = img.to_rgb8();
    let count = (rgb.width() as f64 * rgb.height() as f64).max(1.0);
    let mean = (rgb.pixels().map(|p| gray(p) as f64).sum::<f64>() / count) as f32;

    map_pixels(&rgb, |p| Rgb([blend(p[0] as f32, mean, factor), blend(p[1] as f32, mean, factor), blend(p[2] as f32, mean, factor)]))
}

/// Blend with the per-pixel grayscale value
fn adjust_saturation(img: &DynamicImage, factor: f32) -> DynamicImage {
    let rgb = img.to_rgb8();
    map_pixels(&rgb, |p| {
        let g = gray(p);
        Rgb([blend(p[0] as f32, g, factor), blend(p[1] as f32, g, factor), blend(p[2] as f32, g, factor)])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn create_test_image() -> DynamicImage {
        let mut img = ImageBuffer::new(64, 64);
        for (x, y, pixel) in img.enumerate_pixels_mut() {
            *pixel = Rgb([(x * 4) as u8, (y * 4) as u8, 128]);
        }
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_default_config() {
        let config = AugmentationConfig::default();
        assert_eq!(config.horizontal_flip_prob, 0.3);
        assert_eq!(config.rotation_degrees, 15.0);
        assert!(!config.is_noop());
        assert!(AugmentationConfig::none().is_noop());
    }

    #[test]
    fn test_augment_resizes_to_target() {
        let aug = Augmenter::with_defaults(32);
        let mut rng = ChaCha8Rng::seed_from_u64(42);

        let result = aug.augment(create_test_image(), &mut rng);
        assert_eq!((result.width(), result.height()), (32, 32));
    }

    #[test]
    fn test_no_augmentation_only_resizes() {
        let aug = Augmenter::no_augmentation(64);
        let img = create_test_image();
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        let result = aug.augment(img.clone(), &mut rng);
        assert_eq!(result.to_rgb8().into_raw(), img.to_rgb8().into_raw());
    }

    #[test]
    fn test_same_seed_same_output() {
        let aug = Augmenter::with_defaults(48);
        let img = create_test_image();

        let a = aug.augment(img.clone(), &mut ChaCha8Rng::seed_from_u64(3));
        let b = aug.augment(img, &mut ChaCha8Rng::seed_from_u64(3));
        assert_eq!(a.to_rgb8().into_raw(), b.to_rgb8().into_raw());
    }

    #[test]
    fn test_rotation_fills_corners_black() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 64, Rgb([200, 200, 200])));
        let rotated = rotate(&img, 15.0).to_rgb8();

        assert_eq!(*rotated.get_pixel(0, 0), Rgb([0, 0, 0]));
        assert_eq!(*rotated.get_pixel(32, 32), Rgb([200, 200, 200]));
    }

    #[test]
    fn test_brightness_is_multiplicative() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([100, 50, 0])));
        let brighter = adjust_brightness(&img, 1.2).to_rgb8();
        assert_eq!(*brighter.get_pixel(0, 0), Rgb([120, 60, 0]));

        let darker = adjust_brightness(&img, 0.8).to_rgb8();
        assert_eq!(*darker.get_pixel(0, 0), Rgb([80, 40, 0]));
    }

    #[test]
    fn test_contrast_on_flat_image_is_identity() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(4, 4, Rgb([90, 90, 90])));
        let adjusted = adjust_contrast(&img, 1.2).to_rgb8();
        assert_eq!(*adjusted.get_pixel(1, 1), Rgb([90, 90, 90]));
    }
}
