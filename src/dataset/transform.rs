//! Deterministic evaluation transform
//!
//! Shared by validation, test, CLI inference and the HTTP service.

use burn::prelude::*;
use image::imageops::FilterType;
use image::DynamicImage;

/// Side length of the square model input
pub const IMAGE_SIZE: usize = 224;

/// ImageNet channel means
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];

/// ImageNet channel standard deviations
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Resize to `size`x`size` unless the image already has that shape
pub fn resize_to(img: DynamicImage, size: usize) -> DynamicImage {
    let size = size as u32;
    if img.width() == size && img.height() == size {
        img
    } else {
        img.resize_exact(size, size, FilterType::Triangle)
    }
}

/// Convert an image to CHW floats in [0, 1]
pub fn to_chw(img: &DynamicImage) -> Vec<f32> {
    let rgb = img.to_rgb8();
    let (width, height) = rgb.dimensions();
    let plane = (width * height) as usize;
    let mut data = vec![0.0f32; 3 * plane];

    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = (y * width + x) as usize;
        for c in 0..3 {
            data[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }

    data
}

/// Apply `(x - mean) / std` per channel to a `[N, 3, H, W]` tensor
pub fn normalize<B: Backend>(images: Tensor<B, 4>, device: &B::Device) -> Tensor<B, 4> {
    let mean = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_MEAN.to_vec(), [1, 3, 1, 1]), device);
    let std = Tensor::<B, 4>::from_floats(TensorData::new(IMAGENET_STD.to_vec(), [1, 3, 1, 1]), device);
    (images - mean) / std
}

/// RGB, resize, CHW in [0, 1]. Normalization happens on the tensor.
pub fn eval_pixels(img: &DynamicImage, size: usize) -> Vec<f32> {
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    to_chw(&resize_to(rgb, size))
}

/// Full evaluation transform producing a normalized `[1, 3, size, size]` tensor
pub fn eval_tensor<B: Backend>(img: &DynamicImage, size: usize, device: &B::Device) -> Tensor<B, 4> {
    let data = eval_pixels(img, size);
    let images = Tensor::<B, 4>::from_floats(TensorData::new(data, [1, 3, size, size]), device);
    normalize(images, device)
}
