//! Crop-and-fill resizing.
//!
//! A frame is center-cropped to the target aspect ratio along its relatively
//! longer axis, then scaled to the exact target size.

use image::imageops::{self, FilterType};

use crate::video::types::Frame;

/// Region of the source frame kept by the crop step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Compute the centered crop that gives the source the target aspect ratio
///
/// Equal aspect ratios take the height-crop branch with a zero crop.
pub fn crop_region(input_width: u32, input_height: u32, target_width: u32, target_height: u32) -> CropRegion {
    let input_aspect = input_width as f64 / input_height as f64;
    let output_aspect = target_width as f64 / target_height as f64;

    if input_aspect > output_aspect {
        let new_width = ((input_height as f64 * output_aspect).round() as u32).clamp(1, input_width);
        CropRegion {
            x: (input_width - new_width) / 2,
            y: 0,
            width: new_width,
            height: input_height,
        }
    } else {
        let new_height = ((input_width as f64 / output_aspect).round() as u32).clamp(1, input_height);
        CropRegion {
            x: 0,
            y: (input_height - new_height) / 2,
            width: input_width,
            height: new_height,
        }
    }
}

/// Crop-and-fill `frame` to exactly `target_width x target_height`
///
/// Zero-sized frames or targets are a caller error.
pub fn resize(frame: &Frame, target_width: u32, target_height: u32) -> Frame {
    let region = crop_region(frame.width(), frame.height(), target_width, target_height);
    let cropped = imageops::crop_imm(frame.as_image(), region.x, region.y, region.width, region.height).to_image();

    if region.width == target_width && region.height == target_height {
        return Frame::new(cropped);
    }

    // Bilinear
    Frame::new(imageops::resize(&cropped, target_width, target_height, FilterType::Triangle))
}
