use image::{DynamicImage, Rgb, RgbImage};
use imageproc::contrast::equalize_histogram;
use imageproc::drawing::{draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

use crate::models::{BoundingBox, Detection, OcrResult};

const BOX_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([230, 40, 40]);
const BOX_THICKNESS: i32 = 3;

/// Cuts `bbox` out of the image. `None` when the clamped box is empty.
pub fn crop(image: &DynamicImage, bbox: &BoundingBox) -> Option<DynamicImage> {
    let bbox = bbox.clamp_to(image.width(), image.height());
    if bbox.is_empty() {
        return None;
    }
    Some(image.crop_imm(bbox.x1 as u32, bbox.y1 as u32, bbox.width(), bbox.height()))
}

/// Grayscale + histogram equalization ahead of OCR.
pub fn enhance_for_ocr(crop: &DynamicImage) -> DynamicImage {
    let gray = crop.to_luma8();
    DynamicImage::ImageLuma8(equalize_histogram(&gray))
}

/// Copy of `image` with every detection outlined.
pub fn draw_detections(image: &DynamicImage, detections: &[Detection]) -> RgbImage {
    let mut canvas = image.to_rgb8();
    for detection in detections {
        draw_thick_rect(&mut canvas, &detection.bbox, BOX_COLOR);
    }
    canvas
}

/// Copy of a crop with every recognized text quadrilateral outlined.
pub fn draw_text_quads(crop: &DynamicImage, results: &[OcrResult]) -> RgbImage {
    let mut canvas = crop.to_rgb8();
    for result in results {
        for i in 0..4 {
            let (ax, ay) = result.quad[i];
            let (bx, by) = result.quad[(i + 1) % 4];
            draw_line_segment_mut(
                &mut canvas,
                (ax as f32, ay as f32),
                (bx as f32, by as f32),
                TEXT_COLOR,
            );
        }
    }
    canvas
}

fn draw_thick_rect(canvas: &mut RgbImage, bbox: &BoundingBox, color: Rgb<u8>) {
    for inset in 0..BOX_THICKNESS {
        let w = bbox.width() as i32 - 2 * inset;
        let h = bbox.height() as i32 - 2 * inset;
        if w <= 0 || h <= 0 {
            break;
        }
        let rect = Rect::at(bbox.x1 + inset, bbox.y1 + inset).of_size(w as u32, h as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, Luma};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        let img = RgbImage::from_fn(width, height, |x, _| Rgb([(x * 4) as u8, 100, 50]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_crop_clamps_to_image() {
        let image = gradient(50, 40);
        let cropped = crop(&image, &BoundingBox::new(40, 30, 80, 90)).unwrap();
        assert_eq!(cropped.dimensions(), (10, 10));
        assert!(crop(&image, &BoundingBox::new(60, 0, 70, 10)).is_none());
    }

    #[test]
    fn test_enhance_stretches_contrast() {
        let img = image::GrayImage::from_fn(10, 1, |x, _| Luma([100 + x as u8]));
        let enhanced = enhance_for_ocr(&DynamicImage::ImageLuma8(img)).to_luma8();
        assert_eq!(enhanced.get_pixel(9, 0)[0], 255);
        assert!(enhanced.get_pixel(0, 0)[0] < 100);
    }

    #[test]
    fn test_draw_detections_outlines_box() {
        let image = DynamicImage::ImageRgb8(RgbImage::new(20, 20));
        let detection = Detection {
            bbox: BoundingBox::new(2, 2, 15, 15),
            class_id: 0,
            class_name: "book".to_string(),
            confidence: 0.9,
        };
        let canvas = draw_detections(&image, &[detection]);
        assert_eq!(*canvas.get_pixel(2, 2), BOX_COLOR);
        assert_eq!(*canvas.get_pixel(8, 8), Rgb([0, 0, 0]));
    }
}
