//! Image decoding and sampling.

use image::{Rgb, RgbImage};

pub use image::ImageError;

/// Decodes an encoded image (JPEG, PNG or GIF) into 8-bit RGB.
///
/// The format is guessed from the data, so the caller does not have to know what it was sent.
pub fn decode(data: &[u8]) -> Result<RgbImage, ImageError> {
    Ok(image::load_from_memory(data)?.to_rgb8())
}

/// Samples the pixel closest to `(x, y)`.
///
/// Coordinates outside of the image yield black, which pads oversized regions the same way
/// letterboxing would.
pub fn sample(image: &RgbImage, x: f32, y: f32) -> Rgb<u8> {
    let (x, y) = (x.floor(), y.floor());
    if x < 0.0 || y < 0.0 || x >= image.width() as f32 || y >= image.height() as f32 {
        return Rgb([0, 0, 0]);
    }
    *image.get_pixel(x as u32, y as u32)
}

/// An axis-aligned rectangle with `f32` coordinates, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    x: f32,
    y: f32,
    w: f32,
    h: f32,
}

impl Rect {
    pub fn new(x: f32, y: f32, w: f32, h: f32) -> Self {
        Self { x, y, w, h }
    }

    pub fn from_center(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, w, h)
    }

    /// Returns a rectangle covering all of `image`.
    pub fn of_image(image: &RgbImage) -> Self {
        Self::new(0.0, 0.0, image.width() as f32, image.height() as f32)
    }

    #[inline]
    pub fn x(&self) -> f32 {
        self.x
    }

    #[inline]
    pub fn y(&self) -> f32 {
        self.y
    }

    #[inline]
    pub fn width(&self) -> f32 {
        self.w
    }

    #[inline]
    pub fn height(&self) -> f32 {
        self.h
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.w / 2.0, self.y + self.h / 2.0)
    }

    /// Symmetrically grows the rectangle until it has the aspect ratio `width / height`.
    ///
    /// Only one of the dimensions is enlarged; the rectangle never shrinks.
    pub fn grow_to_fit_aspect(&self, aspect: f32) -> Self {
        let (cx, cy) = self.center();
        if self.w / self.h > aspect {
            Self::from_center(cx, cy, self.w, self.w / aspect)
        } else {
            Self::from_center(cx, cy, self.h * aspect, self.h)
        }
    }

    /// Computes the intersection of two rectangles, or [`None`] if they do not overlap.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x.max(other.x);
        let y0 = self.y.max(other.y);
        let x1 = (self.x + self.w).min(other.x + other.w);
        let y1 = (self.y + self.h).min(other.y + other.h);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0, y0, x1 - x0, y1 - y0))
    }

    pub fn area(&self) -> f32 {
        self.w * self.h
    }

    /// Computes the Intersection over Union (IoU) of `self` and `other`.
    pub fn iou(&self, other: &Rect) -> f32 {
        let Some(intersection) = self.intersection(other) else {
            return 0.0;
        };
        let intersection = intersection.area();
        intersection / (self.area() + other.area() - intersection)
    }

    /// Maps relative coordinates inside the rectangle (`0.0..=1.0`) to absolute coordinates.
    pub fn transform_out(&self, u: f32, v: f32) -> (f32, f32) {
        (self.x + u * self.w, self.y + v * self.h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test;

    #[test]
    fn decode_png() {
        let data = test::png(3, 2, [255, 0, 0]);
        let image = decode(&data).unwrap();
        assert_eq!(image.dimensions(), (3, 2));
        assert_eq!(*image.get_pixel(2, 1), Rgb([255, 0, 0]));
    }

    #[test]
    fn decode_garbage() {
        assert!(decode(b"definitely not an image").is_err());
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn sample_outside_is_black() {
        let image = RgbImage::from_pixel(2, 2, Rgb([9, 9, 9]));
        assert_eq!(sample(&image, 1.9, 1.9), Rgb([9, 9, 9]));
        assert_eq!(sample(&image, -0.1, 0.0), Rgb([0, 0, 0]));
        assert_eq!(sample(&image, 2.0, 0.0), Rgb([0, 0, 0]));
    }

    #[test]
    fn grow_to_square() {
        let rect = Rect::new(0.0, 0.0, 40.0, 20.0).grow_to_fit_aspect(1.0);
        assert_eq!(rect, Rect::new(0.0, -10.0, 40.0, 40.0));

        let rect = Rect::new(10.0, 0.0, 10.0, 30.0).grow_to_fit_aspect(1.0);
        assert_eq!(rect, Rect::new(0.0, 0.0, 30.0, 30.0));
    }

    #[test]
    fn intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        assert_eq!(
            a.intersection(&Rect::new(5.0, -5.0, 10.0, 10.0)),
            Some(Rect::new(5.0, 0.0, 5.0, 5.0))
        );
        assert_eq!(a.intersection(&Rect::new(10.0, 0.0, 5.0, 5.0)), None);
    }

    #[test]
    fn iou() {
        let a = Rect::new(0.0, 0.0, 2.0, 2.0);
        assert_eq!(a.iou(&a), 1.0);
        assert_eq!(a.iou(&Rect::new(1.0, 0.0, 2.0, 2.0)), 2.0 / 6.0);
        assert_eq!(a.iou(&Rect::new(5.0, 5.0, 1.0, 1.0)), 0.0);
        assert_eq!(Rect::new(0.5, 0.5, 1.0, 1.0).iou(&a), 1.0 / 4.0);
    }

    #[test]
    fn transform_out() {
        let rect = Rect::new(10.0, 20.0, 100.0, 50.0);
        assert_eq!(rect.transform_out(0.0, 0.0), (10.0, 20.0));
        assert_eq!(rect.transform_out(0.5, 1.0), (60.0, 70.0));
    }
}
