//! Synthetic form rendering for tests: a white page with a black alignment
//! frame and a grid of answer bubbles.

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use rusttype::Font;

pub const INK: Luma<u8> = Luma([0]);
pub const PAPER: Luma<u8> = Luma([255]);

pub const FRAME_THICKNESS: u32 = 6;
pub const BUBBLE_RADIUS: i32 = 8;

#[derive(Debug, Clone)]
pub struct FormLayout {
    pub width: u32,
    pub height: u32,
    pub frame: Rect,
    pub bubbles: Vec<(i32, i32)>,
}

impl FormLayout {
    /// A 420x300 page with a 4 column by 3 row bubble grid. Detected spots are
    /// ordered column by column, so spots 0..6 are the two left columns.
    pub fn standard() -> Self {
        let bubbles = (0..4)
            .flat_map(|column| (0..3).map(move |row| (80 + 60 * column, 80 + 50 * row)))
            .collect();
        Self {
            width: 420,
            height: 300,
            frame: Rect::at(20, 20).of_size(380, 260),
            bubbles,
        }
    }

    /// Renders the page with the given bubbles filled and the rest outlined.
    pub fn render(&self, filled: &[usize]) -> GrayImage {
        let mut img = GrayImage::from_pixel(self.width, self.height, PAPER);
        draw_frame_mut(&mut img, self.frame, FRAME_THICKNESS);
        for (i, &center) in self.bubbles.iter().enumerate() {
            if filled.contains(&i) {
                draw_filled_circle_mut(&mut img, center, BUBBLE_RADIUS, INK);
            } else {
                draw_hollow_circle_mut(&mut img, center, BUBBLE_RADIUS, INK);
            }
        }
        img
    }

    /// Renders the calibration page used to author a template: every bubble
    /// filled in.
    pub fn render_calibration(&self) -> GrayImage {
        let all = (0..self.bubbles.len()).collect::<Vec<_>>();
        self.render(&all)
    }
}

pub fn draw_frame_mut(img: &mut GrayImage, outer: Rect, thickness: u32) {
    for inset in 0..thickness {
        let rect = Rect::at(outer.left() + inset as i32, outer.top() + inset as i32)
            .of_size(outer.width() - 2 * inset, outer.height() - 2 * inset);
        draw_hollow_rect_mut(img, rect, INK);
    }
}

/// A binary (ink = white) canvas with white disks at the given centers.
pub fn binary_disks(width: u32, height: u32, centers: &[(i32, i32)], radius: i32) -> GrayImage {
    let mut img = GrayImage::new(width, height);
    for &center in centers {
        draw_filled_circle_mut(&mut img, center, radius, Luma([255]));
    }
    img
}

/// A monospace font for tests that draw labels.
pub fn test_font() -> Font<'static> {
    Font::try_from_bytes(include_bytes!("../fonts/DejaVuSansMono.ttf")).expect("font is valid")
}
