use image::GrayImage;
use imageproc::{contours::find_contours, rect::Rect};
use log::debug;
use logging_timer::time;

use crate::geometry::{center_of_rect, get_contour_bounding_rect};

/// The center of a detected answer bubble in template coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Spot {
    pub x: i32,
    pub y: i32,
}

impl Spot {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Accepted bubble sizes: outlines whose bounding box lies strictly between
/// twice the minimum and twice the maximum radius on both axes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpotRadius {
    pub min: u32,
    pub max: u32,
}

impl SpotRadius {
    /// The window authoring uses around a nominal bubble radius.
    pub fn around(circle_radius: u32) -> Self {
        Self {
            min: circle_radius.saturating_sub(5),
            max: circle_radius + 5,
        }
    }
}

const MIN_ASPECT_RATIO: f32 = 0.9;
const MAX_ASPECT_RATIO: f32 = 1.1;

/// Determines whether a rect could be an answer bubble based on its size and
/// how close to square it is.
pub fn rect_could_be_spot(radius: &SpotRadius, rect: &Rect) -> bool {
    let (width, height) = (rect.width(), rect.height());
    let aspect_ratio = width as f32 / height as f32;
    2 * radius.min < width
        && width < 2 * radius.max
        && 2 * radius.min < height
        && height < 2 * radius.max
        && MIN_ASPECT_RATIO < aspect_ratio
        && aspect_ratio < MAX_ASPECT_RATIO
}

/// Finds answer bubbles in a normalized template image, where bubbles were
/// filled in before scanning so each shows up as a solid blob.
///
/// Centers are sorted by x, then y. Authoring refers to spots by their index
/// in this list. Nested outlines that both pass the filter are both reported.
#[time]
pub fn find_spots(img: &GrayImage, radius: &SpotRadius) -> Vec<Spot> {
    let mut spots = find_contours::<i32>(img)
        .iter()
        .filter_map(get_contour_bounding_rect)
        .filter(|rect| rect_could_be_spot(radius, rect))
        .map(|rect| {
            let center = center_of_rect(&rect);
            Spot::new(center.x as i32, center.y as i32)
        })
        .collect::<Vec<Spot>>();

    spots.sort();
    debug!("found {} spots", spots.len());
    spots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::binary_disks;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use proptest::prelude::*;

    const WINDOW: SpotRadius = SpotRadius { min: 10, max: 15 };

    #[test]
    fn spots_are_sorted_by_x_then_y() {
        let centers = [(100, 30), (40, 90), (40, 30), (160, 60)];
        let img = binary_disks(200, 120, &centers, 12);

        let spots = find_spots(&img, &WINDOW);
        assert_eq!(
            spots,
            vec![
                Spot::new(40, 30),
                Spot::new(40, 90),
                Spot::new(100, 30),
                Spot::new(160, 60),
            ]
        );
    }

    #[test]
    fn detection_is_deterministic() {
        let centers = [(30, 30), (80, 30), (130, 30), (30, 80), (80, 80)];
        let img = binary_disks(180, 120, &centers, 12);
        assert_eq!(find_spots(&img, &WINDOW), find_spots(&img, &WINDOW));
    }

    #[test]
    fn blobs_outside_the_radius_window_are_ignored() {
        let mut img = binary_disks(200, 100, &[(40, 50)], 12);
        // too small, too large
        draw_filled_rect_mut(&mut img, Rect::at(90, 40).of_size(8, 8), Luma([255]));
        draw_filled_rect_mut(&mut img, Rect::at(120, 10).of_size(60, 60), Luma([255]));

        assert_eq!(find_spots(&img, &WINDOW), vec![Spot::new(40, 50)]);
    }

    #[test]
    fn aspect_ratio_window_is_exclusive() {
        let mut img = GrayImage::new(200, 100);
        // 28 / 25 = 1.12 is rejected, 24 / 22 = 1.09 is accepted
        draw_filled_rect_mut(&mut img, Rect::at(20, 20).of_size(28, 25), Luma([255]));
        draw_filled_rect_mut(&mut img, Rect::at(100, 20).of_size(24, 22), Luma([255]));

        assert_eq!(find_spots(&img, &WINDOW), vec![Spot::new(112, 31)]);
    }

    #[test]
    fn window_around_radius() {
        assert_eq!(SpotRadius::around(15), SpotRadius { min: 10, max: 20 });
        assert_eq!(SpotRadius::around(3), SpotRadius { min: 0, max: 8 });
    }

    proptest! {
        #[test]
        fn near_square_rects_in_range_are_accepted(width in 21u32..30, height in 21u32..30) {
            let rect = Rect::at(0, 0).of_size(width, height);
            let aspect_ratio = width as f32 / height as f32;
            prop_assert_eq!(
                rect_could_be_spot(&WINDOW, &rect),
                aspect_ratio > 0.9 && aspect_ratio < 1.1
            );
        }
    }
}
