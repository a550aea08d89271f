use std::fmt::Display;

use image::{DynamicImage, GrayImage};
use imageproc::{
    contours::find_contours,
    edges::canny,
    filter::bilateral_filter,
    geometric_transformations::{warp_into, Interpolation, Projection},
    geometry::{approximate_polygon_dp, arc_length},
    point::Point,
};
use log::debug;
use logging_timer::time;

use crate::{
    geometry::{max_extent, polygon_area, Corners},
    image_utils::{pad_image, threshold_inverted, to_gray, BLACK, DEFAULT_INK_THRESHOLD},
    types::Size,
};

/// Tunables for turning a raw scan into a binary image in template space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalizeOptions {
    /// Gray level at or below which a pixel is ink.
    pub ink_threshold: u8,
    /// Half-width of the edge-preserving blur window.
    pub bilateral_radius: u32,
    pub bilateral_sigma_color: f32,
    pub bilateral_sigma_spatial: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// How many of the largest outlines are considered for the outer box.
    pub candidate_count: usize,
    /// Polygon approximation tolerance as a fraction of the outline length.
    pub polygon_epsilon: f64,
    /// Warp onto exactly this size instead of the size of the detected box.
    pub target_size: Option<Size<u32>>,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            ink_threshold: DEFAULT_INK_THRESHOLD,
            bilateral_radius: 5,
            bilateral_sigma_color: 500.0,
            bilateral_sigma_spatial: 2.0,
            canny_low: 20.0,
            canny_high: 100.0,
            candidate_count: 5,
            polygon_epsilon: 0.0015,
            target_size: None,
        }
    }
}

impl NormalizeOptions {
    pub fn with_target_size(self, target_size: Size<u32>) -> Self {
        Self {
            target_size: Some(target_size),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlignmentError {
    /// Edge detection produced no outlines at all.
    NoContours,
    /// The largest outline by area and the longest outline disagree about
    /// which one reaches further toward the bottom-right.
    AmbiguousOuterBox {
        area_corner: Point<i32>,
        length_corner: Point<i32>,
    },
    /// None of the candidate outlines approximates to a polygon with at least
    /// four vertices.
    NoQuadrilateral,
    /// The detected corners cannot be mapped onto a rectangle.
    DegenerateTransform(Size<u32>),
}

impl Display for AlignmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlignmentError::NoContours => write!(f, "image alignment failed: no outlines found"),
            AlignmentError::AmbiguousOuterBox {
                area_corner,
                length_corner,
            } => write!(
                f,
                "image alignment failed: outer box not detected \
                 (area candidate reaches ({}, {}), length candidate reaches ({}, {}))",
                area_corner.x, area_corner.y, length_corner.x, length_corner.y
            ),
            AlignmentError::NoQuadrilateral => {
                write!(f, "image alignment failed: no rectangular outline found")
            }
            AlignmentError::DegenerateTransform(size) => write!(
                f,
                "image alignment failed: cannot warp onto a {}x{} rectangle",
                size.width, size.height
            ),
        }
    }
}

impl std::error::Error for AlignmentError {}

/// The outer box of a page and the transform that maps it onto an
/// axis-aligned rectangle.
#[derive(Debug, Clone, Copy)]
pub struct PagePerspective {
    pub corners: Corners,
    pub size: Size<u32>,
    pub projection: Projection,
}

impl PagePerspective {
    pub fn from_corners(
        corners: Corners,
        target_size: Option<Size<u32>>,
    ) -> Result<Self, AlignmentError> {
        let size = target_size.unwrap_or_else(|| corners.target_size());
        if size.width < 2 || size.height < 2 {
            return Err(AlignmentError::DegenerateTransform(size));
        }

        let projection = Projection::from_control_points(
            corners.as_control_points(),
            Corners::of_size(size).as_control_points(),
        )
        .ok_or(AlignmentError::DegenerateTransform(size))?;

        Ok(Self {
            corners,
            size,
            projection,
        })
    }

    /// Warps `img` so that the outer box fills the whole output.
    pub fn warp(&self, img: &GrayImage) -> GrayImage {
        let mut out = GrayImage::new(self.size.width, self.size.height);
        // nearest neighbour keeps a binary image binary
        warp_into(img, &self.projection, Interpolation::Nearest, BLACK, &mut out);
        out
    }
}

/// Blank border added around the image before edge detection, so a frame
/// touching the image edge still has an outer edge.
const EDGE_MARGIN: u32 = 8;

struct Outline {
    points: Vec<Point<i32>>,
    area: f64,
    length: f64,
}

/// Finds the corners of the rectangular frame printed around the form.
///
/// Outlines are ranked both by enclosed area and by length. Whichever ranking's
/// best outline reaches further toward the bottom-right in both x and y wins;
/// if the two disagree on one axis the page is rejected rather than guessed.
/// The first of the top candidates that approximates to a polygon with four or
/// more vertices is taken as the frame.
#[time]
pub fn find_outer_box(
    img: &GrayImage,
    options: &NormalizeOptions,
) -> Result<Corners, AlignmentError> {
    let padded = pad_image(img, EDGE_MARGIN, BLACK);
    let smoothed = bilateral_filter(
        &padded,
        options.bilateral_radius,
        options.bilateral_sigma_color,
        options.bilateral_sigma_spatial,
    );
    let edges = canny(&smoothed, options.canny_low, options.canny_high);

    let margin = EDGE_MARGIN as i32;
    let outlines = find_contours::<i32>(&edges)
        .into_iter()
        .map(|contour| {
            let points = contour
                .points
                .iter()
                .map(|p| Point::new(p.x - margin, p.y - margin))
                .collect::<Vec<Point<i32>>>();
            Outline {
                area: polygon_area(&points),
                length: arc_length(&points, true),
                points,
            }
        })
        .collect::<Vec<Outline>>();

    let mut by_area = outlines.iter().collect::<Vec<&Outline>>();
    by_area.sort_by(|a, b| b.area.total_cmp(&a.area));
    let mut by_length = outlines.iter().collect::<Vec<&Outline>>();
    by_length.sort_by(|a, b| b.length.total_cmp(&a.length));

    let (area_corner, length_corner) = match (
        by_area.first().and_then(|o| max_extent(&o.points)),
        by_length.first().and_then(|o| max_extent(&o.points)),
    ) {
        (Some(area_corner), Some(length_corner)) => (area_corner, length_corner),
        _ => return Err(AlignmentError::NoContours),
    };

    let ranking = if area_corner.x >= length_corner.x && area_corner.y >= length_corner.y {
        debug!("outer box taken from area ranking");
        by_area
    } else if area_corner.x < length_corner.x && area_corner.y < length_corner.y {
        debug!("outer box taken from length ranking");
        by_length
    } else {
        return Err(AlignmentError::AmbiguousOuterBox {
            area_corner,
            length_corner,
        });
    };

    for outline in ranking.iter().take(options.candidate_count) {
        let polygon =
            approximate_polygon_dp(&outline.points, options.polygon_epsilon * outline.length, true);
        if polygon.len() >= 4 {
            if let Some(corners) = Corners::from_polygon(&polygon) {
                debug!("outer box corners: {:?}", corners);
                return Ok(corners);
            }
        }
    }

    Err(AlignmentError::NoQuadrilateral)
}

/// Detects the outer box of `img` and computes its perspective transform.
pub fn page_perspective(
    img: &GrayImage,
    options: &NormalizeOptions,
) -> Result<PagePerspective, AlignmentError> {
    let corners = find_outer_box(img, options)?;
    PagePerspective::from_corners(corners, options.target_size)
}

/// Applies a perspective warp so the page's outer box becomes the image
/// bounds.
#[time]
pub fn align_page(
    img: &GrayImage,
    options: &NormalizeOptions,
) -> Result<GrayImage, AlignmentError> {
    Ok(page_perspective(img, options)?.warp(img))
}

/// Converts an already-grayscale scan into an aligned binary image where ink
/// is white.
pub fn normalize_gray(
    img: &GrayImage,
    options: &NormalizeOptions,
) -> Result<GrayImage, AlignmentError> {
    let thresholded = threshold_inverted(img, options.ink_threshold);
    align_page(&thresholded, options)
}

/// Converts a decoded scan into an aligned binary image where ink is white.
pub fn normalize(
    raw: &DynamicImage,
    options: &NormalizeOptions,
) -> Result<GrayImage, AlignmentError> {
    normalize_gray(&to_gray(raw), options)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{draw_frame_mut, FormLayout, FRAME_THICKNESS};
    use imageproc::rect::Rect;

    fn assert_near(actual: Point<f32>, expected: (f32, f32), tolerance: f32) {
        assert!(
            (actual.x - expected.0).abs() <= tolerance
                && (actual.y - expected.1).abs() <= tolerance,
            "expected {:?} to be within {} of {:?}",
            actual,
            tolerance,
            expected
        );
    }

    #[test]
    fn finds_the_printed_frame() {
        let layout = FormLayout::standard();
        let binary = threshold_inverted(&layout.render(&[]), DEFAULT_INK_THRESHOLD);

        let corners = find_outer_box(&binary, &NormalizeOptions::default()).unwrap();
        let frame = layout.frame;
        let (left, top) = (frame.left() as f32, frame.top() as f32);
        let (right, bottom) = (frame.right() as f32, frame.bottom() as f32);
        assert_near(corners.top_left, (left, top), 5.0);
        assert_near(corners.top_right, (right, top), 5.0);
        assert_near(corners.bottom_right, (right, bottom), 5.0);
        assert_near(corners.bottom_left, (left, bottom), 5.0);
    }

    #[test]
    fn normalized_page_is_cropped_to_the_frame() {
        let layout = FormLayout::standard();
        let raw = DynamicImage::ImageLuma8(layout.render(&[0]));

        let normalized = normalize(&raw, &NormalizeOptions::default()).unwrap();
        let (width, height) = normalized.dimensions();
        assert!((width as i32 - layout.frame.width() as i32).abs() <= 8, "width {}", width);
        assert!((height as i32 - layout.frame.height() as i32).abs() <= 8, "height {}", height);
        assert!(normalized.pixels().all(|p| p.0[0] == 0 || p.0[0] == 255));
    }

    #[test]
    fn aligning_an_aligned_page_finds_its_own_corners() {
        let layout = FormLayout::standard();
        let options = NormalizeOptions::default();
        let raw = DynamicImage::ImageLuma8(layout.render(&[]));
        let aligned = normalize(&raw, &options).unwrap();

        // the frame's outer edge, not its inner one
        let corners = find_outer_box(&aligned, &options).unwrap();
        let (right, bottom) = ((aligned.width() - 1) as f32, (aligned.height() - 1) as f32);
        let tolerance = 2.0;
        assert_near(corners.top_left, (0.0, 0.0), tolerance);
        assert_near(corners.top_right, (right, 0.0), tolerance);
        assert_near(corners.bottom_right, (right, bottom), tolerance);
        assert_near(corners.bottom_left, (0.0, bottom), tolerance);
    }

    #[test]
    fn frame_touching_the_image_edge_is_found() {
        let mut page = GrayImage::from_pixel(200, 120, image::Luma([255]));
        draw_frame_mut(&mut page, Rect::at(0, 0).of_size(200, 120), FRAME_THICKNESS);
        let binary = threshold_inverted(&page, DEFAULT_INK_THRESHOLD);

        let corners = find_outer_box(&binary, &NormalizeOptions::default()).unwrap();
        assert_near(corners.top_left, (0.0, 0.0), 2.0);
        assert_near(corners.top_right, (199.0, 0.0), 2.0);
        assert_near(corners.bottom_right, (199.0, 119.0), 2.0);
        assert_near(corners.bottom_left, (0.0, 119.0), 2.0);
    }

    #[test]
    fn explicit_target_size_wins() {
        let layout = FormLayout::standard();
        let options = NormalizeOptions::default().with_target_size(Size {
            width: 300,
            height: 200,
        });
        let raw = DynamicImage::ImageLuma8(layout.render(&[]));

        let normalized = normalize(&raw, &options).unwrap();
        assert_eq!(normalized.dimensions(), (300, 200));
    }

    #[test]
    fn blank_page_cannot_be_aligned() {
        let blank = GrayImage::new(200, 100);
        assert_eq!(
            align_page(&blank, &NormalizeOptions::default()),
            Err(AlignmentError::NoContours)
        );
    }

    #[test]
    fn perspective_maps_corners_onto_the_target_rectangle() {
        let corners = Corners {
            top_left: Point::new(12.0, 10.0),
            top_right: Point::new(212.0, 4.0),
            bottom_right: Point::new(220.0, 118.0),
            bottom_left: Point::new(8.0, 110.0),
        };
        let perspective = PagePerspective::from_corners(corners, None).unwrap();
        let size = perspective.size;

        let (x, y) = perspective.projection * (12.0, 10.0);
        assert!(x.abs() < 0.01 && y.abs() < 0.01);
        let (x, y) = perspective.projection * (220.0, 118.0);
        assert!((x - (size.width - 1) as f32).abs() < 0.01);
        assert!((y - (size.height - 1) as f32).abs() < 0.01);
    }

    #[test]
    fn collapsed_corners_are_rejected() {
        let point = Point::new(5.0, 5.0);
        let corners = Corners {
            top_left: point,
            top_right: point,
            bottom_right: point,
            bottom_left: point,
        };
        assert!(matches!(
            PagePerspective::from_corners(corners, None),
            Err(AlignmentError::DegenerateTransform(_))
        ));
    }
}
