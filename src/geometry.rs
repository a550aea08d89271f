use imageproc::contours::Contour;
use imageproc::point::Point;
use imageproc::rect::Rect;

use crate::types::Size;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    pub start: Point<f32>,
    pub end: Point<f32>,
}

impl Segment {
    pub const fn new(start: Point<f32>, end: Point<f32>) -> Self {
        Self { start, end }
    }

    pub fn length(&self) -> f32 {
        distance_from_point_to_point(&self.start, &self.end)
    }
}

pub fn distance_from_point_to_point(p1: &Point<f32>, p2: &Point<f32>) -> f32 {
    ((p1.x - p2.x).powf(2.0) + (p1.y - p2.y).powf(2.0)).sqrt()
}

pub fn center_of_rect(rect: &Rect) -> Point<f32> {
    Point::new(
        rect.left() as f32 + rect.width() as f32 / 2.0,
        rect.top() as f32 + rect.height() as f32 / 2.0,
    )
}

/// Gets the smallest axis-aligned rect containing every point. Width and
/// height count pixels, so a single point yields a 1x1 rect.
pub fn bounding_rect_of_points(points: &[Point<i32>]) -> Option<Rect> {
    let first = points.first()?;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in &points[1..] {
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32))
}

pub fn get_contour_bounding_rect(contour: &Contour<i32>) -> Option<Rect> {
    bounding_rect_of_points(&contour.points)
}

/// Area enclosed by a closed polygon (shoelace formula).
pub fn polygon_area(points: &[Point<i32>]) -> f64 {
    if points.len() < 3 {
        return 0.0;
    }
    let twice_area = points
        .iter()
        .zip(points.iter().cycle().skip(1))
        .map(|(a, b)| a.x as f64 * b.y as f64 - b.x as f64 * a.y as f64)
        .sum::<f64>();
    (twice_area / 2.0).abs()
}

/// The bottom-right-most extent of a point set: the maximum x and maximum y,
/// taken independently.
pub fn max_extent(points: &[Point<i32>]) -> Option<Point<i32>> {
    let max_x = points.iter().map(|p| p.x).max()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Some(Point::new(max_x, max_y))
}

/// Four corners of a quadrilateral, clockwise from top-left.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners {
    pub top_left: Point<f32>,
    pub top_right: Point<f32>,
    pub bottom_right: Point<f32>,
    pub bottom_left: Point<f32>,
}

impl Corners {
    /// Orders the vertices of a polygon into corners. Top-left minimizes
    /// `x + y`, bottom-right maximizes it; top-right minimizes `y - x`,
    /// bottom-left maximizes it. Ties resolve to the earliest vertex.
    pub fn from_polygon(points: &[Point<i32>]) -> Option<Self> {
        let to_f32 = |p: &Point<i32>| Point::new(p.x as f32, p.y as f32);
        let sum = |p: &Point<i32>| p.x + p.y;
        let diff = |p: &Point<i32>| p.y - p.x;

        Some(Self {
            top_left: to_f32(first_extreme(points, sum, |a, b| a < b)?),
            top_right: to_f32(first_extreme(points, diff, |a, b| a < b)?),
            bottom_right: to_f32(first_extreme(points, sum, |a, b| a > b)?),
            bottom_left: to_f32(first_extreme(points, diff, |a, b| a > b)?),
        })
    }

    /// The size of the rectangle these corners should be warped onto: the
    /// longer of each pair of opposite sides, truncated to whole pixels.
    pub fn target_size(&self) -> Size<u32> {
        let bottom = Segment::new(self.bottom_left, self.bottom_right).length();
        let top = Segment::new(self.top_left, self.top_right).length();
        let right = Segment::new(self.top_right, self.bottom_right).length();
        let left = Segment::new(self.top_left, self.bottom_left).length();

        Size {
            width: (bottom as u32).max(top as u32),
            height: (right as u32).max(left as u32),
        }
    }

    /// Corners of the axis-aligned rectangle of the given size.
    pub fn of_size(size: Size<u32>) -> Self {
        let right = size.width.saturating_sub(1) as f32;
        let bottom = size.height.saturating_sub(1) as f32;
        Self {
            top_left: Point::new(0.0, 0.0),
            top_right: Point::new(right, 0.0),
            bottom_right: Point::new(right, bottom),
            bottom_left: Point::new(0.0, bottom),
        }
    }

    pub fn as_control_points(&self) -> [(f32, f32); 4] {
        [
            (self.top_left.x, self.top_left.y),
            (self.top_right.x, self.top_right.y),
            (self.bottom_right.x, self.bottom_right.y),
            (self.bottom_left.x, self.bottom_left.y),
        ]
    }
}

fn first_extreme<K: Copy>(
    points: &[Point<i32>],
    key: impl Fn(&Point<i32>) -> K,
    better: impl Fn(K, K) -> bool,
) -> Option<&Point<i32>> {
    let mut iter = points.iter();
    let mut best = iter.next()?;
    for point in iter {
        if better(key(point), key(best)) {
            best = point;
        }
    }
    Some(best)
}
