use std::fmt::Display;

use image::GrayImage;
use imageproc::drawing::draw_filled_circle_mut;

use crate::{
    image_utils::{count_nonzero, BLACK, WHITE},
    template::{Answer, Question},
    types::Size,
};

/// Per-run replacements for the thresholds and radii stored in a template.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FillOverrides {
    pub filled_threshold: Option<f32>,
    pub circle_radius: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FillError {
    InvalidRadius {
        x: i32,
        y: i32,
    },
    /// The circle does not lie entirely inside the evaluated image.
    OutOfBounds {
        x: i32,
        y: i32,
        radius: u32,
        size: Size<u32>,
    },
    /// The rasterized circle covered no pixels.
    EmptyMask {
        x: i32,
        y: i32,
    },
}

impl Display for FillError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillError::InvalidRadius { x, y } => {
                write!(f, "answer at ({}, {}) has a zero radius", x, y)
            }
            FillError::OutOfBounds { x, y, radius, size } => write!(
                f,
                "circle at ({}, {}) with radius {} does not fit in a {}x{} image",
                x, y, radius, size.width, size.height
            ),
            FillError::EmptyMask { x, y } => {
                write!(f, "circle at ({}, {}) covers no pixels", x, y)
            }
        }
    }
}

impl std::error::Error for FillError {}

/// The outcome of evaluating one answer against one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnswerScore {
    pub fill: f32,
    pub filled: bool,
}

/// Computes the fraction of a circle's rasterized pixels that are ink in a
/// binary image (ink is any non-black pixel).
pub fn circle_fill_fraction(
    img: &GrayImage,
    x: i32,
    y: i32,
    radius: u32,
) -> Result<f32, FillError> {
    if radius == 0 {
        return Err(FillError::InvalidRadius { x, y });
    }

    let size = Size::of_image(img.dimensions());
    let r = radius as i64;
    let (cx, cy) = (x as i64, y as i64);
    if cx - r < 0 || cy - r < 0 || cx + r >= size.width as i64 || cy + r >= size.height as i64 {
        return Err(FillError::OutOfBounds { x, y, radius, size });
    }

    // the mask only needs to cover the circle's bounding square
    let side = 2 * radius + 1;
    let mut mask = GrayImage::new(side, side);
    draw_filled_circle_mut(&mut mask, (radius as i32, radius as i32), radius as i32, WHITE);

    let mask_pixels = count_nonzero(&mask);
    if mask_pixels == 0 {
        return Err(FillError::EmptyMask { x, y });
    }

    let left = (cx - r) as u32;
    let top = (cy - r) as u32;
    let inked = mask
        .enumerate_pixels()
        .filter(|(mx, my, m)| **m != BLACK && *img.get_pixel(left + mx, top + my) != BLACK)
        .count();

    Ok(inked as f32 / mask_pixels as f32)
}

impl Answer {
    /// Fraction of this answer's circle that is inked in `img`.
    pub fn calc_filled_perc(&self, img: &GrayImage) -> Result<f32, FillError> {
        self.filled_fraction(img, &FillOverrides::default())
    }

    pub fn is_filled(&self, img: &GrayImage) -> Result<bool, FillError> {
        Ok(self.score(img, &FillOverrides::default())?.filled)
    }

    pub fn filled_fraction(
        &self,
        img: &GrayImage,
        overrides: &FillOverrides,
    ) -> Result<f32, FillError> {
        let radius = overrides.circle_radius.unwrap_or(self.circle_radius);
        circle_fill_fraction(img, self.x, self.y, radius)
    }

    pub fn score(
        &self,
        img: &GrayImage,
        overrides: &FillOverrides,
    ) -> Result<AnswerScore, FillError> {
        let fill = self.filled_fraction(img, overrides)?;
        let threshold = overrides.filled_threshold.unwrap_or(self.filled_threshold);
        Ok(AnswerScore {
            fill,
            filled: fill >= threshold,
        })
    }
}

impl Question {
    /// Returns the filled answers in stored order. A single-answer question
    /// stops at the first filled answer and never evaluates the rest, so a
    /// double mark resolves to whichever answer comes first.
    pub fn find_answers(
        &self,
        img: &GrayImage,
        overrides: &FillOverrides,
    ) -> Result<Vec<&Answer>, FillError> {
        let mut found = vec![];
        for answer in &self.answers {
            if answer.score(img, overrides)?.filled {
                if !self.multiple {
                    return Ok(vec![answer]);
                }
                found.push(answer);
            }
        }
        Ok(found)
    }

    /// Scores every answer regardless of the selection policy.
    pub fn score_answers(
        &self,
        img: &GrayImage,
        overrides: &FillOverrides,
    ) -> Result<Vec<(&Answer, AnswerScore)>, FillError> {
        self.answers
            .iter()
            .map(|answer| Ok((answer, answer.score(img, overrides)?)))
            .collect()
    }
}
