use std::path::{Path, PathBuf};

use image::{GrayImage, Rgb, RgbImage};
use imageproc::{
    drawing::{
        draw_filled_circle_mut, draw_filled_rect_mut, draw_hollow_circle_mut,
        draw_hollow_rect_mut, draw_text_mut, text_size,
    },
    rect::Rect,
};
use log::{debug, warn};
use rusttype::{Font, Scale};

use crate::{
    fill::AnswerScore,
    image_utils::{to_annotation_canvas, BLUE, DARK_GREEN, GREEN, RED, WHITE_RGB},
    spots::Spot,
    template::{Answer, Question},
};

/// Creates a path for a debug image.
pub fn debug_image_path(base: &Path, label: &str) -> PathBuf {
    let mut result = PathBuf::from(base);
    result.set_file_name(format!(
        "{}_debug_{}.png",
        base.file_stem().unwrap_or_default().to_string_lossy(),
        label
    ));
    result
}

/// Writes annotated copies of an input image next to it, or does nothing
/// when disabled.
pub struct ImageDebugWriter {
    input_path: PathBuf,
    input_image: Option<GrayImage>,
}

impl ImageDebugWriter {
    pub fn new(input_path: PathBuf, input_image: GrayImage) -> Self {
        Self {
            input_path,
            input_image: Some(input_image),
        }
    }

    pub fn disabled() -> Self {
        Self {
            input_path: PathBuf::new(),
            input_image: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.input_image.is_some()
    }

    /// Draws onto a color copy of the input and saves it. Failures are logged,
    /// never propagated: debug output must not fail an interpretation.
    pub fn write(&self, label: &str, draw: impl FnOnce(&mut RgbImage)) -> Option<PathBuf> {
        let input_image = self.input_image.as_ref()?;
        let mut canvas = to_annotation_canvas(input_image);
        draw(&mut canvas);

        let path = debug_image_path(&self.input_path, label);
        match canvas.save(&path) {
            Ok(()) => {
                debug!("wrote debug image {}", path.display());
                Some(path)
            }
            Err(e) => {
                warn!("could not write debug image {}: {}", path.display(), e);
                None
            }
        }
    }
}

/// Loads a TrueType font used for labels in annotated images.
pub fn load_font(path: &Path) -> std::io::Result<Option<Font<'static>>> {
    Ok(Font::try_from_vec(std::fs::read(path)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircleStyle {
    Filled,
    Outline,
}

impl Answer {
    /// Draws this answer's circle onto a color canvas.
    pub fn mark_answer(&self, canvas: &mut RgbImage, style: CircleStyle, color: Rgb<u8>) {
        let center = (self.x, self.y);
        let radius = self.circle_radius as i32;
        match style {
            CircleStyle::Filled => draw_filled_circle_mut(canvas, center, radius, color),
            CircleStyle::Outline => draw_hollow_circle_mut(canvas, center, radius, color),
        }
    }
}

/// Draws every detected spot with its index, red while unassigned and green
/// once assigned to a question.
pub fn draw_spots_debug_image_mut(
    canvas: &mut RgbImage,
    spots: &[Spot],
    assigned: &[bool],
    radius: u32,
    font: Option<&Font>,
) {
    for (i, spot) in spots.iter().enumerate() {
        let color = if assigned.get(i).copied().unwrap_or(false) {
            GREEN
        } else {
            RED
        };
        draw_hollow_circle_mut(canvas, (spot.x, spot.y), radius as i32, color);
        if let Some(font) = font {
            draw_text_mut(
                canvas,
                color,
                spot.x,
                spot.y,
                Scale::uniform(14.0),
                font,
                &i.to_string(),
            );
        }
    }
}

/// Outlines every scored answer: green when filled, blue otherwise, with the
/// question's search area boxed.
pub fn draw_scored_answers_debug_image_mut(
    canvas: &mut RgbImage,
    scored: &[(&Question, Vec<(&Answer, AnswerScore)>)],
    font: Option<&Font>,
) {
    for (question, scores) in scored {
        draw_hollow_rect_mut(canvas, question.search_area(), DARK_GREEN);
        for (answer, score) in scores {
            let color = if score.filled { GREEN } else { BLUE };
            answer.mark_answer(canvas, CircleStyle::Outline, color);
            if let Some(font) = font {
                draw_text_with_background_mut(
                    canvas,
                    &format!("{:.2}", score.fill),
                    answer.x + answer.circle_radius as i32 + 2,
                    answer.y,
                    Scale::uniform(12.0),
                    font,
                    color,
                    WHITE_RGB,
                );
            }
        }
    }
}

/// Fills every matched answer and labels it `<question id><value>`.
pub fn draw_matched_answers_mut(
    canvas: &mut RgbImage,
    matched: &[(&Question, Vec<&Answer>)],
    font: Option<&Font>,
    color: Rgb<u8>,
) {
    for (question, answers) in matched {
        for answer in answers {
            answer.mark_answer(canvas, CircleStyle::Filled, color);
            if let Some(font) = font {
                let label = format!("{}{}", question.id, answer.value);
                draw_text_mut(
                    canvas,
                    color,
                    answer.x,
                    answer.y,
                    Scale::uniform(14.0),
                    font,
                    &label,
                );
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn draw_text_with_background_mut(
    canvas: &mut RgbImage,
    text: &str,
    x: i32,
    y: i32,
    scale: Scale,
    font: &Font,
    text_color: Rgb<u8>,
    background_color: Rgb<u8>,
) {
    let (text_width, text_height) = text_size(scale, font, text);
    if text_width > 0 && text_height > 0 {
        draw_filled_rect_mut(
            canvas,
            Rect::at(x, y).of_size(text_width as u32, text_height as u32),
            background_color,
        );
    }
    draw_text_mut(canvas, text_color, x, y, scale, font, text);
}
