use std::fmt::Display;
use std::path::{Path, PathBuf};

use image::DynamicImage;
use log::{debug, warn};
use logging_timer::time;
use rayon::prelude::*;
use rusttype::Font;

use crate::align::{AlignmentError, NormalizeOptions};
use crate::debug::{draw_matched_answers_mut, draw_scored_answers_debug_image_mut, ImageDebugWriter};
use crate::fill::{FillError, FillOverrides};
use crate::form::{Form, FormAnswers};
use crate::image_utils::{rotate_to_landscape, GREEN};
use crate::template::Template;

/// Per-run tunables for reading scanned forms.
#[derive(Debug, Clone, Default)]
pub struct InterpretOptions {
    pub debug: bool,
    pub overrides: FillOverrides,
    /// Rotate scans that are taller than wide before aligning them.
    pub rotate_portrait: bool,
    pub normalize: NormalizeOptions,
}

pub type InterpretFormResult = Result<FormAnswers, InterpretError>;

#[derive(Debug)]
pub enum InterpretError {
    ImageOpen(PathBuf),
    Alignment(PathBuf, AlignmentError),
    Fill(PathBuf, FillError),
}

impl Display for InterpretError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InterpretError::ImageOpen(path) => write!(f, "could not open image {}", path.display()),
            InterpretError::Alignment(path, e) => write!(f, "{}: {}", path.display(), e),
            InterpretError::Fill(path, e) => write!(f, "{}: {}", path.display(), e),
        }
    }
}

impl std::error::Error for InterpretError {}

#[time]
pub fn load_form_image(
    image_path: &Path,
    options: &InterpretOptions,
) -> Result<DynamicImage, InterpretError> {
    let img = image::open(image_path)
        .map_err(|_| InterpretError::ImageOpen(image_path.to_path_buf()))?;
    Ok(if options.rotate_portrait {
        rotate_to_landscape(img)
    } else {
        img
    })
}

/// Reads one scanned form against a template.
#[time]
pub fn interpret_form(
    image_path: &Path,
    template: &Template,
    options: &InterpretOptions,
    font: Option<&Font>,
) -> InterpretFormResult {
    let raw = load_form_image(image_path, options)?;
    let form = Form::new(&raw, template, &options.normalize)
        .map_err(|e| InterpretError::Alignment(image_path.to_path_buf(), e))?;
    let fill_error = |e| InterpretError::Fill(image_path.to_path_buf(), e);

    let matched = form.matched_answers(&options.overrides).map_err(fill_error)?;

    let debug = if options.debug {
        ImageDebugWriter::new(image_path.to_path_buf(), form.image().clone())
    } else {
        ImageDebugWriter::disabled()
    };
    if debug.is_enabled() {
        let scored = form.score_answers(&options.overrides).map_err(fill_error)?;
        debug.write("scores", |canvas| {
            draw_scored_answers_debug_image_mut(canvas, &scored, font)
        });
        debug.write("answers", |canvas| {
            draw_matched_answers_mut(canvas, &matched, font, GREEN)
        });
    }

    let answers = form.find_answers(&options.overrides).map_err(fill_error)?;
    debug!("{}: {}", image_path.display(), form);
    Ok(answers)
}

/// Reads many scanned forms in parallel against one shared template. Each
/// form succeeds or fails on its own; results come back in input order.
#[time]
pub fn interpret_forms(
    image_paths: &[PathBuf],
    template: &Template,
    options: &InterpretOptions,
    font: Option<&Font>,
) -> Vec<(PathBuf, InterpretFormResult)> {
    image_paths
        .par_iter()
        .map(|path| {
            let result = interpret_form(path, template, options, font);
            if let Err(e) = &result {
                warn!("skipping form: {}", e);
            }
            (path.clone(), result)
        })
        .collect()
}
