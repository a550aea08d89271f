//! Building a template from a calibration scan: every bubble on the page is
//! filled in, detected, and then assigned to questions one question at a time.
//!
//! Assignment is delegated to a [`SpotAssigner`], either a fixed mapping for
//! scripted use or an operator answering prompts. Authoring moves through
//! [`AuthoringState`] until every detected spot belongs to exactly one
//! question, and fails instead of looping when an assignment makes no
//! progress.

use std::collections::HashMap;
use std::fmt::Display;
use std::io::{BufRead, Write};
use std::path::PathBuf;

use image::{DynamicImage, GrayImage, RgbImage};
use log::{debug, info};
use logging_timer::time;
use rusttype::Font;

use crate::{
    align::{normalize, NormalizeOptions},
    debug::draw_spots_debug_image_mut,
    image_utils::to_annotation_canvas,
    spots::{find_spots, Spot, SpotRadius},
    template::{Answer, Question, Template, TemplateError},
    types::QuestionId,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthoringState {
    /// Waiting for the spots of the next question.
    AwaitingAssignment,
    /// A question was just created and spots remain unassigned.
    SpotConsumed,
    /// Every spot belongs to a question.
    AllAssigned,
}

#[derive(Debug)]
pub enum AuthoringError {
    NoSpots,
    MissingAssignment(usize),
    UnknownSpot { index: usize, spot_count: usize },
    AlreadyAssigned(usize),
    /// An assignment consumed no spots; the listed spots would never be
    /// assigned.
    NoProgress {
        question_index: usize,
        unassigned: Vec<usize>,
    },
    /// More questions were requested than there are spots.
    IterationLimit(usize),
    InputClosed,
    Io(std::io::Error),
    Template(TemplateError),
}

impl Display for AuthoringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthoringError::NoSpots => write!(f, "no answer spots were detected"),
            AuthoringError::MissingAssignment(index) => {
                write!(f, "no spots were assigned to question index {}", index)
            }
            AuthoringError::UnknownSpot { index, spot_count } => write!(
                f,
                "spot {} does not exist ({} spots were detected)",
                index, spot_count
            ),
            AuthoringError::AlreadyAssigned(index) => {
                write!(f, "spot {} is already assigned to a question", index)
            }
            AuthoringError::NoProgress {
                question_index,
                unassigned,
            } => write!(
                f,
                "question index {} was given no spots; {} spots remain unassigned: {:?}",
                question_index,
                unassigned.len(),
                unassigned
            ),
            AuthoringError::IterationLimit(limit) => {
                write!(f, "spots were still unassigned after {} questions", limit)
            }
            AuthoringError::InputClosed => write!(f, "input closed before all spots were assigned"),
            AuthoringError::Io(e) => write!(f, "{}", e),
            AuthoringError::Template(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AuthoringError {}

impl From<std::io::Error> for AuthoringError {
    fn from(e: std::io::Error) -> Self {
        AuthoringError::Io(e)
    }
}

impl From<TemplateError> for AuthoringError {
    fn from(e: TemplateError) -> Self {
        AuthoringError::Template(e)
    }
}

/// What an assigner is shown when asked for the next question's spots.
pub struct AssignmentRequest<'a> {
    /// 0-based position of the question being built.
    pub question_index: usize,
    pub question_id: &'a QuestionId,
    /// The template with unassigned spots in red and assigned spots in green.
    pub visualization: &'a RgbImage,
    pub spots: &'a [Spot],
    pub unassigned: Vec<usize>,
}

/// Decides which detected spots (by index) belong to a question.
pub trait SpotAssigner {
    fn assign(&mut self, request: &AssignmentRequest) -> Result<Vec<usize>, AuthoringError>;
}

/// Assigns spots from a fixed question index → spot indices mapping.
#[derive(Debug, Clone, Default)]
pub struct MappingAssigner {
    assignment: HashMap<usize, Vec<usize>>,
}

impl MappingAssigner {
    pub fn new(assignment: HashMap<usize, Vec<usize>>) -> Self {
        Self { assignment }
    }
}

impl SpotAssigner for MappingAssigner {
    fn assign(&mut self, request: &AssignmentRequest) -> Result<Vec<usize>, AuthoringError> {
        self.assignment
            .get(&request.question_index)
            .cloned()
            .ok_or(AuthoringError::MissingAssignment(request.question_index))
    }
}

/// Asks an operator to type comma-separated spot indices.
pub struct ConsoleAssigner<R, W> {
    input: R,
    output: W,
    preview_path: Option<PathBuf>,
}

impl<R: BufRead, W: Write> ConsoleAssigner<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self {
            input,
            output,
            preview_path: None,
        }
    }

    /// Saves the visualization here before every prompt so the operator can
    /// see the spot indices.
    pub fn with_preview_path(self, preview_path: PathBuf) -> Self {
        Self {
            preview_path: Some(preview_path),
            ..self
        }
    }
}

/// Parses `"1, 2,3"` into spot indices.
pub fn parse_spot_indices(line: &str) -> Option<Vec<usize>> {
    line.split(',')
        .map(|token| token.trim().parse::<usize>().ok())
        .collect()
}

impl<R: BufRead, W: Write> SpotAssigner for ConsoleAssigner<R, W> {
    fn assign(&mut self, request: &AssignmentRequest) -> Result<Vec<usize>, AuthoringError> {
        if let Some(path) = &self.preview_path {
            if let Err(e) = request.visualization.save(path) {
                writeln!(self.output, "could not save preview to {}: {}", path.display(), e)?;
            } else {
                writeln!(self.output, "spot indices are shown in {}", path.display())?;
            }
        }

        loop {
            write!(
                self.output,
                "enter answer ids (shown in red) to add to question {} ({} unassigned): ",
                request.question_id,
                request.unassigned.len()
            )?;
            self.output.flush()?;

            let mut line = String::new();
            if self.input.read_line(&mut line)? == 0 {
                return Err(AuthoringError::InputClosed);
            }
            match parse_spot_indices(&line) {
                Some(indices) => return Ok(indices),
                None => writeln!(
                    self.output,
                    "could not read {:?}, expected e.g. 0,1,2",
                    line.trim()
                )?,
            }
        }
    }
}

/// The in-progress assignment of detected spots to questions.
pub struct TemplateAuthoring {
    image: GrayImage,
    spots: Vec<Spot>,
    assigned: Vec<bool>,
    circle_radius: u32,
    question_config: HashMap<QuestionId, bool>,
    questions: Vec<Question>,
    state: AuthoringState,
    font: Option<Font<'static>>,
}

impl TemplateAuthoring {
    /// Starts authoring over a normalized template image and the spots
    /// detected in it.
    pub fn new(image: GrayImage, spots: Vec<Spot>, circle_radius: u32) -> Self {
        let assigned = vec![false; spots.len()];
        let state = if spots.is_empty() {
            AuthoringState::AllAssigned
        } else {
            AuthoringState::AwaitingAssignment
        };
        Self {
            image,
            spots,
            assigned,
            circle_radius,
            question_config: HashMap::new(),
            questions: vec![],
            state,
            font: None,
        }
    }

    /// Sets which questions accept multiple answers. Questions not listed
    /// accept multiple answers.
    pub fn with_question_config(self, question_config: HashMap<QuestionId, bool>) -> Self {
        Self {
            question_config,
            ..self
        }
    }

    /// Labels spot indices in the visualization with this font.
    pub fn with_font(self, font: Font<'static>) -> Self {
        Self {
            font: Some(font),
            ..self
        }
    }

    pub fn state(&self) -> AuthoringState {
        self.state
    }

    pub fn spots(&self) -> &[Spot] {
        &self.spots
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn unassigned(&self) -> Vec<usize> {
        self.assigned
            .iter()
            .enumerate()
            .filter(|(_, &assigned)| !assigned)
            .map(|(i, _)| i)
            .collect()
    }

    pub fn visualization(&self) -> RgbImage {
        let mut canvas = to_annotation_canvas(&self.image);
        draw_spots_debug_image_mut(
            &mut canvas,
            &self.spots,
            &self.assigned,
            self.circle_radius,
            self.font.as_ref(),
        );
        canvas
    }

    /// Question ids are 1-based positions.
    fn next_question_id(&self) -> QuestionId {
        QuestionId::from((self.questions.len() + 1).to_string())
    }

    /// Asks the assigner for the next question's spots and creates that
    /// question. Nothing is consumed unless every index is valid.
    pub fn step(
        &mut self,
        assigner: &mut dyn SpotAssigner,
    ) -> Result<AuthoringState, AuthoringError> {
        if self.state == AuthoringState::AllAssigned {
            return Ok(self.state);
        }

        let question_index = self.questions.len();
        let question_id = self.next_question_id();
        let visualization = self.visualization();
        let unassigned = self.unassigned();
        let indices = assigner.assign(&AssignmentRequest {
            question_index,
            question_id: &question_id,
            visualization: &visualization,
            spots: &self.spots,
            unassigned: unassigned.clone(),
        })?;

        if indices.is_empty() {
            return Err(AuthoringError::NoProgress {
                question_index,
                unassigned,
            });
        }

        let mut claimed = self.assigned.clone();
        for &index in &indices {
            match claimed.get_mut(index) {
                None => {
                    return Err(AuthoringError::UnknownSpot {
                        index,
                        spot_count: self.spots.len(),
                    })
                }
                Some(true) => return Err(AuthoringError::AlreadyAssigned(index)),
                Some(slot) => *slot = true,
            }
        }

        let answers = indices
            .iter()
            .map(|&index| {
                let spot = self.spots[index];
                Answer::new(spot.x, spot.y, format!("val_{}", index), self.circle_radius)
            })
            .collect();
        let multiple = self.question_config.get(&question_id).copied().unwrap_or(true);
        let question = Question::new(question_id, answers, multiple)?;
        debug!(
            "question {} takes {} spots (multiple: {})",
            question.id,
            question.answers.len(),
            question.multiple
        );

        self.assigned = claimed;
        self.questions.push(question);
        self.state = if self.assigned.iter().all(|&a| a) {
            AuthoringState::AllAssigned
        } else {
            AuthoringState::SpotConsumed
        };
        Ok(self.state)
    }

    /// Steps until every spot is assigned, then builds the template.
    pub fn run(mut self, assigner: &mut dyn SpotAssigner) -> Result<Template, AuthoringError> {
        if self.spots.is_empty() {
            return Err(AuthoringError::NoSpots);
        }
        // every successful step consumes at least one spot
        let limit = self.spots.len();
        while self.step(assigner)? != AuthoringState::AllAssigned {
            if self.questions.len() >= limit {
                return Err(AuthoringError::IterationLimit(limit));
            }
        }

        info!(
            "authored template with {} questions over {} spots",
            self.questions.len(),
            self.spots.len()
        );
        Ok(Template::new(self.image, self.questions, self.circle_radius)?)
    }
}

/// Normalizes a calibration scan, detects its bubbles and assigns them to
/// questions. Answers get placeholder values `val_<spot index>`. With a font,
/// the assigner's visualization labels every spot with its index.
#[time]
pub fn build_template(
    raw: &DynamicImage,
    circle_radius: u32,
    assigner: &mut dyn SpotAssigner,
    question_config: HashMap<QuestionId, bool>,
    font: Option<Font<'static>>,
    options: &NormalizeOptions,
) -> Result<Template, AuthoringError> {
    let image = normalize(raw, options).map_err(TemplateError::from)?;
    let spots = find_spots(&image, &SpotRadius::around(circle_radius));
    let authoring =
        TemplateAuthoring::new(image, spots, circle_radius).with_question_config(question_config);
    match font {
        Some(font) => authoring.with_font(font),
        None => authoring,
    }
    .run(assigner)
}
