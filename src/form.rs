use std::fmt::Display;

use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use rusttype::Font;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::{
    align::{normalize, AlignmentError, NormalizeOptions},
    debug::draw_matched_answers_mut,
    fill::{AnswerScore, FillError, FillOverrides},
    image_utils::{crop_to_rect, size_image_to_fit, to_annotation_canvas},
    template::{Answer, Question, Template},
    types::QuestionId,
};

/// One scanned, filled-in instance of a template.
///
/// The form owns its normalized image and only borrows the template, so many
/// forms can be evaluated against one template at the same time. Evaluation
/// never writes to the template; results are returned as values.
pub struct Form<'t> {
    template: &'t Template,
    image: GrayImage,
}

impl<'t> Form<'t> {
    /// Normalizes a raw scan straight into the template's frame.
    pub fn new(
        raw: &DynamicImage,
        template: &'t Template,
        options: &NormalizeOptions,
    ) -> Result<Self, AlignmentError> {
        let options = options.with_target_size(template.size());
        let image = normalize(raw, &options)?;
        Ok(Self::from_normalized(image, template))
    }

    /// Wraps an already-normalized image, resizing it to the template's
    /// dimensions if needed.
    pub fn from_normalized(image: GrayImage, template: &'t Template) -> Self {
        let size = template.size();
        let image = size_image_to_fit(&image, size.width, size.height);
        Self { template, image }
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn template(&self) -> &'t Template {
        self.template
    }

    pub fn questions(&self) -> &'t [Question] {
        self.template.questions()
    }

    /// The filled answers of every question, in template order.
    pub fn matched_answers(
        &self,
        overrides: &FillOverrides,
    ) -> Result<Vec<(&'t Question, Vec<&'t Answer>)>, FillError> {
        self.questions()
            .iter()
            .map(|question| Ok((question, question.find_answers(&self.image, overrides)?)))
            .collect()
    }

    pub fn find_answers(&self, overrides: &FillOverrides) -> Result<FormAnswers, FillError> {
        let questions = self
            .matched_answers(overrides)?
            .into_iter()
            .map(|(question, answers)| QuestionAnswers {
                question_id: question.id.clone(),
                values: answers.iter().map(|a| a.value.clone()).collect(),
            })
            .collect();
        Ok(FormAnswers { questions })
    }

    /// Scores every answer of every question, ignoring selection policy.
    pub fn score_answers(
        &self,
        overrides: &FillOverrides,
    ) -> Result<Vec<(&'t Question, Vec<(&'t Answer, AnswerScore)>)>, FillError> {
        self.questions()
            .iter()
            .map(|question| Ok((question, question.score_answers(&self.image, overrides)?)))
            .collect()
    }

    /// The part of the form image covering one question's answers.
    pub fn question_image(&self, question: &Question) -> GrayImage {
        crop_to_rect(&self.image, &question.search_area())
    }

    /// Renders the form, ink dark on white, with every matched answer filled
    /// in and labelled when a font is available.
    pub fn annotate(
        &self,
        matched: &[(&Question, Vec<&Answer>)],
        font: Option<&Font>,
        color: Rgb<u8>,
    ) -> RgbImage {
        let mut canvas = to_annotation_canvas(&self.image);
        draw_matched_answers_mut(&mut canvas, matched, font, color);
        canvas
    }
}

impl Display for Form<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let answers = self.questions().iter().map(|q| q.answers.len()).sum::<usize>();
        write!(
            f,
            "Form with {} questions and {} answers",
            self.questions().len(),
            answers
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionAnswers {
    pub question_id: QuestionId,
    /// Zero or one value for single-answer questions, any number otherwise.
    pub values: Vec<String>,
}

/// The result of reading one form: each question's matched values, in
/// template order. Serializes as an object keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormAnswers {
    pub questions: Vec<QuestionAnswers>,
}

impl FormAnswers {
    pub fn get(&self, question_id: &QuestionId) -> Option<&[String]> {
        self.questions
            .iter()
            .find(|q| &q.question_id == question_id)
            .map(|q| q.values.as_slice())
    }
}

impl Serialize for FormAnswers {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.questions.len()))?;
        for question in &self.questions {
            map.serialize_entry(&question.question_id, &question.values)?;
        }
        map.end()
    }
}
