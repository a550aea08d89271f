use std::collections::HashSet;
use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::Path;

use image::{DynamicImage, GrayImage};
use imageproc::rect::Rect;
use log::info;
use serde::{Deserialize, Serialize};

use crate::{
    align::{normalize, page_perspective, AlignmentError, NormalizeOptions, PagePerspective},
    spots::Spot,
    types::{QuestionId, Size},
};

pub const DEFAULT_FILLED_THRESHOLD: f32 = 0.8;

/// One physical answer bubble.
#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub x: i32,
    pub y: i32,
    /// What a mark in this bubble means, e.g. `"A"` or `"val_42"`.
    pub value: String,
    pub circle_radius: u32,
    /// Minimum fraction of the circle that must be ink to count as marked.
    pub filled_threshold: f32,
}

impl Answer {
    pub fn new(x: i32, y: i32, value: impl Into<String>, circle_radius: u32) -> Self {
        Self {
            x,
            y,
            value: value.into(),
            circle_radius,
            filled_threshold: DEFAULT_FILLED_THRESHOLD,
        }
    }

    pub fn with_filled_threshold(self, filled_threshold: f32) -> Self {
        Self {
            filled_threshold,
            ..self
        }
    }

    /// Whether the whole circle lies inside an image of the given size.
    pub fn fits_within(&self, size: Size<u32>) -> bool {
        let r = self.circle_radius as i64;
        let (x, y) = (self.x as i64, self.y as i64);
        x - r >= 0 && y - r >= 0 && x + r < size.width as i64 && y + r < size.height as i64
    }
}

/// How spots inside a search area are ordered before values are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    /// Left to right.
    Row,
    /// Top to bottom.
    Column,
    /// Top to bottom, then left to right, like reading a page.
    Grid,
}

/// An ordered group of answers sharing a selection policy.
#[derive(Debug, Clone, PartialEq)]
pub struct Question {
    pub id: QuestionId,
    /// Order matters: for single-answer questions the first filled answer wins.
    pub answers: Vec<Answer>,
    pub multiple: bool,
}

impl Question {
    pub fn new(
        id: QuestionId,
        answers: Vec<Answer>,
        multiple: bool,
    ) -> Result<Self, TemplateError> {
        if answers.is_empty() {
            return Err(TemplateError::EmptyQuestion(id));
        }
        Ok(Self {
            id,
            answers,
            multiple,
        })
    }

    /// Builds a question from the detected spots that fall inside a search
    /// area, pairing them with `values` in `orientation` order. The number of
    /// values must match the number of spots found.
    #[allow(clippy::too_many_arguments)]
    pub fn from_search_area(
        id: QuestionId,
        x_range: RangeInclusive<i32>,
        y_range: RangeInclusive<i32>,
        orientation: Orientation,
        values: &[String],
        spots: &[Spot],
        circle_radius: u32,
        multiple: bool,
    ) -> Result<Self, TemplateError> {
        let mut inside = spots
            .iter()
            .filter(|spot| x_range.contains(&spot.x) && y_range.contains(&spot.y))
            .copied()
            .collect::<Vec<Spot>>();

        match orientation {
            Orientation::Row => inside.sort_by_key(|spot| spot.x),
            Orientation::Column => inside.sort_by_key(|spot| spot.y),
            Orientation::Grid => inside.sort_by_key(|spot| (spot.y, spot.x)),
        }

        if inside.len() != values.len() {
            return Err(TemplateError::CountMismatch {
                question_id: id,
                values: values.len(),
                spots: inside.len(),
            });
        }

        let answers = values
            .iter()
            .zip(inside)
            .map(|(value, spot)| Answer::new(spot.x, spot.y, value.clone(), circle_radius))
            .collect();
        Self::new(id, answers, multiple)
    }

    /// The rect spanning every answer center. Only used for display.
    pub fn search_area(&self) -> Rect {
        let min_x = self.answers.iter().map(|a| a.x).min().unwrap_or_default();
        let max_x = self.answers.iter().map(|a| a.x).max().unwrap_or_default();
        let min_y = self.answers.iter().map(|a| a.y).min().unwrap_or_default();
        let max_y = self.answers.iter().map(|a| a.y).max().unwrap_or_default();
        Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32)
    }
}

#[derive(Debug)]
pub enum TemplateError {
    EmptyQuestion(QuestionId),
    DuplicateQuestionId(QuestionId),
    InvalidRadius {
        question_id: QuestionId,
        value: String,
    },
    InvalidThreshold {
        question_id: QuestionId,
        value: String,
        threshold: f32,
    },
    AnswerOutOfBounds {
        question_id: QuestionId,
        value: String,
        x: i32,
        y: i32,
        radius: u32,
    },
    CountMismatch {
        question_id: QuestionId,
        values: usize,
        spots: usize,
    },
    Alignment(AlignmentError),
    Image(image::ImageError),
    Json(serde_json::Error),
    Io(std::io::Error),
}

impl Display for TemplateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TemplateError::EmptyQuestion(id) => write!(f, "question {} has no answers", id),
            TemplateError::DuplicateQuestionId(id) => write!(f, "question {} is defined twice", id),
            TemplateError::InvalidRadius { question_id, value } => write!(
                f,
                "answer {} of question {} has a zero radius",
                value, question_id
            ),
            TemplateError::InvalidThreshold {
                question_id,
                value,
                threshold,
            } => write!(
                f,
                "answer {} of question {} has threshold {} outside [0, 1]",
                value, question_id, threshold
            ),
            TemplateError::AnswerOutOfBounds {
                question_id,
                value,
                x,
                y,
                radius,
            } => write!(
                f,
                "answer {} of question {} at ({}, {}) with radius {} is outside the template image",
                value, question_id, x, y, radius
            ),
            TemplateError::CountMismatch {
                question_id,
                values,
                spots,
            } => write!(
                f,
                "question {} has {} values but {} spots were found",
                question_id, values, spots
            ),
            TemplateError::Alignment(e) => write!(f, "{}", e),
            TemplateError::Image(e) => write!(f, "template image: {}", e),
            TemplateError::Json(e) => write!(f, "template definition: {}", e),
            TemplateError::Io(e) => write!(f, "template definition: {}", e),
        }
    }
}

impl std::error::Error for TemplateError {}

impl From<AlignmentError> for TemplateError {
    fn from(e: AlignmentError) -> Self {
        TemplateError::Alignment(e)
    }
}

impl From<image::ImageError> for TemplateError {
    fn from(e: image::ImageError) -> Self {
        TemplateError::Image(e)
    }
}

impl From<serde_json::Error> for TemplateError {
    fn from(e: serde_json::Error) -> Self {
        TemplateError::Json(e)
    }
}

impl From<std::io::Error> for TemplateError {
    fn from(e: std::io::Error) -> Self {
        TemplateError::Io(e)
    }
}

/// The geometric and semantic description of a form layout.
///
/// The reference image is always normalized (thresholded and aligned); all
/// answer coordinates are in its pixel frame. A template is read-only once
/// built and can be shared across any number of form evaluations.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    image: GrayImage,
    questions: Vec<Question>,
    circle_radius: u32,
}

impl Template {
    /// Creates a template over an already-normalized reference image.
    pub fn new(
        image: GrayImage,
        questions: Vec<Question>,
        circle_radius: u32,
    ) -> Result<Self, TemplateError> {
        let size = Size::of_image(image.dimensions());
        let mut seen = HashSet::new();

        for question in &questions {
            if !seen.insert(&question.id) {
                return Err(TemplateError::DuplicateQuestionId(question.id.clone()));
            }
            if question.answers.is_empty() {
                return Err(TemplateError::EmptyQuestion(question.id.clone()));
            }
            for answer in &question.answers {
                if answer.circle_radius == 0 {
                    return Err(TemplateError::InvalidRadius {
                        question_id: question.id.clone(),
                        value: answer.value.clone(),
                    });
                }
                if !(0.0..=1.0).contains(&answer.filled_threshold) {
                    return Err(TemplateError::InvalidThreshold {
                        question_id: question.id.clone(),
                        value: answer.value.clone(),
                        threshold: answer.filled_threshold,
                    });
                }
                if !answer.fits_within(size) {
                    return Err(TemplateError::AnswerOutOfBounds {
                        question_id: question.id.clone(),
                        value: answer.value.clone(),
                        x: answer.x,
                        y: answer.y,
                        radius: answer.circle_radius,
                    });
                }
            }
        }

        Ok(Self {
            image,
            questions,
            circle_radius,
        })
    }

    /// Normalizes a raw reference scan and builds a template over it.
    pub fn from_raw_image(
        raw: &DynamicImage,
        questions: Vec<Question>,
        circle_radius: u32,
        options: &NormalizeOptions,
    ) -> Result<Self, TemplateError> {
        let image = normalize(raw, options)?;
        Self::new(image, questions, circle_radius)
    }

    pub fn image(&self) -> &GrayImage {
        &self.image
    }

    pub fn size(&self) -> Size<u32> {
        Size::of_image(self.image.dimensions())
    }

    pub fn questions(&self) -> &[Question] {
        &self.questions
    }

    pub fn circle_radius(&self) -> u32 {
        self.circle_radius
    }

    /// Detects the outer box of the reference image and the transform that
    /// maps it onto the template frame.
    pub fn perspective(
        &self,
        options: &NormalizeOptions,
    ) -> Result<PagePerspective, AlignmentError> {
        page_perspective(&self.image, options)
    }

    pub fn to_definition(&self) -> TemplateDefinition {
        let shared_threshold = self
            .questions
            .iter()
            .flat_map(|q| q.answers.iter())
            .map(|a| a.filled_threshold)
            .next()
            .filter(|&t| {
                self.questions
                    .iter()
                    .flat_map(|q| q.answers.iter())
                    .all(|a| a.filled_threshold == t)
            })
            .filter(|&t| t != DEFAULT_FILLED_THRESHOLD);
        let effective_threshold = shared_threshold.unwrap_or(DEFAULT_FILLED_THRESHOLD);

        let questions = self
            .questions
            .iter()
            .map(|question| {
                let answers = question
                    .answers
                    .iter()
                    .map(|answer| AnswerDefinition {
                        answer_val: answer.value.clone(),
                        answer_coords: (answer.x, answer.y),
                        radius: Some(answer.circle_radius)
                            .filter(|&r| r != self.circle_radius),
                        filled_threshold: Some(answer.filled_threshold)
                            .filter(|&t| t != effective_threshold),
                    })
                    .collect();
                (
                    question.id.clone(),
                    QuestionDefinition {
                        multiple: question.multiple,
                        answers,
                    },
                )
            })
            .collect();

        TemplateDefinition {
            config: TemplateConfig {
                radius: self.circle_radius,
                filled_threshold: shared_threshold,
            },
            questions,
        }
    }

    /// Rebuilds a template from its definition over an already-normalized
    /// reference image.
    pub fn from_definition(
        definition: TemplateDefinition,
        image: GrayImage,
    ) -> Result<Self, TemplateError> {
        let radius = definition.config.radius;
        let threshold = definition
            .config
            .filled_threshold
            .unwrap_or(DEFAULT_FILLED_THRESHOLD);

        let questions = definition
            .questions
            .into_iter()
            .map(|(id, question)| {
                let answers = question
                    .answers
                    .into_iter()
                    .map(|answer| {
                        let (x, y) = answer.answer_coords;
                        Answer::new(x, y, answer.answer_val, answer.radius.unwrap_or(radius))
                            .with_filled_threshold(answer.filled_threshold.unwrap_or(threshold))
                    })
                    .collect();
                Question::new(id, answers, question.multiple)
            })
            .collect::<Result<Vec<Question>, TemplateError>>()?;

        Self::new(image, questions, radius)
    }

    pub fn to_json(&self) -> Result<String, TemplateError> {
        Ok(serde_json::to_string_pretty(&self.to_definition())?)
    }

    pub fn from_json(json: &str, image: GrayImage) -> Result<Self, TemplateError> {
        let definition: TemplateDefinition = serde_json::from_str(json)?;
        Self::from_definition(definition, image)
    }

    /// Loads a template definition and normalizes its companion reference
    /// image.
    pub fn load(
        definition_path: &Path,
        image_path: &Path,
        options: &NormalizeOptions,
    ) -> Result<Self, TemplateError> {
        let json = std::fs::read_to_string(definition_path)?;
        let raw = image::open(image_path)?;
        let image = normalize(&raw, options)?;
        let template = Self::from_json(&json, image)?;
        info!(
            "loaded template with {} questions from {}",
            template.questions.len(),
            definition_path.display()
        );
        Ok(template)
    }

    pub fn save(&self, definition_path: &Path) -> Result<(), TemplateError> {
        std::fs::write(definition_path, self.to_json()?)?;
        Ok(())
    }
}

/// The persisted form of a template.
///
/// ```json
/// {
///   "config": { "radius": 15 },
///   "questions": {
///     "1": {
///       "multiple": false,
///       "answers": [{ "answer_val": "A", "answer_coords": [120, 80] }]
///     }
///   }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub config: TemplateConfig,
    /// Kept in document order.
    #[serde(with = "ordered_questions")]
    pub questions: Vec<(QuestionId, QuestionDefinition)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateConfig {
    pub radius: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_threshold: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionDefinition {
    #[serde(default)]
    pub multiple: bool,
    pub answers: Vec<AnswerDefinition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerDefinition {
    pub answer_val: String,
    pub answer_coords: (i32, i32),
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filled_threshold: Option<f32>,
}

// Questions are a JSON object keyed by id, but their order is meaningful.
mod ordered_questions {
    use std::fmt;

    use serde::de::{MapAccess, Visitor};
    use serde::ser::SerializeMap;
    use serde::{Deserializer, Serializer};

    use super::QuestionDefinition;
    use crate::types::QuestionId;

    pub fn serialize<S>(
        questions: &[(QuestionId, QuestionDefinition)],
        serializer: S,
    ) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(questions.len()))?;
        for (id, question) in questions {
            map.serialize_entry(id, question)?;
        }
        map.end()
    }

    pub fn deserialize<'de, D>(
        deserializer: D,
    ) -> Result<Vec<(QuestionId, QuestionDefinition)>, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct QuestionsVisitor;

        impl<'de> Visitor<'de> for QuestionsVisitor {
            type Value = Vec<(QuestionId, QuestionDefinition)>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of question ids to questions")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut questions = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some(entry) = access.next_entry()? {
                    questions.push(entry);
                }
                Ok(questions)
            }
        }

        deserializer.deserialize_map(QuestionsVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn reference() -> GrayImage {
        GrayImage::new(200, 100)
    }

    fn sample_template() -> Template {
        let questions = vec![
            Question::new(
                QuestionId::from("10"),
                vec![
                    Answer::new(20, 20, "A", 8),
                    Answer::new(40, 20, "B", 8),
                    Answer::new(60, 20, "C", 8),
                ],
                false,
            )
            .unwrap(),
            Question::new(
                QuestionId::from("2"),
                vec![Answer::new(20, 60, "yes", 8), Answer::new(40, 60, "no", 12)],
                true,
            )
            .unwrap(),
        ];
        Template::new(reference(), questions, 8).unwrap()
    }

    #[test]
    fn definition_round_trip_preserves_order() {
        let template = sample_template();
        let restored = Template::from_definition(template.to_definition(), reference()).unwrap();

        assert_eq!(restored, template);
        let ids = restored
            .questions()
            .iter()
            .map(|q| q.id.as_str())
            .collect::<Vec<&str>>();
        assert_eq!(ids, vec!["10", "2"]);
    }

    #[test]
    fn json_keeps_document_order() {
        let json = r#"{
            "config": { "radius": 5 },
            "questions": {
                "b": {
                    "multiple": true,
                    "answers": [{ "answer_val": "x", "answer_coords": [10, 10] }]
                },
                "a": { "answers": [
                    { "answer_val": "val_1", "answer_coords": [30, 10] },
                    { "answer_val": "val_0", "answer_coords": [20, 10] }
                ] }
            }
        }"#;
        let template = Template::from_json(json, reference()).unwrap();

        assert_eq!(template.questions()[0].id, QuestionId::from("b"));
        assert!(template.questions()[0].multiple);
        let second = &template.questions()[1];
        assert_eq!(second.id, QuestionId::from("a"));
        assert!(!second.multiple);
        assert_eq!(second.answers[0].value, "val_1");
        assert_eq!((second.answers[1].x, second.answers[1].y), (20, 10));
        assert_eq!(second.answers[1].circle_radius, 5);
        assert_eq!(second.answers[1].filled_threshold, DEFAULT_FILLED_THRESHOLD);

        let written = template.to_json().unwrap();
        assert!(written.find("\"b\"").unwrap() < written.find("\"a\"").unwrap());
    }

    #[test]
    fn radius_override_is_only_written_when_it_differs() {
        let definition = sample_template().to_definition();
        let (_, second) = &definition.questions[1];
        assert_eq!(second.answers[0].radius, None);
        assert_eq!(second.answers[1].radius, Some(12));
        assert_eq!(definition.config.filled_threshold, None);
    }

    #[test]
    fn shared_threshold_is_written_to_config() {
        let questions = vec![Question::new(
            QuestionId::from("1"),
            vec![
                Answer::new(20, 20, "A", 8).with_filled_threshold(0.5),
                Answer::new(40, 20, "B", 8).with_filled_threshold(0.5),
            ],
            false,
        )
        .unwrap()];
        let template = Template::new(reference(), questions, 8).unwrap();
        let definition = template.to_definition();

        assert_eq!(definition.config.filled_threshold, Some(0.5));
        assert!(definition.questions[0].1.answers.iter().all(|a| a.filled_threshold.is_none()));
        assert_eq!(Template::from_definition(definition, reference()).unwrap(), template);
    }

    #[test]
    fn duplicate_question_ids_are_rejected() {
        let answers = vec![Answer::new(20, 20, "A", 8)];
        let question = Question::new(QuestionId::from("1"), answers, false).unwrap();
        let result = Template::new(reference(), vec![question.clone(), question], 8);
        assert!(matches!(
            result,
            Err(TemplateError::DuplicateQuestionId(id)) if id.as_str() == "1"
        ));
    }

    #[test]
    fn empty_questions_are_rejected() {
        assert!(matches!(
            Question::new(QuestionId::from("1"), vec![], true),
            Err(TemplateError::EmptyQuestion(_))
        ));
    }

    #[test]
    fn answers_must_fit_inside_the_reference_image() {
        let question = Question::new(
            QuestionId::from("1"),
            vec![Answer::new(195, 50, "edge", 8)],
            false,
        )
        .unwrap();
        assert!(matches!(
            Template::new(reference(), vec![question], 8),
            Err(TemplateError::AnswerOutOfBounds { x: 195, .. })
        ));
    }

    #[test]
    fn thresholds_outside_the_unit_range_are_rejected() {
        for threshold in [1.5, -0.1, f32::NAN] {
            let question = Question::new(
                QuestionId::from("1"),
                vec![Answer::new(20, 20, "A", 8).with_filled_threshold(threshold)],
                false,
            )
            .unwrap();
            match Template::new(reference(), vec![question], 8) {
                Err(TemplateError::InvalidThreshold {
                    question_id,
                    value,
                    threshold: rejected,
                }) => {
                    assert_eq!(question_id, QuestionId::from("1"));
                    assert_eq!(value, "A");
                    assert!(rejected.is_nan() || rejected == threshold);
                }
                other => panic!("expected an invalid threshold, got {:?}", other.map(|_| ())),
            }
        }

        let edges = Question::new(
            QuestionId::from("1"),
            vec![
                Answer::new(20, 20, "A", 8).with_filled_threshold(0.0),
                Answer::new(40, 20, "B", 8).with_filled_threshold(1.0),
            ],
            false,
        )
        .unwrap();
        assert!(Template::new(reference(), vec![edges], 8).is_ok());
    }

    #[test]
    fn zero_radius_is_rejected() {
        let question =
            Question::new(QuestionId::from("1"), vec![Answer::new(50, 50, "A", 0)], false).unwrap();
        assert!(matches!(
            Template::new(reference(), vec![question], 0),
            Err(TemplateError::InvalidRadius { .. })
        ));
    }

    #[test]
    fn search_area_spans_answer_centers() {
        let template = sample_template();
        let area = template.questions()[0].search_area();
        assert_eq!((area.left(), area.top()), (20, 20));
        assert_eq!((area.right(), area.bottom()), (60, 20));
    }

    #[test]
    fn question_from_search_area_orders_spots() {
        let spots = [
            Spot::new(10, 40),
            Spot::new(10, 10),
            Spot::new(30, 10),
            Spot::new(30, 40),
            Spot::new(90, 90),
        ];
        let values = ["a", "b", "c", "d"].map(String::from);

        let grid = Question::from_search_area(
            QuestionId::from("q"),
            0..=50,
            0..=50,
            Orientation::Grid,
            &values,
            &spots,
            5,
            false,
        )
        .unwrap();
        let coords = grid.answers.iter().map(|a| (a.x, a.y)).collect::<Vec<_>>();
        assert_eq!(coords, vec![(10, 10), (30, 10), (10, 40), (30, 40)]);
        assert_eq!(grid.answers[2].value, "c");

        let column = Question::from_search_area(
            QuestionId::from("q"),
            0..=20,
            0..=50,
            Orientation::Column,
            &values[..2],
            &spots,
            5,
            false,
        )
        .unwrap();
        assert_eq!(column.answers[0].y, 10);
    }

    #[test]
    fn question_from_search_area_requires_matching_counts() {
        let spots = [Spot::new(10, 10), Spot::new(30, 10)];
        let values = ["only".to_string()];
        let result = Question::from_search_area(
            QuestionId::from("q"),
            0..=50,
            0..=50,
            Orientation::Row,
            &values,
            &spots,
            5,
            false,
        );
        assert!(matches!(
            result,
            Err(TemplateError::CountMismatch {
                values: 1,
                spots: 2,
                ..
            })
        ));
    }

    #[test]
    fn perspective_of_the_reference_image() {
        let layout = crate::test_utils::FormLayout::standard();
        let raw = DynamicImage::ImageLuma8(layout.render_calibration());
        let options = NormalizeOptions::default();
        let template = Template::from_raw_image(&raw, vec![], 8, &options).unwrap();

        let perspective = template.perspective(&options).unwrap();
        let size = template.size();
        let slack = 2 * crate::test_utils::FRAME_THICKNESS as i64 + 8;
        assert!((perspective.size.width as i64 - size.width as i64).abs() <= slack);
        assert!((perspective.size.height as i64 - size.height as i64).abs() <= slack);
    }

    #[test]
    fn save_and_load_definition_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.json");
        let template = sample_template();

        template.save(&path).unwrap();
        let json = std::fs::read_to_string(&path).unwrap();
        let restored = Template::from_json(&json, reference()).unwrap();
        assert_eq!(restored, template);
    }
}
