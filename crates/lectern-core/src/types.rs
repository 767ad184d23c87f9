use serde::{Deserialize, Serialize};

/// Face bounding box in pixel coordinates, corner form as the recognition
/// service returns it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x_min: i32,
    pub y_min: i32,
    pub x_max: i32,
    pub y_max: i32,
    /// Detector confidence for this face.
    pub probability: f32,
}

impl BoundingBox {
    pub fn width(&self) -> i32 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> i32 {
        self.y_max - self.y_min
    }
}

/// One candidate identity for a detected face. Subjects are enrolled under
/// their student id, so `subject_id` correlates directly to an enrollment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectMatch {
    #[serde(rename = "subject")]
    pub subject_id: String,
    /// Similarity to the enrolled reference, in [0, 1].
    pub similarity: f32,
}

/// Age range estimate from the recognition service's age plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgeEstimate {
    pub low: u32,
    pub high: u32,
}

/// Categorical estimate (gender, mask) from a recognition-service plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelEstimate {
    pub value: String,
}

/// A single face detection: a bounding box plus identity candidates ranked
/// best-first, with optional plugin metadata carried through for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bounding_box: BoundingBox,
    #[serde(default)]
    pub subjects: Vec<SubjectMatch>,
    #[serde(default)]
    pub age: Option<AgeEstimate>,
    #[serde(default)]
    pub gender: Option<LabelEstimate>,
    #[serde(default)]
    pub mask: Option<LabelEstimate>,
}

impl Detection {
    /// Top-ranked match, if its similarity clears `threshold`.
    ///
    /// Detections with no subjects or a weak best match are ignored by the
    /// engine and never create presence state.
    pub fn best_match(&self, threshold: f32) -> Option<&SubjectMatch> {
        self.subjects.first().filter(|m| m.similarity >= threshold)
    }
}

/// Binary liveness verdict for one detection at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Live,
    Spoof,
}

impl Verdict {
    /// Interpret a classifier score pair. Live only wins outright; a tie
    /// counts as spoof.
    pub fn from_scores(live_score: f32, spoof_score: f32) -> Self {
        if live_score > spoof_score {
            Verdict::Live
        } else {
            Verdict::Spoof
        }
    }

    pub fn is_spoof(self) -> bool {
        matches!(self, Verdict::Spoof)
    }
}
