use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Demographics collected on the first step of the wizard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientInfo {
    /// Age in months
    pub age: i32,
    pub sex: Sex,
    pub born_with_jaundice: bool,
    pub family_history_asd: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
}

impl Sex {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Answer {
    Yes,
    No,
}

impl Answer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Answer::Yes => "yes",
            Answer::No => "no",
        }
    }
}

/// How a "yes" answer counts toward the total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Scoring {
    /// "No" scores a point
    Reverse,
    /// "Yes" scores a point
    Direct,
}

/// The ten fixed behavioral questions
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QuestionId {
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
    Q6,
    Q7,
    Q8,
    Q9,
    Q10,
}

impl QuestionId {
    pub const ALL: [QuestionId; 10] = [
        QuestionId::Q1,
        QuestionId::Q2,
        QuestionId::Q3,
        QuestionId::Q4,
        QuestionId::Q5,
        QuestionId::Q6,
        QuestionId::Q7,
        QuestionId::Q8,
        QuestionId::Q9,
        QuestionId::Q10,
    ];

    pub fn prompt(&self) -> &'static str {
        match self {
            QuestionId::Q1 => "Looks when name is called",
            QuestionId::Q2 => "Makes eye contact easily",
            QuestionId::Q3 => "Points to request objects",
            QuestionId::Q4 => "Points to share interest",
            QuestionId::Q5 => "Engages in pretend play",
            QuestionId::Q6 => "Follows gaze",
            QuestionId::Q7 => "Seeks comfort when upset",
            QuestionId::Q8 => "Typical first words",
            QuestionId::Q9 => "Uses gestures",
            QuestionId::Q10 => "Stares at nothing",
        }
    }

    pub fn scoring(&self) -> Scoring {
        match self {
            QuestionId::Q10 => Scoring::Direct,
            _ => Scoring::Reverse,
        }
    }

    /// Key the prediction backend expects for this question
    pub fn wire_key(&self) -> &'static str {
        match self {
            QuestionId::Q1 => "A1",
            QuestionId::Q2 => "A2",
            QuestionId::Q3 => "A3",
            QuestionId::Q4 => "A4",
            QuestionId::Q5 => "A5",
            QuestionId::Q6 => "A6",
            QuestionId::Q7 => "A7",
            QuestionId::Q8 => "A8",
            QuestionId::Q9 => "A9",
            QuestionId::Q10 => "A10",
        }
    }
}

impl fmt::Display for QuestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::str::FromStr for QuestionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QuestionId::ALL
            .iter()
            .copied()
            .find(|id| id.to_string().eq_ignore_ascii_case(s) || id.wire_key().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("Unknown question id: {}", s))
    }
}

/// Answers to the ten questions; every entry starts unanswered
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionnaireResponses(BTreeMap<QuestionId, Option<Answer>>);

impl QuestionnaireResponses {
    pub fn new() -> Self {
        Self(QuestionId::ALL.iter().map(|id| (*id, None)).collect())
    }

    pub fn set(&mut self, question: QuestionId, answer: Answer) {
        self.0.insert(question, Some(answer));
    }

    pub fn get(&self, question: QuestionId) -> Option<Answer> {
        self.0.get(&question).copied().flatten()
    }

    pub fn unanswered(&self) -> Vec<QuestionId> {
        QuestionId::ALL
            .iter()
            .copied()
            .filter(|id| self.get(*id).is_none())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.unanswered().is_empty()
    }

    /// All ten answers, or `None` while any question is unanswered
    pub fn completed(&self) -> Option<BTreeMap<QuestionId, Answer>> {
        QuestionId::ALL
            .iter()
            .map(|id| self.get(*id).map(|answer| (*id, answer)))
            .collect()
    }
}

impl Default for QuestionnaireResponses {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Parses the backend's risk label, ignoring case
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(RiskLevel::Low),
            "MODERATE" => Some(RiskLevel::Moderate),
            "HIGH" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Moderate => write!(f, "MODERATE"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

/// Binary model output; serialized as `0` or `1`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum PredictionLabel {
    LowRisk,
    ElevatedRisk,
}

impl PredictionLabel {
    pub fn display_label(&self) -> &'static str {
        match self {
            PredictionLabel::LowRisk => "LOW_RISK",
            PredictionLabel::ElevatedRisk => "ELEVATED_RISK",
        }
    }
}

impl From<PredictionLabel> for u8 {
    fn from(label: PredictionLabel) -> Self {
        match label {
            PredictionLabel::LowRisk => 0,
            PredictionLabel::ElevatedRisk => 1,
        }
    }
}

impl TryFrom<u8> for PredictionLabel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PredictionLabel::LowRisk),
            1 => Ok(PredictionLabel::ElevatedRisk),
            other => Err(format!("prediction must be 0 or 1, got {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireAssessment {
    pub predicted_label: PredictionLabel,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    pub total_score: u32,
    /// Set when the service omitted `risk_level` and it was derived locally
    pub risk_level_derived: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionalScore {
    pub region: String,
    pub attention_score: f64,
    pub clinical_note: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageAssessment {
    pub predicted_label: PredictionLabel,
    pub confidence: f64,
    #[serde(with = "base64_bytes")]
    pub heatmap_image: Option<Vec<u8>>,
    #[serde(with = "base64_bytes")]
    pub lime_image: Option<Vec<u8>>,
    pub attention_regions: Vec<String>,
    pub explanation_text: String,
    pub regional_scores: Vec<RegionalScore>,
}

/// Image chosen by the operator, together with its UI preview
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedImage {
    #[serde(with = "base64_required")]
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: String,
    #[serde(default)]
    pub preview: Option<String>,
}

/// The ten answers as sent to the questionnaire service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuestionnaireSubmission {
    pub patient: PatientInfo,
    pub answers: BTreeMap<QuestionId, Answer>,
}

mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }
}

mod base64_required {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.trim())
            .map_err(|e| D::Error::custom(format!("invalid base64 image: {}", e)))
    }
}
