use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::answer_key::{extract_answer_key, total_marks_value};
use crate::questionnaire::{parse_questionnaire, QuestionnaireError};

/// Everything the editor form holds besides the questionnaire text.
#[derive(Debug, Clone, Default)]
pub struct AssessmentDraft {
    pub title: String,
    pub description: String,
    pub batch: Option<String>,
    pub test_type: Option<String>,
}

/// Payload handed to the assessment store.
#[derive(Debug, Clone, Serialize)]
pub struct Submission {
    pub title: String,
    pub description: String,
    pub batch: Option<String>,
    pub questionnaire: Value,
    pub answer_key: Map<String, Value>,
    #[serde(serialize_with = "serialize_total_marks")]
    pub total_marks: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_type: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("Invalid questionnaire JSON: {0}")]
    InvalidQuestionnaire(#[from] QuestionnaireError),
    /// Field name -> list of messages.
    #[error("validation failed")]
    Validation(Map<String, Value>),
}

fn serialize_total_marks<S: Serializer>(total: &f64, s: S) -> Result<S::Ok, S::Error> {
    total_marks_value(*total).serialize(s)
}

/// Parses the editor text and splits the answer key out of it.
///
/// A parse failure stops here: nothing is extracted and there is nothing to submit.
pub fn build_submission(
    draft: &AssessmentDraft,
    questionnaire_raw: &str,
) -> Result<Submission, SubmissionError> {
    let parsed = parse_questionnaire(questionnaire_raw)?;
    let extraction = extract_answer_key(&parsed);

    Ok(Submission {
        title: draft.title.clone(),
        description: draft.description.clone(),
        batch: non_blank(draft.batch.as_deref()),
        questionnaire: extraction.clean_document,
        answer_key: extraction.answer_key,
        total_marks: extraction.total_marks,
        test_type: non_blank(draft.test_type.as_deref()),
    })
}

/// Field checks that don't need the store. Batch existence is checked by the caller.
pub fn validate(submission: &Submission) -> Result<(), SubmissionError> {
    let mut errors = Map::new();
    if submission.title.trim().is_empty() {
        errors.insert(
            "title".into(),
            json!(["This field may not be blank."]),
        );
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SubmissionError::Validation(errors))
    }
}

pub fn missing_batch_error(batch_id: &str) -> SubmissionError {
    let mut errors = Map::new();
    errors.insert(
        "batch".into(),
        json!([format!("Invalid pk \"{batch_id}\" - object does not exist.")]),
    );
    SubmissionError::Validation(errors)
}

fn non_blank(v: Option<&str>) -> Option<String> {
    v.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
