use serde_json::Value;

/// Document a new assessment starts from: one radio-group question with its grading inline.
pub const STARTER_TEMPLATE: &str = r#"{
  "pages": [
    {
      "elements": [
        {
          "type": "radiogroup",
          "name": "q1",
          "title": "2 + 2 = ?",
          "choices": ["3", "4"],
          "correctAnswer": "4",
          "score": 1
        }
      ]
    }
  ]
}"#;

#[derive(Debug, thiserror::Error)]
pub enum QuestionnaireError {
    /// The editor text is not JSON. Displays the parser's diagnostic.
    #[error("{0}")]
    InvalidJson(#[from] serde_json::Error),
}

pub fn parse_questionnaire(raw: &str) -> Result<Value, QuestionnaireError> {
    Ok(serde_json::from_str(raw)?)
}

/// Editor text for a stored document (two-space indentation).
pub fn to_editor_text(doc: &Value) -> String {
    serde_json::to_string_pretty(doc).unwrap_or_else(|_| "{}".to_string())
}
