use serde::Serialize;
use serde_json::Value;

use crate::submission::SubmissionError;

#[derive(Debug, Serialize)]
struct OkResp<'a> {
    id: &'a str,
    ok: bool,
    result: Value,
}

#[derive(Debug, Serialize)]
struct ErrObj<'a> {
    code: &'a str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Value>,
}

#[derive(Debug, Serialize)]
struct ErrResp<'a> {
    id: &'a str,
    ok: bool,
    error: ErrObj<'a>,
}

fn to_value<T: Serialize>(resp: &T) -> Value {
    serde_json::to_value(resp).unwrap_or_else(|_| serde_json::json!({ "ok": false }))
}

pub fn ok(id: &str, result: Value) -> Value {
    to_value(&OkResp {
        id,
        ok: true,
        result,
    })
}

pub fn err(id: &str, code: &str, message: impl Into<String>, details: Option<Value>) -> Value {
    to_value(&ErrResp {
        id,
        ok: false,
        error: ErrObj {
            code,
            message: message.into(),
            details,
        },
    })
}

/// Save failures: parse errors carry the parser diagnostic, validation errors carry the
/// per-field messages as `details`.
pub fn submission_err(id: &str, e: &SubmissionError) -> Value {
    match e {
        SubmissionError::InvalidQuestionnaire(_) => err(id, "invalid_json", e.to_string(), None),
        SubmissionError::Validation(fields) => err(
            id,
            "validation_failed",
            e.to_string(),
            Some(Value::Object(fields.clone())),
        ),
    }
}
