use crate::answer_key::{extract_answer_key, restore_answer_key, total_marks_value};
use crate::db;
use crate::ipc::error::{err, ok, submission_err};
use crate::ipc::params::{id_param, str_param};
use crate::ipc::types::{AppState, Request};
use crate::questionnaire::{parse_questionnaire, to_editor_text};
use crate::submission::{
    build_submission, missing_batch_error, validate, AssessmentDraft, Submission,
};
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Teacher preview: the document exactly as written, grading included.
fn handle_assessments_preview(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw) = str_param(&req.params, "questionnaireRaw") else {
        return err(&req.id, "bad_params", "missing questionnaireRaw", None);
    };
    match parse_questionnaire(raw) {
        Ok(questionnaire) => ok(&req.id, json!({ "questionnaire": questionnaire })),
        Err(e) => err(&req.id, "invalid_json", format!("Invalid JSON: {e}"), None),
    }
}

fn handle_assessments_extract(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let parsed = match (
        req.params.get("questionnaire"),
        str_param(&req.params, "questionnaireRaw"),
    ) {
        (Some(doc), _) => doc.clone(),
        (None, Some(raw)) => match parse_questionnaire(raw) {
            Ok(v) => v,
            Err(e) => {
                return err(
                    &req.id,
                    "invalid_json",
                    format!("Invalid questionnaire JSON: {e}"),
                    None,
                )
            }
        },
        (None, None) => {
            return err(
                &req.id,
                "bad_params",
                "missing questionnaire or questionnaireRaw",
                None,
            )
        }
    };

    let extraction = extract_answer_key(&parsed);
    let total_marks = extraction.total_marks_value();
    ok(
        &req.id,
        json!({
            "questionnaire": extraction.clean_document,
            "answerKey": extraction.answer_key,
            "totalMarks": total_marks,
        }),
    )
}

fn batch_exists(conn: &Connection, batch_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM batches WHERE id = ?", [batch_id], |r| r.get(0))
        .optional()?;
    Ok(found.is_some())
}

fn handle_assessments_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(raw) = str_param(&req.params, "questionnaireRaw") else {
        return err(&req.id, "bad_params", "missing questionnaireRaw", None);
    };
    let assessment_id = id_param(&req.params, "assessmentId");

    let draft = AssessmentDraft {
        title: str_param(&req.params, "title").unwrap_or_default().to_string(),
        description: str_param(&req.params, "description")
            .unwrap_or_default()
            .to_string(),
        batch: id_param(&req.params, "batchId"),
        test_type: str_param(&req.params, "testType").map(str::to_string),
    };

    // Parse before anything else: bad JSON never reaches the store.
    let submission = match build_submission(&draft, raw).and_then(|s| validate(&s).map(|_| s)) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "assessment rejected");
            return submission_err(&req.id, &e);
        }
    };

    if let Some(batch_id) = submission.batch.as_deref() {
        match batch_exists(conn, batch_id) {
            Ok(true) => {}
            Ok(false) => {
                let e = missing_batch_error(batch_id);
                tracing::warn!(batch_id = %batch_id, "assessment rejected: unknown batch");
                return submission_err(&req.id, &e);
            }
            Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
        }
    }

    let created = assessment_id.is_none();
    let stored = match &assessment_id {
        None => insert_assessment(conn, &submission).map(Some),
        Some(id) => {
            update_assessment(conn, id, &submission).map(|found| found.then(|| id.clone()))
        }
    };

    let assessment_id = match stored {
        Ok(Some(id)) => id,
        Ok(None) => return err(&req.id, "not_found", "assessment not found", None),
        Err(e) => {
            tracing::error!(error = %e, "failed to store assessment");
            let code = if created {
                "db_insert_failed"
            } else {
                "db_update_failed"
            };
            return err(
                &req.id,
                code,
                e.to_string(),
                Some(json!({ "table": "assessments" })),
            );
        }
    };

    tracing::info!(
        assessment_id = %assessment_id,
        created,
        questions = submission.answer_key.len(),
        total_marks = submission.total_marks,
        "assessment saved"
    );

    ok(
        &req.id,
        json!({
            "assessmentId": assessment_id,
            "created": created,
            "submission": submission,
        }),
    )
}

fn insert_assessment(conn: &Connection, s: &Submission) -> anyhow::Result<String> {
    let id = Uuid::new_v4().to_string();
    let now = db::now_rfc3339();
    conn.execute(
        "INSERT INTO assessments(
           id, batch_id, title, description, questionnaire_json, answer_key_json,
           total_marks, test_type, created_at, updated_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &s.batch,
            &s.title,
            &s.description,
            serde_json::to_string(&s.questionnaire)?,
            serde_json::to_string(&s.answer_key)?,
            s.total_marks,
            &s.test_type,
            &now,
            &now,
        ),
    )?;
    Ok(id)
}

/// Returns false when no assessment has `id`.
fn update_assessment(conn: &Connection, id: &str, s: &Submission) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE assessments
         SET batch_id = ?, title = ?, description = ?, questionnaire_json = ?,
             answer_key_json = ?, total_marks = ?, test_type = ?, updated_at = ?
         WHERE id = ?",
        (
            &s.batch,
            &s.title,
            &s.description,
            serde_json::to_string(&s.questionnaire)?,
            serde_json::to_string(&s.answer_key)?,
            s.total_marks,
            &s.test_type,
            db::now_rfc3339(),
            id,
        ),
    )?;
    Ok(changed > 0)
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "assessments": [] }));
    };
    let batch_filter = id_param(&req.params, "batchId");

    let mut stmt = match conn.prepare(
        "SELECT id, title, batch_id, test_type, total_marks, answer_key_json, updated_at
         FROM assessments
         WHERE ?1 IS NULL OR batch_id = ?1
         ORDER BY updated_at DESC, title",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([&batch_filter], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let batch_id: Option<String> = row.get(2)?;
            let test_type: Option<String> = row.get(3)?;
            let total_marks: f64 = row.get(4)?;
            let answer_key_json: String = row.get(5)?;
            let updated_at: String = row.get(6)?;
            // Questions with at least one grading key, i.e. answer-key entries.
            let question_count = serde_json::from_str::<Map<String, Value>>(&answer_key_json)
                .map(|m| m.len())
                .unwrap_or(0);
            Ok(json!({
                "id": id,
                "title": title,
                "batchId": batch_id,
                "testType": test_type,
                "totalMarks": total_marks_value(total_marks),
                "questionCount": question_count,
                "updatedAt": updated_at,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(assessments) => ok(&req.id, json!({ "assessments": assessments })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

struct StoredAssessment {
    id: String,
    batch_id: Option<String>,
    title: String,
    description: String,
    questionnaire_json: String,
    answer_key_json: String,
    total_marks: f64,
    test_type: Option<String>,
    created_at: String,
    updated_at: String,
}

fn handle_assessments_open(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assessment_id) = id_param(&req.params, "assessmentId") else {
        return err(&req.id, "bad_params", "missing assessmentId", None);
    };

    let row = conn
        .query_row(
            "SELECT id, batch_id, title, description, questionnaire_json, answer_key_json,
                    total_marks, test_type, created_at, updated_at
             FROM assessments WHERE id = ?",
            [&assessment_id],
            |r| {
                Ok(StoredAssessment {
                    id: r.get(0)?,
                    batch_id: r.get(1)?,
                    title: r.get(2)?,
                    description: r.get(3)?,
                    questionnaire_json: r.get(4)?,
                    answer_key_json: r.get(5)?,
                    total_marks: r.get(6)?,
                    test_type: r.get(7)?,
                    created_at: r.get(8)?,
                    updated_at: r.get(9)?,
                })
            },
        )
        .optional();

    let stored = match row {
        Ok(Some(v)) => v,
        Ok(None) => return err(&req.id, "not_found", "assessment not found", None),
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let questionnaire: Value = match serde_json::from_str(&stored.questionnaire_json) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_query_failed",
                format!("stored questionnaire is not valid JSON: {e}"),
                Some(json!({ "assessmentId": stored.id })),
            )
        }
    };
    let answer_key: Map<String, Value> = match serde_json::from_str(&stored.answer_key_json) {
        Ok(v) => v,
        Err(e) => {
            return err(
                &req.id,
                "db_query_failed",
                format!("stored answer key is not valid JSON: {e}"),
                Some(json!({ "assessmentId": stored.id })),
            )
        }
    };

    // The editor works on the full document, so grading goes back on before it is shown.
    let editor_text = to_editor_text(&restore_answer_key(&questionnaire, &answer_key));

    ok(
        &req.id,
        json!({
            "assessment": {
                "id": stored.id,
                "title": stored.title,
                "description": stored.description,
                "batchId": stored.batch_id,
                "testType": stored.test_type,
                "questionnaire": questionnaire,
                "answerKey": answer_key,
                "totalMarks": total_marks_value(stored.total_marks),
                "createdAt": stored.created_at,
                "updatedAt": stored.updated_at,
            },
            "questionnaireRaw": editor_text,
        }),
    )
}

fn handle_assessments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(assessment_id) = id_param(&req.params, "assessmentId") else {
        return err(&req.id, "bad_params", "missing assessmentId", None);
    };

    match conn.execute("DELETE FROM assessments WHERE id = ?", [&assessment_id]) {
        Ok(0) => err(&req.id, "not_found", "assessment not found", None),
        Ok(_) => {
            tracing::info!(assessment_id = %assessment_id, "assessment deleted");
            ok(&req.id, json!({ "deleted": true }))
        }
        Err(e) => err(
            &req.id,
            "db_delete_failed",
            e.to_string(),
            Some(json!({ "table": "assessments" })),
        ),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "assessments.preview" => Some(handle_assessments_preview(state, req)),
        "assessments.extract" => Some(handle_assessments_extract(state, req)),
        "assessments.save" => Some(handle_assessments_save(state, req)),
        "assessments.list" => Some(handle_assessments_list(state, req)),
        "assessments.open" => Some(handle_assessments_open(state, req)),
        "assessments.delete" => Some(handle_assessments_delete(state, req)),
        _ => None,
    }
}
