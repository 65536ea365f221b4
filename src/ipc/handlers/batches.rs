use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::params::str_param;
use crate::ipc::types::{AppState, Request};
use serde_json::json;
use uuid::Uuid;

fn handle_batches_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return ok(&req.id, json!({ "batches": [] }));
    };

    // Correlated subquery so a batch with no assessments still lists with a zero count.
    let mut stmt = match conn.prepare(
        "SELECT
           b.id,
           b.name,
           (SELECT COUNT(*) FROM assessments a WHERE a.batch_id = b.id) AS assessment_count
         FROM batches b
         ORDER BY b.name, b.created_at",
    ) {
        Ok(s) => s,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    let rows = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let assessment_count: i64 = row.get(2)?;
            Ok(json!({
                "id": id,
                "name": name,
                "assessmentCount": assessment_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>());

    match rows {
        Ok(batches) => ok(&req.id, json!({ "batches": batches })),
        Err(e) => err(&req.id, "db_query_failed", e.to_string(), None),
    }
}

fn handle_batches_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };

    let name = match str_param(&req.params, "name") {
        Some(v) => v.trim().to_string(),
        None => return err(&req.id, "bad_params", "missing name", None),
    };
    if name.is_empty() {
        return err(&req.id, "bad_params", "name must not be empty", None);
    }

    let batch_id = Uuid::new_v4().to_string();
    if let Err(e) = conn.execute(
        "INSERT INTO batches(id, name, created_at) VALUES(?, ?, ?)",
        (&batch_id, &name, db::now_rfc3339()),
    ) {
        return err(
            &req.id,
            "db_insert_failed",
            e.to_string(),
            Some(json!({ "table": "batches" })),
        );
    }

    tracing::info!(batch_id = %batch_id, name = %name, "batch created");
    ok(&req.id, json!({ "batchId": batch_id, "name": name }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "batches.list" => Some(handle_batches_list(state, req)),
        "batches.create" => Some(handle_batches_create(state, req)),
        _ => None,
    }
}
