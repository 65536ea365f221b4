use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

const TWO_QUESTIONS: &str = r#"{
  "title": "Fractions",
  "pages": [
    {
      "name": "page1",
      "elements": [
        {
          "type": "radiogroup",
          "name": "half",
          "title": "1/2 of 8?",
          "choices": ["2", "4", "6"],
          "correctAnswer": "4",
          "score": 2
        },
        {
          "type": "checkbox",
          "name": "equivalents",
          "title": "Which equal 1/2?",
          "choices": ["2/4", "3/6", "2/3"],
          "correctAnswers": ["2/4", "3/6"],
          "score": "3"
        },
        {
          "type": "comment",
          "name": "explain",
          "title": "Explain your answer",
          "score": "ungraded"
        }
      ]
    }
  ]
}"#;

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

struct Sidecar {
    child: Child,
    stdin: ChildStdin,
    reader: BufReader<ChildStdout>,
    next_id: u64,
}

impl Sidecar {
    fn start(workspace: Option<&PathBuf>) -> Self {
        let exe = env!("CARGO_BIN_EXE_assessd");
        let mut child = Command::new(exe)
            .current_dir(std::env::temp_dir())
            .env_remove("ASSESSD_WORKSPACE")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn assessd");
        let stdin = child.stdin.take().expect("child stdin");
        let stdout = child.stdout.take().expect("child stdout");
        let mut sidecar = Self {
            child,
            stdin,
            reader: BufReader::new(stdout),
            next_id: 0,
        };
        if let Some(ws) = workspace {
            let resp = sidecar.call("workspace.select", json!({ "path": ws.to_string_lossy() }));
            assert_eq!(resp["ok"], json!(true), "workspace.select failed: {resp}");
        }
        sidecar
    }

    fn call(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        self.next_id += 1;
        let id = self.next_id.to_string();
        let payload = json!({ "id": id, "method": method, "params": params });
        writeln!(self.stdin, "{}", payload).expect("write request");
        self.stdin.flush().expect("flush request");

        let mut line = String::new();
        self.reader.read_line(&mut line).expect("read response line");
        let value: serde_json::Value =
            serde_json::from_str(line.trim()).expect("parse response json");
        assert_eq!(value["id"], json!(id));
        value
    }

    fn ok(&mut self, method: &str, params: serde_json::Value) -> serde_json::Value {
        let resp = self.call(method, params);
        assert_eq!(resp["ok"], json!(true), "{method} failed: {resp}");
        resp["result"].clone()
    }

    fn error_code(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> (String, serde_json::Value) {
        let resp = self.call(method, params);
        assert_eq!(resp["ok"], json!(false), "{method} unexpectedly succeeded: {resp}");
        let code = resp["error"]["code"].as_str().unwrap_or_default().to_string();
        (code, resp["error"].clone())
    }
}

impl Drop for Sidecar {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn assessment_count(sidecar: &mut Sidecar) -> usize {
    sidecar.ok("assessments.list", json!({}))["assessments"]
        .as_array()
        .expect("assessments array")
        .len()
}

#[test]
fn save_strips_grading_and_open_restores_it() {
    let ws = temp_dir("assessd-save-open");
    let mut s = Sidecar::start(Some(&ws));

    let batch_id = s.ok("batches.create", json!({ "name": "8B" }))["batchId"]
        .as_str()
        .expect("batchId")
        .to_string();

    let saved = s.ok(
        "assessments.save",
        json!({
            "title": "Fractions check",
            "description": "Week 3",
            "batchId": batch_id,
            "testType": "unit",
            "questionnaireRaw": TWO_QUESTIONS
        }),
    );
    assert_eq!(saved["created"], json!(true));
    let assessment_id = saved["assessmentId"].as_str().expect("id").to_string();

    let submission = &saved["submission"];
    assert_eq!(submission["batch"], json!(batch_id));
    assert_eq!(submission["test_type"], json!("unit"));
    assert_eq!(submission["total_marks"], json!(5));
    assert_eq!(
        submission["answer_key"],
        json!({
            "half": { "correctAnswer": "4", "score": 2 },
            "equivalents": { "correctAnswers": ["2/4", "3/6"], "score": "3" },
            "explain": { "score": "ungraded" }
        })
    );
    for q in submission["questionnaire"]["pages"][0]["elements"]
        .as_array()
        .expect("elements")
    {
        assert!(q.get("correctAnswer").is_none(), "leaked answer in {q}");
        assert!(q.get("correctAnswers").is_none(), "leaked answers in {q}");
        assert!(q.get("score").is_none(), "leaked score in {q}");
    }
    // Non-question structure survives untouched.
    assert_eq!(submission["questionnaire"]["title"], json!("Fractions"));
    assert_eq!(
        submission["questionnaire"]["pages"][0]["elements"][1]["choices"],
        json!(["2/4", "3/6", "2/3"])
    );

    let opened = s.ok("assessments.open", json!({ "assessmentId": assessment_id }));
    let assessment = &opened["assessment"];
    assert_eq!(assessment["title"], json!("Fractions check"));
    assert_eq!(assessment["batchId"], json!(batch_id));
    assert_eq!(assessment["testType"], json!("unit"));
    assert_eq!(assessment["totalMarks"], json!(5));
    assert_eq!(assessment["answerKey"], submission["answer_key"]);
    assert_eq!(assessment["questionnaire"], submission["questionnaire"]);

    // Editor text has the grading back on, so re-extracting gives the same key.
    let editor_text = opened["questionnaireRaw"].as_str().expect("editor text");
    let original: serde_json::Value = serde_json::from_str(TWO_QUESTIONS).expect("fixture");
    let reopened: serde_json::Value = serde_json::from_str(editor_text).expect("editor json");
    assert_eq!(reopened, original);

    let extracted = s.ok("assessments.extract", json!({ "questionnaireRaw": editor_text }));
    assert_eq!(extracted["answerKey"], submission["answer_key"]);
    assert_eq!(extracted["totalMarks"], json!(5));

    let listed = s.ok("assessments.list", json!({ "batchId": batch_id }));
    let rows = listed["assessments"].as_array().expect("rows");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["questionCount"], json!(3));
    assert_eq!(rows[0]["totalMarks"], json!(5));

    let batches = s.ok("batches.list", json!({}));
    assert_eq!(batches["batches"][0]["assessmentCount"], json!(1));
}

#[test]
fn invalid_json_never_reaches_the_store() {
    let ws = temp_dir("assessd-invalid-json");
    let mut s = Sidecar::start(Some(&ws));

    let (code, error) = s.error_code(
        "assessments.save",
        json!({ "title": "Broken", "questionnaireRaw": "{ \"pages\": [ }" }),
    );
    assert_eq!(code, "invalid_json");
    let message = error["message"].as_str().expect("message");
    assert!(
        message.starts_with("Invalid questionnaire JSON: "),
        "unexpected message: {message}"
    );
    assert!(message.contains("line 1"), "missing diagnostic: {message}");
    assert_eq!(assessment_count(&mut s), 0);

    let (code, error) = s.error_code("assessments.preview", json!({ "questionnaireRaw": "nope" }));
    assert_eq!(code, "invalid_json");
    assert!(error["message"]
        .as_str()
        .expect("message")
        .starts_with("Invalid JSON: "));
}

#[test]
fn validation_failures_report_field_errors() {
    let ws = temp_dir("assessd-validation");
    let mut s = Sidecar::start(Some(&ws));

    let (code, error) = s.error_code(
        "assessments.save",
        json!({ "title": "  ", "questionnaireRaw": "{}" }),
    );
    assert_eq!(code, "validation_failed");
    assert_eq!(
        error["details"]["title"],
        json!(["This field may not be blank."])
    );

    let (code, error) = s.error_code(
        "assessments.save",
        json!({ "title": "Quiz", "batchId": "missing-batch", "questionnaireRaw": "{}" }),
    );
    assert_eq!(code, "validation_failed");
    assert_eq!(
        error["details"]["batch"],
        json!(["Invalid pk \"missing-batch\" - object does not exist."])
    );

    assert_eq!(assessment_count(&mut s), 0);

    // A blank batch is "no batch", not an unknown one.
    let saved = s.ok(
        "assessments.save",
        json!({ "title": "Quiz", "batchId": "", "questionnaireRaw": "{}" }),
    );
    assert_eq!(saved["submission"]["batch"], serde_json::Value::Null);
    assert_eq!(saved["submission"]["total_marks"], json!(0));
    assert_eq!(saved["submission"]["answer_key"], json!({}));
}

#[test]
fn saving_with_an_id_updates_in_place() {
    let ws = temp_dir("assessd-update");
    let mut s = Sidecar::start(Some(&ws));

    let first = s.ok(
        "assessments.save",
        json!({ "title": "Draft", "questionnaireRaw": TWO_QUESTIONS }),
    );
    let id = first["assessmentId"].as_str().expect("id").to_string();

    let revised = r#"{"elements":[{"name":"only","correctAnswer":1,"score":3.5}]}"#;
    let second = s.ok(
        "assessments.save",
        json!({ "assessmentId": id, "title": "Final", "questionnaireRaw": revised }),
    );
    assert_eq!(second["created"], json!(false));
    assert_eq!(second["assessmentId"], json!(id));

    let opened = s.ok("assessments.open", json!({ "assessmentId": id }));
    assert_eq!(opened["assessment"]["title"], json!("Final"));
    assert_eq!(opened["assessment"]["totalMarks"], json!(3.5));
    assert_eq!(
        opened["assessment"]["answerKey"],
        json!({ "only": { "correctAnswer": 1, "score": 3.5 } })
    );
    assert_eq!(assessment_count(&mut s), 1);

    let (code, _) = s.error_code(
        "assessments.save",
        json!({ "assessmentId": "does-not-exist", "title": "X", "questionnaireRaw": "{}" }),
    );
    assert_eq!(code, "not_found");
    assert_eq!(assessment_count(&mut s), 1);
}

#[test]
fn delete_removes_the_assessment() {
    let ws = temp_dir("assessd-delete");
    let mut s = Sidecar::start(Some(&ws));

    let saved = s.ok(
        "assessments.save",
        json!({ "title": "Temp", "questionnaireRaw": "{\"name\":\"q\",\"score\":1}" }),
    );
    let id = saved["assessmentId"].as_str().expect("id").to_string();

    s.ok("assessments.delete", json!({ "assessmentId": id }));
    let (code, _) = s.error_code("assessments.open", json!({ "assessmentId": id }));
    assert_eq!(code, "not_found");
    let (code, _) = s.error_code("assessments.delete", json!({ "assessmentId": id }));
    assert_eq!(code, "not_found");
}

#[test]
fn store_methods_need_a_workspace() {
    let mut s = Sidecar::start(None);

    let (code, _) = s.error_code(
        "assessments.save",
        json!({ "title": "Quiz", "questionnaireRaw": "{}" }),
    );
    assert_eq!(code, "no_workspace");
    assert_eq!(assessment_count(&mut s), 0);
    let (code, _) = s.error_code("batches.create", json!({ "name": "8B" }));
    assert_eq!(code, "no_workspace");

    // Preview and extraction are pure and work without one.
    let extracted = s.ok(
        "assessments.extract",
        json!({ "questionnaire": { "name": "q", "correctAnswer": "a", "score": "2" } }),
    );
    assert_eq!(extracted["questionnaire"], json!({ "name": "q" }));
    assert_eq!(extracted["totalMarks"], json!(2));
}
