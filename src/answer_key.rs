use serde_json::{Map, Number, Value};

/// Grading properties that are moved off question nodes before a questionnaire is stored.
/// The order here is the order they appear in an answer-key entry.
pub const RESERVED_KEYS: [&str; 3] = ["correctAnswer", "correctAnswers", "score"];

const SCORE_KEY: &str = "score";

/// Largest magnitude at which every integer is still exactly representable in an f64.
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    /// Student-safe copy of the questionnaire.
    pub clean_document: Value,
    /// Question name -> the reserved keys found on that question, values untouched.
    pub answer_key: Map<String, Value>,
    pub total_marks: f64,
}

impl Extraction {
    pub fn total_marks_value(&self) -> Value {
        total_marks_value(self.total_marks)
    }
}

/// Splits grading metadata out of a questionnaire.
///
/// Every object carrying a truthy `name` is a question. Its `correctAnswer`,
/// `correctAnswers` and `score` properties are copied into the answer key under that
/// name and left out of the clean document. The walk is depth-first and pre-order, so
/// when two questions share a name the one visited later wins. Scores that do not
/// coerce to a number stay in the answer key but add nothing to the total.
///
/// The input is never modified; the clean document is a fresh tree.
pub fn extract_answer_key(document: &Value) -> Extraction {
    let mut answer_key = Map::new();
    let mut total_marks = 0.0;
    let clean_document = strip(document, &mut answer_key, &mut total_marks);
    Extraction {
        clean_document,
        answer_key,
        total_marks,
    }
}

fn strip(node: &Value, answer_key: &mut Map<String, Value>, total: &mut f64) -> Value {
    match node {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| strip(item, answer_key, total))
                .collect(),
        ),
        Value::Object(fields) => {
            let question = question_name(fields);

            if let Some(name) = &question {
                let mut meta = Map::new();
                for key in RESERVED_KEYS {
                    // Presence, not truthiness: `"score": null` still moves.
                    if let Some(v) = fields.get(key) {
                        meta.insert(key.to_string(), v.clone());
                    }
                }
                if let Some(score) = meta.get(SCORE_KEY).and_then(coerce_score) {
                    *total += score;
                }
                if !meta.is_empty() {
                    answer_key.insert(name.clone(), Value::Object(meta));
                }
            }

            let mut out = Map::new();
            for (key, value) in fields {
                if question.is_some() && is_reserved(key) {
                    continue;
                }
                out.insert(key.clone(), strip(value, answer_key, total));
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

/// Puts answer-key entries back onto the questions of a clean document.
///
/// Reserved keys are appended after the node's existing properties. A property that is
/// already present on the node is left as it is.
pub fn restore_answer_key(clean: &Value, answer_key: &Map<String, Value>) -> Value {
    match clean {
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| restore_answer_key(item, answer_key))
                .collect(),
        ),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, value) in fields {
                out.insert(key.clone(), restore_answer_key(value, answer_key));
            }
            let meta = question_name(fields)
                .and_then(|name| answer_key.get(&name))
                .and_then(Value::as_object);
            if let Some(meta) = meta {
                for key in RESERVED_KEYS {
                    if out.contains_key(key) {
                        continue;
                    }
                    if let Some(v) = meta.get(key) {
                        out.insert(key.to_string(), v.clone());
                    }
                }
            }
            Value::Object(out)
        }
        scalar => scalar.clone(),
    }
}

/// The identifier of a question node, if `fields` is one.
///
/// Any truthy `name` makes a question: a non-empty string, a non-zero number, `true`, or
/// any array or object. The key is the name's string form as the browser editor computes
/// it, so `1.0` is `"1"`, `true` is `"true"`, `["a", 2]` is `"a,2"` and an object is
/// `"[object Object]"`.
pub fn question_name(fields: &Map<String, Value>) -> Option<String> {
    let name = fields.get("name")?;
    is_truthy(name).then(|| name_text(name))
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(false, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn name_text(v: &Value) -> String {
    match v {
        // Only reachable inside arrays, where null joins as an empty slot.
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.as_f64().map(number_text).unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(name_text).collect::<Vec<_>>().join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// Shortest round-trip decimal, switching to exponent form outside `[1e-6, 1e21)` with an
/// explicit `+` on positive exponents.
fn number_text(v: f64) -> String {
    if v == 0.0 {
        return "0".to_string();
    }
    let abs = v.abs();
    if (1e-6..1e21).contains(&abs) {
        return format!("{v}");
    }
    let exp_form = format!("{v:e}");
    match exp_form.split_once('e') {
        Some((mantissa, exp)) if !exp.starts_with('-') => format!("{mantissa}e+{exp}"),
        _ => exp_form,
    }
}

pub fn is_reserved(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Numeric value of a `score`.
///
/// Numbers are taken as they are. Strings are trimmed and must then be a plain decimal
/// literal with an optional sign, fraction and exponent (`"2"`, `"-1.5"`, `".5"`,
/// `"1e2"`). Empty strings, `Infinity`, `NaN`, hex literals and every other JSON type are
/// not numeric.
pub fn coerce_score(score: &Value) -> Option<f64> {
    match score {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let t = s.trim();
            if t.is_empty() {
                return None;
            }
            let plain = t
                .bytes()
                .all(|b| b.is_ascii_digit() || matches!(b, b'+' | b'-' | b'.' | b'e' | b'E'));
            if !plain {
                return None;
            }
            t.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// JSON form of a total: an integer when the sum is whole, a float otherwise.
pub fn total_marks_value(total: f64) -> Value {
    if total.is_finite() && total.fract() == 0.0 && total.abs() <= MAX_EXACT_INTEGER {
        return Value::from(total as i64);
    }
    Number::from_f64(total)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
