//! Response normalization for noisy model output.
//!
//! Models wrap JSON in markdown fences, append chatter after the object, or
//! stop mid-object when they hit the token limit. Everything here is
//! best-effort: full JSON parsing first, then per-field regex recovery, then
//! keyword inference from free text.

use crate::models::RecognizeResult;
use crate::{Error, Result};
use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Label synonyms folded into canonical object types.
const OBJECT_TYPE_SYNONYMS: &[(&str, &str)] = &[
    ("post_box", "mailbox"),
    ("street_tree", "tree"),
    ("well_cover", "manhole"),
    ("drain_cover", "manhole"),
    ("traffic_sign", "road_sign"),
    ("signal_light", "traffic_light"),
    ("stoplight", "traffic_light"),
    ("traffic_signal", "traffic_light"),
];

/// Keywords used when the model answered in prose instead of JSON.
const INFERENCE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "traffic_light",
        &[
            "traffic_light",
            "traffic light",
            "signal light",
            "stoplight",
            "traffic signal",
            "红绿灯",
            "信号灯",
        ],
    ),
    (
        "road_sign",
        &[
            "road_sign",
            "road sign",
            "traffic sign",
            "signpost",
            "street sign",
            "路牌",
            "标志牌",
            "交通标志",
        ],
    ),
    (
        "mailbox",
        &["mailbox", "postbox", "post box", "邮箱", "邮筒"],
    ),
    (
        "manhole",
        &[
            "manhole",
            "man hole",
            "well_cover",
            "drain_cover",
            "井盖",
            "窨井盖",
            "下水道盖",
        ],
    ),
    ("tree", &["tree", "street_tree", "树", "树木"]),
];

/// Extracts a best-effort JSON object string from assistant text.
///
/// Returns `"{}"` for blank input. After stripping a leading fence, the first
/// well-formed object starting at the first `{` is returned verbatim; when no
/// well-formed object exists the text between the first `{` and the last `}`
/// is returned, and when there is no closing brace at all the trimmed text
/// is returned so [`extract_field`] can still recover values.
#[must_use]
pub fn extract_json_object(text: &str) -> String {
    let trimmed = strip_fence(text.trim());
    if trimmed.is_empty() {
        return "{}".to_string();
    }

    let Some(start) = trimmed.find('{') else {
        return trimmed.to_string();
    };
    let candidate = &trimmed[start..];

    let mut stream = serde_json::Deserializer::from_str(candidate).into_iter::<serde_json::Value>();
    if let Some(Ok(value)) = stream.next() {
        if value.is_object() {
            return candidate[..stream.byte_offset()].to_string();
        }
    }

    match trimmed.rfind('}') {
        Some(end) if end > start => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

fn strip_fence(text: &str) -> &str {
    if !text.starts_with("```") {
        return text;
    }
    let body = text
        .strip_prefix("```json")
        .or_else(|| text.strip_prefix("```"))
        .unwrap_or(text);
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Deserializes the first JSON object found in assistant text.
pub fn parse_first_object<T: DeserializeOwned>(text: &str) -> std::result::Result<T, String> {
    serde_json::from_str(&extract_json_object(text)).map_err(|e| e.to_string())
}

/// Recovers a single field value with regexes.
///
/// Tries a quoted string value first, then a bare token
/// (`[A-Za-z0-9_-]+`) for enum-like values cut off before their quotes
/// closed or emitted without quotes.
#[must_use]
pub fn extract_field(text: &str, key: &str) -> Option<String> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let escaped = regex::escape(key);
    let patterns = [
        format!(r#"(?is)"{escaped}"\s*:\s*"([^"]*)""#),
        format!(r#"(?is)"{escaped}"\s*:\s*([A-Za-z0-9_\-]+)"#),
    ];
    patterns.iter().find_map(|pattern| {
        let re = Regex::new(pattern).ok()?;
        let value = re.captures(text)?.get(1)?.as_str().trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Canonicalizes an object-type label.
///
/// Lowercases, turns spaces and hyphens into underscores, then folds known
/// synonyms. Unmapped labels pass through, so the vocabulary stays open.
/// Idempotent.
#[must_use]
pub fn normalize_object_type(label: &str) -> String {
    let token = label.trim().to_lowercase().replace(['-', ' '], "_");
    OBJECT_TYPE_SYNONYMS
        .iter()
        .find(|(from, _)| *from == token)
        .map_or(token, |(_, to)| (*to).to_string())
}

/// Infers a well-known object type from prose.
#[must_use]
pub fn infer_object_type_from_text(text: &str) -> Option<&'static str> {
    let haystack = text.to_lowercase().replace('-', "_");
    INFERENCE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| haystack.contains(k)))
        .map(|(object_type, _)| *object_type)
}

/// Parses yes/no style strings in English or Chinese.
#[must_use]
pub fn parse_bool_like(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "对" | "正确" | "是" => Some(true),
        "false" | "0" | "no" | "n" | "错" | "错误" | "否" => Some(false),
        _ => None,
    }
}

/// Reads a JSON value as a boolean (bool, bool-like string, or 1/0).
#[must_use]
pub fn value_as_bool(value: &serde_json::Value) -> Option<bool> {
    match value {
        serde_json::Value::Bool(b) => Some(*b),
        serde_json::Value::String(s) => parse_bool_like(s),
        serde_json::Value::Number(n) => match n.as_f64() {
            Some(v) if (v - 1.0).abs() < f64::EPSILON => Some(true),
            Some(v) if v.abs() < f64::EPSILON => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Trims dialogue lines and drops blanks.
#[must_use]
pub fn sanitize_lines(lines: Vec<String>) -> Vec<String> {
    lines
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

/// Extracts assistant text from a chat-completion response body.
///
/// `choices[0].message.content` may be a plain string or a list of typed
/// parts; text parts are joined with newlines.
pub fn extract_assistant_content(body: &[u8]) -> Result<String> {
    let value: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| Error::InvalidResponse(format!("chat response is not JSON: {e}")))?;
    let content = value
        .get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| Error::InvalidResponse("chat response has no choices".to_string()))?;

    match content {
        serde_json::Value::String(text) => Ok(text.trim().to_string()),
        serde_json::Value::Array(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|part| part.get("text").and_then(serde_json::Value::as_str))
                .collect();
            if texts.is_empty() {
                return Err(Error::InvalidResponse(
                    "chat response content has no text parts".to_string(),
                ));
            }
            Ok(texts.join("\n").trim().to_string())
        },
        _ => Err(Error::InvalidResponse(
            "chat response content has an unexpected shape".to_string(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct RecognizePayload {
    #[serde(default)]
    object_type: String,
    #[serde(default)]
    raw_label: String,
    #[serde(default)]
    reason: String,
}

/// Parses vision output into a [`RecognizeResult`].
///
/// Order: full JSON parse, field recovery on the extracted payload and on the
/// raw text, keyword inference from prose.
pub fn parse_recognize_result(content: &str) -> Result<RecognizeResult> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidResponse(
            "vision output is empty".to_string(),
        ));
    }

    if let Ok(parsed) = parse_first_object::<RecognizePayload>(trimmed) {
        let object_type = normalize_object_type(&parsed.object_type);
        if !object_type.is_empty() {
            return Ok(build_recognize_result(
                object_type,
                &parsed.raw_label,
                &parsed.reason,
            ));
        }
    }

    let payload = extract_json_object(trimmed);
    let field = |key: &str| extract_field(&payload, key).or_else(|| extract_field(trimmed, key));
    if let Some(object_type) = field("object_type").map(|v| normalize_object_type(&v)) {
        if !object_type.is_empty() {
            let raw_label = field("raw_label").unwrap_or_default();
            let reason = field("reason").unwrap_or_default();
            return Ok(build_recognize_result(object_type, &raw_label, &reason));
        }
    }

    if let Some(object_type) = infer_object_type_from_text(trimmed) {
        return Ok(RecognizeResult {
            object_type: object_type.to_string(),
            raw_label: object_type.to_string(),
            reason: trimmed.to_string(),
        });
    }

    Err(Error::InvalidResponse(
        "vision output is not valid JSON".to_string(),
    ))
}

fn build_recognize_result(object_type: String, raw_label: &str, reason: &str) -> RecognizeResult {
    let raw_label = raw_label.trim();
    RecognizeResult {
        raw_label: if raw_label.is_empty() {
            object_type.clone()
        } else {
            raw_label.to_string()
        },
        object_type,
        reason: reason.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_extract_json_object_blank() {
        assert_eq!(extract_json_object("   "), "{}");
    }

    #[test]
    fn test_extract_json_object_fenced() {
        let text = "```json\n{\"fact\": \"树会呼吸\"}\n```";
        assert_eq!(extract_json_object(text), "{\"fact\": \"树会呼吸\"}");
    }

    #[test]
    fn test_extract_json_object_trailing_garbage() {
        let text = "好的！{\"a\": {\"b\": 1}} 还有别的 {\"c\": 2}";
        assert_eq!(extract_json_object(text), "{\"a\": {\"b\": 1}}");
    }

    #[test]
    fn test_extract_json_object_truncated_keeps_text() {
        let text = "{\"object_type\":\"mailbox\",\"raw_label\":\"邮";
        assert_eq!(extract_json_object(text), text);
    }

    #[test]
    fn test_extract_json_object_malformed_slices_braces() {
        let text = "note {\"a\": 1,, \"b\": 2} end";
        assert_eq!(extract_json_object(text), "{\"a\": 1,, \"b\": 2}");
    }

    #[test]
    fn test_extract_field_quoted_then_bare() {
        let text = r#"{"object_type": "traffic_light", "correct": true"#;
        assert_eq!(
            extract_field(text, "object_type").as_deref(),
            Some("traffic_light")
        );
        assert_eq!(extract_field(text, "correct").as_deref(), Some("true"));
        assert_eq!(extract_field(text, "missing"), None);
    }

    #[test_case("Post Box", "mailbox")]
    #[test_case("stoplight", "traffic_light")]
    #[test_case("traffic-signal", "traffic_light")]
    #[test_case("  Drain Cover ", "manhole")]
    #[test_case("Space Ship", "space_ship")]
    #[test_case("红绿灯", "红绿灯")]
    fn test_normalize_object_type(input: &str, expected: &str) {
        assert_eq!(normalize_object_type(input), expected);
    }

    #[test]
    fn test_infer_object_type_from_text() {
        assert_eq!(
            infer_object_type_from_text("这是一个绿色的邮筒"),
            Some("mailbox")
        );
        assert_eq!(
            infer_object_type_from_text("A Traffic-Light at night"),
            Some("traffic_light")
        );
        assert_eq!(infer_object_type_from_text("一只猫"), None);
    }

    #[test_case("是", Some(true))]
    #[test_case(" YES ", Some(true))]
    #[test_case("错误", Some(false))]
    #[test_case("0", Some(false))]
    #[test_case("maybe", None)]
    fn test_parse_bool_like(input: &str, expected: Option<bool>) {
        assert_eq!(parse_bool_like(input), expected);
    }

    #[test]
    fn test_value_as_bool() {
        assert_eq!(value_as_bool(&serde_json::json!(true)), Some(true));
        assert_eq!(value_as_bool(&serde_json::json!("对")), Some(true));
        assert_eq!(value_as_bool(&serde_json::json!(0)), Some(false));
        assert_eq!(value_as_bool(&serde_json::json!(2)), None);
        assert_eq!(value_as_bool(&serde_json::Value::Null), None);
    }

    #[test]
    fn test_extract_assistant_content_string_and_parts() {
        let body = serde_json::json!({
            "choices": [{"message": {"content": "  {\"a\":1}  "}}]
        });
        assert_eq!(
            extract_assistant_content(body.to_string().as_bytes()).unwrap(),
            "{\"a\":1}"
        );

        let body = serde_json::json!({
            "choices": [{"message": {"content": [
                {"type": "text", "text": "第一行"},
                {"type": "image_url", "image_url": {"url": "x"}},
                {"type": "text", "text": "第二行"}
            ]}}]
        });
        assert_eq!(
            extract_assistant_content(body.to_string().as_bytes()).unwrap(),
            "第一行\n第二行"
        );
    }

    #[test]
    fn test_extract_assistant_content_rejects_empty_choices() {
        let body = serde_json::json!({"choices": []});
        assert!(matches!(
            extract_assistant_content(body.to_string().as_bytes()),
            Err(Error::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_recognize_full_json() {
        let result = parse_recognize_result(
            r#"{"object_type":"Post Box","raw_label":"邮筒","reason":"绿色箱体"}"#,
        )
        .unwrap();
        assert_eq!(result.object_type, "mailbox");
        assert_eq!(result.raw_label, "邮筒");
        assert_eq!(result.reason, "绿色箱体");
    }

    #[test]
    fn test_parse_recognize_truncated() {
        let result = parse_recognize_result(
            r#"```json {"object_type":"stoplight","raw_label":"红灯","reason":"圆形灯"#,
        )
        .unwrap();
        assert_eq!(result.object_type, "traffic_light");
        assert_eq!(result.raw_label, "红灯");
        assert_eq!(result.reason, "");
    }

    #[test]
    fn test_parse_recognize_unknown_passes_through() {
        let result = parse_recognize_result(r#"{"object_type":"unknown"}"#).unwrap();
        assert_eq!(result.object_type, "unknown");
        assert_eq!(result.raw_label, "unknown");
    }

    #[test]
    fn test_parse_recognize_prose() {
        let result = parse_recognize_result("图片里是一棵很高的树").unwrap();
        assert_eq!(result.object_type, "tree");
        assert_eq!(result.reason, "图片里是一棵很高的树");
    }

    #[test]
    fn test_parse_recognize_failure() {
        assert!(parse_recognize_result("").is_err());
        assert!(parse_recognize_result("看不清楚").is_err());
    }
}
