//! Tolerant parsing of LLM JSON output
//!
//! Models wrap JSON in code fences, truncate mid-array, leave trailing
//! commas, and drop closing quotes. The repair pass salvages the common
//! cases; anything still unparseable is the caller's problem (usually
//! treated as an empty fragment).

use regex_lite::Regex;

/// Fix common JSON issues in model responses
pub fn fix_json_response(response_text: &str) -> String {
    let mut text = response_text.trim().to_string();

    // strip a ```json / ``` fence
    for opener in ["```json", "```JSON", "```"] {
        if let Some(stripped) = text.strip_prefix(opener) {
            text = stripped.trim_start().to_string();
            break;
        }
    }
    if let Some(stripped) = text.strip_suffix("```") {
        text = stripped.trim_end().to_string();
    }

    // drop anything before the first brace
    if let Some(start) = text.find('{') {
        if start > 0 {
            text = text[start..].to_string();
        }
    }

    // truncate after the last complete top-level brace
    let mut brace_count: i64 = 0;
    let mut last_complete = None;
    for (i, ch) in text.char_indices() {
        match ch {
            '{' => brace_count += 1,
            '}' => {
                brace_count -= 1;
                if brace_count == 0 {
                    last_complete = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    if let Some(end) = last_complete.or_else(|| text.rfind('}')) {
        // '}' is ASCII, so the byte after it is a char boundary
        text.truncate(end + 1);
    }

    // trailing commas before closers
    let trailing_comma = Regex::new(r",(\s*[}\]])").expect("static regex");
    text = trailing_comma.replace_all(&text, "$1").to_string();

    // balance stray quote / bracket / brace
    if text.matches('"').count() % 2 == 1 {
        text.push('"');
    }
    let opens = text.matches('[').count();
    let closes = text.matches(']').count();
    for _ in closes..opens {
        text.push(']');
    }
    let opens = text.matches('{').count();
    let closes = text.matches('}').count();
    for _ in closes..opens {
        text.push('}');
    }

    text
}

/// Parse JSON, falling back to the repaired form when the raw text does
/// not deserialize.
pub fn parse_json_with_repair<T: serde::de::DeserializeOwned>(
    raw: &str,
) -> Result<T, serde_json::Error> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(_) => serde_json::from_str(&fix_json_response(raw)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn test_strips_code_fence() {
        let raw = "```json\n{\"nodes\": []}\n```";
        let fixed = fix_json_response(raw);
        let parsed: Value = serde_json::from_str(&fixed).unwrap();
        assert!(parsed["nodes"].is_array());
    }

    #[test]
    fn test_drops_prose_prefix() {
        let raw = "Here is the graph you asked for: {\"nodes\": [{\"id\": \"set\"}]}";
        let parsed: Value = parse_json_with_repair(raw).unwrap();
        assert_eq!(parsed["nodes"][0]["id"], "set");
    }

    #[test]
    fn test_removes_trailing_comma() {
        let raw = "{\"nodes\": [{\"id\": \"a\"},]}";
        let parsed: Value = parse_json_with_repair(raw).unwrap();
        assert_eq!(parsed["nodes"][0]["id"], "a");
    }

    #[test]
    fn test_balances_truncated_output() {
        let raw = "{\"nodes\": [{\"id\": \"a\"}, {\"id\": \"b";
        let fixed = fix_json_response(raw);
        let parsed: Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(parsed["nodes"][0]["id"], "a");
    }

    #[test]
    fn test_valid_json_untouched() {
        let raw = "{\"ok\": true}";
        let parsed: Value = parse_json_with_repair(raw).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    #[test]
    fn test_trailing_commentary_ignored() {
        let raw = "{\"nodes\": []} I hope this helps!";
        let parsed: Value = parse_json_with_repair(raw).unwrap();
        assert!(parsed["nodes"].is_array());
    }
}
