//! Helpers for pulling JSON out of free-form model output.

/// Strip Markdown code fences (```json ... ``` or ``` ... ```).
pub fn strip_code_fences(raw: &str) -> &str {
    raw.trim()
        .trim_start_matches("```json")
        .trim_start_matches("```JSON")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim()
}

/// Return the first balanced `{...}` object in `text`, ignoring braces that
/// appear inside string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse the first JSON object found in model output, fenced or not.
pub fn parse_embedded_object(raw: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let stripped = strip_code_fences(raw);
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(stripped) {
        return Some(map);
    }
    let candidate = extract_json_object(stripped)?;
    match serde_json::from_str(candidate) {
        Ok(serde_json::Value::Object(map)) => Some(map),
        _ => None,
    }
}
