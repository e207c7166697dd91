use serde::de::DeserializeOwned;

/// Decode the first JSON object found in an LLM reply.
///
/// Models wrap JSON in prose or ```json fences; this tries the whole text,
/// then the first fenced block, then the outermost `{ ... }` span.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Option<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(value) = serde_json::from_str(body[..end].trim()) {
                return Some(value);
            }
        }
    }

    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close <= open {
        return None;
    }
    serde_json::from_str(&trimmed[open..=close]).ok()
}
