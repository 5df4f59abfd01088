use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static REASONING_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<thought>.*?</thought>|<think>.*?</think>|<reasoning>.*?</reasoning>")
        .expect("valid regex literal")
});

pub fn ensure_non_empty(client: &str, output: String) -> Result<String, String> {
    if output.trim().is_empty() {
        return Err(format!("{client} returned empty output"));
    }
    Ok(output)
}

/// Removes the private reasoning blocks some models prepend to their answer.
pub fn strip_reasoning_tags(output: &str) -> String {
    REASONING_BLOCK.replace_all(output, "").trim().to_string()
}

pub fn strip_wrapping_code_fence(output: &str) -> String {
    let trimmed = output.trim();
    if trimmed.len() >= 6 && trimmed.starts_with("```") && trimmed.ends_with("```") {
        let without_fences = &trimmed[3..trimmed.len() - 3];
        let lines: Vec<&str> = without_fences.lines().collect();
        // Drop a language specifier on the opening line.
        if !lines.is_empty() && lines[0].trim().chars().all(|c| c.is_alphanumeric()) {
            lines[1..].join("\n").trim().to_string()
        } else {
            lines.join("\n").trim().to_string()
        }
    } else {
        trimmed.to_string()
    }
}

/// Body of the first `<tag>...</tag>` section, trimmed.
pub fn extract_tagged(text: &str, tag: &str) -> Option<String> {
    let tag = regex::escape(tag);
    let pattern = Regex::new(&format!(r"(?is)<{tag}>(.*?)</{tag}>")).ok()?;
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|body| body.as_str().trim().to_string())
}

/// Best-effort JSON extraction from model output: the whole text, then the
/// text without a wrapping fence, then the outermost `[...]`, then `{...}`.
pub fn extract_json_value(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    let unfenced = strip_wrapping_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str(&unfenced) {
        return Some(value);
    }

    for (open, close) in [('[', ']'), ('{', '}')] {
        let (Some(start), Some(end)) = (unfenced.find(open), unfenced.rfind(close)) else {
            continue;
        };
        if start < end {
            if let Ok(value) = serde_json::from_str(&unfenced[start..=end]) {
                return Some(value);
            }
        }
    }
    None
}
