//! Request-input hygiene: markup stripping, nesting depth and path checks.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Deepest object/array nesting accepted in a JSON body.
pub const MAX_JSON_DEPTH: usize = 10;

static INJECTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?is)<script\b[^>]*>.*?</script\s*>",
        r"(?i)<script\b[^>]*>",
        r"(?i)javascript\s*:",
        r"(?i)\bon\w+\s*=",
        r"(?i)expression\s*\(",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("valid regex"))
    .collect()
});

/// Remove script blocks, `javascript:` URLs, inline handlers and CSS
/// expressions. Borrows when nothing matched.
pub fn strip_injection(input: &str) -> Cow<'_, str> {
    let mut out = Cow::Borrowed(input);
    for pattern in INJECTION_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = Cow::Owned(pattern.replace_all(&out, "").into_owned());
        }
    }
    out
}

/// Strip every string (keys included) in a JSON tree in place. Returns how
/// many strings changed.
pub fn sanitize_json(value: &mut Value) -> usize {
    match value {
        Value::String(s) => match cleaned(s) {
            Some(clean) => {
                *s = clean;
                1
            }
            None => 0,
        },
        Value::Array(items) => items.iter_mut().map(sanitize_json).sum(),
        Value::Object(map) => {
            let mut changed = 0;
            for (key, mut val) in std::mem::take(map) {
                changed += sanitize_json(&mut val);
                let key = match cleaned(&key) {
                    Some(clean) => {
                        changed += 1;
                        clean
                    }
                    None => key,
                };
                map.insert(key, val);
            }
            changed
        }
        _ => 0,
    }
}

fn cleaned(input: &str) -> Option<String> {
    match strip_injection(input) {
        Cow::Borrowed(_) => None,
        Cow::Owned(clean) => Some(clean),
    }
}

/// Object/array nesting depth. Scalars are depth 0.
pub fn json_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(json_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(json_depth).max().unwrap_or(0),
        _ => 0,
    }
}

/// Whether a request path tries to climb directories, plain or
/// percent-encoded (once or twice).
pub fn has_path_traversal(path: &str) -> bool {
    let decoded = path
        .to_ascii_lowercase()
        .replace("%25", "%")
        .replace("%2e", ".")
        .replace("%2f", "/")
        .replace("%5c", "\\");
    decoded.contains("../") || decoded.contains("..\\") || decoded.ends_with("/..")
}
