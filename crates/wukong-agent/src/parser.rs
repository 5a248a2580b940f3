//! Response parser (spec §6 "Prompt envelope", §9 "Dynamic action envelope").
//!
//! The model is expected to return its decision inside
//! `<final_output>...</final_output>` as a JSON object whose `action` field
//! names one of the six kinds. The parser also accepts the JSON bare, or
//! wrapped in a ```json code fence, and tolerates either snake_case or
//! camelCase keys from the model by normalizing every object key to both
//! forms before deserializing into the [`Action`] enum.

use once_cell_lite::OnceRegex;
use wukong_foundation::{Action, Error, Result};

mod once_cell_lite {
    use regex::Regex;
    use std::sync::OnceLock;

    /// A lazily-compiled regex, avoiding a direct `once_cell` dependency
    /// since `std::sync::OnceLock` already covers this workspace's needs
    /// (see `wukong_foundation::redact`).
    pub struct OnceRegex {
        cell: OnceLock<Regex>,
        pattern: &'static str,
    }

    impl OnceRegex {
        pub const fn new(pattern: &'static str) -> Self {
            Self { cell: OnceLock::new(), pattern }
        }

        pub fn get(&self) -> &Regex {
            self.cell.get_or_init(|| Regex::new(self.pattern).unwrap())
        }
    }
}

static FINAL_OUTPUT_TAG: OnceRegex =
    OnceRegex::new(r"(?s)<final_output>\s*(.*?)\s*</final_output>");
static CODE_FENCE: OnceRegex = OnceRegex::new(r"(?s)```(?:json)?\s*(.*?)\s*```");

/// Parses the raw text of an LLM response into a structured [`Action`]
/// (spec §6 "Prompt envelope").
pub struct ResponseParser;

impl ResponseParser {
    /// Extract the JSON payload from `text` and deserialize it as an
    /// [`Action`]. Tries, in order: the `<final_output>` tag, a ```json code
    /// fence, then the whole trimmed text as a last resort.
    pub fn parse(text: &str) -> Result<Action> {
        let candidate = Self::extract_json_text(text)?;
        let mut value: serde_json::Value = serde_json::from_str(&candidate)
            .map_err(|e| Error::Parse(format!("response is not valid JSON: {e}")))?;
        normalize_keys(&mut value);
        serde_json::from_value(value)
            .map_err(|e| Error::Parse(format!("response JSON does not match a known action: {e}")))
    }

    fn extract_json_text(text: &str) -> Result<String> {
        if let Some(caps) = FINAL_OUTPUT_TAG.get().captures(text) {
            return Ok(caps[1].to_string());
        }
        if let Some(caps) = CODE_FENCE.get().captures(text) {
            return Ok(caps[1].to_string());
        }
        let trimmed = text.trim();
        if trimmed.starts_with('{') {
            return Ok(trimmed.to_string());
        }
        Err(Error::Parse(
            "no <final_output> tag, code fence, or bare JSON object found in response".to_string(),
        ))
    }
}

/// Recursively walks a JSON value, and for every object key inserts both the
/// `snake_case` and `camelCase` forms mapped to the same value (without
/// overwriting a key that is already present under that exact spelling).
/// This lets [`Action`]'s mixed snake/camel field renames accept whichever
/// casing the model actually produced, per spec §9.
fn normalize_keys(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            let original_keys: Vec<String> = map.keys().cloned().collect();
            for key in original_keys {
                let v = map.get(&key).cloned().unwrap();
                for variant in [to_snake_case(&key), to_camel_case(&key)] {
                    map.entry(variant).or_insert_with(|| v.clone());
                }
            }
            for v in map.values_mut() {
                normalize_keys(v);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                normalize_keys(item);
            }
        }
        _ => {}
    }
}

fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            out.push('_');
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut capitalize_next = false;
    for ch in key.chars() {
        if ch == '_' {
            capitalize_next = true;
        } else if capitalize_next {
            out.extend(ch.to_uppercase());
            capitalize_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}
