//! `{{variable}}` substitution for oracle prompts.

use std::collections::BTreeMap;

use crate::error::{OracleError, OracleResult};

/// Prompt text with `{{name}}` placeholders.
///
/// Every placeholder in the text is required at render time; a missing value
/// is an [`OracleError::InvalidRequest`] rather than a silently blank prompt.
#[derive(Clone, Debug)]
pub struct PromptTemplate {
    text: &'static str,
    placeholders: Vec<String>,
}

impl PromptTemplate {
    /// Parses the placeholders out of `text`.
    #[must_use]
    pub fn new(text: &'static str) -> Self {
        Self {
            text,
            placeholders: placeholders(text),
        }
    }

    /// Returns the placeholder names in order of first appearance.
    #[must_use]
    pub fn placeholders(&self) -> &[String] {
        &self.placeholders
    }

    /// Substitutes every placeholder with its value.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::InvalidRequest`] if a placeholder has no value.
    pub fn render(&self, values: &BTreeMap<&str, String>) -> OracleResult<String> {
        let mut rendered = self.text.to_owned();
        for name in &self.placeholders {
            let value = values.get(name.as_str()).ok_or_else(|| {
                OracleError::invalid_request(format!("prompt variable `{name}` was not supplied"))
            })?;
            rendered = rendered.replace(&format!("{{{{{name}}}}}"), value);
        }
        Ok(rendered)
    }
}

fn placeholders(text: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = text;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = after[..end].trim();
        if !name.is_empty() && !names.iter().any(|known| known == name) {
            names.push(name.to_owned());
        }
        rest = &after[end + 2..];
    }
    names
}
