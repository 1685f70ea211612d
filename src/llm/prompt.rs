//! Prompt templates with named `{placeholder}` variables.

use std::collections::{BTreeSet, HashMap};

use schemars::JsonSchema;

use crate::error::PromptError;

/// Variable bound automatically for structured invocations.
pub const FORMAT_INSTRUCTIONS_VAR: &str = "format_instructions";

/// Values bound to template placeholders.
pub type PromptVars = HashMap<String, String>;

/// A prompt with named `{name}` placeholders.
///
/// `{{` renders as a literal `{`, and its matching `}}` as `}`. Any other
/// brace that does not enclose a bare word (JSON examples, for instance)
/// passes through as-is, including the braces that close it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    template: String,
    partials: HashMap<String, String>,
}

enum Segment<'a> {
    Text(&'a str),
    Placeholder(&'a str),
}

/// A literal `{` still waiting for its closing brace.
enum OpenBrace {
    /// Written as `{{`; closed by `}}`.
    Escaped,
    /// A lone `{`; closed by a single `}`.
    Literal,
}

impl PromptTemplate {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            partials: HashMap::new(),
        }
    }

    /// Pre-bind a variable. Values passed to [`render`](Self::render) win.
    pub fn partial(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.partials.insert(name.into(), value.into());
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    /// Every placeholder in the template, sorted and de-duplicated.
    pub fn variables(&self) -> Vec<String> {
        extract_variables(&self.template)
    }

    /// Placeholders not covered by a partial.
    pub fn input_variables(&self) -> Vec<String> {
        self.variables()
            .into_iter()
            .filter(|name| !self.partials.contains_key(name))
            .collect()
    }

    pub fn has_variable(&self, name: &str) -> bool {
        segments(&self.template)
            .iter()
            .any(|segment| matches!(segment, Segment::Placeholder(p) if *p == name))
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.partials.contains_key(name)
    }

    /// Substitute every placeholder.
    ///
    /// Fails on the first placeholder that has neither a render-time value
    /// nor a partial.
    pub fn render(&self, vars: &PromptVars) -> Result<String, PromptError> {
        let mut out = String::with_capacity(self.template.len());
        for segment in segments(&self.template) {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Placeholder(name) => {
                    let value = vars
                        .get(name)
                        .or_else(|| self.partials.get(name))
                        .ok_or_else(|| PromptError::MissingVariable(name.to_string()))?;
                    out.push_str(value);
                }
            }
        }
        Ok(out)
    }
}

/// Placeholder names found in `template`, sorted and de-duplicated.
pub fn extract_variables(template: &str) -> Vec<String> {
    segments(template)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Placeholder(name) => Some(name.to_string()),
            Segment::Text(_) => None,
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Instructions telling the model to answer with JSON matching `T`'s schema.
pub fn format_instructions<T: JsonSchema>() -> Result<String, PromptError> {
    let schema = schemars::schema_for!(T);
    let schema_json = serde_json::to_string_pretty(&schema)
        .map_err(|e| PromptError::SchemaSerialization(e.to_string()))?;

    Ok(format!(
        "The output should be formatted as a JSON instance that conforms to the JSON schema below.\n\n\
         ```json\n{}\n```\n\n\
         Respond with the JSON only, without commentary.",
        schema_json
    ))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn segments(template: &str) -> Vec<Segment<'_>> {
    let bytes = template.as_bytes();
    let mut out = Vec::new();
    let mut open = Vec::new();
    let mut literal_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let doubled = bytes.get(i + 1) == Some(&bytes[i]);
        match bytes[i] {
            b'{' => {
                let rest = &template[i + 1..];
                let name_len = rest.find(|c: char| !is_word_char(c)).unwrap_or(rest.len());
                let end = i + 1 + name_len;
                if name_len > 0 && bytes.get(end) == Some(&b'}') {
                    out.push(Segment::Text(&template[literal_start..i]));
                    out.push(Segment::Placeholder(&template[i + 1..end]));
                    i = end + 1;
                    literal_start = i;
                } else if doubled {
                    open.push(OpenBrace::Escaped);
                    // Keep one brace of the pair.
                    out.push(Segment::Text(&template[literal_start..=i]));
                    i += 2;
                    literal_start = i;
                } else {
                    open.push(OpenBrace::Literal);
                    i += 1;
                }
            }
            b'}' => match open.last() {
                Some(OpenBrace::Literal) => {
                    open.pop();
                    i += 1;
                }
                Some(OpenBrace::Escaped) | None if doubled => {
                    open.pop();
                    out.push(Segment::Text(&template[literal_start..=i]));
                    i += 2;
                    literal_start = i;
                }
                _ => i += 1,
            },
            _ => i += 1,
        }
    }

    out.push(Segment::Text(&template[literal_start..]));
    out
}
