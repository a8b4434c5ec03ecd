//! Resolution of template parameters from contact rows.
//!
//! A run carries one [`ParameterMapping`] for all rows. Each row resolves it into
//! [`Parameters`], whose shape follows the template's declared format: positional
//! templates get an ordered list, named templates get a map keyed by parameter name.

use crate::types::{ContactRow, ParamSource, ParameterFormat, ParameterMapping, TemplateDescriptor};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

pub const MAX_POSITIONAL_PARAMS: usize = 9;

const POSITIONAL_COLUMNS: [&str; 3] = ["nome", "empresa", "valor"];
const NAMED_FALLBACK_PARAM: &str = "nome";
const NAMED_FALLBACK_DEFAULT: &str = "Cliente";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Param {
    pub text: String,
}

impl Param {
    pub fn text(value: impl Into<String>) -> Self {
        Self { text: value.into() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "format", content = "values", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Parameters {
    Positional(Vec<Param>),
    Named(BTreeMap<String, Param>),
}

impl Parameters {
    pub fn format(&self) -> ParameterFormat {
        match self {
            Parameters::Positional(_) => ParameterFormat::Positional,
            Parameters::Named(_) => ParameterFormat::Named,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Parameters::Positional(values) => values.len(),
            Parameters::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Value for one parameter: the row's cell when the column exists and is non-empty,
/// the configured default otherwise.
pub fn resolve_value(source: &ParamSource, row: &ContactRow) -> String {
    let column = source.source_column.trim().to_lowercase();
    if column.is_empty() {
        return source.default_value.clone();
    }
    match row.get(&column) {
        Some(value) if !value.trim().is_empty() => value.trim().to_string(),
        _ => source.default_value.clone(),
    }
}

pub fn resolve(format: ParameterFormat, mapping: &ParameterMapping, row: &ContactRow) -> Parameters {
    match format {
        ParameterFormat::Positional => {
            let mut values = Vec::new();
            for position in 1..=MAX_POSITIONAL_PARAMS {
                let Some(source) = mapping.get(&position.to_string()) else {
                    break;
                };
                values.push(Param::text(resolve_value(source, row)));
            }
            Parameters::Positional(values)
        }
        ParameterFormat::Named => Parameters::Named(
            mapping
                .iter()
                .map(|(name, source)| (name.clone(), Param::text(resolve_value(source, row))))
                .collect(),
        ),
    }
}

fn template_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{\{\s*(\w+)\s*\}\}").expect("valid placeholder regex"))
}

fn free_text_placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\{(\w+)\}").expect("valid placeholder regex"))
}

/// `{{n}}` / `{{name}}` slots declared in a template body, first appearance order.
pub fn template_slots(body_text: &str) -> Vec<String> {
    let mut slots: Vec<String> = Vec::new();
    for caps in template_placeholder_re().captures_iter(body_text) {
        let slot = caps[1].to_string();
        if !slots.contains(&slot) {
            slots.push(slot);
        }
    }
    slots
}

fn example_positional_defaults(descriptor: &TemplateDescriptor) -> Vec<String> {
    descriptor
        .body()
        .and_then(|body| body.example.as_ref())
        .and_then(|example| example.get("body_text"))
        .and_then(|v| v.get(0))
        .and_then(|v| v.as_array())
        .map(|values| {
            values
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn example_named_defaults(descriptor: &TemplateDescriptor) -> BTreeMap<String, String> {
    descriptor
        .body()
        .and_then(|body| body.example.as_ref())
        .and_then(|example| example.get("body_text_named_params"))
        .and_then(|v| v.as_array())
        .map(|params| {
            params
                .iter()
                .filter_map(|p| {
                    let name = p.get("param_name")?.as_str()?;
                    let example = p.get("example").and_then(|v| v.as_str()).unwrap_or_default();
                    Some((name.to_string(), example.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Mapping used when the operator does not supply one.
///
/// Positional templates bind slots 1..3 to `nome`, `empresa` and `valor`, with the
/// provider's example values as defaults. Named templates bind every declared slot to
/// the column of the same name.
pub fn default_mapping(descriptor: &TemplateDescriptor) -> ParameterMapping {
    let body_text = descriptor.body().and_then(|b| b.text.clone()).unwrap_or_default();
    let slots = template_slots(&body_text);
    let mut mapping = ParameterMapping::new();

    match descriptor.parameter_format {
        ParameterFormat::Positional => {
            let defaults = example_positional_defaults(descriptor);
            let declared = slots.iter().filter(|s| s.parse::<usize>().is_ok()).count();
            let count = if declared > 0 {
                declared.min(MAX_POSITIONAL_PARAMS)
            } else {
                POSITIONAL_COLUMNS.len()
            };
            for position in 1..=count {
                let column = POSITIONAL_COLUMNS.get(position - 1).copied().unwrap_or_default();
                let default = defaults.get(position - 1).cloned().unwrap_or_default();
                mapping.insert(position.to_string(), ParamSource::new(column, default));
            }
        }
        ParameterFormat::Named => {
            let defaults = example_named_defaults(descriptor);
            for slot in slots.iter().filter(|s| s.parse::<usize>().is_err()) {
                let default = defaults.get(slot).cloned().unwrap_or_default();
                mapping.insert(slot.clone(), ParamSource::new(slot.clone(), default));
            }
            if mapping.is_empty() {
                mapping.insert(
                    NAMED_FALLBACK_PARAM.to_string(),
                    ParamSource::new(NAMED_FALLBACK_PARAM, NAMED_FALLBACK_DEFAULT),
                );
            }
        }
    }
    mapping
}

/// `{field}` placeholders of a free-text body, first appearance order.
pub fn placeholder_fields(body: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for caps in free_text_placeholder_re().captures_iter(body) {
        let field = caps[1].to_string();
        if !fields.contains(&field) {
            fields.push(field);
        }
    }
    fields
}

pub fn free_text_mapping(fields: &[String]) -> ParameterMapping {
    fields
        .iter()
        .map(|field| {
            (
                field.clone(),
                ParamSource::new(field.to_lowercase(), format!("[{}]", field)),
            )
        })
        .collect()
}

pub fn render_free_text(body: &str, mapping: &ParameterMapping, row: &ContactRow) -> String {
    let mut rendered = body.to_string();
    for (field, source) in mapping {
        rendered = rendered.replace(&format!("{{{}}}", field), &resolve_value(source, row));
    }
    rendered
}
