//! Cloud API message envelopes.
//!
//! Template envelopes are assembled from the fixture components registered for the
//! template name followed by one BODY component built from the resolved parameters.

use crate::error::{DispatchError, DispatchResult};
use crate::template::Parameters;
use crate::types::ParameterFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const MESSAGING_PRODUCT: &str = "whatsapp";
pub const DEFAULT_LANGUAGE_CODE: &str = "pt_BR";
pub const OFERTA_INSS_HEADER_IMAGE: &str = "https://i.imgur.com/cl59zpz.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub messaging_product: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_type: Option<String>,
    pub to: String,
    #[serde(flatten)]
    pub content: EnvelopeContent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EnvelopeContent {
    Text { text: TextBody },
    Template { template: TemplateBody },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBody {
    pub preview_url: bool,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateBody {
    pub name: String,
    pub language: TemplateLanguage,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLanguage {
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    #[serde(default)]
    pub parameters: Vec<ComponentParam>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Header,
    Body,
    Button,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ComponentParam {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        parameter_name: Option<String>,
    },
    Image { image: MediaLink },
    Video { video: MediaLink },
    Document { document: MediaLink },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaLink {
    pub link: String,
}

impl Envelope {
    pub fn recipient(&self) -> &str {
        &self.to
    }

    pub fn template_name(&self) -> Option<&str> {
        match &self.content {
            EnvelopeContent::Template { template } => Some(template.name.as_str()),
            EnvelopeContent::Text { .. } => None,
        }
    }

    pub fn text_body(&self) -> Option<&str> {
        match &self.content {
            EnvelopeContent::Text { text } => Some(text.body.as_str()),
            EnvelopeContent::Template { .. } => None,
        }
    }
}

/// Mandatory extra components for one template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TemplateFixture {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameter_format: Option<ParameterFormat>,
    #[serde(default)]
    pub components: Vec<Component>,
}

/// Template name (case-insensitive) to fixture.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, TemplateFixture>", into = "HashMap<String, TemplateFixture>")]
pub struct FixtureTable {
    fixtures: HashMap<String, TemplateFixture>,
}

impl From<HashMap<String, TemplateFixture>> for FixtureTable {
    fn from(raw: HashMap<String, TemplateFixture>) -> Self {
        Self {
            fixtures: raw.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
        }
    }
}

impl From<FixtureTable> for HashMap<String, TemplateFixture> {
    fn from(table: FixtureTable) -> Self {
        table.fixtures
    }
}

impl Default for FixtureTable {
    fn default() -> Self {
        let mut table = Self::empty();
        table.insert(
            "oferta_inss",
            TemplateFixture {
                parameter_format: Some(ParameterFormat::Named),
                components: vec![Component {
                    component_type: ComponentType::Header,
                    parameters: vec![ComponentParam::Image {
                        image: MediaLink {
                            link: OFERTA_INSS_HEADER_IMAGE.to_string(),
                        },
                    }],
                }],
            },
        );
        table
    }
}

impl FixtureTable {
    pub fn empty() -> Self {
        Self {
            fixtures: HashMap::new(),
        }
    }

    pub fn insert(&mut self, template_name: &str, fixture: TemplateFixture) {
        self.fixtures.insert(template_name.to_lowercase(), fixture);
    }

    pub fn get(&self, template_name: &str) -> Option<&TemplateFixture> {
        self.fixtures.get(&template_name.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.fixtures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fixtures.is_empty()
    }
}

/// What a single envelope carries before the recipient is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Template { name: String, parameters: Parameters },
}

#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    language_code: String,
    fixtures: FixtureTable,
}

impl Default for PayloadBuilder {
    fn default() -> Self {
        Self::new(DEFAULT_LANGUAGE_CODE, FixtureTable::default())
    }
}

impl PayloadBuilder {
    pub fn new(language_code: impl Into<String>, fixtures: FixtureTable) -> Self {
        Self {
            language_code: language_code.into(),
            fixtures,
        }
    }

    pub fn fixtures(&self) -> &FixtureTable {
        &self.fixtures
    }

    pub fn build(&self, to: &str, content: &MessageContent) -> DispatchResult<Envelope> {
        match content {
            MessageContent::Text(body) => self.text(to, body),
            MessageContent::Template { name, parameters } => self.template(to, name, parameters),
        }
    }

    pub fn text(&self, to: &str, body: &str) -> DispatchResult<Envelope> {
        if body.trim().is_empty() {
            return Err(DispatchError::Validation("message body is empty".to_string()));
        }
        Ok(Envelope {
            messaging_product: MESSAGING_PRODUCT.to_string(),
            recipient_type: Some("individual".to_string()),
            to: to.to_string(),
            content: EnvelopeContent::Text {
                text: TextBody {
                    preview_url: false,
                    body: body.to_string(),
                },
            },
        })
    }

    pub fn template(&self, to: &str, name: &str, parameters: &Parameters) -> DispatchResult<Envelope> {
        if name.trim().is_empty() {
            return Err(DispatchError::Validation("template name is empty".to_string()));
        }

        let mut components: Vec<Component> = self
            .fixtures
            .get(name)
            .map(|fixture| fixture.components.clone())
            .unwrap_or_default();
        if !parameters.is_empty() {
            components.push(body_component(parameters));
        }

        Ok(Envelope {
            messaging_product: MESSAGING_PRODUCT.to_string(),
            recipient_type: None,
            to: to.to_string(),
            content: EnvelopeContent::Template {
                template: TemplateBody {
                    name: name.to_string(),
                    language: TemplateLanguage {
                        code: self.language_code.clone(),
                    },
                    components,
                },
            },
        })
    }
}

fn body_component(parameters: &Parameters) -> Component {
    let parameters = match parameters {
        Parameters::Positional(values) => values
            .iter()
            .map(|p| ComponentParam::Text {
                text: p.text.clone(),
                parameter_name: None,
            })
            .collect(),
        Parameters::Named(values) => values
            .iter()
            .map(|(name, p)| ComponentParam::Text {
                text: p.text.clone(),
                parameter_name: Some(name.clone()),
            })
            .collect(),
    };
    Component {
        component_type: ComponentType::Body,
        parameters,
    }
}
