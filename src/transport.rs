//! Provider collaborators: message submission and template metadata.

use crate::config::TransportConfig;
use crate::error::TransportError;
use crate::payload::Envelope;
use crate::types::TemplateDescriptor;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

const TEMPLATE_PAGE_SIZE: &str = "100";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, envelope: &Envelope) -> Result<SubmitReceipt, TransportError>;
}

#[async_trait]
pub trait TemplateSource: Send + Sync {
    async fn fetch_templates(&self) -> Result<Vec<TemplateDescriptor>, TransportError>;
}

/// Looks a template up by name, ignoring ASCII case. An unreachable source is logged and treated
/// as "not listed".
pub async fn find_template(source: &dyn TemplateSource, name: &str) -> Option<TemplateDescriptor> {
    match source.fetch_templates().await {
        Ok(templates) => templates.into_iter().find(|t| t.name.eq_ignore_ascii_case(name)),
        Err(err) => {
            warn!(template = name, "template metadata unavailable: {err}");
            None
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloudApiTransport {
    client: Client,
    config: TransportConfig,
}

impl CloudApiTransport {
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| TransportError::Network(format!("http client init failed: {err}")))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn messages_url(&self) -> String {
        format!(
            "{}/{}/{}/messages",
            self.config.base_url, self.config.api_version, self.config.phone_number_id
        )
    }

    pub fn templates_url(&self) -> Result<String, TransportError> {
        let waba_id = self
            .config
            .business_account_id
            .as_deref()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| {
                TransportError::NotConfigured("WHATSAPP_BUSINESS_ACCOUNT_ID is not set".to_string())
            })?;
        Ok(format!(
            "{}/{}/{}/message_templates",
            self.config.base_url, self.config.api_version, waba_id
        ))
    }

    async fn error_from_response(resp: reqwest::Response) -> TransportError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        if let Ok(value) = serde_json::from_str::<Value>(&body) {
            if let Some(err) = value.get("error") {
                let code = err.get("code").and_then(|v| v.as_i64()).unwrap_or_default();
                let message = err
                    .get("message")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                return TransportError::Provider { code, message };
            }
        }
        TransportError::Status { status, body }
    }
}

pub fn parse_message_id(value: &Value) -> Result<String, TransportError> {
    value
        .get("messages")
        .and_then(|v| v.get(0))
        .and_then(|m| m.get("id"))
        .and_then(|id| id.as_str())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| TransportError::MalformedResponse(format!("no message id in {}", value)))
}

#[async_trait]
impl Transport for CloudApiTransport {
    async fn submit(&self, envelope: &Envelope) -> Result<SubmitReceipt, TransportError> {
        let resp = self
            .client
            .post(self.messages_url())
            .bearer_auth(&self.config.access_token)
            .json(envelope)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(Self::error_from_response(resp).await);
        }
        let value: Value = resp.json().await?;
        let message_id = parse_message_id(&value)?;
        debug!(to = envelope.recipient(), message_id = %message_id, "message accepted");
        Ok(SubmitReceipt { message_id })
    }
}

#[async_trait]
impl TemplateSource for CloudApiTransport {
    async fn fetch_templates(&self) -> Result<Vec<TemplateDescriptor>, TransportError> {
        let url = self.templates_url()?;
        let mut templates = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut req = self
                .client
                .get(&url)
                .bearer_auth(&self.config.access_token)
                .query(&[("limit", TEMPLATE_PAGE_SIZE)]);
            if let Some(cursor) = after.as_deref() {
                req = req.query(&[("after", cursor)]);
            }
            let resp = req.send().await?;
            if !resp.status().is_success() {
                return Err(Self::error_from_response(resp).await);
            }
            let page: Value = resp.json().await?;

            if let Some(data) = page.get("data").and_then(|v| v.as_array()) {
                templates.extend(
                    data.iter()
                        .filter_map(|t| serde_json::from_value::<TemplateDescriptor>(t.clone()).ok()),
                );
            }

            let has_next = page.pointer("/paging/next").and_then(|v| v.as_str()).is_some();
            after = page
                .pointer("/paging/cursors/after")
                .and_then(|v| v.as_str())
                .filter(|c| !c.is_empty())
                .map(str::to_string);
            if !has_next || after.is_none() {
                break;
            }
        }

        debug!(count = templates.len(), "fetched templates");
        Ok(templates)
    }
}
