use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub const PHONE_COLUMN: &str = "telefone";

/// One spreadsheet record keyed by normalized column name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactRow {
    pub index: usize,
    pub values: HashMap<String, String>,
}

impl ContactRow {
    pub fn new(index: usize, values: HashMap<String, String>) -> Self {
        Self { index, values }
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.values.get(column).map(|v| v.as_str())
    }

    pub fn phone(&self) -> Option<&str> {
        self.get(PHONE_COLUMN)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactTable {
    pub columns: Vec<String>,
    pub rows: Vec<ContactRow>,
}

impl ContactTable {
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParameterFormat {
    #[default]
    #[serde(alias = "positional")]
    Positional,
    #[serde(alias = "named")]
    Named,
}

impl ParameterFormat {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "POSITIONAL" => Some(Self::Positional),
            "NAMED" => Some(Self::Named),
            _ => None,
        }
    }
}

/// Template definition as listed by the provider's management API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDescriptor {
    pub name: String,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub parameter_format: ParameterFormat,
    #[serde(default)]
    pub components: Vec<TemplateComponentDef>,
}

impl TemplateDescriptor {
    pub fn body(&self) -> Option<&TemplateComponentDef> {
        self.components
            .iter()
            .find(|c| c.component_type.eq_ignore_ascii_case("BODY"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateComponentDef {
    #[serde(rename = "type")]
    pub component_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub example: Option<serde_json::Value>,
}

/// Where one template parameter takes its value from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParamSource {
    #[serde(alias = "csv_column")]
    pub source_column: String,
    #[serde(default)]
    pub default_value: String,
}

impl ParamSource {
    pub fn new(source_column: impl Into<String>, default_value: impl Into<String>) -> Self {
        Self {
            source_column: source_column.into(),
            default_value: default_value.into(),
        }
    }
}

pub type ParameterMapping = BTreeMap<String, ParamSource>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DispatchStatus {
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub row_index: usize,
    pub phone: String,
    pub status: DispatchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl DispatchOutcome {
    pub fn sent(row_index: usize, phone: String, message_id: String) -> Self {
        Self {
            row_index,
            phone,
            status: DispatchStatus::Sent,
            provider_message_id: Some(message_id),
            error_detail: None,
        }
    }

    pub fn failed(row_index: usize, phone: String, detail: String) -> Self {
        Self {
            row_index,
            phone,
            status: DispatchStatus::Failed,
            provider_message_id: None,
            error_detail: Some(detail),
        }
    }

    pub fn is_sent(&self) -> bool {
        self.status == DispatchStatus::Sent
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunConfiguration {
    pub interval_seconds: u64,
    pub daily_limit: u32,
}

impl Default for RunConfiguration {
    fn default() -> Self {
        Self {
            interval_seconds: 1,
            daily_limit: 1000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Running,
    Completed,
    Cancelled,
    Aborted,
}

impl RunState {
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Aborted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub state: RunState,
    pub total_rows: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub skipped_count: usize,
    pub error_log: Vec<String>,
    pub outcomes: Vec<DispatchOutcome>,
}

impl RunResult {
    pub fn new(total_rows: usize) -> Self {
        Self {
            state: RunState::Running,
            total_rows,
            success_count: 0,
            error_count: 0,
            skipped_count: 0,
            error_log: Vec::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn record(&mut self, outcome: DispatchOutcome) {
        match outcome.status {
            DispatchStatus::Sent => self.success_count += 1,
            DispatchStatus::Failed => {
                self.error_count += 1;
                let detail = outcome.error_detail.as_deref().unwrap_or("unknown error");
                self.error_log
                    .push(format!("row {}: {}", outcome.row_index + 1, detail));
            }
        }
        self.outcomes.push(outcome);
    }

    pub fn processed(&self) -> usize {
        self.success_count + self.error_count
    }
}

/// A message row as kept by the local store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub whatsapp_id: String,
    pub sender: String,
    pub recipient: Option<String>,
    pub text: String,
    pub message_type: String,
    pub sender_name: Option<String>,
    pub timestamp: Option<String>,
}
