//! Throttled bulk dispatch over a loaded contact table.

use crate::error::{DispatchError, DispatchResult};
use crate::loader;
use crate::payload::{MessageContent, PayloadBuilder};
use crate::phone::normalize_phone;
use crate::template::{
    default_mapping, free_text_mapping, placeholder_fields, render_free_text, resolve,
};
use crate::transport::{find_template, TemplateSource, Transport};
use crate::types::{
    ContactRow, DispatchOutcome, ParameterFormat, ParameterMapping, Progress, RunConfiguration,
    RunResult, RunState, TemplateDescriptor,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between a run and whoever controls it.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    raised: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early with `true` if the signal is raised.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_raised() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_raised(),
            _ = notified => true,
        }
    }
}

/// Operator input describing what a run sends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub parameter_format: Option<ParameterFormat>,
    #[serde(default)]
    pub mapping: Option<ParameterMapping>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DispatchMode {
    Template {
        name: String,
        format: ParameterFormat,
        mapping: ParameterMapping,
    },
    FreeText {
        body: String,
        mapping: ParameterMapping,
    },
}

/// Everything a run needs besides its rows, fixed before the first row.
#[derive(Debug, Clone)]
pub struct DispatchPlan {
    pub mode: DispatchMode,
    pub country_prefix: String,
    pub builder: PayloadBuilder,
}

impl DispatchPlan {
    pub fn content_for(&self, row: &ContactRow) -> MessageContent {
        match &self.mode {
            DispatchMode::Template {
                name,
                format,
                mapping,
            } => MessageContent::Template {
                name: name.clone(),
                parameters: resolve(*format, mapping, row),
            },
            DispatchMode::FreeText { body, mapping } => {
                MessageContent::Text(render_free_text(body, mapping, row))
            }
        }
    }
}

/// Picks the parameter format: request, then provider metadata, then the fixture,
/// then positional.
pub fn resolve_format(
    requested: Option<ParameterFormat>,
    descriptor: Option<&TemplateDescriptor>,
    fixture_format: Option<ParameterFormat>,
) -> ParameterFormat {
    requested
        .or_else(|| descriptor.map(|d| d.parameter_format))
        .or(fixture_format)
        .unwrap_or_default()
}

pub async fn plan(
    request: &RunRequest,
    builder: PayloadBuilder,
    country_prefix: &str,
    source: Option<&dyn TemplateSource>,
) -> DispatchResult<DispatchPlan> {
    let template = request
        .template
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let text = request.text.as_deref().filter(|t| !t.trim().is_empty());

    let mode = match (template, text) {
        (Some(name), _) => {
            let descriptor = match source {
                Some(source) => find_template(source, name).await,
                None => None,
            };
            let fixture_format = builder.fixtures().get(name).and_then(|f| f.parameter_format);
            let format = resolve_format(request.parameter_format, descriptor.as_ref(), fixture_format);
            let mapping = match request.mapping.clone() {
                Some(mapping) => mapping,
                None => {
                    let mut descriptor = descriptor.unwrap_or_else(|| TemplateDescriptor {
                        name: name.to_string(),
                        language: None,
                        status: None,
                        category: None,
                        parameter_format: format,
                        components: Vec::new(),
                    });
                    descriptor.parameter_format = format;
                    default_mapping(&descriptor)
                }
            };
            DispatchMode::Template {
                name: name.to_string(),
                format,
                mapping,
            }
        }
        (None, Some(body)) => DispatchMode::FreeText {
            body: body.to_string(),
            mapping: free_text_mapping(&placeholder_fields(body)),
        },
        (None, None) => {
            return Err(DispatchError::Configuration(
                "no template selected and message text is empty".to_string(),
            ))
        }
    };

    Ok(DispatchPlan {
        mode,
        country_prefix: country_prefix.to_string(),
        builder,
    })
}

pub fn validate_run_configuration(config: &RunConfiguration) -> DispatchResult<()> {
    if config.daily_limit == 0 {
        return Err(DispatchError::Configuration(
            "daily limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn failed_row(row: &ContactRow, phone: Option<String>, detail: String) -> DispatchOutcome {
    DispatchOutcome::failed(row.index, phone.unwrap_or_default(), detail)
}

async fn dispatch_row(plan: &DispatchPlan, row: &ContactRow, transport: &dyn Transport) -> DispatchOutcome {
    let Some(phone) = row
        .phone()
        .and_then(|raw| normalize_phone(raw, &plan.country_prefix))
    else {
        return failed_row(row, None, "empty phone".to_string());
    };

    let content = plan.content_for(row);
    let envelope = match plan.builder.build(&phone, &content) {
        Ok(envelope) => envelope,
        Err(err) => return failed_row(row, Some(phone), err.to_string()),
    };

    match transport.submit(&envelope).await {
        Ok(receipt) => DispatchOutcome::sent(row.index, phone, receipt.message_id),
        Err(err) => failed_row(row, Some(phone), err.to_string()),
    }
}

/// Sends one message per row, in file order, honoring the interval and the cap.
///
/// Row failures never abort the run. Only an unusable configuration is returned as
/// an error, before any row is touched.
pub async fn run<F>(
    rows: &[ContactRow],
    plan: &DispatchPlan,
    config: RunConfiguration,
    transport: &dyn Transport,
    mut on_progress: F,
    stop: &StopSignal,
) -> DispatchResult<RunResult>
where
    F: FnMut(Progress) + Send,
{
    validate_run_configuration(&config)?;

    let total = rows.len();
    let mut result = RunResult::new(total);
    let interval = Duration::from_secs(config.interval_seconds);
    let mut sent: u32 = 0;
    info!(
        total,
        interval_seconds = config.interval_seconds,
        daily_limit = config.daily_limit,
        "bulk run started"
    );

    for (position, row) in rows.iter().enumerate() {
        if stop.is_raised() {
            result.state = RunState::Cancelled;
            break;
        }
        if sent >= config.daily_limit {
            info!(daily_limit = config.daily_limit, "daily limit reached");
            break;
        }

        let outcome = dispatch_row(plan, row, transport).await;
        let status = if outcome.is_sent() {
            sent += 1;
            debug!(row = row.index, phone = %outcome.phone, "sent");
            format!("sent to {}", outcome.phone)
        } else {
            let detail = outcome.error_detail.clone().unwrap_or_default();
            warn!(row = row.index, phone = %outcome.phone, "row failed: {detail}");
            format!("row {} failed: {}", row.index + 1, detail)
        };
        result.record(outcome);

        on_progress(Progress {
            current: position + 1,
            total,
            status,
        });

        let is_last = position + 1 == total;
        if is_last || sent >= config.daily_limit || interval.is_zero() {
            continue;
        }
        if stop.sleep(interval).await {
            result.state = RunState::Cancelled;
            break;
        }
    }

    result.skipped_count = total - result.processed();
    if result.state == RunState::Running {
        result.state = RunState::Completed;
    }
    info!(
        state = ?result.state,
        sent = result.success_count,
        failed = result.error_count,
        skipped = result.skipped_count,
        "bulk run finished"
    );
    Ok(result)
}

/// Loads a contact file and runs it. Load errors surface before any progress call.
pub async fn run_file<F>(
    path: impl AsRef<Path>,
    plan: &DispatchPlan,
    config: RunConfiguration,
    transport: &dyn Transport,
    on_progress: F,
    stop: &StopSignal,
) -> DispatchResult<RunResult>
where
    F: FnMut(Progress) + Send,
{
    validate_run_configuration(&config)?;
    let table = loader::load(path).await?;
    run(&table.rows, plan, config, transport, on_progress, stop).await
}
