use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use wa_dispatch::config::{load_config, TransportConfig};
use wa_dispatch::dispatch::{self, RunRequest, StopSignal};
use wa_dispatch::payload::PayloadBuilder;
use wa_dispatch::transport::{CloudApiTransport, TemplateSource};
use wa_dispatch::types::{ParameterFormat, RunConfiguration};
use wa_dispatch::{create_app, loader};

#[derive(Debug, Parser)]
#[command(
    name = "wa-dispatch",
    about = "WhatsApp Cloud API inbox and bulk template dispatch",
    after_help = "Examples:\n  wa-dispatch serve\n  wa-dispatch preview contatos.csv\n  wa-dispatch send contatos.csv --template oferta_inss --limit 200"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Run the webhook receiver and operator API")]
    Serve,
    #[command(about = "List the templates registered for the business account")]
    Templates,
    #[command(about = "Show the columns and first rows of a contact file")]
    Preview {
        csv: PathBuf,
        #[arg(long, default_value_t = 5)]
        rows: usize,
    },
    #[command(about = "Send one message per contact row")]
    Send {
        csv: PathBuf,
        #[arg(long, help = "Template name; omit to send --text")]
        template: Option<String>,
        #[arg(long, help = "positional or named")]
        format: Option<String>,
        #[arg(long, help = "Free-text body with {column} placeholders")]
        text: Option<String>,
        #[arg(long, help = "Seconds between messages")]
        interval: Option<u64>,
        #[arg(long, help = "Maximum messages sent in this run")]
        limit: Option<u32>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve => serve().await,
        Command::Templates => templates().await,
        Command::Preview { csv, rows } => preview(csv, rows).await,
        Command::Send {
            csv,
            template,
            format,
            text,
            interval,
            limit,
        } => {
            let parameter_format = match format.as_deref() {
                Some(raw) => Some(
                    ParameterFormat::parse(raw)
                        .with_context(|| format!("unknown parameter format '{raw}'"))?,
                ),
                None => None,
            };
            let request = RunRequest {
                template,
                parameter_format,
                mapping: None,
                text,
            };
            send(csv, request, interval, limit).await
        }
    }
}

async fn serve() -> Result<()> {
    let (state, app) = create_app().await?;
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))?;
    tracing::info!(%addr, "wa-dispatch listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

fn cloud_transport() -> Result<CloudApiTransport> {
    let config = load_config();
    let transport_config = TransportConfig::from_whatsapp(&config.whatsapp)?;
    Ok(CloudApiTransport::new(transport_config)?)
}

async fn templates() -> Result<()> {
    let transport = cloud_transport()?;
    for template in transport.fetch_templates().await? {
        println!(
            "{}\t{}\t{:?}\t{}",
            template.name,
            template.status.as_deref().unwrap_or("-"),
            template.parameter_format,
            template.language.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

async fn preview(csv: PathBuf, rows: usize) -> Result<()> {
    let table = loader::load(&csv).await?;
    println!("{} rows", table.rows.len());
    println!("{}", table.columns.join("\t"));
    for row in loader::preview(&table, rows) {
        println!("{}", row.join("\t"));
    }
    Ok(())
}

async fn send(csv: PathBuf, request: RunRequest, interval: Option<u64>, limit: Option<u32>) -> Result<()> {
    let config = load_config();
    let transport = Arc::new(CloudApiTransport::new(TransportConfig::from_whatsapp(
        &config.whatsapp,
    )?)?);
    let defaults = config.dispatch.run_configuration();
    let run_config = RunConfiguration {
        interval_seconds: interval.unwrap_or(defaults.interval_seconds),
        daily_limit: limit.unwrap_or(defaults.daily_limit),
    };
    dispatch::validate_run_configuration(&run_config)?;

    let table = loader::load(&csv).await?;
    let builder = PayloadBuilder::new(config.dispatch.language_code.clone(), config.fixtures.clone());
    let source: &dyn TemplateSource = transport.as_ref();
    let plan = dispatch::plan(&request, builder, &config.dispatch.country_prefix, Some(source)).await?;

    let stop = StopSignal::new();
    let ctrl_c = stop.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.raise();
        }
    });

    let result = dispatch::run(
        &table.rows,
        &plan,
        run_config,
        transport.as_ref(),
        |progress| println!("[{}/{}] {}", progress.current, progress.total, progress.status),
        &stop,
    )
    .await?;

    println!(
        "{:?}: {} sent, {} failed, {} skipped of {}",
        result.state, result.success_count, result.error_count, result.skipped_count, result.total_rows
    );
    for line in &result.error_log {
        println!("  {line}");
    }
    Ok(())
}
