use std::path::PathBuf;
use std::process::ExitCode;

use ai_gateway_core::agents::config::save_provider_config;
use ai_gateway_core::agents::{ChatMessage, CompletionRequest, ProviderKind, TaskKey};
use ai_gateway_core::db::{init_db, DbPool};
use ai_gateway_core::{AiGateway, GatewaySettings};
use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

#[derive(Parser)]
#[command(name = "ai-gateway", version, about = "Provider-failover AI completions")]
struct Cli {
    /// Directory holding gateway.db. Defaults to the platform data dir.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one completion through the failover chain.
    Complete {
        #[arg(long, default_value = "general")]
        task: String,
        /// Ask for a JSON answer; the parsed value lands in the `json` field.
        #[arg(long)]
        json: bool,
        #[arg(long)]
        system: Option<String>,
        #[arg(long)]
        temperature: Option<f32>,
        #[arg(long)]
        max_tokens: Option<u32>,
        prompt: String,
    },
    /// Show which providers have a key and where it comes from.
    Status,
    /// Persist an API key and/or structured config for a provider.
    Configure {
        provider: String,
        #[arg(long)]
        api_key: Option<String>,
        /// JSON object, e.g. '{"model_policy": {"default": ["openai/gpt-4o"]}}'
        #[arg(long)]
        config: Option<String>,
    },
}

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "AiGateway", "AiGateway") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("AiGateway")
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let pool = init_db(cli.workspace.unwrap_or_else(workspace_dir))?;
    match cli.command {
        Command::Complete {
            task,
            json,
            system,
            temperature,
            max_tokens,
            prompt,
        } => {
            let mut messages = Vec::new();
            if let Some(system) = system {
                messages.push(ChatMessage::system(system));
            }
            messages.push(ChatMessage::user(prompt));

            let mut request = CompletionRequest::new(TaskKey::parse(&task), messages).with_json(json);
            if let Some(temperature) = temperature {
                request = request.with_temperature(temperature);
            }
            if let Some(max_tokens) = max_tokens {
                request = request.with_max_tokens(max_tokens);
            }
            complete(pool, request).await
        }
        Command::Status => status(pool).await,
        Command::Configure {
            provider,
            api_key,
            config,
        } => configure(&pool, &provider, api_key.as_deref(), config.as_deref()),
    }
}

async fn complete(pool: DbPool, request: CompletionRequest) -> Result<()> {
    let gateway = AiGateway::from_pool(pool, GatewaySettings::from_env())?;
    let outcome = gateway.complete(request).await;
    gateway.flush_audit().await;
    match outcome {
        Ok(result) => {
            log::info!("answered by {} using {}", result.provider, result.model);
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(err) => {
            log::error!("[{}] {err}", err.code());
            Err(anyhow!(err.user_message()))
        }
    }
}

async fn status(pool: DbPool) -> Result<()> {
    let gateway = AiGateway::from_pool(pool, GatewaySettings::from_env())?;
    for status in gateway.provider_status().await {
        println!(
            "{:<12} {:<10} {}",
            status.provider.id(),
            if status.connected { "connected" } else { "missing" },
            status.connected_via.as_str()
        );
    }
    Ok(())
}

fn configure(
    pool: &DbPool,
    provider: &str,
    api_key: Option<&str>,
    config: Option<&str>,
) -> Result<()> {
    let kind = ProviderKind::parse(provider)
        .ok_or_else(|| anyhow!("unknown provider `{provider}`"))?;
    let extra = config
        .map(|raw| serde_json::from_str::<serde_json::Value>(raw))
        .transpose()
        .context("--config must be valid JSON")?;
    let conn = pool.get()?;
    save_provider_config(&conn, kind, api_key, extra.as_ref())?;
    println!("saved {} configuration", kind.id());
    Ok(())
}
