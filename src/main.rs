//! llm-chain - CLI entry point.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use llm_chain::llm::{Chain, Outcome, PromptTemplate, PromptVars, RetryPolicy};
use llm_chain::{BackendHandle, LlmConfig};

/// Invoke an LLM with retries and structured-output recovery.
#[derive(Parser, Debug)]
#[command(name = "llm-chain")]
#[command(about = "Invoke an LLM with retries and structured-output recovery")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the active backend configuration as JSON
    Info,

    /// Initialize the configured backend and run the liveness probe
    Probe,

    /// Render a template and invoke the backend
    Invoke {
        /// Prompt template with {name} placeholders
        #[arg(short, long)]
        template: String,

        /// Template variable as name=value (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<(String, String)>,

        /// Return the raw response text instead of parsed JSON
        #[arg(long)]
        text: bool,

        /// JSON value to return when every attempt fails
        #[arg(long)]
        default: Option<String>,

        /// Retries after the first attempt
        #[arg(long, default_value_t = llm_chain::llm::retry::DEFAULT_MAX_RETRIES)]
        max_retries: u32,

        /// Disable random jitter on backoff delays
        #[arg(long)]
        no_jitter: bool,
    },
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => Ok((name.trim().to_string(), value.to_string())),
        _ => Err(format!("expected name=value, got '{}'", raw)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = LlmConfig::from_env().context("Invalid LLM configuration")?;

    match cli.command {
        Command::Info => {
            println!("{}", serde_json::to_string_pretty(&config.info())?);
        }
        Command::Probe => {
            let handle = BackendHandle::initialize(&config).await?;
            match handle.provider() {
                Some(provider) => println!(
                    "{} backend is ready (model {})",
                    provider,
                    handle.model().unwrap_or_default()
                ),
                None => println!("No LLM backend configured (mode 'none')"),
            }
        }
        Command::Invoke {
            template,
            vars,
            text,
            default,
            max_retries,
            no_jitter,
        } => {
            let default = default
                .map(|raw| serde_json::from_str::<Value>(&raw))
                .transpose()
                .context("--default must be valid JSON")?;
            if text && default.is_some() {
                bail!("--default only applies to structured output; drop --text or --default");
            }

            let handle = BackendHandle::initialize(&config).await?;

            let mut policy = RetryPolicy::default().with_max_retries(max_retries);
            if no_jitter {
                policy = policy.without_jitter();
            }

            let chain = Chain::robust(handle, PromptTemplate::new(template)).with_retry_policy(policy);
            let vars: PromptVars = vars.into_iter().collect();

            if text {
                let response = chain.invoke_text(&vars).await?;
                println!("{}", response);
                return Ok(());
            }

            match chain.invoke::<Value>(&vars, default.as_ref()).await? {
                Outcome::Success(value) => println!("{}", serde_json::to_string_pretty(&value)?),
                Outcome::Recovered(value) => {
                    eprintln!("Warning: all attempts failed, using the default value");
                    println!("{}", serde_json::to_string_pretty(&value)?);
                }
            }
        }
    }

    Ok(())
}
