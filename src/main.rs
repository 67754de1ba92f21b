use clap::{ArgAction, Parser, Subcommand};
use fnbox::build::BuildRequest;
use fnbox::config::{self, PlatformConfig};
use fnbox::function::FunctionSpec;
use fnbox::invocation::{DispatchRequest, DispatchResponse};
use fnbox::logging::{init_logging, LogLevel};
use fnbox::types::{FunctionId, RuntimeId};
use fnbox::Platform;
use std::collections::BTreeMap;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

type CliResult = Result<ExitCode, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "fnbox",
    version,
    about = "Build and run functions in resource-bounded sandboxes"
)]
struct Cli {
    /// Configuration file (default: ./fnbox.toml, then ~/.config/fnbox/config.toml)
    #[arg(short, long, global = true, env = "FNBOX_CONFIG")]
    config: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true, action = ArgAction::SetTrue)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered runtimes
    Runtimes,
    /// Build source and print the artifact
    Build {
        /// Runtime id, e.g. "python311"
        #[arg(long)]
        runtime: RuntimeId,
        /// Source file
        #[arg(long)]
        source: PathBuf,
        /// Handler entry point
        #[arg(long, default_value = "handler")]
        handler: String,
    },
    /// Deploy source and invoke it once
    Invoke {
        /// Runtime id, e.g. "node20"
        #[arg(long)]
        runtime: RuntimeId,
        /// Source file
        #[arg(long)]
        source: PathBuf,
        /// Handler entry point
        #[arg(long, default_value = "handler")]
        handler: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Memory ceiling in MB
        #[arg(long)]
        memory: Option<u32>,
        /// Timeout in ms
        #[arg(long)]
        timeout: Option<u64>,
        /// Environment variable, repeatable
        #[arg(long = "env", value_parser = parse_env)]
        env: Vec<(String, String)>,
        /// Queue the invocation and wait for it in the background
        #[arg(long = "async", action = ArgAction::SetTrue)]
        is_async: bool,
    },
    /// Print the paths searched for configuration
    ConfigPaths,
}

fn parse_env(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .filter(|(key, _)| !key.is_empty())
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))
}

fn load_config(cli: &Cli) -> Result<PlatformConfig, Box<dyn Error>> {
    let mut config = match cli.config {
        Some(ref path) => config::from_path(path)?,
        None => config::load()?,
    };
    if cli.verbose {
        config.logging.console = true;
        config.logging.level = LogLevel::Debug;
    }
    Ok(config)
}

async fn launch(config: PlatformConfig) -> Result<Platform, Box<dyn Error>> {
    init_logging(&config.logging)?;
    Ok(Platform::builder().with_config(config).launch().await?)
}

async fn runtimes(config: PlatformConfig) -> CliResult {
    let platform = launch(config).await?;
    let toolchains = platform.toolchains().cloned().unwrap_or_default();
    for template in platform.registry().templates() {
        let available = if toolchains.get(&template.id).copied().unwrap_or(false) {
            "available"
        } else {
            "missing"
        };
        println!(
            "{:<12} {:<12} {:<11} {:>5}MB {:>7}ms  {} ({})",
            template.id.as_str(),
            template.language,
            template.kind.to_string(),
            template.default_limits.memory_mb,
            template.default_limits.timeout_ms,
            template.toolchain.display(),
            available
        );
    }
    platform.shutdown().await;
    Ok(ExitCode::SUCCESS)
}

async fn build(
    config: PlatformConfig,
    runtime: RuntimeId,
    source: PathBuf,
    handler: String,
) -> CliResult {
    let source = std::fs::read_to_string(&source)
        .map_err(|e| format!("cannot read '{}': {e}", source.display()))?;
    let platform = launch(config).await?;
    let artifact = platform
        .builds()
        .build(BuildRequest {
            function_id: FunctionId::new(),
            version: 1,
            runtime,
            handler,
            source,
        })
        .await?;
    platform.shutdown().await;
    println!("{}", serde_json::to_string_pretty(&artifact.summary())?);
    Ok(if artifact.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[allow(clippy::too_many_arguments)]
async fn invoke(
    config: PlatformConfig,
    runtime: RuntimeId,
    source: PathBuf,
    handler: String,
    payload: String,
    memory: Option<u32>,
    timeout: Option<u64>,
    env: Vec<(String, String)>,
    is_async: bool,
) -> CliResult {
    let code = std::fs::read_to_string(&source)
        .map_err(|e| format!("cannot read '{}': {e}", source.display()))?;
    let payload: serde_json::Value =
        serde_json::from_str(&payload).map_err(|e| format!("payload is not valid JSON: {e}"))?;
    let acquire_timeout = config.concurrency.acquire_timeout();
    let platform = launch(config).await?;

    let mut spec = FunctionSpec::new("cli", "local", runtime, handler, code);
    spec.env = env.into_iter().collect::<BTreeMap<_, _>>();
    spec.memory_mb = memory;
    spec.timeout_ms = timeout;
    let function = platform.deploy(spec).await?;

    let mut request = DispatchRequest::new(function.id.clone(), payload);
    request.is_async = is_async;
    let response = platform.dispatch(request, &function).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);

    let finished = match response {
        DispatchResponse::Completed(invocation) => invocation,
        DispatchResponse::Queued { invocation_id, .. } => {
            let records = platform.records().ok_or("no record store to wait on")?;
            let wait = Duration::from_millis(function.timeout_ms)
                + acquire_timeout
                + Duration::from_secs(5);
            let invocation = records
                .wait_for_terminal(&invocation_id, wait)
                .await
                .ok_or_else(|| {
                    format!("invocation {invocation_id} did not finish within {wait:?}")
                })?;
            println!("{}", serde_json::to_string_pretty(&invocation)?);
            invocation
        }
    };
    if let Some(records) = platform.records() {
        records.remove(finished.id());
    }
    platform.shutdown().await;

    Ok(if finished.response().is_some() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn run(cli: Cli) -> CliResult {
    if let Commands::ConfigPaths = cli.command {
        for path in config::search_paths() {
            let marker = if path.exists() { "found" } else { "absent" };
            println!("{} ({marker})", path.display());
        }
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    match cli.command {
        Commands::Runtimes => runtimes(config).await,
        Commands::Build {
            runtime,
            source,
            handler,
        } => build(config, runtime, source, handler).await,
        Commands::Invoke {
            runtime,
            source,
            handler,
            payload,
            memory,
            timeout,
            env,
            is_async,
        } => {
            invoke(
                config, runtime, source, handler, payload, memory, timeout, env, is_async,
            )
            .await
        }
        Commands::ConfigPaths => Ok(ExitCode::SUCCESS),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_pairs_split_on_first_equals() {
        assert_eq!(
            parse_env("GREETING=a=b").unwrap(),
            ("GREETING".to_string(), "a=b".to_string())
        );
        assert!(parse_env("=value").is_err());
        assert!(parse_env("NOVALUE").is_err());
    }

    #[test]
    fn invoke_arguments_parse() {
        let cli = Cli::try_parse_from([
            "fnbox", "invoke", "--runtime", "node20", "--source", "index.js", "--env", "A=1",
            "--env", "B=2", "--async", "--timeout", "5000",
        ])
        .unwrap();

        let Commands::Invoke {
            runtime,
            env,
            is_async,
            timeout,
            payload,
            ..
        } = cli.command
        else {
            panic!("expected invoke");
        };
        assert_eq!(runtime.as_str(), "node20");
        assert_eq!(env.len(), 2);
        assert!(is_async);
        assert_eq!(timeout, Some(5000));
        assert_eq!(payload, "{}");
    }

    #[test]
    fn invalid_runtime_is_a_usage_error() {
        let parsed =
            Cli::try_parse_from(["fnbox", "build", "--runtime", "Not Valid", "--source", "x"]);
        assert!(parsed.is_err());
    }
}
