use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use lambda_invoker::InvocationOutcome;
use lambda_local::{init_tracing, invoke_function, load_config, start_api, Config};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "lambda-local")]
#[command(about = "Run serverless templates locally against Docker")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the template's HTTP triggers
    StartApi {
        #[command(flatten)]
        shared: SharedArgs,
        #[arg(long)]
        host: Option<String>,
        #[arg(short, long)]
        port: Option<u16>,
        /// Directory served after function routes
        #[arg(long)]
        static_dir: Option<String>,
    },
    /// Invoke one function and print its output
    Invoke {
        /// Logical id of the function in the template
        function_id: String,
        /// Event JSON file; `-` reads stdin, absent sends `{}`
        #[arg(short, long)]
        event: Option<PathBuf>,
        #[command(flatten)]
        shared: SharedArgs,
    },
}

#[derive(Args)]
struct SharedArgs {
    /// Template file
    #[arg(short, long, env = "LAMBDA_LOCAL_TEMPLATE")]
    template: Option<String>,
    /// JSON file of per-function environment overrides
    #[arg(short = 'n', long)]
    env_vars: Option<String>,
    /// Start containers under the debugger on this port
    #[arg(short, long)]
    debug_port: Option<u16>,
    #[arg(long)]
    skip_pull_image: bool,
    #[arg(long)]
    docker_network: Option<String>,
    /// Template parameter override, `Name=Value`; repeatable
    #[arg(long = "parameter-override", value_parser = parse_key_value)]
    parameter_overrides: Vec<(String, String)>,
}

impl SharedArgs {
    fn apply(self, config: &mut Config) {
        if let Some(template) = self.template {
            config.template.path = template;
        }
        if let Some(env_vars) = self.env_vars {
            config.invoke.env_vars = Some(env_vars);
        }
        if let Some(port) = self.debug_port {
            config.invoke.debug_port = Some(port);
        }
        if self.skip_pull_image {
            config.docker.skip_pull = true;
        }
        if let Some(network) = self.docker_network {
            config.docker.network = Some(network);
        }
        config
            .template
            .parameter_overrides
            .extend(self.parameter_overrides);
    }
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected Name=Value, got `{raw}`"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::StartApi {
            shared,
            host,
            port,
            static_dir,
        } => {
            shared.apply(&mut config);
            if let Some(host) = host {
                config.server.bind = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(static_dir) = static_dir {
                config.server.static_dir = Some(static_dir);
            }
            start_api(config).await?;
        }
        Commands::Invoke {
            function_id,
            event,
            shared,
        } => {
            shared.apply(&mut config);
            let event = read_event(event).await?;
            let result = invoke_function(config, &function_id, &event).await?;
            info!(request_id = %result.request_id, duration = ?result.duration, "Invocation finished");

            std::io::stdout().write_all(&result.stdout)?;
            match result.outcome {
                InvocationOutcome::Completed { exit_code: 0 } => {}
                InvocationOutcome::Completed { exit_code } => {
                    bail!("function {function_id} exited with code {exit_code}")
                }
                InvocationOutcome::TimedOut { after } => {
                    bail!("function {function_id} timed out after {after:?}")
                }
                InvocationOutcome::Interrupted => bail!("invocation interrupted"),
            }
        }
    }

    Ok(())
}

async fn read_event(path: Option<PathBuf>) -> anyhow::Result<String> {
    match path {
        None => Ok("{}".to_string()),
        Some(path) if path.as_os_str() == "-" => {
            let mut event = String::new();
            tokio::io::AsyncReadExt::read_to_string(&mut tokio::io::stdin(), &mut event)
                .await
                .context("reading event from stdin")?;
            Ok(event)
        }
        Some(path) => tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("reading event file {}", path.display())),
    }
}
