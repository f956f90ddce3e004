use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;
mod config;
mod logging;

use commands::{AskArgs, ReplayArgs, ValidateArgs};
use config::RelayConfig;

#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "provider-neutral LLM streaming relay")]
struct Cli {
    /// Configuration file; defaults to ./relay.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: RootCommand,
}

#[derive(Subcommand, Debug, Clone)]
enum RootCommand {
    /// Run a recorded response through the full pipeline and print the result.
    Replay(ReplayArgs),
    /// Send one prompt to the configured backend and stream the answer.
    Ask(AskArgs),
    /// Check a JSON list of content blocks for structural violations.
    Validate(ValidateArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let result = run(cli).await;

    if let Err(error) = result {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let config = RelayConfig::load(cli.config.as_deref()).map_err(|error| error.to_string())?;
    logging::init_tracing(&config.log);

    match cli.command {
        RootCommand::Replay(args) => commands::run_replay(args, &config).await,
        RootCommand::Ask(args) => commands::run_ask(args, &config).await,
        RootCommand::Validate(args) => commands::run_validate(args),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_accepts_replay_with_provider_and_input() {
        let parsed = Cli::try_parse_from([
            "relay",
            "replay",
            "--provider",
            "openai",
            "--input",
            "fixture.sse",
        ])
        .expect("replay should parse");
        match parsed.command {
            RootCommand::Replay(args) => {
                assert_eq!(args.provider, relay_ai::ProviderKind::Openai);
                assert_eq!(args.session_id, "replay");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn cli_rejects_unknown_provider() {
        let parsed = Cli::try_parse_from([
            "relay",
            "replay",
            "--provider",
            "bedrock",
            "--input",
            "fixture.sse",
        ]);
        assert!(parsed.is_err(), "unknown providers should be rejected");
    }

    #[test]
    fn cli_accepts_config_as_global_flag() {
        let parsed = Cli::try_parse_from(["relay", "ask", "--prompt", "hi", "--config", "r.toml"]);
        assert!(parsed.is_ok(), "--config should be accepted after the subcommand");
    }
}
