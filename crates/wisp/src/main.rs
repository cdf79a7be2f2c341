//! Wisp: server-side bridge between a desktop companion client and a
//! conversational engine.
//!
//! Main binary with subcommands:
//! - `serve`: HTTP gateway, screenshot timer and proactive scheduler
//! - `check-config`: Validate a config file and print the resolved values

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use miette::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod daemon;
mod engine;

use config::Config;
use daemon::ServeOptions;

/// Parse boolean from environment variable, accepting common truthy values.
fn parse_bool_env(s: &str) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(format!(
            "invalid boolean value '{}', expected 1/true/yes/on or 0/false/no/off",
            s
        )),
    }
}

#[derive(Parser)]
#[command(name = "wisp")]
#[command(about = "Desktop companion message bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway, screenshot timer and proactive scheduler
    Serve {
        /// JSON config file. Missing keys take their defaults.
        #[arg(long, env = "WISP_CONFIG")]
        config: Option<PathBuf>,

        /// Address to listen on
        #[arg(long, env = "WISP_LISTEN", default_value = "127.0.0.1:8765")]
        listen: SocketAddr,

        /// Directory for uploads and screenshots
        #[arg(long, env = "WISP_DATA_DIR", default_value = "wisp-data")]
        data_dir: PathBuf,

        /// Base URL of the conversation engine. Replies echo when unset.
        #[arg(long, env = "WISP_ENGINE_URL")]
        engine_url: Option<String>,

        /// Secret clients present as a bearer token on first contact
        #[arg(long, env = "WISP_SHARED_SECRET", hide_env_values = true)]
        shared_secret: Option<String>,

        /// Override `proactiveEnabled` from the config file
        #[arg(long, env = "WISP_PROACTIVE", value_parser = parse_bool_env)]
        proactive: Option<bool>,

        /// Override `screenshotEnabled` from the config file
        #[arg(long, env = "WISP_SCREENSHOTS", value_parser = parse_bool_env)]
        screenshots: Option<bool>,
    },

    /// Validate a config file and print the resolved configuration
    CheckConfig {
        /// JSON config file
        #[arg(long, env = "WISP_CONFIG")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| {
                "wisp=info,wisp_bridge=info,wisp_scheduler=info,wisp_screenshots=info,wisp_web=info"
                    .to_string()
            }),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            listen,
            data_dir,
            engine_url,
            shared_secret,
            proactive,
            screenshots,
        } => {
            let mut config =
                Config::load(config.as_deref()).map_err(|e| miette::miette!("{}", e))?;
            if let Some(enabled) = proactive {
                config.proactive_enabled = enabled;
            }
            if let Some(enabled) = screenshots {
                config.screenshot_enabled = enabled;
            }

            let options = ServeOptions {
                listen,
                data_dir,
                engine_url,
                shared_secret: shared_secret.filter(|s| !s.is_empty()),
            };
            daemon::run(config, options)
                .await
                .map_err(|e| miette::miette!("{}", e))
        }

        Commands::CheckConfig { config } => {
            let config = Config::load(config.as_deref()).map_err(|e| miette::miette!("{}", e))?;
            let rendered = serde_json::to_string_pretty(&config)
                .map_err(|e| miette::miette!("failed to render config: {}", e))?;
            println!("{}", rendered);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool_env() {
        for truthy in ["1", "true", "YES", "on"] {
            assert_eq!(parse_bool_env(truthy), Ok(true));
        }
        for falsy in ["0", "false", "No", "off", ""] {
            assert_eq!(parse_bool_env(falsy), Ok(false));
        }
        assert!(parse_bool_env("maybe").is_err());
    }

    #[test]
    fn test_cli_parses_serve_overrides() {
        let cli = Cli::try_parse_from([
            "wisp",
            "serve",
            "--listen",
            "0.0.0.0:9000",
            "--proactive",
            "off",
        ])
        .unwrap();
        match cli.command {
            Commands::Serve {
                listen, proactive, ..
            } => {
                assert_eq!(listen.port(), 9000);
                assert_eq!(proactive, Some(false));
            }
            Commands::CheckConfig { .. } => panic!("expected serve"),
        }
    }
}
