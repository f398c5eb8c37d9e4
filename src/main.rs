//! proxy-auth
//!
//! Local forward proxy that adds `Proxy-Authorization: Basic` credentials to
//! every request and relays it to an upstream proxy.
//!
//! ```text
//!   client ──▶ proxy-auth ──(+ Proxy-Authorization)──▶ upstream proxy ──▶ origin
//!   client ◀── proxy-auth ◀──────────────────────────── upstream proxy ◀── origin
//! ```
//!
//! Exit codes: 0 after a stop signal, 1 on a config or startup failure,
//! 5 when the upstream proxy rejects the credentials.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use proxy_auth::lifecycle::startup::{self, StartupOptions, EXIT_STARTUP_FAILURE};

#[derive(Parser)]
#[command(name = "proxy-auth")]
#[command(about = "Authenticating forward proxy", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file.
    #[arg(short, long, default_value = "proxyauth.toml")]
    config: PathBuf,

    /// Log header blocks and raise the log level to debug.
    #[arg(short, long)]
    debug: bool,

    /// Do not reload the configuration file when it changes.
    #[arg(long)]
    no_watch: bool,

    /// Validate the configuration, print the effective settings and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let options = StartupOptions {
        config_path: cli.config,
        debug: cli.debug,
        watch: !cli.no_watch,
    };

    let config = match startup::prepare_config(&options) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "proxy-auth: failed to load {}: {}",
                options.config_path.display(),
                e
            );
            return exit_code(EXIT_STARTUP_FAILURE);
        }
    };

    if cli.check {
        println!("{}", startup::describe(&config, &options.config_path));
        return ExitCode::SUCCESS;
    }

    match startup::run(options, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "proxy-auth stopped");
            exit_code(e.exit_code())
        }
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
