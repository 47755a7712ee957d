//! SSH transport - Entry point
//!
//! Parses CLI arguments, validates configuration, runs one transport
//! operation on a blocking worker, and handles graceful shutdown.

use std::io::{Read, Write};

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ssh_transport::config::{Args, Command, Config};
use ssh_transport::ssh::{ExecRequest, RunResult, Transport};

/// What one invocation produced
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Report {
    Exec(RunResult),
    Put { src: String, dest: String },
    Fetch { src: String, dest: String },
    CheckHost { host: String, known: bool },
}

impl Report {
    fn exit_code(&self) -> i32 {
        match self {
            Report::Exec(result) => result.exit_code,
            Report::CheckHost { known, .. } => i32::from(!known),
            Report::Put { .. } | Report::Fetch { .. } => 0,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Logs go to stderr; stdout carries command output
    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Validate and create config
    let config = Config::from_args(args)?;
    let json = config.json;

    info!("ssh-transport v{} starting", env!("CARGO_PKG_VERSION"));

    let task = tokio::task::spawn_blocking(move || run(config));

    let report = tokio::select! {
        joined = task => joined.context("transport worker failed")??,
        signal = shutdown_signal() => {
            info!("Received {}, shutting down...", signal);
            std::process::exit(130);
        }
    };

    let code = report.exit_code();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_plain(&report)?;
    }

    std::process::exit(code);
}

fn run(config: Config) -> anyhow::Result<Report> {
    let Config {
        host,
        settings,
        command,
        ..
    } = config;
    let mut transport = Transport::new(host, settings)?;

    let report = match command {
        Command::Exec {
            sudo,
            executable,
            stdin,
            raw,
            command,
        } => {
            let mut req = ExecRequest::new(command.join(" "))
                .sudoable(sudo)
                .with_executable(executable)
                .raw(raw);
            if let Some(path) = stdin {
                let data = if path.as_os_str() == "-" {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                } else {
                    std::fs::read(&path)
                        .with_context(|| format!("reading {}", path.display()))?
                };
                req = req.with_input(data);
            }
            Report::Exec(transport.exec_command(&req)?)
        }
        Command::Put { src, dest } => {
            transport.put_file(&src, &dest)?;
            Report::Put {
                src: src.display().to_string(),
                dest,
            }
        }
        Command::Fetch { src, dest } => {
            transport.fetch_file(&src, &dest)?;
            Report::Fetch {
                src,
                dest: dest.display().to_string(),
            }
        }
        Command::CheckHost { host } => {
            let host = host.unwrap_or_else(|| transport.host().address.clone());
            let known = !transport.not_in_host_file(&host);
            Report::CheckHost { host, known }
        }
    };

    transport.close();
    Ok(report)
}

fn print_plain(report: &Report) -> anyhow::Result<()> {
    match report {
        Report::Exec(result) => {
            std::io::stdout().write_all(result.stdout.as_bytes())?;
            std::io::stderr().write_all(result.stderr.as_bytes())?;
        }
        Report::Put { src, dest } | Report::Fetch { src, dest } => {
            info!("{} -> {}", src, dest);
        }
        Report::CheckHost { host, known: true } => println!("{} is known", host),
        Report::CheckHost { host, known: false } => {
            println!("{} is not in any known_hosts file", host)
        }
    }
    std::io::stdout().flush()?;
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() -> &'static str {
    let mut sigterm =
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(signal) => Some(signal),
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                None
            }
        };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT (Ctrl+C)",
        _ = async {
            match sigterm.as_mut() {
                Some(signal) => {
                    signal.recv().await;
                }
                None => std::future::pending::<()>().await,
            }
        } => "SIGTERM",
    }
}
