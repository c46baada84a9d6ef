//! Loom command-line assistant.

mod commands;
mod config;
mod console;
mod init;
mod runtime;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(name = "loom", version, about = "Loom IDE agent")]
struct Cli {
    /// Config file. Defaults to ~/.loom/config.toml.
    #[arg(long, global = true, env = "LOOM_CONFIG")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive chat with tool calling (default).
    Chat {
        /// Project name shown to the model.
        #[arg(long)]
        project: Option<String>,
        /// File currently open in the editor.
        #[arg(long)]
        open_file: Option<String>,
    },
    /// Run one self-improvement cycle for an issue description.
    Improve {
        issue: String,
        /// Files known to be involved. Repeatable.
        #[arg(long = "file")]
        files: Vec<String>,
        /// ui_bug, performance, runtime_error, integration or logic. Classified when omitted.
        #[arg(long)]
        category: Option<String>,
        /// Reject every approval prompt instead of reading stdin.
        #[arg(long)]
        no_input: bool,
    },
    /// Show the tool registry.
    Tools,
    /// Print audit log entries as JSON lines.
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Show learned patterns per issue category.
    Patterns,
    /// Initialize ~/.loom with a config template (idempotent).
    Init,
    /// Validate config and perform basic health checks.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing()?;
    install_panic_hook();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Chat {
        project: None,
        open_file: None,
    });

    if let Command::Init = command {
        let report = init::initialize_default().await?;
        if report.created.is_empty() {
            println!("loom init: already initialized at {}", report.root.display());
        } else {
            println!("loom init: initialized {}", report.root.display());
            for path in &report.created {
                println!("created {}", path.display());
            }
            if !report.skipped.is_empty() {
                println!("kept {} existing file(s) unchanged", report.skipped.len());
            }
        }
        println!("next: edit {}", report.root.join("config.toml").display());
        return Ok(());
    }

    let cfg = config::LoomConfig::load(cli.config).await?;
    match command {
        Command::Chat { project, open_file } => commands::chat(&cfg, project, open_file).await,
        Command::Improve {
            issue,
            files,
            category,
            no_input,
        } => {
            let approvals = if no_input {
                console::ApprovalMode::RejectAll
            } else {
                console::ApprovalMode::Prompt
            };
            commands::improve(&cfg, &issue, files, category.as_deref(), approvals).await
        }
        Command::Tools => commands::tools(&cfg),
        Command::Audit { limit } => commands::audit(&cfg, limit).await,
        Command::Patterns => commands::patterns(&cfg).await,
        Command::Doctor => commands::doctor(&cfg).await,
        Command::Init => Ok(()),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new(
            "info,loom=debug,loom_agent=debug,loom_llm=debug,loom_tools=debug",
        ),
    };
    let log_format = std::env::var("LOOM_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr; stdout carries replies.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported LOOM_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(
        log_format = %log_format,
        env_filter = ?std::env::var("RUST_LOG").ok(),
        "tracing initialized"
    );
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let location = panic_info
            .location()
            .map(|loc| format!("{}:{}", loc.file(), loc.line()))
            .unwrap_or_else(|| "unknown".to_string());
        let payload = panic_payload_to_string(panic_info.payload());
        tracing::error!(
            panic_location = %location,
            panic_payload = %payload,
            "panic captured"
        );
        default_hook(panic_info);
    }));
}

fn panic_payload_to_string(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        return msg.to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_is_the_default_and_files_repeat() {
        let cli = Cli::try_parse_from(["loom"]).unwrap();
        assert!(cli.command.is_none());

        let cli = Cli::try_parse_from([
            "loom", "improve", "sidebar button does nothing", "--file", "a.tsx", "--file", "b.tsx",
        ])
        .unwrap();
        let Some(Command::Improve {
            issue,
            files,
            category,
            no_input,
        }) = cli.command
        else {
            panic!("expected improve");
        };
        assert_eq!(issue, "sidebar button does nothing");
        assert_eq!(files, vec!["a.tsx", "b.tsx"]);
        assert!(category.is_none());
        assert!(!no_input);

        let cli = Cli::try_parse_from(["loom", "improve", "slow", "--no-input"]).unwrap();
        assert!(matches!(cli.command, Some(Command::Improve { no_input: true, .. })));
    }

    #[test]
    fn panic_payloads_render_as_text() {
        assert_eq!(panic_payload_to_string(&"boom"), "boom");
        assert_eq!(panic_payload_to_string(&String::from("bang")), "bang");
        assert_eq!(panic_payload_to_string(&42u8), "non-string panic payload");
    }
}
