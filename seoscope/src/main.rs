use anyhow::{Context, Result};
use clap::ArgMatches;
use colored::Colorize;
use commands::command_argument_builder;
use seoscope::handlers::{
    handle_replay, handle_report, handle_settings_set, handle_settings_show,
    handle_settings_watch,
};
use seoscope::{ReportFormat, expand_store_path, open_store};
use seoscope_core::SettingsPatch;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let chosen_command = command_argument_builder().get_matches();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("SEOSCOPE_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    // The graph is single threaded, so everything runs on this thread.
    let local = tokio::task::LocalSet::new();
    if let Err(e) = local.run_until(dispatch(&chosen_command)).await {
        eprintln!("{} {:#}", "✗".red().bold(), e);
        std::process::exit(1);
    }
}

async fn dispatch(matches: &ArgMatches) -> Result<()> {
    let quiet = matches.get_flag("quiet");

    match matches.subcommand() {
        Some(("settings", primary_command)) => {
            let store = open_store(&store_path(matches))?;
            match primary_command.subcommand() {
                Some(("show", secondary_command)) => {
                    handle_settings_show(&store, format_arg(secondary_command)).await
                }
                Some(("set", secondary_command)) => {
                    handle_settings_set(&store, patch_from_args(secondary_command))
                        .await
                        .map(|_| ())
                }
                Some(("watch", secondary_command)) => {
                    let interval = secondary_command
                        .get_one::<u64>("interval")
                        .copied()
                        .unwrap_or(250);
                    handle_settings_watch(store, Duration::from_millis(interval)).await
                }
                _ => unreachable!("clap should ensure we don't get here"),
            }
        }
        Some(("report", primary_command)) => {
            let file = file_arg(primary_command)?;
            handle_report(&file, format_arg(primary_command))
        }
        Some(("replay", primary_command)) => {
            let file = file_arg(primary_command)?;
            let delay = primary_command
                .get_one::<u64>("delay-ms")
                .copied()
                .unwrap_or(0);
            handle_replay(
                &file,
                Duration::from_millis(delay),
                format_arg(primary_command),
                quiet,
            )
            .await
        }
        _ => unreachable!("clap should ensure we don't get here"),
    }
}

fn store_path(matches: &ArgMatches) -> PathBuf {
    let raw = matches
        .get_one::<String>("store")
        .map(String::as_str)
        .unwrap_or(seoscope::DEFAULT_STORE_PATH);
    expand_store_path(raw)
}

fn file_arg(args: &ArgMatches) -> Result<PathBuf> {
    args.get_one::<PathBuf>("FILE")
        .cloned()
        .context("Missing FILE argument")
}

fn format_arg(args: &ArgMatches) -> ReportFormat {
    args.get_one::<String>("format")
        .and_then(|f| ReportFormat::parse(f))
        .unwrap_or(ReportFormat::Text)
}

fn patch_from_args(args: &ArgMatches) -> SettingsPatch {
    SettingsPatch {
        base_url: args.get_one::<String>("base-url").cloned(),
        max_concurrent_requests: args.get_one::<u32>("max-concurrent-requests").copied(),
        request_delay_ms: args.get_one::<u32>("request-delay-ms").copied(),
    }
}

pub const CLAP_STYLING: clap::builder::styling::Styles = clap::builder::styling::Styles::styled()
    .header(clap_cargo::style::HEADER)
    .usage(clap_cargo::style::USAGE)
    .literal(clap_cargo::style::LITERAL)
    .placeholder(clap_cargo::style::PLACEHOLDER)
    .error(clap_cargo::style::ERROR)
    .valid(clap_cargo::style::VALID)
    .invalid(clap_cargo::style::INVALID);
