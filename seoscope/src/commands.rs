use crate::CLAP_STYLING;
use clap::{arg, command};
use seoscope::DEFAULT_STORE_PATH;

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("seoscope")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("seoscope")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress progress bars and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-s --"store" <PATH>)
                .required(false)
                .global(true)
                .help("Location of the settings store")
                .default_value(DEFAULT_STORE_PATH),
        )
        .subcommand_required(true)
        .subcommand(
            command!("settings")
                .about("Show, change or watch the crawl settings")
                .subcommand_required(true)
                .subcommand(
                    command!("show").about("Print the stored settings").arg(
                        arg!(-f --"format" <FORMAT>)
                            .required(false)
                            .help("Output format: text, json")
                            .value_parser(["text", "json"])
                            .default_value("text"),
                    ),
                )
                .subcommand(
                    command!("set")
                        .about("Merge new values over the stored settings")
                        .arg(
                            arg!(-u --"base-url" <URL>)
                                .required(false)
                                .help("Base URL to crawl"),
                        )
                        .arg(
                            arg!(-c --"max-concurrent-requests" <NUM>)
                                .required(false)
                                .help("Maximum number of concurrent requests (at least 1)")
                                .value_parser(clap::value_parser!(u32)),
                        )
                        .arg(
                            arg!(-d --"request-delay-ms" <MS>)
                                .required(false)
                                .help("Delay between requests in milliseconds (0-1000)")
                                .value_parser(clap::value_parser!(u32)),
                        ),
                )
                .subcommand(
                    command!("watch")
                        .about(
                            "Keep settings in sync with the store and print every change, \
                        including changes made by other processes.",
                        )
                        .arg(
                            arg!(-i --"interval" <MS>)
                                .required(false)
                                .help("How often to poll the store for outside changes")
                                .value_parser(clap::value_parser!(u64))
                                .default_value("250"),
                        ),
                ),
        )
        .subcommand(
            command!("report")
                .about("Classify a saved crawl result and print the report")
                .arg(
                    arg!(<FILE>)
                        .help("Path to a crawl result JSON file")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
        .subcommand(
            command!("replay")
                .about("Replay a recorded backend event log through the crawl consumer")
                .arg(
                    arg!(<FILE>)
                        .help("Path to a newline-delimited JSON event log")
                        .value_parser(clap::value_parser!(std::path::PathBuf)),
                )
                .arg(
                    arg!(--"delay-ms" <MS>)
                        .required(false)
                        .help("Pause between replayed events")
                        .value_parser(clap::value_parser!(u64))
                        .default_value("0"),
                )
                .arg(
                    arg!(-f --"format" <FORMAT>)
                        .required(false)
                        .help("Report format: text, json")
                        .value_parser(["text", "json"])
                        .default_value("text"),
                ),
        )
}
