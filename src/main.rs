use std::path::PathBuf;

use clap::{Arg, ArgAction, Command};

use chronicler_runtime::observability;
use chronicler_runtime::turn::TurnRequest;
use chronicler_runtime::{CharacterId, Config, TurnService};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let matches = Command::new("chronicler")
        .version(VERSION)
        .about("Chronicler - narrative turn-processing service")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to a TOML configuration file")
                .global(true),
        )
        .subcommand(
            Command::new("turn")
                .about("Process one turn for a character")
                .arg(
                    Arg::new("character")
                        .long("character")
                        .value_name("ID")
                        .required(true)
                        .help("Character identifier"),
                )
                .arg(
                    Arg::new("action")
                        .long("action")
                        .value_name("TEXT")
                        .required(true)
                        .help("The player's action text"),
                )
                .arg(
                    Arg::new("dry-run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Skip journey-log writes; report would-write decisions"),
                )
                .arg(
                    Arg::new("stream")
                        .long("stream")
                        .action(ArgAction::SetTrue)
                        .help("Print model tokens as they arrive"),
                ),
        )
        .subcommand(
            Command::new("recent")
                .about("Print recent turn audit records for a character")
                .arg(
                    Arg::new("character")
                        .long("character")
                        .value_name("ID")
                        .required(true)
                        .help("Character identifier"),
                )
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .default_value("10")
                        .help("Maximum records to print"),
                ),
        )
        .subcommand(Command::new("check-config").about("Validate and print the effective configuration"))
        .get_matches();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let config = match Config::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    };
    observability::init_logging(&config.logging);

    let exit_code = match matches.subcommand() {
        Some(("turn", sub)) => run_turn(config, sub).await,
        Some(("recent", sub)) => run_recent(config, sub),
        Some(("check-config", _)) => check_config(config),
        _ => {
            eprintln!("error: no subcommand given (try --help)");
            2
        }
    };
    std::process::exit(exit_code);
}

async fn run_turn(config: Config, matches: &clap::ArgMatches) -> i32 {
    let service = match TurnService::from_config(config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let character = matches
        .get_one::<String>("character")
        .cloned()
        .unwrap_or_default();
    let action = matches
        .get_one::<String>("action")
        .cloned()
        .unwrap_or_default();
    let mut request = TurnRequest::new(CharacterId::new(character), action);
    if matches.get_flag("dry-run") {
        request = request.dry_run();
    }

    let result = if matches.get_flag("stream") {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(64);
        let printer = tokio::spawn(async move {
            use std::io::Write;
            while let Some(token) = rx.recv().await {
                print!("{token}");
                let _ = std::io::stdout().flush();
            }
            println!();
        });
        let result = service.process_turn_stream(request, tx).await;
        let _ = printer.await;
        result
    } else {
        service.process_turn(request).await
    };

    match result {
        Ok(result) => {
            println!("{}", result.narrative);
            match serde_json::to_string_pretty(&result.summary) {
                Ok(summary) => println!("\n{summary}"),
                Err(e) => eprintln!("error rendering summary: {e}"),
            }
            0
        }
        Err(failure) => {
            eprintln!("turn failed [{}]: {}", failure.kind, failure.message);
            if let Some(retry_after) = failure.retry_after_seconds {
                eprintln!("retry after {retry_after:.2}s");
            }
            1
        }
    }
}

fn run_recent(config: Config, matches: &clap::ArgMatches) -> i32 {
    let service = match TurnService::from_config(config) {
        Ok(service) => service,
        Err(e) => {
            eprintln!("error: {e}");
            return 1;
        }
    };

    let character = matches
        .get_one::<String>("character")
        .cloned()
        .unwrap_or_default();
    let limit = matches
        .get_one::<String>("limit")
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(10);

    let records = service.recent_turns(&CharacterId::new(character), limit);
    if records.is_empty() {
        println!("no recent turns");
        return 0;
    }
    for record in records {
        match serde_json::to_string_pretty(record.as_ref()) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("error rendering record: {e}"),
        }
    }
    0
}

fn check_config(config: Config) -> i32 {
    if let Err(e) = config.validate() {
        eprintln!("configuration invalid: {e}");
        return 1;
    }
    match toml::to_string_pretty(&config) {
        Ok(rendered) => {
            println!("{rendered}");
            0
        }
        Err(e) => {
            eprintln!("error rendering config: {e}");
            1
        }
    }
}
