//! Lists one directory and prints the listing events as JSON lines.
//!
//! Usage: `dirstream [PATH] [--snapshot] [--config FILE]`
//!
//! Logs go to stderr (`RUST_LOG`, default `info`), so stdout stays a clean event stream.

use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use dirstream::ListingConfig;
use dirstream::file_system::listing::{JsonLinesSink, ListingState, MetadataHydrator, list_directory, select_enumerator};
use dirstream::file_system::validation::{DirsHomeResolver, resolve_request_path};
use dirstream::{ListingError, StreamCoordinator};

struct Args {
    path: String,
    snapshot: bool,
    config: Option<PathBuf>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        path: String::new(),
        snapshot: false,
        config: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--snapshot" => args.snapshot = true,
            "--config" => match iter.next() {
                Some(file) => args.config = Some(PathBuf::from(file)),
                None => return Err("--config needs a file".to_string()),
            },
            flag if flag.starts_with("--") => return Err(format!("unknown option {}", flag)),
            path if args.path.is_empty() => args.path = path.to_string(),
            extra => return Err(format!("unexpected argument {}", extra)),
        }
    }
    Ok(args)
}

fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();
}

fn print_snapshot(config: &ListingConfig, raw_path: &str) -> Result<(), ListingError> {
    let path = resolve_request_path(raw_path, &DirsHomeResolver)?;
    let enumerator = select_enumerator(config.enumerator);
    let hydrator = MetadataHydrator::new(config.hydration_workers)?;
    let snapshot = list_directory(enumerator.as_ref(), &hydrator, &path, config.include_hidden)?;

    let json = serde_json::to_string(&snapshot).map_err(|e| ListingError::EnumerationFailed(e.to_string()))?;
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{}", json)?;
    Ok(())
}

/// Returns false if the listing ended with an `Error` event.
fn stream_listing(config: ListingConfig, raw_path: &str) -> Result<bool, ListingError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| ListingError::Config(format!("couldn't start runtime: {}", e)))?;

    runtime.block_on(async {
        let sink = Arc::new(JsonLinesSink::new(io::stdout()));
        let coordinator = StreamCoordinator::builder(sink).config(config).build()?;
        let request = coordinator.navigate(raw_path);
        request.wait_finished().await;
        log::info!(
            "Listing {} finished as {:?} in {}ms",
            request.id(),
            request.state(),
            request.elapsed().as_millis()
        );
        Ok::<bool, ListingError>(request.state() != ListingState::Error)
    })
}

fn main() -> ExitCode {
    init_logging();

    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            log::error!("{}", message);
            log::error!("Usage: dirstream [PATH] [--snapshot] [--config FILE]");
            return ExitCode::from(2);
        }
    };
    let config = ListingConfig::load(args.config.as_deref());

    let result = if args.snapshot {
        print_snapshot(&config, &args.path).map(|_| true)
    } else {
        stream_listing(config, &args.path)
    };
    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
