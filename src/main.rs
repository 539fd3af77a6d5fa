mod accessor;
mod args;
mod config;
mod control;
mod engine;
mod health;
mod memo;
mod platform;
mod session;
mod supervisor;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use args::Args;

fn main() {
    let args = Args::parse();
    let _file_guard = init_logging(&args);

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(supervisor::run(args)) {
        tracing::error!(error = ?e, "fatal startup error");
        std::process::exit(1);
    }
}

/// `-log-level` accepts the spec's `DEBUG|INFO|WARNING|ERROR` vocabulary;
/// `tracing_subscriber::EnvFilter` wants `warn`, not `warning`. `RUST_LOG`
/// always wins when set, matching the teacher's own logging setup.
fn init_logging(args: &Args) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let normalized = match args.log_level.to_ascii_uppercase().as_str() {
        "WARNING" => "warn".to_string(),
        other => other.to_ascii_lowercase(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(normalized));

    match &args.log_file {
        Some(path) => {
            let file = match std::fs::OpenOptions::new().create(true).append(true).open(path) {
                Ok(f) => f,
                Err(e) => {
                    eprintln!("failed to open log file {}: {e}", path.display());
                    std::process::exit(1);
                }
            };
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}
