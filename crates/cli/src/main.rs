use clap::{CommandFactory, Parser};
use start_test::{Cli, commands::exit_code_for, normalize_args};

fn main() {
    // Initialize tracing based on RUST_LOG env var
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = normalize_args(&Cli::command(), std::env::args());
    let cli = Cli::parse_from(args);

    let code = match cli.execute() {
        Ok(code) => code,
        Err(err) => exit_code_for(&err),
    };
    std::process::exit(code);
}
