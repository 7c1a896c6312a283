//! cphttp - development static file server with live reload.
//!
//! Serves a directory over HTTP and tells connected browsers to reload when
//! watched files change.

mod error;
mod logging;
mod output;
mod serve;

use clap::Parser;

use output::Output;
use serve::ServeArgs;

/// Application version from Cargo.toml.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// cphttp - development static file server with live reload.
#[derive(Parser)]
#[command(name = "cphttp", version, about)]
struct Cli {
    #[command(flatten)]
    serve: ServeArgs,
}

fn main() {
    let cli = Cli::parse();
    let output = Output::new();

    if let Err(err) = cli.serve.execute(&output, VERSION) {
        output.error(&format!("Error: {err}"));
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }
}
