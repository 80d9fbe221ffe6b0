//! spatial-deploy - Entry Point
//!
//! Exit codes: 0 on success, 1 on a hard failure or configuration error,
//! 2 when the platform was graded degraded or failed.

use clap::Parser;

use spatial_orchestrator::commands::output::print_error;
use spatial_orchestrator::commands::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            print_error(&e);
            1
        }
    };
    std::process::exit(code);
}
