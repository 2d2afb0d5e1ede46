//! numbench CLI - throughput benchmarks for numeric backends
//!
//! # Commands
//!
//! - `umath` - cycles per element of elementwise functions
//! - `rng` - random number sampling throughput
//! - `linalg` - dense linear algebra timing
//! - `provision` - install the package manager and benchmark environments

use clap::Parser;
use numbench::cli::{entrypoint, Cli};

fn main() {
    let cli = Cli::parse();
    if let Err(e) = entrypoint(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
