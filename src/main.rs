// Copyright 2025 dentsusoken
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use clap::Parser;
use locker::commands;
use locker::config::{CliOverrides, ConfigLoader};
use locker::error::{Result, format_error_chain, get_exit_code};
use locker::logging;
use log::{error, info};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "locker")]
#[command(
    author,
    version,
    about = "Distributed lock for CI jobs backed by object storage",
    long_about = "Acquires or releases a named lock stored as a marker object in a bucket.\n\
                  Settings are read from INPUT_* environment variables, an optional TOML \
                  file, and the flags below."
)]
struct Cli {
    /// Increase verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// TOML file with default settings
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Operation to perform: lock or unlock
    #[arg(long)]
    operation: Option<String>,

    /// Milliseconds to wait for the lock (0 waits forever)
    #[arg(long, value_name = "MS")]
    lock_timeout_ms: Option<u64>,

    /// Milliseconds to wait for the release (0 waits forever)
    #[arg(long, value_name = "MS")]
    unlock_timeout_ms: Option<u64>,
}

fn main() {
    let cli = Cli::parse();

    logging::setup_logger(cli.verbose);

    if let Err(e) = run(cli) {
        error!("{}", format_error_chain(&e));
        std::process::exit(get_exit_code(&e));
    }
}

fn run(cli: Cli) -> Result<()> {
    info!("Reading environment variables");
    let config = ConfigLoader::new()
        .with_file(cli.config)
        .with_overrides(CliOverrides {
            operation: cli.operation,
            lock_timeout_ms: cli.lock_timeout_ms,
            unlock_timeout_ms: cli.unlock_timeout_ms,
        })
        .load()?;

    commands::run(&config)
}
