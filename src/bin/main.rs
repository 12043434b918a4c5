// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use clap::Parser;
use csv::Writer;
use garage_flow::{Engine, EngineConfig, Envelope};
use std::fs::File;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Garage Flow - Replay a workflow command log
///
/// Reads one JSON command envelope per line, applies each to a fresh engine
/// and writes the resulting wallet balances as CSV to stdout.
#[derive(Parser, Debug)]
#[command(name = "garage-flow")]
#[command(about = "Replays job, parts-order and settlement commands", long_about = None)]
struct Args {
    /// Path to a JSON-lines command file
    ///
    /// Each line: {"actor":{"id":1,"role":"customer"},"command":{"type":"top_up","amount":"500.00"}}
    /// Example: cargo run -- commands.jsonl > wallets.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Default log filter when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

fn main() {
    let args = Args::parse();
    init_tracing(&args.log_level, args.log_json);

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error reading configuration: {}", e);
            process::exit(1);
        }
    };

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = Engine::new(config);
    let summary = match replay(&engine, BufReader::new(file)) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error reading commands: {}", e);
            process::exit(1);
        }
    };
    tracing::info!(
        applied = summary.applied,
        rejected = summary.rejected,
        malformed = summary.malformed,
        "replay finished"
    );

    if let Err(e) = write_wallets(&engine, std::io::stdout()) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

fn init_tracing(log_level: &str, json: bool) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

/// Counts from one replay.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    pub rejected: usize,
    pub malformed: usize,
}

/// Applies every command line in `reader` to `engine`.
///
/// Blank lines are ignored. Lines that do not parse and commands the engine
/// rejects are logged and skipped; replay continues with the next line.
///
/// # Errors
///
/// Returns an I/O error if the reader fails.
pub fn replay<R: Read>(engine: &Engine, reader: R) -> Result<ReplaySummary, std::io::Error> {
    let mut summary = ReplaySummary::default();
    for (index, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line_no = index + 1;
        if line.trim().is_empty() {
            continue;
        }

        let envelope: Envelope = match serde_json::from_str(&line) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(line = line_no, error = %e, "skipping malformed command");
                summary.malformed += 1;
                continue;
            }
        };

        let name = envelope.command.name();
        match engine.execute(&envelope.actor, envelope.command) {
            Ok(_) => summary.applied += 1,
            Err(e) => {
                tracing::warn!(line = line_no, command = name, error = %e, "command rejected");
                summary.rejected += 1;
            }
        }
    }
    Ok(summary)
}

/// Writes wallet balances as CSV.
///
/// Columns: `party, balance, entries`
///
/// ```csv
/// party,balance,entries
/// 1,500.00,2
/// 2,1300.00,1
/// ```
///
/// # Errors
///
/// Returns a CSV error if writing fails.
pub fn write_wallets<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for wallet in engine.wallets() {
        wtr.serialize(wallet.as_ref())?;
    }
    wtr.flush()?;
    Ok(())
}
