// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! texshare CLI
//!
//! Launches the producer or consumer side of a shared texture, or runs both
//! in one process over the loopback model.

use anyhow::Result;
use clap::{Parser, Subcommand};
use texshare::ShareError;

mod commands;

use commands::consume::ConsumeArgs;
use commands::demo::DemoArgs;
use commands::produce::ProduceArgs;

#[derive(Parser)]
#[command(name = "texshare")]
#[command(author, version, about = "Cross-process shared GPU texture launcher", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Allocate the shared texture, launch the consumer and write frames
    Produce(ProduceArgs),

    /// Connect to a producer, import its texture and read frames
    Consume(ConsumeArgs),

    /// Run producer and consumer in this process over the loopback model
    Demo(DemoArgs),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".parse().unwrap()),
        )
        .init();

    let result = match cli.command {
        Some(Commands::Produce(args)) => commands::produce::run(args),
        Some(Commands::Consume(args)) => commands::consume::run(args),
        Some(Commands::Demo(args)) => commands::demo::run(args),
        None => {
            // No subcommand: show help
            Cli::parse_from(["texshare", "--help"]);
            Ok(())
        }
    };

    if let Err(e) = &result {
        match e.downcast_ref::<ShareError>() {
            Some(fault) => tracing::error!("{:?} fault: {:#}", fault.fault_class(), e),
            None => tracing::error!("{:#}", e),
        }
    }
    result
}
