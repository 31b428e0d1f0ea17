//! CLI args and subcommands.

use anyhow::Context;
use argh::FromArgs;
use common::enums::BatchSchedule;
use common::time::TimestampMs;

use crate::config::NodeConfig;

/// Digital micro-insurance back end for bodaboda riders.
#[derive(Debug, FromArgs)]
pub struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
enum Command {
    Run(RunArgs),
    Batch(BatchArgs),
}

/// Run the service workers until shutdown.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "run")]
pub struct RunArgs {}

/// Trigger one issuance batch immediately, then exit.
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "batch")]
pub struct BatchArgs {
    /// which run to trigger: batch_1, batch_2, batch_3, or manual
    #[argh(option, default = "BatchSchedule::Manual")]
    pub schedule: BatchSchedule,
}

impl Args {
    pub fn run(self) -> anyhow::Result<()> {
        let config = NodeConfig::from_env()?;
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("Failed to build tokio runtime")?;

        match self.command {
            Command::Run(_) => runtime.block_on(crate::run::run(config)),
            Command::Batch(args) => runtime.block_on(async move {
                let context = crate::context::NodeContext::init(config)?;
                let now = TimestampMs::now();
                let (batch, events) = context
                    .batch_processor
                    .process_batch(args.schedule, now)?;
                context.dispatcher.dispatch(events).await;
                tracing::info!(
                    batch_number = %batch.batch_number,
                    issued = batch.issued_count,
                    failed = batch.failed_count,
                    "manual batch complete",
                );
                Ok(())
            }),
        }
    }
}
