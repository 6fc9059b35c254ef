use chrono::Local;
use clap::{Parser, Subcommand};

use crate::{
    cli::{HomeAssistantArgs, SnapshotArgs, feed_current_states, settings::SettingsArgs},
    core::{engine::Tracker, snapshot, snapshot::Snapshot},
    prelude::*,
};

#[derive(Parser)]
pub struct ResetArgs {
    #[clap(flatten)]
    home_assistant: HomeAssistantArgs,

    #[clap(flatten)]
    settings: SettingsArgs,

    #[clap(flatten)]
    snapshot: SnapshotArgs,

    #[command(subcommand)]
    command: ResetCommand,
}

#[derive(Subcommand)]
pub enum ResetCommand {
    /// Zero the grid import tracking and re-arm the quota warnings.
    GridImport,

    /// Zero the benchmark and heat pump tracking.
    Benchmark,

    /// Zero the per-string production counters and power peaks.
    Strings,

    /// Discard the lifetime accumulators and seed them afresh from the meters.
    Bootstrap,
}

impl ResetArgs {
    pub async fn run(self) -> Result {
        let api = self.home_assistant.connect()?;
        let mut tracker = Tracker::new(self.settings.into_config());
        let today = Local::now().date_naive();
        let snapshot_file = self.snapshot.file();

        if let Some(document) = snapshot_file.read() {
            snapshot::restore(&mut tracker, &document, today);
        }
        feed_current_states(&api, &mut tracker, today).await?;

        match self.command {
            ResetCommand::GridImport => tracker.reset_grid_import(today),
            ResetCommand::Benchmark => tracker.reset_benchmark(today),
            ResetCommand::Strings => tracker.reset_strings(today),
            ResetCommand::Bootstrap => {
                ensure!(
                    tracker.rebootstrap(today),
                    "no production total available to seed from",
                );
            }
        }

        snapshot_file.write(&Snapshot::capture(&tracker).to_toml()?);
        info!("reset done");
        Ok(())
    }
}
