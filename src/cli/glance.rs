use chrono::Local;
use clap::Parser;
use itertools::Itertools;

use crate::{
    cli::{HomeAssistantArgs, SnapshotArgs, feed_current_states, settings::SettingsArgs},
    core::{engine::Tracker, snapshot},
    prelude::*,
    tables::{build_section_table, section_title},
};

#[derive(Parser)]
pub struct GlanceArgs {
    #[clap(flatten)]
    home_assistant: HomeAssistantArgs,

    #[clap(flatten)]
    settings: SettingsArgs,

    #[clap(flatten)]
    snapshot: SnapshotArgs,
}

impl GlanceArgs {
    pub async fn run(self) -> Result {
        let api = self.home_assistant.connect()?;
        let mut tracker = Tracker::new(self.settings.into_config());
        let today = Local::now().date_naive();

        if let Some(document) = self.snapshot.file().read() {
            snapshot::restore(&mut tracker, &document, today);
        } else {
            warn!("no snapshot found, the lifetime figures start from zero");
        }
        feed_current_states(&api, &mut tracker, today).await?;

        let rows = tracker.metrics(today).rows();
        for (section, rows) in &rows.iter().chunk_by(|row| row.section) {
            println!("{}", section_title(section));
            println!("{}", build_section_table(rows));
        }
        Ok(())
    }
}
