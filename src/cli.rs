mod glance;
mod reset;
mod settings;
mod track;

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use reqwest::Url;

pub use self::{glance::GlanceArgs, reset::ResetArgs, track::TrackArgs};
use crate::{api::home_assistant, core::engine::Tracker, prelude::*, storage::SnapshotFile};

#[derive(Parser)]
#[command(author, version, about, propagate_version = true)]
#[must_use]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Main command: follow the meters and keep the savings accounting current.
    #[clap(name = "track")]
    Track(Box<TrackArgs>),

    /// Render the current metrics once and exit.
    #[clap(name = "glance")]
    Glance(Box<GlanceArgs>),

    /// Destructive maintenance: reset accumulator groups or re-seed from the meters.
    #[clap(name = "reset")]
    Reset(Box<ResetArgs>),
}

#[derive(Parser)]
pub struct HomeAssistantArgs {
    /// Home Assistant API access token.
    #[clap(long = "home-assistant-access-token", env = "HOME_ASSISTANT_ACCESS_TOKEN")]
    pub access_token: String,

    /// Home Assistant API base URL. For example: `http://localhost:8123/api`.
    #[clap(long = "home-assistant-api-base-url", env = "HOME_ASSISTANT_API_BASE_URL")]
    pub base_url: Url,
}

impl HomeAssistantArgs {
    pub fn connect(&self) -> Result<home_assistant::Api> {
        home_assistant::Api::new(&self.access_token, self.base_url.clone())
    }
}

#[derive(Parser)]
pub struct SnapshotArgs {
    /// File the accumulator snapshot is persisted to.
    #[clap(long = "snapshot-path", env = "SNAPSHOT_PATH", default_value = "sundial.toml")]
    pub path: PathBuf,
}

impl SnapshotArgs {
    pub fn file(self) -> SnapshotFile {
        SnapshotFile::new(self.path)
    }
}

/// Fetch the current states once and feed every monitored entity to the tracker.
///
/// Fresh baselines produce zero deltas, so this only primes the readings.
async fn feed_current_states(
    api: &home_assistant::Api,
    tracker: &mut Tracker,
    today: NaiveDate,
) -> Result {
    let monitored: Vec<String> =
        tracker.config.monitored_entities().iter().map(ToString::to_string).collect();
    for state in api.get_states().await? {
        if monitored.contains(&state.entity_id)
            && let Some(value) = state.numeric_value()
        {
            tracker.apply(&state.entity_id, value, today);
        }
    }
    tracker.commit_energy(today);
    Ok(())
}
