use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use bon::Builder;
use chrono::Local;
use clap::Parser;
use tokio::time::{MissedTickBehavior, interval};

use crate::{
    api::{heartbeat::HeartbeatArgs, home_assistant},
    cli::{HomeAssistantArgs, SnapshotArgs, settings::SettingsArgs},
    core::{engine::Tracker, snapshot, snapshot::Snapshot},
    prelude::*,
    quantity::energy::KilowattHours,
    storage::SnapshotFile,
};

#[derive(Parser)]
pub struct TrackArgs {
    #[clap(flatten)]
    home_assistant: HomeAssistantArgs,

    #[clap(flatten)]
    settings: SettingsArgs,

    #[clap(flatten)]
    snapshot: SnapshotArgs,

    #[clap(long = "poll-interval", env = "POLL_INTERVAL", default_value = "30s")]
    poll_interval: humantime::Duration,

    #[clap(long = "save-interval", env = "SAVE_INTERVAL", default_value = "5min")]
    save_interval: humantime::Duration,

    /// Grace period before the accumulators are seeded from the raw totals when no
    /// snapshot could be restored.
    #[clap(long = "bootstrap-grace", env = "BOOTSTRAP_GRACE", default_value = "1min")]
    bootstrap_grace: humantime::Duration,

    /// Entity id prefix for the published metric states.
    #[clap(long = "publish-prefix", env = "PUBLISH_PREFIX", default_value = "sensor.sundial_")]
    publish_prefix: String,

    /// Do not publish metric states back to Home Assistant.
    #[clap(long = "no-publish")]
    no_publish: bool,

    /// Event type for milestone, quota and summary events.
    #[clap(long = "event-type", env = "EVENT_TYPE", default_value = "sundial_event")]
    event_type: String,

    #[clap(flatten)]
    heartbeat: HeartbeatArgs,
}

impl TrackArgs {
    pub async fn run(self) -> Result {
        let api = self.home_assistant.connect()?;
        let snapshot_file = self.snapshot.file();
        let mut tracker = Tracker::new(self.settings.into_config());

        if let Some(document) = snapshot_file.read() {
            snapshot::restore(&mut tracker, &document, Local::now().date_naive());
        }

        TrackLoop::builder()
            .api(api)
            .snapshot_file(snapshot_file)
            .tracker(tracker)
            .poll_interval(self.poll_interval)
            .save_interval(self.save_interval)
            .bootstrap_grace(self.bootstrap_grace)
            .maybe_publish_prefix((!self.no_publish).then_some(self.publish_prefix))
            .event_type(self.event_type)
            .heartbeat(self.heartbeat)
            .build()
            .run()
            .await
    }
}

#[derive(Builder)]
struct TrackLoop {
    api: home_assistant::Api,
    snapshot_file: SnapshotFile,
    tracker: Tracker,
    publish_prefix: Option<String>,
    event_type: String,
    heartbeat: HeartbeatArgs,

    #[builder(into)]
    poll_interval: Duration,

    #[builder(into)]
    save_interval: Duration,

    #[builder(into)]
    bootstrap_grace: Duration,
}

impl TrackLoop {
    /// Serial processing: one batch of changes is accounted to completion before
    /// the next poll, so no locking is needed anywhere in the tracker.
    async fn run(mut self) -> Result {
        let should_terminate = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&should_terminate))?;
        signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&should_terminate))?;

        let monitored: Vec<String> =
            self.tracker.config.monitored_entities().iter().map(ToString::to_string).collect();
        info!(n_entities = monitored.len(), "watching");

        let mut interval = interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let started_at = Instant::now();
        let mut bootstrap_checked = false;
        let mut last_saved_at = Instant::now();
        let mut published_revision = None;

        while !should_terminate.load(Ordering::Relaxed) {
            interval.tick().await;
            let today = Local::now().date_naive();

            match self.api.get_states().await {
                Ok(states) => {
                    for state in states {
                        let Some(value) = state.numeric_value() else { continue };
                        if !monitored.contains(&state.entity_id) {
                            continue;
                        }
                        // Unchanged values are not state changes.
                        if self.tracker.state.readings.value(&state.entity_id) == Some(value) {
                            continue;
                        }
                        self.tracker.apply(&state.entity_id, value, today);
                    }
                    self.tracker.commit_energy(today);
                    self.tracker.capture_quota_start_meter(today);
                }
                Err(error) => warn!("failed to fetch the states: {error:#}"),
            }

            if !bootstrap_checked && started_at.elapsed() >= self.bootstrap_grace {
                bootstrap_checked = true;
                if !self.tracker.state.restored
                    && self.tracker.state.acc.lifetime.self_consumption == KilowattHours::ZERO
                {
                    info!("nothing restored, seeding from the current totals");
                    self.tracker.bootstrap_from_totals(today);
                }
            }

            self.deliver_events().await;

            if published_revision != Some(self.tracker.state.revision) {
                self.publish_metrics(today).await;
                published_revision = Some(self.tracker.state.revision);
            }

            if self.tracker.is_dirty() && last_saved_at.elapsed() >= self.save_interval {
                self.save_snapshot();
                last_saved_at = Instant::now();
            }

            self.heartbeat.send().await;
        }

        info!("shutting down…");
        if self.tracker.is_dirty() {
            self.save_snapshot();
        }
        Ok(())
    }

    /// Queued notifications are delivered after the update committed; a failed
    /// delivery is logged and dropped, never retried.
    async fn deliver_events(&mut self) {
        for notification in self.tracker.take_events() {
            info!(event_type = notification.event_type(), "{}", notification.message());
            if let Err(error) =
                self.api.fire_event(&self.event_type, &notification.payload()).await
            {
                warn!("failed to fire the event: {error:#}");
            }
        }
    }

    async fn publish_metrics(&self, today: chrono::NaiveDate) {
        let Some(prefix) = &self.publish_prefix else { return };
        for row in self.tracker.metrics(today).rows() {
            let entity_id = format!("{prefix}{}", row.key);
            let state = row.value.as_deref().unwrap_or("unknown");
            let attributes = serde_json::json!({
                "friendly_name": row.label,
                "unit_of_measurement": row.unit,
            });
            if let Err(error) = self.api.publish_state(&entity_id, state, &attributes).await {
                warn!("failed to publish `{entity_id}`: {error:#}");
            }
        }
    }

    fn save_snapshot(&mut self) {
        match Snapshot::capture(&self.tracker).to_toml() {
            Ok(document) => {
                self.snapshot_file.write(&document);
                self.tracker.mark_clean();
            }
            Err(error) => error!("failed to capture the snapshot: {error:#}"),
        }
    }
}
