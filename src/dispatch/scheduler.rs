use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::database::Database;
use crate::error::Error;
use crate::mailer::Mailer;

use super::manager::{run_tick, DispatchOptions};

/// Drives [`run_tick`] on a fixed period.
///
/// Ticks never overlap: the next one starts only after the previous one
/// returned, and periods missed while a long tempo send was pacing are
/// dropped rather than replayed.
pub struct Scheduler {
    db: Arc<dyn Database>,
    mailer: Arc<dyn Mailer>,
    tick_interval: Duration,
    options: DispatchOptions,
}

impl Scheduler {
    pub fn new(
        db: Arc<dyn Database>,
        mailer: Arc<dyn Mailer>,
        tick_interval: Duration,
        options: DispatchOptions,
    ) -> Scheduler {
        Scheduler {
            db,
            mailer,
            tick_interval,
            options,
        }
    }

    /// Runs until `shutdown` is cancelled. A campaign being paced when that
    /// happens stops at its checkpoint and is released before this returns.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), Error> {
        // only one dispatcher runs, so every claim found at start-up is stale
        let released = self.db.campaigns().release_stale_claims().await?;
        if released > 0 {
            warn!(released, "released campaigns left claimed by a previous run");
        }

        info!(
            tick_interval = ?self.tick_interval,
            pacing_interval = ?self.options.pacing_interval,
            "scheduler started"
        );

        let mut interval = time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            run_tick(
                self.db.as_ref(),
                self.mailer.as_ref(),
                &self.options,
                Utc::now(),
                &shutdown,
            )
            .await;
        }

        info!("scheduler stopped");

        Ok(())
    }
}
