use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::campaign::{Campaign, CampaignId};
use crate::database::Database;
use crate::error::Error;
use crate::mailer::{Mailer, Message, Recipients};

use super::planner::{plan_batches, total_batches};

#[derive(Clone, Debug)]
pub struct DispatchOptions {
    /// Wait between two batches of the same tempo campaign.
    pub pacing_interval: Duration,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TickReport {
    pub due: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub interrupted: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CampaignOutcome {
    Completed,
    Failed,
    Skipped,
    Interrupted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    Completed { batches: usize },
    Interrupted { batches_sent: usize },
}

/// One discovery-and-dispatch cycle. Due campaigns are handled one after
/// another; a failure in one never stops the others.
#[tracing::instrument(skip(db, mailer, options, shutdown))]
pub async fn run_tick(
    db: &dyn Database,
    mailer: &dyn Mailer,
    options: &DispatchOptions,
    now: DateTime<Utc>,
    shutdown: &CancellationToken,
) -> TickReport {
    let mut report = TickReport::default();

    let campaigns = match db.campaigns().fetch_due_campaigns(now).await {
        Ok(campaigns) => campaigns,
        Err(err) => {
            error!(code = err.error_code(), %err, "failed to fetch due campaigns");
            return report;
        }
    };

    report.due = campaigns.len();
    if campaigns.is_empty() {
        debug!("no campaigns due");
        return report;
    }

    for campaign in &campaigns {
        if shutdown.is_cancelled() {
            break;
        }

        match process_campaign(db, mailer, options, campaign, shutdown).await {
            CampaignOutcome::Completed => report.completed += 1,
            CampaignOutcome::Failed => report.failed += 1,
            CampaignOutcome::Skipped => report.skipped += 1,
            CampaignOutcome::Interrupted => report.interrupted += 1,
        }
    }

    info!(
        due = report.due,
        completed = report.completed,
        failed = report.failed,
        skipped = report.skipped,
        interrupted = report.interrupted,
        "tick finished"
    );

    report
}

/// Claims a campaign, sends what is left of it and gives the claim back.
#[tracing::instrument(
    skip(db, mailer, options, campaign, shutdown),
    fields(campaign_id = %campaign.campaign_id)
)]
pub async fn process_campaign(
    db: &dyn Database,
    mailer: &dyn Mailer,
    options: &DispatchOptions,
    campaign: &Campaign,
    shutdown: &CancellationToken,
) -> CampaignOutcome {
    let campaign_id = campaign.campaign_id;

    match db.campaigns().claim_campaign(campaign_id).await {
        Ok(()) => {}
        Err(Error::CampaignAlreadyClaimed { .. }) => {
            debug!("campaign claimed elsewhere, skipping");
            return CampaignOutcome::Skipped;
        }
        Err(err) => {
            error!(code = err.error_code(), %err, "failed to claim campaign");
            return CampaignOutcome::Failed;
        }
    }

    let attempt = dispatch_campaign(db, mailer, options, campaign, shutdown).await;

    match attempt {
        Ok(Attempt::Completed { batches }) => {
            match db.campaigns().complete_campaign(campaign_id).await {
                Ok(()) => {
                    info!(batches, "campaign sent");
                    CampaignOutcome::Completed
                }
                Err(err) => {
                    error!(
                        code = err.error_code(),
                        %err,
                        "campaign delivered but not marked sent; it will be sent again"
                    );
                    release(db, campaign_id).await;
                    CampaignOutcome::Failed
                }
            }
        }
        Ok(Attempt::Interrupted { batches_sent }) => {
            warn!(batches_sent, "dispatch stopped for shutdown, progress kept");
            release(db, campaign_id).await;
            CampaignOutcome::Interrupted
        }
        Err(err) => {
            match &err {
                Error::CheckpointNotPersisted { batch_index, .. } => error!(
                    code = err.error_code(),
                    batch_index,
                    %err,
                    "batch delivered but checkpoint lost; it will be sent again"
                ),
                Error::RecipientListEmpty { .. }
                | Error::MissingRecipientList { .. }
                | Error::InvalidTempoRate { .. } => {
                    warn!(code = err.error_code(), %err, "campaign cannot be sent yet")
                }
                _ => error!(code = err.error_code(), %err, "campaign dispatch failed"),
            }
            release(db, campaign_id).await;
            CampaignOutcome::Failed
        }
    }
}

async fn release(db: &dyn Database, campaign_id: CampaignId) {
    if let Err(err) = db.campaigns().release_campaign(campaign_id).await {
        error!(
            code = err.error_code(),
            %err,
            "failed to release campaign; it stays claimed until the dispatcher restarts"
        );
    }
}

async fn dispatch_campaign(
    db: &dyn Database,
    mailer: &dyn Mailer,
    options: &DispatchOptions,
    campaign: &Campaign,
    shutdown: &CancellationToken,
) -> Result<Attempt, Error> {
    let campaign_id = campaign.campaign_id;
    let message = Message::from_campaign(campaign);
    let list_id = campaign
        .recipient_list_id
        .as_deref()
        .ok_or(Error::MissingRecipientList { campaign_id })?;

    if !campaign.tempo {
        // the provider expands the list, so the whole send is one call
        mailer
            .transmissions()
            .send(&message, Recipients::List(list_id), campaign_id)
            .await?;

        return Ok(Attempt::Completed { batches: 1 });
    }

    let batch_size = campaign.batch_size().ok_or(Error::InvalidTempoRate {
        campaign_id,
        tempo_rate: campaign.tempo_rate,
    })?;

    let recipients = mailer.recipients().resolve(list_id).await?;
    if recipients.is_empty() {
        return Err(Error::RecipientListEmpty {
            list_id: list_id.to_string(),
        });
    }

    let total = total_batches(recipients.len(), batch_size);
    let resume_from = campaign.tempo_progress as usize;
    let batches = plan_batches(&recipients, batch_size, resume_from);

    if resume_from > 0 {
        info!(resume_from, total, "resuming campaign from checkpoint");
    }

    for batch in batches {
        mailer
            .transmissions()
            .send(&message, Recipients::Addresses(batch.recipients), campaign_id)
            .await?;

        let batches_sent = batch.index + 1;
        db.campaigns()
            .record_batch_sent(campaign_id, batches_sent as u32)
            .await
            .map_err(|source| Error::CheckpointNotPersisted {
                campaign_id,
                batch_index: batch.index,
                source: Box::new(source),
            })?;

        info!(
            batch = batch.index,
            total,
            recipients = batch.recipients.len(),
            "batch sent"
        );

        if batches_sent < total {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    return Ok(Attempt::Interrupted { batches_sent });
                }
                _ = tokio::time::sleep(options.pacing_interval) => {}
            }
        }
    }

    Ok(Attempt::Completed { batches: total })
}
