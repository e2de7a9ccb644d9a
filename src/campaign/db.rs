use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{self, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::IndexModel;
use tracing::warn;

use crate::database::MongoCampaignStore;
use crate::error::Error;

use super::{Campaign, CampaignId};

/// Persistence of campaign dispatch state.
///
/// Every method is a single acknowledged write or query; nothing is
/// buffered, so a successful return means the change is durable.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn fetch_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error>;

    /// Sets `inProgress` only if the campaign is neither claimed nor sent.
    async fn claim_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;

    /// Raises the checkpoint to `batches_sent`; never lowers it.
    async fn record_batch_sent(
        &self,
        campaign_id: CampaignId,
        batches_sent: u32,
    ) -> Result<(), Error>;

    /// Marks the campaign sent and releases the claim in the same write.
    async fn complete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;

    async fn release_campaign(&self, campaign_id: CampaignId) -> Result<(), Error>;

    /// Releases claims left behind by a dispatcher that stopped mid-send.
    async fn release_stale_claims(&self) -> Result<u64, Error>;
}

pub async fn initialize(store: &MongoCampaignStore) -> Result<(), Error> {
    let indexes = vec![
        IndexModel::builder()
            .keys(bson::doc! { "campaignId": 1 })
            .options(
                IndexOptions::builder()
                    .name("by_campaign_id".to_string())
                    .unique(true)
                    .build(),
            )
            .build(),
        IndexModel::builder()
            .keys(bson::doc! { "isScheduleSent": 1, "inProgress": 1, "scheduledAt": 1 })
            .options(
                IndexOptions::builder()
                    .name("by_dispatch_state".to_string())
                    .build(),
            )
            .build(),
    ];

    store.create_indexes(indexes, None).await?;

    Ok(())
}

/// Fields read by dispatch; analytics on the same document are left out.
fn dispatch_projection() -> Document {
    bson::doc! {
        "_id": 0,
        "campaignId": 1,
        "subject": 1,
        "fromName": 1,
        "fromEmail": 1,
        "htmlContent": 1,
        "templateId": 1,
        "recipientListId": 1,
        "scheduledAt": 1,
        "tempo": 1,
        "tempoRate": 1,
        "isScheduleSent": 1,
        "inProgress": 1,
        "tempoProgress": 1,
    }
}

/// Decodes each due document on its own so a malformed record is skipped
/// instead of failing discovery for every campaign.
fn decode_due_campaigns(documents: Vec<Document>) -> Vec<Campaign> {
    documents
        .into_iter()
        .filter_map(|document| {
            let campaign_id = document.get("campaignId").cloned();
            match bson::from_document::<Campaign>(document) {
                Ok(campaign) => Some(campaign),
                Err(err) => {
                    warn!(?campaign_id, %err, "skipping campaign record that does not decode");
                    None
                }
            }
        })
        .collect()
}

#[async_trait]
impl CampaignStore for MongoCampaignStore {
    #[tracing::instrument(skip(self))]
    async fn fetch_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
        let options = FindOptions::builder()
            .sort(bson::doc! { "campaignId": 1 })
            .projection(dispatch_projection())
            .build();

        let documents: Vec<Document> = self
            .clone_with_type::<Document>()
            .find(
                bson::doc! {
                    "scheduledAt": { "$lte": bson::DateTime::from_chrono(now) },
                    "isScheduleSent": { "$ne": true },
                    "inProgress": { "$ne": true },
                },
                options,
            )
            .await?
            .try_collect()
            .await?;

        Ok(decode_due_campaigns(documents))
    }

    #[tracing::instrument(skip(self))]
    async fn claim_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        let result = self
            .update_one(
                bson::doc! {
                    "campaignId": campaign_id,
                    "isScheduleSent": { "$ne": true },
                    "inProgress": { "$ne": true },
                },
                bson::doc! { "$set": { "inProgress": true } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::CampaignAlreadyClaimed { campaign_id });
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn record_batch_sent(
        &self,
        campaign_id: CampaignId,
        batches_sent: u32,
    ) -> Result<(), Error> {
        let batches_sent = bson::to_bson(&batches_sent)?;

        let result = self
            .update_one(
                bson::doc! { "campaignId": campaign_id, "inProgress": true },
                bson::doc! { "$max": { "tempoProgress": batches_sent } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::CampaignNotClaimed { campaign_id });
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn complete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        let result = self
            .update_one(
                bson::doc! { "campaignId": campaign_id, "inProgress": true },
                bson::doc! { "$set": { "isScheduleSent": true, "inProgress": false } },
                None,
            )
            .await?;

        if result.matched_count == 0 {
            return Err(Error::CampaignNotClaimed { campaign_id });
        }

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn release_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
        self.update_one(
            bson::doc! { "campaignId": campaign_id },
            bson::doc! { "$set": { "inProgress": false } },
            None,
        )
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn release_stale_claims(&self) -> Result<u64, Error> {
        let result = self
            .update_many(
                bson::doc! { "inProgress": true, "isScheduleSent": { "$ne": true } },
                bson::doc! { "$set": { "inProgress": false } },
                None,
            )
            .await?;

        Ok(result.modified_count)
    }
}
