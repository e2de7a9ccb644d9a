use mongodb::{bson, Client, Collection, Database as MongoDb};

use crate::campaign::db::{self as campaign_db, CampaignStore};
use crate::campaign::Campaign;
use crate::error::Error;

pub type MongoCampaignStore = Collection<Campaign>;

const CAMPAIGNS: &str = "campaigns";

pub trait Database: Send + Sync {
    fn campaigns(&self) -> &dyn CampaignStore;
}

#[derive(Debug, Clone)]
pub struct MongoDatabase {
    campaigns: Collection<Campaign>,
    db: MongoDb,
}

impl MongoDatabase {
    pub fn new(db: MongoDb) -> MongoDatabase {
        MongoDatabase {
            campaigns: db.collection(CAMPAIGNS),
            db,
        }
    }

    #[tracing::instrument(skip(uri))]
    pub async fn connect(uri: &str, name: &str) -> Result<MongoDatabase, Error> {
        let db = Client::with_uri_str(uri).await?.database(name);

        // ping the database to ensure connection is established
        db.run_command(bson::doc! { "ping": 1 }, None).await?;

        MongoDatabase::initialize(db).await
    }

    pub async fn initialize(db: MongoDb) -> Result<MongoDatabase, Error> {
        let db = MongoDatabase::new(db);
        campaign_db::initialize(&db.campaigns).await?;

        Ok(db)
    }

    pub fn name(&self) -> &str {
        self.db.name()
    }
}

impl Database for MongoDatabase {
    fn campaigns(&self) -> &dyn CampaignStore {
        &self.campaigns
    }
}

#[cfg(test)]
pub mod test {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    use super::*;
    use crate::campaign::CampaignId;

    type Hook<A> = Box<dyn Fn(A) -> Result<(), Error> + Send + Sync>;

    /// Writes observed by the mock store, in the order they were applied.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum StoreWrite {
        Claim(CampaignId),
        BatchSent(CampaignId, u32),
        Complete(CampaignId),
        Release(CampaignId),
    }

    /// In-memory campaign collection with the same filter and update
    /// semantics as the mongo store. The `on_*` hooks run before a call is
    /// applied; returning an error fails the call without touching state.
    pub struct MockCampaignStore {
        pub records: Mutex<Vec<Campaign>>,
        pub writes: Mutex<Vec<StoreWrite>>,
        pub on_fetch_due_campaigns: Hook<DateTime<Utc>>,
        pub on_claim_campaign: Hook<CampaignId>,
        pub on_record_batch_sent: Hook<(CampaignId, u32)>,
        pub on_complete_campaign: Hook<CampaignId>,
        pub on_release_campaign: Hook<CampaignId>,
    }

    impl MockCampaignStore {
        pub fn new() -> MockCampaignStore {
            MockCampaignStore {
                records: Mutex::new(vec![]),
                writes: Mutex::new(vec![]),
                on_fetch_due_campaigns: Box::new(|_| Ok(())),
                on_claim_campaign: Box::new(|_| Ok(())),
                on_record_batch_sent: Box::new(|_| Ok(())),
                on_complete_campaign: Box::new(|_| Ok(())),
                on_release_campaign: Box::new(|_| Ok(())),
            }
        }

        pub fn insert(&self, campaign: Campaign) {
            self.records.lock().unwrap().push(campaign);
        }

        pub fn get(&self, campaign_id: CampaignId) -> Campaign {
            self.records
                .lock()
                .unwrap()
                .iter()
                .find(|c| c.campaign_id == campaign_id)
                .cloned()
                .expect("campaign not in mock store")
        }

        pub fn writes(&self) -> Vec<StoreWrite> {
            self.writes.lock().unwrap().clone()
        }

        fn update<F>(&self, campaign_id: CampaignId, write: StoreWrite, f: F) -> bool
        where
            F: FnOnce(&mut Campaign) -> bool,
        {
            let mut records = self.records.lock().unwrap();
            let matched = match records.iter_mut().find(|c| c.campaign_id == campaign_id) {
                Some(campaign) => {
                    let matched = f(campaign);
                    assert!(
                        !(campaign.is_schedule_sent && campaign.in_progress),
                        "campaign {} observed sent while still in progress",
                        campaign_id
                    );
                    matched
                }
                None => false,
            };
            if matched {
                self.writes.lock().unwrap().push(write);
            }
            matched
        }
    }

    #[async_trait]
    impl CampaignStore for MockCampaignStore {
        async fn fetch_due_campaigns(&self, now: DateTime<Utc>) -> Result<Vec<Campaign>, Error> {
            (self.on_fetch_due_campaigns)(now)?;

            let mut campaigns: Vec<Campaign> = self
                .records
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.is_due(now))
                .cloned()
                .collect();
            campaigns.sort_by_key(|c| c.campaign_id);

            Ok(campaigns)
        }

        async fn claim_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            (self.on_claim_campaign)(campaign_id)?;

            let claimed = self.update(campaign_id, StoreWrite::Claim(campaign_id), |c| {
                if c.in_progress || c.is_schedule_sent {
                    return false;
                }
                c.in_progress = true;
                true
            });

            if !claimed {
                return Err(Error::CampaignAlreadyClaimed { campaign_id });
            }

            Ok(())
        }

        async fn record_batch_sent(
            &self,
            campaign_id: CampaignId,
            batches_sent: u32,
        ) -> Result<(), Error> {
            (self.on_record_batch_sent)((campaign_id, batches_sent))?;

            let write = StoreWrite::BatchSent(campaign_id, batches_sent);
            let matched = self.update(campaign_id, write, |c| {
                if !c.in_progress {
                    return false;
                }
                c.tempo_progress = c.tempo_progress.max(batches_sent);
                true
            });

            if !matched {
                return Err(Error::CampaignNotClaimed { campaign_id });
            }

            Ok(())
        }

        async fn complete_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            (self.on_complete_campaign)(campaign_id)?;

            let matched = self.update(campaign_id, StoreWrite::Complete(campaign_id), |c| {
                if !c.in_progress {
                    return false;
                }
                c.in_progress = false;
                c.is_schedule_sent = true;
                true
            });

            if !matched {
                return Err(Error::CampaignNotClaimed { campaign_id });
            }

            Ok(())
        }

        async fn release_campaign(&self, campaign_id: CampaignId) -> Result<(), Error> {
            (self.on_release_campaign)(campaign_id)?;

            self.update(campaign_id, StoreWrite::Release(campaign_id), |c| {
                c.in_progress = false;
                true
            });

            Ok(())
        }

        async fn release_stale_claims(&self) -> Result<u64, Error> {
            let mut released = 0;
            for campaign in self.records.lock().unwrap().iter_mut() {
                if campaign.in_progress && !campaign.is_schedule_sent {
                    campaign.in_progress = false;
                    released += 1;
                }
            }

            Ok(released)
        }
    }

    pub struct MockDatabase {
        pub campaigns: MockCampaignStore,
    }

    impl MockDatabase {
        pub fn new() -> MockDatabase {
            MockDatabase {
                campaigns: MockCampaignStore::new(),
            }
        }
    }

    impl Database for MockDatabase {
        fn campaigns(&self) -> &dyn CampaignStore {
            &self.campaigns
        }
    }
}
