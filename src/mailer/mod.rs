use async_trait::async_trait;

use crate::campaign::{Campaign, CampaignId};
use crate::error::Error;

pub mod sparkpost;


pub use sparkpost::SparkPostClient;

/// Sender identity and content of a campaign, fixed for a dispatch attempt.
///
/// Always the authored inline content; a campaign's `template_id` is not
/// used for delivery.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub from_name: String,
    pub from_email: String,
    pub subject: String,
    pub html: String,
}

impl Message {
    pub fn from_campaign(campaign: &Campaign) -> Message {
        Message {
            from_name: campaign.from_name.clone(),
            from_email: campaign.from_email.clone(),
            subject: campaign.subject.clone(),
            html: campaign.html_content.clone(),
        }
    }
}

/// Who a single transmission is addressed to.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Recipients<'a> {
    /// A stored recipient list, expanded by the provider.
    List(&'a str),
    /// Explicit addresses, as produced by a tempo batch.
    Addresses(&'a [String]),
}

impl Recipients<'_> {
    pub fn describe(&self) -> String {
        match self {
            Recipients::List(list_id) => format!("list {}", list_id),
            Recipients::Addresses(addresses) => format!("{} addresses", addresses.len()),
        }
    }
}

#[async_trait]
pub trait RecipientResolver: Send + Sync {
    /// Expands a stored list into its addresses, in list order.
    async fn resolve(&self, list_id: &str) -> Result<Vec<String>, Error>;
}

#[async_trait]
pub trait TransmissionClient: Send + Sync {
    /// One outbound delivery call. Success means the provider accepted it.
    async fn send(
        &self,
        message: &Message,
        recipients: Recipients<'_>,
        campaign_id: CampaignId,
    ) -> Result<(), Error>;
}

pub trait Mailer: Send + Sync {
    fn recipients(&self) -> &dyn RecipientResolver;
    fn transmissions(&self) -> &dyn TransmissionClient;
}
