use std::fmt::{Display, Formatter};
use std::num::NonZeroUsize;

use chrono::{DateTime, Utc};
use mongodb::bson::{self, Bson};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};

pub mod db;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct CampaignId(pub i64);

/// Accepts any integral number. Drivers that only know doubles store large
/// ids as `1700000000123.0`.
impl<'de> Deserialize<'de> for CampaignId {
    fn deserialize<D>(deserializer: D) -> Result<CampaignId, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct IdVisitor;

        impl<'de> Visitor<'de> for IdVisitor {
            type Value = CampaignId;

            fn expecting(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                f.write_str("an integral campaign id")
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<CampaignId, E> {
                Ok(CampaignId(value))
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<CampaignId, E> {
                i64::try_from(value)
                    .map(CampaignId)
                    .map_err(|_| E::invalid_value(de::Unexpected::Unsigned(value), &self))
            }

            fn visit_f64<E: de::Error>(self, value: f64) -> Result<CampaignId, E> {
                // 2^63 itself is out of range, hence the strict upper bound
                if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
                    Ok(CampaignId(value as i64))
                } else {
                    Err(E::invalid_value(de::Unexpected::Float(value), &self))
                }
            }
        }

        deserializer.deserialize_any(IdVisitor)
    }
}

impl Display for CampaignId {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), std::fmt::Error> {
        Display::fmt(&self.0, f)
    }
}

impl From<CampaignId> for Bson {
    fn from(id: CampaignId) -> Bson {
        Bson::Int64(id.0)
    }
}

/// The dispatch view of a campaign document written by the authoring
/// application.
///
/// Analytics fields on the same document belong to another writer and are
/// never loaded. Only `is_schedule_sent`, `in_progress` and `tempo_progress`
/// are written back, each through `$set` or `$max`.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub campaign_id: CampaignId,
    pub subject: String,
    pub from_name: String,
    pub from_email: String,
    pub html_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_list_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<bson::DateTime>,

    #[serde(default)]
    pub tempo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo_rate: Option<i64>,

    #[serde(default)]
    pub is_schedule_sent: bool,
    #[serde(default)]
    pub in_progress: bool,
    #[serde(default)]
    pub tempo_progress: u32,
}

impl Campaign {
    pub fn scheduled_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled_at.map(|at| at.to_chrono())
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.is_schedule_sent
            && !self.in_progress
            && self.scheduled_at().is_some_and(|at| at <= now)
    }

    /// The tempo batch size, if the campaign carries a usable one.
    pub fn batch_size(&self) -> Option<NonZeroUsize> {
        self.tempo_rate
            .and_then(|rate| usize::try_from(rate).ok())
            .and_then(NonZeroUsize::new)
    }
}
