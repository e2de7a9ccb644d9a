use std::fmt::{Debug, Display};
use std::io::Error as IoError;

use derivative::Derivative;
use figment::Error as ConfigError;
use mongodb::bson::ser::Error as BsonError;
use mongodb::error::Error as DatabaseError;
use reqwest::header::InvalidHeaderValue;
use reqwest::Error as HttpError;

use crate::campaign::CampaignId;

#[derive(Debug, Derivative)]
#[derivative(PartialEq, Eq)]
pub enum Error {
    // campaign record
    CampaignAlreadyClaimed {
        campaign_id: CampaignId,
    },
    CampaignNotClaimed {
        campaign_id: CampaignId,
    },
    MissingRecipientList {
        campaign_id: CampaignId,
    },
    InvalidTempoRate {
        campaign_id: CampaignId,
        tempo_rate: Option<i64>,
    },
    CheckpointNotPersisted {
        campaign_id: CampaignId,
        batch_index: usize,
        source: Box<Error>,
    },

    // provider
    RecipientListEmpty {
        list_id: String,
    },
    ProviderRejected {
        status: u16,
        message: String,
    },

    // process
    InvalidBaseUrl {
        base_url: String,
    },
    InvalidConfig(#[derivative(PartialEq = "ignore")] Box<ConfigError>),
    InvalidHeader(#[derivative(PartialEq = "ignore")] InvalidHeaderValue),
    FailedDatabaseCall(#[derivative(PartialEq = "ignore")] DatabaseError),
    FailedToSerializeToBson(#[derivative(PartialEq = "ignore")] BsonError),
    FailedHttpCall(#[derivative(PartialEq = "ignore")] HttpError),
    IoError(#[derivative(PartialEq = "ignore")] IoError),
}

impl Error {
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::CampaignAlreadyClaimed { .. } => "E1001",
            Error::CampaignNotClaimed { .. } => "E1002",
            Error::MissingRecipientList { .. } => "E1003",
            Error::InvalidTempoRate { .. } => "E1004",
            Error::CheckpointNotPersisted { .. } => "E1005",
            Error::RecipientListEmpty { .. } => "E2001",
            Error::ProviderRejected { .. } => "E2002",
            Error::InvalidBaseUrl { .. } => "E3007",
            Error::InvalidConfig(_) => "E3001",
            Error::InvalidHeader(_) => "E3002",
            Error::FailedDatabaseCall(_) => "E3003",
            Error::FailedToSerializeToBson(_) => "E3004",
            Error::FailedHttpCall(_) => "E3005",
            Error::IoError(_) => "E3006",
        }
    }

    pub fn error_message(&self) -> &'static str {
        match self {
            Error::CampaignAlreadyClaimed { .. } => "The campaign is already claimed by a dispatch",
            Error::CampaignNotClaimed { .. } => "The campaign is not claimed by this dispatch",
            Error::MissingRecipientList { .. } => "The campaign has no recipient list",
            Error::InvalidTempoRate { .. } => {
                "The campaign uses tempo but has no positive tempo rate"
            }
            Error::CheckpointNotPersisted { .. } => {
                "A batch was delivered but its checkpoint was not saved; it will be sent again"
            }
            Error::RecipientListEmpty { .. } => "The recipient list resolved to no recipients",
            Error::ProviderRejected { .. } => "The provider rejected the request",
            Error::InvalidBaseUrl { .. } => "The provider base url is not an absolute url",
            Error::InvalidConfig(_) => "The configuration could not be loaded",
            Error::InvalidHeader(_) => "A provider credential is not a valid header value",
            Error::FailedDatabaseCall(_) => {
                "An error occurred when communicating with the database"
            }
            Error::FailedToSerializeToBson(_) => {
                "An error occurred when serializing an object to bson"
            }
            Error::FailedHttpCall(_) => "An error occurred when communicating with the provider",
            Error::IoError(_) => "An error occurred during an I/O operation",
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> Result<(), std::fmt::Error> {
        write!(f, "{} {}: ", self.error_code(), self.error_message())?;
        Debug::fmt(self, f)
    }
}

impl From<DatabaseError> for Error {
    fn from(error: DatabaseError) -> Error {
        Error::FailedDatabaseCall(error)
    }
}

impl From<BsonError> for Error {
    fn from(error: BsonError) -> Error {
        Error::FailedToSerializeToBson(error)
    }
}

impl From<HttpError> for Error {
    fn from(error: HttpError) -> Error {
        Error::FailedHttpCall(error)
    }
}

impl From<InvalidHeaderValue> for Error {
    fn from(error: InvalidHeaderValue) -> Error {
        Error::InvalidHeader(error)
    }
}

impl From<ConfigError> for Error {
    fn from(error: ConfigError) -> Error {
        Error::InvalidConfig(Box::new(error))
    }
}

impl From<IoError> for Error {
    fn from(error: IoError) -> Error {
        Error::IoError(error)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::CheckpointNotPersisted { source, .. } => Some(source.as_ref()),
            Error::InvalidConfig(err) => Some(err.as_ref()),
            Error::InvalidHeader(err) => Some(err),
            Error::FailedDatabaseCall(err) => Some(err),
            Error::FailedToSerializeToBson(err) => Some(err),
            Error::FailedHttpCall(err) => Some(err),
            Error::IoError(err) => Some(err),
            _ => None,
        }
    }
}
