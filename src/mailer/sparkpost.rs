//! SparkPost adapter for the recipient and transmission interfaces.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Response, Url};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::campaign::CampaignId;
use crate::error::Error;

use super::{Mailer, Message, RecipientResolver, Recipients, TransmissionClient};

pub const DEFAULT_BASE_URL: &str = "https://api.sparkpost.com/api/v1";

#[derive(Debug, Clone)]
pub struct SparkPostClient {
    client: reqwest::Client,
    base_url: Url,
}

impl SparkPostClient {
    pub fn new(
        api_key: &SecretString,
        base_url: &str,
        timeout: Duration,
    ) -> Result<SparkPostClient, Error> {
        let invalid_base_url = || Error::InvalidBaseUrl {
            base_url: base_url.to_string(),
        };
        let parsed = Url::parse(base_url).map_err(|_| invalid_base_url())?;
        if parsed.cannot_be_a_base() {
            return Err(invalid_base_url());
        }

        let mut key = HeaderValue::from_str(api_key.expose_secret())?;
        key.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, key);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(SparkPostClient {
            client,
            base_url: parsed,
        })
    }

    /// Appends `segments` to the base path, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, Error> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| Error::InvalidBaseUrl {
                base_url: self.base_url.to_string(),
            })?
            .pop_if_empty()
            .extend(segments);

        Ok(url)
    }
}

#[derive(Serialize)]
struct TransmissionBody<'a> {
    campaign_id: String,
    content: Content<'a>,
    recipients: RecipientsBody<'a>,
}

#[derive(Serialize)]
struct Content<'a> {
    from: Sender<'a>,
    subject: &'a str,
    html: &'a str,
}

#[derive(Serialize)]
struct Sender<'a> {
    name: &'a str,
    email: &'a str,
}

#[derive(Serialize)]
#[serde(untagged)]
enum RecipientsBody<'a> {
    List { list_id: &'a str },
    Addresses(Vec<AddressEntry<'a>>),
}

#[derive(Serialize)]
struct AddressEntry<'a> {
    address: Address<'a>,
}

#[derive(Serialize)]
struct Address<'a> {
    email: &'a str,
}

impl<'a> TransmissionBody<'a> {
    fn new(
        message: &'a Message,
        recipients: &Recipients<'a>,
        campaign_id: CampaignId,
    ) -> TransmissionBody<'a> {
        let content = Content {
            from: Sender {
                name: &message.from_name,
                email: &message.from_email,
            },
            subject: &message.subject,
            html: &message.html,
        };

        let recipients = match *recipients {
            Recipients::List(list_id) => RecipientsBody::List { list_id },
            Recipients::Addresses(addresses) => RecipientsBody::Addresses(
                addresses
                    .iter()
                    .map(|email| AddressEntry {
                        address: Address { email },
                    })
                    .collect(),
            ),
        };

        TransmissionBody {
            campaign_id: campaign_id.to_string(),
            content,
            recipients,
        }
    }
}

#[derive(Deserialize)]
struct ApiResponse<T> {
    results: T,
}

#[derive(Deserialize)]
struct TransmissionResults {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    total_accepted_recipients: u64,
    #[serde(default)]
    total_rejected_recipients: u64,
}

#[derive(Deserialize)]
struct RecipientListResults {
    #[serde(default)]
    recipients: Vec<ListEntry>,
}

#[derive(Deserialize)]
struct ListEntry {
    address: ListAddress,
}

#[derive(Deserialize)]
struct ListAddress {
    email: String,
}

#[derive(Deserialize)]
struct ApiErrors {
    errors: Vec<ApiError>,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
    #[serde(default)]
    description: Option<String>,
}

async fn reject(response: Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();

    let message = match serde_json::from_str::<ApiErrors>(&body) {
        Ok(ApiErrors { errors }) if !errors.is_empty() => errors
            .into_iter()
            .map(|err| match err.description {
                Some(description) => format!("{}: {}", err.message, description),
                None => err.message,
            })
            .collect::<Vec<_>>()
            .join("; "),
        _ => body,
    };

    Error::ProviderRejected { status, message }
}

#[async_trait]
impl RecipientResolver for SparkPostClient {
    #[tracing::instrument(skip(self))]
    async fn resolve(&self, list_id: &str) -> Result<Vec<String>, Error> {
        let response = self
            .client
            .get(self.endpoint(&["recipient-lists", list_id])?)
            .query(&[("show_recipients", "true")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        let body: ApiResponse<RecipientListResults> = response.json().await?;
        let recipients: Vec<String> = body
            .results
            .recipients
            .into_iter()
            .map(|entry| entry.address.email)
            .collect();

        debug!(count = recipients.len(), "resolved recipient list");

        Ok(recipients)
    }
}

#[async_trait]
impl TransmissionClient for SparkPostClient {
    #[tracing::instrument(skip(self, message), fields(recipients = %recipients.describe()))]
    async fn send(
        &self,
        message: &Message,
        recipients: Recipients<'_>,
        campaign_id: CampaignId,
    ) -> Result<(), Error> {
        let body = TransmissionBody::new(message, &recipients, campaign_id);

        let response = self
            .client
            .post(self.endpoint(&["transmissions"])?)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(reject(response).await);
        }

        // the call succeeded; an unexpected body is only worth a debug line
        match response.json::<ApiResponse<TransmissionResults>>().await {
            Ok(ApiResponse { results }) => debug!(
                id = ?results.id,
                accepted = results.total_accepted_recipients,
                rejected = results.total_rejected_recipients,
                "transmission accepted"
            ),
            Err(err) => debug!(%err, "transmission accepted with unreadable body"),
        }

        Ok(())
    }
}

impl Mailer for SparkPostClient {
    fn recipients(&self) -> &dyn RecipientResolver {
        self
    }

    fn transmissions(&self) -> &dyn TransmissionClient {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::Campaign;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> SparkPostClient {
        SparkPostClient::new(
            &SecretString::from("test-api-key".to_string()),
            base_url,
            Duration::from_secs(5),
        )
        .unwrap()
    }

    fn test_message() -> Message {
        Message {
            from_name: "Shop".into(),
            from_email: "news@shop.test".into(),
            subject: "Spring sale".into(),
            html: "<p>hi</p>".into(),
        }
    }

    #[tokio::test]
    async fn send_to_list_uses_list_reference() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transmissions"))
            .and(header("authorization", "test-api-key"))
            .and(body_json(serde_json::json!({
                "campaign_id": "42",
                "content": {
                    "from": { "name": "Shop", "email": "news@shop.test" },
                    "subject": "Spring sale",
                    "html": "<p>hi</p>",
                },
                "recipients": { "list_id": "spring-list" },
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": {
                    "total_rejected_recipients": 0,
                    "total_accepted_recipients": 120,
                    "id": "11668787484950529"
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        client
            .send(&test_message(), Recipients::List("spring-list"), CampaignId(42))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_batch_lists_addresses_with_inline_content() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transmissions"))
            .and(body_json(serde_json::json!({
                "campaign_id": "7",
                "content": {
                    "from": { "name": "Shop", "email": "news@shop.test" },
                    "subject": "Spring sale",
                    "html": "<p>authored</p>",
                },
                "recipients": [
                    { "address": { "email": "a@test.com" } },
                    { "address": { "email": "b@test.com" } },
                ],
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": { "total_accepted_recipients": 2 }
            })))
            .expect(1)
            .mount(&server)
            .await;

        // a stored template reference does not replace the authored content
        let campaign = Campaign {
            campaign_id: CampaignId(7),
            subject: "Spring sale".into(),
            from_name: "Shop".into(),
            from_email: "news@shop.test".into(),
            html_content: "<p>authored</p>".into(),
            template_id: Some("old-template".into()),
            ..Default::default()
        };
        let batch = vec!["a@test.com".to_string(), "b@test.com".to_string()];

        let client = test_client(&server.uri());
        client
            .send(
                &Message::from_campaign(&campaign),
                Recipients::Addresses(&batch),
                campaign.campaign_id,
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn send_reports_provider_errors() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transmissions"))
            .respond_with(ResponseTemplate::new(420).set_body_json(serde_json::json!({
                "errors": [{
                    "message": "Exceed Sending Limit (daily)",
                    "code": "2102"
                }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client
            .send(&test_message(), Recipients::List("spring-list"), CampaignId(42))
            .await;

        assert_eq!(
            result.unwrap_err(),
            Error::ProviderRejected {
                status: 420,
                message: "Exceed Sending Limit (daily)".into(),
            }
        );
    }

    #[tokio::test]
    async fn resolve_returns_addresses_in_list_order() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/recipient-lists/spring-list"))
            .and(query_param("show_recipients", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": {
                    "id": "spring-list",
                    "name": "Spring",
                    "recipients": [
                        { "address": { "email": "b@test.com", "name": "B" } },
                        { "address": { "email": "a@test.com" }, "tags": ["vip"] },
                    ]
                }
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let recipients = client.resolve("spring-list").await.unwrap();

        assert_eq!(recipients, vec!["b@test.com", "a@test.com"]);
    }

    #[tokio::test]
    async fn resolve_encodes_the_list_id_as_one_segment() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/api/v1/recipient-lists/spring%2Fvip%3Fx%23y"))
            .and(query_param("show_recipients", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": {
                    "recipients": [{ "address": { "email": "a@test.com" } }]
                }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&format!("{}/api/v1/", server.uri()));
        let recipients = client.resolve("spring/vip?x#y").await.unwrap();

        assert_eq!(recipients, vec!["a@test.com"]);
    }

    #[test]
    fn relative_base_url_is_rejected() {
        let result = SparkPostClient::new(
            &SecretString::from("test-api-key".to_string()),
            "api.sparkpost.com/api/v1",
            Duration::from_secs(5),
        );

        assert_eq!(
            result.unwrap_err(),
            Error::InvalidBaseUrl {
                base_url: "api.sparkpost.com/api/v1".into(),
            }
        );
    }

    #[tokio::test]
    async fn resolve_unknown_list_is_rejected() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/recipient-lists/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "errors": [{
                    "message": "resource not found",
                    "description": "Resource not found:missing"
                }]
            })))
            .mount(&server)
            .await;

        let client = test_client(&server.uri());
        let result = client.resolve("missing").await;

        assert_eq!(
            result.unwrap_err(),
            Error::ProviderRejected {
                status: 404,
                message: "resource not found: Resource not found:missing".into(),
            }
        );
    }
}
