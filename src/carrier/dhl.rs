//!
//! DHL eCommerce REST client and normalizer.
//!
//! Tracking is two-step: static credentials are exchanged for a short-lived bearer token,
//! then the track endpoint is called with the token, the client id and up to ten `number`
//! parameters. The token is cached until shortly before it expires.
//!
//! DHL does not echo tracking numbers consistently; a reply item may carry the submitted
//! number under any of [`REPLY_KEYS`].

use super::client::{BatchCarrierClient, CarrierClient, http_client};
use super::normalize::{as_list, at, clean, join_location, text_at};
use super::types::{ActivityScope, CarrierError, DeliveryEvent, DeliveryVitals, History, RawCarrierResponse};
use super::{Carrier, timestamp, vitals_from_history};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const DEFAULT_AUTH_ENDPOINT: &str = "https://api.dhlglobalmail.com/v1/auth/access_token";
pub const DEFAULT_TRACK_ENDPOINT: &str = "https://api.dhlglobalmail.com/v2/mailitems/track";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Most tracking numbers the track endpoint accepts per call.
pub const MAX_BATCH_SIZE: usize = 10;

/// Reply fields that may hold the submitted tracking number, in lookup order.
pub const REPLY_KEYS: [&str; 3] = ["dspNumber", "customerConfirmationNumber", "overlabeledDspNumber"];

pub const DELIVERED_MESSAGES: [&str; 2] = ["DELIVERED", "Delivered"];

const LOCATION_KEYS: [&str; 4] = ["city", "state", "country", "postalCode"];
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(10);

#[derive(Clone, Deserialize)]
pub struct DhlCredentials {
	pub username: String,
	pub password: String,
	pub client_id: String,
}

impl fmt::Debug for DhlCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("DhlCredentials")
			.field("username", &self.username)
			.field("client_id", &self.client_id)
			.finish_non_exhaustive()
	}
}

struct CachedToken {
	value: String,
	expires_at: Instant,
}

/// DHL eCommerce tracking client
pub struct DhlClient {
	http_client: Client,
	auth_endpoint: String,
	track_endpoint: String,
	credentials: DhlCredentials,
	token: Mutex<Option<CachedToken>>,
}

impl DhlClient {
	/// Create a new DHL client.
	///
	/// # Arguments
	/// * `credentials` - Username, password and client id.
	/// * `auth_endpoint` - Token exchange endpoint.
	/// * `track_endpoint` - Mail item tracking endpoint.
	/// * `timeout` - Per-request timeout, applied to both steps.
	pub fn new(
		credentials: DhlCredentials,
		auth_endpoint: String,
		track_endpoint: String,
		timeout: Duration,
	) -> Result<Self, CarrierError> {
		Ok(Self {
			http_client: http_client(timeout)?,
			auth_endpoint,
			track_endpoint,
			credentials,
			token: Mutex::new(None),
		})
	}

	/// Return the cached bearer token, exchanging credentials for a new one when needed.
	async fn access_token(&self) -> Result<String, CarrierError> {
		let mut cached = self.token.lock().await;
		if let Some(token) = cached.as_ref() {
			if Instant::now() < token.expires_at {
				return Ok(token.value.clone());
			}
		}

		let response = self
			.http_client
			.get(&self.auth_endpoint)
			.header("Content-Type", "application/json")
			.query(&[
				("username", self.credentials.username.as_str()),
				("password", self.credentials.password.as_str()),
			])
			.send()
			.await?;

		let status = response.status();
		if !status.is_success() {
			return Err(CarrierError::Auth(format!("DHL token request failed: {}", status)));
		}
		let body: Value = response.json().await?;

		let value = text_at(&body, &["data", "access_token"])
			.ok_or_else(|| CarrierError::Auth("DHL token reply without access_token".to_string()))?
			.into_owned();
		let ttl = at(&body, &["data", "expires_in"])
			.and_then(Value::as_u64)
			.map(Duration::from_secs)
			.unwrap_or(DEFAULT_TOKEN_TTL);

		info!("Obtained DHL access token valid for {}s", ttl.as_secs());
		*cached = Some(CachedToken {
			value: value.clone(),
			expires_at: Instant::now() + ttl.saturating_sub(TOKEN_REFRESH_MARGIN),
		});
		Ok(value)
	}

	async fn track(&self, tracking_numbers: &[String]) -> Result<RawCarrierResponse, CarrierError> {
		let token = self.access_token().await?;

		let mut params: Vec<(&str, &str)> = vec![
			("access_token", token.as_str()),
			("client_id", self.credentials.client_id.as_str()),
		];
		params.extend(tracking_numbers.iter().map(|n| ("number", n.as_str())));

		let response = self
			.http_client
			.get(&self.track_endpoint)
			.query(&params)
			.send()
			.await?;

		let status = response.status();
		let body = response.text().await?;
		if status == StatusCode::UNAUTHORIZED {
			self.token.lock().await.take();
			return Err(CarrierError::Auth("DHL rejected the access token".to_string()));
		}

		let raw: Value = match serde_json::from_str(&body) {
			Ok(raw) => raw,
			Err(e) if status.is_success() => return Err(e.into()),
			Err(_) => {
				return Err(CarrierError::BadResponse(format!("DHL HTTP error: {}", status)));
			}
		};
		// An error status with a `meta` block is a carrier-reported error, not a bad body.
		if !status.is_success() && raw.get("meta").is_none() {
			return Err(CarrierError::BadResponse(format!("DHL HTTP error: {}", status)));
		}

		debug!("Raw DHL response for {:?}: {}", tracking_numbers, raw);
		Ok(raw)
	}
}

#[async_trait::async_trait]
impl CarrierClient for DhlClient {
	/// The track endpoint always returns the full event list, so `scope` is not sent.
	async fn fetch_raw(
		&self,
		tracking_number: &str,
		_scope: ActivityScope,
	) -> Result<RawCarrierResponse, CarrierError> {
		self.track(&[tracking_number.to_string()]).await
	}

	fn carrier(&self) -> Carrier {
		Carrier::Dhl
	}
}

#[async_trait::async_trait]
impl BatchCarrierClient for DhlClient {
	async fn fetch_batch(
		&self,
		tracking_numbers: &[String],
	) -> Result<RawCarrierResponse, CarrierError> {
		if tracking_numbers.len() > MAX_BATCH_SIZE {
			warn!(
				"DHL batch of {} exceeds the endpoint limit of {}",
				tracking_numbers.len(),
				MAX_BATCH_SIZE
			);
		}
		self.track(tracking_numbers).await
	}

	fn max_batch_size(&self) -> usize {
		MAX_BATCH_SIZE
	}
}

/// The carrier's error text when `meta.code` is not 200.
pub fn reported_error(raw: &RawCarrierResponse) -> Option<String> {
	let code = text_at(raw, &["meta", "code"])?;
	if code.trim() == "200" {
		return None;
	}
	let message = as_list(at(raw, &["meta", "error"]))
		.into_iter()
		.find_map(|error| text_at(error, &["error_message"]))
		.map(|m| clean(&m))
		.unwrap_or_else(|| format!("DHL reported error code {}", code));
	Some(message)
}

/// Every mail item in a reply, regardless of whether DHL sent one item or a list.
pub fn mail_items(raw: &RawCarrierResponse) -> Vec<&Value> {
	as_list(at(raw, &["data", "mailItems"]))
}

/// Identifiers a reply item carries under each of [`REPLY_KEYS`], in lookup order.
pub fn reply_identifiers(item: &Value) -> Vec<(&'static str, String)> {
	REPLY_KEYS
		.iter()
		.filter_map(|key| {
			text_at(item, &["mail", *key])
				.map(|value| value.trim().to_string())
				.filter(|value| !value.is_empty())
				.map(|value| (*key, value))
		})
		.collect()
}

fn event_location(event: &Value) -> Option<String> {
	let location = text_at(event, &["location"])
		.map(|l| clean(&l).replace(['"', '\''], ""))
		.filter(|l| !l.trim().is_empty());
	location.or_else(|| join_location(Some(event), &LOCATION_KEYS))
}

fn event_from_reply(event: &Value) -> Result<DeliveryEvent, CarrierError> {
	let message = text_at(event, &["description"])
		.ok_or_else(|| CarrierError::bad_response("DHL event without a description"))?;
	let date = text_at(event, &["date"])
		.ok_or_else(|| CarrierError::bad_response("DHL event without a date"))?;
	let time = text_at(event, &["time"]).unwrap_or_default();

	Ok(DeliveryEvent {
		message: clean(&message),
		location: event_location(event),
		timestamp: Some(timestamp::parse_dhl(&date, &time)?),
	})
}

/// Chronological history of one reply item. DHL lists events newest first.
pub fn history_from_item(item: &Value) -> Result<History, CarrierError> {
	let mut history = as_list(item.get("events"))
		.into_iter()
		.map(event_from_reply)
		.collect::<Result<History, _>>()?;
	history.reverse();
	Ok(history)
}

/// Current status of one reply item.
pub fn vitals_from_item(item: &Value) -> Result<DeliveryVitals, CarrierError> {
	vitals_from_history(history_from_item(item)?, &DELIVERED_MESSAGES)
		.ok_or_else(|| CarrierError::bad_response("DHL mail item without events"))
}

/// Parse the history of the first item in the reply.
pub fn parse_history(raw: &RawCarrierResponse) -> Result<History, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(vec![DeliveryEvent {
			message,
			location: None,
			timestamp: None,
		}]);
	}
	let item = mail_items(raw)
		.into_iter()
		.next()
		.ok_or_else(|| CarrierError::bad_response("DHL reply without mail items"))?;
	history_from_item(item)
}

/// Parse the current status of the first item in the reply.
pub fn parse_vitals(raw: &RawCarrierResponse) -> Result<DeliveryVitals, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(DeliveryVitals::carrier_error(message));
	}
	let item = mail_items(raw)
		.into_iter()
		.next()
		.ok_or_else(|| CarrierError::bad_response("DHL reply without mail items"))?;
	vitals_from_item(item)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::carrier::http_stub::{HttpStub, response};
	use serde_json::json;

	fn reply() -> Value {
		json!({
			"meta": {"code": 200, "timestamp": "2020-03-04T01:00:00-05:00"},
			"data": {
				"mailItems": [{
					"mail": {
						"dspNumber": "GM2951173225174494",
						"customerConfirmationNumber": "9261290",
						"overlabeledDspNumber": ""
					},
					"events": [
						{"date": "2020-03-03", "time": "10:15:00", "description": "DELIVERED", "location": "Austin, TX \"US\""},
						{"date": "2020-03-01", "time": "08:00:00", "description": "Processed", "location": "Salt Lake City, UT US"}
					]
				}]
			}
		})
	}

	#[test]
	fn vitals_come_from_newest_event() {
		let vitals = parse_vitals(&reply()).unwrap();
		assert!(vitals.delivered);
		assert_eq!(vitals.location.as_deref(), Some("Austin, TX US"));
		assert_eq!(vitals.display_message(), "DELIVERED at Austin, TX US");

		let history = parse_history(&reply()).unwrap();
		assert_eq!(history[0].message, "Processed");
		assert_eq!(history.last(), Some(&DeliveryEvent::from(&vitals)));
	}

	#[test]
	fn meta_error_is_negative_vitals() {
		let raw = json!({
			"meta": {"code": 400, "error": [{"error_type": "INVALID_PARAM", "error_message": "Invalid tracking number"}]}
		});
		assert_eq!(
			parse_vitals(&raw).unwrap(),
			DeliveryVitals::carrier_error("Invalid tracking number")
		);
		assert_eq!(parse_history(&raw).unwrap()[0].message, "Invalid tracking number");
	}

	#[test]
	fn reply_identifiers_skip_blank_fields() {
		let item = &reply()["data"]["mailItems"][0];
		assert_eq!(
			reply_identifiers(item),
			vec![
				("dspNumber", "GM2951173225174494".to_string()),
				("customerConfirmationNumber", "9261290".to_string()),
			]
		);
	}

	#[test]
	fn single_item_object_is_accepted() {
		let mut raw = reply();
		let item = raw["data"]["mailItems"][0].take();
		raw["data"]["mailItems"] = item;
		assert_eq!(mail_items(&raw).len(), 1);
		assert!(parse_vitals(&raw).unwrap().delivered);
	}

	fn token(value: &str, expires_in: u64) -> String {
		let body = json!({"meta": {"code": 200}, "data": {"access_token": value, "expires_in": expires_in}});
		response("200 OK", "application/json", &body.to_string())
	}

	fn tracked() -> String {
		response("200 OK", "application/json", &reply().to_string())
	}

	fn client(server: &HttpStub) -> DhlClient {
		let credentials = DhlCredentials {
			username: "acme".to_string(),
			password: "secret".to_string(),
			client_id: "42".to_string(),
		};
		DhlClient::new(
			credentials,
			server.url("/v1/auth/access_token"),
			server.url("/v2/mailitems/track"),
			Duration::from_secs(5),
		)
		.unwrap()
	}

	#[tokio::test]
	async fn token_is_reused_until_expiry() {
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 3600)]),
			("/v2/mailitems", vec![tracked()]),
		])
		.await;
		let client = client(&server);

		for _ in 0..2 {
			let raw = client.fetch_raw("GM2951173225174494", ActivityScope::Latest).await.unwrap();
			assert!(parse_vitals(&raw).unwrap().delivered);
		}

		assert_eq!(server.requests_to("/v1/auth").len(), 1);
		let tracks = server.requests_to("/v2/mailitems");
		assert_eq!(tracks.len(), 2);
		assert!(tracks.iter().all(|line| line.contains("access_token=tok1")));
		assert!(tracks[0].contains("client_id=42"));
	}

	#[tokio::test]
	async fn token_near_expiry_is_refreshed() {
		// Five seconds of validity is inside the refresh margin.
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 5), token("tok2", 5)]),
			("/v2/mailitems", vec![tracked()]),
		])
		.await;
		let client = client(&server);

		client.fetch_raw("GM2951173225174494", ActivityScope::Latest).await.unwrap();
		client.fetch_raw("GM2951173225174494", ActivityScope::Latest).await.unwrap();

		assert_eq!(server.requests_to("/v1/auth").len(), 2);
		assert!(server.requests_to("/v2/mailitems")[1].contains("access_token=tok2"));
	}

	#[tokio::test]
	async fn rejected_token_is_dropped_and_reported_as_auth() {
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 3600), token("tok2", 3600)]),
			(
				"/v2/mailitems",
				vec![response("401 Unauthorized", "application/json", "{}"), tracked()],
			),
		])
		.await;
		let client = client(&server);

		let err = client.fetch_raw("GM2951173225174494", ActivityScope::Latest).await.unwrap_err();
		assert!(matches!(err, CarrierError::Auth(_)), "{:?}", err);
		assert!(!err.is_transient());

		client.fetch_raw("GM2951173225174494", ActivityScope::Latest).await.unwrap();
		assert_eq!(server.requests_to("/v1/auth").len(), 2);
		assert!(server.requests_to("/v2/mailitems")[1].contains("access_token=tok2"));
	}

	#[tokio::test]
	async fn batch_sends_one_number_parameter_each() {
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 3600)]),
			("/v2/mailitems", vec![tracked()]),
		])
		.await;
		let client = client(&server);

		let numbers = vec!["GM1".to_string(), "GM2".to_string(), "GM3".to_string()];
		client.fetch_batch(&numbers).await.unwrap();

		let track = &server.requests_to("/v2/mailitems")[0];
		assert!(track.contains("number=GM1&number=GM2&number=GM3"), "{}", track);
	}

	#[tokio::test]
	async fn error_status_with_meta_is_a_carrier_reported_error() {
		let body = json!({"meta": {"code": 400, "error": [{"error_message": "Invalid tracking number"}]}});
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 3600)]),
			(
				"/v2/mailitems",
				vec![response("400 Bad Request", "application/json", &body.to_string())],
			),
		])
		.await;
		let client = client(&server);

		let raw = client.fetch_raw("GM0", ActivityScope::Latest).await.unwrap();
		assert_eq!(
			parse_vitals(&raw).unwrap(),
			DeliveryVitals::carrier_error("Invalid tracking number")
		);
	}

	#[tokio::test]
	async fn error_status_without_meta_is_a_bad_response() {
		let server = HttpStub::start(vec![
			("/v1/auth", vec![token("tok1", 3600)]),
			(
				"/v2/mailitems",
				vec![
					response("500 Internal Server Error", "text/html", "<html>oops</html>"),
					response("502 Bad Gateway", "application/json", r#"{"detail": "upstream"}"#),
				],
			),
		])
		.await;
		let client = client(&server);

		for _ in 0..2 {
			let err = client.fetch_raw("GM0", ActivityScope::Latest).await.unwrap_err();
			assert!(matches!(err, CarrierError::BadResponse(_)), "{:?}", err);
		}
	}

	#[tokio::test]
	async fn undecodable_token_reply_is_a_bad_response() {
		let server = HttpStub::start(vec![(
			"/v1/auth",
			vec![response("200 OK", "application/json", "not json")],
		)])
		.await;
		let client = client(&server);

		let err = client.fetch_raw("GM0", ActivityScope::Latest).await.unwrap_err();
		assert!(matches!(err, CarrierError::BadResponse(_)), "{:?}", err);
	}
}
