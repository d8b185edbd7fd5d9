//!
//! USPS TrackV2 client and normalizer.
//!
//! USPS returns prose: `TrackSummary` is the latest event and `TrackDetail` holds the older
//! ones, newest first. Event times live inside the sentence and are recovered by
//! [`timestamp::parse_usps_message`]. The API rate-limits aggressively, so every call is
//! preceded by a fixed delay.

use super::client::{CarrierClient, http_client, success_body};
use super::normalize::{as_list, at, clean, text, text_at};
use super::types::{ActivityScope, CarrierError, DeliveryEvent, DeliveryVitals, History, RawCarrierResponse};
use super::{Carrier, timestamp, vitals_from_history, xml};
use quick_xml::escape::escape;
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "http://production.shippingapis.com/ShippingAPI.dll";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_DELAY: Duration = Duration::from_millis(100);

/// Summary openings that mean the item has left the network.
pub const DELIVERED_MESSAGES: [&str; 8] = [
	"Your item was delivered",
	"Your item has been delivered",
	"We attempted to deliver your item",
	"Your item was picked up",
	"Your item is being held",
	"Your item was forwarded",
	"The return on your item was processed",
	"Your item was returned",
];

#[derive(Clone, Deserialize)]
pub struct UspsCredentials {
	pub user_id: String,
}

impl fmt::Debug for UspsCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UspsCredentials").finish_non_exhaustive()
	}
}

/// USPS tracking client
#[derive(Clone)]
pub struct UspsClient {
	http_client: Client,
	endpoint: String,
	credentials: UspsCredentials,
	request_delay: Duration,
}

impl UspsClient {
	/// Create a new USPS client.
	///
	/// # Arguments
	/// * `credentials` - The Web Tools user id.
	/// * `endpoint` - The ShippingAPI endpoint.
	/// * `timeout` - Per-request timeout.
	/// * `request_delay` - Pause before every call.
	pub fn new(
		credentials: UspsCredentials,
		endpoint: String,
		timeout: Duration,
		request_delay: Duration,
	) -> Result<Self, CarrierError> {
		Ok(Self {
			http_client: http_client(timeout)?,
			endpoint,
			credentials,
			request_delay,
		})
	}
}

/// Build the `XML` query parameter for one tracking number.
pub fn build_track_request(credentials: &UspsCredentials, tracking_number: &str) -> String {
	format!(
		r#"<TrackRequest USERID="{}"><TrackID ID="{}"></TrackID></TrackRequest>"#,
		escape(credentials.user_id.as_str()),
		escape(tracking_number),
	)
}

#[async_trait::async_trait]
impl CarrierClient for UspsClient {
	/// TrackV2 always returns the full detail list, so `scope` does not change the request.
	async fn fetch_raw(
		&self,
		tracking_number: &str,
		_scope: ActivityScope,
	) -> Result<RawCarrierResponse, CarrierError> {
		tokio::time::sleep(self.request_delay).await;

		let request = build_track_request(&self.credentials, tracking_number);
		let response = self
			.http_client
			.get(&self.endpoint)
			.query(&[("API", "TrackV2"), ("XML", request.as_str())])
			.send()
			.await?;

		let text = success_body(response, Carrier::Usps).await?;
		let raw = xml::decode(&text)?;
		debug!("Raw USPS response for {}: {}", tracking_number, raw);
		Ok(raw)
	}

	fn carrier(&self) -> Carrier {
		Carrier::Usps
	}
}

/// The carrier's error text when the reply is an explicit failure.
///
/// USPS reports request-level failures as a root `Error` element and per-item failures as
/// `TrackInfo/Error`.
pub fn reported_error(raw: &RawCarrierResponse) -> Option<String> {
	let error = at(raw, &["Error"])
		.or_else(|| at(raw, &["TrackResponse", "Error"]))
		.or_else(|| {
			as_list(at(raw, &["TrackResponse", "TrackInfo"]))
				.into_iter()
				.find_map(|info| info.get("Error"))
		})?;
	let description = text_at(error, &["Description"])
		.or_else(|| text(error))
		.map(|d| clean(&d))
		.unwrap_or_else(|| "USPS reported a tracking failure".to_string());
	Some(description)
}

fn event_from_message(message: &str) -> DeliveryEvent {
	let message = clean(message);
	DeliveryEvent {
		timestamp: timestamp::parse_usps_message(&message),
		location: None,
		message,
	}
}

/// Parse the chronological history from `TrackDetail` entries followed by `TrackSummary`.
pub fn parse_history(raw: &RawCarrierResponse) -> Result<History, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(vec![DeliveryEvent {
			message,
			location: None,
			timestamp: None,
		}]);
	}

	let info = as_list(at(raw, &["TrackResponse", "TrackInfo"]))
		.into_iter()
		.next()
		.ok_or_else(|| CarrierError::bad_response("USPS reply without TrackInfo"))?;
	let summary = text_at(info, &["TrackSummary"])
		.ok_or_else(|| CarrierError::bad_response("USPS reply without TrackSummary"))?;

	let mut history: History = as_list(info.get("TrackDetail"))
		.into_iter()
		.filter_map(text)
		.map(|detail| event_from_message(&detail))
		.collect();
	history.reverse();
	history.push(event_from_message(&summary));
	Ok(history)
}

/// Parse the current status from `TrackSummary`.
pub fn parse_vitals(raw: &RawCarrierResponse) -> Result<DeliveryVitals, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(DeliveryVitals::carrier_error(message));
	}
	vitals_from_history(parse_history(raw)?, &DELIVERED_MESSAGES)
		.ok_or_else(|| CarrierError::bad_response("USPS reply without TrackSummary"))
}
