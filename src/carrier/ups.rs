//!
//! UPS XML tracking client and normalizer.
//!
//! The request is the legacy two-document XML body (an `AccessRequest` followed by a
//! `TrackRequest`) posted form-encoded. `RequestOption` selects between the latest
//! activity only and the full activity list, so the two scopes are two distinct requests.

use super::client::{CarrierClient, http_client, success_body};
use super::normalize::{as_list, at, clean, join_location, text_at};
use super::types::{ActivityScope, CarrierError, DeliveryEvent, DeliveryVitals, History, RawCarrierResponse};
use super::{Carrier, timestamp, vitals_from_history, xml};
use quick_xml::escape::escape;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_ENDPOINT: &str = "https://onlinetools.ups.com/ups.app/xml/Track";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Status descriptions that mean the package reached its destination.
pub const DELIVERED_MESSAGES: [&str; 2] = ["DELIVERED", "Delivered"];

const LOCATION_KEYS: [&str; 4] = ["City", "StateProvinceCode", "CountryCode", "PostalCode"];

/// UPS access credentials, substituted verbatim into the request body.
#[derive(Clone, Deserialize)]
pub struct UpsCredentials {
	pub access_license_number: String,
	pub user_id: String,
	pub password: String,
}

impl fmt::Debug for UpsCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("UpsCredentials")
			.field("user_id", &self.user_id)
			.finish_non_exhaustive()
	}
}

/// UPS tracking client
#[derive(Clone)]
pub struct UpsClient {
	http_client: Client,
	endpoint: String,
	credentials: UpsCredentials,
}

impl UpsClient {
	/// Create a new UPS client.
	///
	/// # Arguments
	/// * `credentials` - Access license, user id and password.
	/// * `endpoint` - The XML Track endpoint.
	/// * `timeout` - Per-request timeout.
	pub fn new(
		credentials: UpsCredentials,
		endpoint: String,
		timeout: Duration,
	) -> Result<Self, CarrierError> {
		Ok(Self {
			http_client: http_client(timeout)?,
			endpoint,
			credentials,
		})
	}
}

/// Build the UPS request body for one tracking number.
pub fn build_request_body(
	credentials: &UpsCredentials,
	tracking_number: &str,
	scope: ActivityScope,
) -> String {
	let request_option = match scope {
		ActivityScope::Latest => "0",
		ActivityScope::Full => "1",
	};
	format!(
		r#"<?xml version="1.0"?>
<AccessRequest xml:lang="en-US">
    <AccessLicenseNumber>{}</AccessLicenseNumber>
    <UserId>{}</UserId>
    <Password>{}</Password>
</AccessRequest>
<?xml version="1.0"?>
<TrackRequest xml:lang="en-US">
    <Request>
        <TransactionReference>
            <CustomerContext>Get tracking status</CustomerContext>
        </TransactionReference>
        <XpciVersion>1.0</XpciVersion>
        <RequestAction>Track</RequestAction>
        <RequestOption>{}</RequestOption>
    </Request>
    <IncludeMailInnovationIndicator/>
    <TrackingNumber>{}</TrackingNumber>
</TrackRequest>"#,
		escape(credentials.access_license_number.as_str()),
		escape(credentials.user_id.as_str()),
		escape(credentials.password.as_str()),
		request_option,
		escape(tracking_number),
	)
}

#[async_trait::async_trait]
impl CarrierClient for UpsClient {
	async fn fetch_raw(
		&self,
		tracking_number: &str,
		scope: ActivityScope,
	) -> Result<RawCarrierResponse, CarrierError> {
		let body = build_request_body(&self.credentials, tracking_number, scope);

		let response = self
			.http_client
			.post(&self.endpoint)
			.header("Content-Type", "application/x-www-form-urlencoded")
			.body(body)
			.send()
			.await?;

		let text = success_body(response, Carrier::Ups).await?;
		let raw = xml::decode(&text)?;
		debug!("Raw UPS response for {}: {}", tracking_number, raw);
		Ok(raw)
	}

	fn carrier(&self) -> Carrier {
		Carrier::Ups
	}
}

/// The carrier's error text when the reply is an explicit failure.
pub fn reported_error(raw: &RawCarrierResponse) -> Option<String> {
	let status = text_at(raw, &["TrackResponse", "Response", "ResponseStatusCode"])?;
	if status.trim() != "0" {
		return None;
	}
	let description = as_list(at(raw, &["TrackResponse", "Response", "Error"]))
		.into_iter()
		.find_map(|error| text_at(error, &["ErrorDescription"]))
		.map(|d| clean(&d))
		.unwrap_or_else(|| "UPS reported a tracking failure".to_string());
	Some(description)
}

fn event_from_activity(activity: &Value) -> Result<DeliveryEvent, CarrierError> {
	let message = text_at(activity, &["Status", "StatusType", "Description"])
		.ok_or_else(|| CarrierError::bad_response("UPS activity without a status description"))?;
	let date = text_at(activity, &["Date"])
		.ok_or_else(|| CarrierError::bad_response("UPS activity without a date"))?;
	let time = text_at(activity, &["Time"]);

	Ok(DeliveryEvent {
		message: clean(&message),
		location: join_location(at(activity, &["ActivityLocation", "Address"]), &LOCATION_KEYS),
		timestamp: Some(timestamp::parse_ups(&date, time.as_deref())?),
	})
}

/// Parse the chronological activity history of the first package in the reply.
pub fn parse_history(raw: &RawCarrierResponse) -> Result<History, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(vec![DeliveryEvent {
			message,
			location: None,
			timestamp: None,
		}]);
	}

	let shipment = as_list(at(raw, &["TrackResponse", "Shipment"]))
		.into_iter()
		.next()
		.ok_or_else(|| CarrierError::bad_response("UPS reply without a shipment"))?;
	let package = as_list(shipment.get("Package"))
		.into_iter()
		.next()
		.ok_or_else(|| CarrierError::bad_response("UPS shipment without a package"))?;

	// UPS lists activity newest first.
	let mut history = as_list(package.get("Activity"))
		.into_iter()
		.map(event_from_activity)
		.collect::<Result<History, _>>()?;
	history.reverse();

	if history.is_empty() {
		return Err(CarrierError::bad_response("UPS package without activity"));
	}
	Ok(history)
}

/// Parse the current status of the first package in the reply.
pub fn parse_vitals(raw: &RawCarrierResponse) -> Result<DeliveryVitals, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(DeliveryVitals::carrier_error(message));
	}
	vitals_from_history(parse_history(raw)?, &DELIVERED_MESSAGES)
		.ok_or_else(|| CarrierError::bad_response("UPS package without activity"))
}
