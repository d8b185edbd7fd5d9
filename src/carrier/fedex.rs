//!
//! FedEx Track v14 SOAP client and normalizer.
//!
//! Replies arrive as a SOAP envelope; the decoder keeps local element names only, so the
//! track reply is found at `Envelope/Body/TrackReply` regardless of the namespace prefix.

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

pub const DEFAULT_ENDPOINT: &str = "https://ws.fedex.com:443/web-services";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DELIVERED_MESSAGES: [&str; 1] = ["Delivered"];

const LOCATION_KEYS: [&str; 4] = ["City", "StateOrProvinceCode", "CountryCode", "PostalCode"];
const FAILED_SEVERITIES: [&str; 2] = ["ERROR", "FAILURE"];

#[derive(Clone, Deserialize)]
pub struct FedExCredentials {
	pub key: String,
	pub password: String,
	pub account_number: String,
	pub meter_number: String,
}

impl fmt::Debug for FedExCredentials {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("FedExCredentials")
			.field("account_number", &self.account_number)
			.finish_non_exhaustive()
	}
}

/// FedEx tracking client
#[derive(Clone)]
pub struct FedExClient {
	http_client: Client,
	endpoint: String,
	credentials: FedExCredentials,
}

impl FedExClient {
	/// Create a new FedEx client.
	///
	/// # Arguments
	/// * `credentials` - Web service key, password, account and meter numbers.
	/// * `endpoint` - The web-services endpoint.
	/// * `timeout` - Per-request timeout.
	pub fn new(
		credentials: FedExCredentials,
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

/// Build the SOAP envelope for one tracking number.
pub fn build_envelope(credentials: &FedExCredentials, tracking_number: &str) -> String {
	let key = escape(credentials.key.as_str());
	let password = escape(credentials.password.as_str());
	format!(
		r#"<soapenv:Envelope xmlns:soapenv="http://schemas.xmlsoap.org/soap/envelope/" xmlns:v14="http://fedex.com/ws/track/v14">
    <soapenv:Header/>
    <soapenv:Body>
        <v14:TrackRequest>
            <v14:WebAuthenticationDetail>
                <v14:ParentCredential>
                    <v14:Key>{key}</v14:Key>
                    <v14:Password>{password}</v14:Password>
                </v14:ParentCredential>
                <v14:UserCredential>
                    <v14:Key>{key}</v14:Key>
                    <v14:Password>{password}</v14:Password>
                </v14:UserCredential>
            </v14:WebAuthenticationDetail>
            <v14:ClientDetail>
                <v14:AccountNumber>{account}</v14:AccountNumber>
                <v14:MeterNumber>{meter}</v14:MeterNumber>
            </v14:ClientDetail>
            <v14:TransactionDetail>
                <v14:CustomerTransactionId>Track By Number_v14</v14:CustomerTransactionId>
                <v14:Localization>
                    <v14:LanguageCode>EN</v14:LanguageCode>
                    <v14:LocaleCode>US</v14:LocaleCode>
                </v14:Localization>
            </v14:TransactionDetail>
            <v14:Version>
                <v14:ServiceId>trck</v14:ServiceId>
                <v14:Major>14</v14:Major>
                <v14:Intermediate>0</v14:Intermediate>
                <v14:Minor>0</v14:Minor>
            </v14:Version>
            <v14:SelectionDetails>
                <v14:PackageIdentifier>
                    <v14:Type>TRACKING_NUMBER_OR_DOORTAG</v14:Type>
                    <v14:Value>{number}</v14:Value>
                </v14:PackageIdentifier>
            </v14:SelectionDetails>
            <v14:ProcessingOptions>INCLUDE_DETAILED_SCANS</v14:ProcessingOptions>
        </v14:TrackRequest>
    </soapenv:Body>
</soapenv:Envelope>"#,
		key = key,
		password = password,
		account = escape(credentials.account_number.as_str()),
		meter = escape(credentials.meter_number.as_str()),
		number = escape(tracking_number),
	)
}

#[async_trait::async_trait]
impl CarrierClient for FedExClient {
	/// Detailed scans are always requested, so `scope` does not change the request.
	async fn fetch_raw(
		&self,
		tracking_number: &str,
		_scope: ActivityScope,
	) -> Result<RawCarrierResponse, CarrierError> {
		let envelope = build_envelope(&self.credentials, tracking_number);

		let response = self
			.http_client
			.post(&self.endpoint)
			.header("Content-Type", "application/soap+xml")
			.body(envelope)
			.send()
			.await?;

		let text = success_body(response, Carrier::FedEx).await?;
		let raw = xml::decode(&text)?;
		debug!("Raw FedEx response for {}: {}", tracking_number, raw);
		Ok(raw)
	}

	fn carrier(&self) -> Carrier {
		Carrier::FedEx
	}
}

fn track_reply(raw: &RawCarrierResponse) -> Result<&Value, CarrierError> {
	at(raw, &["Envelope", "Body", "TrackReply"])
		.ok_or_else(|| CarrierError::bad_response("FedEx reply without TrackReply"))
}

fn track_details(reply: &Value) -> Option<&Value> {
	as_list(reply.get("CompletedTrackDetails"))
		.into_iter()
		.find_map(|completed| as_list(completed.get("TrackDetails")).into_iter().next())
}

fn is_failed(severity: Option<&str>) -> bool {
	severity.is_some_and(|s| FAILED_SEVERITIES.contains(&s.trim()))
}

/// The carrier's error text when the reply or its track detail is an explicit failure.
pub fn reported_error(raw: &RawCarrierResponse) -> Option<String> {
	let reply = track_reply(raw).ok()?;

	let highest = text_at(reply, &["HighestSeverity"]);
	if is_failed(highest.as_deref()) {
		let message = as_list(reply.get("Notifications"))
			.into_iter()
			.find_map(|n| text_at(n, &["Message"]))
			.map(|m| clean(&m))
			.unwrap_or_else(|| "FedEx reported a tracking failure".to_string());
		return Some(message);
	}

	let notification = track_details(reply)?.get("Notification")?;
	if is_failed(text_at(notification, &["Severity"]).as_deref()) {
		return text_at(notification, &["Message"]).map(|m| clean(&m));
	}
	None
}

fn event_from_scan(event: &Value) -> Result<DeliveryEvent, CarrierError> {
	let message = text_at(event, &["EventDescription"])
		.ok_or_else(|| CarrierError::bad_response("FedEx event without a description"))?;
	let stamp = text_at(event, &["Timestamp"])
		.ok_or_else(|| CarrierError::bad_response("FedEx event without a timestamp"))?;

	Ok(DeliveryEvent {
		message: clean(&message),
		location: join_location(event.get("Address"), &LOCATION_KEYS),
		timestamp: Some(timestamp::parse_fedex(&stamp)?),
	})
}

/// Parse the chronological scan history of the first track detail.
pub fn parse_history(raw: &RawCarrierResponse) -> Result<History, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(vec![DeliveryEvent {
			message,
			location: None,
			timestamp: None,
		}]);
	}

	let details = track_details(track_reply(raw)?)
		.ok_or_else(|| CarrierError::bad_response("FedEx reply without track details"))?;

	// Scans are listed newest first.
	let mut history = as_list(details.get("Events"))
		.into_iter()
		.map(event_from_scan)
		.collect::<Result<History, _>>()?;
	history.reverse();

	if history.is_empty() {
		return Err(CarrierError::bad_response("FedEx track detail without events"));
	}
	Ok(history)
}

/// Parse the current status from the newest scan.
pub fn parse_vitals(raw: &RawCarrierResponse) -> Result<DeliveryVitals, CarrierError> {
	if let Some(message) = reported_error(raw) {
		return Ok(DeliveryVitals::carrier_error(message));
	}
	vitals_from_history(parse_history(raw)?, &DELIVERED_MESSAGES)
		.ok_or_else(|| CarrierError::bad_response("FedEx track detail without events"))
}
