//!
//! Client seam for the carrier tracking APIs.
//!
//! Every carrier implements [`CarrierClient`]; DHL additionally implements
//! [`BatchCarrierClient`] because it is the only carrier that tracks several numbers in one
//! call. All calls are read-only and safe to repeat.

use super::Carrier;
use super::types::{ActivityScope, CarrierError, RawCarrierResponse};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

/// One carrier's tracking endpoint.
#[async_trait::async_trait]
pub trait CarrierClient: Send + Sync {
	/// Fetch and decode the carrier's payload for one tracking number.
	///
	/// # Errors
	/// `CarrierError::Transient` for network faults, `CarrierError::BadResponse` for bodies
	/// that cannot be decoded. A carrier-reported error is returned as `Ok` and surfaces as
	/// negative vitals during normalization.
	async fn fetch_raw(
		&self,
		tracking_number: &str,
		scope: ActivityScope,
	) -> Result<RawCarrierResponse, CarrierError>;

	/// The carrier this client talks to
	fn carrier(&self) -> Carrier;
}

/// A carrier endpoint that accepts several tracking numbers per request.
///
/// Batch clients still answer single lookups through [`CarrierClient::fetch_raw`].
#[async_trait::async_trait]
pub trait BatchCarrierClient: CarrierClient {
	/// Fetch one decoded reply covering every number in `tracking_numbers`.
	async fn fetch_batch(
		&self,
		tracking_numbers: &[String],
	) -> Result<RawCarrierResponse, CarrierError>;

	/// Largest number of tracking numbers the endpoint accepts per call
	fn max_batch_size(&self) -> usize;
}

/// Build the HTTP client for one carrier with its fixed per-request timeout.
///
/// An expired timeout surfaces as `CarrierError::Transient`.
pub fn http_client(timeout: Duration) -> Result<Client, CarrierError> {
	Client::builder()
		.timeout(timeout)
		.build()
		.map_err(|e| CarrierError::Transient(format!("Failed to create HTTP client: {}", e)))
}

/// Read a response body as text, rejecting non-success statuses.
pub async fn success_body(response: Response, carrier: Carrier) -> Result<String, CarrierError> {
	let status = response.status();
	let body = response.text().await?;
	debug!("{} responded with status {}", carrier, status);
	if !status.is_success() {
		return Err(CarrierError::BadResponse(format!(
			"{} HTTP error: {}",
			carrier, status
		)));
	}
	Ok(body)
}
