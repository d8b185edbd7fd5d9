//! Carrier integration module
//!
//! This module provides the clients and normalizers for the four supported carriers
//! (UPS, USPS, DHL, FedEx). Each client builds the carrier's own wire request and decodes
//! the reply into a nested mapping; each normalizer turns that mapping into the canonical
//! [`DeliveryVitals`] and [`History`] types.

/// Client traits and HTTP plumbing
mod client;
/// DHL eCommerce REST client and normalizer
pub mod dhl;
/// FedEx SOAP client and normalizer
pub mod fedex;
#[cfg(test)]
mod http_stub;
/// Shape and text helpers shared by normalizers
pub mod normalize;
/// Carrier timestamp parsers
pub mod timestamp;
/// Canonical tracking types
mod types;
/// UPS XML client and normalizer
pub mod ups;
/// USPS TrackV2 client and normalizer
pub mod usps;
/// XML to nested-mapping decoding
pub mod xml;

pub use client::{BatchCarrierClient, CarrierClient};
pub use types::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// The closed set of supported carriers, in shipped-method match order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Carrier {
	Ups,
	Usps,
	Dhl,
	FedEx,
}

impl Carrier {
	/// Fixed match order for shipped-method resolution
	pub const ALL: [Carrier; 4] = [Carrier::Ups, Carrier::Usps, Carrier::Dhl, Carrier::FedEx];

	/// Tag used in shipped-method strings and logs
	pub fn tag(self) -> &'static str {
		match self {
			Carrier::Ups => "UPS",
			Carrier::Usps => "USPS",
			Carrier::Dhl => "DHL",
			Carrier::FedEx => "FedEx",
		}
	}

	/// Resolve the carrier for a shipped-method string by case-insensitive prefix match.
	///
	/// Returns `None` when no tag prefixes the method; callers treat that as fatal before
	/// any network I/O.
	pub fn from_shipped_method(shipped_method: &str) -> Option<Carrier> {
		let method = shipped_method.trim().to_ascii_lowercase();
		Carrier::ALL
			.into_iter()
			.find(|carrier| method.starts_with(&carrier.tag().to_ascii_lowercase()))
	}

	/// Extract the current status from a decoded payload.
	pub fn parse_vitals(self, raw: &RawCarrierResponse) -> Result<DeliveryVitals, CarrierError> {
		match self {
			Carrier::Ups => ups::parse_vitals(raw),
			Carrier::Usps => usps::parse_vitals(raw),
			Carrier::Dhl => dhl::parse_vitals(raw),
			Carrier::FedEx => fedex::parse_vitals(raw),
		}
	}

	/// Extract the chronological event history from a decoded payload.
	pub fn parse_history(self, raw: &RawCarrierResponse) -> Result<History, CarrierError> {
		match self {
			Carrier::Ups => ups::parse_history(raw),
			Carrier::Usps => usps::parse_history(raw),
			Carrier::Dhl => dhl::parse_history(raw),
			Carrier::FedEx => fedex::parse_history(raw),
		}
	}
}

impl fmt::Display for Carrier {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.tag())
	}
}

/// Vitals derived from a chronological history: the last event is the current status.
pub(crate) fn vitals_from_history(history: History, delivered_phrases: &[&str]) -> Option<DeliveryVitals> {
	let latest = history.into_iter().last()?;
	let delivered = normalize::is_delivered(&latest.message, delivered_phrases);
	if !delivered {
		debug!("Not a delivered phrase: '{}'", latest.message);
	}
	Some(DeliveryVitals::from_event(latest, delivered))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn shipped_method_prefix_selects_carrier() {
		assert_eq!(Carrier::from_shipped_method("UPS MI Dom"), Some(Carrier::Ups));
		assert_eq!(Carrier::from_shipped_method("USPS Media Mail"), Some(Carrier::Usps));
		assert_eq!(Carrier::from_shipped_method("usps priority"), Some(Carrier::Usps));
		assert_eq!(Carrier::from_shipped_method("DHL SM Parcel Plus"), Some(Carrier::Dhl));
		assert_eq!(Carrier::from_shipped_method("FEDEX Ground"), Some(Carrier::FedEx));
	}

	#[test]
	fn unknown_shipped_method_is_rejected() {
		assert_eq!(Carrier::from_shipped_method("OnTrac Ground"), None);
		assert_eq!(Carrier::from_shipped_method(""), None);
		assert_eq!(Carrier::from_shipped_method("Ground UPS"), None);
	}
}
