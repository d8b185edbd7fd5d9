use crate::carrier::{Carrier, CarrierError, DeliveryVitals};

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Completion-date window of the packages a group covers, half-open: `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
	pub start: NaiveDate,
	pub end: NaiveDate,
}

impl DateWindow {
	pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
		Self { start, end }
	}

	/// The `days_ago` days before `today`, excluding today.
	pub fn days_ago(today: NaiveDate, days_ago: u32) -> Self {
		let start = today
			.checked_sub_days(Days::new(u64::from(days_ago)))
			.unwrap_or(NaiveDate::MIN);
		Self { start, end: today }
	}

	pub fn contains(&self, date: NaiveDate) -> bool {
		self.start <= date && date < self.end
	}
}

/// One configured unit of work: a company's packages on one shipped method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroup {
	pub company_id: u32,
	pub shipped_method: String,
	pub window: DateWindow,
}

/// Immutable per-group context threaded through every call of a group.
#[derive(Debug, Clone)]
pub struct RunContext {
	pub company_id: u32,
	pub shipped_method: String,
	pub carrier: Carrier,
	pub window: DateWindow,
	/// Local date of the run, used by the checked-today skip rule.
	pub today: NaiveDate,
	/// Written as `last_checked` on every upsert.
	pub checked_at: NaiveDateTime,
	pub recheck_today: bool,
}

impl RunContext {
	pub fn new(group: &SyncGroup, carrier: Carrier, checked_at: NaiveDateTime, recheck_today: bool) -> Self {
		Self {
			company_id: group.company_id,
			shipped_method: group.shipped_method.clone(),
			carrier,
			window: group.window,
			today: checked_at.date(),
			checked_at,
			recheck_today,
		}
	}
}

/// A package row returned by the store. `tracking_number` may hold several numbers joined by `;`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingPackage {
	pub package_shipment_id: u64,
	pub tracking_number: String,
}

/// One tracking number to look up, tied to the package it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TrackingQuery {
	pub package_shipment_id: u64,
	pub tracking_number: String,
	pub carrier_hint: Option<Carrier>,
}

/// Split a multi-item tracking string on `;`, trimming and dropping empty parts.
pub fn split_tracking_numbers(tracking_number: &str) -> Vec<&str> {
	tracking_number
		.split(';')
		.map(str::trim)
		.filter(|n| !n.is_empty())
		.collect()
}

/// Expand pending packages into independent queries sharing their package identity.
pub fn expand_packages(packages: &[PendingPackage], carrier: Carrier) -> Vec<TrackingQuery> {
	packages
		.iter()
		.flat_map(|package| {
			split_tracking_numbers(&package.tracking_number)
				.into_iter()
				.map(move |number| TrackingQuery {
					package_shipment_id: package.package_shipment_id,
					tracking_number: number.to_string(),
					carrier_hint: Some(carrier),
				})
		})
		.collect()
}

/// Package table row owned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageShipment {
	pub package_shipment_id: u64,
	pub tracking_number: String,
	pub company_id: u32,
	pub shipped_method: String,
	pub completion_date: NaiveDate,
}

/// Arrival record keyed by `(package_shipment_id, tracking_number)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentRecord {
	pub package_shipment_id: u64,
	pub tracking_number: String,
	pub message: String,
	pub message_timestamp: Option<NaiveDateTime>,
	pub delivered: bool,
	pub last_checked: NaiveDateTime,
	pub company_id: u32,
}

/// Insert-or-overwrite request for one arrival record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShipmentUpdate {
	pub package_shipment_id: u64,
	pub tracking_number: String,
	pub timestamp: Option<NaiveDateTime>,
	pub message: String,
	pub company_id: u32,
	pub delivered: bool,
	pub checked_at: NaiveDateTime,
}

impl ShipmentUpdate {
	pub fn from_vitals(context: &RunContext, query: &TrackingQuery, vitals: &DeliveryVitals) -> Self {
		Self {
			package_shipment_id: query.package_shipment_id,
			tracking_number: query.tracking_number.clone(),
			timestamp: vitals.timestamp,
			message: vitals.display_message(),
			company_id: context.company_id,
			delivered: vitals.delivered,
			checked_at: context.checked_at,
		}
	}
}

impl From<ShipmentUpdate> for ShipmentRecord {
	fn from(update: ShipmentUpdate) -> Self {
		Self {
			package_shipment_id: update.package_shipment_id,
			tracking_number: update.tracking_number,
			message: update.message,
			message_timestamp: update.timestamp,
			delivered: update.delivered,
			last_checked: update.checked_at,
			company_id: update.company_id,
		}
	}
}

/// Error types for the tracking sync run
#[derive(Debug, thiserror::Error)]
pub enum TrackingSyncError {
	#[error("Unrecognized carrier in shipped method '{0}'")]
	UnrecognizedCarrier(String),

	#[error("Retries exhausted after {attempts} attempts for {operation}: {source}")]
	RetriesExhausted {
		operation: String,
		attempts: usize,
		#[source]
		source: CarrierError,
	},

	#[error("Carrier error: {0}")]
	Carrier(#[from] CarrierError),

	#[error("Store error: {0}")]
	Store(String),

	#[error("Configuration error: {0}")]
	Config(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
	use super::*;
	use itertools::Itertools;

	fn date(y: i32, m: u32, d: u32) -> NaiveDate {
		NaiveDate::from_ymd_opt(y, m, d).unwrap()
	}

	#[test]
	fn split_then_join_recovers_numbers() {
		let packages = vec![
			PendingPackage {
				package_shipment_id: 7,
				tracking_number: "GM001; GM002 ;GM003".to_string(),
			},
			PendingPackage {
				package_shipment_id: 8,
				tracking_number: "1Z999".to_string(),
			},
		];
		let queries = expand_packages(&packages, Carrier::Dhl);
		assert_eq!(queries.len(), 4);

		let rejoined = queries
			.iter()
			.filter(|q| q.package_shipment_id == 7)
			.map(|q| q.tracking_number.as_str())
			.join(";");
		assert_eq!(split_tracking_numbers(&rejoined), vec!["GM001", "GM002", "GM003"]);
		assert!(queries.iter().all(|q| q.carrier_hint == Some(Carrier::Dhl)));
	}

	#[test]
	fn empty_parts_are_dropped() {
		assert_eq!(split_tracking_numbers("A;;B; "), vec!["A", "B"]);
		assert!(split_tracking_numbers("").is_empty());
	}

	#[test]
	fn days_ago_excludes_today() {
		let window = DateWindow::days_ago(date(2020, 3, 31), 30);
		assert_eq!(window.start, date(2020, 3, 1));
		assert!(window.contains(date(2020, 3, 1)));
		assert!(window.contains(date(2020, 3, 30)));
		assert!(!window.contains(date(2020, 3, 31)));
	}
}
