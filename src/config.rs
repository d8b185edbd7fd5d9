//!
//! Run configuration.
//!
//! A run is described by one JSON file: the ordered series of groups to update, store and
//! summary locations, retry settings and the per-carrier credentials. Credentials are opaque
//! secrets handed to the clients unchanged.

use crate::carrier::dhl::{self, DhlClient, DhlCredentials};
use crate::carrier::fedex::{self, FedExClient, FedExCredentials};
use crate::carrier::ups::{self, UpsClient, UpsCredentials};
use crate::carrier::usps::{self, UspsClient, UspsCredentials};
use crate::carrier::Carrier;
use crate::tracking::sync::retry::RetryPolicy;
use crate::tracking::sync::{CarrierClients, SyncSettings};
use crate::tracking::{DateWindow, SyncGroup, TrackingSyncError};
use chrono::NaiveDate;
use itertools::Itertools;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable naming the run file
pub const CONFIG_ENV: &str = "TRACKING_SYNC_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "tracking-sync.json";

const DEFAULT_DAYS_AGO: u32 = 30;

/// One configured group before its window is resolved.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesEntry {
	pub company_id: u32,
	pub shipped_method: String,
	#[serde(default)]
	pub days_ago: Option<u32>,
	#[serde(default)]
	pub start_date: Option<NaiveDate>,
	#[serde(default)]
	pub end_date: Option<NaiveDate>,
}

impl SeriesEntry {
	fn resolve(&self, default_days_ago: u32, today: NaiveDate) -> Result<SyncGroup, TrackingSyncError> {
		let window = match (self.days_ago, self.start_date, self.end_date) {
			(Some(days), None, None) => DateWindow::days_ago(today, days),
			(None, Some(start), Some(end)) if start < end => DateWindow::new(start, end),
			(None, Some(start), Some(end)) => {
				return Err(TrackingSyncError::Config(format!(
					"series entry {} / {}: start_date {} is not before end_date {}",
					self.company_id, self.shipped_method, start, end
				)));
			}
			(None, None, None) => DateWindow::days_ago(today, default_days_ago),
			_ => {
				return Err(TrackingSyncError::Config(format!(
					"series entry {} / {}: give either days_ago or both start_date and end_date",
					self.company_id, self.shipped_method
				)));
			}
		};
		Ok(SyncGroup {
			company_id: self.company_id,
			shipped_method: self.shipped_method.clone(),
			window,
		})
	}
}

/// Retry settings as written in the run file
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrySettings {
	#[serde(default = "default_max_attempts")]
	pub max_attempts: usize,
	#[serde(default = "default_backoff_secs")]
	pub backoff_secs: u64,
}

fn default_max_attempts() -> usize {
	5
}

fn default_backoff_secs() -> u64 {
	3
}

fn default_days_ago() -> u32 {
	DEFAULT_DAYS_AGO
}

impl Default for RetrySettings {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			backoff_secs: default_backoff_secs(),
		}
	}
}

/// Credentials plus optional endpoint and timing overrides for one carrier.
#[derive(Debug, Clone, Deserialize)]
pub struct CarrierSettings<C> {
	#[serde(flatten)]
	pub credentials: C,
	#[serde(default)]
	pub endpoint: Option<String>,
	/// DHL token endpoint
	#[serde(default)]
	pub auth_endpoint: Option<String>,
	#[serde(default)]
	pub timeout_secs: Option<u64>,
	/// USPS pause before every call
	#[serde(default)]
	pub request_delay_ms: Option<u64>,
}

impl<C> CarrierSettings<C> {
	fn endpoint_or(&self, default: &str) -> String {
		self.endpoint.clone().unwrap_or_else(|| default.to_string())
	}

	fn timeout_or(&self, default: Duration) -> Duration {
		self.timeout_secs.map(Duration::from_secs).unwrap_or(default)
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CarrierCredentials {
	#[serde(default)]
	pub ups: Option<CarrierSettings<UpsCredentials>>,
	#[serde(default)]
	pub usps: Option<CarrierSettings<UspsCredentials>>,
	#[serde(default)]
	pub dhl: Option<CarrierSettings<DhlCredentials>>,
	#[serde(default)]
	pub fedex: Option<CarrierSettings<FedExCredentials>>,
}

/// Contents of the run file
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
	pub series: Vec<SeriesEntry>,
	/// Window for series entries that set neither `days_ago` nor explicit dates
	#[serde(default = "default_days_ago")]
	pub days_ago: u32,
	#[serde(default)]
	pub recheck_today: bool,
	#[serde(default)]
	pub dry_run: bool,
	pub store_path: PathBuf,
	#[serde(default)]
	pub summary_path: Option<PathBuf>,
	#[serde(default)]
	pub retry: RetrySettings,
	#[serde(default)]
	pub credentials: CarrierCredentials,
}

impl RunConfig {
	/// Run file path from `TRACKING_SYNC_CONFIG`, or the default in the working directory.
	pub fn path_from_env() -> PathBuf {
		std::env::var_os(CONFIG_ENV)
			.map(PathBuf::from)
			.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
	}

	pub fn from_json(content: &str) -> Result<Self, TrackingSyncError> {
		let config: RunConfig = serde_json::from_str(content)
			.map_err(|e| TrackingSyncError::Config(format!("Invalid run file: {}", e)))?;
		config.validate()?;
		Ok(config)
	}

	/// Read and validate the run file.
	pub async fn load(path: &Path) -> Result<Self, TrackingSyncError> {
		let content = tokio::fs::read_to_string(path).await.map_err(|e| {
			TrackingSyncError::Config(format!("Failed to read run file {:?}: {}", path, e))
		})?;
		let config = Self::from_json(&content)?;
		info!(
			"Loaded run file {:?}: {} series entries",
			path,
			config.series.len()
		);
		Ok(config)
	}

	fn validate(&self) -> Result<(), TrackingSyncError> {
		if self.series.is_empty() {
			return Err(TrackingSyncError::Config("series must not be empty".to_string()));
		}
		if self.retry.max_attempts == 0 {
			return Err(TrackingSyncError::Config(
				"retry.max_attempts must be greater than 0".to_string(),
			));
		}
		Ok(())
	}

	/// Resolve every series entry's window against `today`.
	pub fn groups(&self, today: NaiveDate) -> Result<Vec<SyncGroup>, TrackingSyncError> {
		self.series
			.iter()
			.map(|entry| entry.resolve(self.days_ago, today))
			.collect()
	}

	pub fn settings(&self) -> SyncSettings {
		SyncSettings {
			recheck_today: self.recheck_today,
			dry_run: self.dry_run,
			retry: RetryPolicy::new(
				self.retry.max_attempts,
				Duration::from_secs(self.retry.backoff_secs),
			),
		}
	}

	/// Build a client for every distinct carrier in `carriers`.
	///
	/// # Errors
	/// `Config` when a needed carrier has no credentials.
	pub fn build_clients(&self, carriers: &[Carrier]) -> Result<CarrierClients, TrackingSyncError> {
		let missing = |carrier: Carrier| {
			TrackingSyncError::Config(format!("No credentials configured for carrier {}", carrier))
		};

		let mut clients = CarrierClients::new();
		for carrier in carriers.iter().copied().unique() {
			clients = match carrier {
				Carrier::Ups => {
					let settings = self.credentials.ups.as_ref().ok_or_else(|| missing(carrier))?;
					clients.with_client(Arc::new(UpsClient::new(
						settings.credentials.clone(),
						settings.endpoint_or(ups::DEFAULT_ENDPOINT),
						settings.timeout_or(ups::DEFAULT_TIMEOUT),
					)?))
				}
				Carrier::Usps => {
					let settings = self.credentials.usps.as_ref().ok_or_else(|| missing(carrier))?;
					clients.with_client(Arc::new(UspsClient::new(
						settings.credentials.clone(),
						settings.endpoint_or(usps::DEFAULT_ENDPOINT),
						settings.timeout_or(usps::DEFAULT_TIMEOUT),
						settings
							.request_delay_ms
							.map(Duration::from_millis)
							.unwrap_or(usps::DEFAULT_REQUEST_DELAY),
					)?))
				}
				Carrier::Dhl => {
					let settings = self.credentials.dhl.as_ref().ok_or_else(|| missing(carrier))?;
					clients.with_batch_client(Arc::new(DhlClient::new(
						settings.credentials.clone(),
						settings
							.auth_endpoint
							.clone()
							.unwrap_or_else(|| dhl::DEFAULT_AUTH_ENDPOINT.to_string()),
						settings.endpoint_or(dhl::DEFAULT_TRACK_ENDPOINT),
						settings.timeout_or(dhl::DEFAULT_TIMEOUT),
					)?))
				}
				Carrier::FedEx => {
					let settings = self.credentials.fedex.as_ref().ok_or_else(|| missing(carrier))?;
					clients.with_client(Arc::new(FedExClient::new(
						settings.credentials.clone(),
						settings.endpoint_or(fedex::DEFAULT_ENDPOINT),
						settings.timeout_or(fedex::DEFAULT_TIMEOUT),
					)?))
				}
			};
		}
		Ok(clients)
	}
}
