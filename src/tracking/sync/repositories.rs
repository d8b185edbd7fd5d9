use crate::tracking::{
	PackageShipment, PendingPackage, RunContext, ShipmentRecord, ShipmentUpdate, TrackingSyncError,
	split_tracking_numbers,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Storage collaborator for package and arrival data
#[async_trait::async_trait]
pub trait ShipmentRepository: Send + Sync {
	/// Packages of the context's group with at least one tracking number still pending.
	///
	/// A tracking number is pending when it has no arrival record, or its record is not
	/// delivered and was last checked before today (or `recheck_today` is set). Packages are
	/// returned with only their pending numbers, joined by `;`.
	async fn query_pending(&self, context: &RunContext) -> Result<Vec<PendingPackage>, TrackingSyncError>;

	/// Insert the arrival record, or overwrite the one with the same key.
	async fn upsert(&self, update: &ShipmentUpdate) -> Result<(), TrackingSyncError>;
}

/// On-disk layout of the file-backed store
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct StoreDocument {
	#[serde(default)]
	pub packages: Vec<PackageShipment>,
	#[serde(default)]
	pub arrivals: Vec<ShipmentRecord>,
}

impl StoreDocument {
	fn arrival(&self, package_shipment_id: u64, tracking_number: &str) -> Option<&ShipmentRecord> {
		self.arrivals.iter().find(|record| {
			record.package_shipment_id == package_shipment_id && record.tracking_number == tracking_number
		})
	}
}

/// JSON file implementation of ShipmentRepository
///
/// The document is read on first use and rewritten after every upsert through a temporary
/// file and a rename, so a crash never leaves a half-written store.
pub struct FileShipmentRepository {
	path: PathBuf,
	document: Mutex<Option<StoreDocument>>,
}

impl FileShipmentRepository {
	pub fn new(path: PathBuf) -> Self {
		Self {
			path,
			document: Mutex::new(None),
		}
	}

	async fn load(&self) -> Result<StoreDocument, TrackingSyncError> {
		if !tokio::fs::try_exists(&self.path).await? {
			info!("No store at {:?}, starting empty", self.path);
			return Ok(StoreDocument::default());
		}
		let content = tokio::fs::read_to_string(&self.path).await?;
		let document: StoreDocument = serde_json::from_str(&content).map_err(|e| {
			TrackingSyncError::Store(format!("Failed to parse store {:?}: {}", self.path, e))
		})?;
		info!(
			"Loaded store from {:?}: {} packages, {} arrival records",
			self.path,
			document.packages.len(),
			document.arrivals.len()
		);
		Ok(document)
	}

	async fn persist(&self, document: &StoreDocument) -> Result<(), TrackingSyncError> {
		let content = serde_json::to_string_pretty(document)
			.map_err(|e| TrackingSyncError::Store(format!("Failed to serialize store: {}", e)))?;

		let mut temp_path = self.path.clone().into_os_string();
		temp_path.push(".tmp");
		tokio::fs::write(&temp_path, content).await?;
		tokio::fs::rename(&temp_path, &self.path).await?;
		Ok(())
	}

	/// Every arrival record currently held by the store.
	pub async fn arrivals(&self) -> Result<Vec<ShipmentRecord>, TrackingSyncError> {
		let mut guard = self.document.lock().await;
		if guard.is_none() {
			*guard = Some(self.load().await?);
		}
		Ok(guard.as_ref().map(|d| d.arrivals.clone()).unwrap_or_default())
	}
}

fn is_pending(record: Option<&ShipmentRecord>, context: &RunContext) -> bool {
	match record {
		None => true,
		Some(record) if record.delivered => false,
		Some(record) => context.recheck_today || record.last_checked.date() < context.today,
	}
}

#[async_trait::async_trait]
impl ShipmentRepository for FileShipmentRepository {
	async fn query_pending(&self, context: &RunContext) -> Result<Vec<PendingPackage>, TrackingSyncError> {
		let mut guard = self.document.lock().await;
		if guard.is_none() {
			*guard = Some(self.load().await?);
		}
		let Some(document) = guard.as_ref() else {
			return Ok(Vec::new());
		};

		let pending: Vec<PendingPackage> = document
			.packages
			.iter()
			.filter(|package| {
				package.company_id == context.company_id
					&& package.shipped_method == context.shipped_method
					&& context.window.contains(package.completion_date)
			})
			.filter_map(|package| {
				let numbers = split_tracking_numbers(&package.tracking_number)
					.into_iter()
					.filter(|number| is_pending(document.arrival(package.package_shipment_id, number), context))
					.join(";");
				if numbers.is_empty() {
					None
				} else {
					Some(PendingPackage {
						package_shipment_id: package.package_shipment_id,
						tracking_number: numbers,
					})
				}
			})
			.collect();

		debug!(
			"{} pending packages for company {} / {}",
			pending.len(),
			context.company_id,
			context.shipped_method
		);
		Ok(pending)
	}

	async fn upsert(&self, update: &ShipmentUpdate) -> Result<(), TrackingSyncError> {
		let mut guard = self.document.lock().await;
		if guard.is_none() {
			*guard = Some(self.load().await?);
		}
		let Some(document) = guard.as_mut() else {
			return Err(TrackingSyncError::Store("Store document not loaded".to_string()));
		};

		let record = ShipmentRecord::from(update.clone());
		let existing = document.arrivals.iter().position(|r| {
			r.package_shipment_id == update.package_shipment_id && r.tracking_number == update.tracking_number
		});
		match existing {
			Some(index) => document.arrivals[index] = record,
			None => document.arrivals.push(record),
		}

		self.persist(document).await?;
		debug!(
			"Upserted arrival for package {} / {}",
			update.package_shipment_id, update.tracking_number
		);
		Ok(())
	}
}
