use crate::carrier::{ActivityScope, BatchCarrierClient, CarrierClient, CarrierError, DeliveryVitals};
use crate::tracking::sync::batch::BatchWindower;
use crate::tracking::sync::progress_tracker::{SyncProgressTracker, SyncStats};
use crate::tracking::sync::repositories::ShipmentRepository;
use crate::tracking::sync::retry::{RetryError, RetryPolicy};
use crate::tracking::sync::summary::RunSummary;
use crate::tracking::{RunContext, ShipmentUpdate, TrackingQuery, TrackingSyncError};
use std::fmt::Display;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Trait for different per-group synchronization strategies
#[async_trait::async_trait]
pub trait TrackingStrategy: Send + Sync {
	/// Look up every query of the group and hand each outcome to the recorder
	async fn sync(
		&self,
		context: &RunContext,
		queries: &[TrackingQuery],
		recorder: &mut GroupRecorder<'_>,
	) -> Result<(), TrackingSyncError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Writes outcomes of one group to the store, the run summary and the progress log.
pub struct GroupRecorder<'a> {
	repository: &'a dyn ShipmentRepository,
	summary: &'a mut RunSummary,
	progress: SyncProgressTracker,
	dry_run: bool,
}

impl<'a> GroupRecorder<'a> {
	pub fn new(
		repository: &'a dyn ShipmentRepository,
		summary: &'a mut RunSummary,
		progress: SyncProgressTracker,
		dry_run: bool,
	) -> Self {
		Self {
			repository,
			summary,
			progress,
			dry_run,
		}
	}

	/// Persist normalized vitals, or record them as an error when the carrier reported one.
	pub async fn record_vitals(
		&mut self,
		context: &RunContext,
		query: &TrackingQuery,
		vitals: &DeliveryVitals,
	) -> Result<(), TrackingSyncError> {
		if vitals.carrier_error {
			self.record_failure(context, query, format!("Carrier reported: {}", vitals.message));
			return Ok(());
		}

		let update = ShipmentUpdate::from_vitals(context, query, vitals);
		if self.dry_run {
			info!(
				"Dry run, not writing {} / {}: {}",
				update.package_shipment_id, update.tracking_number, update.message
			);
		} else {
			self.repository.upsert(&update).await?;
		}
		debug!(
			"Package {} / {} delivered={} '{}'",
			query.package_shipment_id, query.tracking_number, vitals.delivered, update.message
		);

		self.progress.record_updated(vitals.delivered);
		self.progress.log_progress(false);
		Ok(())
	}

	/// Record an entry that will not be written this run.
	pub fn record_failure(&mut self, context: &RunContext, query: &TrackingQuery, reason: impl Display) {
		let reason = reason.to_string();
		warn!(
			"Not updating package {} / {}: {}",
			query.package_shipment_id, query.tracking_number, reason
		);
		self.summary.record_error(context, query, reason);
		self.progress.record_failed();
		self.progress.log_progress(false);
	}

	/// Log final progress and return the group statistics.
	pub fn finish(mut self) -> SyncStats {
		self.progress.log_progress(true);
		self.progress.get_stats()
	}
}

/// Fetch and normalize the latest vitals of one query.
///
/// The outer error is fatal for the run (retries exhausted); the inner one belongs to the item.
async fn track_one<C>(
	client: &C,
	retry: &RetryPolicy,
	context: &RunContext,
	query: &TrackingQuery,
) -> Result<Result<DeliveryVitals, CarrierError>, TrackingSyncError>
where
	C: CarrierClient + ?Sized,
{
	let number = query.tracking_number.as_str();
	let label = format!("{} lookup of {}", context.carrier, number);

	let result = retry
		.run(&label, move || client.fetch_raw(number, ActivityScope::Latest))
		.await;
	match result {
		Ok(raw) => Ok(context.carrier.parse_vitals(&raw)),
		Err(RetryError::Permanent(e)) => Ok(Err(e)),
		Err(RetryError::Exhausted { attempts, last }) => Err(TrackingSyncError::RetriesExhausted {
			operation: label,
			attempts,
			source: last,
		}),
	}
}

/// Strategy that looks up one tracking number per call
pub struct PerPackageSync {
	client: Arc<dyn CarrierClient>,
	retry: RetryPolicy,
}

impl PerPackageSync {
	pub fn new(client: Arc<dyn CarrierClient>, retry: RetryPolicy) -> Self {
		Self { client, retry }
	}
}

#[async_trait::async_trait]
impl TrackingStrategy for PerPackageSync {
	async fn sync(
		&self,
		context: &RunContext,
		queries: &[TrackingQuery],
		recorder: &mut GroupRecorder<'_>,
	) -> Result<(), TrackingSyncError> {
		info!(
			"Starting per-package sync of {} entries for company {} / {}",
			queries.len(),
			context.company_id,
			context.shipped_method
		);

		for (i, query) in queries.iter().enumerate() {
			debug!(
				"Entry {} of {}: package {} / {}",
				i + 1,
				queries.len(),
				query.package_shipment_id,
				query.tracking_number
			);

			match track_one(self.client.as_ref(), &self.retry, context, query).await? {
				Ok(vitals) => recorder.record_vitals(context, query, &vitals).await?,
				Err(e) => recorder.record_failure(context, query, e),
			}
		}

		Ok(())
	}

	fn name(&self) -> &'static str {
		"PerPackageSync"
	}
}

/// Strategy that looks up tracking numbers in bounded windows
///
/// A window that fails as a whole records every entry of that window as an error and the
/// sync moves on to the next window. Entries a successful reply does not mention are looked
/// up one at a time.
pub struct BatchWindowSync {
	client: Arc<dyn BatchCarrierClient>,
	windower: BatchWindower,
	retry: RetryPolicy,
}

impl BatchWindowSync {
	pub fn new(client: Arc<dyn BatchCarrierClient>, retry: RetryPolicy) -> Self {
		let windower = BatchWindower::new(client.max_batch_size());
		Self {
			client,
			windower,
			retry,
		}
	}
}

#[async_trait::async_trait]
impl TrackingStrategy for BatchWindowSync {
	async fn sync(
		&self,
		context: &RunContext,
		queries: &[TrackingQuery],
		recorder: &mut GroupRecorder<'_>,
	) -> Result<(), TrackingSyncError> {
		let window_count = queries.len().div_ceil(self.windower.window_size());
		info!(
			"Starting batch sync of {} entries in {} windows for company {} / {}",
			queries.len(),
			window_count,
			context.company_id,
			context.shipped_method
		);

		for (n, window) in self.windower.windows(queries).enumerate() {
			let numbers: Vec<String> = window.iter().map(|q| q.tracking_number.clone()).collect();
			let label = format!("{} window {} of {}", context.carrier, n + 1, window_count);
			info!("{}: {} numbers", label, numbers.len());

			let client = self.client.as_ref();
			let submitted = numbers.as_slice();
			let result = self
				.retry
				.run(&label, move || client.fetch_batch(submitted))
				.await;

			let raw = match result {
				Ok(raw) => raw,
				Err(RetryError::Permanent(e)) => {
					warn!("{} failed as a whole: {}", label, e);
					for query in window {
						recorder.record_failure(context, query, format!("Batch window failed: {}", e));
					}
					continue;
				}
				Err(RetryError::Exhausted { attempts, last }) => {
					return Err(TrackingSyncError::RetriesExhausted {
						operation: label,
						attempts,
						source: last,
					});
				}
			};

			let outcome = self.windower.fan_out(window, &raw);
			for (query, vitals) in &outcome.resolved {
				match vitals {
					Ok(vitals) => recorder.record_vitals(context, query, vitals).await?,
					Err(e) => recorder.record_failure(context, query, e),
				}
			}

			if !outcome.unresolved.is_empty() {
				info!(
					"{}: {} numbers missing from reply, looking up individually",
					label,
					outcome.unresolved.len()
				);
			}
			for query in &outcome.unresolved {
				match track_one(client, &self.retry, context, query).await? {
					Ok(vitals) => recorder.record_vitals(context, query, &vitals).await?,
					Err(e) => recorder.record_failure(context, query, e),
				}
			}
		}

		Ok(())
	}

	fn name(&self) -> &'static str {
		"BatchWindowSync"
	}
}
