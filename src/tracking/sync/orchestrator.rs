//! Update orchestrator and integration point for all sync services.
//!
//! This module defines the `UpdateOrchestrator`, which drives the incremental sync of the
//! shipment store. For every configured group it:
//! - Resolves the carrier from the shipped method (all groups are resolved before any I/O)
//! - Queries the store for pending packages and expands multi-number packages
//! - Selects a strategy for the carrier (batch windows for DHL, per-package otherwise)
//! - Records every outcome as an upsert or a summary error, and accumulates group totals
//!
//! Per-item failures never abort a group. Exhausted retries and store failures abort the run.

use crate::carrier::{ActivityScope, BatchCarrierClient, Carrier, CarrierClient, DeliveryVitals, History};
use crate::tracking::sync::{
    progress_tracker::SyncProgressTracker,
    repositories::ShipmentRepository,
    retry::{RetryError, RetryPolicy},
    strategies::{BatchWindowSync, GroupRecorder, PerPackageSync, TrackingStrategy},
    summary::RunSummary,
};
use crate::tracking::{RunContext, SyncGroup, TrackingSyncError, expand_packages};

use chrono::NaiveDateTime;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Run-wide switches for the orchestrator
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncSettings {
    /// Include packages already checked today
    pub recheck_today: bool,
    /// Fetch and normalize without writing to the store
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

/// Registered carrier clients, keyed by the carrier they serve.
#[derive(Default, Clone)]
pub struct CarrierClients {
    single: HashMap<Carrier, Arc<dyn CarrierClient>>,
    batch: HashMap<Carrier, Arc<dyn BatchCarrierClient>>,
}

impl CarrierClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client used one tracking number at a time.
    pub fn with_client(mut self, client: Arc<dyn CarrierClient>) -> Self {
        self.single.insert(client.carrier(), client);
        self
    }

    /// Register a client used in batch windows. Takes precedence over a single client.
    pub fn with_batch_client(mut self, client: Arc<dyn BatchCarrierClient>) -> Self {
        self.batch.insert(client.carrier(), client);
        self
    }

    pub fn supports(&self, carrier: Carrier) -> bool {
        self.batch.contains_key(&carrier) || self.single.contains_key(&carrier)
    }

    fn strategy(&self, carrier: Carrier, retry: RetryPolicy) -> Option<Box<dyn TrackingStrategy>> {
        if let Some(client) = self.batch.get(&carrier) {
            return Some(Box::new(BatchWindowSync::new(client.clone(), retry)));
        }
        self.single
            .get(&carrier)
            .map(|client| Box::new(PerPackageSync::new(client.clone(), retry)) as Box<dyn TrackingStrategy>)
    }
}

/// Resolve the carrier of every group, failing on the first unrecognized shipped method.
pub fn resolve_carriers(groups: &[SyncGroup]) -> Result<Vec<Carrier>, TrackingSyncError> {
    groups
        .iter()
        .map(|group| {
            Carrier::from_shipped_method(&group.shipped_method)
                .ok_or_else(|| TrackingSyncError::UnrecognizedCarrier(group.shipped_method.clone()))
        })
        .collect()
}

/// Main update orchestrator that coordinates all sync components.
pub struct UpdateOrchestrator {
    clients: CarrierClients,
    repository: Arc<dyn ShipmentRepository>,
    settings: SyncSettings,
}

impl UpdateOrchestrator {
    /// Create a new orchestrator.
    ///
    /// # Arguments
    /// * `clients` - Carrier clients available to this run.
    /// * `repository` - The shipment store.
    /// * `settings` - Recheck, dry-run and retry settings.
    pub fn new(
        clients: CarrierClients,
        repository: Arc<dyn ShipmentRepository>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            clients,
            repository,
            settings,
        }
    }

    /// Sync every group in order and return the run summary.
    ///
    /// # Arguments
    /// * `groups` - Configured groups, processed in order.
    /// * `checked_at` - Local time of the run; its date drives the checked-today rule.
    ///
    /// # Errors
    /// `UnrecognizedCarrier` or `Config` before any network I/O, `RetriesExhausted` when a
    /// carrier stays unreachable, `Store`/`Io` when the store cannot be read or written.
    pub async fn run(
        &self,
        groups: &[SyncGroup],
        checked_at: NaiveDateTime,
    ) -> Result<RunSummary, TrackingSyncError> {
        let carriers = resolve_carriers(groups)?;
        if let Some(missing) = carriers.iter().find(|c| !self.clients.supports(**c)) {
            return Err(TrackingSyncError::Config(format!(
                "No client configured for carrier {}",
                missing
            )));
        }

        info!(
            "Starting tracking update for {} groups{}",
            groups.len(),
            if self.settings.dry_run { " (dry run)" } else { "" }
        );

        let mut summary = RunSummary::default();
        for (i, (group, carrier)) in groups.iter().zip(carriers).enumerate() {
            let context = RunContext::new(group, carrier, checked_at, self.settings.recheck_today);
            info!(
                "Group {} of {}: company {} / {} ({}), completed {} to {}",
                i + 1,
                groups.len(),
                context.company_id,
                context.shipped_method,
                carrier,
                context.window.start,
                context.window.end
            );

            let pending = self.repository.query_pending(&context).await?;
            let queries = expand_packages(&pending, carrier);
            info!(
                "Retrieved {} pending packages, {} tracking entries",
                pending.len(),
                queries.len()
            );

            let strategy = self.clients.strategy(carrier, self.settings.retry).ok_or_else(|| {
                TrackingSyncError::Config(format!("No client configured for carrier {}", carrier))
            })?;
            let progress = SyncProgressTracker::new(
                format!("{} / {}", context.company_id, context.shipped_method),
                queries.len(),
            );
            let mut recorder = GroupRecorder::new(
                self.repository.as_ref(),
                &mut summary,
                progress,
                self.settings.dry_run,
            );

            info!("Using {} for {}", strategy.name(), carrier);
            strategy.sync(&context, &queries, &mut recorder).await?;

            let stats = recorder.finish();
            summary.record_total(&context, queries.len(), stats.updated, stats.failed);
            info!(
                "Completed company {} / {}: {}",
                context.company_id,
                context.shipped_method,
                stats.summary()
            );
        }

        if !summary.errors.is_empty() {
            warn!("{} entries were not updated", summary.errors.len());
        }
        Ok(summary)
    }

    /// Look up one tracking number outside any group: current vitals and full history.
    pub async fn lookup(
        &self,
        shipped_method: &str,
        tracking_number: &str,
    ) -> Result<(DeliveryVitals, History), TrackingSyncError> {
        let carrier = Carrier::from_shipped_method(shipped_method)
            .ok_or_else(|| TrackingSyncError::UnrecognizedCarrier(shipped_method.to_string()))?;
        let retry = &self.settings.retry;
        if let Some(client) = self.clients.single.get(&carrier) {
            return lookup_with(client.as_ref(), carrier, retry, tracking_number).await;
        }
        if let Some(client) = self.clients.batch.get(&carrier) {
            return lookup_with(client.as_ref(), carrier, retry, tracking_number).await;
        }
        Err(TrackingSyncError::Config(format!(
            "No client configured for carrier {}",
            carrier
        )))
    }
}

async fn lookup_with<C>(
    client: &C,
    carrier: Carrier,
    retry: &RetryPolicy,
    tracking_number: &str,
) -> Result<(DeliveryVitals, History), TrackingSyncError>
where
    C: CarrierClient + ?Sized,
{
    let mut payloads = Vec::with_capacity(2);
    for scope in [ActivityScope::Latest, ActivityScope::Full] {
        let label = format!("{} {:?} lookup of {}", carrier, scope, tracking_number);
        let result = retry
            .run(&label, move || client.fetch_raw(tracking_number, scope))
            .await;
        match result {
            Ok(raw) => payloads.push(raw),
            Err(RetryError::Permanent(e)) => return Err(TrackingSyncError::Carrier(e)),
            Err(RetryError::Exhausted { attempts, last }) => {
                return Err(TrackingSyncError::RetriesExhausted {
                    operation: label,
                    attempts,
                    source: last,
                });
            }
        }
    }

    let vitals = carrier.parse_vitals(&payloads[0])?;
    let history = carrier.parse_history(&payloads[1])?;
    Ok((vitals, history))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{CarrierError, RawCarrierResponse};
    use crate::tracking::sync::repositories::{FileShipmentRepository, StoreDocument};
    use crate::tracking::{DateWindow, PackageShipment};
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const DHL_METHOD: &str = "DHL SM Parcel Plus Expedited";

    fn checked_at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 3, 31)
            .and_then(|d| d.and_hms_opt(6, 0, 0))
            .unwrap()
    }

    fn group(shipped_method: &str) -> SyncGroup {
        SyncGroup {
            company_id: 507,
            shipped_method: shipped_method.to_string(),
            window: DateWindow::days_ago(checked_at().date(), 30),
        }
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            recheck_today: false,
            dry_run: false,
            retry: RetryPolicy::new(5, Duration::ZERO),
        }
    }

    fn mail_item(number: &str) -> Value {
        json!({
            "mail": {"dspNumber": number},
            "events": [{"date": "2020-03-30", "time": "10:00:00", "description": "DELIVERED", "location": "Austin, TX"}]
        })
    }

    fn dhl_reply(numbers: &[String]) -> Value {
        let items: Vec<Value> = numbers.iter().map(|n| mail_item(n)).collect();
        json!({"meta": {"code": 200}, "data": {"mailItems": items}})
    }

    async fn store(dir: &tempfile::TempDir, tracking_numbers: &[&str]) -> Arc<FileShipmentRepository> {
        let packages = tracking_numbers
            .iter()
            .enumerate()
            .map(|(i, number)| PackageShipment {
                package_shipment_id: 1000 + i as u64,
                tracking_number: number.to_string(),
                company_id: 507,
                shipped_method: DHL_METHOD.to_string(),
                completion_date: NaiveDate::from_ymd_opt(2020, 3, 15).unwrap(),
            })
            .collect();
        let path = dir.path().join("store.json");
        let document = StoreDocument {
            packages,
            arrivals: Vec::new(),
        };
        tokio::fs::write(&path, serde_json::to_string(&document).unwrap())
            .await
            .unwrap();
        Arc::new(FileShipmentRepository::new(path))
    }

    /// DHL stand-in that fails one whole window and answers the others.
    struct StubBatchClient {
        window_sizes: Mutex<Vec<usize>>,
        failing_window: usize,
        single_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl CarrierClient for StubBatchClient {
        async fn fetch_raw(&self, tracking_number: &str, _scope: ActivityScope) -> Result<RawCarrierResponse, CarrierError> {
            self.single_calls.fetch_add(1, Ordering::SeqCst);
            Ok(dhl_reply(&[tracking_number.to_string()]))
        }

        fn carrier(&self) -> Carrier {
            Carrier::Dhl
        }
    }

    #[async_trait::async_trait]
    impl BatchCarrierClient for StubBatchClient {
        async fn fetch_batch(&self, tracking_numbers: &[String]) -> Result<RawCarrierResponse, CarrierError> {
            let call = {
                let mut sizes = self.window_sizes.lock().unwrap();
                sizes.push(tracking_numbers.len());
                sizes.len()
            };
            if call == self.failing_window {
                return Err(CarrierError::bad_response("DHL HTTP error: 500 Internal Server Error"));
            }
            Ok(dhl_reply(tracking_numbers))
        }

        fn max_batch_size(&self) -> usize {
            10
        }
    }

    /// Single-number stand-in answering with DHL-shaped payloads.
    struct StubClient {
        transient_failures: usize,
        calls: AtomicUsize,
    }

    impl StubClient {
        fn new(transient_failures: usize) -> Self {
            Self {
                transient_failures,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl CarrierClient for StubClient {
        async fn fetch_raw(&self, tracking_number: &str, _scope: ActivityScope) -> Result<RawCarrierResponse, CarrierError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call <= self.transient_failures {
                return Err(CarrierError::Transient("operation timed out".to_string()));
            }
            match tracking_number {
                "BAD" => Err(CarrierError::bad_response("JSON parse error: EOF")),
                "UNKNOWN" => Ok(json!({
                    "meta": {"code": 400, "error": [{"error_message": "No mail items found"}]}
                })),
                number => Ok(dhl_reply(&[number.to_string()])),
            }
        }

        fn carrier(&self) -> Carrier {
            Carrier::Dhl
        }
    }

    #[tokio::test]
    async fn failed_window_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let numbers: Vec<String> = (0..23).map(|i| format!("GM{:04}", i)).collect();
        let refs: Vec<&str> = numbers.iter().map(String::as_str).collect();
        let repository = store(&dir, &refs).await;
        let client = Arc::new(StubBatchClient {
            window_sizes: Mutex::new(Vec::new()),
            failing_window: 2,
            single_calls: AtomicUsize::new(0),
        });

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_batch_client(client.clone()),
            repository.clone(),
            settings(),
        );
        let summary = orchestrator.run(&[group(DHL_METHOD)], checked_at()).await.unwrap();

        assert_eq!(*client.window_sizes.lock().unwrap(), vec![10, 10, 3]);
        assert_eq!(client.single_calls.load(Ordering::SeqCst), 0);

        let failed: Vec<&str> = summary.errors.iter().map(|e| e.tracking_number.as_str()).collect();
        assert_eq!(failed, refs[10..20].to_vec());

        let arrivals = repository.arrivals().await.unwrap();
        assert_eq!(arrivals.len(), 13);
        assert!(arrivals.iter().all(|a| a.delivered && a.message == "DELIVERED at Austin, TX"));

        assert_eq!(summary.totals.len(), 1);
        assert_eq!(summary.totals[0].count, 23);
        assert_eq!(summary.totals[0].updated, 13);
        assert_eq!(summary.totals[0].failed, 10);
    }

    #[tokio::test]
    async fn failed_entries_are_summarized_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let repository = store(&dir, &["GM1;GM2", "BAD", "UNKNOWN"]).await;
        let client = Arc::new(StubClient::new(0));

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(client.clone()),
            repository.clone(),
            settings(),
        );
        let summary = orchestrator.run(&[group(DHL_METHOD)], checked_at()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 4);
        assert_eq!(summary.totals[0].count, 4);

        let arrivals = repository.arrivals().await.unwrap();
        let written: Vec<(u64, &str)> = arrivals
            .iter()
            .map(|a| (a.package_shipment_id, a.tracking_number.as_str()))
            .collect();
        assert_eq!(written, vec![(1000, "GM1"), (1000, "GM2")]);

        let failed: Vec<&str> = summary.errors.iter().map(|e| e.tracking_number.as_str()).collect();
        assert_eq!(failed, vec!["BAD", "UNKNOWN"]);
        assert_eq!(summary.errors[1].reason, "Carrier reported: No mail items found");
    }

    #[tokio::test]
    async fn transient_failures_within_limit_recover() {
        let dir = tempfile::tempdir().unwrap();
        let repository = store(&dir, &["GM1"]).await;
        let client = Arc::new(StubClient::new(4));

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(client.clone()),
            repository.clone(),
            settings(),
        );
        let summary = orchestrator.run(&[group(DHL_METHOD)], checked_at()).await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
        assert!(summary.errors.is_empty());
        assert_eq!(repository.arrivals().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn exhausted_retries_abort_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let repository = store(&dir, &["GM1", "GM2"]).await;
        let client = Arc::new(StubClient::new(5));

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(client.clone()),
            repository.clone(),
            settings(),
        );
        let result = orchestrator.run(&[group(DHL_METHOD)], checked_at()).await;

        assert!(matches!(
            result,
            Err(TrackingSyncError::RetriesExhausted { attempts: 5, .. })
        ));
        assert_eq!(client.calls.load(Ordering::SeqCst), 5);
        assert!(repository.arrivals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unrecognized_carrier_fails_before_any_call() {
        let dir = tempfile::tempdir().unwrap();
        let repository = store(&dir, &["GM1"]).await;
        let client = Arc::new(StubClient::new(0));

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(client.clone()),
            repository,
            settings(),
        );
        let result = orchestrator
            .run(&[group(DHL_METHOD), group("OnTrac Ground")], checked_at())
            .await;

        assert!(matches!(result, Err(TrackingSyncError::UnrecognizedCarrier(m)) if m == "OnTrac Ground"));
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dry_run_leaves_store_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let repository = store(&dir, &["GM1", "GM2"]).await;
        let client = Arc::new(StubClient::new(0));

        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(client),
            repository.clone(),
            SyncSettings {
                dry_run: true,
                ..settings()
            },
        );
        let summary = orchestrator.run(&[group(DHL_METHOD)], checked_at()).await.unwrap();

        assert_eq!(summary.totals[0].updated, 2);
        assert!(repository.arrivals().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn lookup_returns_vitals_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = UpdateOrchestrator::new(
            CarrierClients::new().with_client(Arc::new(StubClient::new(0))),
            store(&dir, &[]).await,
            settings(),
        );
        let (vitals, history) = orchestrator.lookup(DHL_METHOD, "GM1").await.unwrap();
        assert!(vitals.delivered);
        assert_eq!(history.last(), Some(&crate::carrier::DeliveryEvent::from(&vitals)));
    }
}
