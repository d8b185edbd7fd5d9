mod carrier;
mod config;
mod tracking;

use std::sync::Arc;
use tracing::{error, info};

use crate::carrier::Carrier;
use crate::config::RunConfig;
use crate::tracking::sync::repositories::FileShipmentRepository;
use crate::tracking::sync::resolve_carriers;
use crate::tracking::{TrackingSyncError, UpdateOrchestrator};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::from_default_env()
				.add_directive(tracing::Level::INFO.into()),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	let args: Vec<String> = std::env::args().skip(1).collect();
	let result = match args.as_slice() {
		[mode, shipped_method, tracking_number] if mode == "lookup" => {
			lookup(shipped_method, tracking_number).await
		}
		[] => run().await,
		_ => {
			error!("Usage: tracking-sync [lookup <shipped_method> <tracking_number>]");
			std::process::exit(2);
		}
	};

	if let Err(e) = result {
		error!("Tracking sync failed: {}", e);
		std::process::exit(1);
	}
}

async fn run() -> Result<(), TrackingSyncError> {
	let config = RunConfig::load(&RunConfig::path_from_env()).await?;

	let checked_at = chrono::Local::now().naive_local();
	let groups = config.groups(checked_at.date())?;
	let carriers = resolve_carriers(&groups)?;
	let clients = config.build_clients(&carriers)?;
	let repository = Arc::new(FileShipmentRepository::new(config.store_path.clone()));
	let settings = config.settings();

	info!(
		"Starting tracking sync of {} groups (recheck_today={}, dry_run={}, max_attempts={})",
		groups.len(),
		settings.recheck_today,
		settings.dry_run,
		settings.retry.max_attempts()
	);

	let orchestrator = UpdateOrchestrator::new(clients, repository.clone(), settings);
	let summary = orchestrator.run(&groups, checked_at).await?;

	info!("Run summary:\n{}", summary.summary());
	info!(
		"Store {:?} holds {} arrival records",
		config.store_path,
		repository.arrivals().await?.len()
	);
	if let Some(path) = &config.summary_path {
		summary.write_json(path).await?;
	}
	Ok(())
}

async fn lookup(shipped_method: &str, tracking_number: &str) -> Result<(), TrackingSyncError> {
	let config = RunConfig::load(&RunConfig::path_from_env()).await?;

	let carrier = Carrier::from_shipped_method(shipped_method)
		.ok_or_else(|| TrackingSyncError::UnrecognizedCarrier(shipped_method.to_string()))?;
	let clients = config.build_clients(&[carrier])?;
	let repository = Arc::new(FileShipmentRepository::new(config.store_path.clone()));

	let orchestrator = UpdateOrchestrator::new(clients, repository, config.settings());
	let (vitals, history) = orchestrator.lookup(shipped_method, tracking_number).await?;

	info!(
		"{} {}: {} (delivered={}, at {:?})",
		carrier,
		tracking_number,
		vitals.display_message(),
		vitals.delivered,
		vitals.timestamp
	);
	for (i, event) in history.iter().enumerate() {
		info!(
			"  {:>2}. {:?} {} {}",
			i + 1,
			event.timestamp,
			event.message,
			event.location.as_deref().unwrap_or("")
		);
	}
	Ok(())
}
