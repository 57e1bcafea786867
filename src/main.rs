use std::sync::Arc;

use tracing::info;

use roombook::calendar::HoldBook;
use roombook::config::Config;
use roombook::model::ReservationState;
use roombook::notify::NotifyHub;
use roombook::ports::{Ports, Repository};
use roombook::store::JournalRepository;
use roombook::sweep;
use roombook::validation::RoomConflictValidator;

/// One maintenance pass: expire overdue requests, then compact the journal
/// if enough has been appended. Run it from cron or a systemd timer.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let config = Config::from_env();
    std::fs::create_dir_all(&config.data_dir)?;

    let journal_path = config.journal_path();
    let repository = Arc::new(JournalRepository::open(&journal_path, config.journal_queue)?);
    info!("roombook maintenance pass");
    info!("  journal: {}", journal_path.display());
    info!("  reservations: {}", repository.len());

    // Only live reservations hold calendar windows.
    let mut live = repository
        .find_by_state(ReservationState::AwaitingApproval)
        .await?;
    live.extend(repository.find_by_state(ReservationState::Accepted).await?);
    let calendar = Arc::new(HoldBook::from_records(&live));

    let ports = Ports {
        repository: repository.clone(),
        calendar,
        notifier: Arc::new(NotifyHub::new(config.notify_capacity)),
        validator: Arc::new(RoomConflictValidator::new(repository.clone())),
    };

    let report = sweep::expire_overdue(&ports, sweep::now_ms()).await?;
    info!(
        "sweep: {} expired, {} skipped, {} failed",
        report.expired.len(),
        report.skipped.len(),
        report.failed.len()
    );
    for (id, reason) in &report.failed {
        tracing::warn!("could not expire {id}: {reason}");
    }

    let appended = repository.appends_since_compact().await;
    if appended >= config.compact_threshold {
        repository.compact().await?;
        info!("journal compacted after {appended} appends");
    }

    Ok(())
}
