use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

use super::memory::Tables;
use super::{ReservationStore, StorageError};

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

/// The whole batch commits or none of it stays in the log.
fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    wal.commit(batch.iter().map(|(event, _)| event))
}

fn respond_batch(batch: Vec<PendingAppend>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let _ = response.send(wal.commit([&event]));
        }
    }
}

/// Durable store: tables replayed from an append-only log on open, every
/// change written to the log before it is applied.
pub struct WalStore {
    tables: Tables,
    wal_tx: mpsc::Sender<WalCommand>,
    path: PathBuf,
    /// Mutations hold it shared across append + apply; compaction holds it
    /// exclusively so the snapshot it writes cannot miss an in-flight append.
    compaction_gate: RwLock<()>,
}

impl WalStore {
    /// Replay `path` and start the writer task. Must run inside a tokio runtime.
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        let (wal, events) = Wal::recover(path).map_err(wal_error)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let tables = Tables::default();
        for event in &events {
            tables.apply(event);
        }
        info!("opened WAL {} ({} events replayed)", path.display(), events.len());

        Ok(Self {
            tables,
            wal_tx,
            path: path.to_path_buf(),
            compaction_gate: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StorageError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StorageError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StorageError::Wal("WAL writer dropped response".into()))?
            .map_err(wal_error)
    }

    /// Log first, apply only once the log write is confirmed.
    async fn persist_and_apply(&self, event: &Event) -> Result<(), StorageError> {
        let _gate = self.compaction_gate.read().await;
        self.wal_append(event).await?;
        self.tables.apply(event);
        Ok(())
    }

    /// Rewrite the log as the minimal event set for the current state.
    pub async fn compact(&self) -> Result<(), StorageError> {
        let _gate = self.compaction_gate.write().await;
        let events = self.tables.snapshot();
        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StorageError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StorageError::Wal("WAL writer dropped response".into()))?
            .map_err(wal_error)?;
        info!("compacted WAL {} to {count} events", self.path.display());
        Ok(())
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn wal_error(e: io::Error) -> StorageError {
    StorageError::Wal(e.to_string())
}

#[async_trait]
impl ReservationStore for WalStore {
    async fn load_devices(&self) -> Result<Vec<Device>, StorageError> {
        Ok(self.tables.devices())
    }

    async fn append_device(&self, name: String) -> Result<Device, StorageError> {
        let (event, device) = self.tables.device_created(name);
        self.persist_and_apply(&event).await?;
        Ok(device)
    }

    async fn rename_device(&self, id: Ulid, name: String) -> Result<Device, StorageError> {
        let event = self.tables.device_renamed(id, name)?;
        self.persist_and_apply(&event).await?;
        self.tables.device(&id).ok_or(StorageError::MissingDevice(id))
    }

    async fn load_reservations(&self, device_id: Ulid) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.tables.reservations_for(&device_id))
    }

    async fn load_reservations_for_month(
        &self,
        year: i32,
        month: u32,
    ) -> Result<Vec<Reservation>, StorageError> {
        Ok(self.tables.reservations_for_month(year, month))
    }

    async fn append_reservation(&self, new: NewReservation) -> Result<Reservation, StorageError> {
        let (event, reservation) = self.tables.reservation_confirmed(&new)?;
        self.persist_and_apply(&event).await?;
        Ok(reservation)
    }

    async fn find_reservation(&self, id: Ulid) -> Result<Option<Reservation>, StorageError> {
        Ok(self.tables.reservation(&id))
    }

    async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, StorageError> {
        let (event, reservation) = self.tables.reservation_cancelled(id)?;
        self.persist_and_apply(&event).await?;
        Ok(reservation)
    }
}
