use std::thread;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch};
use shared::types::DeviceRecord;
use crate::store::db::{DeviceDb, Upserted};
use crate::store::{hash, StoreError, StoreResult};

type Reply<T> = oneshot::Sender<StoreResult<T>>;

/// Commands sent to the store thread
enum RegistryCommand {
    Upsert {
        hostname: String,
        address: String,
        reply: Reply<Upserted>,
    },
    Lookup {
        hostname: String,
        reply: Reply<Option<DeviceRecord>>,
    },
    ListHostnames(Reply<Vec<String>>),
    Remove {
        hostname: String,
        reply: Reply<bool>,
    },
    Shutdown,
}

impl RegistryCommand {
    /// Answer the caller with a timeout instead of running the command.
    fn expire(self, waited: Duration) {
        match self {
            RegistryCommand::Upsert { reply, .. } => {
                let _ = reply.send(Err(StoreError::Timeout(waited)));
            }
            RegistryCommand::Lookup { reply, .. } => {
                let _ = reply.send(Err(StoreError::Timeout(waited)));
            }
            RegistryCommand::ListHostnames(reply) => {
                let _ = reply.send(Err(StoreError::Timeout(waited)));
            }
            RegistryCommand::Remove { reply, .. } => {
                let _ = reply.send(Err(StoreError::Timeout(waited)));
            }
            RegistryCommand::Shutdown => {}
        }
    }
}

struct Envelope {
    /// The store thread drops commands it picks up after this instant.
    /// None when the timeout is too large to represent.
    deadline: Option<Instant>,
    command: RegistryCommand,
}

/// Handle to the registry store thread.
///
/// The thread owns the database connection and executes commands one at a
/// time in arrival order, which linearizes writes to the same hostname.
#[derive(Clone)]
pub struct RegistryHandle {
    tx: mpsc::Sender<Envelope>,
    acquire_timeout: Duration,
}

impl RegistryHandle {
    /// Spawn the store thread for `db`. Every call waits at most
    /// `acquire_timeout` for the thread to pick it up.
    pub fn spawn(
        mut db: DeviceDb,
        digest_tx: watch::Sender<String>,
        acquire_timeout: Duration,
    ) -> Self {
        let (tx, mut rx) = mpsc::channel::<Envelope>(256);

        let publish_digest = |db: &DeviceDb, digest_tx: &watch::Sender<String>| {
            match db.all_records() {
                Ok(records) => {
                    let _ = digest_tx.send(hash::compute_digest(&records));
                }
                Err(e) => tracing::warn!("Failed to recompute registry digest: {}", e),
            }
        };

        thread::spawn(move || {
            while let Some(Envelope { deadline, command }) = rx.blocking_recv() {
                match command {
                    RegistryCommand::Shutdown => {
                        tracing::info!("Registry store thread shutting down");
                        break;
                    }
                    command if deadline.is_some_and(|d| Instant::now() >= d) => {
                        tracing::warn!("Dropping registry command that waited past its deadline");
                        command.expire(acquire_timeout);
                    }
                    RegistryCommand::Upsert { hostname, address, reply } => {
                        let result = db.upsert(&hostname, &address);
                        if let Ok(upserted) = &result {
                            if let Some(prev) = &upserted.previous {
                                if upserted.address_changed() {
                                    tracing::info!(
                                        "Address changed: {} {} -> {}",
                                        hostname,
                                        prev.address,
                                        upserted.record.address
                                    );
                                }
                            }
                            if upserted.mapping_changed() {
                                publish_digest(&db, &digest_tx);
                            }
                        }
                        let _ = reply.send(result);
                    }
                    RegistryCommand::Lookup { hostname, reply } => {
                        let _ = reply.send(db.lookup(&hostname));
                    }
                    RegistryCommand::ListHostnames(reply) => {
                        let _ = reply.send(db.list_hostnames());
                    }
                    RegistryCommand::Remove { hostname, reply } => {
                        let result = db.remove(&hostname);
                        if matches!(&result, Ok(true)) {
                            publish_digest(&db, &digest_tx);
                        }
                        let _ = reply.send(result);
                    }
                }
            }
        });

        Self { tx, acquire_timeout }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> RegistryCommand,
    ) -> StoreResult<T> {
        let deadline = Instant::now().checked_add(self.acquire_timeout);
        let (reply, rx) = oneshot::channel();

        self.tx
            .send_timeout(
                Envelope { deadline, command: command(reply) },
                self.acquire_timeout,
            )
            .await
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => StoreError::Timeout(self.acquire_timeout),
                SendTimeoutError::Closed(_) => StoreError::Unavailable,
            })?;

        rx.await.map_err(|_| StoreError::Unavailable)?
    }

    /// Insert or replace the record for `hostname`
    pub async fn upsert(&self, hostname: String, address: String) -> StoreResult<Upserted> {
        self.request(|reply| RegistryCommand::Upsert { hostname, address, reply })
            .await
    }

    /// Get the record for `hostname`, if any
    pub async fn lookup(&self, hostname: String) -> StoreResult<Option<DeviceRecord>> {
        self.request(|reply| RegistryCommand::Lookup { hostname, reply })
            .await
    }

    /// All hostnames, ascending
    pub async fn list_hostnames(&self) -> StoreResult<Vec<String>> {
        self.request(RegistryCommand::ListHostnames).await
    }

    /// Remove the record for `hostname`. Returns false if there was none.
    pub async fn remove(&self, hostname: String) -> StoreResult<bool> {
        self.request(|reply| RegistryCommand::Remove { hostname, reply })
            .await
    }

    /// Stop the store thread once it has drained earlier commands
    pub async fn shutdown(&self) -> StoreResult<()> {
        self.tx
            .send(Envelope {
                deadline: None,
                command: RegistryCommand::Shutdown,
            })
            .await
            .map_err(|_| StoreError::Unavailable)
    }
}
