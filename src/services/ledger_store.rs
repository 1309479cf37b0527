use crate::modules::invite_tracking::ledger::{JoinEvent, Ledger, RemoteInvite, SyncSummary};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to access ledger file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("ledger file {} is not valid JSON", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode ledger")]
    Encode(#[from] serde_json::Error),
}

/// The invite ledger, loaded once and written back after every change.
///
/// Every read-modify-write happens under one lock, so events dispatched on
/// different tasks can't interleave their updates or their file writes.
pub struct LedgerStore {
    path: PathBuf,
    ledger: Mutex<Ledger>,
}

impl LedgerStore {
    /// Loads the ledger at `path`. A missing file is an empty ledger.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();

        let ledger = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
                path: path.clone(),
                source,
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No ledger at {}, starting empty", path.display());
                Ledger::default()
            }
            Err(source) => return Err(StoreError::Io { path, source }),
        };

        Ok(Self {
            path,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs a read-only query against the current ledger.
    pub async fn read<T>(&self, f: impl FnOnce(&Ledger) -> T) -> T {
        let ledger = self.ledger.lock().await;
        f(&ledger)
    }

    pub async fn sync_guild(
        &self,
        guild_id: u64,
        remote: &[RemoteInvite],
    ) -> Result<SyncSummary, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let summary = ledger.sync_guild(guild_id, remote);
        self.persist(&ledger).await?;
        Ok(summary)
    }

    pub async fn record_join(
        &self,
        guild_id: u64,
        member: JoinEvent,
        remote: &[RemoteInvite],
    ) -> Result<Option<String>, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let matched = ledger.record_join(guild_id, member, remote);
        if matched.is_some() {
            self.persist(&ledger).await?;
        }
        Ok(matched)
    }

    pub async fn track_invite(
        &self,
        guild_id: u64,
        code: &str,
        creator: u64,
    ) -> Result<(), StoreError> {
        let mut ledger = self.ledger.lock().await;
        ledger.track_invite(guild_id, code, creator);
        self.persist(&ledger).await
    }

    pub async fn observe_invite(
        &self,
        guild_id: u64,
        invite: &RemoteInvite,
    ) -> Result<bool, StoreError> {
        let mut ledger = self.ledger.lock().await;
        let added = ledger.observe_invite(guild_id, invite);
        if added {
            self.persist(&ledger).await?;
        }
        Ok(added)
    }

    /// Writes the whole ledger next to the target and renames it into place.
    async fn persist(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        ledger.serialize(&mut serializer)?;

        let tmp = self.tmp_path();
        tokio::fs::write(&tmp, &buf)
            .await
            .map_err(|source| StoreError::Io {
                path: tmp.clone(),
                source,
            })?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;

        debug!("Persisted ledger to {} ({} bytes)", self.path.display(), buf.len());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        PathBuf::from(tmp)
    }
}
