use crate::{error::CacheError, store::Store};
use model::{Host, ProbeResult};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, MutexGuard};

/// One host and its latest successful result, if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub host: Host,
    pub last: Option<ProbeResult>,
}

struct CacheState {
    entries: Vec<CacheEntry>,
    index: HashMap<i64, usize>,
}

/// In-memory index of the latest successful result per host, kept in step with the
/// [`Store`].
///
/// A single lock serializes warm-up, reads and writes. Writes persist first
/// and touch memory only once the store accepted the batch, so memory is
/// never ahead of the store.
pub struct Cache {
    store: Arc<dyn Store>,
    state: Mutex<Option<CacheState>>,
}

impl Cache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            state: Mutex::new(None),
        }
    }

    /// (Re)builds the index from the store.
    ///
    /// Every known host gets a slot, seeded with its latest successful stored
    /// result. On failure the previous state is kept.
    pub async fn warm_up(&self) -> Result<(), CacheError> {
        let mut state = self.state.lock().await;
        *state = Some(self.load().await?);
        Ok(())
    }

    /// Snapshot of every host in warm-up order.
    pub async fn read(&self) -> Result<Vec<CacheEntry>, CacheError> {
        let guard = self.lock_loaded().await?;
        let state = guard.as_ref().ok_or(CacheError::Uninitialized)?;
        Ok(state.entries.clone())
    }

    /// Persists `batch` and records each successful result as its host's
    /// latest.
    ///
    /// The batch is rejected whole if any host id is unknown or any rtt does
    /// not fit the store. Failed results are stored but leave the slot alone.
    /// Within a batch the later successful result for a host wins.
    pub async fn write(&self, batch: &[ProbeResult]) -> Result<(), CacheError> {
        let mut guard = self.lock_loaded().await?;
        let state = guard.as_mut().ok_or(CacheError::Uninitialized)?;

        let slots = batch
            .iter()
            .map(|result| {
                if i64::try_from(result.rtt.as_nanos()).is_err() {
                    return Err(CacheError::RttOutOfRange(result.host_id));
                }
                state
                    .index
                    .get(&result.host_id)
                    .copied()
                    .ok_or(CacheError::UnknownHost(result.host_id))
            })
            .collect::<Result<Vec<_>, _>>()?;

        if batch.is_empty() {
            return Ok(());
        }

        self.store
            .append_results(batch)
            .await
            .map_err(CacheError::Store)?;

        for (slot, result) in slots.into_iter().zip(batch) {
            if result.success {
                state.entries[slot].last = Some(result.clone());
            }
        }
        tracing::debug!("Cached {} results", batch.len());
        Ok(())
    }

    // Locks the state, warming up first if nothing is loaded yet.
    async fn lock_loaded(&self) -> Result<MutexGuard<'_, Option<CacheState>>, CacheError> {
        let mut state = self.state.lock().await;
        if state.is_none() {
            tracing::info!("Cache is cold, warming up");
            *state = Some(self.load().await?);
        }
        Ok(state)
    }

    async fn load(&self) -> Result<CacheState, CacheError> {
        let hosts = self.store.list_hosts().await.map_err(CacheError::Store)?;
        let last_results = self
            .store
            .load_last_results()
            .await
            .map_err(CacheError::Store)?;

        let mut entries: Vec<CacheEntry> = hosts
            .into_iter()
            .map(|host| CacheEntry { host, last: None })
            .collect();
        let index: HashMap<i64, usize> = entries
            .iter()
            .enumerate()
            .map(|(slot, entry)| (entry.host.id, slot))
            .collect();

        for result in last_results {
            match index.get(&result.host_id) {
                Some(&slot) => entries[slot].last = Some(result),
                None => tracing::warn!("Ignoring stored result of unknown host {}", result.host_id),
            }
        }

        tracing::info!("Cache warmed up with {} hosts", entries.len());
        Ok(CacheState { entries, index })
    }
}
