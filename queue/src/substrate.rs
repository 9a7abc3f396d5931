//! Durable key-value substrate behind the work queue.
//!
//! The queue stores one record per job keyed by the order id. Everything the
//! queue needs to survive a restart lives in the record; scheduling state
//! (the FIFO ring, timers) is rebuilt from a scan.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use uuid::Uuid;

use corelib::job::Job;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// In the FIFO, not yet picked up.
    Waiting,
    /// Handed to a handler.
    Active,
    /// Failed delivery, parked until `not_before_ms`.
    Delayed,
    Completed,
    Failed,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct JobRecord {
    pub job: Job,
    pub state: JobState,
    /// Deliveries attempted so far.
    pub attempts: u32,
    /// Earliest redelivery time for `Delayed` records.
    pub not_before_ms: u64,
    pub updated_ms: u64,
    pub last_error: Option<String>,
}

impl JobRecord {
    pub fn waiting(job: Job, now_ms: u64) -> Self {
        Self {
            job,
            state: JobState::Waiting,
            attempts: 0,
            not_before_ms: 0,
            updated_ms: now_ms,
            last_error: None,
        }
    }
}

/// Contract the durable store must satisfy. Keyed by the job (= order) id;
/// `put_if_absent` is what makes enqueue idempotent.
#[async_trait]
pub trait QueueSubstrate: Send + Sync {
    /// Returns false, changing nothing, when a record with this job id
    /// already exists.
    async fn put_if_absent(&self, record: &JobRecord) -> anyhow::Result<bool>;

    async fn update(&self, record: &JobRecord) -> anyhow::Result<()>;

    async fn get(&self, order_id: &Uuid) -> anyhow::Result<Option<JobRecord>>;

    async fn remove(&self, order_id: &Uuid) -> anyhow::Result<()>;

    async fn scan(&self) -> anyhow::Result<Vec<JobRecord>>;
}

/// In-process substrate; the default for `implementation = mock` runs and
/// for tests.
#[derive(Default)]
pub struct MemorySubstrate {
    map: Mutex<HashMap<Uuid, JobRecord>>,
}

impl MemorySubstrate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.map.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueSubstrate for MemorySubstrate {
    async fn put_if_absent(&self, record: &JobRecord) -> anyhow::Result<bool> {
        let mut map = self.map.lock();
        if map.contains_key(&record.job.order_id) {
            return Ok(false);
        }
        map.insert(record.job.order_id, record.clone());
        Ok(true)
    }

    async fn update(&self, record: &JobRecord) -> anyhow::Result<()> {
        self.map.lock().insert(record.job.order_id, record.clone());
        Ok(())
    }

    async fn get(&self, order_id: &Uuid) -> anyhow::Result<Option<JobRecord>> {
        Ok(self.map.lock().get(order_id).cloned())
    }

    async fn remove(&self, order_id: &Uuid) -> anyhow::Result<()> {
        self.map.lock().remove(order_id);
        Ok(())
    }

    async fn scan(&self) -> anyhow::Result<Vec<JobRecord>> {
        let mut records: Vec<_> = self.map.lock().values().cloned().collect();
        // Stable replay order for restart recovery.
        records.sort_by_key(|r| r.updated_ms);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mk_job(id: Uuid) -> Job {
        Job {
            order_id: id,
            token_in: "SOL".into(),
            token_out: "USDC".into(),
            amount_in: 1_000_000,
            slippage: 0.01,
            attempt: 0,
        }
    }

    #[tokio::test]
    async fn put_if_absent_deduplicates_on_job_id() {
        let substrate = MemorySubstrate::new();
        let id = Uuid::new_v4();

        assert!(
            substrate
                .put_if_absent(&JobRecord::waiting(mk_job(id), 1))
                .await
                .unwrap()
        );
        assert!(
            !substrate
                .put_if_absent(&JobRecord::waiting(mk_job(id), 2))
                .await
                .unwrap()
        );
        assert_eq!(substrate.len(), 1);
        // First write wins.
        assert_eq!(substrate.get(&id).await.unwrap().unwrap().updated_ms, 1);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let substrate = MemorySubstrate::new();
        let id = Uuid::new_v4();
        substrate
            .put_if_absent(&JobRecord::waiting(mk_job(id), 1))
            .await
            .unwrap();

        substrate.remove(&id).await.unwrap();
        substrate.remove(&id).await.unwrap();
        assert!(substrate.get(&id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn scan_orders_by_update_time() {
        let substrate = MemorySubstrate::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        substrate
            .put_if_absent(&JobRecord::waiting(mk_job(a), 20))
            .await
            .unwrap();
        substrate
            .put_if_absent(&JobRecord::waiting(mk_job(b), 10))
            .await
            .unwrap();

        let scan = substrate.scan().await.unwrap();
        assert_eq!(scan[0].job.order_id, b);
        assert_eq!(scan[1].job.order_id, a);
    }
}
