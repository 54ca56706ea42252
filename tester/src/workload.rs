//! Workload module - transactions hammering a shared cache, acting as their own pager.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
};

use log::{debug, error};
use pcache::{
    CacheStats, FileId, HeapTransaction, PageCache, PageId, PageLayout, PageRef, Pager,
    Transaction,
};

use crate::TesterError;

const FILE_NAME: &[u8] = b"stress.tbl";
/// Bytes at the start of every page holding its page number.
pub const STAMP_LEN: usize = 4;

/// Parameters of a concurrent run.
#[derive(Debug, Clone)]
pub struct Workload {
    pub threads: usize,
    /// First `writers` threads run write transactions. Private pages belong to the
    /// transaction that allocated them, so write transactions must not share keys; at most
    /// one is used.
    pub writers: usize,
    pub ops_per_thread: usize,
    pub keys: u32,
    pub max_held: usize,
}

/// Counters shared by all workers of a run.
#[derive(Debug, Default)]
pub struct Counters {
    pub fetches: AtomicU64,
    pub misses: AtomicU64,
    pub private: AtomicU64,
}

/// Pager of the stress run. Page content is derived from the page number, nothing is stored.
struct StressPager;

impl Pager for StressPager {}

fn page_id(page_no: u32) -> PageId {
    PageId::new(FileId::from_slice(FILE_NAME), page_no)
}

fn stamp(page: &PageRef) -> u32 {
    let buf = page.read();
    let mut stamp = [0u8; STAMP_LEN];
    stamp.copy_from_slice(&buf[..STAMP_LEN]);
    u32::from_le_bytes(stamp)
}

/// Fetches page and initializes it if it came back without a pager.
fn fetch(
    cache: &PageCache,
    pager: &Arc<dyn Pager>,
    id: PageId,
    txn: &dyn Transaction,
    counters: &Counters,
) -> Result<PageRef, TesterError> {
    let page = cache.fetch(&id, txn)?;
    counters.fetches.fetch_add(1, Ordering::Relaxed);

    if !page.is_resident() {
        counters.private.fetch_add(1, Ordering::Relaxed);
    }
    let loaded = page.attach_with(|buf| {
        buf[..STAMP_LEN].copy_from_slice(&id.page_no().to_le_bytes());
        PageLayout::new(pager.clone(), STAMP_LEN)
    });
    if loaded {
        counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    if stamp(&page) != id.page_no() {
        let page_id = page.page_id();
        cache.release(page, txn);
        return Err(TesterError::Corrupted { page_id });
    }
    Ok(page)
}

fn worker(
    index: usize,
    cache: &PageCache,
    workload: &Workload,
    counters: &Counters,
) -> Result<(), TesterError> {
    let pager: Arc<dyn Pager> = Arc::new(StressPager);
    let txn = if index < workload.writers {
        HeapTransaction::write()
    } else {
        HeapTransaction::read()
    };
    let mut rng = oorandom::Rand32::new(index as u64);

    let mut done = 0;
    while done < workload.ops_per_thread {
        let batch = 1 + rng.rand_range(0..workload.max_held as u32) as usize;
        let mut held = Vec::with_capacity(batch);
        for _ in 0..batch.min(workload.ops_per_thread - done) {
            let id = page_id(rng.rand_range(0..workload.keys));
            match fetch(cache, &pager, id, &txn, counters) {
                Ok(page) => held.push(page),
                Err(e) => {
                    for page in held {
                        cache.release(page, &txn);
                    }
                    return Err(e);
                }
            }
            done += 1;
        }

        for page in held {
            if txn.is_write() {
                // Pretend to modify the page and write it back right away.
                page.set_dirty(true);
                page.write()[STAMP_LEN] = index as u8;
                page.set_dirty(false);
            }
            cache.release(page, &txn);
        }
    }
    debug!("worker {index} finished {done} fetches");
    Ok(())
}

/// Runs `workload` against `cache` from `workload.threads` threads.
pub fn run_workers(
    cache: &PageCache,
    workload: &Workload,
    counters: &Counters,
) -> Result<(), TesterError> {
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workload.threads)
            .map(|index| scope.spawn(move || worker(index, cache, workload, counters)))
            .collect();

        let mut result = Ok(());
        for (index, handle) in handles.into_iter().enumerate() {
            let outcome = handle
                .join()
                .unwrap_or_else(|_| Err(TesterError::WorkerPanicked));
            if let Err(e) = outcome {
                error!("worker {index} failed: {e}");
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    })
}

/// Checks that nothing is held anymore and every slot is accounted for.
pub fn check_quiescent(stats: CacheStats) -> Result<(), TesterError> {
    if stats.private != 0 || stats.free + stats.recyclable != stats.slots {
        return Err(TesterError::Inconsistent { stats });
    }
    Ok(())
}
