use std::{
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::{Duration, Instant},
};

use log::{debug, info};
use pcache::{PageCache, PageCacheConfig};

use crate::{
    TesterError,
    suite::{Suite, TestResult},
    workload::{self, Counters, Workload},
};

const RESIZE_INTERVAL: Duration = Duration::from_millis(5);

/// Mixed workload while the cache keeps growing to twice and shrinking to half its capacity.
pub struct ResizeUnderLoad {
    config: PageCacheConfig,
    workload: Workload,
    cache: Option<PageCache>,
}

impl ResizeUnderLoad {
    pub fn new(config: PageCacheConfig, workload: Workload) -> Self {
        Self {
            config,
            workload,
            cache: None,
        }
    }
}

/// Alternates capacity between `high` and `low` until `stop` is set. Returns number of resizes.
fn resizer(
    cache: &PageCache,
    low: usize,
    high: usize,
    stop: &AtomicBool,
) -> Result<u64, TesterError> {
    let mut resizes = 0;
    while !stop.load(Ordering::Acquire) {
        let target = if cache.capacity() == high { low } else { high };
        cache.alter(target)?;
        resizes += 1;
        thread::sleep(RESIZE_INTERVAL);
    }
    Ok(resizes)
}

impl Suite<TestResult> for ResizeUnderLoad {
    fn setup(&mut self) -> Result<(), TesterError> {
        self.cache = Some(PageCache::with_config(&self.config)?);
        info!(
            "Opened cache: page size {} capacity {}",
            self.config.page_size, self.config.capacity
        );
        Ok(())
    }

    fn run(&mut self) -> Result<TestResult, TesterError> {
        let Some(cache) = self.cache.as_ref() else {
            return Err(TesterError::NotSetUp);
        };
        let counters = Counters::default();
        let stop = AtomicBool::new(false);
        let low = self.config.capacity / 2;
        let high = self.config.capacity.saturating_mul(2).max(1);

        let start = Instant::now();
        let (workers, resizes) = thread::scope(|scope| {
            let handle = scope.spawn(|| resizer(cache, low, high, &stop));
            let workers = workload::run_workers(cache, &self.workload, &counters);
            stop.store(true, Ordering::Release);
            let resizes = handle
                .join()
                .unwrap_or_else(|_| Err(TesterError::WorkerPanicked));
            (workers, resizes)
        });
        let duration = start.elapsed();
        workers?;
        debug!("Resized cache {} times", resizes?);

        // Back to the configured size. Recyclable pages above it stay until reused.
        cache.alter(self.config.capacity)?;
        let stats = cache.stats();
        workload::check_quiescent(stats)?;
        Ok(TestResult {
            duration,
            fetches: counters.fetches.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            private: counters.private.load(Ordering::Relaxed),
            stats,
        })
    }

    fn cleanup(&mut self) -> Result<(), TesterError> {
        if let Some(cache) = self.cache.take() {
            cache.close();
        }
        Ok(())
    }
}
