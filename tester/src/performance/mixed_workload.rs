use std::{sync::atomic::Ordering, time::Instant};

use log::info;
use pcache::{PageCache, PageCacheConfig};

use crate::{
    TesterError,
    suite::{Suite, TestResult},
    workload::{self, Counters, Workload},
};

/// Readers and writers fetching random pages from one cache.
pub struct MixedWorkload {
    config: PageCacheConfig,
    workload: Workload,
    cache: Option<PageCache>,
}

impl MixedWorkload {
    pub fn new(config: PageCacheConfig, workload: Workload) -> Self {
        Self {
            config,
            workload,
            cache: None,
        }
    }
}

impl Suite<TestResult> for MixedWorkload {
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

        let start = Instant::now();
        workload::run_workers(cache, &self.workload, &counters)?;
        let duration = start.elapsed();

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
