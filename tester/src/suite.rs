use std::time::Duration;

use log::info;
use pcache::CacheStats;

use crate::TesterError;

pub trait Suite<R> {
    fn setup(&mut self) -> Result<(), TesterError>;

    fn run(&mut self) -> Result<R, TesterError>;

    fn cleanup(&mut self) -> Result<(), TesterError>;

    fn run_suite(&mut self) -> Result<R, TesterError> {
        info!("Starting setup...");
        self.setup()?;
        info!("Setup completed.");

        info!("Starting test...");
        let result = self.run()?;
        info!("Test completed.");

        info!("Starting cleanup...");
        self.cleanup()?;
        info!("Cleanup completed.");

        Ok(result)
    }
}

pub struct TestResult {
    pub duration: Duration,
    pub fetches: u64,
    /// Fetches that returned page without pager attached.
    pub misses: u64,
    /// Fetches that returned page allocated outside the pool.
    pub private: u64,
    /// Cache counters after every worker finished.
    pub stats: CacheStats,
}
