//! Configuration of a [`crate::PageCache`].
//!
//! Defaults can be overridden from the environment:
//! - `PCACHE_PAGE_SIZE`: page size in bytes, power of two (default 4096)
//! - `PCACHE_CAPACITY`: number of pool slots (default 256)

use std::env;

use thiserror::Error;

pub const PAGE_SIZE_ENV: &str = "PCACHE_PAGE_SIZE";
pub const CAPACITY_ENV: &str = "PCACHE_CAPACITY";

/// Error for configuration related operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("page size must be greater than zero")]
    ZeroPageSize,
    #[error("page size must be a power of two, got {0}")]
    PageSizeNotPowerOfTwo(usize),
    #[error("invalid value of {var}: '{value}'")]
    InvalidValue { var: &'static str, value: String },
}

/// Parameters used for opening a [`crate::PageCache`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCacheConfig {
    /// Size of every page in bytes.
    pub page_size: usize,
    /// Number of pre-allocated pool slots.
    pub capacity: usize,
}

impl Default for PageCacheConfig {
    fn default() -> Self {
        Self {
            page_size: 4096,
            capacity: 256,
        }
    }
}

impl PageCacheConfig {
    pub fn new(page_size: usize, capacity: usize) -> Self {
        Self {
            page_size,
            capacity,
        }
    }

    /// Loads configuration from environment variables, falling back to defaults for unset ones.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&'static str) -> Option<String>,
    {
        let mut cfg = Self::default();
        if let Some(v) = parse_var(&lookup, PAGE_SIZE_ENV)? {
            cfg.page_size = v;
        }
        if let Some(v) = parse_var(&lookup, CAPACITY_ENV)? {
            cfg.capacity = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::ZeroPageSize);
        }
        if !self.page_size.is_power_of_two() {
            return Err(ConfigError::PageSizeNotPowerOfTwo(self.page_size));
        }
        Ok(())
    }
}

fn parse_var<F>(lookup: &F, var: &'static str) -> Result<Option<usize>, ConfigError>
where
    F: Fn(&'static str) -> Option<String>,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse::<usize>()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { var, value })
}
