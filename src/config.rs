use crate::error::{Error, Result};
use byte_unit::Byte;
use serde::{Deserialize, Serialize};

pub const DEFAULT_POOL_SIZE: Byte = Byte::from_u64(64 * 1024 * 1024);
pub const DEFAULT_PAGE_SIZE: usize = 4096;
pub const DEFAULT_SHARD_COUNT: usize = 8;
pub const DEFAULT_SUPER_PAGE_SIZE: usize = 2 * 1024 * 1024;

pub const DEFAULT_SLOT_COUNT: usize = 30;
pub const DEFAULT_BUCKET_COUNT: usize = 13;
pub const DEFAULT_BLOCK_SIZE: Byte = Byte::from_u64(1024);

/// Configuration of the sharded page allocator.
///
/// `super_mem` carves a sub-range of `pool_size` into an independent
/// pool of coarser-granularity superpages. Zero disables the superpage
/// pool entirely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocConfig {
    /// Total bytes backing the frame arena.
    pub pool_size: Byte,
    /// Frame granularity of the page pool.
    pub page_size: usize,
    /// Number of free-list shards, normally one per execution unit.
    pub shard_count: usize,
    /// Frame granularity of the superpage pool.
    pub super_page_size: usize,
    /// Bytes of `pool_size` reserved for the superpage pool.
    pub super_mem: Byte,
}

impl Default for AllocConfig {
    #[inline]
    fn default() -> Self {
        AllocConfig {
            pool_size: DEFAULT_POOL_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            shard_count: DEFAULT_SHARD_COUNT,
            super_page_size: DEFAULT_SUPER_PAGE_SIZE,
            super_mem: Byte::from_u64(0),
        }
    }
}

impl AllocConfig {
    /// Total bytes of the backing arena.
    #[inline]
    pub fn pool_size<T>(mut self, pool_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.pool_size = Byte::from(pool_size);
        self
    }

    /// Frame size of the page pool. Must be a power of two.
    #[inline]
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// How many free-list shards to maintain.
    #[inline]
    pub fn shard_count(mut self, shard_count: usize) -> Self {
        self.shard_count = shard_count;
        self
    }

    /// Frame size of the superpage pool. Must be a power-of-two
    /// multiple of the page size.
    #[inline]
    pub fn super_page_size(mut self, super_page_size: usize) -> Self {
        self.super_page_size = super_page_size;
        self
    }

    /// How many bytes of the arena go to the superpage pool.
    #[inline]
    pub fn super_mem<T>(mut self, super_mem: T) -> Self
    where
        Byte: From<T>,
    {
        self.super_mem = Byte::from(super_mem);
        self
    }

    #[inline]
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: AllocConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.page_size.is_power_of_two() || self.page_size < 512 {
            return Err(Error::InvalidConfig("page_size must be a power of two >= 512"));
        }
        if self.shard_count == 0 {
            return Err(Error::InvalidConfig("shard_count must be positive"));
        }
        let super_mem = self.super_mem.as_u64() as usize;
        if super_mem > 0 {
            if !self.super_page_size.is_power_of_two() || self.super_page_size <= self.page_size {
                return Err(Error::InvalidConfig(
                    "super_page_size must be a power of two larger than page_size",
                ));
            }
            if super_mem >= self.pool_size.as_u64() as usize {
                return Err(Error::InvalidConfig("super_mem must leave room for the page pool"));
            }
        }
        if (self.pool_size.as_u64() as usize - super_mem) < self.page_size {
            return Err(Error::InvalidConfig("pool_size too small for a single page"));
        }
        Ok(())
    }
}

/// Configuration of the block cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Number of buffer slots.
    pub slot_count: usize,
    /// Number of hash buckets the slots are partitioned into.
    pub bucket_count: usize,
    /// Bytes per cached block.
    pub block_size: Byte,
}

impl Default for CacheConfig {
    #[inline]
    fn default() -> Self {
        CacheConfig {
            slot_count: DEFAULT_SLOT_COUNT,
            bucket_count: DEFAULT_BUCKET_COUNT,
            block_size: DEFAULT_BLOCK_SIZE,
        }
    }
}

impl CacheConfig {
    #[inline]
    pub fn slot_count(mut self, slot_count: usize) -> Self {
        self.slot_count = slot_count;
        self
    }

    #[inline]
    pub fn bucket_count(mut self, bucket_count: usize) -> Self {
        self.bucket_count = bucket_count;
        self
    }

    #[inline]
    pub fn block_size<T>(mut self, block_size: T) -> Self
    where
        Byte: From<T>,
    {
        self.block_size = Byte::from(block_size);
        self
    }

    #[inline]
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: CacheConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.slot_count == 0 {
            return Err(Error::InvalidConfig("slot_count must be positive"));
        }
        if self.bucket_count == 0 {
            return Err(Error::InvalidConfig("bucket_count must be positive"));
        }
        if self.block_size.as_u64() == 0 {
            return Err(Error::InvalidConfig("block_size must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_config_builder() {
        let config = AllocConfig::default()
            .pool_size(1024u64 * 1024)
            .page_size(4096)
            .shard_count(4);
        assert!(config.validate().is_ok());
        assert_eq!(config.shard_count, 4);
    }

    #[test]
    fn test_alloc_config_rejects_bad_page_size() {
        let config = AllocConfig::default().page_size(3000);
        assert!(config.validate().is_err());
        let config = AllocConfig::default().page_size(256);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_alloc_config_superpage_bounds() {
        let config = AllocConfig::default()
            .pool_size(4u64 * 1024 * 1024)
            .super_mem(2u64 * 1024 * 1024)
            .super_page_size(2 * 1024 * 1024);
        assert!(config.validate().is_ok());

        let config = AllocConfig::default()
            .pool_size(1024u64 * 1024)
            .super_mem(1024u64 * 1024);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cache_config_from_toml() {
        let config = CacheConfig::from_toml(
            r#"
            slot_count = 16
            bucket_count = 4
            block_size = "1 KiB"
            "#,
        )
        .unwrap();
        assert_eq!(config.slot_count, 16);
        assert_eq!(config.bucket_count, 4);
        assert_eq!(config.block_size.as_u64(), 1024);
    }

    #[test]
    fn test_cache_config_rejects_zero_buckets() {
        let config = CacheConfig::default().bucket_count(0);
        assert!(config.validate().is_err());
    }
}
