use std::env;

use serde::Deserialize;
use tracing::debug;

use crate::align::{self, BLOCK_BYTES};
use crate::error::{Result, TilingError};

pub const ENV_CORE_COUNT: &str = "CORETILE_CORE_COUNT";
pub const ENV_SCRATCH_BYTES: &str = "CORETILE_SCRATCH_BYTES";
pub const ENV_BLOCK_BYTES: &str = "CORETILE_BLOCK_BYTES";

fn default_block_bytes() -> usize {
    BLOCK_BYTES
}

/// Hardware facts the tiler plans against. Queried once per dispatch and
/// immutable for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct PlatformInfo {
    /// Vector cores that can be launched.
    pub core_count: usize,
    /// Bytes of private scratch memory per core.
    pub scratch_bytes: usize,
    /// Copy-engine alignment in bytes.
    #[serde(default = "default_block_bytes")]
    pub block_bytes: usize,
}

impl PlatformInfo {
    pub fn new(core_count: usize, scratch_bytes: usize) -> Self {
        Self {
            core_count,
            scratch_bytes,
            block_bytes: BLOCK_BYTES,
        }
    }

    pub fn with_block_bytes(mut self, block_bytes: usize) -> Self {
        self.block_bytes = block_bytes;
        self
    }

    /// Alignment granularity in elements for `elem_size`-byte elements.
    pub fn block_elems(&self, elem_size: usize) -> usize {
        align::block_elems(self.block_bytes, elem_size)
    }

    pub fn validate(&self) -> Result<()> {
        if self.core_count == 0 {
            return Err(TilingError::ZeroCoreCount);
        }
        if self.scratch_bytes == 0 {
            return Err(TilingError::InsufficientScratch {
                available: 0,
                required: self.block_bytes.max(1),
            });
        }
        Ok(())
    }
}

impl Default for PlatformInfo {
    /// 48 vector cores with 192 KiB of scratch each.
    fn default() -> Self {
        PlatformInfo::new(48, 192 * 1024)
    }
}

/* ============================================================
   Provider trait
   ============================================================ */

/// Source of [`PlatformInfo`] for a dispatch.
pub trait PlatformProvider {
    fn platform_info(&self) -> Result<PlatformInfo>;
}

impl PlatformProvider for PlatformInfo {
    fn platform_info(&self) -> Result<PlatformInfo> {
        self.validate()?;
        Ok(*self)
    }
}

/* ============================================================
   Environment overrides
   ============================================================ */

/// Reads `CORETILE_*` variables over a fallback description.
#[derive(Debug, Clone, Copy)]
pub struct EnvPlatform {
    fallback: PlatformInfo,
}

impl EnvPlatform {
    pub fn new(fallback: PlatformInfo) -> Self {
        Self { fallback }
    }

    /// Resolve against an arbitrary variable lookup.
    pub fn resolve<F>(&self, lookup: F) -> Result<PlatformInfo>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str, default: usize| -> Result<usize> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.trim().parse::<usize>().map_err(|_| TilingError::InvalidPlatformValue {
                    key: key.to_string(),
                    value: raw,
                }),
            }
        };

        let info = PlatformInfo {
            core_count: read(ENV_CORE_COUNT, self.fallback.core_count)?,
            scratch_bytes: read(ENV_SCRATCH_BYTES, self.fallback.scratch_bytes)?,
            block_bytes: read(ENV_BLOCK_BYTES, self.fallback.block_bytes)?,
        };
        info.validate()?;

        debug!(
            core_count = info.core_count,
            scratch_bytes = info.scratch_bytes,
            block_bytes = info.block_bytes,
            "resolved platform from environment"
        );
        Ok(info)
    }
}

impl Default for EnvPlatform {
    fn default() -> Self {
        EnvPlatform::new(PlatformInfo::default())
    }
}

impl PlatformProvider for EnvPlatform {
    fn platform_info(&self) -> Result<PlatformInfo> {
        self.resolve(|key| env::var(key).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn block_elems_per_width() {
        let p = PlatformInfo::new(8, 4096);
        assert_eq!(p.block_elems(4), 8);
        assert_eq!(p.block_elems(2), 16);
        assert_eq!(p.with_block_bytes(64).block_elems(4), 16);
    }

    #[test]
    fn zero_cores_rejected() {
        let err = PlatformInfo::new(0, 4096).platform_info().unwrap_err();
        assert_eq!(err, TilingError::ZeroCoreCount);
    }

    #[test]
    fn env_overrides_fallback() {
        let env = EnvPlatform::new(PlatformInfo::new(8, 4096));
        let info = env
            .resolve(lookup(&[(ENV_CORE_COUNT, "24"), (ENV_SCRATCH_BYTES, " 65536 ")]))
            .unwrap();

        assert_eq!(info.core_count, 24);
        assert_eq!(info.scratch_bytes, 65536);
        assert_eq!(info.block_bytes, BLOCK_BYTES);
    }

    #[test]
    fn env_garbage_is_reported() {
        let env = EnvPlatform::default();
        let err = env.resolve(lookup(&[(ENV_BLOCK_BYTES, "wide")])).unwrap_err();
        assert_eq!(
            err,
            TilingError::InvalidPlatformValue {
                key: ENV_BLOCK_BYTES.to_string(),
                value: "wide".to_string(),
            }
        );
    }

    #[test]
    fn platform_deserializes_with_default_block() {
        let p: PlatformInfo = serde_json::from_str(r#"{"core_count": 8, "scratch_bytes": 4096}"#).unwrap();
        assert_eq!(p, PlatformInfo::new(8, 4096));
    }
}
