use std::env;
use std::ffi::OsStr;

use libloading::Library;
use tracing::{debug, info};

use crate::align::BLOCK_BYTES;
use crate::error::{Result, TilingError};
use crate::platform::{PlatformInfo, PlatformProvider};

pub const ENV_RUNTIME_LIB: &str = "CORETILE_RUNTIME_LIB";

/// Searched in order when no explicit path is configured.
pub const DEFAULT_RUNTIME_LIBS: [&str; 2] = ["libcoretile_runtime.so", "libcoretile_runtime.dylib"];

/* ============================================================
   Core runtime ABI (minimal)
   ============================================================ */

#[repr(C)]
#[derive(Copy, Clone, Debug)]
pub enum CoreMemType {
    Scratch = 0,
}

/// `uint32_t coretile_core_num(void)`
pub type CoreNumFn = unsafe extern "C" fn() -> u32;

/// `int32_t coretile_core_mem_size(int32_t mem_type, uint64_t *size)`, 0 on success.
pub type CoreMemSizeFn = unsafe extern "C" fn(mem_type: CoreMemType, size: *mut u64) -> i32;

struct RuntimeSymbols {
    _lib: Library,
    core_num: CoreNumFn,
    core_mem_size: CoreMemSizeFn,
}

/* ============================================================
   Dynamically loaded provider
   ============================================================ */

/// Platform facts read from a vendor runtime library at run time.
pub struct RuntimePlatform {
    symbols: RuntimeSymbols,
    block_bytes: usize,
}

impl RuntimePlatform {
    pub fn load<P: AsRef<OsStr>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let unavailable = |e: libloading::Error| {
            TilingError::PlatformUnavailable(format!("{}: {}", path.to_string_lossy(), e))
        };

        unsafe {
            let lib = Library::new(path).map_err(unavailable)?;

            let core_num = *lib
                .get::<CoreNumFn>(b"coretile_core_num\0")
                .map_err(unavailable)?;
            let core_mem_size = *lib
                .get::<CoreMemSizeFn>(b"coretile_core_mem_size\0")
                .map_err(unavailable)?;

            debug!(path = %path.to_string_lossy(), "loaded core runtime");

            Ok(Self {
                symbols: RuntimeSymbols {
                    _lib: lib,
                    core_num,
                    core_mem_size,
                },
                block_bytes: BLOCK_BYTES,
            })
        }
    }

    /// `CORETILE_RUNTIME_LIB` if set, otherwise the first default name
    /// that loads.
    pub fn load_default() -> Result<Self> {
        if let Ok(path) = env::var(ENV_RUNTIME_LIB) {
            return Self::load(path);
        }

        let mut last = TilingError::PlatformUnavailable("no runtime library candidates".to_string());
        for name in DEFAULT_RUNTIME_LIBS {
            match Self::load(name) {
                Ok(rt) => return Ok(rt),
                Err(e) => last = e,
            }
        }
        Err(last)
    }

    pub fn with_block_bytes(mut self, block_bytes: usize) -> Self {
        self.block_bytes = block_bytes;
        self
    }
}

impl PlatformProvider for RuntimePlatform {
    fn platform_info(&self) -> Result<PlatformInfo> {
        let core_count = unsafe { (self.symbols.core_num)() } as usize;

        let mut scratch = 0u64;
        let status = unsafe { (self.symbols.core_mem_size)(CoreMemType::Scratch, &mut scratch) };
        if status != 0 {
            return Err(TilingError::PlatformUnavailable(format!(
                "coretile_core_mem_size returned {}",
                status
            )));
        }

        let info = PlatformInfo::new(core_count, scratch as usize).with_block_bytes(self.block_bytes);
        info.validate()?;

        info!(core_count, scratch_bytes = info.scratch_bytes, "queried core runtime");
        Ok(info)
    }
}
