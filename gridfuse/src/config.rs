//! Process-wide configuration.
//!
use std::path::PathBuf;

use parking_lot::RwLock;

/// Tunables shared by stores and copy operations.
///
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Root directory for filesystem stores.
    pub working_dir: PathBuf,

    /// Size limit, in bytes, for in-RAM chunk caches.
    pub cache_bytes: u64,

    /// Upper bound, in bytes, on the copy buffer used when persisting cubes.
    pub copy_buffer_bytes: usize,

    /// Preferred number of chunks to copy per write when persisting cubes.
    pub copy_chunks: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            cache_bytes: 1 << 28,
            copy_buffer_bytes: 1 << 28,
            copy_chunks: 4,
        }
    }
}

static CONFIG: RwLock<Option<Config>> = RwLock::new(None);

/// Install a process-wide configuration.
///
pub fn init(config: Config) {
    *CONFIG.write() = Some(config);
}

/// The current configuration, or the defaults if `init` was never called.
///
pub fn get() -> Config {
    CONFIG.read().clone().unwrap_or_default()
}

/// Drop any installed configuration, reverting to the defaults.
///
pub fn reset() {
    *CONFIG.write() = None;
}
