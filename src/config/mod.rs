// Configuration
// TOML settings from ~/.wren/config.toml with environment fallback

mod loader;
mod settings;

pub use loader::{load_config, load_config_from};
pub use settings::{wren_dir, BackendConfig, CacheConfig, Config, FixLoopSettings, MetricsConfig};
