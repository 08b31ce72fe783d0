pub mod background;

pub use background::{BackgroundCache, CacheWrite, CachedBackground, CompressionInfo};
