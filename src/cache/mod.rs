// Cache module
//
// Two tiers behind one contract:
// - volatile: fast, in-process (`MemoryTier`)
// - durable: survives restarts (`FileTier`, or `MapTier` without a directory)
//
// The `CacheCoordinator` owns both tiers of a context and applies the
// descriptor's `CachePolicy` to every read and write.

pub mod coordinator;
pub mod entry;
pub mod error;
pub mod file;
pub mod memory;
pub mod policy;
pub mod stats;
pub mod traits;

pub use coordinator::CacheCoordinator;
pub use entry::CachedRecord;
pub use error::CacheError;
pub use file::FileTier;
pub use memory::{MapTier, MemoryTier};
pub use policy::{CacheMode, CacheOptions, CachePolicy, Expire, ReadScope};
pub use stats::CacheStats;
pub use traits::{CacheObserver, CacheTier, TierOperation};
