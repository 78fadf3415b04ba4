pub mod buffer_pool;
pub mod check;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod copy_engine;
pub mod directory;
pub mod error;
pub mod scheduler;
pub mod segmented;
pub mod storage;
pub mod stream;
pub mod task;
pub mod utils;

// Re-export commonly used types
pub use buffer_pool::{BufferPool, PooledBuffer};
pub use check::{Check, CheckKind, ObjectPair};
pub use checksum::{Checksum, ChecksumAlgorithm};
pub use config::{Config, JobConfig, JobKind, TransferConfig};
pub use copy_engine::{Transfer, TransferBuilder};
pub use error::{ShuttleError, ShuttleResult};
pub use scheduler::{Scheduler, Scope, Slot};
pub use segmented::{plan_part, PartDescriptor};
pub use storage::{LocalStorage, MemoryStorage, Object, ObjectKind, SegmentId, Segmenter, Storage, StorageEvent};
pub use task::{StatsSnapshot, Task, TaskId, TaskMeta, TransferContext};
pub use utils::calculate_part_size;
