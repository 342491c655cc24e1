pub mod archive;
pub mod clock;
pub mod config;
pub mod error;
pub mod logging;
pub mod record;
pub mod record_log;
pub mod store;

pub use archive::*;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::*;
pub use logging::{init_logging, LogHandle, Verbosity};
pub use record::Record;
pub use record_log::{FileRecordLog, MemoryRecordLog, RecordLines, RecordLog};
pub use store::{ArchiveQuery, ArchiveStore, JsonFileArchiveStore, MemoryArchiveStore};
