//! Consumption workers that turn an archive's queued records into
//! periodically persisted distillations.

pub mod binding;
pub mod error;
pub mod manager;
pub mod worker;

pub use binding::{QueueBinder, SqsBinder};
pub use error::ConsumerError;
pub use manager::{ConsumerManager, ManagerPass};
pub use worker::{
    ArchiveConsumer, ConsumerContext, ConsumerHandle, ExitReason, StopHandle, WorkerOutcome,
};
