// Signal generation, lifecycle tracking and the background loops
pub mod engine;
pub mod lifecycle;
pub mod monitor;
pub mod scheduler;
pub mod snapshot_buffer;

pub use engine::{ActiveSignalStatus, CandidateDecision, EngineStatus, SignalEngine};
pub use lifecycle::{ActiveSignal, SignalLifecycleStore};
pub use monitor::{CycleOutcome, MonitorHandle, MonitorLoop, MonitorStatus};
pub use scheduler::{FetchReport, Scheduler, SchedulerHandle, SchedulerStatus};
pub use snapshot_buffer::{SnapshotBuffer, SnapshotProvider};
