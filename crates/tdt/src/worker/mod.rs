pub mod job;
pub mod pool;
pub mod scheduler;

pub use job::{
    CalibrationJob, Geometry, JobKey, JobOutcome, JobResult, SimulationJob, SimulationParams,
    WorkId, WorkItem,
};
pub use pool::{JobHandler, SlotGate, SlotPermit, WorkerPool};
pub use scheduler::{CompletionSet, JobPlan, JobSummary, SchedulerSettings, SimulationScheduler};
