//! CI worker binary support: jobs, reports and the log exchange.

pub mod exchange;
pub mod job;
pub mod report;

pub use exchange::LogExchange;
pub use job::run_smoke_job;
pub use report::{JobReport, JobState, JOB_FINISHED};
