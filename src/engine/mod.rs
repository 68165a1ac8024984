pub mod dispatch;
pub mod ingest;
pub mod monitor;
pub mod scheduler;
