pub mod batch;
pub mod event_log;
pub mod notify;
