pub mod config;
pub mod feed;
pub mod queue;
pub mod storage;
pub mod sync;
