pub mod controller;

pub use controller::{
    spawn_refresh_loop, FolderQueueController, QueueSnapshot, ReconcileOutcome, RemoteSnapshot,
    SyncError,
};
