pub mod envelope;
pub mod memory;
pub mod repository;
