pub mod queue;
pub mod repository;
pub mod scorer;
