//! Knowledge graph infrastructure implementations
//!
//! Concrete implementation of the entity repository trait using SQLite.

mod repository;

pub use repository::SqliteEntityRepository;
