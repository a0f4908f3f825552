//! Repository layer: typed queries per aggregate.
//!
//! Each repository holds an `Arc<Database>` and owns the SQL for one table
//! family. All values bound into queries are parameterized; multi-row writes
//! run inside transactions.

mod decision_repository;
mod entity_repository;
mod pipeline_repository;
mod security_repository;
mod trigger_repository;
mod vector_repository;

pub use decision_repository::DecisionRepository;
pub use entity_repository::EntityRepository;
pub use pipeline_repository::PipelineRepository;
pub use security_repository::SecurityRepository;
pub use trigger_repository::TriggerRepository;
pub use vector_repository::VectorRepository;
