pub mod bootstrap;
pub mod migration_runner;
pub mod registry;
pub mod schema_override;

pub use bootstrap::*;
pub use migration_runner::*;
pub use registry::*;
pub use schema_override::*;
