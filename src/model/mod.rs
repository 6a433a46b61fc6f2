pub mod collection;
pub mod common;
pub mod component;
pub mod field;
pub mod match_filter;
pub mod migration;
pub mod plugin;
pub mod schema_override;

pub use collection::*;
pub use common::*;
pub use component::*;
pub use field::*;
pub use match_filter::*;
pub use migration::*;
pub use plugin::*;
pub use schema_override::*;
