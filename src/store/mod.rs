pub mod memory;
pub mod override_cache;
pub mod postgres;
pub mod traits;

pub use memory::*;
pub use override_cache::*;
pub use postgres::*;
pub use traits::*;
