pub mod normalize_field_types;
pub mod prune_orphan_overrides;

pub use normalize_field_types::NormalizeFieldTypes;
pub use prune_orphan_overrides::PruneOrphanOverrides;

use std::sync::Arc;

use crate::logic::{MigrationRegistry, SchemaOverrideEngine};

pub const NORMALIZE_FIELD_TYPES: &str = "001-normalize-field-types";
pub const PRUNE_ORPHAN_OVERRIDES: &str = "002-prune-orphan-overrides";

/// Every migration shipped with the crate, keyed by the identifier used in the configured order
pub fn builtin_migrations(engine: &Arc<SchemaOverrideEngine>) -> MigrationRegistry {
    MigrationRegistry::new()
        .with(
            NORMALIZE_FIELD_TYPES,
            Arc::new(NormalizeFieldTypes::new(engine.clone())),
        )
        .with(
            PRUNE_ORPHAN_OVERRIDES,
            Arc::new(PruneOrphanOverrides::new(engine.clone())),
        )
}

/// Default order of the built-in migrations
pub fn builtin_order() -> Vec<String> {
    vec![
        NORMALIZE_FIELD_TYPES.to_string(),
        PRUNE_ORPHAN_OVERRIDES.to_string(),
    ]
}
