//! File provenance: records, origins, and the alias-root table.

mod record;
mod roots;

pub use record::{FileOrigin, FileRecord};
pub use roots::{ResourceRoots, OUTPUTS_ALIAS, WORKSPACE_ALIAS};
