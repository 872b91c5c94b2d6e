//! Resource-root table: alias URIs and origin classification.
//!
//! Paths handed to the core may use an alias URI (`alias://rest`) instead of
//! a real filesystem path, so recorded configurations stay portable across
//! machines. The table maps each alias to an absolute directory; well-known
//! aliases exist for the run directory (`workspace://`) and the persistent
//! output store (`outputs://`), and any number of framework-resource roots
//! (model installations, static datasets) can be registered on top.

use crate::errors::{SimflowError, UnknownAliasError};
use crate::resources::FileOrigin;
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Alias for the run directory root.
pub const WORKSPACE_ALIAS: &str = "workspace";

/// Alias for the persistent output store.
pub const OUTPUTS_ALIAS: &str = "outputs";

const URI_SEPARATOR: &str = "://";

#[derive(Debug, Clone)]
struct RootEntry {
    path: PathBuf,
    framework: bool,
}

/// Ordered table of alias roots.
#[derive(Debug, Clone)]
pub struct ResourceRoots {
    roots: IndexMap<String, RootEntry>,
}

impl ResourceRoots {
    /// Creates a table holding the two well-known aliases.
    #[must_use]
    pub fn new(workspace_root: impl Into<PathBuf>, outputs_root: impl Into<PathBuf>) -> Self {
        let mut roots = IndexMap::new();
        roots.insert(
            WORKSPACE_ALIAS.to_string(),
            RootEntry {
                path: workspace_root.into(),
                framework: false,
            },
        );
        roots.insert(
            OUTPUTS_ALIAS.to_string(),
            RootEntry {
                path: outputs_root.into(),
                framework: false,
            },
        );
        Self { roots }
    }

    /// Registers (or replaces) a framework-resource root under an alias.
    pub fn register_framework_root(&mut self, alias: impl Into<String>, path: impl Into<PathBuf>) {
        let alias = alias.into();
        let path = path.into();
        debug!(alias = %alias, path = %path.display(), "registering framework resource root");
        self.roots.insert(
            alias,
            RootEntry {
                path,
                framework: true,
            },
        );
    }

    /// The run directory root.
    #[must_use]
    pub fn workspace_root(&self) -> &Path {
        &self.roots[WORKSPACE_ALIAS].path
    }

    /// The persistent output store root.
    #[must_use]
    pub fn outputs_root(&self) -> &Path {
        &self.roots[OUTPUTS_ALIAS].path
    }

    /// Builds an alias URI from an alias and a relative remainder.
    #[must_use]
    pub fn uri(alias: &str, rest: &str) -> String {
        format!("{alias}{URI_SEPARATOR}{}", rest.trim_start_matches('/'))
    }

    /// Splits `alias://rest` into its parts, if the string is an alias URI.
    #[must_use]
    pub fn split_uri(spec: &str) -> Option<(&str, &str)> {
        spec.split_once(URI_SEPARATOR)
    }

    /// Whether the string uses the alias URI form.
    #[must_use]
    pub fn is_uri(spec: &str) -> bool {
        Self::split_uri(spec).is_some()
    }

    /// Resolves a path spec to a concrete filesystem path.
    ///
    /// Alias URIs resolve through the table; absolute paths pass through;
    /// relative paths resolve against the workspace root.
    pub fn resolve(&self, spec: &str) -> Result<PathBuf, SimflowError> {
        if let Some((alias, rest)) = Self::split_uri(spec) {
            let entry = self
                .roots
                .get(alias)
                .ok_or_else(|| UnknownAliasError::new(alias))?;
            return Ok(entry.path.join(rest.trim_start_matches('/')));
        }
        let path = Path::new(spec);
        if path.is_absolute() {
            Ok(path.to_path_buf())
        } else {
            Ok(self.workspace_root().join(path))
        }
    }

    /// Classifies a resolved path: framework-owned if it lies under any
    /// registered framework root, user-owned otherwise.
    #[must_use]
    pub fn classify(&self, resolved: &Path) -> FileOrigin {
        for entry in self.roots.values() {
            if entry.framework && resolved.starts_with(&entry.path) {
                return FileOrigin::FrameworkResource;
            }
        }
        FileOrigin::UserResource
    }

    /// Classifies a path spec without resolving errors: alias URIs over
    /// framework roots are framework-owned, everything unresolvable is
    /// user-owned.
    #[must_use]
    pub fn classify_spec(&self, spec: &str) -> FileOrigin {
        match self.resolve(spec) {
            Ok(path) => self.classify(&path),
            Err(_) => FileOrigin::UserResource,
        }
    }

    /// Registered aliases, in registration order.
    pub fn aliases(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> ResourceRoots {
        let mut roots = ResourceRoots::new("/ws", "/out");
        roots.register_framework_root("geo", "/opt/model/geog");
        roots
    }

    #[test]
    fn test_resolve_alias_uri() {
        let roots = table();
        let path = roots.resolve("geo://landuse/index").unwrap();
        assert_eq!(path, PathBuf::from("/opt/model/geog/landuse/index"));
    }

    #[test]
    fn test_resolve_workspace_relative() {
        let roots = table();
        let path = roots.resolve("run/geogrid").unwrap();
        assert_eq!(path, PathBuf::from("/ws/run/geogrid"));
    }

    #[test]
    fn test_resolve_absolute_passthrough() {
        let roots = table();
        let path = roots.resolve("/tmp/in.nc").unwrap();
        assert_eq!(path, PathBuf::from("/tmp/in.nc"));
    }

    #[test]
    fn test_unknown_alias_fails() {
        let roots = table();
        let err = roots.resolve("nope://x").unwrap_err();
        assert!(matches!(err, SimflowError::UnknownAlias(_)));
    }

    #[test]
    fn test_classify_framework_prefix() {
        let roots = table();
        assert_eq!(
            roots.classify(Path::new("/opt/model/geog/landuse/index")),
            FileOrigin::FrameworkResource
        );
        assert_eq!(
            roots.classify(Path::new("/home/op/obs.nc")),
            FileOrigin::UserResource
        );
    }

    #[test]
    fn test_workspace_alias_is_not_framework() {
        let roots = table();
        assert_eq!(roots.classify_spec("workspace://run/x"), FileOrigin::UserResource);
    }

    #[test]
    fn test_uri_round_trip() {
        let uri = ResourceRoots::uri("geo", "/landuse/index");
        assert_eq!(uri, "geo://landuse/index");
        assert_eq!(
            ResourceRoots::split_uri(&uri),
            Some(("geo", "landuse/index"))
        );
    }
}
