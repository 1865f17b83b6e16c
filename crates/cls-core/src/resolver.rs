//! `GroupResolver`: the injected upcall interface NodeSet group algebra
//! delegates to (spec §6 "Group resolver interface").
//!
//! NodeSet never opens a file or runs an external command itself; it only
//! ever calls through this trait. `StaticGroupResolver` is the in-memory
//! default described in `SPEC_FULL.md` §C.3 — the file/YAML/upcall-backed
//! resolvers a real `clush`/`groups.conf` stack would use stay out of
//! scope (spec.md §1).

use std::collections::HashMap;

use crate::error::ResolverError;
use crate::nodeset::NodeSet;

/// Four optional upcalls a group source can answer.
pub trait GroupResolver: Send + Sync {
    /// Resolve a group name in `source` (or the default source when `None`)
    /// to a node set.
    fn map(&self, source: Option<&str>, group: &str) -> Result<NodeSet, ResolverError>;

    /// The "all nodes" set of `source` (or the default source).
    fn all(&self, source: Option<&str>) -> Result<NodeSet, ResolverError>;

    /// The raw group names known to `source` (or the default source),
    /// used by `@@src` group discovery.
    fn list(&self, source: Option<&str>) -> Result<Vec<String>, ResolverError>;

    /// Group names `node` belongs to in `source` (or the default source).
    fn reverse(&self, source: Option<&str>, node: &str) -> Result<Vec<String>, ResolverError>;
}

/// A process-wide-cacheable, file/upcall-free resolver backed entirely by
/// in-memory maps. This is the zero-configuration default: callers who
/// never touch `@group` syntax pay nothing (spec §9 design notes).
#[derive(Debug, Default, Clone)]
pub struct StaticGroupResolver {
    default_source: Option<String>,
    groups: HashMap<(Option<String>, String), NodeSet>,
}

impl StaticGroupResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_source(mut self, source: impl Into<String>) -> Self {
        self.default_source = Some(source.into());
        self
    }

    pub fn insert_group(
        &mut self,
        source: Option<impl Into<String>>,
        name: impl Into<String>,
        nodes: NodeSet,
    ) -> &mut Self {
        self.groups
            .insert((source.map(Into::into), name.into()), nodes);
        self
    }

    fn key_source(&self, source: Option<&str>) -> Option<String> {
        source
            .map(str::to_string)
            .or_else(|| self.default_source.clone())
    }
}

impl GroupResolver for StaticGroupResolver {
    fn map(&self, source: Option<&str>, group: &str) -> Result<NodeSet, ResolverError> {
        let key = (self.key_source(source), group.to_string());
        self.groups.get(&key).cloned().ok_or_else(|| {
            ResolverError::new(
                source.unwrap_or("<default>"),
                "map",
                format!("unknown group `{group}`"),
            )
        })
    }

    fn all(&self, source: Option<&str>) -> Result<NodeSet, ResolverError> {
        let src = self.key_source(source);
        let mut out = NodeSet::empty();
        for ((s, _), nodes) in &self.groups {
            if *s == src {
                out = out.union(nodes);
            }
        }
        Ok(out)
    }

    fn list(&self, source: Option<&str>) -> Result<Vec<String>, ResolverError> {
        let src = self.key_source(source);
        let mut names: Vec<String> = self
            .groups
            .keys()
            .filter(|(s, _)| *s == src)
            .map(|(_, name)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }

    fn reverse(&self, source: Option<&str>, node: &str) -> Result<Vec<String>, ResolverError> {
        let src = self.key_source(source);
        let mut names: Vec<String> = self
            .groups
            .iter()
            .filter(|((s, _), nodes)| *s == src && nodes.contains(node))
            .map(|((_, name), _)| name.clone())
            .collect();
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_resolver_round_trips_groups() {
        let mut r = StaticGroupResolver::new();
        r.insert_group(None::<String>, "a", NodeSet::parse("n[1-9]", None).unwrap());
        r.insert_group(None::<String>, "b", NodeSet::parse("n[6-11]", None).unwrap());
        let a = r.map(None, "a").unwrap();
        let b = r.map(None, "b").unwrap();
        let sym = a.symmetric_difference(&b);
        assert_eq!(sym.format(Default::default()), "n[1-5,10-11]");
    }
}
