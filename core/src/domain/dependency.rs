//! Dependency Capability
//!
//! Heterogeneous items (pipelines, jobs, tasks, stacks, services) all take
//! part in dependency resolution through this one capability, so a single
//! generic sorter serves every kind.

use std::path::Path;

/// Capability exposed by anything that can participate in dependency
/// resolution. Names are compared case-insensitively by the resolver.
pub trait DependencyNode {
    /// The item's declared name.
    fn name(&self) -> &str;

    /// Names of items this one depends on, same kind only.
    fn dependencies(&self) -> &[String];

    /// The fragment file this item came from.
    fn source(&self) -> &Path;

    /// Append a dependency.
    fn add_dependency(&mut self, name: String);

    /// Record the inverse relation; maintained by the resolver after sorting.
    fn add_required_by(&mut self, name: String);

    /// The computed inverse relation.
    fn required_by(&self) -> &[String];
}
