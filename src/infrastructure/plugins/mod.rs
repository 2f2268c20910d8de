//! Environment plugins loaded at startup.

pub mod resolver;

pub use resolver::{load_resolvers, ResolverManifest, SubprocessResolver, MANIFEST_FILE};
