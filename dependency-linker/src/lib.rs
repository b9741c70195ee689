//! Infers a service dependency graph from distributed-trace span trees.
//!
//! Given the spans of one trace, [`DependencyLinker`] reconstructs a tolerant
//! tree, walks it breadth-first and accumulates call-count-weighted
//! (caller, callee) edges. Snapshots from independent linker instances are
//! combined with [`merge`].
//!
//! The core is purely in-memory and single-threaded; partition traces across
//! one linker per worker and reduce the snapshots with [`merge`] in any order.

pub mod linker;
pub mod span;
pub mod tree;

pub use linker::{merge, DependencyLinker, LinkObserver, SkipReason};
pub use span::{merge_by_id, LinkSpan};
pub use tree::{NodeRef, NodeValue, SpanTree, Tree, TreeBuilder};

#[cfg(test)]
pub(crate) fn setup_console_logging_for_test() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::{EnvFilter, Layer};

    let filter = EnvFilter::try_from_env("RUST_LOG")
        .unwrap_or_else(|_| EnvFilter::builder().parse("debug").expect("debug is a valid filter"));
    let fmt = tracing_subscriber::fmt::layer()
        // for tests ansi is nice
        .with_ansi(true)
        .compact()
        .with_filter(filter);
    let subscriber = tracing_subscriber::Registry::default().with(fmt);
    // tests share the process, only the first one gets to install it
    let _ = tracing::subscriber::set_global_default(subscriber);
}
