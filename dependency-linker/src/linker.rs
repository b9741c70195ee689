use api_structs::{DependencyLink, RawSpan, ServiceName, SpanKind};
use indexmap::IndexMap;
use tracing::{debug, instrument};

use crate::span::{merge_by_id, LinkSpan};
use crate::tree::{NodeRef, NodeValue, TreeBuilder};

/// Why a traversed node contributed no link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The node is the synthetic root of a broken span tree.
    SyntheticNode,
    /// Non-RPC span, never produces a link.
    NonRpcSpan,
    /// Root server span whose peer was never recorded; the external caller
    /// is uninstrumented and cannot be attributed.
    RootPeerUnknown,
    CallerUnknown,
    CalleeUnknown,
}

/// Notified at the decision points of link inference. All methods default to
/// no-ops; control flow never depends on an observer.
pub trait LinkObserver {
    fn synthetic_root_created(&mut self) {}
    fn node_skipped(&mut self, _span: Option<&LinkSpan>, _reason: SkipReason) {}
    fn link_recorded(&mut self, _caller: &str, _callee: &str) {}
}

/// Default observer: reports decisions through `tracing` at debug level.
struct TracingObserver;

impl LinkObserver for TracingObserver {
    fn synthetic_root_created(&mut self) {
        debug!("trace did not form a single tree, spans hang under a synthetic root");
    }

    fn node_skipped(&mut self, span: Option<&LinkSpan>, reason: SkipReason) {
        match span {
            Some(span) => debug!(id = %span.id, ?reason, "skipping span"),
            None => debug!(?reason, "skipping node"),
        }
    }

    fn link_recorded(&mut self, caller: &str, callee: &str) {
        debug!(%caller, %callee, "incrementing link");
    }
}

/// Accumulates call-count-weighted (caller, callee) edges across traces fed
/// to [`put_trace`](DependencyLinker::put_trace).
///
/// One instance is meant to be driven by a single worker; it holds its
/// running counts without synchronization. For coarse-grained parallelism,
/// give each worker its own linker, snapshot each with
/// [`link`](DependencyLinker::link) and combine the snapshots with [`merge`].
pub struct DependencyLinker {
    link_map: IndexMap<(ServiceName, ServiceName), u64>,
    observer: Box<dyn LinkObserver>,
}

impl Default for DependencyLinker {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyLinker {
    pub fn new() -> Self {
        Self::with_observer(Box::new(TracingObserver))
    }

    pub fn with_observer(observer: Box<dyn LinkObserver>) -> Self {
        DependencyLinker {
            link_map: IndexMap::new(),
            observer,
        }
    }

    /// Merges duplicate-reported records by span id, then infers links as
    /// [`put_trace`](DependencyLinker::put_trace) does.
    ///
    /// All spans must belong to the same trace.
    #[instrument(skip_all)]
    pub fn put_raw_trace(&mut self, spans: Vec<RawSpan>) -> &mut Self {
        if spans.is_empty() {
            return self;
        }
        self.put_trace(merge_by_id(spans))
    }

    /// Builds a tolerant tree from `spans`, traverses it breadth-first and
    /// increments the running count of every (caller, callee) service pair
    /// it can resolve. Unresolvable nodes contribute nothing. Empty input is
    /// a no-op. Chainable.
    ///
    /// All spans must belong to the same trace.
    #[instrument(skip_all)]
    pub fn put_trace(&mut self, spans: impl IntoIterator<Item = LinkSpan>) -> &mut Self {
        let mut builder = TreeBuilder::new();
        let mut registered_any = false;
        for span in spans {
            registered_any = true;
            builder.add_node(span.parent_id.clone(), span.id.clone(), span);
        }
        if !registered_any {
            return self;
        }
        let tree = builder.build();
        if matches!(tree.root().value(), NodeValue::Synthetic) {
            self.observer.synthetic_root_created();
        }

        debug!("traversing trace tree, breadth-first");
        for node in tree.traverse() {
            let span = match node.value() {
                NodeValue::Real(span) => span,
                NodeValue::Synthetic => {
                    self.observer.node_skipped(None, SkipReason::SyntheticNode);
                    continue;
                }
            };
            let (caller, callee) = match span.kind {
                SpanKind::Server => {
                    if node.is_root() && span.peer_service.is_none() {
                        // the external caller is uninstrumented
                        self.observer
                            .node_skipped(Some(span), SkipReason::RootPeerUnknown);
                        continue;
                    }
                    (span.peer_service.clone(), span.service.clone())
                }
                SpanKind::Client => (span.service.clone(), span.peer_service.clone()),
                SpanKind::Internal => {
                    self.observer.node_skipped(Some(span), SkipReason::NonRpcSpan);
                    continue;
                }
            };

            // Local spans may sit between this node and its remote caller;
            // the nearest server ancestor names the calling service.
            let caller = caller.or_else(|| nearest_server_ancestor_service(node));

            match (caller, callee) {
                (Some(caller), Some(callee)) => {
                    self.observer.link_recorded(&caller, &callee);
                    let count = self.link_map.entry((caller, callee)).or_insert(0);
                    *count = count.saturating_add(1);
                }
                (None, _) => {
                    self.observer
                        .node_skipped(Some(span), SkipReason::CallerUnknown);
                }
                (_, None) => {
                    self.observer
                        .node_skipped(Some(span), SkipReason::CalleeUnknown);
                }
            }
        }
        self
    }

    /// Snapshot of the running counts as links, in first-insertion order.
    /// Non-destructive: the counts keep accumulating afterwards.
    pub fn link(&self) -> Vec<DependencyLink> {
        self.link_map
            .iter()
            .map(|((parent, child), call_count)| DependencyLink {
                parent: parent.clone(),
                child: child.clone(),
                call_count: *call_count,
            })
            .collect()
    }
}

fn nearest_server_ancestor_service(node: NodeRef<'_, LinkSpan>) -> Option<ServiceName> {
    let mut ancestor = node.parent();
    while let Some(current) = ancestor {
        if let NodeValue::Real(span) = current.value() {
            if span.kind == SpanKind::Server {
                // stop at the first server ancestor even if it has no name
                return span.service.clone();
            }
        }
        ancestor = current.parent();
    }
    None
}

/// Combines link lists by summing call counts per (parent, child) pair, in
/// first-seen order across the concatenated inputs. Never drops a pair and
/// never decreases a count. Commutative and associative over the multiset of
/// links; the empty input is the identity.
pub fn merge(lists: impl IntoIterator<Item = Vec<DependencyLink>>) -> Vec<DependencyLink> {
    let mut links: IndexMap<(ServiceName, ServiceName), u64> = IndexMap::new();
    for link in lists.into_iter().flatten() {
        let count = links.entry((link.parent, link.child)).or_insert(0);
        *count = count.saturating_add(link.call_count);
    }
    links
        .into_iter()
        .map(|((parent, child), call_count)| DependencyLink {
            parent,
            child,
            call_count,
        })
        .collect()
}
