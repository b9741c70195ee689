//! Value types shared between the dependency-linker core and the layers that
//! feed it spans or serve the resulting graph.

use serde::{Deserialize, Serialize};

pub type TraceId = String;
pub type SpanId = String;
pub type ServiceName = String;

/// Role a span plays in an RPC, as reported by instrumentation.
/// `Internal` covers in-process work with no remote counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanKind {
    Server,
    Client,
    Internal,
}

/// One span record as reported by a single tracer. The same span id may be
/// reported more than once, e.g. by the client- and server-side tracers of
/// one RPC; records are merged by id before link inference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSpan {
    pub trace_id: TraceId,
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub kind: SpanKind,
    /// Logical name of the service that reported this record.
    pub service: Option<ServiceName>,
    /// Logical name of the remote endpoint, as seen by the reporter.
    pub peer_service: Option<ServiceName>,
}

/// One directed, call-count-weighted edge of the service dependency graph:
/// `parent` called `child` `call_count` times.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyLink {
    pub parent: ServiceName,
    pub child: ServiceName,
    pub call_count: u64,
}
