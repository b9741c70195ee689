use std::collections::HashMap;

use api_structs::{RawSpan, ServiceName, SpanId, SpanKind};

/// A span reduced to the fields link inference needs, with duplicate-reported
/// records for the same span id already collapsed into one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSpan {
    pub id: SpanId,
    pub parent_id: Option<SpanId>,
    pub kind: SpanKind,
    pub service: Option<ServiceName>,
    pub peer_service: Option<ServiceName>,
}

/// Collapses raw records sharing a span id into exactly one [`LinkSpan`] per
/// id, preserving the order in which ids were first reported.
///
/// When one id carries both client-side and server-side records (both tracers
/// of one RPC reported it), the server-side evidence wins for kind and
/// service. The caller is taken from the server record's `peer_service`,
/// falling back to the client record's own `service`, since the client record
/// names the calling service. Unresolvable fields stay `None`.
pub fn merge_by_id(spans: Vec<RawSpan>) -> Vec<LinkSpan> {
    let mut first_seen_order: Vec<SpanId> = vec![];
    let mut by_id: HashMap<SpanId, Vec<RawSpan>> = HashMap::new();
    for span in spans {
        if !by_id.contains_key(&span.id) {
            first_seen_order.push(span.id.clone());
        }
        by_id.entry(span.id.clone()).or_default().push(span);
    }
    first_seen_order
        .into_iter()
        .map(|id| {
            let records = by_id.remove(&id).expect("id was registered above");
            adapt(id, records)
        })
        .collect()
}

fn adapt(id: SpanId, records: Vec<RawSpan>) -> LinkSpan {
    let parent_id = records.iter().find_map(|r| r.parent_id.clone());
    let server = records.iter().find(|r| r.kind == SpanKind::Server);
    let client = records.iter().find(|r| r.kind == SpanKind::Client);
    let (kind, service, peer_service) = match (server, client) {
        (Some(server), client) => {
            let peer = server
                .peer_service
                .clone()
                .or_else(|| client.and_then(|c| c.service.clone()));
            (SpanKind::Server, server.service.clone(), peer)
        }
        (None, Some(client)) => (
            SpanKind::Client,
            client.service.clone(),
            client.peer_service.clone(),
        ),
        (None, None) => {
            let first = records.first().expect("at least one record per id");
            (SpanKind::Internal, first.service.clone(), first.peer_service.clone())
        }
    };
    LinkSpan {
        id,
        parent_id,
        kind,
        service,
        peer_service,
    }
}
