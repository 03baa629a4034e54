use tracing::{Span, field};

use super::TraceId;

/// Create a root span for a request / listener / job.
pub fn root_span(name: &'static str, trace_id: &TraceId) -> Span {
    tracing::info_span!(
        "root",
        name = %name,
        trace_id = %trace_id.as_str(),
        session_id = field::Empty,
        user_id = field::Empty
    )
}

/// Create a span nested under the current span. It carries no trace_id of
/// its own; call it inside an entered root span to inherit one.
pub fn child_span(name: &'static str) -> Span {
    tracing::info_span!(
        "child",
        name = %name,
        session_id = field::Empty,
        user_id = field::Empty
    )
}
