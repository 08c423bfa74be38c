use std::collections::BTreeMap;
use std::sync::Arc;

/// The distributed-tracing collaborator.
///
/// The tracker only reads trace context from the controller and asks it to open and close the
/// child span that wraps a dispatch; the span stack itself belongs to the controller, so every
/// method takes `&self`.
#[cfg_attr(test, mockall::automock)]
pub trait TracingController {
    fn trace_id(&self) -> Option<String>;

    fn span_id(&self) -> Option<String>;

    fn parent_span_id(&self) -> Option<String>;

    fn is_valid_span_id(&self, candidate: &str) -> bool;

    /// Mint a fresh span id.
    fn new_span_id(&self) -> String;

    /// Push a child span, called when a dispatch begins.
    fn start_child_span(&self);

    /// Pop the child span, called once every call of the dispatch is finalized.
    fn stop_child_span(&self);

    /// Tags describing the active span, merged into every new event.
    fn span_specific_tags(&self) -> BTreeMap<String, String>;
}

impl<T: TracingController + ?Sized> TracingController for Arc<T> {
    fn trace_id(&self) -> Option<String> {
        (**self).trace_id()
    }

    fn span_id(&self) -> Option<String> {
        (**self).span_id()
    }

    fn parent_span_id(&self) -> Option<String> {
        (**self).parent_span_id()
    }

    fn is_valid_span_id(&self, candidate: &str) -> bool {
        (**self).is_valid_span_id(candidate)
    }

    fn new_span_id(&self) -> String {
        (**self).new_span_id()
    }

    fn start_child_span(&self) {
        (**self).start_child_span()
    }

    fn stop_child_span(&self) {
        (**self).stop_child_span()
    }

    fn span_specific_tags(&self) -> BTreeMap<String, String> {
        (**self).span_specific_tags()
    }
}
