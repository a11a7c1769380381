use tracing::trace;

// Counters are trace events; there is no metrics registry.

pub fn inc_requests(route: &'static str) {
    trace!(target = "feeds.metrics", route = route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed_ms: u128) {
    trace!(
        target = "feeds.metrics",
        stage = stage,
        elapsed_ms = elapsed_ms as u64,
        "stage_elapsed"
    );
}
