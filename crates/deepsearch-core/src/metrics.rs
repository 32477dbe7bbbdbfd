use once_cell::sync::OnceCell;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::{KeyValue, global};
use tracing::info;

struct PipelineMetrics {
    step_runs: Counter<u64>,
    step_duration_ms: Histogram<f64>,
    loop_iterations: Histogram<u64>,
    trace_writes: Counter<u64>,
}

static METRICS: OnceCell<PipelineMetrics> = OnceCell::new();

fn handles() -> &'static PipelineMetrics {
    METRICS.get_or_init(|| {
        let meter: Meter = global::meter("deepsearch.pipeline");
        PipelineMetrics {
            step_runs: meter
                .u64_counter("pipeline_step_runs_total")
                .with_description("Total leaf step executions by status")
                .init(),
            step_duration_ms: meter
                .f64_histogram("pipeline_step_duration_ms")
                .with_description("Leaf step runtime in milliseconds")
                .init(),
            loop_iterations: meter
                .u64_histogram("quality_gate_iterations")
                .with_description("Iterations consumed by quality-gate loops")
                .init(),
            trace_writes: meter
                .u64_counter("trace_writes_total")
                .with_description("Trace and snapshot records written by kind")
                .init(),
        }
    })
}

/// Hint to operators that OTEL metrics export can be configured externally.
pub fn init_metrics_from_env(service_name: &str) {
    if std::env::var("DEEPSEARCH_OTEL_METRICS_ENDPOINT").is_ok() {
        info!(
            target = "telemetry",
            "DEEPSEARCH_OTEL_METRICS_ENDPOINT detected for {service_name}. Configure an OTLP meter provider in your deployment to export pipeline metrics."
        );
    }
}

/// Record one leaf step execution (no-op if no provider installed).
pub fn record_step_metrics(step: &str, status: &str, duration_ms: u64) {
    let metrics = handles();
    let attrs = [
        KeyValue::new("step", step.to_string()),
        KeyValue::new("status", status.to_string()),
    ];
    metrics.step_runs.add(1, &attrs);
    metrics.step_duration_ms.record(duration_ms as f64, &attrs);
}

pub fn record_loop_metrics(loop_name: &str, iterations: u32, escalated: bool) {
    let attrs = [
        KeyValue::new("loop", loop_name.to_string()),
        KeyValue::new("escalated", escalated),
    ];
    handles().loop_iterations.record(u64::from(iterations), &attrs);
}

pub fn record_trace_write(kind: &'static str) {
    handles()
        .trace_writes
        .add(1, &[KeyValue::new("kind", kind)]);
}
