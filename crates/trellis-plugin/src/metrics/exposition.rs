//! Pull-based text exposition (Prometheus format).

use std::fmt::Write;

use crate::health::HealthSnapshot;

use super::MetricsSnapshot;

#[derive(Clone, Copy)]
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
        }
    }
}

struct Family {
    name: &'static str,
    help: &'static str,
    kind: MetricType,
    samples: Vec<(Vec<(&'static str, String)>, String)>,
}

impl Family {
    fn new(name: &'static str, help: &'static str, kind: MetricType) -> Self {
        Self {
            name,
            help,
            kind,
            samples: Vec::new(),
        }
    }

    fn push(&mut self, labels: Vec<(&'static str, String)>, value: impl ToString) {
        self.samples.push((labels, value.to_string()));
    }

    fn write_to(&self, out: &mut String) {
        let _ = writeln!(out, "# HELP {} {}", self.name, self.help);
        let _ = writeln!(out, "# TYPE {} {}", self.name, self.kind.as_str());
        for (labels, value) in &self.samples {
            out.push_str(self.name);
            if !labels.is_empty() {
                out.push('{');
                for (i, (key, val)) in labels.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    let _ = write!(out, "{key}=\"{}\"", escape_label(val));
                }
                out.push('}');
            }
            let _ = writeln!(out, " {value}");
        }
    }
}

fn escape_label(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '"' => escaped.push_str("\\\""),
            '\n' => escaped.push_str("\\n"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn seconds(micros: u64) -> String {
    format!("{:.6}", micros as f64 / 1_000_000.0)
}

/// Renders metrics and health as one text exposition document.
///
/// Families with no samples are still emitted so scrapers see a stable
/// schema.
pub fn render_text(metrics: &[MetricsSnapshot], health: &[HealthSnapshot]) -> String {
    use MetricType::{Counter, Gauge};

    let mut up = Family::new("trellis_plugin_up", "Whether the plugin is serving hooks", Gauge);
    let mut consecutive = Family::new(
        "trellis_plugin_consecutive_errors",
        "Consecutive errors since the last success",
        Gauge,
    );
    for h in health {
        up.push(vec![("plugin", h.plugin.clone())], u8::from(h.is_up()));
        consecutive.push(vec![("plugin", h.plugin.clone())], h.consecutive_errors);
    }

    let mut init = Family::new(
        "trellis_plugin_init_duration_seconds",
        "Duration of the plugin init step",
        Gauge,
    );
    let mut start = Family::new(
        "trellis_plugin_start_duration_seconds",
        "Duration of the plugin start step",
        Gauge,
    );
    let mut executions = Family::new(
        "trellis_plugin_hook_executions_total",
        "Hook handler invocations",
        Counter,
    );
    let mut errors = Family::new(
        "trellis_plugin_hook_errors_total",
        "Hook handler invocations that failed or timed out",
        Counter,
    );
    let mut timeouts = Family::new(
        "trellis_plugin_hook_timeouts_total",
        "Hook handler invocations that timed out",
        Counter,
    );
    let mut duration = Family::new(
        "trellis_plugin_hook_duration_seconds_total",
        "Cumulative hook handler duration",
        Counter,
    );
    let mut published = Family::new(
        "trellis_plugin_events_published_total",
        "Events published by the plugin",
        Counter,
    );
    let mut received = Family::new(
        "trellis_plugin_events_received_total",
        "Events delivered to the plugin",
        Counter,
    );
    let mut calls = Family::new(
        "trellis_plugin_service_calls_total",
        "Host service accesses granted to the plugin",
        Counter,
    );

    for m in metrics {
        let plugin = || vec![("plugin", m.plugin.clone())];
        init.push(plugin(), seconds(m.init_duration_us));
        start.push(plugin(), seconds(m.start_duration_us));
        published.push(plugin(), m.events_published);
        received.push(plugin(), m.events_received);
        calls.push(plugin(), m.service_calls);

        for (hook, stats) in &m.hooks {
            let labels = || vec![("plugin", m.plugin.clone()), ("hook", hook.clone())];
            executions.push(labels(), stats.executions);
            errors.push(labels(), stats.errors);
            timeouts.push(labels(), stats.timeouts);
            duration.push(labels(), seconds(stats.total_duration_us));
        }
    }

    let mut out = String::new();
    for family in [
        up,
        consecutive,
        init,
        start,
        executions,
        errors,
        timeouts,
        duration,
        published,
        received,
        calls,
    ] {
        family.write_to(&mut out);
    }
    out
}
