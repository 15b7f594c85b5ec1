use std::fmt::{self, Write};

use crate::snapshot::MetricsSnapshot;

/// Rendering knobs shared by every interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncodeOptions {
    /// Drop counters and sets whose value is zero.
    pub sparse: bool,
    /// Number of decimal places for every numeric field.
    pub precision: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Timer,
    Gauge,
    Set,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MetricType::Counter => "counter",
            MetricType::Timer => "timer",
            MetricType::Gauge => "gauge",
            MetricType::Set => "set",
        })
    }
}

/// A rendered snapshot: `timestamp,namespace,metric,type,value,rate` lines
/// joined by `\n`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncodedPayload(String);

impl EncodedPayload {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[cfg(test)]
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.0.lines()
    }
}

impl From<String> for EncodedPayload {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for EncodedPayload {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

struct LineWriter<'a> {
    out: String,
    timestamp: u64,
    namespace: &'a str,
    precision: usize,
}

impl LineWriter<'_> {
    fn line(&mut self, name: &str, kind: MetricType, value: f64, rate: Option<f64>) {
        if !self.out.is_empty() {
            self.out.push('\n');
        }
        let value = round_half_away(value, self.precision);
        // Writing into a String cannot fail.
        let _ = write!(
            self.out,
            "{},{},{},{},{:.*},",
            self.timestamp, self.namespace, name, kind, self.precision, value
        );
        if let Some(rate) = rate {
            let rate = round_half_away(rate, self.precision);
            let _ = write!(self.out, "{:.*}", self.precision, rate);
        }
    }
}

/// `{:.*}` alone rounds ties to even; ties here round away from zero.
fn round_half_away(value: f64, precision: usize) -> f64 {
    let scale = 10f64.powi(precision as i32);
    let scaled = (value * scale).round() / scale;
    if scaled.is_finite() { scaled } else { value }
}

/// Render one snapshot. Sections are emitted in a fixed order: counters,
/// timers, gauges, sets.
pub fn encode(
    timestamp: u64,
    namespace: &str,
    snapshot: &MetricsSnapshot,
    options: &EncodeOptions,
) -> EncodedPayload {
    let mut w = LineWriter {
        out: String::new(),
        timestamp,
        namespace,
        precision: options.precision,
    };

    for (name, &value) in &snapshot.counters {
        if options.sparse && value == 0.0 {
            continue;
        }
        let rate = snapshot.counter_rates.get(name).copied();
        w.line(name, MetricType::Counter, value, rate);
    }

    for (name, stat) in &snapshot.timer_data {
        stat.for_each_leaf(|path, value| {
            if path.is_empty() {
                w.line(name, MetricType::Timer, value, None);
            } else {
                w.line(&format!("{name}.{path}"), MetricType::Timer, value, None);
            }
        });
    }

    for (name, &value) in &snapshot.gauges {
        w.line(name, MetricType::Gauge, value, None);
    }

    for (name, members) in &snapshot.sets {
        let cardinality = members.len();
        if options.sparse && cardinality == 0 {
            continue;
        }
        w.line(name, MetricType::Set, cardinality as f64, None);
    }

    EncodedPayload(w.out)
}
