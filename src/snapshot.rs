use std::collections::{BTreeMap, BTreeSet};

use serde::Deserialize;

/// One interval's worth of aggregated metrics, as handed over by the collector.
///
/// Maps are keyed by metric name and ordered, so encoding a snapshot is
/// deterministic.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSnapshot {
    pub counters: BTreeMap<String, f64>,
    pub counter_rates: BTreeMap<String, f64>,
    pub gauges: BTreeMap<String, f64>,
    pub timer_data: BTreeMap<String, TimerStat>,
    pub sets: BTreeMap<String, BTreeSet<String>>,
}

/// A timer's derived statistics: either a single summary value or a tree of
/// named sub-statistics (`mean`, `upper_90`, `histogram.bin_100`, ...).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum TimerStat {
    Value(f64),
    Nested(BTreeMap<String, TimerStat>),
}

impl TimerStat {
    /// Visit every numeric leaf with its dotted path relative to this node.
    /// A bare value is visited once with an empty path.
    pub fn for_each_leaf<F: FnMut(&str, f64)>(&self, mut f: F) {
        let mut path = String::new();
        self.walk(&mut path, &mut f);
    }

    fn walk<F: FnMut(&str, f64)>(&self, path: &mut String, f: &mut F) {
        match self {
            TimerStat::Value(v) => f(path, *v),
            TimerStat::Nested(children) => {
                for (key, child) in children {
                    let restore = path.len();
                    if !path.is_empty() {
                        path.push('.');
                    }
                    path.push_str(key);
                    child.walk(path, f);
                    path.truncate(restore);
                }
            }
        }
    }
}
