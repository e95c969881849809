//! The dynamic timeseries registry.
//!
//! Sparkplug peers may attach a different label set to every message, so a
//! metric name alone does not identify a timeseries. The registry keys each
//! entry on the metric name and fans out into slots, one per distinct
//! label-name multiset; a slot holds one gauge value per label-value tuple.
//! Slot lookup is a linear multiset-equality scan, which is fine because
//! slot counts per name stay small in practice.
//!
//! All dynamic state sits behind one process-wide readers-writer lock:
//! message handling and resets take the write side, scrapes and
//! remote-write snapshots take the read side. The fixed counter families
//! hold their values in atomic cells so increments only need the read side
//! once a cell exists.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

use crate::common::{
    now_seconds, GatheredSample, ObserveOutcome, SampleValue, PROGNAME, VERSION,
};
use crate::formatting::{format_label, write_help_line, write_metric_line, write_type_line};
use crate::topic::{NodeLabels, SiteLabels};

/// One (label-name multiset, gauge) pair under a metric name.
#[derive(Debug)]
struct TimeseriesSlot {
    label_names: Vec<String>,
    values: HashMap<Vec<String>, f64>,
}

impl TimeseriesSlot {
    fn new(label_names: Vec<String>) -> TimeseriesSlot {
        TimeseriesSlot { label_names, values: HashMap::new() }
    }

    /// Unordered equality over label names.
    fn matches(&self, label_names: &[String]) -> bool {
        if self.label_names.len() != label_names.len() {
            return false;
        }
        let mut ours: Vec<&str> = self.label_names.iter().map(String::as_str).collect();
        let mut theirs: Vec<&str> = label_names.iter().map(String::as_str).collect();
        ours.sort_unstable();
        theirs.sort_unstable();
        ours == theirs
    }
}

/// The fixed counter families.
#[derive(Clone, Copy, Debug)]
pub(crate) enum Counter {
    Pushed,
    InvalidName,
    Connects,
    Disconnects,
    RebirthAttempts,
    RebirthSuccess,
    RebirthFailures,
    RebirthDelayed,
}

#[derive(Debug)]
struct CounterFamily {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    cells: HashMap<Vec<String>, Arc<AtomicU64>>,
}

impl CounterFamily {
    fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> CounterFamily {
        CounterFamily { name, help, label_names, cells: HashMap::new() }
    }

    fn get(&self, values: &[&str]) -> Option<Arc<AtomicU64>> {
        let key: Vec<String> = values.iter().map(|v| (*v).to_string()).collect();
        self.cells.get(&key).cloned()
    }

    fn cell(&mut self, values: &[&str]) -> Arc<AtomicU64> {
        let key: Vec<String> = values.iter().map(|v| (*v).to_string()).collect();
        self.cells.entry(key).or_default().clone()
    }
}

/// A gauge family with atomic cells, storing `f64` bit patterns.
#[derive(Debug)]
struct GaugeFamily {
    name: &'static str,
    help: &'static str,
    label_names: &'static [&'static str],
    cells: HashMap<Vec<String>, Arc<AtomicU64>>,
}

impl GaugeFamily {
    fn new(
        name: &'static str,
        help: &'static str,
        label_names: &'static [&'static str],
    ) -> GaugeFamily {
        GaugeFamily { name, help, label_names, cells: HashMap::new() }
    }

    fn set(&mut self, values: &[&str], value: f64) {
        let key: Vec<String> = values.iter().map(|v| (*v).to_string()).collect();
        self.cells.entry(key).or_default().store(value.to_bits(), Ordering::Release);
    }
}

/// The gateway's own operational metric families, re-seeded on every reset.
#[derive(Debug)]
struct CounterSet {
    pushed: CounterFamily,
    invalid_names: CounterFamily,
    connects: CounterFamily,
    disconnects: CounterFamily,
    rebirth_attempts: CounterFamily,
    rebirth_success: CounterFamily,
    rebirth_failures: CounterFamily,
    rebirth_delayed: CounterFamily,
    last_pushed: GaugeFamily,
}

const SITE_LABELS: &[&str] = &["sp_namespace", "sp_group_id", "sp_edge_node_id", "sp_device_id"];
const NODE_LABELS: &[&str] = &["sp_namespace", "sp_group_id", "sp_edge_node_id"];
const SERVICE_LABELS: &[&str] = &["job"];

impl CounterSet {
    fn new() -> CounterSet {
        CounterSet {
            pushed: CounterFamily::new(
                "sp_total_metrics_pushed",
                "Number of messages published on a MQTT topic",
                SITE_LABELS,
            ),
            invalid_names: CounterFamily::new(
                "sp_invalid_metric_name_received",
                "Total non-compliant metric names received",
                SITE_LABELS,
            ),
            connects: CounterFamily::new(
                "sp_connection_established_count",
                "Total MQTT connections established",
                SERVICE_LABELS,
            ),
            disconnects: CounterFamily::new(
                "sp_connection_lost_count",
                "Total MQTT disconnections",
                SERVICE_LABELS,
            ),
            rebirth_attempts: CounterFamily::new(
                "sp_reincarnation_attempt_count",
                "Total NCMD message attempts",
                NODE_LABELS,
            ),
            rebirth_success: CounterFamily::new(
                "sp_reincarnation_success_count",
                "Total successful NCMD attempts",
                NODE_LABELS,
            ),
            rebirth_failures: CounterFamily::new(
                "sp_reincarnation_failure_count",
                "Total NCMD message failures",
                NODE_LABELS,
            ),
            rebirth_delayed: CounterFamily::new(
                "sp_reincarnation_delayed_count",
                "Total delayed NCMD attempts due to connection issues",
                NODE_LABELS,
            ),
            last_pushed: GaugeFamily::new(
                "sp_last_pushed_timestamp",
                "Last time a metric was pushed to a MQTT topic",
                SITE_LABELS,
            ),
        }
    }

    fn family(&self, counter: Counter) -> &CounterFamily {
        match counter {
            Counter::Pushed => &self.pushed,
            Counter::InvalidName => &self.invalid_names,
            Counter::Connects => &self.connects,
            Counter::Disconnects => &self.disconnects,
            Counter::RebirthAttempts => &self.rebirth_attempts,
            Counter::RebirthSuccess => &self.rebirth_success,
            Counter::RebirthFailures => &self.rebirth_failures,
            Counter::RebirthDelayed => &self.rebirth_delayed,
        }
    }

    fn family_mut(&mut self, counter: Counter) -> &mut CounterFamily {
        match counter {
            Counter::Pushed => &mut self.pushed,
            Counter::InvalidName => &mut self.invalid_names,
            Counter::Connects => &mut self.connects,
            Counter::Disconnects => &mut self.disconnects,
            Counter::RebirthAttempts => &mut self.rebirth_attempts,
            Counter::RebirthSuccess => &mut self.rebirth_success,
            Counter::RebirthFailures => &mut self.rebirth_failures,
            Counter::RebirthDelayed => &mut self.rebirth_delayed,
        }
    }

    fn families(&self) -> [&CounterFamily; 8] {
        [
            &self.pushed,
            &self.invalid_names,
            &self.connects,
            &self.disconnects,
            &self.rebirth_attempts,
            &self.rebirth_success,
            &self.rebirth_failures,
            &self.rebirth_delayed,
        ]
    }
}

#[derive(Debug)]
struct RegistryState {
    series: HashMap<String, Vec<TimeseriesSlot>>,
    counters: CounterSet,
    edge_nodes: HashSet<String>,
}

#[derive(Debug)]
struct Inner {
    state: RwLock<RegistryState>,
    connected: AtomicBool,
    job: String,
}

/// An observation the registry refused.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ObserveError {
    /// The composed label set names the same label twice, so a value tuple
    /// cannot be formed.
    #[error("label {label:?} appears more than once for metric {metric_name:?}")]
    DuplicateLabel {
        /// The metric the sample was destined for.
        metric_name: String,
        /// The repeated label name.
        label: String,
    },
}

/// Shared handle to the gateway registry.
///
/// Clones are cheap and refer to the same underlying state.
#[derive(Clone, Debug)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Creates an empty registry. `job` labels the connection counters.
    pub fn new(job: impl Into<String>) -> Registry {
        Registry {
            inner: Arc::new(Inner {
                state: RwLock::new(RegistryState {
                    series: HashMap::new(),
                    counters: CounterSet::new(),
                    edge_nodes: HashSet::new(),
                }),
                connected: AtomicBool::new(false),
                job: job.into(),
            }),
        }
    }

    /// Mirrors broker connectivity into the `mqtt_connected` gauge.
    pub fn set_connected(&self, connected: bool) {
        self.inner.connected.store(connected, Ordering::Release);
    }

    /// Whether the broker link is currently up.
    pub fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    /// Records an edge node sighting. Returns `true` the first time a
    /// `group/node` key is seen; the caller starts the rebirth loop on
    /// that transition. The table survives registry resets.
    pub fn note_edge_node(&self, key: impl Into<String>) -> bool {
        let mut state = self.write();
        state.edge_nodes.insert(key.into())
    }

    /// Records a sample.
    ///
    /// The sample's labels are the four site labels followed by any extra
    /// labels recovered from the metric name. An existing slot is matched
    /// on label-name multiset equality; a miss appends a new slot rather
    /// than failing, so label-set conflicts cannot occur. Every accepted
    /// sample also bumps the pushed counter and the last-pushed timestamp
    /// for the site.
    pub fn observe(
        &self,
        site: &SiteLabels,
        metric_name: &str,
        extra_labels: &[(String, String)],
        value: f64,
    ) -> Result<ObserveOutcome, ObserveError> {
        let mut label_names: Vec<String> =
            SiteLabels::names().iter().map(|n| (*n).to_string()).collect();
        let mut label_values: Vec<String> =
            site.values().iter().map(|v| (*v).to_string()).collect();
        for (name, val) in extra_labels {
            label_names.push(name.clone());
            label_values.push(val.clone());
        }

        {
            let mut seen = HashSet::new();
            for name in &label_names {
                if !seen.insert(name.as_str()) {
                    return Err(ObserveError::DuplicateLabel {
                        metric_name: metric_name.to_string(),
                        label: name.clone(),
                    });
                }
            }
        }

        let mut state = self.write();

        let outcome = match state.series.get_mut(metric_name) {
            None => {
                let mut slot = TimeseriesSlot::new(label_names);
                slot.values.insert(label_values, value);
                state.series.insert(metric_name.to_string(), vec![slot]);
                ObserveOutcome::Created
            }
            Some(slots) => {
                match slots.iter_mut().find(|slot| slot.matches(&label_names)) {
                    Some(slot) => {
                        // The slot may order its names differently; map the
                        // incoming values into the slot's order.
                        let by_name: HashMap<&str, &str> = label_names
                            .iter()
                            .map(String::as_str)
                            .zip(label_values.iter().map(String::as_str))
                            .collect();
                        let key: Vec<String> = slot
                            .label_names
                            .iter()
                            .map(|name| by_name[name.as_str()].to_string())
                            .collect();
                        slot.values.insert(key, value);
                        ObserveOutcome::Updated
                    }
                    None => {
                        let mut slot = TimeseriesSlot::new(label_names);
                        slot.values.insert(label_values, value);
                        slots.push(slot);
                        ObserveOutcome::Extended
                    }
                }
            }
        };

        let site_values = site.values();
        state.counters.last_pushed.set(&site_values, now_seconds());
        state
            .counters
            .family_mut(Counter::Pushed)
            .cell(&site_values)
            .fetch_add(1, Ordering::Relaxed);

        Ok(outcome)
    }

    pub(crate) fn increment(&self, counter: Counter, values: &[&str]) {
        {
            let state = self.read();
            if let Some(cell) = state.counters.family(counter).get(values) {
                cell.fetch_add(1, Ordering::Relaxed);
                return;
            }
        }
        let mut state = self.write();
        state.counters.family_mut(counter).cell(values).fetch_add(1, Ordering::Relaxed);
    }

    /// Bumps the invalid-name counter for a site.
    pub fn inc_invalid_name(&self, site: &SiteLabels) {
        self.increment(Counter::InvalidName, &site.values());
    }

    /// Bumps the connection-established counter.
    pub fn inc_connect(&self) {
        self.increment(Counter::Connects, &[self.inner.job.as_str()]);
    }

    /// Bumps the connection-lost counter.
    pub fn inc_disconnect(&self) {
        self.increment(Counter::Disconnects, &[self.inner.job.as_str()]);
    }

    /// Bumps the rebirth-attempt counter for a node.
    pub fn inc_rebirth_attempt(&self, node: &NodeLabels) {
        self.increment(Counter::RebirthAttempts, &node.values());
    }

    /// Bumps the rebirth-success counter for a node.
    pub fn inc_rebirth_success(&self, node: &NodeLabels) {
        self.increment(Counter::RebirthSuccess, &node.values());
    }

    /// Bumps the rebirth-failure counter for a node.
    pub fn inc_rebirth_failure(&self, node: &NodeLabels) {
        self.increment(Counter::RebirthFailures, &node.values());
    }

    /// Bumps the rebirth-delayed counter for a node.
    pub fn inc_rebirth_delayed(&self, node: &NodeLabels) {
        self.increment(Counter::RebirthDelayed, &node.values());
    }

    /// Renders the registry in the Prometheus text exposition format.
    ///
    /// Holds the read lock for the duration of the render; writers block
    /// only for that long.
    pub fn render(&self) -> String {
        let state = self.read();
        let mut buffer = String::new();

        let build_info = format!("{PROGNAME}_build_info");
        write_help_line(&mut buffer, &build_info, "Build info of this instance");
        write_type_line(&mut buffer, &build_info, "gauge");
        write_metric_line(&mut buffer, &build_info, &[format_label("version", VERSION)], 1);
        buffer.push('\n');

        let connected = format!("{PROGNAME}_mqtt_connected");
        write_help_line(&mut buffer, &connected, "Is the gateway connected to the MQTT broker");
        write_type_line(&mut buffer, &connected, "gauge");
        write_metric_line(&mut buffer, &connected, &[], i32::from(self.is_connected()));
        buffer.push('\n');

        for family in state.counters.families() {
            if family.cells.is_empty() {
                continue;
            }
            write_help_line(&mut buffer, family.name, family.help);
            write_type_line(&mut buffer, family.name, "counter");
            for (values, cell) in sorted_cells(&family.cells) {
                let labels = rendered_labels(family.label_names, values);
                write_metric_line(&mut buffer, family.name, &labels, cell.load(Ordering::Acquire));
            }
            buffer.push('\n');
        }

        let last_pushed = &state.counters.last_pushed;
        if !last_pushed.cells.is_empty() {
            write_help_line(&mut buffer, last_pushed.name, last_pushed.help);
            write_type_line(&mut buffer, last_pushed.name, "gauge");
            for (values, cell) in sorted_cells(&last_pushed.cells) {
                let labels = rendered_labels(last_pushed.label_names, values);
                let value = f64::from_bits(cell.load(Ordering::Acquire));
                write_metric_line(&mut buffer, last_pushed.name, &labels, value);
            }
            buffer.push('\n');
        }

        let mut names: Vec<&String> = state.series.keys().collect();
        names.sort_unstable();
        for name in names {
            write_type_line(&mut buffer, name, "gauge");
            for slot in &state.series[name] {
                let mut rendered: Vec<(Vec<String>, f64)> = slot
                    .values
                    .iter()
                    .map(|(values, value)| {
                        let labels: Vec<String> = slot
                            .label_names
                            .iter()
                            .zip(values.iter())
                            .map(|(k, v)| format_label(k, v))
                            .collect();
                        (labels, *value)
                    })
                    .collect();
                rendered.sort_unstable_by(|a, b| a.0.cmp(&b.0));
                for (labels, value) in rendered {
                    write_metric_line(&mut buffer, name, &labels, value);
                }
            }
            buffer.push('\n');
        }

        buffer
    }

    /// Gathers every sample for the remote-write encoder.
    ///
    /// The snapshot is atomic with respect to registry mutations: the read
    /// lock is held until every sample has been copied out.
    pub fn gather(&self) -> Vec<GatheredSample> {
        let state = self.read();
        let mut samples = Vec::new();

        samples.push(GatheredSample {
            name: format!("{PROGNAME}_build_info"),
            labels: vec![("version".to_string(), VERSION.to_string())],
            value: SampleValue::Gauge(1.0),
        });
        samples.push(GatheredSample {
            name: format!("{PROGNAME}_mqtt_connected"),
            labels: vec![],
            value: SampleValue::Gauge(if self.is_connected() { 1.0 } else { 0.0 }),
        });

        for family in state.counters.families() {
            for (values, cell) in sorted_cells(&family.cells) {
                samples.push(GatheredSample {
                    name: family.name.to_string(),
                    labels: paired_labels(family.label_names, values),
                    value: SampleValue::Counter(cell.load(Ordering::Acquire) as f64),
                });
            }
        }

        let last_pushed = &state.counters.last_pushed;
        for (values, cell) in sorted_cells(&last_pushed.cells) {
            samples.push(GatheredSample {
                name: last_pushed.name.to_string(),
                labels: paired_labels(last_pushed.label_names, values),
                value: SampleValue::Gauge(f64::from_bits(cell.load(Ordering::Acquire))),
            });
        }

        let mut names: Vec<&String> = state.series.keys().collect();
        names.sort_unstable();
        for name in names {
            for slot in &state.series[name] {
                let mut cells: Vec<(&Vec<String>, f64)> =
                    slot.values.iter().map(|(values, value)| (values, *value)).collect();
                cells.sort_unstable_by(|a, b| a.0.cmp(b.0));
                for (values, value) in cells {
                    samples.push(GatheredSample {
                        name: name.clone(),
                        labels: slot
                            .label_names
                            .iter()
                            .cloned()
                            .zip(values.iter().cloned())
                            .collect(),
                        value: SampleValue::Gauge(value),
                    });
                }
            }
        }

        samples
    }

    /// Empties all dynamic slots and re-creates the fixed counter
    /// families, bounding cardinality between remote-write windows. The
    /// edge-node table is untouched.
    pub fn reset(&self) {
        let mut state = self.write();
        state.series.clear();
        state.counters = CounterSet::new();
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryState> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn sorted_cells(
    cells: &HashMap<Vec<String>, Arc<AtomicU64>>,
) -> Vec<(&Vec<String>, &Arc<AtomicU64>)> {
    let mut sorted: Vec<_> = cells.iter().collect();
    sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
    sorted
}

fn rendered_labels(names: &[&str], values: &[String]) -> Vec<String> {
    names.iter().zip(values.iter()).map(|(k, v)| format_label(k, v)).collect()
}

fn paired_labels(names: &[&str], values: &[String]) -> Vec<(String, String)> {
    names.iter().map(|n| (*n).to_string()).zip(values.iter().cloned()).collect()
}

#[cfg(test)]
mod tests {
    use crate::common::{ObserveOutcome, SampleValue};
    use crate::topic::SiteLabels;

    use super::{ObserveError, Registry};

    fn site() -> SiteLabels {
        SiteLabels {
            namespace: "spBv1.0".into(),
            group_id: "GroupA".into(),
            edge_node_id: "Node1".into(),
            device_id: "Bus".into(),
        }
    }

    #[test]
    fn first_sample_creates_a_series() {
        let registry = Registry::new("sparkplug-gateway");
        let outcome = registry.observe(&site(), "voltage", &[], 12.5).unwrap();
        assert_eq!(outcome, ObserveOutcome::Created);

        let rendered = registry.render();
        assert!(rendered.contains(
            "voltage{sp_namespace=\"spBv1.0\",sp_group_id=\"GroupA\",\
             sp_edge_node_id=\"Node1\",sp_device_id=\"Bus\"} 12.5\n"
        ));
    }

    #[test]
    fn same_label_multiset_updates_in_place() {
        let registry = Registry::new("sparkplug-gateway");
        let extras_ab =
            vec![("a".to_string(), "1".to_string()), ("b".to_string(), "2".to_string())];
        let extras_ba =
            vec![("b".to_string(), "2".to_string()), ("a".to_string(), "1".to_string())];

        assert_eq!(
            registry.observe(&site(), "rpm", &extras_ab, 1.0).unwrap(),
            ObserveOutcome::Created
        );
        // Same multiset in a different order hits the same slot.
        assert_eq!(
            registry.observe(&site(), "rpm", &extras_ba, 2.0).unwrap(),
            ObserveOutcome::Updated
        );

        let gauges: Vec<_> = registry
            .gather()
            .into_iter()
            .filter(|sample| sample.name == "rpm")
            .collect();
        assert_eq!(gauges.len(), 1);
        assert_eq!(gauges[0].value, SampleValue::Gauge(2.0));
    }

    #[test]
    fn new_label_multiset_extends_with_a_new_slot() {
        let registry = Registry::new("sparkplug-gateway");
        let with_line = vec![("line".to_string(), "3".to_string())];

        assert_eq!(registry.observe(&site(), "rpm", &[], 1.0).unwrap(), ObserveOutcome::Created);
        assert_eq!(
            registry.observe(&site(), "rpm", &with_line, 2.0).unwrap(),
            ObserveOutcome::Extended
        );

        let gauges: Vec<_> = registry
            .gather()
            .into_iter()
            .filter(|sample| sample.name == "rpm")
            .collect();
        assert_eq!(gauges.len(), 2);

        // No two slots share a multiset: re-observing either set updates.
        assert_eq!(registry.observe(&site(), "rpm", &[], 3.0).unwrap(), ObserveOutcome::Updated);
        assert_eq!(
            registry.observe(&site(), "rpm", &with_line, 4.0).unwrap(),
            ObserveOutcome::Updated
        );
        let gauges: Vec<_> = registry
            .gather()
            .into_iter()
            .filter(|sample| sample.name == "rpm")
            .collect();
        assert_eq!(gauges.len(), 2);
    }

    #[test]
    fn duplicate_labels_drop_the_sample() {
        let registry = Registry::new("sparkplug-gateway");
        let clash = vec![("sp_device_id".to_string(), "other".to_string())];
        let err = registry.observe(&site(), "rpm", &clash, 1.0).unwrap_err();
        assert_eq!(
            err,
            ObserveError::DuplicateLabel { metric_name: "rpm".into(), label: "sp_device_id".into() }
        );
        assert!(registry.gather().iter().all(|sample| sample.name != "rpm"));
    }

    #[test]
    fn observations_maintain_the_push_counters() {
        let registry = Registry::new("sparkplug-gateway");
        registry.observe(&site(), "voltage", &[], 1.0).unwrap();
        registry.observe(&site(), "voltage", &[], 2.0).unwrap();

        let samples = registry.gather();
        let pushed = samples
            .iter()
            .find(|sample| sample.name == "sp_total_metrics_pushed")
            .expect("pushed counter");
        assert_eq!(pushed.value, SampleValue::Counter(2.0));
        assert!(pushed.labels.contains(&("sp_device_id".to_string(), "Bus".to_string())));

        assert!(samples.iter().any(|sample| sample.name == "sp_last_pushed_timestamp"));
    }

    #[test]
    fn reset_drops_dynamic_slots_and_reseeds_counters() {
        let registry = Registry::new("sparkplug-gateway");
        registry.observe(&site(), "voltage", &[], 1.0).unwrap();
        registry.inc_connect();

        registry.reset();

        let samples = registry.gather();
        assert!(samples.iter().all(|sample| sample.name != "voltage"));
        assert!(samples.iter().all(|sample| sample.name != "sp_total_metrics_pushed"));

        // The families are re-seeded and usable immediately.
        registry.inc_connect();
        let samples = registry.gather();
        let connects = samples
            .iter()
            .find(|sample| sample.name == "sp_connection_established_count")
            .expect("connects counter");
        assert_eq!(connects.value, SampleValue::Counter(1.0));
    }

    #[test]
    fn edge_node_table_survives_resets() {
        let registry = Registry::new("sparkplug-gateway");
        assert!(registry.note_edge_node("GroupA/Node1"));
        assert!(!registry.note_edge_node("GroupA/Node1"));

        registry.reset();
        assert!(!registry.note_edge_node("GroupA/Node1"));
        assert!(registry.note_edge_node("GroupA/Node2"));
    }

    #[test]
    fn render_always_exposes_the_fixed_gauges() {
        let registry = Registry::new("sparkplug-gateway");
        let rendered = registry.render();
        assert!(rendered.contains("# TYPE sparkplug_gateway_build_info gauge\n"));
        assert!(rendered.contains("sparkplug_gateway_mqtt_connected 0\n"));

        registry.set_connected(true);
        assert!(registry.render().contains("sparkplug_gateway_mqtt_connected 1\n"));
    }

    #[test]
    fn connection_counters_carry_the_job_label() {
        let registry = Registry::new("gateway-test");
        registry.inc_connect();
        registry.inc_disconnect();
        registry.inc_disconnect();

        let rendered = registry.render();
        assert!(rendered.contains("sp_connection_established_count{job=\"gateway-test\"} 1\n"));
        assert!(rendered.contains("sp_connection_lost_count{job=\"gateway-test\"} 2\n"));
    }
}
