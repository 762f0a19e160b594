// src/acquisition/waveform.rs
//! Waveform buffer and delay-windowed aggregation.
//!
//! The buffer is swapped wholesale at the start of a new pulse-train and
//! appended to across the pulses of one square wave; it is never edited in
//! place, so concurrent diagnostic readers only ever observe complete
//! states. Every aggregate discards the first `delay` of each half-cycle,
//! where electrode polarization and RC charging transients bias the signal.

use std::collections::BTreeMap;
use std::time::Duration;

use tracing::warn;

use crate::hal::types::Reading;
use crate::utils::stats::{mean, percent_dev};

/// Ordered sequence of synchronized readings for one pulse-train.
#[derive(Debug, Clone, Default)]
pub struct Waveform {
    readings: Vec<Reading>,
}

/// Delay-windowed view of one pulse.
struct PulseWindow {
    polarity: i8,
    currents_ma: Vec<f64>,
    voltages_mv: Vec<f64>,
}

impl Waveform {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every reading; called when a new pulse-train starts.
    pub fn clear(&mut self) {
        self.readings.clear();
    }

    /// Append the readings of one completed pulse.
    pub fn extend(&mut self, readings: impl IntoIterator<Item = Reading>) {
        self.readings.extend(readings);
    }

    /// All readings in acquisition order.
    pub fn readings(&self) -> &[Reading] {
        &self.readings
    }

    /// Whether the buffer holds no readings at all.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Number of distinct pulse indices recorded.
    pub fn pulse_count(&self) -> usize {
        let mut ids: Vec<u32> = self.readings.iter().map(|r| r.pulse).collect();
        ids.sort_unstable();
        ids.dedup();
        ids.len()
    }

    /// Group readings per pulse, keeping only samples at or after `delay`
    /// into that pulse. Pulses whose window ends up empty are dropped.
    fn pulse_windows(&self, delay: Duration) -> Vec<PulseWindow> {
        let mut starts: BTreeMap<u32, Duration> = BTreeMap::new();
        for reading in &self.readings {
            starts
                .entry(reading.pulse)
                .and_modify(|start| *start = (*start).min(reading.elapsed))
                .or_insert(reading.elapsed);
        }

        let mut windows: BTreeMap<u32, PulseWindow> = BTreeMap::new();
        for reading in &self.readings {
            let start = starts[&reading.pulse];
            if reading.elapsed < start + delay {
                continue;
            }
            let window = windows.entry(reading.pulse).or_insert_with(|| PulseWindow {
                polarity: reading.polarity,
                currents_ma: Vec::new(),
                voltages_mv: Vec::new(),
            });
            window.currents_ma.push(reading.current_ma);
            window.voltages_mv.push(reading.voltage_mv);
        }
        windows.into_values().collect()
    }

    fn injection_windows(&self, delay: Duration) -> Vec<PulseWindow> {
        self.pulse_windows(delay)
            .into_iter()
            .filter(|w| w.polarity != 0)
            .collect()
    }

    /// Per-pulse transfer resistances Vmn/Iab [ohm] over the delay window.
    fn pulse_resistances(&self, delay: Duration) -> Vec<f64> {
        self.injection_windows(delay)
            .iter()
            .filter_map(|w| {
                let i = mean(&w.currents_ma);
                if i == 0.0 {
                    None
                } else {
                    Some(mean(&w.voltages_mv) / i)
                }
            })
            .collect()
    }

    /// Stacked transfer resistance [ohm]; 0.0 with a warning when the buffer
    /// holds no usable injection pulse.
    pub fn resistance(&self, delay: Duration) -> f64 {
        let resistances = self.pulse_resistances(delay);
        if resistances.is_empty() {
            warn!("no injection pulses in waveform buffer, resistance undefined");
            return 0.0;
        }
        mean(&resistances)
    }

    /// Percent standard deviation of the per-pulse resistances.
    pub fn dev_percent(&self, delay: Duration) -> f64 {
        percent_dev(&self.pulse_resistances(delay))
    }

    /// Mean injected current magnitude [mA].
    pub fn iab_ma(&self, delay: Duration) -> f64 {
        let per_pulse: Vec<f64> = self
            .injection_windows(delay)
            .iter()
            .map(|w| {
                let abs: Vec<f64> = w.currents_ma.iter().map(|c| c.abs()).collect();
                mean(&abs)
            })
            .collect();
        mean(&per_pulse)
    }

    /// Mean polarity-corrected potential difference [mV].
    pub fn vmn_mv(&self, delay: Duration) -> f64 {
        let per_pulse: Vec<f64> = self
            .injection_windows(delay)
            .iter()
            .map(|w| f64::from(w.polarity) * mean(&w.voltages_mv))
            .collect();
        mean(&per_pulse)
    }

    /// Self-potential [mV]: mean voltage across positive-polarity pulses
    /// plus mean across negative-polarity pulses, over two. Requires at
    /// least one pulse of each polarity; otherwise returns the neutral 0.0
    /// with a warning.
    pub fn sp_mv(&self, delay: Duration) -> f64 {
        let windows = self.injection_windows(delay);
        let positives: Vec<f64> = windows
            .iter()
            .filter(|w| w.polarity > 0)
            .map(|w| mean(&w.voltages_mv))
            .collect();
        let negatives: Vec<f64> = windows
            .iter()
            .filter(|w| w.polarity < 0)
            .map(|w| mean(&w.voltages_mv))
            .collect();
        if positives.is_empty() || negatives.is_empty() {
            warn!("self-potential requires both polarities, returning neutral 0.0");
            return 0.0;
        }
        (mean(&positives) + mean(&negatives)) / 2.0
    }
}
