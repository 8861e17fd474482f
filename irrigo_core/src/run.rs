//! Run configuration: per-channel actuator positions and protocols plus the
//! global sensor cadence.
//!
//! A run record is validated as a whole. Every problem found is collected
//! into one [`IrrigoError::Validation`] so an operator fixing a file sees
//! all of them at once, and nothing is applied unless the record is clean.
//! Documents can come in as a parsed JSON value, a byte buffer or a reader;
//! all three end up in [`RunConfig::from_record`].

use std::collections::BTreeSet;
use std::io::Read;

use irrigo_config::{PositionRecord, ProtocolRecord, RunRecord};
use irrigo_traits::BlobStore;
use tracing::{debug, info};

use crate::error::{IrrigoError, Result};
use crate::hw_error::map_boxed;
use crate::protocol::Sequencer;

/// Where the actuators go to water one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelPosition {
    pub stepper: i32,
    pub servo: i32,
    pub pump_time_us: u32,
    pub pump_intensity: u8,
}

impl From<&PositionRecord> for ChannelPosition {
    fn from(r: &PositionRecord) -> Self {
        Self {
            stepper: r.stepper,
            servo: r.servo,
            pump_time_us: r.pump_time_us,
            pump_intensity: r.pump_intensity,
        }
    }
}

/// Bounds a run record is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunLimits {
    pub channel_count: usize,
    pub servo_min: i32,
    pub servo_max: i32,
}

impl RunLimits {
    pub fn new(channel_count: usize) -> Self {
        Self {
            channel_count,
            servo_min: 0,
            servo_max: 180,
        }
    }

    pub fn with_servo_range(mut self, min: i32, max: i32) -> Self {
        self.servo_min = min;
        self.servo_max = max;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
struct ChannelRun {
    slot: usize,
    position: ChannelPosition,
    sequencer: Sequencer,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunConfig {
    channels: Vec<ChannelRun>,
    sensor_period_ms: u32,
}

fn slot_set(
    what: &str,
    slots: impl Iterator<Item = u32>,
    limits: &RunLimits,
    problems: &mut Vec<String>,
) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    for slot in slots {
        if slot as usize >= limits.channel_count {
            problems.push(format!(
                "{what} slot {slot} out of range (0..{})",
                limits.channel_count
            ));
        }
        if !seen.insert(slot) {
            problems.push(format!("duplicate {what} slot {slot}"));
        }
    }
    seen
}

impl RunConfig {
    /// Validate `r` and build the configuration. Latched step times are
    /// re-based on `now_ms`.
    pub fn from_record(r: &RunRecord, limits: &RunLimits, now_ms: u32) -> Result<Self> {
        let mut problems = Vec::new();
        if r.sensor_period_ms == 0 {
            problems.push("sensor period must be at least 1 ms".to_string());
        }

        let positions = slot_set("position", r.positions.iter().map(|p| p.slot), limits, &mut problems);
        let protocols = slot_set("protocol", r.protocols.iter().map(|q| q.slot), limits, &mut problems);
        for slot in positions.symmetric_difference(&protocols) {
            let (has, lacks) = if positions.contains(slot) {
                ("position", "protocol")
            } else {
                ("protocol", "position")
            };
            problems.push(format!("slot {slot} has a {has} but no {lacks}"));
        }

        for p in &r.positions {
            if p.servo < limits.servo_min || p.servo > limits.servo_max {
                problems.push(format!(
                    "slot {}: servo angle {} outside {}..={}",
                    p.slot, p.servo, limits.servo_min, limits.servo_max
                ));
            }
            if p.pump_intensity > 100 {
                problems.push(format!(
                    "slot {}: pump intensity {}% above 100%",
                    p.slot, p.pump_intensity
                ));
            }
        }

        let mut sequencers = Vec::with_capacity(r.protocols.len());
        for q in &r.protocols {
            match Sequencer::from_record(q, now_ms) {
                Ok(s) => sequencers.push((q.slot, s)),
                Err(e) => problems.push(format!("slot {}: {e}", q.slot)),
            }
        }

        if !problems.is_empty() {
            return Err(IrrigoError::Validation(problems.join("; ")));
        }

        let mut channels: Vec<ChannelRun> = sequencers
            .into_iter()
            .filter_map(|(slot, sequencer)| {
                let p = r.positions.iter().find(|p| p.slot == slot)?;
                Some(ChannelRun {
                    slot: slot as usize,
                    position: ChannelPosition::from(p),
                    sequencer,
                })
            })
            .collect();
        channels.sort_by_key(|c| c.slot);
        debug!(channels = channels.len(), period_ms = r.sensor_period_ms, "run configuration accepted");
        Ok(Self {
            channels,
            sensor_period_ms: r.sensor_period_ms,
        })
    }

    pub fn from_value(v: serde_json::Value, limits: &RunLimits, now_ms: u32) -> Result<Self> {
        let r: RunRecord = serde_json::from_value(v)
            .map_err(|e| IrrigoError::Validation(format!("run record: {e}")))?;
        Self::from_record(&r, limits, now_ms)
    }

    pub fn from_slice(bytes: &[u8], limits: &RunLimits, now_ms: u32) -> Result<Self> {
        let r: RunRecord = serde_json::from_slice(bytes)
            .map_err(|e| IrrigoError::Validation(format!("run record: {e}")))?;
        Self::from_record(&r, limits, now_ms)
    }

    pub fn from_reader<R: Read>(reader: R, limits: &RunLimits, now_ms: u32) -> Result<Self> {
        let r: RunRecord = serde_json::from_reader(reader)
            .map_err(|e| IrrigoError::Validation(format!("run record: {e}")))?;
        Self::from_record(&r, limits, now_ms)
    }

    pub fn to_record(&self, now_ms: u32) -> RunRecord {
        let mut positions = Vec::with_capacity(self.channels.len());
        let mut protocols: Vec<ProtocolRecord> = Vec::with_capacity(self.channels.len());
        for c in &self.channels {
            let slot = u32::try_from(c.slot).unwrap_or(u32::MAX);
            positions.push(PositionRecord {
                slot,
                stepper: c.position.stepper,
                servo: c.position.servo,
                pump_time_us: c.position.pump_time_us,
                pump_intensity: c.position.pump_intensity,
            });
            protocols.push(c.sequencer.to_record(slot, now_ms));
        }
        RunRecord {
            positions,
            protocols,
            sensor_period_ms: self.sensor_period_ms,
        }
    }

    pub fn to_json(&self, now_ms: u32) -> Result<Vec<u8>> {
        serde_json::to_vec(&self.to_record(now_ms))
            .map_err(|e| IrrigoError::Validation(format!("encode run record: {e}")))
    }

    /// `Ok(None)` when the store has no document under `name`.
    pub fn load(
        store: &dyn BlobStore,
        name: &str,
        limits: &RunLimits,
        now_ms: u32,
    ) -> Result<Option<Self>> {
        let Some(bytes) = store.read(name).map_err(map_boxed)? else {
            info!(name, "no stored run configuration");
            return Ok(None);
        };
        let cfg = Self::from_slice(&bytes, limits, now_ms)?;
        info!(name, channels = cfg.channels.len(), "run configuration loaded");
        Ok(Some(cfg))
    }

    pub fn save(&self, store: &mut dyn BlobStore, name: &str, now_ms: u32) -> Result<()> {
        let bytes = self.to_json(now_ms)?;
        store.write(name, &bytes).map_err(map_boxed)
    }

    pub fn sensor_period_ms(&self) -> u32 {
        self.sensor_period_ms
    }

    /// Configured channels in ascending order.
    pub fn active_channels(&self) -> impl Iterator<Item = usize> + '_ {
        self.channels.iter().map(|c| c.slot)
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    fn find(&self, channel: usize) -> Option<&ChannelRun> {
        self.channels.iter().find(|c| c.slot == channel)
    }

    pub fn position(&self, channel: usize) -> Option<&ChannelPosition> {
        self.find(channel).map(|c| &c.position)
    }

    pub fn sequencer(&self, channel: usize) -> Option<&Sequencer> {
        self.find(channel).map(|c| &c.sequencer)
    }

    pub fn sequencer_mut(&mut self, channel: usize) -> Option<&mut Sequencer> {
        self.channels
            .iter_mut()
            .find(|c| c.slot == channel)
            .map(|c| &mut c.sequencer)
    }

    /// Slot, position and sequencer of the `index`-th configured channel.
    pub(crate) fn entry_mut(&mut self, index: usize) -> Option<(usize, ChannelPosition, &mut Sequencer)> {
        self.channels
            .get_mut(index)
            .map(|c| (c.slot, c.position, &mut c.sequencer))
    }

    /// True once every non-cyclic protocol has finished.
    pub fn all_finished(&self) -> bool {
        self.channels.iter().all(|c| c.sequencer.is_finished())
    }
}
