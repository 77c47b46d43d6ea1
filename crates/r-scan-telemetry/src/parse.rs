//! ---
//! rscan_section: "02-telemetry"
//! rscan_subsection: "module"
//! rscan_type: "source"
//! rscan_scope: "code"
//! rscan_description: "Engine status polling and channel-state normalisation."
//! rscan_version: "v0.0.0-prealpha"
//! rscan_owner: "tbd"
//! ---
//! Reconciles the engine's two status schemas into a [`ChannelState`].
//!
//! The single-channel schema splits its data between `change_freq` (tuning)
//! and `trunk_update` (call header plus per-system tables). The multi-channel
//! schema reports one `channel_update` record keyed by channel id. Both may
//! appear in the same response, in which case the multi-channel fields win.
use std::time::Duration;

use chrono::Utc;
use r_scan_common::TelemetryConfig;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::error::SchemaError;
use crate::state::{ChannelState, Extras, UNKNOWN_SYSTEM};

const TRUNK_HEADER_KEYS: [&str; 5] = ["json_type", "srcaddr", "grpaddr", "encrypted", "nac"];

/// Stateless translator from raw status payloads to channel snapshots.
#[derive(Debug, Clone)]
pub struct PayloadParser {
    fallback_system: String,
    prefer_engine_name: bool,
    activity_window: Duration,
}

impl PayloadParser {
    /// Create a parser with an explicit fallback label and activity window.
    pub fn new(
        fallback_system: impl Into<String>,
        prefer_engine_name: bool,
        activity_window: Duration,
    ) -> Self {
        Self {
            fallback_system: fallback_system.into(),
            prefer_engine_name,
            activity_window,
        }
    }

    /// Build a parser from the telemetry settings.
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self::new(
            config.system_name.clone(),
            config.prefer_engine_name,
            config.activity_window,
        )
    }

    /// Parse a status response.
    ///
    /// Returns `None` when the payload carries no usable information: not an
    /// array, an empty array, no recognised record, or a structurally broken
    /// record. The caller keeps its previous state in that case.
    pub fn parse(&self, payload: &Value) -> Option<ChannelState> {
        let records = match payload.as_array() {
            Some(records) if !records.is_empty() => records,
            _ => {
                debug!("status payload is not a non-empty array; no update");
                return None;
            }
        };

        match self.collect(records) {
            Ok(Some(frame)) => Some(self.finish(frame)),
            Ok(None) => {
                trace!("status payload contained no recognised records");
                None
            }
            Err(err) => {
                debug!(error = %err, "discarding malformed status payload");
                None
            }
        }
    }

    fn collect(&self, records: &[Value]) -> Result<Option<Frame>, SchemaError> {
        let mut frame = Frame::default();
        let mut recognised = false;

        for record in records.iter().filter_map(Value::as_object) {
            match record.get("json_type").and_then(Value::as_str) {
                Some("trunk_update") => {
                    recognised = true;
                    frame.apply_trunk_header(record);
                }
                Some("change_freq") => {
                    recognised = true;
                    frame.apply_change_freq(record);
                }
                _ => {}
            }
        }

        if !(frame.active && frame.frequency_hz.is_some()) {
            let trunk = records
                .iter()
                .filter_map(Value::as_object)
                .find(|record| json_type(record) == Some("trunk_update"));
            if let Some(record) = trunk {
                self.scan_systems(&mut frame, record)?;
            }
        }

        for record in records.iter().filter_map(Value::as_object) {
            if json_type(record) == Some("channel_update") && frame.apply_channels(record)? {
                recognised = true;
            }
        }

        Ok(recognised.then_some(frame))
    }

    fn scan_systems(&self, frame: &mut Frame, record: &Map<String, Value>) -> Result<(), SchemaError> {
        let system = record
            .iter()
            .filter(|(key, _)| !TRUNK_HEADER_KEYS.contains(&key.as_str()))
            .find_map(|(key, value)| value.as_object().map(|table| (key, table)));
        let Some((key, table)) = system else {
            return Ok(());
        };

        let sysid = id(table.get("sysid"));
        if let Some(top_line) = table.get("top_line").and_then(Value::as_str) {
            if top_line.contains("NAC") {
                frame.derived_system = Some(match sysid {
                    Some(sysid) => format!("System {}", sysid),
                    None => format!("System {}", key),
                });
            }
        }

        if frame.frequency_hz.is_none() {
            frame.frequency_hz = number(table.get("rxchan")).filter(|hz| *hz > 0.0);
        }
        if frame.extras.sysid.is_none() {
            frame.extras.sysid = sysid;
        }
        if frame.extras.wacn.is_none() {
            frame.extras.wacn = id(table.get("wacn"));
        }
        for field in ["rxchan", "txchan", "tsbks"] {
            if let Some(value) = table.get(field) {
                frame.extras.other.insert(field.to_owned(), value.clone());
            }
        }

        let Some(activity) = table.get("frequency_data") else {
            return Ok(());
        };
        let activity = activity.as_object().ok_or(SchemaError::UnexpectedType {
            record: "trunk_update",
            field: "frequency_data",
        })?;

        let freshest = activity
            .iter()
            .filter_map(|(freq, details)| {
                let details = details.as_object()?;
                let age = number(details.get("last_activity"))?;
                Some((freq, details, age))
            })
            .min_by(|a, b| a.2.total_cmp(&b.2));

        if let Some((freq, details, age)) = freshest {
            if age < self.activity_window.as_secs_f64() && !frame.active {
                if let Ok(hz) = freq.trim().parse::<f64>() {
                    frame.frequency_hz = Some(hz);
                    frame
                        .extras
                        .other
                        .insert("activity_freq".to_owned(), Value::from(hz / 1e6));
                }
                frame.talkgroup = details
                    .get("tgids")
                    .and_then(Value::as_array)
                    .and_then(|tgids| tgids.iter().find_map(|tg| id(Some(tg))));
                frame.extras.last_activity_secs = Some(age);
            }
        }
        Ok(())
    }

    fn finish(&self, frame: Frame) -> ChannelState {
        let Frame {
            engine_system,
            derived_system,
            frequency_hz,
            talkgroup,
            active,
            mut extras,
        } = frame;

        let system = if self.prefer_engine_name {
            engine_system
                .or(derived_system)
                .or_else(|| extras.sysid.map(|sysid| format!("System {}", sysid)))
                .unwrap_or_else(|| self.fallback_system.clone())
        } else {
            self.fallback_system.clone()
        };

        extras.active = Some(active);
        extras.timestamp = Some(Utc::now());

        let state = ChannelState {
            system,
            frequency: frequency_hz.map(|hz| hz / 1e6),
            talkgroup_id: talkgroup,
            extras,
        };
        debug!(
            system = %state.system,
            frequency = ?state.frequency,
            talkgroup = ?state.talkgroup_id,
            active,
            "parsed status payload"
        );
        state
    }
}

#[derive(Debug, Default)]
struct Frame {
    engine_system: Option<String>,
    derived_system: Option<String>,
    frequency_hz: Option<f64>,
    talkgroup: Option<u32>,
    active: bool,
    extras: Extras,
}

impl Frame {
    fn apply_trunk_header(&mut self, record: &Map<String, Value>) {
        let source = id(record.get("srcaddr")).unwrap_or(0);
        let group = id(record.get("grpaddr")).unwrap_or(0);
        if source == 0 || group == 0 {
            return;
        }
        self.active = true;
        self.talkgroup = Some(group);
        self.extras.source_address = Some(source);
        self.extras.encrypted = flag(record.get("encrypted"));
        self.extras.nac = id(record.get("nac"));
        debug!(talkgroup = group, source, "active transmission");
    }

    fn apply_change_freq(&mut self, record: &Map<String, Value>) {
        let Some(hz) = number(record.get("freq")).filter(|hz| *hz > 0.0) else {
            return;
        };
        self.frequency_hz = Some(hz);
        self.engine_system = engine_name(record.get("system"));
        self.extras.nac = self.extras.nac.or(id(record.get("nac")));
        self.extras.wacn = id(record.get("wacn"));
        self.extras.sysid = id(record.get("sysid"));
        if let Some(sigtype) = record.get("sigtype") {
            self.extras.other.insert("sigtype".to_owned(), sigtype.clone());
        }
        if let Some(error) = record.get("error") {
            self.extras
                .other
                .insert("tuning_error".to_owned(), error.clone());
        }
    }

    /// Returns true when a channel was found and applied.
    fn apply_channels(&mut self, record: &Map<String, Value>) -> Result<bool, SchemaError> {
        let ids: Vec<String> = match record.get("channels") {
            Some(Value::Array(ids)) => ids.iter().filter_map(channel_key).collect(),
            Some(_) => {
                return Err(SchemaError::UnexpectedType {
                    record: "channel_update",
                    field: "channels",
                })
            }
            None => record
                .iter()
                .filter(|(key, value)| key.as_str() != "json_type" && value.is_object())
                .map(|(key, _)| key.clone())
                .collect(),
        };

        let channels: Vec<(&String, &Map<String, Value>)> = ids
            .iter()
            .filter_map(|key| record.get(key).and_then(Value::as_object).map(|ch| (key, ch)))
            .collect();

        let chosen = channels
            .iter()
            .find(|(_, channel)| channel_is_active(channel))
            .or_else(|| channels.first());
        let Some((key, channel)) = chosen else {
            return Ok(false);
        };

        let talkgroup = id(channel.get("tgid")).filter(|tg| *tg > 0);
        let source = id(channel.get("srcaddr")).filter(|src| *src > 0);
        self.active = talkgroup.is_some() && source.is_some();

        if let Some(hz) = number(channel.get("freq")).filter(|hz| *hz > 0.0) {
            self.frequency_hz = Some(hz);
        }
        if let Some(name) = engine_name(channel.get("system")) {
            self.engine_system = Some(name);
        }
        if channel.contains_key("tgid") {
            self.talkgroup = talkgroup;
        }
        self.extras.source_address = source;
        if let Some(encrypted) = flag(channel.get("encrypted")) {
            self.extras.encrypted = Some(encrypted);
        }
        if let Some(emergency) = flag(channel.get("emergency")) {
            self.extras.emergency = Some(emergency);
        }
        if let Some(quality) = number(channel.get("signal_quality")) {
            self.extras.signal_quality = Some(quality.clamp(0.0, 1.0));
        }
        if let Some(locked) = flag(channel.get("signal_locked")) {
            self.extras.signal_locked = Some(locked);
        }
        for field in ["tag", "srctag", "name"] {
            if let Some(value) = channel.get(field).filter(|v| !v.is_null()) {
                self.extras.other.insert(field.to_owned(), value.clone());
            }
        }
        self.extras
            .other
            .insert("channel".to_owned(), Value::from(key.as_str()));
        Ok(true)
    }
}

fn json_type(record: &Map<String, Value>) -> Option<&str> {
    record.get("json_type").and_then(Value::as_str)
}

fn channel_is_active(channel: &Map<String, Value>) -> bool {
    id(channel.get("tgid")).unwrap_or(0) > 0 && id(channel.get("srcaddr")).unwrap_or(0) > 0
}

fn channel_key(value: &Value) -> Option<String> {
    match value {
        Value::String(key) => Some(key.clone()),
        Value::Number(key) => Some(key.to_string()),
        _ => None,
    }
}

fn engine_name(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|name| !name.is_empty() && *name != UNKNOWN_SYSTEM)
        .map(str::to_owned)
}

/// Numeric field that may arrive as a JSON number or a numeric string.
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn id(value: Option<&Value>) -> Option<u32> {
    number(value)
        .filter(|n| *n >= 0.0 && *n <= f64::from(u32::MAX))
        .map(|n| n as u32)
}

fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        _ => None,
    }
}
