//! Control-plane message model: the discovery beacon and the
//! command/event channel between a master controller and device slaves.

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::board::BoardModel;
use crate::config::{
    Attenuator, ChannelMask, FileFormat, Resolution, SaveMode, StreamConfig, TransportKind,
};
use crate::error::CodecError;

/// Identity a device broadcasts so a master can enumerate slaves without
/// prior configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub model: BoardModel,
    pub addrs: Vec<Ipv4Addr>,
}

impl DeviceIdentity {
    /// Beacon wire format: `MODEL;ip;ip;...`
    pub fn encode(&self) -> String {
        let mut out = self.model.as_str().to_string();
        for addr in &self.addrs {
            out.push(';');
            out.push_str(&addr.to_string());
        }
        out
    }

    pub fn decode(text: &str) -> Result<Self, CodecError> {
        let mut parts = text.trim().split(';');
        let model = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| CodecError::Malformed("empty beacon".into()))?;
        let model = BoardModel::parse(model)?;
        let mut addrs = Vec::new();
        for part in parts {
            let addr = part
                .parse::<Ipv4Addr>()
                .map_err(|_| CodecError::Malformed(format!("bad beacon address: {part}")))?;
            addrs.push(addr);
        }
        Ok(Self { model, addrs })
    }
}

/// Kinds of control-plane events, used as handler registry keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    GetNewSetting,
    StartStreaming,
    StopStreaming,
}

/// The `StreamConfig` subset a master may push to a slave. Absent fields
/// leave the slave's current value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport: Option<TransportKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<Resolution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decimation: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<ChannelMask>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attenuator: Option<Attenuator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FileFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_mode: Option<SaveMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_cap: Option<u64>,
}

impl StreamSettings {
    /// Overlay these settings onto a base config.
    pub fn merge_into(&self, cfg: &mut StreamConfig) {
        if let Some(v) = self.transport {
            cfg.transport = v;
        }
        if let Some(v) = &self.host {
            cfg.host = v.clone();
        }
        if let Some(v) = self.port {
            cfg.port = v;
        }
        if let Some(v) = self.resolution {
            cfg.resolution = v;
        }
        if let Some(v) = self.decimation {
            cfg.decimation = v;
        }
        if let Some(v) = self.channels {
            cfg.channels = v;
        }
        if let Some(v) = self.attenuator {
            cfg.attenuator = v;
        }
        if let Some(v) = self.format {
            cfg.format = v;
        }
        if let Some(v) = self.save_mode {
            cfg.save_mode = v;
        }
        if self.sample_cap.is_some() {
            cfg.sample_cap = self.sample_cap;
        }
    }
}

/// A tagged control-plane event plus the settings relevant to it.
/// Exchanged as one JSON object per line on the command channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum NetConfigMessage {
    GetNewSetting(StreamSettings),
    StartStreaming(StreamSettings),
    StopStreaming,
}

impl NetConfigMessage {
    pub fn kind(&self) -> EventKind {
        match self {
            NetConfigMessage::GetNewSetting(_) => EventKind::GetNewSetting,
            NetConfigMessage::StartStreaming(_) => EventKind::StartStreaming,
            NetConfigMessage::StopStreaming => EventKind::StopStreaming,
        }
    }

    pub fn encode(&self) -> String {
        // Serialization of these enums cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(line: &str) -> Result<Self, CodecError> {
        serde_json::from_str(line).map_err(|e| CodecError::Malformed(e.to_string()))
    }
}
