use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DomainError;

// ── MAC address ───────────────────────────────────────────────────────────────

/// Canonical MAC address: uppercase hex, colon-separated (`AA:BB:CC:DD:EE:FF`).
///
/// The canonical form is the upsert key for devices, so every MAC entering the
/// system goes through [`Mac::parse`] first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Mac(pub String);

impl Mac {
    /// Parse and canonicalise a MAC address.
    ///
    /// Accepts colon-, dash-, and dot-separated or bare 12-digit hex forms.
    pub fn parse(s: &str) -> Result<Mac, DomainError> {
        let hex: String = s
            .chars()
            .filter(|c| !matches!(c, ':' | '-' | '.'))
            .collect();
        if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DomainError::InvalidMac(s.to_string()));
        }
        let upper = hex.to_ascii_uppercase();
        let pairs: Vec<&str> = (0..6).map(|i| &upper[i * 2..i * 2 + 2]).collect();
        Ok(Mac(pairs.join(":")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last six hex digits without separators, lowercased.
    /// Shelly devices embed this tail in their AP SSID and mDNS hostname.
    pub fn tail(&self) -> String {
        self.0.replace(':', "").to_ascii_lowercase()[6..].to_string()
    }
}

impl std::fmt::Display for Mac {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Device ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceStatus::Online => write!(f, "online"),
            DeviceStatus::Offline => write!(f, "offline"),
            DeviceStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// A managed relay. Mutated by provisioning completion, discovery imports,
/// and explicit updates; destroyed only by explicit delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    /// Store-assigned id; 0 until first persisted.
    pub id: i64,
    pub mac: Mac,
    pub name: String,
    pub ip: Option<String>,
    pub device_type: String,
    pub firmware: String,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    /// Free-form settings map (Wi-Fi, MQTT, auth, relay config, …).
    pub settings: Value,
}

impl Device {
    pub fn new(mac: Mac, name: impl Into<String>) -> Self {
        Device {
            id: 0,
            mac,
            name: name.into(),
            ip: None,
            device_type: String::new(),
            firmware: String::new(),
            status: DeviceStatus::Unknown,
            last_seen: None,
            settings: Value::Object(Default::default()),
        }
    }
}

/// A named device configuration template. `name` is the unique key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub name: String,
    pub description: String,
    pub device_type: String,
    pub config: Value,
}

// ── Discovery ─────────────────────────────────────────────────────────────────

/// An unprovisioned device observed by an agent during a Wi-Fi scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    pub mac: Mac,
    pub ssid: String,
    pub model: String,
    pub generation: u8,
    /// IP of the device on its own AP-mode network.
    pub ip: String,
    pub signal: i32,
    pub agent_id: String,
    pub discovered_at: DateTime<Utc>,
}

/// Classify a Shelly AP-mode SSID into a model identifier.
///
/// Longest-prefix wins (`shellyplus1` before `shelly1`); unrecognised SSIDs
/// default to `SHSW-1`.
pub fn classify_ssid(ssid: &str) -> &'static str {
    let lower = ssid.to_ascii_lowercase();
    const TABLE: &[(&str, &str)] = &[
        ("shellyplus1", "SPSW-001X16EU"),
        ("shellydimmer", "SHDM-1"),
        ("shellyplug", "SHPLG-S"),
        ("shellyht", "SHHT-1"),
        ("shelly25", "SHSW-25"),
        ("shellyem", "SHEM"),
        ("shelly1", "SHSW-1"),
    ];
    for (prefix, model) in TABLE {
        if lower.starts_with(prefix) {
            return model;
        }
    }
    "SHSW-1"
}

/// Device generation for a model identifier: 2 for Plus/Pro-era hardware,
/// 1 otherwise.
pub fn model_generation(model: &str) -> u8 {
    if model.contains("PLUS")
        || model.starts_with("SPSW-")
        || model.starts_with("SNSN-")
        || model.starts_with("SPSH-")
    {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parse_canonicalises() {
        let m = Mac::parse("aa-bb-cc-dd-ee-ff").unwrap();
        assert_eq!(m.as_str(), "AA:BB:CC:DD:EE:FF");

        let m = Mac::parse("aabbccddeeff").unwrap();
        assert_eq!(m.as_str(), "AA:BB:CC:DD:EE:FF");

        let m = Mac::parse("AA:BB:CC:DD:EE:FF").unwrap();
        assert_eq!(m.as_str(), "AA:BB:CC:DD:EE:FF");
    }

    #[test]
    fn mac_parse_rejects_garbage() {
        assert!(Mac::parse("not-a-mac").is_err());
        assert!(Mac::parse("AA:BB:CC:DD:EE").is_err());
        assert!(Mac::parse("AA:BB:CC:DD:EE:GG").is_err());
    }

    #[test]
    fn mac_tail() {
        let m = Mac::parse("A4:CF:12:34:56:78").unwrap();
        assert_eq!(m.tail(), "345678");
    }

    #[test]
    fn ssid_classification() {
        assert_eq!(classify_ssid("shelly1-AABBCC"), "SHSW-1");
        assert_eq!(classify_ssid("shellyplus1-a8032ab12345"), "SPSW-001X16EU");
        assert_eq!(classify_ssid("shellydimmer-112233"), "SHDM-1");
        assert_eq!(classify_ssid("shellyplug-s-445566"), "SHPLG-S");
        assert_eq!(classify_ssid("shellyht-778899"), "SHHT-1");
        assert_eq!(classify_ssid("shelly25-aabb00"), "SHSW-25");
        assert_eq!(classify_ssid("shellyem-ccdd11"), "SHEM");
        assert_eq!(classify_ssid("SomeOtherAP"), "SHSW-1");
    }

    #[test]
    fn generation_from_model() {
        assert_eq!(model_generation("SPSW-001X16EU"), 2);
        assert_eq!(model_generation("SHSW-1"), 1);
        assert_eq!(model_generation("SHPLG-S"), 1);
    }
}
