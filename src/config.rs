use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, bail};
use mac_address::MacAddress;
use serde_derive::Deserialize;

use crate::frame::{DEFAULT_NAMESPACE_FILTER, EDDYSTONE_NAMESPACE_LENGTH, ReceiveFilter};
use crate::proximity::{DEFAULT_PROXIMITY_RSSI_THRESHOLD, InstanceId};
use crate::scheduler::{DigestConfig, FeedbackConfig, SchedulerConfig};

const DEFAULT_OBSERVE_PERIOD_MS: u64 = 400;
const DEFAULT_BROADCAST_PERIOD_MS: u64 = 1600;
const DEFAULT_DIGEST_PAGE_PERIOD_MS: u64 = 400;
const DEFAULT_PROXIMITY_PACKET_INTERVAL_MS: u64 = 200;
const DEFAULT_DIGEST_PACKET_INTERVAL_MS: u64 = 100;
const DEFAULT_EXCITER_HOLDOFF_SECONDS: u64 = 60;
const DEFAULT_DIGEST_TIME_CYCLE_THRESHOLD_SECONDS: u64 = 86_400;
const DEFAULT_BATTERY_VOLTAGE: f32 = 3.0;
const DEFAULT_DEBOUNCE_MS: u64 = 50;

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub mqtt: Option<MqttConfig>,
    pub beacon: BeaconConfig,
    pub proximity: Option<ProximityConfig>,
    pub timing: Option<TimingConfig>,
    pub digest: Option<DigestSection>,
    pub sensors: Option<SensorConfig>,
    pub feedback: Option<FeedbackSection>,
    pub input: Option<InputConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct MqttConfig {
    pub host: String,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub publisher_id: Option<String>,
    pub topic_path: Option<String>,
    pub keep_alive_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct BeaconConfig {
    pub instance_id: Option<InstanceId>,
    /// Used to derive the instance id when none is given.
    pub address: Option<MacAddress>,
    pub namespace_filter: Option<[u8; EDDYSTONE_NAMESPACE_LENGTH]>,
    pub exciter_instance_ids: Option<Vec<InstanceId>>,
    pub resetter_instance_ids: Option<Vec<InstanceId>>,
    pub ignored_instance_ids: Option<Vec<InstanceId>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct ProximityConfig {
    pub rssi_threshold: Option<i8>,
    pub led_rssi_threshold: Option<i8>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct TimingConfig {
    pub observe_period_ms: Option<u64>,
    pub broadcast_period_ms: Option<u64>,
    pub digest_page_period_ms: Option<u64>,
    pub proximity_packet_interval_ms: Option<u64>,
    pub digest_packet_interval_ms: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct DigestSection {
    pub enabled: Option<bool>,
    pub exciter_holdoff_seconds: Option<u64>,
    pub time_cycle_threshold_seconds: Option<u64>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct SensorConfig {
    pub accelerometer: Option<bool>,
    pub battery_voltage: Option<f32>,
}

#[derive(Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackStyle {
    /// Pulses scaled to the signal strength of each nearby peer.
    #[default]
    Proportional,
    Blink,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct FeedbackSection {
    pub style: Option<FeedbackStyle>,
    pub blink_on_proximity: Option<bool>,
    pub blink_on_distancing: Option<bool>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct InputConfig {
    pub debounce_ms: Option<u64>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents).with_context(|| format!("parsing {}", path.display()))
    }

    /// Explicit id, else `0x0000XXYY` from the last two address bytes.
    pub fn instance_id(&self) -> anyhow::Result<InstanceId> {
        if let Some(instance_id) = self.beacon.instance_id {
            return Ok(instance_id);
        }
        match self.beacon.address {
            Some(address) => {
                let bytes = address.bytes();
                Ok(u32::from_be_bytes([0x00, 0x00, bytes[4], bytes[5]]))
            }
            None => bail!("beacon.instance_id or beacon.address must be configured"),
        }
    }

    pub fn battery_voltage(&self) -> f32 {
        self.sensors
            .as_ref()
            .and_then(|s| s.battery_voltage)
            .unwrap_or(DEFAULT_BATTERY_VOLTAGE)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(
            self.input
                .as_ref()
                .and_then(|i| i.debounce_ms)
                .unwrap_or(DEFAULT_DEBOUNCE_MS),
        )
    }

    pub fn scheduler_config(&self) -> anyhow::Result<SchedulerConfig> {
        let beacon = &self.beacon;
        let proximity = self.proximity.clone().unwrap_or_default();
        let timing = self.timing.clone().unwrap_or_default();
        let digest = self.digest.clone().unwrap_or_default();
        let sensors = self.sensors.clone().unwrap_or_default();
        let feedback = self.feedback.clone().unwrap_or_default();
        let millis = |value: Option<u64>, default: u64| Duration::from_millis(value.unwrap_or(default));

        Ok(SchedulerConfig {
            instance_id: self.instance_id()?,
            filter: ReceiveFilter {
                namespace: beacon.namespace_filter.unwrap_or(DEFAULT_NAMESPACE_FILTER),
                exciters: beacon.exciter_instance_ids.clone().unwrap_or_default(),
                resetters: beacon.resetter_instance_ids.clone().unwrap_or_default(),
                ignored: beacon.ignored_instance_ids.clone().unwrap_or_default(),
            },
            rssi_threshold: proximity
                .rssi_threshold
                .unwrap_or(DEFAULT_PROXIMITY_RSSI_THRESHOLD),
            led_rssi_threshold: proximity
                .led_rssi_threshold
                .unwrap_or(DEFAULT_PROXIMITY_RSSI_THRESHOLD),
            observe_period: millis(timing.observe_period_ms, DEFAULT_OBSERVE_PERIOD_MS),
            broadcast_period: millis(timing.broadcast_period_ms, DEFAULT_BROADCAST_PERIOD_MS),
            digest_page_period: millis(timing.digest_page_period_ms, DEFAULT_DIGEST_PAGE_PERIOD_MS),
            proximity_packet_interval: millis(
                timing.proximity_packet_interval_ms,
                DEFAULT_PROXIMITY_PACKET_INTERVAL_MS,
            ),
            digest_packet_interval: millis(
                timing.digest_packet_interval_ms,
                DEFAULT_DIGEST_PACKET_INTERVAL_MS,
            ),
            digest: digest.enabled.unwrap_or(false).then(|| DigestConfig {
                exciter_holdoff_secs: digest
                    .exciter_holdoff_seconds
                    .unwrap_or(DEFAULT_EXCITER_HOLDOFF_SECONDS),
                time_cycle_threshold_secs: digest
                    .time_cycle_threshold_seconds
                    .unwrap_or(DEFAULT_DIGEST_TIME_CYCLE_THRESHOLD_SECONDS),
            }),
            accelerometer: sensors.accelerometer.unwrap_or(false),
            feedback: FeedbackConfig {
                style: feedback.style.unwrap_or_default(),
                blink_on_proximity: feedback.blink_on_proximity.unwrap_or(true),
                blink_on_distancing: feedback.blink_on_distancing.unwrap_or(false),
            },
        })
    }
}
