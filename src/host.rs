//! Collaborator implementations for running a beacon on a Linux host.
//!
//! The host can scan through btleplug but cannot advertise, so outgoing
//! frames, feedback cues and power transitions are logged and mirrored to
//! MQTT when a broker is configured.

use std::time::{Duration, Instant};

use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::hardware::{Clock, Cue, Feedback, Power, Radio, Sensors};
use crate::messages::RadioCommand;
use crate::mqtt::MqttClient;
use crate::proximity::InstanceId;

/// Wall clock that can be rebased, counting whole seconds from the last set.
#[derive(Debug, Clone)]
pub struct HostClock {
    base_secs: u64,
    since: Instant,
}

impl Default for HostClock {
    fn default() -> Self {
        HostClock {
            base_secs: 0,
            since: Instant::now(),
        }
    }
}

impl Clock for HostClock {
    fn now_secs(&self) -> u64 {
        self.base_secs + self.since.elapsed().as_secs()
    }

    fn set_secs(&mut self, secs: u64) {
        self.base_secs = secs;
        self.since = Instant::now();
    }
}

pub struct HostHardware {
    instance_id: InstanceId,
    radio: mpsc::UnboundedSender<RadioCommand>,
    mqtt: Option<MqttClient>,
    clock: HostClock,
    battery_voltage: f32,
}

impl HostHardware {
    pub fn new(
        instance_id: InstanceId,
        radio: mpsc::UnboundedSender<RadioCommand>,
        mqtt: Option<MqttClient>,
        battery_voltage: f32,
    ) -> Self {
        HostHardware {
            instance_id,
            radio,
            mqtt,
            clock: HostClock::default(),
            battery_voltage,
        }
    }

    fn command(&self, command: RadioCommand) {
        if let Err(err) = self.radio.send(command) {
            error!("Error sending {:?} to the radio: {:?}", command, err);
        }
    }
}

impl Radio for HostHardware {
    fn start_scan(&mut self) {
        self.command(RadioCommand::StartScan);
    }

    fn stop_scan(&mut self) {
        self.command(RadioCommand::StopScan);
    }

    fn advertise(&mut self, interval: Duration, manufacturer_id: u16, payload: &[u8]) {
        debug!(
            "Advertising {:04x} every {:?}: {:02x?}",
            manufacturer_id, interval, payload
        );
        if let Some(mqtt) = &self.mqtt {
            if let Err(err) =
                mqtt.publish_advertisement(self.instance_id, interval, manufacturer_id, payload)
            {
                error!("Error publishing advertisement: {:?}", err);
            }
        }
    }

    fn stop_advertising(&mut self) {
        debug!("Advertising stopped");
    }
}

impl Sensors for HostHardware {
    fn battery_voltage(&mut self) -> f32 {
        self.battery_voltage
    }

    fn acceleration(&mut self) -> Option<[f32; 3]> {
        None
    }
}

impl Feedback for HostHardware {
    fn cue(&mut self, cue: Cue) {
        info!("Feedback: {:?}", cue);
        if let Some(mqtt) = &self.mqtt {
            if let Err(err) = mqtt.publish_cue(&cue) {
                error!("Error publishing feedback: {:?}", err);
            }
        }
    }
}

impl Clock for HostHardware {
    fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    fn set_secs(&mut self, secs: u64) {
        self.clock.set_secs(secs);
    }
}

impl Power for HostHardware {
    fn sleep(&mut self) {
        self.publish_power(true);
    }

    fn wake(&mut self) {
        self.publish_power(false);
    }
}

impl HostHardware {
    fn publish_power(&self, asleep: bool) {
        if let Some(mqtt) = &self.mqtt {
            if let Err(err) = mqtt.publish_power(self.instance_id, asleep) {
                error!("Error publishing power state: {:?}", err);
            }
        }
    }
}
