//! Observe/broadcast duty cycle.
//!
//! The scheduler is a plain state machine: the driver calls
//! [`Scheduler::phase_elapsed`] when the deadline it was last handed expires,
//! and forwards scan records and button presses in between. Every call runs
//! to completion before the next one starts, so the tables are never read
//! and written at the same time.

use std::time::Duration;

use log::{debug, info};

use crate::config::FeedbackStyle;
use crate::digest::{CompiledDigest, DigestTable};
use crate::frame::{
    DIRACT_MANUFACTURER_ID, MAX_ENTRIES_PER_FRAME, ReceiveFilter, Sighting, encode_digest,
    encode_proximity,
};
use crate::hardware::{BlinkPattern, Cue, Hardware};
use crate::messages::ScanRecord;
use crate::proximity::{InstanceId, PROXIMITY_CAPACITY, ProximityEntry, ProximityTable};
use crate::quantize::{
    MAX_RSSI_TO_ENCODE, MIN_RSSI_TO_ENCODE, SensorSnapshot, encode_acceleration, encode_battery,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Observing,
    BroadcastingProximity,
    BroadcastingDigest { page: u8 },
    Sleeping,
}

/// Three-bit broadcast sequence number.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CyclicCounter(u8);

impl CyclicCounter {
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Steps the counter and returns the new value.
    pub fn advance(&mut self) -> u8 {
        self.0 = (self.0 + 1) % 8;
        self.0
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DigestConfig {
    pub exciter_holdoff_secs: u64,
    pub time_cycle_threshold_secs: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FeedbackConfig {
    pub style: FeedbackStyle,
    pub blink_on_proximity: bool,
    pub blink_on_distancing: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    pub instance_id: InstanceId,
    pub filter: ReceiveFilter,
    pub rssi_threshold: i8,
    pub led_rssi_threshold: i8,
    pub observe_period: Duration,
    pub broadcast_period: Duration,
    pub digest_page_period: Duration,
    pub proximity_packet_interval: Duration,
    pub digest_packet_interval: Duration,
    /// `None` for beacons that only ever broadcast proximity.
    pub digest: Option<DigestConfig>,
    pub accelerometer: bool,
    pub feedback: FeedbackConfig,
}

pub struct Scheduler<H: Hardware> {
    hardware: H,
    config: SchedulerConfig,
    phase: Phase,
    proximity: ProximityTable,
    ranked: [usize; PROXIMITY_CAPACITY],
    digest: Option<DigestTable>,
    compiled: Option<CompiledDigest>,
    cyclic_count: CyclicCounter,
    battery_code: u8,
    sensors: SensorSnapshot,
    last_digest_time: u64,
    exciter_seen: bool,
    resetter_seen: bool,
    sleep_requested: bool,
    proximity_detected: bool,
}

impl<H: Hardware> Scheduler<H> {
    pub fn new(hardware: H, config: SchedulerConfig) -> Self {
        Scheduler {
            hardware,
            proximity: ProximityTable::new(config.rssi_threshold),
            ranked: std::array::from_fn(|i| i),
            digest: config.digest.as_ref().map(|_| DigestTable::default()),
            config,
            phase: Phase::Sleeping,
            compiled: None,
            cyclic_count: CyclicCounter::default(),
            battery_code: 0,
            sensors: SensorSnapshot::default(),
            last_digest_time: 0,
            exciter_seen: false,
            resetter_seen: false,
            sleep_requested: false,
            proximity_detected: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn cyclic_count(&self) -> u8 {
        self.cyclic_count.value()
    }

    /// Begins the first observation window and returns its duration.
    pub fn start(&mut self) -> Option<Duration> {
        if let Some(digest) = self.digest.as_mut() {
            self.hardware.set_secs(0);
            self.last_digest_time = 0;
            digest.reset();
        }
        info!(
            "Starting DirAct beacon {:08x} (digest {})",
            self.config.instance_id,
            if self.digest.is_some() { "enabled" } else { "disabled" }
        );
        self.observe()
    }

    /// Feeds one scan result. Ignored outside an observation window.
    pub fn handle_record(&mut self, record: &ScanRecord) {
        if self.phase != Phase::Observing {
            return;
        }
        match self.config.filter.classify(record) {
            Some(Sighting::Peer { instance_id, rssi }) => {
                let tracked = self.proximity.update(instance_id, rssi);
                debug!("Sighted {:08x} at {} dBm ({:?})", instance_id, rssi, tracked);
            }
            Some(Sighting::Exciter) => {
                debug!("Exciter in range");
                self.exciter_seen = true;
            }
            Some(Sighting::Resetter) => {
                debug!("Resetter in range");
                self.resetter_seen = true;
            }
            None => {}
        }
    }

    /// Advances past the current phase. Returns how long the next phase lasts,
    /// or `None` once the beacon is asleep.
    pub fn phase_elapsed(&mut self) -> Option<Duration> {
        match self.phase {
            Phase::Observing => self.end_observation(),
            Phase::BroadcastingProximity => self.observe(),
            Phase::BroadcastingDigest { page } => {
                if self.sleep_requested {
                    return self.sleep();
                }
                let more_pages = self
                    .compiled
                    .as_ref()
                    .is_some_and(|compiled| !compiled.is_last_page(page));
                if more_pages {
                    self.broadcast_digest_page(page + 1)
                } else {
                    self.compiled = None;
                    self.observe()
                }
            }
            Phase::Sleeping => None,
        }
    }

    /// Button handler. Wakes a sleeping beacon immediately, returning the new
    /// observation window; otherwise asks for sleep at the next phase boundary.
    pub fn toggle_sleep_wake(&mut self) -> Option<Duration> {
        if self.phase == Phase::Sleeping {
            info!("Waking");
            self.blink(BlinkPattern::Wake);
            self.hardware.wake();
            return self.observe();
        }
        if !self.sleep_requested {
            info!("Sleep requested");
            self.blink(BlinkPattern::Sleep);
            self.sleep_requested = true;
        }
        None
    }

    fn observe(&mut self) -> Option<Duration> {
        self.proximity.reset();
        self.exciter_seen = false;
        self.resetter_seen = false;

        if self.sleep_requested {
            return self.sleep();
        }

        debug!("Observing for {:?}", self.config.observe_period);
        self.hardware.start_scan();
        self.phase = Phase::Observing;
        Some(self.config.observe_period)
    }

    fn sleep(&mut self) -> Option<Duration> {
        info!("Entering low-power mode");
        self.sleep_requested = false;
        self.compiled = None;
        self.hardware.stop_advertising();
        self.hardware.sleep();
        self.phase = Phase::Sleeping;
        None
    }

    fn end_observation(&mut self) -> Option<Duration> {
        self.hardware.stop_scan();

        if self.sleep_requested {
            return self.sleep();
        }

        self.ranked = self.proximity.rank_descending();
        debug!("Observed {} peer(s)", self.proximity.len());
        self.update_sensors();

        let Some(digest) = self.digest.as_mut() else {
            return self.broadcast_proximity();
        };
        digest.accumulate(&self.proximity, &self.ranked);

        let holdoff = self
            .config
            .digest
            .as_ref()
            .map_or(0, |digest| digest.exciter_holdoff_secs);
        let now = self.hardware.now_secs();

        if self.resetter_seen {
            info!("Resetter seen, clearing digest and time base");
            self.hardware.set_secs(0);
            self.last_digest_time = 0;
            digest.reset();
            self.broadcast_proximity()
        } else if self.exciter_seen && now.saturating_sub(self.last_digest_time) >= holdoff {
            let compiled = digest.compile(now);
            info!(
                "Exciter seen, broadcasting {} digest page(s) of {} entries",
                compiled.number_of_pages,
                digest.len()
            );
            self.last_digest_time = now;
            self.compiled = Some(compiled);
            self.broadcast_digest_page(0)
        } else {
            self.broadcast_proximity()
        }
    }

    fn update_sensors(&mut self) {
        // Battery only on counter wraparound
        if self.cyclic_count.value() == 0 {
            self.battery_code = encode_battery(self.hardware.battery_voltage());
        }
        let axes = if self.config.accelerometer {
            self.hardware.acceleration()
        } else {
            None
        };
        let codes = match axes {
            Some(axes) => axes.map(|g| encode_acceleration(Some(g))),
            None => [encode_acceleration(None); 3],
        };
        self.sensors = SensorSnapshot::pack(codes, self.battery_code);
    }

    fn broadcast_proximity(&mut self) -> Option<Duration> {
        let strongest: Vec<ProximityEntry> = self
            .proximity
            .strongest(&self.ranked, MAX_ENTRIES_PER_FRAME)
            .copied()
            .collect();
        let count = self.cyclic_count.advance();
        let payload = encode_proximity(self.config.instance_id, count, &self.sensors, &strongest);

        debug!(
            "Broadcasting proximity #{} with {} peer(s) for {:?}",
            count,
            strongest.len(),
            self.config.broadcast_period
        );
        self.hardware.advertise(
            self.config.proximity_packet_interval,
            DIRACT_MANUFACTURER_ID,
            &payload,
        );
        self.signal_proximity(&strongest);

        self.phase = Phase::BroadcastingProximity;
        Some(self.config.broadcast_period)
    }

    fn broadcast_digest_page(&mut self, page: u8) -> Option<Duration> {
        let Some(compiled) = self.compiled.as_ref() else {
            return self.observe();
        };
        let is_last_page = compiled.is_last_page(page);
        let payload = encode_digest(
            self.config.instance_id,
            page,
            is_last_page,
            compiled.digest_time,
            compiled.page(page),
        );

        debug!(
            "Broadcasting digest page {}/{}",
            page + 1,
            compiled.number_of_pages
        );
        self.hardware.advertise(
            self.config.digest_packet_interval,
            DIRACT_MANUFACTURER_ID,
            &payload,
        );

        if is_last_page {
            let threshold = self
                .config
                .digest
                .as_ref()
                .map_or(u64::MAX, |digest| digest.time_cycle_threshold_secs);
            if self.hardware.now_secs() > threshold {
                info!("Digest time cycle complete, resetting");
                self.hardware.set_secs(0);
                self.last_digest_time = 0;
                if let Some(digest) = self.digest.as_mut() {
                    digest.reset();
                }
            }
        }

        self.phase = Phase::BroadcastingDigest { page };
        Some(self.config.digest_page_period)
    }

    fn signal_proximity(&mut self, strongest: &[ProximityEntry]) {
        let detected = strongest
            .iter()
            .any(|entry| entry.rssi >= self.config.led_rssi_threshold);

        match (self.proximity_detected, detected) {
            (false, true) => match self.config.feedback.style {
                FeedbackStyle::Proportional => {
                    let strengths = strongest.iter().map(|entry| pulse_strength(entry.rssi)).collect();
                    self.hardware.cue(Cue::Proximity { strengths });
                }
                FeedbackStyle::Blink => {
                    if self.config.feedback.blink_on_proximity {
                        self.hardware.cue(Cue::Blink(BlinkPattern::Proximity));
                    }
                }
            },
            (true, false) => {
                if self.config.feedback.style == FeedbackStyle::Blink
                    && self.config.feedback.blink_on_distancing
                {
                    self.hardware.cue(Cue::Blink(BlinkPattern::Distancing));
                }
            }
            _ => {}
        }
        self.proximity_detected = detected;
    }

    fn blink(&mut self, pattern: BlinkPattern) {
        if self.config.feedback.style == FeedbackStyle::Blink {
            self.hardware.cue(Cue::Blink(pattern));
        }
    }
}

#[cfg(test)]
impl<H: Hardware> Scheduler<H> {
    pub fn proximity(&self) -> &ProximityTable {
        &self.proximity
    }

    pub fn digest(&self) -> Option<&DigestTable> {
        self.digest.as_ref()
    }

    pub fn is_sleep_requested(&self) -> bool {
        self.sleep_requested
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}

/// Maps rssi linearly onto `0.0..=1.0` over the encodable range.
fn pulse_strength(rssi: i8) -> f32 {
    let span = f32::from(MAX_RSSI_TO_ENCODE) - f32::from(MIN_RSSI_TO_ENCODE);
    (1.0 - (f32::from(MAX_RSSI_TO_ENCODE) - f32::from(rssi)) / span).clamp(0.0, 1.0)
}
