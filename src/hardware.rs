//! Services the beacon core drives but does not implement.
//!
//! All calls are fire-and-forget: the core never waits on, or reacts to, the
//! outcome of a radio, feedback or power request.

use std::time::Duration;

use serde_derive::Serialize;

pub trait Radio {
    fn start_scan(&mut self);
    fn stop_scan(&mut self);
    /// Replaces whatever is currently advertised with `payload`, repeated
    /// every `interval` until the next call or [`Radio::stop_advertising`].
    fn advertise(&mut self, interval: Duration, manufacturer_id: u16, payload: &[u8]);
    fn stop_advertising(&mut self);
}

pub trait Sensors {
    fn battery_voltage(&mut self) -> f32;
    /// Per-axis acceleration in g, `None` when no accelerometer is available.
    fn acceleration(&mut self) -> Option<[f32; 3]>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BlinkPattern {
    Proximity,
    Distancing,
    Wake,
    Sleep,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cue {
    /// One pulse per nearest peer, strength in `0.0..=1.0`.
    Proximity { strengths: Vec<f32> },
    Blink(BlinkPattern),
}

pub trait Feedback {
    fn cue(&mut self, cue: Cue);
}

pub trait Clock {
    fn now_secs(&self) -> u64;
    fn set_secs(&mut self, secs: u64);
}

pub trait Power {
    fn sleep(&mut self);
    fn wake(&mut self);
}

pub trait Hardware: Radio + Sensors + Feedback + Clock + Power {}

impl<T: Radio + Sensors + Feedback + Clock + Power> Hardware for T {}
