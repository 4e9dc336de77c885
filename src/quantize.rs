//! Lossy fixed-width encodings for the values carried in DirAct frames.
//!
//! Every encoder produces a 6-bit code so that the sensor snapshot (three
//! acceleration axes plus battery) packs into exactly three bytes.

pub const MAX_RSSI_TO_ENCODE: i8 = -28;
pub const MIN_RSSI_TO_ENCODE: i8 = -92;

pub const MAX_BATTERY_VOLTAGE: f32 = 3.0;
pub const MIN_BATTERY_VOLTAGE: f32 = 2.0;

/// Acceleration magnitudes above this (in g) saturate.
pub const MAX_ACCELERATION_TO_ENCODE: f32 = 2.0;
pub const MAX_ACCELERATION_MAGNITUDE: u8 = 0x1f;
/// Axis code meaning "no reading".
pub const INVALID_ACCELERATION_CODE: u8 = 0x20;

const MAX_CODE: u8 = 0x3f;

pub fn encode_rssi(rssi: i8) -> u8 {
    if rssi >= MAX_RSSI_TO_ENCODE {
        return MAX_CODE;
    }
    if rssi <= MIN_RSSI_TO_ENCODE {
        return 0x00;
    }
    (i16::from(rssi) - i16::from(MIN_RSSI_TO_ENCODE)) as u8
}

pub fn decode_rssi(code: u8) -> i8 {
    (i16::from(code & MAX_CODE) + i16::from(MIN_RSSI_TO_ENCODE)) as i8
}

pub fn encode_battery(voltage: f32) -> u8 {
    if voltage.is_nan() || voltage <= MIN_BATTERY_VOLTAGE {
        return 0x00;
    }
    if voltage >= MAX_BATTERY_VOLTAGE {
        return MAX_CODE;
    }
    let scaled = f32::from(MAX_CODE) * (voltage - MIN_BATTERY_VOLTAGE)
        / (MAX_BATTERY_VOLTAGE - MIN_BATTERY_VOLTAGE);
    scaled.round() as u8
}

pub fn decode_battery(code: u8) -> f32 {
    MIN_BATTERY_VOLTAGE
        + f32::from(code & MAX_CODE) * (MAX_BATTERY_VOLTAGE - MIN_BATTERY_VOLTAGE)
            / f32::from(MAX_CODE)
}

/// Encodes one axis. Positive readings map onto `0x00..=0x1f`, negative ones
/// are folded into `0x21..=0x3f` as `0x3f - magnitude`, never reaching the
/// unavailable code.
pub fn encode_acceleration(acceleration: Option<f32>) -> u8 {
    let Some(g) = acceleration.filter(|g| !g.is_nan()) else {
        return INVALID_ACCELERATION_CODE;
    };
    let magnitude = (f32::from(MAX_ACCELERATION_MAGNITUDE) * (g.abs() / MAX_ACCELERATION_TO_ENCODE))
        .round()
        .min(f32::from(MAX_ACCELERATION_MAGNITUDE)) as u8;
    if g < 0.0 {
        (MAX_CODE - magnitude).max(INVALID_ACCELERATION_CODE + 1)
    } else {
        magnitude
    }
}

pub fn decode_acceleration(code: u8) -> Option<f32> {
    let code = code & MAX_CODE;
    let scale = MAX_ACCELERATION_TO_ENCODE / f32::from(MAX_ACCELERATION_MAGNITUDE);
    match code {
        INVALID_ACCELERATION_CODE => None,
        c if c <= MAX_ACCELERATION_MAGNITUDE => Some(f32::from(c) * scale),
        c => Some(-f32::from(MAX_CODE - c) * scale),
    }
}

/// Three bytes carrying the x/y/z acceleration codes and the battery code.
///
/// ```text
/// byte0: xxxxxxyy
/// byte1: yyyyzzzz
/// byte2: zzbbbbbb
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SensorSnapshot(pub [u8; 3]);

impl Default for SensorSnapshot {
    /// All axes unavailable, battery unknown.
    fn default() -> Self {
        SensorSnapshot::pack([INVALID_ACCELERATION_CODE; 3], 0x00)
    }
}

impl SensorSnapshot {
    pub fn pack(axes: [u8; 3], battery: u8) -> Self {
        let [x, y, z] = axes;
        SensorSnapshot([
            ((x << 2) & 0xfc) | ((y >> 4) & 0x03),
            ((y << 4) & 0xf0) | ((z >> 2) & 0x0f),
            ((z << 6) & 0xc0) | (battery & 0x3f),
        ])
    }

    /// Returns `([x, y, z], battery)` codes.
    pub fn unpack(&self) -> ([u8; 3], u8) {
        let [b0, b1, b2] = self.0;
        let x = b0 >> 2;
        let y = ((b0 & 0x03) << 4) | (b1 >> 4);
        let z = ((b1 & 0x0f) << 2) | (b2 >> 6);
        ([x, y, z], b2 & 0x3f)
    }

    pub fn bytes(&self) -> [u8; 3] {
        self.0
    }

    pub fn battery_voltage(&self) -> f32 {
        decode_battery(self.unpack().1)
    }

    pub fn acceleration(&self) -> [Option<f32>; 3] {
        self.unpack().0.map(decode_acceleration)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rssi_clamps_at_both_ends() {
        for rssi in [-128, -100, -93, -92] {
            assert_eq!(encode_rssi(rssi), 0);
        }
        for rssi in [-28, -20, 0, 127] {
            assert_eq!(encode_rssi(rssi), 63);
        }
    }

    #[test]
    fn test_rssi_is_monotonic() {
        let mut previous = encode_rssi(i8::MIN);
        for rssi in i8::MIN..=i8::MAX {
            let code = encode_rssi(rssi);
            assert!(code >= previous, "{} encoded below its predecessor", rssi);
            assert!(code <= 63);
            previous = code;
        }
    }

    #[test]
    fn test_rssi_decode_within_one_step() {
        for rssi in -91..=-29i8 {
            let decoded = decode_rssi(encode_rssi(rssi));
            assert!((i16::from(decoded) - i16::from(rssi)).abs() <= 1);
        }
    }

    #[test]
    fn test_battery() {
        assert_eq!(encode_battery(1.5), 0);
        assert_eq!(encode_battery(2.0), 0);
        assert_eq!(encode_battery(2.5), 32);
        assert_eq!(encode_battery(3.0), 63);
        assert_eq!(encode_battery(3.3), 63);
        assert!((decode_battery(63) - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_acceleration() {
        assert_eq!(encode_acceleration(None), INVALID_ACCELERATION_CODE);
        assert_eq!(encode_acceleration(Some(0.0)), 0);
        assert_eq!(encode_acceleration(Some(1.0)), 16);
        assert_eq!(encode_acceleration(Some(2.0)), 31);
        assert_eq!(encode_acceleration(Some(8.0)), 31);
        assert_eq!(encode_acceleration(Some(-1.0)), 63 - 16);
        assert_eq!(encode_acceleration(Some(-4.0)), 0x20 + 1);
        assert_eq!(decode_acceleration(INVALID_ACCELERATION_CODE), None);
        let decoded = decode_acceleration(encode_acceleration(Some(-1.0))).unwrap();
        assert!((decoded + 1.0).abs() < 0.07);
    }

    #[test]
    fn test_snapshot_bit_layout() {
        let snapshot = SensorSnapshot::pack([0x3f, 0x00, 0x3f], 0x00);
        assert_eq!(snapshot.bytes(), [0xfc, 0x0f, 0xc0]);

        let snapshot = SensorSnapshot::pack([0x00, 0x3f, 0x00], 0x3f);
        assert_eq!(snapshot.bytes(), [0x03, 0xf0, 0x3f]);

        let unavailable = SensorSnapshot::pack([INVALID_ACCELERATION_CODE; 3], 0x3f);
        assert_eq!(unavailable.bytes(), [0x82, 0x08, 0x3f]);
    }

    #[test]
    fn test_snapshot_unpack() {
        let axes = [0x15, 0x2a, 0x21];
        let snapshot = SensorSnapshot::pack(axes, 0x11);
        assert_eq!(snapshot.unpack(), (axes, 0x11));
    }
}
