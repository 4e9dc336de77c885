//! DirAct wire frames.
//!
//! ```text
//! byte 0      frame type (0x01 proximity, 0x11 digest)
//! byte 1      cyclic count / page index (3 bits) | payload length (5 bits)
//! bytes 2..6  sender instance id, big-endian
//! bytes 6..9  sensor snapshot (proximity) or status, time hi, time lo (digest)
//! bytes 9..   up to three {instance id (4), encoded value (1)} entries
//! ```

use log::debug;

use crate::digest::{DigestEntry, decode_count, encode_count};
use crate::messages::ScanRecord;
use crate::proximity::{InstanceId, ProximityEntry};
use crate::quantize::{SensorSnapshot, decode_rssi, encode_rssi};

/// Code Blue Consulting
pub const DIRACT_MANUFACTURER_ID: u16 = 0x0583;
pub const DIRACT_PROXIMITY_FRAME: u8 = 0x01;
pub const DIRACT_DIGEST_FRAME: u8 = 0x11;
const DIRACT_INSTANCE_OFFSET: usize = 2;
const DIRACT_HEADER_LENGTH: usize = 9;
const ENTRY_LENGTH: usize = 5;
pub const MAX_ENTRIES_PER_FRAME: usize = 3;

pub const EDDYSTONE_UUID: u16 = 0xfeaa;
pub const EDDYSTONE_UID_FRAME: u8 = 0x00;
const EDDYSTONE_NAMESPACE_OFFSET: usize = 2;
pub const EDDYSTONE_NAMESPACE_LENGTH: usize = 10;
const EDDYSTONE_INSTANCE_OFFSET: usize = 14;

/// ASCII "IoIDDirAct"
pub const DEFAULT_NAMESPACE_FILTER: [u8; EDDYSTONE_NAMESPACE_LENGTH] =
    [0x49, 0x6f, 0x49, 0x44, 0x44, 0x69, 0x72, 0x41, 0x63, 0x74];

const LAST_PAGE_FLAG: u8 = 0x80;

/// What a received frame means to the scheduler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sighting {
    Peer { instance_id: InstanceId, rssi: i8 },
    Exciter,
    Resetter,
}

/// Receive-side acceptance rules.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiveFilter {
    pub namespace: [u8; EDDYSTONE_NAMESPACE_LENGTH],
    pub exciters: Vec<InstanceId>,
    pub resetters: Vec<InstanceId>,
    pub ignored: Vec<InstanceId>,
}

impl Default for ReceiveFilter {
    fn default() -> Self {
        ReceiveFilter {
            namespace: DEFAULT_NAMESPACE_FILTER,
            exciters: Vec::new(),
            resetters: Vec::new(),
            ignored: Vec::new(),
        }
    }
}

impl ReceiveFilter {
    /// Returns `None` for anything that is neither a DirAct frame nor an
    /// Eddystone-UID frame in the filtered namespace. A record carrying
    /// Eddystone service data is judged on that alone.
    pub fn classify(&self, record: &ScanRecord) -> Option<Sighting> {
        let instance_id = match record.service_data(EDDYSTONE_UUID) {
            Some(data) => eddystone_instance(data, &self.namespace),
            None => diract_instance(record),
        }?;

        if self.ignored.contains(&instance_id) {
            return None;
        }
        if self.exciters.contains(&instance_id) {
            return Some(Sighting::Exciter);
        }
        if self.resetters.contains(&instance_id) {
            return Some(Sighting::Resetter);
        }
        Some(Sighting::Peer {
            instance_id,
            rssi: record.rssi.clamp(i16::from(i8::MIN), i16::from(i8::MAX)) as i8,
        })
    }
}

fn read_instance(data: &[u8], offset: usize) -> Option<InstanceId> {
    let bytes = data.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn eddystone_instance(data: &[u8], namespace: &[u8]) -> Option<InstanceId> {
    if data.first() != Some(&EDDYSTONE_UID_FRAME) {
        return None;
    }
    let received = data.get(
        EDDYSTONE_NAMESPACE_OFFSET..EDDYSTONE_NAMESPACE_OFFSET + EDDYSTONE_NAMESPACE_LENGTH,
    )?;
    if received != namespace {
        return None;
    }
    read_instance(data, EDDYSTONE_INSTANCE_OFFSET)
}

fn diract_instance(record: &ScanRecord) -> Option<InstanceId> {
    let data = record.manufacturer_data(DIRACT_MANUFACTURER_ID)?;
    match data.first() {
        Some(&DIRACT_PROXIMITY_FRAME) | Some(&DIRACT_DIGEST_FRAME) => {
            match decode(data) {
                Some(DirActFrame::Proximity {
                    instance_id,
                    sensors,
                    nearest,
                    ..
                }) => debug!(
                    "{:08x} reports {:.2} V, {:?} g, nearest {:?}",
                    instance_id,
                    sensors.battery_voltage(),
                    sensors.acceleration(),
                    nearest
                ),
                Some(frame) => debug!("Peer frame {:?}", frame),
                None => {}
            }
            read_instance(data, DIRACT_INSTANCE_OFFSET)
        }
        _ => None,
    }
}

fn header(high_bits: u8, data: &[u8]) -> u8 {
    ((high_bits & 0x07) << 5) | ((data.len() - 2) as u8 & 0x1f)
}

fn push_entry(data: &mut Vec<u8>, instance_id: InstanceId, value: u8) {
    data.extend_from_slice(&instance_id.to_be_bytes());
    data.push(value);
}

/// Builds a proximity frame from at most three of the strongest peers.
pub fn encode_proximity(
    instance_id: InstanceId,
    cyclic_count: u8,
    sensors: &SensorSnapshot,
    strongest: &[ProximityEntry],
) -> Vec<u8> {
    let mut data = Vec::with_capacity(DIRACT_HEADER_LENGTH + MAX_ENTRIES_PER_FRAME * ENTRY_LENGTH);
    data.push(DIRACT_PROXIMITY_FRAME);
    data.push(0);
    data.extend_from_slice(&instance_id.to_be_bytes());
    data.extend_from_slice(&sensors.bytes());
    for entry in strongest.iter().take(MAX_ENTRIES_PER_FRAME) {
        push_entry(&mut data, entry.instance_id, encode_rssi(entry.rssi));
    }
    data[1] = header(cyclic_count, &data);
    data
}

/// Builds one page of a digest broadcast.
pub fn encode_digest(
    instance_id: InstanceId,
    page: u8,
    is_last_page: bool,
    digest_time: u32,
    entries: &[DigestEntry],
) -> Vec<u8> {
    let [_, time_top, time_hi, time_lo] = digest_time.to_be_bytes();
    let mut status = time_top & 0x7f;
    if is_last_page {
        status |= LAST_PAGE_FLAG;
    }

    let mut data = Vec::with_capacity(DIRACT_HEADER_LENGTH + MAX_ENTRIES_PER_FRAME * ENTRY_LENGTH);
    data.push(DIRACT_DIGEST_FRAME);
    data.push(0);
    data.extend_from_slice(&instance_id.to_be_bytes());
    data.extend_from_slice(&[status, time_hi, time_lo]);
    for entry in entries.iter().filter(|e| e.count > 0).take(MAX_ENTRIES_PER_FRAME) {
        push_entry(&mut data, entry.instance_id, encode_count(entry.count));
    }
    data[1] = header(page, &data);
    data
}

#[derive(Clone, Debug, PartialEq)]
pub enum DirActFrame {
    Proximity {
        cyclic_count: u8,
        instance_id: InstanceId,
        sensors: SensorSnapshot,
        /// Peers with their rssi decoded back to dBm.
        nearest: Vec<ProximityEntry>,
    },
    Digest {
        page: u8,
        instance_id: InstanceId,
        is_last_page: bool,
        /// Seven-bit top byte plus the two low bytes of the digest time.
        digest_time: u32,
        /// Counts decoded to the lower bound of their encoded range.
        entries: Vec<DigestEntry>,
    },
}

/// Parses DirAct manufacturer data. Frames whose declared length disagrees
/// with the bytes present, or whose entry area is not a whole number of
/// entries, are rejected.
pub fn decode(data: &[u8]) -> Option<DirActFrame> {
    if data.len() < DIRACT_HEADER_LENGTH {
        return None;
    }
    let high_bits = data[1] >> 5;
    let length = usize::from(data[1] & 0x1f);
    if length + 2 != data.len() {
        return None;
    }
    let instance_id = read_instance(data, DIRACT_INSTANCE_OFFSET)?;
    let body = &data[DIRACT_HEADER_LENGTH..];
    if body.len() % ENTRY_LENGTH != 0 || body.len() / ENTRY_LENGTH > MAX_ENTRIES_PER_FRAME {
        return None;
    }
    let entries = body.chunks_exact(ENTRY_LENGTH).filter_map(|chunk| {
        read_instance(chunk, 0).map(|instance_id| (instance_id, chunk[4]))
    });

    match data[0] {
        DIRACT_PROXIMITY_FRAME => Some(DirActFrame::Proximity {
            cyclic_count: high_bits,
            instance_id,
            sensors: SensorSnapshot([data[6], data[7], data[8]]),
            nearest: entries
                .map(|(instance_id, code)| ProximityEntry {
                    instance_id,
                    rssi: decode_rssi(code),
                })
                .collect(),
        }),
        DIRACT_DIGEST_FRAME => Some(DirActFrame::Digest {
            page: high_bits,
            instance_id,
            is_last_page: data[6] & LAST_PAGE_FLAG != 0,
            digest_time: u32::from_be_bytes([0, data[6] & 0x7f, data[7], data[8]]),
            entries: entries
                .map(|(instance_id, code)| DigestEntry {
                    instance_id,
                    count: decode_count(code),
                })
                .collect(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eddystone_uid(namespace: &[u8; 10], instance: [u8; 6]) -> Vec<u8> {
        let mut data = vec![EDDYSTONE_UID_FRAME, 0xee];
        data.extend_from_slice(namespace);
        data.extend_from_slice(&instance);
        data.extend_from_slice(&[0x00, 0x00]);
        data
    }

    fn filter() -> ReceiveFilter {
        ReceiveFilter {
            exciters: vec![0xe8c1_7e45],
            resetters: vec![0x4e5e_77e4],
            ignored: vec![0x0000_0bad],
            ..ReceiveFilter::default()
        }
    }

    #[test]
    fn test_proximity_frame_layout() {
        let sensors = SensorSnapshot([0x82, 0x08, 0x3f]);
        let nearest = [ProximityEntry {
            instance_id: 0x1234_5678,
            rssi: -50,
        }];
        let data = encode_proximity(0x0000_0001, 3, &sensors, &nearest);
        assert_eq!(
            data,
            vec![
                0x01, 0x6c, 0x00, 0x00, 0x00, 0x01, 0x82, 0x08, 0x3f, 0x12, 0x34, 0x56, 0x78, 42
            ]
        );

        let empty = encode_proximity(0x0000_0001, 0, &sensors, &[]);
        assert_eq!(empty[1], 0x07);
        assert_eq!(empty.len(), 9);
    }

    #[test]
    fn test_proximity_round_trip() {
        let sensors = SensorSnapshot::pack([1, 2, 3], 60);
        let nearest = [
            ProximityEntry {
                instance_id: 0xdead_beef,
                rssi: -41,
            },
            ProximityEntry {
                instance_id: 0x0000_0042,
                rssi: -63,
            },
        ];
        let data = encode_proximity(0xcafe_0001, 5, &sensors, &nearest);

        match decode(&data) {
            Some(DirActFrame::Proximity {
                cyclic_count,
                instance_id,
                sensors: decoded_sensors,
                nearest: decoded,
            }) => {
                assert_eq!(cyclic_count, 5);
                assert_eq!(instance_id, 0xcafe_0001);
                assert_eq!(decoded_sensors, sensors);
                assert_eq!(decoded.len(), 2);
                for (sent, received) in nearest.iter().zip(decoded.iter()) {
                    assert_eq!(sent.instance_id, received.instance_id);
                    assert!((i16::from(sent.rssi) - i16::from(received.rssi)).abs() <= 1);
                }
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_digest_frame_layout() {
        let entries = [
            DigestEntry {
                instance_id: 0x0000_0002,
                count: 300,
            },
            DigestEntry {
                instance_id: 0x0000_0003,
                count: 5,
            },
        ];
        let data = encode_digest(0x0000_0001, 2, true, 0x00ab_cdef, &entries);
        assert_eq!(data[0], DIRACT_DIGEST_FRAME);
        assert_eq!(data[1], (2 << 5) | 17);
        assert_eq!(&data[6..9], &[0x80 | 0x2b, 0xcd, 0xef]);
        assert_eq!(&data[9..14], &[0x00, 0x00, 0x00, 0x02, 0x81]);
        assert_eq!(&data[14..19], &[0x00, 0x00, 0x00, 0x03, 0x05]);

        match decode(&data) {
            Some(DirActFrame::Digest {
                page,
                is_last_page,
                digest_time,
                entries,
                ..
            }) => {
                assert_eq!(page, 2);
                assert!(is_last_page);
                assert_eq!(digest_time, 0x002b_cdef);
                assert_eq!(entries[0].count, 256);
                assert_eq!(entries[1].count, 5);
            }
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(decode(&[0x01, 0x07, 0, 0, 0]).is_none());
        assert!(decode(&[0x02, 0x07, 0, 0, 0, 1, 0, 0, 0]).is_none());
        // Declared length longer than the data
        assert!(decode(&[0x01, 0x0c, 0, 0, 0, 1, 0, 0, 0]).is_none());
        // Partial entry
        assert!(decode(&[0x01, 0x09, 0, 0, 0, 1, 0, 0, 0, 1, 2]).is_none());
    }

    #[test]
    fn test_classify_diract() {
        let data = encode_proximity(0x0000_0777, 1, &SensorSnapshot::default(), &[]);
        let record = ScanRecord::with_manufacturer_data(-55, DIRACT_MANUFACTURER_ID, data.clone());
        assert_eq!(
            filter().classify(&record),
            Some(Sighting::Peer {
                instance_id: 0x777,
                rssi: -55
            })
        );

        let other_company = ScanRecord::with_manufacturer_data(-55, 0x004c, data);
        assert_eq!(filter().classify(&other_company), None);

        let unknown_type = ScanRecord::with_manufacturer_data(
            -55,
            DIRACT_MANUFACTURER_ID,
            vec![0x02, 0x07, 0, 0, 0x07, 0x77, 0, 0, 0],
        );
        assert_eq!(filter().classify(&unknown_type), None);
    }

    #[test]
    fn test_classify_eddystone() {
        let data = eddystone_uid(&DEFAULT_NAMESPACE_FILTER, [0xaa, 0xbb, 0x01, 0x02, 0x03, 0x04]);
        let record = ScanRecord::with_service_data(-60, EDDYSTONE_UUID, data);
        assert_eq!(
            filter().classify(&record),
            Some(Sighting::Peer {
                instance_id: 0x0102_0304,
                rssi: -60
            })
        );

        let mut namespace = DEFAULT_NAMESPACE_FILTER;
        namespace[9] ^= 0x01;
        let data = eddystone_uid(&namespace, [0, 0, 0x01, 0x02, 0x03, 0x04]);
        let record = ScanRecord::with_service_data(-60, EDDYSTONE_UUID, data);
        assert_eq!(filter().classify(&record), None);

        let mut tlm = eddystone_uid(&DEFAULT_NAMESPACE_FILTER, [0, 0, 1, 2, 3, 4]);
        tlm[0] = 0x20;
        let record = ScanRecord::with_service_data(-60, EDDYSTONE_UUID, tlm);
        assert_eq!(filter().classify(&record), None);
    }

    #[test]
    fn test_classify_eddystone_shadows_manufacturer_data() {
        let mut tlm = eddystone_uid(&DEFAULT_NAMESPACE_FILTER, [0, 0, 1, 2, 3, 4]);
        tlm[0] = 0x20;
        let mut record = ScanRecord::with_service_data(-60, EDDYSTONE_UUID, tlm);
        record.manufacturer_data.insert(
            DIRACT_MANUFACTURER_ID,
            encode_proximity(0x0000_0777, 1, &SensorSnapshot::default(), &[]),
        );
        assert_eq!(filter().classify(&record), None);

        record.service_data.clear();
        assert_eq!(
            filter().classify(&record),
            Some(Sighting::Peer {
                instance_id: 0x777,
                rssi: -60
            })
        );
    }

    #[test]
    fn test_classify_reserved_instances() {
        let exciter = eddystone_uid(&DEFAULT_NAMESPACE_FILTER, [0, 0, 0xe8, 0xc1, 0x7e, 0x45]);
        let record = ScanRecord::with_service_data(-70, EDDYSTONE_UUID, exciter);
        assert_eq!(filter().classify(&record), Some(Sighting::Exciter));

        let resetter = eddystone_uid(&DEFAULT_NAMESPACE_FILTER, [0, 0, 0x4e, 0x5e, 0x77, 0xe4]);
        let record = ScanRecord::with_service_data(-70, EDDYSTONE_UUID, resetter);
        assert_eq!(filter().classify(&record), Some(Sighting::Resetter));

        let ignored = encode_proximity(0x0000_0bad, 1, &SensorSnapshot::default(), &[]);
        let record = ScanRecord::with_manufacturer_data(-40, DIRACT_MANUFACTURER_ID, ignored);
        assert_eq!(filter().classify(&record), None);
    }
}
