use log::debug;

use crate::quantize::MIN_RSSI_TO_ENCODE;

pub const PROXIMITY_CAPACITY: usize = 8;
pub const DEFAULT_PROXIMITY_RSSI_THRESHOLD: i8 = -65;

/// Stable 32-bit identity a beacon advertises.
pub type InstanceId = u32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProximityEntry {
    pub instance_id: InstanceId,
    pub rssi: i8,
}

/// Outcome of offering a sighting to the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Tracked {
    Inserted,
    Averaged,
    /// Table full; the sighting is not tracked until the next reset.
    Dropped,
}

/// Short-lived table of the peers heard during one observation window.
#[derive(Debug, Clone)]
pub struct ProximityTable {
    slots: [Option<ProximityEntry>; PROXIMITY_CAPACITY],
    threshold: i8,
}

impl Default for ProximityTable {
    fn default() -> Self {
        ProximityTable::new(DEFAULT_PROXIMITY_RSSI_THRESHOLD)
    }
}

impl ProximityTable {
    pub fn new(threshold: i8) -> Self {
        ProximityTable {
            slots: [None; PROXIMITY_CAPACITY],
            threshold,
        }
    }

    pub fn reset(&mut self) {
        self.slots = [None; PROXIMITY_CAPACITY];
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    pub fn get(&self, index: usize) -> Option<&ProximityEntry> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    #[cfg(test)]
    pub fn find(&self, instance_id: InstanceId) -> Option<&ProximityEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.instance_id == instance_id)
    }

    /// Records a sighting. A known instance has its rssi replaced by the mean
    /// of the stored and new values; an unknown one takes the first free slot.
    /// Nothing is ever evicted.
    pub fn update(&mut self, instance_id: InstanceId, rssi: i8) -> Tracked {
        if let Some(entry) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.instance_id == instance_id)
        {
            entry.rssi = ((i16::from(entry.rssi) + i16::from(rssi)) / 2) as i8;
            return Tracked::Averaged;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(ProximityEntry { instance_id, rssi });
                Tracked::Inserted
            }
            None => {
                debug!("Proximity table full, dropping {:08x}", instance_id);
                Tracked::Dropped
            }
        }
    }

    fn rssi_at(&self, index: usize) -> i8 {
        self.get(index).map_or(MIN_RSSI_TO_ENCODE, |entry| entry.rssi)
    }

    /// Slot indices ordered by rssi, strongest first. Ties keep slot order and
    /// free slots rank as the weakest possible reading.
    pub fn rank_descending(&self) -> [usize; PROXIMITY_CAPACITY] {
        let mut indices: [usize; PROXIMITY_CAPACITY] = std::array::from_fn(|i| i);
        indices.sort_by(|&a, &b| self.rssi_at(b).cmp(&self.rssi_at(a)));
        indices
    }

    /// Walks `ranked` and yields entries at or above the threshold, stopping at
    /// the first one below it.
    pub fn above_threshold<'a>(
        &'a self,
        ranked: &'a [usize],
    ) -> impl Iterator<Item = &'a ProximityEntry> + 'a {
        ranked
            .iter()
            .map_while(move |&index| self.get(index).filter(|e| e.rssi >= self.threshold))
    }

    /// Up to `n` of the strongest entries at or above the threshold.
    pub fn strongest<'a>(
        &'a self,
        ranked: &'a [usize],
        n: usize,
    ) -> impl Iterator<Item = &'a ProximityEntry> + 'a {
        self.above_threshold(ranked).take(n)
    }
}
