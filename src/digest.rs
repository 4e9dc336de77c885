//! Long-window encounter counting for digest-capable beacons.

use log::debug;

use crate::proximity::{InstanceId, ProximityTable};

pub const DIGEST_CAPACITY: usize = 32;
pub const ENTRIES_PER_PAGE: usize = 3;
pub const MAX_DIGEST_PAGES: u8 = 8;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DigestEntry {
    pub instance_id: InstanceId,
    pub count: u16,
}

/// Frozen, ranked view of the digest table taken when a paged broadcast starts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompiledDigest {
    pub number_of_pages: u8,
    /// Epoch seconds truncated to 24 bits.
    pub digest_time: u32,
    entries: Vec<DigestEntry>,
}

impl CompiledDigest {
    pub fn is_last_page(&self, page: u8) -> bool {
        page + 1 >= self.number_of_pages
    }

    /// Entries carried by `page`, at most [`ENTRIES_PER_PAGE`].
    pub fn page(&self, page: u8) -> &[DigestEntry] {
        let start = (usize::from(page) * ENTRIES_PER_PAGE).min(self.entries.len());
        let end = (start + ENTRIES_PER_PAGE).min(self.entries.len());
        &self.entries[start..end]
    }
}

#[derive(Debug, Clone)]
pub struct DigestTable {
    slots: [Option<DigestEntry>; DIGEST_CAPACITY],
}

impl Default for DigestTable {
    fn default() -> Self {
        DigestTable {
            slots: [None; DIGEST_CAPACITY],
        }
    }
}

impl DigestTable {
    pub fn reset(&mut self) {
        self.slots = [None; DIGEST_CAPACITY];
    }

    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    #[cfg(test)]
    pub fn find(&self, instance_id: InstanceId) -> Option<&DigestEntry> {
        self.slots
            .iter()
            .flatten()
            .find(|entry| entry.instance_id == instance_id)
    }

    /// Counts one encounter for every ranked proximity entry at or above the
    /// proximity threshold. Returns how many instances were counted.
    pub fn accumulate(&mut self, proximity: &ProximityTable, ranked: &[usize]) -> usize {
        let mut counted = 0;
        for entry in proximity.above_threshold(ranked) {
            if self.increment(entry.instance_id) {
                counted += 1;
            }
        }
        counted
    }

    fn increment(&mut self, instance_id: InstanceId) -> bool {
        if let Some(entry) = self
            .slots
            .iter_mut()
            .flatten()
            .find(|entry| entry.instance_id == instance_id)
        {
            entry.count = entry.count.saturating_add(1);
            return true;
        }

        match self.slots.iter_mut().find(|slot| slot.is_none()) {
            Some(slot) => {
                *slot = Some(DigestEntry {
                    instance_id,
                    count: 1,
                });
                true
            }
            None => {
                debug!("Digest table full, dropping {:08x}", instance_id);
                false
            }
        }
    }

    fn count_at(&self, index: usize) -> u16 {
        self.slots[index].map_or(0, |entry| entry.count)
    }

    /// Slot indices ordered by count, highest first, ties in slot order.
    pub fn rank_descending(&self) -> [usize; DIGEST_CAPACITY] {
        let mut indices: [usize; DIGEST_CAPACITY] = std::array::from_fn(|i| i);
        indices.sort_by(|&a, &b| self.count_at(b).cmp(&self.count_at(a)));
        indices
    }

    pub fn compile(&self, now_secs: u64) -> CompiledDigest {
        let live = self.len();
        let pages = live.div_ceil(ENTRIES_PER_PAGE).clamp(1, usize::from(MAX_DIGEST_PAGES));
        let entries = self
            .rank_descending()
            .iter()
            .filter_map(|&index| self.slots[index])
            .take(pages * ENTRIES_PER_PAGE)
            .collect();

        CompiledDigest {
            number_of_pages: pages as u8,
            digest_time: (now_secs & 0x00ff_ffff) as u32,
            entries,
        }
    }
}

/// Counts up to 127 are sent verbatim. Larger counts set the high bit and
/// carry `count >> 8`, saturating at 127.
pub fn encode_count(count: u16) -> u8 {
    if count <= 0x7f {
        return count as u8;
    }
    0x80 | (count >> 8).min(0x7f) as u8
}

/// Lower bound of the counts that share `code`.
pub fn decode_count(code: u8) -> u16 {
    if code & 0x80 == 0 {
        return u16::from(code);
    }
    (u16::from(code & 0x7f) << 8).max(0x80)
}
