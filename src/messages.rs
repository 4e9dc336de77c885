use std::collections::HashMap;

/// One advertisement as delivered by the scan service.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScanRecord {
    pub rssi: i16,
    /// Keyed by Bluetooth SIG company identifier.
    pub manufacturer_data: HashMap<u16, Vec<u8>>,
    /// Keyed by 16-bit service UUID.
    pub service_data: HashMap<u16, Vec<u8>>,
}

impl ScanRecord {
    pub fn manufacturer_data(&self, company_id: u16) -> Option<&[u8]> {
        self.manufacturer_data.get(&company_id).map(Vec::as_slice)
    }

    pub fn service_data(&self, uuid: u16) -> Option<&[u8]> {
        self.service_data.get(&uuid).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.manufacturer_data.is_empty() && self.service_data.is_empty()
    }
}

#[cfg(test)]
impl ScanRecord {
    pub fn with_manufacturer_data(rssi: i16, company_id: u16, data: Vec<u8>) -> Self {
        ScanRecord {
            rssi,
            manufacturer_data: HashMap::from([(company_id, data)]),
            ..ScanRecord::default()
        }
    }

    pub fn with_service_data(rssi: i16, uuid: u16, data: Vec<u8>) -> Self {
        ScanRecord {
            rssi,
            service_data: HashMap::from([(uuid, data)]),
            ..ScanRecord::default()
        }
    }
}

/// Commands for the task that owns the Bluetooth adapter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RadioCommand {
    StartScan,
    StopScan,
}

/// Debounced user input.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    ButtonPressed,
}
