use std::future::ready;

use btleplug::api::bleuuid::uuid_from_u16;
use btleplug::api::{Central as _, CentralEvent, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, PeripheralId};
use futures::{Stream, StreamExt as _};
use log::{debug, info, warn};
use tokio::sync::mpsc;

use crate::messages::{RadioCommand, ScanRecord};

/// The adapter operations the scanner needs.
pub trait ScanAdapter {
    type Id;

    async fn start_scan(&self) -> btleplug::Result<()>;
    async fn stop_scan(&self) -> btleplug::Result<()>;
    /// Current advertisement data of a discovered peripheral.
    async fn record(&self, id: &Self::Id) -> btleplug::Result<Option<ScanRecord>>;
}

impl ScanAdapter for Adapter {
    type Id = PeripheralId;

    async fn start_scan(&self) -> btleplug::Result<()> {
        btleplug::api::Central::start_scan(self, ScanFilter::default()).await
    }

    async fn stop_scan(&self) -> btleplug::Result<()> {
        btleplug::api::Central::stop_scan(self).await
    }

    async fn record(&self, id: &PeripheralId) -> btleplug::Result<Option<ScanRecord>> {
        let peripheral = self.peripheral(id).await?;
        Ok(peripheral.properties().await?.as_ref().and_then(scan_record))
    }
}

fn advertising_peripheral(event: CentralEvent) -> Option<PeripheralId> {
    match event {
        CentralEvent::DeviceDiscovered(id)
        | CentralEvent::DeviceUpdated(id)
        | CentralEvent::ManufacturerDataAdvertisement { id, .. }
        | CentralEvent::ServiceDataAdvertisement { id, .. } => Some(id),
        _ => None,
    }
}

/// Owns the Bluetooth adapter: starts and stops scanning on command and
/// forwards every advertisement seen while scanning. Adapter errors are
/// logged and skipped; only a closed command channel or event stream ends it.
pub struct Scanner<A> {
    adapter: A,
    commands: mpsc::UnboundedReceiver<RadioCommand>,
    records: mpsc::Sender<ScanRecord>,
    scanning: bool,
}

impl<A: ScanAdapter> Scanner<A> {
    pub fn new(
        adapter: A,
        commands: mpsc::UnboundedReceiver<RadioCommand>,
        records: mpsc::Sender<ScanRecord>,
    ) -> Self {
        Scanner {
            adapter,
            commands,
            records,
            scanning: false,
        }
    }

    async fn process<S>(mut self, mut discovered: S)
    where
        S: Stream<Item = A::Id> + Unpin,
    {
        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        debug!("Radio command channel closed");
                        break;
                    }
                },
                id = discovered.next() => match id {
                    Some(id) => self.handle_discovery(&id).await,
                    None => {
                        info!("No more events");
                        break;
                    }
                },
            }
        }

        if self.scanning {
            if let Err(err) = self.adapter.stop_scan().await {
                warn!("Failed to stop scanning: {}", err);
            }
        }
    }

    async fn handle_command(&mut self, command: RadioCommand) {
        match command {
            RadioCommand::StartScan if !self.scanning => match self.adapter.start_scan().await {
                Ok(()) => self.scanning = true,
                Err(err) => warn!("Failed to start scanning: {}", err),
            },
            RadioCommand::StopScan if self.scanning => {
                if let Err(err) = self.adapter.stop_scan().await {
                    warn!("Failed to stop scanning: {}", err);
                }
                // Results arriving after a failed stop are dropped all the same
                self.scanning = false;
            }
            _ => {}
        }
    }

    async fn handle_discovery(&mut self, id: &A::Id) {
        if !self.scanning {
            return;
        }
        let record = match self.adapter.record(id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(err) => {
                debug!("Skipping peripheral: {}", err);
                return;
            }
        };
        if let Err(err) = self.records.try_send(record) {
            warn!("Dropping scan record: {}", err);
        }
    }
}

impl Scanner<Adapter> {
    pub async fn run(self) -> anyhow::Result<()> {
        let events = self.adapter.events().await?;
        let discovered = events.filter_map(|event| ready(advertising_peripheral(event)));
        self.process(discovered).await;
        Ok(())
    }
}

/// Keeps only records with an rssi and some manufacturer or 16-bit service data.
pub fn scan_record(properties: &PeripheralProperties) -> Option<ScanRecord> {
    let rssi = properties.rssi?;
    let service_data = properties
        .service_data
        .iter()
        .filter_map(|(uuid, data)| {
            let short = (uuid.as_u128() >> 96) as u16;
            (*uuid == uuid_from_u16(short)).then(|| (short, data.clone()))
        })
        .collect();

    let record = ScanRecord {
        rssi,
        manufacturer_data: properties.manufacturer_data.clone(),
        service_data,
    };
    (!record.is_empty()).then_some(record)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::collections::HashMap;

    use super::*;
    use crate::frame::{DIRACT_MANUFACTURER_ID, EDDYSTONE_UUID};

    const VANISHED: u32 = 0;

    /// Refuses the first scan request and every lookup of `VANISHED`.
    #[derive(Default)]
    struct FlakyAdapter {
        start_attempts: Cell<usize>,
        stops: Cell<usize>,
    }

    impl ScanAdapter for FlakyAdapter {
        type Id = u32;

        async fn start_scan(&self) -> btleplug::Result<()> {
            self.start_attempts.set(self.start_attempts.get() + 1);
            if self.start_attempts.get() == 1 {
                return Err(btleplug::Error::RuntimeError("adapter busy".into()));
            }
            Ok(())
        }

        async fn stop_scan(&self) -> btleplug::Result<()> {
            self.stops.set(self.stops.get() + 1);
            Ok(())
        }

        async fn record(&self, id: &u32) -> btleplug::Result<Option<ScanRecord>> {
            if *id == VANISHED {
                return Err(btleplug::Error::DeviceNotFound);
            }
            Ok(Some(ScanRecord::with_manufacturer_data(
                -50,
                DIRACT_MANUFACTURER_ID,
                id.to_be_bytes().to_vec(),
            )))
        }
    }

    #[tokio::test]
    async fn test_adapter_errors_do_not_stop_scanner() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (record_tx, mut record_rx) = mpsc::channel(8);
        let mut scanner = Scanner::new(FlakyAdapter::default(), command_rx, record_tx);

        scanner.handle_command(RadioCommand::StartScan).await;
        assert!(!scanner.scanning);
        scanner.handle_discovery(&7).await;
        assert!(record_rx.try_recv().is_err());

        scanner.handle_command(RadioCommand::StartScan).await;
        assert!(scanner.scanning);
        scanner.handle_discovery(&VANISHED).await;
        scanner.handle_discovery(&7).await;
        let record = record_rx.try_recv().unwrap();
        assert_eq!(record.manufacturer_data(DIRACT_MANUFACTURER_ID), Some(&[0, 0, 0, 7][..]));
        assert!(record_rx.try_recv().is_err());

        scanner.handle_command(RadioCommand::StopScan).await;
        assert!(!scanner.scanning);
        drop(command_tx);
    }

    #[tokio::test]
    async fn test_process_runs_until_events_end() {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (record_tx, mut record_rx) = mpsc::channel(8);
        let scanner = Scanner::new(FlakyAdapter::default(), command_rx, record_tx);

        command_tx.send(RadioCommand::StartScan).unwrap();
        command_tx.send(RadioCommand::StartScan).unwrap();
        scanner
            .process(futures::stream::iter(vec![VANISHED, 3, VANISHED, 4]))
            .await;

        let ids: Vec<Vec<u8>> = std::iter::from_fn(|| record_rx.try_recv().ok())
            .filter_map(|record| record.manufacturer_data(DIRACT_MANUFACTURER_ID).map(<[u8]>::to_vec))
            .collect();
        assert_eq!(ids, vec![vec![0, 0, 0, 3], vec![0, 0, 0, 4]]);
        drop(command_tx);
    }

    #[test]
    fn test_scan_record_from_properties() {
        let mut properties = PeripheralProperties {
            rssi: Some(-61),
            ..PeripheralProperties::default()
        };
        properties
            .manufacturer_data
            .insert(0x0583, vec![0x01, 0x07]);
        properties
            .service_data
            .insert(uuid_from_u16(EDDYSTONE_UUID), vec![0x00]);

        let record = scan_record(&properties).unwrap();
        assert_eq!(record.rssi, -61);
        assert_eq!(record.manufacturer_data(0x0583), Some(&[0x01, 0x07][..]));
        assert_eq!(record.service_data(EDDYSTONE_UUID), Some(&[0x00][..]));
    }

    #[test]
    fn test_scan_record_requires_payload_and_rssi() {
        let properties = PeripheralProperties {
            rssi: Some(-61),
            ..PeripheralProperties::default()
        };
        assert!(scan_record(&properties).is_none());

        let properties = PeripheralProperties {
            manufacturer_data: HashMap::from([(0x0583, vec![0x01])]),
            ..PeripheralProperties::default()
        };
        assert!(scan_record(&properties).is_none());
    }
}
