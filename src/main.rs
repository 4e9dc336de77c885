use std::path::PathBuf;

use anyhow::Context as _;
use btleplug::api::Manager as _;
use btleplug::platform::Manager;
use clap::Parser;
use log::{error, info};
use tokio::sync::{broadcast, mpsc};

mod config;
mod digest;
mod frame;
mod hardware;
mod host;
mod manager;
mod messages;
mod mqtt;
mod proximity;
mod quantize;
mod scanner;
mod scheduler;

/// DirAct proximity beacon
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Index of the Bluetooth adapter to scan with
    #[arg(short, long, default_value_t = 0)]
    adapter: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pretty_env_logger::init();
    let args = Args::parse();

    let config = config::AppConfig::load(&args.config)?;
    let scheduler_config = config.scheduler_config()?;

    let (input_tx, input_rx) = broadcast::channel(10);

    let mqtt_client = match &config.mqtt {
        Some(mqtt_config) => {
            let (mqtt_client, mut eventloop) = mqtt::MqttClient::new(mqtt_config);
            mqtt_client.subscribe().await?;

            let client = mqtt_client.clone();
            let tx = input_tx.clone();
            let debounce = config.debounce();
            tokio::task::spawn(async move {
                client.event_loop(&mut eventloop, tx, debounce).await;
            });
            Some(mqtt_client)
        }
        None => {
            info!("No MQTT broker configured, advertisements are only logged");
            None
        }
    };

    let bt_manager = Manager::new().await?;
    let adapters = bt_manager.adapters().await?;
    let central = adapters
        .into_iter()
        .nth(args.adapter)
        .with_context(|| format!("no bluetooth adapter at index {}", args.adapter))?;

    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (record_tx, record_rx) = mpsc::channel(64);

    let scanner = scanner::Scanner::new(central, command_rx, record_tx);
    let scanner_handle = tokio::task::spawn(async move {
        if let Err(err) = scanner.run().await {
            error!("Error handling BTLE events: {:?}", err);
        }
        info!("Done handling BTLE events");
    });

    let hardware = host::HostHardware::new(
        scheduler_config.instance_id,
        command_tx,
        mqtt_client.clone(),
        config.battery_voltage(),
    );
    let scheduler = scheduler::Scheduler::new(hardware, scheduler_config);

    // Dropping the manager closes the radio command channel, which stops the scanner
    manager::Manager::new(scheduler, record_rx, input_rx)
        .run_loop()
        .await?;
    drop(input_tx);

    if let Err(err) = scanner_handle.await {
        error!("Error joining scanner: {:?}", err);
    }

    if let Some(mqtt_client) = mqtt_client {
        mqtt_client.disconnect().await?;
    }

    Ok(())
}
