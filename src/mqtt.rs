use std::time::{Duration, Instant};

use log::{debug, error, info};
use rumqttc::{MqttOptions, QoS, SubscribeFilter};
use serde_derive::Serialize;
use tokio::sync::broadcast;

use crate::hardware::Cue;
use crate::proximity::InstanceId;
use crate::{config, messages::InputEvent};

#[derive(Debug, Clone)]
pub struct MqttClient {
    client: rumqttc::AsyncClient,
    publisher_id: String,
    topic_path: String,
}

#[derive(Debug, Serialize)]
struct AdvertisementMqttMessage {
    #[serde(rename = "id")]
    instance_id: String,
    manufacturer_id: u16,
    interval_ms: u64,
    payload: String,
}

#[derive(Debug, Serialize)]
struct PowerMqttMessage {
    #[serde(rename = "id")]
    instance_id: String,
    state: &'static str,
}

impl MqttClient {
    pub fn new(config: &config::MqttConfig) -> (Self, rumqttc::EventLoop) {
        let publisher_id = config
            .publisher_id
            .as_ref()
            .unwrap_or(&"diract-rs".to_string())
            .to_string();

        let mut mqttoptions = MqttOptions::new(
            publisher_id.clone(),
            config.host.clone(),
            config.port.unwrap_or(1883),
        );

        mqttoptions.set_keep_alive(Duration::from_secs(config.keep_alive_seconds.unwrap_or(5)));

        if let (Some(username), Some(password)) =
            (config.username.as_ref(), config.password.as_ref())
        {
            mqttoptions.set_credentials(username.clone(), password.clone());
        }

        let (client, eventloop) = rumqttc::AsyncClient::new(mqttoptions, 10);

        (
            MqttClient {
                client,
                publisher_id,
                topic_path: config.topic_path.clone().unwrap_or("diract".to_string()),
            },
            eventloop,
        )
    }

    pub async fn subscribe(&self) -> Result<(), rumqttc::ClientError> {
        self.client
            .subscribe_many(vec![
                SubscribeFilter::new(format!("{}/button", self.topic_path), QoS::AtMostOnce),
                SubscribeFilter::new(
                    format!("{}/{}/button", self.topic_path, self.publisher_id),
                    QoS::AtMostOnce,
                ),
            ])
            .await?;

        Ok(())
    }

    /// Polls the connection and turns button messages into debounced
    /// [`InputEvent`]s.
    pub async fn event_loop(
        &self,
        eventloop: &mut rumqttc::EventLoop,
        tx: broadcast::Sender<InputEvent>,
        debounce: Duration,
    ) {
        let mut last_press: Option<Instant> = None;
        loop {
            match eventloop.poll().await {
                Ok(notification) => match notification {
                    rumqttc::Event::Incoming(rumqttc::Packet::Publish(p)) => {
                        debug!("Received MQTT message on topic {}: {:?}", p.topic, p.payload);

                        if !p.topic.ends_with("/button") {
                            continue;
                        }
                        if last_press.is_some_and(|t| t.elapsed() < debounce) {
                            debug!("Ignoring bounced button press");
                            continue;
                        }
                        last_press = Some(Instant::now());

                        if let Err(err) = tx.send(InputEvent::ButtonPressed) {
                            error!("Error announcing button press: {:?}", err);
                        }
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::SubAck(_)) => {
                        debug!("Subscription acknowledged");
                    }
                    rumqttc::Event::Incoming(rumqttc::Packet::ConnAck(_)) => {
                        debug!("Connection acknowledged");
                        if let Err(err) = self.subscribe().await {
                            error!("Error subscribing to MQTT topics: {:?}", err);
                        }
                    }
                    _ => {}
                },
                Err(e) => {
                    error!("Error polling MQTT event loop: {:?}", e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn topic(&self, leaf: &str) -> String {
        format!("{}/{}/{}", self.topic_path, self.publisher_id, leaf)
    }

    /// Mirrors an advertisement onto `<topic>/<publisher>/advertisement`.
    /// Never blocks; a full request queue drops the message.
    pub fn publish_advertisement(
        &self,
        instance_id: InstanceId,
        interval: Duration,
        manufacturer_id: u16,
        payload: &[u8],
    ) -> Result<(), rumqttc::ClientError> {
        let message = AdvertisementMqttMessage {
            instance_id: format!("{:08x}", instance_id),
            manufacturer_id,
            interval_ms: interval.as_millis() as u64,
            payload: to_hex(payload),
        };
        self.publish_json("advertisement", &message)
    }

    pub fn publish_cue(&self, cue: &Cue) -> Result<(), rumqttc::ClientError> {
        self.publish_json("feedback", cue)
    }

    pub fn publish_power(
        &self,
        instance_id: InstanceId,
        asleep: bool,
    ) -> Result<(), rumqttc::ClientError> {
        info!("Announcing power state (asleep: {}) on MQTT", asleep);
        let message = PowerMqttMessage {
            instance_id: format!("{:08x}", instance_id),
            state: if asleep { "sleep" } else { "wake" },
        };
        self.publish_json("power", &message)
    }

    fn publish_json<T: serde::Serialize>(
        &self,
        leaf: &str,
        message: &T,
    ) -> Result<(), rumqttc::ClientError> {
        let payload = match serde_json::to_string(message) {
            Ok(payload) => payload,
            Err(err) => {
                error!("Error serializing {} message: {:?}", leaf, err);
                return Ok(());
            }
        };
        self.client
            .try_publish(self.topic(leaf), QoS::AtMostOnce, false, payload)
    }

    pub async fn disconnect(&self) -> Result<(), rumqttc::ClientError> {
        debug!("Disconnecting MQTT client");
        self.client.disconnect().await
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect::<String>()
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_to_hex() {
        assert_eq!(super::to_hex(&[0x01, 0x6c, 0x00, 0xff]), "016c00ff");
        assert_eq!(super::to_hex(&[]), "");
    }

    #[test]
    fn test_advertisement_message() {
        let message = super::AdvertisementMqttMessage {
            instance_id: format!("{:08x}", 1),
            manufacturer_id: 0x0583,
            interval_ms: 200,
            payload: super::to_hex(&[0x01, 0x07]),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert_eq!(
            json,
            r#"{"id":"00000001","manufacturer_id":1411,"interval_ms":200,"payload":"0107"}"#
        );
    }
}
