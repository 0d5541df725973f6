//! MQTT broker transport adapter — implements [`BrokerTransport`] (§4.4).
//!
//! Grounded on `original_source/include/services/MqttService.hpp` for the
//! connect/publish/subscribe/poll shape, and on the teacher's `wifi.rs` for
//! the pattern of a thin adapter wrapping an ESP-IDF client handle behind a
//! port trait. `link_up` delegates to a shared [`WifiAdapter`] rather than
//! querying the socket directly, matching §4.4's requirement that the
//! broker only attempts a connection once the network link itself is up.

use std::cell::RefCell;
use std::rc::Rc;

use heapless::{String, Vec};

use crate::broker::BrokerTransport;
use crate::error::BrokerFault;
use crate::event::MAX_INLINE_PAYLOAD;
use crate::event::MAX_TOPIC_LEN;

use super::wifi::WifiAdapter;

#[cfg(target_os = "espidf")]
use esp_idf_svc::mqtt::client::{EspMqttClient, MqttClientConfiguration, QoS};

pub struct MqttAdapter {
    wifi: Rc<RefCell<WifiAdapter>>,
    #[cfg(target_os = "espidf")]
    client: Option<EspMqttClient<'static>>,
    #[cfg(not(target_os = "espidf"))]
    connected: bool,
    #[cfg(not(target_os = "espidf"))]
    inbox: std::collections::VecDeque<(String<MAX_TOPIC_LEN>, Vec<u8, MAX_INLINE_PAYLOAD>)>,
}

impl MqttAdapter {
    pub fn new(wifi: Rc<RefCell<WifiAdapter>>) -> Self {
        Self {
            wifi,
            #[cfg(target_os = "espidf")]
            client: None,
            #[cfg(not(target_os = "espidf"))]
            connected: false,
            #[cfg(not(target_os = "espidf"))]
            inbox: std::collections::VecDeque::new(),
        }
    }
}

impl BrokerTransport for MqttAdapter {
    #[cfg(target_os = "espidf")]
    fn connect(&mut self, host: &str, port: u16, username: &str, password: &str) -> Result<(), BrokerFault> {
        let url = format!("mqtt://{host}:{port}");
        let conf = MqttClientConfiguration {
            username: (!username.is_empty()).then_some(username),
            password: (!password.is_empty()).then_some(password),
            ..Default::default()
        };
        match EspMqttClient::new_cb(&url, &conf, |_event| {
            // Incoming-message handling is wired by `poll_message` via a
            // shared inbox in a fuller client integration; kept minimal
            // here since the coordination core only needs connect/publish
            // for the attendance data path described by §4.4.
        }) {
            Ok(client) => {
                self.client = Some(client);
                Ok(())
            }
            Err(_) => Err(BrokerFault::ConnectFailed),
        }
    }

    #[cfg(not(target_os = "espidf"))]
    fn connect(&mut self, _host: &str, _port: u16, _username: &str, _password: &str) -> Result<(), BrokerFault> {
        self.connected = true;
        Ok(())
    }

    #[cfg(target_os = "espidf")]
    fn disconnect(&mut self) {
        self.client = None;
    }

    #[cfg(not(target_os = "espidf"))]
    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn link_up(&self) -> bool {
        self.wifi.borrow().is_connected()
    }

    #[cfg(target_os = "espidf")]
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), BrokerFault> {
        let Some(client) = self.client.as_mut() else {
            return Err(BrokerFault::NotConnected);
        };
        client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|_| BrokerFault::PublishFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<(), BrokerFault> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerFault::NotConnected)
        }
    }

    #[cfg(target_os = "espidf")]
    fn subscribe(&mut self, topic: &str) -> Result<(), BrokerFault> {
        let Some(client) = self.client.as_mut() else {
            return Err(BrokerFault::NotConnected);
        };
        client
            .subscribe(topic, QoS::AtLeastOnce)
            .map_err(|_| BrokerFault::SubscribeFailed)
    }

    #[cfg(not(target_os = "espidf"))]
    fn subscribe(&mut self, _topic: &str) -> Result<(), BrokerFault> {
        if self.connected {
            Ok(())
        } else {
            Err(BrokerFault::NotConnected)
        }
    }

    #[cfg(target_os = "espidf")]
    fn poll_message(&mut self) -> Option<(String<MAX_TOPIC_LEN>, Vec<u8, MAX_INLINE_PAYLOAD>)> {
        // The ESP-IDF client delivers messages through the callback passed
        // to `new_cb`; a production build routes those into a queue this
        // method drains. Left as a no-op drain point here.
        None
    }

    #[cfg(not(target_os = "espidf"))]
    fn poll_message(&mut self) -> Option<(String<MAX_TOPIC_LEN>, Vec<u8, MAX_INLINE_PAYLOAD>)> {
        self.inbox.pop_front()
    }
}

// `BrokerClient<T: BrokerTransport>` (see `broker/mod.rs`) provides the
// `BatchPublisher` impl generically; `AttendancePipeline` is driven with
// `&mut BrokerClient<MqttAdapter>`, never `&mut MqttAdapter` directly.
