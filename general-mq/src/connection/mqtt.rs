// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! MQTT 3.1/5 connection backend, built on `rumqttc`'s v5 client.

use crate::constants::{
    DEFAULT_CONNECT_TIMEOUT_MILLIS, DEFAULT_RECONNECT_MILLIS, MQTT_CLIENT_ID_MAX_LEN,
    MQTT_CLIENT_ID_PREFIX, MQTT_CLIENT_ID_RANDOM_LEN,
};
use crate::error::{GeneralMqError, GeneralMqErrorKind, TransportError};
use crate::status::{Status, StatusChannel, StatusReceiver};
use rand::Rng;
use rumqttc::tokio_rustls::rustls::client::danger::{
    HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
};
use rumqttc::tokio_rustls::rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rumqttc::tokio_rustls::rustls::{ClientConfig, DigitallySignedStruct, RootCertStore};
use rumqttc::v5::mqttbytes::v5::Publish;
use rumqttc::v5::{AsyncClient, Event, EventLoop, Incoming, MqttOptions};
use rumqttc::{TlsConfiguration, Transport};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

/// Options for an MQTT 3.1/5 [`Connection`](super::Connection).
#[derive(Builder, Clone, Debug)]
#[builder(setter(into, strip_option), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionOptions {
    /// `mqtt(s)://host:port`.
    pub host_uri: String,
    /// Dial timeout, in milliseconds.
    #[builder(default = "DEFAULT_CONNECT_TIMEOUT_MILLIS")]
    pub connect_timeout_millis: u64,
    /// Delay between reconnect attempts, in milliseconds.
    #[builder(default = "DEFAULT_RECONNECT_MILLIS")]
    pub reconnect_millis: u64,
    /// Client ID. Generated (`general-mq-<random>`) when omitted.
    #[builder(default = "None")]
    pub client_id: Option<String>,
    /// Whether the broker should discard prior session state on connect.
    #[builder(default = "true")]
    pub clean_session: bool,
    /// Skip server certificate verification for `mqtts://`. Has no effect on
    /// a plain `mqtt://` connection.
    #[builder(default = "false")]
    pub insecure: bool,
}

impl MqttConnectionOptionsBuilder {
    fn validate(&self) -> std::result::Result<(), String> {
        let uri = self
            .host_uri
            .as_ref()
            .ok_or_else(|| "host_uri is required".to_string())?;
        let parsed = fluent_uri::Uri::parse(uri).map_err(|e| format!("invalid host uri: {e}"))?;
        match parsed.scheme().as_str() {
            "mqtt" | "mqtts" => {}
            other => return Err(format!("host uri scheme must be mqtt or mqtts, got {other}")),
        }
        if let Some(Some(id)) = &self.client_id {
            if id.is_empty() || id.len() > MQTT_CLIENT_ID_MAX_LEN {
                return Err(format!(
                    "client_id must be 1..={MQTT_CLIENT_ID_MAX_LEN} characters"
                ));
            }
        }
        Ok(())
    }
}

/// Certificate verifier that accepts any server certificate, for
/// [`MqttConnectionOptions::insecure`].
#[derive(Debug)]
struct NoVerifier;

impl ServerCertVerifier for NoVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rumqttc::tokio_rustls::rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rumqttc::tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rumqttc::tokio_rustls::rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(
        &self,
    ) -> Vec<rumqttc::tokio_rustls::rustls::SignatureScheme> {
        use rumqttc::tokio_rustls::rustls::SignatureScheme;
        vec![
            SignatureScheme::RSA_PKCS1_SHA256,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP521_SHA512,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::ED25519,
        ]
    }
}

/// Build the rustls client config for an `mqtts://` dial: the system's
/// native trust roots, or no verification at all when `insecure`.
fn tls_config(insecure: bool) -> Result<ClientConfig, GeneralMqError> {
    if insecure {
        return Ok(ClientConfig::builder()
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier))
            .with_no_client_auth());
    }
    let mut root_cert_store = RootCertStore::empty();
    let native_certs = rustls_native_certs::load_native_certs().map_err(|e| {
        GeneralMqError::new(GeneralMqErrorKind::Transport(TransportError::Other(
            format!("loading native root certificates: {e}"),
        )))
    })?;
    for cert in native_certs {
        root_cert_store.add(cert).map_err(|e| {
            GeneralMqError::new(GeneralMqErrorKind::Transport(TransportError::Other(
                format!("invalid root certificate: {e}"),
            )))
        })?;
    }
    Ok(ClientConfig::builder()
        .with_root_certificates(root_cert_store)
        .with_no_client_auth())
}

fn generate_client_id() -> String {
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..MQTT_CLIENT_ID_RANDOM_LEN)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("{MQTT_CLIENT_ID_PREFIX}{suffix}")
}

/// A handler invoked with each PUBLISH delivered for a topic it was
/// registered against. Registered by [`crate::queue::mqtt::MqttQueue`].
pub(crate) type PacketHandler =
    Arc<dyn Fn(Publish) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

#[derive(Default)]
pub(crate) struct PacketHandlerRegistry {
    by_topic: Mutex<HashMap<String, PacketHandler>>,
}

impl PacketHandlerRegistry {
    pub(crate) async fn insert(&self, topic: String, handler: PacketHandler) {
        self.by_topic.lock().await.insert(topic, handler);
    }

    pub(crate) async fn remove(&self, topic: &str) {
        self.by_topic.lock().await.remove(topic);
    }

    async fn dispatch(&self, publish: Publish) {
        let topic = String::from_utf8_lossy(&publish.topic).to_string();
        let handler = self.by_topic.lock().await.get(&topic).cloned();
        if let Some(handler) = handler {
            handler(publish).await;
        } else {
            log::debug!("mqtt message on topic {topic} with no registered handler");
        }
    }
}

/// An MQTT 3.1/5 transport to a single broker.
pub struct MqttConnection {
    options: MqttConnectionOptions,
    status: StatusChannel,
    client: AsyncClient,
    event_loop: Mutex<Option<EventLoop>>,
    handlers: Arc<PacketHandlerRegistry>,
    closing: AtomicBool,
    join: Mutex<Option<JoinHandle<()>>>,
    close_notify: Notify,
}

impl MqttConnection {
    /// Construct a new, not-yet-connected MQTT connection.
    pub fn new(options: MqttConnectionOptions) -> Result<Self, GeneralMqError> {
        let parsed = fluent_uri::Uri::parse(&options.host_uri).expect("validated by builder");
        let host = parsed.authority().map(|a| a.host().to_string()).unwrap_or_default();
        let is_tls = parsed.scheme().as_str() == "mqtts";
        let port = parsed
            .authority()
            .and_then(|a| a.port())
            .and_then(|p| p.as_str().parse::<u16>().ok())
            .unwrap_or(if is_tls { 8883 } else { 1883 });
        let client_id = options
            .client_id
            .clone()
            .unwrap_or_else(generate_client_id);
        let mut mqtt_options = MqttOptions::new(client_id, host, port);
        mqtt_options.set_keep_alive(Duration::from_secs(30));
        mqtt_options.set_clean_start(options.clean_session);
        if is_tls {
            let config = tls_config(options.insecure)?;
            mqtt_options.set_transport(Transport::tls_with_config(TlsConfiguration::Rustls(
                Arc::new(config),
            )));
        }
        mqtt_options.set_connection_timeout(options.connect_timeout_millis / 1000 + 1);
        let (client, event_loop) = AsyncClient::new(mqtt_options, 256);
        Ok(Self {
            options,
            status: StatusChannel::new(Status::Closed),
            client,
            event_loop: Mutex::new(Some(event_loop)),
            handlers: Arc::new(PacketHandlerRegistry::default()),
            closing: AtomicBool::new(false),
            join: Mutex::new(None),
            close_notify: Notify::new(),
        })
    }

    /// Current lifecycle status.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status.get()
    }

    /// Subscribe to this connection's status transitions.
    #[must_use]
    pub fn status_receiver(&self) -> StatusReceiver {
        self.status.receiver()
    }

    pub(crate) fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub(crate) fn handlers(&self) -> &Arc<PacketHandlerRegistry> {
        &self.handlers
    }

    fn closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    pub(crate) async fn connect(self: &Arc<Self>) -> Result<(), GeneralMqError> {
        let mut join = self.join.lock().await;
        if join.is_some() {
            return Ok(());
        }
        self.closing.store(false, Ordering::Release);
        let this = Arc::clone(self);
        *join = Some(tokio::spawn(async move { this.run().await }));
        Ok(())
    }

    pub(crate) async fn close(self: &Arc<Self>) -> Result<(), GeneralMqError> {
        self.closing.store(true, Ordering::Release);
        self.status.set(Status::Closing);
        let _ = self.client.disconnect().await;
        self.close_notify.notify_waiters();
        let handle = self.join.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.status.set(Status::Closed);
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        loop {
            if self.closing() {
                break;
            }
            let event = {
                let mut guard = self.event_loop.lock().await;
                let event_loop = guard.as_mut().expect("event loop present while running");
                event_loop.poll().await
            };
            match event {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    self.status.set(Status::Connected);
                }
                Ok(Event::Incoming(Incoming::Disconnect(_))) => {
                    if !self.closing() {
                        self.status.set(Status::Disconnected);
                    }
                }
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    self.handlers.dispatch(publish).await;
                }
                Ok(_) => {}
                Err(e) => {
                    if self.closing() {
                        break;
                    }
                    log::warn!("mqtt event loop error: {e}");
                    self.status.set(Status::Disconnected);
                    tokio::time::sleep(Duration::from_millis(self.options.reconnect_millis)).await;
                }
            }
        }
        self.status.set(Status::Closed);
    }
}
