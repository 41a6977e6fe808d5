use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("netlink request failed: {0}")]
    Netlink(#[from] std::io::Error),

    #[error("interface {0:?} not found")]
    InterfaceNotFound(wireguard_control::InterfaceName),

    #[error("invalid public key: {0}")]
    InvalidKey(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    #[error("config error: {0}")]
    Config(#[from] wgkex_common::Error),
}
