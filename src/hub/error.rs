use std::net::IpAddr;
use thiserror::Error;

/// Reasons the registry refuses a new connection
#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("connection pool is full ({capacity} connections)")]
    PoolFull { capacity: usize },
    #[error("too many connections from {ip} (limit {limit})")]
    IpLimit { ip: IpAddr, limit: usize },
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}
