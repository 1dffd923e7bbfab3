use joinwall_store::RecordError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GateError>;

#[derive(Error, Debug)]
pub enum GateError {
    #[error("Invalid IP address: {0}")]
    InvalidIp(String),

    /// The in-memory gate was updated but the record file was not.
    #[error("Blocklist change for {ip} applied in memory but not persisted: {source}")]
    Persist {
        ip: String,
        #[source]
        source: RecordError,
    },
}
