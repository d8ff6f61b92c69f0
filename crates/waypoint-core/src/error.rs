use thiserror::Error;

use crate::config::ConfigError;
use crate::domain::EnvelopeError;
use crate::ports::TransportError;

#[derive(Debug, Error)]
pub enum WaypointError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("gave up reconnecting to the broker after {attempts} attempts: {last}")]
    ReconnectExhausted { attempts: u32, last: TransportError },
}
