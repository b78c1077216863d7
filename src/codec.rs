//! Packet codec seam.
//!
//! The wire-level encryption and packet framing live outside this crate.
//! The engine hands the codec plaintext task lists keyed by the session's
//! key and consumes decoded check-in metadata and result fragments.

use serde::{Deserialize, Serialize};

use crate::models::session::CheckinMetadata;
use crate::models::task::{ResultFragment, Task};
use crate::{AppError, Result};

/// Decoded contents of one inbound check-in.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckinEnvelope {
    /// Agent-reported metadata.
    pub metadata: CheckinMetadata,
    /// Result fragments returned with this check-in.
    #[serde(default)]
    pub results: Vec<ResultFragment>,
}

/// Encrypt/decrypt contract over opaque byte payloads keyed per session.
pub trait PacketCodec: Send + Sync {
    /// Encode a task list for delivery to the agent owning `session_key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` if the task list cannot be encoded.
    fn encode(&self, session_key: &str, tasks: &[Task]) -> Result<Vec<u8>>;

    /// Decode an inbound check-in body from the agent owning `session_key`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Codec` if the body does not decode.
    fn decode(&self, session_key: &str, body: &[u8]) -> Result<CheckinEnvelope>;
}

/// Plaintext JSON codec. Stands in where no encrypting codec is injected;
/// the production codec implements the same trait outside this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PacketCodec for JsonCodec {
    fn encode(&self, _session_key: &str, tasks: &[Task]) -> Result<Vec<u8>> {
        serde_json::to_vec(tasks).map_err(|err| AppError::Codec(format!("encode failed: {err}")))
    }

    fn decode(&self, _session_key: &str, body: &[u8]) -> Result<CheckinEnvelope> {
        serde_json::from_slice(body).map_err(|err| AppError::Codec(format!("decode failed: {err}")))
    }
}
