//! Admission-phase header framing client control messages.

use bytes::{BufMut, Bytes, BytesMut};

use super::{read_u64, read_u8, MSG_ADMISSION_REQUEST, MSG_ADMISSION_RESPONSE};
use crate::error::{EdgeflowError, EdgeflowResult};

/// Message types carried by [`OrchHeader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchMessageType {
    /// Phase-1 admission request (client to orchestrator)
    AdmissionRequest,
    /// Phase-1 admission response (orchestrator to client)
    AdmissionResponse,
}

impl OrchMessageType {
    fn as_byte(self) -> u8 {
        match self {
            OrchMessageType::AdmissionRequest => MSG_ADMISSION_REQUEST,
            OrchMessageType::AdmissionResponse => MSG_ADMISSION_RESPONSE,
        }
    }

    fn from_byte(byte: u8) -> EdgeflowResult<Self> {
        match byte {
            MSG_ADMISSION_REQUEST => Ok(OrchMessageType::AdmissionRequest),
            MSG_ADMISSION_RESPONSE => Ok(OrchMessageType::AdmissionResponse),
            other => Err(EdgeflowError::malformed(format!(
                "invalid orchestrator message type {other}"
            ))),
        }
    }
}

/// Fixed-size header for the two-phase admission protocol.
///
/// `task_id` carries the client-chosen DAG ID. `payload_size` frames the DAG
/// metadata bytes that follow an admission request; responses carry zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchHeader {
    pub message_type: OrchMessageType,
    pub task_id: u64,
    pub admitted: bool,
    pub payload_size: u64,
}

impl OrchHeader {
    /// Serialized size in bytes: type (1) + task ID (8) + admitted (1) +
    /// payload size (8).
    pub const SERIALIZED_SIZE: usize = 18;

    /// Build a Phase-1 admission request framing `payload_size` metadata bytes.
    pub fn admission_request(dag_id: u64, payload_size: u64) -> Self {
        Self {
            message_type: OrchMessageType::AdmissionRequest,
            task_id: dag_id,
            admitted: false,
            payload_size,
        }
    }

    /// Build a Phase-1 admission response.
    pub fn admission_response(dag_id: u64, admitted: bool) -> Self {
        Self {
            message_type: OrchMessageType::AdmissionResponse,
            task_id: dag_id,
            admitted,
            payload_size: 0,
        }
    }

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SERIALIZED_SIZE);
        buf.put_u8(self.message_type.as_byte());
        buf.put_u64(self.task_id);
        buf.put_u8(u8::from(self.admitted));
        buf.put_u64(self.payload_size);
        buf.freeze()
    }

    /// Decode from the front of `buf`.
    ///
    /// Returns `Ok(None)` when fewer than [`Self::SERIALIZED_SIZE`] bytes are
    /// available. Never consumes from the buffer.
    pub fn decode(buf: &[u8]) -> EdgeflowResult<Option<Self>> {
        if buf.len() < Self::SERIALIZED_SIZE {
            return Ok(None);
        }
        let message_type = OrchMessageType::from_byte(read_u8(buf, 0))?;
        Ok(Some(Self {
            message_type,
            task_id: read_u64(buf, 1),
            admitted: read_u8(buf, 9) != 0,
            payload_size: read_u64(buf, 10),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_request() {
        let header = OrchHeader::admission_request(99, 1234);
        let bytes = header.encode();
        assert_eq!(bytes.len(), OrchHeader::SERIALIZED_SIZE);
        let decoded = OrchHeader::decode(&bytes).unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_roundtrip_response() {
        let header = OrchHeader::admission_response(7, true);
        let decoded = OrchHeader::decode(&header.encode()).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(decoded.admitted);
        assert_eq!(decoded.payload_size, 0);
    }

    #[test]
    fn test_decode_short_buffer() {
        let header = OrchHeader::admission_request(1, 0);
        let bytes = header.encode();
        for cut in 0..bytes.len() {
            assert!(OrchHeader::decode(&bytes[..cut]).unwrap().is_none());
        }
    }

    #[test]
    fn test_decode_bad_type() {
        let mut bytes = OrchHeader::admission_request(1, 0).encode().to_vec();
        bytes[0] = 9;
        assert!(OrchHeader::decode(&bytes).is_err());
    }
}
