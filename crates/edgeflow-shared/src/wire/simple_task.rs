//! Built-in task codec for plain compute-offload tasks.

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    read_f64, read_i64, read_u64, Direction, MSG_TASK_REQUEST, MSG_TASK_RESPONSE,
};
use crate::error::{EdgeflowError, EdgeflowResult};
use crate::registry::TaskCodec;
use crate::task::{Task, SIMPLE_TASK_TYPE};

/// Fixed header bytes before the accelerator-type string: message type (1) +
/// task ID (8) + compute demand (8) + input size (8) + output size (8) +
/// deadline (8) + accelerator name length (1).
const FIXED_PREFIX: usize = 42;

/// Deadline sentinel for "no deadline".
const NO_DEADLINE: i64 = -1;

/// Codec for the default simple task wire format.
///
/// Header layout (big-endian): `msg_type` u8, `task_id` u64,
/// `compute_demand` f64 bits, `input_size` u64, `output_size` u64,
/// `deadline_ns` i64 (−1 = none), `accel_len` u8, accelerator name bytes.
///
/// Request payload length is the task's input size minus the header length
/// (saturating at zero) so total request bytes approximate the input size;
/// response payload length is the full output size. Payload bytes are
/// padding; the orchestrator never inspects them.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleTaskCodec;

impl SimpleTaskCodec {
    fn header_len(task: &Task) -> usize {
        FIXED_PREFIX + task.required_accelerator.as_deref().map_or(0, str::len)
    }

    fn payload_len(task: &Task, direction: Direction) -> u64 {
        match direction {
            Direction::Request => task
                .input_size
                .saturating_sub(Self::header_len(task) as u64),
            Direction::Response => task.output_size,
        }
    }

    fn encode_header(task: &Task, direction: Direction) -> BytesMut {
        let accel = task.required_accelerator.as_deref().unwrap_or("");
        debug_assert!(accel.len() <= u8::MAX as usize);
        let mut buf = BytesMut::with_capacity(FIXED_PREFIX + accel.len());
        buf.put_u8(direction.message_type());
        buf.put_u64(task.task_id);
        buf.put_u64(task.compute_demand.to_bits());
        buf.put_u64(task.input_size);
        buf.put_u64(task.output_size);
        buf.put_u64(task.deadline_ns.unwrap_or(NO_DEADLINE) as u64);
        buf.put_u8(accel.len() as u8);
        buf.put_slice(accel.as_bytes());
        buf
    }

    fn decode_header(buf: &[u8]) -> EdgeflowResult<Option<(Task, Direction, usize)>> {
        if buf.len() < FIXED_PREFIX {
            return Ok(None);
        }
        let direction = match buf[0] {
            MSG_TASK_REQUEST => Direction::Request,
            MSG_TASK_RESPONSE => Direction::Response,
            other => {
                return Err(EdgeflowError::malformed(format!(
                    "invalid task message type {other}"
                )))
            }
        };
        let accel_len = buf[FIXED_PREFIX - 1] as usize;
        let header_len = FIXED_PREFIX + accel_len;
        if buf.len() < header_len {
            return Ok(None);
        }
        let required_accelerator = if accel_len == 0 {
            None
        } else {
            let name = std::str::from_utf8(&buf[FIXED_PREFIX..header_len]).map_err(|_| {
                EdgeflowError::deserialization("accelerator type is not valid UTF-8")
            })?;
            Some(name.to_string())
        };
        let deadline_ns = read_i64(buf, 33);
        let task = Task {
            task_id: read_u64(buf, 1),
            task_type: SIMPLE_TASK_TYPE,
            compute_demand: read_f64(buf, 9),
            input_size: read_u64(buf, 17),
            output_size: read_u64(buf, 25),
            deadline_ns: (deadline_ns >= 0).then_some(deadline_ns),
            required_accelerator,
        };
        Ok(Some((task, direction, header_len)))
    }
}

impl TaskCodec for SimpleTaskCodec {
    fn encode(&self, task: &Task, direction: Direction) -> Bytes {
        let mut buf = Self::encode_header(task, direction);
        let payload = Self::payload_len(task, direction) as usize;
        buf.resize(buf.len() + payload, 0);
        buf.freeze()
    }

    fn encode_metadata(&self, task: &Task) -> Bytes {
        Self::encode_header(task, Direction::Request).freeze()
    }

    fn decode_full(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>> {
        let Some((task, direction, header_len)) = Self::decode_header(buf)? else {
            return Ok(None);
        };
        let total = header_len + Self::payload_len(&task, direction) as usize;
        if buf.len() < total {
            return Ok(None);
        }
        Ok(Some((task, total)))
    }

    fn decode_metadata(&self, buf: &[u8]) -> EdgeflowResult<Option<(Task, usize)>> {
        Ok(Self::decode_header(buf)?.map(|(task, _, header_len)| (task, header_len)))
    }
}
