//! DVFS control-loop framing: device metrics reported by backends and
//! scaling commands sent back to them.

use bytes::{BufMut, Bytes, BytesMut};

use super::{
    expect_message_type, read_f64, read_u32, MSG_DEVICE_METRICS, MSG_SCALING_COMMAND,
};
use crate::error::EdgeflowResult;

/// Periodic accelerator metrics pushed by a backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMetricsHeader {
    /// Current operating frequency in Hz
    pub frequency: f64,
    /// Current core voltage in Volts
    pub voltage: f64,
    /// Whether the accelerator is currently processing a task
    pub busy: bool,
    /// Tasks in the device queue, including the running one
    pub queue_len: u32,
    /// Current power draw in Watts
    pub current_power: f64,
}

impl DeviceMetricsHeader {
    /// Serialized size: type (1) + frequency (8) + voltage (8) + busy (1) +
    /// queue length (4) + power (8).
    pub const SERIALIZED_SIZE: usize = 30;

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SERIALIZED_SIZE);
        buf.put_u8(MSG_DEVICE_METRICS);
        buf.put_u64(self.frequency.to_bits());
        buf.put_u64(self.voltage.to_bits());
        buf.put_u8(u8::from(self.busy));
        buf.put_u32(self.queue_len);
        buf.put_u64(self.current_power.to_bits());
        buf.freeze()
    }

    /// Decode from the front of `buf`; `Ok(None)` when incomplete.
    pub fn decode(buf: &[u8]) -> EdgeflowResult<Option<Self>> {
        if buf.len() < Self::SERIALIZED_SIZE {
            return Ok(None);
        }
        expect_message_type(buf, MSG_DEVICE_METRICS)?;
        Ok(Some(Self {
            frequency: read_f64(buf, 1),
            voltage: read_f64(buf, 9),
            busy: buf[17] != 0,
            queue_len: read_u32(buf, 18),
            current_power: read_f64(buf, 22),
        }))
    }
}

/// DVFS setpoint pushed to a backend by the device manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingCommandHeader {
    /// Target operating frequency in Hz
    pub target_frequency: f64,
    /// Target core voltage in Volts
    pub target_voltage: f64,
}

impl ScalingCommandHeader {
    /// Serialized size: type (1) + frequency (8) + voltage (8).
    pub const SERIALIZED_SIZE: usize = 17;

    /// Encode to wire bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(Self::SERIALIZED_SIZE);
        buf.put_u8(MSG_SCALING_COMMAND);
        buf.put_u64(self.target_frequency.to_bits());
        buf.put_u64(self.target_voltage.to_bits());
        buf.freeze()
    }

    /// Decode from the front of `buf`; `Ok(None)` when incomplete.
    pub fn decode(buf: &[u8]) -> EdgeflowResult<Option<Self>> {
        if buf.len() < Self::SERIALIZED_SIZE {
            return Ok(None);
        }
        expect_message_type(buf, MSG_SCALING_COMMAND)?;
        Ok(Some(Self {
            target_frequency: read_f64(buf, 1),
            target_voltage: read_f64(buf, 9),
        }))
    }
}
