// RoboWired - Robot MCU Co-Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

//! Wire formats exchanged with the physics simulator.
//!
//! Both directions use fixed-size little-endian packets over the seqpacket
//! link; one packet is one message. The inbound packet carries the link
//! state and the sensor sweep, the outbound packet the actuator state.

/// Fixed inbound packet size. Anything shorter is a degenerate/keep-alive
/// message whose payload fields are meaningless.
pub const INBOUND_WIRE_SIZE: usize = 88;

/// Fixed outbound packet size.
pub const OUTBOUND_WIRE_SIZE: usize = 40;

/// Link state carried in every inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GuestState {
    Shutdown,
    Running,
    #[default]
    Waiting,
}

impl GuestState {
    pub fn from_wire(v: u32) -> Self {
        match v {
            0 => GuestState::Shutdown,
            1 => GuestState::Running,
            2 => GuestState::Waiting,
            other => {
                tracing::warn!("inbound message with unknown state {}, treating as waiting", other);
                GuestState::Waiting
            }
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            GuestState::Shutdown => 0,
            GuestState::Running => 1,
            GuestState::Waiting => 2,
        }
    }
}

/// Simulator -> board: sensor sweep plus link state.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct InboundMessage {
    pub state: GuestState,
    pub more_lines: bool,
    pub one_line: bool,
    /// Front distance-sensor readings, millimeters.
    pub front: [f64; 4],
    /// Mid distance-sensor readings, millimeters.
    pub mid: [f64; 4],
    /// Auxiliary distance sensor, millimeters.
    pub aux_distance: f64,
    /// Signed rotary-encoder delta since the previous message.
    pub encoder: i64,
}

impl InboundMessage {
    pub fn encode(&self) -> [u8; INBOUND_WIRE_SIZE] {
        let mut buf = [0u8; INBOUND_WIRE_SIZE];
        buf[0..4].copy_from_slice(&self.state.to_wire().to_le_bytes());
        buf[4] = self.more_lines as u8;
        buf[5] = self.one_line as u8;
        // bytes 6..8 are padding
        for (i, v) in self.front.iter().enumerate() {
            buf[8 + i * 8..16 + i * 8].copy_from_slice(&v.to_le_bytes());
        }
        for (i, v) in self.mid.iter().enumerate() {
            buf[40 + i * 8..48 + i * 8].copy_from_slice(&v.to_le_bytes());
        }
        buf[72..80].copy_from_slice(&self.aux_distance.to_le_bytes());
        buf[80..88].copy_from_slice(&self.encoder.to_le_bytes());
        buf
    }

    /// Decode a full-size packet; shorter slices yield `None` and the caller
    /// treats the message as degenerate.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < INBOUND_WIRE_SIZE {
            return None;
        }
        let mut front = [0f64; 4];
        let mut mid = [0f64; 4];
        for i in 0..4 {
            front[i] = read_f64(buf, 8 + i * 8);
            mid[i] = read_f64(buf, 40 + i * 8);
        }
        Some(Self {
            state: GuestState::from_wire(read_u32(buf, 0)),
            more_lines: buf[4] != 0,
            one_line: buf[5] != 0,
            front,
            mid,
            aux_distance: read_f64(buf, 72),
            encoder: read_u64(buf, 80) as i64,
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(b)
}

fn read_u64(buf: &[u8], off: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&buf[off..off + 8]);
    u64::from_le_bytes(b)
}

fn read_f64(buf: &[u8], off: usize) -> f64 {
    f64::from_bits(read_u64(buf, off))
}

/// Board -> simulator: actuator state sampled at a bus-stop condition.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OutboundMessage {
    pub virtual_time_ns: u64,
    pub motor_power: f64,
    pub fwd_steering_wheel_angle: f64,
    pub rev_steering_wheel_angle: f64,
    pub distance_rotation_angle: f64,
}

impl OutboundMessage {
    pub fn encode(&self) -> [u8; OUTBOUND_WIRE_SIZE] {
        let mut buf = [0u8; OUTBOUND_WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.virtual_time_ns.to_le_bytes());
        buf[8..16].copy_from_slice(&self.motor_power.to_le_bytes());
        buf[16..24].copy_from_slice(&self.fwd_steering_wheel_angle.to_le_bytes());
        buf[24..32].copy_from_slice(&self.rev_steering_wheel_angle.to_le_bytes());
        buf[32..40].copy_from_slice(&self.distance_rotation_angle.to_le_bytes());
        buf
    }

    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < OUTBOUND_WIRE_SIZE {
            return None;
        }
        Some(Self {
            virtual_time_ns: read_u64(buf, 0),
            motor_power: read_f64(buf, 8),
            fwd_steering_wheel_angle: read_f64(buf, 16),
            rev_steering_wheel_angle: read_f64(buf, 24),
            distance_rotation_angle: read_f64(buf, 32),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_round_trip() {
        let msg = InboundMessage {
            state: GuestState::Running,
            more_lines: true,
            one_line: false,
            front: [1.5, 2.25, -3.0, 400.125],
            mid: [0.0, 10.0, 20.5, 30.75],
            aux_distance: 123.456,
            encoder: -7,
        };
        let wire = msg.encode();
        assert_eq!(wire.len(), INBOUND_WIRE_SIZE);
        assert_eq!(InboundMessage::decode(&wire), Some(msg));
    }

    #[test]
    fn test_short_inbound_is_degenerate() {
        assert_eq!(InboundMessage::decode(&[0u8; 4]), None);
    }

    #[test]
    fn test_unknown_state_becomes_waiting() {
        let mut wire = InboundMessage::default().encode();
        wire[0] = 9;
        assert_eq!(
            InboundMessage::decode(&wire).map(|m| m.state),
            Some(GuestState::Waiting)
        );
    }

    #[test]
    fn test_outbound_round_trip() {
        let msg = OutboundMessage {
            virtual_time_ns: 123_456_789,
            motor_power: 0.75,
            fwd_steering_wheel_angle: -12.5,
            rev_steering_wheel_angle: 3.25,
            distance_rotation_angle: 32.5,
        };
        let wire = msg.encode();
        assert_eq!(wire.len(), OUTBOUND_WIRE_SIZE);
        assert_eq!(OutboundMessage::decode(&wire), Some(msg));
    }
}
