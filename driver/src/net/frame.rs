use crate::net::support::{ErrorType, NetworkError};
use byteorder::{BigEndian, ReadBytesExt};
use hashbrown::HashMap;
use std::io;
use std::io::Cursor;

/// Direction byte of a packet headed for the server.
pub const TO_SERVER: u8 = 0x00;
/// Direction byte of a packet headed back to the client.
pub const TO_CLIENT: u8 = 0x01;
/// Version negotiated during the hello exchange.
pub const PROTOCOL_VERSION: u8 = 0x01;
/// Every driver instance currently presents as client 1.
pub const CLIENT_ID: u8 = 0x01;
pub const DEFAULT_SERVER_ID: u8 = 0x01;

/// Header layout: direction, total length (u16), sequence, client id,
/// server id, command, payload length (u16). Multibyte fields big-endian.
pub const HEADER_SIZE: usize = 9;
/// Longest packet the protocol allows in either direction.
pub const MAX_PACKET_SIZE: usize = 416;

/// Command codes, both directions.
pub mod command {
    pub const HELLO: u8 = 0x00;
    pub const HELLO_REPLY: u8 = 0x01;
    pub const GET_SERVER_STATUS: u8 = 0x09;
    pub const TRAJECTORIES: u8 = 0x0A;
    pub const CAPTURE_AND_FOLLOW: u8 = 0x0B;
    pub const SET_AUTO_CAPTURE: u8 = 0x0C;
    pub const CAPTURE_STATE: u8 = 0x0D;
    pub const SET_ARM_RLS: u8 = 0x0E;
    pub const SET_FILTERS: u8 = 0x0F;
    pub const SET_MASKS: u8 = 0x10;
    pub const SET_PTZ: u8 = 0x11;
    pub const SET_PTZ_PRESET: u8 = 0x12;
    pub const SERVER_STATE: u8 = 0x14;
    pub const EXTENDED_STATE: u8 = 0x15;
}

/// The radar variant behind the server, announced in every status packet.
/// Each variant supports a different eradiation frequency table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RlsType {
    Rls24,
    Rls24M,
    RlsX,
}

impl RlsType {
    pub fn from_code(code: u8) -> Option<RlsType> {
        match code {
            0 => Some(RlsType::Rls24),
            1 => Some(RlsType::Rls24M),
            2 => Some(RlsType::RlsX),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            RlsType::Rls24 => "RLS2.4",
            RlsType::Rls24M => "RLS2.4M",
            RlsType::RlsX => "RLSX",
        }
    }

    /// Supported frequency band in MHz: (first, step, last).
    fn frequency_plan(self) -> (f64, f64, f64) {
        match self {
            RlsType::Rls24 => (2325.0, 50.0, 2475.0),
            RlsType::Rls24M => (2312.5, 12.5, 2487.5),
            RlsType::RlsX => (9235.0, 35.0, 9760.0),
        }
    }

    /// Maps a frequency code onto the variant's table; codes beyond the
    /// band yield `None`.
    pub fn frequency(self, code: u8) -> Option<f64> {
        let (first, step, last) = self.frequency_plan();
        let frequency = first + step * f64::from(code);

        if frequency > last {
            None
        } else {
            Some(frequency)
        }
    }
}

/// One tracked target from a trajectory display packet (13 bytes on the
/// wire).
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    pub track_id: u16,
    /// Capture marker as reported by the server.
    pub status: u8,
    /// Effective scattering surface, m².
    pub rcs_square: f64,
    /// Distance to the target.
    pub range: u16,
    /// Degrees off boresight, positive clockwise, 0.1° resolution.
    pub azimuth: f64,
    pub radial_speed: i16,
    pub tangential_speed: i16,
    pub sector: u8,
}

impl Trajectory {
    pub const SIZE: usize = 13;

    fn read(cursor: &mut Cursor<&[u8]>) -> Result<Trajectory, NetworkError> {
        let track_id = cursor.read_u16::<BigEndian>()?;
        let status = cursor.read_u8()?;
        let integer_part = cursor.read_u8()?;
        let fraction_part = cursor.read_u8()?;
        let range = cursor.read_u16::<BigEndian>()?;
        // The wire carries the doubled angle at half-degree resolution.
        let azimuth = f64::from(cursor.read_i8()?) / 2.0;
        let radial_speed = cursor.read_i16::<BigEndian>()?;
        let tangential_speed = cursor.read_i16::<BigEndian>()?;
        let sector = cursor.read_u8()?;

        Ok(Trajectory {
            track_id,
            status,
            rcs_square: decimal_pair(integer_part, fraction_part),
            range,
            azimuth: round_tenth(azimuth),
            radial_speed,
            tangential_speed,
            sector,
        })
    }

    /// Parses a trajectory display packet: a record count at offset 9
    /// followed by the records, keyed `track<id>` in the result.
    pub fn read_packet(packet: &[u8]) -> Result<HashMap<String, Trajectory>, NetworkError> {
        let mut cursor = Cursor::new(packet);
        cursor.set_position(HEADER_SIZE as u64);

        let count = cursor.read_u8()?;
        let mut trajectories = HashMap::with_capacity(usize::from(count));

        for _ in 0..count {
            let track = Trajectory::read(&mut cursor)?;
            trajectories.insert(format!("track{}", track.track_id), track);
        }

        Ok(trajectories)
    }
}

/// Capture status of a single track (command 0x0D).
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CaptureState {
    pub track_id: u16,
    pub capture: u8,
}

impl CaptureState {
    pub fn read_packet(packet: &[u8]) -> CaptureState {
        CaptureState {
            track_id: word_at(packet, 9),
            capture: byte_at(packet, 11),
        }
    }
}

/// Server status (command 0x14). The connection fields report faults, so
/// `false` means the link is healthy.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerState {
    pub cort_fault: bool,
    pub rls_fault: bool,
    pub ptz_fault: bool,
    pub active_interference: bool,
    /// Transmitter eradiation on/off.
    pub eradiation_rls: bool,
    pub filters: bool,
    pub masks: bool,
    /// Turret pan, in turret steps.
    pub pan_ptz: u16,
    /// Turret tilt, in turret steps.
    pub tilt_ptz: u16,
    pub control_intercepted_ptz: bool,
    pub trajectory_captured: bool,
    pub auto_capture: bool,
    pub rls_type: Option<RlsType>,
    /// Eradiation frequency in MHz, derived from the variant table.
    pub eradiation_frequency: Option<f64>,
}

impl ServerState {
    /// Status packets are mapped by fixed offset. A short frame reads the
    /// missing tail as zeroes, so a truncated reply still yields a state.
    pub fn read_packet(packet: &[u8]) -> ServerState {
        let rls_type = RlsType::from_code(byte_at(packet, 24));

        ServerState {
            cort_fault: byte_at(packet, 9) != 0,
            rls_fault: byte_at(packet, 10) != 0,
            ptz_fault: byte_at(packet, 11) != 0,
            active_interference: byte_at(packet, 13) != 0,
            eradiation_rls: byte_at(packet, 14) != 0,
            filters: byte_at(packet, 15) != 0,
            masks: byte_at(packet, 16) != 0,
            pan_ptz: word_at(packet, 17),
            tilt_ptz: word_at(packet, 19),
            control_intercepted_ptz: byte_at(packet, 21) != 0,
            trajectory_captured: byte_at(packet, 22) != 0,
            auto_capture: byte_at(packet, 23) != 0,
            rls_type,
            eradiation_frequency: rls_type.and_then(|rls| rls.frequency(byte_at(packet, 12))),
        }
    }
}

/// Extended server status (command 0x15). Decoded for the logs; the
/// events interface carries no call for it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ExtendedState {
    pub transmitter_state: u8,
    pub digital_receiver_state: u8,
    pub analog_receiver_state: u8,
    pub client_count: u8,
    pub passive_interference_zones: [u8; 4],
    pub receiver_sensitivity: u8,
    pub tx_count: u8,
    pub rx_count: u8,
    pub error_count: u8,
}

impl ExtendedState {
    pub fn read_packet(packet: &[u8]) -> ExtendedState {
        ExtendedState {
            transmitter_state: byte_at(packet, 9),
            digital_receiver_state: byte_at(packet, 10),
            analog_receiver_state: byte_at(packet, 11),
            client_count: byte_at(packet, 12),
            passive_interference_zones: [
                byte_at(packet, 13),
                byte_at(packet, 14),
                byte_at(packet, 15),
                byte_at(packet, 16),
            ],
            receiver_sensitivity: byte_at(packet, 17),
            tx_count: byte_at(packet, 18),
            rx_count: byte_at(packet, 19),
            error_count: byte_at(packet, 20),
        }
    }
}

/// A decoded inbound packet.
#[derive(Debug)]
pub enum Event {
    HelloReply { version: u8 },
    Trajectories(HashMap<String, Trajectory>),
    CaptureState(CaptureState),
    ServerState(ServerState),
    ExtendedState(ExtendedState),
}

impl Event {
    /// Decodes one whole packet by its command byte.
    pub fn read(packet: &[u8]) -> Result<Event, NetworkError> {
        let command = packet
            .get(6)
            .copied()
            .ok_or(NetworkError::Fatal(ErrorType::Io(io::ErrorKind::UnexpectedEof)))?;

        match command {
            command::HELLO_REPLY => {
                let version = byte_at(packet, 9);

                // A zero version byte means the server speaks a protocol
                // this driver does not.
                if version == 0 {
                    return Err(NetworkError::Fatal(ErrorType::ProtocolMismatch));
                }

                Ok(Event::HelloReply { version })
            }
            command::TRAJECTORIES => Ok(Event::Trajectories(Trajectory::read_packet(packet)?)),
            command::CAPTURE_STATE => Ok(Event::CaptureState(CaptureState::read_packet(packet))),
            command::SERVER_STATE => Ok(Event::ServerState(ServerState::read_packet(packet))),
            command::EXTENDED_STATE => Ok(Event::ExtendedState(ExtendedState::read_packet(packet))),
            code => Err(NetworkError::Fatal(ErrorType::UnknownCommand(code))),
        }
    }
}

#[inline]
fn byte_at(packet: &[u8], index: usize) -> u8 {
    packet.get(index).copied().unwrap_or(0)
}

#[inline]
fn word_at(packet: &[u8], index: usize) -> u16 {
    (u16::from(byte_at(packet, index)) << 8) | u16::from(byte_at(packet, index + 1))
}

/// The wire splits decimals into their integer and fraction digits, so
/// (3, 14) means 3.14 while (3, 5) means 3.5.
fn decimal_pair(integer_part: u8, fraction_part: u8) -> f64 {
    let scale = match fraction_part {
        0..=9 => 10.0,
        10..=99 => 100.0,
        _ => 1000.0,
    };

    f64::from(integer_part) + f64::from(fraction_part) / scale
}

#[inline]
fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trajectory_packet(records: &[[u8; Trajectory::SIZE]]) -> Vec<u8> {
        let total = HEADER_SIZE + 1 + records.len() * Trajectory::SIZE;
        let mut packet = vec![
            TO_CLIENT,
            (total >> 8) as u8,
            (total & 0xFF) as u8,
            0x01,
            CLIENT_ID,
            DEFAULT_SERVER_ID,
            command::TRAJECTORIES,
            0x00,
            (total - HEADER_SIZE) as u8,
            records.len() as u8,
        ];

        for record in records {
            packet.extend_from_slice(record);
        }

        packet
    }

    fn record(track_id: u16, azimuth_byte: u8) -> [u8; Trajectory::SIZE] {
        [
            (track_id >> 8) as u8,
            (track_id & 0xFF) as u8,
            0x01,       // status
            3,          // rcs integer part
            14,         // rcs fraction part
            0x02, 0x58, // range 600
            azimuth_byte,
            0xFF, 0xFE, // radial speed -2
            0x00, 0x7B, // tangential speed 123
            0x04,       // sector
        ]
    }

    #[test]
    fn test_negative_azimuth_decodes_and_halves() {
        let packet = trajectory_packet(&[record(1, 0xA6)]);

        let trajectories = Trajectory::read_packet(&packet).unwrap();
        let track = &trajectories["track1"];

        assert_eq!(track.azimuth, -45.0);
    }

    #[test]
    fn test_positive_azimuth_decodes_and_halves() {
        let packet = trajectory_packet(&[record(1, 0x5A)]);

        let trajectories = Trajectory::read_packet(&packet).unwrap();

        assert_eq!(trajectories["track1"].azimuth, 45.0);
    }

    #[test]
    fn test_odd_azimuth_rounds_to_tenth() {
        // -87 on the wire is -43.5 degrees.
        let packet = trajectory_packet(&[record(1, 0xA9)]);

        let trajectories = Trajectory::read_packet(&packet).unwrap();

        assert_eq!(trajectories["track1"].azimuth, -43.5);
    }

    #[test]
    fn test_trajectory_fields() {
        let packet = trajectory_packet(&[record(0x1234, 0x00)]);

        let trajectories = Trajectory::read_packet(&packet).unwrap();
        let track = &trajectories["track4660"];

        assert_eq!(track.track_id, 0x1234);
        assert_eq!(track.status, 1);
        assert!((track.rcs_square - 3.14).abs() < 1e-9);
        assert_eq!(track.range, 600);
        assert_eq!(track.radial_speed, -2);
        assert_eq!(track.tangential_speed, 123);
        assert_eq!(track.sector, 4);
    }

    #[test]
    fn test_multiple_trajectories_keyed_by_track_id() {
        let packet = trajectory_packet(&[record(1, 0x00), record(2, 0x00), record(700, 0x00)]);

        let trajectories = Trajectory::read_packet(&packet).unwrap();

        assert_eq!(trajectories.len(), 3);
        assert!(trajectories.contains_key("track1"));
        assert!(trajectories.contains_key("track2"));
        assert!(trajectories.contains_key("track700"));
    }

    #[test]
    fn test_truncated_trajectory_packet_fails() {
        let mut packet = trajectory_packet(&[record(1, 0x00)]);
        packet.truncate(packet.len() - 4);

        let result = Trajectory::read_packet(&packet);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::Io(io::ErrorKind::UnexpectedEof))
        );
    }

    #[test]
    fn test_decimal_pair_digit_counts() {
        assert!((decimal_pair(3, 14) - 3.14).abs() < 1e-9);
        assert!((decimal_pair(3, 5) - 3.5).abs() < 1e-9);
        assert!((decimal_pair(0, 123) - 0.123).abs() < 1e-9);
        assert_eq!(decimal_pair(7, 0), 7.0);
    }

    #[test]
    fn test_rls_type_codes() {
        assert_eq!(RlsType::from_code(0), Some(RlsType::Rls24));
        assert_eq!(RlsType::from_code(1), Some(RlsType::Rls24M));
        assert_eq!(RlsType::from_code(2), Some(RlsType::RlsX));
        assert_eq!(RlsType::from_code(3), None);
    }

    #[test]
    fn test_rls24m_frequency_band() {
        assert_eq!(RlsType::Rls24M.frequency(0), Some(2312.5));
        assert_eq!(RlsType::Rls24M.frequency(14), Some(2487.5));
        assert_eq!(RlsType::Rls24M.frequency(15), None);
    }

    #[test]
    fn test_frequency_table_sizes() {
        let size = |rls: RlsType| (0u8..=255).filter(|&code| rls.frequency(code).is_some()).count();

        assert_eq!(size(RlsType::Rls24), 4);
        assert_eq!(size(RlsType::Rls24M), 15);
        assert_eq!(size(RlsType::RlsX), 16);
    }

    #[test]
    fn test_rlsx_frequency_band() {
        assert_eq!(RlsType::RlsX.frequency(0), Some(9235.0));
        assert_eq!(RlsType::RlsX.frequency(15), Some(9760.0));
        assert_eq!(RlsType::RlsX.frequency(16), None);
    }

    fn server_state_packet() -> Vec<u8> {
        let mut packet = vec![0u8; 25];
        packet[0] = TO_CLIENT;
        packet[2] = 25;
        packet[6] = command::SERVER_STATE;
        packet[8] = 16;
        packet[9] = 1;   // CORT fault
        packet[10] = 0;  // RLS healthy
        packet[11] = 1;  // PTZ fault
        packet[12] = 3;  // frequency code
        packet[13] = 1;  // active interference
        packet[14] = 1;  // eradiation on
        packet[15] = 0;  // filters off
        packet[16] = 1;  // masks on
        packet[17] = 0x01;
        packet[18] = 0x2C; // pan 300
        packet[19] = 0x00;
        packet[20] = 0x64; // tilt 100
        packet[21] = 0;
        packet[22] = 1;
        packet[23] = 0;
        packet[24] = 1; // RLS2.4M
        packet
    }

    #[test]
    fn test_server_state_fields() {
        let state = ServerState::read_packet(&server_state_packet());

        assert!(state.cort_fault);
        assert!(!state.rls_fault);
        assert!(state.ptz_fault);
        assert!(state.active_interference);
        assert!(state.eradiation_rls);
        assert!(!state.filters);
        assert!(state.masks);
        assert_eq!(state.pan_ptz, 300);
        assert_eq!(state.tilt_ptz, 100);
        assert!(!state.control_intercepted_ptz);
        assert!(state.trajectory_captured);
        assert!(!state.auto_capture);
        assert_eq!(state.rls_type, Some(RlsType::Rls24M));
        assert_eq!(state.eradiation_frequency, Some(2350.0));
    }

    #[test]
    fn test_server_state_unknown_rls_type_clears_frequency() {
        let mut packet = server_state_packet();
        packet[24] = 9;

        let state = ServerState::read_packet(&packet);

        assert_eq!(state.rls_type, None);
        assert_eq!(state.eradiation_frequency, None);
    }

    #[test]
    fn test_short_server_state_reads_zeroes() {
        // A bare 10-byte reply still maps to a state instead of an error.
        let packet = [TO_CLIENT, 0, 10, 1, 1, 1, command::SERVER_STATE, 0, 1, 0];

        let state = ServerState::read_packet(&packet);

        assert_eq!(state.pan_ptz, 0);
        assert_eq!(state.rls_type, Some(RlsType::Rls24));
        assert_eq!(state.eradiation_frequency, Some(2325.0));
    }

    #[test]
    fn test_capture_state_fields() {
        let packet = [
            TO_CLIENT, 0, 12, 1, 1, 1, command::CAPTURE_STATE, 0, 3, 0x12, 0x34, 0x01,
        ];

        let state = CaptureState::read_packet(&packet);

        assert_eq!(state.track_id, 0x1234);
        assert_eq!(state.capture, 1);
    }

    #[test]
    fn test_extended_state_fields() {
        let packet = [
            TO_CLIENT, 0, 21, 1, 1, 1, command::EXTENDED_STATE, 0, 12,
            1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12,
        ];

        let state = ExtendedState::read_packet(&packet);

        assert_eq!(state.transmitter_state, 1);
        assert_eq!(state.digital_receiver_state, 2);
        assert_eq!(state.analog_receiver_state, 3);
        assert_eq!(state.client_count, 4);
        assert_eq!(state.passive_interference_zones, [5, 6, 7, 8]);
        assert_eq!(state.receiver_sensitivity, 9);
        assert_eq!(state.tx_count, 10);
        assert_eq!(state.rx_count, 11);
        assert_eq!(state.error_count, 12);
    }

    #[test]
    fn test_event_read_unknown_command() {
        let packet = [TO_CLIENT, 0, 10, 1, 1, 1, 0x42, 0, 1, 0];

        let result = Event::read(&packet);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::UnknownCommand(0x42))
        );
    }

    #[test]
    fn test_event_read_rejects_headerless_scrap() {
        let result = Event::read(&[TO_CLIENT, 0, 3]);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::Io(io::ErrorKind::UnexpectedEof))
        );
    }

    #[test]
    fn test_event_read_hello_reply() {
        let packet = [TO_CLIENT, 0, 10, 1, 1, 1, command::HELLO_REPLY, 0, 1, 2];

        match Event::read(&packet).unwrap() {
            Event::HelloReply { version } => assert_eq!(version, 2),
            event => panic!("Unexpected event {:?}", event),
        }
    }

    #[test]
    fn test_event_read_hello_reply_version_zero_is_incompatible() {
        let packet = [TO_CLIENT, 0, 10, 1, 1, 1, command::HELLO_REPLY, 0, 1, 0];

        let result = Event::read(&packet);

        assert_eq!(
            result.unwrap_err(),
            NetworkError::Fatal(ErrorType::ProtocolMismatch)
        );
    }
}
