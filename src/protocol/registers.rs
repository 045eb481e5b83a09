use std::fmt::Debug;

use packed_struct::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};
use thiserror::Error;

use super::codec::{DataFrame, TxFrame};


/// Define a closed set of byte values the indoor unit uses for a register.
macro_rules! register_values {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumString)]
        #[strum(serialize_all = "kebab-case")]
        #[repr(u8)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value),+
        }

        impl TryFrom<u8> for $name {
            type Error = u8;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $(v if v == $name::$variant as u8 => Ok($name::$variant),)+
                    other => Err(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value as u8
            }
        }
    }
}

register_values! {
    /// Command byte addressing one register of the indoor unit
    Register {
        PowerState = 0x80,
        PowerSelection = 0x87,
        FanMode = 0xa0,
        SwingMode = 0xa3,
        Mode = 0xb0,
        TargetTemperature = 0xb3,
        RoomTemperature = 0xbb,
        OutdoorTemperature = 0xbe,
        Ionizer = 0xc7,
        IndoorStatus = 0xe4,
        OutdoorStatus = 0xe5,
        SpecialMode = 0xf7,
    }
}

register_values! {
    PowerState {
        On = 0x30,
        Off = 0x31,
    }
}

register_values! {
    /// Operating mode as the indoor unit knows it. Off is a power state, not a mode.
    Mode {
        HeatCool = 0x41,
        Cool = 0x42,
        Heat = 0x43,
        Dry = 0x44,
        FanOnly = 0x45,
    }
}

register_values! {
    FanMode {
        Quiet = 0x31,
        Low = 0x32,
        LowMedium = 0x33,
        Medium = 0x34,
        MediumHigh = 0x35,
        High = 0x36,
        Auto = 0x41,
    }
}

impl FanMode {
    /// Speeds between the standard low/medium/high steps.
    pub fn is_composite(self) -> bool {
        matches!(self, FanMode::LowMedium | FanMode::MediumHigh)
    }
}

register_values! {
    /// Louver setting, including the fixed positions only reachable from the unit's own remote.
    SwingMode {
        Off = 0x31,
        Vertical = 0x41,
        Horizontal = 0x42,
        Both = 0x43,
        Fixed1 = 0x50,
        Fixed2 = 0x51,
        Fixed3 = 0x52,
        Fixed4 = 0x53,
        Fixed5 = 0x54,
    }
}

register_values! {
    SpecialMode {
        #[strum(to_string = "Standard", serialize = "standard")]
        Standard = 0x00,
        #[strum(to_string = "High Power", serialize = "high-power")]
        HighPower = 0x01,
        #[strum(to_string = "Silent 1", serialize = "silent-1")]
        Silent1 = 0x02,
        #[strum(to_string = "Eco", serialize = "eco")]
        Eco = 0x03,
        /// Frost protection, targets 5-13°C offset by 16 on the wire
        #[strum(to_string = "8 Degrees", serialize = "eight-degrees")]
        EightDegrees = 0x04,
        #[strum(to_string = "Sleep Care", serialize = "sleep-care")]
        SleepCare = 0x05,
        #[strum(to_string = "Floor", serialize = "floor")]
        Floor = 0x06,
        #[strum(to_string = "Comfort", serialize = "comfort")]
        Comfort = 0x07,
        #[strum(to_string = "Silent 2", serialize = "silent-2")]
        Silent2 = 0x0a,
        #[strum(to_string = "Fireplace 1", serialize = "fireplace-1")]
        Fireplace1 = 0x20,
        #[strum(to_string = "Fireplace 2", serialize = "fireplace-2")]
        Fireplace2 = 0x30,
    }
}

register_values! {
    /// Power consumption limit
    PowerSelection {
        #[strum(to_string = "50%", serialize = "50")]
        Percent50 = 0x32,
        #[strum(to_string = "75%", serialize = "75")]
        Percent75 = 0x4b,
        #[strum(to_string = "100%", serialize = "100")]
        Percent100 = 0x64,
    }
}

register_values! {
    Ionizer {
        On = 0x18,
        Off = 0x10,
    }
}


/// Wire offset of targets in the eight-degrees range.
pub const EIGHT_DEGREES_OFFSET: u8 = 16;

/// Lowest target reachable without the eight-degrees special mode.
pub const STANDARD_MIN_TARGET: u8 = 17;

/// Resolve a raw target temperature against the special mode it was reported in.
pub fn decode_target_temperature(raw: u8, special_mode: SpecialMode) -> u8 {
    match special_mode {
        SpecialMode::EightDegrees => raw.saturating_sub(EIGHT_DEGREES_OFFSET),
        _ => raw,
    }
}

/// Wire value for a target temperature, offsetting those below the standard range.
pub fn encode_target_temperature(target: u8) -> u8 {
    if target < STANDARD_MIN_TARGET {
        target + EIGHT_DEGREES_OFFSET
    } else {
        target
    }
}


/// Where a register report came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Changed outside the bridge, e.g. from the infrared remote
    External,
    /// Reply to a request of ours
    Internal,
}

/// A decoded single register report.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RegisterUpdate {
    PowerState(PowerState),
    Mode(Mode),
    /// Raw value, see [`decode_target_temperature`]
    TargetTemperature(u8),
    FanMode(FanMode),
    SwingMode(SwingMode),
    SpecialMode(SpecialMode),
    Ionizer(Ionizer),
    PowerSelection(PowerSelection),
    RoomTemperature(i8),
    OutdoorTemperature(i8),
}

impl RegisterUpdate {
    pub fn decode(register: Register, value: u8) -> Result<Self, DecodeError> {
        let unknown = |value| DecodeError::UnknownValue { register, value };

        let update = match register {
            Register::PowerState => RegisterUpdate::PowerState(value.try_into().map_err(unknown)?),
            Register::Mode => RegisterUpdate::Mode(value.try_into().map_err(unknown)?),
            Register::TargetTemperature => RegisterUpdate::TargetTemperature(value),
            Register::FanMode => RegisterUpdate::FanMode(value.try_into().map_err(unknown)?),
            Register::SwingMode => RegisterUpdate::SwingMode(value.try_into().map_err(unknown)?),
            Register::SpecialMode => RegisterUpdate::SpecialMode(value.try_into().map_err(unknown)?),
            Register::Ionizer => RegisterUpdate::Ionizer(value.try_into().map_err(unknown)?),
            Register::PowerSelection => RegisterUpdate::PowerSelection(value.try_into().map_err(unknown)?),
            Register::RoomTemperature => RegisterUpdate::RoomTemperature(value as i8),
            Register::OutdoorTemperature => RegisterUpdate::OutdoorTemperature(value as i8),
            Register::IndoorStatus | Register::OutdoorStatus => return Err(DecodeError::UnknownRegister(register.into())),
        };

        Ok(update)
    }
}


/// Outdoor unit status block
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering="msb0")]
pub struct OutdoorUnitStatus {
    /// Compressor discharge temperature
    #[packed_field(bytes="0")]
    pub td: u8,

    /// Suction temperature
    #[packed_field(bytes="1")]
    pub ts: u8,

    /// Heat exchanger temperature
    #[packed_field(bytes="2")]
    pub te: u8,

    /// Ranges 0-170 depending on the outdoor unit.
    #[packed_field(bytes="3")]
    pub raw_load: u8,

    #[packed_field(bytes="4..=5")]
    pub unknown: [u8; 2],

    /// Ranges 0-68, meaning unknown.
    #[packed_field(bytes="6")]
    pub aux: u8,
}

impl OutdoorUnitStatus {
    pub fn td(&self) -> i8 {
        self.td as i8
    }

    pub fn ts(&self) -> i8 {
        self.ts as i8
    }

    pub fn te(&self) -> i8 {
        self.te as i8
    }

    pub fn load(&self) -> f32 {
        f32::from(self.raw_load) / 1.7
    }
}

/// Indoor unit status block
#[derive(PackedStruct, Clone, Copy, Debug, PartialEq)]
#[packed_struct(bit_numbering="msb0")]
pub struct IndoorUnitStatus {
    /// Coil temperature
    #[packed_field(bytes="0")]
    pub tc: u8,

    /// Coil outlet temperature
    #[packed_field(bytes="1")]
    pub tcj: u8,

    #[packed_field(bytes="2")]
    pub fan_speed: u8,
}

impl IndoorUnitStatus {
    pub fn tc(&self) -> i8 {
        self.tc as i8
    }

    pub fn tcj(&self) -> i8 {
        self.tcj as i8
    }
}


#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("unhandled register {0:#04x}")]
    UnknownRegister(u8),
    #[error("unknown {register} value {value:#04x}")]
    UnknownValue {
        register: Register,
        value: u8,
    },
    #[error("{register} payload too short")]
    Truncated {
        register: Register,
    },
    #[error("malformed {register} payload: {source}")]
    Payload {
        register: Register,
        #[source]
        source: PackingError,
    },
}

/// A decoded data frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    Register {
        update: RegisterUpdate,
        origin: Origin,
    },
    OutdoorStatus(OutdoorUnitStatus),
    IndoorStatus(IndoorUnitStatus),
    /// Valid frame of a length the bridge has no use for
    Unrecognized {
        len: usize,
    },
}

impl Message {
    pub fn decode(frame: &DataFrame) -> Result<Self, DecodeError> {
        let bytes = frame.as_bytes();

        match bytes.len() {
            len @ (15 | 17) => {
                let command = bytes[len - 3];
                let value = bytes[len - 2];
                let origin = if len == 15 { Origin::External } else { Origin::Internal };

                let register = Register::try_from(command).map_err(DecodeError::UnknownRegister)?;

                Ok(Message::Register {
                    update: RegisterUpdate::decode(register, value)?,
                    origin,
                })
            }
            len @ (22 | 24) => {
                let offset = if len == 22 { 12 } else { 14 };
                let payload = &bytes[offset + 1..len - 1];

                match Register::try_from(bytes[offset]) {
                    Ok(register @ Register::OutdoorStatus) => Ok(Message::OutdoorStatus(unpack_status::<_, 7>(register, payload)?)),
                    Ok(register @ Register::IndoorStatus) => Ok(Message::IndoorStatus(unpack_status::<_, 3>(register, payload)?)),
                    // other blocks of this size carry nothing the bridge tracks
                    _ => Ok(Message::Unrecognized { len }),
                }
            }
            len => Ok(Message::Unrecognized { len }),
        }
    }
}

fn unpack_status<T, const S: usize>(register: Register, payload: &[u8]) -> Result<T, DecodeError>
where
    T: PackedStruct<ByteArray = [u8; S]>
{
    let bytes: [u8; S] = payload.get(..S)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError::Truncated { register })?;

    T::unpack(&bytes).map_err(|source| DecodeError::Payload { register, source })
}


/// Header of register reports that answer a request, command byte at 14.
const INTERNAL_REPORT_HEADER: [u8; 14] = [0x02, 0x00, 0x03, 0x88, 0x00, 0x01, 0x09, 0x00, 0x30, 0x01, 0x00, 0x00, 0x00, 0x00];

/// Header of unsolicited register reports, command byte at 12.
const EXTERNAL_REPORT_HEADER: [u8; 12] = [0x02, 0x00, 0x03, 0x90, 0x00, 0x00, 0x07, 0x01, 0x30, 0x01, 0x00, 0x02];

/// Header of status block reports, command byte at 12.
const STATUS_REPORT_HEADER: [u8; 12] = [0x02, 0x00, 0x03, 0x88, 0x00, 0x01, 0x0e, 0x00, 0x30, 0x01, 0x00, 0x00];
const STATUS_PAYLOAD_LEN: usize = 8;

/// A register report as the indoor unit sends it.
pub fn encode_register_report(register: Register, value: u8, origin: Origin) -> TxFrame {
    let mut bytes = match origin {
        Origin::Internal => INTERNAL_REPORT_HEADER.to_vec(),
        Origin::External => EXTERNAL_REPORT_HEADER.to_vec(),
    };
    bytes.push(register.into());
    bytes.push(value);

    TxFrame::sealed(bytes)
}

/// A status block report as the indoor unit sends it, `payload` zero padded.
pub fn encode_status_report(register: Register, payload: &[u8]) -> TxFrame {
    let mut bytes = STATUS_REPORT_HEADER.to_vec();
    bytes.push(register.into());

    let mut padded = [0u8; STATUS_PAYLOAD_LEN];
    let len = payload.len().min(STATUS_PAYLOAD_LEN);
    padded[..len].copy_from_slice(&payload[..len]);
    bytes.extend_from_slice(&padded);

    TxFrame::sealed(bytes)
}


#[cfg(test)]
mod tests {
    use std::str::FromStr;
    use std::time::Instant;

    use crate::protocol::codec::{FrameReceiver, RxFrame};

    use super::*;

    fn data_frame(frame: TxFrame) -> DataFrame {
        let (_, mut frames) = FrameReceiver::new().receive(frame.as_bytes(), Instant::now());

        match frames.pop() {
            Some(RxFrame::Data(frame)) => frame,
            other => panic!("expected a data frame, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_internal_report() {
        let frame = data_frame(encode_register_report(Register::Mode, 0x43, Origin::Internal));
        assert_eq!(frame.len(), 17);

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message, Message::Register { update: RegisterUpdate::Mode(Mode::Heat), origin: Origin::Internal });
    }

    #[test]
    fn test_decode_external_report() {
        let frame = data_frame(encode_register_report(Register::TargetTemperature, 22, Origin::External));
        assert_eq!(frame.len(), 15);

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message, Message::Register { update: RegisterUpdate::TargetTemperature(22), origin: Origin::External });
    }

    #[test]
    fn test_decode_negative_temperature() {
        let frame = data_frame(encode_register_report(Register::OutdoorTemperature, (-7i8) as u8, Origin::Internal));

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message, Message::Register { update: RegisterUpdate::OutdoorTemperature(-7), origin: Origin::Internal });
    }

    #[test]
    fn test_decode_unknown_register() {
        let frame = data_frame(TxFrame::sealed(vec![0x02, 0x00, 0x03, 0x88, 0x00, 0x01, 0x09, 0x00, 0x30, 0x01, 0x00, 0x00, 0x00, 0x00, 0x99, 0x01]));

        assert!(matches!(Message::decode(&frame), Err(DecodeError::UnknownRegister(0x99))));
    }

    #[test]
    fn test_decode_unknown_value() {
        let frame = data_frame(encode_register_report(Register::FanMode, 0x7f, Origin::Internal));

        assert!(matches!(
            Message::decode(&frame),
            Err(DecodeError::UnknownValue { register: Register::FanMode, value: 0x7f })
        ));
    }

    #[test]
    fn test_decode_outdoor_status() {
        let payload = [0x3c, (-2i8) as u8, (-5i8) as u8, 85, 0x00, 0x00, 34];
        let frame = data_frame(encode_status_report(Register::OutdoorStatus, &payload));
        assert_eq!(frame.len(), 22);

        let Message::OutdoorStatus(status) = Message::decode(&frame).unwrap() else {
            panic!("expected outdoor status");
        };

        assert_eq!(status.td(), 60);
        assert_eq!(status.ts(), -2);
        assert_eq!(status.te(), -5);
        assert!((status.load() - 50.0).abs() < 0.01);
        assert_eq!(status.aux, 34);
    }

    #[test]
    fn test_decode_long_indoor_status() {
        // 24 byte variant carries two extra header bytes
        let mut bytes = vec![0x02, 0x00, 0x03, 0x88, 0x00, 0x01, 0x10, 0x00, 0x30, 0x01, 0x00, 0x00, 0x00, 0x00, 0xe4];
        bytes.extend_from_slice(&[25, 30, 0x80, 0, 0, 0, 0, 0]);
        let frame = data_frame(TxFrame::sealed(bytes));
        assert_eq!(frame.len(), 24);

        let message = Message::decode(&frame).unwrap();
        assert_eq!(message, Message::IndoorStatus(IndoorUnitStatus { tc: 25, tcj: 30, fan_speed: 0x80 }));
    }

    #[test]
    fn test_decode_unknown_status_block() {
        let frame = data_frame(encode_status_report(Register::Mode, &[1, 2, 3]));
        assert_eq!(frame.len(), 22);

        assert_eq!(Message::decode(&frame).unwrap(), Message::Unrecognized { len: 22 });
    }

    #[test]
    fn test_decode_unrecognized_length() {
        let frame = data_frame(TxFrame::read(Register::Mode));

        assert_eq!(Message::decode(&frame).unwrap(), Message::Unrecognized { len: 14 });
    }

    #[test]
    fn test_target_temperature_offset() {
        assert_eq!(decode_target_temperature(26, SpecialMode::EightDegrees), 10);
        assert_eq!(decode_target_temperature(21, SpecialMode::Standard), 21);

        assert_eq!(encode_target_temperature(16), 32);
        assert_eq!(encode_target_temperature(5), 21);
        assert_eq!(encode_target_temperature(17), 17);
    }

    #[test]
    fn test_value_names() {
        assert_eq!(SpecialMode::EightDegrees.to_string(), "8 Degrees");
        assert_eq!(SpecialMode::from_str("eight-degrees").unwrap(), SpecialMode::EightDegrees);
        assert_eq!(PowerSelection::from_str("75").unwrap(), PowerSelection::Percent75);
        assert_eq!(FanMode::from_str("medium-high").unwrap(), FanMode::MediumHigh);
        assert!(FanMode::MediumHigh.is_composite());

        assert_eq!(Register::try_from(0xb3), Ok(Register::TargetTemperature));
        assert_eq!(u8::from(Ionizer::On), 0x18);
        assert_eq!(SwingMode::try_from(0x55), Err(0x55));
    }
}
