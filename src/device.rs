use strum::EnumCount;
use strum_macros::{Display, EnumCount as EnumCountMacro, EnumIter, EnumString};

use crate::protocol::registers::{FanMode, Mode, PowerSelection, PowerState, SpecialMode, SwingMode};


/// Mode as presented to the outside world, folding power into it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ClimateMode {
    Off,
    HeatCool,
    Cool,
    Heat,
    Dry,
    FanOnly,
}

impl ClimateMode {
    /// Modes the adaptive thermostat drives.
    pub fn is_conditioning(self) -> bool {
        matches!(self, ClimateMode::Heat | ClimateMode::Cool | ClimateMode::HeatCool)
    }

    /// Modes unavailable when cooling is disabled.
    pub fn is_cooling(self) -> bool {
        matches!(self, ClimateMode::Cool | ClimateMode::Dry | ClimateMode::HeatCool)
    }

    /// Register value for this mode, `None` for off.
    pub fn device_mode(self) -> Option<Mode> {
        match self {
            ClimateMode::Off => None,
            ClimateMode::HeatCool => Some(Mode::HeatCool),
            ClimateMode::Cool => Some(Mode::Cool),
            ClimateMode::Heat => Some(Mode::Heat),
            ClimateMode::Dry => Some(Mode::Dry),
            ClimateMode::FanOnly => Some(Mode::FanOnly),
        }
    }
}

impl From<Mode> for ClimateMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::HeatCool => ClimateMode::HeatCool,
            Mode::Cool => ClimateMode::Cool,
            Mode::Heat => ClimateMode::Heat,
            Mode::Dry => ClimateMode::Dry,
            Mode::FanOnly => ClimateMode::FanOnly,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Display, EnumString, EnumIter)]
#[strum(serialize_all = "kebab-case")]
pub enum ClimateSwing {
    Off,
    Vertical,
    Horizontal,
    Both,
}

impl From<SwingMode> for ClimateSwing {
    fn from(swing: SwingMode) -> Self {
        match swing {
            SwingMode::Vertical => ClimateSwing::Vertical,
            SwingMode::Horizontal => ClimateSwing::Horizontal,
            SwingMode::Both => ClimateSwing::Both,
            // fixed louver positions don't move
            SwingMode::Off | SwingMode::Fixed1 | SwingMode::Fixed2 | SwingMode::Fixed3 | SwingMode::Fixed4 | SwingMode::Fixed5 => ClimateSwing::Off,
        }
    }
}


/// Diagnostic values published as they change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display, EnumIter, EnumCountMacro)]
#[strum(serialize_all = "snake_case")]
pub enum TelemetryChannel {
    OutdoorTemperature,
    /// Room temperature as measured by the indoor unit
    IndoorAirTemperature,
    /// Target the indoor unit is actually running with
    IndoorSetpoint,
    IndoorTc,
    IndoorTcj,
    IndoorFanSpeed,
    OutdoorTd,
    OutdoorTs,
    OutdoorTe,
    OutdoorLoad,
    OutdoorAux,
}


/// Last known state of the indoor unit.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceState {
    pub power: PowerState,
    pub mode: ClimateMode,
    /// User facing target
    pub target_temperature: f32,
    /// Target the unit is running with, with any offset already removed
    pub internal_target: u8,
    pub current_temperature: Option<f32>,
    pub fan_mode: FanMode,
    pub swing_mode: SwingMode,
    pub special_mode: SpecialMode,
    pub power_selection: PowerSelection,
    pub ionizer: bool,
    /// The unit's own thermistor reading
    pub room_temperature: i8,
    /// Use the unit's own thermistor instead of the adaptive thermostat
    pub internal_thermistor: bool,
    telemetry: [Option<f32>; TelemetryChannel::COUNT],
}

impl Default for DeviceState {
    fn default() -> Self {
        DeviceState {
            power: PowerState::Off,
            mode: ClimateMode::Off,
            target_temperature: 20.0,
            internal_target: 20,
            current_temperature: None,
            fan_mode: FanMode::Medium,
            swing_mode: SwingMode::Off,
            special_mode: SpecialMode::Standard,
            power_selection: PowerSelection::Percent100,
            ionizer: false,
            room_temperature: 0,
            internal_thermistor: false,
            telemetry: [None; TelemetryChannel::COUNT],
        }
    }
}

/// A single state mutation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Change {
    Power(PowerState),
    Mode(ClimateMode),
    TargetTemperature(f32),
    InternalTarget(u8),
    CurrentTemperature(f32),
    FanMode(FanMode),
    SwingMode(SwingMode),
    SpecialMode(SpecialMode),
    PowerSelection(PowerSelection),
    Ionizer(bool),
    RoomTemperature(i8),
    InternalThermistor(bool),
    Telemetry(TelemetryChannel, f32),
}

/// Published whenever an observable value actually changes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Event {
    Mode(ClimateMode),
    TargetTemperature(f32),
    CurrentTemperature(f32),
    FanMode(FanMode),
    Swing(ClimateSwing),
    SwingPosition(SwingMode),
    SpecialMode(SpecialMode),
    PowerSelection(PowerSelection),
    Ionizer(bool),
    InternalThermistor(bool),
    Telemetry(TelemetryChannel, f32),
}

/// Store `value` in `slot`, reporting whether it differed.
fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

impl DeviceState {
    pub fn swing(&self) -> ClimateSwing {
        self.swing_mode.into()
    }

    pub fn telemetry(&self, channel: TelemetryChannel) -> Option<f32> {
        self.telemetry[channel as usize]
    }

    pub fn is_powered(&self) -> bool {
        self.power == PowerState::On
    }

    /// Apply `change`, returning the events it caused.
    pub fn apply(&mut self, change: Change) -> Vec<Event> {
        let mut events = vec![];

        match change {
            Change::Power(power) => {
                self.power = power;
            }
            Change::Mode(mode) => {
                if replace(&mut self.mode, mode) {
                    events.push(Event::Mode(mode));
                }
            }
            Change::TargetTemperature(target) => {
                if replace(&mut self.target_temperature, target) {
                    events.push(Event::TargetTemperature(target));
                }
            }
            Change::InternalTarget(target) => {
                self.internal_target = target;
                events.extend(self.record(TelemetryChannel::IndoorSetpoint, f32::from(target)));
            }
            Change::CurrentTemperature(current) => {
                if replace(&mut self.current_temperature, Some(current)) {
                    events.push(Event::CurrentTemperature(current));
                }
            }
            Change::FanMode(fan) => {
                if replace(&mut self.fan_mode, fan) {
                    events.push(Event::FanMode(fan));
                }
            }
            Change::SwingMode(swing) => {
                let previous = self.swing();
                if replace(&mut self.swing_mode, swing) {
                    events.push(Event::SwingPosition(swing));

                    if self.swing() != previous {
                        events.push(Event::Swing(self.swing()));
                    }
                }
            }
            Change::SpecialMode(special) => {
                if replace(&mut self.special_mode, special) {
                    events.push(Event::SpecialMode(special));
                }
            }
            Change::PowerSelection(selection) => {
                if replace(&mut self.power_selection, selection) {
                    events.push(Event::PowerSelection(selection));
                }
            }
            Change::Ionizer(on) => {
                if replace(&mut self.ionizer, on) {
                    events.push(Event::Ionizer(on));
                }
            }
            Change::RoomTemperature(room) => {
                self.room_temperature = room;
                events.extend(self.record(TelemetryChannel::IndoorAirTemperature, f32::from(room)));
            }
            Change::InternalThermistor(on) => {
                if replace(&mut self.internal_thermistor, on) {
                    events.push(Event::InternalThermistor(on));
                }
            }
            Change::Telemetry(channel, value) => {
                events.extend(self.record(channel, value));
            }
        }

        events
    }

    fn record(&mut self, channel: TelemetryChannel, value: f32) -> Option<Event> {
        replace(&mut self.telemetry[channel as usize], Some(value))
            .then_some(Event::Telemetry(channel, value))
    }
}
