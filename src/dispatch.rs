//! Turns decoded messages into state changes and follow-up requests.
//!
//! Dispatch never mutates the device state itself, the controller applies
//! the returned [`Dispatch`].

use tracing::{error, info, warn};

use crate::config::Settings;
use crate::device::{Change, ClimateMode, DeviceState, TelemetryChannel};
use crate::protocol::codec::TxFrame;
use crate::protocol::registers::{
    decode_target_temperature, IndoorUnitStatus, Ionizer, Message, Mode, Origin, OutdoorUnitStatus,
    PowerState, Register, RegisterUpdate, SpecialMode, STANDARD_MIN_TARGET,
};


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Read(Register),
    Write(Register, u8),
}

impl Request {
    pub fn frame(self) -> TxFrame {
        match self {
            Request::Read(register) => TxFrame::read(register),
            Request::Write(register, value) => TxFrame::write(register, value),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Dispatch {
    pub changes: Vec<Change>,
    pub requests: Vec<Request>,
}

impl Dispatch {
    fn change(change: Change) -> Self {
        Dispatch {
            changes: vec![change],
            requests: vec![],
        }
    }
}


pub fn dispatch(state: &DeviceState, settings: &Settings, message: Message) -> Dispatch {
    match message {
        Message::Register { update, origin } => dispatch_register(state, settings, update, origin),
        Message::OutdoorStatus(status) => outdoor_status(&status),
        Message::IndoorStatus(status) => indoor_status(&status),
        Message::Unrecognized { len } => {
            warn!(len, "ignoring frame of unrecognized length");
            Dispatch::default()
        }
    }
}

fn dispatch_register(state: &DeviceState, settings: &Settings, update: RegisterUpdate, origin: Origin) -> Dispatch {
    match update {
        RegisterUpdate::PowerState(PowerState::On) => {
            info!("power on");
            let mut dispatch = Dispatch::change(Change::Power(PowerState::On));

            // mode and target are only meaningful once the unit runs
            if !state.is_powered() {
                dispatch.requests.push(Request::Read(Register::Mode));
                dispatch.requests.push(Request::Read(Register::TargetTemperature));
            }

            dispatch
        }
        RegisterUpdate::PowerState(PowerState::Off) => {
            info!("power off");
            Dispatch {
                changes: vec![Change::Power(PowerState::Off), Change::Mode(ClimateMode::Off)],
                requests: vec![],
            }
        }
        RegisterUpdate::Mode(mode) => {
            info!(%mode, "mode");

            if !state.is_powered() {
                error!(%mode, "mode reported while powered off");
                return Dispatch::change(Change::Mode(ClimateMode::Off));
            }

            let climate = ClimateMode::from(mode);
            if settings.cooling_disabled && climate.is_cooling() {
                warn!(%mode, "cooling is disabled, switching to fan only");
                return Dispatch {
                    changes: vec![Change::Mode(ClimateMode::FanOnly)],
                    requests: vec![Request::Write(Register::Mode, Mode::FanOnly.into())],
                };
            }

            Dispatch::change(Change::Mode(climate))
        }
        RegisterUpdate::TargetTemperature(raw) => {
            let target = decode_target_temperature(raw, state.special_mode);
            info!(target, ?origin, "target temperature");

            let mut dispatch = Dispatch::change(Change::InternalTarget(target));

            // with the adaptive thermostat in charge the unit's target is ours, only
            // a change made at the unit itself replaces the user facing one
            if state.internal_thermistor || origin == Origin::External {
                dispatch.changes.push(Change::TargetTemperature(f32::from(target)));
            }

            dispatch
        }
        RegisterUpdate::FanMode(fan) => {
            info!(%fan, "fan mode");
            Dispatch::change(Change::FanMode(fan))
        }
        RegisterUpdate::SwingMode(swing) => {
            info!(%swing, "swing mode");
            Dispatch::change(Change::SwingMode(swing))
        }
        RegisterUpdate::SpecialMode(special) => {
            info!(%special, "special mode");
            Dispatch::change(Change::SpecialMode(special))
        }
        RegisterUpdate::Ionizer(ionizer) => {
            info!(%ionizer, "ionizer");
            Dispatch::change(Change::Ionizer(ionizer == Ionizer::On))
        }
        RegisterUpdate::PowerSelection(selection) => {
            info!(%selection, "power selection");
            Dispatch::change(Change::PowerSelection(selection))
        }
        RegisterUpdate::RoomTemperature(room) => {
            info!(room, "room temperature");
            let mut dispatch = Dispatch::change(Change::RoomTemperature(room));

            if state.internal_thermistor {
                dispatch.changes.push(Change::CurrentTemperature(f32::from(room)));
            }

            dispatch
        }
        RegisterUpdate::OutdoorTemperature(outdoor) => {
            info!(outdoor, "outdoor temperature");
            Dispatch::change(Change::Telemetry(TelemetryChannel::OutdoorTemperature, f32::from(outdoor)))
        }
    }
}

fn outdoor_status(status: &OutdoorUnitStatus) -> Dispatch {
    info!(td = status.td(), ts = status.ts(), te = status.te(), load = status.load(), aux = status.aux, "outdoor unit status");

    let changes = [
        (TelemetryChannel::OutdoorTd, f32::from(status.td())),
        (TelemetryChannel::OutdoorTs, f32::from(status.ts())),
        (TelemetryChannel::OutdoorTe, f32::from(status.te())),
        (TelemetryChannel::OutdoorLoad, status.load()),
        (TelemetryChannel::OutdoorAux, f32::from(status.aux)),
    ];

    Dispatch {
        changes: changes.into_iter().map(|(channel, value)| Change::Telemetry(channel, value)).collect(),
        requests: vec![],
    }
}

fn indoor_status(status: &IndoorUnitStatus) -> Dispatch {
    info!(tc = status.tc(), tcj = status.tcj(), fan_speed = status.fan_speed, "indoor unit status");

    let changes = [
        (TelemetryChannel::IndoorTc, f32::from(status.tc())),
        (TelemetryChannel::IndoorTcj, f32::from(status.tcj())),
        (TelemetryChannel::IndoorFanSpeed, f32::from(status.fan_speed)),
    ];

    Dispatch {
        changes: changes.into_iter().map(|(channel, value)| Change::Telemetry(channel, value)).collect(),
        requests: vec![],
    }
}


/// Special mode the unit has to switch to so `target` is reachable, if any.
///
/// Heating targets below 17°C only exist in eight-degrees mode, and that mode
/// makes no sense outside of heating.
pub fn eight_degrees_switchover(state: &DeviceState, target: u8) -> Option<SpecialMode> {
    if !state.is_powered() {
        return None;
    }

    let eight_degrees = state.special_mode == SpecialMode::EightDegrees;

    match state.mode {
        ClimateMode::Heat if eight_degrees && target >= STANDARD_MIN_TARGET => Some(SpecialMode::Standard),
        ClimateMode::Heat if !eight_degrees && target < STANDARD_MIN_TARGET => Some(SpecialMode::EightDegrees),
        ClimateMode::Heat => None,
        _ if eight_degrees => Some(SpecialMode::Standard),
        _ => None,
    }
}


#[cfg(test)]
mod tests {
    use crate::device::Change;
    use crate::protocol::registers::{FanMode, OutdoorUnitStatus};

    use super::*;

    fn powered(mode: ClimateMode) -> DeviceState {
        let mut state = DeviceState::default();
        state.power = PowerState::On;
        state.mode = mode;
        state
    }

    fn register(update: RegisterUpdate) -> Message {
        Message::Register { update, origin: Origin::Internal }
    }

    #[test]
    fn test_power_on_requests_mode_and_target() {
        let dispatch = dispatch(&DeviceState::default(), &Settings::default(), register(RegisterUpdate::PowerState(PowerState::On)));

        assert_eq!(dispatch.changes, vec![Change::Power(PowerState::On)]);
        assert_eq!(dispatch.requests, vec![Request::Read(Register::Mode), Request::Read(Register::TargetTemperature)]);

        // already on, nothing to refresh
        let dispatch = super::dispatch(&powered(ClimateMode::Heat), &Settings::default(), register(RegisterUpdate::PowerState(PowerState::On)));
        assert!(dispatch.requests.is_empty());
    }

    #[test]
    fn test_power_off_forces_mode_off() {
        let dispatch = dispatch(&powered(ClimateMode::Cool), &Settings::default(), register(RegisterUpdate::PowerState(PowerState::Off)));

        assert!(dispatch.changes.contains(&Change::Mode(ClimateMode::Off)));
    }

    #[test]
    fn test_mode_while_powered_off() {
        let dispatch = dispatch(&DeviceState::default(), &Settings::default(), register(RegisterUpdate::Mode(Mode::Heat)));

        assert_eq!(dispatch.changes, vec![Change::Mode(ClimateMode::Off)]);
        assert!(dispatch.requests.is_empty());
    }

    #[test]
    fn test_cooling_disabled_override() {
        let settings = Settings { cooling_disabled: true, ..Settings::default() };

        for mode in [Mode::Cool, Mode::Dry, Mode::HeatCool] {
            let dispatch = dispatch(&powered(ClimateMode::Heat), &settings, register(RegisterUpdate::Mode(mode)));

            assert_eq!(dispatch.changes, vec![Change::Mode(ClimateMode::FanOnly)]);
            assert_eq!(dispatch.requests, vec![Request::Write(Register::Mode, 0x45)]);
        }

        let dispatch = dispatch(&powered(ClimateMode::Off), &settings, register(RegisterUpdate::Mode(Mode::Heat)));
        assert_eq!(dispatch.changes, vec![Change::Mode(ClimateMode::Heat)]);
    }

    #[test]
    fn test_target_origin() {
        let state = powered(ClimateMode::Heat);
        let settings = Settings::default();

        let internal = dispatch(&state, &settings, register(RegisterUpdate::TargetTemperature(23)));
        assert_eq!(internal.changes, vec![Change::InternalTarget(23)]);

        let external = dispatch(&state, &settings, Message::Register {
            update: RegisterUpdate::TargetTemperature(23),
            origin: Origin::External,
        });
        assert_eq!(external.changes, vec![Change::InternalTarget(23), Change::TargetTemperature(23.0)]);

        let mut thermistor = state;
        thermistor.internal_thermistor = true;
        let internal = dispatch(&thermistor, &settings, register(RegisterUpdate::TargetTemperature(23)));
        assert_eq!(internal.changes, vec![Change::InternalTarget(23), Change::TargetTemperature(23.0)]);
    }

    #[test]
    fn test_target_in_eight_degrees() {
        let mut state = powered(ClimateMode::Heat);
        state.special_mode = SpecialMode::EightDegrees;

        let dispatch = dispatch(&state, &Settings::default(), register(RegisterUpdate::TargetTemperature(26)));
        assert_eq!(dispatch.changes, vec![Change::InternalTarget(10)]);
    }

    #[test]
    fn test_room_temperature_source() {
        let state = powered(ClimateMode::Heat);

        let dispatch = super::dispatch(&state, &Settings::default(), register(RegisterUpdate::RoomTemperature(19)));
        assert_eq!(dispatch.changes, vec![Change::RoomTemperature(19)]);

        let mut state = state;
        state.internal_thermistor = true;
        let dispatch = super::dispatch(&state, &Settings::default(), register(RegisterUpdate::RoomTemperature(19)));
        assert_eq!(dispatch.changes, vec![Change::RoomTemperature(19), Change::CurrentTemperature(19.0)]);
    }

    #[test]
    fn test_status_telemetry() {
        let status = OutdoorUnitStatus { td: 70, ts: 5, te: 0xfb, raw_load: 17, unknown: [0, 0], aux: 3 };
        let dispatch = dispatch(&DeviceState::default(), &Settings::default(), Message::OutdoorStatus(status));

        assert_eq!(dispatch.changes.len(), 5);
        assert!(dispatch.changes.contains(&Change::Telemetry(TelemetryChannel::OutdoorTe, -5.0)));
        assert!(dispatch.changes.iter().any(|change| matches!(
            change,
            Change::Telemetry(TelemetryChannel::OutdoorLoad, load) if (load - 10.0).abs() < 0.01
        )));

        let status = IndoorUnitStatus { tc: 30, tcj: 28, fan_speed: 120 };
        let dispatch = super::dispatch(&DeviceState::default(), &Settings::default(), Message::IndoorStatus(status));
        assert!(dispatch.changes.contains(&Change::Telemetry(TelemetryChannel::IndoorFanSpeed, 120.0)));
    }

    #[test]
    fn test_plain_registers() {
        let dispatch = dispatch(&DeviceState::default(), &Settings::default(), register(RegisterUpdate::FanMode(FanMode::Quiet)));
        assert_eq!(dispatch, Dispatch::change(Change::FanMode(FanMode::Quiet)));

        let dispatch = super::dispatch(&DeviceState::default(), &Settings::default(), register(RegisterUpdate::Ionizer(Ionizer::On)));
        assert_eq!(dispatch, Dispatch::change(Change::Ionizer(true)));

        let dispatch = super::dispatch(&DeviceState::default(), &Settings::default(), Message::Unrecognized { len: 19 });
        assert_eq!(dispatch, Dispatch::default());
    }

    #[test]
    fn test_eight_degrees_switchover() {
        let heat = powered(ClimateMode::Heat);
        assert_eq!(eight_degrees_switchover(&heat, 16), Some(SpecialMode::EightDegrees));
        assert_eq!(eight_degrees_switchover(&heat, 17), None);

        let mut eight = heat.clone();
        eight.special_mode = SpecialMode::EightDegrees;
        assert_eq!(eight_degrees_switchover(&eight, 17), Some(SpecialMode::Standard));
        assert_eq!(eight_degrees_switchover(&eight, 10), None);

        let mut cool = eight.clone();
        cool.mode = ClimateMode::Cool;
        assert_eq!(eight_degrees_switchover(&cool, 10), Some(SpecialMode::Standard));

        let mut off = eight;
        off.power = PowerState::Off;
        assert_eq!(eight_degrees_switchover(&off, 25), None);
    }
}
