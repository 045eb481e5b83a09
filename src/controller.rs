use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, trace, warn};

use crate::config::Settings;
use crate::device::{Change, ClimateMode, ClimateSwing, DeviceState, Event, TelemetryChannel};
use crate::dispatch::{dispatch, eight_degrees_switchover, Dispatch, Request};
use crate::protocol::codec::{FrameReceiver, RxFrame, TxFrame};
use crate::protocol::handshake::{Startup, StartupAction};
use crate::protocol::registers::{
    encode_target_temperature, FanMode, Ionizer, Message, PowerSelection, PowerState, Register, SpecialMode,
    SwingMode, STANDARD_MIN_TARGET,
};
use crate::scheduler::TxScheduler;
use crate::thermostat::{self, Inputs, SmartThermostat};


/// Capacity of the event channel, oldest events are dropped beyond it.
pub const EVENT_CAPACITY: usize = 64;

/// No periodic polling this soon after boot.
pub const POLL_GRACE: Duration = Duration::from_secs(30);
pub const PARTIAL_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const FULL_POLL_INTERVAL: Duration = Duration::from_secs(150);

/// Fast changing registers.
const PARTIAL_POLL: [Register; 2] = [Register::RoomTemperature, Register::OutdoorTemperature];

const FULL_POLL: [Register; 12] = [
    Register::PowerState,
    Register::Mode,
    Register::TargetTemperature,
    Register::FanMode,
    Register::SwingMode,
    Register::SpecialMode,
    Register::PowerSelection,
    Register::Ionizer,
    Register::RoomTemperature,
    Register::OutdoorTemperature,
    Register::IndoorStatus,
    Register::OutdoorStatus,
];

/// Lowest and highest target accepted from the outside.
pub const MIN_TARGET: f32 = 5.0;
pub const MAX_TARGET: f32 = 30.0;


/// A command from the outside world.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Control {
    Mode(ClimateMode),
    TargetTemperature(f32),
    FanMode(FanMode),
    SwingMode(SwingMode),
    Swing(ClimateSwing),
    SpecialMode(SpecialMode),
    PowerSelection(PowerSelection),
    Ionizer(bool),
    InternalThermistor(bool),
    /// Reading of the external room sensor, `None` when it went away
    ExternalTemperature(Option<f32>),
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlError {
    #[error("indoor unit not initialized yet")]
    NotInitialized,
    #[error("indoor unit is powered off")]
    PoweredOff,
    #[error("{0} mode is disabled for this unit")]
    CoolingDisabled(ClimateMode),
    #[error("special mode {0} is only available while heating")]
    InvalidSpecialMode(SpecialMode),
    #[error("target temperature must be a number")]
    InvalidTarget,
}


/// Owns everything about one indoor unit: the link state machines, the
/// device state and the adaptive thermostat.
///
/// It never touches the link itself. Bytes are fed in with [`Controller::receive`]
/// and frames to send come out of [`Controller::tick`].
pub struct Controller {
    settings: Settings,
    state: DeviceState,
    receiver: FrameReceiver,
    scheduler: TxScheduler,
    startup: Startup,
    thermostat: SmartThermostat,
    external_temperature: Option<f32>,
    booted_at: Instant,
    last_partial_poll: Instant,
    last_full_poll: Instant,
    last_control: Instant,
    events: async_broadcast::Sender<Event>,
}

impl Controller {
    pub fn new(settings: Settings, now: Instant) -> (Self, async_broadcast::Receiver<Event>) {
        let (mut events, receiver) = async_broadcast::broadcast(EVENT_CAPACITY);
        events.set_overflow(true);

        let controller = Controller {
            thermostat: SmartThermostat::new(&settings, now),
            settings,
            state: DeviceState::default(),
            receiver: FrameReceiver::new(),
            scheduler: TxScheduler::new(),
            startup: Startup::new(now),
            external_temperature: None,
            booted_at: now,
            last_partial_poll: now,
            last_full_poll: now,
            last_control: now,
            events,
        };

        (controller, receiver)
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_initialized(&self) -> bool {
        self.startup.is_ready()
    }

    pub fn queued(&self) -> impl Iterator<Item = &TxFrame> {
        self.scheduler.iter()
    }

    /// Feed bytes read from the link, returning how many were consumed.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> usize {
        let (consumed, frames) = self.receiver.receive(bytes, now);

        for frame in frames {
            self.handle_frame(frame);
        }

        consumed
    }

    /// Advance timers, returning the frame to send now, if any.
    pub fn tick(&mut self, now: Instant) -> Option<TxFrame> {
        if let Some(err) = self.receiver.expire(now) {
            warn!("{err}");
        }

        if let Some(action) = self.startup.advance(now) {
            for frame in action.frames() {
                self.scheduler.enqueue(frame);
            }

            if action == StartupAction::FullPoll {
                self.poll(&FULL_POLL);
                self.last_full_poll = now;
            }
        }

        if self.is_initialized() {
            self.poll_periodic(now);
            self.control_step(now);
        }

        self.scheduler.poll(&self.receiver, now)
    }

    pub fn control(&mut self, control: Control) -> Result<(), ControlError> {
        match control {
            Control::InternalThermistor(on) => {
                info!(on, "internal thermistor");
                self.commit(Change::InternalThermistor(on));
                return Ok(());
            }
            Control::ExternalTemperature(temperature) => {
                debug!(?temperature, "external temperature");
                self.external_temperature = temperature;
                return Ok(());
            }
            _ => (),
        }

        if !self.is_initialized() {
            return Err(ControlError::NotInitialized);
        }

        match control {
            Control::Mode(mode) => self.set_mode(mode),
            Control::TargetTemperature(target) => self.set_target_temperature(target),
            Control::FanMode(fan) => {
                self.require_power()?;
                self.commit(Change::FanMode(fan));
                self.request(Request::Write(Register::FanMode, fan.into()));
                Ok(())
            }
            Control::SwingMode(swing) => self.set_swing_mode(swing),
            Control::Swing(swing) => self.set_swing_mode(match swing {
                ClimateSwing::Off => SwingMode::Off,
                ClimateSwing::Vertical => SwingMode::Vertical,
                ClimateSwing::Horizontal => SwingMode::Horizontal,
                ClimateSwing::Both => SwingMode::Both,
            }),
            Control::SpecialMode(special) => self.set_special_mode(special),
            Control::PowerSelection(selection) => {
                self.commit(Change::PowerSelection(selection));
                self.request(Request::Write(Register::PowerSelection, selection.into()));
                Ok(())
            }
            Control::Ionizer(on) => {
                let value = if on { Ionizer::On } else { Ionizer::Off };
                self.commit(Change::Ionizer(on));
                self.request(Request::Write(Register::Ionizer, value.into()));
                Ok(())
            }
            Control::InternalThermistor(_) | Control::ExternalTemperature(_) => Ok(()),
        }
    }

    fn set_mode(&mut self, mode: ClimateMode) -> Result<(), ControlError> {
        if self.settings.cooling_disabled && mode.is_cooling() {
            return Err(ControlError::CoolingDisabled(mode));
        }

        info!(%mode, "set mode");
        self.commit(Change::Mode(mode));

        let Some(device_mode) = mode.device_mode() else {
            self.request(Request::Write(Register::PowerState, PowerState::Off.into()));
            return Ok(());
        };

        if !self.state.is_powered() {
            self.request(Request::Write(Register::PowerState, PowerState::On.into()));
        }

        self.request(Request::Write(Register::Mode, device_mode.into()));
        self.switchover(self.state.internal_target);

        Ok(())
    }

    fn set_target_temperature(&mut self, target: f32) -> Result<(), ControlError> {
        self.require_power()?;

        if target.is_nan() {
            return Err(ControlError::InvalidTarget);
        }

        let target = ((target * 2.0).round() / 2.0).clamp(MIN_TARGET, MAX_TARGET);
        info!(target, "set target temperature");
        self.commit(Change::TargetTemperature(target));

        if !self.state.internal_thermistor {
            // picked up by the next thermostat step
            return Ok(());
        }

        let mut internal = target as u8;
        if self.state.mode != ClimateMode::Heat {
            internal = internal.max(STANDARD_MIN_TARGET);
        }

        self.commit(Change::InternalTarget(internal));
        self.switchover(internal);
        self.request(Request::Write(Register::TargetTemperature, encode_target_temperature(internal)));

        Ok(())
    }

    fn set_swing_mode(&mut self, swing: SwingMode) -> Result<(), ControlError> {
        self.require_power()?;

        self.commit(Change::SwingMode(swing));
        self.request(Request::Write(Register::SwingMode, swing.into()));

        Ok(())
    }

    fn set_special_mode(&mut self, special: SpecialMode) -> Result<(), ControlError> {
        if special == SpecialMode::EightDegrees && self.state.mode != ClimateMode::Heat {
            return Err(ControlError::InvalidSpecialMode(special));
        }

        self.change_special_mode(special);

        Ok(())
    }

    fn require_power(&self) -> Result<(), ControlError> {
        match self.state.power {
            PowerState::On => Ok(()),
            PowerState::Off => Err(ControlError::PoweredOff),
        }
    }

    /// Switch in or out of eight-degrees mode if `target` requires it.
    fn switchover(&mut self, target: u8) {
        if let Some(special) = eight_degrees_switchover(&self.state, target) {
            info!(target, %special, "special mode switchover");
            self.change_special_mode(special);
        }
    }

    /// Write a new special mode, moving the unit's target into the range that mode supports.
    fn change_special_mode(&mut self, special: SpecialMode) {
        let previous = self.state.special_mode;
        let target = self.state.internal_target;

        self.commit(Change::SpecialMode(special));
        self.request(Request::Write(Register::SpecialMode, special.into()));

        let adjusted = match (previous, special) {
            (SpecialMode::EightDegrees, next) if next != SpecialMode::EightDegrees && target < STANDARD_MIN_TARGET => Some(STANDARD_MIN_TARGET),
            (prev, SpecialMode::EightDegrees) if prev != SpecialMode::EightDegrees && target >= STANDARD_MIN_TARGET => Some(STANDARD_MIN_TARGET - 1),
            _ => None,
        };

        if let Some(adjusted) = adjusted {
            debug!(target, adjusted, "moving target into special mode range");
            self.commit(Change::InternalTarget(adjusted));

            if self.state.internal_thermistor {
                self.commit(Change::TargetTemperature(f32::from(adjusted)));
            }

            self.request(Request::Write(Register::TargetTemperature, encode_target_temperature(adjusted)));
        }
    }

    fn handle_frame(&mut self, frame: RxFrame) {
        match frame {
            RxFrame::Data(frame) => match Message::decode(&frame) {
                Ok(message) => {
                    trace!(?message, "rx");
                    let dispatch = dispatch(&self.state, &self.settings, message);
                    self.apply(dispatch);
                }
                Err(err) => error!(?frame, "{err}"),
            },
            RxFrame::HandshakeReply(frame) => debug!("handshake reply {frame:02x?}"),
            RxFrame::PostHandshakeReply(frame) => debug!("post handshake reply {frame:02x?}"),
            RxFrame::Corrupted(err) => error!("{err}"),
        }
    }

    fn apply(&mut self, dispatch: Dispatch) {
        for change in dispatch.changes {
            self.commit(change);
        }

        for request in dispatch.requests {
            self.request(request);
        }
    }

    fn commit(&mut self, change: Change) {
        for event in self.state.apply(change) {
            if let Err(err) = self.events.try_broadcast(event) {
                trace!(?err, "event not delivered");
            }
        }
    }

    fn request(&mut self, request: Request) {
        debug!(?request, "queue");
        self.scheduler.enqueue(request.frame());
    }

    fn poll(&mut self, registers: &[Register]) {
        for register in registers {
            self.request(Request::Read(*register));
        }
    }

    fn poll_periodic(&mut self, now: Instant) {
        if now.saturating_duration_since(self.booted_at) <= POLL_GRACE {
            return;
        }

        if now.saturating_duration_since(self.last_partial_poll) > PARTIAL_POLL_INTERVAL {
            self.last_partial_poll = now;
            self.poll(&PARTIAL_POLL);
        } else if now.saturating_duration_since(self.last_full_poll) > FULL_POLL_INTERVAL {
            self.last_full_poll = now;
            self.poll(&FULL_POLL);
        }
    }

    fn control_step(&mut self, now: Instant) {
        if now.saturating_duration_since(self.last_control) < thermostat::CONTROL_INTERVAL {
            return;
        }
        self.last_control = now;

        if self.state.internal_thermistor {
            return;
        }

        let inputs = Inputs {
            mode: self.state.mode,
            target_temperature: f64::from(self.state.target_temperature),
            external_temperature: self.external_temperature.map(f64::from),
            unit_temperature: f64::from(self.state.room_temperature),
            fan_speed: self.state.telemetry(TelemetryChannel::IndoorFanSpeed).map_or(0.0, f64::from),
            internal_target: self.state.internal_target,
        };

        let correction = self.thermostat.step(&inputs, now);

        if let Some(setpoint) = correction.setpoint {
            info!(setpoint, "adjusting unit setpoint");
            self.commit(Change::InternalTarget(setpoint));
            self.switchover(setpoint);
            self.request(Request::Write(Register::TargetTemperature, encode_target_temperature(setpoint)));
        }

        self.commit(Change::CurrentTemperature(correction.room_temperature as f32));
    }
}
