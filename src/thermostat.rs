//! Adaptive thermostat for rooms where the unit's own thermistor is a poor
//! proxy for the room temperature.
//!
//! The difference between the unit's reading and an external sensor is
//! tracked while the fan runs. The unit is then given a setpoint shifted by the
//! median of that offset plus a proportional term on the remaining error.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::Settings;
use crate::device::ClimateMode;
use crate::protocol::registers::STANDARD_MIN_TARGET;


/// How often the controller runs a step.
pub const CONTROL_INTERVAL: Duration = Duration::from_secs(30);

/// Offsets are only sampled once the fan has been running this long.
pub const FAN_SETTLE_TIME: Duration = Duration::from_secs(60);

/// Samples older than this are dropped, but never below [`HISTORY_MIN_SAMPLES`].
pub const HISTORY_WINDOW: Duration = Duration::from_secs(15 * 60);
pub const HISTORY_MIN_SAMPLES: usize = 10;

/// Lowest heating setpoint, reachable through the eight-degrees special mode.
/// Outside heat the floor is [`STANDARD_MIN_TARGET`].
pub const MIN_HEATING_SETPOINT: u8 = 5;
pub const MAX_SETPOINT: u8 = 30;

/// Room temperatures are clamped into `0..=MAX_ROOM_TEMPERATURE`.
pub const MAX_ROOM_TEMPERATURE: f64 = 35.0;

const RUNAWAY_MIN_BAND: f64 = 0.25;
const RUNAWAY_RELEASE: f64 = 0.15;
const RUNAWAY_BOOST: f64 = 3.0;
const ROUNDING_BAND: f64 = 0.2;


/// Direction a hysteresis latch currently leans.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Bias {
    #[default]
    Neutral,
    Up,
    Down,
}


/// Recent `unit reading - room temperature` samples, oldest first.
#[derive(Debug, Default)]
pub struct OffsetHistory {
    samples: VecDeque<(f64, Instant)>,
}

impl OffsetHistory {
    pub fn push(&mut self, offset: f64, at: Instant) {
        self.samples.push_back((offset, at));
    }

    pub fn prune(&mut self, now: Instant) {
        while self.samples.len() > HISTORY_MIN_SAMPLES {
            match self.samples.front() {
                Some((_, at)) if now.saturating_duration_since(*at) > HISTORY_WINDOW => {
                    self.samples.pop_front();
                }
                _ => break,
            }
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Zero when empty.
    pub fn median(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        let mut sorted: Vec<f64> = self.samples.iter().map(|(offset, _)| *offset).collect();
        sorted.sort_by(f64::total_cmp);

        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }

    /// Zero when empty.
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }

        self.samples.iter().map(|(offset, _)| offset).sum::<f64>() / self.samples.len() as f64
    }

    pub fn oldest(&self) -> Option<Instant> {
        self.samples.front().map(|(_, at)| *at)
    }
}


/// Snapshot of everything a step looks at.
#[derive(Clone, Copy, Debug)]
pub struct Inputs {
    pub mode: ClimateMode,
    pub target_temperature: f64,
    /// Reading of the external sensor, if there is one
    pub external_temperature: Option<f64>,
    /// The unit's own thermistor
    pub unit_temperature: f64,
    pub fan_speed: f64,
    /// Setpoint the unit is currently running with
    pub internal_target: u8,
}

/// Outcome of a step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Correction {
    /// Room temperature to publish
    pub room_temperature: f64,
    /// New setpoint, `None` if the unit already runs with it or is not conditioning
    pub setpoint: Option<u8>,
}


#[derive(Debug)]
pub struct SmartThermostat {
    history: OffsetHistory,
    fan_stopped_at: Instant,
    rounding: Bias,
    runaway: Bias,
    multiplier: f64,
    runaway_protection: bool,
}

impl SmartThermostat {
    pub fn new(settings: &Settings, now: Instant) -> Self {
        SmartThermostat {
            history: OffsetHistory::default(),
            fan_stopped_at: now,
            rounding: Bias::Neutral,
            runaway: Bias::Neutral,
            multiplier: settings.multiplier,
            runaway_protection: settings.runaway_protection,
        }
    }

    pub fn history(&self) -> &OffsetHistory {
        &self.history
    }

    pub fn runaway(&self) -> Bias {
        self.runaway
    }

    pub fn step(&mut self, inputs: &Inputs, now: Instant) -> Correction {
        let room = inputs.external_temperature
            .filter(|t| t.is_finite() && *t != 0.0)
            .unwrap_or(inputs.unit_temperature)
            .clamp(0.0, MAX_ROOM_TEMPERATURE);

        if !inputs.mode.is_conditioning() {
            return Correction { room_temperature: room, setpoint: None };
        }

        if inputs.fan_speed.is_nan() || inputs.fan_speed <= 0.0 {
            self.fan_stopped_at = now;
        } else if now.saturating_duration_since(self.fan_stopped_at) >= FAN_SETTLE_TIME {
            self.history.push(inputs.unit_temperature - room, now);
        }

        self.history.prune(now);
        let median = self.history.median();
        let average = self.history.average();

        let target = inputs.target_temperature;
        let error = target - room;
        let mut setpoint = target + median + error * self.multiplier;

        if self.runaway_protection {
            let band = RUNAWAY_MIN_BAND.max(1.0 / self.multiplier);

            if error > band {
                self.runaway = Bias::Up;
            } else if error < -band {
                self.runaway = Bias::Down;
            } else if error.abs() < RUNAWAY_RELEASE {
                self.runaway = Bias::Neutral;
            }

            match self.runaway {
                Bias::Up => {
                    setpoint = setpoint.max(target).max(inputs.unit_temperature).max(target + median) + RUNAWAY_BOOST;
                }
                Bias::Down => {
                    setpoint = setpoint.min(target).min(inputs.unit_temperature).min(target + median) - RUNAWAY_BOOST;
                }
                Bias::Neutral => (),
            }
        }

        if error > ROUNDING_BAND {
            self.rounding = Bias::Up;
        } else if error < -ROUNDING_BAND {
            self.rounding = Bias::Down;
        }

        let rounded = match self.rounding {
            Bias::Up => setpoint.ceil(),
            Bias::Neutral | Bias::Down => setpoint.floor(),
        };

        let min = if inputs.mode == ClimateMode::Heat { MIN_HEATING_SETPOINT } else { STANDARD_MIN_TARGET };
        let clamped = rounded.clamp(f64::from(min), f64::from(MAX_SETPOINT));
        // NaN casts to zero, which the clamp below catches
        let setpoint_int = (clamped as u8).clamp(min, MAX_SETPOINT);

        debug!(
            room, target, error, median, average,
            samples = self.history.len(),
            raw_setpoint = setpoint,
            setpoint = setpoint_int,
            runaway = ?self.runaway,
            rounding = ?self.rounding,
            "thermostat step"
        );

        Correction {
            room_temperature: room,
            setpoint: (setpoint_int != inputs.internal_target).then_some(setpoint_int),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(mode: ClimateMode, target: f64, room: f64) -> Inputs {
        Inputs {
            mode,
            target_temperature: target,
            external_temperature: Some(room),
            unit_temperature: room,
            fan_speed: 0.0,
            internal_target: 20,
        }
    }

    #[test]
    fn test_median_and_average() {
        let now = Instant::now();
        let mut history = OffsetHistory::default();
        assert_eq!(history.median(), 0.0);
        assert_eq!(history.average(), 0.0);

        for offset in [3.0, 1.0, 2.0] {
            history.push(offset, now);
        }
        assert_eq!(history.median(), 2.0);
        assert_eq!(history.average(), 2.0);

        history.push(4.0, now);
        assert_eq!(history.median(), 2.5);
    }

    #[test]
    fn test_prune_keeps_minimum() {
        let start = Instant::now();
        let now = start + Duration::from_secs(16 * 60);

        let mut history = OffsetHistory::default();
        for _ in 0..3 {
            history.push(1.0, start);
        }
        for i in 0..9 {
            history.push(1.0, start + Duration::from_secs(300 + i));
        }

        history.prune(now);
        assert_eq!(history.len(), HISTORY_MIN_SAMPLES);

        let mut history = OffsetHistory::default();
        for _ in 0..3 {
            history.push(1.0, start);
        }
        for i in 0..12 {
            history.push(1.0, start + Duration::from_secs(300 + i));
        }

        history.prune(now);
        assert_eq!(history.len(), 12);
        assert!(history.oldest().is_some_and(|at| now.saturating_duration_since(at) <= HISTORY_WINDOW));
    }

    #[test]
    fn test_cooling_step() {
        let mut thermostat = SmartThermostat::new(&Settings::default(), Instant::now());

        // 24 + 0 + (24 - 26) * 4 = 16, floored, clamped up to the cooling minimum
        let correction = thermostat.step(&inputs(ClimateMode::Cool, 24.0, 26.0), Instant::now());
        assert_eq!(correction, Correction { room_temperature: 26.0, setpoint: Some(17) });
    }

    #[test]
    fn test_heating_step_rounds_up() {
        let mut thermostat = SmartThermostat::new(&Settings::default(), Instant::now());

        // 21 + (21 - 20.6) * 4 = 22.6
        let correction = thermostat.step(&inputs(ClimateMode::Heat, 21.0, 20.6), Instant::now());
        assert_eq!(correction.setpoint, Some(23));
    }

    #[test]
    fn test_unchanged_setpoint_is_not_written() {
        let now = Instant::now();
        let mut thermostat = SmartThermostat::new(&Settings::default(), now);

        let mut inputs = inputs(ClimateMode::Cool, 24.0, 26.0);
        assert_eq!(thermostat.step(&inputs, now).setpoint, Some(17));

        inputs.internal_target = 17;
        assert_eq!(thermostat.step(&inputs, now + CONTROL_INTERVAL).setpoint, None);
    }

    #[test]
    fn test_setpoint_bounds() {
        let now = Instant::now();

        for mode in [ClimateMode::Heat, ClimateMode::Cool, ClimateMode::HeatCool] {
            let min = if mode == ClimateMode::Heat { MIN_HEATING_SETPOINT } else { STANDARD_MIN_TARGET };

            for target in (5..=30).map(f64::from) {
                for room in [-10.0, 0.0, 12.5, 20.0, 27.3, 40.0] {
                    let mut thermostat = SmartThermostat::new(&Settings { runaway_protection: true, ..Settings::default() }, now);
                    let mut inputs = inputs(mode, target, room);
                    inputs.internal_target = 0;

                    let correction = thermostat.step(&inputs, now);
                    let setpoint = correction.setpoint.unwrap();
                    assert!((min..=MAX_SETPOINT).contains(&setpoint), "{mode} {target} {room}: {setpoint}");
                    assert!((0.0..=MAX_ROOM_TEMPERATURE).contains(&correction.room_temperature));
                }
            }
        }
    }

    #[test]
    fn test_invalid_external_uses_unit() {
        let now = Instant::now();
        let mut thermostat = SmartThermostat::new(&Settings::default(), now);

        let mut inputs = inputs(ClimateMode::FanOnly, 21.0, 0.0);
        inputs.unit_temperature = 19.0;
        assert_eq!(thermostat.step(&inputs, now), Correction { room_temperature: 19.0, setpoint: None });

        inputs.external_temperature = Some(f64::NAN);
        assert_eq!(thermostat.step(&inputs, now).room_temperature, 19.0);

        inputs.external_temperature = None;
        inputs.unit_temperature = 41.0;
        assert_eq!(thermostat.step(&inputs, now).room_temperature, MAX_ROOM_TEMPERATURE);
    }

    #[test]
    fn test_offsets_sampled_after_fan_settles() {
        let boot = Instant::now();
        let mut thermostat = SmartThermostat::new(&Settings::default(), boot);

        let mut inputs = inputs(ClimateMode::Heat, 21.0, 20.0);
        inputs.unit_temperature = 23.0;
        inputs.fan_speed = 800.0;

        thermostat.step(&inputs, boot + Duration::from_secs(30));
        assert!(thermostat.history().is_empty());

        thermostat.step(&inputs, boot + Duration::from_secs(60));
        assert_eq!(thermostat.history().len(), 1);
        assert_eq!(thermostat.history().median(), 3.0);

        // fan stops, restart the settle timer
        inputs.fan_speed = 0.0;
        thermostat.step(&inputs, boot + Duration::from_secs(90));
        inputs.fan_speed = 800.0;
        thermostat.step(&inputs, boot + Duration::from_secs(120));
        assert_eq!(thermostat.history().len(), 1);
    }

    #[test]
    fn test_runaway_protection() {
        let now = Instant::now();
        let settings = Settings { runaway_protection: true, ..Settings::default() };
        let mut thermostat = SmartThermostat::new(&settings, now);

        // 22 + (22 - 21) * 4 = 26, then pushed past the unit reading of 25
        let mut inputs = inputs(ClimateMode::Heat, 22.0, 21.0);
        inputs.unit_temperature = 25.0;
        assert_eq!(thermostat.step(&inputs, now).setpoint, Some(29));
        assert_eq!(thermostat.runaway(), Bias::Up);

        // inside the band but not close enough to release
        inputs.external_temperature = Some(21.8);
        thermostat.step(&inputs, now);
        assert_eq!(thermostat.runaway(), Bias::Up);

        inputs.external_temperature = Some(21.9);
        thermostat.step(&inputs, now);
        assert_eq!(thermostat.runaway(), Bias::Neutral);

        inputs.external_temperature = Some(23.5);
        thermostat.step(&inputs, now);
        assert_eq!(thermostat.runaway(), Bias::Down);
    }
}
