use std::time::Instant;

use anyhow::{bail, Result};
use async_broadcast::RecvError;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use toshiba_hvac_bridge::config::{Port, Settings};
use toshiba_hvac_bridge::controller::{Control, Controller};
use toshiba_hvac_bridge::{driver, logging};


/// Bridge for Toshiba indoor units on their serial interface
///
/// Settings are changed by writing `<setting> <value>` lines to stdin, e.g.
/// `mode heat`, `target 21.5`, `fan auto`, `swing vertical`, `special eco`,
/// `power 75`, `ionizer on`, `sensor 20.4` or `thermistor internal`.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,

    #[command(flatten)]
    settings: Settings,

    /// Regulate on the unit's own thermistor instead of an external sensor
    #[arg(long)]
    internal_thermistor: bool,

    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(&args.log_level)?;

    let link = Port::open(&args.port).await?.link();

    let (mut controller, mut events) = Controller::new(args.settings, Instant::now());
    controller.control(Control::InternalThermistor(args.internal_thermistor))?;

    let (controls, controls_recv) = mpsc::channel(16);

    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(?event, "state"),
                Err(RecvError::Overflowed(missed)) => warn!(missed, "event log lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::spawn(async move {
        if let Err(err) = console(controls).await {
            warn!("console stopped: {err:#}");
        }
    });

    driver::run(link, controller, controls_recv).await
}

async fn console(controls: mpsc::Sender<Control>) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_control(&line) {
            Ok(control) => controls.send(control).await?,
            Err(err) => warn!("{err:#}"),
        }
    }

    Ok(())
}

fn parse_switch(value: &str) -> Result<bool> {
    match value {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on or off, got {other:?}"),
    }
}

fn parse_control(line: &str) -> Result<Control> {
    let mut words = line.split_whitespace();

    let (Some(setting), Some(value), None) = (words.next(), words.next(), words.next()) else {
        bail!("expected `<setting> <value>`, got {line:?}");
    };

    let control = match setting {
        "mode" => Control::Mode(value.parse()?),
        "target" => Control::TargetTemperature(value.parse()?),
        "fan" => Control::FanMode(value.parse()?),
        "swing" => Control::SwingMode(value.parse()?),
        "special" => Control::SpecialMode(value.parse()?),
        "power" => Control::PowerSelection(value.parse()?),
        "ionizer" => Control::Ionizer(parse_switch(value)?),
        "sensor" => match value {
            "none" => Control::ExternalTemperature(None),
            value => Control::ExternalTemperature(Some(value.parse()?)),
        },
        "thermistor" => match value {
            "internal" => Control::InternalThermistor(true),
            "external" => Control::InternalThermistor(false),
            other => bail!("expected internal or external, got {other:?}"),
        },
        other => bail!("unknown setting {other:?}"),
    };

    Ok(control)
}


#[cfg(test)]
mod tests {
    use toshiba_hvac_bridge::device::ClimateMode;
    use toshiba_hvac_bridge::protocol::registers::{FanMode, PowerSelection, SpecialMode, SwingMode};

    use super::*;

    #[test]
    fn test_parse_control() {
        assert_eq!(parse_control("mode heat").unwrap(), Control::Mode(ClimateMode::Heat));
        assert_eq!(parse_control("mode fan-only").unwrap(), Control::Mode(ClimateMode::FanOnly));
        assert_eq!(parse_control("target 21.5").unwrap(), Control::TargetTemperature(21.5));
        assert_eq!(parse_control("fan low-medium").unwrap(), Control::FanMode(FanMode::LowMedium));
        assert_eq!(parse_control("swing vertical").unwrap(), Control::SwingMode(SwingMode::Vertical));
        assert_eq!(parse_control("special eight-degrees").unwrap(), Control::SpecialMode(SpecialMode::EightDegrees));
        assert_eq!(parse_control("power 50").unwrap(), Control::PowerSelection(PowerSelection::Percent50));
        assert_eq!(parse_control("ionizer off").unwrap(), Control::Ionizer(false));
        assert_eq!(parse_control("sensor none").unwrap(), Control::ExternalTemperature(None));
        assert_eq!(parse_control("  sensor   20.25 ").unwrap(), Control::ExternalTemperature(Some(20.25)));
        assert_eq!(parse_control("thermistor internal").unwrap(), Control::InternalThermistor(true));
    }

    #[test]
    fn test_parse_control_errors() {
        assert!(parse_control("mode").is_err());
        assert!(parse_control("mode heat now").is_err());
        assert!(parse_control("mode auto").is_err());
        assert!(parse_control("volume 11").is_err());
        assert!(parse_control("ionizer maybe").is_err());
    }
}
