use std::collections::HashMap;

use anyhow::Result;
use clap::Parser;
use futures::{SinkExt, TryStreamExt};
use rand::Rng;
use tokio::net::TcpListener;
use tokio_util::codec::Framed;
use toshiba_hvac_bridge::config::PortStream;
use toshiba_hvac_bridge::logging;
use toshiba_hvac_bridge::protocol::codec::{FrameError, RxFrame, ToshibaCodec, TxFrame};
use toshiba_hvac_bridge::protocol::handshake::IDU_POST_HANDSHAKE;
use toshiba_hvac_bridge::protocol::registers::{
    encode_register_report, encode_status_report, FanMode, Ionizer, Mode, Origin, PowerSelection, PowerState,
    Register, SpecialMode, SwingMode,
};
use tracing::{debug, info, warn};


/// Emulator for a Toshiba indoor unit
///
/// Answers handshakes and register reads and writes like the real unit,
/// with a room temperature that drifts towards the target while running.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to accept bridge connections on
    #[arg(default_value = "127.0.0.1:3456")]
    listen: String,
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init("info")?;

    let listener = TcpListener::bind(&args.listen).await?;
    info!("listening on {}", listener.local_addr()?);

    loop {
        let (stream, peer) = listener.accept().await?;
        stream.set_nodelay(true)?;
        info!(%peer, "bridge connected");

        tokio::spawn(async move {
            let framed: Box<dyn PortStream> = Box::new(Framed::new(stream, ToshibaCodec::new()));

            match indoor_unit_emulator(framed).await {
                Ok(()) => info!(%peer, "bridge disconnected"),
                Err(err) => warn!(%peer, "connection failed: {err:#}"),
            }
        });
    }
}


struct IndoorUnit {
    registers: HashMap<Register, u8>,
    room_temperature: f32,
}

impl IndoorUnit {
    fn new() -> Self {
        let registers: HashMap<Register, u8> = HashMap::from([
            (Register::PowerState, PowerState::Off.into()),
            (Register::Mode, Mode::Heat.into()),
            (Register::TargetTemperature, 21),
            (Register::FanMode, FanMode::Auto.into()),
            (Register::SwingMode, SwingMode::Off.into()),
            (Register::SpecialMode, SpecialMode::Standard.into()),
            (Register::PowerSelection, PowerSelection::Percent100.into()),
            (Register::Ionizer, Ionizer::Off.into()),
            (Register::OutdoorTemperature, 8),
        ]);

        IndoorUnit {
            registers,
            room_temperature: 19.0,
        }
    }

    fn is_running(&self) -> bool {
        self.registers.get(&Register::PowerState) == Some(&PowerState::On.into())
    }

    /// Move the room temperature a little, towards the target while running.
    fn drift(&mut self) {
        let mut rng = rand::thread_rng();
        let noise = rng.gen_range(-0.2..=0.2);

        let pull = match self.registers.get(&Register::TargetTemperature) {
            Some(target) if self.is_running() => (f32::from(*target) - self.room_temperature).clamp(-0.3, 0.3),
            _ => 0.0,
        };

        self.room_temperature += pull + noise;
    }

    fn read(&mut self, register: Register) -> TxFrame {
        let mut rng = rand::thread_rng();

        match register {
            Register::RoomTemperature => {
                self.drift();
                encode_register_report(register, self.room_temperature.round() as i8 as u8, Origin::Internal)
            }
            Register::IndoorStatus => {
                let fan = if self.is_running() { rng.gen_range(90..=180) } else { 0 };
                let coil = (self.room_temperature as i8).saturating_add(rng.gen_range(5..=15));
                encode_status_report(register, &[coil as u8, coil.saturating_sub(3) as u8, fan])
            }
            Register::OutdoorStatus => {
                let load = if self.is_running() { rng.gen_range(20..=120) } else { 0 };
                encode_status_report(register, &[55, 2, (-3i8) as u8, load, 0, 0, rng.gen_range(0..=68)])
            }
            register => {
                let value = self.registers.get(&register).copied().unwrap_or_default();
                encode_register_report(register, value, Origin::Internal)
            }
        }
    }

    fn write(&mut self, register: Register, value: u8) -> TxFrame {
        info!(%register, value, "write");
        self.registers.insert(register, value);

        encode_register_report(register, value, Origin::Internal)
    }
}


pub async fn indoor_unit_emulator(mut port: Box<dyn PortStream>) -> Result<()> {
    info!("starting indoor unit");

    let mut unit = IndoorUnit::new();

    loop {
        let frame = if let Some(frame) = port.try_next().await? { frame } else {
            // stream reached the end
            return Ok(())
        };

        let resp = match frame {
            RxFrame::Data(frame) => {
                let bytes = frame.as_bytes();
                let Some(&command) = bytes.get(12) else {
                    warn!(?frame, "short frame");
                    continue;
                };

                let register = match Register::try_from(command) {
                    Ok(register) => register,
                    Err(command) => {
                        warn!("unknown register {command:#04x}");
                        continue;
                    }
                };

                match bytes.len() {
                    14 => unit.read(register),
                    15 => unit.write(register, bytes[13]),
                    len => {
                        warn!(len, "unexpected request");
                        continue;
                    }
                }
            }
            // handshake frames don't carry the data header
            RxFrame::Corrupted(FrameError::InvalidHeader { frame }) => {
                let reply = if IDU_POST_HANDSHAKE.iter().any(|post| *post == frame.as_slice()) { 0x82 } else { 0x80 };
                debug!("handshake {frame:02x?}");

                TxFrame::sealed(vec![0x02, 0x00, 0x01, reply, 0x00, 0x00, 0x00])
            }
            other => {
                warn!(?other, "ignoring");
                continue;
            }
        };

        port.send(resp).await?;
    }
}
