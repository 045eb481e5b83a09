use std::time::Instant;

use anyhow::Result;
use clap::Parser;
use colored::{ColoredString, Colorize};
use futures::StreamExt;
use toshiba_hvac_bridge::config::Port;
use toshiba_hvac_bridge::protocol::codec::RxFrame;
use toshiba_hvac_bridge::protocol::registers::{Message, Origin};
use url::Url;


/// Print every frame seen on the link
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// URL of the port to connect to
    ///
    /// either serial:///device/path or tcp+raw://host:port URLs supported
    port: Url,
}


fn describe(frame: &RxFrame) -> ColoredString {
    match frame {
        RxFrame::Data(data) => {
            let bytes = format!("{:02x?}", data.as_bytes());

            match Message::decode(data) {
                Ok(Message::Register { update, origin: Origin::External }) => format!("external {update:?} {bytes}").on_yellow().black(),
                Ok(Message::Register { update, origin: Origin::Internal }) => format!("{update:?} {bytes}").on_green().bright_white(),
                Ok(Message::OutdoorStatus(status)) => format!("outdoor unit: td {} ts {} te {} load {:.1} aux {}", status.td(), status.ts(), status.te(), status.load(), status.aux).on_cyan().bright_white(),
                Ok(Message::IndoorStatus(status)) => format!("indoor unit: tc {} tcj {} fan {}", status.tc(), status.tcj(), status.fan_speed).on_cyan().bright_white(),
                Ok(Message::Unrecognized { len }) => format!("{len} byte frame {bytes}").on_black(),
                Err(err) => format!("{err} {bytes}").on_magenta().bright_white(),
            }
        }
        RxFrame::HandshakeReply(bytes) => format!("handshake reply {bytes:02x?}").on_purple().bright_white(),
        RxFrame::PostHandshakeReply(bytes) => format!("post handshake reply {bytes:02x?}").on_bright_purple().bright_white(),
        RxFrame::Corrupted(err) => format!("{err}").on_red().bright_white(),
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut framed = Port::open(&args.port).await?.framed();

    let start_time = Instant::now();
    let mut last_frame_time: Option<Instant> = None;

    while let Some(frame) = framed.next().await {
        let frame = frame?;

        let now = Instant::now();
        let start_delta_ms = now.duration_since(start_time).as_millis();
        let last_frame_delta_ms = last_frame_time.map_or(0, |last| now.duration_since(last).as_millis());

        println!("[{start_delta_ms:8}, {last_frame_delta_ms:8}] {}", describe(&frame));

        last_frame_time = Some(now);
    }

    Ok(())
}
