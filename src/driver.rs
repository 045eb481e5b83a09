use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::controller::{Control, Controller};
use crate::protocol::codec::RX_BATCH;


/// Period of the controller tick.
pub const TICK_INTERVAL: Duration = Duration::from_millis(10);


/// Pump bytes between `link` and `controller` until the link fails or closes.
///
/// Controls arrive on `controls`. The bridge keeps running if that channel closes.
pub async fn run<L>(mut link: L, mut controller: Controller, mut controls: mpsc::Receiver<Control>) -> Result<()>
where
    L: AsyncRead + AsyncWrite + Unpin,
{
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut buf = [0u8; RX_BATCH];
    let mut controls_open = true;

    loop {
        // inbound bytes are always taken before the tick may transmit
        tokio::select! {
            biased;

            read = link.read(&mut buf) => {
                let len = read.context("failed to read from link")?;
                if len == 0 {
                    bail!("link closed");
                }

                controller.receive(&buf[..len], Instant::now());
            }
            _ = ticker.tick() => {
                if let Some(frame) = controller.tick(Instant::now()) {
                    link.write_all(frame.as_bytes()).await
                        .context("failed to write to link")?;
                }
            }
            control = controls.recv(), if controls_open => {
                match control {
                    Some(control) => {
                        if let Err(err) = controller.control(control) {
                            warn!(?control, "{err}");
                        }
                    }
                    None => {
                        info!("control channel closed");
                        controls_open = false;
                    }
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use crate::config::Settings;
    use crate::protocol::handshake::{HANDSHAKE_DELAY, IDU_HANDSHAKE};

    use super::*;

    #[tokio::test]
    async fn test_sends_handshake_and_stops_on_close() {
        let boot = Instant::now().checked_sub(HANDSHAKE_DELAY).unwrap();
        let (controller, _events) = Controller::new(Settings::default(), boot);

        let (mut device, link) = tokio::io::duplex(256);
        let (controls, controls_recv) = mpsc::channel(4);
        drop(controls);

        let bridge = tokio::spawn(run(link, controller, controls_recv));

        let mut frame = vec![0u8; IDU_HANDSHAKE[0].len()];
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, IDU_HANDSHAKE[0]);

        drop(device);
        let result = bridge.await.unwrap();
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pending_bytes_hold_back_transmit() {
        let boot = Instant::now().checked_sub(HANDSHAKE_DELAY).unwrap();
        let (controller, _events) = Controller::new(Settings::default(), boot);

        let (mut device, link) = tokio::io::duplex(256);
        let (_controls, controls_recv) = mpsc::channel(4);

        // the unit has started a reply before the bridge gets to run
        device.write_all(&[0x02, 0x00, 0x03]).await.unwrap();

        let bridge = tokio::spawn(run(link, controller, controls_recv));

        let mut frame = vec![0u8; IDU_HANDSHAKE[0].len()];
        let early = tokio::time::timeout(Duration::from_millis(150), device.read_exact(&mut frame)).await;
        assert!(early.is_err(), "sent while a partial frame was buffered");

        // once the partial frame times out the handshake goes out
        device.read_exact(&mut frame).await.unwrap();
        assert_eq!(frame, IDU_HANDSHAKE[0]);

        bridge.abort();
    }
}
