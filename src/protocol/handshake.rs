//! Startup sequence: the indoor unit only answers register requests after it
//! has seen both handshake bursts.

use std::time::{Duration, Instant};

use tracing::info;

use super::codec::TxFrame;


pub const IDU_HANDSHAKE: [&[u8]; 6] = [
    &[0x02, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x02],
    &[0x02, 0xff, 0xff, 0x01, 0x00, 0x00, 0x01, 0x02, 0xfe],
    &[0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x02, 0x02, 0xfa],
    &[0x02, 0x00, 0x01, 0x81, 0x01, 0x00, 0x02, 0x00, 0x00, 0x7b],
    &[0x02, 0x00, 0x01, 0x02, 0x00, 0x00, 0x02, 0x00, 0x00, 0xfe],
    &[0x02, 0x00, 0x02, 0x00, 0x00, 0x00, 0x00, 0xfe],
];

pub const IDU_POST_HANDSHAKE: [&[u8]; 2] = [
    &[0x02, 0x00, 0x02, 0x01, 0x00, 0x00, 0x02, 0x00, 0x00, 0xfb],
    &[0x02, 0x00, 0x02, 0x02, 0x00, 0x00, 0x02, 0x00, 0x00, 0xfa],
];

/// Time from boot until the handshake is sent.
pub const HANDSHAKE_DELAY: Duration = Duration::from_secs(10);
pub const POST_HANDSHAKE_DELAY: Duration = Duration::from_secs(3);
pub const FULL_POLL_DELAY: Duration = Duration::from_secs(3);


#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Handshake,
    PostHandshake,
    /// Full poll queued, periodic polling and control may run
    Ready,
}

/// What the bridge has to send when a startup phase ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartupAction {
    Handshake,
    PostHandshake,
    FullPoll,
}

impl StartupAction {
    /// Literal frames to queue. Empty for the full poll, which is built from the register list.
    pub fn frames(self) -> Vec<TxFrame> {
        let frames: &[&[u8]] = match self {
            StartupAction::Handshake => &IDU_HANDSHAKE[..],
            StartupAction::PostHandshake => &IDU_POST_HANDSHAKE[..],
            StartupAction::FullPoll => &[],
        };

        frames.iter().map(|frame| TxFrame::raw(frame)).collect()
    }
}

#[derive(Debug)]
pub struct Startup {
    phase: Phase,
    deadline: Instant,
}

impl Startup {
    pub fn new(now: Instant) -> Self {
        Startup {
            phase: Phase::Idle,
            deadline: now + HANDSHAKE_DELAY,
        }
    }

    /// Move to the next phase once its deadline has passed.
    pub fn advance(&mut self, now: Instant) -> Option<StartupAction> {
        if self.phase == Phase::Ready || now < self.deadline {
            return None;
        }

        let (next, delay, action) = match self.phase {
            Phase::Idle => (Phase::Handshake, POST_HANDSHAKE_DELAY, StartupAction::Handshake),
            Phase::Handshake => (Phase::PostHandshake, FULL_POLL_DELAY, StartupAction::PostHandshake),
            Phase::PostHandshake => (Phase::Ready, Duration::ZERO, StartupAction::FullPoll),
            Phase::Ready => return None,
        };

        info!(?next, "startup");
        self.phase = next;
        self.deadline = now + delay;

        Some(action)
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The initial full poll has been queued.
    pub fn is_ready(&self) -> bool {
        self.phase == Phase::Ready
    }
}
