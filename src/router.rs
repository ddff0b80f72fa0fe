//! Event router
//!
//! Translates decoded ShuttleXpress events into controller commands using a
//! fixed table, then forwards them to the dispatcher mailbox.
//!
//! | event                  | controller | value              | sustain |
//! |------------------------|------------|--------------------|---------|
//! | wheel 1..=7            | 0          | 18 * (8 - pos)     | yes     |
//! | wheel -7..=-1          | 1          | 18 * -pos          | yes     |
//! | wheel at rest          | 0 and 1    | 255 (release)      | no      |
//! | dial forward/backward  | 2          | 2 / 1              | no      |
//! | button 1..=5           | 3..=7      | 127 pressed, 0 up  | no      |

use crossbeam::channel::{select, Receiver};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatcher::Command;
use crate::shuttle::{ControlEvent, DialDirection};

/// Controller driven by the wheel turned forward
pub const WHEEL_FORWARD_CC: u8 = 0;
/// Controller driven by the wheel turned backward
pub const WHEEL_BACKWARD_CC: u8 = 1;
/// Controller driven by the rotary dial
pub const DIAL_CC: u8 = 2;
/// Button n maps to controller `BUTTON_BASE_CC + n`
pub const BUTTON_BASE_CC: u8 = 2;

/// Value telling the receiver the wheel was released
pub const RELEASE: u8 = 255;
/// Value step per wheel position
pub const WHEEL_STEP: u8 = 18;

const DIAL_FORWARD: u8 = 2;
const DIAL_BACKWARD: u8 = 1;
const BUTTON_PRESSED: u8 = 127;
const BUTTON_RELEASED: u8 = 0;

/// Commands produced for one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Routed {
    Single(Command),
    Pair(Command, Command),
}

impl IntoIterator for Routed {
    type Item = Command;
    type IntoIter = std::iter::Flatten<std::array::IntoIter<Option<Command>, 2>>;

    fn into_iter(self) -> Self::IntoIter {
        let commands = match self {
            Routed::Single(a) => [Some(a), None],
            Routed::Pair(a, b) => [Some(a), Some(b)],
        };
        commands.into_iter().flatten()
    }
}

/// Map one event to its commands
pub fn route(event: ControlEvent) -> Routed {
    match event {
        // Forward scale is inverted: the receiver tunes faster on smaller values
        ControlEvent::Wheel(pos @ 1..=7) => Routed::Single(Command::sustained(
            WHEEL_FORWARD_CC,
            WHEEL_STEP * (8 - pos as u8),
        )),
        ControlEvent::Wheel(pos @ -7..=-1) => Routed::Single(Command::sustained(
            WHEEL_BACKWARD_CC,
            WHEEL_STEP * pos.unsigned_abs(),
        )),
        ControlEvent::Wheel(_) => Routed::Pair(
            Command::once(WHEEL_FORWARD_CC, RELEASE),
            Command::once(WHEEL_BACKWARD_CC, RELEASE),
        ),
        ControlEvent::Dial(DialDirection::Forward) => {
            Routed::Single(Command::once(DIAL_CC, DIAL_FORWARD))
        },
        ControlEvent::Dial(DialDirection::Backward) => {
            Routed::Single(Command::once(DIAL_CC, DIAL_BACKWARD))
        },
        ControlEvent::Button { id, pressed } => Routed::Single(Command::once(
            BUTTON_BASE_CC + id.number(),
            if pressed { BUTTON_PRESSED } else { BUTTON_RELEASED },
        )),
    }
}

/// Consume events until the reader goes away, a stop is signalled, or the
/// dispatcher closes its mailbox.
///
/// Runs on a plain thread: `blocking_send` parks while the mailbox is full.
pub fn run_router(
    events: Receiver<ControlEvent>,
    stop: Receiver<()>,
    mailbox: mpsc::Sender<Command>,
) {
    info!("Router started");

    loop {
        // None when the reader hung up or a stop was signalled
        let event = select! {
            recv(events) -> event => event.ok(),
            recv(stop) -> _ => None,
        };
        let Some(event) = event else {
            debug!("Router stopping");
            break;
        };

        for command in route(event) {
            if mailbox.blocking_send(command).is_err() {
                warn!("Dispatcher gone, dropping {:?}", command);
                info!("Router stopped");
                return;
            }
        }
    }

    info!("Router stopped");
}
