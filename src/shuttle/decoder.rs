//! Report decoding and the device reader loop
//!
//! The decoder keeps the last observed value of every control and turns each
//! report into the list of controls that actually changed. The reader loop
//! runs on its own thread, owns the device, and hands events one by one to
//! the router through a rendezvous channel.

use std::time::Duration;

use crossbeam::channel::{select, Receiver, Sender, TryRecvError};
use tracing::{debug, error, info, trace};

use super::report::Report;
use super::{ReportSource, REPORT_BUFFER_LEN};
use crate::error::SessionError;
use crate::midi::format_hex;

/// One of the five ShuttleXpress buttons, numbered left to right
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ButtonId {
    One = 1,
    Two = 2,
    Three = 3,
    Four = 4,
    Five = 5,
}

impl ButtonId {
    pub const ALL: [ButtonId; 5] = [
        ButtonId::One,
        ButtonId::Two,
        ButtonId::Three,
        ButtonId::Four,
        ButtonId::Five,
    ];

    /// Button number (1-5)
    pub fn number(self) -> u8 {
        self as u8
    }

    pub(crate) fn index(self) -> usize {
        self as usize - 1
    }
}

/// Direction of a single rotary dial step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DialDirection {
    Forward,
    Backward,
}

/// A debounced change of one physical control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    /// Jog wheel moved to a new position (0 is rest)
    Wheel(i8),
    /// Rotary dial moved exactly one step
    Dial(DialDirection),
    /// Button pressed or released
    Button { id: ButtonId, pressed: bool },
}

/// Last observed value per physical control
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceState {
    pub wheel: i8,
    /// None until the first report establishes a baseline
    pub dial: Option<u8>,
    pub buttons: [bool; 5],
}

/// Edge detector over consecutive reports
#[derive(Debug, Default)]
pub struct Decoder {
    state: DeviceState,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Compare a report against the last observed state and return the
    /// changes in report order: wheel, dial, buttons 1-5.
    pub fn decode(&mut self, report: &Report) -> Vec<ControlEvent> {
        let mut events = Vec::new();

        if report.wheel != self.state.wheel {
            self.state.wheel = report.wheel;
            events.push(ControlEvent::Wheel(report.wheel));
        }

        match self.state.dial {
            Some(previous) if previous != report.dial => {
                // Counter wraps at 256; anything but a single step is a missed
                // update or a resync and carries no direction
                match report.dial.wrapping_sub(previous) as i8 {
                    1 => events.push(ControlEvent::Dial(DialDirection::Forward)),
                    -1 => events.push(ControlEvent::Dial(DialDirection::Backward)),
                    delta => trace!("Absorbing dial jump of {}", delta),
                }
                self.state.dial = Some(report.dial);
            },
            Some(_) => {},
            None => {
                trace!("Dial baseline set to {}", report.dial);
                self.state.dial = Some(report.dial);
            },
        }

        for id in ButtonId::ALL {
            let pressed = report.button(id);
            let last = &mut self.state.buttons[id.index()];
            if pressed != *last {
                *last = pressed;
                events.push(ControlEvent::Button { id, pressed });
            }
        }

        events
    }

    /// Restore the fields behind `undelivered` to their values in `previous`,
    /// so those changes are reported again by the next decode.
    pub fn rewind(&mut self, previous: &DeviceState, undelivered: &[ControlEvent]) {
        for event in undelivered {
            match *event {
                ControlEvent::Wheel(_) => self.state.wheel = previous.wheel,
                ControlEvent::Dial(_) => self.state.dial = previous.dial,
                ControlEvent::Button { id, .. } => {
                    self.state.buttons[id.index()] = previous.buttons[id.index()];
                },
            }
        }
    }
}

/// What a reader hands back to the session when it stops
pub struct ReaderExit {
    pub source: Box<dyn ReportSource>,
    pub decoder: Decoder,
    /// Set when polling ended on a read failure
    pub error: Option<SessionError>,
}

/// True once the stop sender has fired or been dropped
fn stop_requested(stop: &Receiver<()>) -> bool {
    !matches!(stop.try_recv(), Err(TryRecvError::Empty))
}

/// Poll the device until stopped, the consumer goes away, or a read fails.
///
/// `events` is expected to be a zero-capacity channel: every event is only
/// considered delivered once the router has taken it.
pub fn run_reader(
    mut source: Box<dyn ReportSource>,
    mut decoder: Decoder,
    events: Sender<ControlEvent>,
    stop: Receiver<()>,
    read_slice: Duration,
) -> ReaderExit {
    let mut buf = [0u8; REPORT_BUFFER_LEN];
    info!("ShuttleXpress reader started");

    let error = 'poll: loop {
        if stop_requested(&stop) {
            debug!("Reader stop requested");
            break None;
        }

        let len = match source.read_report(&mut buf, read_slice) {
            Ok(0) => continue,
            Ok(len) => len,
            Err(e) => {
                error!("{}", e);
                break Some(e);
            },
        };

        trace!("Report: {}", format_hex(&buf[..len]));

        let Some(report) = Report::parse(&buf[..len]) else {
            debug!("Ignoring short report ({} bytes)", len);
            continue;
        };

        let previous = decoder.state().clone();
        let changes = decoder.decode(&report);
        for (i, &event) in changes.iter().enumerate() {
            trace!("Event: {:?}", event);
            let delivered = select! {
                send(events, event) -> res => res.is_ok(),
                recv(stop) -> _ => false,
            };
            if !delivered {
                debug!("Event consumer gone, reader stopping");
                decoder.rewind(&previous, &changes[i..]);
                break 'poll None;
            }
        }
    };

    info!("ShuttleXpress reader stopped");
    ReaderExit {
        source,
        decoder,
        error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam::channel::{bounded, unbounded};
    use proptest::prelude::*;
    use std::collections::VecDeque;

    fn wheel(pos: i8) -> Report {
        Report::parse(&[pos as u8, 0, 0, 0, 0]).unwrap()
    }

    fn dial(counter: u8) -> Report {
        Report::parse(&[0, counter, 0, 0, 0]).unwrap()
    }

    #[test]
    fn test_initial_all_zero_report_emits_nothing() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&Report::default()).is_empty());
        assert_eq!(decoder.state().dial, Some(0));
    }

    #[test]
    fn test_wheel_emits_only_on_change() {
        let mut decoder = Decoder::new();
        assert_eq!(decoder.decode(&wheel(3)), vec![ControlEvent::Wheel(3)]);
        assert!(decoder.decode(&wheel(3)).is_empty());
        assert_eq!(decoder.decode(&wheel(0)), vec![ControlEvent::Wheel(0)]);
    }

    #[test]
    fn test_first_dial_read_sets_baseline_silently() {
        let mut decoder = Decoder::new();
        assert!(decoder.decode(&dial(1)).is_empty());
        assert_eq!(
            decoder.decode(&dial(2)),
            vec![ControlEvent::Dial(DialDirection::Forward)]
        );
    }

    #[test]
    fn test_dial_wraps_in_both_directions() {
        let mut decoder = Decoder::new();
        decoder.decode(&dial(255));
        assert_eq!(
            decoder.decode(&dial(0)),
            vec![ControlEvent::Dial(DialDirection::Forward)]
        );
        assert_eq!(
            decoder.decode(&dial(255)),
            vec![ControlEvent::Dial(DialDirection::Backward)]
        );
    }

    #[test]
    fn test_dial_jump_is_absorbed_but_moves_baseline() {
        let mut decoder = Decoder::new();
        decoder.decode(&dial(10));
        assert!(decoder.decode(&dial(14)).is_empty());
        assert_eq!(decoder.state().dial, Some(14));
        assert_eq!(
            decoder.decode(&dial(13)),
            vec![ControlEvent::Dial(DialDirection::Backward)]
        );
    }

    #[test]
    fn test_button_edges() {
        let mut decoder = Decoder::new();
        let pressed = Report::default().with_button(ButtonId::Three, true);

        assert_eq!(
            decoder.decode(&pressed),
            vec![ControlEvent::Button {
                id: ButtonId::Three,
                pressed: true
            }]
        );
        assert!(decoder.decode(&pressed).is_empty());
        assert_eq!(
            decoder.decode(&Report::default()),
            vec![ControlEvent::Button {
                id: ButtonId::Three,
                pressed: false
            }]
        );
    }

    #[test]
    fn test_events_in_one_report_follow_field_order() {
        let mut decoder = Decoder::new();
        decoder.decode(&dial(7));

        let report = Report::parse(&[0xFE, 8, 0, 0b0001_0000, 1]).unwrap();
        assert_eq!(
            decoder.decode(&report),
            vec![
                ControlEvent::Wheel(-2),
                ControlEvent::Dial(DialDirection::Forward),
                ControlEvent::Button {
                    id: ButtonId::One,
                    pressed: true
                },
                ControlEvent::Button {
                    id: ButtonId::Five,
                    pressed: true
                },
            ]
        );
    }

    proptest! {
        #[test]
        fn prop_wheel_event_iff_position_changed(positions in proptest::collection::vec(any::<i8>(), 1..64)) {
            let mut decoder = Decoder::new();
            let mut previous = 0i8;
            for pos in positions {
                let events = decoder.decode(&wheel(pos));
                if pos != previous {
                    prop_assert_eq!(events, vec![ControlEvent::Wheel(pos)]);
                } else {
                    prop_assert!(events.is_empty());
                }
                previous = pos;
            }
        }

        #[test]
        fn prop_dial_step_only_for_unit_delta(start in any::<u8>(), step in any::<u8>()) {
            let mut decoder = Decoder::new();
            decoder.decode(&dial(start));
            let events = decoder.decode(&dial(start.wrapping_add(step)));
            match step {
                1 => prop_assert_eq!(events, vec![ControlEvent::Dial(DialDirection::Forward)]),
                255 => prop_assert_eq!(events, vec![ControlEvent::Dial(DialDirection::Backward)]),
                _ => prop_assert!(events.is_empty()),
            }
        }
    }

    /// Replays canned reads, then fails or idles depending on `fail_at_end`
    struct ScriptedSource {
        reads: VecDeque<Vec<u8>>,
        fail_at_end: bool,
    }

    impl ReportSource for ScriptedSource {
        fn read_report(
            &mut self,
            buf: &mut [u8],
            timeout: Duration,
        ) -> crate::error::Result<usize> {
            match self.reads.pop_front() {
                Some(data) => {
                    buf[..data.len()].copy_from_slice(&data);
                    Ok(data.len())
                },
                None if self.fail_at_end => {
                    Err(SessionError::DeviceRead("device unplugged".to_string()))
                },
                None => {
                    std::thread::sleep(timeout);
                    Ok(0)
                },
            }
        }
    }

    #[test]
    fn test_reader_delivers_events_in_order_then_reports_read_failure() {
        let source = ScriptedSource {
            reads: VecDeque::from(vec![
                vec![3, 0, 0, 0, 0],
                vec![3, 0, 0, 0, 0],
                vec![1, 2],
                vec![0, 0, 0, 0, 0],
            ]),
            fail_at_end: true,
        };
        let (events_tx, events_rx) = bounded(0);
        let (_stop_tx, stop_rx) = bounded::<()>(0);

        let reader = std::thread::spawn(move || {
            run_reader(
                Box::new(source),
                Decoder::new(),
                events_tx,
                stop_rx,
                Duration::from_millis(5),
            )
        });

        let received: Vec<ControlEvent> = events_rx.iter().collect();
        assert_eq!(
            received,
            vec![ControlEvent::Wheel(3), ControlEvent::Wheel(0)]
        );

        let exit = reader.join().unwrap();
        assert_eq!(
            exit.error,
            Some(SessionError::DeviceRead("device unplugged".to_string()))
        );
        assert_eq!(exit.decoder.state().wheel, 0);
    }

    #[test]
    fn test_reader_stops_when_stop_sender_dropped() {
        let source = ScriptedSource {
            reads: VecDeque::new(),
            fail_at_end: false,
        };
        let (events_tx, _events_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let reader = std::thread::spawn(move || {
            run_reader(
                Box::new(source),
                Decoder::new(),
                events_tx,
                stop_rx,
                Duration::from_millis(5),
            )
        });

        drop(stop_tx);
        let exit = reader.join().unwrap();
        assert!(exit.error.is_none());
    }

    #[test]
    fn test_reader_blocked_on_handoff_observes_stop() {
        let source = ScriptedSource {
            reads: VecDeque::from(vec![vec![5, 0, 0, 0, 0]]),
            fail_at_end: false,
        };
        // Nobody receives: the reader parks in the rendezvous
        let (events_tx, _events_rx) = bounded(0);
        let (stop_tx, stop_rx) = bounded::<()>(0);

        let reader = std::thread::spawn(move || {
            run_reader(
                Box::new(source),
                Decoder::new(),
                events_tx,
                stop_rx,
                Duration::from_millis(5),
            )
        });

        std::thread::sleep(Duration::from_millis(20));
        drop(stop_tx);
        let exit = reader.join().unwrap();
        assert!(exit.error.is_none());
        // The wheel change never reached anyone
        assert_eq!(exit.decoder.state().wheel, 0);

        // A later reader reports it again from the same device position
        let source = ScriptedSource {
            reads: VecDeque::from(vec![vec![5, 0, 0, 0, 0]]),
            fail_at_end: true,
        };
        let (events_tx, events_rx) = bounded(0);
        let (_stop_tx, stop_rx) = bounded::<()>(0);
        let decoder = exit.decoder;
        let reader = std::thread::spawn(move || {
            run_reader(
                Box::new(source),
                decoder,
                events_tx,
                stop_rx,
                Duration::from_millis(5),
            )
        });

        let received: Vec<ControlEvent> = events_rx.iter().collect();
        assert_eq!(received, vec![ControlEvent::Wheel(5)]);
        reader.join().unwrap();
    }

    #[test]
    fn test_rewind_keeps_delivered_changes() {
        let mut decoder = Decoder::new();
        decoder.decode(&dial(7));
        let previous = decoder.state().clone();

        let report = Report::parse(&[0xFE, 8, 0, 0b0001_0000, 0]).unwrap();
        let changes = decoder.decode(&report);
        assert_eq!(changes.len(), 3);

        // Wheel went out, dial step and button press did not
        decoder.rewind(&previous, &changes[1..]);
        assert_eq!(decoder.state().wheel, -2);
        assert_eq!(decoder.state().dial, Some(7));
        assert!(!decoder.state().buttons[0]);

        assert_eq!(
            decoder.decode(&report),
            vec![
                ControlEvent::Dial(DialDirection::Forward),
                ControlEvent::Button {
                    id: ButtonId::One,
                    pressed: true
                },
            ]
        );
    }
}
