//! The reactor: a single-threaded readiness loop.
//!
//! One thread runs everything. A `mio::Poll` multiplexes socket readiness,
//! file events are callbacks keyed by (file descriptor, direction), and time
//! events are deadline callbacks on a plain list. Each iteration waits for
//! readiness or the nearest deadline, then dispatches expired time events
//! followed by ready file events. Every callback runs to completion before
//! the loop blocks again, so handlers may freely re-enter the registration
//! APIs — and must never block themselves.
//!
//! mio delivers edge-triggered notifications, so I/O handlers drain their
//! sockets until `WouldBlock`.

use mio::unix::SourceFd;
use mio::{Events, Interest, Poll, Token};
use std::collections::HashMap;
use std::io;
use std::os::unix::io::RawFd;
use std::rc::Rc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

/// Poll-harvest cap per loop iteration.
const EVENT_BATCH: usize = 128;
/// Floor on the multiplexer wait, in milliseconds.
const MIN_WAIT_MS: i64 = 10;
/// Wait horizon when no time event is pending, in milliseconds.
const IDLE_WAIT_MS: i64 = 1000;

/// Current wall-clock time in milliseconds. Every deadline in the server —
/// time events and key expirations alike — is produced by and compared
/// against this one clock.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Readiness directions a file event can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Readable,
    Writable,
}

impl Direction {
    fn interest(self) -> Interest {
        match self {
            Direction::Readable => Interest::READABLE,
            Direction::Writable => Interest::WRITABLE,
        }
    }
}

/// How a time event behaves after firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeKind {
    /// Fires once, then is unlinked.
    Once,
    /// Rescheduled `interval` after each firing.
    Recurring,
}

/// File-event callback. The loop hands itself back so handlers can register
/// and deregister events while running.
pub type FileProc = Rc<dyn Fn(&mut EventLoop, RawFd)>;
/// Time-event callback, receiving the event id.
pub type TimeProc = Rc<dyn Fn(&mut EventLoop, u64)>;

struct FileEvent {
    proc: FileProc,
}

struct TimeEvent {
    id: u64,
    kind: TimeKind,
    /// Absolute deadline in milliseconds.
    when: i64,
    interval: i64,
    proc: TimeProc,
}

pub struct EventLoop {
    poll: Poll,
    events: Events,
    file_events: HashMap<(RawFd, Direction), FileEvent>,
    time_events: Vec<TimeEvent>,
    next_time_id: u64,
    stop: bool,
}

impl EventLoop {
    pub fn new() -> io::Result<Self> {
        Ok(EventLoop {
            poll: Poll::new()?,
            events: Events::with_capacity(EVENT_BATCH),
            file_events: HashMap::new(),
            time_events: Vec::new(),
            next_time_id: 1,
            stop: false,
        })
    }

    /// Subscribes `proc` to readiness of `fd` in direction `dir`.
    ///
    /// Registering a direction that is already subscribed is a no-op. The
    /// first direction for an fd registers it with the multiplexer; a second
    /// one modifies the existing registration so both interests are held at
    /// once.
    pub fn add_file_event(&mut self, fd: RawFd, dir: Direction, proc: FileProc) {
        if self.file_events.contains_key(&(fd, dir)) {
            return;
        }
        let existing = self.registered_interest(fd);
        let combined = match existing {
            None => dir.interest(),
            Some(held) => held | dir.interest(),
        };
        let registry = self.poll.registry();
        let result = match existing {
            None => registry.register(&mut SourceFd(&fd), Token(fd as usize), combined),
            Some(_) => registry.reregister(&mut SourceFd(&fd), Token(fd as usize), combined),
        };
        if let Err(e) = result {
            warn!(fd, ?dir, error = %e, "multiplexer registration failed");
            return;
        }
        self.file_events.insert((fd, dir), FileEvent { proc });
        trace!(fd, ?dir, "file event added");
    }

    /// Drops the (fd, dir) subscription. Removing the last direction held
    /// for the fd detaches it from the multiplexer entirely; removing an
    /// absent one is a no-op.
    pub fn remove_file_event(&mut self, fd: RawFd, dir: Direction) {
        if self.file_events.remove(&(fd, dir)).is_none() {
            return;
        }
        let registry = self.poll.registry();
        let result = match self.registered_interest(fd) {
            None => registry.deregister(&mut SourceFd(&fd)),
            Some(remaining) => {
                registry.reregister(&mut SourceFd(&fd), Token(fd as usize), remaining)
            }
        };
        if let Err(e) = result {
            warn!(fd, ?dir, error = %e, "multiplexer removal failed");
        }
        trace!(fd, ?dir, "file event removed");
    }

    /// Schedules a time event `interval` milliseconds from now. Ids are
    /// handed out monotonically starting at 1.
    pub fn add_time_event(&mut self, kind: TimeKind, interval: i64, proc: TimeProc) -> u64 {
        let id = self.next_time_id;
        self.next_time_id += 1;
        self.time_events.push(TimeEvent {
            id,
            kind,
            when: now_ms() + interval,
            interval,
            proc,
        });
        id
    }

    /// Unlinks a time event immediately. An unknown id is a no-op.
    pub fn remove_time_event(&mut self, id: u64) {
        self.time_events.retain(|te| te.id != id);
    }

    /// Makes the loop exit after the current iteration completes.
    pub fn shutdown(&mut self) {
        self.stop = true;
    }

    /// Runs until [`EventLoop::shutdown`] is called.
    pub fn run(&mut self) {
        while !self.stop {
            let (expired, ready) = self.wait();
            self.process(expired, ready);
        }
    }

    /// Live file-event registrations.
    pub fn file_event_count(&self) -> usize {
        self.file_events.len()
    }

    pub fn has_file_event(&self, fd: RawFd, dir: Direction) -> bool {
        self.file_events.contains_key(&(fd, dir))
    }

    pub fn time_event_count(&self) -> usize {
        self.time_events.len()
    }

    /// Combined interest currently held for `fd`, if any.
    fn registered_interest(&self, fd: RawFd) -> Option<Interest> {
        let mut interest = None;
        for dir in [Direction::Readable, Direction::Writable] {
            if self.file_events.contains_key(&(fd, dir)) {
                interest = Some(match interest {
                    None => dir.interest(),
                    Some(held) => held | dir.interest(),
                });
            }
        }
        interest
    }

    /// Earliest time-event deadline, capped at one idle horizon from now.
    fn nearest_deadline(&self) -> i64 {
        let horizon = now_ms() + IDLE_WAIT_MS;
        self.time_events
            .iter()
            .map(|te| te.when)
            .fold(horizon, i64::min)
    }

    /// One blocking wait. Returns the expired time-event ids and the ready
    /// (fd, direction) pairs, at most [`EVENT_BATCH`] events' worth.
    fn wait(&mut self) -> (Vec<u64>, Vec<(RawFd, Direction)>) {
        let timeout = (self.nearest_deadline() - now_ms()).max(MIN_WAIT_MS);
        if let Err(e) = self
            .poll
            .poll(&mut self.events, Some(Duration::from_millis(timeout as u64)))
        {
            // The loop survives multiplexer hiccups; only the wait is lost.
            if e.kind() != io::ErrorKind::Interrupted {
                warn!(error = %e, "multiplexer wait failed");
            }
            self.events.clear();
        }

        let mut ready = Vec::new();
        for event in self.events.iter() {
            let fd = event.token().0 as RawFd;
            // Hangups surface through the readable path: the next read
            // observes the close.
            if event.is_readable() || event.is_read_closed() {
                ready.push((fd, Direction::Readable));
            }
            if event.is_writable() || event.is_write_closed() {
                ready.push((fd, Direction::Writable));
            }
        }

        let now = now_ms();
        let expired = self
            .time_events
            .iter()
            .filter(|te| te.when <= now)
            .map(|te| te.id)
            .collect();
        (expired, ready)
    }

    /// Dispatches one harvest: time events first, then file events. Each
    /// event is looked up fresh at dispatch time, so anything an earlier
    /// callback removed simply does not fire.
    fn process(&mut self, expired: Vec<u64>, ready: Vec<(RawFd, Direction)>) {
        for id in expired {
            let Some(proc) = self
                .time_events
                .iter()
                .find(|te| te.id == id)
                .map(|te| Rc::clone(&te.proc))
            else {
                continue;
            };
            (*proc)(self, id);

            let kind = self
                .time_events
                .iter()
                .find(|te| te.id == id)
                .map(|te| te.kind);
            match kind {
                Some(TimeKind::Once) => self.remove_time_event(id),
                Some(TimeKind::Recurring) => {
                    let now = now_ms();
                    if let Some(te) = self.time_events.iter_mut().find(|te| te.id == id) {
                        te.when = now + te.interval;
                    }
                }
                None => {}
            }
        }

        for (fd, dir) in ready {
            let Some(proc) = self
                .file_events
                .get(&(fd, dir))
                .map(|fe| Rc::clone(&fe.proc))
            else {
                continue;
            };
            (*proc)(self, fd);
        }
    }
}
