use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

pub type NetworkResult<T> = Result<T, NetworkError>;

/// Networking errors are either transient ("try again on the next
/// iteration") or fatal to the current session.
#[derive(Debug, Eq, PartialEq)]
pub enum NetworkError {
    Wait,
    Fatal(ErrorType),
}

#[derive(Debug, Eq, PartialEq)]
pub enum ErrorType {
    EmptyPacket,
    PacketTooLarge,
    ProtocolMismatch,
    UnknownCommand(u8),
    Io(io::ErrorKind),
}

impl From<io::Error> for NetworkError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::WouldBlock => NetworkError::Wait,
            kind => NetworkError::Fatal(ErrorType::Io(kind)),
        }
    }
}

/// A shared boolean with atomic visibility. One instance each for the
/// connection state, the codec task gates and the session gate; cheap to
/// clone and hand to whichever task needs it.
#[derive(Clone)]
pub struct Flag(Arc<AtomicBool>);

impl Flag {
    #[inline]
    pub fn new(value: bool) -> Flag {
        Flag(Arc::new(AtomicBool::new(value)))
    }

    #[inline]
    pub fn set(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Tracks the last sign of life from the ping producer. The producer
/// touches it on every enqueue; the manager restarts the producer once it
/// has been idle for too long.
#[derive(Clone)]
pub struct Watchdog(Arc<Mutex<Instant>>);

impl Watchdog {
    pub fn new() -> Watchdog {
        Watchdog(Arc::new(Mutex::new(Instant::now())))
    }

    pub fn touch(&self) {
        *self.0.lock().expect("Watchdog lock poisoned") = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.0.lock().expect("Watchdog lock poisoned").elapsed()
    }
}

/// Sleeps up to `total`, waking early once `condition` turns false, so a
/// task never waits out a full sleep period during teardown.
pub fn sleep_while<F: Fn() -> bool>(total: Duration, condition: F) {
    const SLICE: Duration = Duration::from_millis(50);

    let deadline = Instant::now() + total;

    while condition() {
        let now = Instant::now();

        if now >= deadline {
            break;
        }

        thread::sleep(SLICE.min(deadline - now));
    }
}
