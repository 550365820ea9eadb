use crate::events::EventsHandler;
use crate::net::codec::Codec;
use crate::net::queue::PacketQueues;
use crate::net::support::{self, Flag, NetworkError, NetworkResult, Watchdog};
use radkit::logging;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Socket read size per session iteration.
const RECV_BUFFER_SIZE: usize = 1024;
/// The ping producer gets restarted after this many ping periods of
/// watchdog silence.
const WATCHDOG_TIMEOUT_FACTOR: u32 = 100;

/// Timing knobs for the manager loop. The defaults match the radar
/// protocol's expected pacing; tests shrink them.
#[derive(Debug, Clone)]
pub struct Timing {
    /// Sleep between session-loop iterations, which also paces outbound
    /// traffic to one packet per period.
    pub ping_time: Duration,
    /// Wait between endpoint checks while unconfigured.
    pub idle_delay: Duration,
    /// Back-off before a reconnect attempt.
    pub reconnect_delay: Duration,
}

impl Default for Timing {
    fn default() -> Timing {
        Timing {
            ping_time: Duration::from_secs(1),
            idle_delay: Duration::from_secs(3),
            reconnect_delay: Duration::from_secs(15),
        }
    }
}

impl Timing {
    /// Default timing with the iteration sleep taken from the settings
    /// file. Unusable values keep the default.
    pub fn with_ping_time(seconds: f64) -> Timing {
        let mut timing = Timing::default();

        if seconds.is_finite() && seconds > 0.0 {
            timing.ping_time = Duration::from_secs_f64(seconds);
        }

        timing
    }
}

/// Per-session count of socket anomalies. Increments come one at a time;
/// a successful read pays down five at once. A sick Umirs answers pings
/// only sporadically while flooding empty reads, so anomalies accrue
/// faster than they pay down and the session recycles even though the OS
/// still reports the socket open.
pub struct ErrorCounter {
    count: u32,
    decrement: u32,
    limit: u32,
}

impl ErrorCounter {
    pub fn new() -> ErrorCounter {
        ErrorCounter::with_limits(5, 150)
    }

    /// Custom pay-down and trip point, for tests.
    pub fn with_limits(decrement: u32, limit: u32) -> ErrorCounter {
        ErrorCounter {
            count: 0,
            decrement,
            limit,
        }
    }

    pub fn increase(&mut self) {
        self.count += 1;
    }

    pub fn decrease(&mut self) {
        self.count = self.count.saturating_sub(self.decrement);
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn is_max(&self) -> bool {
        self.count > self.limit
    }

    pub fn count(&self) -> u32 {
        self.count
    }
}

struct Endpoint {
    host: Option<String>,
    port: Option<u16>,
}

/// Owns the TCP session with the radar server: connects once an endpoint
/// is configured, pumps the packet queues through the socket, recycles
/// the link when the peer goes quiet, and retries forever.
pub struct Client {
    endpoint: Mutex<Endpoint>,
    queues: Arc<PacketQueues>,
    codec: Arc<Codec>,

    /// Connection state published to the decoder; cleared on teardown.
    connection: Flag,
    /// Session gate; cleared by `configure` or the codec on a protocol
    /// mismatch.
    session: Flag,
    /// Stops the outer loop.
    shutdown: Flag,
    watchdog: Watchdog,

    timing: Timing,
    log: logging::Logger,
}

impl Client {
    /// Wires up the whole driver: queues, codec and manager sharing one
    /// set of flags. Commands go through `codec()`; the manager idles
    /// until `configure` supplies an endpoint.
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        events: Arc<dyn EventsHandler>,
        server_id: u8,
        timing: Timing,
        log: L,
    ) -> Client {
        let client_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        let queues = Arc::new(PacketQueues::new());
        let connection = Flag::new(false);
        let session = Flag::new(false);
        let watchdog = Watchdog::new();

        let codec = Arc::new(Codec::new(
            Arc::clone(&queues),
            events,
            connection.clone(),
            session.clone(),
            watchdog.clone(),
            server_id,
            &client_log,
        ));

        Client {
            endpoint: Mutex::new(Endpoint {
                host: None,
                port: None,
            }),
            queues,
            codec,
            connection,
            session,
            shutdown: Flag::new(false),
            watchdog,
            timing,
            log: client_log,
        }
    }

    /// The protocol engine, for issuing commands from other subsystems.
    pub fn codec(&self) -> &Arc<Codec> {
        &self.codec
    }

    /// Points the driver at a new endpoint. The running session notices
    /// the dropped gate at its next iteration; both queues are emptied
    /// right away and the next session leads with the hello frame.
    pub fn configure(&self, host: Option<String>, port: Option<u16>) {
        logging::info!(self.log, "endpoint reconfigured";
                       "context" => "configure",
                       "host" => host.as_ref().map(String::as_str).unwrap_or("<unset>"),
                       "port" => port.unwrap_or(0));

        {
            let mut endpoint = self.endpoint.lock().expect("Endpoint lock poisoned");
            endpoint.host = host;
            endpoint.port = port;
        }

        self.session.clear();
        self.queues.clear_all();
    }

    /// Stops the manager loop and the current session.
    pub fn stop(&self) {
        self.shutdown.set();
        self.session.clear();
    }

    /// Runs the manager until `stop`. Connect failures and dead sessions
    /// all funnel into the reconnect back-off.
    pub fn run(&self) {
        logging::info!(self.log, "client started"; "context" => "run");

        while !self.shutdown.is_set() {
            let address = match self.address() {
                Some(address) => address,
                None => {
                    logging::info!(self.log, "endpoint not configured"; "context" => "run");
                    support::sleep_while(self.timing.idle_delay, || !self.shutdown.is_set());
                    continue;
                }
            };

            logging::info!(self.log, "connecting"; "context" => "run", "address" => &address);

            match TcpStream::connect(address.as_str()) {
                Ok(stream) => self.run_session(stream),
                Err(error) => {
                    logging::error!(self.log, "connect failed";
                                    "context" => "run",
                                    "address" => &address,
                                    "error" => ?error);
                }
            }

            support::sleep_while(self.timing.reconnect_delay, || !self.shutdown.is_set());
        }

        logging::info!(self.log, "client stopped"; "context" => "run");
    }

    fn address(&self) -> Option<String> {
        let endpoint = self.endpoint.lock().expect("Endpoint lock poisoned");

        match (&endpoint.host, endpoint.port) {
            (Some(host), Some(port)) => Some(format!("{}:{}", host, port)),
            _ => None,
        }
    }

    /// One TCP session, from a fresh socket to teardown.
    fn run_session(&self, stream: TcpStream) {
        if let Err(error) = stream.set_nonblocking(true) {
            logging::error!(self.log, "failed to switch socket to non-blocking";
                            "context" => "session", "error" => ?error);
            return;
        }

        logging::info!(self.log, "session opened"; "context" => "session");

        // The decoder raises the connection flag once the peer answers
        // the handshake.
        self.connection.clear();
        self.session.set();

        self.queues.clear_all();
        self.codec.hello();
        self.watchdog.touch();
        Codec::start_tasks(&self.codec);

        let mut stream = stream;
        let mut errors = ErrorCounter::new();
        let mut first_iteration = true;

        while self.session.is_set() && !self.shutdown.is_set() {
            let packet = if first_iteration {
                first_iteration = false;
                self.queues.take_hello()
            } else {
                self.queues.pop_outbound()
            };

            if let Some(packet) = packet {
                match self.send(&mut stream, &packet) {
                    Ok(()) => {}
                    // The frame is lost; the peer treats the next ping as
                    // current state anyway.
                    Err(NetworkError::Wait) => errors.increase(),
                    Err(NetworkError::Fatal(error)) => {
                        logging::error!(self.log, "send failed";
                                        "context" => "session", "error" => ?error);
                        break;
                    }
                }
            }

            match self.receive(&mut stream) {
                Ok(0) => {
                    logging::info!(self.log, "peer closed the connection"; "context" => "session");
                    break;
                }
                Ok(_) => errors.decrease(),
                Err(NetworkError::Wait) => errors.increase(),
                Err(NetworkError::Fatal(error)) => {
                    logging::error!(self.log, "receive failed";
                                    "context" => "session", "error" => ?error);
                    break;
                }
            }

            if self.watchdog.idle_for() > self.timing.ping_time * WATCHDOG_TIMEOUT_FACTOR {
                logging::info!(self.log, "ping producer went quiet";
                               "context" => "session", "idle" => ?self.watchdog.idle_for());
                self.watchdog.touch();
                Codec::restart_ping(&self.codec);
            }

            if errors.is_max() {
                logging::info!(self.log, "too many socket anomalies";
                               "context" => "session", "errors" => errors.count());
                break;
            }

            support::sleep_while(self.timing.ping_time, || {
                self.session.is_set() && !self.shutdown.is_set()
            });
        }

        self.codec.stop_tasks();
        self.connection.clear();

        logging::info!(self.log, "session closed"; "context" => "session");
        // The socket drops here.
    }

    fn send(&self, stream: &mut TcpStream, packet: &[u8]) -> NetworkResult<()> {
        let sent = stream.write(packet)?;

        logging::trace!(self.log, "packet sent";
                        "context" => "session", "length" => packet.len(), "sent" => sent);

        Ok(())
    }

    fn receive(&self, stream: &mut TcpStream) -> NetworkResult<usize> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];

        let received = stream.read(&mut buffer)?;

        if received > 0 {
            logging::trace!(self.log, "chunk received";
                            "context" => "session", "length" => received);
            self.queues.push_inbound(buffer[..received].to_vec());
        }

        Ok(received)
    }
}
