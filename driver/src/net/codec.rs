use crate::events::EventsHandler;
use crate::net::frame::{self, command, Event};
use crate::net::queue::PacketQueues;
use crate::net::support::{self, ErrorType, Flag, NetworkError, NetworkResult, Watchdog};
use byteorder::{BigEndian, WriteBytesExt};
use radkit::logging;
use std::mem;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

/// Pause between keep-alive status requests.
const PING_DELAY: Duration = Duration::from_secs(3);
/// Every fifth ping also refreshes the hello slot.
const PINGS_PER_HELLO: u32 = 5;
/// Decoder nap when the inbound queue runs dry.
const DECODE_IDLE_DELAY: Duration = Duration::from_millis(500);

/// The protocol engine for one server: encodes command packets onto the
/// outbound queue, reassembles and decodes the inbound byte stream, and
/// runs the keep-alive producer. The connection manager drives the task
/// lifecycle; commands may be issued from any thread.
pub struct Codec {
    sequence: AtomicU8,
    server_id: AtomicU8,
    queues: Arc<PacketQueues>,
    events: Arc<dyn EventsHandler>,

    /// Connection state; raised here on handshake, cleared by the manager.
    connection: Flag,
    /// Session gate owned by the manager; cleared here on a protocol
    /// mismatch to force a recycle.
    session: Flag,
    /// Gates both codec tasks.
    live: Flag,
    /// Gates the ping producer alone, so it can be restarted on its own.
    ping_live: Flag,
    watchdog: Watchdog,

    ping_task: Mutex<Option<JoinHandle<()>>>,
    decode_task: Mutex<Option<JoinHandle<()>>>,

    log: logging::Logger,
}

impl Codec {
    pub fn new<'a, L: Into<Option<&'a logging::Logger>>>(
        queues: Arc<PacketQueues>,
        events: Arc<dyn EventsHandler>,
        connection: Flag,
        session: Flag,
        watchdog: Watchdog,
        server_id: u8,
        log: L,
    ) -> Codec {
        let codec_log = match log.into() {
            Some(log) => log.new(logging::o!()),
            _ => logging::Logger::root(logging::Discard, logging::o!()),
        };

        Codec {
            sequence: AtomicU8::new(0),
            server_id: AtomicU8::new(server_id),
            queues,
            events,
            connection,
            session,
            live: Flag::new(false),
            ping_live: Flag::new(false),
            watchdog,
            ping_task: Mutex::new(None),
            decode_task: Mutex::new(None),
            log: codec_log,
        }
    }

    /// Stamps the next packet sequence number: 1, 2, …, 255, 0, 1, …
    /// The counter itself stays one step behind the stamped value.
    #[inline]
    fn next_sequence(&self) -> u8 {
        self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    /// Builds the 9-byte header shared by every outbound packet.
    fn make_packet(&self, total: u16, command_code: u8, payload_len: u16) -> Vec<u8> {
        debug_assert!(usize::from(total) <= frame::MAX_PACKET_SIZE);

        let mut packet = Vec::with_capacity(usize::from(total));

        packet.write_u8(frame::TO_SERVER).expect("Error writing direction");
        packet.write_u16::<BigEndian>(total).expect("Error writing length");
        packet.write_u8(self.next_sequence()).expect("Error writing sequence");
        packet.write_u8(frame::CLIENT_ID).expect("Error writing client id");
        packet
            .write_u8(self.server_id.load(Ordering::Relaxed))
            .expect("Error writing server id");
        packet.write_u8(command_code).expect("Error writing command");
        packet
            .write_u16::<BigEndian>(payload_len)
            .expect("Error writing payload length");

        packet
    }
}

impl Codec {
    /// Builds the handshake frame, parks it in the hello slot, and returns
    /// it. The manager sends it ahead of everything else on a new session.
    pub fn hello(&self) -> Vec<u8> {
        let mut packet = self.make_packet(0x0A, command::HELLO, 1);
        packet.push(frame::PROTOCOL_VERSION);

        self.queues.set_hello(packet.clone());

        logging::debug!(self.log, "hello slot refreshed";
                        "context" => "encode",
                        "server_id" => self.server_id.load(Ordering::Relaxed));

        packet
    }

    /// Builds a status request. Not enqueued here: the ping producer owns
    /// the pacing of these.
    pub fn get_server_status(&self, format_status: u8) -> Vec<u8> {
        let mut packet = self.make_packet(0x0A, command::GET_SERVER_STATUS, 1);
        packet.push(format_status);

        packet
    }

    /// Forces capture and pursuit of the given track.
    pub fn capture_and_follow(&self, track_id: u16, capture: bool) -> Vec<u8> {
        let mut packet = self.make_packet(0x0C, command::CAPTURE_AND_FOLLOW, 3);
        packet
            .write_u16::<BigEndian>(track_id)
            .expect("Error writing track id");
        packet.push(capture as u8);

        self.queues.push_outbound(packet.clone());

        packet
    }

    pub fn set_auto_capture(&self, on: bool) -> Vec<u8> {
        self.switch_command(command::SET_AUTO_CAPTURE, on)
    }

    /// Arms or disarms the radar, toggling transmitter eradiation.
    pub fn set_arm_rls(&self, on: bool) -> Vec<u8> {
        self.switch_command(command::SET_ARM_RLS, on)
    }

    pub fn set_filters(&self, on: bool) -> Vec<u8> {
        self.switch_command(command::SET_FILTERS, on)
    }

    pub fn set_masks(&self, on: bool) -> Vec<u8> {
        self.switch_command(command::SET_MASKS, on)
    }

    /// Drives the turret directly. The server ignores this while auto
    /// capture is engaged.
    pub fn set_ptz(&self, ptz_command: u8, ptz_speed: u8) -> Vec<u8> {
        let mut packet = self.make_packet(0x0B, command::SET_PTZ, 2);
        packet.push(ptz_command);
        packet.push(ptz_speed);

        self.queues.push_outbound(packet.clone());

        packet
    }

    /// Stores or recalls a turret preset. Presets live in 1..=25 and
    /// address the turret only, never the camera zoom.
    pub fn set_ptz_preset(&self, preset_id: u8, set_preset: bool) -> Option<Vec<u8>> {
        if preset_id == 0 || preset_id > 25 {
            logging::info!(self.log, "ptz preset out of range";
                           "context" => "encode", "preset_id" => preset_id);
            return None;
        }

        let mut packet = self.make_packet(0x0B, command::SET_PTZ_PRESET, 2);
        packet.push(preset_id);
        packet.push(set_preset as u8);

        self.queues.push_outbound(packet.clone());

        Some(packet)
    }

    /// Changes the server id stamped into headers and refreshes the hello
    /// slot to match.
    pub fn set_server_id(&self, server_id: u8) {
        self.server_id.store(server_id, Ordering::Relaxed);
        self.hello();
    }

    fn switch_command(&self, command_code: u8, on: bool) -> Vec<u8> {
        let mut packet = self.make_packet(0x0A, command_code, 1);
        packet.push(on as u8);

        self.queues.push_outbound(packet.clone());

        packet
    }
}

impl Codec {
    /// Raises the task gates and launches the decoder and ping producer.
    /// Called by the manager once per fresh session.
    pub fn start_tasks(codec: &Arc<Codec>) {
        codec.live.set();
        codec.ping_live.set();
        Codec::start_decode_task(codec);
        Codec::start_ping_task(codec);
    }

    /// Drops the task gates and joins both tasks. Prompt, because every
    /// task sleep is interruptible.
    pub fn stop_tasks(&self) {
        self.live.clear();
        self.ping_live.clear();

        let ping = self.ping_task.lock().expect("Ping task lock poisoned").take();
        if let Some(task) = ping {
            task.join().expect("Ping task panicked");
        }

        let decode = self.decode_task.lock().expect("Decode task lock poisoned").take();
        if let Some(task) = decode {
            task.join().expect("Decode task panicked");
        }
    }

    /// Stops and relaunches the ping producer; the manager calls this when
    /// the watchdog reports producer silence.
    pub fn restart_ping(codec: &Arc<Codec>) {
        logging::info!(codec.log, "restarting ping task"; "context" => "ping");

        codec.ping_live.clear();

        let previous = codec.ping_task.lock().expect("Ping task lock poisoned").take();
        if let Some(task) = previous {
            task.join().expect("Ping task panicked");
        }

        codec.ping_live.set();
        Codec::start_ping_task(codec);
    }

    fn start_ping_task(codec: &Arc<Codec>) {
        let task_codec = Arc::clone(codec);
        let task = thread::spawn(move || task_codec.ping_loop());

        *codec.ping_task.lock().expect("Ping task lock poisoned") = Some(task);
    }

    fn start_decode_task(codec: &Arc<Codec>) {
        let task_codec = Arc::clone(codec);
        let task = thread::spawn(move || task_codec.decode_loop());

        *codec.decode_task.lock().expect("Decode task lock poisoned") = Some(task);
    }

    /// Keep-alive producer. The server drops clients that go quiet, so a
    /// status request goes out every few seconds; responses double as
    /// state updates.
    fn ping_loop(&self) {
        logging::info!(self.log, "ping task started"; "context" => "ping");

        let mut pings_since_hello = 0;

        while self.live.is_set() && self.ping_live.is_set() {
            let packet = self.get_server_status(0);
            self.queues.push_outbound(packet);
            self.watchdog.touch();

            logging::trace!(self.log, "ping enqueued"; "context" => "ping");

            support::sleep_while(PING_DELAY, || {
                self.live.is_set() && self.ping_live.is_set()
            });

            pings_since_hello += 1;
            if pings_since_hello >= PINGS_PER_HELLO {
                pings_since_hello = 0;
                self.hello();
            }
        }

        logging::info!(self.log, "ping task finished"; "context" => "ping");
    }

    /// Decoder task: drains the inbound queue, reassembles whole packets
    /// and dispatches them as events.
    fn decode_loop(&self) {
        logging::info!(self.log, "decode task started"; "context" => "decode");

        let mut reassembler = Reassembler::new();
        let mut packets = Vec::new();

        while self.live.is_set() {
            if !self.connection.is_set() {
                // Downstream reads an empty state as "link down".
                self.events.server_state_changed(None);
            }

            match self.queues.pop_inbound() {
                Some(chunk) => {
                    let result = reassembler.feed(&chunk, &mut packets);

                    for packet in packets.drain(..) {
                        self.dispatch(&packet);
                    }

                    if let Err(NetworkError::Fatal(error)) = result {
                        logging::info!(self.log, "discarding inbound buffer";
                                       "context" => "decode", "error" => ?error);
                    }
                }
                None => {
                    logging::trace!(self.log, "inbound queue empty"; "context" => "decode");
                    support::sleep_while(DECODE_IDLE_DELAY, || self.live.is_set());
                }
            }
        }

        logging::info!(self.log, "decode task finished"; "context" => "decode");
    }

    fn dispatch(&self, packet: &[u8]) {
        match Event::read(packet) {
            Ok(Event::HelloReply { version }) => {
                self.connection.set();
                self.events.connected();
                logging::info!(self.log, "handshake complete";
                               "context" => "decode", "server_version" => version);
            }
            Ok(Event::Trajectories(trajectories)) => {
                logging::debug!(self.log, "trajectories decoded";
                               "context" => "decode", "count" => trajectories.len());
                self.events.trajectories_discovered(trajectories);
            }
            Ok(Event::CaptureState(state)) => {
                self.events.capture_target_state(state);
            }
            Ok(Event::ServerState(state)) => {
                logging::trace!(self.log, "server state decoded";
                               "context" => "decode", "state" => ?state);
                self.events.server_state_changed(Some(state));
            }
            Ok(Event::ExtendedState(state)) => {
                // No event call for this one; the log is its only outlet.
                logging::debug!(self.log, "extended status";
                               "context" => "decode", "state" => ?state);
            }
            Err(NetworkError::Fatal(ErrorType::ProtocolMismatch)) => {
                logging::error!(self.log, "server protocol is incompatible";
                                "context" => "decode",
                                "client_version" => frame::PROTOCOL_VERSION);
                // The manager owns the socket; dropping the session gate
                // makes it recycle.
                self.session.clear();
            }
            Err(NetworkError::Fatal(ErrorType::UnknownCommand(code))) => {
                logging::info!(self.log, "dropping packet with unknown command";
                               "context" => "decode", "command" => code);
            }
            Err(error) => {
                logging::info!(self.log, "dropping undecodable packet";
                               "context" => "decode",
                               "error" => ?error,
                               "length" => packet.len());
            }
        }
    }
}

/// Reassembles the length-framed byte stream. Chunks arrive in whatever
/// splits the socket produced; whole packets come out in order.
struct Reassembler {
    stash: Vec<u8>,
}

impl Reassembler {
    fn new() -> Reassembler {
        Reassembler { stash: Vec::new() }
    }

    /// Absorbs one chunk, pushing every completed packet onto `packets`.
    /// A declared length of zero or beyond the protocol cap poisons the
    /// stream: the chunk remainder and the stash are both discarded, but
    /// packets completed before the poison stay delivered.
    fn feed(&mut self, chunk: &[u8], packets: &mut Vec<Vec<u8>>) -> NetworkResult<()> {
        let mut working = mem::replace(&mut self.stash, Vec::new());
        working.extend_from_slice(chunk);

        // The declared length sits in bytes 1..3, so anything shorter
        // stays stashed for the next chunk.
        while working.len() > 2 {
            let declared = (usize::from(working[1]) << 8) | usize::from(working[2]);

            if declared == 0 {
                working.clear();
                return Err(NetworkError::Fatal(ErrorType::EmptyPacket));
            }

            if declared > frame::MAX_PACKET_SIZE {
                working.clear();
                return Err(NetworkError::Fatal(ErrorType::PacketTooLarge));
            }

            if declared > working.len() {
                break;
            }

            let rest = working.split_off(declared);
            packets.push(mem::replace(&mut working, rest));
        }

        self.stash = working;

        Ok(())
    }
}
