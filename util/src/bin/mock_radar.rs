//! Scripted stand-in for the Umirs radar server. Answers the handshake,
//! replies to status requests with a canned healthy state, echoes capture
//! requests and pushes a trajectory frame every few seconds. Point the
//! runner at it to drive the driver without hardware.

use byteorder::{BigEndian, WriteBytesExt};
use std::env;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::time::{Duration, Instant};
use umirs::net::frame::{command, HEADER_SIZE, PROTOCOL_VERSION, TO_CLIENT};

const TRAJECTORY_INTERVAL: Duration = Duration::from_secs(5);

fn frame(sequence: u8, command_code: u8, payload: &[u8]) -> Vec<u8> {
    let total = (HEADER_SIZE + payload.len()) as u16;

    let mut packet = Vec::with_capacity(total as usize);
    packet.write_u8(TO_CLIENT).unwrap();
    packet.write_u16::<BigEndian>(total).unwrap();
    packet.write_u8(sequence).unwrap();
    packet.write_u8(0x01).unwrap();
    packet.write_u8(0x01).unwrap();
    packet.write_u8(command_code).unwrap();
    packet.write_u16::<BigEndian>(payload.len() as u16).unwrap();
    packet.extend_from_slice(payload);

    packet
}

/// Healthy RLS2.4M on frequency code 3, turret at (100, 200).
fn server_state_payload() -> Vec<u8> {
    let mut payload = vec![0u8; 16];
    payload[3] = 3;    // frequency code (packet offset 12)
    payload[9] = 100;  // pan low byte (packet offset 18)
    payload[11] = 200; // tilt low byte (packet offset 20)
    payload[15] = 1;   // radar type code (packet offset 24)
    payload
}

/// One approaching track at 600 steps, 45 degrees off boresight.
fn trajectory_payload() -> Vec<u8> {
    vec![
        1,          // record count
        0x00, 0x01, // track 1
        0x00,       // not captured
        2, 5,       // rcs 2.5
        0x02, 0x58, // range 600
        0x5A,       // azimuth +45.0
        0x00, 0x0A, // radial speed 10
        0xFF, 0xF6, // tangential speed -10
        0x01,       // sector
    ]
}

fn serve(stream: &mut TcpStream, sequence: &mut u8) {
    // The read timeout doubles as the pacing for unprompted pushes.
    stream.set_read_timeout(Some(Duration::from_secs(1))).unwrap();

    let mut buffer = [0u8; 1024];
    let mut last_trajectory = Instant::now();

    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(received) => {
                // React to each whole inbound frame; the driver paces
                // itself, so a read rarely carries more than one.
                let mut offset = 0;
                while offset + HEADER_SIZE <= received {
                    let length =
                        (usize::from(buffer[offset + 1]) << 8) | usize::from(buffer[offset + 2]);
                    let command_code = buffer[offset + 6];

                    *sequence = sequence.wrapping_add(1);
                    let reply = match command_code {
                        command::HELLO => {
                            println!("hello from client, answering version {}", PROTOCOL_VERSION);
                            Some(frame(*sequence, command::HELLO_REPLY, &[PROTOCOL_VERSION]))
                        }
                        command::GET_SERVER_STATUS => {
                            Some(frame(*sequence, command::SERVER_STATE, &server_state_payload()))
                        }
                        command::CAPTURE_AND_FOLLOW => {
                            println!("capture request echoed");
                            Some(frame(
                                *sequence,
                                command::CAPTURE_STATE,
                                &[buffer[offset + 9], buffer[offset + 10], buffer[offset + 11]],
                            ))
                        }
                        other => {
                            println!("ignoring command {:#04x}", other);
                            None
                        }
                    };

                    if let Some(reply) = reply {
                        if stream.write_all(&reply).is_err() {
                            return;
                        }
                    }

                    offset += length.max(HEADER_SIZE);
                }
            }
            Err(ref error)
                if error.kind() == ErrorKind::WouldBlock || error.kind() == ErrorKind::TimedOut => {}
            Err(_) => break,
        }

        if last_trajectory.elapsed() >= TRAJECTORY_INTERVAL {
            last_trajectory = Instant::now();
            *sequence = sequence.wrapping_add(1);

            println!("pushing a trajectory frame");
            let push = frame(*sequence, command::TRAJECTORIES, &trajectory_payload());
            if stream.write_all(&push).is_err() {
                break;
            }
        }
    }
}

fn main() {
    let address = env::args().nth(1).unwrap_or_else(|| "127.0.0.1:4040".to_string());
    let listener = TcpListener::bind(&address).unwrap();

    println!("mock radar listening on {}", listener.local_addr().unwrap());

    let mut sequence = 0u8;

    for stream in listener.incoming() {
        let mut stream = stream.unwrap();
        println!("client connected: {:?}", stream.peer_addr().unwrap());

        serve(&mut stream, &mut sequence);

        println!("client gone");
    }
}
