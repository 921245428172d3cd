//! Wall clock plumbing for the CSS-WC protocol.
//!
//! The proxy and the controller run on the same machine, so the system clock
//! is the shared wall clock. Both wall-clock transports (the standard UDP
//! exchange and the WebSocket-JSON variant) read it through [`WallClock`].

use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

/// Nanosecond-resolution reading of the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl WallClock {
    pub fn new() -> Self {
        Self
    }

    pub fn nanos(&self) -> i64 {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_nanos() as i64,
            Err(_) => 0,
        }
    }
}

/// Measure the clock's effective precision in seconds by timing how long it
/// takes for consecutive readings to differ, keeping the smallest gap seen.
pub fn measure_precision(wallclock: &WallClock, iterations: u32) -> f64 {
    let mut best_nanos = i64::MAX;
    for _ in 0..iterations {
        let start = wallclock.nanos();
        let mut now = wallclock.nanos();
        while now <= start {
            now = wallclock.nanos();
        }
        best_nanos = best_nanos.min(now - start);
    }
    best_nanos as f64 / 1_000_000_000.0
}

/// Precision in the wire encoding: the signed base-2 exponent of the
/// precision in seconds, rounded up.
pub fn encode_precision(precision_secs: f64) -> i8 {
    precision_secs.log2().ceil() as i8
}

pub const WC_MESSAGE_LEN: usize = 32;

const WC_VERSION: u8 = 0;
const WC_TYPE_REQUEST: u8 = 0;
const WC_TYPE_RESPONSE: u8 = 1;

/// A CSS-WC protocol message (requests and responses share the layout).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WcMessage {
    pub version: u8,
    pub message_type: u8,
    pub precision: i8,
    pub max_freq_error: u32,
    pub originate_secs: u32,
    pub originate_nanos: u32,
    pub receive_secs: u32,
    pub receive_nanos: u32,
    pub transmit_secs: u32,
    pub transmit_nanos: u32,
}

fn split_nanos(nanos: i64) -> (u32, u32) {
    let nanos = nanos.max(0);
    ((nanos / 1_000_000_000) as u32, (nanos % 1_000_000_000) as u32)
}

impl WcMessage {
    pub fn is_request(&self) -> bool {
        self.message_type == WC_TYPE_REQUEST
    }

    /// Build the response to a request, echoing the originate time and
    /// stamping in the server's receive and transmit times.
    pub fn response_to(
        request: &WcMessage,
        precision: i8,
        max_freq_error_ppm: f64,
        receive_nanos: i64,
        transmit_nanos: i64,
    ) -> Self {
        let (receive_secs, receive_nanos) = split_nanos(receive_nanos);
        let (transmit_secs, transmit_nanos) = split_nanos(transmit_nanos);
        Self {
            version: WC_VERSION,
            message_type: WC_TYPE_RESPONSE,
            precision,
            // wire units are 1/256 ppm
            max_freq_error: (max_freq_error_ppm * 256.0) as u32,
            originate_secs: request.originate_secs,
            originate_nanos: request.originate_nanos,
            receive_secs,
            receive_nanos,
            transmit_secs,
            transmit_nanos,
        }
    }

    pub fn pack(&self) -> [u8; WC_MESSAGE_LEN] {
        let mut buf = [0u8; WC_MESSAGE_LEN];
        buf[0] = self.version;
        buf[1] = self.message_type;
        buf[2] = self.precision as u8;
        buf[3] = 0;
        buf[4..8].copy_from_slice(&self.max_freq_error.to_be_bytes());
        buf[8..12].copy_from_slice(&self.originate_secs.to_be_bytes());
        buf[12..16].copy_from_slice(&self.originate_nanos.to_be_bytes());
        buf[16..20].copy_from_slice(&self.receive_secs.to_be_bytes());
        buf[20..24].copy_from_slice(&self.receive_nanos.to_be_bytes());
        buf[24..28].copy_from_slice(&self.transmit_secs.to_be_bytes());
        buf[28..32].copy_from_slice(&self.transmit_nanos.to_be_bytes());
        buf
    }

    pub fn unpack(data: &[u8]) -> Result<Self> {
        if data.len() < WC_MESSAGE_LEN {
            return Err(anyhow!("wall clock message too short: {} bytes", data.len()));
        }
        let word =
            |range: std::ops::Range<usize>| u32::from_be_bytes(data[range].try_into().unwrap());
        Ok(Self {
            version: data[0],
            message_type: data[1],
            precision: data[2] as i8,
            max_freq_error: word(4..8),
            originate_secs: word(8..12),
            originate_nanos: word(12..16),
            receive_secs: word(16..20),
            receive_nanos: word(20..24),
            transmit_secs: word(24..28),
            transmit_nanos: word(28..32),
        })
    }
}

/// UDP responder for the standard CSS-WC exchange.
///
/// Each request is answered with a single response; there is no follow-up
/// message because the transmit time is sampled right before the send.
pub struct UdpWallClockServer {
    socket: UdpSocket,
    wallclock: WallClock,
    precision: i8,
    max_freq_error_ppm: f64,
    cancellation_token: CancellationToken,
}

impl UdpWallClockServer {
    pub async fn bind(
        bind_addr: &str,
        wallclock: WallClock,
        precision_secs: f64,
        max_freq_error_ppm: f64,
        cancellation_token: CancellationToken,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .context("cannot bind wall clock UDP socket")?;
        Ok(Self {
            socket,
            wallclock,
            precision: encode_precision(precision_secs),
            max_freq_error_ppm,
            cancellation_token,
        })
    }

    pub async fn run_background(self) -> Result<()> {
        tracing::debug!("UdpWallClockServer started");

        let mut buf = [0u8; 256];
        loop {
            tokio::select! {
                () = self.cancellation_token.cancelled() => {
                    break;
                },
                received = self.socket.recv_from(&mut buf) => {
                    let (len, peer) = received.context("wall clock socket receive failed")?;
                    let receive_nanos = self.wallclock.nanos();

                    let request = match WcMessage::unpack(&buf[..len]) {
                        Ok(message) => message,
                        Err(err) => {
                            tracing::debug!(error = ?err, peer = %peer, "dropping undecodable wall clock datagram");
                            continue;
                        }
                    };
                    if !request.is_request() {
                        tracing::debug!(message_type = request.message_type, peer = %peer, "ignoring non-request wall clock message");
                        continue;
                    }

                    let response = WcMessage::response_to(
                        &request,
                        self.precision,
                        self.max_freq_error_ppm,
                        receive_nanos,
                        self.wallclock.nanos(),
                    );
                    if let Err(err) = self.socket.send_to(&response.pack(), peer).await {
                        tracing::debug!(error = ?err, peer = %peer, "wall clock response send failed");
                    }
                }
            }
        }

        tracing::debug!("UdpWallClockServer stopped");

        Ok(())
    }
}

/// Annotate one WebSocket wall-clock message in place.
///
/// `rt`/`tt` carry the receive/send times in seconds; the long-name aliases
/// keep the raw nanosecond samples. Whatever the client sent stays untouched
/// apart from these keys.
pub fn annotate_wallclock_message(
    mut message: serde_json::Map<String, serde_json::Value>,
    receive_nanos: i64,
    transmit_nanos: i64,
    precision_secs: f64,
    max_freq_error_ppm: f64,
) -> serde_json::Map<String, serde_json::Value> {
    use serde_json::json;

    message.insert("t".to_string(), json!(1));
    message.insert("remoteReceiveTime".to_string(), json!(receive_nanos));
    message.insert("rt".to_string(), json!(receive_nanos as f64 / 1_000_000_000.0));
    message.insert("precision".to_string(), json!(precision_secs));
    message.insert("p".to_string(), json!(precision_secs));
    message.insert("maxFrequencyError".to_string(), json!(max_freq_error_ppm));
    message.insert("mfe".to_string(), json!(max_freq_error_ppm));
    message.insert("remoteSendTime".to_string(), json!(transmit_nanos));
    message.insert("tt".to_string(), json!(transmit_nanos as f64 / 1_000_000_000.0));
    message
}
