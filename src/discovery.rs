//! Broadcast discovery of instruments on the local network.
//!
//! Every instrument broadcasts a short ASCII announcement about once a second
//! on UDP port [`DISCOVERY_PORT`]:
//!
//! ```text
//! msp1000<interface>,<serial>
//! ```
//!
//! e.g. `msp1000wlan0,1234567890`. The announcing host is the datagram's source
//! address. Discovery listens for a bounded window, drops anything that does
//! not parse, and folds repeated broadcasts of the same instrument into one
//! entry.
//!
//! The socket lives only for the duration of one call and is bound with
//! `SO_REUSEADDR`, so independent callers can search at the same time.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! # async fn example() -> minispec::AppResult<()> {
//! let found = minispec::find_devices(false, Duration::from_secs(1), Duration::from_secs(3)).await?;
//! for device in &found {
//!     println!("{} via {} (serial {})", device.address(), device.interface_name(), device.serial());
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::config::DiscoveryConfig;
use crate::error::AppResult;

/// Well-known UDP port instruments broadcast on.
pub const DISCOVERY_PORT: u16 = 12345;
/// Leading bytes of every announcement.
pub const ANNOUNCEMENT_MAGIC: &[u8] = b"msp1000";
/// Largest announcement the firmware sends: magic, interface, comma, 20-digit serial.
pub const ANNOUNCEMENT_DATAGRAM_BYTES: usize = 33;

/// Shortest wait per receive, so a zero socket timeout cannot spin.
const MIN_RECEIVE_WAIT: Duration = Duration::from_millis(1);
/// Consecutive receive failures after which the search gives up.
const MAX_RECEIVE_ERRORS: u32 = 8;

/// One instrument seen on the network.
///
/// Two announcements are the same instrument when address and serial agree;
/// the interface name does not take part in identity.
#[derive(Debug, Clone)]
pub struct DeviceAnnouncement {
    address: SocketAddr,
    interface_name: String,
    serial: u64,
}

impl DeviceAnnouncement {
    /// Build an announcement directly.
    pub fn new(address: SocketAddr, interface_name: impl Into<String>, serial: u64) -> Self {
        Self {
            address,
            interface_name: interface_name.into(),
            serial,
        }
    }

    /// Parse a datagram received from `source`. `None` if it is not an announcement.
    pub fn parse(datagram: &[u8], source: SocketAddr) -> Option<Self> {
        let body = datagram.strip_prefix(ANNOUNCEMENT_MAGIC)?;
        let text = std::str::from_utf8(body).ok()?;
        let mut fields = text.split(',');

        let interface_name = fields.next()?.trim();
        if interface_name.is_empty() {
            return None;
        }
        let serial = fields
            .next()?
            .trim_matches(|c: char| c.is_whitespace() || c == '\0')
            .parse::<u64>()
            .ok()?;

        Some(Self::new(source, interface_name, serial))
    }

    /// Source address of the announcement.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Host to open a control session against.
    pub fn host(&self) -> IpAddr {
        self.address.ip()
    }

    /// Network interface the instrument announced on (e.g. `wlan0`, `eth0`).
    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    /// Factory serial number.
    pub fn serial(&self) -> u64 {
        self.serial
    }
}

impl PartialEq for DeviceAnnouncement {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.serial == other.serial
    }
}

impl Eq for DeviceAnnouncement {}

impl Hash for DeviceAnnouncement {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
        self.serial.hash(state);
    }
}

/// Deduplicating collector for announcements.
#[derive(Debug, Default)]
pub struct AnnouncementSet {
    devices: HashSet<DeviceAnnouncement>,
}

impl AnnouncementSet {
    /// Empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and record a datagram. Returns true if it named a new instrument.
    pub fn ingest(&mut self, datagram: &[u8], source: SocketAddr) -> bool {
        match DeviceAnnouncement::parse(datagram, source) {
            Some(device) => self.insert(device),
            None => {
                debug!(
                    source = %source,
                    len = datagram.len(),
                    "Dropping malformed announcement"
                );
                false
            }
        }
    }

    /// Record an already-parsed announcement. Returns true if it was new.
    pub fn insert(&mut self, device: DeviceAnnouncement) -> bool {
        let serial = device.serial;
        let address = device.address;
        let fresh = self.devices.insert(device);
        if fresh {
            info!(serial, address = %address, "Discovered spectrometer");
        } else {
            trace!(serial, address = %address, "Repeated announcement");
        }
        fresh
    }

    /// Number of distinct instruments.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// True when nothing has been collected.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Finish collecting.
    pub fn into_set(self) -> HashSet<DeviceAnnouncement> {
        self.devices
    }
}

/// Listen for instruments on the default discovery port.
///
/// Waits up to `socket_timeout` per receive and `search_timeout` overall. With
/// `return_first_only` the call returns as soon as one instrument is found.
/// Finding nothing yields an empty set. Datagrams longer than an announcement
/// are dropped. Only a socket that keeps failing to receive is an error.
pub async fn find_devices(
    return_first_only: bool,
    socket_timeout: Duration,
    search_timeout: Duration,
) -> AppResult<HashSet<DeviceAnnouncement>> {
    let config = DiscoveryConfig {
        socket_timeout_ms: duration_ms(socket_timeout),
        search_timeout_ms: duration_ms(search_timeout),
        ..DiscoveryConfig::default()
    };
    find_devices_with(&config, return_first_only).await
}

/// Listen for instruments using explicit discovery settings.
pub async fn find_devices_with(
    config: &DiscoveryConfig,
    return_first_only: bool,
) -> AppResult<HashSet<DeviceAnnouncement>> {
    let socket = bind_discovery_socket(config.port)?;
    let socket_timeout = config.socket_timeout();
    let search_timeout = config.search_timeout();
    debug!(
        port = config.port,
        ?search_timeout,
        return_first_only,
        "Listening for spectrometer announcements"
    );

    let mut found = AnnouncementSet::new();
    // One spare byte tells a full-length announcement from a truncated longer one.
    let mut buf = vec![0u8; config.max_datagram_bytes + 1];
    let mut receive_errors = 0u32;
    let started = Instant::now();

    loop {
        let elapsed = started.elapsed();
        if elapsed >= search_timeout {
            break;
        }
        let wait = receive_wait(socket_timeout, search_timeout - elapsed);

        match tokio::time::timeout(wait, socket.recv_from(&mut buf)).await {
            Err(_) => trace!("No announcement within socket timeout"),
            Ok(Err(e)) => {
                receive_errors += 1;
                if receive_errors >= MAX_RECEIVE_ERRORS {
                    warn!(error = %e, receive_errors, "Discovery socket keeps failing; giving up");
                    return Err(e.into());
                }
                if receive_errors == 1 {
                    warn!(error = %e, "Discovery receive failed");
                } else {
                    debug!(error = %e, receive_errors, "Discovery receive failed again");
                }
                tokio::time::sleep(wait).await;
            }
            Ok(Ok((len, source))) => {
                receive_errors = 0;
                if len > config.max_datagram_bytes {
                    debug!(source = %source, "Dropping oversized announcement");
                    continue;
                }
                if found.ingest(&buf[..len], source) && return_first_only {
                    break;
                }
            }
        }
    }

    debug!(found = found.len(), elapsed = ?started.elapsed(), "Discovery finished");
    Ok(found.into_set())
}

/// Broadcast-capable UDP socket bound to `0.0.0.0:port`.
fn bind_discovery_socket(port: u16) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    socket.set_broadcast(true)?;
    socket.set_nonblocking(true)?;
    let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket.bind(&SockAddr::from(bind_addr))?;
    UdpSocket::from_std(socket.into())
}

fn receive_wait(socket_timeout: Duration, remaining: Duration) -> Duration {
    socket_timeout.max(MIN_RECEIVE_WAIT).min(remaining)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
