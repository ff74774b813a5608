//! The channel a party uses to send named variables to, and receive them from, other parties.
//!
//! A [`Transport`] starts out simulated: sending a variable appends it directly to the receiver's
//! [`Mailbox`]. Once [`Transport::set_address`] is called it becomes networked, and variables
//! travel over TCP as [`wire`] frames, which a background [`listener`] decodes into the same
//! mailbox.

use std::{
    collections::{HashMap, VecDeque},
    fmt,
    io::Write,
    net::{SocketAddr, TcpStream, ToSocketAddrs},
    str::FromStr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use parking_lot::{Condvar, Mutex};
use serde_json::Value;
use tracing::{Level, debug, instrument, warn};

use crate::{config::TransportConfig, error::Error};

mod listener;
pub mod wire;

use listener::Listener;
use wire::Message;

const MIN_CONNECT_ATTEMPT: Duration = Duration::from_millis(10);

/// The `ip:port` a networked transport listens on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address {
    /// The host part, used as given (no IPv6 bracket handling).
    pub ip: String,
    /// The TCP port.
    pub port: u16,
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ip), Some(port), None) if !ip.is_empty() => {
                let port = port.parse().map_err(|_| Error::InvalidAddress(s.to_string()))?;
                Ok(Address {
                    ip: ip.to_string(),
                    port,
                })
            }
            _ => Err(Error::InvalidAddress(s.to_string())),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl From<SocketAddr> for Address {
    fn from(addr: SocketAddr) -> Self {
        Address {
            ip: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

/// Uniquely identifies a transport within this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportId(u64);

impl TransportId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        TransportId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// The origin of a buffered value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Peer {
    /// A transport in this process (simulated delivery).
    Local(TransportId),
    /// A remote transport, identified by the listening address it announced.
    Remote(Address),
}

type Queues = HashMap<Peer, HashMap<String, VecDeque<Value>>>;

/// The receive buffer of a transport.
///
/// Values are queued per sender and variable name and consumed oldest first. The buffer is
/// filled by other transports (simulated) or by the background listener (networked) and drained
/// by the owning party.
#[derive(Debug, Default)]
pub(crate) struct Mailbox {
    queues: Mutex<Queues>,
    arrived: Condvar,
}

impl Mailbox {
    pub(crate) fn push(&self, from: Peer, vars: Vec<(String, Value)>) {
        let mut queues = self.queues.lock();
        let by_name = queues.entry(from).or_default();
        for (name, value) in vars {
            by_name.entry(name).or_default().push_back(value);
        }
        self.arrived.notify_all();
    }

    fn pop(&self, from: &Peer, name: &str) -> Option<Value> {
        pop_queued(&mut self.queues.lock(), from, name)
    }

    /// Waits until a value for `(from, name)` is queued, checking at least every `poll`.
    fn pop_timeout(
        &self,
        from: &Peer,
        name: &str,
        timeout: Duration,
        poll: Duration,
    ) -> Option<Value> {
        // no deadline if it lies beyond what an `Instant` can represent
        let deadline = Instant::now().checked_add(timeout);
        let mut queues = self.queues.lock();
        loop {
            if let Some(value) = pop_queued(&mut queues, from, name) {
                return Some(value);
            }
            let wait = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    poll.min(deadline - now)
                }
                None => poll,
            };
            self.arrived.wait_for(&mut queues, wait);
        }
    }
}

fn pop_queued(queues: &mut Queues, from: &Peer, name: &str) -> Option<Value> {
    queues.get_mut(from)?.get_mut(name)?.pop_front()
}

/// What other transports need to know to send to, or receive from, a transport.
#[derive(Debug, Clone)]
pub struct Endpoint {
    id: TransportId,
    address: Option<Address>,
    mailbox: Arc<Mailbox>,
}

impl Endpoint {
    /// The address the transport listens on, if it is networked.
    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }
}

/// A party's message channel, either simulated in-process or networked over TCP.
pub struct Transport {
    id: TransportId,
    address: Option<Address>,
    config: TransportConfig,
    mailbox: Arc<Mailbox>,
    connections: HashMap<Address, TcpStream>,
    listener: Option<Listener>,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("id", &self.id)
            .field("address", &self.address)
            .field("connections", &self.connections.keys().collect::<Vec<_>>())
            .field("listening", &self.listener.is_some())
            .finish()
    }
}

impl Transport {
    /// Creates a simulated transport.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            id: TransportId::next(),
            address: None,
            config,
            mailbox: Arc::default(),
            connections: HashMap::new(),
            listener: None,
        }
    }

    /// Whether values are delivered in-process instead of over the network.
    pub fn is_simulated(&self) -> bool {
        self.address.is_none()
    }

    /// The address this transport listens on, if it is networked.
    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    /// The timeouts used by this transport.
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Replaces the timeouts used by this transport.
    pub fn set_config(&mut self, config: TransportConfig) {
        self.config = config;
    }

    /// A handle other transports use to address this one.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            id: self.id,
            address: self.address.clone(),
            mailbox: Arc::clone(&self.mailbox),
        }
    }

    /// Switches the transport to networked mode, listening on `address` (`ip:port`).
    ///
    /// Calling this again only reassigns the address; existing sockets stay open.
    pub fn set_address(&mut self, address: &str) -> Result<(), Error> {
        self.address = Some(address.parse()?);
        Ok(())
    }

    /// Starts accepting connections from other parties on a background thread.
    pub fn start_listening(&mut self) -> Result<(), Error> {
        let Some(address) = &self.address else {
            return Err(Error::InvalidAddress(
                "a simulated transport cannot listen".to_string(),
            ));
        };
        if self.listener.is_some() {
            debug!("already listening on {address}");
            return Ok(());
        }
        self.listener = Some(Listener::start(address, Arc::clone(&self.mailbox))?);
        Ok(())
    }

    /// Connects to the party listening on `address`, retrying until `timeout` elapses.
    ///
    /// On success, the transport immediately announces its own listening address so that the
    /// other side can attribute incoming variables to it.
    #[instrument(level = Level::DEBUG, skip(self), fields(own = ?self.address), err)]
    pub fn connect_to_client(&mut self, address: &Address, timeout: Duration) -> Result<(), Error> {
        let poll = self.config.connect_poll_interval();
        let start = Instant::now();
        let mut stream = loop {
            let remaining = timeout.saturating_sub(start.elapsed());
            match try_connect(address, poll.min(remaining).max(MIN_CONNECT_ATTEMPT)) {
                Ok(stream) => break stream,
                Err(e) if start.elapsed().saturating_add(poll) <= timeout => {
                    debug!("connecting to {address} failed ({e}), retrying");
                    thread::sleep(poll);
                }
                Err(e) => {
                    debug!("giving up on {address}: {e}");
                    return Err(Error::UnableToConnect {
                        address: address.to_string(),
                        timeout,
                    });
                }
            }
        };
        stream.set_nodelay(true)?;
        match &self.address {
            Some(own) => stream.write_all(&Message::Announce(own.clone()).encode()?)?,
            None => warn!("connected to {address} without an own address to announce"),
        }
        debug!("connected to {address}");
        self.connections.insert(address.clone(), stream);
        Ok(())
    }

    /// Connects to every peer that is not yet connected. Does nothing if simulated.
    pub fn connect_to_parties(
        &mut self,
        peers: &[Endpoint],
        timeout: Duration,
    ) -> Result<(), Error> {
        if self.is_simulated() {
            return Ok(());
        }
        for peer in peers {
            let Some(address) = &peer.address else {
                warn!("peer {:?} has no address, skipping", peer.id);
                continue;
            };
            if Some(address) == self.address.as_ref() || self.connections.contains_key(address) {
                continue;
            }
            self.connect_to_client(address, timeout)?;
        }
        Ok(())
    }

    /// Delivers the named values to `receiver`.
    ///
    /// Networked sends require an open connection to the receiver's address; connections are
    /// never opened implicitly.
    pub fn send_variables(
        &mut self,
        receiver: &Endpoint,
        vars: Vec<(String, Value)>,
    ) -> Result<(), Error> {
        if self.is_simulated() {
            receiver.mailbox.push(Peer::Local(self.id), vars);
            return Ok(());
        }
        let Some(address) = &receiver.address else {
            return Err(Error::NotConnected(format!("{:?}", receiver.id)));
        };
        let Some(stream) = self.connections.get_mut(address) else {
            return Err(Error::NotConnected(address.to_string()));
        };
        stream.write_all(&Message::SendVars(vars).encode()?)?;
        Ok(())
    }

    /// Takes the oldest value of `name` sent by `sender`.
    ///
    /// Simulated transports answer immediately; networked transports wait up to `timeout`.
    /// `None` means the value has not (yet) been received, as opposed to an explicit JSON null.
    pub fn receive_variable(
        &self,
        sender: &Endpoint,
        name: &str,
        timeout: Duration,
    ) -> Option<Value> {
        if self.is_simulated() {
            return self.mailbox.pop(&Peer::Local(sender.id), name);
        }
        let Some(address) = &sender.address else {
            warn!("cannot receive '{name}' from {:?} without an address", sender.id);
            return None;
        };
        self.mailbox.pop_timeout(
            &Peer::Remote(address.clone()),
            name,
            timeout,
            self.config.receive_poll_interval(),
        )
    }

    /// Stops the background listener and waits for it to exit.
    ///
    /// Sockets are not force-closed; the OS releases the port as usual.
    pub fn close(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.close();
        }
    }
}

fn try_connect(address: &Address, timeout: Duration) -> std::io::Result<TcpStream> {
    let mut last_err = None;
    for addr in (address.ip.as_str(), address.port).to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => last_err = Some(e),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::NotFound, "address did not resolve")
    }))
}
