//! The background acceptor of a networked transport.
//!
//! A dedicated thread drives a single-threaded tokio runtime that accepts connections and reads
//! frames from every accepted connection, pushing decoded variables into the shared [`Mailbox`].
//! The foreground only interacts with it through the mailbox and the shutdown signal.

use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
};

use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    runtime,
    sync::watch,
    task::JoinSet,
};
use tracing::{debug, error, warn};

use super::{Address, Mailbox, Peer, wire::FrameDecoder, wire::Message};
use crate::error::Error;

const READ_BUF_SIZE: usize = 4096;

pub(crate) struct Listener {
    address: Address,
    in_use: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    /// Binds to `address` and starts accepting connections on a background thread.
    pub(crate) fn start(address: &Address, mailbox: Arc<Mailbox>) -> Result<Self, Error> {
        // bind in the foreground so that errors reach the caller
        let listener = std::net::TcpListener::bind((address.ip.as_str(), address.port))?;
        listener.set_nonblocking(true)?;
        let rt = runtime::Builder::new_current_thread().enable_io().build()?;
        let (in_use, in_use_rx) = watch::channel(true);
        let handle = thread::Builder::new()
            .name(format!("listener-{address}"))
            .spawn(move || {
                rt.block_on(async move {
                    match TcpListener::from_std(listener) {
                        Ok(listener) => accept_loop(listener, mailbox, in_use_rx).await,
                        Err(e) => error!("could not register listener: {e}"),
                    }
                })
            })?;
        debug!("listening on {address}");
        Ok(Self {
            address: address.clone(),
            in_use,
            handle: Some(handle),
        })
    }

    /// Signals the acceptor to stop and waits for its thread to exit.
    pub(crate) fn close(&mut self) {
        if self.in_use.send(false).is_err() {
            debug!("listener on {} already stopped", self.address);
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("listener thread on {} panicked", self.address);
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mailbox: Arc<Mailbox>,
    mut in_use: watch::Receiver<bool>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            changed = in_use.changed() => {
                if changed.is_err() || !*in_use.borrow() {
                    break;
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    connections.spawn(read_connection(stream, peer, Arc::clone(&mailbox)));
                }
                Err(e) => warn!("failed to accept connection: {e}"),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.abort_all();
}

async fn read_connection(mut stream: TcpStream, peer: SocketAddr, mailbox: Arc<Mailbox>) {
    let mut decoder = FrameDecoder::default();
    // the listening address the remote party announced for this connection
    let mut announced: Option<Address> = None;
    let mut buf = vec![0; READ_BUF_SIZE];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => {
                debug!("connection from {peer} closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!("reading from {peer} failed: {e}");
                return;
            }
        };
        decoder.extend(&buf[..n]);
        loop {
            match decoder.next_message() {
                Ok(Some(Message::Announce(address))) => {
                    debug!("connection from {peer} belongs to {address}");
                    announced = Some(address);
                }
                Ok(Some(Message::SendVars(vars))) => {
                    let from = match &announced {
                        Some(address) => address.clone(),
                        None => {
                            warn!("{peer} sent variables before announcing itself");
                            Address::from(peer)
                        }
                    };
                    debug!("received {} variable(s) from {from}", vars.len());
                    mailbox.push(Peer::Remote(from), vars);
                }
                Ok(None) => break,
                Err(e) => {
                    error!("dropping connection from {peer}, protocol desync: {e}");
                    return;
                }
            }
        }
    }
}
