//! Server shell: the listener, the reactor and the keyspace, wired.
//!
//! Data flow: the listener fd is registered readable; accepting creates a
//! client and registers its socket readable; readable callbacks drain the
//! socket, run the parser over the buffered bytes, and dispatch each
//! complete command; dispatch queues reply frames and registers the socket
//! writable; writable callbacks drain the queue and deregister themselves
//! once it empties. A recurring time event sweeps a sample of the expire
//! dict every tick.
//!
//! All callbacks share one [`ServerState`] behind `Rc<RefCell<...>>` — the
//! reactor is single-threaded, so the handle never crosses a thread.

pub mod client;

use crate::commands;
use crate::config::Config;
use crate::net;
use crate::protocol::reply;
use crate::reactor::{Direction, EventLoop, TimeKind};
use crate::server::client::{Client, SocketState};
use crate::storage::db::{Db, EXPIRE_CHECK_COUNT};
use bytes::Bytes;
use mio::net::TcpListener;
use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::rc::Rc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Interval of the active-expiration time event, in milliseconds.
const CRON_INTERVAL_MS: i64 = 100;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid listen address: {0}")]
    Address(String),
    #[error("failed to bind listener: {0}")]
    Bind(#[source] io::Error),
    #[error("failed to create event loop: {0}")]
    EventLoop(#[source] io::Error),
}

/// Mutable server state shared by every reactor callback.
pub struct ServerState {
    listener: TcpListener,
    pub db: Db,
    clients: HashMap<RawFd, Rc<RefCell<Client>>>,
}

impl ServerState {
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

pub struct Server {
    state: Rc<RefCell<ServerState>>,
    event_loop: EventLoop,
    listener_fd: RawFd,
    addr: SocketAddr,
}

impl Server {
    /// Binds the listener and builds an idle server. A bind failure is
    /// fatal: there is nothing to serve without the listening socket.
    pub fn new(config: &Config) -> Result<Self, ServerError> {
        let addr: SocketAddr = config
            .bind_address()
            .parse()
            .map_err(|_| ServerError::Address(config.bind_address()))?;
        let listener = net::listen(addr).map_err(ServerError::Bind)?;
        let addr = listener.local_addr().map_err(ServerError::Bind)?;
        let listener_fd = listener.as_raw_fd();
        let event_loop = EventLoop::new().map_err(ServerError::EventLoop)?;
        let state = Rc::new(RefCell::new(ServerState {
            listener,
            db: Db::new(),
            clients: HashMap::new(),
        }));
        Ok(Server {
            state,
            event_loop,
            listener_fd,
            addr,
        })
    }

    /// Address the listener actually bound (relevant with port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn state(&self) -> Rc<RefCell<ServerState>> {
        Rc::clone(&self.state)
    }

    pub fn event_loop_mut(&mut self) -> &mut EventLoop {
        &mut self.event_loop
    }

    /// Registers the accept handler and the expiration cron, then spins the
    /// reactor until shutdown.
    pub fn run(&mut self) {
        let state = Rc::clone(&self.state);
        self.event_loop.add_file_event(
            self.listener_fd,
            Direction::Readable,
            Rc::new(move |el, fd| accept_clients(&state, el, fd)),
        );

        let state = Rc::clone(&self.state);
        self.event_loop.add_time_event(
            TimeKind::Recurring,
            CRON_INTERVAL_MS,
            Rc::new(move |_el, _id| server_cron(&state)),
        );

        info!(addr = %self.addr, "server is up");
        self.event_loop.run();
    }
}

/// Listener readability: accept the whole backlog, one client per socket.
fn accept_clients(state: &Rc<RefCell<ServerState>>, el: &mut EventLoop, _fd: RawFd) {
    loop {
        let accepted = {
            let st = state.borrow();
            net::accept(&st.listener)
        };
        match accepted {
            Ok(Some((stream, addr))) => {
                let fd = stream.as_raw_fd();
                let client = Rc::new(RefCell::new(Client::new(fd, stream, addr)));
                state.borrow_mut().clients.insert(fd, client);

                let st = Rc::clone(state);
                el.add_file_event(
                    fd,
                    Direction::Readable,
                    Rc::new(move |el, fd| read_query(&st, el, fd)),
                );
                info!(fd, client = %addr, "accepted client");
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "accept failed");
                break;
            }
        }
    }
}

/// Client readability: drain the socket, then run the parser over whatever
/// is buffered and dispatch every complete command.
fn read_query(state: &Rc<RefCell<ServerState>>, el: &mut EventLoop, fd: RawFd) {
    let Some(client) = state.borrow().clients.get(&fd).cloned() else {
        return;
    };

    let drained = client.borrow_mut().read_from_socket();
    let open = match drained {
        Ok((n, SocketState::Open)) => {
            trace!(fd, bytes = n, "read from client");
            true
        }
        Ok((n, SocketState::Closed)) => {
            debug!(fd, bytes = n, "client closed connection");
            false
        }
        Err(e) => {
            warn!(fd, error = %e, "client read failed");
            false
        }
    };
    if !open {
        free_client(state, el, fd);
        return;
    }

    loop {
        let parsed = client.borrow_mut().next_command();
        match parsed {
            Ok(Some(args)) if args.is_empty() => continue,
            Ok(Some(args)) => {
                if !dispatch(state, el, &client, fd, &args) {
                    free_client(state, el, fd);
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(fd, error = %e, "protocol violation");
                free_client(state, el, fd);
                return;
            }
        }
    }
}

/// Runs one parsed command. Returns false when the client asked to go away.
fn dispatch(
    state: &Rc<RefCell<ServerState>>,
    el: &mut EventLoop,
    client: &Rc<RefCell<Client>>,
    fd: RawFd,
    args: &[Bytes],
) -> bool {
    let name = std::str::from_utf8(&args[0]).unwrap_or("");
    trace!(fd, command = name, "dispatch");

    // Quit closes the connection without a reply.
    if name == "quit" {
        debug!(fd, "client quit");
        return false;
    }

    {
        let mut st = state.borrow_mut();
        let mut c = client.borrow_mut();
        match commands::lookup(name) {
            // "unknow" is the reply text peers expect on this wire; keep it.
            None => c.add_reply(reply::error("unknow command")),
            Some(cmd) if cmd.arity != args.len() => {
                c.add_reply(reply::error("wrong number of args"))
            }
            Some(cmd) => cmd.call(&mut st.db, &mut c, args),
        }
    }

    if client.borrow().has_pending_replies() {
        let st = Rc::clone(state);
        el.add_file_event(
            fd,
            Direction::Writable,
            Rc::new(move |el, fd| send_replies(&st, el, fd)),
        );
    }
    true
}

/// Client writability: drain the reply queue; once empty, writable interest
/// comes off so idle clients don't spin the loop.
fn send_replies(state: &Rc<RefCell<ServerState>>, el: &mut EventLoop, fd: RawFd) {
    let Some(client) = state.borrow().clients.get(&fd).cloned() else {
        return;
    };
    let flushed = client.borrow_mut().flush_replies();
    match flushed {
        Ok(true) => {
            trace!(fd, "reply queue drained");
            el.remove_file_event(fd, Direction::Writable);
        }
        Ok(false) => {}
        Err(e) => {
            warn!(fd, error = %e, "client write failed");
            free_client(state, el, fd);
        }
    }
}

/// Tears a client down: both event registrations first (the fd must still
/// be open for the multiplexer), then the map entry; the socket closes when
/// the last handle drops.
fn free_client(state: &Rc<RefCell<ServerState>>, el: &mut EventLoop, fd: RawFd) {
    el.remove_file_event(fd, Direction::Readable);
    el.remove_file_event(fd, Direction::Writable);
    if state.borrow_mut().clients.remove(&fd).is_some() {
        info!(fd, "client freed");
    }
}

/// The recurring tick: a bounded random sweep of the expire dict.
fn server_cron(state: &Rc<RefCell<ServerState>>) {
    let removed = state.borrow_mut().db.sweep_expired(EXPIRE_CHECK_COUNT);
    if removed > 0 {
        debug!(removed, "expired keys swept");
    }
}
