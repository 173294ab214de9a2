pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod epoll;
pub mod http_status;
pub mod mmap;
pub mod request_parser;

use libc::{EPOLLERR, EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLRDHUP};
use log::{debug, error, info, warn};
use std::io::{self, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::error::Result;
use crate::static_files::pages;
use crate::store::{StorePool, UserTable};
use crate::threadpool::{ActorModel, Op, ThreadPool};
use crate::timer::TimerList;
use config::ServerConfig;
use connection::{ConnContext, HttpConn, SharedConn};
use connection_manager::{Client, ClientData, ConnectionManager};
use epoll::{Epoll, TriggerMode};

const MAX_EVENT_NUMBER: usize = 10000;
/// Wait while worker completions are outstanding.
const COMPLETION_POLL_MS: i32 = 5;
/// Upper bound on one wait so a stop request is noticed.
const MAX_WAIT_MS: u128 = 500;

const BUSY_MESSAGE: &[u8] = b"Internal server busy";

/// Event dispatcher: accepts clients, routes readiness to the worker pool
/// and closes idle connections.
pub struct HttpServer {
    config: ServerConfig,
    listener: TcpListener,
    ctx: Arc<ConnContext>,
    clients: ConnectionManager,
    timers: TimerList<ClientData>,
    pool: ThreadPool<SharedConn>,
    users: Arc<UserTable>,
    doc_root: Arc<Path>,
    stop: Arc<AtomicBool>,
}

impl HttpServer {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let addr = format!("{}:{}", config.host, config.port);
        let listener = TcpListener::bind(&addr)?;
        listener.set_nonblocking(true)?;
        if config.linger {
            epoll::set_linger(listener.as_raw_fd())?;
        }

        let users = match &config.users {
            Some(path) => UserTable::load(path)?,
            None => UserTable::new(),
        };
        let users = Arc::new(users);

        let store = Arc::new(StorePool::new(Arc::clone(&users), config.store_connections)?);
        let pool = ThreadPool::new(config.actor_model, store, config.threads, config.max_requests)?;

        let epoll = Epoll::new()?;
        epoll.add(listener.as_raw_fd(), false, config.listen_trigger)?;

        pages::create_default_files(&config.document_root)?;

        info!("Server started on {}", addr);

        Ok(Self {
            config: config.clone(),
            listener,
            ctx: Arc::new(ConnContext::new(epoll)),
            clients: ConnectionManager::new(config.max_connections),
            timers: TimerList::new(),
            pool,
            users,
            doc_root: Arc::from(config.document_root.as_path()),
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Flag that makes [`run`](Self::run) return once set.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn live_connections(&self) -> usize {
        self.ctx.live_connections()
    }

    pub fn run(&mut self) -> Result<()> {
        info!(
            "Server running with {} threads, {:?} model",
            self.pool.workers(),
            self.pool.model()
        );

        let listener_fd = self.listener.as_raw_fd();
        let tick_interval = self.config.tick_interval();
        let mut events = epoll::event_buffer(MAX_EVENT_NUMBER);
        let mut next_tick = Instant::now() + tick_interval;

        while !self.stop.load(Ordering::Acquire) {
            let timeout = if self.clients.has_in_flight() {
                COMPLETION_POLL_MS
            } else {
                let until_tick = next_tick.saturating_duration_since(Instant::now());
                until_tick.as_millis().min(MAX_WAIT_MS) as i32
            };

            let ready = match self.ctx.epoll.wait(&mut events, timeout) {
                Ok(ready) => ready,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => 0,
                Err(e) => {
                    error!("epoll wait failed: {}", e);
                    return Err(e.into());
                }
            };

            for event in &events[..ready] {
                let fd = event.u64 as RawFd;
                let flags = event.events as i32;

                if fd == listener_fd {
                    self.accept_new_connections();
                } else if flags & (EPOLLRDHUP | EPOLLHUP | EPOLLERR) != 0 {
                    debug!("Hang-up on fd {}", fd);
                    self.close_client(fd);
                } else if flags & EPOLLIN != 0 {
                    self.handle_readable(fd);
                } else if flags & EPOLLOUT != 0 {
                    self.handle_writable(fd);
                }
            }

            if self.pool.model() == ActorModel::Reactor {
                self.collect_completions();
            }

            let now = Instant::now();
            if now >= next_tick {
                self.expire_idle(now);
                next_tick = now + tick_interval;
            }
        }

        let clients = self.clients.drain();
        info!("Stopping server, closing {} connections", clients.len());
        for (_, client) in clients {
            self.timers.remove(client.timer);
            client.conn.lock().close();
        }
        Ok(())
    }

    fn accept_new_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => self.register_client(stream, addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    error!("Error accepting connection: {}", e);
                    break;
                }
            }
            if self.config.listen_trigger == TriggerMode::Level {
                break;
            }
        }
    }

    fn register_client(&mut self, mut stream: TcpStream, addr: SocketAddr) {
        if self.clients.is_full() {
            warn!(
                "Maximum connections reached, rejecting connection from {}",
                addr
            );
            if let Err(e) = stream.write_all(BUSY_MESSAGE) {
                debug!("Failed to notify {}: {}", addr, e);
            }
            return;
        }

        if let Err(e) = stream.set_nonblocking(true) {
            error!("Failed to set non-blocking: {}", e);
            return;
        }
        let socket = OwnedFd::from(stream);
        let fd = socket.as_raw_fd();

        let mut conn = HttpConn::new(Arc::clone(&self.ctx));
        if let Err(e) = conn.reset(
            socket,
            addr,
            Arc::clone(&self.doc_root),
            self.config.conn_trigger,
            self.config.close_log,
            Arc::clone(&self.users),
        ) {
            error!("Failed to register connection from {}: {}", addr, e);
            return;
        }

        let expire = Instant::now() + self.config.idle_timeout();
        let timer = self.timers.add(expire, ClientData { fd, address: addr });
        let client = Client {
            conn: Arc::new(SharedConn::new(conn)),
            timer,
            address: addr,
            in_flight: None,
            deferred: None,
        };
        if !self.clients.add_connection(fd, client) {
            // Dropping the rejected client closes its socket.
            warn!("Connection table full, dropping {}", addr);
            self.timers.remove(timer);
            return;
        }

        info!(
            "Accepted connection from {} (live: {})",
            addr,
            self.ctx.live_connections()
        );
    }

    fn handle_readable(&mut self, fd: RawFd) {
        match self.pool.model() {
            ActorModel::Reactor => self.submit_to_worker(fd, Op::Read),
            ActorModel::Proactor => {
                let Some(client) = self.clients.get(fd) else {
                    return;
                };
                let conn = Arc::clone(&client.conn);
                let address = client.address;

                if !conn.lock().read_once() {
                    self.close_client(fd);
                    return;
                }
                debug!("Read data from {}", address);

                if !self.pool.submit(conn, Op::Read) {
                    warn!("Request queue full, dropping connection from {}", address);
                    self.close_client(fd);
                    return;
                }
                self.refresh_timer(fd);
            }
        }
    }

    fn handle_writable(&mut self, fd: RawFd) {
        match self.pool.model() {
            ActorModel::Reactor => self.submit_to_worker(fd, Op::Write),
            ActorModel::Proactor => {
                let Some(client) = self.clients.get(fd) else {
                    return;
                };
                let keep = client.conn.lock().write();
                if !keep {
                    self.close_client(fd);
                }
            }
        }
    }

    /// Reactor mode: hands the operation to a worker, or defers it while the
    /// previous one for this client is still running.
    fn submit_to_worker(&mut self, fd: RawFd, op: Op) {
        let Some(client) = self.clients.get_mut(fd) else {
            return;
        };
        if client.in_flight.is_some() {
            client.deferred = Some(op);
            return;
        }

        let submitted = self.pool.submit(Arc::clone(&client.conn), op);
        if submitted {
            client.in_flight = Some(op);
        } else {
            warn!(
                "Request queue full, dropping connection from {}",
                client.address
            );
            self.close_client(fd);
        }
    }

    fn collect_completions(&mut self) {
        for fd in self.clients.in_flight_fds() {
            let Some(client) = self.clients.get_mut(fd) else {
                continue;
            };
            let Some(teardown) = client.conn.take_completion() else {
                continue;
            };
            let op = client.in_flight.take();
            let deferred = client.deferred.take();

            if teardown {
                self.close_client(fd);
                continue;
            }
            if op == Some(Op::Read) {
                self.refresh_timer(fd);
            }
            if let Some(op) = deferred {
                self.submit_to_worker(fd, op);
            }
        }
    }

    fn expire_idle(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.timers.tick(now, |_, data| expired.push(data));
        for data in expired {
            info!("Connection from {} timed out", data.address);
            self.close_client(data.fd);
        }
    }

    fn refresh_timer(&mut self, fd: RawFd) {
        let Some(client) = self.clients.get(fd) else {
            return;
        };
        let expire = Instant::now() + self.config.idle_timeout();
        if self.timers.adjust(client.timer, expire) {
            debug!("Adjusted timer of {}", client.address);
        }
    }

    fn close_client(&mut self, fd: RawFd) {
        let Some(client) = self.clients.remove_connection(fd) else {
            return;
        };
        self.timers.remove(client.timer);
        client.conn.lock().close();
        debug!("Removed client {}", client.address);
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        for (_, client) in self.clients.drain() {
            client.conn.lock().close();
        }
    }
}

