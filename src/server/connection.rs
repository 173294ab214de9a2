//! Per-connection HTTP state machine.
//!
//! An [`HttpConn`] owns one client socket together with a fixed read buffer,
//! a fixed header buffer and, while a file is being served, the mapping of
//! that file. The dispatcher and the workers drive it through
//! [`read_once`](HttpConn::read_once), [`process`](HttpConn::process) and
//! [`write`](HttpConn::write); [`SharedConn`] is the cross-thread wrapper the
//! worker pool sees.

use log::{debug, error, info, warn};
use std::fmt;
use std::fs;
use std::io::{self, IoSlice, Write};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::epoll::{Epoll, Interest, TriggerMode};
use super::http_status::{self, HttpStatus};
use super::mmap::MappedFile;
use super::request_parser::{self, Header, LineStatus, Method};
use crate::store::{StoreConn, UserTable};
use crate::threadpool::Job;

pub const READ_BUFFER_SIZE: usize = 2048;
pub const WRITE_BUFFER_SIZE: usize = 1024;

pub const SPLASH_PAGE: &str = "/judge.html";
pub const LOGIN_PAGE: &str = "/log.html";
pub const REGISTER_PAGE: &str = "/register.html";
pub const WELCOME_PAGE: &str = "/welcome.html";
pub const LOGIN_ERROR_PAGE: &str = "/logError.html";
pub const REGISTER_ERROR_PAGE: &str = "/registerError.html";

const LOGIN_ENDPOINT: &str = "/login";
const REGISTER_ENDPOINT: &str = "/register";

/// Main parser state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Header,
    Content,
}

/// Outcome of parsing and resolving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    /// Request incomplete; read more.
    NoRequest,
    /// Request complete; resolve the resource.
    GetRequest,
    BadRequest,
    NoResource,
    ForbiddenRequest,
    /// Resource resolved and ready to send.
    FileRequest,
    PayloadTooLarge,
    InternalError,
}

/// State shared by every connection of one server.
#[derive(Debug)]
pub struct ConnContext {
    pub epoll: Epoll,
    live: AtomicUsize,
}

impl ConnContext {
    pub fn new(epoll: Epoll) -> Self {
        Self {
            epoll,
            live: AtomicUsize::new(0),
        }
    }

    /// Number of connections currently bound to a socket.
    pub fn live_connections(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }
}

pub struct HttpConn {
    ctx: Arc<ConnContext>,
    socket: Option<OwnedFd>,
    address: Option<SocketAddr>,

    read_buf: Box<[u8; READ_BUFFER_SIZE]>,
    read_idx: usize,
    checked_idx: usize,
    start_line: usize,

    write_buf: Box<[u8; WRITE_BUFFER_SIZE]>,
    write_idx: usize,
    bytes_to_send: usize,
    bytes_have_send: usize,

    check_state: CheckState,
    method: Method,
    url: String,
    version: String,
    host: String,
    content_length: usize,
    linger: bool,
    cgi: bool,

    real_file: PathBuf,
    file_size: u64,
    content_type: &'static str,
    file_map: Option<MappedFile>,

    doc_root: Arc<Path>,
    trig_mode: TriggerMode,
    close_log: bool,
    credentials: Arc<UserTable>,
}

impl HttpConn {
    pub fn new(ctx: Arc<ConnContext>) -> Self {
        Self {
            ctx,
            socket: None,
            address: None,
            read_buf: Box::new([0; READ_BUFFER_SIZE]),
            read_idx: 0,
            checked_idx: 0,
            start_line: 0,
            write_buf: Box::new([0; WRITE_BUFFER_SIZE]),
            write_idx: 0,
            bytes_to_send: 0,
            bytes_have_send: 0,
            check_state: CheckState::RequestLine,
            method: Method::Get,
            url: String::new(),
            version: String::new(),
            host: String::new(),
            content_length: 0,
            linger: false,
            cgi: false,
            real_file: PathBuf::new(),
            file_size: 0,
            content_type: "text/html",
            file_map: None,
            doc_root: Arc::from(Path::new(".")),
            trig_mode: TriggerMode::Level,
            close_log: false,
            credentials: Arc::new(UserTable::new()),
        }
    }

    /// Binds the connection to a freshly accepted socket and registers it
    /// for one-shot reads.
    pub fn reset(
        &mut self,
        socket: OwnedFd,
        address: SocketAddr,
        doc_root: Arc<Path>,
        trig_mode: TriggerMode,
        close_log: bool,
        credentials: Arc<UserTable>,
    ) -> io::Result<()> {
        self.close();

        self.ctx.epoll.add(socket.as_raw_fd(), true, trig_mode)?;
        self.socket = Some(socket);
        self.address = Some(address);
        self.doc_root = doc_root;
        self.trig_mode = trig_mode;
        self.close_log = close_log;
        self.credentials = credentials;
        self.ctx.live.fetch_add(1, Ordering::AcqRel);

        self.init();
        Ok(())
    }

    /// Unregisters and closes the socket and drops any mapping. Idempotent.
    pub fn close(&mut self) {
        self.unmap();
        let Some(socket) = self.socket.take() else {
            return;
        };
        let fd = socket.as_raw_fd();
        if let Err(e) = self.ctx.epoll.delete(fd) {
            debug!("epoll delete failed on fd {}: {}", fd, e);
        }
        drop(socket);
        let live = self.ctx.live.fetch_sub(1, Ordering::AcqRel) - 1;
        if !self.close_log {
            info!("Closed connection on fd {} (live: {})", fd, live);
        }
    }

    pub fn fd(&self) -> Option<RawFd> {
        self.socket.as_ref().map(AsRawFd::as_raw_fd)
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    // Fresh parse state for the next request on this socket.
    fn init(&mut self) {
        self.read_idx = 0;
        self.checked_idx = 0;
        self.start_line = 0;
        self.write_idx = 0;
        self.bytes_to_send = 0;
        self.bytes_have_send = 0;
        self.check_state = CheckState::RequestLine;
        self.method = Method::Get;
        self.url.clear();
        self.version.clear();
        self.host.clear();
        self.content_length = 0;
        self.linger = false;
        self.cgi = false;
        self.real_file = PathBuf::new();
        self.file_size = 0;
        self.content_type = "text/html";
        self.file_map = None;
    }

    fn unmap(&mut self) {
        self.file_map = None;
    }

    /// Reads from the socket into the read buffer.
    ///
    /// Edge-triggered connections are drained until the socket would block
    /// or the buffer is full. Returns `false` when the connection should be
    /// torn down: peer closed, socket error, or the buffer was already full.
    pub fn read_once(&mut self) -> bool {
        let Some(fd) = self.fd() else {
            return false;
        };
        if self.read_idx >= READ_BUFFER_SIZE {
            return false;
        }

        match self.trig_mode {
            TriggerMode::Level => match recv(fd, &mut self.read_buf[self.read_idx..]) {
                Ok(0) => {
                    debug!("Connection closed by peer on fd {}", fd);
                    false
                }
                Ok(n) => {
                    self.read_idx += n;
                    true
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => true,
                Err(e) => {
                    debug!("Error reading from fd {}: {}", fd, e);
                    false
                }
            },
            TriggerMode::Edge => {
                while self.read_idx < READ_BUFFER_SIZE {
                    match recv(fd, &mut self.read_buf[self.read_idx..]) {
                        Ok(0) => {
                            debug!("Connection closed by peer on fd {}", fd);
                            return false;
                        }
                        Ok(n) => self.read_idx += n,
                        Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => {
                            debug!("Error reading from fd {}: {}", fd, e);
                            return false;
                        }
                    }
                }
                true
            }
        }
    }

    /// Parses what has been read and, once a request is complete, prepares
    /// its response. Always re-arms the socket: for reads while the request
    /// is incomplete, for writes once a response is queued.
    ///
    /// Returns `false` if no response could be produced; the socket is then
    /// shut down so the dispatcher sees a hang-up.
    pub fn process(&mut self, store: Option<&StoreConn>) -> bool {
        let read_ret = self.process_read(store);
        if read_ret == HttpCode::NoRequest {
            self.rearm(Interest::Read);
            return true;
        }

        if !self.process_write(read_ret) {
            self.shutdown();
            self.rearm(Interest::Read);
            return false;
        }
        self.rearm(Interest::Write);
        true
    }

    /// Outer state machine over the lines scanned so far.
    pub fn process_read(&mut self, store: Option<&StoreConn>) -> HttpCode {
        loop {
            let line = if self.check_state == CheckState::Content {
                self.start_line..self.read_idx
            } else {
                match request_parser::scan_line(&self.read_buf[..self.read_idx], &mut self.checked_idx) {
                    LineStatus::Ok => {}
                    LineStatus::Bad => return HttpCode::BadRequest,
                    LineStatus::Open if self.read_idx >= READ_BUFFER_SIZE => {
                        warn!("Request line exceeds {} bytes", READ_BUFFER_SIZE);
                        return HttpCode::BadRequest;
                    }
                    LineStatus::Open => return HttpCode::NoRequest,
                }
                let line = self.start_line..self.checked_idx - 2;
                self.start_line = self.checked_idx;
                line
            };

            match self.check_state {
                CheckState::RequestLine => {
                    if self.parse_request_line(line) == HttpCode::BadRequest {
                        return HttpCode::BadRequest;
                    }
                }
                CheckState::Header => match self.parse_headers(line) {
                    HttpCode::GetRequest => return self.do_request(store),
                    HttpCode::NoRequest => {}
                    other => return other,
                },
                CheckState::Content => {
                    return match self.parse_content() {
                        HttpCode::GetRequest => self.do_request(store),
                        other => other,
                    };
                }
            }
        }
    }

    fn parse_request_line(&mut self, line: std::ops::Range<usize>) -> HttpCode {
        let Some(request) = request_parser::parse_request_line(&self.read_buf[line]) else {
            return HttpCode::BadRequest;
        };

        self.method = request.method;
        self.cgi = request.method == Method::Post;
        self.version.clear();
        self.version.push_str(request.version);
        self.url.clear();
        if request.url == "/" {
            self.url.push_str(SPLASH_PAGE);
        } else {
            self.url.push_str(request.url);
        }

        self.check_state = CheckState::Header;
        HttpCode::NoRequest
    }

    fn parse_headers(&mut self, line: std::ops::Range<usize>) -> HttpCode {
        if line.is_empty() {
            if self.content_length == 0 || self.method != Method::Post {
                return HttpCode::GetRequest;
            }
            let body_end = self.start_line.checked_add(self.content_length);
            if body_end.is_none_or(|end| end > READ_BUFFER_SIZE) {
                warn!(
                    "Body of {} bytes does not fit the request buffer",
                    self.content_length
                );
                return HttpCode::PayloadTooLarge;
            }
            self.check_state = CheckState::Content;
            return HttpCode::NoRequest;
        }

        match request_parser::parse_header(&self.read_buf[line]) {
            Some(Header::Connection(value)) => {
                if value.eq_ignore_ascii_case("keep-alive") {
                    self.linger = true;
                } else if value.eq_ignore_ascii_case("close") {
                    self.linger = false;
                }
            }
            Some(Header::ContentLength(len)) => self.content_length = len,
            Some(Header::Host(host)) => {
                self.host.clear();
                self.host.push_str(host);
            }
            Some(Header::Other(name)) => debug!("Ignoring header {}", name),
            None => return HttpCode::BadRequest,
        }
        HttpCode::NoRequest
    }

    fn parse_content(&self) -> HttpCode {
        if self.read_idx >= self.start_line + self.content_length {
            HttpCode::GetRequest
        } else {
            HttpCode::NoRequest
        }
    }

    fn body(&self) -> &[u8] {
        &self.read_buf[self.start_line..self.start_line + self.content_length]
    }

    /// Resolves the request target to a file under the document root and
    /// maps it.
    fn do_request(&mut self, store: Option<&StoreConn>) -> HttpCode {
        let target = match (self.method, self.url.as_str()) {
            (Method::Post, LOGIN_ENDPOINT) => self.check_login(),
            (Method::Post, REGISTER_ENDPOINT) => self.register(store),
            (_, LOGIN_ENDPOINT) => LOGIN_PAGE,
            (_, REGISTER_ENDPOINT) => REGISTER_PAGE,
            _ => "",
        };
        if !target.is_empty() {
            self.url.clear();
            self.url.push_str(target);
        }

        if self.url.contains("..") {
            warn!("Path traversal attempt: {}", self.url);
            return HttpCode::ForbiddenRequest;
        }

        self.real_file = self.doc_root.join(self.url.trim_start_matches('/'));

        let metadata = match fs::metadata(&self.real_file) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
                return HttpCode::ForbiddenRequest;
            }
            Err(e) => {
                debug!("File not found: {:?}: {}", self.real_file, e);
                return HttpCode::NoResource;
            }
        };

        if metadata.is_dir() {
            warn!("Attempt to access directory: {:?}", self.real_file);
            return HttpCode::ForbiddenRequest;
        }
        if metadata.permissions().mode() & 0o004 == 0 {
            warn!("File not world-readable: {:?}", self.real_file);
            return HttpCode::ForbiddenRequest;
        }

        self.file_size = metadata.len();
        self.content_type = http_status::content_type(&self.real_file);
        if self.method == Method::Head || self.file_size == 0 {
            return HttpCode::FileRequest;
        }

        let Ok(len) = usize::try_from(self.file_size) else {
            return HttpCode::InternalError;
        };
        match MappedFile::open(&self.real_file, len) {
            Ok(map) => {
                self.file_map = Some(map);
                HttpCode::FileRequest
            }
            Err(e) => {
                error!("Failed to map {:?}: {}", self.real_file, e);
                HttpCode::InternalError
            }
        }
    }

    fn check_login(&self) -> &'static str {
        match request_parser::parse_credentials(self.body()) {
            Some(form) if self.credentials.verify(form.user, form.password) => {
                if !self.close_log {
                    info!("User {} logged in", form.user);
                }
                WELCOME_PAGE
            }
            _ => LOGIN_ERROR_PAGE,
        }
    }

    fn register(&self, store: Option<&StoreConn>) -> &'static str {
        let Some(form) = request_parser::parse_credentials(self.body()) else {
            return REGISTER_ERROR_PAGE;
        };
        if self.credentials.contains(form.user) {
            return REGISTER_ERROR_PAGE;
        }
        match store {
            Some(conn) if conn.register(form.user, form.password) => {
                if !self.close_log {
                    info!("Registered user {}", form.user);
                }
                LOGIN_PAGE
            }
            Some(_) => REGISTER_ERROR_PAGE,
            None => {
                warn!("No store connection available for registration");
                REGISTER_ERROR_PAGE
            }
        }
    }

    /// Fills the header buffer for `ret` and sets up the write vector.
    ///
    /// A response that does not fit the header buffer degrades to a 500.
    pub fn process_write(&mut self, ret: HttpCode) -> bool {
        self.write_idx = 0;
        let assembled = match ret {
            HttpCode::FileRequest => self.add_file_response(),
            HttpCode::BadRequest => self.add_error_response(HttpStatus::BadRequest),
            HttpCode::NoResource => self.add_error_response(HttpStatus::NotFound),
            HttpCode::ForbiddenRequest => self.add_error_response(HttpStatus::Forbidden),
            HttpCode::PayloadTooLarge => self.add_error_response(HttpStatus::PayloadTooLarge),
            HttpCode::InternalError => self.add_error_response(HttpStatus::InternalServerError),
            HttpCode::NoRequest | HttpCode::GetRequest => {
                return false;
            }
        };

        if !assembled {
            error!("Response for {:?} overflows the {}-byte header buffer", ret, WRITE_BUFFER_SIZE);
            self.write_idx = 0;
            self.unmap();
            if !self.add_error_response(HttpStatus::InternalServerError) {
                return false;
            }
        }

        self.bytes_to_send = self.write_idx + self.file_map.as_ref().map_or(0, |map| map.as_slice().len());
        self.bytes_have_send = 0;
        true
    }

    fn add_file_response(&mut self) -> bool {
        let status = HttpStatus::Ok;
        let content_type = self.content_type;
        let file_size = self.file_size;
        if !self.close_log {
            info!(
                "{} {:?} ({} bytes) for {:?}",
                status.code(),
                self.real_file,
                file_size,
                self.address
            );
        }
        self.add_status_line(status) && self.add_headers(file_size, content_type)
    }

    fn add_error_response(&mut self, status: HttpStatus) -> bool {
        let body = status.error_body();
        debug!("Error response {} for {:?}", status.code(), self.address);
        self.add_status_line(status)
            && self.add_headers(body.len() as u64, "text/html")
            && self.add_content(body)
    }

    fn add_response(&mut self, args: fmt::Arguments<'_>) -> bool {
        let mut cursor = io::Cursor::new(&mut self.write_buf[self.write_idx..]);
        if cursor.write_fmt(args).is_err() {
            return false;
        }
        self.write_idx += cursor.position() as usize;
        true
    }

    fn add_status_line(&mut self, status: HttpStatus) -> bool {
        self.add_response(format_args!("HTTP/1.1 {} {}\r\n", status.code(), status.text()))
    }

    fn add_headers(&mut self, content_length: u64, content_type: &str) -> bool {
        let connection = if self.linger { "keep-alive" } else { "close" };
        self.add_response(format_args!("Content-Type: {}\r\n", content_type))
            && self.add_response(format_args!("Content-Length: {}\r\n", content_length))
            && self.add_response(format_args!("Connection: {}\r\n", connection))
            && self.add_response(format_args!("\r\n"))
    }

    fn add_content(&mut self, content: &str) -> bool {
        self.add_response(format_args!("{}", content))
    }

    /// Flushes the queued response with vectored writes.
    ///
    /// A partial write keeps its progress and re-arms for writability. Once
    /// everything is sent the socket is re-armed for reads; the return value
    /// is `true` if the connection stays open for another request.
    pub fn write(&mut self) -> bool {
        let Some(fd) = self.fd() else {
            return false;
        };

        if self.bytes_to_send == 0 {
            self.rearm(Interest::Read);
            self.init();
            return true;
        }

        loop {
            let header_sent = self.bytes_have_send.min(self.write_idx);
            let file_sent = self.bytes_have_send - header_sent;
            let header = &self.write_buf[header_sent..self.write_idx];
            let file = self
                .file_map
                .as_ref()
                .map_or(&[][..], |map| &map.as_slice()[file_sent..]);

            let written = match (header.is_empty(), file.is_empty()) {
                (false, false) => writev(fd, &[IoSlice::new(header), IoSlice::new(file)]),
                (false, true) => writev(fd, &[IoSlice::new(header)]),
                (true, _) => writev(fd, &[IoSlice::new(file)]),
            };

            match written {
                Ok(n) => {
                    self.bytes_have_send += n;
                    self.bytes_to_send = self.bytes_to_send.saturating_sub(n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    self.rearm(Interest::Write);
                    return true;
                }
                Err(e) => {
                    debug!("Error writing to fd {}: {}", fd, e);
                    self.unmap();
                    return false;
                }
            }

            if self.bytes_to_send == 0 {
                self.unmap();
                self.rearm(Interest::Read);
                if self.linger {
                    self.init();
                    return true;
                }
                return false;
            }
        }
    }

    fn rearm(&self, interest: Interest) {
        if let Some(fd) = self.fd() {
            if let Err(e) = self.ctx.epoll.modify(fd, interest, self.trig_mode) {
                warn!("Failed to re-arm fd {} for {:?}: {}", fd, interest, e);
            }
        }
    }

    fn shutdown(&self) {
        if let Some(fd) = self.fd() {
            unsafe {
                libc::shutdown(fd, libc::SHUT_RDWR);
            }
        }
    }
}

impl Drop for HttpConn {
    fn drop(&mut self) {
        self.close();
    }
}

fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

fn writev(fd: RawFd, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
    // IoSlice is ABI compatible with iovec on unix.
    let n = unsafe {
        libc::writev(
            fd,
            bufs.as_ptr() as *const libc::iovec,
            bufs.len() as libc::c_int,
        )
    };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// An [`HttpConn`] shared between the dispatcher and the worker pool,
/// with the completion flags the dispatcher polls after a worker visit.
pub struct SharedConn {
    conn: Mutex<HttpConn>,
    improv: AtomicBool,
    timer_flag: AtomicBool,
}

impl SharedConn {
    pub fn new(conn: HttpConn) -> Self {
        Self {
            conn: Mutex::new(conn),
            improv: AtomicBool::new(false),
            timer_flag: AtomicBool::new(false),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, HttpConn> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes a completion published by a worker.
    ///
    /// `Some(true)` asks the dispatcher to tear the connection down.
    pub fn take_completion(&self) -> Option<bool> {
        if !self.improv.swap(false, Ordering::AcqRel) {
            return None;
        }
        Some(self.timer_flag.swap(false, Ordering::AcqRel))
    }
}

impl Job for SharedConn {
    fn read_once(&self) -> bool {
        self.lock().read_once()
    }

    fn write(&self) -> bool {
        self.lock().write()
    }

    fn process(&self, store: Option<&StoreConn>) -> bool {
        self.lock().process(store)
    }

    fn complete(&self, teardown: bool) {
        self.timer_flag.store(teardown, Ordering::Release);
        self.improv.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conn_with_request(request: &[u8], users: Arc<UserTable>) -> HttpConn {
        let ctx = Arc::new(ConnContext::new(Epoll::new().unwrap()));
        let mut conn = HttpConn::new(ctx);
        conn.credentials = users;
        conn.read_buf[..request.len()].copy_from_slice(request);
        conn.read_idx = request.len();
        conn
    }

    #[test]
    fn test_incomplete_headers_need_more_data() {
        let mut conn = conn_with_request(b"GET /a.html HTTP/1.1\r\nHost: x\r\n", Arc::default());
        assert_eq!(conn.process_read(None), HttpCode::NoRequest);
        assert_eq!(conn.check_state, CheckState::Header);
        assert_eq!(conn.url, "/a.html");
        assert_eq!(conn.host, "x");
    }

    #[test]
    fn test_unterminated_line_filling_buffer_is_bad_request() {
        let mut conn = conn_with_request(&[b'A'; READ_BUFFER_SIZE - 1], Arc::default());
        assert_eq!(conn.process_read(None), HttpCode::NoRequest);

        conn.read_buf[READ_BUFFER_SIZE - 1] = b'A';
        conn.read_idx = READ_BUFFER_SIZE;
        assert_eq!(conn.process_read(None), HttpCode::BadRequest);
    }

    #[test]
    fn test_oversized_body_is_rejected() {
        let mut conn = conn_with_request(
            b"POST /login HTTP/1.1\r\nContent-Length: 4096\r\n\r\n",
            Arc::default(),
        );
        assert_eq!(conn.process_read(None), HttpCode::PayloadTooLarge);
    }

    #[test]
    fn test_content_length_near_usize_max_is_rejected() {
        let request = format!(
            "POST /login HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            usize::MAX
        );
        let mut conn = conn_with_request(request.as_bytes(), Arc::default());
        assert_eq!(conn.process_read(None), HttpCode::PayloadTooLarge);
        assert_eq!(conn.check_state, CheckState::Header);
    }

    #[test]
    fn test_body_completes_once_fully_buffered() {
        let users = Arc::new(UserTable::from_pairs([("alice", "secret")]));
        let mut conn = conn_with_request(
            b"POST /login HTTP/1.1\r\nContent-Length: 22\r\n\r\nuser=alice&pass=",
            users,
        );
        assert_eq!(conn.process_read(None), HttpCode::NoRequest);
        assert_eq!(conn.check_state, CheckState::Content);

        let rest = b"secret";
        conn.read_buf[conn.read_idx..conn.read_idx + rest.len()].copy_from_slice(rest);
        conn.read_idx += rest.len();
        // No document root pages exist here, so the welcome page resolves to 404.
        assert_eq!(conn.process_read(None), HttpCode::NoResource);
        assert_eq!(conn.url, WELCOME_PAGE);
    }

    #[test]
    fn test_header_overflow_degrades_to_internal_error() {
        let mut conn = conn_with_request(b"", Arc::default());
        conn.linger = true;
        conn.content_type = Box::leak("x".repeat(WRITE_BUFFER_SIZE).into_boxed_str());

        assert!(conn.process_write(HttpCode::FileRequest));
        let head = std::str::from_utf8(&conn.write_buf[..conn.write_idx]).unwrap();
        assert!(head.starts_with("HTTP/1.1 500 Internal Server Error\r\n"));
        assert!(head.contains("Connection: keep-alive\r\n"));
        assert!(head.ends_with(HttpStatus::InternalServerError.error_body()));
        assert_eq!(conn.bytes_to_send, conn.write_idx);
    }

    #[test]
    fn test_error_response_layout() {
        let mut conn = conn_with_request(b"", Arc::default());
        assert!(conn.process_write(HttpCode::NoResource));
        let head = std::str::from_utf8(&conn.write_buf[..conn.write_idx]).unwrap();
        let body = HttpStatus::NotFound.error_body();
        let expected = format!(
            "HTTP/1.1 404 Not Found\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        );
        assert_eq!(head, expected);
    }

    #[test]
    fn test_incomplete_request_produces_no_response() {
        let mut conn = conn_with_request(b"GET / HTTP/1.1\r\n", Arc::default());
        assert!(!conn.process_write(HttpCode::NoRequest));
        assert_eq!(conn.bytes_to_send, 0);
    }
}
