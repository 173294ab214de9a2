#![allow(dead_code)]

use std::fs;
use std::io::Read;
use std::net::SocketAddr;
use std::os::fd::OwnedFd;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use reactor_httpd::server::connection::{ConnContext, HttpConn};
use reactor_httpd::server::epoll::{Epoll, TriggerMode};
use reactor_httpd::store::UserTable;
use tempfile::TempDir;

pub const INDEX: &str = "<html><body>index</body></html>";

/// Document root with a couple of files, a subdirectory and the landing pages.
pub fn document_root() -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("index.html"), INDEX).unwrap();
    fs::write(root.join("style.css"), "body { margin: 0; }").unwrap();
    fs::write(root.join("empty.txt"), "").unwrap();
    fs::create_dir(root.join("docs")).unwrap();
    reactor_httpd::static_files::pages::create_default_files(root).unwrap();
    for entry in fs::read_dir(root).unwrap() {
        let path = entry.unwrap().path();
        if path.is_file() {
            fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        }
    }
    dir
}

pub fn peer() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

/// A connection bound to one end of a socket pair; the other end is the client.
pub fn connect(
    root: &Path,
    mode: TriggerMode,
    users: Arc<UserTable>,
) -> (UnixStream, HttpConn, Arc<ConnContext>) {
    let ctx = Arc::new(ConnContext::new(Epoll::new().unwrap()));
    let (client, server) = UnixStream::pair().unwrap();
    server.set_nonblocking(true).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();

    let mut conn = HttpConn::new(Arc::clone(&ctx));
    conn.reset(
        OwnedFd::from(server),
        peer(),
        Arc::from(root),
        mode,
        true,
        users,
    )
    .unwrap();
    (client, conn, ctx)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

pub fn header<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.eq_ignore_ascii_case(name).then(|| value.trim())
    })
}

/// Reads one response. With `with_body` the body is read up to its
/// Content-Length; otherwise only the head is consumed.
pub fn read_response<R: Read>(client: &mut R, with_body: bool) -> (String, Vec<u8>) {
    let mut data = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(end) = find(&data, b"\r\n\r\n") {
            let head = String::from_utf8(data[..end + 4].to_vec()).unwrap();
            let len = if with_body {
                header(&head, "Content-Length").unwrap().parse().unwrap()
            } else {
                0
            };
            let start = end + 4;
            if data.len() >= start + len {
                return (head, data[start..start + len].to_vec());
            }
        }
        let n = client.read(&mut chunk).unwrap();
        assert!(n > 0, "connection closed mid-response");
        data.extend_from_slice(&chunk[..n]);
    }
}
