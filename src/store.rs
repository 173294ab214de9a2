//! In-memory user table and the pool of backing-store connections that
//! workers borrow while handling a request.

use log::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::ops::Deref;
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use crate::error::{Error, Result};
use crate::sync::Semaphore;

/// User name to password mapping, loaded once at startup.
#[derive(Debug, Default)]
pub struct UserTable {
    users: RwLock<HashMap<String, String>>,
}

impl UserTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let users = pairs
            .into_iter()
            .map(|(name, password)| (name.into(), password.into()))
            .collect();
        Self {
            users: RwLock::new(users),
        }
    }

    /// Reads `name:password` lines; blank lines and `#` comments are skipped.
    pub fn load(path: &Path) -> io::Result<Self> {
        let content = fs::read_to_string(path)?;
        let mut users = HashMap::new();

        for (lineno, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(':') {
                Some((name, password)) if !name.trim().is_empty() => {
                    users.insert(name.trim().to_string(), password.trim().to_string());
                }
                _ => warn!("Skipping malformed user entry at {:?}:{}", path, lineno + 1),
            }
        }

        info!("Loaded {} users from {:?}", users.len(), path);
        Ok(Self {
            users: RwLock::new(users),
        })
    }

    pub fn verify(&self, name: &str, password: &str) -> bool {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.get(name).is_some_and(|stored| stored == password)
    }

    pub fn contains(&self, name: &str) -> bool {
        let users = self.users.read().unwrap_or_else(PoisonError::into_inner);
        users.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.users.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_new(&self, name: &str, password: &str) -> bool {
        let mut users = self.users.write().unwrap_or_else(PoisonError::into_inner);
        if users.contains_key(name) {
            return false;
        }
        users.insert(name.to_string(), password.to_string());
        true
    }
}

/// One backing-store connection.
#[derive(Debug)]
pub struct StoreConn {
    id: usize,
    table: Arc<UserTable>,
}

impl StoreConn {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Adds a user if the name is free. The table lives in memory only.
    pub fn register(&self, name: &str, password: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let inserted = self.table.insert_new(name, password);
        debug!("Store conn {} register {:?}: {}", self.id, name, inserted);
        inserted
    }
}

/// Fixed-size pool of [`StoreConn`]s shared by the worker threads.
pub struct StorePool {
    conns: Mutex<VecDeque<StoreConn>>,
    available: Semaphore,
}

impl StorePool {
    pub fn new(table: Arc<UserTable>, size: usize) -> Result<Self> {
        if size == 0 {
            return Err(Error::Config("store pool needs at least one connection".into()));
        }
        let permits = u32::try_from(size)
            .map_err(|_| Error::Config(format!("store pool size {} is too large", size)))?;

        let conns = (0..size)
            .map(|id| StoreConn {
                id,
                table: Arc::clone(&table),
            })
            .collect();

        Ok(Self {
            conns: Mutex::new(conns),
            available: Semaphore::new(permits)?,
        })
    }

    /// Borrows a connection, blocking until one is free.
    ///
    /// The connection goes back to the pool when the guard is dropped.
    pub fn acquire(&self) -> Option<PooledConn<'_>> {
        if !self.available.wait() {
            return None;
        }
        let conn = self
            .conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match conn {
            Some(conn) => Some(PooledConn {
                pool: self,
                conn: Some(conn),
            }),
            None => {
                self.post_permit();
                None
            }
        }
    }

    pub fn free_count(&self) -> usize {
        self.conns.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, conn: StoreConn) {
        self.conns
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(conn);
        self.post_permit();
    }

    fn post_permit(&self) {
        if let Err(e) = self.available.post() {
            error!("Failed to release store permit: {}", e);
        }
    }
}

/// Scoped borrow of a [`StoreConn`].
pub struct PooledConn<'a> {
    pool: &'a StorePool,
    conn: Option<StoreConn>,
}

impl Deref for PooledConn<'_> {
    type Target = StoreConn;

    fn deref(&self) -> &StoreConn {
        match &self.conn {
            Some(conn) => conn,
            None => unreachable!("pooled connection used after release"),
        }
    }
}

impl Drop for PooledConn<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_verify_and_register() {
        let table = Arc::new(UserTable::from_pairs([("alice", "secret")]));
        assert!(table.verify("alice", "secret"));
        assert!(!table.verify("alice", "wrong"));
        assert!(!table.verify("bob", "secret"));

        let pool = StorePool::new(Arc::clone(&table), 1).unwrap();
        let conn = pool.acquire().unwrap();
        assert!(!conn.register("alice", "other"));
        assert!(conn.register("bob", "hunter2"));
        assert!(!conn.register("", "x"));
        assert!(table.verify("bob", "hunter2"));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_guard_returns_connection_on_drop() {
        let pool = StorePool::new(Arc::new(UserTable::new()), 2).unwrap();
        assert_eq!(pool.free_count(), 2);
        {
            let first = pool.acquire().unwrap();
            let second = pool.acquire().unwrap();
            assert_ne!(first.id(), second.id());
            assert_eq!(pool.free_count(), 0);
        }
        assert_eq!(pool.free_count(), 2);
        assert!(pool.acquire().is_some());
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_zero_sized_pool_is_rejected() {
        let result = StorePool::new(Arc::new(UserTable::new()), 0);
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_load_users_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# accounts").unwrap();
        writeln!(file, "alice:secret").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "no-separator").unwrap();
        writeln!(file, " bob : pw ").unwrap();

        let table = UserTable::load(file.path()).unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.verify("alice", "secret"));
        assert!(table.verify("bob", "pw"));
    }
}
