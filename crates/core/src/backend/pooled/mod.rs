//! memcached server pool.
//!
//! Keys are sharded client-side across the configured servers by digest.
//! Each server keeps at most one open connection; a connection that fails
//! mid-command is dropped and re-dialled on the next use. Server failures
//! never change the backend's aliveness.
//!
//! No per-operation timeout is applied beyond what the OS socket enforces.

mod binary;
mod servers;
mod text;

use std::collections::BTreeMap;
use std::io;

use async_trait::async_trait;
use bytes::Bytes;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, BufStream};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use super::{Expiry, StorageEngine};
use crate::Error;
use crate::config::BackendKind;

pub use servers::{ServerAddress, ServerDescriptor, parse_hosts};

/// Longest key memcached accepts.
pub const MAX_KEY_LEN: usize = 250;

const STATUS_KEY: &str = "fullpage-status";
const STATUS_TTL: u32 = 60;

pub(crate) trait Io: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Io for T {}

pub(crate) type Connection = BufStream<Box<dyn Io>>;

/// Wire dialect spoken to every server in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Text,
    Binary,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Command<'a> {
    Get(&'a str),
    Set { key: &'a str, value: &'a Bytes, exptime: u32 },
    Delete(&'a str),
    Flush,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Reply {
    Value(Option<Bytes>),
    Done(bool),
}

impl Reply {
    fn into_value(self) -> Option<Bytes> {
        match self {
            Reply::Value(value) => value,
            Reply::Done(_) => None,
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, Reply::Done(true))
    }
}

/// Whether memcached would accept `key`.
pub fn is_valid_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_KEY_LEN && key.bytes().all(|b| b > b' ' && b != 0x7f)
}

async fn dial(
    address: &ServerAddress, protocol: Protocol, credentials: Option<&(String, String)>,
) -> io::Result<Connection> {
    let stream: Box<dyn Io> = match address {
        ServerAddress::Tcp { host, port } => {
            let stream = TcpStream::connect((host.as_str(), *port)).await?;
            stream.set_nodelay(true)?;
            Box::new(stream)
        }
        #[cfg(unix)]
        ServerAddress::Unix(path) => Box::new(tokio::net::UnixStream::connect(path).await?),
        #[cfg(not(unix))]
        ServerAddress::Unix(_) => {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "unix sockets are not supported here"));
        }
    };

    let mut conn = BufStream::new(stream);
    if protocol == Protocol::Binary
        && let Some((user, pass)) = credentials
    {
        binary::authenticate(&mut conn, user, pass).await?;
    }
    Ok(conn)
}

struct Shard {
    descriptor: ServerDescriptor,
    conn: Mutex<Option<Connection>>,
}

/// Pool of memcached servers.
pub struct PooledStore {
    shards: Vec<Shard>,
    protocol: Protocol,
    credentials: Option<(String, String)>,
    kind: BackendKind,
}

impl PooledStore {
    /// Reports itself as `memcache` for the text protocol and `memcached` for
    /// binary until [`PooledStore::with_kind`] says otherwise.
    pub fn new(servers: Vec<ServerDescriptor>, protocol: Protocol, credentials: Option<(String, String)>) -> Self {
        let shards =
            servers.into_iter().map(|descriptor| Shard { descriptor, conn: Mutex::new(None) }).collect();
        let kind = match protocol {
            Protocol::Text => BackendKind::Memcache,
            Protocol::Binary => BackendKind::Memcached,
        };
        Self { shards, protocol, credentials, kind }
    }

    /// The configured engine name, which may speak either protocol.
    pub fn with_kind(mut self, kind: BackendKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn servers(&self) -> impl Iterator<Item = &ServerDescriptor> {
        self.shards.iter().map(|s| &s.descriptor)
    }

    fn shard_for(&self, key: &str) -> Option<&Shard> {
        if self.shards.is_empty() {
            return None;
        }
        let digest = Sha256::digest(key.as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        let index = (u64::from_be_bytes(head) % self.shards.len() as u64) as usize;
        self.shards.get(index)
    }

    async fn run(&self, shard: &Shard, command: Command<'_>) -> io::Result<Reply> {
        let mut slot = shard.conn.lock().await;
        if slot.is_none() {
            *slot = Some(dial(&shard.descriptor.address, self.protocol, self.credentials.as_ref()).await?);
        }
        let Some(conn) = slot.as_mut() else {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "connection unavailable"));
        };

        let result = match self.protocol {
            Protocol::Text => text::execute(conn, &command).await,
            Protocol::Binary => binary::execute(conn, &command).await,
        };

        if let Err(e) = &result {
            tracing::debug!(server = %shard.descriptor.id, error = %e, "dropping broken connection");
            *slot = None;
        }
        result
    }

    async fn run_keyed(&self, key: &str, command: Command<'_>) -> Result<Reply, Error> {
        if !is_valid_key(key) {
            return Err(Error::StorageRead(format!("key not accepted by memcached: {key:?}")));
        }
        let shard = self.shard_for(key).ok_or_else(|| Error::BackendUnreachable("servers list is empty".into()))?;
        Ok(self.run(shard, command).await?)
    }
}

#[async_trait]
impl StorageEngine for PooledStore {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn init(&mut self) -> Result<(), Error> {
        if self.shards.is_empty() {
            return Err(Error::BackendUnreachable("servers list is empty".into()));
        }

        let protocol = self.protocol;
        let credentials = self.credentials.clone();
        for shard in &mut self.shards {
            match dial(&shard.descriptor.address, protocol, credentials.as_ref()).await {
                Ok(conn) => {
                    shard.descriptor.last_known_alive = true;
                    *shard.conn.get_mut() = Some(conn);
                    tracing::debug!(server = %shard.descriptor.id, "server added");
                }
                Err(e) => {
                    shard.descriptor.last_known_alive = false;
                    tracing::warn!(server = %shard.descriptor.id, error = %e, "server unreachable at init");
                }
            }
        }

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, Error> {
        Ok(self.run_keyed(key, Command::Get(key)).await?.into_value())
    }

    async fn set(&self, key: &str, value: Bytes, expiry: Expiry) -> Result<bool, Error> {
        let command = Command::Set { key, value: &value, exptime: expiry.wire_value() };
        match self.run_keyed(key, command).await {
            Ok(reply) => Ok(reply.is_done()),
            Err(Error::Io(e)) => Err(Error::StorageWrite(e.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn flush(&self) -> Result<bool, Error> {
        let mut flushed = true;
        for shard in &self.shards {
            match self.run(shard, Command::Flush).await {
                Ok(reply) => flushed &= reply.is_done(),
                Err(e) => {
                    tracing::warn!(server = %shard.descriptor.id, error = %e, "flush failed");
                    flushed = false;
                }
            }
        }
        Ok(flushed)
    }

    async fn delete(&self, key: &str) -> Result<bool, Error> {
        Ok(self.run_keyed(key, Command::Delete(key)).await?.is_done())
    }

    async fn status(&self) -> BTreeMap<String, bool> {
        let stamp = Bytes::from(chrono::Utc::now().timestamp().to_string());
        let mut report = BTreeMap::new();

        for shard in &self.shards {
            let command = Command::Set { key: STATUS_KEY, value: &stamp, exptime: STATUS_TTL };
            let alive = match self.run(shard, command).await {
                Ok(reply) => reply.is_done(),
                Err(e) => {
                    tracing::debug!(server = %shard.descriptor.id, error = %e, "status check failed");
                    false
                }
            };
            report.insert(shard.descriptor.id.clone(), alive);
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Minimal text-protocol memcached: get/set/delete/flush_all.
    async fn spawn_fake_memcached() -> (String, Arc<std::sync::Mutex<HashMap<String, Vec<u8>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let store: Arc<std::sync::Mutex<HashMap<String, Vec<u8>>>> = Arc::default();
        let shared = store.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else { return };
                let store = shared.clone();
                tokio::spawn(async move {
                    let mut stream = BufStream::new(stream);
                    loop {
                        let mut line = String::new();
                        if stream.read_line(&mut line).await.unwrap_or(0) == 0 {
                            return;
                        }
                        let parts: Vec<&str> = line.split_ascii_whitespace().collect();
                        let reply: Vec<u8> = match parts.as_slice() {
                            ["get", key] => match store.lock().unwrap().get(*key) {
                                Some(v) => {
                                    let mut out = format!("VALUE {key} 0 {}\r\n", v.len()).into_bytes();
                                    out.extend_from_slice(v);
                                    out.extend_from_slice(b"\r\nEND\r\n");
                                    out
                                }
                                None => b"END\r\n".to_vec(),
                            },
                            ["set", key, _flags, _exptime, len] => {
                                let len: usize = len.parse().unwrap();
                                let mut data = vec![0u8; len + 2];
                                stream.read_exact(&mut data).await.unwrap();
                                data.truncate(len);
                                store.lock().unwrap().insert(key.to_string(), data);
                                b"STORED\r\n".to_vec()
                            }
                            ["delete", key] => match store.lock().unwrap().remove(*key) {
                                Some(_) => b"DELETED\r\n".to_vec(),
                                None => b"NOT_FOUND\r\n".to_vec(),
                            },
                            ["flush_all"] => {
                                store.lock().unwrap().clear();
                                b"OK\r\n".to_vec()
                            }
                            _ => b"ERROR\r\n".to_vec(),
                        };
                        stream.write_all(&reply).await.unwrap();
                        stream.flush().await.unwrap();
                    }
                });
            }
        });

        (addr, store)
    }

    /// Minimal binary-protocol memcached with SASL PLAIN for `user`/`secret`.
    async fn spawn_fake_binary_memcached() -> (String, Arc<std::sync::Mutex<HashMap<Vec<u8>, Vec<u8>>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let store: Arc<std::sync::Mutex<HashMap<Vec<u8>, Vec<u8>>>> = Arc::default();
        let shared = store.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else { return };
                let store = shared.clone();
                tokio::spawn(async move {
                    let mut authenticated = false;
                    loop {
                        let mut header = [0u8; 24];
                        if stream.read_exact(&mut header).await.is_err() {
                            return;
                        }
                        let opcode = header[1];
                        let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
                        let extras_len = header[4] as usize;
                        let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
                        let mut body = vec![0u8; body_len];
                        stream.read_exact(&mut body).await.unwrap();
                        let key = body[extras_len..extras_len + key_len].to_vec();
                        let value = body[extras_len + key_len..].to_vec();

                        let (status, extras, payload): (u16, Vec<u8>, Vec<u8>) = match opcode {
                            0x21 if value == b"\0user\0secret" => {
                                authenticated = true;
                                (0, vec![], b"Authenticated".to_vec())
                            }
                            0x21 => (0x20, vec![], b"Auth failure".to_vec()),
                            _ if !authenticated => (0x20, vec![], vec![]),
                            0x00 => match store.lock().unwrap().get(&key) {
                                Some(v) => (0, vec![0, 0, 0, 0], v.clone()),
                                None => (1, vec![], b"Not found".to_vec()),
                            },
                            0x01 => {
                                store.lock().unwrap().insert(key, value);
                                (0, vec![], vec![])
                            }
                            0x04 => match store.lock().unwrap().remove(&key) {
                                Some(_) => (0, vec![], vec![]),
                                None => (1, vec![], vec![]),
                            },
                            0x08 => {
                                store.lock().unwrap().clear();
                                (0, vec![], vec![])
                            }
                            _ => (0x81, vec![], vec![]),
                        };

                        let mut reply = vec![0x81, opcode, 0, 0, extras.len() as u8, 0];
                        reply.extend_from_slice(&status.to_be_bytes());
                        reply.extend_from_slice(&((extras.len() + payload.len()) as u32).to_be_bytes());
                        reply.extend_from_slice(&[0u8; 12]);
                        reply.extend_from_slice(&extras);
                        reply.extend_from_slice(&payload);
                        stream.write_all(&reply).await.unwrap();
                    }
                });
            }
        });

        (addr, store)
    }

    #[test]
    fn test_key_validation() {
        assert!(is_valid_key("data-https://example.com/post/"));
        assert!(!is_valid_key(""));
        assert!(!is_valid_key("has space"));
        assert!(!is_valid_key("tab\there"));
        assert!(!is_valid_key(&"k".repeat(251)));
        assert!(is_valid_key(&"k".repeat(250)));
    }

    #[test]
    fn test_sharding_is_stable() {
        let servers = parse_hosts("a:1,b:2,c:3");
        let store = PooledStore::new(servers, Protocol::Text, None);
        let first = store.shard_for("data-x").map(|s| s.descriptor.id.clone());
        let second = store.shard_for("data-x").map(|s| s.descriptor.id.clone());
        assert_eq!(first, second);
        assert!(first.is_some());
    }

    #[tokio::test]
    async fn test_empty_pool_fails_init() {
        let mut store = PooledStore::new(Vec::new(), Protocol::Text, None);
        assert!(matches!(store.init().await, Err(Error::BackendUnreachable(_))));
    }

    #[tokio::test]
    async fn test_roundtrip_against_server() {
        let (addr, raw) = spawn_fake_memcached().await;
        let mut store = PooledStore::new(parse_hosts(&addr), Protocol::Text, None);
        store.init().await.unwrap();
        assert!(store.servers().all(|s| s.last_known_alive));

        assert!(store.set("data-k", Bytes::from_static(b"<html/>"), Expiry::Relative(60)).await.unwrap());
        assert_eq!(store.get("data-k").await.unwrap(), Some(Bytes::from_static(b"<html/>")));
        assert!(store.delete("data-k").await.unwrap());
        assert!(!store.delete("data-k").await.unwrap());

        store.set("a", Bytes::from_static(b"1"), Expiry::Never).await.unwrap();
        assert!(store.flush().await.unwrap());
        assert!(raw.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_binary_roundtrip_with_sasl() {
        let (addr, raw) = spawn_fake_binary_memcached().await;
        let credentials = Some(("user".to_string(), "secret".to_string()));
        let mut store = PooledStore::new(parse_hosts(&addr), Protocol::Binary, credentials);
        store.init().await.unwrap();
        assert!(store.servers().all(|s| s.last_known_alive));

        assert!(store.set("data-k", Bytes::from_static(b"<html/>"), Expiry::Relative(60)).await.unwrap());
        assert_eq!(store.get("data-k").await.unwrap(), Some(Bytes::from_static(b"<html/>")));
        assert_eq!(store.get("data-missing").await.unwrap(), None);
        assert!(store.delete("data-k").await.unwrap());
        assert!(!store.delete("data-k").await.unwrap());

        store.set("a", Bytes::from_static(b"1"), Expiry::Never).await.unwrap();
        assert!(store.flush().await.unwrap());
        assert!(raw.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_binary_rejected_credentials() {
        let (addr, raw) = spawn_fake_binary_memcached().await;
        let credentials = Some(("user".to_string(), "wrong".to_string()));
        let mut store = PooledStore::new(parse_hosts(&addr), Protocol::Binary, credentials);
        store.init().await.unwrap();
        assert!(store.servers().all(|s| !s.last_known_alive));

        assert!(store.set("data-k", Bytes::from_static(b"x"), Expiry::Never).await.is_err());
        assert!(raw.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_checks_each_server() {
        let (addr, raw) = spawn_fake_memcached().await;
        let store = PooledStore::new(parse_hosts(&format!("{addr},127.0.0.1:1")), Protocol::Text, None);

        let report = store.status().await;
        assert_eq!(report.get(&addr), Some(&true));
        assert_eq!(report.get("127.0.0.1:1"), Some(&false));
        assert!(raw.lock().unwrap().contains_key(STATUS_KEY));
    }

    #[tokio::test]
    async fn test_unreachable_server_keeps_engine_up() {
        let mut store = PooledStore::new(parse_hosts("127.0.0.1:1"), Protocol::Text, None);
        assert!(store.init().await.is_ok());
        assert!(store.get("k").await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_io() {
        let store = PooledStore::new(parse_hosts("127.0.0.1:1"), Protocol::Text, None);
        assert!(matches!(store.get("bad key").await, Err(Error::StorageRead(_))));
    }
}
