//! Server list parsing.

use std::fmt;
use std::path::PathBuf;

const DEFAULT_PORT: u16 = 11211;
const UNIX_SCHEME: &str = "unix://";

/// Where a pooled server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerAddress {
    Tcp { host: String, port: u16 },
    Unix(PathBuf),
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerAddress::Tcp { host, port } if host.contains(':') => write!(f, "[{host}]:{port}"),
            ServerAddress::Tcp { host, port } => write!(f, "{host}:{port}"),
            ServerAddress::Unix(path) => write!(f, "{UNIX_SCHEME}{}", path.display()),
        }
    }
}

/// One configured server with its last observed reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    /// The entry as written in the configuration.
    pub id: String,
    pub address: ServerAddress,
    pub last_known_alive: bool,
}

fn parse_entry(entry: &str) -> Option<ServerAddress> {
    if let Some(path) = entry.strip_prefix(UNIX_SCHEME) {
        if path.is_empty() {
            return None;
        }
        return Some(ServerAddress::Unix(PathBuf::from(path)));
    }

    // [::1]:11211 and [::1]
    if let Some(rest) = entry.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().ok()?,
            None if tail.is_empty() => DEFAULT_PORT,
            None => return None,
        };
        return Some(ServerAddress::Tcp { host: host.to_string(), port });
    }

    match entry.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() => {
            Some(ServerAddress::Tcp { host: host.to_string(), port: port.parse().ok()? })
        }
        Some(_) => None,
        None => Some(ServerAddress::Tcp { host: entry.to_string(), port: DEFAULT_PORT }),
    }
}

/// Parse a comma-separated server list. Unparseable entries are logged and skipped.
pub fn parse_hosts(hosts: &str) -> Vec<ServerDescriptor> {
    let mut servers: Vec<ServerDescriptor> = Vec::new();

    for entry in hosts.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        match parse_entry(entry) {
            Some(address) if servers.iter().any(|s| s.address == address) => {
                tracing::debug!(entry, "duplicate server entry ignored");
            }
            Some(address) => {
                servers.push(ServerDescriptor { id: entry.to_string(), address, last_known_alive: false });
            }
            None => tracing::warn!(entry, "ignoring unparseable server entry"),
        }
    }

    servers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tcp_and_unix() {
        let servers = parse_hosts("127.0.0.1:11211, cache.internal:11212,unix:///var/run/memcached.sock");
        assert_eq!(servers.len(), 3);
        assert_eq!(servers[0].address, ServerAddress::Tcp { host: "127.0.0.1".into(), port: 11211 });
        assert_eq!(servers[1].id, "cache.internal:11212");
        assert_eq!(servers[2].address, ServerAddress::Unix(PathBuf::from("/var/run/memcached.sock")));
        assert!(servers.iter().all(|s| !s.last_known_alive));
    }

    #[test]
    fn test_default_port_and_ipv6() {
        let servers = parse_hosts("localhost,[::1]:11300,[::1]");
        assert_eq!(servers[0].address, ServerAddress::Tcp { host: "localhost".into(), port: 11211 });
        assert_eq!(servers[1].address, ServerAddress::Tcp { host: "::1".into(), port: 11300 });
        assert_eq!(servers[2].address.to_string(), "[::1]:11211");
    }

    #[test]
    fn test_bad_entries_skipped() {
        let servers = parse_hosts("host:notaport,:11211,unix://,,  ,good:1");
        assert_eq!(servers.len(), 1);
        assert_eq!(servers[0].id, "good:1");
    }

    #[test]
    fn test_empty_list() {
        assert!(parse_hosts("").is_empty());
        assert!(parse_hosts(" , ").is_empty());
    }

    #[test]
    fn test_duplicates_collapsed() {
        assert_eq!(parse_hosts("a:1,a:1").len(), 1);
    }
}
