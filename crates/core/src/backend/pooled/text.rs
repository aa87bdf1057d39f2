//! memcached ASCII protocol.

use std::io;

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt};

use super::{Command, Connection, Reply};

async fn read_line(conn: &mut Connection) -> io::Result<String> {
    let mut line = Vec::new();
    let read = conn.read_until(b'\n', &mut line).await?;
    if read == 0 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by server"));
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn unexpected(reply: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("unexpected reply: {reply}"))
}

async fn read_value(conn: &mut Connection) -> io::Result<Option<Bytes>> {
    let header = read_line(conn).await?;
    if header == "END" {
        return Ok(None);
    }

    // VALUE <key> <flags> <bytes> [<cas>]
    let mut parts = header.split_ascii_whitespace();
    if parts.next() != Some("VALUE") {
        return Err(unexpected(&header));
    }
    let len: usize = parts.nth(2).and_then(|n| n.parse().ok()).ok_or_else(|| unexpected(&header))?;

    let mut data = vec![0u8; len + 2];
    conn.read_exact(&mut data).await?;
    data.truncate(len);

    let end = read_line(conn).await?;
    if end != "END" {
        return Err(unexpected(&end));
    }
    Ok(Some(Bytes::from(data)))
}

pub(super) async fn execute(conn: &mut Connection, command: &Command<'_>) -> io::Result<Reply> {
    match command {
        Command::Get(key) => {
            conn.write_all(format!("get {key}\r\n").as_bytes()).await?;
            conn.flush().await?;
            Ok(Reply::Value(read_value(conn).await?))
        }
        Command::Set { key, value, exptime } => {
            conn.write_all(format!("set {key} 0 {exptime} {}\r\n", value.len()).as_bytes()).await?;
            conn.write_all(value).await?;
            conn.write_all(b"\r\n").await?;
            conn.flush().await?;

            let reply = read_line(conn).await?;
            match reply.as_str() {
                "STORED" => Ok(Reply::Done(true)),
                "NOT_STORED" => Ok(Reply::Done(false)),
                other if other.starts_with("SERVER_ERROR") => Ok(Reply::Done(false)),
                other => Err(unexpected(other)),
            }
        }
        Command::Delete(key) => {
            conn.write_all(format!("delete {key}\r\n").as_bytes()).await?;
            conn.flush().await?;

            let reply = read_line(conn).await?;
            match reply.as_str() {
                "DELETED" => Ok(Reply::Done(true)),
                "NOT_FOUND" => Ok(Reply::Done(false)),
                other => Err(unexpected(other)),
            }
        }
        Command::Flush => {
            conn.write_all(b"flush_all\r\n").await?;
            conn.flush().await?;

            let reply = read_line(conn).await?;
            match reply.as_str() {
                "OK" => Ok(Reply::Done(true)),
                other => Err(unexpected(other)),
            }
        }
    }
}
