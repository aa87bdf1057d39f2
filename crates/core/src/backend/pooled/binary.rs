//! memcached binary protocol, including SASL PLAIN authentication.

use std::io;

use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::{Command, Connection, Reply};

const REQUEST_MAGIC: u8 = 0x80;
const RESPONSE_MAGIC: u8 = 0x81;
const HEADER_LEN: usize = 24;

const OP_GET: u8 = 0x00;
const OP_SET: u8 = 0x01;
const OP_DELETE: u8 = 0x04;
const OP_FLUSH: u8 = 0x08;
const OP_SASL_AUTH: u8 = 0x21;

const STATUS_OK: u16 = 0x0000;
const STATUS_KEY_NOT_FOUND: u16 = 0x0001;
const STATUS_AUTH_ERROR: u16 = 0x0020;

#[derive(Debug)]
struct Response {
    status: u16,
    extras_len: usize,
    key_len: usize,
    body: Bytes,
}

impl Response {
    fn value(&self) -> Bytes {
        self.body.slice((self.extras_len + self.key_len).min(self.body.len())..)
    }
}

fn encode_request(opcode: u8, extras: &[u8], key: &[u8], value: &[u8]) -> BytesMut {
    let body_len = extras.len() + key.len() + value.len();
    let mut buf = BytesMut::with_capacity(HEADER_LEN + body_len);

    buf.put_u8(REQUEST_MAGIC);
    buf.put_u8(opcode);
    buf.put_u16(key.len() as u16);
    buf.put_u8(extras.len() as u8);
    buf.put_u8(0); // data type
    buf.put_u16(0); // vbucket
    buf.put_u32(body_len as u32);
    buf.put_u32(0); // opaque
    buf.put_u64(0); // cas
    buf.put_slice(extras);
    buf.put_slice(key);
    buf.put_slice(value);

    buf
}

async fn roundtrip(conn: &mut Connection, request: BytesMut) -> io::Result<Response> {
    conn.write_all(&request).await?;
    conn.flush().await?;

    let mut header = [0u8; HEADER_LEN];
    conn.read_exact(&mut header).await?;

    if header[0] != RESPONSE_MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, format!("bad response magic {:#04x}", header[0])));
    }

    let key_len = u16::from_be_bytes([header[2], header[3]]) as usize;
    let extras_len = header[4] as usize;
    let status = u16::from_be_bytes([header[6], header[7]]);
    let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;

    let mut body = vec![0u8; body_len];
    conn.read_exact(&mut body).await?;

    Ok(Response { status, extras_len, key_len, body: Bytes::from(body) })
}

fn check_key_len(key: &str) -> io::Result<()> {
    if key.len() > u16::MAX as usize {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "key too long"));
    }
    Ok(())
}

pub(super) async fn execute(conn: &mut Connection, command: &Command<'_>) -> io::Result<Reply> {
    match command {
        Command::Get(key) => {
            check_key_len(key)?;
            let response = roundtrip(conn, encode_request(OP_GET, &[], key.as_bytes(), &[])).await?;
            match response.status {
                STATUS_OK => Ok(Reply::Value(Some(response.value()))),
                STATUS_KEY_NOT_FOUND => Ok(Reply::Value(None)),
                status => {
                    tracing::debug!(status, "get rejected by server");
                    Ok(Reply::Value(None))
                }
            }
        }
        Command::Set { key, value, exptime } => {
            check_key_len(key)?;
            let mut extras = [0u8; 8];
            extras[4..].copy_from_slice(&exptime.to_be_bytes());

            let response = roundtrip(conn, encode_request(OP_SET, &extras, key.as_bytes(), value)).await?;
            Ok(Reply::Done(response.status == STATUS_OK))
        }
        Command::Delete(key) => {
            check_key_len(key)?;
            let response = roundtrip(conn, encode_request(OP_DELETE, &[], key.as_bytes(), &[])).await?;
            Ok(Reply::Done(response.status == STATUS_OK))
        }
        Command::Flush => {
            let response = roundtrip(conn, encode_request(OP_FLUSH, &[], &[], &[])).await?;
            Ok(Reply::Done(response.status == STATUS_OK))
        }
    }
}

/// Authenticate a fresh connection with SASL PLAIN.
pub(super) async fn authenticate(conn: &mut Connection, user: &str, pass: &str) -> io::Result<()> {
    let mut token = Vec::with_capacity(user.len() + pass.len() + 2);
    token.push(0);
    token.extend_from_slice(user.as_bytes());
    token.push(0);
    token.extend_from_slice(pass.as_bytes());

    let response = roundtrip(conn, encode_request(OP_SASL_AUTH, &[], b"PLAIN", &token)).await?;
    match response.status {
        STATUS_OK => Ok(()),
        STATUS_AUTH_ERROR => Err(io::Error::new(io::ErrorKind::PermissionDenied, "SASL authentication rejected")),
        status => Err(io::Error::other(format!("SASL authentication failed with status {status:#06x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{BufStream, DuplexStream, duplex};

    fn pair() -> (Connection, DuplexStream) {
        let (client, server) = duplex(4096);
        (BufStream::new(Box::new(client)), server)
    }

    fn response(opcode: u8, status: u16, extras: &[u8], value: &[u8]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u8(RESPONSE_MAGIC);
        buf.put_u8(opcode);
        buf.put_u16(0);
        buf.put_u8(extras.len() as u8);
        buf.put_u8(0);
        buf.put_u16(status);
        buf.put_u32((extras.len() + value.len()) as u32);
        buf.put_u32(0);
        buf.put_u64(0);
        buf.put_slice(extras);
        buf.put_slice(value);
        buf.to_vec()
    }

    async fn read_request(server: &mut DuplexStream) -> (Vec<u8>, Vec<u8>) {
        let mut header = vec![0u8; HEADER_LEN];
        server.read_exact(&mut header).await.unwrap();
        let body_len = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;
        let mut body = vec![0u8; body_len];
        server.read_exact(&mut body).await.unwrap();
        (header, body)
    }

    #[test]
    fn test_request_header_layout() {
        let buf = encode_request(OP_GET, &[], b"key", &[]);
        assert_eq!(buf.len(), HEADER_LEN + 3);
        assert_eq!(buf[0], REQUEST_MAGIC);
        assert_eq!(buf[1], OP_GET);
        assert_eq!(&buf[2..4], &[0, 3]);
        assert_eq!(&buf[8..12], &[0, 0, 0, 3]);
        assert_eq!(&buf[HEADER_LEN..], b"key");
    }

    #[tokio::test]
    async fn test_get_hit_skips_flags() {
        let (mut conn, mut server) = pair();
        server.write_all(&response(OP_GET, STATUS_OK, &[0, 0, 0, 0], b"page")).await.unwrap();

        let reply = execute(&mut conn, &Command::Get("data-k")).await.unwrap();
        assert_eq!(reply, Reply::Value(Some(Bytes::from_static(b"page"))));

        let (header, body) = read_request(&mut server).await;
        assert_eq!(header[1], OP_GET);
        assert_eq!(body, b"data-k");
    }

    #[tokio::test]
    async fn test_get_miss() {
        let (mut conn, mut server) = pair();
        server.write_all(&response(OP_GET, STATUS_KEY_NOT_FOUND, &[], b"Not found")).await.unwrap();
        assert_eq!(execute(&mut conn, &Command::Get("k")).await.unwrap(), Reply::Value(None));
    }

    #[tokio::test]
    async fn test_set_carries_exptime_extras() {
        let (mut conn, mut server) = pair();
        server.write_all(&response(OP_SET, STATUS_OK, &[], &[])).await.unwrap();

        let value = Bytes::from_static(b"body");
        let reply = execute(&mut conn, &Command::Set { key: "k", value: &value, exptime: 300 }).await.unwrap();
        assert_eq!(reply, Reply::Done(true));

        let (header, body) = read_request(&mut server).await;
        assert_eq!(header[1], OP_SET);
        assert_eq!(header[4], 8);
        assert_eq!(&body[..4], &[0, 0, 0, 0]);
        assert_eq!(u32::from_be_bytes([body[4], body[5], body[6], body[7]]), 300);
        assert_eq!(&body[8..], b"kbody");
    }

    #[tokio::test]
    async fn test_sasl_plain() {
        let (mut conn, mut server) = pair();
        server.write_all(&response(OP_SASL_AUTH, STATUS_OK, &[], b"Authenticated")).await.unwrap();

        authenticate(&mut conn, "user", "secret").await.unwrap();

        let (header, body) = read_request(&mut server).await;
        assert_eq!(header[1], OP_SASL_AUTH);
        assert_eq!(body, b"PLAIN\0user\0secret");
    }

    #[tokio::test]
    async fn test_sasl_rejected() {
        let (mut conn, mut server) = pair();
        server.write_all(&response(OP_SASL_AUTH, STATUS_AUTH_ERROR, &[], b"Auth failure")).await.unwrap();

        let err = authenticate(&mut conn, "user", "wrong").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::PermissionDenied);
    }
}
