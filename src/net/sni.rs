//! Server name extraction from a TLS ClientHello.
//!
//! # Responsibilities
//! - Read the first handshake record without consuming more than it needs
//! - Parse the `server_name` extension out of it
//! - Keep every byte read so passthrough can replay it to the backend
//!
//! Reads are bounded by time (200 ms) and size (8 KiB).

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time;

pub const SNIFF_TIMEOUT: Duration = Duration::from_millis(200);
pub const MAX_SNIFF_BYTES: usize = 8 * 1024;

const RECORD_HEADER_LEN: usize = 5;
const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const NAME_TYPE_HOST: u8 = 0x00;

/// Outcome of sniffing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sniffed {
    /// Lowercased host name without a trailing dot.
    Found(String),
    /// A ClientHello without a usable server name.
    NoSni,
    /// The first bytes are not a TLS handshake.
    NotTls,
    /// A handshake record that ends early or is inconsistent.
    Malformed,
    Timeout,
}

#[derive(Debug, Clone)]
pub struct ClientHelloSniffer {
    timeout: Duration,
    max_bytes: usize,
}

impl ClientHelloSniffer {
    pub fn new(timeout: Duration, max_bytes: usize) -> Self {
        Self { timeout, max_bytes }
    }

    /// Read the ClientHello into `buf` and extract the server name.
    ///
    /// `buf` holds every byte taken off the stream, whatever the outcome.
    pub async fn sniff<R>(&self, stream: &mut R, buf: &mut Vec<u8>) -> io::Result<Sniffed>
    where
        R: AsyncRead + Unpin,
    {
        buf.clear();
        match time::timeout(self.timeout, self.fill(stream, buf)).await {
            Ok(read) => {
                read?;
                Ok(parse_client_hello(buf))
            }
            Err(_) => Ok(Sniffed::Timeout),
        }
    }

    async fn fill<R>(&self, stream: &mut R, buf: &mut Vec<u8>) -> io::Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let mut chunk = [0u8; 1024];
        let mut want = RECORD_HEADER_LEN;
        let mut header_seen = false;

        while buf.len() < want {
            let limit = (want - buf.len()).min(chunk.len());
            let n = stream.read(&mut chunk[..limit]).await?;
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);

            if !header_seen && buf.len() >= RECORD_HEADER_LEN {
                header_seen = true;
                if buf[0] != CONTENT_TYPE_HANDSHAKE {
                    break;
                }
                let record_len = u16::from_be_bytes([buf[3], buf[4]]) as usize;
                want = (RECORD_HEADER_LEN + record_len).min(self.max_bytes);
            }
        }
        Ok(())
    }
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.data.len() < n {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    fn vec8(&mut self) -> Option<Reader<'a>> {
        let len = self.u8()? as usize;
        self.take(len).map(Reader::new)
    }

    fn vec16(&mut self) -> Option<Reader<'a>> {
        let len = self.u16()? as usize;
        self.take(len).map(Reader::new)
    }
}

/// Parse a buffered ClientHello.
pub fn parse_client_hello(data: &[u8]) -> Sniffed {
    match data.first() {
        Some(&CONTENT_TYPE_HANDSHAKE) => {}
        Some(_) => return Sniffed::NotTls,
        None => return Sniffed::Malformed,
    }
    if data.len() > RECORD_HEADER_LEN && data[RECORD_HEADER_LEN] != HANDSHAKE_CLIENT_HELLO {
        return Sniffed::NotTls;
    }

    match server_name(data) {
        Some(Some(name)) => Sniffed::Found(name),
        Some(None) => Sniffed::NoSni,
        None => Sniffed::Malformed,
    }
}

/// `None` on truncation, `Some(None)` when the extension is absent.
fn server_name(data: &[u8]) -> Option<Option<String>> {
    let mut record = Reader::new(data);
    record.take(3)?;
    let mut record = record.vec16()?;

    record.u8()?;
    let hello_len = record.u24()?;
    let mut hello = Reader::new(record.take(hello_len)?);

    hello.take(2 + 32)?;
    hello.vec8()?;
    hello.vec16()?;
    hello.vec8()?;
    if hello.is_empty() {
        return Some(None);
    }

    let mut extensions = hello.vec16()?;
    while !extensions.is_empty() {
        let kind = extensions.u16()?;
        let mut body = extensions.vec16()?;
        if kind != EXTENSION_SERVER_NAME {
            continue;
        }

        let mut names = body.vec16()?;
        while !names.is_empty() {
            let name_type = names.u8()?;
            let name = names.vec16()?;
            if name_type != NAME_TYPE_HOST {
                continue;
            }
            let host = std::str::from_utf8(name.data).ok()?;
            let host = host.trim_end_matches('.').to_ascii_lowercase();
            return Some((!host.is_empty()).then_some(host));
        }
        return Some(None);
    }
    Some(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncWriteExt;

    fn with_u16_len(body: &[u8]) -> Vec<u8> {
        let mut out = (body.len() as u16).to_be_bytes().to_vec();
        out.extend_from_slice(body);
        out
    }

    fn client_hello(sni: Option<&str>) -> Vec<u8> {
        let mut hello = vec![0x03, 0x03];
        hello.extend_from_slice(&[0u8; 32]);
        hello.push(0);
        hello.extend(with_u16_len(&[0x13, 0x01]));
        hello.extend_from_slice(&[0x01, 0x00]);

        let mut extensions = Vec::new();
        // supported_versions first, so the parser has to skip one.
        extensions.extend_from_slice(&[0x00, 0x2b]);
        extensions.extend(with_u16_len(&[0x02, 0x03, 0x04]));
        if let Some(name) = sni {
            let mut entry = vec![NAME_TYPE_HOST];
            entry.extend(with_u16_len(name.as_bytes()));
            extensions.extend_from_slice(&EXTENSION_SERVER_NAME.to_be_bytes());
            extensions.extend(with_u16_len(&with_u16_len(&entry)));
        }
        hello.extend(with_u16_len(&extensions));

        let mut handshake = vec![HANDSHAKE_CLIENT_HELLO];
        handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
        handshake.extend(hello);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend(with_u16_len(&handshake));
        record
    }

    #[test]
    fn finds_server_name() {
        assert_eq!(
            parse_client_hello(&client_hello(Some("DB.Example.com."))),
            Sniffed::Found("db.example.com".into())
        );
    }

    #[test]
    fn hello_without_server_name() {
        assert_eq!(parse_client_hello(&client_hello(None)), Sniffed::NoSni);
    }

    #[test]
    fn rejects_plaintext() {
        assert_eq!(
            parse_client_hello(b"GET / HTTP/1.1\r\nHost: a.test\r\n\r\n"),
            Sniffed::NotTls
        );
    }

    #[test]
    fn truncated_hello_is_malformed() {
        let hello = client_hello(Some("db.example.com"));
        assert_eq!(parse_client_hello(&hello[..hello.len() - 4]), Sniffed::Malformed);
        assert_eq!(parse_client_hello(&[0x16, 0x03]), Sniffed::Malformed);
        assert_eq!(parse_client_hello(&[]), Sniffed::Malformed);
    }

    #[tokio::test]
    async fn sniff_keeps_every_byte() {
        let hello = client_hello(Some("db.example.com"));
        let (mut client, mut server) = tokio::io::duplex(64 * 1024);
        client.write_all(&hello).await.unwrap();
        client.write_all(b"trailing").await.unwrap();

        let mut buf = Vec::new();
        let sniffed = ClientHelloSniffer::new(SNIFF_TIMEOUT, MAX_SNIFF_BYTES)
            .sniff(&mut server, &mut buf)
            .await
            .unwrap();

        assert_eq!(sniffed, Sniffed::Found("db.example.com".into()));
        assert_eq!(buf, hello);
    }

    #[tokio::test]
    async fn sniff_times_out_on_silence() {
        let (_client, mut server) = tokio::io::duplex(1024);
        let sniffer = ClientHelloSniffer::new(Duration::from_millis(20), MAX_SNIFF_BYTES);
        let mut buf = Vec::new();
        assert_eq!(sniffer.sniff(&mut server, &mut buf).await.unwrap(), Sniffed::Timeout);
    }

    #[tokio::test]
    async fn sniffs_a_real_rustls_hello() {
        let (client, mut server) = tokio::io::duplex(64 * 1024);
        let config = crate::net::tls::client_config(&[]).unwrap();
        let connector = tokio_rustls::TlsConnector::from(Arc::clone(&config));
        let name = crate::net::tls::server_name("db.example.com").unwrap();
        let handshake = tokio::spawn(async move { connector.connect(name, client).await });

        let mut buf = Vec::new();
        let sniffed = ClientHelloSniffer::new(SNIFF_TIMEOUT, MAX_SNIFF_BYTES)
            .sniff(&mut server, &mut buf)
            .await
            .unwrap();
        assert_eq!(sniffed, Sniffed::Found("db.example.com".into()));

        drop(server);
        assert!(handshake.await.unwrap().is_err());
    }
}
