//! Minimal OBEX client for Object Push.
//!
//! Implements the subset needed to push a file to a phone or computer:
//! CONNECT, a (possibly multi-packet) PUT and DISCONNECT. Packets are
//! `opcode | length (u16 BE, whole packet) | [prefix] | headers`.
//!
//! Header ids encode their value format in the top two bits:
//!
//! | Bits | Format |
//! |------|--------|
//! | `00` | null-terminated UTF-16BE text, u16 length prefix |
//! | `01` | byte sequence, u16 length prefix |
//! | `10` | single byte |
//! | `11` | four-byte big-endian integer |

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Error, Result};

/// Request opcodes.
pub mod opcode {
    pub const CONNECT: u8 = 0x80;
    pub const DISCONNECT: u8 = 0x81;
    pub const PUT: u8 = 0x02;
    pub const PUT_FINAL: u8 = 0x82;
}

/// Response codes (final bit set).
pub mod response {
    pub const CONTINUE: u8 = 0x90;
    pub const SUCCESS: u8 = 0xA0;
}

/// OBEX protocol version 1.0.
const VERSION: u8 = 0x10;

/// Largest packet we accept from the peer.
pub const MAX_PACKET: u16 = 0x2000;

/// Smallest packet size a peer may negotiate.
const MIN_PACKET: u16 = 255;

/// Opcode + length.
const PACKET_HEADER_LEN: usize = 3;

/// Header id + u16 length.
const SEQUENCE_HEADER_LEN: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    Name(String),
    Type(String),
    Length(u32),
    ConnectionId(u32),
    Body(Vec<u8>),
    EndOfBody(Vec<u8>),
    Unknown { id: u8, value: Vec<u8> },
}

impl Header {
    pub const NAME: u8 = 0x01;
    pub const TYPE: u8 = 0x42;
    pub const LENGTH: u8 = 0xC3;
    pub const CONNECTION_ID: u8 = 0xCB;
    pub const BODY: u8 = 0x48;
    pub const END_OF_BODY: u8 = 0x49;

    pub fn id(&self) -> u8 {
        match self {
            Self::Name(_) => Self::NAME,
            Self::Type(_) => Self::TYPE,
            Self::Length(_) => Self::LENGTH,
            Self::ConnectionId(_) => Self::CONNECTION_ID,
            Self::Body(_) => Self::BODY,
            Self::EndOfBody(_) => Self::END_OF_BODY,
            Self::Unknown { id, .. } => *id,
        }
    }

    pub fn encode(&self, out: &mut Vec<u8>) -> Result<()> {
        let id = self.id();
        match self {
            Self::Name(text) => {
                let mut value: Vec<u8> = text.encode_utf16().flat_map(u16::to_be_bytes).collect();
                if !text.is_empty() {
                    value.extend_from_slice(&[0, 0]);
                }
                push_sequence(out, id, &value)
            }
            Self::Type(text) => {
                let mut value = text.as_bytes().to_vec();
                value.push(0);
                push_sequence(out, id, &value)
            }
            Self::Length(v) | Self::ConnectionId(v) => {
                out.push(id);
                out.extend_from_slice(&v.to_be_bytes());
                Ok(())
            }
            Self::Body(value) | Self::EndOfBody(value) => push_sequence(out, id, value),
            Self::Unknown { value, .. } => match id >> 6 {
                0b10 => {
                    out.push(id);
                    out.push(value.first().copied().unwrap_or(0));
                    Ok(())
                }
                0b11 => {
                    let mut bytes = [0u8; 4];
                    let n = value.len().min(4);
                    bytes[..n].copy_from_slice(&value[..n]);
                    out.push(id);
                    out.extend_from_slice(&bytes);
                    Ok(())
                }
                _ => push_sequence(out, id, value),
            },
        }
    }

    /// Parse every header in `bytes`.
    pub fn decode_all(mut bytes: &[u8]) -> Result<Vec<Self>> {
        let mut headers = Vec::new();
        while let Some(&id) = bytes.first() {
            let (header, used) = match id >> 6 {
                0b10 => {
                    let value = *bytes.get(1).ok_or_else(|| malformed("truncated byte header"))?;
                    (Self::Unknown { id, value: vec![value] }, 2)
                }
                0b11 => {
                    let raw: [u8; 4] = bytes
                        .get(1..5)
                        .and_then(|b| b.try_into().ok())
                        .ok_or_else(|| malformed("truncated integer header"))?;
                    let value = u32::from_be_bytes(raw);
                    let header = match id {
                        Self::LENGTH => Self::Length(value),
                        Self::CONNECTION_ID => Self::ConnectionId(value),
                        _ => Self::Unknown {
                            id,
                            value: raw.to_vec(),
                        },
                    };
                    (header, 5)
                }
                _ => {
                    let len = bytes
                        .get(1..3)
                        .map(|b| usize::from(u16::from_be_bytes([b[0], b[1]])))
                        .ok_or_else(|| malformed("truncated header length"))?;
                    if len < SEQUENCE_HEADER_LEN || len > bytes.len() {
                        return Err(malformed("header length out of range"));
                    }
                    let value = &bytes[SEQUENCE_HEADER_LEN..len];
                    let header = match id {
                        Self::NAME => Self::Name(decode_utf16(value)?),
                        Self::TYPE => Self::Type(
                            String::from_utf8_lossy(value.strip_suffix(&[0]).unwrap_or(value))
                                .into_owned(),
                        ),
                        Self::BODY => Self::Body(value.to_vec()),
                        Self::END_OF_BODY => Self::EndOfBody(value.to_vec()),
                        _ => Self::Unknown {
                            id,
                            value: value.to_vec(),
                        },
                    };
                    (header, len)
                }
            };
            headers.push(header);
            bytes = &bytes[used..];
        }
        Ok(headers)
    }
}

fn malformed(what: &str) -> Error {
    Error::transport(format!("malformed OBEX packet: {what}"))
}

fn push_sequence(out: &mut Vec<u8>, id: u8, value: &[u8]) -> Result<()> {
    let len = u16::try_from(value.len() + SEQUENCE_HEADER_LEN)
        .map_err(|_| Error::transport("OBEX header too large"))?;
    out.push(id);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value);
    Ok(())
}

fn decode_utf16(value: &[u8]) -> Result<String> {
    let units: Vec<u16> = value
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .take_while(|u| *u != 0)
        .collect();
    String::from_utf16(&units).map_err(|_| malformed("invalid UTF-16 name"))
}

/// A request or response packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub code: u8,
    /// Fixed fields between the length and the headers (CONNECT only).
    pub prefix: Vec<u8>,
    pub headers: Vec<Header>,
}

impl Packet {
    pub fn new(code: u8, headers: Vec<Header>) -> Self {
        Self {
            code,
            prefix: Vec::new(),
            headers,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = vec![self.code, 0, 0];
        out.extend_from_slice(&self.prefix);
        for header in &self.headers {
            header.encode(&mut out)?;
        }
        let len = u16::try_from(out.len()).map_err(|_| Error::transport("OBEX packet too large"))?;
        out[1..3].copy_from_slice(&len.to_be_bytes());
        Ok(out)
    }

    /// Read one packet whose fixed prefix is `prefix_len` bytes long.
    pub async fn read<R: AsyncRead + Unpin>(reader: &mut R, prefix_len: usize) -> Result<Self> {
        let mut head = [0u8; PACKET_HEADER_LEN];
        reader.read_exact(&mut head).await?;
        let len = usize::from(u16::from_be_bytes([head[1], head[2]]));
        if len < PACKET_HEADER_LEN + prefix_len {
            return Err(malformed("packet shorter than its header"));
        }
        let mut rest = vec![0u8; len - PACKET_HEADER_LEN];
        reader.read_exact(&mut rest).await?;
        let headers = Header::decode_all(&rest[prefix_len..])?;
        rest.truncate(prefix_len);
        Ok(Self {
            code: head[0],
            prefix: rest,
            headers,
        })
    }

    pub fn connection_id(&self) -> Option<u32> {
        self.headers.iter().find_map(|h| match h {
            Header::ConnectionId(id) => Some(*id),
            _ => None,
        })
    }
}

/// OBEX client session over any byte stream.
pub struct ObexClient<S> {
    stream: S,
    max_packet: u16,
    connection_id: Option<u32>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> ObexClient<S> {
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            max_packet: MIN_PACKET,
            connection_id: None,
        }
    }

    /// Packet size negotiated with the peer.
    pub fn max_packet(&self) -> u16 {
        self.max_packet
    }

    async fn request(&mut self, packet: Packet, prefix_len: usize) -> Result<Packet> {
        let bytes = packet.encode()?;
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        Packet::read(&mut self.stream, prefix_len).await
    }

    fn session_headers(&self) -> Vec<Header> {
        self.connection_id
            .map(Header::ConnectionId)
            .into_iter()
            .collect()
    }

    pub async fn connect(&mut self) -> Result<()> {
        let mut packet = Packet::new(opcode::CONNECT, Vec::new());
        packet.prefix = vec![VERSION, 0x00];
        packet.prefix.extend_from_slice(&MAX_PACKET.to_be_bytes());

        let reply = self.request(packet, 4).await?;
        if reply.code != response::SUCCESS {
            return Err(Error::Obex {
                operation: "CONNECT",
                code: reply.code,
            });
        }
        let peer_max = u16::from_be_bytes([reply.prefix[2], reply.prefix[3]]);
        self.max_packet = peer_max.clamp(MIN_PACKET, MAX_PACKET);
        self.connection_id = reply.connection_id();
        debug!(max_packet = self.max_packet, "OBEX session established");
        Ok(())
    }

    /// Push `data` as an object called `name`.
    pub async fn put(&mut self, name: &str, mime_type: Option<&str>, data: &[u8]) -> Result<()> {
        let mut first = self.session_headers();
        first.push(Header::Name(name.to_string()));
        if let Some(mime_type) = mime_type {
            first.push(Header::Type(mime_type.to_string()));
        }
        let total = u32::try_from(data.len()).map_err(|_| Error::transport("file too large for OBEX"))?;
        first.push(Header::Length(total));

        let budget = usize::from(self.max_packet);
        let mut pending = first;
        let mut offset = 0;
        loop {
            let mut used = PACKET_HEADER_LEN;
            for header in &pending {
                let mut scratch = Vec::new();
                header.encode(&mut scratch)?;
                used += scratch.len();
            }
            let room = budget.saturating_sub(used + SEQUENCE_HEADER_LEN);
            let end = (offset + room).min(data.len());
            let last = end == data.len();
            let chunk = data[offset..end].to_vec();
            pending.push(if last {
                Header::EndOfBody(chunk)
            } else {
                Header::Body(chunk)
            });

            let code = if last { opcode::PUT_FINAL } else { opcode::PUT };
            let reply = self.request(Packet::new(code, pending), 0).await?;
            let expected = if last {
                response::SUCCESS
            } else {
                response::CONTINUE
            };
            if reply.code != expected {
                return Err(Error::Obex {
                    operation: "PUT",
                    code: reply.code,
                });
            }
            if last {
                return Ok(());
            }
            offset = end;
            pending = self.session_headers();
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        let reply = self
            .request(Packet::new(opcode::DISCONNECT, self.session_headers()), 0)
            .await?;
        if reply.code != response::SUCCESS {
            return Err(Error::Obex {
                operation: "DISCONNECT",
                code: reply.code,
            });
        }
        Ok(())
    }

    pub fn into_inner(self) -> S {
        self.stream
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    /// Minimal Object Push server: answers CONNECT/PUT/DISCONNECT and
    /// returns the received object name and body.
    pub(crate) async fn serve_push(mut stream: DuplexStream, max_packet: u16) -> (String, Vec<u8>) {
        let connect = Packet::read(&mut stream, 4).await.unwrap();
        assert_eq!(connect.code, opcode::CONNECT);
        let mut reply = Packet::new(response::SUCCESS, vec![Header::ConnectionId(7)]);
        reply.prefix = vec![VERSION, 0, 0, 0];
        reply.prefix[2..4].copy_from_slice(&max_packet.to_be_bytes());
        stream.write_all(&reply.encode().unwrap()).await.unwrap();

        let mut name = String::new();
        let mut body = Vec::new();
        loop {
            let packet = Packet::read(&mut stream, 0).await.unwrap();
            assert!(packet.encode().unwrap().len() <= usize::from(max_packet));
            assert_eq!(packet.connection_id(), Some(7));
            match packet.code {
                opcode::PUT | opcode::PUT_FINAL => {
                    for header in packet.headers {
                        match header {
                            Header::Name(n) => name = n,
                            Header::Body(b) | Header::EndOfBody(b) => body.extend(b),
                            _ => {}
                        }
                    }
                    let code = if packet.code == opcode::PUT_FINAL {
                        response::SUCCESS
                    } else {
                        response::CONTINUE
                    };
                    stream
                        .write_all(&Packet::new(code, Vec::new()).encode().unwrap())
                        .await
                        .unwrap();
                }
                opcode::DISCONNECT => {
                    stream
                        .write_all(&Packet::new(response::SUCCESS, Vec::new()).encode().unwrap())
                        .await
                        .unwrap();
                    return (name, body);
                }
                other => panic!("unexpected opcode {other:#x}"),
            }
        }
    }

    #[test]
    fn test_name_header_encoding() {
        let mut out = Vec::new();
        Header::Name("a.txt".into()).encode(&mut out).unwrap();
        assert_eq!(
            out,
            vec![
                0x01, 0x00, 0x0F, 0x00, b'a', 0x00, b'.', 0x00, b't', 0x00, b'x', 0x00, b't',
                0x00, 0x00
            ]
        );
        assert_eq!(
            Header::decode_all(&out).unwrap(),
            vec![Header::Name("a.txt".into())]
        );
    }

    #[test]
    fn test_connect_packet_layout() {
        let mut packet = Packet::new(opcode::CONNECT, Vec::new());
        packet.prefix = vec![VERSION, 0x00, 0x20, 0x00];
        assert_eq!(
            packet.encode().unwrap(),
            vec![0x80, 0x00, 0x07, 0x10, 0x00, 0x20, 0x00]
        );
    }

    #[test]
    fn test_decode_rejects_truncated_headers() {
        assert!(Header::decode_all(&[0x48, 0x00, 0x10, 0x01]).is_err());
        assert!(Header::decode_all(&[0xC3, 0x00]).is_err());
    }

    #[tokio::test]
    async fn test_put_splits_into_packets() {
        let (client_end, server_end) = tokio::io::duplex(64 * 1024);
        let server = tokio::spawn(serve_push(server_end, 300));

        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut client = ObexClient::new(client_end);
        client.connect().await.unwrap();
        assert_eq!(client.max_packet(), 300);
        client.put("notes.txt", Some("text/plain"), &data).await.unwrap();
        client.disconnect().await.unwrap();

        let (name, body) = server.await.unwrap();
        assert_eq!(name, "notes.txt");
        assert_eq!(body, data);
    }

    #[tokio::test]
    async fn test_put_rejected_by_peer() {
        let (client_end, mut server_end) = tokio::io::duplex(4096);
        let server = tokio::spawn(async move {
            let _ = Packet::read(&mut server_end, 4).await.unwrap();
            let mut reply = Packet::new(response::SUCCESS, Vec::new());
            reply.prefix = vec![VERSION, 0, 0x04, 0x00];
            server_end.write_all(&reply.encode().unwrap()).await.unwrap();
            let _ = Packet::read(&mut server_end, 0).await.unwrap();
            // Forbidden
            server_end
                .write_all(&Packet::new(0xC3, Vec::new()).encode().unwrap())
                .await
                .unwrap();
        });

        let mut client = ObexClient::new(client_end);
        client.connect().await.unwrap();
        let err = client.put("x.bin", None, &[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, Error::Obex { operation: "PUT", code: 0xC3 }));
        server.await.unwrap();
    }
}
