use bytes::Bytes;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::{MAX_FRAME_LEN, ProtocolError};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Connection closed by peer")]
    Closed,
}

/// A TCP stream carrying length-prefixed frames.
///
/// Frame format: [u32 length][payload]
pub struct FramedStream {
    stream: TcpStream,
    peer: SocketAddr,
}

impl FramedStream {
    pub async fn connect(host: &str, port: u16) -> io::Result<Self> {
        let stream = TcpStream::connect((host, port)).await?;
        Self::new(stream)
    }

    pub fn new(stream: TcpStream) -> io::Result<Self> {
        // Request/response traffic, every frame is latency bound
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        if payload.len() > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(payload.len()).into());
        }
        self.stream.write_u32(payload.len() as u32).await?;
        self.stream.write_all(payload).await?;
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn recv(&mut self) -> Result<Bytes, TransportError> {
        let len = match self.stream.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(TransportError::Closed);
            }
            Err(e) => return Err(e.into()),
        };
        if len > MAX_FRAME_LEN {
            return Err(ProtocolError::FrameTooLarge(len).into());
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Binds a listener with address reuse so an agent can be restarted on the
/// same port right away.
pub fn bind_listener(addr: SocketAddr) -> io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        if addr.is_ipv4() {
            socket2::Domain::IPV4
        } else {
            socket2::Domain::IPV6
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    if addr.is_ipv6() {
        // [::] should accept v4-mapped peers too
        socket.set_only_v6(false)?;
    }

    socket.bind(&addr.into())?;
    socket.listen(16)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
