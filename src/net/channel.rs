use std::collections::VecDeque;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::time::Duration;

use crate::net::crypt::Crypt;
use crate::net::error::NetError;
use crate::net::frame::{self, ReadCommand};
use crate::telemetry::logging;
use crate::version::Version;

pub enum ReadOutcome {
    Data(usize),
    WouldBlock,
    Eof,
}

/// The byte stream under a channel: a real socket, or a user-space pipe when
/// the connection comes from a simulated IP stack. Virtual transports report
/// no addresses and the channel must not ask the OS for any.
pub trait ChannelTransport: Send {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, NetError>;
    fn write_some(&mut self, buf: &[u8]) -> Result<usize, NetError>;
    fn flush_blocking(&mut self, buf: &[u8]) -> Result<(), NetError>;
    fn peer_addr(&self) -> Option<SocketAddr>;
    fn local_addr(&self) -> Option<SocketAddr>;
    fn is_virtual(&self) -> bool {
        false
    }
}

pub struct TcpTransport {
    stream: TcpStream,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> Result<Self, NetError> {
        stream
            .set_nonblocking(true)
            .map_err(|err| NetError::Io(format!("set nonblocking failed: {}", err)))?;
        Ok(Self { stream })
    }
}

impl ChannelTransport for TcpTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, NetError> {
        match self.stream.read(buf) {
            Ok(0) => Ok(ReadOutcome::Eof),
            Ok(n) => Ok(ReadOutcome::Data(n)),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(ReadOutcome::WouldBlock),
            Err(err) => Err(NetError::Io(format!("read failed: {}", err))),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, NetError> {
        match self.stream.write(buf) {
            Ok(n) => Ok(n),
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => Ok(0),
            Err(err) => Err(NetError::Io(format!("write failed: {}", err))),
        }
    }

    fn flush_blocking(&mut self, buf: &[u8]) -> Result<(), NetError> {
        self.stream
            .set_nonblocking(false)
            .map_err(|err| NetError::Io(format!("set blocking failed: {}", err)))?;
        let _ = self
            .stream
            .set_write_timeout(Some(Duration::from_secs(10)));
        self.stream
            .write_all(buf)
            .map_err(|err| NetError::Io(format!("drain write failed: {}", err)))?;
        self.stream
            .flush()
            .map_err(|err| NetError::Io(format!("drain flush failed: {}", err)))
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.stream.local_addr().ok()
    }
}

/// In-memory bidirectional pipe used by virtual connections and tests.
pub struct PipeTransport {
    incoming: Receiver<Vec<u8>>,
    outgoing: Sender<Vec<u8>>,
    pending: VecDeque<u8>,
    peer_closed: bool,
}

impl PipeTransport {
    /// Returns both ends of a fresh pipe.
    pub fn pair() -> (PipeTransport, PipeTransport) {
        let (a_tx, a_rx) = mpsc::channel();
        let (b_tx, b_rx) = mpsc::channel();
        (
            PipeTransport {
                incoming: a_rx,
                outgoing: b_tx,
                pending: VecDeque::new(),
                peer_closed: false,
            },
            PipeTransport {
                incoming: b_rx,
                outgoing: a_tx,
                pending: VecDeque::new(),
                peer_closed: false,
            },
        )
    }
}

impl ChannelTransport for PipeTransport {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, NetError> {
        loop {
            match self.incoming.try_recv() {
                Ok(bytes) => self.pending.extend(bytes),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.peer_closed = true;
                    break;
                }
            }
        }
        if self.pending.is_empty() {
            return Ok(if self.peer_closed {
                ReadOutcome::Eof
            } else {
                ReadOutcome::WouldBlock
            });
        }
        let mut count = 0;
        while count < buf.len() {
            match self.pending.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(ReadOutcome::Data(count))
    }

    fn write_some(&mut self, buf: &[u8]) -> Result<usize, NetError> {
        self.outgoing
            .send(buf.to_vec())
            .map_err(|_| NetError::Io("pipe peer closed".to_string()))?;
        Ok(buf.len())
    }

    fn flush_blocking(&mut self, buf: &[u8]) -> Result<(), NetError> {
        self.write_some(buf).map(|_| ())
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        None
    }

    fn is_virtual(&self) -> bool {
        true
    }
}

/// One framed, per-direction-encrypted command stream. Cipher slots are
/// empty until the login handshake installs them; afterwards all traffic
/// passes through them.
pub struct Channel {
    transport: Option<Box<dyn ChannelTransport>>,
    pub version: Version,
    pub crypt_in: Option<Crypt>,
    pub crypt_out: Option<Crypt>,
    pub name: String,
    pub language: u8,
    pub remote_addr: Option<SocketAddr>,
    pub local_addr: Option<SocketAddr>,
    pub is_virtual: bool,
    recv_buffer: Vec<u8>,
    send_buffer: Vec<u8>,
    saw_eof: bool,
}

impl Channel {
    pub fn new(transport: Box<dyn ChannelTransport>, version: Version, name: &str) -> Channel {
        let remote_addr = transport.peer_addr();
        let local_addr = transport.local_addr();
        let is_virtual = transport.is_virtual();
        Channel {
            transport: Some(transport),
            version,
            crypt_in: None,
            crypt_out: None,
            name: name.to_string(),
            language: 0,
            remote_addr,
            local_addr,
            is_virtual,
            recv_buffer: Vec::new(),
            send_buffer: Vec::new(),
            saw_eof: false,
        }
    }

    /// A channel with no transport; used as the dormant half of a proxy
    /// session until a client channel is moved into it.
    pub fn empty(version: Version, name: &str) -> Channel {
        Channel {
            transport: None,
            version,
            crypt_in: None,
            crypt_out: None,
            name: name.to_string(),
            language: 0,
            remote_addr: None,
            local_addr: None,
            is_virtual: false,
            recv_buffer: Vec::new(),
            send_buffer: Vec::new(),
            saw_eof: false,
        }
    }

    pub fn connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.send_buffer.is_empty()
    }

    /// Frame, encrypt, and queue one command for transmission.
    pub fn send(&mut self, command: u16, flag: u32, body: &[u8]) -> Result<(), NetError> {
        if !self.connected() {
            logging::log_error(&format!(
                "[{}] send of {:02X} on closed channel dropped",
                self.name, command
            ));
            return Ok(());
        }
        let wire = frame::write_one(command, flag, body, self.version, &mut self.crypt_out)?;
        self.send_buffer.extend_from_slice(&wire);
        self.flush()
    }

    /// Write as much buffered output as the transport will take.
    pub fn flush(&mut self) -> Result<(), NetError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        while !self.send_buffer.is_empty() {
            let written = transport.write_some(&self.send_buffer)?;
            if written == 0 {
                break;
            }
            self.send_buffer.drain(..written);
        }
        Ok(())
    }

    /// Pull every complete command currently buffered. Returns an empty list
    /// when no full frame has arrived yet; `Io` once the peer has closed and
    /// the buffer is exhausted.
    pub fn poll_recv(&mut self) -> Result<Vec<ReadCommand>, NetError> {
        self.fill_recv_buffer()?;
        let mut commands = Vec::new();
        while let Some(command) =
            frame::read_one(&mut self.recv_buffer, self.version, &mut self.crypt_in)?
        {
            commands.push(command);
        }
        if commands.is_empty() && self.saw_eof && self.recv_buffer.is_empty() {
            return Err(NetError::Io("peer closed the connection".to_string()));
        }
        Ok(commands)
    }

    fn fill_recv_buffer(&mut self) -> Result<(), NetError> {
        let Some(transport) = self.transport.as_mut() else {
            return Ok(());
        };
        let mut chunk = [0u8; 0x1000];
        loop {
            match transport.read_available(&mut chunk)? {
                ReadOutcome::Data(n) => self.recv_buffer.extend_from_slice(&chunk[..n]),
                ReadOutcome::WouldBlock => break,
                ReadOutcome::Eof => {
                    self.saw_eof = true;
                    break;
                }
            }
        }
        Ok(())
    }

    /// Take over another channel's transport, ciphers, version and
    /// addresses, leaving the donor disconnected without ever closing the
    /// underlying stream. This is how a proxy upgrades an unlinked session
    /// into an existing linked one.
    pub fn replace_with(&mut self, other: &mut Channel) {
        self.transport = other.transport.take();
        self.version = other.version;
        self.crypt_in = other.crypt_in.take();
        self.crypt_out = other.crypt_out.take();
        self.language = other.language;
        self.remote_addr = other.remote_addr.take();
        self.local_addr = other.local_addr.take();
        self.is_virtual = other.is_virtual;
        self.recv_buffer = std::mem::take(&mut other.recv_buffer);
        self.send_buffer = std::mem::take(&mut other.send_buffer);
        self.saw_eof = other.saw_eof;
        other.disconnect();
    }

    /// Idempotent. If output is still buffered, ownership of the transport
    /// moves to a background drainer whose only job is to flush and close;
    /// the channel itself is immediately reusable as disconnected.
    pub fn disconnect(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            let pending = std::mem::take(&mut self.send_buffer);
            if !pending.is_empty() {
                let name = self.name.clone();
                std::thread::spawn(move || {
                    if let Err(err) = transport.flush_blocking(&pending) {
                        logging::log_netload(&format!(
                            "[{}] drain of {} pending bytes failed: {}",
                            name,
                            pending.len(),
                            err
                        ));
                    }
                });
            }
        }
        self.send_buffer.clear();
        self.recv_buffer.clear();
        self.crypt_in = None;
        self.crypt_out = None;
        self.remote_addr = None;
        self.local_addr = None;
        self.is_virtual = false;
        self.saw_eof = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::crypt::{V2Cipher, V3Cipher};

    fn virtual_pair(version: Version) -> (Channel, Channel) {
        let (a, b) = PipeTransport::pair();
        (
            Channel::new(Box::new(a), version, "near"),
            Channel::new(Box::new(b), version, "far"),
        )
    }

    #[test]
    fn virtual_channels_report_no_addresses() {
        let (near, _far) = virtual_pair(Version::V2);
        assert!(near.is_virtual);
        assert!(near.remote_addr.is_none());
        assert!(near.local_addr.is_none());
    }

    #[test]
    fn send_and_receive_with_paired_ciphers() {
        let (mut near, mut far) = virtual_pair(Version::ConsoleA);
        near.crypt_out = Some(Crypt::V3(V3Cipher::new(0x11223344)));
        far.crypt_in = Some(Crypt::V3(V3Cipher::new(0x11223344)));

        near.send(0x60, 0, &[9, 8, 7, 6]).expect("send");
        let commands = far.poll_recv().expect("recv");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, 0x60);
        assert_eq!(commands[0].body, vec![9, 8, 7, 6]);
    }

    #[test]
    fn poll_recv_preserves_order() {
        let (mut near, mut far) = virtual_pair(Version::PcV2);
        for idx in 0..5u8 {
            near.send(0x60, idx as u32, &[idx; 4]).expect("send");
        }
        let commands = far.poll_recv().expect("recv");
        assert_eq!(commands.len(), 5);
        for (idx, command) in commands.iter().enumerate() {
            assert_eq!(command.flag, idx as u32);
        }
    }

    #[test]
    fn replace_with_moves_transport_and_ciphers() {
        let (mut donor, mut far) = virtual_pair(Version::V2);
        donor.crypt_in = Some(Crypt::V2(V2Cipher::new(5)));
        donor.crypt_out = Some(Crypt::V2(V2Cipher::new(6)));
        far.crypt_in = Some(Crypt::V2(V2Cipher::new(6)));

        let mut linked = Channel::empty(Version::V2, "linked");
        linked.replace_with(&mut donor);
        assert!(!donor.connected());
        assert!(donor.crypt_in.is_none());
        assert!(linked.connected());

        linked.send(0x61, 0, &[1, 2, 3, 4]).expect("send");
        let commands = far.poll_recv().expect("recv");
        assert_eq!(commands[0].command, 0x61);
    }

    #[test]
    fn disconnect_is_idempotent_and_clears_state() {
        let (mut near, _far) = virtual_pair(Version::V1);
        near.crypt_in = Some(Crypt::V2(V2Cipher::new(1)));
        near.disconnect();
        assert!(!near.connected());
        assert!(near.crypt_in.is_none());
        near.disconnect();
        assert!(!near.connected());
    }

    #[test]
    fn disconnect_drains_pending_output() {
        let (a, b) = PipeTransport::pair();
        let mut near = Channel::new(Box::new(a), Version::V2, "near");
        let mut far = Channel::new(Box::new(b), Version::V2, "far");
        near.send(0x1A, 0, &[4u8; 8]).expect("send");
        near.disconnect();
        // The pipe transport flushes synchronously in write_some, so the
        // frame must already be on the far side.
        let commands = far.poll_recv().expect("recv");
        assert_eq!(commands.len(), 1);
        assert_eq!(commands[0].command, 0x1A);
    }

    #[test]
    fn eof_surfaces_after_buffered_commands_are_drained() {
        let (mut near, mut far) = virtual_pair(Version::V2);
        near.send(0x60, 0, &[1, 1, 2, 2]).expect("send");
        drop(near);
        let commands = far.poll_recv().expect("first poll");
        assert_eq!(commands.len(), 1);
        assert!(matches!(far.poll_recv(), Err(NetError::Io(_))));
    }
}
