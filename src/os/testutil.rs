//! Hand-built replies for unit tests.
use pnet::packet::icmp;
use pnet::packet::icmp::IcmpCode;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::icmp::MutableIcmpPacket;
use pnet::packet::icmp::echo_reply::MutableEchoReplyPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4;
use pnet::packet::ipv4::Ipv4Flags;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::tcp::TcpFlags;
use pnet::packet::tcp::TcpPacket;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::sync::atomic::AtomicU16;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use chrono::Utc;

use crate::error::OsFingerError;
use crate::layer::Exchange;
use crate::layer::ICMP_HEADER_SIZE;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::LayerMatch;
use crate::layer::TCP_HEADER_SIZE;
use crate::layer::Transport;

pub const SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
pub const DST: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 1);
pub const OPEN_PORT: u16 = 22;
pub const CLOSED_PORT: u16 = 9999;

fn ip_header(buff: &mut [u8], ttl: u8, df: bool, id: u16, protocol: u8) {
    let total = buff.len() as u16;
    let mut ip = MutableIpv4Packet::new(buff).unwrap();
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total);
    ip.set_identification(id);
    if df {
        ip.set_flags(Ipv4Flags::DontFragment);
    }
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(pnet::packet::ip::IpNextHeaderProtocol(protocol));
    ip.set_source(DST);
    ip.set_destination(SRC);
    let c = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(c);
}

#[derive(Debug, Clone)]
pub struct TcpReply {
    pub ttl: u8,
    pub df: bool,
    pub id: u16,
    pub seq: u32,
    pub ack: u32,
    pub window: u16,
    pub flags: u8,
    pub reserved: u8,
    pub urgent_ptr: u16,
    pub options: Vec<u8>,
    pub payload: Vec<u8>,
}

impl Default for TcpReply {
    fn default() -> TcpReply {
        TcpReply {
            ttl: 64,
            df: true,
            id: 0,
            seq: 1,
            ack: 1,
            window: 29200,
            flags: 0b0001_0010, // syn ack
            reserved: 0,
            urgent_ptr: 0,
            options: Vec::new(),
            payload: Vec::new(),
        }
    }
}

impl TcpReply {
    pub fn build(&self) -> Vec<u8> {
        let mut options = self.options.clone();
        while options.len() % 4 != 0 {
            options.push(0);
        }
        let tcp_len = TCP_HEADER_SIZE + options.len();
        let mut buff = vec![0u8; IPV4_HEADER_SIZE + tcp_len + self.payload.len()];
        ip_header(
            &mut buff,
            self.ttl,
            self.df,
            self.id,
            IpNextHeaderProtocols::Tcp.0,
        );
        buff[IPV4_HEADER_SIZE + TCP_HEADER_SIZE..IPV4_HEADER_SIZE + tcp_len]
            .copy_from_slice(&options);
        buff[IPV4_HEADER_SIZE + tcp_len..].copy_from_slice(&self.payload);
        let mut tcp = MutableTcpPacket::new(&mut buff[IPV4_HEADER_SIZE..]).unwrap();
        tcp.set_source(22);
        tcp.set_destination(40000);
        tcp.set_sequence(self.seq);
        tcp.set_acknowledgement(self.ack);
        tcp.set_window(self.window);
        tcp.set_flags(self.flags);
        tcp.set_reserved(self.reserved);
        tcp.set_urgent_ptr(self.urgent_ptr);
        tcp.set_data_offset((tcp_len / 4) as u8);
        buff
    }
}

pub fn echo_reply(ttl: u8, df: bool, id: u16, code: u8) -> Vec<u8> {
    let mut buff = vec![0u8; IPV4_HEADER_SIZE + ICMP_HEADER_SIZE + 120];
    ip_header(&mut buff, ttl, df, id, IpNextHeaderProtocols::Icmp.0);
    let mut echo = MutableEchoReplyPacket::new(&mut buff[IPV4_HEADER_SIZE..]).unwrap();
    echo.set_icmp_type(IcmpTypes::EchoReply);
    echo.set_icmp_code(IcmpCode(code));
    echo.set_identifier(0x1234);
    echo.set_sequence_number(295);
    buff
}

/// Port unreachable quoting the first `quote_len` bytes of `request`.
pub fn port_unreachable(ttl: u8, request: &[u8], quote_len: usize, unused: u32) -> Vec<u8> {
    let quote = &request[..quote_len.min(request.len())];
    let mut buff = vec![0u8; IPV4_HEADER_SIZE + ICMP_HEADER_SIZE + quote.len()];
    ip_header(&mut buff, ttl, false, 0x2000, IpNextHeaderProtocols::Icmp.0);
    buff[IPV4_HEADER_SIZE + 4..IPV4_HEADER_SIZE + 8].copy_from_slice(&unused.to_be_bytes());
    buff[IPV4_HEADER_SIZE + ICMP_HEADER_SIZE..].copy_from_slice(quote);
    let mut icmp_packet = MutableIcmpPacket::new(&mut buff[IPV4_HEADER_SIZE..]).unwrap();
    icmp_packet.set_icmp_type(IcmpTypes::DestinationUnreachable);
    icmp_packet.set_icmp_code(IcmpCode(3));
    let c = icmp::checksum(&icmp_packet.to_immutable());
    icmp_packet.set_checksum(c);
    buff
}

type Responder = Box<dyn Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync>;

/// Answers every request with whatever `responder` builds from it.
pub struct ReplayTransport {
    responder: Responder,
    fail: bool,
    pub sent: Mutex<Vec<Vec<u8>>>,
}

impl ReplayTransport {
    pub fn new(responder: impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static) -> Self {
        ReplayTransport {
            responder: Box::new(responder),
            fail: false,
            sent: Mutex::new(Vec::new()),
        }
    }
    /// A transport whose every send fails.
    pub fn failing() -> Self {
        ReplayTransport {
            responder: Box::new(|_| None),
            fail: true,
            sent: Mutex::new(Vec::new()),
        }
    }
}

impl Transport for ReplayTransport {
    fn send_and_wait(
        &self,
        request: &[u8],
        _matchs: &[LayerMatch],
        _timeout: Duration,
    ) -> Result<Exchange, OsFingerError> {
        if self.fail {
            return Err(OsFingerError::IOError(std::io::Error::other("network down")));
        }
        self.sent.lock().unwrap().push(request.to_vec());
        Ok(Exchange {
            sent: Utc::now(),
            response: (self.responder)(request),
        })
    }
}

/// A host with one listening port: incremental ISNs (+1,000,000 per SYN), 1000 Hz
/// timestamps, a shared incremental IP ID, RST from the closed port and ICMP errors for udp.
pub fn host_responder() -> impl Fn(&[u8]) -> Option<Vec<u8>> + Send + Sync + 'static {
    let isn = AtomicU32::new(1_000_000);
    let tsval = AtomicU32::new(5000);
    let ip_id = AtomicU16::new(100);
    move |request: &[u8]| {
        let id = ip_id.fetch_add(1, Ordering::SeqCst);
        match request[9] {
            6 => {
                let tcp = TcpPacket::new(&request[IPV4_HEADER_SIZE..])?;
                let flags = tcp.get_flags();
                if tcp.get_destination() == OPEN_PORT {
                    if flags & TcpFlags::SYN != 0 {
                        let ts = tsval.fetch_add(100, Ordering::SeqCst).to_be_bytes();
                        let mut options = vec![0x02, 0x04, 0x05, 0xB4, 0x04, 0x02, 0x08, 0x0A];
                        options.extend_from_slice(&ts);
                        options.extend_from_slice(&[0, 0, 0, 0, 0x01, 0x03, 0x03, 0x07]);
                        let reply = TcpReply {
                            id,
                            seq: isn.fetch_add(1_000_000, Ordering::SeqCst),
                            ack: tcp.get_sequence().wrapping_add(1),
                            options,
                            ..Default::default()
                        };
                        Some(reply.build())
                    } else if flags & TcpFlags::ACK != 0 {
                        let reply = TcpReply {
                            id,
                            seq: tcp.get_acknowledgement(),
                            ack: 0,
                            window: 0,
                            flags: TcpFlags::RST,
                            ..Default::default()
                        };
                        Some(reply.build())
                    } else {
                        None
                    }
                } else {
                    let reply = TcpReply {
                        id: 0,
                        seq: 0,
                        ack: tcp.get_sequence().wrapping_add(1),
                        window: 0,
                        flags: TcpFlags::RST | TcpFlags::ACK,
                        ..Default::default()
                    };
                    Some(reply.build())
                }
            }
            1 => Some(echo_reply(64, false, id, 0)),
            17 => Some(port_unreachable(64, request, request.len(), 0)),
            _ => None,
        }
    }
}
