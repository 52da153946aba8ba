use chrono::DateTime;
use chrono::Utc;
use pnet::packet::Packet;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmp::IcmpType;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;
use pnet::transport::TransportChannelType::Layer3;
use pnet::transport::TransportReceiver;
use pnet::transport::TransportSender;
use pnet::transport::ipv4_packet_iter;
use pnet::transport::transport_channel;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::OsFingerError;

pub const IPV4_HEADER_SIZE: usize = 20;
pub const TCP_HEADER_SIZE: usize = 20;
pub const UDP_HEADER_SIZE: usize = 8;
pub const ICMP_HEADER_SIZE: usize = 8;

pub const IPV4_BUFF_SIZE: usize = 4096;
// received packets older than this can no longer answer any probe
const INBOX_TTL: Duration = Duration::from_secs(30);
const INBOX_MAX: usize = 4096;
const RECV_POLL: Duration = Duration::from_millis(100);

/// Destination Unreachable, Source Quench and Time Exceeded carry
/// the Internet header plus the first 64 bits of the original datagram's data
/// after 32 unused bits.
/// --- From RFC 792 – Internet Control Message Protocol (ICMP) https://datatracker.ietf.org/doc/html/rfc792#page-6
pub fn get_icmp_payload(icmp_packet: &IcmpPacket) -> Vec<u8> {
    let icmp_type = icmp_packet.get_icmp_type();
    let icmp_payload = icmp_packet.payload();
    let quoted = icmp_type == IcmpTypes::DestinationUnreachable
        || icmp_type == IcmpTypes::SourceQuench
        || icmp_type == IcmpTypes::TimeExceeded;
    if quoted && icmp_payload.len() >= 4 {
        icmp_payload[4..].to_vec()
    } else {
        icmp_payload.to_vec()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layer3Match {
    pub name: &'static str,
    pub src_addr: Option<Ipv4Addr>, // response packet
    pub dst_addr: Option<Ipv4Addr>, // response packet
}

impl Layer3Match {
    pub fn do_match(&self, ipv4_buff: &[u8]) -> bool {
        let ipv4_packet = match Ipv4Packet::new(ipv4_buff) {
            Some(i) => i,
            None => return false,
        };
        if let Some(src_addr) = self.src_addr {
            if ipv4_packet.get_source() != src_addr {
                return false;
            }
        }
        if let Some(dst_addr) = self.dst_addr {
            if ipv4_packet.get_destination() != dst_addr {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layer4MatchTcpUdp {
    pub name: &'static str,
    pub layer3: Option<Layer3Match>,
    pub src_port: Option<u16>, // response tcp or udp packet src port
    pub dst_port: Option<u16>, // response tcp or udp packet dst port
}

fn get_ports(ipv4_packet: &Ipv4Packet) -> Option<(u16, u16)> {
    match ipv4_packet.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => {
            let tcp_packet = TcpPacket::new(ipv4_packet.payload())?;
            Some((tcp_packet.get_source(), tcp_packet.get_destination()))
        }
        IpNextHeaderProtocols::Udp => {
            let udp_packet = UdpPacket::new(ipv4_packet.payload())?;
            Some((udp_packet.get_source(), udp_packet.get_destination()))
        }
        _ => None,
    }
}

fn port_match(want: Option<u16>, got: u16) -> bool {
    match want {
        Some(want) => want == got,
        None => true,
    }
}

impl Layer4MatchTcpUdp {
    pub fn do_match(&self, ipv4_buff: &[u8]) -> bool {
        let m1 = match &self.layer3 {
            Some(layer3) => layer3.do_match(ipv4_buff),
            None => true,
        };
        if !m1 {
            // early stop
            return false;
        }
        let ipv4_packet = match Ipv4Packet::new(ipv4_buff) {
            Some(i) => i,
            None => return false,
        };
        let (r_src_port, r_dst_port) = match get_ports(&ipv4_packet) {
            Some(p) => p,
            None => return false,
        };
        port_match(self.src_port, r_src_port) && port_match(self.dst_port, r_dst_port)
    }
}

/// Matches the ip header quoted in an icmp error payload
#[derive(Debug, Clone, Copy)]
pub struct PayloadMatchIp {
    pub src_addr: Option<Ipv4Addr>, // quoted packet
    pub dst_addr: Option<Ipv4Addr>, // quoted packet
}

impl PayloadMatchIp {
    pub fn do_match(&self, icmp_payload: &[u8]) -> bool {
        let layer3 = Layer3Match {
            name: "icmp payload layer3",
            src_addr: self.src_addr,
            dst_addr: self.dst_addr,
        };
        layer3.do_match(icmp_payload)
    }
}

/// Matches the transport header quoted in an icmp error payload
#[derive(Debug, Clone, Copy)]
pub struct PayloadMatchTcpUdp {
    pub layer3: Option<PayloadMatchIp>,
    pub src_port: Option<u16>, // quoted tcp or udp packet src port
    pub dst_port: Option<u16>, // quoted tcp or udp packet dst port
}

impl PayloadMatchTcpUdp {
    pub fn do_match(&self, icmp_payload: &[u8]) -> bool {
        let m1 = match self.layer3 {
            Some(layer3) => layer3.do_match(icmp_payload),
            None => true,
        };
        if !m1 {
            return false;
        }
        // the quote holds only 8 bytes of the transport header, enough for the ports
        let ipv4_packet = match Ipv4Packet::new(icmp_payload) {
            Some(i) => i,
            None => return false,
        };
        let quoted = ipv4_packet.payload();
        if quoted.len() < 4 {
            return false;
        }
        let r_src_port = u16::from_be_bytes([quoted[0], quoted[1]]);
        let r_dst_port = u16::from_be_bytes([quoted[2], quoted[3]]);
        port_match(self.src_port, r_src_port) && port_match(self.dst_port, r_dst_port)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Layer4MatchIcmp {
    pub name: &'static str,
    pub layer3: Option<Layer3Match>,
    pub icmp_type: Option<IcmpType>, // response icmp packet types
    pub echo_id: Option<u16>,        // identifier of an echo reply
    pub payload: Option<PayloadMatchTcpUdp>, // used to confirm which port the data packet is from
}

impl Layer4MatchIcmp {
    pub fn do_match(&self, ipv4_buff: &[u8]) -> bool {
        let m1 = match &self.layer3 {
            Some(layer3) => layer3.do_match(ipv4_buff),
            None => true,
        };
        if !m1 {
            return false;
        }
        let ipv4_packet = match Ipv4Packet::new(ipv4_buff) {
            Some(i) => i,
            None => return false,
        };
        if ipv4_packet.get_next_level_protocol() != IpNextHeaderProtocols::Icmp {
            return false;
        }
        let icmp_packet = match IcmpPacket::new(ipv4_packet.payload()) {
            Some(i) => i,
            None => return false,
        };
        if let Some(t) = self.icmp_type {
            if t != icmp_packet.get_icmp_type() {
                return false;
            }
        }
        if let Some(echo_id) = self.echo_id {
            // identifier is the first half of the rest-of-header word
            let rest = icmp_packet.payload();
            if rest.len() < 2 || u16::from_be_bytes([rest[0], rest[1]]) != echo_id {
                return false;
            }
        }
        match self.payload {
            Some(payload) => payload.do_match(&get_icmp_payload(&icmp_packet)),
            None => true,
        }
    }
}

/// or rules
#[derive(Debug, Clone, Copy)]
pub enum LayerMatch {
    Layer3Match(Layer3Match),
    Layer4MatchTcpUdp(Layer4MatchTcpUdp),
    Layer4MatchIcmp(Layer4MatchIcmp),
}

impl LayerMatch {
    pub fn do_match(&self, ipv4_buff: &[u8]) -> bool {
        if ipv4_buff.len() > 0 {
            match self {
                LayerMatch::Layer3Match(l3) => l3.do_match(ipv4_buff),
                LayerMatch::Layer4MatchTcpUdp(tcp_udp) => tcp_udp.do_match(ipv4_buff),
                LayerMatch::Layer4MatchIcmp(icmp) => icmp.do_match(ipv4_buff),
            }
        } else {
            false
        }
    }
    pub fn name(&self) -> &'static str {
        match self {
            LayerMatch::Layer3Match(l3) => l3.name,
            LayerMatch::Layer4MatchTcpUdp(tcp_udp) => tcp_udp.name,
            LayerMatch::Layer4MatchIcmp(icmp) => icmp.name,
        }
    }
}

/// One probe transmission: when it left, and the matching reply if any.
#[derive(Debug, Clone)]
pub struct Exchange {
    pub sent: DateTime<Utc>,
    pub response: Option<Vec<u8>>,
}

/// Sends a prepared ipv4 packet and blocks until a reply matching any of
/// `matchs` arrives or `timeout` elapses. A timeout yields `response: None`.
pub trait Transport: Send + Sync {
    fn send_and_wait(
        &self,
        request: &[u8],
        matchs: &[LayerMatch],
        timeout: Duration,
    ) -> Result<Exchange, OsFingerError>;
}

struct Inbox {
    packets: Mutex<VecDeque<(Instant, Vec<u8>)>>,
    arrived: Condvar,
}

impl Inbox {
    fn push(&self, buff: Vec<u8>) {
        match self.packets.lock() {
            Ok(mut packets) => {
                let now = Instant::now();
                while let Some((t, _)) = packets.front() {
                    if now.duration_since(*t) > INBOX_TTL || packets.len() >= INBOX_MAX {
                        packets.pop_front();
                    } else {
                        break;
                    }
                }
                packets.push_back((now, buff));
                self.arrived.notify_all();
            }
            Err(e) => error!("inbox lock poisoned: {}", e),
        }
    }
    /// Removes and returns the first packet received after `since` that matches.
    fn take(
        &self,
        since: Instant,
        matchs: &[LayerMatch],
        timeout: Duration,
    ) -> Result<Option<Vec<u8>>, OsFingerError> {
        let deadline = since + timeout;
        let mut packets = self
            .packets
            .lock()
            .map_err(|e| OsFingerError::TryLockGlobalVarFailed {
                var_name: String::from("inbox"),
                e: e.to_string(),
            })?;
        loop {
            let pos = packets
                .iter()
                .position(|(t, buff)| *t >= since && matchs.iter().any(|m| m.do_match(buff)));
            if let Some(pos) = pos {
                return Ok(packets.remove(pos).map(|(_, buff)| buff));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let (guard, _) = self
                .arrived
                .wait_timeout(packets, deadline - now)
                .map_err(|e| OsFingerError::TryLockGlobalVarFailed {
                    var_name: String::from("inbox"),
                    e: e.to_string(),
                })?;
            packets = guard;
        }
    }
}

/// Raw ipv4 transport on top of `pnet::transport` layer 3 channels.
/// Requires CAP_NET_RAW or root.
pub struct Layer3Transport {
    sender: Mutex<TransportSender>,
    inbox: Arc<Inbox>,
    running: Arc<AtomicBool>,
}

fn spawn_receiver(
    name: &'static str,
    mut rx: TransportReceiver,
    inbox: Arc<Inbox>,
    running: Arc<AtomicBool>,
) {
    thread::spawn(move || {
        let mut iter = ipv4_packet_iter(&mut rx);
        while running.load(Ordering::Relaxed) {
            match iter.next_with_timeout(RECV_POLL) {
                Ok(Some((packet, _addr))) => inbox.push(packet.packet().to_vec()),
                Ok(None) => (),
                Err(e) => {
                    warn!("{} receiver error: {}", name, e);
                    thread::sleep(RECV_POLL);
                }
            }
        }
        debug!("{} receiver stopped", name);
    });
}

impl Layer3Transport {
    pub fn new() -> Result<Layer3Transport, OsFingerError> {
        let inbox = Arc::new(Inbox {
            packets: Mutex::new(VecDeque::new()),
            arrived: Condvar::new(),
        });
        let running = Arc::new(AtomicBool::new(true));
        // the tcp socket also carries our udp and icmp probes, the header is ours
        let (tx, tcp_rx) = transport_channel(IPV4_BUFF_SIZE, Layer3(IpNextHeaderProtocols::Tcp))?;
        let (_icmp_tx, icmp_rx) =
            transport_channel(IPV4_BUFF_SIZE, Layer3(IpNextHeaderProtocols::Icmp))?;
        spawn_receiver("tcp", tcp_rx, inbox.clone(), running.clone());
        spawn_receiver("icmp", icmp_rx, inbox.clone(), running.clone());
        Ok(Layer3Transport {
            sender: Mutex::new(tx),
            inbox,
            running,
        })
    }
}

impl Drop for Layer3Transport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

impl Transport for Layer3Transport {
    fn send_and_wait(
        &self,
        request: &[u8],
        matchs: &[LayerMatch],
        timeout: Duration,
    ) -> Result<Exchange, OsFingerError> {
        let ipv4_packet = match Ipv4Packet::new(request) {
            Some(p) => p,
            None => return Err(OsFingerError::GetIpv4PacketFailed),
        };
        let dst = IpAddr::V4(ipv4_packet.get_destination());
        let (since, sent) = {
            let mut sender =
                self.sender
                    .lock()
                    .map_err(|e| OsFingerError::TryLockGlobalVarFailed {
                        var_name: String::from("sender"),
                        e: e.to_string(),
                    })?;
            let since = Instant::now();
            let sent = Utc::now();
            sender.send_to(ipv4_packet, dst)?;
            (since, sent)
        };
        let response = self.inbox.take(since, matchs, timeout)?;
        match &response {
            Some(r) => debug!("{} matched a {} bytes response", matchs_name(matchs), r.len()),
            None => debug!("{} timeout", matchs_name(matchs)),
        }
        Ok(Exchange { sent, response })
    }
}

fn matchs_name(matchs: &[LayerMatch]) -> &'static str {
    match matchs.first() {
        Some(m) => m.name(),
        None => "unnamed",
    }
}
