//! Defensive header readers over raw ipv4 responses.
//!
//! Every reader takes the raw bytes of a response (empty when there is none)
//! and falls back to zero, `'N'` or an empty value when the layer is missing.
use pnet::packet::Packet;
use pnet::packet::icmp::IcmpPacket;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Flags;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpOptionNumber;
use pnet::packet::tcp::TcpOptionNumbers;
use pnet::packet::tcp::TcpPacket;
use pnet::packet::udp::UdpPacket;

use crate::error::OsFingerError;
use crate::layer::get_icmp_payload;

fn get_ipv4_packet(ipv4_buff: &[u8]) -> Result<Ipv4Packet<'_>, OsFingerError> {
    if ipv4_buff.len() > 0 {
        match Ipv4Packet::new(ipv4_buff) {
            Some(p) => return Ok(p),
            None => (),
        }
    }
    Err(OsFingerError::GetIpv4PacketFailed)
}

fn get_tcp_packet<'a>(ipv4_packet: &'a Ipv4Packet) -> Result<TcpPacket<'a>, OsFingerError> {
    if ipv4_packet.get_next_level_protocol() == IpNextHeaderProtocols::Tcp {
        if let Some(p) = TcpPacket::new(ipv4_packet.payload()) {
            return Ok(p);
        }
    }
    Err(OsFingerError::GetTcpPacketFailed)
}

fn get_icmp_packet<'a>(ipv4_packet: &'a Ipv4Packet) -> Result<IcmpPacket<'a>, OsFingerError> {
    if ipv4_packet.get_next_level_protocol() == IpNextHeaderProtocols::Icmp {
        if let Some(p) = IcmpPacket::new(ipv4_packet.payload()) {
            return Ok(p);
        }
    }
    Err(OsFingerError::GetIcmpPacketFailed)
}

fn get_udp_packet<'a>(ipv4_packet: &'a Ipv4Packet) -> Result<UdpPacket<'a>, OsFingerError> {
    if ipv4_packet.get_next_level_protocol() == IpNextHeaderProtocols::Udp {
        if let Some(p) = UdpPacket::new(ipv4_packet.payload()) {
            return Ok(p);
        }
    }
    Err(OsFingerError::GetUdpPacketFailed)
}

fn ipv4_field<T: Default>(buff: &[u8], f: impl Fn(&Ipv4Packet) -> T) -> T {
    match get_ipv4_packet(buff) {
        Ok(p) => f(&p),
        Err(_) => T::default(),
    }
}

fn tcp_field<T: Default>(buff: &[u8], f: impl Fn(&TcpPacket) -> T) -> T {
    let ipv4_packet = match get_ipv4_packet(buff) {
        Ok(p) => p,
        Err(_) => return T::default(),
    };
    match get_tcp_packet(&ipv4_packet) {
        Ok(p) => f(&p),
        Err(_) => T::default(),
    }
}

fn icmp_field<T: Default>(buff: &[u8], f: impl Fn(&IcmpPacket) -> T) -> T {
    let ipv4_packet = match get_ipv4_packet(buff) {
        Ok(p) => p,
        Err(_) => return T::default(),
    };
    match get_icmp_packet(&ipv4_packet) {
        Ok(p) => f(&p),
        Err(_) => T::default(),
    }
}

pub fn is_tcp(buff: &[u8]) -> bool {
    ipv4_field(buff, |p| {
        p.get_next_level_protocol() == IpNextHeaderProtocols::Tcp
    })
}

pub fn is_icmp(buff: &[u8]) -> bool {
    ipv4_field(buff, |p| {
        p.get_next_level_protocol() == IpNextHeaderProtocols::Icmp
    })
}

pub fn ip_total_length(buff: &[u8]) -> u16 {
    ipv4_field(buff, |p| p.get_total_length())
}

pub fn ip_id(buff: &[u8]) -> u16 {
    ipv4_field(buff, |p| p.get_identification())
}

pub fn ip_ttl(buff: &[u8]) -> u8 {
    ipv4_field(buff, |p| p.get_ttl())
}

pub fn ip_checksum(buff: &[u8]) -> u16 {
    ipv4_field(buff, |p| p.get_checksum())
}

/// `'Y'` or `'N'`. For an icmp packet this reports whether the icmp type is
/// 3 (destination unreachable), for anything else the ip DF bit.
pub fn ip_df(buff: &[u8]) -> char {
    if is_icmp(buff) {
        let set = icmp_type(buff) == IcmpTypes::DestinationUnreachable.0;
        if set { 'Y' } else { 'N' }
    } else {
        ip_df_bit(buff)
    }
}

/// The literal DF bit, whatever the protocol.
pub fn ip_df_bit(buff: &[u8]) -> char {
    let set = ipv4_field(buff, |p| p.get_flags() & Ipv4Flags::DontFragment != 0);
    if set { 'Y' } else { 'N' }
}

pub fn tcp_seq(buff: &[u8]) -> u32 {
    tcp_field(buff, |p| p.get_sequence())
}

pub fn tcp_ack(buff: &[u8]) -> u32 {
    tcp_field(buff, |p| p.get_acknowledgement())
}

pub fn tcp_window(buff: &[u8]) -> u16 {
    tcp_field(buff, |p| p.get_window())
}

pub fn tcp_flags(buff: &[u8]) -> u8 {
    tcp_field(buff, |p| p.get_flags())
}

pub fn tcp_reserved(buff: &[u8]) -> u8 {
    tcp_field(buff, |p| p.get_reserved())
}

pub fn tcp_urgent_ptr(buff: &[u8]) -> u16 {
    tcp_field(buff, |p| p.get_urgent_ptr())
}

pub fn tcp_payload(buff: &[u8]) -> Vec<u8> {
    tcp_field(buff, |p| p.payload().to_vec())
}

/// A decoded tcp option, in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TcpOptionValue {
    Eol,
    Nop,
    Mss(u16),
    WScale(u8),
    SackPermitted,
    Timestamp(u32, u32),
    Unknown { kind: u8, data: Vec<u8> },
}

fn be_u32(data: &[u8]) -> u32 {
    let mut b = [0u8; 4];
    for (i, v) in data.iter().take(4).enumerate() {
        b[i] = *v;
    }
    u32::from_be_bytes(b)
}

/// Decodes the option bytes of a tcp header. Parsing stops at EOL, the rest is padding.
/// A malformed length ends the list with an `Unknown` entry.
pub fn parse_tcp_options(raw: &[u8]) -> Vec<TcpOptionValue> {
    let mut options = Vec::new();
    let mut i = 0;
    while i < raw.len() {
        let kind = raw[i];
        if kind == TcpOptionNumbers::EOL.0 {
            options.push(TcpOptionValue::Eol);
            break;
        }
        if kind == TcpOptionNumbers::NOP.0 {
            options.push(TcpOptionValue::Nop);
            i += 1;
            continue;
        }
        let len = match raw.get(i + 1) {
            Some(l) => *l as usize,
            None => 0,
        };
        if len < 2 || i + len > raw.len() {
            options.push(TcpOptionValue::Unknown {
                kind,
                data: raw[i..].to_vec(),
            });
            break;
        }
        let data = &raw[i + 2..i + len];
        let option = match (TcpOptionNumber(kind), data.len()) {
            (TcpOptionNumbers::MSS, 2) => TcpOptionValue::Mss(u16::from_be_bytes([data[0], data[1]])),
            (TcpOptionNumbers::WSCALE, 1) => TcpOptionValue::WScale(data[0]),
            (TcpOptionNumbers::SACK_PERMITTED, 0) => TcpOptionValue::SackPermitted,
            (TcpOptionNumbers::TIMESTAMPS, 8) => {
                TcpOptionValue::Timestamp(be_u32(&data[0..4]), be_u32(&data[4..8]))
            }
            _ => TcpOptionValue::Unknown {
                kind,
                data: data.to_vec(),
            },
        };
        options.push(option);
        i += len;
    }
    options
}

pub fn tcp_options(buff: &[u8]) -> Vec<TcpOptionValue> {
    tcp_field(buff, |p| parse_tcp_options(p.get_options_raw()))
}

/// TSval of the timestamp option, `None` when the option is absent.
pub fn tcp_tsval(buff: &[u8]) -> Option<u32> {
    for option in tcp_options(buff) {
        if let TcpOptionValue::Timestamp(tsval, _) = option {
            return Some(tsval);
        }
    }
    None
}

pub fn icmp_type(buff: &[u8]) -> u8 {
    icmp_field(buff, |p| p.get_icmp_type().0)
}

pub fn icmp_code(buff: &[u8]) -> u8 {
    icmp_field(buff, |p| p.get_icmp_code().0)
}

pub fn icmp_code_is_zero(buff: &[u8]) -> bool {
    icmp_field(buff, |p| p.get_icmp_code().0 == 0)
}

/// The second word of the icmp header (unused in port unreachable messages).
pub fn icmp_rest_of_header(buff: &[u8]) -> u32 {
    icmp_field(buff, |p| be_u32(p.payload()))
}

/// The ip packet quoted inside an icmp error message, empty if there is none.
pub fn icmp_quoted_ipv4(buff: &[u8]) -> Vec<u8> {
    icmp_field(buff, |p| {
        if p.get_icmp_type() == IcmpTypes::EchoReply {
            Vec::new()
        } else {
            get_icmp_payload(p)
        }
    })
}

pub fn udp_checksum(buff: &[u8]) -> u16 {
    let ipv4_packet = match get_ipv4_packet(buff) {
        Ok(p) => p,
        Err(_) => return 0,
    };
    match get_udp_packet(&ipv4_packet) {
        Ok(p) => p.get_checksum(),
        Err(_) => 0,
    }
}

pub fn udp_payload(buff: &[u8]) -> Vec<u8> {
    let ipv4_packet = match get_ipv4_packet(buff) {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };
    match get_udp_packet(&ipv4_packet) {
        Ok(p) => p.payload().to_vec(),
        Err(_) => Vec::new(),
    }
}
