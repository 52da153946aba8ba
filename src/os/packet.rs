use pnet::packet::icmp;
use pnet::packet::icmp::IcmpCode;
use pnet::packet::icmp::IcmpTypes;
use pnet::packet::icmp::MutableIcmpPacket;
use pnet::packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4;
use pnet::packet::ipv4::Ipv4Flags;
use pnet::packet::ipv4::MutableIpv4Packet;
use pnet::packet::tcp;
use pnet::packet::tcp::MutableTcpPacket;
use pnet::packet::tcp::TcpFlags;
use pnet::packet::udp;
use pnet::packet::udp::MutableUdpPacket;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::panic::Location;
use std::sync::Arc;

use crate::error::OsFingerError;
use crate::layer::ICMP_HEADER_SIZE;
use crate::layer::IPV4_HEADER_SIZE;
use crate::layer::Layer3Match;
use crate::layer::Layer4MatchIcmp;
use crate::layer::Layer4MatchTcpUdp;
use crate::layer::LayerMatch;
use crate::layer::PayloadMatchIp;
use crate::layer::PayloadMatchTcpUdp;
use crate::layer::TCP_HEADER_SIZE;
use crate::layer::UDP_HEADER_SIZE;
use crate::utils::random_port;
use crate::utils::random_seq;
use crate::utils::random_u16;

// Raw option bytes, already padded to a multiple of four.
// seq 1: WScale (10), Nop, MSS (1460), Timestamp, SackP
// seq 2: MSS (1400), WScale (0), SackP, T(0xFFFFFFFF,0x0), EOL
// seq 3: T(0xFFFFFFFF, 0x0), Nop, Nop, WScale (5), Nop, MSS (640)
// seq 4: SackP, T(0xFFFFFFFF,0x0), WScale (10), EOL
// seq 5: MSS (536), SackP, T(0xFFFFFFFF,0x0), WScale (10), EOL
// seq 6: MSS (265), SackP, T(0xFFFFFFFF,0x0)
// ecn:   WScale (10), Nop, MSS (1460), SackP, Nop, Nop
// t2-t6: WScale (10), Nop, MSS (265), T(0xFFFFFFFF,0x0), SackP
// t7:    WScale (15), Nop, MSS (265), T(0xFFFFFFFF,0x0), SackP
pub const SEQ1_OPT: [u8; 20] = [
    0x03, 0x03, 0x0A, 0x01, 0x02, 0x04, 0x05, 0xB4, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00,
    0x00, 0x00, 0x04, 0x02,
];
pub const SEQ2_OPT: [u8; 20] = [
    0x02, 0x04, 0x05, 0x78, 0x03, 0x03, 0x00, 0x04, 0x02, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00,
    0x00, 0x00, 0x00, 0x00,
];
pub const SEQ3_OPT: [u8; 20] = [
    0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x03, 0x03, 0x05, 0x01,
    0x02, 0x04, 0x02, 0x80,
];
pub const SEQ4_OPT: [u8; 16] = [
    0x04, 0x02, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00, 0x03, 0x03, 0x0A, 0x00,
];
pub const SEQ5_OPT: [u8; 20] = [
    0x02, 0x04, 0x02, 0x18, 0x04, 0x02, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
    0x03, 0x03, 0x0A, 0x00,
];
pub const SEQ6_OPT: [u8; 16] = [
    0x02, 0x04, 0x01, 0x09, 0x04, 0x02, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x00,
];
pub const ECN_OPT: [u8; 12] = [
    0x03, 0x03, 0x0A, 0x01, 0x02, 0x04, 0x05, 0xB4, 0x04, 0x02, 0x01, 0x01,
];
pub const TX_OPT: [u8; 20] = [
    0x03, 0x03, 0x0A, 0x01, 0x02, 0x04, 0x01, 0x09, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00,
    0x00, 0x00, 0x04, 0x02,
];
pub const T7_OPT: [u8; 20] = [
    0x03, 0x03, 0x0F, 0x01, 0x02, 0x04, 0x01, 0x09, 0x08, 0x0A, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00,
    0x00, 0x00, 0x04, 0x02,
];

const TTL: u8 = 64;
const ECN_URGENT_PTR: u16 = 0xF7F5;
// the reserved bit right before CWR
const ECN_RESERVED: u8 = 8;

pub const IE1_SEQUENCE: u16 = 295;
pub const IE2_SEQUENCE: u16 = 296;
pub const IE1_CODE: u8 = 9;
pub const IE2_CODE: u8 = 0;
const IE1_DATA_SIZE: usize = 120;
const IE2_DATA_SIZE: usize = 150;
// IP_TOS_RELIABILITY, 000001|00
const IE2_DSCP: u8 = 1;

pub const U1_IP_ID: u16 = 0x1042;
pub const U1_DATA_SIZE: usize = 300;
pub const U1_DATA_BYTE: u8 = b'C';

/// The sixteen probes of one os detection run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbeKind {
    /// SEQ/OPS/WIN/T1 probes, numbered 1 to 6.
    Seq(u8),
    Ecn,
    /// T2 to T7.
    T(u8),
    /// ICMP echo probes, numbered 1 and 2.
    Ie(u8),
    U1,
}

impl ProbeKind {
    /// Every probe in send order.
    pub fn battery() -> [ProbeKind; 16] {
        [
            ProbeKind::Seq(1),
            ProbeKind::Seq(2),
            ProbeKind::Seq(3),
            ProbeKind::Seq(4),
            ProbeKind::Seq(5),
            ProbeKind::Seq(6),
            ProbeKind::Ie(1),
            ProbeKind::Ie(2),
            ProbeKind::Ecn,
            ProbeKind::T(2),
            ProbeKind::T(3),
            ProbeKind::T(4),
            ProbeKind::T(5),
            ProbeKind::T(6),
            ProbeKind::T(7),
            ProbeKind::U1,
        ]
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProbeKind::Seq(i) => write!(f, "SEQ{}", i),
            ProbeKind::Ecn => write!(f, "ECN"),
            ProbeKind::T(i) => write!(f, "T{}", i),
            ProbeKind::Ie(i) => write!(f, "IE{}", i),
            ProbeKind::U1 => write!(f, "U1"),
        }
    }
}

/// Target and source parameters shared by every probe of a run.
#[derive(Debug, Clone, Copy)]
pub struct ProbeContext {
    pub src_ipv4: Ipv4Addr,
    pub dst_ipv4: Ipv4Addr,
    pub open_port: u16,
    pub closed_port: u16,
    /// ICMP echo identifier of IE1, IE2 uses the next value.
    pub icmp_id: u16,
}

impl ProbeContext {
    pub fn new(
        src_ipv4: Ipv4Addr,
        dst_ipv4: Ipv4Addr,
        open_port: u16,
        closed_port: u16,
    ) -> ProbeContext {
        ProbeContext {
            src_ipv4,
            dst_ipv4,
            open_port,
            closed_port,
            icmp_id: random_u16(),
        }
    }
}

struct TcpProbeShape {
    window: u16,
    flags: u8,
    reserved: u8,
    urgent_ptr: u16,
    df: bool,
    options: &'static [u8],
    open_port: bool,
    zero_ack: bool,
}

fn tcp_probe_shape(kind: ProbeKind) -> Option<TcpProbeShape> {
    let syn = |window: u16, options: &'static [u8]| TcpProbeShape {
        window,
        flags: TcpFlags::SYN,
        reserved: 0,
        urgent_ptr: 0,
        df: false,
        options,
        open_port: true,
        zero_ack: false,
    };
    let tx = |window: u16, flags: u8, df: bool, open_port: bool, options: &'static [u8]| {
        TcpProbeShape {
            window,
            flags,
            reserved: 0,
            urgent_ptr: 0,
            df,
            options,
            open_port,
            zero_ack: false,
        }
    };
    let shape = match kind {
        ProbeKind::Seq(1) => syn(1, &SEQ1_OPT),
        ProbeKind::Seq(2) => syn(63, &SEQ2_OPT),
        ProbeKind::Seq(3) => syn(4, &SEQ3_OPT),
        ProbeKind::Seq(4) => syn(4, &SEQ4_OPT),
        ProbeKind::Seq(5) => syn(16, &SEQ5_OPT),
        ProbeKind::Seq(6) => syn(512, &SEQ6_OPT),
        ProbeKind::Ecn => TcpProbeShape {
            window: 3,
            flags: TcpFlags::CWR | TcpFlags::ECE | TcpFlags::SYN,
            reserved: ECN_RESERVED,
            urgent_ptr: ECN_URGENT_PTR,
            df: false,
            options: &ECN_OPT,
            open_port: true,
            zero_ack: true,
        },
        // null flags
        ProbeKind::T(2) => tx(128, 0, true, true, &TX_OPT),
        ProbeKind::T(3) => tx(
            256,
            TcpFlags::SYN | TcpFlags::FIN | TcpFlags::URG | TcpFlags::PSH,
            false,
            true,
            &TX_OPT,
        ),
        ProbeKind::T(4) => tx(1024, TcpFlags::ACK, true, true, &TX_OPT),
        ProbeKind::T(5) => tx(31337, TcpFlags::SYN, false, false, &TX_OPT),
        ProbeKind::T(6) => tx(32768, TcpFlags::ACK, true, false, &TX_OPT),
        ProbeKind::T(7) => tx(
            65535,
            TcpFlags::FIN | TcpFlags::PSH | TcpFlags::URG,
            false,
            false,
            &T7_OPT,
        ),
        _ => return None,
    };
    Some(shape)
}

#[track_caller]
fn build_error() -> OsFingerError {
    OsFingerError::BuildPacketError {
        location: format!("{}", Location::caller()),
    }
}

fn tcp_packet_layer3(
    shape: &TcpProbeShape,
    dst_ipv4: Ipv4Addr,
    dst_port: u16,
    src_ipv4: Ipv4Addr,
    src_port: u16,
) -> Result<Arc<[u8]>, OsFingerError> {
    let tcp_options_size = shape.options.len();
    let total_size = IPV4_HEADER_SIZE + TCP_HEADER_SIZE + tcp_options_size;
    let mut buff = vec![0u8; total_size];
    // ip header
    let mut ip_header = match MutableIpv4Packet::new(&mut buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    ip_header.set_version(4);
    ip_header.set_header_length(5);
    ip_header.set_total_length(total_size as u16);
    ip_header.set_identification(random_u16());
    if shape.df {
        ip_header.set_flags(Ipv4Flags::DontFragment);
    }
    ip_header.set_ttl(TTL);
    ip_header.set_next_level_protocol(IpNextHeaderProtocols::Tcp);
    ip_header.set_source(src_ipv4);
    ip_header.set_destination(dst_ipv4);
    let c = ipv4::checksum(&ip_header.to_immutable());
    ip_header.set_checksum(c);

    buff[IPV4_HEADER_SIZE + TCP_HEADER_SIZE..].copy_from_slice(shape.options);

    // tcp header
    let mut tcp_header = match MutableTcpPacket::new(&mut buff[IPV4_HEADER_SIZE..]) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    tcp_header.set_source(src_port);
    tcp_header.set_destination(dst_port);
    tcp_header.set_sequence(random_seq());
    let acknowledgement = if shape.zero_ack { 0 } else { random_seq() };
    tcp_header.set_acknowledgement(acknowledgement);
    tcp_header.set_reserved(shape.reserved);
    tcp_header.set_flags(shape.flags);
    tcp_header.set_window(shape.window);
    tcp_header.set_urgent_ptr(shape.urgent_ptr);
    tcp_header.set_data_offset(((TCP_HEADER_SIZE + tcp_options_size) / 4) as u8);
    let checksum = tcp::ipv4_checksum(&tcp_header.to_immutable(), &src_ipv4, &dst_ipv4);
    tcp_header.set_checksum(checksum);
    Ok(Arc::from(buff))
}

fn ie_packet_layer3(
    number: u8,
    dst_ipv4: Ipv4Addr,
    src_ipv4: Ipv4Addr,
    icmp_id: u16,
) -> Result<Arc<[u8]>, OsFingerError> {
    let (df, dscp, code, sequence, data_size) = match number {
        // a code of nine (even though it should be zero)
        1 => (true, 0, IE1_CODE, IE1_SEQUENCE, IE1_DATA_SIZE),
        2 => (false, IE2_DSCP, IE2_CODE, IE2_SEQUENCE, IE2_DATA_SIZE),
        _ => return Err(build_error()),
    };
    // the ICMP request ID and sequence numbers are incremented by one from the previous query values
    let idtf = icmp_id.wrapping_add(number as u16 - 1);
    let total_size = IPV4_HEADER_SIZE + ICMP_HEADER_SIZE + data_size;
    let mut buff = vec![0u8; total_size];
    // ip header
    let mut ip_header = match MutableIpv4Packet::new(&mut buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    ip_header.set_version(4);
    ip_header.set_header_length(5);
    ip_header.set_total_length(total_size as u16);
    ip_header.set_identification(random_u16());
    if df {
        ip_header.set_flags(Ipv4Flags::DontFragment);
    }
    ip_header.set_ttl(TTL);
    ip_header.set_dscp(dscp);
    ip_header.set_ecn(0);
    ip_header.set_next_level_protocol(IpNextHeaderProtocols::Icmp);
    ip_header.set_source(src_ipv4);
    ip_header.set_destination(dst_ipv4);
    let c = ipv4::checksum(&ip_header.to_immutable());
    ip_header.set_checksum(c);

    // icmp header, the data is all zero already
    let mut icmp_header = match MutableEchoRequestPacket::new(&mut buff[IPV4_HEADER_SIZE..]) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    icmp_header.set_icmp_type(IcmpTypes::EchoRequest);
    icmp_header.set_icmp_code(IcmpCode(code));
    icmp_header.set_identifier(idtf);
    icmp_header.set_sequence_number(sequence);

    let mut icmp_header = match MutableIcmpPacket::new(&mut buff[IPV4_HEADER_SIZE..]) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    let checksum = icmp::checksum(&icmp_header.to_immutable());
    icmp_header.set_checksum(checksum);
    Ok(Arc::from(buff))
}

fn udp_packet_layer3(
    dst_ipv4: Ipv4Addr,
    dst_port: u16,
    src_ipv4: Ipv4Addr,
    src_port: u16,
) -> Result<Arc<[u8]>, OsFingerError> {
    let total_size = IPV4_HEADER_SIZE + UDP_HEADER_SIZE + U1_DATA_SIZE;
    let mut buff = vec![0u8; total_size];
    // ip header
    let mut ip_header = match MutableIpv4Packet::new(&mut buff) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    ip_header.set_version(4);
    ip_header.set_header_length(5);
    ip_header.set_total_length(total_size as u16);
    // The IP ID value is set to 0x1042 for operating systems which allow us to set this.
    ip_header.set_identification(U1_IP_ID);
    ip_header.set_ttl(TTL);
    ip_header.set_next_level_protocol(IpNextHeaderProtocols::Udp);
    ip_header.set_source(src_ipv4);
    ip_header.set_destination(dst_ipv4);
    let c = ipv4::checksum(&ip_header.to_immutable());
    ip_header.set_checksum(c);

    // udp header
    let mut udp_header = match MutableUdpPacket::new(&mut buff[IPV4_HEADER_SIZE..]) {
        Some(p) => p,
        None => return Err(build_error()),
    };
    udp_header.set_source(src_port);
    udp_header.set_destination(dst_port);
    udp_header.set_length((UDP_HEADER_SIZE + U1_DATA_SIZE) as u16);
    // The character 'C' (0x43) is repeated 300 times for the data field.
    udp_header.set_payload(&[U1_DATA_BYTE; U1_DATA_SIZE]);
    let checksum = udp::ipv4_checksum(&udp_header.to_immutable(), &src_ipv4, &dst_ipv4);
    udp_header.set_checksum(checksum);
    Ok(Arc::from(buff))
}

/// A prepared probe: immutable bytes plus what is needed to recognise its reply.
#[derive(Debug, Clone)]
pub struct Probe {
    pub kind: ProbeKind,
    pub src_ipv4: Ipv4Addr,
    pub dst_ipv4: Ipv4Addr,
    pub src_port: u16,
    pub dst_port: u16,
    pub icmp_id: u16,
    pub buff: Arc<[u8]>,
}

impl Probe {
    pub fn prepare(kind: ProbeKind, ctx: &ProbeContext) -> Result<Probe, OsFingerError> {
        let src_port = random_port();
        let (dst_port, icmp_id, buff) = match kind {
            ProbeKind::Ie(number) => {
                let buff = ie_packet_layer3(number, ctx.dst_ipv4, ctx.src_ipv4, ctx.icmp_id)?;
                (0, ctx.icmp_id.wrapping_add(number as u16 - 1), buff)
            }
            ProbeKind::U1 => {
                let buff =
                    udp_packet_layer3(ctx.dst_ipv4, ctx.closed_port, ctx.src_ipv4, src_port)?;
                (ctx.closed_port, 0, buff)
            }
            _ => {
                let shape = match tcp_probe_shape(kind) {
                    Some(s) => s,
                    None => return Err(build_error()),
                };
                let dst_port = if shape.open_port {
                    ctx.open_port
                } else {
                    ctx.closed_port
                };
                let buff =
                    tcp_packet_layer3(&shape, ctx.dst_ipv4, dst_port, ctx.src_ipv4, src_port)?;
                (dst_port, 0, buff)
            }
        };
        Ok(Probe {
            kind,
            src_ipv4: ctx.src_ipv4,
            dst_ipv4: ctx.dst_ipv4,
            src_port,
            dst_port,
            icmp_id,
            buff,
        })
    }
    /// Rules that recognise the reply to this probe.
    pub fn matchs(&self) -> Vec<LayerMatch> {
        let name = match self.kind {
            ProbeKind::Seq(_) => "os seq probe",
            ProbeKind::Ecn => "os ecn probe",
            ProbeKind::T(_) => "os tx probe",
            ProbeKind::Ie(_) => "os ie probe",
            ProbeKind::U1 => "os u1 probe",
        };
        let layer3 = Layer3Match {
            name,
            src_addr: Some(self.dst_ipv4),
            dst_addr: Some(self.src_ipv4),
        };
        match self.kind {
            ProbeKind::Ie(_) => vec![LayerMatch::Layer4MatchIcmp(Layer4MatchIcmp {
                name,
                layer3: Some(layer3),
                icmp_type: Some(IcmpTypes::EchoReply),
                echo_id: Some(self.icmp_id),
                payload: None,
            })],
            ProbeKind::U1 => {
                let payload = PayloadMatchTcpUdp {
                    layer3: Some(PayloadMatchIp {
                        src_addr: Some(self.src_ipv4),
                        dst_addr: Some(self.dst_ipv4),
                    }),
                    src_port: Some(self.src_port),
                    dst_port: Some(self.dst_port),
                };
                vec![LayerMatch::Layer4MatchIcmp(Layer4MatchIcmp {
                    name,
                    layer3: Some(layer3),
                    icmp_type: Some(IcmpTypes::DestinationUnreachable),
                    echo_id: None,
                    payload: Some(payload),
                })]
            }
            _ => vec![LayerMatch::Layer4MatchTcpUdp(Layer4MatchTcpUdp {
                name,
                layer3: Some(layer3),
                src_port: Some(self.dst_port),
                dst_port: Some(self.src_port),
            })],
        }
    }
}
