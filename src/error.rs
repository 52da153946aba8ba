use std::net::Ipv4Addr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum OsFingerError {
    /* OS DETECT ERROR */
    #[error("get ipv4 packet failed")]
    GetIpv4PacketFailed,
    #[error("get icmp packet failed")]
    GetIcmpPacketFailed,
    #[error("get tcp packet failed")]
    GetTcpPacketFailed,
    #[error("get udp packet failed")]
    GetUdpPacketFailed,
    #[error("unknown tcp option kind {kind} (data {data})")]
    UnknownTcpOption { kind: u8, data: String },
    #[error("os db parser error: {name}-{line}")]
    OSDBParseError { name: String, line: String },
    #[error("os db is empty, no fingerprint entry found in {path}")]
    OSDBEmpty { path: String },

    /* PORT DISCOVERY ERROR */
    #[error("can not find an open tcp port on {addr}")]
    NoOpenPortFound { addr: Ipv4Addr },
    #[error("can not find a closed tcp port on {addr}")]
    NoClosedPortFound { addr: Ipv4Addr },

    /* LAYERS ERROR */
    #[error("can not found the source address, please make sure target is alive or set it maunal")]
    CanNotFoundSourceAddress,
    #[error("build packet error occurret at [{location}]")]
    BuildPacketError { location: String },
    #[error("send probe {name} failed: {e}")]
    SendProbeFailed { name: String, e: String },

    /* OTHER ERROR */
    #[error("regex error")]
    RegexError(#[from] regex::Error),
    #[error("std error")]
    IOError(#[from] std::io::Error),
    #[error("try lock {var_name} failed: {e}")]
    TryLockGlobalVarFailed { var_name: String, e: String },
}
