use chrono::DateTime;
use chrono::Utc;
use gcdx::gcdx;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::accessor;
use super::accessor::TcpOptionValue;
use super::packet::U1_DATA_BYTE;
use super::packet::U1_IP_ID;
use super::rr::IERR;
use super::rr::RequestResponse;
use super::rr::SeqSample;
use super::rr::U1RR;
use crate::error::OsFingerError;
use crate::utils::wrap_distance_u32;

const CWR_MASK: u8 = 0b10000000;
const ECE_MASK: u8 = 0b01000000;
const URG_MASK: u8 = 0b00100000;
const ACK_MASK: u8 = 0b00010000;
const PSH_MASK: u8 = 0b00001000;
const RST_MASK: u8 = 0b00000100;
const SYN_MASK: u8 = 0b00000010;
const FIN_MASK: u8 = 0b00000001;

const TG_BUCKETS: [u32; 4] = [32, 64, 128, 255];

/// Outcome of one fingerprint test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestValue<T> {
    Present(T),
    /// The test was not run: no response, or not enough responses.
    NotApplicable,
    /// A response exists but carries something the test cannot express.
    Unsupported,
}

impl<T> TestValue<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, TestValue::Present(_))
    }
    pub fn present(&self) -> Option<&T> {
        match self {
            TestValue::Present(v) => Some(v),
            _ => None,
        }
    }
}

impl<T> From<Option<T>> for TestValue<T> {
    fn from(value: Option<T>) -> TestValue<T> {
        match value {
            Some(v) => TestValue::Present(v),
            None => TestValue::NotApplicable,
        }
    }
}

fn get_diff_u32(input: &[u32]) -> Vec<u32> {
    input
        .windows(2)
        .map(|w| wrap_distance_u32(w[0], w[1]))
        .collect()
}

fn get_diff_u16(input: &[u16]) -> Vec<u32> {
    input
        .windows(2)
        .map(|w| w[1].wrapping_sub(w[0]) as u32)
        .collect()
}

fn elapsed_secs(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    match (to - from).num_microseconds() {
        Some(us) => us as f64 / 1_000_000.0,
        None => 0.0,
    }
}

/// Responsiveness (R)
pub fn tcp_udp_icmp_r(rr: &RequestResponse) -> String {
    if rr.is_answered() {
        String::from("Y")
    } else {
        String::from("N")
    }
}

/// IP don't fragment bit (DF)
pub fn tcp_udp_df(ipv4_response: &[u8]) -> String {
    accessor::ip_df(ipv4_response).to_string()
}

/// IP time-to-live distance (T)
pub fn tcp_udp_icmp_t(ipv4_response: &[u8]) -> u32 {
    0xFF - accessor::ip_ttl(ipv4_response) as u32
}

/// Smallest of 32, 64, 128, 255 not below `t`, none above 255.
pub fn round_up_to_nearest(t: u32) -> Option<u32> {
    TG_BUCKETS.into_iter().find(|b| *b >= t)
}

/// IP initial time-to-live guess (TG)
pub fn tcp_udp_icmp_tg(ipv4_response: &[u8]) -> TestValue<u32> {
    round_up_to_nearest(tcp_udp_icmp_t(ipv4_response)).into()
}

/// TCP initial window size (W, W1–W6)
pub fn tcp_w(ipv4_response: &[u8]) -> u16 {
    accessor::tcp_window(ipv4_response)
}

/// One option of the O string.
pub fn format_option(option: &TcpOptionValue) -> Result<String, OsFingerError> {
    let o = match option {
        TcpOptionValue::Eol => String::from("L"),
        TcpOptionValue::Nop => String::from("N"),
        TcpOptionValue::Mss(mss) => format!("M{:04X}", mss),
        TcpOptionValue::WScale(shift) => format!("W{}", shift),
        TcpOptionValue::Timestamp(tsval, tsecr) => {
            format!("T{}{}", (*tsval != 0) as u8, (*tsecr != 0) as u8)
        }
        TcpOptionValue::SackPermitted => String::from("S"),
        TcpOptionValue::Unknown { kind, data } => {
            return Err(OsFingerError::UnknownTcpOption {
                kind: *kind,
                data: hex::encode(data),
            });
        }
    };
    Ok(o)
}

/// TCP options (O, O1–O6)
pub fn tcp_o(ipv4_response: &[u8]) -> TestValue<String> {
    let mut o_ret = String::new();
    for option in accessor::tcp_options(ipv4_response) {
        match format_option(&option) {
            Ok(o) => o_ret += &o,
            Err(e) => {
                warn!("{}", e);
                return TestValue::Unsupported;
            }
        }
    }
    TestValue::Present(o_ret)
}

/// TCP sequence number (S)
pub fn tcp_s(ipv4_request: &[u8], ipv4_response: &[u8]) -> String {
    let seq = accessor::tcp_seq(ipv4_response);
    let probe_ack = accessor::tcp_ack(ipv4_request);
    if seq == 0 {
        String::from("Z")
    } else if seq == probe_ack {
        String::from("A")
    } else if seq == probe_ack.wrapping_add(1) {
        String::from("A+")
    } else {
        String::from("O")
    }
}

/// TCP acknowledgment number (A)
pub fn tcp_a(ipv4_request: &[u8], ipv4_response: &[u8]) -> String {
    let ack = accessor::tcp_ack(ipv4_response);
    let probe_seq = accessor::tcp_seq(ipv4_request);
    if ack == 0 {
        String::from("Z")
    } else if ack == probe_seq {
        String::from("S")
    } else if ack == probe_seq.wrapping_add(1) {
        String::from("S+")
    } else {
        String::from("O")
    }
}

/// TCP flags (F)
pub fn tcp_f(ipv4_response: &[u8]) -> String {
    let flags = accessor::tcp_flags(ipv4_response);
    // nmap prints them in this order
    let order = [
        (ECE_MASK, 'E'),
        (URG_MASK, 'U'),
        (ACK_MASK, 'A'),
        (PSH_MASK, 'P'),
        (RST_MASK, 'R'),
        (SYN_MASK, 'S'),
        (FIN_MASK, 'F'),
    ];
    order
        .iter()
        .filter(|(mask, _)| flags & mask != 0)
        .map(|(_, c)| *c)
        .collect()
}

/// TCP miscellaneous quirks (Q)
pub fn tcp_q(ipv4_response: &[u8]) -> String {
    let mut q = String::new();
    if accessor::tcp_reserved(ipv4_response) != 0 {
        q.push('R');
    }
    let flags = accessor::tcp_flags(ipv4_response);
    if accessor::tcp_urgent_ptr(ipv4_response) != 0 && flags & URG_MASK == 0 {
        q.push('U');
    }
    q
}

/// TCP RST data checksum (RD)
pub fn tcp_rd(ipv4_response: &[u8]) -> u32 {
    let payload = accessor::tcp_payload(ipv4_response);
    if payload.len() > 0 {
        crc32fast::hash(&payload)
    } else {
        0
    }
}

/// Explicit congestion notification (CC)
pub fn tcp_cc(ipv4_response: &[u8]) -> String {
    let flags = accessor::tcp_flags(ipv4_response);
    let ece = flags & ECE_MASK != 0;
    let cwr = flags & CWR_MASK != 0;
    let cc = match (ece, cwr) {
        // Only the ECE bit is set (not CWR). This host supports ECN.
        (true, false) => "Y",
        // Neither of these two bits is set. The target does not support ECN.
        (false, false) => "N",
        // Both bits are set. The target does not support ECN, but it echoes back what it thinks is a reserved bit.
        (true, true) => "S",
        // The one remaining combination of these two bits (other).
        (false, true) => "O",
    };
    String::from(cc)
}

/// IP don't fragment bit for ICMP (DFI)
pub fn icmp_dfi(ie: &IERR) -> String {
    let r1 = accessor::ip_df(ie.ie1.response());
    let r2 = accessor::ip_df(ie.ie2.response());
    let p1 = accessor::ip_df_bit(&ie.ie1.request);
    let p2 = accessor::ip_df_bit(&ie.ie2.request);
    let dfi = if r1 == 'N' && r2 == 'N' {
        // Neither of the ping responses have the DF bit set.
        "N"
    } else if r1 == 'Y' && r2 == 'Y' {
        // Both of the response DF bits are set.
        "Y"
    } else if r1 == p1 && r2 == p2 {
        // Both responses echo the DF value of the probe.
        "S"
    } else {
        // The one remaining other combination, both responses have the DF bit toggled.
        "O"
    };
    String::from(dfi)
}

/// ICMP response code (CD)
pub fn icmp_cd(ie: &IERR) -> String {
    let c1 = accessor::icmp_code(ie.ie1.response());
    let c2 = accessor::icmp_code(ie.ie2.response());
    let p1 = accessor::icmp_code(&ie.ie1.request);
    let p2 = accessor::icmp_code(&ie.ie2.request);
    if accessor::icmp_code_is_zero(ie.ie1.response())
        && accessor::icmp_code_is_zero(ie.ie2.response())
    {
        // Both code values are zero.
        String::from("Z")
    } else if c1 == p1 && c2 == p2 {
        // Both code values are the same as in the corresponding probe.
        String::from("S")
    } else if c1 == c2 && c1 != 0 {
        // When they both use the same non-zero number, it is shown here.
        format!("{:X}", c1)
    } else {
        String::from("O")
    }
}

/// IP total length (IPL)
pub fn udp_ipl(u1: &U1RR) -> u32 {
    accessor::ip_total_length(u1.u1.response()) as u32
}

/// Unused port unreachable field nonzero (UN)
pub fn udp_un(u1: &U1RR) -> u32 {
    accessor::icmp_rest_of_header(u1.u1.response())
}

/// Returned probe IP total length value (RIPL)
pub fn udp_ripl(u1: &U1RR) -> String {
    let quoted = accessor::icmp_quoted_ipv4(u1.u1.response());
    let ripl = accessor::ip_total_length(&quoted);
    if ripl == accessor::ip_total_length(&u1.u1.request) {
        String::from("G")
    } else {
        format!("{:X}", ripl)
    }
}

/// Returned probe IP ID value (RID)
pub fn udp_rid(u1: &U1RR) -> String {
    let quoted = accessor::icmp_quoted_ipv4(u1.u1.response());
    let rid = accessor::ip_id(&quoted);
    if rid == U1_IP_ID {
        String::from("G")
    } else {
        format!("{:X}", rid)
    }
}

/// Integrity of returned probe IP checksum value (RIPCK)
pub fn udp_ripck(u1: &U1RR) -> String {
    let quoted = accessor::icmp_quoted_ipv4(u1.u1.response());
    let ripck = accessor::ip_checksum(&quoted);
    if ripck == accessor::ip_checksum(&u1.u1.request) {
        String::from("G")
    } else if ripck == 0 {
        String::from("Z")
    } else {
        String::from("I")
    }
}

/// Integrity of returned probe UDP checksum (RUCK)
pub fn udp_ruck(u1: &U1RR) -> String {
    let quoted = accessor::icmp_quoted_ipv4(u1.u1.response());
    let ruck = accessor::udp_checksum(&quoted);
    if ruck == accessor::udp_checksum(&u1.u1.request) {
        String::from("G")
    } else {
        format!("{:X}", ruck)
    }
}

/// Integrity of returned UDP data (RUD)
pub fn udp_rud(u1: &U1RR) -> String {
    let quoted = accessor::icmp_quoted_ipv4(u1.u1.response());
    let payload = accessor::udp_payload(&quoted);
    if payload.iter().all(|b| *b == U1_DATA_BYTE) {
        String::from("G")
    } else {
        String::from("I")
    }
}

/// TCP ISN greatest common divisor (GCD)
pub fn tcp_gcd(isns: &[u32]) -> Option<(u32, Vec<u32>)> {
    let diff = get_diff_u32(isns);
    if diff.len() < 2 {
        return None;
    }
    let gcd = gcdx(&diff)?;
    Some((gcd, diff))
}

/// TCP ISN counter rate (ISR), also returns the per pair rates.
pub fn tcp_isr(samples: &[SeqSample]) -> Option<(u32, Vec<f64>)> {
    let mut seq_rates = Vec::new();
    for w in samples.windows(2) {
        let elapsed = elapsed_secs(w[0].sent, w[1].sent);
        if elapsed <= 0.0 {
            warn!("sequence probes sent at the same instant, pair skipped");
            continue;
        }
        let diff = wrap_distance_u32(w[0].isn, w[1].isn);
        seq_rates.push(diff as f64 / elapsed);
    }
    if seq_rates.len() == 0 {
        return None;
    }
    let avg = seq_rates.iter().sum::<f64>() / seq_rates.len() as f64;
    let isr = if avg < 1.0 {
        0
    } else {
        (8.0 * avg.log2()).round() as u32
    };
    Some((isr, seq_rates))
}

fn vec_std(values: &[f64]) -> f64 {
    let len = values.len() as f64;
    let mean = values.iter().sum::<f64>() / len;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / len;
    var.sqrt()
}

/// TCP ISN sequence predictability index (SP)
pub fn tcp_sp(seq_rates: &[f64], gcd: u32, answered: usize) -> Option<u32> {
    // This test is only performed if at least four responses were seen.
    if answered < 4 || seq_rates.len() == 0 {
        return None;
    }
    // If the previously computed GCD value is greater than nine,
    // the elements of the previously computed seq_rates array are divided by that value.
    let rates: Vec<f64> = if gcd > 9 {
        seq_rates.iter().map(|r| r / gcd as f64).collect()
    } else {
        seq_rates.to_vec()
    };
    let sd = vec_std(&rates);
    if sd <= 1.0 {
        Some(0)
    } else {
        Some((8.0 * sd.log2()).round() as u32)
    }
}

/// Class of an average TSval rate per second.
pub fn ts_class(avg: f64) -> String {
    // These three ranges get special treatment because they correspond to the 2 Hz, 100 Hz,
    // and 200 Hz frequencies used by many hosts.
    if avg >= 0.0 && avg <= 5.66 {
        String::from("1")
    } else if avg >= 70.0 && avg <= 150.0 {
        String::from("7")
    } else if avg > 150.0 && avg <= 350.0 {
        String::from("8")
    } else {
        // binary logarithm of the average increments per second, rounded to the nearest integer
        format!("{:X}", avg.log2().round() as u64)
    }
}

/// TCP timestamp option algorithm (TS)
pub fn tcp_ts(samples: &[SeqSample]) -> TestValue<String> {
    let mut tsvals = Vec::new();
    for s in samples {
        match s.tsval {
            Some(t) => tsvals.push(t),
            // If any of the responses have no timestamp option, TS is set to U (unsupported).
            None => return TestValue::Present(String::from("U")),
        }
    }
    // If any of the timestamp values are zero, TS is set to 0.
    if tsvals.iter().any(|t| *t == 0) {
        return TestValue::Present(String::from("0"));
    }
    let mut rates = Vec::new();
    for w in samples.windows(2) {
        let elapsed = elapsed_secs(w[0].sent, w[1].sent);
        if elapsed <= 0.0 {
            continue;
        }
        let (t0, t1) = (w[0].tsval.unwrap_or(0), w[1].tsval.unwrap_or(0));
        rates.push(t1.wrapping_sub(t0) as f64 / elapsed);
    }
    if rates.len() == 0 {
        return TestValue::NotApplicable;
    }
    let avg = rates.iter().sum::<f64>() / rates.len() as f64;
    TestValue::Present(ts_class(avg))
}

/// Shared IP ID sequence Boolean (SS)
pub fn tcp_ss(seq1_ip_id: u16, seq6_ip_id: u16, ie1_ip_id: u16) -> String {
    let avg = seq6_ip_id.wrapping_sub(seq1_ip_id) as f64 / 5.0;
    if (ie1_ip_id as f64) < seq6_ip_id as f64 + 3.0 * avg {
        String::from("S")
    } else {
        String::from("0")
    }
}

/// IP ID sequence generation algorithm (TI, CI, II)
pub fn ip_id_class(ip_ids: &[u16], min_responses: usize) -> Option<String> {
    if ip_ids.len() < min_responses || ip_ids.len() == 0 {
        return None;
    }
    let z_judgement = |x: &[u16]| -> bool {
        // all of the ID numbers are zero
        x.iter().all(|v| *v == 0)
    };
    let rd_judgement = |diff: &[u32]| -> bool {
        // IP ID sequence ever increases by at least 20,000
        diff.iter().any(|d| *d >= 20000)
    };
    let hex_judgement = |x: &[u16]| -> bool {
        // all of the IP IDs are identical
        x.iter().all(|v| *v == x[0])
    };
    let ri_judgement = |diff: &[u32]| -> bool {
        // any of the differences exceeds 1,000, and is not evenly divisible by 256,
        // or divisible by 256 and at least 256,000
        diff.iter()
            .any(|d| (*d > 1000 && *d % 256 != 0) || (*d % 256 == 0 && *d >= 256000))
    };
    let bi_judgement = |diff: &[u32]| -> bool {
        // all of the differences are divisible by 256 and no greater than 5,120
        diff.iter().all(|d| *d % 256 == 0) && diff.iter().all(|d| *d < 5120)
    };
    let i_judgement = |diff: &[u32]| -> bool {
        // all of the differences are less than ten
        diff.iter().all(|d| *d < 10)
    };

    let diff = get_diff_u16(ip_ids);
    let class = if z_judgement(ip_ids) {
        String::from("Z")
    } else if rd_judgement(&diff) {
        String::from("RD")
    } else if hex_judgement(ip_ids) {
        format!("{:X}", ip_ids[0])
    } else if ri_judgement(&diff) {
        String::from("RI")
    } else if bi_judgement(&diff) {
        String::from("BI")
    } else if i_judgement(&diff) {
        String::from("I")
    } else {
        return None;
    };
    Some(class)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::packet::ProbeKind;
    use crate::os::testutil::TcpReply;
    use crate::os::testutil::echo_reply;
    use chrono::Duration;

    fn rr(kind: ProbeKind, request: Vec<u8>, response: Option<Vec<u8>>) -> RequestResponse {
        RequestResponse {
            kind,
            request,
            response,
            sent: Some(Utc::now()),
        }
    }

    fn samples(isns: &[u32], tsvals: &[Option<u32>], step_ms: i64) -> Vec<SeqSample> {
        let base = Utc::now();
        isns.iter()
            .zip(tsvals.iter())
            .enumerate()
            .map(|(i, (isn, tsval))| SeqSample {
                isn: *isn,
                tsval: *tsval,
                ip_id: 0,
                sent: base + Duration::milliseconds(step_ms * i as i64),
            })
            .collect()
    }

    #[test]
    fn test_format_option() {
        assert_eq!(format_option(&TcpOptionValue::Mss(1460)).unwrap(), "M05B4");
        assert_eq!(format_option(&TcpOptionValue::WScale(10)).unwrap(), "W10");
        assert_eq!(
            format_option(&TcpOptionValue::Timestamp(5, 0)).unwrap(),
            "T10"
        );
        assert_eq!(
            format_option(&TcpOptionValue::Timestamp(0, 0)).unwrap(),
            "T00"
        );
        assert_eq!(format_option(&TcpOptionValue::Eol).unwrap(), "L");
        assert_eq!(format_option(&TcpOptionValue::Nop).unwrap(), "N");
        assert_eq!(format_option(&TcpOptionValue::SackPermitted).unwrap(), "S");
        let unknown = TcpOptionValue::Unknown {
            kind: 30,
            data: vec![0xAB],
        };
        assert!(format_option(&unknown).is_err());
    }

    #[test]
    fn test_tcp_o() {
        let reply = TcpReply {
            options: vec![
                0x02, 0x04, 0x05, 0xB4, 0x04, 0x02, 0x08, 0x0A, 0x00, 0x00, 0x00, 0x05, 0x00,
                0x00, 0x00, 0x00, 0x01, 0x03, 0x03, 0x07,
            ],
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_o(&reply), TestValue::Present(String::from("M05B4ST10NW7")));
        // a response without options is an empty string, not an omitted test
        let reply = TcpReply::default().build();
        assert_eq!(tcp_o(&reply), TestValue::Present(String::new()));
        let reply = TcpReply {
            options: vec![0x1E, 0x04, 0xAA, 0xBB],
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_o(&reply), TestValue::Unsupported);
    }

    #[test]
    fn test_ttl_guess() {
        assert_eq!(round_up_to_nearest(0), Some(32));
        assert_eq!(round_up_to_nearest(32), Some(32));
        assert_eq!(round_up_to_nearest(33), Some(64));
        assert_eq!(round_up_to_nearest(129), Some(255));
        assert_eq!(round_up_to_nearest(256), None);
        let reply = TcpReply {
            ttl: 200,
            ..Default::default()
        }
        .build();
        // 0xFF - 200
        assert_eq!(tcp_udp_icmp_t(&reply), 55);
        assert_eq!(tcp_udp_icmp_tg(&reply), TestValue::Present(64));
    }

    #[test]
    fn test_gcd_reverse() {
        let isns = [1000, 3000, 9000, 0xFFFF_FF00, 4000];
        let (gcd, diff) = tcp_gcd(&isns).unwrap();
        let mut reversed = isns.to_vec();
        reversed.reverse();
        let (gcd_r, diff_r) = tcp_gcd(&reversed).unwrap();
        assert_eq!(gcd, gcd_r);
        let mut diff_back = diff_r.clone();
        diff_back.reverse();
        assert_eq!(diff, diff_back);
        // one difference is not enough
        assert_eq!(tcp_gcd(&[1, 2]), None);
    }

    #[test]
    fn test_isr_sp_uniform() {
        // ISNs grow by exactly 1,000,000 every 100ms
        let isns: Vec<u32> = (0..6).map(|i| 5000 + i * 1_000_000).collect();
        let s = samples(&isns, &[None; 6], 100);
        let (gcd, _) = tcp_gcd(&isns).unwrap();
        assert_eq!(gcd, 1_000_000);
        let (isr, rates) = tcp_isr(&s).unwrap();
        // round(8 * log2(10,000,000))
        assert_eq!(isr, 186);
        assert_eq!(rates.len(), 5);
        assert_eq!(tcp_sp(&rates, gcd, 6), Some(0));
        // fewer than four responses
        assert_eq!(tcp_sp(&rates, gcd, 3), None);
    }

    #[test]
    fn test_sp_spread() {
        let rates = [100.0, 300.0, 100.0, 300.0];
        // sd = 100, 8 * log2(100) = 53.15
        assert_eq!(tcp_sp(&rates, 1, 6), Some(53));
        // divided by 10 first, sd = 10, 8 * log2(10) = 26.58
        assert_eq!(tcp_sp(&rates, 10, 6), Some(27));
    }

    #[test]
    fn test_isr_slow_counter() {
        let isns = [100, 100, 100];
        let s = samples(&isns, &[None; 3], 100);
        let (isr, _) = tcp_isr(&s).unwrap();
        assert_eq!(isr, 0);
    }

    #[test]
    fn test_ts_class() {
        assert_eq!(ts_class(0.0), "1");
        assert_eq!(ts_class(5.66), "1");
        // log2(5.67) = 2.503
        assert_eq!(ts_class(5.67), "3");
        assert_eq!(ts_class(70.0), "7");
        assert_eq!(ts_class(150.0), "7");
        assert_eq!(ts_class(150.5), "8");
        assert_eq!(ts_class(350.0), "8");
        assert_eq!(ts_class(1000.0), "A");
    }

    #[test]
    fn test_tcp_ts() {
        let isns = [1, 2, 3];
        let s = samples(&isns, &[Some(100), Some(200), Some(300)], 100);
        // 1000 per second
        assert_eq!(tcp_ts(&s), TestValue::Present(String::from("A")));
        let s = samples(&isns, &[Some(100), None, Some(300)], 100);
        assert_eq!(tcp_ts(&s), TestValue::Present(String::from("U")));
        let s = samples(&isns, &[Some(100), Some(0), Some(300)], 100);
        assert_eq!(tcp_ts(&s), TestValue::Present(String::from("0")));
    }

    #[test]
    fn test_ss_literal() {
        // avg = 50, 1250 < 1250 + 150
        assert_eq!(tcp_ss(1000, 1250, 1260), "S");
        // the other branch is the digit zero
        assert_eq!(tcp_ss(1000, 1250, 9000), "0");
        assert_ne!(tcp_ss(1000, 1250, 9000), "O");
    }

    #[test]
    fn test_ip_id_class() {
        // all ids zero is Z, a nonzero sequence never is
        assert_eq!(ip_id_class(&[0, 0, 0], 3), Some(String::from("Z")));
        assert_ne!(ip_id_class(&[1, 2, 3], 3), Some(String::from("Z")));
        assert_eq!(ip_id_class(&[0, 0], 3), None);
        assert_eq!(
            ip_id_class(&[100, 30000, 60000], 3),
            Some(String::from("RD"))
        );
        assert_eq!(ip_id_class(&[0x3B, 0x3B], 2), Some(String::from("3B")));
        assert_eq!(
            ip_id_class(&[100, 1200, 2400], 3),
            Some(String::from("RI"))
        );
        assert_eq!(
            ip_id_class(&[256, 512, 1024], 3),
            Some(String::from("BI"))
        );
        assert_eq!(ip_id_class(&[10, 11, 13], 3), Some(String::from("I")));
        // differences of 20 are neither
        assert_eq!(ip_id_class(&[10, 30, 50], 3), None);
    }

    #[test]
    fn test_tcp_cc() {
        let ece = TcpReply {
            flags: SYN_MASK | ACK_MASK | ECE_MASK,
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_cc(&ece), "Y");
        let none = TcpReply::default().build();
        assert_eq!(tcp_cc(&none), "N");
        let both = TcpReply {
            flags: SYN_MASK | ACK_MASK | ECE_MASK | CWR_MASK,
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_cc(&both), "S");
        let cwr = TcpReply {
            flags: SYN_MASK | ACK_MASK | CWR_MASK,
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_cc(&cwr), "O");
    }

    #[test]
    fn test_s_a_f_q_rd() {
        let probe = TcpReply {
            seq: 1000,
            ack: 2000,
            ..Default::default()
        }
        .build();
        let reply = TcpReply {
            seq: 2001,
            ack: 1001,
            flags: RST_MASK | ACK_MASK,
            reserved: 1,
            urgent_ptr: 5,
            payload: b"hello".to_vec(),
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_s(&probe, &reply), "A+");
        assert_eq!(tcp_a(&probe, &reply), "S+");
        assert_eq!(tcp_f(&reply), "AR");
        assert_eq!(tcp_q(&reply), "RU");
        assert_eq!(tcp_rd(&reply), crc32fast::hash(b"hello"));
        let reply = TcpReply {
            seq: 0,
            ack: 7,
            ..Default::default()
        }
        .build();
        assert_eq!(tcp_s(&probe, &reply), "Z");
        assert_eq!(tcp_a(&probe, &reply), "O");
        assert_eq!(tcp_q(&reply), "");
        assert_eq!(tcp_rd(&reply), 0);
    }

    #[test]
    fn test_ie_tests() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let p1 = Probe::prepare(ProbeKind::Ie(1), &ctx).unwrap();
        let p2 = Probe::prepare(ProbeKind::Ie(2), &ctx).unwrap();
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, true, 7, 0))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 8, 0))),
        };
        assert_eq!(icmp_cd(&ie), "Z");
        // echo replies are not type 3, so the dual reading of DF is N for both
        assert_eq!(icmp_dfi(&ie), "N");
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, true, 7, 9))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 8, 0))),
        };
        assert_eq!(icmp_cd(&ie), "S");
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, true, 7, 7))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 8, 7))),
        };
        assert_eq!(icmp_cd(&ie), "7");
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, true, 7, 7))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 8, 3))),
        };
        assert_eq!(icmp_cd(&ie), "O");
    }

    #[test]
    fn test_cd_compares_codes_not_types() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let p1 = Probe::prepare(ProbeKind::Ie(1), &ctx).unwrap();
        let p2 = Probe::prepare(ProbeKind::Ie(2), &ctx).unwrap();
        // reply types (0) never equal the request types (8), the codes echo the requests
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, false, 1, 9))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 2, 0))),
        };
        assert_eq!(icmp_cd(&ie), "S");
        // same nonzero code on both replies is printed as one hex value
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, false, 1, 0x1C))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 2, 0x1C))),
        };
        assert_eq!(icmp_cd(&ie), "1C");
    }

    #[test]
    fn test_dfi_with_unreachable_replies() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        use crate::os::testutil::port_unreachable;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let p1 = Probe::prepare(ProbeKind::Ie(1), &ctx).unwrap();
        let p2 = Probe::prepare(ProbeKind::Ie(2), &ctx).unwrap();
        let unreachable1 = port_unreachable(64, &p1.buff, 28, 0);
        let unreachable2 = port_unreachable(64, &p2.buff, 28, 0);
        // a type 3 reply reads as DF set
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(unreachable1.clone())),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(unreachable2.clone())),
        };
        assert_eq!(icmp_dfi(&ie), "Y");
        // IE1 is sent with DF, IE2 without, both replies follow them
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(unreachable1)),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(echo_reply(64, false, 2, 0))),
        };
        assert_eq!(icmp_dfi(&ie), "S");
        // both replies toggle the request value
        let ie = IERR {
            ie1: rr(ProbeKind::Ie(1), p1.buff.to_vec(), Some(echo_reply(64, true, 1, 0))),
            ie2: rr(ProbeKind::Ie(2), p2.buff.to_vec(), Some(unreachable2)),
        };
        assert_eq!(icmp_dfi(&ie), "O");
    }

    #[test]
    fn test_u1_tests() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        use crate::os::testutil::port_unreachable;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let probe = Probe::prepare(ProbeKind::U1, &ctx).unwrap();
        let request = probe.buff.to_vec();
        // the whole probe quoted back
        let reply = port_unreachable(64, &request, request.len(), 0);
        let u1 = U1RR {
            u1: rr(ProbeKind::U1, request.clone(), Some(reply)),
        };
        assert_eq!(udp_ipl(&u1), 20 + 8 + 328);
        assert_eq!(udp_un(&u1), 0);
        assert_eq!(udp_ripl(&u1), "G");
        assert_eq!(udp_rid(&u1), "G");
        assert_eq!(udp_ripck(&u1), "G");
        assert_eq!(udp_ruck(&u1), "G");
        assert_eq!(udp_rud(&u1), "G");
        assert_eq!(tcp_udp_df(u1.u1.response()), "Y");

        // a quote with a damaged id, checksum and payload
        let mut damaged = request.clone();
        damaged[4] = 0x20; // ip id 0x2042
        damaged[10] = 0;
        damaged[11] = 0;
        damaged[100] = b'X';
        let reply = port_unreachable(64, &damaged, damaged.len(), 0xDEAD);
        let u1 = U1RR {
            u1: rr(ProbeKind::U1, request, Some(reply)),
        };
        assert_eq!(udp_un(&u1), 0xDEAD);
        assert_eq!(udp_rid(&u1), "2042");
        assert_eq!(udp_ripck(&u1), "Z");
        assert_eq!(udp_rud(&u1), "I");
    }

    #[test]
    fn test_u1_short_quotes() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        use crate::os::testutil::port_unreachable;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let request = Probe::prepare(ProbeKind::U1, &ctx).unwrap().buff.to_vec();

        // ip header plus the first 8 bytes (RFC 1122 minimum)
        let reply = port_unreachable(64, &request, 28, 0);
        let u1 = U1RR {
            u1: rr(ProbeKind::U1, request.clone(), Some(reply)),
        };
        assert_eq!(udp_ipl(&u1), 20 + 8 + 28);
        assert_eq!(udp_ripl(&u1), "G");
        assert_eq!(udp_rid(&u1), "G");
        assert_eq!(udp_ripck(&u1), "G");
        assert_eq!(udp_ruck(&u1), "G");
        // no udp payload came back at all
        assert_eq!(udp_rud(&u1), "G");

        // ip header only, the udp header is gone
        let reply = port_unreachable(64, &request, 20, 0);
        let u1 = U1RR {
            u1: rr(ProbeKind::U1, request.clone(), Some(reply)),
        };
        assert_eq!(udp_ipl(&u1), 20 + 8 + 20);
        assert_eq!(udp_ripl(&u1), "G");
        let sent_ruck = accessor::udp_checksum(&request);
        assert_eq!(udp_ruck(&u1), if sent_ruck == 0 { "G" } else { "0" });
        assert_eq!(udp_rud(&u1), "G");
    }

    #[test]
    fn test_ripl_reports_changed_length() {
        use crate::os::packet::Probe;
        use crate::os::packet::ProbeContext;
        use crate::os::testutil::DST;
        use crate::os::testutil::SRC;
        use crate::os::testutil::port_unreachable;
        let ctx = ProbeContext::new(SRC, DST, 22, 9999);
        let request = Probe::prepare(ProbeKind::U1, &ctx).unwrap().buff.to_vec();
        // the quoted total length grew by 8 on the way
        let mut quoted = request.clone();
        quoted[2..4].copy_from_slice(&0x0150u16.to_be_bytes());
        let reply = port_unreachable(64, &quoted, 28, 0);
        let u1 = U1RR {
            u1: rr(ProbeKind::U1, request, Some(reply)),
        };
        assert_eq!(udp_ripl(&u1), "150");
    }
}
