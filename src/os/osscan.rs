use chrono::DateTime;
use chrono::Local;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::mpsc::channel;
use std::thread::sleep;
use std::time::Duration;
use std::time::Instant;
use threadpool::ThreadPool;
use tracing::debug;
use tracing::error;
use tracing::warn;

use crate::error::OsFingerError;
use crate::layer::Transport;
use crate::os::accessor;
use crate::os::operator::TestValue;
use crate::os::operator::icmp_cd;
use crate::os::operator::icmp_dfi;
use crate::os::operator::ip_id_class;
use crate::os::operator::tcp_a;
use crate::os::operator::tcp_cc;
use crate::os::operator::tcp_f;
use crate::os::operator::tcp_gcd;
use crate::os::operator::tcp_isr;
use crate::os::operator::tcp_o;
use crate::os::operator::tcp_q;
use crate::os::operator::tcp_rd;
use crate::os::operator::tcp_s;
use crate::os::operator::tcp_sp;
use crate::os::operator::tcp_ss;
use crate::os::operator::tcp_ts;
use crate::os::operator::tcp_udp_df;
use crate::os::operator::tcp_udp_icmp_r;
use crate::os::operator::tcp_udp_icmp_t;
use crate::os::operator::tcp_udp_icmp_tg;
use crate::os::operator::tcp_w;
use crate::os::operator::udp_ipl;
use crate::os::operator::udp_rid;
use crate::os::operator::udp_ripck;
use crate::os::operator::udp_ripl;
use crate::os::operator::udp_ruck;
use crate::os::operator::udp_rud;
use crate::os::operator::udp_un;
use crate::os::packet::Probe;
use crate::os::packet::ProbeContext;
use crate::os::packet::ProbeKind;
use crate::os::rr::AllPacketRR;
use crate::os::rr::IERR;
use crate::os::rr::RequestResponse;
use crate::os::rr::U1RR;
use crate::utils::get_cpu_num;
use crate::utils::get_threads_pool;

// EXAMPLE
// SCAN(V=7.92%E=4%D=2/14%OT=22%CT=1%CU=1%PV=Y%G=Y%TM=...%P=x86_64-pc-linux-gnu)
// SEQ(SP=101%GCD=1%ISR=10D%TI=Z%CI=Z%II=I%TS=A)
// OPS(O1=M5B4ST11NW7%O2=M5B4ST11NW7%O3=M5B4NNT11NW7%O4=M5B4ST11NW7%O5=M5B4ST11NW7%O6=M5B4ST11)
// WIN(W1=FE88%W2=FE88%W3=FE88%W4=FE88%W5=FE88%W6=FE88)
// ECN(R=Y%DF=Y%T=40%W=FAF0%O=M5B4NNSNW7%CC=Y%Q=)
// T1(R=Y%DF=Y%T=40%S=O%A=S+%F=AS%RD=0%Q=)
// T2(R=N)
// U1(R=Y%DF=N%T=40%IPL=164%UN=0%RIPL=G%RID=G%RIPCK=G%RUCK=G%RUD=G)
// IE(R=Y%DFI=N%T=40%CD=S)

/// Sequence probes leave exactly this far apart.
const SEQ_INTERVAL: Duration = Duration::from_millis(100);
/// Enough workers to keep all six sequence probes in flight.
const MIN_WORKERS: usize = 6;
/// Fixed line width of the `OS:` block, prefix excluded.
const NMAP_LINE_WIDTH: usize = 71;

const OPS_NAMES: [&str; 6] = ["O1", "O2", "O3", "O4", "O5", "O6"];
const WIN_NAMES: [&str; 6] = ["W1", "W2", "W3", "W4", "W5", "W6"];

/// One test group of a response fingerprint, as printed and scored.
pub trait ObservedGroup {
    fn name(&self) -> &str;
    /// False when the group got no response (R=N).
    fn responsive(&self) -> bool;
    /// Test names with their rendered values, `None` for tests that were not run.
    fn tests(&self) -> Vec<(&'static str, Option<String>)>;
}

fn hex_test(value: &TestValue<u32>) -> Option<String> {
    value.present().map(|v| format!("{:X}", v))
}

fn text_test(value: &TestValue<String>) -> Option<String> {
    value.present().cloned()
}

fn write_group(f: &mut fmt::Formatter, group: &impl ObservedGroup) -> fmt::Result {
    if !group.responsive() {
        return write!(f, "{}(R=N)", group.name());
    }
    let mut fields = Vec::new();
    for (test, value) in group.tests() {
        match value {
            // R=Y is implied
            Some(v) if test == "R" && v == "Y" => (),
            Some(v) => fields.push(format!("{}={}", test, v)),
            None => (),
        }
    }
    write!(f, "{}({})", group.name(), fields.join("%"))
}

fn any_answered(rrs: &[&RequestResponse]) -> String {
    if rrs.iter().any(|rr| rr.is_answered()) {
        String::from("Y")
    } else {
        String::from("N")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SEQX {
    pub r: String,
    // SP, GCD, ISR, TI, CI, II, SS, and TS.
    pub sp: TestValue<u32>,
    pub gcd: TestValue<u32>,
    pub isr: TestValue<u32>,
    pub ti: TestValue<String>,
    pub ci: TestValue<String>,
    pub ii: TestValue<String>,
    pub ss: TestValue<String>,
    pub ts: TestValue<String>,
    /// Data checksum of the first sequence response. Reported in the json output only.
    pub rd: TestValue<u32>,
}

impl SEQX {
    pub fn unanswered() -> SEQX {
        SEQX {
            r: String::from("N"),
            sp: TestValue::NotApplicable,
            gcd: TestValue::NotApplicable,
            isr: TestValue::NotApplicable,
            ti: TestValue::NotApplicable,
            ci: TestValue::NotApplicable,
            ii: TestValue::NotApplicable,
            ss: TestValue::NotApplicable,
            ts: TestValue::NotApplicable,
            rd: TestValue::NotApplicable,
        }
    }
    pub fn from_responses(ap: &AllPacketRR) -> SEQX {
        let samples = ap.seq.samples();
        if samples.len() == 0 {
            return SEQX::unanswered();
        }
        let isns: Vec<u32> = samples.iter().map(|s| s.isn).collect();
        let gcd_ret = tcp_gcd(&isns);
        let isr_ret = tcp_isr(&samples);
        // GCD first, ISR next, SP consumes both
        let sp = match (&gcd_ret, &isr_ret) {
            (Some((gcd, _)), Some((_, seq_rates))) => {
                tcp_sp(seq_rates, *gcd, samples.len()).into()
            }
            _ => TestValue::NotApplicable,
        };
        let gcd = gcd_ret.map(|(gcd, _)| gcd).into();
        let isr = isr_ret.map(|(isr, _)| isr).into();

        let seq_ids: Vec<u16> = samples.iter().map(|s| s.ip_id).collect();
        let ti: TestValue<String> = ip_id_class(&seq_ids, 3).into();
        let closed_ids: Vec<u16> = ap
            .tx
            .closed()
            .iter()
            .filter(|rr| rr.is_answered())
            .map(|rr| accessor::ip_id(rr.response()))
            .collect();
        let ci = ip_id_class(&closed_ids, 2).into();
        let ie_ids: Vec<u16> = [&ap.ie.ie1, &ap.ie.ie2]
            .iter()
            .filter(|rr| rr.is_answered())
            .map(|rr| accessor::ip_id(rr.response()))
            .collect();
        let ii: TestValue<String> = ip_id_class(&ie_ids, 2).into();

        let ss = if ti.is_present()
            && ii.is_present()
            && ap.seq.seq1.is_answered()
            && ap.seq.seq6.is_answered()
            && ap.ie.ie1.is_answered()
        {
            TestValue::Present(tcp_ss(
                accessor::ip_id(ap.seq.seq1.response()),
                accessor::ip_id(ap.seq.seq6.response()),
                accessor::ip_id(ap.ie.ie1.response()),
            ))
        } else {
            TestValue::NotApplicable
        };
        let ts = tcp_ts(&samples);
        let rd = if ap.seq.seq1.is_answered() {
            TestValue::Present(tcp_rd(ap.seq.seq1.response()))
        } else {
            TestValue::NotApplicable
        };
        SEQX {
            r: String::from("Y"),
            sp,
            gcd,
            isr,
            ti,
            ci,
            ii,
            ss,
            ts,
            rd,
        }
    }
}

impl ObservedGroup for SEQX {
    fn name(&self) -> &str {
        "SEQ"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("SP", hex_test(&self.sp)),
            ("GCD", hex_test(&self.gcd)),
            ("ISR", hex_test(&self.isr)),
            ("TI", text_test(&self.ti)),
            ("CI", text_test(&self.ci)),
            ("II", text_test(&self.ii)),
            ("SS", text_test(&self.ss)),
            ("TS", text_test(&self.ts)),
        ]
    }
}

impl fmt::Display for SEQX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OPSX {
    pub r: String,
    pub o: [TestValue<String>; 6],
}

impl OPSX {
    pub fn from_responses(ap: &AllPacketRR) -> OPSX {
        let all = ap.seq.all();
        let o = all.map(|rr| {
            if rr.is_answered() {
                tcp_o(rr.response())
            } else {
                TestValue::NotApplicable
            }
        });
        OPSX {
            r: any_answered(&all),
            o,
        }
    }
}

impl ObservedGroup for OPSX {
    fn name(&self) -> &str {
        "OPS"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        OPS_NAMES
            .iter()
            .zip(self.o.iter())
            .map(|(name, o)| (*name, text_test(o)))
            .collect()
    }
}

impl fmt::Display for OPSX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WINX {
    pub r: String,
    pub w: [TestValue<u32>; 6],
}

impl WINX {
    pub fn from_responses(ap: &AllPacketRR) -> WINX {
        let all = ap.seq.all();
        let w = all.map(|rr| {
            if rr.is_answered() {
                TestValue::Present(tcp_w(rr.response()) as u32)
            } else {
                TestValue::NotApplicable
            }
        });
        WINX {
            r: any_answered(&all),
            w,
        }
    }
}

impl ObservedGroup for WINX {
    fn name(&self) -> &str {
        "WIN"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        WIN_NAMES
            .iter()
            .zip(self.w.iter())
            .map(|(name, w)| (*name, hex_test(w)))
            .collect()
    }
}

impl fmt::Display for WINX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ECNX {
    pub r: String,
    pub df: TestValue<String>,
    pub t: TestValue<u32>,
    pub tg: TestValue<u32>,
    pub w: TestValue<u32>,
    pub o: TestValue<String>,
    pub cc: TestValue<String>,
    pub q: TestValue<String>,
}

impl ECNX {
    pub fn from_response(rr: &RequestResponse) -> ECNX {
        let r = tcp_udp_icmp_r(rr);
        if r != "Y" {
            return ECNX {
                r,
                df: TestValue::NotApplicable,
                t: TestValue::NotApplicable,
                tg: TestValue::NotApplicable,
                w: TestValue::NotApplicable,
                o: TestValue::NotApplicable,
                cc: TestValue::NotApplicable,
                q: TestValue::NotApplicable,
            };
        }
        let response = rr.response();
        ECNX {
            r,
            df: TestValue::Present(tcp_udp_df(response)),
            t: TestValue::Present(tcp_udp_icmp_t(response)),
            tg: tcp_udp_icmp_tg(response),
            w: TestValue::Present(tcp_w(response) as u32),
            o: tcp_o(response),
            cc: TestValue::Present(tcp_cc(response)),
            q: TestValue::Present(tcp_q(response)),
        }
    }
}

impl ObservedGroup for ECNX {
    fn name(&self) -> &str {
        "ECN"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("R", Some(self.r.clone())),
            ("DF", text_test(&self.df)),
            ("T", hex_test(&self.t)),
            ("TG", hex_test(&self.tg)),
            ("W", hex_test(&self.w)),
            ("O", text_test(&self.o)),
            ("CC", text_test(&self.cc)),
            ("Q", text_test(&self.q)),
        ]
    }
}

impl fmt::Display for ECNX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

/// Result of one of the T1 to T7 probes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TXX {
    pub name: String,
    pub r: String,
    pub df: TestValue<String>,
    pub t: TestValue<u32>,
    pub tg: TestValue<u32>,
    pub w: TestValue<u32>,
    pub s: TestValue<String>,
    pub a: TestValue<String>,
    pub f: TestValue<String>,
    pub o: TestValue<String>,
    pub rd: TestValue<u32>,
    pub q: TestValue<String>,
}

impl TXX {
    pub fn from_response(name: &str, rr: &RequestResponse) -> TXX {
        let r = tcp_udp_icmp_r(rr);
        if r != "Y" {
            return TXX {
                name: name.to_string(),
                r,
                df: TestValue::NotApplicable,
                t: TestValue::NotApplicable,
                tg: TestValue::NotApplicable,
                w: TestValue::NotApplicable,
                s: TestValue::NotApplicable,
                a: TestValue::NotApplicable,
                f: TestValue::NotApplicable,
                o: TestValue::NotApplicable,
                rd: TestValue::NotApplicable,
                q: TestValue::NotApplicable,
            };
        }
        let request = &rr.request;
        let response = rr.response();
        TXX {
            name: name.to_string(),
            r,
            df: TestValue::Present(tcp_udp_df(response)),
            t: TestValue::Present(tcp_udp_icmp_t(response)),
            tg: tcp_udp_icmp_tg(response),
            w: TestValue::Present(tcp_w(response) as u32),
            s: TestValue::Present(tcp_s(request, response)),
            a: TestValue::Present(tcp_a(request, response)),
            f: TestValue::Present(tcp_f(response)),
            o: tcp_o(response),
            rd: TestValue::Present(tcp_rd(response)),
            q: TestValue::Present(tcp_q(response)),
        }
    }
}

impl ObservedGroup for TXX {
    fn name(&self) -> &str {
        &self.name
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("R", Some(self.r.clone())),
            ("DF", text_test(&self.df)),
            ("T", hex_test(&self.t)),
            ("TG", hex_test(&self.tg)),
            ("W", hex_test(&self.w)),
            ("S", text_test(&self.s)),
            ("A", text_test(&self.a)),
            ("F", text_test(&self.f)),
            ("O", text_test(&self.o)),
            ("RD", hex_test(&self.rd)),
            ("Q", text_test(&self.q)),
        ]
    }
}

impl fmt::Display for TXX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct U1X {
    pub r: String,
    pub df: TestValue<String>,
    pub t: TestValue<u32>,
    pub tg: TestValue<u32>,
    pub ipl: TestValue<u32>,
    pub un: TestValue<u32>,
    pub ripl: TestValue<String>,
    pub rid: TestValue<String>,
    pub ripck: TestValue<String>,
    pub ruck: TestValue<String>,
    pub rud: TestValue<String>,
}

impl U1X {
    pub fn from_response(u1: &U1RR) -> U1X {
        let r = tcp_udp_icmp_r(&u1.u1);
        if r != "Y" {
            return U1X {
                r,
                df: TestValue::NotApplicable,
                t: TestValue::NotApplicable,
                tg: TestValue::NotApplicable,
                ipl: TestValue::NotApplicable,
                un: TestValue::NotApplicable,
                ripl: TestValue::NotApplicable,
                rid: TestValue::NotApplicable,
                ripck: TestValue::NotApplicable,
                ruck: TestValue::NotApplicable,
                rud: TestValue::NotApplicable,
            };
        }
        let response = u1.u1.response();
        U1X {
            r,
            df: TestValue::Present(tcp_udp_df(response)),
            t: TestValue::Present(tcp_udp_icmp_t(response)),
            tg: tcp_udp_icmp_tg(response),
            ipl: TestValue::Present(udp_ipl(u1)),
            un: TestValue::Present(udp_un(u1)),
            ripl: TestValue::Present(udp_ripl(u1)),
            rid: TestValue::Present(udp_rid(u1)),
            ripck: TestValue::Present(udp_ripck(u1)),
            ruck: TestValue::Present(udp_ruck(u1)),
            rud: TestValue::Present(udp_rud(u1)),
        }
    }
}

impl ObservedGroup for U1X {
    fn name(&self) -> &str {
        "U1"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("R", Some(self.r.clone())),
            ("DF", text_test(&self.df)),
            ("T", hex_test(&self.t)),
            ("TG", hex_test(&self.tg)),
            ("IPL", hex_test(&self.ipl)),
            ("UN", hex_test(&self.un)),
            ("RIPL", text_test(&self.ripl)),
            ("RID", text_test(&self.rid)),
            ("RIPCK", text_test(&self.ripck)),
            ("RUCK", text_test(&self.ruck)),
            ("RUD", text_test(&self.rud)),
        ]
    }
}

impl fmt::Display for U1X {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IEX {
    pub r: String,
    pub dfi: TestValue<String>,
    pub t: TestValue<u32>,
    pub tg: TestValue<u32>,
    pub cd: TestValue<String>,
}

impl IEX {
    /// Both echo probes must be answered for R=Y.
    pub fn from_responses(ie: &IERR) -> IEX {
        if !(ie.ie1.is_answered() && ie.ie2.is_answered()) {
            return IEX {
                r: String::from("N"),
                dfi: TestValue::NotApplicable,
                t: TestValue::NotApplicable,
                tg: TestValue::NotApplicable,
                cd: TestValue::NotApplicable,
            };
        }
        let response = ie.ie1.response();
        IEX {
            r: String::from("Y"),
            dfi: TestValue::Present(icmp_dfi(ie)),
            t: TestValue::Present(tcp_udp_icmp_t(response)),
            tg: tcp_udp_icmp_tg(response),
            cd: TestValue::Present(icmp_cd(ie)),
        }
    }
}

impl ObservedGroup for IEX {
    fn name(&self) -> &str {
        "IE"
    }
    fn responsive(&self) -> bool {
        self.r == "Y"
    }
    fn tests(&self) -> Vec<(&'static str, Option<String>)> {
        vec![
            ("R", Some(self.r.clone())),
            ("DFI", text_test(&self.dfi)),
            ("T", hex_test(&self.t)),
            ("TG", hex_test(&self.tg)),
            ("CD", text_test(&self.cd)),
        ]
    }
}

impl fmt::Display for IEX {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write_group(f, self)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fingerprint {
    pub scan: String,
    pub seqx: SEQX,
    pub opsx: OPSX,
    pub winx: WINX,
    pub ecnx: ECNX,
    pub t1x: TXX,
    pub t2x: TXX,
    pub t3x: TXX,
    pub t4x: TXX,
    pub t5x: TXX,
    pub t6x: TXX,
    pub t7x: TXX,
    pub u1x: U1X,
    pub iex: IEX,
}

impl Fingerprint {
    /// Runs every test over the collected responses.
    pub fn from_responses(ap: &AllPacketRR, scan: String) -> Fingerprint {
        debug!("generate the fingerprint");
        Fingerprint {
            scan,
            seqx: SEQX::from_responses(ap),
            opsx: OPSX::from_responses(ap),
            winx: WINX::from_responses(ap),
            ecnx: ECNX::from_response(&ap.ecn.ecn),
            // T1 is the answer to the first sequence probe
            t1x: TXX::from_response("T1", &ap.seq.seq1),
            t2x: TXX::from_response("T2", &ap.tx.t2),
            t3x: TXX::from_response("T3", &ap.tx.t3),
            t4x: TXX::from_response("T4", &ap.tx.t4),
            t5x: TXX::from_response("T5", &ap.tx.t5),
            t6x: TXX::from_response("T6", &ap.tx.t6),
            t7x: TXX::from_response("T7", &ap.tx.t7),
            u1x: U1X::from_response(&ap.u1),
            iex: IEX::from_responses(&ap.ie),
        }
    }
    pub fn tx(&self) -> [&TXX; 7] {
        [
            &self.t1x, &self.t2x, &self.t3x, &self.t4x, &self.t5x, &self.t6x, &self.t7x,
        ]
    }
    /// The fingerprint block as nmap prints it, every line prefixed with `OS:`.
    pub fn nmap_format(&self) -> String {
        let fingerprint = format!("{}", self);
        let chars: Vec<char> = fingerprint.chars().filter(|c| *c != '\n').collect();
        let lines: Vec<String> = chars
            .chunks(NMAP_LINE_WIDTH)
            .map(|chunk| format!("OS:{}", chunk.iter().collect::<String>()))
            .collect();
        lines.join("\n")
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut lines = Vec::new();
        if self.scan.len() > 0 {
            lines.push(self.scan.clone());
        }
        lines.push(format!("{}", self.seqx));
        lines.push(format!("{}", self.opsx));
        lines.push(format!("{}", self.winx));
        lines.push(format!("{}", self.ecnx));
        for tx in self.tx() {
            lines.push(format!("{}", tx));
        }
        lines.push(format!("{}", self.u1x));
        lines.push(format!("{}", self.iex));
        write!(f, "{}", lines.join("\n"))
    }
}

/// The SCAN line heading a fingerprint.
pub fn get_scan_line(dst_ipv4: Ipv4Addr, open_port: u16, closed_port: u16) -> String {
    // Program version (V).
    let v = env!("CARGO_PKG_VERSION");
    // Date of scan (D) in the form month/day.
    let now: DateTime<Local> = Local::now();
    let date = format!("{}", now.format("%-m/%-d"));
    // Private IP space (PV) is Y if the target is on the 10.0.0.0/8, 172.16.0.0/12, or 192.168.0.0/16 private networks.
    let pv = if dst_ipv4.is_private() || dst_ipv4.is_loopback() {
        "Y"
    } else {
        "N"
    };
    // The OS scan time (TM) is provided in Unix time_t format (in hexadecimal).
    let now: DateTime<Utc> = Utc::now();
    let tm = format!("{:X}", now.timestamp());
    // U1 goes to the closed tcp port number, so CU repeats CT.
    format!(
        "SCAN(V={}%E=4%D={}%OT={}%CT={}%CU={}%PV={}%G=Y%TM={}%P={})",
        v,
        date,
        open_port,
        closed_port,
        closed_port,
        pv,
        tm,
        env!("CARGO_PKG_NAME")
    )
}

fn send_one(
    transport: &dyn Transport,
    kind: ProbeKind,
    ctx: &ProbeContext,
    timeout: Duration,
    deadline: Instant,
) -> RequestResponse {
    let probe = match Probe::prepare(kind, ctx) {
        Ok(p) => p,
        Err(e) => {
            warn!("prepare probe {} failed: {}", kind, e);
            return RequestResponse::unsent(kind);
        }
    };
    let mut rr = RequestResponse {
        kind,
        request: probe.buff.to_vec(),
        response: None,
        sent: None,
    };
    let now = Instant::now();
    if now >= deadline {
        debug!("deadline passed, probe {} not sent", kind);
        return rr;
    }
    let wait = timeout.min(deadline - now);
    match transport.send_and_wait(&probe.buff, &probe.matchs(), wait) {
        Ok(exchange) => {
            rr.sent = Some(exchange.sent);
            rr.response = exchange.response;
        }
        Err(e) => {
            let e = OsFingerError::SendProbeFailed {
                name: kind.to_string(),
                e: e.to_string(),
            };
            warn!("{}", e);
        }
    }
    rr
}

/// Runs `kinds` on the pool, `interval` apart when given, and waits for all of them.
fn dispatch(
    pool: &ThreadPool,
    transport: &Arc<dyn Transport>,
    ctx: &ProbeContext,
    kinds: &[ProbeKind],
    timeout: Duration,
    deadline: Instant,
    interval: Option<Duration>,
) -> Vec<RequestResponse> {
    let (tx, rx) = channel();
    for (i, kind) in kinds.iter().enumerate() {
        if i > 0 {
            if let Some(interval) = interval {
                sleep(interval);
            }
        }
        let tx = tx.clone();
        let transport = transport.clone();
        let ctx = *ctx;
        let kind = *kind;
        pool.execute(move || {
            let rr = send_one(transport.as_ref(), kind, &ctx, timeout, deadline);
            match tx.send(rr) {
                Ok(_) => (),
                Err(e) => error!("failed to send result to channel: {}", e),
            }
        });
    }
    drop(tx);
    rx.into_iter().collect()
}

/// Sends the whole battery. Sequence probes go first, 100 ms apart, the echo
/// probes right after them, then everything else at once. Probes that fail or
/// miss the deadline are kept as unanswered.
pub fn send_all_probes(
    transport: Arc<dyn Transport>,
    ctx: &ProbeContext,
    timeout: Duration,
    deadline: Instant,
    threads: usize,
) -> Result<AllPacketRR, OsFingerError> {
    let threads = if threads == 0 { get_cpu_num() } else { threads };
    let pool = get_threads_pool(threads.max(MIN_WORKERS));
    let battery = ProbeKind::battery();
    let mut ap = AllPacketRR::empty();

    debug!("send sequence probes");
    let seq_kinds: Vec<ProbeKind> = battery
        .iter()
        .filter(|k| matches!(k, ProbeKind::Seq(_)))
        .copied()
        .collect();
    for rr in dispatch(
        &pool,
        &transport,
        ctx,
        &seq_kinds,
        timeout,
        deadline,
        Some(SEQ_INTERVAL),
    ) {
        ap.insert(rr);
    }

    debug!("send icmp echo probes");
    let ie_kinds: Vec<ProbeKind> = battery
        .iter()
        .filter(|k| matches!(k, ProbeKind::Ie(_)))
        .copied()
        .collect();
    for rr in dispatch(&pool, &transport, ctx, &ie_kinds, timeout, deadline, None) {
        ap.insert(rr);
    }

    debug!("send ecn, tcp and udp probes");
    let rest: Vec<ProbeKind> = battery
        .iter()
        .filter(|k| !matches!(k, ProbeKind::Seq(_) | ProbeKind::Ie(_)))
        .copied()
        .collect();
    for rr in dispatch(&pool, &transport, ctx, &rest, timeout, deadline, None) {
        ap.insert(rr);
    }
    Ok(ap)
}
