use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

use super::accessor;
use super::packet::ProbeKind;

// Each request corresponds to a response, all layer3 packet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestResponse {
    pub kind: ProbeKind,
    pub request: Vec<u8>, // layer3, empty if the probe was never built
    pub response: Option<Vec<u8>>, // layer3
    /// Moment the probe left, `None` if it was never sent.
    pub sent: Option<DateTime<Utc>>,
}

impl RequestResponse {
    pub fn unsent(kind: ProbeKind) -> RequestResponse {
        RequestResponse {
            kind,
            request: Vec::new(),
            response: None,
            sent: None,
        }
    }
    pub fn is_answered(&self) -> bool {
        match &self.response {
            Some(r) => r.len() > 0,
            None => false,
        }
    }
    /// Raw response bytes, empty when nothing came back.
    pub fn response(&self) -> &[u8] {
        match &self.response {
            Some(r) => r,
            None => &[],
        }
    }
}

/// Values of one answered sequence probe, read once and reused by the SEQ tests.
#[derive(Debug, Clone, Copy)]
pub struct SeqSample {
    pub isn: u32,
    pub tsval: Option<u32>,
    pub ip_id: u16,
    pub sent: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SEQRR {
    pub seq1: RequestResponse,
    pub seq2: RequestResponse,
    pub seq3: RequestResponse,
    pub seq4: RequestResponse,
    pub seq5: RequestResponse,
    pub seq6: RequestResponse,
}

impl SEQRR {
    pub fn empty() -> SEQRR {
        SEQRR {
            seq1: RequestResponse::unsent(ProbeKind::Seq(1)),
            seq2: RequestResponse::unsent(ProbeKind::Seq(2)),
            seq3: RequestResponse::unsent(ProbeKind::Seq(3)),
            seq4: RequestResponse::unsent(ProbeKind::Seq(4)),
            seq5: RequestResponse::unsent(ProbeKind::Seq(5)),
            seq6: RequestResponse::unsent(ProbeKind::Seq(6)),
        }
    }
    pub fn all(&self) -> [&RequestResponse; 6] {
        [
            &self.seq1, &self.seq2, &self.seq3, &self.seq4, &self.seq5, &self.seq6,
        ]
    }
    pub fn answered(&self) -> usize {
        self.all().iter().filter(|rr| rr.is_answered()).count()
    }
    /// Samples of the answered tcp probes, in probe order.
    pub fn samples(&self) -> Vec<SeqSample> {
        let mut samples = Vec::new();
        for rr in self.all() {
            if !rr.is_answered() || !accessor::is_tcp(rr.response()) {
                continue;
            }
            let sent = match rr.sent {
                Some(s) => s,
                None => continue,
            };
            let response = rr.response();
            samples.push(SeqSample {
                isn: accessor::tcp_seq(response),
                tsval: accessor::tcp_tsval(response),
                ip_id: accessor::ip_id(response),
                sent,
            });
        }
        samples
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IERR {
    pub ie1: RequestResponse,
    pub ie2: RequestResponse,
}

impl IERR {
    pub fn empty() -> IERR {
        IERR {
            ie1: RequestResponse::unsent(ProbeKind::Ie(1)),
            ie2: RequestResponse::unsent(ProbeKind::Ie(2)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ECNRR {
    pub ecn: RequestResponse,
}

impl ECNRR {
    pub fn empty() -> ECNRR {
        ECNRR {
            ecn: RequestResponse::unsent(ProbeKind::Ecn),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TXRR {
    pub t2: RequestResponse,
    pub t3: RequestResponse,
    pub t4: RequestResponse,
    pub t5: RequestResponse,
    pub t6: RequestResponse,
    pub t7: RequestResponse,
}

impl TXRR {
    pub fn empty() -> TXRR {
        TXRR {
            t2: RequestResponse::unsent(ProbeKind::T(2)),
            t3: RequestResponse::unsent(ProbeKind::T(3)),
            t4: RequestResponse::unsent(ProbeKind::T(4)),
            t5: RequestResponse::unsent(ProbeKind::T(5)),
            t6: RequestResponse::unsent(ProbeKind::T(6)),
            t7: RequestResponse::unsent(ProbeKind::T(7)),
        }
    }
    /// T5, T6 and T7 all go to the closed port.
    pub fn closed(&self) -> [&RequestResponse; 3] {
        [&self.t5, &self.t6, &self.t7]
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct U1RR {
    pub u1: RequestResponse,
}

impl U1RR {
    pub fn empty() -> U1RR {
        U1RR {
            u1: RequestResponse::unsent(ProbeKind::U1),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllPacketRR {
    pub seq: SEQRR,
    pub ie: IERR,
    pub ecn: ECNRR,
    pub tx: TXRR,
    pub u1: U1RR,
}

impl AllPacketRR {
    pub fn empty() -> AllPacketRR {
        AllPacketRR {
            seq: SEQRR::empty(),
            ie: IERR::empty(),
            ecn: ECNRR::empty(),
            tx: TXRR::empty(),
            u1: U1RR::empty(),
        }
    }
    /// Stores `rr` in the slot of its probe.
    pub fn insert(&mut self, rr: RequestResponse) {
        let slot = match rr.kind {
            ProbeKind::Seq(1) => &mut self.seq.seq1,
            ProbeKind::Seq(2) => &mut self.seq.seq2,
            ProbeKind::Seq(3) => &mut self.seq.seq3,
            ProbeKind::Seq(4) => &mut self.seq.seq4,
            ProbeKind::Seq(5) => &mut self.seq.seq5,
            ProbeKind::Seq(6) => &mut self.seq.seq6,
            ProbeKind::Ie(1) => &mut self.ie.ie1,
            ProbeKind::Ie(2) => &mut self.ie.ie2,
            ProbeKind::Ecn => &mut self.ecn.ecn,
            ProbeKind::T(2) => &mut self.tx.t2,
            ProbeKind::T(3) => &mut self.tx.t3,
            ProbeKind::T(4) => &mut self.tx.t4,
            ProbeKind::T(5) => &mut self.tx.t5,
            ProbeKind::T(6) => &mut self.tx.t6,
            ProbeKind::T(7) => &mut self.tx.t7,
            ProbeKind::U1 => &mut self.u1.u1,
            _ => return,
        };
        *slot = rr;
    }
}
