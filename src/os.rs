/* Remote OS Detection */
use prettytable::Cell;
use prettytable::Row;
use prettytable::Table;
use prettytable::row;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;
use tracing::debug;
use tracing::info;

use crate::error::OsFingerError;
use crate::layer::Layer3Transport;
use crate::layer::Transport;
use crate::os::dbparser::GroupScore;
use crate::os::dbparser::NmapOsDb;
use crate::os::dbparser::ReferenceEntry;
use crate::os::dbparser::load_nmap_os_db;
use crate::os::osscan::Fingerprint;
use crate::os::osscan::get_scan_line;
use crate::os::osscan::send_all_probes;
use crate::os::packet::ProbeContext;
use crate::scan::find_open_closed_ports;
use crate::utils::find_source_addr;
use crate::utils::get_default_timeout;

pub mod accessor;
pub mod dbparser;
pub mod operator;
pub mod osscan;
pub mod packet;
pub mod rr;
#[cfg(test)]
mod testutil;

const DEFAULT_DB_PATH: &str = "nmap-os-db";
const DEFAULT_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsInfo {
    pub name: String,
    pub cpe: Option<String>,
    pub score: u32,
    pub total: u32,
}

impl OsInfo {
    fn scored(entry: &ReferenceEntry, fingerprint: &Fingerprint) -> OsInfo {
        let GroupScore { score, total } = NmapOsDb::from_entry(entry).score(fingerprint);
        OsInfo {
            name: entry.name.clone(),
            cpe: entry.cpe.clone(),
            score,
            total,
        }
    }
}

/// The highest scoring entry. On equal scores the earlier entry wins.
pub fn best_match(fingerprint: &Fingerprint, entries: &[ReferenceEntry]) -> Option<OsInfo> {
    let mut best: Option<OsInfo> = None;
    for entry in entries {
        let osinfo = OsInfo::scored(entry, fingerprint);
        let better = match &best {
            Some(b) => osinfo.score > b.score,
            None => true,
        };
        if better {
            best = Some(osinfo);
        }
    }
    best
}

/// The `k` highest scoring entries, equal scores kept in database order.
pub fn top_k_matches(
    fingerprint: &Fingerprint,
    entries: &[ReferenceEntry],
    k: usize,
) -> Vec<OsInfo> {
    let mut sort_vec: Vec<OsInfo> = entries
        .iter()
        .map(|entry| OsInfo::scored(entry, fingerprint))
        .collect();
    sort_vec.sort_by(|a, b| b.score.cmp(&a.score));
    sort_vec.truncate(k);
    sort_vec
}

#[derive(Debug, Clone)]
pub struct OsDetectConfig {
    pub db_path: String,
    /// Detected from the routing table when `None`.
    pub src_ipv4: Option<Ipv4Addr>,
    /// Both ports given skips port discovery.
    pub open_port: Option<u16>,
    pub closed_port: Option<u16>,
    /// Wait for each probe reply.
    pub timeout: Duration,
    /// Bound of the whole probe phase.
    pub deadline: Duration,
    pub threads: usize,
    pub top_k: usize,
}

impl Default for OsDetectConfig {
    fn default() -> OsDetectConfig {
        OsDetectConfig {
            db_path: String::from(DEFAULT_DB_PATH),
            src_ipv4: None,
            open_port: None,
            closed_port: None,
            timeout: get_default_timeout(),
            deadline: DEFAULT_DEADLINE,
            threads: 0,
            top_k: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OsDetectResult {
    pub target: Ipv4Addr,
    pub fingerprint: Fingerprint,
    pub matches: Vec<OsInfo>,
}

impl OsDetectResult {
    /// Name of the best match.
    pub fn best(&self) -> Option<&OsInfo> {
        self.matches.first()
    }
}

impl fmt::Display for OsDetectResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut table = Table::new();
        table.add_row(Row::new(vec![
            Cell::new("OS Detect Results")
                .style_spec("c")
                .with_hspan(5),
        ]));
        for (i, osinfo) in self.matches.iter().enumerate() {
            let number_str = format!("#{}", i + 1);
            let score_str = format!("{}/{}", osinfo.score, osinfo.total);
            let cpe_str = osinfo.cpe.clone().unwrap_or_default();
            table.add_row(
                row![c -> self.target, c -> number_str, c -> score_str, c -> osinfo.name, c -> cpe_str],
            );
        }
        write!(f, "{}", table)
    }
}

/// Detect the target OS over raw sockets (needs root or CAP_NET_RAW).
pub fn os_detect(
    target: Ipv4Addr,
    config: &OsDetectConfig,
) -> Result<OsDetectResult, OsFingerError> {
    let transport: Arc<dyn Transport> = Arc::new(Layer3Transport::new()?);
    os_detect_with(target, config, transport)
}

/// `os_detect` over any transport.
pub fn os_detect_with(
    target: Ipv4Addr,
    config: &OsDetectConfig,
    transport: Arc<dyn Transport>,
) -> Result<OsDetectResult, OsFingerError> {
    let entries = load_nmap_os_db(&config.db_path)?;
    debug!("nmap os db parse finish, {} entries", entries.len());

    let (open_port, closed_port) = match (config.open_port, config.closed_port) {
        (Some(open), Some(closed)) => (open, closed),
        (open, closed) => {
            let (found_open, found_closed) =
                find_open_closed_ports(target, config.threads, config.timeout)?;
            (open.unwrap_or(found_open), closed.unwrap_or(found_closed))
        }
    };
    info!(
        "target {} open port {} closed port {}",
        target, open_port, closed_port
    );

    let src_ipv4 = find_source_addr(config.src_ipv4, target)?;
    let ctx = ProbeContext::new(src_ipv4, target, open_port, closed_port);
    let deadline = Instant::now() + config.deadline;
    let ap = send_all_probes(transport, &ctx, config.timeout, deadline, config.threads)?;

    let scan = get_scan_line(target, open_port, closed_port);
    let fingerprint = Fingerprint::from_responses(&ap, scan);
    let matches = top_k_matches(&fingerprint, &entries, config.top_k);
    if let Some(best) = matches.first() {
        info!(
            "best match for {}: {} ({}/{})",
            target, best.name, best.score, best.total
        );
    }
    Ok(OsDetectResult {
        target,
        fingerprint,
        matches,
    })
}
