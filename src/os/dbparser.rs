use regex::Regex;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use tracing::debug;
use tracing::warn;

use crate::error::OsFingerError;
use crate::os::osscan::Fingerprint;
use crate::os::osscan::ObservedGroup;

/// Entries before the first fingerprint: file header and the MatchPoints block.
const SKIP_ENTRIES: usize = 2;

const SEQ_WEIGHTS: &[(&str, u32)] = &[
    ("SP", 25),
    ("GCD", 75),
    ("ISR", 25),
    ("TI", 100),
    ("CI", 50),
    ("II", 100),
    ("SS", 80),
    ("TS", 100),
];
const OPS_WEIGHTS: &[(&str, u32)] = &[
    ("O1", 20),
    ("O2", 20),
    ("O3", 20),
    ("O4", 20),
    ("O5", 20),
    ("O6", 20),
];
const WIN_WEIGHTS: &[(&str, u32)] = &[
    ("W1", 15),
    ("W2", 15),
    ("W3", 15),
    ("W4", 15),
    ("W5", 15),
    ("W6", 15),
];
const ECN_WEIGHTS: &[(&str, u32)] = &[
    ("R", 100),
    ("DF", 20),
    ("T", 15),
    ("TG", 15),
    ("W", 15),
    ("O", 15),
    ("CC", 100),
    ("Q", 20),
];
const TX_WEIGHTS: &[(&str, u32)] = &[
    ("R", 100),
    ("DF", 20),
    ("T", 15),
    ("TG", 15),
    ("W", 25),
    ("S", 20),
    ("A", 20),
    ("F", 30),
    ("O", 10),
    ("RD", 20),
    ("Q", 20),
];
const U1_WEIGHTS: &[(&str, u32)] = &[
    ("R", 50),
    ("DF", 50),
    ("T", 50),
    ("TG", 50),
    ("IPL", 100),
    ("UN", 100),
    ("RIPL", 100),
    ("RID", 100),
    ("RIPCK", 100),
    ("RUCK", 100),
    ("RUD", 100),
];
const IE_WEIGHTS: &[(&str, u32)] = &[
    ("R", 50),
    ("DFI", 50),
    ("T", 50),
    ("TG", 50),
    ("CD", 100),
];

/// One fingerprint record of the database, still as raw strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub name: String,
    pub cpe: Option<String>,
    /// Group name (SEQ, OPS, T1...) to field name to raw value.
    pub groups: HashMap<String, HashMap<String, String>>,
}

/// One `|` separated alternative of a database value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DbAlternative {
    Range(u32, u32),
    Greater(u32),
    Less(u32),
    Single(u32, String),
    Text(String),
}

impl DbAlternative {
    fn parse(input: &str) -> DbAlternative {
        let hex = |s: &str| u32::from_str_radix(s, 16).ok();
        if let Some((lo, hi)) = input.split_once('-') {
            if let (Some(lo), Some(hi)) = (hex(lo), hex(hi)) {
                return DbAlternative::Range(lo, hi);
            }
        }
        if let Some(v) = input.strip_prefix('>').and_then(hex) {
            return DbAlternative::Greater(v);
        }
        if let Some(v) = input.strip_prefix('<').and_then(hex) {
            return DbAlternative::Less(v);
        }
        match hex(input) {
            Some(v) => DbAlternative::Single(v, input.to_string()),
            None => DbAlternative::Text(input.to_string()),
        }
    }
}

/// A database value: any of its alternatives may match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbValue {
    pub alternatives: Vec<DbAlternative>,
}

/// Rewrites the numbers after M (mss) and W (window scale) as plain uppercase hex.
fn normalize_options(o: &str, wscale_radix: u32) -> String {
    let chars: Vec<char> = o.chars().collect();
    let mut out = String::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        i += 1;
        let radix = match c {
            'M' => 16,
            'W' => wscale_radix,
            _ => continue,
        };
        let start = i;
        while i < chars.len() && chars[i].is_digit(radix) {
            i += 1;
        }
        let digits: String = chars[start..i].iter().collect();
        match u32::from_str_radix(&digits, radix) {
            Ok(v) => out += &format!("{:X}", v),
            Err(_) => out += &digits,
        }
    }
    out
}

fn is_options_field(field: &str) -> bool {
    field == "O" || (field.len() == 2 && field.starts_with('O'))
}

fn sorted_chars(input: &str) -> String {
    let mut chars: Vec<char> = input.chars().collect();
    chars.sort_unstable();
    chars.into_iter().collect()
}

impl DbValue {
    /// Never fails, anything unparsable is kept as text.
    pub fn parse(raw: &str) -> DbValue {
        let alternatives = raw.split('|').map(DbAlternative::parse).collect();
        DbValue { alternatives }
    }
    /// Whether the rendered observed value of test `field` is admitted.
    pub fn matches(&self, field: &str, observed: &str) -> bool {
        if is_options_field(field) {
            // observed window scales are decimal, the database writes hex
            let observed = normalize_options(observed, 10);
            return self.alternatives.iter().any(|alt| match alt {
                DbAlternative::Text(t) | DbAlternative::Single(_, t) => {
                    normalize_options(t, 16) == observed
                }
                _ => false,
            });
        }
        if field == "F" {
            // flags compare as a set
            let observed = sorted_chars(observed);
            return self.alternatives.iter().any(|alt| match alt {
                DbAlternative::Text(t) | DbAlternative::Single(_, t) => sorted_chars(t) == observed,
                _ => false,
            });
        }
        let number = u32::from_str_radix(observed, 16).ok();
        self.alternatives.iter().any(|alt| match (alt, number) {
            (DbAlternative::Range(lo, hi), Some(n)) => *lo <= n && n <= *hi,
            (DbAlternative::Greater(v), Some(n)) => n > *v,
            (DbAlternative::Less(v), Some(n)) => n < *v,
            (DbAlternative::Single(v, raw), n) => Some(*v) == n || raw == observed,
            (DbAlternative::Text(t), _) => t == observed,
            _ => false,
        })
    }
}

/// Points won and points at stake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupScore {
    pub score: u32,
    pub total: u32,
}

impl GroupScore {
    fn add(&mut self, other: GroupScore) {
        self.score += other.score;
        self.total += other.total;
    }
}

/// One test group of a database fingerprint.
pub trait ReferenceGroup {
    /// Test names with their points.
    const WEIGHTS: &'static [(&'static str, u32)];
    fn from_db(fields: &HashMap<String, String>) -> Self
    where
        Self: Sized;
    fn field(&self, name: &str) -> Option<&DbValue>;
}

/// Weighted similarity of one group. Only tests present on both sides count
/// toward the total, and an unresponsive observed group scores 0 of 0.
pub fn score_group<R: ReferenceGroup>(observed: &impl ObservedGroup, reference: &R) -> GroupScore {
    let mut ret = GroupScore::default();
    if !observed.responsive() {
        return ret;
    }
    let tests: HashMap<&str, Option<String>> = observed.tests().into_iter().collect();
    for (name, weight) in R::WEIGHTS {
        let value = match tests.get(name) {
            Some(Some(v)) => v,
            _ => continue,
        };
        let db_value = match reference.field(name) {
            Some(d) => d,
            None => continue,
        };
        ret.total += weight;
        if db_value.matches(name, value) {
            ret.score += weight;
        }
    }
    ret
}

fn db_field(fields: &HashMap<String, String>, key: &str) -> Option<DbValue> {
    fields.get(key).map(|v| DbValue::parse(v))
}

/// R is assumed Y when the line does not carry it.
fn db_r(fields: &HashMap<String, String>) -> DbValue {
    match fields.get("R") {
        Some(r) => DbValue::parse(r),
        None => DbValue::parse("Y"),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SEQDB {
    pub sp: Option<DbValue>,
    pub gcd: Option<DbValue>,
    pub isr: Option<DbValue>,
    pub ti: Option<DbValue>,
    pub ci: Option<DbValue>,
    pub ii: Option<DbValue>,
    pub ss: Option<DbValue>,
    pub ts: Option<DbValue>,
}

impl ReferenceGroup for SEQDB {
    const WEIGHTS: &'static [(&'static str, u32)] = SEQ_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> SEQDB {
        SEQDB {
            sp: db_field(fields, "SP"),
            gcd: db_field(fields, "GCD"),
            isr: db_field(fields, "ISR"),
            ti: db_field(fields, "TI"),
            ci: db_field(fields, "CI"),
            ii: db_field(fields, "II"),
            ss: db_field(fields, "SS"),
            ts: db_field(fields, "TS"),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        match name {
            "SP" => self.sp.as_ref(),
            "GCD" => self.gcd.as_ref(),
            "ISR" => self.isr.as_ref(),
            "TI" => self.ti.as_ref(),
            "CI" => self.ci.as_ref(),
            "II" => self.ii.as_ref(),
            "SS" => self.ss.as_ref(),
            "TS" => self.ts.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OPSDB {
    pub o: [Option<DbValue>; 6],
}

impl ReferenceGroup for OPSDB {
    const WEIGHTS: &'static [(&'static str, u32)] = OPS_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> OPSDB {
        OPSDB {
            o: ["O1", "O2", "O3", "O4", "O5", "O6"].map(|k| db_field(fields, k)),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        let i = match name {
            "O1" => 0,
            "O2" => 1,
            "O3" => 2,
            "O4" => 3,
            "O5" => 4,
            "O6" => 5,
            _ => return None,
        };
        self.o[i].as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WINDB {
    pub w: [Option<DbValue>; 6],
}

impl ReferenceGroup for WINDB {
    const WEIGHTS: &'static [(&'static str, u32)] = WIN_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> WINDB {
        WINDB {
            w: ["W1", "W2", "W3", "W4", "W5", "W6"].map(|k| db_field(fields, k)),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        let i = match name {
            "W1" => 0,
            "W2" => 1,
            "W3" => 2,
            "W4" => 3,
            "W5" => 4,
            "W6" => 5,
            _ => return None,
        };
        self.w[i].as_ref()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ECNDB {
    pub r: DbValue,
    pub df: Option<DbValue>,
    pub t: Option<DbValue>,
    pub tg: Option<DbValue>,
    pub w: Option<DbValue>,
    pub o: Option<DbValue>,
    pub cc: Option<DbValue>,
    pub q: Option<DbValue>,
}

impl ReferenceGroup for ECNDB {
    const WEIGHTS: &'static [(&'static str, u32)] = ECN_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> ECNDB {
        ECNDB {
            r: db_r(fields),
            df: db_field(fields, "DF"),
            t: db_field(fields, "T"),
            tg: db_field(fields, "TG"),
            w: db_field(fields, "W"),
            o: db_field(fields, "O"),
            cc: db_field(fields, "CC"),
            q: db_field(fields, "Q"),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        match name {
            "R" => Some(&self.r),
            "DF" => self.df.as_ref(),
            "T" => self.t.as_ref(),
            "TG" => self.tg.as_ref(),
            "W" => self.w.as_ref(),
            "O" => self.o.as_ref(),
            "CC" => self.cc.as_ref(),
            "Q" => self.q.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TXDB {
    pub r: DbValue,
    pub df: Option<DbValue>,
    pub t: Option<DbValue>,
    pub tg: Option<DbValue>,
    pub w: Option<DbValue>,
    pub s: Option<DbValue>,
    pub a: Option<DbValue>,
    pub f: Option<DbValue>,
    pub o: Option<DbValue>,
    pub rd: Option<DbValue>,
    pub q: Option<DbValue>,
}

impl ReferenceGroup for TXDB {
    const WEIGHTS: &'static [(&'static str, u32)] = TX_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> TXDB {
        TXDB {
            r: db_r(fields),
            df: db_field(fields, "DF"),
            t: db_field(fields, "T"),
            tg: db_field(fields, "TG"),
            w: db_field(fields, "W"),
            s: db_field(fields, "S"),
            a: db_field(fields, "A"),
            f: db_field(fields, "F"),
            o: db_field(fields, "O"),
            rd: db_field(fields, "RD"),
            q: db_field(fields, "Q"),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        match name {
            "R" => Some(&self.r),
            "DF" => self.df.as_ref(),
            "T" => self.t.as_ref(),
            "TG" => self.tg.as_ref(),
            "W" => self.w.as_ref(),
            "S" => self.s.as_ref(),
            "A" => self.a.as_ref(),
            "F" => self.f.as_ref(),
            "O" => self.o.as_ref(),
            "RD" => self.rd.as_ref(),
            "Q" => self.q.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct U1DB {
    pub r: DbValue,
    pub df: Option<DbValue>,
    pub t: Option<DbValue>,
    pub tg: Option<DbValue>,
    pub ipl: Option<DbValue>,
    pub un: Option<DbValue>,
    pub ripl: Option<DbValue>,
    pub rid: Option<DbValue>,
    pub ripck: Option<DbValue>,
    pub ruck: Option<DbValue>,
    pub rud: Option<DbValue>,
}

impl ReferenceGroup for U1DB {
    const WEIGHTS: &'static [(&'static str, u32)] = U1_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> U1DB {
        U1DB {
            r: db_r(fields),
            df: db_field(fields, "DF"),
            t: db_field(fields, "T"),
            tg: db_field(fields, "TG"),
            ipl: db_field(fields, "IPL"),
            un: db_field(fields, "UN"),
            ripl: db_field(fields, "RIPL"),
            rid: db_field(fields, "RID"),
            ripck: db_field(fields, "RIPCK"),
            ruck: db_field(fields, "RUCK"),
            rud: db_field(fields, "RUD"),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        match name {
            "R" => Some(&self.r),
            "DF" => self.df.as_ref(),
            "T" => self.t.as_ref(),
            "TG" => self.tg.as_ref(),
            "IPL" => self.ipl.as_ref(),
            "UN" => self.un.as_ref(),
            "RIPL" => self.ripl.as_ref(),
            "RID" => self.rid.as_ref(),
            "RIPCK" => self.ripck.as_ref(),
            "RUCK" => self.ruck.as_ref(),
            "RUD" => self.rud.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IEDB {
    pub r: DbValue,
    pub dfi: Option<DbValue>,
    pub t: Option<DbValue>,
    pub tg: Option<DbValue>,
    pub cd: Option<DbValue>,
}

impl ReferenceGroup for IEDB {
    const WEIGHTS: &'static [(&'static str, u32)] = IE_WEIGHTS;
    fn from_db(fields: &HashMap<String, String>) -> IEDB {
        IEDB {
            r: db_r(fields),
            dfi: db_field(fields, "DFI"),
            t: db_field(fields, "T"),
            tg: db_field(fields, "TG"),
            cd: db_field(fields, "CD"),
        }
    }
    fn field(&self, name: &str) -> Option<&DbValue> {
        match name {
            "R" => Some(&self.r),
            "DFI" => self.dfi.as_ref(),
            "T" => self.t.as_ref(),
            "TG" => self.tg.as_ref(),
            "CD" => self.cd.as_ref(),
            _ => None,
        }
    }
}

/// A typed database fingerprint. Groups missing from the record are `None` and never scored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NmapOsDb {
    pub name: String,
    pub cpe: Option<String>,
    pub seq: Option<SEQDB>,
    pub ops: Option<OPSDB>,
    pub win: Option<WINDB>,
    pub ecn: Option<ECNDB>,
    /// T1 to T7.
    pub tx: [Option<TXDB>; 7],
    pub u1: Option<U1DB>,
    pub ie: Option<IEDB>,
}

fn group<R: ReferenceGroup>(entry: &ReferenceEntry, name: &str) -> Option<R> {
    entry.groups.get(name).map(|fields| R::from_db(fields))
}

fn score_opt<R: ReferenceGroup>(observed: &impl ObservedGroup, reference: &Option<R>) -> GroupScore {
    match reference {
        Some(r) => score_group(observed, r),
        None => GroupScore::default(),
    }
}

impl NmapOsDb {
    pub fn from_entry(entry: &ReferenceEntry) -> NmapOsDb {
        NmapOsDb {
            name: entry.name.clone(),
            cpe: entry.cpe.clone(),
            seq: group(entry, "SEQ"),
            ops: group(entry, "OPS"),
            win: group(entry, "WIN"),
            ecn: group(entry, "ECN"),
            tx: ["T1", "T2", "T3", "T4", "T5", "T6", "T7"].map(|t| group(entry, t)),
            u1: group(entry, "U1"),
            ie: group(entry, "IE"),
        }
    }
    /// Sum of every group score, T1 excluded.
    pub fn score(&self, fingerprint: &Fingerprint) -> GroupScore {
        let mut ret = GroupScore::default();
        ret.add(score_opt(&fingerprint.seqx, &self.seq));
        ret.add(score_opt(&fingerprint.opsx, &self.ops));
        ret.add(score_opt(&fingerprint.winx, &self.win));
        ret.add(score_opt(&fingerprint.ecnx, &self.ecn));
        for (observed, reference) in fingerprint.tx().iter().zip(self.tx.iter()).skip(1) {
            ret.add(score_opt(*observed, reference));
        }
        ret.add(score_opt(&fingerprint.u1x, &self.u1));
        ret.add(score_opt(&fingerprint.iex, &self.ie));
        ret
    }
}

fn parse_entry(
    lines: &[&str],
    kv_reg: &Regex,
    group_reg: &Regex,
) -> Option<ReferenceEntry> {
    let mut entry = ReferenceEntry::default();
    let mut has_name = false;
    for line in lines {
        let line = line.trim();
        if line.starts_with("#") || line.starts_with("Class") || line.len() == 0 {
            continue;
        }
        if let Some(caps) = kv_reg.captures(line) {
            let value = caps.name("value").map_or("", |m| m.as_str()).to_string();
            match caps.name("key").map_or("", |m| m.as_str()) {
                "Fingerprint" => {
                    entry.name = value;
                    has_name = true;
                }
                _ => {
                    // the first CPE is the most specific one
                    if entry.cpe.is_none() {
                        entry.cpe = Some(value);
                    }
                }
            }
        } else if let Some(caps) = group_reg.captures(line) {
            let key = caps.name("key").map_or("", |m| m.as_str()).to_string();
            let body = caps.name("body").map_or("", |m| m.as_str());
            let mut fields = HashMap::new();
            for field in body.split('%').filter(|f| f.len() > 0) {
                match field.split_once('=') {
                    Some((k, v)) => {
                        fields.insert(k.to_string(), v.to_string());
                    }
                    None => warn!("field without value [{}] in {}", field, line),
                }
            }
            entry.groups.insert(key, fields);
        } else {
            let e = OsFingerError::OSDBParseError {
                name: entry.name.clone(),
                line: line.to_string(),
            };
            warn!("{}, line skipped", e);
        }
    }
    if has_name {
        Some(entry)
    } else {
        warn!("entry without Fingerprint line skipped: {:?}", lines.first());
        None
    }
}

/// Splits the database text into entries at blank lines and parses each of them.
/// Bad lines and entries without a name are skipped with a warning.
pub fn nmap_os_db_parser(content: &str) -> Result<Vec<ReferenceEntry>, OsFingerError> {
    let kv_reg = Regex::new(r"^(?P<key>Fingerprint|CPE) (?P<value>.+)$")?;
    let group_reg = Regex::new(r"^(?P<key>[A-Z][A-Z0-9]*)\((?P<body>.*)\)$")?;

    let mut blocks: Vec<Vec<&str>> = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if line.trim().len() == 0 {
            if current.len() > 0 {
                blocks.push(current);
                current = Vec::new();
            }
        } else {
            current.push(line);
        }
    }
    if current.len() > 0 {
        blocks.push(current);
    }

    let mut ret = Vec::new();
    for block in blocks.iter().skip(SKIP_ENTRIES) {
        if let Some(entry) = parse_entry(block, &kv_reg, &group_reg) {
            ret.push(entry);
        }
    }
    debug!("parsed {} os db entries", ret.len());
    Ok(ret)
}

pub fn load_nmap_os_db(path: &str) -> Result<Vec<ReferenceEntry>, OsFingerError> {
    let content = fs::read_to_string(path)?;
    let entries = nmap_os_db_parser(&content)?;
    if entries.len() == 0 {
        return Err(OsFingerError::OSDBEmpty {
            path: path.to_string(),
        });
    }
    Ok(entries)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::os::osscan::ECNX;
    use crate::os::osscan::TXX;
    use crate::os::operator::TestValue;

    pub const DB_TEXT: &str = "# nmap-os-db header
# more header

# This first element provides the number of points
MatchPoints
SEQ(SP=25%GCD=75%ISR=25%TI=100%CI=50%II=100%SS=80%TS=100)

# Linux 4.15
Fingerprint Linux 4.15 - 5.8
Class Linux | Linux | 4.X | general purpose
CPE cpe:/o:linux:linux_kernel:4 auto
CPE cpe:/o:linux:linux_kernel:5 auto
SEQ(SP=FA-104%GCD=1-6%ISR=108-112%TI=Z%CI=Z%II=I%TS=A)
OPS(O1=M5B4ST11NW7%O2=M5B4ST11NW7%O3=M5B4NNT11NW7%O4=M5B4ST11NW7%O5=M5B4ST11NW7%O6=M5B4ST11)
WIN(W1=FE88%W2=FE88%W3=FE88%W4=FE88%W5=FE88%W6=FE88)
ECN(R=Y%DF=Y%T=3B-45%TG=40%W=FAF0%O=M5B4NNSNW7%CC=Y%Q=)
T1(R=Y%DF=Y%T=3B-45%TG=40%S=O%A=S+%F=AS%RD=0%Q=)
T2(R=N)
U1(DF=N%T=3B-45%TG=40%IPL=164%UN=0%RIPL=G%RID=G%RIPCK=G%RUCK=G%RUD=G)
IE(R=Y%DFI=N%T=3B-45%TG=40%CD=S)

Fingerprint Broken printer
this line is garbage
T5(R=Y%DF=N%T=7B-85%TG=80%W=0%S=Z%A=S+%F=AR%O=%RD=0%Q=)

Class no name here
T2(R=N)
";

    #[test]
    fn test_parser() {
        let entries = nmap_os_db_parser(DB_TEXT).unwrap();
        assert_eq!(entries.len(), 2);
        let linux = &entries[0];
        assert_eq!(linux.name, "Linux 4.15 - 5.8");
        assert_eq!(
            linux.cpe.as_deref(),
            Some("cpe:/o:linux:linux_kernel:4 auto")
        );
        assert_eq!(linux.groups["SEQ"]["TS"], "A");
        assert_eq!(linux.groups["ECN"]["Q"], "");
        assert_eq!(linux.groups.len(), 8);
        let printer = &entries[1];
        assert_eq!(printer.name, "Broken printer");
        assert_eq!(printer.cpe, None);
        assert_eq!(printer.groups.len(), 1);
    }

    #[test]
    fn test_value_grammar() {
        let v = DbValue::parse("7B-85");
        assert_eq!(v.alternatives, vec![DbAlternative::Range(0x7B, 0x85)]);
        assert!(v.matches("T", "7B"));
        assert!(v.matches("T", "80"));
        assert!(!v.matches("T", "86"));

        let v = DbValue::parse("0|>FFFF|<10|Z");
        assert_eq!(
            v.alternatives,
            vec![
                DbAlternative::Single(0, String::from("0")),
                DbAlternative::Greater(0xFFFF),
                DbAlternative::Less(0x10),
                DbAlternative::Text(String::from("Z")),
            ]
        );
        assert!(v.matches("SP", "0"));
        assert!(v.matches("SP", "10000"));
        assert!(v.matches("SP", "F"));
        assert!(v.matches("SP", "Z"));
        assert!(!v.matches("SP", "20"));

        let v = DbValue::parse("");
        assert!(v.matches("Q", ""));
        assert!(!v.matches("Q", "R"));
    }

    #[test]
    fn test_options_and_flags() {
        let v = DbValue::parse("M5B4ST11NW7|M5B4NWA");
        assert!(v.matches("O1", "M05B4ST11NW7"));
        // window scale 10 is W10 on our side and WA in the database
        assert!(v.matches("O", "M05B4NW10"));
        assert!(!v.matches("O", "M05B4ST11NW8"));
        let v = DbValue::parse("AS|R");
        assert!(v.matches("F", "AS"));
        assert!(v.matches("F", "SA"));
        assert!(!v.matches("F", "AR"));
    }

    #[test]
    fn test_score_unresponsive_is_zero() {
        let entries = nmap_os_db_parser(DB_TEXT).unwrap();
        let db = NmapOsDb::from_entry(&entries[0]);
        let ecnx = ECNX::from_response(&crate::os::rr::ECNRR::empty().ecn);
        assert_eq!(ecnx.r, "N");
        let ecndb = db.ecn.as_ref().unwrap();
        assert_eq!(score_group(&ecnx, ecndb), GroupScore { score: 0, total: 0 });
    }

    #[test]
    fn test_score_group() {
        let mut fields = HashMap::new();
        fields.insert(String::from("R"), String::from("Y"));
        fields.insert(String::from("DF"), String::from("N"));
        fields.insert(String::from("T"), String::from("7B-85"));
        fields.insert(String::from("W"), String::from("0"));
        fields.insert(String::from("F"), String::from("AR"));
        let txdb = TXDB::from_db(&fields);
        let txx = TXX {
            name: String::from("T5"),
            r: String::from("Y"),
            df: TestValue::Present(String::from("Y")),
            t: TestValue::Present(0x80),
            tg: TestValue::Present(0x80),
            w: TestValue::Present(0),
            s: TestValue::Present(String::from("Z")),
            a: TestValue::Present(String::from("S+")),
            f: TestValue::Present(String::from("AR")),
            o: TestValue::Unsupported,
            rd: TestValue::Present(0),
            q: TestValue::Present(String::new()),
        };
        // R 100 + T 15 + W 25 + F 30 won, DF 20 lost, the rest not in the database
        assert_eq!(
            score_group(&txx, &txdb),
            GroupScore {
                score: 170,
                total: 190
            }
        );
        // absent R means Y
        let txdb = TXDB::from_db(&HashMap::new());
        assert_eq!(
            score_group(&txx, &txdb),
            GroupScore {
                score: 100,
                total: 100
            }
        );
    }
}
