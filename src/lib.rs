#![doc = include_str!("lib.md")]

pub mod error;
pub mod layer;
pub mod os;
pub mod scan;
pub mod utils;

/// Default wait for one probe reply, in milliseconds.
pub const DEFAULT_TIMEOUT: u64 = 1000;

pub use error::OsFingerError;
pub use layer::Layer3Transport;
pub use layer::Transport;
pub use os::OsDetectConfig;
pub use os::OsDetectResult;
pub use os::OsInfo;
pub use os::best_match;
pub use os::dbparser::load_nmap_os_db;
pub use os::dbparser::nmap_os_db_parser;
pub use os::os_detect;
pub use os::os_detect_with;
pub use os::osscan::Fingerprint;
pub use os::top_k_matches;
pub use scan::find_open_closed_ports;
