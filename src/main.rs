use clap::Parser;
use osfinger::OsDetectConfig;
use osfinger::os_detect;
use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::time::Duration;
use tracing::Level;
use tracing::error;

/// Remote os detection with the nmap probe battery.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Target ipv4 address
    target: Ipv4Addr,

    /// Path of the nmap-os-db file
    #[arg(long, default_value = "nmap-os-db")]
    db: String,

    /// Known open tcp port, skips port discovery together with --closed-port
    #[arg(long)]
    open_port: Option<u16>,

    /// Known closed tcp port
    #[arg(long)]
    closed_port: Option<u16>,

    /// Wait for each probe reply, in milliseconds
    #[arg(long, default_value_t = osfinger::DEFAULT_TIMEOUT)]
    timeout: u64,

    /// Bound of the whole probe phase, in seconds
    #[arg(long, default_value_t = 30)]
    deadline: u64,

    /// Worker threads, 0 means one per cpu
    #[arg(long, default_value_t = 0)]
    threads: usize,

    /// Number of matches printed
    #[arg(long, default_value_t = 1)]
    top_k: usize,

    /// Print the result as json
    #[arg(long)]
    json: bool,

    /// Also print the nmap style fingerprint
    #[arg(long)]
    fingerprint: bool,

    /// Source ipv4 address, found from the routing table when missing
    #[arg(long)]
    source: Option<Ipv4Addr>,

    /// trace, debug, info, warn or error
    #[arg(long, default_value = "info")]
    log_level: Level,
}

fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_writer(std::io::stderr)
        .init();

    let config = OsDetectConfig {
        db_path: args.db,
        src_ipv4: args.source,
        open_port: args.open_port,
        closed_port: args.closed_port,
        timeout: Duration::from_millis(args.timeout),
        deadline: Duration::from_secs(args.deadline),
        threads: args.threads,
        top_k: args.top_k,
    };
    let ret = match os_detect(args.target, &config) {
        Ok(r) => r,
        Err(e) => {
            error!("os detect failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if args.json {
        match serde_json::to_string_pretty(&ret) {
            Ok(s) => println!("{}", s),
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        match ret.best() {
            Some(best) => println!("{}", best.name),
            None => println!("no match"),
        }
        if args.top_k > 1 {
            println!("{}", ret);
        }
    }
    if args.fingerprint {
        println!("{}", ret.fingerprint.nmap_format());
    }
    ExitCode::SUCCESS
}
