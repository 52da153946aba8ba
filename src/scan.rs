/* Open and closed port discovery for the probe battery */
use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::sync::mpsc::channel;
use std::time::Duration;
use tracing::debug;
use tracing::error;

use crate::error::OsFingerError;
use crate::utils::get_threads_pool;

const PORTS_PER_CHUNK: usize = 100;

/// Connects to each port in order until one open and one closed port are seen.
/// Refused and timed out connections both count as closed.
fn scan_chunk(addr: Ipv4Addr, ports: &[u16], timeout: Duration) -> (Option<u16>, Option<u16>) {
    let mut open = None;
    let mut closed = None;
    for port in ports {
        let socket_addr = SocketAddr::from((addr, *port));
        match TcpStream::connect_timeout(&socket_addr, timeout) {
            Ok(_) => {
                if open.is_none() {
                    debug!("{} port {} open", addr, port);
                    open = Some(*port);
                }
            }
            Err(_) => {
                if closed.is_none() {
                    closed = Some(*port);
                }
            }
        }
        if open.is_some() && closed.is_some() {
            break;
        }
    }
    (open, closed)
}

/// Scans `ports` in chunks on the pool and returns the lowest open and the lowest closed port seen.
pub fn find_open_closed_ports_in(
    addr: Ipv4Addr,
    ports: &[u16],
    threads: usize,
    timeout: Duration,
) -> Result<(u16, u16), OsFingerError> {
    let pool = get_threads_pool(threads);
    let (tx, rx) = channel();
    for chunk in ports.chunks(PORTS_PER_CHUNK) {
        let tx = tx.clone();
        let chunk = chunk.to_vec();
        pool.execute(move || {
            let ret = scan_chunk(addr, &chunk, timeout);
            match tx.send(ret) {
                Ok(_) => (),
                Err(e) => error!("failed to send chunk result to channel: {}", e),
            }
        });
    }
    drop(tx);

    let mut open: Option<u16> = None;
    let mut closed: Option<u16> = None;
    for (o, c) in rx.into_iter() {
        open = match (open, o) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        closed = match (closed, c) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }
    let open = open.ok_or(OsFingerError::NoOpenPortFound { addr })?;
    let closed = closed.ok_or(OsFingerError::NoClosedPortFound { addr })?;
    Ok((open, closed))
}

/// Full tcp range variant of [`find_open_closed_ports_in`].
pub fn find_open_closed_ports(
    addr: Ipv4Addr,
    threads: usize,
    timeout: Duration,
) -> Result<(u16, u16), OsFingerError> {
    let ports: Vec<u16> = (1..=u16::MAX).collect();
    find_open_closed_ports_in(addr, &ports, threads, timeout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_find_open_closed_localhost() {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let open_port = listener.local_addr().unwrap().port();
        // a port that was just released is closed
        let closed_port = {
            let tmp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            tmp.local_addr().unwrap().port()
        };
        let ports = [closed_port, open_port];
        let (open, closed) =
            find_open_closed_ports_in(Ipv4Addr::LOCALHOST, &ports, 2, Duration::from_millis(500))
                .unwrap();
        assert_eq!(open, open_port);
        assert_eq!(closed, closed_port);
    }

    #[test]
    fn test_no_open_port() {
        let closed_port = {
            let tmp = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
            tmp.local_addr().unwrap().port()
        };
        match find_open_closed_ports_in(
            Ipv4Addr::LOCALHOST,
            &[closed_port],
            1,
            Duration::from_millis(500),
        ) {
            Err(OsFingerError::NoOpenPortFound { addr }) => assert_eq!(addr, Ipv4Addr::LOCALHOST),
            other => panic!("unexpected {:?}", other),
        }
    }
}
