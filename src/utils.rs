use rand::RngExt;
use std::net::Ipv4Addr;
use std::net::UdpSocket;
use std::time::Duration;
use threadpool::ThreadPool;
use tracing::debug;

use crate::DEFAULT_TIMEOUT;
use crate::error::OsFingerError;

/// Upper bound of the randomized sequence and acknowledgment numbers.
pub const RANDOM_SEQ_MAX: u32 = 5000;

pub fn get_cpu_num() -> usize {
    num_cpus::get()
}

/// Returns a pool with `threads_num` workers, or one worker per cpu when it is zero.
pub fn get_threads_pool(threads_num: usize) -> ThreadPool {
    let threads_num = if threads_num == 0 {
        get_cpu_num()
    } else {
        threads_num
    };
    debug!("threads pool size: {}", threads_num);
    ThreadPool::new(threads_num)
}

pub fn get_default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT)
}

/// Source port for a probe, kept out of the well-known range.
pub fn random_port() -> u16 {
    let mut rng = rand::rng();
    rng.random_range(10000..=65000)
}

/// Initial sequence or acknowledgment number for a tcp probe.
pub fn random_seq() -> u32 {
    let mut rng = rand::rng();
    rng.random_range(0..=RANDOM_SEQ_MAX)
}

pub fn random_u16() -> u16 {
    let mut rng = rand::rng();
    rng.random()
}

/// Asks the kernel which local address routes to `dst_ipv4`. No packet is sent.
pub fn find_source_addr(
    src_ipv4: Option<Ipv4Addr>,
    dst_ipv4: Ipv4Addr,
) -> Result<Ipv4Addr, OsFingerError> {
    if let Some(src_ipv4) = src_ipv4 {
        return Ok(src_ipv4);
    }
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((dst_ipv4, 9))?;
    match socket.local_addr()?.ip() {
        std::net::IpAddr::V4(ipv4) if !ipv4.is_unspecified() => {
            debug!("found source ipv4: {}", ipv4);
            Ok(ipv4)
        }
        _ => Err(OsFingerError::CanNotFoundSourceAddress),
    }
}

/// Wrap-aware distance between two 32-bit counters.
pub fn wrap_distance_u32(a: u32, b: u32) -> u32 {
    let d = a.wrapping_sub(b);
    d.min(d.wrapping_neg())
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_random_ranges() {
        for _ in 0..1000 {
            assert!(random_seq() <= RANDOM_SEQ_MAX);
            let p = random_port();
            assert!(p >= 10000 && p <= 65000);
        }
    }
    #[test]
    fn test_wrap_distance() {
        assert_eq!(wrap_distance_u32(10, 3), 7);
        assert_eq!(wrap_distance_u32(3, 10), 7);
        assert_eq!(wrap_distance_u32(0xFFFF_FFFF, 1), 2);
        assert_eq!(wrap_distance_u32(1, 0xFFFF_FFFF), 2);
        assert_eq!(wrap_distance_u32(0x8000_0000, 0), 0x8000_0000);
    }
    #[test]
    fn test_pool_size() {
        let pool = get_threads_pool(3);
        assert_eq!(pool.max_count(), 3);
        let pool = get_threads_pool(0);
        assert_eq!(pool.max_count(), get_cpu_num());
    }
}
