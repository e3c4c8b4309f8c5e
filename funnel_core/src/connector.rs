use crate::error::FunnelError;
use std::fmt::Display;
use std::io::{self, Read};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;
use tracing::{debug, info};

/// Bounded retry policy for dialing a peer that may still be starting up.
///
/// Each attempt is preceded by a sleep. The first sleep is `initial`, and the
/// delay is multiplied by `factor` after every failed attempt. Once the next
/// delay would exceed `max_delay` the policy gives up. With the defaults this
/// is ten attempts spread over roughly one second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max_delay: Duration,
    pub factor: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_secs(1),
            factor: 2,
        }
    }
}

impl Backoff {
    /// The sleeps this policy performs before each attempt, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let max_delay = self.max_delay;
        // a factor of 0 or 1 would never reach max_delay
        let factor = self.factor.max(2);
        std::iter::successors(Some(self.initial), move |delay| {
            delay.checked_mul(factor)
        })
        .take_while(move |delay| *delay <= max_delay)
    }

    /// Upper bound on the time spent sleeping before giving up.
    pub fn total_wait(&self) -> Duration {
        self.delays().sum()
    }

    /// Calls `attempt` until it succeeds or the delay budget is spent.
    ///
    /// `peer` only names the target in logs and in the timeout error.
    pub fn retry<T, E, F>(&self, peer: &str, mut attempt: F) -> Result<T, FunnelError>
    where
        E: Display,
        F: FnMut() -> Result<T, E>,
    {
        let mut attempts = 0u32;
        let mut last_error = String::from("no attempt made");
        for delay in self.delays() {
            thread::sleep(delay);
            attempts += 1;
            match attempt() {
                Ok(connection) => {
                    debug!(peer, attempts, "connected");
                    return Ok(connection);
                }
                Err(err) => {
                    debug!(peer, attempts, error = %err, "connect attempt failed");
                    last_error = err.to_string();
                }
            }
        }
        Err(FunnelError::ConnectTimeout {
            peer: peer.to_string(),
            attempts,
            last_error,
        })
    }

    /// Dials `addr` over TCP under this policy.
    pub fn connect_tcp(&self, addr: &str) -> Result<TcpStream, FunnelError> {
        self.retry(addr, || TcpStream::connect(addr))
    }
}

/// Consumes the peer's one-time readiness message by reading until the peer
/// closes the stream. Returns the number of bytes discarded.
pub fn consume_handshake<R: Read>(peer: &str, mut stream: R) -> Result<u64, FunnelError> {
    let discarded = io::copy(&mut stream, &mut io::sink()).map_err(|source| {
        FunnelError::Connectivity {
            peer: peer.to_string(),
            source,
        }
    })?;
    info!(peer, discarded, "peer handshake complete");
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;
    use std::io::{Cursor, Write};
    use std::net::TcpListener;
    use std::time::Instant;

    #[test]
    fn default_schedule_doubles_from_one_millisecond_to_one_second() {
        let delays: Vec<u64> = Backoff::default()
            .delays()
            .map(|d| d.as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512]);
        assert_eq!(Backoff::default().total_wait(), Duration::from_millis(1023));
    }

    #[test]
    fn retry_returns_first_success() {
        let policy = Backoff {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(64),
            factor: 2,
        };
        let mut calls = 0;
        let value = policy
            .retry("flaky", || {
                calls += 1;
                if calls < 3 { Err("not yet") } else { Ok(calls) }
            })
            .unwrap();
        assert_eq!(value, 3);
    }

    #[test]
    fn retry_exhausts_the_schedule_then_times_out() {
        let policy = Backoff {
            initial: Duration::from_millis(1),
            max_delay: Duration::from_millis(8),
            factor: 2,
        };
        let err = policy
            .retry("never", || Err::<(), _>("refused"))
            .unwrap_err();
        match &err {
            FunnelError::ConnectTimeout {
                attempts,
                last_error,
                ..
            } => {
                assert_eq!(*attempts, 4);
                assert_eq!(last_error, "refused");
            }
            other => panic!("expected ConnectTimeout, got {other:?}"),
        }
        assert_eq!(err.kind(), FailureKind::Connectivity);
    }

    #[test]
    fn unreachable_address_fails_within_bounded_time() {
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let start = Instant::now();
        let err = Backoff::default().connect_tcp(&addr).unwrap_err();
        let elapsed = start.elapsed();

        assert!(matches!(err, FunnelError::ConnectTimeout { attempts: 10, .. }));
        assert!(elapsed >= Duration::from_millis(1000), "gave up after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(5), "took {elapsed:?}");
    }

    #[test]
    fn connects_to_a_live_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let server = thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            conn.write_all(b"ready\n").unwrap();
        });

        let stream = Backoff::default().connect_tcp(&addr).unwrap();
        assert_eq!(consume_handshake(&addr, stream).unwrap(), 6);
        server.join().unwrap();
    }

    #[test]
    fn handshake_drains_the_whole_stream() {
        let greeting = Cursor::new(vec![0u8; 4096]);
        assert_eq!(consume_handshake("mem", greeting).unwrap(), 4096);
    }
}
