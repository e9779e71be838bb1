//! Single-process loopback transport.
//!
//! Injection pushes onto a lock-free segment queue; polling pops everything
//! currently queued. The only valid target is rank 0.

use super::{ActiveMessage, Rank, Transport};
use crate::error::{Error, ErrorKind, Result};
use crate::tracing_compat::trace;
use crossbeam_queue::SegQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// In-process transport for a one-rank job.
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    queue: SegQueue<ActiveMessage>,
    /// Queued messages plus reservations about to be pushed.
    pending: AtomicUsize,
    /// Maximum queued messages (0 = unbounded).
    limit: usize,
}

impl LoopbackTransport {
    /// Creates an unbounded loopback transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loopback transport that refuses injection once `limit`
    /// messages are queued.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit,
            ..Self::default()
        }
    }
}

impl Transport for LoopbackTransport {
    fn rank_me(&self) -> Rank {
        0
    }

    fn rank_n(&self) -> Rank {
        1
    }

    fn inject(&self, target: Rank, message: ActiveMessage) -> Result<()> {
        if target != 0 {
            return Err(Error::invalid_rank(target, 1));
        }
        // Limit check and reservation are one atomic step.
        let limit = self.limit;
        let reserved = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (limit == 0 || queued < limit).then_some(queued + 1)
            });
        if reserved.is_err() {
            return Err(Error::new(ErrorKind::InjectionFailed)
                .with_message(format!("loopback queue full ({limit} messages)")));
        }
        self.queue.push(message);
        trace!(target, "loopback inject");
        Ok(())
    }

    fn poll(&self, deliver: &mut dyn FnMut(ActiveMessage)) -> usize {
        let mut delivered = 0;
        while let Some(message) = self.queue.pop() {
            self.pending.fetch_sub(1, Ordering::AcqRel);
            deliver(message);
            delivered += 1;
        }
        delivered
    }

    fn in_flight(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lpc::Lpc;
    use crate::persona::ProgressLevel;
    use std::sync::{Arc, Barrier};
    use std::thread;

    #[test]
    fn inject_then_poll() {
        let transport = LoopbackTransport::new();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let h = Arc::clone(&hits);
            transport
                .inject(
                    0,
                    ActiveMessage::new(ProgressLevel::User, move || {
                        h.fetch_add(1, Ordering::SeqCst);
                    }),
                )
                .unwrap();
        }
        assert_eq!(transport.in_flight(), 3);

        let mut levels = Vec::new();
        let delivered = transport.poll(&mut |msg| {
            levels.push(msg.level());
            msg.into_lpc().execute();
        });
        assert_eq!(delivered, 3);
        assert_eq!(transport.in_flight(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert!(levels.iter().all(|l| *l == ProgressLevel::User));
    }

    #[test]
    fn invalid_rank_drops_message() {
        let transport = LoopbackTransport::new();
        let marker = Arc::new(());
        let m = Arc::clone(&marker);
        let err = transport
            .inject(3, ActiveMessage::new(ProgressLevel::User, move || drop(m)))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRank);
        assert_eq!(Arc::strong_count(&marker), 1);
        assert_eq!(transport.in_flight(), 0);
    }

    #[test]
    fn limit_refuses_injection() {
        let transport = LoopbackTransport::with_limit(1);
        transport
            .inject(0, ActiveMessage::new(ProgressLevel::Internal, || {}))
            .unwrap();
        let err = transport
            .inject(0, ActiveMessage::new(ProgressLevel::Internal, || {}))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InjectionFailed);
        assert!(err.is_retryable());
        transport.poll(&mut |msg| Lpc::execute(msg.into_lpc()));
        assert!(transport
            .inject(0, ActiveMessage::new(ProgressLevel::Internal, || {}))
            .is_ok());
    }

    #[test]
    fn concurrent_injectors_never_exceed_limit() {
        const LIMIT: usize = 8;
        const THREADS: usize = 8;
        let transport = Arc::new(LoopbackTransport::with_limit(LIMIT));
        let start = Arc::new(Barrier::new(THREADS));
        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let transport = Arc::clone(&transport);
                let start = Arc::clone(&start);
                thread::spawn(move || {
                    start.wait();
                    (0..100)
                        .filter(|_| {
                            transport
                                .inject(0, ActiveMessage::new(ProgressLevel::Internal, || {}))
                                .is_ok()
                        })
                        .count()
                })
            })
            .collect();
        let accepted: usize = handles
            .into_iter()
            .map(|h| h.join().expect("injector panicked"))
            .sum();
        assert_eq!(accepted, LIMIT);
        assert_eq!(transport.in_flight(), LIMIT);
        assert_eq!(transport.poll(&mut |msg| Lpc::execute(msg.into_lpc())), LIMIT);
    }
}
