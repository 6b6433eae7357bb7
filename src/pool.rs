//! A bounded connection pool (spec §5, component C7).
//!
//! Sessions move between three sets: `free` (idle, ready to hand out),
//! `used` (checked out, tracked only by count since the caller owns the
//! `Session`), and `terminated` (closed due to an error, a failed liveness
//! probe, or pool shutdown — tracked only by count, since the `Session` is
//! simply dropped). The invariant `|free| + used + acquiring <= maxsize`
//! holds at every yield point.

use std::time::Instant;

use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::session::Session;

struct PooledSession {
    session: Session,
    created_at: Instant,
}

struct State {
    free: Vec<PooledSession>,
    used: usize,
    acquiring: usize,
    terminated: u64,
    closing: bool,
    closed: bool,
}

/// A pool of `Session`s sized between `opts.minsize` and `opts.maxsize`
/// (spec §5 `minsize`/`maxsize`).
pub struct Pool {
    opts: Opts,
    state: Mutex<State>,
    notify: Notify,
}

impl Pool {
    pub fn new(opts: Opts) -> Self {
        Pool {
            opts,
            state: Mutex::new(State {
                free: Vec::new(),
                used: 0,
                acquiring: 0,
                terminated: 0,
                closing: false,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Open connections until `free.len() >= minsize` (or `override_min`,
    /// used by callers that want a bigger warm pool than the configured
    /// default without changing `opts`).
    pub async fn fill_free_pool(&self, override_min: Option<usize>) -> Result<()> {
        let target = override_min.unwrap_or(self.opts.minsize);
        loop {
            {
                let state = self.state.lock().await;
                if state.free.len() >= target || state.closing || state.closed {
                    break;
                }
            }
            let session = Session::connect(&self.opts).await?;
            let mut state = self.state.lock().await;
            state.free.push(PooledSession {
                session,
                created_at: Instant::now(),
            });
        }
        Ok(())
    }

    /// Check out a session, opening a new one if the pool has headroom and
    /// nothing is free, otherwise waiting for a release (spec §5 fairness:
    /// waiters are served in the order they started waiting, via `Notify`'s
    /// FIFO wake order).
    pub async fn acquire(&self) -> Result<Session> {
        enum Decision {
            GotFree(PooledSession),
            Reserved,
            Wait,
        }

        loop {
            let decision = {
                let mut state = self.state.lock().await;
                if state.closing || state.closed {
                    return Err(Error::interface("pool is closing or closed"));
                }

                if let Some(pooled) = state.free.pop() {
                    Decision::GotFree(pooled)
                } else if state.used + state.acquiring < self.opts.maxsize {
                    state.acquiring += 1;
                    Decision::Reserved
                } else {
                    Decision::Wait
                }
            };

            match decision {
                Decision::GotFree(pooled) => match self.recycle_if_needed(pooled).await? {
                    Some(session) => {
                        let mut state = self.state.lock().await;
                        state.used += 1;
                        trace!(used = state.used, "pool: session acquired from free set");
                        return Ok(session);
                    }
                    None => continue, // session was stale/dead; loop to try again
                },
                // Only the task whose lock section above actually incremented
                // `acquiring` reaches this arm, so it alone connects and
                // decrements — a task that saw the pool full falls into
                // `Decision::Wait` instead and never touches `acquiring`.
                Decision::Reserved => {
                    let result = Session::connect(&self.opts).await;
                    let mut state = self.state.lock().await;
                    state.acquiring -= 1;
                    match result {
                        Ok(session) => {
                            state.used += 1;
                            if self.opts.echo {
                                debug!(used = state.used, "pool: opened new session");
                            }
                            return Ok(session);
                        }
                        Err(e) => {
                            self.notify.notify_one();
                            return Err(e);
                        }
                    }
                }
                Decision::Wait => {
                    self.notify.notified().await;
                }
            }
        }
    }

    /// Liveness check + age-based recycle (spec §5 `pool_recycle`): if the
    /// session is past its recycle age or fails a `COM_PING`, it's
    /// discarded and `None` is returned so the caller retries.
    async fn recycle_if_needed(&self, mut pooled: PooledSession) -> Result<Option<Session>> {
        let stale = self
            .opts
            .pool_recycle
            .is_some_and(|recycle| pooled.created_at.elapsed() >= recycle);

        if stale || pooled.session.ping().await.is_err() {
            let mut state = self.state.lock().await;
            state.terminated += 1;
            return Ok(None);
        }
        Ok(Some(pooled.session))
    }

    /// Return a checked-out session to the pool, or discard it if it's
    /// mid-transaction, the pool is shutting down, or the caller marked it
    /// unusable (spec §5 `release`).
    pub async fn release(&self, session: Session) {
        let discard = session.in_transaction();
        let mut state = self.state.lock().await;
        state.used -= 1;

        if discard || state.closing || state.closed {
            state.terminated += 1;
            drop(state);
            session.ensure_closed().await;
        } else {
            state.free.push(PooledSession {
                session,
                created_at: Instant::now(),
            });
        }
        self.notify.notify_one();
    }

    /// Graceful shutdown: stop accepting new acquires, let in-flight
    /// sessions drain back via `release`, then send `COM_QUIT` to every idle
    /// session (spec §5 `close`).
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            state.closing = true;
        }
        self.wait_closed().await;

        let idle = {
            let mut state = self.state.lock().await;
            state.closed = true;
            std::mem::take(&mut state.free)
        };
        for pooled in idle {
            pooled.session.ensure_closed().await;
        }
    }

    /// Forced shutdown: drop every idle session immediately, without
    /// `COM_QUIT` (spec §5 `terminate`). In-flight sessions are still
    /// discarded as they're released, same as `close`.
    pub async fn terminate(&self) {
        let mut state = self.state.lock().await;
        state.closing = true;
        state.closed = true;
        state.terminated += state.free.len() as u64;
        state.free.clear();
    }

    /// Wait until every checked-out session has been released.
    pub async fn wait_closed(&self) {
        loop {
            {
                let state = self.state.lock().await;
                if state.used == 0 {
                    return;
                }
            }
            self.notify.notified().await;
        }
    }

    pub async fn size(&self) -> usize {
        let state = self.state.lock().await;
        state.free.len() + state.used + state.acquiring
    }

    pub async fn free_count(&self) -> usize {
        self.state.lock().await.free.len()
    }

    pub async fn terminated_count(&self) -> u64 {
        self.state.lock().await.terminated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_pool_has_no_sessions() {
        let pool = Pool::new(Opts::default());
        assert_eq!(pool.size().await, 0);
        assert_eq!(pool.free_count().await, 0);
    }

    #[tokio::test]
    async fn terminate_clears_free_set() {
        let pool = Pool::new(Opts::default());
        pool.terminate().await;
        assert_eq!(pool.free_count().await, 0);
    }
}
