//! Per-domain rate limiting for batches of crawl jobs.
//!
//! A batch holds at most one job per domain and at most `max_concurrent`
//! jobs overall. A domain becomes eligible again `domain_cooldown` after its
//! previous job was dispatched, and consecutive batches are separated by
//! `global_cooldown`.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::Instant;

use crate::util::domain_of;

/// Shortest pause when no domain is eligible yet.
const MIN_IDLE_WAIT: Duration = Duration::from_millis(500);

/// A job keyed by the host of its URL.
pub trait RateLimited {
    fn url(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimiterOptions {
    pub max_concurrent: usize,
    pub global_cooldown: Duration,
    pub domain_cooldown: Duration,
}

impl RateLimiterOptions {
    /// Feed polling: light requests, many publishers.
    pub const FEEDS: Self = Self {
        max_concurrent: 10,
        global_cooldown: Duration::from_millis(500),
        domain_cooldown: Duration::from_millis(2000),
    };

    /// Full article retrieval, which may involve a headless render.
    pub const ARTICLES: Self = Self {
        max_concurrent: 8,
        global_cooldown: Duration::from_millis(1000),
        domain_cooldown: Duration::from_millis(5000),
    };
}

#[derive(Debug, Clone)]
pub struct DomainRateLimiter {
    options: RateLimiterOptions,
}

impl DomainRateLimiter {
    pub fn new(options: RateLimiterOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> RateLimiterOptions {
        self.options
    }

    /// Runs `perform` over every job, honouring the domain and global
    /// cooldowns, and returns the successful results.
    ///
    /// `perform` receives the job and its domain. Failed jobs are logged and
    /// produce no entry; jobs whose URL has no host are dropped. Result order
    /// follows dispatch order, not input order.
    pub async fn process_batch<J, R, E, F, Fut>(&self, jobs: Vec<J>, perform: F) -> Vec<R>
    where
        J: RateLimited,
        E: Display,
        F: Fn(J, String) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let max_concurrent = self.options.max_concurrent.max(1);
        let start = Instant::now();

        let mut queues: HashMap<String, VecDeque<J>> = HashMap::new();
        // Min-heap of (ready_at, insertion order, domain); one entry per domain with queued work
        let mut ready: BinaryHeap<Reverse<(Instant, u64, String)>> = BinaryHeap::new();
        let mut seq = 0u64;

        for job in jobs {
            let Some(domain) = domain_of(job.url()) else {
                tracing::warn!(url = %job.url(), "Dropping job with unparseable URL");
                continue;
            };
            let queue = queues.entry(domain.clone()).or_default();
            if queue.is_empty() {
                ready.push(Reverse((start, seq, domain)));
                seq += 1;
            }
            queue.push_back(job);
        }

        let mut results = Vec::new();

        while let Some(soonest) = ready.peek().map(|Reverse((at, _, _))| *at) {
            let now = Instant::now();
            if soonest > now {
                let wait = (soonest - now).max(MIN_IDLE_WAIT);
                tracing::trace!(wait_ms = wait.as_millis() as u64, "No domain eligible, waiting");
                tokio::time::sleep(wait).await;
                continue;
            }

            let mut batch = Vec::new();
            while batch.len() < max_concurrent {
                match ready.peek() {
                    Some(Reverse((ready_at, _, _))) if *ready_at <= now => {}
                    _ => break,
                }
                let Some(Reverse((_, _, domain))) = ready.pop() else {
                    break;
                };
                let Some(queue) = queues.get_mut(&domain) else {
                    continue;
                };
                let Some(job) = queue.pop_front() else {
                    continue;
                };
                if !queue.is_empty() {
                    ready.push(Reverse((now + self.options.domain_cooldown, seq, domain.clone())));
                    seq += 1;
                }
                batch.push(perform(job, domain));
            }

            let dispatched = batch.len();
            for outcome in join_all(batch).await {
                match outcome {
                    Ok(result) => results.push(result),
                    Err(e) => tracing::warn!(error = %e, "Rate-limited job failed"),
                }
            }
            tracing::debug!(dispatched, remaining_domains = ready.len(), "Batch complete");

            if !ready.is_empty() && !self.options.global_cooldown.is_zero() {
                tokio::time::sleep(self.options.global_cooldown).await;
            }
        }

        results
    }
}
