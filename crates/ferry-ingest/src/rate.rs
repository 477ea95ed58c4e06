// SPDX-FileCopyrightText: 2026 Blufio Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Process-wide upstream rate budget.
//!
//! Every upstream call acquires from one [`RateGate`] first. The
//! [`RateController`] grants calls from a fixed window budget and, after a
//! flood-control rejection, holds every caller until the signalled
//! `retry_after` has elapsed. Waiting callers are served in arrival order.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use ferry_config::model::RateLimitConfig;
use ferry_core::CostClass;
use tokio::time::Instant;
use tracing::{debug, info};

/// Shared gate in front of the upstream.
#[async_trait]
pub trait RateGate: Send + Sync {
    /// Wait until a call of `class` may be made, then consume its cost.
    async fn acquire(&self, class: CostClass);

    /// Record a flood-control rejection. No grant is issued before `now + retry_after`.
    fn report_flood(&self, retry_after: Duration);

    fn snapshot(&self) -> RateBudget;
}

/// Point-in-time view of the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateBudget {
    pub window: Duration,
    pub max_calls: u32,
    pub used: u32,
    /// Time left in flood-control backoff, if any.
    pub backoff_remaining: Option<Duration>,
}

/// Cost per call class, in budget units.
#[derive(Debug, Clone, Copy)]
pub struct CostTable {
    pub auth: u32,
    pub discovery: u32,
    pub history: u32,
    pub subscribe: u32,
}

impl CostTable {
    pub fn cost(&self, class: CostClass) -> u32 {
        match class {
            CostClass::Auth => self.auth,
            CostClass::Discovery => self.discovery,
            CostClass::History => self.history,
            CostClass::Subscribe => self.subscribe,
        }
    }
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            auth: 1,
            discovery: 1,
            history: 1,
            subscribe: 1,
        }
    }
}

#[derive(Debug)]
struct BudgetState {
    window_start: Instant,
    used: u32,
    next_allowed_at: Option<Instant>,
}

/// Fixed-window token budget with flood-control backoff.
pub struct RateController {
    window: Duration,
    max_calls: u32,
    costs: CostTable,
    /// Fair (FIFO) queue of waiting acquirers; only the head polls the budget.
    turn: tokio::sync::Mutex<()>,
    state: Mutex<BudgetState>,
}

enum Decision {
    Granted,
    Wait(Duration),
}

impl RateController {
    pub fn new(window: Duration, max_calls: u32, costs: CostTable) -> Self {
        Self {
            window: window.max(Duration::from_millis(1)),
            max_calls: max_calls.max(1),
            costs,
            turn: tokio::sync::Mutex::new(()),
            state: Mutex::new(BudgetState {
                window_start: Instant::now(),
                used: 0,
                next_allowed_at: None,
            }),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(
            Duration::from_secs(config.window_secs),
            config.max_calls_per_window,
            CostTable {
                auth: config.auth_cost,
                discovery: config.discovery_cost,
                history: config.history_cost,
                subscribe: config.subscribe_cost,
            },
        )
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Check-and-consume under the state lock.
    fn try_take(&self, cost: u32) -> Decision {
        let mut state = self.lock_state();
        let now = Instant::now();

        if let Some(until) = state.next_allowed_at {
            if until > now {
                return Decision::Wait(until - now);
            }
            state.next_allowed_at = None;
            ferry_prometheus::set_backoff_active(false);
            info!("flood-control backoff elapsed, resuming upstream calls");
        }

        if now >= state.window_start + self.window {
            state.window_start = now;
            state.used = 0;
        }

        if state.used + cost <= self.max_calls {
            state.used += cost;
            Decision::Granted
        } else {
            Decision::Wait(state.window_start + self.window - now)
        }
    }
}

#[async_trait]
impl RateGate for RateController {
    async fn acquire(&self, class: CostClass) {
        // A cost above the whole budget would never be granted.
        let cost = self.costs.cost(class).min(self.max_calls);
        let _turn = self.turn.lock().await;
        loop {
            match self.try_take(cost) {
                Decision::Granted => return,
                Decision::Wait(wait) => {
                    debug!(class = %class, wait_ms = wait.as_millis() as u64, "waiting for rate budget");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    fn report_flood(&self, retry_after: Duration) {
        let mut state = self.lock_state();
        let proposed = Instant::now() + retry_after;
        let next = match state.next_allowed_at {
            Some(current) if current >= proposed => current,
            _ => proposed,
        };
        state.next_allowed_at = Some(next);
        drop(state);

        ferry_prometheus::record_backoff(retry_after);
        ferry_prometheus::set_backoff_active(true);
        info!(
            retry_after_secs = retry_after.as_secs(),
            "flood control signalled, holding all upstream calls"
        );
    }

    fn snapshot(&self) -> RateBudget {
        let state = self.lock_state();
        let now = Instant::now();
        let used = if now >= state.window_start + self.window {
            0
        } else {
            state.used
        };
        RateBudget {
            window: self.window,
            max_calls: self.max_calls,
            used,
            backoff_remaining: state
                .next_allowed_at
                .filter(|until| *until > now)
                .map(|until| until - now),
        }
    }
}
