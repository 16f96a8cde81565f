//! Per-connection session state and the registry of live sessions.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use pgreflect_core::{RateLimitConfig, TenantScope};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::ProxyError;

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, no startup packet seen yet.
    Unauthenticated,
    /// Tenant resolved, backend being connected.
    AwaitingBackend,
    /// Both legs relaying.
    Streaming,
    /// Terminal.
    Closed,
}

/// Sliding window of query arrival times, most recent first.
#[derive(Debug, Clone)]
pub struct QueryWindow {
    window: Duration,
    limit: usize,
    recent: VecDeque<Instant>,
}

impl QueryWindow {
    pub fn new(window: Duration, limit: usize) -> Self {
        Self {
            window,
            limit,
            recent: VecDeque::with_capacity(limit.saturating_add(1).min(1024)),
        }
    }

    /// Record a query arriving at `now` and return how many queries the
    /// window holds including it.
    pub fn record(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.recent.push_front(now);
        self.recent.len()
    }

    /// Whether `count` queries in one window is more than allowed.
    pub fn exceeds(&self, count: usize) -> bool {
        count > self.limit
    }

    pub fn len(&self) -> usize {
        self.recent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.is_empty()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.recent.back() {
            if now.saturating_duration_since(oldest) < self.window {
                break;
            }
            self.recent.pop_back();
        }
    }
}

/// Totals logged when a session ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSummary {
    pub total_queries: u64,
    pub total_query_time: Duration,
    pub duration: Duration,
}

/// State of one client connection. Owned by its connection task.
#[derive(Debug)]
pub struct Session {
    client_id: Uuid,
    peer: SocketAddr,
    state: SessionState,
    scope: Option<TenantScope>,
    window: QueryWindow,
    total_queries: u64,
    total_query_time: Duration,
    in_flight: Option<Instant>,
    opened_at: Instant,
}

impl Session {
    pub fn new(peer: SocketAddr, rate_limit: &RateLimitConfig) -> Self {
        Self {
            client_id: Uuid::new_v4(),
            peer,
            state: SessionState::Unauthenticated,
            scope: None,
            window: QueryWindow::new(rate_limit.window(), rate_limit.max_queries),
            total_queries: 0,
            total_query_time: Duration::ZERO,
            in_flight: None,
            opened_at: Instant::now(),
        }
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn scope(&self) -> Option<&TenantScope> {
        self.scope.as_ref()
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.scope.as_ref().map(|s| s.tenant_id.as_str())
    }

    /// Fix the tenant scope and move to `AwaitingBackend`. The scope of a
    /// session never changes once set.
    pub fn begin_backend(&mut self, scope: TenantScope) -> Result<(), ProxyError> {
        if self.state != SessionState::Unauthenticated {
            return Err(ProxyError::ProtocolViolation(format!(
                "startup received in state {:?}",
                self.state
            )));
        }
        self.scope = Some(scope);
        self.state = SessionState::AwaitingBackend;
        Ok(())
    }

    pub fn mark_streaming(&mut self) {
        if self.state == SessionState::AwaitingBackend {
            self.state = SessionState::Streaming;
        }
    }

    /// Count a client query against the rate limit.
    ///
    /// The query that reaches the limit is admitted; the next one within
    /// the same window is refused.
    pub fn admit_query(&mut self, now: Instant) -> Result<(), ProxyError> {
        let count = self.window.record(now);
        if self.window.exceeds(count) {
            return Err(ProxyError::RateLimitExceeded {
                count,
                limit: self.window.limit(),
                window_ms: self.window.window().as_millis() as u64,
            });
        }

        self.total_queries += 1;
        if self.in_flight.is_none() {
            self.in_flight = Some(now);
        }
        Ok(())
    }

    /// The backend answered; close the latency interval of the in-flight
    /// query, if any.
    pub fn query_answered(&mut self, now: Instant) {
        if let Some(started) = self.in_flight.take() {
            self.total_query_time += now.saturating_duration_since(started);
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            total_queries: self.total_queries,
            total_query_time: self.total_query_time,
            duration: self.opened_at.elapsed(),
        }
    }

    /// Move to `Closed` and log the session totals. Returns `false` if the
    /// session was already closed.
    pub fn close(&mut self) -> bool {
        if self.state == SessionState::Closed {
            return false;
        }
        self.state = SessionState::Closed;
        self.in_flight = None;

        let summary = self.summary();
        tracing::info!(
            client_id = %self.client_id,
            tenant = self.tenant_id().unwrap_or("-"),
            peer = %self.peer,
            total_queries = summary.total_queries,
            total_query_time_ms = summary.total_query_time.as_millis() as u64,
            duration_ms = summary.duration.as_millis() as u64,
            "Session closed"
        );
        true
    }
}

/// What the registry knows about a live session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub peer: SocketAddr,
    pub tenant_id: Option<String>,
    pub opened_at: Instant,
}

/// Live sessions keyed by client id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, session: &Session) {
        let entry = SessionEntry {
            peer: session.peer(),
            tenant_id: session.tenant_id().map(str::to_string),
            opened_at: session.opened_at,
        };
        self.sessions.write().await.insert(session.client_id(), entry);
    }

    pub async fn set_tenant(&self, client_id: Uuid, tenant_id: &str) {
        if let Some(entry) = self.sessions.write().await.get_mut(&client_id) {
            entry.tenant_id = Some(tenant_id.to_string());
        }
    }

    pub async fn get(&self, client_id: Uuid) -> Option<SessionEntry> {
        self.sessions.read().await.get(&client_id).cloned()
    }

    /// Close `session` and drop it from the registry. Safe to call more
    /// than once.
    pub async fn release(&self, session: &mut Session) {
        if session.close() {
            self.sessions.write().await.remove(&session.client_id());
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
