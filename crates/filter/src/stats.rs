//! Traffic statistics: blocked/allowed counters, per-day buckets, top
//! blocked domains and a bounded list of recent blocks.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{Mutex, MutexGuard, PoisonError},
};

use {
    serde::{Deserialize, Serialize},
    time::{Date, OffsetDateTime},
    tracing::info,
};

/// Maximum number of entries kept in the recent-blocks list.
pub const RECENT_CAPACITY: usize = 100;
/// Default size of the top blocked domains ranking in a snapshot.
pub const DEFAULT_TOP_LIMIT: usize = 10;
/// Upper bound for [`StatsAggregator::daily`].
pub const MAX_DAILY_DAYS: usize = 366;

// ── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyCount {
    pub blocked: u64,
    pub allowed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainCount {
    pub domain: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentBlock {
    pub domain: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub blocked: u64,
    pub allowed: u64,
    pub total_requests: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
    /// Milliseconds since start (or the last reset).
    pub uptime: u64,
    pub block_rate: String,
    pub requests_per_minute: f64,
    pub daily_stats: BTreeMap<String, DailyCount>,
    pub top_blocked_domains: Vec<DomainCount>,
    pub recent_blocked: Vec<RecentBlock>,
}

/// Format a block rate the way the stats API reports it.
pub fn format_block_rate(blocked: u64, total: u64) -> String {
    if total == 0 {
        return "0%".to_string();
    }
    format!("{:.2}%", blocked as f64 / total as f64 * 100.0)
}

fn day_key(date: Date) -> String {
    date.to_string()
}

// ── State ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Tally {
    count: u64,
    /// Order of first appearance, used to break ties.
    seq: u64,
}

#[derive(Debug)]
struct StatsState {
    blocked: u64,
    allowed: u64,
    start_time: OffsetDateTime,
    daily: BTreeMap<Date, DailyCount>,
    domains: HashMap<String, Tally>,
    next_seq: u64,
    recent: VecDeque<RecentBlock>,
}

impl StatsState {
    fn new(start_time: OffsetDateTime) -> Self {
        Self {
            blocked: 0,
            allowed: 0,
            start_time,
            daily: BTreeMap::new(),
            domains: HashMap::new(),
            next_seq: 0,
            recent: VecDeque::with_capacity(RECENT_CAPACITY),
        }
    }

    fn total(&self) -> u64 {
        self.blocked + self.allowed
    }

    fn uptime_ms(&self, now: OffsetDateTime) -> u64 {
        let ms = (now - self.start_time).whole_milliseconds();
        u64::try_from(ms).unwrap_or(0)
    }

    fn requests_per_minute(&self, now: OffsetDateTime) -> f64 {
        let uptime = self.uptime_ms(now);
        if uptime == 0 {
            return 0.0;
        }
        self.total() as f64 / (uptime as f64 / 60_000.0)
    }

    fn top_blocked(&self, limit: usize) -> Vec<DomainCount> {
        let mut ranked: Vec<(&String, &Tally)> = self.domains.iter().collect();
        ranked.sort_by(|(_, a), (_, b)| b.count.cmp(&a.count).then(a.seq.cmp(&b.seq)));
        ranked
            .into_iter()
            .take(limit)
            .map(|(domain, tally)| DomainCount {
                domain: domain.clone(),
                count: tally.count,
            })
            .collect()
    }
}

// ── Aggregator ──────────────────────────────────────────────────────────────

/// Process-wide request statistics. All updates are synchronous and short.
#[derive(Debug)]
pub struct StatsAggregator {
    state: Mutex<StatsState>,
}

impl Default for StatsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsAggregator {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StatsState::new(OffsetDateTime::now_utc())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StatsState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count a blocked request against `domain` (`unknown` when empty).
    pub fn record_blocked(&self, domain: &str) {
        self.record_blocked_at(domain, OffsetDateTime::now_utc());
    }

    pub fn record_allowed(&self) {
        self.record_allowed_at(OffsetDateTime::now_utc());
    }

    fn record_blocked_at(&self, domain: &str, now: OffsetDateTime) {
        let domain = if domain.is_empty() {
            "unknown"
        } else {
            domain
        };
        let mut state = self.lock();
        state.blocked += 1;
        state.daily.entry(now.date()).or_default().blocked += 1;

        let seq = state.next_seq;
        let tally = state
            .domains
            .entry(domain.to_string())
            .or_insert(Tally { count: 0, seq });
        tally.count += 1;
        if tally.seq == seq {
            state.next_seq += 1;
        }

        state.recent.push_front(RecentBlock {
            domain: domain.to_string(),
            timestamp: now,
        });
        state.recent.truncate(RECENT_CAPACITY);
    }

    fn record_allowed_at(&self, now: OffsetDateTime) {
        let mut state = self.lock();
        state.allowed += 1;
        state.daily.entry(now.date()).or_default().allowed += 1;
    }

    pub fn total_requests(&self) -> u64 {
        self.lock().total()
    }

    /// Blocked share of all requests, e.g. `"30.00%"`, or `"0%"` before any traffic.
    pub fn block_rate(&self) -> String {
        let state = self.lock();
        format_block_rate(state.blocked, state.total())
    }

    pub fn requests_per_minute(&self) -> f64 {
        self.lock().requests_per_minute(OffsetDateTime::now_utc())
    }

    /// The `limit` most blocked domains, by count; ties keep first-seen order.
    pub fn top_blocked(&self, limit: usize) -> Vec<DomainCount> {
        self.lock().top_blocked(limit)
    }

    /// The last `days` UTC days including today, zero-filled, keyed
    /// `YYYY-MM-DD`. `days` is clamped to [`MAX_DAILY_DAYS`].
    pub fn daily(&self, days: usize) -> BTreeMap<String, DailyCount> {
        self.daily_at(days, OffsetDateTime::now_utc().date())
    }

    fn daily_at(&self, days: usize, today: Date) -> BTreeMap<String, DailyCount> {
        let state = self.lock();
        let mut out = BTreeMap::new();
        let mut date = Some(today);
        for _ in 0..days.min(MAX_DAILY_DAYS) {
            let Some(day) = date else { break };
            let count = state.daily.get(&day).copied().unwrap_or_default();
            out.insert(day_key(day), count);
            date = day.previous_day();
        }
        out
    }

    /// Up to `limit` recent blocks, newest first.
    pub fn recent(&self, limit: usize) -> Vec<RecentBlock> {
        self.lock().recent.iter().take(limit).cloned().collect()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        self.snapshot_at(OffsetDateTime::now_utc())
    }

    fn snapshot_at(&self, now: OffsetDateTime) -> StatsSnapshot {
        let state = self.lock();
        StatsSnapshot {
            blocked: state.blocked,
            allowed: state.allowed,
            total_requests: state.total(),
            start_time: state.start_time,
            uptime: state.uptime_ms(now),
            block_rate: format_block_rate(state.blocked, state.total()),
            requests_per_minute: state.requests_per_minute(now),
            daily_stats: state
                .daily
                .iter()
                .map(|(date, count)| (day_key(*date), *count))
                .collect(),
            top_blocked_domains: state.top_blocked(DEFAULT_TOP_LIMIT),
            recent_blocked: state.recent.iter().cloned().collect(),
        }
    }

    /// Zero every counter and restart the uptime clock.
    pub fn reset(&self) {
        *self.lock() = StatsState::new(OffsetDateTime::now_utc());
        info!("statistics reset");
    }
}
