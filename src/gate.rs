//! Tiered rate and quota enforcement.
//!
//! Two layers, both keyed by payer address (or client IP when no payer is
//! known):
//!
//! 1. A fixed-window per-minute rate limit, checked before any verification
//!    work happens.
//! 2. A monthly transaction budget, checked before verification and consumed
//!    only after a payment verifies, so invalid signatures cannot burn quota.
//!
//! Both live in bounded in-memory maps with periodic eviction; the tier
//! lookup behind them can be served statically or from Postgres and is cached
//! with a short TTL.

use chrono::{DateTime, Datelike, TimeZone, Utc};
use dashmap::DashMap;
use sqlx::Row;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::instrument;

use crate::types::EvmAddress;

/// Length of one rate-limit window.
pub const RATE_WINDOW_SECS: u64 = 60;

/// How long a cached tier stays fresh.
const TIER_CACHE_TTL: Duration = Duration::from_secs(300);

/// Limits attached to a subscription tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionTier {
    pub name: String,
    /// Requests per minute.
    pub rate_limit: u32,
    /// Settlements per calendar month; `-1` means unlimited.
    pub monthly_tx_limit: i64,
}

impl SubscriptionTier {
    /// The tier applied to payers with no subscription record.
    pub fn free() -> Self {
        SubscriptionTier {
            name: "free".into(),
            rate_limit: 60,
            monthly_tx_limit: 1000,
        }
    }
}

/// Lookup interface for subscription tiers.
#[async_trait::async_trait]
pub trait TierDirectory: Send + Sync {
    async fn tier_for(&self, payer: EvmAddress) -> Option<SubscriptionTier>;
}

/// Serves one fixed tier to everyone; the database-less deployment mode.
#[derive(Debug, Clone)]
pub struct StaticTierDirectory {
    tier: SubscriptionTier,
}

impl StaticTierDirectory {
    pub fn new(tier: SubscriptionTier) -> Self {
        Self { tier }
    }
}

#[async_trait::async_trait]
impl TierDirectory for StaticTierDirectory {
    async fn tier_for(&self, _payer: EvmAddress) -> Option<SubscriptionTier> {
        Some(self.tier.clone())
    }
}

/// Postgres-backed tier lookup against the subscription records.
#[derive(Debug, Clone)]
pub struct PgTierDirectory {
    pool: sqlx::PgPool,
}

impl PgTierDirectory {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl TierDirectory for PgTierDirectory {
    async fn tier_for(&self, payer: EvmAddress) -> Option<SubscriptionTier> {
        let row = sqlx::query(
            r#"
            SELECT t.name, t.rate_limit, t.monthly_tx_limit
            FROM subscriptions s
            JOIN subscription_tiers t ON t.id = s.tier_id
            WHERE s.wallet_address = $1 AND s.active
            LIMIT 1
            "#,
        )
        .bind(payer.to_string())
        .fetch_optional(&self.pool)
        .await
        .ok()??;
        Some(SubscriptionTier {
            name: row.try_get("name").ok()?,
            rate_limit: row.try_get::<i32, _>("rate_limit").ok()? as u32,
            monthly_tx_limit: row.try_get("monthly_tx_limit").ok()?,
        })
    }
}

/// Verdict of the per-minute rate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the current window resets.
    pub reset_at: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: u64,
    count: u32,
}

/// Verdict of the monthly quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaStatus {
    pub allowed: bool,
    pub used: u64,
    pub limit: i64,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct MonthlyUsage {
    year: i32,
    month: u32,
    used: u64,
}

/// The combined rate and quota gate.
pub struct Gate {
    tiers: Arc<dyn TierDirectory>,
    tier_cache: DashMap<EvmAddress, (SubscriptionTier, Instant)>,
    rate_windows: DashMap<String, RateWindow>,
    monthly_usage: DashMap<EvmAddress, MonthlyUsage>,
}

impl Gate {
    pub fn new(tiers: Arc<dyn TierDirectory>) -> Self {
        Self {
            tiers,
            tier_cache: DashMap::new(),
            rate_windows: DashMap::new(),
            monthly_usage: DashMap::new(),
        }
    }

    /// Resolve the payer's tier, consulting the cache first. A failed lookup
    /// falls back to the free tier.
    pub async fn tier(&self, payer: EvmAddress) -> SubscriptionTier {
        if let Some(entry) = self.tier_cache.get(&payer) {
            let (tier, cached_at) = entry.value();
            if cached_at.elapsed() < TIER_CACHE_TTL {
                return tier.clone();
            }
        }
        let tier = self
            .tiers
            .tier_for(payer)
            .await
            .unwrap_or_else(SubscriptionTier::free);
        self.tier_cache.insert(payer, (tier.clone(), Instant::now()));
        tier
    }

    /// Count this request against `key`'s fixed 60-second window.
    #[instrument(skip(self))]
    pub async fn check_rate(&self, key: &str, payer: Option<EvmAddress>) -> RateDecision {
        let limit = match payer {
            Some(payer) => self.tier(payer).await.rate_limit,
            None => SubscriptionTier::free().rate_limit,
        };
        self.check_rate_at(key, limit, now_unix())
    }

    fn check_rate_at(&self, key: &str, limit: u32, now: u64) -> RateDecision {
        let mut entry = self
            .rate_windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start: now,
                count: 0,
            });
        if now >= entry.window_start + RATE_WINDOW_SECS {
            entry.window_start = now;
            entry.count = 0;
        }
        entry.count += 1;
        let decision = RateDecision {
            allowed: entry.count <= limit,
            limit,
            remaining: limit.saturating_sub(entry.count),
            reset_at: entry.window_start + RATE_WINDOW_SECS,
        };
        drop(entry);
        decision
    }

    /// Whether `payer` still has monthly budget left. Does not consume.
    pub async fn check_quota(&self, payer: EvmAddress) -> QuotaStatus {
        let tier = self.tier(payer).await;
        let now = Utc::now();
        self.check_quota_at(payer, tier.monthly_tx_limit, now)
    }

    fn check_quota_at(&self, payer: EvmAddress, limit: i64, now: DateTime<Utc>) -> QuotaStatus {
        let used = self
            .monthly_usage
            .get(&payer)
            .map(|u| {
                if u.year == now.year() && u.month == now.month() {
                    u.used
                } else {
                    0
                }
            })
            .unwrap_or(0);
        let allowed = limit == -1 || used < limit as u64;
        QuotaStatus {
            allowed,
            used,
            limit,
            period_end: period_end(now),
        }
    }

    /// Advance the payer's monthly counter by one. Called only after a
    /// payment has verified, immediately before submission.
    pub fn consume_quota(&self, payer: EvmAddress) {
        self.consume_quota_at(payer, Utc::now());
    }

    fn consume_quota_at(&self, payer: EvmAddress, now: DateTime<Utc>) {
        let mut entry = self.monthly_usage.entry(payer).or_insert(MonthlyUsage {
            year: now.year(),
            month: now.month(),
            used: 0,
        });
        if entry.year != now.year() || entry.month != now.month() {
            entry.year = now.year();
            entry.month = now.month();
            entry.used = 0;
        }
        entry.used += 1;
    }

    /// Drop rate windows that can no longer influence a decision.
    pub fn sweep(&self) {
        let now = now_unix();
        self.rate_windows
            .retain(|_, window| now < window.window_start + 2 * RATE_WINDOW_SECS);
        self.tier_cache
            .retain(|_, cached| cached.1.elapsed() < 2 * TIER_CACHE_TTL);
    }

    /// Spawn the periodic eviction sweep for this gate.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let gate = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                gate.sweep();
            }
        })
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// First instant of the next calendar month.
fn period_end(now: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> Gate {
        Gate::new(Arc::new(StaticTierDirectory::new(SubscriptionTier::free())))
    }

    const PAYER: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

    #[test]
    fn test_rate_window_counts_down_and_resets() {
        let gate = gate();
        let now = 1_000_000;

        let first = gate.check_rate_at("k", 2, now);
        assert!(first.allowed);
        assert_eq!(first.remaining, 1);
        assert_eq!(first.reset_at, now + RATE_WINDOW_SECS);

        let second = gate.check_rate_at("k", 2, now + 1);
        assert!(second.allowed);
        assert_eq!(second.remaining, 0);

        let third = gate.check_rate_at("k", 2, now + 2);
        assert!(!third.allowed);

        // A fresh window clears the count.
        let fourth = gate.check_rate_at("k", 2, now + RATE_WINDOW_SECS);
        assert!(fourth.allowed);
        assert_eq!(fourth.remaining, 1);
    }

    #[test]
    fn test_rate_windows_are_per_key() {
        let gate = gate();
        let now = 1_000_000;
        assert!(gate.check_rate_at("a", 1, now).allowed);
        assert!(!gate.check_rate_at("a", 1, now + 1).allowed);
        assert!(gate.check_rate_at("b", 1, now + 1).allowed);
    }

    #[test]
    fn test_quota_consumption_and_limit() {
        let gate = gate();
        let payer: EvmAddress = PAYER.parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();

        let status = gate.check_quota_at(payer, 2, now);
        assert!(status.allowed);
        assert_eq!(status.used, 0);

        gate.consume_quota_at(payer, now);
        gate.consume_quota_at(payer, now);
        let status = gate.check_quota_at(payer, 2, now);
        assert!(!status.allowed);
        assert_eq!(status.used, 2);
        assert_eq!(status.period_end, Utc.with_ymd_and_hms(2025, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_quota_resets_on_month_boundary() {
        let gate = gate();
        let payer: EvmAddress = PAYER.parse().unwrap();
        let march = Utc.with_ymd_and_hms(2025, 3, 31, 23, 0, 0).unwrap();
        let april = Utc.with_ymd_and_hms(2025, 4, 1, 0, 30, 0).unwrap();

        gate.consume_quota_at(payer, march);
        assert_eq!(gate.check_quota_at(payer, 1, march).used, 1);
        assert!(!gate.check_quota_at(payer, 1, march).allowed);

        let rolled = gate.check_quota_at(payer, 1, april);
        assert!(rolled.allowed);
        assert_eq!(rolled.used, 0);
    }

    #[test]
    fn test_unlimited_tier_never_blocks() {
        let gate = gate();
        let payer: EvmAddress = PAYER.parse().unwrap();
        let now = Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap();
        for _ in 0..100 {
            gate.consume_quota_at(payer, now);
        }
        assert!(gate.check_quota_at(payer, -1, now).allowed);
    }

    #[test]
    fn test_december_rolls_into_january() {
        let december = Utc.with_ymd_and_hms(2025, 12, 15, 0, 0, 0).unwrap();
        assert_eq!(
            period_end(december),
            Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
        );
    }
}
