//! 编译规则缓存
//!
//! 按作用域集合缓存编译后的规则，条目带有时间纪元（当前时间除以刷新周期）。
//! 纪元变化后条目自动失效，下次访问时重新加载，因此规则定义的修改
//! 最多延迟一个刷新周期生效。

use crate::compiler::CompiledRule;
use crate::error::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use observer_shared::config::EngineConfig;
use observer_shared::observability::metrics::RULE_CACHE_REFRESH_TOTAL;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

/// 时钟
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 手动推进的时钟
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let by = ChronoDuration::from_std(by).unwrap_or(ChronoDuration::MAX);
        let mut now = self.now.lock();
        *now = now.checked_add_signed(by).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

/// 作用域集合的缓存键（去重并排序，与传入顺序无关）
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey(Vec<Uuid>);

impl ScopeKey {
    pub fn new(scope_ids: &[Uuid]) -> Self {
        let mut ids = scope_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        Self(ids)
    }

    pub fn ids(&self) -> &[Uuid] {
        &self.0
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    epoch: i64,
    rules: Arc<Vec<CompiledRule>>,
}

/// 缓存统计
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// 编译规则缓存
#[derive(Clone)]
pub struct RuleCache {
    entries: Arc<DashMap<ScopeKey, CacheEntry>>,
    clock: Arc<dyn Clock>,
    refresh_interval: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl RuleCache {
    /// 刷新周期至少 1 毫秒
    pub fn new(clock: Arc<dyn Clock>, refresh_interval: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            clock,
            refresh_interval: refresh_interval.max(Duration::from_millis(1)),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn from_config(config: &EngineConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(clock, config.refresh_interval())
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// 当前时间纪元
    pub fn epoch(&self) -> i64 {
        let interval = i64::try_from(self.refresh_interval.as_millis()).unwrap_or(i64::MAX);
        self.clock.now().timestamp_millis().div_euclid(interval)
    }

    /// 读取缓存，未命中或已过期时调用 `load` 加载
    ///
    /// 加载失败时不写入缓存，错误原样返回。同一纪元内并发的未命中
    /// 可能各自加载一次，以最后写入的结果为准。
    #[instrument(skip(self, load), fields(scopes = scope_ids.len()))]
    pub fn get_or_load<F>(&self, scope_ids: &[Uuid], load: F) -> Result<Arc<Vec<CompiledRule>>>
    where
        F: FnOnce(&[Uuid]) -> Result<Vec<CompiledRule>>,
    {
        let key = ScopeKey::new(scope_ids);
        let epoch = self.epoch();

        if let Some(entry) = self.entries.get(&key)
            && entry.epoch == epoch
        {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Arc::clone(&entry.rules));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let rules = Arc::new(load(key.ids())?);
        metrics::counter!(RULE_CACHE_REFRESH_TOTAL).increment(1);
        debug!(epoch, rules = rules.len(), "规则缓存已刷新");

        self.entries.retain(|_, entry| entry.epoch >= epoch);
        self.entries.insert(
            key,
            CacheEntry {
                epoch,
                rules: Arc::clone(&rules),
            },
        );
        Ok(rules)
    }

    /// 清空缓存
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl std::fmt::Debug for RuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleCache")
            .field("refresh_interval", &self.refresh_interval)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use observer_shared::error::ObserverError;
    use observer_shared::test_utils::test_time;

    fn cache() -> (RuleCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(test_time()));
        (RuleCache::new(clock.clone(), Duration::from_secs(60)), clock)
    }

    #[test]
    fn test_hit_within_epoch() {
        let (cache, _clock) = cache();
        let scope = [Uuid::new_v4(), Uuid::new_v4()];
        let mut loads = 0;

        cache.get_or_load(&scope, |_| { loads += 1; Ok(vec![]) }).unwrap();
        // 顺序和重复不影响缓存键
        let reversed = [scope[1], scope[0], scope[1]];
        cache.get_or_load(&reversed, |_| { loads += 1; Ok(vec![]) }).unwrap();

        assert_eq!(loads, 1);
        assert_eq!(cache.stats(), CacheStats { entries: 1, hits: 1, misses: 1 });
    }

    #[test]
    fn test_reload_after_epoch_change() {
        let (cache, clock) = cache();
        let scope = [Uuid::new_v4()];
        let mut loads = 0;

        cache.get_or_load(&scope, |_| { loads += 1; Ok(vec![]) }).unwrap();
        clock.advance(Duration::from_secs(60));
        cache.get_or_load(&scope, |_| { loads += 1; Ok(vec![]) }).unwrap();

        assert_eq!(loads, 2);
    }

    #[test]
    fn test_failed_load_not_cached() {
        let (cache, _clock) = cache();
        let scope = [Uuid::new_v4()];

        let err = cache.get_or_load(&scope, |_| {
            Err(RuleError::Store(ObserverError::store("rules", "down")))
        });
        assert!(err.is_err());
        assert!(cache.is_empty());

        let mut loads = 0;
        cache.get_or_load(&scope, |_| { loads += 1; Ok(vec![]) }).unwrap();
        assert_eq!(loads, 1);
    }

    #[test]
    fn test_stale_entries_evicted_on_refresh() {
        let (cache, clock) = cache();
        cache.get_or_load(&[Uuid::new_v4()], |_| Ok(vec![])).unwrap();
        cache.get_or_load(&[Uuid::new_v4()], |_| Ok(vec![])).unwrap();
        assert_eq!(cache.len(), 2);

        clock.advance(Duration::from_secs(120));
        cache.get_or_load(&[Uuid::new_v4()], |_| Ok(vec![])).unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_load_receives_normalized_scope() {
        let (cache, _clock) = cache();
        let a = Uuid::new_v4();
        cache
            .get_or_load(&[a, a], |ids| {
                assert_eq!(ids, &[a]);
                Ok(vec![])
            })
            .unwrap();
    }
}
