use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;

use crate::core::EngineConfig;

/// 均匀抽样源：返回 `1..=max` 内的整数。测试里换成固定值以获得确定性。
pub trait RandomSource: Send {
    fn draw(&mut self, max: u64) -> u64;
}

impl RandomSource for StdRng {
    fn draw(&mut self, max: u64) -> u64 {
        self.random_range(1..=max.max(1))
    }
}

/// 每次都返回同一个值（截断到 `max`）
#[derive(Clone, Copy, Debug)]
pub struct FixedDraw(pub u64);

impl RandomSource for FixedDraw {
    fn draw(&mut self, max: u64) -> u64 {
        self.0.clamp(1, max.max(1))
    }
}

/// 以 `probability_percent`% 的概率返回 true。
///
/// `max = floor(100 / p)`，在 `1..=max` 中抽一个数，等于 1 即命中；
/// `p <= 0` 永不命中，`p >= 100` 总是命中。
pub fn should_check(probability_percent: f64, rng: &mut dyn RandomSource) -> bool {
    if probability_percent.is_nan() || probability_percent <= 0.0 {
        return false;
    }
    if probability_percent >= 100.0 {
        return true;
    }
    let max = (100.0 / probability_percent).floor() as u64;
    if max <= 1 {
        return true;
    }
    rng.draw(max) == 1
}

/// 非强制更新检查的门控
#[derive(Clone, Debug)]
pub struct UpdatePolicy {
    pub auto_update: bool,
    pub probability_percent: f64,
    pub interval: Duration,
}

impl UpdatePolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            auto_update: config.auto_update,
            probability_percent: config.update_probability,
            interval: Duration::from_secs(config.update_interval_secs),
        }
    }

    /// 不抽样就能确定永不命中时返回 false
    pub fn may_check(&self) -> bool {
        self.auto_update && !self.probability_percent.is_nan() && self.probability_percent > 0.0
    }

    /// 本次 lookup 是否做一次过期检查
    pub fn roll(&self, rng: &mut dyn RandomSource) -> bool {
        self.auto_update && should_check(self.probability_percent, rng)
    }

    /// 距离上次检查是否已超过间隔；从未检查过视为已超过
    pub fn interval_elapsed(&self, last_check: Option<u64>, now: u64) -> bool {
        match last_check {
            Some(last) => now.saturating_sub(last) >= self.interval.as_secs(),
            None => true,
        }
    }
}
