//! 定时学习调度：周期判断与失败冷却

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use crate::config::LearningSection;

/// 调度类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// 仅手动触发（learn_now）
    Manual,
    /// 固定间隔 interval_secs
    Interval,
    #[default]
    Hourly,
    Daily,
    Weekly,
}

impl ScheduleType {
    pub fn period(&self, interval_secs: u64) -> Option<Duration> {
        match self {
            ScheduleType::Manual => None,
            ScheduleType::Interval => Some(Duration::seconds(interval_secs.max(1) as i64)),
            ScheduleType::Hourly => Some(Duration::hours(1)),
            ScheduleType::Daily => Some(Duration::days(1)),
            ScheduleType::Weekly => Some(Duration::weeks(1)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LearningSchedule {
    schedule: ScheduleType,
    period: Option<Duration>,
    cooldown: Duration,
    /// 上次成功运行（或调度开始）的时间
    last_run: DateTime<Utc>,
    last_failure: Option<DateTime<Utc>>,
}

impl LearningSchedule {
    pub fn new(config: &LearningSection, now: DateTime<Utc>) -> Self {
        Self {
            schedule: config.schedule,
            period: config.schedule.period(config.interval_secs),
            cooldown: Duration::seconds(config.cooldown_secs as i64),
            last_run: now,
            last_failure: None,
        }
    }

    pub fn schedule(&self) -> ScheduleType {
        self.schedule
    }

    /// 定时器轮询间隔：不超过一分钟，也不超过周期本身
    pub fn poll_interval(&self) -> Option<std::time::Duration> {
        let period = self.period?;
        let secs = period.num_seconds().clamp(1, 60) as u64;
        Some(std::time::Duration::from_secs(secs))
    }

    pub fn is_in_cooldown(&self, now: DateTime<Utc>) -> bool {
        match self.last_failure {
            Some(failed_at) => now - failed_at < self.cooldown,
            None => false,
        }
    }

    pub fn should_run_now(&self, now: DateTime<Utc>) -> bool {
        if self.is_in_cooldown(now) {
            return false;
        }
        match self.period {
            Some(period) => now - self.last_run >= period,
            None => false,
        }
    }

    pub fn record_successful_run(&mut self, now: DateTime<Utc>) {
        self.last_run = now;
        self.last_failure = None;
    }

    pub fn record_failed_run(&mut self, now: DateTime<Utc>) {
        self.last_failure = Some(now);
    }

    /// 数据不足跳过本轮：推迟到下一个周期
    pub fn record_skipped_run(&mut self, now: DateTime<Utc>) {
        self.last_run = now;
    }
}
