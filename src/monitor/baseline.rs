//! 性能基线：历史均值优先，缺历史时用模式档案的静态值

use crate::knowledge::{best_effort, HistoricalPerformanceStore};
use crate::monitor::{BaselineSource, PerformanceBaseline};
use crate::patterns::PatternProfile;

/// 模式档案的静态基线
pub fn profile_baseline(profile: &PatternProfile) -> PerformanceBaseline {
    PerformanceBaseline {
        pattern: profile.name.clone(),
        duration_secs: profile.baseline.avg_duration_secs,
        quality: profile.baseline.quality,
        memory_mb: profile.baseline.memory_mb,
        api_calls: profile.baseline.api_calls,
        source: BaselineSource::Profile,
        sample_count: 0,
    }
}

/// 回看 window_days 天该模式成功执行的数据点求均值；失败 / 取消的点不计入。
/// 历史库不可用或没有可用数据时退回静态基线
pub async fn load_baseline(
    history: &dyn HistoricalPerformanceStore,
    profile: &PatternProfile,
    window_days: u32,
    timeout_ms: u64,
) -> PerformanceBaseline {
    let points = best_effort(
        "performance history query",
        timeout_ms,
        history.get_performance_history(window_days),
    )
    .await
    .unwrap_or_default();

    let samples: Vec<_> = points
        .iter()
        .filter(|p| p.success && p.pattern == profile.name && p.duration_secs > 0.0)
        .collect();
    if samples.is_empty() {
        return profile_baseline(profile);
    }

    let n = samples.len() as f64;
    let (mut duration, mut quality, mut memory, mut calls) = (0.0, 0.0, 0.0, 0.0);
    for p in &samples {
        duration += p.duration_secs;
        quality += p.quality;
        memory += p.memory_mb;
        calls += p.api_calls as f64;
    }
    let memory_mb = memory / n;
    PerformanceBaseline {
        pattern: profile.name.clone(),
        duration_secs: duration / n,
        quality: quality / n,
        // 历史点没有内存读数时沿用静态值
        memory_mb: if memory_mb > 0.0 {
            memory_mb
        } else {
            profile.baseline.memory_mb
        },
        api_calls: calls / n,
        source: BaselineSource::Historical,
        sample_count: samples.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::knowledge::{InMemoryPerformanceStore, NoopPerformanceStore, PerformanceDataPoint};

    #[tokio::test]
    async fn test_falls_back_to_profile_without_history() {
        let profile = PatternProfile::react();
        let baseline = load_baseline(&NoopPerformanceStore, &profile, 30, 100).await;
        assert_eq!(baseline.source, BaselineSource::Profile);
        assert_eq!(baseline.memory_mb, profile.baseline.memory_mb);
        assert_eq!(baseline.duration_secs, profile.baseline.avg_duration_secs);
    }

    fn point(pattern: &str, duration: f64, quality: f64, success: bool) -> PerformanceDataPoint {
        PerformanceDataPoint {
            timestamp: chrono::Utc::now(),
            execution_id: "e".into(),
            pattern: pattern.into(),
            duration_secs: duration,
            memory_mb: 100.0,
            api_calls: 6,
            quality,
            efficiency: 1.0,
            success,
        }
    }

    #[tokio::test]
    async fn test_averages_matching_history() {
        let store = InMemoryPerformanceStore::default();
        for (pattern, duration) in [("react", 10.0), ("react", 20.0), ("decompose", 99.0)] {
            store.push(point(pattern, duration, 0.7, true));
        }
        let baseline = load_baseline(&store, &PatternProfile::react(), 30, 100).await;
        assert_eq!(baseline.source, BaselineSource::Historical);
        assert_eq!(baseline.sample_count, 2);
        assert!((baseline.duration_secs - 15.0).abs() < 1e-9);
        assert!((baseline.api_calls - 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_runs_do_not_drag_baseline() {
        let store = InMemoryPerformanceStore::default();
        store.push(point("react", 20.0, 0.9, true));
        store.push(point("react", 20.0, 0.9, true));
        // 取消的执行：耗时短，没有质量分
        store.push(point("react", 1.0, 0.0, false));
        store.push(point("react", 300.0, 0.0, false));
        let baseline = load_baseline(&store, &PatternProfile::react(), 30, 100).await;
        assert_eq!(baseline.sample_count, 2);
        assert!((baseline.quality - 0.9).abs() < 1e-9);
        assert!((baseline.duration_secs - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_only_failures_fall_back_to_profile() {
        let store = InMemoryPerformanceStore::default();
        store.push(point("react", 5.0, 0.0, false));
        let profile = PatternProfile::react();
        let baseline = load_baseline(&store, &profile, 30, 100).await;
        assert_eq!(baseline.source, BaselineSource::Profile);
        assert_eq!(baseline.quality, profile.baseline.quality);
    }
}
