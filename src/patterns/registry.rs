//! 模式注册表：名称 -> (档案, 策略)
//!
//! 读多写少。读者拿到的是整张表的 Arc 快照；写入（注册、学习权重）构造新表后整体替换，
//! 读者不会看到更新到一半的档案。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::core::HiveError;
use crate::patterns::{PatternProfile, Strategy};

/// 注册项
#[derive(Clone)]
pub struct RegisteredPattern {
    pub profile: Arc<PatternProfile>,
    pub strategy: Arc<dyn Strategy>,
}

pub type PatternTable = HashMap<String, RegisteredPattern>;

#[derive(Default)]
pub struct PatternRegistry {
    table: RwLock<Arc<PatternTable>>,
}

impl PatternRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册模式；档案名与策略名必须一致
    pub fn register(
        &self,
        profile: PatternProfile,
        strategy: Arc<dyn Strategy>,
    ) -> Result<(), HiveError> {
        if profile.name.trim().is_empty() {
            return Err(HiveError::Validation("pattern name is empty".into()));
        }
        if profile.name != strategy.name() {
            return Err(HiveError::Validation(format!(
                "profile '{}' registered with strategy '{}'",
                profile.name,
                strategy.name()
            )));
        }
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let mut next: PatternTable = (**guard).clone();
        tracing::info!("Registering pattern '{}'", profile.name);
        next.insert(
            profile.name.clone(),
            RegisteredPattern {
                profile: Arc::new(profile),
                strategy,
            },
        );
        *guard = Arc::new(next);
        Ok(())
    }

    /// 当前整张表的快照
    pub fn snapshot(&self) -> Arc<PatternTable> {
        self.table.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, name: &str) -> Option<RegisteredPattern> {
        self.snapshot().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.snapshot().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// 按名称排序的档案列表
    pub fn profiles(&self) -> Vec<Arc<PatternProfile>> {
        let snapshot = self.snapshot();
        let mut profiles: Vec<Arc<PatternProfile>> =
            snapshot.values().map(|p| p.profile.clone()).collect();
        profiles.sort_by(|a, b| a.name.cmp(&b.name));
        profiles
    }

    /// 替换各模式的学习权重（未出现在 weights 中的模式保持不变）
    pub fn apply_weights(&self, weights: &HashMap<String, f64>) {
        let mut guard = self.table.write().unwrap_or_else(|e| e.into_inner());
        let mut next: PatternTable = (**guard).clone();
        for (name, entry) in next.iter_mut() {
            if let Some(weight) = weights.get(name) {
                let mut profile = (*entry.profile).clone();
                profile.weight = *weight;
                entry.profile = Arc::new(profile);
            }
        }
        *guard = Arc::new(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::SimulatedStrategy;

    fn registry() -> PatternRegistry {
        let registry = PatternRegistry::new();
        for profile in PatternProfile::builtin() {
            let strategy = Arc::new(SimulatedStrategy::new(&profile.name));
            registry.register(profile, strategy).unwrap();
        }
        registry
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert!(registry.contains("react"));
        let names: Vec<String> = registry.profiles().iter().map(|p| p.name.clone()).collect();
        assert_eq!(names, vec!["decompose", "plan_execute", "react"]);
    }

    #[test]
    fn test_register_rejects_mismatched_strategy() {
        let registry = PatternRegistry::new();
        let err = registry
            .register(PatternProfile::react(), Arc::new(SimulatedStrategy::new("other")))
            .unwrap_err();
        assert!(matches!(err, HiveError::Validation(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_apply_weights_swaps_snapshot() {
        let registry = registry();
        let before = registry.snapshot();

        let mut weights = HashMap::new();
        weights.insert("react".to_string(), 1.3);
        registry.apply_weights(&weights);

        // 旧快照不受影响
        assert_eq!(before.get("react").unwrap().profile.weight, 1.0);
        assert_eq!(registry.get("react").unwrap().profile.weight, 1.3);
        assert_eq!(registry.get("decompose").unwrap().profile.weight, 1.0);
    }
}
