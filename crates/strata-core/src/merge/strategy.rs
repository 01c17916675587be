//! Pluggable simple-value merging strategies.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Combines a parent and child simple value into the merged value.
pub trait SimpleValueMergingStrategy: Send + Sync {
    fn merge(&self, parent: Option<&str>, child: Option<&str>) -> Option<String>;
}

impl<F> SimpleValueMergingStrategy for F
where
    F: Fn(Option<&str>, Option<&str>) -> Option<String> + Send + Sync,
{
    fn merge(&self, parent: Option<&str>, child: Option<&str>) -> Option<String> {
        self(parent, child)
    }
}

/// Named strategies, registered at startup and handed to the merge engine.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: BTreeMap<String, Arc<dyn SimpleValueMergingStrategy>>,
}

impl fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("strategies", &self.strategies.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl StrategyRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `non-empty-child`, `concat`, `max-int` and `min-int`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("non-empty-child", non_empty_child);
        registry.register("concat", concat);
        registry.register("max-int", |p: Option<&str>, c: Option<&str>| {
            pick_int(p, c, std::cmp::max)
        });
        registry.register("min-int", |p: Option<&str>, c: Option<&str>| {
            pick_int(p, c, std::cmp::min)
        });
        registry
    }

    pub fn register<S>(&mut self, name: &str, strategy: S)
    where
        S: SimpleValueMergingStrategy + 'static,
    {
        self.strategies.insert(name.to_string(), Arc::new(strategy));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn SimpleValueMergingStrategy>> {
        self.strategies.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.strategies.keys().map(String::as_str)
    }
}

fn non_empty_child(parent: Option<&str>, child: Option<&str>) -> Option<String> {
    match child {
        Some(c) if !c.trim().is_empty() => Some(c.to_string()),
        _ => parent.map(str::to_string),
    }
}

/// Comma-joined union, parent values first.
fn concat(parent: Option<&str>, child: Option<&str>) -> Option<String> {
    let mut values: Vec<&str> = Vec::new();
    for part in parent
        .into_iter()
        .chain(child)
        .flat_map(|v| v.split(','))
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        if !values.contains(&part) {
            values.push(part);
        }
    }
    if values.is_empty() {
        return child.or(parent).map(str::to_string);
    }
    Some(values.join(","))
}

fn pick_int(
    parent: Option<&str>,
    child: Option<&str>,
    pick: fn(i64, i64) -> i64,
) -> Option<String> {
    let p = parent.and_then(|v| v.trim().parse::<i64>().ok());
    let c = child.and_then(|v| v.trim().parse::<i64>().ok());
    match (p, c) {
        (Some(p), Some(c)) => Some(pick(p, c).to_string()),
        (None, Some(_)) => child.map(str::to_string),
        (Some(_), None) => parent.map(str::to_string),
        (None, None) => child.or(parent).map(str::to_string),
    }
}
