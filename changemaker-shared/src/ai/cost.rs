/// Per-workspace AI spend tracking
///
/// Totals are bucketed by UTC day and held in memory, so they reset when the
/// process restarts.

use chrono::{NaiveDate, Utc};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use super::provider::TokenUsage;

/// USD prices per 1 000 tokens
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pricing {
    pub input_per_1k: f64,
    pub output_per_1k: f64,
}

impl Pricing {
    pub fn cost(&self, usage: &TokenUsage) -> f64 {
        (usage.prompt_tokens as f64 / 1000.0) * self.input_per_1k
            + (usage.completion_tokens as f64 / 1000.0) * self.output_per_1k
    }
}

#[derive(Debug, Clone, Copy)]
struct DailyUsage {
    day: NaiveDate,
    requests: u64,
    prompt_tokens: u64,
    completion_tokens: u64,
    cost_usd: f64,
}

impl DailyUsage {
    fn empty(day: NaiveDate) -> Self {
        Self {
            day,
            requests: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            cost_usd: 0.0,
        }
    }
}

/// Today's usage for one workspace
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSnapshot {
    pub workspace_id: Uuid,
    pub day: NaiveDate,
    pub requests: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost_usd: f64,
    pub daily_budget_usd: f64,
    pub remaining_usd: f64,
}

#[derive(Debug)]
pub struct CostTracker {
    pricing: Pricing,
    daily_budget_usd: f64,
    usage: DashMap<Uuid, DailyUsage>,
}

impl CostTracker {
    pub fn new(pricing: Pricing, daily_budget_usd: f64) -> Self {
        Self {
            pricing,
            daily_budget_usd,
            usage: DashMap::new(),
        }
    }

    pub fn pricing(&self) -> Pricing {
        self.pricing
    }

    /// Adds a completed request's usage; returns its cost in USD
    pub fn record(&self, workspace_id: Uuid, usage: &TokenUsage) -> f64 {
        self.record_on(workspace_id, usage, Utc::now().date_naive())
    }

    /// True when today's spend has reached the daily budget
    pub fn would_exceed(&self, workspace_id: Uuid) -> bool {
        self.would_exceed_on(workspace_id, Utc::now().date_naive())
    }

    pub fn snapshot(&self, workspace_id: Uuid) -> UsageSnapshot {
        self.snapshot_on(workspace_id, Utc::now().date_naive())
    }

    fn record_on(&self, workspace_id: Uuid, usage: &TokenUsage, today: NaiveDate) -> f64 {
        let cost = self.pricing.cost(usage);
        let mut entry = self
            .usage
            .entry(workspace_id)
            .or_insert_with(|| DailyUsage::empty(today));

        if entry.day != today {
            *entry = DailyUsage::empty(today);
        }

        entry.requests += 1;
        entry.prompt_tokens += u64::from(usage.prompt_tokens);
        entry.completion_tokens += u64::from(usage.completion_tokens);
        entry.cost_usd += cost;
        cost
    }

    fn would_exceed_on(&self, workspace_id: Uuid, today: NaiveDate) -> bool {
        self.today(workspace_id, today).cost_usd >= self.daily_budget_usd
    }

    fn snapshot_on(&self, workspace_id: Uuid, today: NaiveDate) -> UsageSnapshot {
        let usage = self.today(workspace_id, today);
        UsageSnapshot {
            workspace_id,
            day: usage.day,
            requests: usage.requests,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            cost_usd: usage.cost_usd,
            daily_budget_usd: self.daily_budget_usd,
            remaining_usd: (self.daily_budget_usd - usage.cost_usd).max(0.0),
        }
    }

    fn today(&self, workspace_id: Uuid, today: NaiveDate) -> DailyUsage {
        match self.usage.get(&workspace_id) {
            Some(usage) if usage.day == today => *usage,
            _ => DailyUsage::empty(today),
        }
    }
}
