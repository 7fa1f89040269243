use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::session::{Role, Session, User};

pub const DEFAULT_TOPIC_LIMIT: usize = 6;
pub const DEFAULT_TOP_USERS_LIMIT: usize = 10;
pub const UNKNOWN_USER: &str = "Usuario desconocido";
pub const NO_SECOND_TOPIC: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TopicCount {
    pub topic: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DateCount {
    pub date: NaiveDate,
    pub count: usize,
}

/// Prices in currency units per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub user_per_million: f64,
    pub assistant_per_million: f64,
}

impl Default for Pricing {
    fn default() -> Self {
        Self { user_per_million: 2.5, assistant_per_million: 10.0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenCosts {
    pub user_tokens: u64,
    pub assistant_tokens: u64,
    pub user_cost: String,
    pub assistant_cost: String,
    pub total_cost: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSessions {
    pub name: String,
    pub sessions: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStats {
    pub total_sessions: usize,
    pub successful_sessions: usize,
    pub csat: f64,
    pub top_topic: Option<String>,
    pub second_topic: Option<String>,
}

/// Counts sessions per topic, most popular first. Ties keep first-seen order.
pub fn popular_topics(sessions: &[Session], limit: usize) -> Vec<TopicCount> {
    let mut order: Vec<TopicCount> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for s in sessions {
        let topic = s.topic_label();
        match index.get(topic) {
            Some(&i) => order[i].count += 1,
            None => {
                index.insert(topic, order.len());
                order.push(TopicCount { topic: topic.to_string(), count: 1 });
            }
        }
    }
    // sort_by is stable
    order.sort_by(|a, b| b.count.cmp(&a.count));
    order.truncate(limit);
    order
}

/// Sessions per UTC calendar day, oldest day first. Undated sessions are skipped.
pub fn sessions_by_date(sessions: &[Session]) -> Vec<DateCount> {
    let mut days: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for created in sessions.iter().filter_map(|s| s.created_at) {
        *days.entry(created.date_naive()).or_default() += 1;
    }
    days.into_iter().map(|(date, count)| DateCount { date, count }).collect()
}

/// Percentage of successful sessions, one decimal. Zero for an empty list.
pub fn csat_score(sessions: &[Session]) -> f64 {
    if sessions.is_empty() {
        return 0.0;
    }
    let ok = sessions.iter().filter(|s| s.success).count();
    round_to(ok as f64 / sessions.len() as f64 * 100.0, 1)
}

pub fn token_costs(sessions: &[Session], pricing: &Pricing) -> TokenCosts {
    let (mut user_tokens, mut assistant_tokens) = (0u64, 0u64);
    for m in sessions.iter().flat_map(|s| &s.history) {
        match m.role {
            Role::User => user_tokens = user_tokens.saturating_add(m.tokens),
            Role::Assistant => assistant_tokens = assistant_tokens.saturating_add(m.tokens),
            Role::System | Role::Other => {}
        }
    }
    costs_for(user_tokens, assistant_tokens, pricing)
}

/// Money figures derived from raw token sums, each rounded once to 4 decimals.
pub fn costs_for(user_tokens: u64, assistant_tokens: u64, pricing: &Pricing) -> TokenCosts {
    let user = user_tokens as f64 / 1_000_000.0 * pricing.user_per_million;
    let assistant = assistant_tokens as f64 / 1_000_000.0 * pricing.assistant_per_million;
    TokenCosts {
        user_tokens,
        assistant_tokens,
        user_cost: money(user),
        assistant_cost: money(assistant),
        total_cost: money(user + assistant),
    }
}

pub fn top_users_by_sessions(users: &[User], limit: usize) -> Vec<UserSessions> {
    let mut out: Vec<UserSessions> = users
        .iter()
        .map(|u| UserSessions {
            name: u.nickname.clone().unwrap_or_else(|| UNKNOWN_USER.to_string()),
            sessions: u.session_count,
        })
        .collect();
    out.sort_by(|a, b| b.sessions.cmp(&a.sessions));
    out.truncate(limit);
    out
}

pub fn dashboard_stats(sessions: &[Session]) -> DashboardStats {
    let topics = popular_topics(sessions, 2);
    let top_topic = topics.first().map(|t| t.topic.clone());
    let second_topic = top_topic.as_ref().map(|_| {
        topics.get(1).map(|t| t.topic.clone()).unwrap_or_else(|| NO_SECOND_TOPIC.to_string())
    });
    DashboardStats {
        total_sessions: sessions.len(),
        successful_sessions: sessions.iter().filter(|s| s.success).count(),
        csat: csat_score(sessions),
        top_topic,
        second_topic,
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn money(value: f64) -> String {
    format!("{:.4}", round_to(value, 4))
}
