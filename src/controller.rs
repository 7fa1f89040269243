use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::aggregate::{
    dashboard_stats, popular_topics, sessions_by_date, token_costs, top_users_by_sessions,
    DashboardStats, DateCount, Pricing, TokenCosts, TopicCount, UserSessions,
};
use crate::chart::{ChartRegistry, ChartSeries, SESSIONS_OVER_TIME_CANVAS, TOPICS_CANVAS};
use crate::client::DashboardSource;
use crate::error::{FetchError, SelectError};
use crate::history::{conversation_view, filter_by_search, list_items, ConversationView, SessionListItem};
use crate::session::{Session, User};
use crate::settings::EffectiveSettings;

/// Records fetched by one refresh.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub sessions: Vec<Session>,
    pub users: Vec<User>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum Phase {
    Loading,
    Ready,
    Error { message: String },
}

/// Handed out when a refresh starts; only the newest ticket may apply results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshTicket {
    pub request_id: u64,
    pub include_users: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardData {
    pub fetched_at: DateTime<Utc>,
    pub stats: DashboardStats,
    pub popular_topics: Vec<TopicCount>,
    pub sessions_by_date: Vec<DateCount>,
    pub token_costs: TokenCosts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_users: Option<Vec<UserSessions>>,
    pub sessions: Vec<SessionListItem>,
    pub selected: Option<ConversationView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    #[serde(flatten)]
    pub phase: Phase,
    pub data: Option<DashboardData>,
    pub charts: Option<ChartRegistry>,
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub include_users: bool,
    pub topic_limit: usize,
    pub top_users_limit: usize,
    pub pricing: Pricing,
}

impl From<&EffectiveSettings> for ControllerOptions {
    fn from(s: &EffectiveSettings) -> Self {
        Self {
            include_users: s.include_users,
            topic_limit: s.topic_limit,
            top_users_limit: s.top_users_limit,
            pricing: s.pricing,
        }
    }
}

/// Loading / Ready / Error state machine behind the dashboard.
///
/// The last successful snapshot and the selected session id are kept across
/// refresh cycles, so selection works independently of the fetch phase.
#[derive(Debug)]
pub struct Controller {
    options: ControllerOptions,
    phase: Phase,
    snapshot: Option<Snapshot>,
    selected: Option<String>,
    charts: ChartRegistry,
    latest_request: u64,
}

impl Controller {
    pub fn new(options: ControllerOptions) -> Self {
        Self {
            options,
            phase: Phase::Loading,
            snapshot: None,
            selected: None,
            charts: ChartRegistry::default(),
            latest_request: 0,
        }
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    /// Enters `Loading` for a new request. Earlier in-flight requests become stale.
    pub fn begin_refresh(&mut self) -> RefreshTicket {
        self.latest_request += 1;
        self.phase = Phase::Loading;
        metrics::counter!("dashboard_refresh_total").increment(1);
        info!(request_id = self.latest_request, "dashboard refresh started");
        RefreshTicket { request_id: self.latest_request, include_users: self.options.include_users }
    }

    pub fn apply(&mut self, ticket: RefreshTicket, result: Result<Snapshot, FetchError>) -> ApplyOutcome {
        if ticket.request_id != self.latest_request {
            metrics::counter!("dashboard_stale_results_total").increment(1);
            info!(
                request_id = ticket.request_id,
                latest = self.latest_request,
                "discarding stale refresh result"
            );
            return ApplyOutcome::Stale;
        }
        match result {
            Ok(snapshot) => {
                info!(
                    request_id = ticket.request_id,
                    sessions = snapshot.sessions.len(),
                    users = snapshot.users.len(),
                    "dashboard refresh applied"
                );
                let gone = self
                    .selected
                    .as_ref()
                    .is_some_and(|id| !snapshot.sessions.iter().any(|s| &s.id == id));
                if gone {
                    debug!("selected session no longer present");
                    self.selected = None;
                }
                self.redraw_charts(&snapshot.sessions);
                self.snapshot = Some(snapshot);
                self.phase = Phase::Ready;
            }
            Err(err) => {
                metrics::counter!("dashboard_fetch_failures_total").increment(1);
                warn!(request_id = ticket.request_id, dataset = %err.dataset(), error = %err, "dashboard refresh failed");
                self.phase = Phase::Error { message: err.to_string() };
            }
        }
        ApplyOutcome::Applied
    }

    fn redraw_charts(&mut self, sessions: &[Session]) {
        let topics = popular_topics(sessions, self.options.topic_limit);
        let days = sessions_by_date(sessions);
        for (canvas, series) in [
            (TOPICS_CANVAS, ChartSeries::topics(&topics)),
            (SESSIONS_OVER_TIME_CANVAS, ChartSeries::sessions_over_time(&days)),
        ] {
            if self.charts.replace(canvas, series).is_some() {
                debug!(canvas, "replaced chart series");
            }
        }
    }

    pub fn select(&mut self, session_id: &str) -> Result<ConversationView, SelectError> {
        let snapshot = self.snapshot.as_ref().ok_or(SelectError::NotLoaded)?;
        let session = snapshot
            .sessions
            .iter()
            .find(|s| s.id == session_id)
            .ok_or_else(|| SelectError::UnknownSession(session_id.to_string()))?;
        let view = conversation_view(session);
        self.selected = Some(session.id.clone());
        Ok(view)
    }

    pub fn search(&self, term: &str) -> Vec<SessionListItem> {
        match &self.snapshot {
            Some(snapshot) => filter_by_search(&list_items(&snapshot.sessions), term),
            None => Vec::new(),
        }
    }

    pub fn view(&self) -> DashboardView {
        // charts and data describe the applied snapshot, so both are only shown in Ready
        let (data, charts) = match (&self.phase, &self.snapshot) {
            (Phase::Ready, Some(snapshot)) => (Some(self.data_for(snapshot)), Some(self.charts.clone())),
            _ => (None, None),
        };
        DashboardView { phase: self.phase.clone(), data, charts }
    }

    fn data_for(&self, snapshot: &Snapshot) -> DashboardData {
        let sessions = &snapshot.sessions;
        let selected = self
            .selected
            .as_deref()
            .and_then(|id| sessions.iter().find(|s| s.id == id))
            .map(conversation_view);
        DashboardData {
            fetched_at: snapshot.fetched_at,
            stats: dashboard_stats(sessions),
            popular_topics: popular_topics(sessions, self.options.topic_limit),
            sessions_by_date: sessions_by_date(sessions),
            token_costs: token_costs(sessions, &self.options.pricing),
            top_users: self
                .options
                .include_users
                .then(|| top_users_by_sessions(&snapshot.users, self.options.top_users_limit)),
            sessions: list_items(sessions),
            selected,
        }
    }
}

/// Sessions first, then users when the dashboard shows them.
pub async fn fetch_snapshot(source: &dyn DashboardSource, include_users: bool) -> Result<Snapshot, FetchError> {
    let sessions = source.fetch_sessions().await?;
    let users = if include_users { source.fetch_users().await? } else { Vec::new() };
    Ok(Snapshot { sessions, users, fetched_at: Utc::now() })
}

/// Runs one refresh cycle without holding the lock across the fetch.
pub async fn refresh(controller: &RwLock<Controller>, source: &dyn DashboardSource) -> ApplyOutcome {
    let ticket = controller.write().await.begin_refresh();
    let result = fetch_snapshot(source, ticket.include_users).await;
    controller.write().await.apply(ticket, result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Dataset;
    use crate::session::{Message, Role};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedSource {
        sessions: Result<Vec<Session>, FetchError>,
        users: Vec<User>,
        user_calls: AtomicUsize,
    }

    impl FixedSource {
        fn ok(sessions: Vec<Session>) -> Self {
            Self { sessions: Ok(sessions), users: Vec::new(), user_calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl DashboardSource for FixedSource {
        async fn fetch_sessions(&self) -> Result<Vec<Session>, FetchError> {
            self.sessions.clone()
        }
        async fn fetch_users(&self) -> Result<Vec<User>, FetchError> {
            self.user_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.users.clone())
        }
    }

    fn options(include_users: bool) -> ControllerOptions {
        ControllerOptions { include_users, topic_limit: 6, top_users_limit: 10, pricing: Pricing::default() }
    }

    fn session(id: &str, topic: &str) -> Session {
        Session {
            id: id.into(),
            topic: Some(topic.into()),
            created_at: Some(Utc.with_ymd_and_hms(2024, 4, 1, 9, 30, 0).unwrap()),
            success: true,
            history: vec![Message { role: Role::User, content: "*hola*".into(), tokens: 10, timestamp: None }],
        }
    }

    fn snapshot(sessions: Vec<Session>) -> Snapshot {
        Snapshot { sessions, users: Vec::new(), fetched_at: Utc::now() }
    }

    #[test]
    fn starts_loading_without_data() {
        let c = Controller::new(options(false));
        assert_eq!(c.phase(), &Phase::Loading);
        assert!(c.view().data.is_none());
        assert!(c.search("").is_empty());
    }

    #[test]
    fn stale_results_never_overwrite_newer_ones() {
        let mut c = Controller::new(options(false));
        let first = c.begin_refresh();
        let second = c.begin_refresh();
        assert!(second.request_id > first.request_id);

        assert_eq!(c.apply(second, Ok(snapshot(vec![session("new", "b")]))), ApplyOutcome::Applied);
        assert_eq!(c.apply(first, Ok(snapshot(vec![session("old", "a")]))), ApplyOutcome::Stale);
        assert_eq!(c.snapshot.as_ref().unwrap().sessions[0].id, "new");

        let third = c.begin_refresh();
        let err = FetchError::Status { dataset: Dataset::Sessions, status: 500 };
        assert_eq!(c.apply(first, Err(err.clone())), ApplyOutcome::Stale);
        assert_eq!(c.phase(), &Phase::Loading);
        c.apply(third, Err(err));
        assert!(matches!(c.phase(), Phase::Error { .. }));
    }

    #[test]
    fn error_keeps_message_and_retry_recovers() {
        let mut c = Controller::new(options(false));
        let t = c.begin_refresh();
        c.apply(t, Err(FetchError::Network { dataset: Dataset::Sessions, message: "refused".into() }));
        let view = c.view();
        assert_eq!(view.phase, Phase::Error { message: "Error obteniendo sesiones: refused".into() });
        assert!(view.data.is_none());

        let retry = c.begin_refresh();
        assert_eq!(c.phase(), &Phase::Loading);
        c.apply(retry, Ok(snapshot(vec![session("1", "a")])));
        let data = c.view().data.unwrap();
        assert_eq!(data.stats.total_sessions, 1);
        assert_eq!(data.token_costs.user_tokens, 10);
        assert!(data.top_users.is_none());
    }

    #[test]
    fn selection_formats_history_and_survives_refresh() {
        let mut c = Controller::new(options(false));
        assert_eq!(c.select("1"), Err(SelectError::NotLoaded));

        let t = c.begin_refresh();
        c.apply(t, Ok(snapshot(vec![session("1", "a"), session("2", "b")])));
        let conv = c.select("2").unwrap();
        assert_eq!(conv.messages[0].html, "<em>hola</em>");
        assert_eq!(c.select("zzz"), Err(SelectError::UnknownSession("zzz".into())));
        assert_eq!(c.selected.as_deref(), Some("2"));

        let t = c.begin_refresh();
        c.apply(t, Ok(snapshot(vec![session("2", "b")])));
        assert_eq!(c.view().data.unwrap().selected.unwrap().session_id, "2");

        let t = c.begin_refresh();
        c.apply(t, Ok(snapshot(vec![session("3", "c")])));
        assert_eq!(c.selected, None);
    }

    #[test]
    fn charts_are_replaced_per_canvas() {
        let mut c = Controller::new(options(false));
        for topic in ["a", "b"] {
            let t = c.begin_refresh();
            c.apply(t, Ok(snapshot(vec![session("1", topic)])));
        }
        let view = serde_json::to_value(c.view()).unwrap();
        assert_eq!(view["charts"].as_object().unwrap().len(), 2);
        assert_eq!(view["charts"][TOPICS_CANVAS]["labels"], serde_json::json!(["b"]));
        assert_eq!(view["charts"][SESSIONS_OVER_TIME_CANVAS]["kind"], "line");
    }

    #[test]
    fn failed_refresh_hides_previous_charts() {
        let mut c = Controller::new(options(false));
        let t = c.begin_refresh();
        c.apply(t, Ok(snapshot(vec![session("1", "a")])));
        assert!(c.view().charts.is_some());

        let t = c.begin_refresh();
        assert!(c.view().charts.is_none());
        c.apply(t, Err(FetchError::Status { dataset: Dataset::Sessions, status: 500 }));
        let view = c.view();
        assert!(view.data.is_none());
        assert!(view.charts.is_none());
        assert_eq!(serde_json::to_value(&view).unwrap()["charts"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn refresh_fetches_users_only_when_enabled() {
        let source = FixedSource::ok(vec![session("1", "a")]);
        let without = RwLock::new(Controller::new(options(false)));
        assert_eq!(refresh(&without, &source).await, ApplyOutcome::Applied);
        assert_eq!(source.user_calls.load(Ordering::SeqCst), 0);

        let with = RwLock::new(Controller::new(options(true)));
        refresh(&with, &source).await;
        assert_eq!(source.user_calls.load(Ordering::SeqCst), 1);
        let data = with.read().await.view().data.unwrap();
        assert_eq!(data.top_users, Some(Vec::new()));
    }

    #[tokio::test]
    async fn failed_sessions_fetch_skips_users() {
        let source = FixedSource {
            sessions: Err(FetchError::Status { dataset: Dataset::Sessions, status: 404 }),
            users: Vec::new(),
            user_calls: AtomicUsize::new(0),
        };
        let c = RwLock::new(Controller::new(options(true)));
        refresh(&c, &source).await;
        assert_eq!(source.user_calls.load(Ordering::SeqCst), 0);
        assert!(matches!(c.read().await.phase(), Phase::Error { .. }));
    }
}
