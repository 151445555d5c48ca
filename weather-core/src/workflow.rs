//! Search-and-select workflow.
//!
//! [`Workflow`] owns the state a weather screen renders from and the rules for
//! how user commands and network responses change it:
//!
//! - search queries are debounced; only the newest query ever reaches the provider
//! - every lookup and forecast fetch carries a ticket, and a response whose
//!   ticket has been superseded is dropped on arrival
//! - a forecast fetch always ends in `Ready` or `Failed`, never stays `Loading`
//!
//! Commands change state before they return and hand the network part to a
//! spawned tokio task, so they must be called from inside a runtime.

use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    config::{DEFAULT_CITY, DEFAULT_DEBOUNCE_MS, DEFAULT_REQUEST_TIMEOUT_SECS},
    error::WorkflowError,
    model::{CandidateLocation, ForecastRequest, LocationQuery, MAX_FORECAST_DAYS, WeatherSnapshot},
    provider::WeatherProvider,
    store::{KeyValueStore, LAST_CITY_KEY},
};

/// Queries shorter than this (after trimming) never reach the provider.
pub const MIN_QUERY_CHARS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowOptions {
    pub debounce: Duration,
    pub request_timeout: Duration,
    pub default_city: String,
    pub min_query_chars: usize,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            default_city: DEFAULT_CITY.to_string(),
            min_query_chars: MIN_QUERY_CHARS,
        }
    }
}

/// Where the screen is on the loading/ready axis.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Phase {
    /// Nothing requested yet.
    #[default]
    Cold,
    /// A forecast fetch is pending. `previous` is only kept so a failure can
    /// still offer it as the last known good snapshot.
    Loading { previous: Option<WeatherSnapshot> },
    Ready(WeatherSnapshot),
    Failed { error: WorkflowError, last_good: Option<WeatherSnapshot> },
}

impl Phase {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading { .. })
    }

    /// The snapshot to display, present only in `Ready`.
    pub fn snapshot(&self) -> Option<&WeatherSnapshot> {
        match self {
            Self::Ready(snapshot) => Some(snapshot),
            _ => None,
        }
    }

    pub fn last_known_good(&self) -> Option<&WeatherSnapshot> {
        match self {
            Self::Cold => None,
            Self::Loading { previous } => previous.as_ref(),
            Self::Ready(snapshot) => Some(snapshot),
            Self::Failed { last_good, .. } => last_good.as_ref(),
        }
    }

    pub fn error(&self) -> Option<&WorkflowError> {
        match self {
            Self::Failed { error, .. } => Some(error),
            _ => None,
        }
    }

    fn into_last_good(self) -> Option<WeatherSnapshot> {
        match self {
            Self::Cold => None,
            Self::Loading { previous } => previous,
            Self::Ready(snapshot) => Some(snapshot),
            Self::Failed { last_good, .. } => last_good,
        }
    }
}

/// Everything a presentation layer observes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkflowState {
    pub phase: Phase,
    pub search_visible: bool,
    /// Last text passed to [`Workflow::submit_query`].
    pub query: String,
    /// Non-empty only while `search_visible` is set.
    pub candidates: Vec<CandidateLocation>,
    /// Latest lookup failure; cleared by the next successful lookup.
    pub lookup_error: Option<WorkflowError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOrigin {
    Startup,
    Selection,
}

#[derive(Debug)]
struct Inner {
    provider: Arc<dyn WeatherProvider>,
    store: Arc<dyn KeyValueStore>,
    options: WorkflowOptions,
    state: watch::Sender<WorkflowState>,
    // Tickets are only bumped and compared inside `state` modifications, so the
    // channel's lock orders them against every state change.
    query_ticket: AtomicU64,
    fetch_ticket: AtomicU64,
    initialized: AtomicBool,
    last_fetch: Mutex<Option<(String, FetchOrigin)>>,
}

#[derive(Debug, Clone)]
pub struct Workflow {
    inner: Arc<Inner>,
}

impl Workflow {
    pub fn new(
        provider: Arc<dyn WeatherProvider>,
        store: Arc<dyn KeyValueStore>,
        options: WorkflowOptions,
    ) -> Self {
        let (state, _) = watch::channel(WorkflowState::default());

        Self {
            inner: Arc::new(Inner {
                provider,
                store,
                options,
                state,
                query_ticket: AtomicU64::new(0),
                fetch_ticket: AtomicU64::new(0),
                initialized: AtomicBool::new(false),
                last_fetch: Mutex::new(None),
            }),
        }
    }

    pub fn options(&self) -> &WorkflowOptions {
        &self.inner.options
    }

    /// Copy of the current state.
    pub fn state(&self) -> WorkflowState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkflowState> {
        self.inner.state.subscribe()
    }

    /// Load the remembered city (or the default one). Runs once per workflow.
    pub fn initialize(&self) -> Result<JoinHandle<()>, WorkflowError> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Err(WorkflowError::AlreadyInitialized);
        }

        let default_city = &self.inner.options.default_city;
        let city = match self.inner.store.get(LAST_CITY_KEY) {
            Ok(Some(city)) if !city.trim().is_empty() => city,
            Ok(_) => default_city.clone(),
            Err(err) => {
                warn!(error = %format!("{err:#}"), "failed to read remembered city, using default");
                default_city.clone()
            }
        };

        info!(%city, "initializing weather workflow");
        Ok(self.start_fetch(city, FetchOrigin::Startup, |_| {}))
    }

    /// Feed the search box. Returns the debounce task, or `None` when the
    /// query is too short to look up.
    pub fn submit_query(&self, text: impl Into<String>) -> Option<JoinHandle<()>> {
        let text = text.into();
        let inner = &self.inner;
        let too_short = text.trim().chars().count() < inner.options.min_query_chars;

        let mut ticket = 0;
        inner.state.send_modify(|s| {
            ticket = inner.query_ticket.fetch_add(1, Ordering::SeqCst) + 1;
            s.query.clone_from(&text);
            if too_short {
                s.candidates.clear();
                s.lookup_error = None;
            }
        });

        if too_short {
            debug!(query = %text, "query too short, skipping lookup");
            return None;
        }

        let inner = Arc::clone(&self.inner);
        Some(tokio::spawn(async move { inner.debounced_lookup(ticket, text).await }))
    }

    /// Switch to `candidate`: the screen goes to `Loading` right away and the
    /// search box closes, then the forecast is fetched.
    pub fn select_location(&self, candidate: &CandidateLocation) -> JoinHandle<()> {
        let inner = &self.inner;
        self.start_fetch(candidate.name.clone(), FetchOrigin::Selection, |s| {
            inner.query_ticket.fetch_add(1, Ordering::SeqCst);
            s.search_visible = false;
            s.query.clear();
            s.candidates.clear();
            s.lookup_error = None;
        })
    }

    /// Show or hide the search box; returns the new visibility.
    pub fn toggle_search(&self) -> bool {
        let inner = &self.inner;
        let mut visible = false;
        inner.state.send_modify(|s| {
            s.search_visible = !s.search_visible;
            visible = s.search_visible;
            if !visible {
                inner.query_ticket.fetch_add(1, Ordering::SeqCst);
                s.query.clear();
                s.candidates.clear();
                s.lookup_error = None;
            }
        });
        visible
    }

    /// Repeat the last forecast fetch, e.g. after a failure.
    pub fn retry(&self) -> Option<JoinHandle<()>> {
        let last = self.inner.last_fetch.lock().ok().and_then(|guard| guard.clone());
        let (city, origin) = last?;

        info!(%city, "retrying forecast fetch");
        Some(self.start_fetch(city, origin, |_| {}))
    }

    fn start_fetch(
        &self,
        city: String,
        origin: FetchOrigin,
        also: impl FnOnce(&mut WorkflowState),
    ) -> JoinHandle<()> {
        let inner = &self.inner;

        if let Ok(mut last) = inner.last_fetch.lock() {
            *last = Some((city.clone(), origin));
        }

        let mut ticket = 0;
        inner.state.send_modify(|s| {
            ticket = inner.fetch_ticket.fetch_add(1, Ordering::SeqCst) + 1;
            let previous = std::mem::take(&mut s.phase).into_last_good();
            s.phase = Phase::Loading { previous };
            also(s);
        });

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.fetch_forecast(ticket, city, origin).await })
    }
}

impl Inner {
    async fn debounced_lookup(&self, ticket: u64, text: String) {
        tokio::time::sleep(self.options.debounce).await;

        if self.query_ticket.load(Ordering::SeqCst) != ticket {
            debug!(query = %text, "query superseded during debounce");
            return;
        }
        let visible = self.state.borrow().search_visible;
        if !visible {
            debug!(query = %text, "search hidden, skipping lookup");
            return;
        }

        let query = LocationQuery::new(text.trim());
        debug!(query = %query.text, ticket, "dispatching location lookup");

        let outcome = self
            .with_deadline(
                format!("Location lookup for '{}'", query.text),
                self.provider.search_locations(&query),
                |err| WorkflowError::lookup(&query.text, err),
            )
            .await;

        let failure = outcome.as_ref().err().cloned();
        let committed = self.state.send_if_modified(|s| {
            if self.query_ticket.load(Ordering::SeqCst) != ticket || !s.search_visible {
                return false;
            }
            match outcome {
                Ok(candidates) => {
                    s.candidates = candidates;
                    s.lookup_error = None;
                }
                Err(err) => s.lookup_error = Some(err),
            }
            true
        });

        match (committed, failure) {
            (false, _) => debug!(query = %query.text, ticket, "discarding stale lookup response"),
            (true, Some(err)) => warn!(error = %err, "location lookup failed"),
            (true, None) => debug!(query = %query.text, "candidates updated"),
        }
    }

    async fn fetch_forecast(&self, ticket: u64, city: String, origin: FetchOrigin) {
        let request = ForecastRequest::new(city.clone(), MAX_FORECAST_DAYS);
        debug!(city = %request.city, days = request.days, ticket, "fetching forecast");

        let outcome = self
            .with_deadline(
                format!("Forecast for '{city}'"),
                self.provider.forecast(&request),
                |err| WorkflowError::forecast(&city, err),
            )
            .await;

        let failure = outcome.as_ref().err().cloned();
        let committed = self.state.send_if_modified(|s| {
            if self.fetch_ticket.load(Ordering::SeqCst) != ticket {
                return false;
            }
            let previous = std::mem::take(&mut s.phase).into_last_good();
            s.phase = match outcome {
                Ok(snapshot) => Phase::Ready(snapshot),
                Err(error) => Phase::Failed { error, last_good: previous },
            };
            true
        });

        if !committed {
            debug!(%city, ticket, "discarding stale forecast response");
            return;
        }

        if let Some(err) = failure {
            warn!(error = %err, "forecast fetch failed");
            return;
        }

        info!(%city, "forecast ready");
        if origin == FetchOrigin::Selection {
            self.remember_city(city).await;
        }
    }

    async fn remember_city(&self, city: String) {
        let store = Arc::clone(&self.store);
        let saved = {
            let city = city.clone();
            tokio::task::spawn_blocking(move || store.set(LAST_CITY_KEY, &city)).await
        };

        match saved {
            Ok(Ok(())) => debug!(%city, "remembered selected city"),
            Ok(Err(err)) => {
                warn!(error = %format!("{err:#}"), %city, "failed to remember selected city");
            }
            Err(err) => warn!(error = %err, %city, "city persistence task failed"),
        }
    }

    async fn with_deadline<T>(
        &self,
        operation: String,
        call: impl Future<Output = anyhow::Result<T>>,
        on_error: impl FnOnce(&anyhow::Error) -> WorkflowError,
    ) -> Result<T, WorkflowError> {
        let limit = self.options.request_timeout;
        match tokio::time::timeout(limit, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(on_error(&err)),
            Err(_) => Err(WorkflowError::timeout(operation, limit)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::{Astro, Condition, CurrentConditions, DaySummary, ForecastDay, SnapshotLocation},
        store::MemoryStore,
    };
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::{HashMap, HashSet};
    use tokio::time::sleep;

    #[derive(Debug, Default)]
    struct ScriptedProvider {
        lookups: Mutex<Vec<String>>,
        forecasts: Mutex<Vec<ForecastRequest>>,
        delays: Mutex<HashMap<String, Duration>>,
        failing: Mutex<HashSet<String>>,
    }

    impl ScriptedProvider {
        fn delay(&self, key: &str, by: Duration) {
            self.delays.lock().unwrap().insert(key.to_string(), by);
        }

        fn fail(&self, key: &str, failing: bool) {
            let mut set = self.failing.lock().unwrap();
            if failing {
                set.insert(key.to_string());
            } else {
                set.remove(key);
            }
        }

        fn lookups(&self) -> Vec<String> {
            self.lookups.lock().unwrap().clone()
        }

        fn forecasts(&self) -> Vec<ForecastRequest> {
            self.forecasts.lock().unwrap().clone()
        }

        async fn behave(&self, key: &str) -> anyhow::Result<()> {
            let delay = self.delays.lock().unwrap().get(key).copied();
            if let Some(delay) = delay {
                sleep(delay).await;
            }
            if self.failing.lock().unwrap().contains(key) {
                anyhow::bail!("simulated network failure for {key}");
            }
            Ok(())
        }
    }

    #[async_trait]
    impl WeatherProvider for ScriptedProvider {
        async fn search_locations(
            &self,
            query: &LocationQuery,
        ) -> anyhow::Result<Vec<CandidateLocation>> {
            self.lookups.lock().unwrap().push(query.text.clone());
            self.behave(&query.text).await?;
            Ok(vec![candidate(&query.text)])
        }

        async fn forecast(&self, request: &ForecastRequest) -> anyhow::Result<WeatherSnapshot> {
            self.forecasts.lock().unwrap().push(request.clone());
            self.behave(&request.city).await?;
            Ok(snapshot(&request.city))
        }
    }

    fn candidate(name: &str) -> CandidateLocation {
        CandidateLocation {
            id: None,
            name: name.to_string(),
            region: String::new(),
            country: "Testland".to_string(),
            lat: 0.0,
            lon: 0.0,
            url: None,
        }
    }

    fn snapshot(city: &str) -> WeatherSnapshot {
        let condition = Condition { text: "Sunny".into(), icon: "//icon.png".into() };
        WeatherSnapshot {
            location: SnapshotLocation {
                name: city.to_string(),
                region: String::new(),
                country: "Testland".to_string(),
                localtime: None,
            },
            current: CurrentConditions {
                temp_c: 21.0,
                feels_like_c: 20.0,
                condition: condition.clone(),
                wind_kph: 12.0,
                humidity: 40,
                is_day: true,
            },
            forecast: vec![ForecastDay {
                date: NaiveDate::from_ymd_opt(2024, 6, 3).unwrap(),
                day: DaySummary { avg_temp_c: 19.0, max_temp_c: 24.0, min_temp_c: 13.0, condition },
                astro: Astro { sunrise: "05:00 AM".into(), sunset: "09:00 PM".into() },
            }],
        }
    }

    fn setup(store: MemoryStore) -> (Workflow, Arc<ScriptedProvider>, Arc<MemoryStore>) {
        let provider = Arc::new(ScriptedProvider::default());
        let store = Arc::new(store);
        let workflow =
            Workflow::new(provider.clone(), store.clone(), WorkflowOptions::default());
        (workflow, provider, store)
    }

    fn names(state: &WorkflowState) -> Vec<String> {
        state.candidates.iter().map(|c| c.name.clone()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_uses_remembered_city() {
        let (workflow, provider, store) = setup(MemoryStore::with_value(LAST_CITY_KEY, "Paris"));

        let handle = workflow.initialize().unwrap();
        assert!(workflow.state().phase.is_loading());
        handle.await.unwrap();

        assert_eq!(provider.forecasts(), vec![ForecastRequest::new("Paris", 7)]);
        let state = workflow.state();
        assert_eq!(state.phase.snapshot().unwrap().location.name, "Paris");
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Paris"));
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_falls_back_to_default_and_never_writes() {
        let (workflow, provider, store) = setup(MemoryStore::new());

        workflow.initialize().unwrap().await.unwrap();

        assert_eq!(provider.forecasts(), vec![ForecastRequest::new("London", 7)]);
        assert!(workflow.state().phase.snapshot().is_some());
        assert_eq!(store.get(LAST_CITY_KEY).unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn initialize_runs_only_once() {
        let (workflow, provider, _) = setup(MemoryStore::new());

        workflow.initialize().unwrap().await.unwrap();
        let err = workflow.initialize().unwrap_err();

        assert_eq!(err, WorkflowError::AlreadyInitialized);
        assert_eq!(provider.forecasts().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_initialize_ends_in_failed_phase() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        provider.fail("London", true);

        workflow.initialize().unwrap().await.unwrap();

        let state = workflow.state();
        assert!(!state.phase.is_loading());
        assert!(matches!(
            state.phase,
            Phase::Failed { error: WorkflowError::Forecast { ref city, .. }, last_good: None }
                if city == "London"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn short_queries_clear_candidates_without_lookup() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        workflow.toggle_search();

        workflow.submit_query("London").unwrap().await.unwrap();
        assert_eq!(names(&workflow.state()), vec!["London"]);

        assert!(workflow.submit_query("Lo").is_none());
        assert!(workflow.state().candidates.is_empty());

        assert!(workflow.submit_query("  ab   ").is_none());
        assert_eq!(workflow.state().query, "  ab   ");

        sleep(Duration::from_secs(5)).await;
        assert_eq!(provider.lookups(), vec!["London"]);
    }

    #[tokio::test(start_paused = true)]
    async fn short_query_invalidates_pending_lookup() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        workflow.toggle_search();

        let pending = workflow.submit_query("London").unwrap();
        sleep(Duration::from_millis(300)).await;
        assert!(workflow.submit_query("Lo").is_none());
        pending.await.unwrap();

        assert!(provider.lookups().is_empty());
        assert!(workflow.state().candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn burst_within_quiet_window_sends_one_lookup() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        workflow.toggle_search();

        let first = workflow.submit_query("London").unwrap();
        sleep(Duration::from_millis(500)).await;
        let second = workflow.submit_query("London, UK").unwrap();
        sleep(Duration::from_millis(1100)).await;
        let third = workflow.submit_query("London, UK ").unwrap();

        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();

        assert_eq!(provider.lookups(), vec!["London, UK"]);
        assert_eq!(names(&workflow.state()), vec!["London, UK"]);
    }

    #[tokio::test(start_paused = true)]
    async fn late_response_for_superseded_query_is_dropped() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        provider.delay("Paris", Duration::from_secs(5));
        workflow.toggle_search();

        let slow = workflow.submit_query("Paris").unwrap();
        sleep(Duration::from_millis(1300)).await;
        assert_eq!(provider.lookups(), vec!["Paris"]);

        let fast = workflow.submit_query("Berlin").unwrap();
        fast.await.unwrap();
        assert_eq!(names(&workflow.state()), vec!["Berlin"]);

        slow.await.unwrap();
        assert_eq!(provider.lookups(), vec!["Paris", "Berlin"]);
        assert_eq!(names(&workflow.state()), vec!["Berlin"]);
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_failure_keeps_previous_candidates() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        provider.fail("Lisbon", true);
        workflow.toggle_search();

        workflow.submit_query("London").unwrap().await.unwrap();
        workflow.submit_query("Lisbon").unwrap().await.unwrap();

        let state = workflow.state();
        assert_eq!(names(&state), vec!["London"]);
        assert!(matches!(
            state.lookup_error,
            Some(WorkflowError::Lookup { ref query, .. }) if query == "Lisbon"
        ));

        provider.fail("Lisbon", false);
        workflow.submit_query("Lisbon").unwrap().await.unwrap();
        let state = workflow.state();
        assert_eq!(names(&state), vec!["Lisbon"]);
        assert_eq!(state.lookup_error, None);
    }

    #[tokio::test(start_paused = true)]
    async fn hiding_search_drops_candidates_and_in_flight_results() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        provider.delay("Madrid", Duration::from_secs(2));
        assert!(workflow.toggle_search());

        let pending = workflow.submit_query("Madrid").unwrap();
        sleep(Duration::from_millis(1500)).await;
        assert!(!workflow.toggle_search());
        pending.await.unwrap();

        let state = workflow.state();
        assert!(!state.search_visible);
        assert!(state.candidates.is_empty());
        assert!(state.query.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn query_submitted_while_search_hidden_sends_nothing() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        assert!(!workflow.state().search_visible);

        workflow.submit_query("Madrid").unwrap().await.unwrap();

        assert!(provider.lookups().is_empty());
        assert!(workflow.state().candidates.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn forecasts_always_ask_for_seven_days() {
        let provider = Arc::new(ScriptedProvider::default());
        let options = WorkflowOptions {
            debounce: Duration::from_millis(10),
            default_city: "Lima".into(),
            ..WorkflowOptions::default()
        };
        let workflow = Workflow::new(provider.clone(), Arc::new(MemoryStore::new()), options);

        workflow.initialize().unwrap().await.unwrap();
        workflow.select_location(&candidate("Quito")).await.unwrap();

        assert_eq!(
            provider.forecasts(),
            vec![ForecastRequest::new("Lima", 7), ForecastRequest::new("Quito", 7)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn select_location_switches_to_loading_before_any_response() {
        let (workflow, provider, store) = setup(MemoryStore::new());
        workflow.initialize().unwrap().await.unwrap();
        workflow.toggle_search();
        workflow.submit_query("Rome").unwrap().await.unwrap();

        let picked = workflow.state().candidates[0].clone();
        let handle = workflow.select_location(&picked);

        let state = workflow.state();
        assert!(state.phase.is_loading());
        assert!(!state.search_visible);
        assert!(state.candidates.is_empty());
        assert!(state.query.is_empty());
        assert_eq!(state.phase.last_known_good().unwrap().location.name, "London");

        handle.await.unwrap();

        let state = workflow.state();
        let shown = state.phase.snapshot().unwrap();
        assert_eq!(shown.location.name, "Rome");
        assert!(!shown.forecast.is_empty());
        assert_eq!(provider.forecasts().last(), Some(&ForecastRequest::new("Rome", 7)));
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Rome"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_selection_keeps_last_good_and_skips_persisting() {
        let (workflow, provider, store) = setup(MemoryStore::with_value(LAST_CITY_KEY, "Oslo"));
        provider.fail("Atlantis", true);
        workflow.initialize().unwrap().await.unwrap();

        workflow.select_location(&candidate("Atlantis")).await.unwrap();

        let state = workflow.state();
        assert!(!state.phase.is_loading());
        assert!(state.phase.snapshot().is_none());
        assert!(state.phase.error().is_some_and(WorkflowError::is_network_failure));
        assert_eq!(state.phase.last_known_good().unwrap().location.name, "Oslo");
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Oslo"));
    }

    #[tokio::test(start_paused = true)]
    async fn newer_selection_wins_over_slower_older_one() {
        let (workflow, provider, store) = setup(MemoryStore::new());
        provider.delay("Paris", Duration::from_secs(5));

        let older = workflow.select_location(&candidate("Paris"));
        let newer = workflow.select_location(&candidate("Rome"));

        newer.await.unwrap();
        assert_eq!(workflow.state().phase.snapshot().unwrap().location.name, "Rome");

        older.await.unwrap();
        assert_eq!(workflow.state().phase.snapshot().unwrap().location.name, "Rome");
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Rome"));
    }

    #[tokio::test(start_paused = true)]
    async fn selection_supersedes_pending_initial_load() {
        let (workflow, provider, store) = setup(MemoryStore::new());
        provider.delay("London", Duration::from_secs(3));

        let startup = workflow.initialize().unwrap();
        workflow.select_location(&candidate("Vienna")).await.unwrap();
        startup.await.unwrap();

        assert_eq!(workflow.state().phase.snapshot().unwrap().location.name, "Vienna");
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Vienna"));
    }

    #[tokio::test(start_paused = true)]
    async fn slow_forecast_times_out_instead_of_loading_forever() {
        let (workflow, provider, _) = setup(MemoryStore::new());
        provider.delay("London", Duration::from_secs(60));

        workflow.initialize().unwrap().await.unwrap();

        let state = workflow.state();
        assert!(matches!(state.phase.error(), Some(WorkflowError::Timeout { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn retry_repeats_last_fetch() {
        let (workflow, provider, store) = setup(MemoryStore::new());
        assert!(workflow.retry().is_none());

        provider.fail("London", true);
        workflow.initialize().unwrap().await.unwrap();
        assert!(workflow.state().phase.error().is_some());

        provider.fail("London", false);
        workflow.retry().unwrap().await.unwrap();
        assert_eq!(workflow.state().phase.snapshot().unwrap().location.name, "London");
        assert_eq!(store.get(LAST_CITY_KEY).unwrap(), None);

        provider.fail("Kyiv", true);
        workflow.select_location(&candidate("Kyiv")).await.unwrap();
        provider.fail("Kyiv", false);
        workflow.retry().unwrap().await.unwrap();
        assert_eq!(store.get(LAST_CITY_KEY).unwrap().as_deref(), Some("Kyiv"));
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_see_state_changes() {
        let (workflow, _, _) = setup(MemoryStore::new());
        let mut rx = workflow.subscribe();

        let handle = workflow.initialize().unwrap();
        rx.changed().await.unwrap();
        handle.await.unwrap();
        rx.changed().await.unwrap();

        assert!(rx.borrow_and_update().phase.snapshot().is_some());
    }
}
