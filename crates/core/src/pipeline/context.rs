//! Per-run service bundle threaded through the executor and stages.
//!
//! Nothing here is global: every run owns its budget tracker, event
//! log, degradation controller, and provider services.

use crate::budget::BudgetTracker;
use crate::config::Settings;
use crate::degrade::{DegradationController, DegradationTier};
use crate::event::EventLog;
use crate::llm::router::RouterEntry;
use crate::llm::ModelRouter;
use crate::scrape::{ExtractorBackend, HttpExtractor, RenderingExtractor, Scraper};
use crate::search::{SearchBackend, SearchService, SearxngBackend, TavilyBackend};
use crate::shutdown::ShutdownCoordinator;
use crate::store::{CheckpointStore, ProgressWriter, RunLayout};
use anyhow::Result;
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct RunContext {
    pub settings: Settings,
    pub layout: RunLayout,
    pub events: Arc<EventLog>,
    pub budget: Arc<BudgetTracker>,
    pub degrade: Arc<Mutex<DegradationController>>,
    pub router: Arc<ModelRouter>,
    pub search: Arc<SearchService>,
    pub scraper: Arc<Scraper>,
    pub checkpoints: CheckpointStore,
    pub progress: ProgressWriter,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl RunContext {
    /// Assemble a context from explicit provider adapters. Tests hand
    /// in stubs here; [`RunContext::from_env`] wires the real ones.
    pub fn assemble(
        settings: Settings,
        layout: RunLayout,
        title: &str,
        llm_entries: Vec<RouterEntry>,
        search_backends: Vec<Arc<dyn SearchBackend>>,
        primary_extractor: Arc<dyn ExtractorBackend>,
        fallback_extractor: Option<Arc<dyn ExtractorBackend>>,
    ) -> Result<Self> {
        layout.ensure()?;

        let events = Arc::new(EventLog::open(layout.events_path())?);
        let budget = Arc::new(BudgetTracker::new(&settings.costs));
        let degrade = Arc::new(Mutex::new(DegradationController::new(DegradationTier::Full)));

        let router = Arc::new(ModelRouter::new(
            llm_entries,
            &settings.llm,
            budget.clone(),
            events.clone(),
            degrade.clone(),
        ));
        let search = Arc::new(SearchService::new(search_backends, settings.search.clone()));
        let scraper = Arc::new(Scraper::new(
            primary_extractor,
            fallback_extractor,
            settings.scrape.clone(),
        ));

        let checkpoints = CheckpointStore::new(layout.root(), settings.checkpoints.max_keep)?;
        let progress = ProgressWriter::open(layout.progress_path(), title)?;

        Ok(Self {
            settings,
            layout,
            events,
            budget,
            degrade,
            router,
            search,
            scraper,
            checkpoints,
            progress,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        })
    }

    /// Wire the real provider adapters from environment credentials.
    pub fn from_env(settings: Settings, layout: RunLayout, title: &str) -> Result<Self> {
        layout.ensure()?;

        let events = Arc::new(EventLog::open(layout.events_path())?);
        let budget = Arc::new(BudgetTracker::new(&settings.costs));
        let degrade = Arc::new(Mutex::new(DegradationController::new(DegradationTier::Full)));

        let router = Arc::new(ModelRouter::from_settings(
            &settings.llm,
            budget.clone(),
            events.clone(),
            degrade.clone(),
        )?);

        let search_timeout = Duration::from_secs(settings.search.timeout_s);
        let mut search_backends: Vec<Arc<dyn SearchBackend>> =
            vec![Arc::new(TavilyBackend::from_env(search_timeout)?)];
        if let Ok(searxng) = SearxngBackend::from_env(search_timeout) {
            search_backends.push(Arc::new(searxng));
        }
        let search = Arc::new(SearchService::new(search_backends, settings.search.clone()));

        let fallback_extractor: Option<Arc<dyn ExtractorBackend>> =
            RenderingExtractor::from_env()
                .ok()
                .map(|e| Arc::new(e) as Arc<dyn ExtractorBackend>);
        let scraper = Arc::new(Scraper::new(
            Arc::new(HttpExtractor::new()?),
            fallback_extractor,
            settings.scrape.clone(),
        ));

        let checkpoints = CheckpointStore::new(layout.root(), settings.checkpoints.max_keep)?;
        let progress = ProgressWriter::open(layout.progress_path(), title)?;

        Ok(Self {
            settings,
            layout,
            events,
            budget,
            degrade,
            router,
            search,
            scraper,
            checkpoints,
            progress,
            shutdown: Arc::new(ShutdownCoordinator::new()),
        })
    }

    /// Current tier as owned by the degradation controller.
    pub fn current_tier(&self) -> DegradationTier {
        self.degrade.lock().expect("degrade lock poisoned").tier()
    }
}
