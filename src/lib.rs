pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::models::policy::AssessmentPolicy;
use crate::services::{
    assessment_service::{AssessmentService, Collaborators},
    media_service::RecordingArchive,
    results_service::{MemoryResultsStore, PgResultsStore},
    scoring_service::{OpenAiScoringOracle, ScoringOracle},
    session_service::{MemorySessionStore, PgSessionStore, SessionService},
    typing_text_service::{MemoryTypingTextRepository, PgTypingTextRepository, TypingTextService},
};
use reqwest::Client;
use sqlx::PgPool;

#[derive(Clone)]
pub struct AppState {
    pub assessment_service: AssessmentService,
    pub session_service: SessionService,
    pub typing_texts: TypingTextService,
}

impl AppState {
    pub fn new(pool: PgPool, config: &Config) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        let policy = config.policy();

        let session_service =
            SessionService::new(Arc::new(PgSessionStore::new(pool.clone())), policy.session_ttl);
        let typing_texts = TypingTextService::new(Arc::new(PgTypingTextRepository::new(pool.clone())));
        let oracle = OpenAiScoringOracle::new(
            config.openai_api_key.clone(),
            config.scoring_api_url.clone(),
            http_client,
        );

        Ok(Self::assemble(
            policy,
            session_service,
            typing_texts,
            Arc::new(PgResultsStore::new(pool)),
            Arc::new(oracle),
            RecordingArchive::new(&config.uploads_dir),
        ))
    }

    /// Database-free state, for tests and local demos.
    pub fn in_memory(
        policy: AssessmentPolicy,
        oracle: Arc<dyn ScoringOracle>,
        uploads_dir: impl Into<std::path::PathBuf>,
    ) -> Self {
        let session_service =
            SessionService::new(Arc::new(MemorySessionStore::default()), policy.session_ttl);
        let typing_texts =
            TypingTextService::new(Arc::new(MemoryTypingTextRepository::default()));
        Self::assemble(
            policy,
            session_service,
            typing_texts,
            Arc::new(MemoryResultsStore::default()),
            oracle,
            RecordingArchive::new(uploads_dir),
        )
    }

    fn assemble(
        policy: AssessmentPolicy,
        session_service: SessionService,
        typing_texts: TypingTextService,
        results: Arc<dyn services::results_service::ResultsStore>,
        oracle: Arc<dyn ScoringOracle>,
        archive: RecordingArchive,
    ) -> Self {
        let collaborators = Collaborators {
            sessions: session_service.clone(),
            validator: Arc::new(session_service.clone()),
            invalidator: Arc::new(session_service.clone()),
            results,
            oracle,
            typing_texts: typing_texts.clone(),
        };
        Self {
            assessment_service: AssessmentService::new(policy, collaborators, archive),
            session_service,
            typing_texts,
        }
    }
}
