//! Session registry: at most one live trial per user.
//!
//! The registry maps user id → [`UserSession`]. All mutation happens under a
//! single lock that is never held across an await point.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use hippogym_core::experiment::ExperimentFactory;
use hippogym_core::trial_config::TrialConfig;
use hippogym_core::{HippoError, Result, bucket};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::channels::{InboundSenders, OutboundReceiver, SessionChannels, channel_set};
use crate::recorder::RecordingConfig;
use crate::trial::Trial;

/// A live session as tracked by the registry.
#[derive(Debug)]
pub struct UserSession {
    pub user_id: String,
    pub trial_id: String,
    pub trial_seed: u64,
    pub started_at: DateTime<Utc>,
    worker: JoinHandle<()>,
}

/// Snapshot of a session, safe to hand out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: String,
    pub trial_id: String,
    pub trial_seed: u64,
    pub started_at: DateTime<Utc>,
    pub finished: bool,
}

/// Communicator-side endpoints for a freshly started trial.
#[derive(Debug)]
pub struct SessionLink {
    pub user_id: String,
    pub trial_id: String,
    pub seed: u64,
    pub inbound: InboundSenders,
    pub outbound: OutboundReceiver,
}

pub struct HippoGym {
    config: Arc<TrialConfig>,
    factory: Arc<dyn ExperimentFactory>,
    recording: RecordingConfig,
    sessions: Mutex<HashMap<String, UserSession>>,
    next_seed: AtomicU64,
}

impl HippoGym {
    /// Validates the configuration against `factory` up front so that a
    /// misconfigured server refuses to start instead of failing per user.
    pub fn new(
        config: TrialConfig,
        factory: Arc<dyn ExperimentFactory>,
        recording: RecordingConfig,
    ) -> Result<Self> {
        config.validate(factory.as_ref())?;
        Ok(Self {
            config: Arc::new(config),
            factory,
            recording,
            sessions: Mutex::new(HashMap::new()),
            next_seed: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, UserSession>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create, build and launch a trial for `user_id`.
    ///
    /// Fails with [`HippoError::DuplicateSession`] while the user still has a
    /// session. A rejected duplicate does not consume a seed; a trial that
    /// fails to build does. A trial that is not launched leaves nothing on
    /// disk.
    pub fn start_trial(&self, user_id: &str) -> Result<SessionLink> {
        if user_id.is_empty() {
            return Err(HippoError::MissingUserId);
        }
        if self.sessions().contains_key(user_id) {
            return Err(HippoError::DuplicateSession {
                user_id: user_id.to_string(),
            });
        }

        let seed = self.next_seed.fetch_add(1, Ordering::SeqCst);
        let spec = self.config.sample(seed);
        let mut trial = Trial::new(
            user_id,
            seed,
            spec,
            Arc::clone(&self.factory),
            self.recording.clone(),
        );
        if let Err(e) = trial.build() {
            warn!(user_id, seed, error = %e, "trial failed to build");
            trial.discard();
            return Err(e);
        }
        let (trial_id, session) = self.launch(user_id, trial)?;

        info!(user_id, trial_id = %trial_id, seed, arm = self.config.arm_index(seed), "trial started");
        Ok(SessionLink {
            user_id: user_id.to_string(),
            trial_id,
            seed,
            inbound: session.inbound,
            outbound: session.outbound,
        })
    }

    /// Register a built trial and spawn its worker. Another connection for
    /// the same user may have registered since the pre-check; the losing
    /// trial is discarded.
    fn launch(&self, user_id: &str, trial: Trial) -> Result<(String, SessionChannels)> {
        let trial_id = trial.id().to_string();
        let trial_seed = trial.seed();
        let (session, worker) = channel_set();
        let mut sessions = self.sessions();
        if sessions.contains_key(user_id) {
            drop(sessions);
            trial.discard();
            return Err(HippoError::DuplicateSession {
                user_id: user_id.to_string(),
            });
        }
        let handle = tokio::spawn(trial.run(worker));
        sessions.insert(
            user_id.to_string(),
            UserSession {
                user_id: user_id.to_string(),
                trial_id: trial_id.clone(),
                trial_seed,
                started_at: Utc::now(),
                worker: handle,
            },
        );
        Ok((trial_id, session))
    }

    /// Terminate the user's worker unconditionally and forget the session.
    /// Returns whether a session existed.
    pub fn stop_trial(&self, user_id: &str) -> bool {
        let Some(session) = self.sessions().remove(user_id) else {
            return false;
        };
        session.worker.abort();
        info!(user_id, trial_id = %session.trial_id, seed = session.trial_seed, "trial stopped");
        true
    }

    pub fn is_active(&self, user_id: &str) -> bool {
        self.sessions().contains_key(user_id)
    }

    pub fn session(&self, user_id: &str) -> Option<SessionInfo> {
        self.sessions().get(user_id).map(|s| SessionInfo {
            user_id: s.user_id.clone(),
            trial_id: s.trial_id.clone(),
            trial_seed: s.trial_seed,
            started_at: s.started_at,
            finished: s.worker.is_finished(),
        })
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions().len()
    }

    /// Seed the next trial will receive.
    pub fn next_seed(&self) -> u64 {
        self.next_seed.load(Ordering::SeqCst)
    }

    /// Deterministic assignment of `user_id` to one of the configured arms.
    pub fn group(&self, user_id: &str) -> Result<usize> {
        bucket(user_id, self.config.arm_count())
    }

    /// Stop every live session. Used on shutdown.
    pub fn stop_all(&self) -> usize {
        let drained: Vec<UserSession> = self.sessions().drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.worker.abort();
        }
        if !drained.is_empty() {
            warn!(count = drained.len(), "aborted live trials on shutdown");
        }
        drained.len()
    }
}
