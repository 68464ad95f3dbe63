// src/job.rs

use crate::config::SvdConfig;
use crate::error::SvdError;
use crate::frame::PartitionedMatrix;
use crate::store::{ExclusiveLock, ModelStore, StoredValue};
use crate::svd::PowerSvd;
use log::{error, info};
use rand::Rng;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Cooperative cancellation flag shared between a running build and its owner.
///
/// The build polls the flag between power iterations and before every
/// partition task, so a cancel takes effect at the next such point.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(SvdError::Cancelled)` once `cancel` has been called.
    pub fn check(&self) -> Result<(), SvdError> {
        if self.is_cancelled() {
            Err(SvdError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Terminal state of an [`SvdJob`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// The model was published under `model_key`; `u_key` names the left
    /// singular vectors when they were computed.
    Succeeded { model_key: String, u_key: Option<String> },
    /// Cancelled by the owner. Nothing was published.
    Cancelled,
    /// The build failed with the given cause. Nothing was published.
    Failed(String),
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded { .. })
    }
}

/// A single model build against a shared store.
///
/// While running, the job holds exclusive locks on the input key and the
/// destination model key. Locks are released on every exit path, including
/// cancellation and panics raised while reading partitions.
pub struct SvdJob<S: ModelStore + ?Sized> {
    id: String,
    config: SvdConfig,
    store: Arc<S>,
    model_key: String,
    cancel: CancellationToken,
}

impl<S: ModelStore + ?Sized> SvdJob<S> {
    pub fn new(config: SvdConfig, store: Arc<S>, model_key: impl Into<String>) -> Self {
        Self {
            id: format!("SVDJob_{:016x}", rand::thread_rng().gen::<u64>()),
            config,
            store,
            model_key: model_key.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Identifier used as the lock owner.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn model_key(&self) -> &str {
        &self.model_key
    }

    /// A handle that cancels this job from another thread.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Builds the model from `data` (stored under `data_key`) and publishes
    /// it. Never panics; every failure is reported through the status.
    pub fn run<M: PartitionedMatrix + ?Sized>(&self, data_key: &str, data: &M) -> JobStatus {
        let start = Instant::now();
        info!("Job {}: building SVD model '{}' from '{}'", self.id, self.model_key, data_key);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(data_key, data)));
        let status = match outcome {
            Ok(Ok(status)) => status,
            Ok(Err(SvdError::Cancelled)) => {
                info!("Job {}: cancelled by user", self.id);
                JobStatus::Cancelled
            }
            Ok(Err(e)) => {
                error!("Job {}: failed: {}", self.id, e);
                JobStatus::Failed(e.to_string())
            }
            Err(payload) => {
                let cause = panic_message(payload.as_ref());
                error!("Job {}: aborted: {}", self.id, cause);
                JobStatus::Failed(cause)
            }
        };
        info!("Job {}: finished in {:.3?} with {:?}", self.id, start.elapsed(), status);
        status
    }

    fn execute<M: PartitionedMatrix + ?Sized>(&self, data_key: &str, data: &M) -> Result<JobStatus, SvdError> {
        let _data_lock = ExclusiveLock::acquire(&*self.store, data_key, &self.id)?;
        let _model_lock = ExclusiveLock::acquire(&*self.store, &self.model_key, &self.id)?;

        let fit = PowerSvd::new(self.config.clone()).fit_cancellable(data, &self.cancel)?;
        // A cancel that arrives after the last check still discards the results.
        self.cancel.check()?;

        let u_key = fit.left_singular_vectors.as_ref().map(|u| u.key().to_string());
        if let (Some(u), Some(key)) = (fit.left_singular_vectors, u_key.as_deref()) {
            self.store.put(key, StoredValue::LeftVectors(Arc::new(u)));
        }
        self.store.put(&self.model_key, StoredValue::Model(Arc::new(fit.model)));
        Ok(JobStatus::Succeeded { model_key: self.model_key.clone(), u_key })
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unexpected panic during SVD build".to_string()
    }
}
