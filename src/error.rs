use crate::types::{JobId, ResourceId, ScopeId};
use std::{borrow::Cow, time::Duration};
use thiserror::Error;

/// Boxed error returned by failing job bodies.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned while building or finalizing a frame graph.
///
/// All variants are programmer errors in job registration: the frame's
/// build is abandoned and nothing is scheduled.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    /// The dependency graph contains a cycle. `jobs` lists one cycle in
    /// edge order: every job must finish before the next one, and the last
    /// before the first.
    #[error("graph contains a cycle through {}", display_jobs(.jobs))]
    CycleDetected {
        /// Jobs forming the cycle.
        jobs: Vec<JobId>,
    },
    /// A handle produced by a different builder was passed in.
    #[error("{job} belongs to another frame graph")]
    ForeignHandle {
        /// The offending job id.
        job: JobId,
    },
    /// A job id that was never declared in this builder.
    #[error("{job} is not declared in this frame graph")]
    UnknownJob {
        /// The offending job id.
        job: JobId,
    },
    /// A scope id that was never opened in this builder.
    #[error("{scope} is not open in this frame graph")]
    UnknownScope {
        /// The offending scope id.
        scope: ScopeId,
    },
    /// More jobs than a frame graph can index.
    #[error("frame graph exceeds {max} jobs")]
    TooManyJobs {
        /// Upper bound on jobs per frame.
        max: usize,
    },
}

fn display_jobs(jobs: &[JobId]) -> String {
    jobs.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Kind of access a job attempted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    /// Shared read.
    Read,
    /// Exclusive write.
    Write,
}

/// Resource access that breaks the declared read/write contract.
///
/// Detected only by the debug instrumentation, see `AccessChecks`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AccessViolation {
    /// The job touched a resource it did not declare.
    #[error("{job} accessed {resource} ({kind:?}) without declaring it")]
    Undeclared {
        /// Offending job.
        job: JobId,
        /// Resource touched.
        resource: ResourceId,
        /// Attempted access.
        kind: AccessKind,
    },
    /// Two running jobs held conflicting accesses at the same time.
    #[error("{job} ({kind:?}) overlaps {holder} of frame {holder_frame} on {resource}")]
    Overlap {
        /// Job that just started.
        job: JobId,
        /// Job already holding the resource.
        holder: JobId,
        /// Frame `holder` belongs to.
        holder_frame: u64,
        /// Contended resource.
        resource: ResourceId,
        /// Access requested by `job`.
        kind: AccessKind,
    },
}

/// Failure of a single job, collected into the frame's report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum JobError {
    /// The job body returned an error.
    #[error("{job} ({name}) failed: {source}")]
    Failed {
        /// Failing job.
        job: JobId,
        /// Job name.
        name: Cow<'static, str>,
        /// Error returned by the body.
        #[source]
        source: BoxError,
    },
    /// The job body panicked.
    #[error("{job} ({name}) panicked: {message}")]
    Panicked {
        /// Failing job.
        job: JobId,
        /// Job name.
        name: Cow<'static, str>,
        /// Panic payload rendered as text.
        message: String,
    },
    /// The job broke its declared access contract.
    #[error(transparent)]
    ResourceConflict(#[from] AccessViolation),
}

impl JobError {
    /// The job this error belongs to.
    #[must_use]
    pub fn job(&self) -> JobId {
        match self {
            Self::Failed { job, .. } | Self::Panicked { job, .. } => *job,
            Self::ResourceConflict(
                AccessViolation::Undeclared { job, .. } | AccessViolation::Overlap { job, .. },
            ) => *job,
        }
    }
}

/// A frame that finished with failed jobs.
#[derive(Debug, Error)]
#[error("frame {frame} finished with {} failed job(s) in {elapsed:?}", .errors.len())]
pub struct FrameError {
    /// Frame index.
    pub frame: u64,
    /// Wall time of the frame.
    pub elapsed: Duration,
    /// Every recorded job failure.
    pub errors: Vec<JobError>,
}

/// Invalid scheduler configuration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ConfigError {
    /// `workers` was zero.
    #[error("workers must be > 0")]
    NoWorkers,
    /// `steal_tries` was zero.
    #[error("steal_tries must be > 0")]
    NoStealTries,
    /// `park_timeout` was zero.
    #[error("park_timeout must be > 0")]
    ZeroParkTimeout,
    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread {worker}: {message}")]
    Spawn {
        /// Worker index.
        worker: usize,
        /// OS error text.
        message: String,
    },
}
