use crate::{
    error::{AccessKind, AccessViolation, BoxError},
    types::{JobId, ResourceId, ScopeId},
};
use derive_more::Debug;
use smallvec::SmallVec;
use std::borrow::Cow;

/// Result returned by a job body.
pub type JobResult = Result<(), BoxError>;

/// Inline capacity of a job's read or write set.
pub(crate) type ResourceSet = SmallVec<[ResourceId; 4]>;

/// Scheduling hint. Influences queue placement only, never correctness: a
/// lower-priority job may still run before a higher-priority one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    /// Background work.
    Low = 0,
    /// Regular work.
    #[default]
    Normal = 1,
    /// Render-critical work.
    High = 2,
    /// Work that gates the end of the frame.
    Critical = 3,
}

/// A single unit of work in a frame graph.
///
/// Runs exactly once, on whichever worker claims it, after every
/// predecessor has completed. A job must not block on another job of the
/// same frame: split it in two and join them with a dependency edge.
///
/// Implemented for every `FnOnce(&JobContext) -> JobResult` closure.
pub trait Job: Send + 'static {
    /// Execute the job.
    ///
    /// # Errors
    /// Any error is recorded in the frame report; sibling jobs and
    /// dependents still run.
    fn run(self: Box<Self>, ctx: &JobContext<'_>) -> JobResult;
}

impl<F> Job for F
where
    F: FnOnce(&JobContext<'_>) -> JobResult + Send + 'static,
{
    fn run(self: Box<Self>, ctx: &JobContext<'_>) -> JobResult {
        (*self)(ctx)
    }
}

/// Opaque, copyable reference to a declared job.
///
/// Only valid for the builder that produced it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct JobHandle {
    pub(crate) graph: u64,
    pub(crate) job: JobId,
}

impl JobHandle {
    /// Id of the job inside its frame graph.
    #[must_use]
    pub fn id(self) -> JobId {
        self.job
    }
}

/// Declaration of one job: its callable plus the data it touches.
///
/// The read and write sets are the only sanctioned mutation contract; the
/// graph derives hazard edges from them.
#[must_use]
#[derive(Debug)]
pub struct JobDesc {
    pub(crate) name: Cow<'static, str>,
    pub(crate) priority: Priority,
    pub(crate) reads: ResourceSet,
    pub(crate) writes: ResourceSet,
    pub(crate) after: Vec<JobHandle>,
    pub(crate) scope: Option<ScopeId>,
    #[debug(skip)]
    pub(crate) body: Box<dyn Job>,
}

impl JobDesc {
    /// Describe a job named `name` running the closure `work`.
    pub fn new<F>(name: impl Into<Cow<'static, str>>, work: F) -> Self
    where
        F: FnOnce(&JobContext<'_>) -> JobResult + Send + 'static,
    {
        Self::from_job(name, work)
    }

    /// Describe a job named `name` running a [`Job`] implementor.
    pub fn from_job(name: impl Into<Cow<'static, str>>, work: impl Job) -> Self {
        Self {
            name: name.into(),
            priority: Priority::Normal,
            reads: ResourceSet::new(),
            writes: ResourceSet::new(),
            after: Vec::new(),
            scope: None,
            body: Box::new(work),
        }
    }

    /// Add resources the job reads.
    pub fn reads(mut self, resources: impl IntoIterator<Item = ResourceId>) -> Self {
        self.reads.extend(resources);
        self
    }

    /// Add resources the job writes.
    pub fn writes(mut self, resources: impl IntoIterator<Item = ResourceId>) -> Self {
        self.writes.extend(resources);
        self
    }

    /// Add explicit predecessors.
    pub fn after(mut self, jobs: impl IntoIterator<Item = JobHandle>) -> Self {
        self.after.extend(jobs);
        self
    }

    /// Set the scheduling hint.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Count this job into a scope fence.
    pub fn in_scope(mut self, scope: ScopeId) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// What a running job knows about itself.
#[derive(Debug)]
pub struct JobContext<'a> {
    pub(crate) job: JobId,
    pub(crate) name: &'a str,
    pub(crate) frame: u64,
    pub(crate) worker: usize,
    pub(crate) reads: &'a [ResourceId],
    pub(crate) writes: &'a [ResourceId],
    pub(crate) checks: bool,
}

impl JobContext<'_> {
    /// Id of the running job.
    #[must_use]
    pub fn job(&self) -> JobId {
        self.job
    }

    /// Name the job was declared with.
    #[must_use]
    pub fn name(&self) -> &str {
        self.name
    }

    /// Index of the frame the job belongs to.
    #[must_use]
    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Worker thread executing the job.
    #[must_use]
    pub fn worker(&self) -> usize {
        self.worker
    }

    /// Announce a read of `resource`.
    ///
    /// With access checks enabled, an undeclared read aborts the job and is
    /// reported as [`crate::error::JobError::ResourceConflict`]. Declared
    /// writes also permit reads.
    pub fn read(&self, resource: ResourceId) {
        if self.checks && !self.reads.contains(&resource) && !self.writes.contains(&resource) {
            self.violate(resource, AccessKind::Read);
        }
    }

    /// Announce a write of `resource`. See [`JobContext::read`].
    pub fn write(&self, resource: ResourceId) {
        if self.checks && !self.writes.contains(&resource) {
            self.violate(resource, AccessKind::Write);
        }
    }

    fn violate(&self, resource: ResourceId, kind: AccessKind) -> ! {
        std::panic::panic_any(AccessViolation::Undeclared {
            job: self.job,
            resource,
            kind,
        })
    }
}
