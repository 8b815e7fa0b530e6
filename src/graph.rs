use crate::{
    error::GraphError,
    fence::{Fence, WaitCounter},
    frame::FrameGate,
    job::{Job, JobContext, JobDesc, JobHandle, JobResult, Priority, ResourceSet},
    types::{HashMap, HashSet, IndexSet, JobId, ResourceId, ScopeId, SyncUnsafeCell},
};
use core::cmp::Reverse;
use derive_more::Debug;
use rustc_hash::FxBuildHasher;
use std::{
    borrow::Cow,
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
};
use unzip3::Unzip3;

/// Upper bound on jobs in one frame graph.
pub const MAX_JOBS: usize = u32::MAX as usize;

/// Serial stamped into every handle so builders can reject each other's.
static NEXT_GRAPH: AtomicU64 = AtomicU64::new(1);

/// Collects one frame's jobs and turns them into an [`ExecutableGraph`].
///
/// Edges come from two places: explicit predecessors (`after`,
/// [`GraphBuilder::add_dependency`]) and hazards derived from the declared
/// read and write sets in declaration order. Two jobs that touch disjoint
/// resources and share no explicit edge are never ordered.
#[must_use]
#[derive(Debug)]
pub struct GraphBuilder {
    serial: u64,
    jobs: Vec<JobDesc>,
    /// Explicit predecessors, indexed by child.
    parents: Vec<IndexSet<JobId>>,
    scopes: u32,
    #[debug(skip)]
    gate: Option<Arc<FrameGate>>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    /// A builder not bound to any scheduler.
    ///
    /// Its graph can still be submitted anywhere. `finalize` does not wait
    /// for conflicting frames; `Scheduler::submit` does.
    pub fn new() -> Self {
        Self::with_gate(None)
    }

    pub(crate) fn with_gate(gate: Option<Arc<FrameGate>>) -> Self {
        Self {
            serial: NEXT_GRAPH.fetch_add(1, Ordering::Relaxed),
            jobs: Vec::new(),
            parents: Vec::new(),
            scopes: 0,
            gate,
        }
    }

    /// Number of jobs declared so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// No job declared yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Declare a job by its callable, read set, write set and explicit
    /// predecessors. Named `"job"` with [`Priority::Normal`]; use
    /// [`GraphBuilder::insert`] for anything else.
    ///
    /// # Errors
    /// If a predecessor belongs to another builder.
    pub fn declare<F>(
        &mut self,
        work: F,
        reads: impl IntoIterator<Item = ResourceId>,
        writes: impl IntoIterator<Item = ResourceId>,
        after: impl IntoIterator<Item = JobHandle>,
    ) -> Result<JobHandle, GraphError>
    where
        F: FnOnce(&JobContext<'_>) -> JobResult + Send + 'static,
    {
        self.insert(
            JobDesc::new("job", work)
                .reads(reads)
                .writes(writes)
                .after(after),
        )
    }

    /// Declare a fully described job.
    ///
    /// # Errors
    /// If a predecessor belongs to another builder, the scope was not opened
    /// by this builder, or the graph is full.
    pub fn insert(&mut self, desc: JobDesc) -> Result<JobHandle, GraphError> {
        if self.jobs.len() >= MAX_JOBS {
            return Err(GraphError::TooManyJobs { max: MAX_JOBS });
        }
        if let Some(scope) = desc.scope.filter(|scope| scope.0 >= self.scopes) {
            return Err(GraphError::UnknownScope { scope });
        }
        let mut parents = IndexSet::with_capacity_and_hasher(desc.after.len(), FxBuildHasher);
        for &handle in &desc.after {
            parents.insert(self.resolve(handle)?);
        }
        let job = JobId::from_index(self.jobs.len());
        self.jobs.push(desc);
        self.parents.push(parents);
        Ok(JobHandle {
            graph: self.serial,
            job,
        })
    }

    /// Require `depends_on` to complete before `job` starts.
    ///
    /// A job depending on itself is accepted here and reported by
    /// [`GraphBuilder::finalize`] as a cycle.
    ///
    /// # Errors
    /// If either handle belongs to another builder.
    pub fn add_dependency(
        &mut self,
        job: JobHandle,
        depends_on: JobHandle,
    ) -> Result<(), GraphError> {
        let child = self.resolve(job)?;
        let parent = self.resolve(depends_on)?;
        self.parents[child.index()].insert(parent);
        Ok(())
    }

    /// Open a scope. Jobs declared with [`JobDesc::in_scope`] count into its
    /// fence, which reaches zero once all of them completed.
    pub fn scope(&mut self) -> ScopeId {
        let scope = ScopeId(self.scopes);
        self.scopes = self
            .scopes
            .checked_add(1)
            .expect("GraphBuilder::scope: too many scopes");
        scope
    }

    fn resolve(&self, handle: JobHandle) -> Result<JobId, GraphError> {
        if handle.graph != self.serial {
            return Err(GraphError::ForeignHandle { job: handle.job });
        }
        if handle.job.index() >= self.jobs.len() {
            return Err(GraphError::UnknownJob { job: handle.job });
        }
        Ok(handle.job)
    }

    /// Validate the graph and freeze it for one submission.
    ///
    /// Derives hazard edges, merges them with the explicit ones and
    /// topologically sorts the result. A builder obtained from
    /// `Scheduler::build_frame_graph` then blocks until every frame still in
    /// flight on that scheduler with a conflicting access has finished.
    ///
    /// # Panics
    /// In case of internal invariant violations. Impossible if there are no
    /// bugs in the code.
    ///
    /// # Errors
    /// If the edges form a cycle. The builder is consumed either way.
    #[allow(clippy::too_many_lines)]
    pub fn finalize(self) -> Result<ExecutableGraph, GraphError> {
        let Self {
            serial,
            mut jobs,
            mut parents,
            scopes,
            gate,
        } = self;
        let len = jobs.len();

        // Phase 1: Normalize access sets. A resource both read and written
        // is a write.
        for desc in &mut jobs {
            desc.writes.sort_unstable();
            desc.writes.dedup();
            desc.reads.sort_unstable();
            desc.reads.dedup();
            let writes = &desc.writes;
            desc.reads.retain(|r| writes.binary_search(r).is_err());
        }

        // Phase 2: Hazard edges, in declaration order.
        //
        //   w(A)   r(A)   r(A)   w(A)
        //    0  ->  1
        //    0  ---------> 2
        //    0, 1, 2 -------------> 3
        //
        // RAW: last writer -> reader. WAW: last writer -> writer.
        // WAR: every reader since the last write -> writer.
        #[derive(Default)]
        struct Hazard {
            writer: Option<JobId>,
            readers: Vec<JobId>,
        }
        let mut hazards: HashMap<ResourceId, Hazard> = HashMap::default();
        for (index, desc) in jobs.iter().enumerate() {
            let job = JobId::from_index(index);
            let deps = &mut parents[index];
            for &resource in &desc.reads {
                let hazard = hazards.entry(resource).or_default();
                if let Some(writer) = hazard.writer {
                    deps.insert(writer);
                }
                hazard.readers.push(job);
            }
            for &resource in &desc.writes {
                let hazard = hazards.entry(resource).or_default();
                if let Some(writer) = hazard.writer {
                    deps.insert(writer);
                }
                deps.extend(hazard.readers.drain(..));
                hazard.writer = Some(job);
            }
        }
        drop(hazards);

        // Phase 3: Reverse the edges. Children end up in index order.
        let mut children: Vec<Vec<JobId>> = vec![Vec::new(); len];
        for (index, deps) in parents.iter().enumerate() {
            let child = JobId::from_index(index);
            for parent in deps {
                children[parent.index()].push(child);
            }
        }

        // Phase 4: Kahn. Whatever is left unplaced sits on or behind a cycle.
        let mut left: Vec<usize> = parents.iter().map(IndexSet::len).collect();
        let mut roots: Vec<JobId> = (0..len)
            .filter(|&i| left[i] == 0)
            .map(JobId::from_index)
            .collect();
        let mut queue: VecDeque<JobId> = roots.iter().copied().collect();
        let mut order = Vec::with_capacity(len);
        while let Some(job) = queue.pop_front() {
            order.push(job);
            for &child in &children[job.index()] {
                let count = &mut left[child.index()];
                *count = count.checked_sub(1).expect("GraphBuilder::finalize: [1]");
                if *count == 0 {
                    queue.push_back(child);
                }
            }
        }
        if order.len() != len {
            return Err(GraphError::CycleDetected {
                jobs: find_cycle(&parents, &left),
            });
        }

        // Phase 5: Ready order among roots: priority first, then declaration.
        roots.sort_by_key(|job| Reverse(jobs[job.index()].priority));

        // Phase 6: Union of accesses, for gating later frames.
        let mut access = AccessSets::default();
        for desc in &jobs {
            access.reads.extend(desc.reads.iter().copied());
            access.writes.extend(desc.writes.iter().copied());
        }

        // Phase 7: Materialize slots and counters. An edge is "owned" when
        // the child has no other parent: it becomes ready without touching
        // its counter.
        let mut scope_sizes = vec![0usize; scopes as usize];
        let (slots, counters, links): (Vec<JobSlot>, Vec<WaitCounter>, Vec<Children>) = jobs
            .into_iter()
            .zip(&parents)
            .zip(&children)
            .map(|((desc, deps), kids)| {
                if let Some(scope) = desc.scope {
                    scope_sizes[scope.0 as usize] += 1;
                }
                let (owned, shared): (Vec<JobId>, Vec<JobId>) = kids
                    .iter()
                    .copied()
                    .partition(|child| parents[child.index()].len() == 1);
                let total = u32::try_from(deps.len()).expect("GraphBuilder::finalize: [2]");
                (
                    JobSlot::new(desc),
                    WaitCounter::new(total),
                    Children {
                        owned: owned.into_boxed_slice(),
                        shared: shared.into_boxed_slice(),
                    },
                )
            })
            .unzip3();

        let parents = parents
            .into_iter()
            .map(|deps| {
                let mut deps: Vec<JobId> = deps.into_iter().collect();
                deps.sort_unstable();
                deps.into_boxed_slice()
            })
            .collect();
        let graph = ExecutableGraph {
            serial,
            slots: slots.into_boxed_slice(),
            counters: counters.into_boxed_slice(),
            children: links.into_boxed_slice(),
            parents,
            dependents: children.into_iter().map(Vec::into_boxed_slice).collect(),
            roots: roots.into_boxed_slice(),
            order: order.into_boxed_slice(),
            scopes: scope_sizes.into_iter().map(Fence::new).collect(),
            access,
        };
        assert_eq!(graph.slots.len(), graph.counters.len(), "GraphBuilder::finalize: [3]");
        assert_eq!(graph.slots.len(), graph.children.len(), "GraphBuilder::finalize: [4]");
        if !graph.is_empty() {
            assert!(!graph.roots.is_empty(), "GraphBuilder::finalize: [5]");
        }

        // Phase 8: Frame gate.
        if let Some(gate) = gate {
            gate.wait_for_hazards(&graph.access.reads, &graph.access.writes);
        }
        tracing::trace!(
            graph = serial,
            jobs = graph.len(),
            roots = graph.roots.len(),
            "frame graph finalized"
        );
        Ok(graph)
    }
}

/// Walk unplaced predecessors from an unplaced job until a job repeats.
///
/// Every unplaced job has at least one unplaced parent, so the walk always
/// closes. The cycle is returned in edge order starting from its lowest id.
fn find_cycle(parents: &[IndexSet<JobId>], left: &[usize]) -> Vec<JobId> {
    let unplaced = |job: JobId| left[job.index()] > 0;
    let start = (0..left.len())
        .map(JobId::from_index)
        .find(|&job| unplaced(job))
        .expect("find_cycle: [1]");
    let mut seen: HashMap<JobId, usize> = HashMap::default();
    let mut path = Vec::new();
    let mut job = start;
    let cycle_start = loop {
        if let Some(&pos) = seen.get(&job) {
            break pos;
        }
        seen.insert(job, path.len());
        path.push(job);
        job = parents[job.index()]
            .iter()
            .copied()
            .find(|&parent| unplaced(parent))
            .expect("find_cycle: [2]");
    };
    let mut cycle = path.split_off(cycle_start);
    cycle.reverse();
    let lowest = cycle
        .iter()
        .enumerate()
        .min_by_key(|(_, job)| **job)
        .map_or(0, |(pos, _)| pos);
    cycle.rotate_left(lowest);
    cycle
}

/// Lifecycle of a job inside one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum JobState {
    Pending = 0,
    Ready = 1,
    Running = 2,
    Completed = 3,
}

impl JobState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Pending,
            1 => Self::Ready,
            2 => Self::Running,
            3 => Self::Completed,
            _ => unreachable!("JobState::from_u8: {raw}"),
        }
    }
}

/// Everything a worker needs to run one job.
#[derive(Debug)]
pub(crate) struct JobSlot {
    pub(crate) name: Cow<'static, str>,
    pub(crate) priority: Priority,
    pub(crate) reads: ResourceSet,
    pub(crate) writes: ResourceSet,
    pub(crate) scope: Option<ScopeId>,
    state: AtomicU8,
    /// Taken by the worker that wins the `Ready -> Running` transition.
    #[debug(skip)]
    body: SyncUnsafeCell<Option<Box<dyn Job>>>,
}

impl JobSlot {
    fn new(desc: JobDesc) -> Self {
        let JobDesc {
            name,
            priority,
            reads,
            writes,
            after: _,
            scope,
            body,
        } = desc;
        Self {
            name,
            priority,
            reads,
            writes,
            scope,
            state: AtomicU8::new(JobState::Pending as u8),
            body: SyncUnsafeCell::new(Some(body)),
        }
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> JobState {
        JobState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move the job from `from` to `to`.
    ///
    /// # Panics
    /// If the job is not in state `from`: some job was scheduled twice or
    /// before its predecessors finished.
    pub(crate) fn transition(&self, job: JobId, from: JobState, to: JobState) {
        if let Err(actual) =
            self.state
                .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
        {
            panic!(
                "{job} ({}): illegal transition {from:?} -> {to:?} from {:?}",
                self.name,
                JobState::from_u8(actual)
            );
        }
    }

    /// Take the job's body.
    ///
    /// # Safety
    /// The caller must have performed the `Ready -> Running` transition of
    /// this slot; that transition succeeds for one thread only.
    pub(crate) unsafe fn take_body(&self) -> Option<Box<dyn Job>> {
        // SAFETY: exclusive access is guaranteed by the caller.
        unsafe { (*self.body.get()).take() }
    }
}

/// Successors of a job, split by whether they need a counter decrement.
#[derive(Debug, Default)]
pub(crate) struct Children {
    /// Children whose only parent is this job.
    pub(crate) owned: Box<[JobId]>,
    /// Children with other parents too.
    pub(crate) shared: Box<[JobId]>,
}

/// Union of every job's declared accesses.
#[derive(Debug, Default)]
pub(crate) struct AccessSets {
    pub(crate) reads: HashSet<ResourceId>,
    pub(crate) writes: HashSet<ResourceId>,
}

/// A validated, acyclic frame graph ready for submission.
///
/// Runs once: submitting consumes it. Build a new one every frame.
#[must_use]
#[derive(Debug)]
pub struct ExecutableGraph {
    serial: u64,
    pub(crate) slots: Box<[JobSlot]>,
    pub(crate) counters: Box<[WaitCounter]>,
    pub(crate) children: Box<[Children]>,
    parents: Box<[Box<[JobId]>]>,
    dependents: Box<[Box<[JobId]>]>,
    roots: Box<[JobId]>,
    order: Box<[JobId]>,
    pub(crate) scopes: Box<[Fence]>,
    pub(crate) access: AccessSets,
}

impl ExecutableGraph {
    /// Serial of the builder this graph came from.
    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }

    /// Number of jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No jobs at all. Submitting such a graph completes immediately.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Jobs without predecessors, in the order they are seeded: priority
    /// descending, then declaration order.
    #[must_use]
    pub fn roots(&self) -> &[JobId] {
        &self.roots
    }

    /// One valid execution order.
    #[must_use]
    pub fn topological_order(&self) -> &[JobId] {
        &self.order
    }

    /// Direct predecessors of `job`, explicit and hazard-derived, sorted.
    ///
    /// # Panics
    /// If `job` is not part of this graph.
    #[must_use]
    pub fn dependencies_of(&self, job: JobId) -> &[JobId] {
        &self.parents[job.index()]
    }

    /// Direct successors of `job`, sorted.
    ///
    /// # Panics
    /// If `job` is not part of this graph.
    #[must_use]
    pub fn dependents_of(&self, job: JobId) -> &[JobId] {
        &self.dependents[job.index()]
    }

    /// Name `job` was declared with.
    ///
    /// # Panics
    /// If `job` is not part of this graph.
    #[must_use]
    pub fn name_of(&self, job: JobId) -> &str {
        &self.slots[job.index()].name
    }

    /// Fence of a scope opened on the builder. Clone it before submitting to
    /// wait on the sub-graph independently of the frame.
    #[must_use]
    pub fn scope_fence(&self, scope: ScopeId) -> Option<Fence> {
        self.scopes.get(scope.0 as usize).cloned()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    const A: ResourceId = ResourceId::new(0xa);
    const B: ResourceId = ResourceId::new(0xb);

    fn noop(_: &JobContext<'_>) -> JobResult {
        Ok(())
    }

    fn ids(handles: &[JobHandle]) -> Vec<JobId> {
        handles.iter().map(|h| h.id()).collect()
    }

    #[test]
    fn hazard_edges_follow_declaration_order() {
        let mut builder = GraphBuilder::new();
        let w0 = builder.declare(noop, [], [A], []).unwrap();
        let r1 = builder.declare(noop, [A], [], []).unwrap();
        let r2 = builder.declare(noop, [A], [], []).unwrap();
        let w3 = builder.declare(noop, [], [A], []).unwrap();
        let r4 = builder.declare(noop, [A], [], []).unwrap();
        let graph = builder.finalize().unwrap();

        assert!(graph.dependencies_of(w0.id()).is_empty());
        assert_eq!(graph.dependencies_of(r1.id()), ids(&[w0]).as_slice());
        assert_eq!(graph.dependencies_of(r2.id()), ids(&[w0]).as_slice());
        assert_eq!(graph.dependencies_of(w3.id()), ids(&[w0, r1, r2]).as_slice());
        assert_eq!(graph.dependencies_of(r4.id()), ids(&[w3]).as_slice());
        assert_eq!(graph.roots(), ids(&[w0]).as_slice());
        assert_eq!(graph.dependents_of(w0.id()), ids(&[r1, r2, w3]).as_slice());
    }

    #[test]
    fn disjoint_resources_stay_unordered() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [A], []).unwrap();
        let b = builder.declare(noop, [], [B], []).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.roots(), ids(&[a, b]).as_slice());
        assert!(graph.dependents_of(a.id()).is_empty());
    }

    #[test]
    fn read_and_write_of_same_resource_is_a_write() {
        let mut builder = GraphBuilder::new();
        let rw0 = builder.declare(noop, [A], [A], []).unwrap();
        let rw1 = builder.declare(noop, [A, A], [A], []).unwrap();
        let r2 = builder.declare(noop, [A], [], []).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.dependencies_of(rw1.id()), ids(&[rw0]).as_slice());
        assert_eq!(graph.dependencies_of(r2.id()), ids(&[rw1]).as_slice());
    }

    #[test]
    fn explicit_edges_are_deduplicated() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [], []).unwrap();
        let b = builder.declare(noop, [], [], [a, a]).unwrap();
        builder.add_dependency(b, a).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.dependencies_of(b.id()), ids(&[a]).as_slice());
        assert_eq!(graph.topological_order(), ids(&[a, b]).as_slice());
    }

    #[test]
    fn explicit_edge_to_later_job_reorders() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [], []).unwrap();
        let b = builder.declare(noop, [], [], []).unwrap();
        builder.add_dependency(a, b).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.roots(), ids(&[b]).as_slice());
        assert_eq!(graph.topological_order(), ids(&[b, a]).as_slice());
    }

    #[test]
    fn cycle_is_reported_with_its_jobs() {
        let mut builder = GraphBuilder::new();
        let free = builder.declare(noop, [], [], []).unwrap();
        let a = builder.declare(noop, [], [], []).unwrap();
        let b = builder.declare(noop, [], [], [a]).unwrap();
        let c = builder.declare(noop, [], [], [b]).unwrap();
        builder.declare(noop, [], [], [c, free]).unwrap();
        builder.add_dependency(a, c).unwrap();
        let err = builder.finalize().unwrap_err();
        assert_eq!(
            err,
            GraphError::CycleDetected {
                jobs: ids(&[a, b, c])
            }
        );
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [], []).unwrap();
        builder.add_dependency(a, a).unwrap();
        assert_eq!(
            builder.finalize().unwrap_err(),
            GraphError::CycleDetected { jobs: ids(&[a]) }
        );
    }

    #[test]
    fn foreign_handles_are_rejected() {
        let mut other = GraphBuilder::new();
        let foreign = other.declare(noop, [], [], []).unwrap();
        let mut builder = GraphBuilder::new();
        let local = builder.declare(noop, [], [], []).unwrap();
        assert_eq!(
            builder.declare(noop, [], [], [foreign]).unwrap_err(),
            GraphError::ForeignHandle { job: foreign.id() }
        );
        assert_eq!(
            builder.add_dependency(local, foreign).unwrap_err(),
            GraphError::ForeignHandle { job: foreign.id() }
        );
        assert_eq!(builder.len(), 1);
    }

    #[test]
    fn unknown_scope_is_rejected() {
        let mut builder = GraphBuilder::new();
        let scope = ScopeId(3);
        assert_eq!(
            builder
                .insert(JobDesc::new("scoped", noop).in_scope(scope))
                .unwrap_err(),
            GraphError::UnknownScope { scope }
        );
    }

    #[test]
    fn roots_are_ordered_by_priority_then_declaration() {
        let mut builder = GraphBuilder::new();
        let low = builder
            .insert(JobDesc::new("low", noop).priority(Priority::Low))
            .unwrap();
        let normal = builder.insert(JobDesc::new("normal", noop)).unwrap();
        let critical = builder
            .insert(JobDesc::new("critical", noop).priority(Priority::Critical))
            .unwrap();
        let normal2 = builder.insert(JobDesc::new("normal2", noop)).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.roots(), ids(&[critical, normal, normal2, low]).as_slice());
        assert_eq!(graph.name_of(critical.id()), "critical");
    }

    #[test]
    fn children_split_by_parent_count() {
        // a   b
        //  \ /
        //   c
        //   |
        //   d
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [], []).unwrap();
        let b = builder.declare(noop, [], [], []).unwrap();
        let c = builder.declare(noop, [], [], [a, b]).unwrap();
        let d = builder.declare(noop, [], [], [c]).unwrap();
        let graph = builder.finalize().unwrap();
        let links = &graph.children[a.id().index()];
        assert!(links.owned.is_empty());
        assert_eq!(&*links.shared, &[c.id()]);
        assert_eq!(&*graph.children[c.id().index()].owned, &[d.id()]);
        assert_eq!(graph.counters[c.id().index()].total(), 2);
        assert_eq!(graph.counters[d.id().index()].total(), 1);
    }

    #[test]
    fn scope_fences_count_their_jobs() {
        let mut builder = GraphBuilder::new();
        let physics = builder.scope();
        let empty = builder.scope();
        for _ in 0..3 {
            builder
                .insert(JobDesc::new("integrate", noop).in_scope(physics))
                .unwrap();
        }
        builder.declare(noop, [], [], []).unwrap();
        let graph = builder.finalize().unwrap();
        assert_eq!(graph.scope_fence(physics).unwrap().remaining(), 3);
        assert!(graph.scope_fence(empty).unwrap().is_done());
        assert!(graph.scope_fence(ScopeId(9)).is_none());
    }

    #[test]
    fn empty_graph_finalizes() {
        let graph = GraphBuilder::new().finalize().unwrap();
        assert!(graph.is_empty());
        assert!(graph.roots().is_empty());
    }

    #[test]
    fn illegal_transition_panics() {
        let mut builder = GraphBuilder::new();
        let a = builder.declare(noop, [], [], []).unwrap();
        let graph = builder.finalize().unwrap();
        let slot = &graph.slots[a.id().index()];
        slot.transition(a.id(), JobState::Pending, JobState::Ready);
        assert_eq!(slot.state(), JobState::Ready);
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            slot.transition(a.id(), JobState::Pending, JobState::Ready);
        }));
        assert!(result.is_err());
    }
}
