#![allow(missing_docs)]
#![cfg(not(feature = "loom"))]

use fjs::{GraphBuilder, GraphError, JobHandle, ResourceId, Scheduler, SchedulerConfig};
use proptest::{prelude::*, sample::Index};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

const PROPTEST_CASES: u32 = 48;
const RESOURCES: u64 = 3;

/// One random job: explicit predecessors among earlier jobs, and at most
/// one read and one write among a few shared resources.
#[derive(Debug, Clone)]
struct JobSpec {
    after: Vec<Index>,
    read: Option<u64>,
    write: Option<u64>,
}

fn job_strategy() -> impl Strategy<Value = JobSpec> {
    (
        proptest::collection::vec(any::<Index>(), 0..3),
        proptest::option::of(0..RESOURCES),
        proptest::option::of(0..RESOURCES),
    )
        .prop_map(|(after, read, write)| JobSpec { after, read, write })
}

struct Tickets {
    next: AtomicUsize,
    started: Vec<AtomicUsize>,
    finished: Vec<AtomicUsize>,
    runs: Vec<AtomicUsize>,
}

impl Tickets {
    fn new(n: usize) -> Self {
        let column = || (0..n).map(|_| AtomicUsize::new(usize::MAX)).collect();
        Self {
            next: AtomicUsize::new(0),
            started: column(),
            finished: column(),
            runs: (0..n).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    fn take(&self) -> usize {
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(PROPTEST_CASES))]

    #[test]
    fn prop_random_dag_runs_each_job_once_in_edge_order(
        specs in proptest::collection::vec(job_strategy(), 1..48),
        workers in 1usize..6,
    ) {
        let scheduler = Scheduler::new(SchedulerConfig::default().with_workers(workers)).unwrap();
        let tickets = Arc::new(Tickets::new(specs.len()));
        let mut builder = scheduler.build_frame_graph();
        let mut handles: Vec<JobHandle> = Vec::with_capacity(specs.len());
        for (i, spec) in specs.iter().enumerate() {
            let after: Vec<JobHandle> = if handles.is_empty() {
                Vec::new()
            } else {
                spec.after.iter().map(|idx| handles[idx.index(handles.len())]).collect()
            };
            let tickets = Arc::clone(&tickets);
            let job = builder
                .declare(
                    move |_| {
                        tickets.started[i].store(tickets.take(), Ordering::SeqCst);
                        tickets.runs[i].fetch_add(1, Ordering::SeqCst);
                        tickets.finished[i].store(tickets.take(), Ordering::SeqCst);
                        Ok(())
                    },
                    spec.read.map(ResourceId::new),
                    spec.write.map(ResourceId::new),
                    after,
                )
                .unwrap();
            handles.push(job);
        }
        let graph = builder.finalize().unwrap();
        prop_assert_eq!(graph.topological_order().len(), specs.len());
        let edges: Vec<(usize, usize)> = handles
            .iter()
            .flat_map(|child| {
                graph
                    .dependencies_of(child.id())
                    .iter()
                    .map(move |parent| (parent.index(), child.id().index()))
            })
            .collect();

        let report = scheduler.submit_and_wait(graph);
        prop_assert!(report.is_success());
        prop_assert_eq!(report.executed, specs.len());
        for runs in &tickets.runs {
            prop_assert_eq!(runs.load(Ordering::SeqCst), 1);
        }
        for (parent, child) in edges {
            let finished = tickets.finished[parent].load(Ordering::SeqCst);
            let started = tickets.started[child].load(Ordering::SeqCst);
            prop_assert!(finished < started, "{parent} -> {child}: {finished} !< {started}");
        }
    }

    #[test]
    fn prop_conflicting_jobs_are_ordered(
        specs in proptest::collection::vec(job_strategy(), 2..32),
    ) {
        let mut builder = GraphBuilder::new();
        for spec in &specs {
            builder
                .declare(|_| Ok(()), spec.read.map(ResourceId::new), spec.write.map(ResourceId::new), [])
                .unwrap();
        }
        let graph = builder.finalize().unwrap();
        let mut position = vec![0; specs.len()];
        for (pos, job) in graph.topological_order().iter().enumerate() {
            position[job.index()] = pos;
        }
        // Any two jobs where at least one writes what the other touches keep
        // their declaration order.
        for (i, a) in specs.iter().enumerate() {
            for (j, b) in specs.iter().enumerate().skip(i + 1) {
                let conflict = a.write.is_some_and(|w| b.read == Some(w) || b.write == Some(w))
                    || b.write.is_some_and(|w| a.read == Some(w));
                if conflict {
                    prop_assert!(position[i] < position[j], "{i} must precede {j}");
                }
            }
        }
    }

    #[test]
    fn prop_back_edge_on_chain_is_a_cycle(len in 1usize..32) {
        let mut builder = GraphBuilder::new();
        let mut chain: Vec<JobHandle> = Vec::with_capacity(len);
        for _ in 0..len {
            let prev = chain.last().copied();
            chain.push(builder.declare(|_| Ok(()), [], [], prev).unwrap());
        }
        builder.add_dependency(chain[0], chain[len - 1]).unwrap();
        let err = builder.finalize().unwrap_err();
        let expected: Vec<_> = chain.iter().map(|h| h.id()).collect();
        prop_assert_eq!(err, GraphError::CycleDetected { jobs: expected });
    }
}
