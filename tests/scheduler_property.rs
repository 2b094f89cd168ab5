// tests/scheduler_property.rs

use proptest::prelude::*;

use rundag::scheduler::{select_tasks_to_schedule, Candidate};
use rundag::{Cores, Memory, ResourceSet, Task, TaskManagerResources};

fn core_envelope(cores: f64) -> TaskManagerResources {
    TaskManagerResources::new(Cores(cores), Memory::parse("64g"), Memory::parse("64g"))
}

fn candidates(requests: &[u32]) -> Vec<Candidate> {
    requests
        .iter()
        .enumerate()
        .map(|(i, &cores)| Candidate {
            id: i as u64,
            task: Task::in_process(format!("task-{i}"), || 0)
                .with_resources(ResourceSet::with(cores as f64, Memory::none())),
        })
        .collect()
}

proptest! {
    #[test]
    fn admitted_resources_never_exceed_the_envelope(
        requests in proptest::collection::vec(1u32..=8, 1..20),
        envelope_cores in 1u32..=16,
    ) {
        let ready = candidates(&requests);
        let envelope = core_envelope(envelope_cores as f64);

        let admitted = select_tasks_to_schedule(&ready, envelope, &envelope);

        let total: f64 = admitted.iter().map(|a| a.resources.cores.0).sum();
        prop_assert!(total <= envelope_cores as f64 + 1e-9);

        // Admission preserves insertion order and never duplicates.
        let ids: Vec<u64> = admitted.iter().map(|a| a.id).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        sorted.dedup();
        prop_assert_eq!(&ids, &sorted);

        // Greedy means the first candidate always gets in when it fits at all.
        if requests[0] <= envelope_cores {
            prop_assert_eq!(ids.first().copied(), Some(0));
        }
    }

    #[test]
    fn everything_is_admitted_when_the_envelope_is_large_enough(
        requests in proptest::collection::vec(1u32..=8, 1..20),
    ) {
        let ready = candidates(&requests);
        let total: u32 = requests.iter().sum();
        let envelope = core_envelope(total as f64);

        let admitted = select_tasks_to_schedule(&ready, envelope, &envelope);
        prop_assert_eq!(admitted.len(), requests.len());
    }
}
