use flux_sync::{Operation, StringTarget, SyncController, TextTarget};
use proptest::prelude::*;

/// One site's controller plus every remote operation not delivered to it yet.
struct Site {
    controller: SyncController<StringTarget>,
    inbox: Vec<Operation>,
}

impl Site {
    fn text(&self) -> &str {
        self.controller.target().as_str()
    }

    /// Inbox indices that can be applied now without violating causality.
    fn ready(&self) -> Vec<usize> {
        let version = self.controller.version();
        self.inbox
            .iter()
            .enumerate()
            .filter(|(_, op)| {
                op.id().counter() == version.get(op.id().participant())
                    && version.covers(op.context())
            })
            .map(|(index, _)| index)
            .collect()
    }

    fn deliver(&mut self, pick: usize) -> bool {
        let ready = self.ready();
        if ready.is_empty() {
            return false;
        }
        let op = self.inbox.remove(ready[pick % ready.len()]);
        self.controller.apply_operation(&op).unwrap();
        true
    }
}

#[derive(Debug, Clone)]
enum Step {
    Insert { site: usize, at: usize, text: String },
    Delete { site: usize, at: usize, len: usize },
    Deliver { site: usize, pick: usize },
}

fn step(sites: usize) -> impl Strategy<Value = Step> {
    prop_oneof![
        (0..sites, any::<usize>(), "[a-z]{1,3}")
            .prop_map(|(site, at, text)| Step::Insert { site, at, text }),
        (0..sites, any::<usize>(), 1..4usize)
            .prop_map(|(site, at, len)| Step::Delete { site, at, len }),
        (0..sites, any::<usize>()).prop_map(|(site, pick)| Step::Deliver { site, pick }),
        (0..sites, any::<usize>()).prop_map(|(site, pick)| Step::Deliver { site, pick }),
    ]
}

fn run(initial: &str, sites: usize, steps: &[Step]) -> Vec<Site> {
    let mut all: Vec<Site> = (0..sites)
        .map(|n| Site {
            controller: SyncController::new(format!("site{n}"), StringTarget::new(initial)),
            inbox: Vec::new(),
        })
        .collect();

    let mut broadcast = |all: &mut Vec<Site>, from: usize, op: Operation| {
        for (n, site) in all.iter_mut().enumerate() {
            if n != from {
                site.inbox.push(op.clone());
            }
        }
    };

    for step in steps {
        match step {
            Step::Insert { site, at, text } => {
                let controller = &mut all[*site].controller;
                let at = at % (controller.target().len_chars() + 1);
                let op = controller.create_insert_operation(text.as_str(), at).unwrap();
                controller.apply_operation(&op).unwrap();
                broadcast(&mut all, *site, op);
            }
            Step::Delete { site, at, len } => {
                let controller = &mut all[*site].controller;
                let visible = controller.target().len_chars();
                if visible == 0 {
                    continue;
                }
                let at = at % visible;
                let len = (*len).min(visible - at);
                let op = controller.create_delete_operation(at, len).unwrap();
                controller.apply_operation(&op).unwrap();
                broadcast(&mut all, *site, op);
            }
            Step::Deliver { site, pick } => {
                all[*site].deliver(*pick);
            }
        }
    }

    // Drain in a fixed order; causal delivery always has a ready operation.
    for site in &mut all {
        while !site.inbox.is_empty() {
            assert!(site.deliver(0), "inbox stuck with {} operations", site.inbox.len());
        }
    }
    all
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn test_two_sites_converge(
        initial in "[a-z]{0,8}",
        steps in prop::collection::vec(step(2), 1..40),
    ) {
        let sites = run(&initial, 2, &steps);
        prop_assert_eq!(sites[0].text(), sites[1].text());
        prop_assert_eq!(sites[0].controller.version(), sites[1].controller.version());
    }

    #[test]
    fn test_three_sites_converge(
        initial in "[a-z]{0,8}",
        steps in prop::collection::vec(step(3), 1..60),
    ) {
        let sites = run(&initial, 3, &steps);
        prop_assert_eq!(sites[0].text(), sites[1].text());
        prop_assert_eq!(sites[1].text(), sites[2].text());
    }

    #[test]
    fn test_redelivery_changes_nothing(
        initial in "[a-z]{1,8}",
        steps in prop::collection::vec(step(2), 1..30),
    ) {
        let mut sites = run(&initial, 2, &steps);
        let history: Vec<Operation> = sites[1]
            .controller
            .history()
            .iter()
            .map(|entry| entry.original().clone())
            .collect();
        let before = sites[0].text().to_string();
        for op in &history {
            sites[0].controller.apply_operation(op).unwrap();
        }
        prop_assert_eq!(sites[0].text(), before.as_str());
    }
}

#[test]
fn test_insert_and_delete_of_same_region() {
    let steps = [
        Step::Delete { site: 0, at: 1, len: 3 },
        Step::Insert { site: 1, at: 2, text: "XY".into() },
        Step::Insert { site: 2, at: 4, text: "Z".into() },
        Step::Deliver { site: 2, pick: 1 },
        Step::Delete { site: 2, at: 0, len: 2 },
    ];

    let sites = run("abcdef", 3, &steps);

    assert_eq!(sites[0].text(), sites[1].text());
    assert_eq!(sites[1].text(), sites[2].text());
}

#[test]
fn test_sequential_edits_on_rope() {
    let mut alice = SyncController::new("alice", ropey::Rope::from_str("cats"));
    let mut bob = SyncController::new("bob", ropey::Rope::from_str("cats"));

    let old = alice.create_insert_operation("old ", 0).unwrap();
    alice.apply_operation(&old).unwrap();
    bob.apply_operation(&old).unwrap();
    let dogs = bob.create_insert_operation(" and dogs", 8).unwrap();
    bob.apply_operation(&dogs).unwrap();
    alice.apply_operation(&dogs).unwrap();

    assert_eq!(alice.target().to_string(), "old cats and dogs");
    assert_eq!(bob.target().to_string(), "old cats and dogs");
}
