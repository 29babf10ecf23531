//! Property tests for scoring and matching.

use labgrade_common::{GradeError, Pattern, Scheduler, Status, TestCase, TestRegistry, testing};
use proptest::prelude::*;

#[ctor::ctor]
fn setup() {
    testing::init_test_logging();
}

fn suite(cases: &[(u32, bool)], order: &[usize]) -> TestRegistry<()> {
    let mut reg = TestRegistry::new();
    for &i in order {
        let (points, passes) = cases[i];
        reg.register(TestCase::new(
            format!("t{i}"),
            format!("test {i}"),
            points,
            move |_: &mut ()| {
                if passes {
                    Ok(())
                } else {
                    Err(GradeError::assertion(format!("t{i} failed")))
                }
            },
        ))
        .unwrap();
    }
    reg
}

/// Point weights (including `u32::MAX`), pass flags and a shuffled order.
fn cases_and_order() -> impl Strategy<Value = (Vec<(u32, bool)>, Vec<usize>)> {
    let weight = prop_oneof![0u32..50, Just(u32::MAX)];
    prop::collection::vec((weight, any::<bool>()), 0..12).prop_flat_map(|cases| {
        let n = cases.len();
        (Just(cases), Just((0..n).collect::<Vec<_>>()).prop_shuffle())
    })
}

proptest! {
    #[test]
    fn score_is_sum_of_passed_points_in_any_order((cases, order) in cases_and_order()) {
        let expected: u64 = cases
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(p, _)| u64::from(*p))
            .sum();
        let possible: u64 = cases.iter().map(|(p, _)| u64::from(*p)).sum();

        let in_order: Vec<usize> = (0..cases.len()).collect();
        let straight = Scheduler::new(suite(&cases, &in_order)).run(&mut ()).unwrap();
        let shuffled = Scheduler::new(suite(&cases, &order)).run(&mut ()).unwrap();

        prop_assert_eq!(straight.earned(), expected);
        prop_assert_eq!(shuffled.earned(), expected);
        prop_assert_eq!(shuffled.possible(), possible);
        // Parentless tests are always attempted.
        prop_assert_eq!(shuffled.count(Status::Skipped), 0);
    }

    #[test]
    fn matching_is_idempotent(
        lines in prop::collection::vec("[a-z ]{0,12}", 0..30),
        needle in "[a-z]{1,4}",
    ) {
        let buffer = lines.join("\n");
        let pattern = Pattern::regex(&format!(".*{needle}.*")).unwrap();
        let first = pattern.find_all(&buffer);
        let second = pattern.find_all(&buffer);
        prop_assert_eq!(&first, &second);
        prop_assert_eq!(pattern.find_first(&buffer), pattern.find_first(&buffer));
        let expected = lines.iter().filter(|l| l.contains(needle.as_str())).count();
        prop_assert_eq!(first.len(), expected);
    }

    #[test]
    fn find_all_counts_each_duplicate(n in 1usize..40) {
        let pattern = Pattern::regex("^test lazy alloc: OK$").unwrap();
        let buffer = "test lazy alloc: OK\n".repeat(n);
        prop_assert_eq!(pattern.find_all(&buffer).len(), n);
    }
}
