//! Property-based tests for the schedule and accuracy statistics using proptest.

use proptest::prelude::*;

use stagewise_core::evaluation::r_value;
use stagewise_core::{LearningRateSchedule, LearningRateStage, TargetArray, TargetLayout};

fn stages() -> impl Strategy<Value = Vec<LearningRateStage>> {
    prop::collection::vec((1e-6f64..1.0, 0usize..1000), 1..12)
        .prop_map(|v| v.into_iter().map(LearningRateStage::from).collect())
}

// --- Schedule properties ---

proptest! {
    #[test]
    fn valid_index_selects_that_stage(stages in stages(), pick in 0usize..12) {
        let index = pick % stages.len();
        let mut schedule = LearningRateSchedule::new(stages.clone()).unwrap();
        schedule.set_stage_index(index);
        prop_assert_eq!(schedule.current_index(), index);
        prop_assert_eq!(schedule.current_rate(), stages[index].rate);
        prop_assert_eq!(schedule.current_epochs(), stages[index].epochs);
    }

    #[test]
    fn out_of_range_index_clamps_to_last(stages in stages(), extra in 0usize..1000) {
        let mut schedule = LearningRateSchedule::new(stages.clone()).unwrap();
        schedule.set_stage_index(stages.len() + extra);
        let last = stages.len() - 1;
        prop_assert_eq!(schedule.current_index(), last);
        prop_assert_eq!(schedule.current_rate(), stages[last].rate);
        prop_assert_eq!(schedule.current_epochs(), stages[last].epochs);
    }
}

// --- Accuracy properties ---

proptest! {
    #[test]
    fn exact_predictions_give_r_of_one(values in prop::collection::vec(-1e3f64..1e3, 1..50)) {
        let real = TargetArray { width: 1, values };
        prop_assert_eq!(r_value(&real, &real.clone()), 1.0);
    }

    #[test]
    fn r_never_exceeds_one_and_stays_finite(
        pairs in prop::collection::vec((-1e3f64..1e3, -1e3f64..1e3), 1..50),
    ) {
        let real = TargetArray { width: 1, values: pairs.iter().map(|p| p.0).collect() };
        let predicted = TargetArray { width: 1, values: pairs.iter().map(|p| p.1).collect() };
        let r = r_value(&real, &predicted);
        prop_assert!(r <= 1.0);
        prop_assert!(r.is_finite());
    }

    #[test]
    fn deflatten_preserves_every_value(rows in 1usize..20, a in 1usize..4, b in 1usize..4) {
        let layout = TargetLayout::new(vec![
            stagewise_core::TargetColumn { key: "a".into(), width: a },
            stagewise_core::TargetColumn { key: "b".into(), width: b },
        ]).unwrap();
        let values: Vec<f64> = (0..rows * (a + b)).map(|v| v as f64).collect();
        let split = layout.deflatten(&values).unwrap();
        prop_assert_eq!(split["a"].rows(), rows);
        prop_assert_eq!(split["b"].rows(), rows);
        prop_assert_eq!(split["a"].values.len() + split["b"].values.len(), values.len());
    }
}
