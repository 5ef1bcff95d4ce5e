//! Reproducibility of deterministic reductions
//!
//! With a fixed group count, a deterministic reduction must produce the same
//! bits however the backend schedules its groups.

use offload_backends::{GroupOrder, OrderedBackend};
use offload_core::combiner::{Minimum, Multiplies, Plus};
use offload_core::{reduction, Executor, PropertyKey, PropertySet, Reduction, RuntimeConfig};
use proptest::prelude::*;

/// Values spanning many magnitudes so float addition order is observable
fn mixed_magnitudes(n: usize) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let scale = 10f32.powi((i % 9) as i32 - 4);
            let sign = if i % 3 == 0 { -1.0 } else { 1.0 };
            sign * scale * (1.0 + (i as f32) * 0.37)
        })
        .collect()
}

fn ordered(order: GroupOrder, groups: usize) -> Executor {
    Executor::with_backend(OrderedBackend::new(order)).with_config(RuntimeConfig::new().with_group_count(groups))
}

fn sum_deterministic(exec: &Executor, data: &[f32]) -> offload_core::Result<f32> {
    let mut sum = 0.0f32;
    reduction(&mut sum, Plus, PropertySet::deterministic())?.run(exec, data.len(), |i, r| r.combine(data[i]))?;
    Ok(sum)
}

#[test]
fn test_reversed_group_order_is_bit_identical() -> offload_core::Result<()> {
    let data = mixed_magnitudes(1024);

    let ascending = sum_deterministic(&ordered(GroupOrder::Ascending, 16), &data)?;
    let descending = sum_deterministic(&ordered(GroupOrder::Descending, 16), &data)?;
    let shuffled = sum_deterministic(
        &ordered(GroupOrder::Explicit(vec![5, 11, 0, 15, 3, 8, 14, 1, 9, 2, 13, 6, 10, 4, 12, 7]), 16),
        &data,
    )?;

    assert_eq!(ascending.to_bits(), descending.to_bits());
    assert_eq!(ascending.to_bits(), shuffled.to_bits());
    Ok(())
}

#[test]
fn test_concurrent_backend_matches_sequential() -> offload_core::Result<()> {
    let data = mixed_magnitudes(4096);
    let config = RuntimeConfig::new().with_group_count(32).with_worker_threads(4);

    let reference = sum_deterministic(&ordered(GroupOrder::Ascending, 32), &data)?;
    let concurrent = Executor::from_config(config)?;
    for _ in 0..8 {
        assert_eq!(sum_deterministic(&concurrent, &data)?.to_bits(), reference.to_bits());
    }
    Ok(())
}

#[test]
fn test_integer_modes_agree() -> offload_core::Result<()> {
    let data: Vec<u64> = (0..10_000).map(|i| (i * 2_654_435_761u64) % 1_000_003).collect();
    let exec = Executor::from_config(RuntimeConfig::new().with_group_count(12))?;

    let mut fixed = 0u64;
    reduction(&mut fixed, Plus, PropertySet::deterministic())?.run(&exec, data.len(), |i, r| r.combine(data[i]))?;

    let mut arrival = 0u64;
    reduction(&mut arrival, Plus, PropertySet::new())?.run(&exec, data.len(), |i, r| r.combine(data[i]))?;

    assert_eq!(fixed, arrival);
    assert_eq!(fixed, data.iter().sum::<u64>());
    Ok(())
}

#[test]
fn test_identity_mode_on_empty_input() -> offload_core::Result<()> {
    let exec = ordered(GroupOrder::Descending, 4);
    let properties = PropertySet::deterministic().with(PropertyKey::InitializeToIdentity);

    let mut product = 42.0f64;
    reduction(&mut product, Multiplies, properties.clone())?.run(&exec, 0, |_, _| {})?;
    assert_eq!(product, 1.0);

    let mut min = 0u16;
    reduction(&mut min, Minimum, properties)?.run(&exec, 0, |_, _| {})?;
    assert_eq!(min, u16::MAX);
    Ok(())
}

#[test]
fn test_declarative_names() -> offload_core::Result<()> {
    let data = mixed_magnitudes(300);
    let exec = ordered(GroupOrder::Descending, 7);

    let mut by_name = 0.0f32;
    Reduction::builder(&mut by_name, Plus)
        .property_names(["deterministic", "initialize_to_identity"])
        .build()?
        .run(&exec, data.len(), |i, r| r.combine(data[i]))?;

    let expected = sum_deterministic(&ordered(GroupOrder::Ascending, 7), &data)?;
    assert_eq!(by_name.to_bits(), expected.to_bits());
    Ok(())
}

proptest! {
    #[test]
    fn prop_deterministic_sum_ignores_schedule(
        data in prop::collection::vec(-1.0e6f32..1.0e6f32, 0..512),
        groups in 1usize..24,
    ) {
        let forward = sum_deterministic(&ordered(GroupOrder::Ascending, groups), &data).unwrap();
        let backward = sum_deterministic(&ordered(GroupOrder::Descending, groups), &data).unwrap();
        prop_assert_eq!(forward.to_bits(), backward.to_bits());
    }
}
