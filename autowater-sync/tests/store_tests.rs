use autowater_sync::protocol::{DeviceSnapshot, ScheduleEntry};
use autowater_sync::store::{Lane, Proposal, ScheduleStore, StoreEvent};
use autowater_types::{
    default_plants, CommandId, IntervalUnit, Plant, PlantId, PlantSchedule, ScheduleEdit,
    ValidationError,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn make_store() -> ScheduleStore {
    ScheduleStore::new(default_plants())
}

fn sunflower() -> PlantId {
    PlantId::new(3)
}

fn schedule(plant: u32, value: u32, unit: IntervalUnit, duration: u32) -> PlantSchedule {
    PlantSchedule::new(PlantId::new(plant), value, unit, duration).unwrap()
}

// ── Construction & accessors ─────────────────────────────────────

#[tokio::test]
async fn lists_plants_in_id_order() {
    let store = make_store();
    let plants = store.plants().await;
    let names: Vec<&str> = plants.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Rose", "Orchid", "Sunflower", "Ficus"]);
    assert!(plants.iter().all(|p| !p.has_pending_edit && p.pending == p.confirmed));
}

#[tokio::test]
async fn confirmed_equals_pending_without_edit() {
    let store = make_store();
    let confirmed = store.get_confirmed(sunflower()).await.unwrap();
    assert_eq!(store.get_pending(sunflower()).await.unwrap(), confirmed);
    assert_eq!(confirmed, schedule(3, 1, IntervalUnit::Hours, 8));
}

#[tokio::test]
async fn unknown_plant_reads_none() {
    let store = make_store();
    assert!(store.get_confirmed(PlantId::new(99)).await.is_none());
    assert!(store.get_pending(PlantId::new(99)).await.is_none());
    assert!(store.plant_name(PlantId::new(99)).await.is_none());
}

#[tokio::test]
async fn starts_in_manual_mode() {
    let store = make_store();
    assert!(!store.auto_mode().await);
    assert!(!store.pending_auto_mode().await);
}

// ── Proposals ────────────────────────────────────────────────────

#[tokio::test]
async fn valid_proposal_is_visible_immediately() {
    let store = make_store();
    let edit = ScheduleEdit::new().interval(2, IntervalUnit::Hours).duration(10);

    let proposal = store.propose(sunflower(), edit).await.unwrap();
    let expected = schedule(3, 2, IntervalUnit::Hours, 10);

    assert_eq!(proposal, Proposal::SetSchedule(expected));
    assert_eq!(proposal.lane(), Lane::Plant(sunflower()));
    assert_eq!(store.get_pending(sunflower()).await.unwrap(), expected);
    assert_eq!(
        store.get_confirmed(sunflower()).await.unwrap(),
        schedule(3, 1, IntervalUnit::Hours, 8)
    );
    assert!(store.has_pending_edit(sunflower()).await);
}

#[tokio::test]
async fn zero_duration_is_rejected_and_store_unchanged() {
    let store = make_store();
    let before = store.plants().await;

    let err = store
        .propose(sunflower(), ScheduleEdit::new().duration(0))
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::DurationOutOfRange(0));
    assert_eq!(store.plants().await, before);
}

#[tokio::test]
async fn interval_31_is_rejected_and_store_unchanged() {
    let store = make_store();
    let before = store.plants().await;

    let err = store
        .propose(sunflower(), ScheduleEdit::new().interval_value(31))
        .await
        .unwrap_err();

    assert_eq!(err, ValidationError::IntervalOutOfRange(31));
    assert_eq!(store.plants().await, before);
}

#[tokio::test]
async fn proposal_for_unknown_plant_is_rejected() {
    let store = make_store();
    let err = store
        .propose(PlantId::new(42), ScheduleEdit::new().duration(5))
        .await
        .unwrap_err();
    assert_eq!(err, ValidationError::UnknownPlant(PlantId::new(42)));
}

#[tokio::test]
async fn edits_stack_on_pending_value() {
    let store = make_store();
    store
        .propose(sunflower(), ScheduleEdit::new().duration(20))
        .await
        .unwrap();
    store
        .propose(sunflower(), ScheduleEdit::new().interval_unit(IntervalUnit::Days))
        .await
        .unwrap();
    assert_eq!(
        store.get_pending(sunflower()).await.unwrap(),
        schedule(3, 1, IntervalUnit::Days, 20)
    );
}

#[tokio::test]
async fn trigger_water_is_not_recorded() {
    let store = make_store();
    let proposal = Proposal::trigger_water(PlantId::new(1));
    assert_eq!(proposal.lane(), Lane::Plant(PlantId::new(1)));
    assert!(!store.has_pending_edit(PlantId::new(1)).await);
}

#[tokio::test]
async fn mode_proposal_uses_device_lane() {
    let store = make_store();
    let proposal = store.propose_mode(true).await;
    assert_eq!(proposal, Proposal::SetMode(true));
    assert_eq!(proposal.lane(), Lane::Device);
    assert!(store.pending_auto_mode().await);
    assert!(!store.auto_mode().await);
}

#[tokio::test]
async fn discard_restores_confirmed_view() {
    let store = make_store();
    store
        .propose(sunflower(), ScheduleEdit::new().duration(30))
        .await
        .unwrap();
    assert!(store.discard(sunflower()).await);
    assert!(!store.discard(sunflower()).await);
    assert_eq!(
        store.get_pending(sunflower()).await,
        store.get_confirmed(sunflower()).await
    );
}

// ── Reconciliation ───────────────────────────────────────────────

#[tokio::test]
async fn reconcile_with_matching_command_clears_edit() {
    let store = make_store();
    let proposal = store
        .propose(sunflower(), ScheduleEdit::new().duration(10))
        .await
        .unwrap();
    let command_id = CommandId::new();
    store.attach(&proposal, command_id).await;

    let confirmed = schedule(3, 1, IntervalUnit::Hours, 10);
    store.reconcile(sunflower(), confirmed, Some(command_id)).await;

    assert!(!store.has_pending_edit(sunflower()).await);
    assert_eq!(store.get_confirmed(sunflower()).await.unwrap(), confirmed);
    assert_eq!(store.get_pending(sunflower()).await.unwrap(), confirmed);
}

#[tokio::test]
async fn reconcile_with_other_command_keeps_newer_edit() {
    let store = make_store();
    let first = store
        .propose(sunflower(), ScheduleEdit::new().duration(10))
        .await
        .unwrap();
    let first_id = CommandId::new();
    store.attach(&first, first_id).await;

    let second = store
        .propose(sunflower(), ScheduleEdit::new().duration(20))
        .await
        .unwrap();
    store.attach(&second, CommandId::new()).await;

    store
        .reconcile(sunflower(), schedule(3, 1, IntervalUnit::Hours, 10), Some(first_id))
        .await;

    assert!(store.has_pending_edit(sunflower()).await);
    assert_eq!(store.get_pending(sunflower()).await.unwrap().duration_seconds(), 20);
    assert_eq!(store.get_confirmed(sunflower()).await.unwrap().duration_seconds(), 10);
}

#[tokio::test]
async fn reconcile_without_command_keeps_edit() {
    let store = make_store();
    store
        .propose(sunflower(), ScheduleEdit::new().duration(10))
        .await
        .unwrap();
    store
        .reconcile(sunflower(), schedule(3, 4, IntervalUnit::Hours, 8), None)
        .await;
    assert!(store.has_pending_edit(sunflower()).await);
    assert_eq!(store.get_confirmed(sunflower()).await.unwrap().interval_value(), 4);
}

#[tokio::test]
async fn reconcile_mode_clears_matching_change() {
    let store = make_store();
    let proposal = store.propose_mode(true).await;
    let command_id = CommandId::new();
    store.attach(&proposal, command_id).await;

    store.reconcile_mode(true, Some(command_id)).await;
    assert!(store.auto_mode().await);
    assert!(store.pending_auto_mode().await);
    assert!(!store.discard_mode().await);
}

#[tokio::test]
async fn snapshot_replaces_confirmed_layer() {
    let store = make_store();
    store
        .propose(PlantId::new(1), ScheduleEdit::new().duration(9))
        .await
        .unwrap();

    let snapshot = DeviceSnapshot::new(
        true,
        vec![
            ScheduleEntry {
                plant_id: PlantId::new(1),
                interval_seconds: 3 * 3_600,
                duration_seconds: 6,
            },
            ScheduleEntry {
                plant_id: PlantId::new(5),
                interval_seconds: 2 * 86_400,
                duration_seconds: 12,
            },
            ScheduleEntry {
                plant_id: PlantId::new(2),
                interval_seconds: 17,
                duration_seconds: 3,
            },
        ],
    );

    assert_eq!(store.apply_snapshot(&snapshot).await, 2);
    assert!(store.auto_mode().await);
    assert_eq!(
        store.get_confirmed(PlantId::new(1)).await.unwrap(),
        schedule(1, 3, IntervalUnit::Hours, 6)
    );
    // pending edit survives telemetry
    assert_eq!(store.get_pending(PlantId::new(1)).await.unwrap().duration_seconds(), 9);
    // unknown plants are adopted
    assert_eq!(store.plant_name(PlantId::new(5)).await.unwrap(), "Plant 5");
    // invalid entries are skipped
    assert_eq!(
        store.get_confirmed(PlantId::new(2)).await.unwrap(),
        schedule(2, 3, IntervalUnit::Hours, 3)
    );
}

/// A snapshot reporting every catalog plant with the given duration.
async fn snapshot_with_duration(store: &ScheduleStore, duration: u32, auto_mode: bool) -> DeviceSnapshot {
    let schedules = store
        .plants()
        .await
        .iter()
        .map(|plant| ScheduleEntry {
            duration_seconds: duration,
            ..ScheduleEntry::from(&plant.confirmed)
        })
        .collect();
    DeviceSnapshot::new(auto_mode, schedules)
}

#[tokio::test]
async fn snapshot_keeps_unit_when_interval_matches() {
    let store = ScheduleStore::new(vec![
        Plant::new(PlantId::new(1), "Rose", 24, IntervalUnit::Hours, 5).unwrap(),
    ]);

    let snapshot = DeviceSnapshot::new(
        false,
        vec![
            ScheduleEntry {
                plant_id: PlantId::new(1),
                interval_seconds: 86_400,
                duration_seconds: 7,
            },
            ScheduleEntry {
                plant_id: PlantId::new(9),
                interval_seconds: 86_400,
                duration_seconds: 7,
            },
        ],
    );
    assert_eq!(store.apply_snapshot(&snapshot).await, 2);

    assert_eq!(
        store.get_confirmed(PlantId::new(1)).await.unwrap(),
        schedule(1, 24, IntervalUnit::Hours, 7)
    );
    // nothing to preserve for a plant the store has not seen
    assert_eq!(
        store.get_confirmed(PlantId::new(9)).await.unwrap(),
        schedule(9, 1, IntervalUnit::Days, 7)
    );
}

#[tokio::test]
async fn snapshot_follows_pending_unit() {
    let store = make_store();
    store
        .propose(
            PlantId::new(1),
            ScheduleEdit::new().interval(24, IntervalUnit::Hours),
        )
        .await
        .unwrap();

    let snapshot = DeviceSnapshot::new(
        false,
        vec![ScheduleEntry {
            plant_id: PlantId::new(1),
            interval_seconds: 86_400,
            duration_seconds: 5,
        }],
    );
    store.apply_snapshot(&snapshot).await;

    let confirmed = store.get_confirmed(PlantId::new(1)).await.unwrap();
    assert_eq!(confirmed.interval_value(), 24);
    assert_eq!(confirmed.interval_unit(), IntervalUnit::Hours);
    assert!(store.has_pending_edit(PlantId::new(1)).await);
}

#[tokio::test]
async fn snapshot_emits_one_event() {
    let store = make_store();
    let mut events = store.subscribe();

    let snapshot = snapshot_with_duration(&store, 30, true).await;
    assert_eq!(store.apply_snapshot(&snapshot).await, 4);

    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::SnapshotApplied { plants: 4 }
    );
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn readers_never_see_half_a_snapshot() {
    let store = Arc::new(make_store());
    let original: Vec<u32> = store
        .plants()
        .await
        .iter()
        .map(|p| p.confirmed.duration_seconds())
        .collect();
    let updated = snapshot_with_duration(&store, 30, true).await;
    let restored = DeviceSnapshot::new(
        false,
        store
            .plants()
            .await
            .iter()
            .map(|p| ScheduleEntry::from(&p.confirmed))
            .collect(),
    );

    let done = Arc::new(AtomicBool::new(false));
    let reader = {
        let store = store.clone();
        let done = done.clone();
        let original = original.clone();
        tokio::spawn(async move {
            while !done.load(Ordering::SeqCst) {
                let durations: Vec<u32> = store
                    .plants()
                    .await
                    .iter()
                    .map(|p| p.confirmed.duration_seconds())
                    .collect();
                assert!(
                    durations == original || durations.iter().all(|d| *d == 30),
                    "partial snapshot visible: {durations:?}"
                );
                tokio::task::yield_now().await;
            }
        })
    };

    for _ in 0..200 {
        store.apply_snapshot(&updated).await;
        tokio::task::yield_now().await;
        store.apply_snapshot(&restored).await;
        tokio::task::yield_now().await;
    }
    done.store(true, Ordering::SeqCst);

    reader.await.unwrap();
    assert!(!store.auto_mode().await);
}

// ── Notifications ────────────────────────────────────────────────

#[tokio::test]
async fn notifications_fire_on_propose_and_reconcile() {
    let store = make_store();
    let mut events = store.subscribe();

    let proposal = store
        .propose(sunflower(), ScheduleEdit::new().duration(10))
        .await
        .unwrap();
    let Proposal::SetSchedule(proposed) = proposal else {
        panic!("expected SetSchedule");
    };
    store.reconcile(sunflower(), proposed, None).await;

    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::ScheduleProposed {
            plant_id: sunflower(),
            schedule: proposed
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        StoreEvent::ScheduleConfirmed {
            plant_id: sunflower(),
            schedule: proposed
        }
    );
}

#[tokio::test]
async fn rejected_proposal_emits_nothing() {
    let store = make_store();
    let mut events = store.subscribe();
    let _ = store
        .propose(sunflower(), ScheduleEdit::new().duration(0))
        .await;
    assert!(events.try_recv().is_err());
}

// ── Properties ───────────────────────────────────────────────────

proptest! {
    #[test]
    fn any_valid_edit_is_accepted(
        plant in 1u32..=4,
        value in 1u32..=30,
        days in any::<bool>(),
        duration in 1u32..=60,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = make_store();
            let unit = if days { IntervalUnit::Days } else { IntervalUnit::Hours };
            let edit = ScheduleEdit::new().interval(value, unit).duration(duration);
            store.propose(PlantId::new(plant), edit).await.unwrap();

            let pending = store.get_pending(PlantId::new(plant)).await.unwrap();
            assert_eq!(pending, schedule(plant, value, unit, duration));
        });
    }

    #[test]
    fn any_invalid_edit_leaves_store_unchanged(
        plant in 1u32..=4,
        value in prop_oneof![Just(0u32), 31u32..1_000],
        duration in prop_oneof![Just(0u32), 61u32..1_000],
        bad_interval in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let store = make_store();
            let before = store.plants().await;
            let edit = if bad_interval {
                ScheduleEdit::new().interval_value(value)
            } else {
                ScheduleEdit::new().duration(duration)
            };
            assert!(store.propose(PlantId::new(plant), edit).await.is_err());
            assert_eq!(store.plants().await, before);
        });
    }
}
