use autowater_types::{
    default_plants, IntervalUnit, PlantId, PlantSchedule, ScheduleEdit, ValidationError,
};
use proptest::prelude::*;

fn rose() -> PlantSchedule {
    PlantSchedule::new(PlantId::new(1), 2, IntervalUnit::Hours, 5).unwrap()
}

// ── Construction ─────────────────────────────────────────────────

#[test]
fn new_accepts_bounds() {
    assert!(PlantSchedule::new(PlantId::new(1), 1, IntervalUnit::Hours, 1).is_ok());
    assert!(PlantSchedule::new(PlantId::new(1), 30, IntervalUnit::Days, 60).is_ok());
}

#[test]
fn new_rejects_zero_duration() {
    let err = PlantSchedule::new(PlantId::new(1), 2, IntervalUnit::Hours, 0).unwrap_err();
    assert_eq!(err, ValidationError::DurationOutOfRange(0));
}

#[test]
fn new_rejects_interval_31() {
    let err = PlantSchedule::new(PlantId::new(1), 31, IntervalUnit::Hours, 5).unwrap_err();
    assert_eq!(err, ValidationError::IntervalOutOfRange(31));
}

#[test]
fn interval_seconds_per_unit() {
    assert_eq!(rose().interval_seconds(), 7_200);
    let ficus = PlantSchedule::new(PlantId::new(4), 1, IntervalUnit::Days, 4).unwrap();
    assert_eq!(ficus.interval_seconds(), 86_400);
}

#[test]
fn from_interval_seconds_prefers_days() {
    let s = PlantSchedule::from_interval_seconds(PlantId::new(4), 172_800, 4).unwrap();
    assert_eq!(s.interval_value(), 2);
    assert_eq!(s.interval_unit(), IntervalUnit::Days);
}

#[test]
fn from_interval_seconds_falls_back_to_hours() {
    let s = PlantSchedule::from_interval_seconds(PlantId::new(1), 7_200, 5).unwrap();
    assert_eq!(s, rose());
}

#[test]
fn from_interval_seconds_rejects_partial_hours() {
    let err = PlantSchedule::from_interval_seconds(PlantId::new(1), 5_400, 5).unwrap_err();
    assert_eq!(err, ValidationError::UnrepresentableInterval(5_400));
}

#[test]
fn from_interval_seconds_rejects_out_of_range() {
    assert!(PlantSchedule::from_interval_seconds(PlantId::new(1), 0, 5).is_err());
    assert!(PlantSchedule::from_interval_seconds(PlantId::new(1), 31 * 86_400, 5).is_err());
}

#[test]
fn display_is_human_readable() {
    assert_eq!(rose().to_string(), "every 2 hours for 5s");
}

#[test]
fn deserialize_validates() {
    let ok = r#"{"plant_id":1,"interval_value":2,"interval_unit":"hours","duration_seconds":5}"#;
    assert_eq!(serde_json::from_str::<PlantSchedule>(ok).unwrap(), rose());

    let bad = r#"{"plant_id":1,"interval_value":2,"interval_unit":"hours","duration_seconds":0}"#;
    assert!(serde_json::from_str::<PlantSchedule>(bad).is_err());
}

#[test]
fn interval_unit_from_str() {
    assert_eq!("hours".parse::<IntervalUnit>().unwrap(), IntervalUnit::Hours);
    assert_eq!("D".parse::<IntervalUnit>().unwrap(), IntervalUnit::Days);
    assert!("weeks".parse::<IntervalUnit>().is_err());
}

// ── ScheduleEdit ─────────────────────────────────────────────────

#[test]
fn empty_edit_keeps_base() {
    let edit = ScheduleEdit::new();
    assert!(edit.is_empty());
    assert_eq!(edit.apply(&rose()).unwrap(), rose());
}

#[test]
fn partial_edit_changes_only_set_fields() {
    let edited = ScheduleEdit::new().duration(10).apply(&rose()).unwrap();
    assert_eq!(edited.duration_seconds(), 10);
    assert_eq!(edited.interval_value(), 2);
    assert_eq!(edited.interval_unit(), IntervalUnit::Hours);
    assert_eq!(edited.plant_id(), PlantId::new(1));
}

#[test]
fn edit_rejects_invalid_result() {
    let err = ScheduleEdit::new().interval_value(0).apply(&rose()).unwrap_err();
    assert_eq!(err, ValidationError::IntervalOutOfRange(0));
}

// ── Catalog ──────────────────────────────────────────────────────

#[test]
fn default_catalog_has_four_plants() {
    let plants = default_plants();
    let ids: Vec<u32> = plants.iter().map(|p| p.id.get()).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert_eq!(plants[0].name, "Rose");
    assert_eq!(plants[3].schedule.interval_unit(), IntervalUnit::Days);
    assert!(plants.iter().all(|p| p.schedule.plant_id() == p.id));
}

// ── Properties ───────────────────────────────────────────────────

fn unit_strategy() -> impl Strategy<Value = IntervalUnit> {
    prop_oneof![Just(IntervalUnit::Hours), Just(IntervalUnit::Days)]
}

proptest! {
    #[test]
    fn valid_values_always_construct(
        value in 1u32..=30,
        unit in unit_strategy(),
        duration in 1u32..=60,
    ) {
        let s = PlantSchedule::new(PlantId::new(1), value, unit, duration).unwrap();
        prop_assert_eq!(s.interval_value(), value);
        prop_assert_eq!(s.duration_seconds(), duration);
    }

    #[test]
    fn out_of_range_duration_is_rejected(duration in prop_oneof![Just(0u32), 61u32..10_000]) {
        prop_assert!(PlantSchedule::new(PlantId::new(1), 1, IntervalUnit::Hours, duration).is_err());
    }

    #[test]
    fn seconds_conversion_preserves_interval(
        value in 1u32..=30,
        unit in unit_strategy(),
        duration in 1u32..=60,
    ) {
        let s = PlantSchedule::new(PlantId::new(2), value, unit, duration).unwrap();
        let back = PlantSchedule::from_interval_seconds(PlantId::new(2), s.interval_seconds(), duration)
            .unwrap();
        prop_assert_eq!(back.interval_seconds(), s.interval_seconds());
        prop_assert_eq!(back.duration_seconds(), duration);
    }
}
