use std::path::PathBuf;
use std::sync::Arc;

use chrono::{Duration, NaiveDate};
use ulid::Ulid;

use super::*;
use crate::model::*;
use crate::notify::NotifyHub;

const H: Ms = 3_600_000;
const M: Ms = 60_000;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("bookwire_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn new_engine(name: &str) -> Engine {
    Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap()
}

fn today() -> NaiveDate {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms;
    date_of(now)
}

/// The next future date falling on `weekday` (always strictly after today,
/// so resolution never trips the past-day guard mid-test).
fn next(weekday: Weekday) -> NaiveDate {
    let mut day = today() + Duration::days(1);
    while Weekday::of(day) != weekday {
        day += Duration::days(1);
    }
    day
}

fn at(date: NaiveDate, hour: Ms) -> Ms {
    day_start_ms(date) + hour * H
}

async fn provider_with_nine_to_five(engine: &Engine) -> Ulid {
    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();
    engine
        .add_rule(
            Ulid::new(),
            provider_id,
            Weekday::Monday,
            Some(9 * 3600),
            Some(17 * 3600),
        )
        .await
        .unwrap();
    provider_id
}

// ── Provider lifecycle ───────────────────────────────────────────

#[tokio::test]
async fn create_and_list_provider() {
    let engine = new_engine("create_provider.wal");

    let id = Ulid::new();
    engine
        .create_provider(id, Some("Dr. Quinn".into()))
        .await
        .unwrap();

    let providers = engine.list_providers();
    assert_eq!(providers.len(), 1);
    assert_eq!(providers[0].id, id);
    assert_eq!(providers[0].name.as_deref(), Some("Dr. Quinn"));
}

#[tokio::test]
async fn duplicate_provider_rejected() {
    let engine = new_engine("dup_provider.wal");

    let id = Ulid::new();
    engine.create_provider(id, None).await.unwrap();
    let result = engine.create_provider(id, None).await;
    assert!(matches!(result, Err(EngineError::AlreadyExists(_))));
}

#[tokio::test]
async fn provider_name_length_capped() {
    let engine = new_engine("name_cap.wal");
    let long = "x".repeat(crate::limits::MAX_NAME_LEN + 1);
    let result = engine.create_provider(Ulid::new(), Some(long)).await;
    assert!(matches!(result, Err(EngineError::LimitExceeded(_))));
}

#[tokio::test]
async fn rename_provider() {
    let engine = new_engine("rename_provider.wal");

    let id = Ulid::new();
    engine.create_provider(id, Some("Before".into())).await.unwrap();
    engine.rename_provider(id, Some("After".into())).await.unwrap();

    assert_eq!(engine.list_providers()[0].name.as_deref(), Some("After"));
}

#[tokio::test]
async fn delete_provider_clears_entity_index() {
    let engine = new_engine("delete_provider.wal");

    let provider_id = provider_with_nine_to_five(&engine).await;
    let rule_id = engine.schedule_rows(provider_id).await.unwrap()[1].id.unwrap();

    engine.delete_provider(provider_id).await.unwrap();
    assert!(engine.list_providers().is_empty());
    // Entities of a deleted provider are gone from the reverse index too.
    assert!(matches!(
        engine.remove_rule(rule_id).await,
        Err(EngineError::NotFound(_))
    ));
}

// ── Weekly schedule ──────────────────────────────────────────────

#[tokio::test]
async fn schedule_rule_lifecycle() {
    let engine = new_engine("rule_lifecycle.wal");

    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();

    let rule_id = Ulid::new();
    engine
        .add_rule(rule_id, provider_id, Weekday::Tuesday, Some(8 * 3600), Some(12 * 3600))
        .await
        .unwrap();

    let rows = engine.schedule_rows(provider_id).await.unwrap();
    assert_eq!(rows.len(), 7);
    let tuesday = rows.iter().find(|r| r.weekday == Weekday::Tuesday).unwrap();
    assert_eq!(tuesday.id, Some(rule_id));
    assert_eq!(tuesday.start_sec, Some(8 * 3600));

    engine
        .update_rule(rule_id, Some(9 * 3600), Some(13 * 3600))
        .await
        .unwrap();
    let rows = engine.schedule_rows(provider_id).await.unwrap();
    let tuesday = rows.iter().find(|r| r.weekday == Weekday::Tuesday).unwrap();
    assert_eq!(tuesday.start_sec, Some(9 * 3600));
    assert_eq!(tuesday.end_sec, Some(13 * 3600));

    engine.remove_rule(rule_id).await.unwrap();
    let rows = engine.schedule_rows(provider_id).await.unwrap();
    assert!(rows.iter().all(|r| r.id.is_none()));
}

#[tokio::test]
async fn schedule_rows_synthesize_all_seven_days() {
    let engine = new_engine("rows_synthesis.wal");

    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();

    let rows = engine.schedule_rows(provider_id).await.unwrap();
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|r| r.id.is_none()));
    let order: Vec<u8> = rows.iter().map(|r| r.weekday.index()).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn half_filled_rule_rejected_at_save() {
    let engine = new_engine("half_rule.wal");

    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();

    let result = engine
        .add_rule(Ulid::new(), provider_id, Weekday::Friday, Some(9 * 3600), None)
        .await;
    assert!(matches!(
        result,
        Err(EngineError::IncompleteRule(Weekday::Friday))
    ));

    // The same validation guards updates.
    let rule_id = Ulid::new();
    engine
        .add_rule(rule_id, provider_id, Weekday::Friday, None, None)
        .await
        .unwrap();
    let result = engine.update_rule(rule_id, None, Some(17 * 3600)).await;
    assert!(matches!(result, Err(EngineError::IncompleteRule(_))));
}

#[tokio::test]
async fn out_of_range_rule_rejected() {
    let engine = new_engine("bad_rule_range.wal");

    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();

    let result = engine
        .add_rule(Ulid::new(), provider_id, Weekday::Monday, Some(9 * 3600), Some(86_400))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidWindow(_))));

    let result = engine
        .add_rule(Ulid::new(), provider_id, Weekday::Monday, Some(17 * 3600), Some(9 * 3600))
        .await;
    assert!(matches!(result, Err(EngineError::InvalidWindow(_))));
}

// ── Day resolution ───────────────────────────────────────────────

#[tokio::test]
async fn resolve_day_seeds_recurring_window() {
    let engine = new_engine("resolve_seed.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(open, vec![Span::new(at(monday, 9), at(monday, 17))]);
    assert!(engine.has_availability(provider_id, monday).await.unwrap());
}

#[tokio::test]
async fn resolve_day_applies_exclusion() {
    let engine = new_engine("resolve_exclusion.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    engine
        .add_modifier(
            Ulid::new(),
            provider_id,
            Span::new(at(monday, 12), at(monday, 13)),
            true,
        )
        .await
        .unwrap();

    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(
        open,
        vec![
            Span::new(at(monday, 9), at(monday, 12)),
            Span::new(at(monday, 13), at(monday, 17)),
        ]
    );
}

#[tokio::test]
async fn resolve_day_override_wins() {
    let engine = new_engine("resolve_override.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    engine
        .add_modifier(
            Ulid::new(),
            provider_id,
            Span::new(at(monday, 14), at(monday, 15)),
            false,
        )
        .await
        .unwrap();
    // An exclusion on the same day is muted by the override.
    engine
        .add_modifier(
            Ulid::new(),
            provider_id,
            Span::new(at(monday, 14), at(monday, 15)),
            true,
        )
        .await
        .unwrap();

    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(open, vec![Span::new(at(monday, 14), at(monday, 15))]);
}

#[tokio::test]
async fn resolve_day_past_is_empty() {
    let engine = new_engine("resolve_past.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    // Find a past Monday; there is a recurring rule for it, but the date is
    // gone.
    let mut day = today() - Duration::days(1);
    while Weekday::of(day) != Weekday::Monday {
        day -= Duration::days(1);
    }
    assert!(engine.resolve_day(provider_id, day).await.unwrap().is_empty());
    assert!(!engine.has_availability(provider_id, day).await.unwrap());
}

#[tokio::test]
async fn resolve_day_missing_weekday_is_empty() {
    let engine = new_engine("resolve_missing.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let tuesday = next(Weekday::Tuesday);
    assert!(engine.resolve_day(provider_id, tuesday).await.unwrap().is_empty());
    assert!(!engine.has_availability(provider_id, tuesday).await.unwrap());
}

#[tokio::test]
async fn resolve_day_unknown_provider_is_empty() {
    let engine = new_engine("resolve_unknown.wal");
    let open = engine.resolve_day(Ulid::new(), next(Weekday::Monday)).await.unwrap();
    assert!(open.is_empty());
}

#[tokio::test]
async fn resolve_day_is_idempotent() {
    let engine = new_engine("resolve_idem.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    engine
        .add_modifier(
            Ulid::new(),
            provider_id,
            Span::new(at(monday, 10), at(monday, 11)),
            true,
        )
        .await
        .unwrap();

    let first = engine.resolve_day(provider_id, monday).await.unwrap();
    let second = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(first, second);
}

// ── Slots ────────────────────────────────────────────────────────

#[tokio::test]
async fn day_slots_full_grid() {
    let engine = new_engine("slots_grid.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, Some(5000))
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let slots = engine.day_slots(provider_id, monday, type_id).await.unwrap();
    assert_eq!(slots.len(), 16);
    assert_eq!(slots[0].start, at(monday, 9));
    assert_eq!(slots[15].end, at(monday, 17));
    assert!(slots.iter().all(|s| s.duration_ms() == 30 * M));
}

#[tokio::test]
async fn day_slots_drop_trailing_partial() {
    let engine = new_engine("slots_partial.wal");

    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();
    // 09:00–10:45 with 30-minute slots: three whole slots, 15 minutes lost.
    engine
        .add_rule(
            Ulid::new(),
            provider_id,
            Weekday::Monday,
            Some(9 * 3600),
            Some(10 * 3600 + 2700),
        )
        .await
        .unwrap();
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Consult".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let slots = engine.day_slots(provider_id, monday, type_id).await.unwrap();
    assert_eq!(slots.len(), 3);
    assert_eq!(slots[2].end, at(monday, 10) + 30 * M);
}

#[tokio::test]
async fn day_slots_stay_inside_resolved_windows() {
    let engine = new_engine("slots_inside.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    engine
        .add_modifier(
            Ulid::new(),
            provider_id,
            Span::new(at(monday, 12), at(monday, 13)),
            true,
        )
        .await
        .unwrap();
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let slots = engine.day_slots(provider_id, monday, type_id).await.unwrap();
    assert_eq!(slots.len(), 14);
    assert!(slots
        .iter()
        .all(|s| s.end <= at(monday, 12) || s.start >= at(monday, 13)));
}

#[tokio::test]
async fn day_slots_unknown_type_rejected() {
    let engine = new_engine("slots_unknown_type.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let result = engine
        .day_slots(provider_id, next(Weekday::Monday), Ulid::new())
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn zero_duration_type_rejected() {
    let engine = new_engine("zero_type.wal");
    let provider_id = Ulid::new();
    engine.create_provider(provider_id, None).await.unwrap();

    let result = engine
        .add_type(Ulid::new(), provider_id, "Broken".into(), None, 0, None)
        .await;
    assert!(matches!(result, Err(EngineError::InvalidDuration(0))));
}

// ── Booking ──────────────────────────────────────────────────────

#[tokio::test]
async fn book_and_list_appointment() {
    let engine = new_engine("book.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let appointment_id = Ulid::new();
    let customer_id = Ulid::new();
    engine
        .book_appointment(
            appointment_id,
            provider_id,
            type_id,
            customer_id,
            Span::new(at(monday, 9), at(monday, 9) + 30 * M),
        )
        .await
        .unwrap();

    let appointments = engine.get_appointments(provider_id).await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].id, appointment_id);
    assert_eq!(appointments[0].customer_id, customer_id);
}

#[tokio::test]
async fn double_booking_rejected() {
    let engine = new_engine("double_book.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let slot = Span::new(at(monday, 10), at(monday, 10) + 30 * M);
    let first_id = Ulid::new();
    engine
        .book_appointment(first_id, provider_id, type_id, Ulid::new(), slot)
        .await
        .unwrap();

    // Exact same slot.
    let result = engine
        .book_appointment(Ulid::new(), provider_id, type_id, Ulid::new(), slot)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == first_id));

    // Overlapping but offset slot.
    let overlapping = Span::new(at(monday, 10) + 15 * M, at(monday, 10) + 45 * M);
    let result = engine
        .book_appointment(Ulid::new(), provider_id, type_id, Ulid::new(), overlapping)
        .await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));

    // State untouched by the failed attempts.
    assert_eq!(engine.get_appointments(provider_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn back_to_back_bookings_allowed() {
    let engine = new_engine("back_to_back.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    engine
        .book_appointment(
            Ulid::new(),
            provider_id,
            type_id,
            Ulid::new(),
            Span::new(at(monday, 9), at(monday, 9) + 30 * M),
        )
        .await
        .unwrap();
    engine
        .book_appointment(
            Ulid::new(),
            provider_id,
            type_id,
            Ulid::new(),
            Span::new(at(monday, 9) + 30 * M, at(monday, 10)),
        )
        .await
        .unwrap();

    assert_eq!(engine.get_appointments(provider_id).await.unwrap().len(), 2);
}

#[tokio::test]
async fn booking_must_match_type_duration() {
    let engine = new_engine("wrong_duration.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let result = engine
        .book_appointment(
            Ulid::new(),
            provider_id,
            type_id,
            Ulid::new(),
            Span::new(at(monday, 9), at(monday, 9) + 45 * M),
        )
        .await;
    assert!(matches!(
        result,
        Err(EngineError::WrongDuration {
            expected_min: 30,
            ..
        })
    ));
}

#[tokio::test]
async fn booking_unknown_type_rejected() {
    let engine = new_engine("book_unknown_type.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let result = engine
        .book_appointment(
            Ulid::new(),
            provider_id,
            Ulid::new(),
            Ulid::new(),
            Span::new(at(monday, 9), at(monday, 9) + 30 * M),
        )
        .await;
    assert!(matches!(result, Err(EngineError::NotFound(_))));
}

#[tokio::test]
async fn cancel_frees_the_slot() {
    let engine = new_engine("cancel_rebook.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let monday = next(Weekday::Monday);
    let slot = Span::new(at(monday, 11), at(monday, 11) + 30 * M);
    let appointment_id = Ulid::new();
    engine
        .book_appointment(appointment_id, provider_id, type_id, Ulid::new(), slot)
        .await
        .unwrap();
    engine.cancel_appointment(appointment_id).await.unwrap();

    assert!(engine.get_appointments(provider_id).await.unwrap().is_empty());
    engine
        .book_appointment(Ulid::new(), provider_id, type_id, Ulid::new(), slot)
        .await
        .unwrap();
}

#[tokio::test]
async fn booking_fires_notification() {
    let path = test_wal_path("book_notify.wal");
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::new(path, notify.clone()).unwrap();

    let provider_id = provider_with_nine_to_five(&engine).await;
    let type_id = Ulid::new();
    engine
        .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
        .await
        .unwrap();

    let mut rx = notify.subscribe(provider_id);
    let monday = next(Weekday::Monday);
    let appointment_id = Ulid::new();
    engine
        .book_appointment(
            appointment_id,
            provider_id,
            type_id,
            Ulid::new(),
            Span::new(at(monday, 9), at(monday, 9) + 30 * M),
        )
        .await
        .unwrap();

    let event = rx.recv().await.unwrap();
    assert!(matches!(
        event,
        Event::AppointmentBooked { id, .. } if id == appointment_id
    ));
}

// ── Toggle ───────────────────────────────────────────────────────

#[tokio::test]
async fn toggle_carves_and_restores() {
    let engine = new_engine("toggle_cycle.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let click = at(monday, 10);

    // First click inside business hours: a 30-minute blackout appears.
    let outcome = engine.toggle_modifier(provider_id, click, None).await.unwrap();
    assert!(outcome.deleted.is_empty());
    let created = outcome.created.unwrap();
    assert!(created.exclusive);

    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(
        open,
        vec![
            Span::new(at(monday, 9), click),
            Span::new(click + 30 * M, at(monday, 17)),
        ]
    );

    // Second click at the same instant: the blackout toggles off again.
    let outcome = engine.toggle_modifier(provider_id, click, None).await.unwrap();
    assert_eq!(outcome.deleted, vec![created.id]);
    assert!(outcome.created.is_none());

    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(open, vec![Span::new(at(monday, 9), at(monday, 17))]);
    assert!(engine.get_modifiers(provider_id, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn toggle_outside_hours_adds_availability() {
    let engine = new_engine("toggle_add.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    // Sunday has no recurring hours at all.
    let sunday = next(Weekday::Sunday);
    let click = at(sunday, 10);
    let outcome = engine.toggle_modifier(provider_id, click, None).await.unwrap();
    let created = outcome.created.unwrap();
    assert!(!created.exclusive);

    // The added window replaces the (empty) recurring schedule for the day.
    let open = engine.resolve_day(provider_id, sunday).await.unwrap();
    assert_eq!(open, vec![Span::new(click, click + 30 * M)]);
}

#[tokio::test]
async fn toggle_with_custom_slot_width() {
    let engine = new_engine("toggle_custom.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let click = at(monday, 15);
    let outcome = engine
        .toggle_modifier(provider_id, click, Some(60 * M))
        .await
        .unwrap();
    let created = outcome.created.unwrap();
    assert_eq!(created.end - created.start, 60 * M);

    assert!(matches!(
        engine.toggle_modifier(provider_id, click, Some(0)).await,
        Err(EngineError::InvalidDuration(0))
    ));
}

// ── Modifier queries & calendar ──────────────────────────────────

#[tokio::test]
async fn modifiers_since_filter() {
    let engine = new_engine("modifiers_since.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let early = Ulid::new();
    let late = Ulid::new();
    engine
        .add_modifier(
            early,
            provider_id,
            Span::new(at(monday, 9), at(monday, 10)),
            true,
        )
        .await
        .unwrap();
    engine
        .add_modifier(
            late,
            provider_id,
            Span::new(at(monday, 15), at(monday, 16)),
            true,
        )
        .await
        .unwrap();

    let all = engine.get_modifiers(provider_id, None).await.unwrap();
    assert_eq!(all.len(), 2);

    // Cutoff right on the early modifier's end keeps it (end >= since).
    let kept = engine
        .get_modifiers(provider_id, Some(at(monday, 10)))
        .await
        .unwrap();
    assert_eq!(kept.len(), 2);

    let only_late = engine
        .get_modifiers(provider_id, Some(at(monday, 12)))
        .await
        .unwrap();
    assert_eq!(only_late.len(), 1);
    assert_eq!(only_late[0].id, late);
}

#[tokio::test]
async fn calendar_days_flags() {
    let engine = new_engine("calendar_days.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    let days = engine
        .calendar_days(provider_id, monday, monday + Duration::days(6))
        .await
        .unwrap();
    assert_eq!(days.len(), 7);
    for (day, available) in &days {
        assert_eq!(*available, Weekday::of(*day) == Weekday::Monday);
    }
}

#[tokio::test]
async fn calendar_range_validation() {
    let engine = new_engine("calendar_validation.wal");
    let provider_id = provider_with_nine_to_five(&engine).await;

    let monday = next(Weekday::Monday);
    assert!(matches!(
        engine
            .calendar_days(provider_id, monday, monday - Duration::days(1))
            .await,
        Err(EngineError::InvalidWindow(_))
    ));
    assert!(matches!(
        engine
            .calendar_days(provider_id, monday, monday + Duration::days(400))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

// ── Durability ───────────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_full_state() {
    let path = test_wal_path("replay_state.wal");
    let monday = next(Weekday::Monday);
    let provider_id = Ulid::new();
    let type_id = Ulid::new();
    let appointment_id = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine
            .create_provider(provider_id, Some("Dr. Quinn".into()))
            .await
            .unwrap();
        engine
            .add_rule(
                Ulid::new(),
                provider_id,
                Weekday::Monday,
                Some(9 * 3600),
                Some(17 * 3600),
            )
            .await
            .unwrap();
        engine
            .add_modifier(
                Ulid::new(),
                provider_id,
                Span::new(at(monday, 12), at(monday, 13)),
                true,
            )
            .await
            .unwrap();
        engine
            .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
            .await
            .unwrap();
        engine
            .book_appointment(
                appointment_id,
                provider_id,
                type_id,
                Ulid::new(),
                Span::new(at(monday, 9), at(monday, 9) + 30 * M),
            )
            .await
            .unwrap();
        // Engine dropped here; the WAL is the only survivor.
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.list_providers().len(), 1);
    let open = engine.resolve_day(provider_id, monday).await.unwrap();
    assert_eq!(
        open,
        vec![
            Span::new(at(monday, 9), at(monday, 12)),
            Span::new(at(monday, 13), at(monday, 17)),
        ]
    );
    let appointments = engine.get_appointments(provider_id).await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].id, appointment_id);
    // The reverse index came back too: cancellation by id still works.
    engine.cancel_appointment(appointment_id).await.unwrap();
}

#[tokio::test]
async fn compaction_preserves_replayed_state() {
    let path = test_wal_path("compact_state.wal");
    let monday = next(Weekday::Monday);
    let provider_id = Ulid::new();
    let type_id = Ulid::new();

    {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        engine.create_provider(provider_id, None).await.unwrap();
        engine
            .add_type(type_id, provider_id, "Checkup".into(), None, 30, None)
            .await
            .unwrap();
        // Churn that compaction folds away.
        for _ in 0..10 {
            let id = Ulid::new();
            engine
                .book_appointment(
                    id,
                    provider_id,
                    type_id,
                    Ulid::new(),
                    Span::new(at(monday, 9), at(monday, 9) + 30 * M),
                )
                .await
                .unwrap();
            engine.cancel_appointment(id).await.unwrap();
        }
        let keeper = Ulid::new();
        engine
            .book_appointment(
                keeper,
                provider_id,
                type_id,
                Ulid::new(),
                Span::new(at(monday, 10), at(monday, 10) + 30 * M),
            )
            .await
            .unwrap();
        engine.compact_wal().await.unwrap();
    }

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let appointments = engine.get_appointments(provider_id).await.unwrap();
    assert_eq!(appointments.len(), 1);
    assert_eq!(appointments[0].start, at(monday, 10));
    assert_eq!(engine.get_types(provider_id).await.unwrap().len(), 1);
}
