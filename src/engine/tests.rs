use std::collections::BTreeMap;

use chrono::NaiveDate;
use tokio_test::{assert_err, assert_ok};

use super::*;
use crate::limits::{MAX_PRICE, MAX_TECHNICIANS};
use crate::notify::{NotificationKind, NotifyHub};
use crate::payment::StaticVerifier;

fn test_journal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("spabook_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 2).unwrap()
}

fn hourly() -> EngineSettings {
    EngineSettings {
        calendar: OperatingCalendar::from_wall_clock("13:00", "21:00", 60).unwrap(),
        ..EngineSettings::default()
    }
}

fn open_engine(path: PathBuf, settings: EngineSettings) -> Engine {
    Engine::new(
        path,
        settings,
        Arc::new(NotifyHub::new()),
        Arc::new(StaticVerifier::approving()),
    )
    .unwrap()
}

struct Salon {
    an: Technician,
    binh: Technician,
    massage: Service,
    hot_stone: AdditionalService,
}

async fn furnish(engine: &Engine) -> Salon {
    let an = engine
        .create_technician(TechnicianDraft {
            name: "An".into(),
            specialties: ["thai".to_string(), "shiatsu".to_string()].into(),
            experience: 5,
            rating: 4.8,
            notes: None,
        })
        .await
        .unwrap();
    let binh = engine
        .create_technician(TechnicianDraft {
            name: "Binh".into(),
            rating: 4.2,
            ..Default::default()
        })
        .await
        .unwrap();
    let massage = engine
        .create_service(
            "Body massage",
            Some("Full body"),
            BTreeMap::from([(60, 450_000), (90, 600_000)]),
        )
        .await
        .unwrap();
    let hot_stone = engine
        .create_additional_service("Hot stone", 50_000)
        .await
        .unwrap();
    Salon {
        an,
        binh,
        massage,
        hot_stone,
    }
}

fn request(technician: &Technician, service: &Service, start: &str, duration: Min) -> BookingRequest {
    BookingRequest {
        customer_name: "Mai".into(),
        customer_phone: "0901234567".into(),
        customer_notes: None,
        technician_id: technician.id,
        service_id: service.id,
        duration,
        additional_service_ids: vec![],
        date: day(),
        start_time: start.into(),
    }
}

fn names_at(slots: &[SlotAvailability], time: &str) -> Vec<String> {
    slots
        .iter()
        .find(|s| s.time == time)
        .map(|s| s.technicians.iter().map(|t| t.name.clone()).collect())
        .unwrap_or_default()
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn booking_at_fourteen_excludes_only_that_hour() {
    let engine = open_engine(test_journal_path("fourteen.journal"), hourly());
    let salon = furnish(&engine).await;
    assert_ok!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
    );

    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["Binh"]);
    assert_eq!(names_at(&slots, "15:00"), vec!["An", "Binh"]);
    assert_eq!(names_at(&slots, "13:00"), vec!["An", "Binh"]);

    let an_free = engine
        .find_technician_availability(salon.an.id, day(), Some(60))
        .await
        .unwrap();
    assert!(!an_free.contains(&"14:00".to_string()));
    assert!(an_free.contains(&"15:00".to_string()));
}

#[tokio::test]
async fn longer_duration_reaches_into_later_booking() {
    let engine = open_engine(test_journal_path("longer_duration.journal"), hourly());
    let salon = furnish(&engine).await;
    engine
        .create_booking(request(&salon.an, &salon.massage, "15:00", 60))
        .await
        .unwrap();

    // 14:00 for 90 minutes runs to 15:30.
    let slots = engine.find_available_slots(day(), 90).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["Binh"]);
    assert_eq!(names_at(&slots, "16:00"), vec!["An", "Binh"]);
}

#[tokio::test]
async fn block_nine_to_ten_on_half_hour_grid() {
    let engine = open_engine(test_journal_path("block_nine.journal"), EngineSettings::default());
    let salon = furnish(&engine).await;
    engine
        .block_time(salon.an.id, day(), "09:00", "10:00", Some("training"))
        .await
        .unwrap();

    let an_free = engine
        .find_technician_availability(salon.an.id, day(), None)
        .await
        .unwrap();
    assert!(!an_free.contains(&"09:00".to_string()));
    assert!(!an_free.contains(&"09:30".to_string()));
    assert!(an_free.contains(&"10:00".to_string()));

    let slots = engine.find_available_slots(day(), 30).await.unwrap();
    assert_eq!(names_at(&slots, "09:00"), vec!["Binh"]);
    assert_eq!(names_at(&slots, "10:00"), vec!["An", "Binh"]);
}

#[tokio::test]
async fn block_ending_at_slot_start_does_not_exclude() {
    let engine = open_engine(test_journal_path("block_touching.journal"), hourly());
    let salon = furnish(&engine).await;
    engine
        .block_time(salon.an.id, day(), "12:00", "13:00", None)
        .await
        .unwrap();
    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "13:00"), vec!["An", "Binh"]);
}

#[tokio::test]
async fn slots_never_list_nobody_and_repeat_identically() {
    let engine = open_engine(test_journal_path("no_empty.journal"), hourly());
    let salon = furnish(&engine).await;
    for tech in [&salon.an, &salon.binh] {
        engine
            .block_time(tech.id, day(), "13:00", "17:00", None)
            .await
            .unwrap();
    }

    let first = engine.find_available_slots(day(), 60).await.unwrap();
    let second = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(first, second);
    assert!(first.iter().all(|s| !s.technicians.is_empty()));
    assert_eq!(first.first().map(|s| s.time.as_str()), Some("17:00"));
    assert_eq!(first.len(), 5);
}

#[tokio::test]
async fn sessions_never_run_past_midnight() {
    let engine = open_engine(test_journal_path("midnight.journal"), EngineSettings::default());
    furnish(&engine).await;
    let slots = engine.find_available_slots(day(), 180).await.unwrap();
    assert_eq!(slots.last().map(|s| s.time.as_str()), Some("21:00"));
}

#[tokio::test]
async fn unknown_and_inactive_technician_availability() {
    let engine = open_engine(test_journal_path("tech_availability.journal"), hourly());
    let salon = furnish(&engine).await;
    assert!(matches!(
        engine.find_technician_availability(Ulid::new(), day(), None).await,
        Err(EngineError::NotFound(_))
    ));
    engine.set_technician_active(salon.binh.id, false).await.unwrap();
    assert!(
        engine
            .find_technician_availability(salon.binh.id, day(), None)
            .await
            .unwrap()
            .is_empty()
    );
    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert!(slots.iter().all(|s| s.technicians.iter().all(|t| t.id != salon.binh.id)));
}

#[tokio::test]
async fn free_windows_show_remaining_day() {
    let engine = open_engine(test_journal_path("free_windows.journal"), hourly());
    let salon = furnish(&engine).await;
    engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 90))
        .await
        .unwrap();
    engine
        .block_time(salon.an.id, day(), "18:00", "19:00", None)
        .await
        .unwrap();
    let windows = engine.technician_free_windows(salon.an.id, day()).await.unwrap();
    assert_eq!(
        windows,
        vec![Span::new(780, 840), Span::new(930, 1080), Span::new(1140, 1320)]
    );
}

// ── Admission ────────────────────────────────────────────

#[tokio::test]
async fn deposit_is_twenty_percent_of_snapshot_total() {
    let engine = open_engine(test_journal_path("deposit.journal"), hourly());
    let salon = furnish(&engine).await;
    let mut req = request(&salon.an, &salon.massage, "16:00", 60);
    req.additional_service_ids = vec![salon.hot_stone.id];
    let booking = engine.create_booking(req).await.unwrap();

    assert_eq!(booking.total_amount, 500_000);
    assert_eq!(booking.deposit_amount, 100_000);
    assert_eq!(booking.status, BookingStatus::Pending);
    assert!(!booking.is_paid);
    assert_eq!(booking.start_time(), "16:00");
    assert_eq!(booking.end_time(), "17:00");
    assert_eq!(booking.technician.name, "An");
    assert!(booking.code.starts_with("SB"));
    assert!(booking.qr_payload.starts_with(&booking.code));

    // Later price changes leave the booking alone.
    engine
        .update_additional_service(salon.hot_stone.id, "Hot stone", 80_000)
        .await
        .unwrap();
    engine
        .set_additional_service_active(salon.hot_stone.id, false)
        .await
        .unwrap();
    let stored = engine.get_booking(booking.id).unwrap();
    assert_eq!(stored.additional_services[0].price, 50_000);
    assert_eq!(stored.total_amount, 500_000);
}

#[tokio::test]
async fn concurrent_identical_bookings_one_wins() {
    let engine = Arc::new(open_engine(test_journal_path("race.journal"), hourly()));
    let salon = furnish(&engine).await;
    let req = request(&salon.an, &salon.massage, "14:00", 60);

    let a = tokio::spawn({
        let engine = engine.clone();
        let req = req.clone();
        async move { engine.create_booking(req).await }
    });
    let b = tokio::spawn({
        let engine = engine.clone();
        async move { engine.create_booking(req).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::Conflict { .. })))
            .count(),
        1
    );
    assert_eq!(engine.list_bookings_for_technician(salon.an.id).len(), 1);
}

#[tokio::test]
async fn overlapping_storm_never_double_books() {
    let engine = Arc::new(open_engine(
        test_journal_path("storm.journal"),
        EngineSettings::default(),
    ));
    let salon = furnish(&engine).await;

    let starts = ["13:00", "13:30", "14:00", "14:30", "15:00", "15:30", "16:00"];
    let mut handles = Vec::new();
    for round in 0..4 {
        for start in starts {
            let engine = engine.clone();
            let req = request(&salon.an, &salon.massage, start, if round % 2 == 0 { 60 } else { 90 });
            handles.push(tokio::spawn(async move { engine.create_booking(req).await }));
        }
    }
    for outcome in futures::future::join_all(handles).await {
        match outcome.unwrap() {
            Ok(_) | Err(EngineError::Conflict { .. }) => {}
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    let booked = engine.list_bookings_for_technician(salon.an.id);
    assert!(!booked.is_empty());
    for (i, a) in booked.iter().enumerate() {
        for b in &booked[i + 1..] {
            assert!(!a.span.overlaps(&b.span), "{a:?} overlaps {b:?}");
        }
    }
}

#[tokio::test]
async fn touching_bookings_both_commit() {
    let engine = open_engine(test_journal_path("touching.journal"), hourly());
    let salon = furnish(&engine).await;
    assert_ok!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
    );
    assert_ok!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "15:00", 60))
            .await
    );
    let err = assert_err!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 90))
            .await
    );
    assert_eq!(err.kind(), "conflict");
}

#[tokio::test]
async fn booking_over_a_block_conflicts() {
    let engine = open_engine(test_journal_path("booking_over_block.journal"), hourly());
    let salon = furnish(&engine).await;
    let block = engine
        .block_time(salon.an.id, day(), "14:30", "15:00", None)
        .await
        .unwrap();
    match engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
    {
        Err(EngineError::Conflict { technician_id, with }) => {
            assert_eq!(technician_id, salon.an.id);
            assert_eq!(with, block.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
}

#[tokio::test]
async fn admission_rejects_bad_requests() {
    let engine = open_engine(test_journal_path("bad_requests.journal"), EngineSettings::default());
    let salon = furnish(&engine).await;

    let off_grid = request(&salon.an, &salon.massage, "09:15", 60);
    assert!(matches!(engine.create_booking(off_grid).await, Err(EngineError::Validation(_))));

    let no_tier = request(&salon.an, &salon.massage, "10:00", 45);
    assert!(matches!(engine.create_booking(no_tier).await, Err(EngineError::Validation(_))));

    let garbage_time = request(&salon.an, &salon.massage, "10h", 60);
    assert!(matches!(engine.create_booking(garbage_time).await, Err(EngineError::Validation(_))));

    let mut blank_name = request(&salon.an, &salon.massage, "10:00", 60);
    blank_name.customer_name = "   ".into();
    assert!(matches!(engine.create_booking(blank_name).await, Err(EngineError::Validation(_))));

    let mut ghost = request(&salon.an, &salon.massage, "10:00", 60);
    ghost.technician_id = Ulid::new();
    assert!(matches!(engine.create_booking(ghost).await, Err(EngineError::NotFound(_))));

    let mut twice = request(&salon.an, &salon.massage, "10:00", 60);
    twice.additional_service_ids = vec![salon.hot_stone.id, salon.hot_stone.id];
    assert!(matches!(engine.create_booking(twice).await, Err(EngineError::Validation(_))));

    engine.set_service_active(salon.massage.id, false).await.unwrap();
    let retired = request(&salon.an, &salon.massage, "10:00", 60);
    assert!(matches!(engine.create_booking(retired).await, Err(EngineError::Validation(_))));

    assert!(engine.list_bookings().is_empty());
}

#[tokio::test]
async fn late_long_session_is_refused() {
    let settings = EngineSettings {
        calendar: OperatingCalendar::from_wall_clock("09:00", "23:00", 60).unwrap(),
        ..EngineSettings::default()
    };
    let engine = open_engine(test_journal_path("late_long.journal"), settings);
    let salon = furnish(&engine).await;
    assert!(matches!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "23:00", 90))
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn inactive_technician_cannot_be_booked() {
    let engine = open_engine(test_journal_path("inactive_booking.journal"), hourly());
    let salon = furnish(&engine).await;
    engine.set_technician_active(salon.an.id, false).await.unwrap();
    assert!(matches!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await,
        Err(EngineError::Validation(_))
    ));
}

// ── Booking lifecycle ────────────────────────────────────

#[tokio::test]
async fn payment_confirms_once() {
    let engine = open_engine(test_journal_path("payment.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();

    let confirmed = engine.verify_payment(booking.id, "bank_transfer").await.unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert!(confirmed.is_paid);
    assert_eq!(confirmed.payment_method.as_deref(), Some("bank_transfer"));

    assert!(matches!(
        engine.verify_payment(booking.id, "cash").await,
        Err(EngineError::InvalidState {
            status: BookingStatus::Confirmed,
            ..
        })
    ));
    assert!(matches!(
        engine.cancel_booking(booking.id).await,
        Err(EngineError::InvalidState { .. })
    ));

    // Confirmed bookings keep their slot.
    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["Binh"]);
}

#[tokio::test]
async fn declined_payment_leaves_booking_pending() {
    let engine = Engine::new(
        test_journal_path("declined.journal"),
        hourly(),
        Arc::new(NotifyHub::new()),
        Arc::new(StaticVerifier::declining()),
    )
    .unwrap();
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();

    assert!(matches!(
        engine.verify_payment(booking.id, "bank_transfer").await,
        Err(EngineError::PaymentDeclined(id)) if id == booking.id
    ));
    let stored = engine.get_booking(booking.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Pending);
    assert!(!stored.is_paid);
}

#[tokio::test]
async fn cancelling_frees_the_slot() {
    let engine = open_engine(test_journal_path("cancel.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    let cancelled = engine.cancel_booking(booking.id).await.unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);

    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["An", "Binh"]);
    assert_ok!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
    );
    assert!(matches!(
        engine.verify_payment(booking.id, "cash").await,
        Err(EngineError::InvalidState {
            status: BookingStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn stale_pending_bookings_expire() {
    let engine = open_engine(test_journal_path("expire.journal"), hourly());
    let salon = furnish(&engine).await;
    let unpaid = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    let paid = engine
        .create_booking(request(&salon.binh, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    engine.verify_payment(paid.id, "cash").await.unwrap();

    let ttl = engine.settings().pending_ttl_ms;
    assert!(
        engine
            .expire_stale_pending_bookings(unpaid.created_at + ttl - 1)
            .await
            .is_empty()
    );
    let expired = engine
        .expire_stale_pending_bookings(unpaid.created_at + ttl)
        .await;
    assert_eq!(expired, vec![unpaid.id]);
    assert_eq!(
        engine.get_booking(unpaid.id).unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(
        engine.get_booking(paid.id).unwrap().status,
        BookingStatus::Confirmed
    );
    assert!(
        engine
            .expire_stale_pending_bookings(unpaid.created_at + ttl * 2)
            .await
            .is_empty()
    );
}

#[tokio::test]
async fn unbounded_ttl_never_expires() {
    let settings = EngineSettings {
        pending_ttl_ms: i64::MAX,
        ..hourly()
    };
    let engine = open_engine(test_journal_path("ttl_max.journal"), settings);
    let salon = furnish(&engine).await;
    let unpaid = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    let a_decade_later = unpaid.created_at + 10 * 365 * 24 * 60 * 60 * 1000;
    assert!(
        engine
            .expire_stale_pending_bookings(a_decade_later)
            .await
            .is_empty()
    );
    assert_eq!(
        engine.get_booking(unpaid.id).unwrap().status,
        BookingStatus::Pending
    );
}

#[tokio::test]
async fn absurd_prices_are_refused() {
    let engine = open_engine(test_journal_path("absurd_price.journal"), hourly());
    assert!(matches!(
        engine
            .create_service("Gold leaf", None, BTreeMap::from([(60, i64::MAX / 10)]))
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
    assert!(matches!(
        engine.create_additional_service("Caviar", i64::MAX).await,
        Err(EngineError::LimitExceeded(_))
    ));

    // Largest allowed prices still total and split without overflow.
    let salon = furnish(&engine).await;
    let top = engine
        .create_service("Royal", None, BTreeMap::from([(60, MAX_PRICE)]))
        .await
        .unwrap();
    let extras = engine
        .create_additional_service("Diamond dust", MAX_PRICE)
        .await
        .unwrap();
    let mut pricey = request(&salon.an, &top, "14:00", 60);
    pricey.additional_service_ids = vec![extras.id];
    let booking = engine.create_booking(pricey).await.unwrap();
    assert_eq!(booking.total_amount, 2 * MAX_PRICE);
    assert_eq!(booking.deposit_amount, 2 * MAX_PRICE / 5);
}

#[tokio::test]
async fn lookup_by_code_tolerates_case() {
    let engine = open_engine(test_journal_path("lookup.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();

    let typed = format!("  {} ", booking.code.to_lowercase());
    assert_eq!(engine.lookup_booking_by_code(&typed).unwrap().id, booking.id);
    assert!(matches!(
        engine.lookup_booking_by_code("SBNOPE"),
        Err(EngineError::CodeNotFound(_))
    ));
}

#[tokio::test]
async fn bookings_list_newest_first_and_by_date() {
    let engine = open_engine(test_journal_path("listing.journal"), hourly());
    let salon = furnish(&engine).await;
    let late = engine
        .create_booking(request(&salon.an, &salon.massage, "18:00", 60))
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    let early = engine
        .create_booking(request(&salon.binh, &salon.massage, "13:00", 60))
        .await
        .unwrap();

    let newest_first: Vec<Ulid> = engine.list_bookings().iter().map(|b| b.id).collect();
    assert_eq!(newest_first, vec![early.id, late.id]);
    let by_start: Vec<Ulid> = engine
        .list_bookings_for_date(day())
        .iter()
        .map(|b| b.id)
        .collect();
    assert_eq!(by_start, vec![early.id, late.id]);
    assert!(engine.list_bookings_for_date(day().succ_opt().unwrap()).is_empty());
}

// ── Admin edits ──────────────────────────────────────────

#[tokio::test]
async fn reschedule_within_own_slot_and_to_free_time() {
    let engine = open_engine(test_journal_path("reschedule_same.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 90))
        .await
        .unwrap();

    // 15:00-16:30 overlaps the booking's own 14:00-15:30 and is still allowed.
    let moved = assert_ok!(
        engine
            .reschedule_booking(booking.id, salon.an.id, day(), "15:00")
            .await
    );
    assert_eq!(moved.start_time(), "15:00");
    assert_eq!(moved.end_time(), "16:30");
    assert_eq!(moved.total_amount, booking.total_amount);
    assert_eq!(moved.code, booking.code);

    let an_free = engine
        .find_technician_availability(salon.an.id, day(), Some(60))
        .await
        .unwrap();
    assert!(an_free.contains(&"14:00".to_string()));
    assert!(!an_free.contains(&"15:00".to_string()));
    assert!(!an_free.contains(&"16:00".to_string()));

    let next_day = day().succ_opt().unwrap();
    let moved = engine
        .reschedule_booking(booking.id, salon.an.id, next_day, "13:00")
        .await
        .unwrap();
    assert_eq!(moved.date, next_day);
    assert!(engine.list_bookings_for_date(day()).is_empty());
}

#[tokio::test]
async fn reschedule_onto_taken_time_is_refused() {
    let engine = open_engine(test_journal_path("reschedule_conflict.journal"), hourly());
    let salon = furnish(&engine).await;
    let mine = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    let theirs = engine
        .create_booking(request(&salon.binh, &salon.massage, "16:00", 60))
        .await
        .unwrap();
    engine
        .block_time(salon.binh.id, day(), "18:00", "19:00", None)
        .await
        .unwrap();

    let err = assert_err!(
        engine
            .reschedule_booking(mine.id, salon.binh.id, day(), "16:00")
            .await
    );
    match err {
        EngineError::Conflict { technician_id, with } => {
            assert_eq!(technician_id, salon.binh.id);
            assert_eq!(with, theirs.id);
        }
        other => panic!("expected conflict, got {other:?}"),
    }
    assert!(matches!(
        engine
            .reschedule_booking(mine.id, salon.binh.id, day(), "18:00")
            .await,
        Err(EngineError::Conflict { .. })
    ));
    assert!(matches!(
        engine
            .reschedule_booking(mine.id, salon.an.id, day(), "14:30")
            .await,
        Err(EngineError::Validation(_))
    ));

    // Nothing moved.
    let unchanged = engine.get_booking(mine.id).unwrap();
    assert_eq!(unchanged.technician.id, salon.an.id);
    assert_eq!(unchanged.start_time(), "14:00");
}

#[tokio::test]
async fn reschedule_to_another_technician_moves_occupancy() {
    let engine = open_engine(test_journal_path("reschedule_cross.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    engine.verify_payment(booking.id, "cash").await.unwrap();

    let moved = engine
        .reschedule_booking(booking.id, salon.binh.id, day(), "14:00")
        .await
        .unwrap();
    assert_eq!(moved.technician.name, "Binh");
    assert_eq!(moved.status, BookingStatus::Confirmed);

    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["An"]);
    assert!(engine.list_bookings_for_technician(salon.an.id).is_empty());
    assert_eq!(engine.list_bookings_for_technician(salon.binh.id).len(), 1);

    engine.set_technician_active(salon.an.id, false).await.unwrap();
    assert!(matches!(
        engine
            .reschedule_booking(booking.id, salon.an.id, day(), "15:00")
            .await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn crossing_moves_do_not_deadlock() {
    let engine = Arc::new(open_engine(test_journal_path("reschedule_swap.journal"), hourly()));
    let salon = furnish(&engine).await;
    let an_booking = engine
        .create_booking(request(&salon.an, &salon.massage, "13:00", 60))
        .await
        .unwrap();
    let binh_booking = engine
        .create_booking(request(&salon.binh, &salon.massage, "13:00", 60))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for round in 0..20u32 {
        let hour = format!("{}:00", 14 + round % 6);
        for (booking, target) in [(an_booking.id, salon.binh.id), (binh_booking.id, salon.an.id)] {
            let engine = engine.clone();
            let hour = hour.clone();
            handles.push(tokio::spawn(async move {
                engine.reschedule_booking(booking, target, day(), &hour).await
            }));
        }
    }
    let finished = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        futures::future::join_all(handles),
    )
    .await
    .expect("moves deadlocked");
    assert!(finished.iter().all(|r| r.is_ok()));

    let a = engine.get_booking(an_booking.id).unwrap();
    let b = engine.get_booking(binh_booking.id).unwrap();
    if a.technician.id == b.technician.id {
        assert!(!a.span.overlaps(&b.span));
    }
}

#[tokio::test]
async fn cancelled_bookings_cannot_be_edited() {
    let engine = open_engine(test_journal_path("edit_cancelled.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    engine.cancel_booking(booking.id).await.unwrap();

    assert!(matches!(
        engine
            .reschedule_booking(booking.id, salon.an.id, day(), "15:00")
            .await,
        Err(EngineError::InvalidState { .. })
    ));
    assert!(matches!(
        engine
            .update_booking_details(booking.id, "Mai", "0900", None)
            .await,
        Err(EngineError::InvalidState { .. })
    ));
}

#[tokio::test]
async fn details_edit_keeps_the_slot() {
    let engine = open_engine(test_journal_path("edit_details.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    let edited = engine
        .update_booking_details(booking.id, " Mai Anh ", "0907777777", Some("late arrival"))
        .await
        .unwrap();
    assert_eq!(edited.customer.name, "Mai Anh");
    assert_eq!(edited.customer.notes.as_deref(), Some("late arrival"));
    assert_eq!(edited.span, booking.span);
    assert!(matches!(
        engine.update_booking_details(booking.id, "  ", "0900", None).await,
        Err(EngineError::Validation(_))
    ));
}

#[tokio::test]
async fn deleting_a_booking_frees_time_and_retires_its_code() {
    let engine = open_engine(test_journal_path("delete_booking.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.binh, &salon.massage, "14:00", 60))
        .await
        .unwrap();

    assert_ok!(engine.delete_booking(booking.id).await);
    assert!(matches!(engine.get_booking(booking.id), Err(EngineError::NotFound(_))));
    assert!(matches!(
        engine.lookup_booking_by_code(&booking.code),
        Err(EngineError::CodeNotFound(_))
    ));
    assert!(!engine.store().reserve_code(&booking.code, Ulid::new()));
    assert!(matches!(
        engine.delete_booking(booking.id).await,
        Err(EngineError::NotFound(_))
    ));

    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["An", "Binh"]);
    assert_ok!(engine.delete_technician(salon.binh.id).await);
}

#[tokio::test]
async fn edits_survive_restart() {
    let path = test_journal_path("edits_restart.journal");
    let (salon, moved, deleted) = {
        let engine = open_engine(path.clone(), hourly());
        let salon = furnish(&engine).await;
        let moved = engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
            .unwrap();
        engine
            .reschedule_booking(moved.id, salon.binh.id, day(), "17:00")
            .await
            .unwrap();
        engine
            .update_booking_details(moved.id, "Mai", "0911111111", None)
            .await
            .unwrap();
        let deleted = engine
            .create_booking(request(&salon.an, &salon.massage, "19:00", 60))
            .await
            .unwrap();
        engine.delete_booking(deleted.id).await.unwrap();
        (salon, moved, deleted)
    };

    let engine = open_engine(path.clone(), hourly());
    let after = engine.get_booking(moved.id).unwrap();
    assert_eq!(after.technician.id, salon.binh.id);
    assert_eq!(after.start_time(), "17:00");
    assert_eq!(after.customer.phone, "0911111111");
    assert!(matches!(engine.get_booking(deleted.id), Err(EngineError::NotFound(_))));

    let an_free = engine
        .find_technician_availability(salon.an.id, day(), Some(60))
        .await
        .unwrap();
    assert!(an_free.contains(&"14:00".to_string()));
    assert!(an_free.contains(&"19:00".to_string()));
    assert!(matches!(
        engine
            .create_booking(request(&salon.binh, &salon.massage, "17:00", 60))
            .await,
        Err(EngineError::Conflict { .. })
    ));

    // And through a compaction.
    engine.compact_journal().await.unwrap();
    drop(engine);
    let engine = open_engine(path, hourly());
    assert_eq!(engine.get_booking(moved.id).unwrap().technician.id, salon.binh.id);
}

// ── Blocking ─────────────────────────────────────────────

#[tokio::test]
async fn block_update_and_unblock() {
    let engine = open_engine(test_journal_path("block_cycle.journal"), hourly());
    let salon = furnish(&engine).await;
    let block = engine
        .block_time(salon.an.id, day(), "13:00", "15:00", Some("lunch"))
        .await
        .unwrap();

    let moved = engine
        .update_block(block.id, "17:00", "18:00", Some("errand"))
        .await
        .unwrap();
    assert_eq!(moved.span, Span::new(1020, 1080));
    assert_eq!(moved.reason.as_deref(), Some("errand"));

    let an_free = engine
        .find_technician_availability(salon.an.id, day(), Some(60))
        .await
        .unwrap();
    assert!(an_free.contains(&"13:00".to_string()));
    assert!(!an_free.contains(&"17:00".to_string()));

    let removed = engine.unblock_time(block.id).await.unwrap();
    assert_eq!(removed.id, block.id);
    assert!(engine.list_blocked_slots().is_empty());
    assert!(matches!(
        engine.unblock_time(block.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn block_validation() {
    let engine = open_engine(test_journal_path("block_validation.journal"), hourly());
    let salon = furnish(&engine).await;
    assert!(matches!(
        engine.block_time(salon.an.id, day(), "15:00", "15:00", None).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.block_time(salon.an.id, day(), "16:00", "15:00", None).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.block_time(Ulid::new(), day(), "13:00", "14:00", None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn overlapping_blocks_are_allowed() {
    let engine = open_engine(test_journal_path("block_overlap.journal"), hourly());
    let salon = furnish(&engine).await;
    engine
        .block_time(salon.an.id, day(), "13:00", "15:00", None)
        .await
        .unwrap();
    engine
        .block_time(salon.an.id, day(), "14:00", "16:00", None)
        .await
        .unwrap();
    assert_eq!(engine.list_blocked_slots_for_technician(salon.an.id).len(), 2);
    assert_eq!(engine.list_blocked_slots_for_date(day()).len(), 2);
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn technician_delete_refused_while_booked() {
    let engine = open_engine(test_journal_path("tech_delete.journal"), hourly());
    let salon = furnish(&engine).await;
    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    engine.cancel_booking(booking.id).await.unwrap();
    assert!(matches!(
        engine.delete_technician(salon.an.id).await,
        Err(EngineError::HasBookings(_))
    ));

    engine
        .block_time(salon.binh.id, day(), "13:00", "14:00", None)
        .await
        .unwrap();
    engine.delete_technician(salon.binh.id).await.unwrap();
    assert!(matches!(
        engine.get_technician(salon.binh.id),
        Err(EngineError::NotFound(_))
    ));
    assert!(engine.list_blocked_slots().is_empty());
    assert_eq!(engine.list_active_technicians().len(), 1);
    assert!(matches!(
        engine.block_time(salon.binh.id, day(), "13:00", "14:00", None).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn technician_cap_refuses_the_next_create() {
    let engine = Arc::new(open_engine(test_journal_path("tech_cap.journal"), hourly()));
    let creates = (0..MAX_TECHNICIANS).map(|i| {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .create_technician(TechnicianDraft {
                    name: format!("Tech {i}"),
                    rating: 4.0,
                    ..Default::default()
                })
                .await
        })
    });
    for done in futures::future::join_all(creates).await {
        assert_ok!(done.unwrap());
    }
    assert_eq!(engine.list_technicians().len(), MAX_TECHNICIANS);
    assert!(matches!(
        engine
            .create_technician(TechnicianDraft {
                name: "One too many".into(),
                ..Default::default()
            })
            .await,
        Err(EngineError::LimitExceeded(_))
    ));
}

#[tokio::test]
async fn technician_validation_and_update() {
    let engine = open_engine(test_journal_path("tech_update.journal"), hourly());
    let salon = furnish(&engine).await;
    assert!(matches!(
        engine
            .create_technician(TechnicianDraft {
                name: "Cuc".into(),
                rating: 7.0,
                ..Default::default()
            })
            .await,
        Err(EngineError::Validation(_))
    ));
    let updated = engine
        .update_technician(
            salon.binh.id,
            TechnicianDraft {
                name: "Binh Tran".into(),
                specialties: [" foot ".to_string(), "".to_string()].into(),
                experience: 2,
                rating: 4.5,
                notes: Some("weekends".into()),
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.name, "Binh Tran");
    assert_eq!(updated.specialties.len(), 1);
    assert!(updated.specialties.contains("foot"));
    assert!(updated.active);
    assert_eq!(updated.created_at, salon.binh.created_at);
}

#[tokio::test]
async fn service_tiers_must_be_sane() {
    let engine = open_engine(test_journal_path("service_tiers.journal"), hourly());
    assert!(matches!(
        engine.create_service("Empty", None, BTreeMap::new()).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine
            .create_service("Free", None, BTreeMap::from([(60, -1)]))
            .await,
        Err(EngineError::Validation(_))
    ));
    assert!(
        engine
            .create_service("Marathon", None, BTreeMap::from([(600, 1_000_000)]))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn repricing_keeps_quoted_bookings() {
    let engine = open_engine(test_journal_path("reprice.journal"), hourly());
    let salon = furnish(&engine).await;
    let quoted = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();

    let repriced = engine
        .update_service(
            salon.massage.id,
            "Body massage",
            None,
            BTreeMap::from([(60, 500_000)]),
        )
        .await
        .unwrap();
    assert_eq!(repriced.price_for(60), Some(500_000));
    assert_eq!(repriced.price_for(90), None);
    assert_eq!(repriced.description, None);

    assert_eq!(engine.get_booking(quoted.id).unwrap().service.price, 450_000);
    let fresh = engine
        .create_booking(request(&salon.binh, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    assert_eq!(fresh.total_amount, 500_000);
    assert_eq!(fresh.deposit_amount, 100_000);
    assert!(matches!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "16:00", 90))
            .await,
        Err(EngineError::Validation(_))
    ));
}

// ── Notifications ────────────────────────────────────────

#[tokio::test]
async fn commits_are_announced() {
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        test_journal_path("announce.journal"),
        hourly(),
        hub.clone(),
        Arc::new(StaticVerifier::approving()),
    )
    .unwrap();
    let salon = furnish(&engine).await;
    let mut all = hub.subscribe_all();
    let mut an_only = hub.subscribe(salon.an.id);

    let booking = engine
        .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
        .await
        .unwrap();
    engine.verify_payment(booking.id, "cash").await.unwrap();
    let block = engine
        .block_time(salon.binh.id, day(), "13:00", "14:00", None)
        .await
        .unwrap();
    engine.unblock_time(block.id).await.unwrap();

    let kinds: Vec<NotificationKind> = (0..4).map(|_| all.try_recv().unwrap().kind).collect();
    assert_eq!(
        kinds,
        vec![
            NotificationKind::BookingCreated,
            NotificationKind::PaymentVerified,
            NotificationKind::TimeSlotBlocked,
            NotificationKind::TimeSlotUnblocked,
        ]
    );

    let created = an_only.try_recv().unwrap();
    assert_eq!(created.kind, NotificationKind::BookingCreated);
    assert_eq!(created.data["code"], booking.code);
    assert_eq!(an_only.try_recv().unwrap().kind, NotificationKind::PaymentVerified);
    assert!(an_only.try_recv().is_err());
}

#[tokio::test]
async fn technician_changes_are_announced() {
    let hub = Arc::new(NotifyHub::new());
    let engine = Engine::new(
        test_journal_path("announce_tech.journal"),
        hourly(),
        hub.clone(),
        Arc::new(StaticVerifier::approving()),
    )
    .unwrap();
    let mut all = hub.subscribe_all();
    let tech = engine
        .create_technician(TechnicianDraft {
            name: "Dao".into(),
            rating: 3.0,
            ..Default::default()
        })
        .await
        .unwrap();
    engine.set_technician_active(tech.id, false).await.unwrap();
    engine.delete_technician(tech.id).await.unwrap();

    assert_eq!(all.try_recv().unwrap().kind, NotificationKind::TechnicianCreated);
    assert_eq!(all.try_recv().unwrap().kind, NotificationKind::TechnicianUpdated);
    assert_eq!(all.try_recv().unwrap().kind, NotificationKind::TechnicianDeleted);
}

// ── Journal ──────────────────────────────────────────────

#[tokio::test]
async fn restart_replays_everything() {
    let path = test_journal_path("restart.journal");
    let (salon, confirmed, cancelled, block) = {
        let engine = open_engine(path.clone(), hourly());
        let salon = furnish(&engine).await;
        let confirmed = engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
            .unwrap();
        engine.verify_payment(confirmed.id, "cash").await.unwrap();
        let cancelled = engine
            .create_booking(request(&salon.binh, &salon.massage, "15:00", 60))
            .await
            .unwrap();
        engine.cancel_booking(cancelled.id).await.unwrap();
        let block = engine
            .block_time(salon.binh.id, day(), "17:00", "18:00", Some("doctor"))
            .await
            .unwrap();
        engine.set_technician_active(salon.an.id, false).await.unwrap();
        (salon, confirmed, cancelled, block)
    };

    let engine = open_engine(path, hourly());
    assert_eq!(
        engine.get_booking(confirmed.id).unwrap().status,
        BookingStatus::Confirmed
    );
    assert_eq!(
        engine.get_booking(cancelled.id).unwrap().status,
        BookingStatus::Cancelled
    );
    assert_eq!(engine.list_blocked_slots(), vec![block]);
    assert!(!engine.get_technician(salon.an.id).unwrap().active);
    assert_eq!(
        engine.lookup_booking_by_code(&confirmed.code).unwrap().id,
        confirmed.id
    );

    // Occupancy came back too.
    let binh_free = engine
        .find_technician_availability(salon.binh.id, day(), Some(60))
        .await
        .unwrap();
    assert!(binh_free.contains(&"15:00".to_string()));
    assert!(!binh_free.contains(&"17:00".to_string()));
    let an_windows = engine.technician_free_windows(salon.an.id, day()).await.unwrap();
    assert!(!an_windows.iter().any(|w| w.contains_instant(14 * 60)));
}

#[tokio::test]
async fn bookings_after_a_torn_tail_survive_the_next_restart() {
    let path = test_journal_path("torn_restart.journal");
    let salon = {
        let engine = open_engine(path.clone(), hourly());
        furnish(&engine).await
    };
    {
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x01, 0x02]).unwrap();
    }

    let booking = {
        let engine = open_engine(path.clone(), hourly());
        assert_eq!(engine.list_technicians().len(), 2);
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
            .unwrap()
    };

    let engine = open_engine(path, hourly());
    assert_eq!(engine.get_booking(booking.id).unwrap().code, booking.code);
    assert!(matches!(
        engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await,
        Err(EngineError::Conflict { .. })
    ));
}

#[tokio::test]
async fn compaction_keeps_state() {
    let path = test_journal_path("compaction.journal");
    let (salon, booking) = {
        let engine = open_engine(path.clone(), hourly());
        let salon = furnish(&engine).await;
        for _ in 0..5 {
            let block = engine
                .block_time(salon.an.id, day(), "20:00", "21:00", None)
                .await
                .unwrap();
            engine.unblock_time(block.id).await.unwrap();
        }
        let booking = engine
            .create_booking(request(&salon.an, &salon.massage, "14:00", 60))
            .await
            .unwrap();
        engine.verify_payment(booking.id, "cash").await.unwrap();

        assert_eq!(engine.journal_appends_since_compact().await, 16);
        engine.compact_journal().await.unwrap();
        assert_eq!(engine.journal_appends_since_compact().await, 0);
        (salon, booking)
    };

    // Services, extra, two technicians and one booking.
    assert_eq!(crate::journal::Journal::replay(&path).unwrap().len(), 5);

    let engine = open_engine(path, hourly());
    let stored = engine.get_booking(booking.id).unwrap();
    assert_eq!(stored.status, BookingStatus::Confirmed);
    assert!(engine.list_blocked_slots().is_empty());
    let slots = engine.find_available_slots(day(), 60).await.unwrap();
    assert_eq!(names_at(&slots, "14:00"), vec!["Binh"]);
    assert_eq!(engine.list_technicians().len(), 2);
    assert_eq!(engine.get_technician(salon.an.id).unwrap().name, "An");
}

#[tokio::test]
async fn group_commit_survives_concurrent_writers() {
    let path = test_journal_path("group_commit.journal");
    let engine = Arc::new(open_engine(path.clone(), EngineSettings::default()));

    let n = 20;
    let handles: Vec<_> = (0..n)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                engine
                    .create_technician(TechnicianDraft {
                        name: format!("T{i:02}"),
                        rating: 4.0,
                        ..Default::default()
                    })
                    .await
            })
        })
        .collect();
    for h in futures::future::join_all(handles).await {
        h.unwrap().unwrap();
    }
    assert_eq!(engine.list_technicians().len(), n);

    let replayed = open_engine(path, EngineSettings::default());
    assert_eq!(replayed.list_technicians().len(), n);
}
