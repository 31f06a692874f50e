use chrono::NaiveDate;
use edutrack::db::{self, AttendanceFilter, DateOrder, Pool};
use edutrack::model::{AttendanceStatus, FacultyId, Mark, StudentId, SubjectId};
use edutrack::service::{AttendanceService, MarkAttendanceInput, MarkError, ServicePolicy};
use std::sync::Arc;

async fn setup_pool() -> Pool {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    pool
}

struct Fixture {
    faculty: FacultyId,
    subject: SubjectId,
    other_subject: SubjectId,
    students: Vec<StudentId>,
}

async fn seed(pool: &Pool) -> Fixture {
    let faculty = db::insert_faculty(pool, "Dr. Iyer", Some("iyer@college.edu")).await.unwrap();
    let subject = db::insert_subject(pool, "CS101", "Programming", 1, 4, Some(faculty)).await.unwrap();
    let other_subject = db::insert_subject(pool, "MA101", "Calculus", 1, 3, None).await.unwrap();
    let mut students = Vec::new();
    for (roll, name) in [("CS001", "Asha Rao"), ("CS002", "Ben Okafor"), ("CS003", "Chen Li")] {
        let id = db::insert_student(pool, roll, name, None, 1).await.unwrap();
        db::enroll(pool, id, subject).await.unwrap();
        students.push(id);
    }
    Fixture {
        faculty,
        subject,
        other_subject,
        students,
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn input(fx: &Fixture, student: StudentId, day: &str, status: &str) -> MarkAttendanceInput {
    MarkAttendanceInput {
        student_id: Some(student.get()),
        subject_id: Some(fx.subject.get()),
        faculty_id: Some(fx.faculty.get()),
        attendance_date: Some(day.into()),
        status: Some(status.into()),
    }
}

#[tokio::test]
async fn marking_twice_is_idempotent() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool.clone(), ServicePolicy::default());
    let s = fx.students[0];

    let first = svc.mark_attendance(&input(&fx, s, "2023-10-02", "present")).await.unwrap();
    let second = svc.mark_attendance(&input(&fx, s, "2023-10-02", "present")).await.unwrap();
    assert_eq!(first, second);

    let records = svc.get_attendance(&AttendanceFilter::student(s)).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Present);
}

#[tokio::test]
async fn remarking_overwrites_in_place() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool.clone(), ServicePolicy::default());
    let s = fx.students[1];

    let first = svc.mark_attendance(&input(&fx, s, "2023-10-02", "present")).await.unwrap();
    // Same day through a full timestamp lands on the same key.
    let second = svc
        .mark_attendance(&input(&fx, s, "2023-10-02T10:15:00Z", "absent"))
        .await
        .unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(second.status, AttendanceStatus::Absent);

    let records = db::attendance_for_student_subject(&pool, s, fx.subject, DateOrder::Ascending)
        .await
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, AttendanceStatus::Absent);
}

#[tokio::test]
async fn invalid_input_never_reaches_the_store() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool.clone(), ServicePolicy::default());
    let s = fx.students[0];

    for (day, status) in [("2023-13-01", "present"), ("2023-10-02", "holiday"), ("yesterday", "absent")] {
        let resp = svc.respond(&input(&fx, s, day, status)).await;
        assert!(!resp.success, "{day} {status} should be rejected");
        assert!(resp.error.is_some());
    }
    let mut no_student = input(&fx, s, "2023-10-02", "present");
    no_student.student_id = None;
    assert!(matches!(
        svc.mark_attendance(&no_student).await,
        Err(MarkError::Validation(_))
    ));

    let all = svc.get_attendance(&AttendanceFilter::default()).await.unwrap();
    assert!(all.is_empty());
}

#[tokio::test]
async fn respond_reports_success() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool, ServicePolicy::default());
    let resp = svc.respond(&input(&fx, fx.students[0], "2023-10-02", "present")).await;
    assert!(resp.success);
    assert!(resp.error.is_none());
}

#[tokio::test]
async fn enrollment_is_enforced_when_configured() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let mark = Mark {
        student_id: fx.students[0],
        subject_id: fx.other_subject,
        faculty_id: fx.faculty,
        date: date(2023, 10, 2),
        status: AttendanceStatus::Present,
    };

    let strict = AttendanceService::new(pool.clone(), ServicePolicy::default());
    match strict.record(&mark).await {
        Err(MarkError::NotEnrolled {
            student_id,
            subject_id,
        }) => {
            assert_eq!(student_id, fx.students[0]);
            assert_eq!(subject_id, fx.other_subject);
        }
        other => panic!("expected NotEnrolled, got {other:?}"),
    }

    let lenient = AttendanceService::new(
        pool.clone(),
        ServicePolicy {
            enforce_enrollment: false,
            ..ServicePolicy::default()
        },
    );
    lenient.record(&mark).await.unwrap();
}

#[tokio::test]
async fn unknown_ids_surface_as_store_errors() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(
        pool,
        ServicePolicy {
            enforce_enrollment: false,
            ..ServicePolicy::default()
        },
    );
    let mark = Mark {
        student_id: StudentId(999),
        subject_id: fx.subject,
        faculty_id: fx.faculty,
        date: date(2023, 10, 2),
        status: AttendanceStatus::Present,
    };
    match svc.record(&mark).await {
        Err(MarkError::Store(err)) => assert!(!err.is_connectivity()),
        other => panic!("expected store error, got {other:?}"),
    }
}

#[tokio::test]
async fn batch_reports_partial_failure_without_rollback() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let outsider = db::insert_student(&pool, "CS099", "Dana Kim", None, 1).await.unwrap();
    let svc = AttendanceService::new(pool.clone(), ServicePolicy::default());
    let day = date(2023, 10, 3);

    let entries = vec![
        (fx.students[0], AttendanceStatus::Present),
        (outsider, AttendanceStatus::Present),
        (fx.students[1], AttendanceStatus::Absent),
    ];
    let report = svc.mark_batch(fx.subject, fx.faculty, day, &entries).await;
    assert_eq!(report.total, 3);
    assert_eq!(report.succeeded, vec![fx.students[0], fx.students[1]]);
    assert_eq!(report.failed_students(), vec![outsider]);
    assert_eq!(report.summary(), "2 of 3 succeeded");

    let stored = db::attendance_for_subject_date(&pool, fx.subject, day).await.unwrap();
    assert_eq!(stored.len(), 2);

    let err = report.into_result().unwrap_err();
    assert_eq!(err.succeeded, 2);
    assert_eq!(err.total, 3);
}

#[tokio::test]
async fn toggle_cycles_present_and_absent() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool, ServicePolicy::default());
    let s = fx.students[2];
    let day = date(2023, 10, 4);

    let first = svc.toggle_attendance(s, fx.subject, fx.faculty, day).await.unwrap();
    assert_eq!(first.status, AttendanceStatus::Present);
    let second = svc.toggle_attendance(s, fx.subject, fx.faculty, day).await.unwrap();
    assert_eq!(second.status, AttendanceStatus::Absent);
    let third = svc.toggle_attendance(s, fx.subject, fx.faculty, day).await.unwrap();
    assert_eq!(third.status, AttendanceStatus::Present);
    assert_eq!(first.id, third.id);
}

#[tokio::test]
async fn marking_sheet_lists_unmarked_students() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool, ServicePolicy::default());
    let day = date(2023, 10, 2);
    svc.mark_batch(
        fx.subject,
        fx.faculty,
        day,
        &[(fx.students[0], AttendanceStatus::Present), (fx.students[2], AttendanceStatus::Absent)],
    )
    .await;

    let sheet = svc.marking_sheet(fx.subject, day).await.unwrap();
    let rolls: Vec<&str> = sheet.iter().map(|r| r.roll_no.as_str()).collect();
    assert_eq!(rolls, vec!["CS001", "CS002", "CS003"]);
    assert_eq!(sheet[0].status, Some(AttendanceStatus::Present));
    assert_eq!(sheet[1].status, None);
    assert_eq!(sheet[2].status, Some(AttendanceStatus::Absent));

    let csv = edutrack::export::attendance_csv(&sheet);
    assert!(csv.contains("CS002,Ben Okafor,not marked"));
}

#[tokio::test]
async fn history_is_newest_first_and_capped() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let svc = AttendanceService::new(pool, ServicePolicy::default());
    let s = fx.students[0];
    for d in 2..=9 {
        let status = if d % 2 == 0 { "present" } else { "absent" };
        svc.mark_attendance(&input(&fx, s, &format!("2023-10-{d:02}"), status))
            .await
            .unwrap();
    }

    let recent = svc.recent_history(s, fx.subject, None).await.unwrap();
    let days: Vec<NaiveDate> = recent.iter().map(|r| r.attendance_date).collect();
    assert_eq!(
        days,
        vec![date(2023, 10, 9), date(2023, 10, 8), date(2023, 10, 7), date(2023, 10, 6), date(2023, 10, 5)]
    );
    assert_eq!(svc.recent_history(s, fx.subject, Some(2)).await.unwrap().len(), 2);

    let summary = svc.summary(s, fx.subject).await.unwrap();
    assert_eq!(summary.total, 8);
    assert_eq!(summary.present, 4);
    assert_eq!(summary.percentage, 50);
}

#[tokio::test]
async fn overall_percentage_averages_enrolled_subjects() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let s = fx.students[0];
    db::enroll(&pool, s, fx.other_subject).await.unwrap();
    let svc = AttendanceService::new(pool, ServicePolicy::default());

    // 4 of 5 in the first subject, 3 of 5 in the second.
    for (subject, present) in [(fx.subject, 4), (fx.other_subject, 3)] {
        for d in 0..5u32 {
            let status = if d < present {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            };
            svc.record(&Mark {
                student_id: s,
                subject_id: subject,
                faculty_id: fx.faculty,
                date: date(2023, 10, 2 + d),
                status,
            })
            .await
            .unwrap();
        }
    }
    assert_eq!(svc.overall_percentage(s).await.unwrap(), 70);

    let loner = fx.students[1];
    db::unenroll(svc.pool(), loner, fx.subject).await.unwrap();
    assert_eq!(svc.overall_percentage(loner).await.unwrap(), 0);

    let report = svc.cohort_report(Some(1)).await.unwrap();
    assert_eq!(report.students.len(), 3);
    assert_eq!(report.subjects.len(), 2);
    assert_eq!(report.subjects[0].recorded_days, 5);
}

#[tokio::test]
async fn concurrent_marks_keep_one_row_per_triple() {
    let dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}/attendance.db", dir.path().display());
    let pool = db::init_pool(&url).await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    let fx = seed(&pool).await;
    let svc = Arc::new(AttendanceService::new(pool.clone(), ServicePolicy::default()));
    let day = date(2023, 10, 5);

    let mut handles = Vec::new();
    for i in 0..16 {
        let svc = svc.clone();
        let student = fx.students[i % fx.students.len()];
        let (subject, faculty) = (fx.subject, fx.faculty);
        handles.push(tokio::spawn(async move {
            let status = if i % 2 == 0 {
                AttendanceStatus::Present
            } else {
                AttendanceStatus::Absent
            };
            svc.record(&Mark {
                student_id: student,
                subject_id: subject,
                faculty_id: faculty,
                date: day,
                status,
            })
            .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    let stored = db::attendance_for_subject_date(&pool, fx.subject, day).await.unwrap();
    assert_eq!(stored.len(), fx.students.len());
}

#[tokio::test]
async fn timetable_views_group_by_day() {
    use chrono::{NaiveTime, Weekday};
    use edutrack::schedule::weekly_schedule;

    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let t = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
    db::add_timetable_slot(&pool, fx.subject, 1, t(11), t(12), Some("B-204")).await.unwrap();
    db::add_timetable_slot(&pool, fx.subject, 1, t(9), t(10), Some("B-204")).await.unwrap();
    db::add_timetable_slot(&pool, fx.other_subject, 3, t(10), t(11), None).await.unwrap();

    let faculty = db::get_faculty(&pool, fx.faculty).await.unwrap().unwrap();
    assert_eq!(faculty.name, "Dr. Iyer");
    let taught = db::subjects_for_faculty(&pool, fx.faculty).await.unwrap();
    assert_eq!(taught.len(), 1);
    assert_eq!(db::enrollments_for_subject(&pool, fx.subject).await.unwrap().len(), 3);

    let student_slots = db::timetable_for_student(&pool, fx.students[0]).await.unwrap();
    assert_eq!(student_slots.len(), 2);
    let week = weekly_schedule(&student_slots, Weekday::Sun);
    assert_eq!(week[0].day, Weekday::Mon);
    let starts: Vec<NaiveTime> = week[0].slots.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![t(9), t(11)]);
    assert_eq!(week[0].slots[0].subject_code, "CS101");

    let faculty_slots = db::timetable_for_faculty(&pool, fx.faculty).await.unwrap();
    assert_eq!(faculty_slots.len(), 2);
}

#[tokio::test]
async fn attendance_listing_narrows_by_filter() {
    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let other_faculty = db::insert_faculty(&pool, "Dr. Menon", None).await.unwrap();
    db::enroll(&pool, fx.students[0], fx.other_subject).await.unwrap();
    let svc = AttendanceService::new(pool.clone(), ServicePolicy::default());

    let day = date(2023, 10, 2);
    for (subject, faculty) in [(fx.subject, fx.faculty), (fx.other_subject, other_faculty)] {
        svc.record(&Mark {
            student_id: fx.students[0],
            subject_id: subject,
            faculty_id: faculty,
            date: day,
            status: AttendanceStatus::Present,
        })
        .await
        .unwrap();
    }
    svc.mark_attendance(&input(&fx, fx.students[1], "2023-10-02", "absent"))
        .await
        .unwrap();

    let by_subject = AttendanceFilter {
        subject_id: Some(fx.other_subject),
        ..Default::default()
    };
    let rows = svc.get_attendance(&by_subject).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].faculty_id, other_faculty);

    let by_faculty = AttendanceFilter {
        faculty_id: Some(fx.faculty),
        ..Default::default()
    };
    let students: Vec<StudentId> = svc
        .get_attendance(&by_faculty)
        .await
        .unwrap()
        .iter()
        .map(|r| r.student_id)
        .collect();
    assert_eq!(students, vec![fx.students[0], fx.students[1]]);

    let narrow = AttendanceFilter {
        student_id: Some(fx.students[0]),
        faculty_id: Some(fx.faculty),
        ..Default::default()
    };
    assert_eq!(svc.get_attendance(&narrow).await.unwrap().len(), 1);

    let student = db::get_student(&pool, fx.students[0]).await.unwrap().unwrap();
    assert_eq!((student.roll_no.as_str(), student.name.as_str()), ("CS001", "Asha Rao"));
    assert!(db::get_student(&pool, StudentId(999)).await.unwrap().is_none());
}

#[tokio::test]
async fn timetable_refuses_sunday_slots() {
    use chrono::NaiveTime;

    let pool = setup_pool().await;
    let fx = seed(&pool).await;
    let t = |h: u32| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
    db::add_timetable_slot(&pool, fx.subject, 6, t(9), t(10), None).await.unwrap();
    assert!(db::add_timetable_slot(&pool, fx.subject, 7, t(9), t(10), None).await.is_err());
    assert!(db::add_timetable_slot(&pool, fx.subject, 0, t(9), t(10), None).await.is_err());

    let slots = db::timetable_for_faculty(&pool, fx.faculty).await.unwrap();
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].day_of_week, 6);
}
