//! Day and list bucketing of tasks.
//!
//! Every bucket is a borrowed view over the caller's slice, in source
//! order. Dates are compared as calendar days in a single timezone; a date
//! that does not parse is treated exactly like a missing one.

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use tracing::debug;

use crate::datetime::{project_timezone, to_date_in};
use crate::task::Task;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bucket {
    SelectedDate,
    WithSpecificTime,
    NoTime,
    Unscheduled,
    ListUnscheduled,
    Upcoming,
    Past,
    Overdue,
}

impl Bucket {
    pub const DAY: [Bucket; 3] = [Bucket::WithSpecificTime, Bucket::NoTime, Bucket::Unscheduled];

    pub const LIST: [Bucket; 4] = [
        Bucket::Overdue,
        Bucket::Upcoming,
        Bucket::Past,
        Bucket::ListUnscheduled,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Bucket::SelectedDate => "Selected day",
            Bucket::WithSpecificTime => "Scheduled",
            Bucket::NoTime => "Anytime",
            Bucket::Unscheduled => "Unscheduled today",
            Bucket::ListUnscheduled => "Unscheduled",
            Bucket::Upcoming => "Upcoming",
            Bucket::Past => "Past",
            Bucket::Overdue => "Overdue",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Buckets<'a> {
    pub tasks_for_selected_date: Vec<&'a Task>,
    pub tasks_with_specific_time: Vec<&'a Task>,
    pub tasks_for_today_no_time: Vec<&'a Task>,
    pub tasks_unscheduled: Vec<&'a Task>,
    pub list_unscheduled_tasks: Vec<&'a Task>,
    pub upcoming_tasks: Vec<&'a Task>,
    pub past_tasks: Vec<&'a Task>,
    pub overdue_tasks: Vec<&'a Task>,
}

impl<'a> Buckets<'a> {
    pub fn get(&self, bucket: Bucket) -> &[&'a Task] {
        match bucket {
            Bucket::SelectedDate => &self.tasks_for_selected_date,
            Bucket::WithSpecificTime => &self.tasks_with_specific_time,
            Bucket::NoTime => &self.tasks_for_today_no_time,
            Bucket::Unscheduled => &self.tasks_unscheduled,
            Bucket::ListUnscheduled => &self.list_unscheduled_tasks,
            Bucket::Upcoming => &self.upcoming_tasks,
            Bucket::Past => &self.past_tasks,
            Bucket::Overdue => &self.overdue_tasks,
        }
    }
}

/// Buckets `tasks` around `selected` and `now` using the project timezone.
pub fn compute_buckets(tasks: &[Task], selected: DateTime<Utc>, now: DateTime<Utc>) -> Buckets<'_> {
    compute_buckets_in(tasks, selected, now, project_timezone())
}

#[tracing::instrument(skip(tasks, tz), fields(count = tasks.len(), tz = tz.name()))]
pub fn compute_buckets_in<'a>(
    tasks: &'a [Task],
    selected: DateTime<Utc>,
    now: DateTime<Utc>,
    tz: &Tz,
) -> Buckets<'a> {
    let selected_day = to_date_in(selected, tz);
    let today = to_date_in(now, tz);
    let mut out = Buckets::default();

    for task in tasks {
        let days = TaskDays::of(task, tz);

        if days.touches(selected_day) {
            out.tasks_for_selected_date.push(task);
            if task.has_start_time() {
                out.tasks_with_specific_time.push(task);
            } else {
                out.tasks_for_today_no_time.push(task);
                if days.start.is_none() {
                    out.tasks_unscheduled.push(task);
                }
            }
        }

        if days.start.is_none() && days.deadline.is_none() {
            out.list_unscheduled_tasks.push(task);
        }
        if days.is_upcoming(today) {
            out.upcoming_tasks.push(task);
        }
        if days.is_past(today) {
            out.past_tasks.push(task);
        }
        if days.is_overdue(today) {
            out.overdue_tasks.push(task);
        }
    }

    debug!(
        selected = %selected_day,
        today = %today,
        for_date = out.tasks_for_selected_date.len(),
        timed = out.tasks_with_specific_time.len(),
        upcoming = out.upcoming_tasks.len(),
        past = out.past_tasks.len(),
        overdue = out.overdue_tasks.len(),
        "computed task buckets"
    );
    out
}

/// Calendar days of a task's start and deadline, when they parse.
#[derive(Debug, Clone, Copy)]
struct TaskDays {
    start: Option<NaiveDate>,
    deadline: Option<NaiveDate>,
}

impl TaskDays {
    fn of(task: &Task, tz: &Tz) -> Self {
        Self {
            start: task.start_day(tz),
            deadline: task.deadline_day(tz),
        }
    }

    // Span membership is day-granular like the two equality checks. An
    // inverted span (deadline before start) only matches its endpoints.
    fn touches(&self, day: NaiveDate) -> bool {
        if self.start == Some(day) || self.deadline == Some(day) {
            return true;
        }
        match (self.start, self.deadline) {
            (Some(start), Some(deadline)) => start <= day && day <= deadline,
            _ => false,
        }
    }

    fn is_upcoming(&self, today: NaiveDate) -> bool {
        match (self.start, self.deadline) {
            (Some(start), _) if start > today => true,
            (None, Some(deadline)) => deadline > today,
            (Some(_), Some(deadline)) => deadline > today,
            _ => false,
        }
    }

    fn is_past(&self, today: NaiveDate) -> bool {
        self.deadline.is_none() && self.start.is_some_and(|start| start < today)
    }

    fn is_overdue(&self, today: NaiveDate) -> bool {
        self.deadline.is_some_and(|deadline| deadline < today)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
    use chrono_tz::Tz;

    use super::{Bucket, Buckets, compute_buckets, compute_buckets_in};
    use crate::datetime::project_timezone;
    use crate::task::{Priority, Task};

    const UTC: Tz = chrono_tz::UTC;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .expect("valid instant")
    }

    fn ymd(date: NaiveDate) -> String {
        date.format("%Y-%m-%d").to_string()
    }

    fn task(id: &str) -> Task {
        Task::new(id, format!("task {id}"), Priority::Medium)
    }

    fn dated(id: &str, start: Option<&str>, deadline: Option<&str>) -> Task {
        let mut t = task(id);
        t.start_date = start.map(str::to_string);
        t.deadline = deadline.map(str::to_string);
        t
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    #[test]
    fn splits_selected_day_by_start_time() {
        let a = dated("a", Some("2024-06-10"), None);
        let mut b = dated("b", Some("2024-06-10"), None);
        b.start_time = Some("09:00".to_string());
        let tasks = vec![a, b];

        let buckets = compute_buckets_in(&tasks, at(2024, 6, 10, 0), at(2024, 6, 10, 8), &UTC);

        assert_eq!(ids(&buckets.tasks_for_selected_date), ["a", "b"]);
        assert_eq!(ids(&buckets.tasks_with_specific_time), ["b"]);
        assert_eq!(ids(&buckets.tasks_for_today_no_time), ["a"]);
        assert!(buckets.tasks_unscheduled.is_empty());
    }

    #[test]
    fn same_day_start_and_deadline_appear_once() {
        let tasks = vec![dated("x", Some("2024-06-10T08:00:00Z"), Some("2024-06-10T17:00:00Z"))];
        let buckets = compute_buckets_in(&tasks, at(2024, 6, 10, 12), at(2024, 6, 1, 0), &UTC);
        assert_eq!(ids(&buckets.tasks_for_selected_date), ["x"]);
    }

    #[test]
    fn timed_and_untimed_partition_the_day() {
        let mut timed = dated("timed", None, Some("2024-06-10"));
        timed.start_time = Some("2024-06-10T15:00:00Z".to_string());
        let mut blank_time = dated("blank", Some("2024-06-09"), Some("2024-06-12"));
        blank_time.start_time = Some(String::new());
        let midnight_start = dated("midnight", Some("2024-06-10T13:45:00Z"), None);
        let deadline_only = dated("due", None, Some("2024-06-10"));
        let tasks = vec![timed, blank_time, midnight_start, deadline_only];

        let buckets = compute_buckets_in(&tasks, at(2024, 6, 10, 0), at(2024, 6, 10, 0), &UTC);

        let day = ids(&buckets.tasks_for_selected_date);
        let mut union = ids(&buckets.tasks_with_specific_time);
        union.extend(ids(&buckets.tasks_for_today_no_time));
        union.sort();
        let mut expected = day.clone();
        expected.sort();
        assert_eq!(union, expected);
        for id in ids(&buckets.tasks_with_specific_time) {
            assert!(!ids(&buckets.tasks_for_today_no_time).contains(&id));
        }

        // A time of day inside startDate does not make a task "timed".
        assert!(ids(&buckets.tasks_for_today_no_time).contains(&"midnight".to_string()));
        assert_eq!(ids(&buckets.tasks_unscheduled), ["due"]);
    }

    #[test]
    fn undated_tasks_only_land_in_list_unscheduled() {
        let mut bare = task("bare");
        bare.start_time = Some("10:00".to_string());
        let tasks = vec![bare];

        let buckets = compute_buckets_in(&tasks, at(2024, 6, 10, 0), at(2024, 6, 10, 0), &UTC);

        assert!(buckets.tasks_for_selected_date.is_empty());
        assert!(buckets.upcoming_tasks.is_empty());
        assert!(buckets.past_tasks.is_empty());
        assert!(buckets.overdue_tasks.is_empty());
        assert_eq!(ids(&buckets.list_unscheduled_tasks), ["bare"]);
    }

    #[test]
    fn yesterday_deadline_is_overdue_whatever_the_start() {
        let now = at(2024, 6, 10, 9);
        let tasks = vec![
            dated("no-start", None, Some("2024-06-09")),
            dated("old-start", Some("2024-05-01"), Some("2024-06-09")),
            dated("future-start", Some("2024-07-01"), Some("2024-06-09T23:59:00Z")),
            dated("due-today", None, Some("2024-06-10")),
        ];

        let buckets = compute_buckets_in(&tasks, now, now, &UTC);

        assert_eq!(ids(&buckets.overdue_tasks), ["no-start", "old-start", "future-start"]);
    }

    #[test]
    fn multi_day_span_covers_every_day_and_is_upcoming() {
        let today = NaiveDate::from_ymd_opt(2024, 6, 10).expect("date");
        let now = at(2024, 6, 10, 11);
        let start = today - Duration::days(5);
        let end = today + Duration::days(5);
        let tasks = vec![dated("span", Some(&ymd(start)), Some(&ymd(end)))];

        let mut day = start;
        while day <= end {
            let selected = day.and_hms_opt(12, 0, 0).expect("noon").and_utc();
            let buckets = compute_buckets_in(&tasks, selected, now, &UTC);
            assert_eq!(ids(&buckets.tasks_for_selected_date), ["span"], "missing on {day}");
            day += Duration::days(1);
        }

        let outside = compute_buckets_in(&tasks, at(2024, 6, 16, 0), now, &UTC);
        assert!(outside.tasks_for_selected_date.is_empty());

        let buckets = compute_buckets_in(&tasks, now, now, &UTC);
        assert_eq!(ids(&buckets.upcoming_tasks), ["span"]);
        assert!(buckets.past_tasks.is_empty());
        assert!(buckets.overdue_tasks.is_empty());
    }

    #[test]
    fn span_endpoints_ignore_time_of_day() {
        let tasks = vec![dated("evening", Some("2024-06-08T20:00:00Z"), Some("2024-06-10T06:00:00Z"))];
        let late = compute_buckets_in(&tasks, at(2024, 6, 10, 23), at(2024, 6, 1, 0), &UTC);
        assert_eq!(ids(&late.tasks_for_selected_date), ["evening"]);
        let early = compute_buckets_in(&tasks, at(2024, 6, 8, 1), at(2024, 6, 1, 0), &UTC);
        assert_eq!(ids(&early.tasks_for_selected_date), ["evening"]);
    }

    #[test]
    fn inverted_span_only_matches_its_endpoints() {
        let tasks = vec![dated("inverted", Some("2024-06-12"), Some("2024-06-08"))];
        let middle = compute_buckets_in(&tasks, at(2024, 6, 10, 0), at(2024, 6, 1, 0), &UTC);
        assert!(middle.tasks_for_selected_date.is_empty());
        let endpoint = compute_buckets_in(&tasks, at(2024, 6, 8, 0), at(2024, 6, 1, 0), &UTC);
        assert_eq!(ids(&endpoint.tasks_for_selected_date), ["inverted"]);
    }

    #[test]
    fn upcoming_and_past_rules() {
        let now = at(2024, 6, 10, 12);
        let tasks = vec![
            dated("starts-tomorrow", Some("2024-06-11"), None),
            dated("starts-today", Some("2024-06-10"), None),
            dated("due-later", None, Some("2024-06-20")),
            dated("due-today", None, Some("2024-06-10")),
            dated("running", Some("2024-06-01"), Some("2024-06-11")),
            dated("ends-today", Some("2024-06-01"), Some("2024-06-10")),
            dated("started-last-week", Some("2024-06-03"), None),
        ];

        let buckets = compute_buckets_in(&tasks, now, now, &UTC);

        assert_eq!(ids(&buckets.upcoming_tasks), ["starts-tomorrow", "due-later", "running"]);
        assert_eq!(ids(&buckets.past_tasks), ["started-last-week"]);
        assert!(buckets.overdue_tasks.is_empty());
    }

    #[test]
    fn malformed_dates_count_as_missing() {
        let tasks = vec![
            dated("bad-start", Some("tomorrow-ish"), None),
            dated("bad-deadline", Some("2024-06-01"), Some("2024-02-30")),
        ];
        let now = at(2024, 6, 10, 0);

        let buckets = compute_buckets_in(&tasks, now, now, &UTC);

        assert_eq!(ids(&buckets.list_unscheduled_tasks), ["bad-start"]);
        assert_eq!(ids(&buckets.past_tasks), ["bad-deadline"]);
        assert!(buckets.overdue_tasks.is_empty());
    }

    #[test]
    fn empty_input_gives_empty_buckets() {
        let now = at(2024, 6, 10, 0);
        assert_eq!(compute_buckets_in(&[], now, now, &UTC), Buckets::default());
    }

    #[test]
    fn calendar_day_follows_the_timezone() {
        let tz: Tz = "America/Los_Angeles".parse().expect("tz");
        // 03:00Z on the 11th is still the evening of the 10th in Los Angeles.
        let tasks = vec![dated("late", Some("2024-06-11T03:00:00Z"), None)];
        let selected = at(2024, 6, 10, 18);

        let local = compute_buckets_in(&tasks, selected, selected, &tz);
        assert_eq!(ids(local.get(Bucket::SelectedDate)), ["late"]);

        let utc = compute_buckets_in(&tasks, selected, selected, &UTC);
        assert!(utc.get(Bucket::SelectedDate).is_empty());
        assert_eq!(ids(utc.get(Bucket::Upcoming)), ["late"]);
    }

    #[test]
    fn plain_date_on_a_skipped_midnight_is_still_that_day() {
        // Sao Paulo clocks went from 00:00 straight to 01:00 on 2018-11-04.
        let tz: Tz = "America/Sao_Paulo".parse().expect("tz");
        let tasks = vec![
            dated("start", Some("2018-11-04"), None),
            dated("due", None, Some("2018-11-04")),
        ];
        let noon = at(2018, 11, 4, 15);

        let buckets = compute_buckets_in(&tasks, noon, noon, &tz);
        assert_eq!(ids(&buckets.tasks_for_selected_date), ["start", "due"]);
        assert!(buckets.list_unscheduled_tasks.is_empty());

        let later = at(2018, 11, 6, 15);
        let buckets = compute_buckets_in(&tasks, later, later, &tz);
        assert_eq!(ids(&buckets.overdue_tasks), ["due"]);
        assert_eq!(ids(&buckets.past_tasks), ["start"]);
    }

    #[test]
    fn project_timezone_is_the_default_zone() {
        let tasks = vec![
            dated("today", Some("2024-06-10"), None),
            dated("due", None, Some("2024-06-01")),
            task("loose"),
        ];
        let now = at(2024, 6, 10, 12);

        assert_eq!(
            compute_buckets(&tasks, now, now),
            compute_buckets_in(&tasks, now, now, project_timezone())
        );
    }
}
