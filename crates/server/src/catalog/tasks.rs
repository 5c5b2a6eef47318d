use std::{cmp::Ordering, collections::HashSet, str::FromStr};

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;

use super::{is_all, parse_set, split_list, FilterError, Interval, SearchTerm, Selection};
use crate::db::models::{ExperienceLevel, ProjectType, Task};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BudgetBucket {
    #[default]
    All,
    /// Under 5 000 ₴.
    Budget,
    Standard,
    /// 20 000 ₴ and above.
    Premium,
}

impl BudgetBucket {
    pub fn interval(self) -> Interval {
        match self {
            BudgetBucket::All => Interval::UNBOUNDED,
            BudgetBucket::Budget => Interval {
                min: None,
                max: Some(5_000.0),
            },
            BudgetBucket::Standard => Interval {
                min: Some(5_000.0),
                max: Some(20_000.0),
            },
            BudgetBucket::Premium => Interval {
                min: Some(20_000.0),
                max: None,
            },
        }
    }
}

impl FromStr for BudgetBucket {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(BudgetBucket::All),
            "budget" => Ok(BudgetBucket::Budget),
            "standard" => Ok(BudgetBucket::Standard),
            "premium" => Ok(BudgetBucket::Premium),
            _ => Err(FilterError::UnknownValue {
                dimension: "budget bucket",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DeadlineBucket {
    #[default]
    All,
    Urgent,
    ThisWeek,
    ThisMonth,
    /// No deadline set.
    Flexible,
}

impl DeadlineBucket {
    pub fn matches(self, deadline: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let within = |days: i64| {
            deadline.map_or(false, |d| d >= now && d - now <= Duration::days(days))
        };
        match self {
            DeadlineBucket::All => true,
            DeadlineBucket::Urgent => within(3),
            DeadlineBucket::ThisWeek => within(7),
            DeadlineBucket::ThisMonth => within(30),
            DeadlineBucket::Flexible => deadline.is_none(),
        }
    }
}

impl FromStr for DeadlineBucket {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "all" | "" => Ok(DeadlineBucket::All),
            "urgent" => Ok(DeadlineBucket::Urgent),
            "this_week" => Ok(DeadlineBucket::ThisWeek),
            "this_month" => Ok(DeadlineBucket::ThisMonth),
            "flexible" => Ok(DeadlineBucket::Flexible),
            _ => Err(FilterError::UnknownValue {
                dimension: "deadline bucket",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskSort {
    Newest,
    Oldest,
    BudgetHigh,
    BudgetLow,
    /// Soonest deadline first, tasks without one last.
    Deadline,
}

impl TaskSort {
    fn compare(self, a: &Task, b: &Task) -> Ordering {
        match self {
            TaskSort::Newest => b.created_at.cmp(&a.created_at),
            TaskSort::Oldest => a.created_at.cmp(&b.created_at),
            TaskSort::BudgetHigh => b.budget.total_cmp(&a.budget),
            TaskSort::BudgetLow => a.budget.total_cmp(&b.budget),
            TaskSort::Deadline => match (a.deadline, b.deadline) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            },
        }
    }
}

impl FromStr for TaskSort {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        match value.to_ascii_lowercase().as_str() {
            "newest" => Ok(TaskSort::Newest),
            "oldest" => Ok(TaskSort::Oldest),
            "budget_high" => Ok(TaskSort::BudgetHigh),
            "budget_low" => Ok(TaskSort::BudgetLow),
            "deadline" => Ok(TaskSort::Deadline),
            _ => Err(FilterError::UnknownValue {
                dimension: "sort",
                value: value.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilters {
    pub search: SearchTerm,
    pub budget: BudgetBucket,
    pub deadline: DeadlineBucket,
    pub categories: Selection,
    pub skills: Selection,
    pub experience_levels: HashSet<ExperienceLevel>,
    pub project_types: HashSet<ProjectType>,
    pub sort: Option<TaskSort>,
}

impl TaskFilters {
    pub fn matches(&self, task: &Task, now: DateTime<Utc>) -> bool {
        self.search.matches_any(
            [
                task.title.as_str(),
                task.description.as_str(),
                task.category.as_str(),
            ]
            .into_iter()
            .chain(task.required_skills.iter().map(String::as_str)),
        ) && self.budget.interval().contains(task.budget)
            && self.deadline.matches(task.deadline, now)
            && self.categories.intersects([task.category.as_str()])
            && self
                .skills
                .intersects(task.required_skills.iter().map(String::as_str))
            && (self.experience_levels.is_empty()
                || self.experience_levels.contains(&task.experience_level))
            && (self.project_types.is_empty() || self.project_types.contains(&task.project_type))
    }
}

/// Returns the tasks matching `filters`, ordered by the selected sort key.
/// Without a sort key the input order is kept.
pub fn filter_tasks<'a>(
    tasks: &'a [Task],
    filters: &TaskFilters,
    now: DateTime<Utc>,
) -> Vec<&'a Task> {
    let mut matched: Vec<&Task> = tasks.iter().filter(|t| filters.matches(t, now)).collect();
    if let Some(sort) = filters.sort {
        matched.sort_by(|a, b| sort.compare(a, b));
    }
    matched
}

/// Raw query string for the task catalog. Multi-select values are comma separated.
#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub search: Option<String>,
    pub budget: Option<String>,
    pub deadline: Option<String>,
    pub categories: Option<String>,
    pub skills: Option<String>,
    pub experience: Option<String>,
    pub project_type: Option<String>,
    pub sort: Option<String>,
}

impl TryFrom<TaskListQuery> for TaskFilters {
    type Error = FilterError;

    fn try_from(query: TaskListQuery) -> Result<Self, Self::Error> {
        Ok(Self {
            search: SearchTerm::new(query.search.as_deref()),
            budget: query.budget.as_deref().unwrap_or("all").parse()?,
            deadline: query.deadline.as_deref().unwrap_or("all").parse()?,
            categories: Selection::new(split_list(query.categories.as_deref())),
            skills: Selection::new(split_list(query.skills.as_deref())),
            experience_levels: parse_set(query.experience.as_deref(), "experience level")?,
            project_types: parse_set(query.project_type.as_deref(), "project type")?,
            sort: if is_all(query.sort.as_deref()) {
                None
            } else {
                Some(query.sort.as_deref().unwrap_or_default().parse()?)
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use proptest::prelude::*;

    use super::*;
    use crate::db::models::TaskStatus;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn task(id: &str, title: &str, budget: f64, created: i64) -> Task {
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            budget,
            status: TaskStatus::Open,
            client_id: "client".to_string(),
            freelancer_id: None,
            category: "web_development".to_string(),
            required_skills: vec![],
            experience_level: ExperienceLevel::Intermediate,
            project_type: ProjectType::Fixed,
            deadline: None,
            created_at: at(created),
            updated_at: at(created),
        }
    }

    fn ids(tasks: &[&Task]) -> Vec<String> {
        tasks.iter().map(|t| t.id.clone()).collect()
    }

    fn sample() -> Vec<Task> {
        let mut logo = task("logo", "Design a logo", 1_000.0, 30);
        logo.category = "design".to_string();
        logo.required_skills = vec!["Figma".to_string(), "Photoshop".to_string()];
        logo.experience_level = ExperienceLevel::Entry;
        logo.deadline = Some(at(86_400));

        let mut shop = task("shop", "Online shop backend", 6_000.0, 10);
        shop.description = "Catalog, cart and payments in Rust".to_string();
        shop.required_skills = vec!["Rust".to_string(), "SQL".to_string()];
        shop.deadline = Some(at(20 * 86_400));

        let mut app = task("app", "Delivery mobile app", 25_000.0, 20);
        app.category = "mobile_development".to_string();
        app.required_skills = vec!["Flutter".to_string()];
        app.experience_level = ExperienceLevel::Expert;
        app.project_type = ProjectType::Hourly;

        vec![logo, shop, app]
    }

    #[test]
    fn default_filters_are_identity() {
        let tasks = sample();
        let out = filter_tasks(&tasks, &TaskFilters::default(), at(0));
        assert_eq!(ids(&out), vec!["logo", "shop", "app"]);
    }

    #[test]
    fn budget_buckets_match_worked_example() {
        let tasks = sample();
        let budget = TaskFilters {
            budget: BudgetBucket::Budget,
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &budget, at(0))), vec!["logo"]);

        let premium = TaskFilters {
            budget: BudgetBucket::Premium,
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &premium, at(0))), vec!["app"]);

        let standard = TaskFilters {
            budget: BudgetBucket::Standard,
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &standard, at(0))), vec!["shop"]);
    }

    #[test]
    fn search_covers_title_description_and_skills() {
        let tasks = sample();
        let search = |term: &str| {
            let filters = TaskFilters {
                search: SearchTerm::new(Some(term)),
                ..Default::default()
            };
            ids(&filter_tasks(&tasks, &filters, at(0)))
        };

        assert_eq!(search("LOGO"), vec!["logo"]);
        assert_eq!(search("payments"), vec!["shop"]);
        assert_eq!(search("flutter"), vec!["app"]);
        assert!(search("blockchain").is_empty());
    }

    #[test]
    fn skills_are_or_within_and_across_dimensions() {
        let tasks = sample();
        let filters = TaskFilters {
            skills: Selection::new(["rust", "figma"]),
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &filters, at(0))), vec!["logo", "shop"]);

        let filters = TaskFilters {
            skills: Selection::new(["rust", "figma"]),
            categories: Selection::new(["design"]),
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &filters, at(0))), vec!["logo"]);
    }

    #[test]
    fn deadline_buckets_use_now() {
        let tasks = sample();
        let by_deadline = |bucket, now| {
            let filters = TaskFilters {
                deadline: bucket,
                ..Default::default()
            };
            ids(&filter_tasks(&tasks, &filters, now))
        };

        assert_eq!(by_deadline(DeadlineBucket::Urgent, at(0)), vec!["logo"]);
        assert_eq!(by_deadline(DeadlineBucket::ThisMonth, at(0)), vec!["logo", "shop"]);
        assert_eq!(by_deadline(DeadlineBucket::Flexible, at(0)), vec!["app"]);
        // Past deadlines are not urgent.
        assert!(by_deadline(DeadlineBucket::Urgent, at(2 * 86_400)).is_empty());
    }

    #[test]
    fn deadline_bucket_edges_are_inclusive() {
        let now = at(0);
        let due = |secs: i64| Some(at(secs));
        let day = 86_400;

        assert!(DeadlineBucket::Urgent.matches(due(3 * day), now));
        assert!(!DeadlineBucket::Urgent.matches(due(3 * day + 1), now));
        assert!(DeadlineBucket::ThisWeek.matches(due(3 * day + 1), now));
        assert!(DeadlineBucket::ThisWeek.matches(due(7 * day), now));
        assert!(!DeadlineBucket::ThisWeek.matches(due(7 * day + 1), now));
        assert!(DeadlineBucket::ThisMonth.matches(due(30 * day), now));
        assert!(!DeadlineBucket::ThisMonth.matches(due(30 * day + 1), now));

        // A deadline due right now still counts.
        assert!(DeadlineBucket::Urgent.matches(due(0), now));
        assert!(!DeadlineBucket::ThisWeek.matches(due(-1), now));
        assert!(!DeadlineBucket::ThisWeek.matches(None, now));
        assert!(DeadlineBucket::All.matches(None, now));
    }

    #[test]
    fn this_week_covers_the_next_seven_days() {
        let tasks = sample();
        let filters = TaskFilters {
            deadline: DeadlineBucket::ThisWeek,
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &filters, at(0))), vec!["logo"]);
        // Thirteen days before the shop deadline only the shop is due this week.
        assert_eq!(ids(&filter_tasks(&tasks, &filters, at(13 * 86_400))), vec!["shop"]);
    }

    #[test]
    fn enum_dimensions_filter() {
        let tasks = sample();
        let filters = TaskFilters {
            experience_levels: [ExperienceLevel::Expert, ExperienceLevel::Entry].into(),
            project_types: [ProjectType::Fixed].into(),
            ..Default::default()
        };
        assert_eq!(ids(&filter_tasks(&tasks, &filters, at(0))), vec!["logo"]);
    }

    #[test]
    fn sorts_are_applied_after_filtering() {
        let tasks = sample();
        let sorted = |sort| {
            let filters = TaskFilters {
                sort: Some(sort),
                ..Default::default()
            };
            ids(&filter_tasks(&tasks, &filters, at(0)))
        };

        assert_eq!(sorted(TaskSort::Newest), vec!["logo", "app", "shop"]);
        assert_eq!(sorted(TaskSort::Oldest), vec!["shop", "app", "logo"]);
        assert_eq!(sorted(TaskSort::BudgetHigh), vec!["app", "shop", "logo"]);
        assert_eq!(sorted(TaskSort::BudgetLow), vec!["logo", "shop", "app"]);
        assert_eq!(sorted(TaskSort::Deadline), vec!["logo", "shop", "app"]);
    }

    #[test]
    fn sort_is_stable_on_ties() {
        let tasks = vec![
            task("a", "A", 100.0, 0),
            task("b", "B", 100.0, 0),
            task("c", "C", 100.0, 0),
        ];
        for sort in [TaskSort::Newest, TaskSort::BudgetHigh, TaskSort::Deadline] {
            let filters = TaskFilters {
                sort: Some(sort),
                ..Default::default()
            };
            assert_eq!(ids(&filter_tasks(&tasks, &filters, at(0))), vec!["a", "b", "c"]);
        }
    }

    #[test]
    fn query_parses_into_filters() {
        let query = TaskListQuery {
            search: Some(" Logo ".to_string()),
            budget: Some("premium".to_string()),
            skills: Some("Rust, Figma".to_string()),
            experience: Some("entry,expert".to_string()),
            sort: Some("budget_low".to_string()),
            ..Default::default()
        };
        let filters = TaskFilters::try_from(query).unwrap();
        assert_eq!(filters.search, SearchTerm::new(Some("logo")));
        assert_eq!(filters.budget, BudgetBucket::Premium);
        assert_eq!(filters.skills, Selection::new(["rust", "figma"]));
        assert_eq!(filters.experience_levels.len(), 2);
        assert_eq!(filters.sort, Some(TaskSort::BudgetLow));
    }

    #[test]
    fn all_and_missing_values_mean_default() {
        let query = TaskListQuery {
            budget: Some("all".to_string()),
            deadline: Some("all".to_string()),
            sort: Some("all".to_string()),
            ..Default::default()
        };
        assert_eq!(TaskFilters::try_from(query).unwrap(), TaskFilters::default());
    }

    #[test]
    fn bucket_names_ignore_case() {
        let query = TaskListQuery {
            budget: Some("ALL".to_string()),
            deadline: Some("This_Week".to_string()),
            experience: Some("Expert".to_string()),
            sort: Some("Budget_High".to_string()),
            ..Default::default()
        };
        let filters = TaskFilters::try_from(query).unwrap();
        assert_eq!(filters.budget, BudgetBucket::All);
        assert_eq!(filters.deadline, DeadlineBucket::ThisWeek);
        assert_eq!(filters.experience_levels, [ExperienceLevel::Expert].into());
        assert_eq!(filters.sort, Some(TaskSort::BudgetHigh));
        assert_eq!("Premium".parse::<BudgetBucket>().unwrap(), BudgetBucket::Premium);
    }

    #[test]
    fn unknown_bucket_is_rejected() {
        let query = TaskListQuery {
            budget: Some("cheap".to_string()),
            ..Default::default()
        };
        assert_eq!(
            TaskFilters::try_from(query).unwrap_err(),
            FilterError::UnknownValue {
                dimension: "budget bucket",
                value: "cheap".to_string()
            }
        );
    }

    fn arb_task() -> impl Strategy<Value = Task> {
        (
            "[a-z]{1,8}",
            1.0f64..50_000.0,
            0i64..1_000_000,
            prop::option::of(0i64..5_000_000),
            prop::sample::select(vec!["design", "web_development", "writing"]),
        )
            .prop_map(|(title, budget, created, deadline, category)| {
                let mut t = task(&title, &title, budget, created);
                t.deadline = deadline.map(at);
                t.category = category.to_string();
                t
            })
    }

    fn arb_budget() -> impl Strategy<Value = BudgetBucket> {
        prop::sample::select(vec![
            BudgetBucket::All,
            BudgetBucket::Budget,
            BudgetBucket::Standard,
            BudgetBucket::Premium,
        ])
    }

    proptest! {
        #[test]
        fn bucket_output_respects_interval(
            tasks in prop::collection::vec(arb_task(), 0..30),
            bucket in arb_budget(),
        ) {
            let filters = TaskFilters { budget: bucket, ..Default::default() };
            let out = filter_tasks(&tasks, &filters, at(0));
            let interval = bucket.interval();
            for t in &out {
                prop_assert!(interval.contains(t.budget));
            }
            let expected = tasks.iter().filter(|t| interval.contains(t.budget)).count();
            prop_assert_eq!(out.len(), expected);
        }

        #[test]
        fn title_substring_is_always_found(
            tasks in prop::collection::vec(arb_task(), 1..20),
            pick in any::<prop::sample::Index>(),
        ) {
            let target = pick.get(&tasks);
            let term = &target.title[..target.title.len().min(3)];
            let filters = TaskFilters { search: SearchTerm::new(Some(term)), ..Default::default() };
            let out = filter_tasks(&tasks, &filters, at(0));
            prop_assert!(out.iter().any(|t| std::ptr::eq(*t, target)));
        }

        #[test]
        fn newest_and_oldest_are_monotonic(tasks in prop::collection::vec(arb_task(), 0..30)) {
            let newest = TaskFilters { sort: Some(TaskSort::Newest), ..Default::default() };
            let out = filter_tasks(&tasks, &newest, at(0));
            prop_assert!(out.windows(2).all(|w| w[0].created_at >= w[1].created_at));

            let oldest = TaskFilters { sort: Some(TaskSort::Oldest), ..Default::default() };
            let out = filter_tasks(&tasks, &oldest, at(0));
            prop_assert!(out.windows(2).all(|w| w[0].created_at <= w[1].created_at));
        }

        #[test]
        fn independent_filters_commute(
            tasks in prop::collection::vec(arb_task(), 0..30),
            bucket in arb_budget(),
            category in prop::sample::select(vec!["design", "web_development", "writing"]),
        ) {
            let by_category = TaskFilters { categories: Selection::new([category]), ..Default::default() };
            let by_budget = TaskFilters { budget: bucket, ..Default::default() };

            let first: Vec<Task> = filter_tasks(&tasks, &by_category, at(0)).into_iter().cloned().collect();
            let category_then_budget = ids(&filter_tasks(&first, &by_budget, at(0)));

            let first: Vec<Task> = filter_tasks(&tasks, &by_budget, at(0)).into_iter().cloned().collect();
            let budget_then_category = ids(&filter_tasks(&first, &by_category, at(0)));

            prop_assert_eq!(category_then_budget, budget_then_category);
        }
    }
}
