use std::fmt;
use std::str::FromStr;

use anyhow::{Context, anyhow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::datetime::{to_date_in, week_start_sunday};
use crate::storage::KeyValueStore;
use crate::task::{Priority, Task};

const DEFAULT_MESSAGE: &str = "Treat yourself to a cup of coffee and a good book. You deserve it.";
const SEPARATOR: &str = " • ";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityFilters {
    #[serde(default)]
    pub low: bool,
    #[serde(default)]
    pub medium: bool,
    #[serde(default)]
    pub high: bool,
}

impl PriorityFilters {
    fn any(&self) -> bool {
        self.low || self.medium || self.high
    }

    fn accepts(&self, priority: Priority) -> bool {
        match priority {
            Priority::Low => self.low,
            Priority::Medium => self.medium,
            Priority::High => self.high,
        }
    }

    fn labels(&self) -> Vec<&'static str> {
        [(self.low, "Low"), (self.medium, "Medium"), (self.high, "High")]
            .into_iter()
            .filter_map(|(on, label)| on.then_some(label))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadlineFilters {
    #[serde(default)]
    pub overdue: bool,
    #[serde(default)]
    pub today: bool,
    #[serde(default)]
    pub this_week: bool,
    #[serde(default)]
    pub future: bool,
    #[serde(default)]
    pub none: bool,
}

impl DeadlineFilters {
    fn any(&self) -> bool {
        self.overdue || self.today || self.this_week || self.future || self.none
    }

    fn labels(&self) -> Vec<&'static str> {
        [
            (self.overdue, "Overdue"),
            (self.today, "Today"),
            (self.this_week, "This Week"),
            (self.future, "Future"),
            (self.none, "No Deadline"),
        ]
        .into_iter()
        .filter_map(|(on, label)| on.then_some(label))
        .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceFilters {
    #[serde(default)]
    pub priorities: PriorityFilters,
    #[serde(default)]
    pub deadlines: DeadlineFilters,
}

impl WorkspaceFilters {
    /// Turns on a flag named `priority.<low|medium|high>` or
    /// `deadline.<overdue|today|this-week|future|none>`.
    pub fn enable(&mut self, flag: &str) -> anyhow::Result<()> {
        let slot = match flag.trim() {
            "priority.low" => &mut self.priorities.low,
            "priority.medium" => &mut self.priorities.medium,
            "priority.high" => &mut self.priorities.high,
            "deadline.overdue" => &mut self.deadlines.overdue,
            "deadline.today" => &mut self.deadlines.today,
            "deadline.this-week" => &mut self.deadlines.this_week,
            "deadline.future" => &mut self.deadlines.future,
            "deadline.none" => &mut self.deadlines.none,
            other => return Err(anyhow!("unknown filter flag: {other}")),
        };
        *slot = true;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOption {
    TaskCount,
    Alphabetical,
    DueDate,
    StartDate,
    Priority,
}

impl SortOption {
    pub fn as_str(self) -> &'static str {
        match self {
            SortOption::TaskCount => "task-count",
            SortOption::Alphabetical => "alphabetical",
            SortOption::DueDate => "due-date",
            SortOption::StartDate => "start-date",
            SortOption::Priority => "priority",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SortOption::TaskCount => "Sorted by Task Count",
            SortOption::Alphabetical => "Sorted Alphabetically",
            SortOption::DueDate => "Sorted by Due Date",
            SortOption::StartDate => "Sorted by Start Date",
            SortOption::Priority => "Sorted by Priority",
        }
    }
}

impl FromStr for SortOption {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "task-count" => Ok(SortOption::TaskCount),
            "alphabetical" => Ok(SortOption::Alphabetical),
            "due-date" => Ok(SortOption::DueDate),
            "start-date" => Ok(SortOption::StartDate),
            "priority" => Ok(SortOption::Priority),
            other => Err(anyhow!("unknown sort option: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "ascending",
            SortDirection::Descending => "descending",
        }
    }
}

impl FromStr for SortDirection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "ascending" => Ok(SortDirection::Ascending),
            "descending" => Ok(SortDirection::Descending),
            other => Err(anyhow!("unknown sort direction: {other}")),
        }
    }
}

/// View preferences of one workspace, persisted under
/// `workspace-{filters,sort,sort-direction,visibility}-{name}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceState {
    pub filters: Option<WorkspaceFilters>,
    pub sort: Option<SortOption>,
    pub sort_direction: Option<SortDirection>,
    pub is_public: bool,
}

impl Default for WorkspaceState {
    fn default() -> Self {
        Self {
            filters: None,
            sort: None,
            sort_direction: None,
            is_public: true,
        }
    }
}

struct Keys {
    filters: String,
    sort: String,
    sort_direction: String,
    visibility: String,
}

impl Keys {
    fn for_workspace(name: &str) -> Self {
        Self {
            filters: format!("workspace-filters-{name}"),
            sort: format!("workspace-sort-{name}"),
            sort_direction: format!("workspace-sort-direction-{name}"),
            visibility: format!("workspace-visibility-{name}"),
        }
    }
}

impl WorkspaceState {
    /// Loads the stored state; any storage or decode failure is logged and
    /// the default state is returned.
    #[tracing::instrument(skip(store))]
    pub fn load(store: &dyn KeyValueStore, name: &str) -> Self {
        match Self::try_load(store, name) {
            Ok(state) => state,
            Err(err) => {
                error!(error = %format!("{err:#}"), "error loading workspace state");
                Self::default()
            }
        }
    }

    fn try_load(store: &dyn KeyValueStore, name: &str) -> anyhow::Result<Self> {
        let keys = Keys::for_workspace(name);

        let filters = store
            .get(&keys.filters)?
            .map(|raw| serde_json::from_str::<WorkspaceFilters>(&raw))
            .transpose()
            .with_context(|| format!("invalid filters for workspace {name}"))?;

        let sort = store.get(&keys.sort)?.and_then(|raw| match raw.parse::<SortOption>() {
            Ok(sort) => Some(sort),
            Err(err) => {
                debug!(error = %err, "ignoring stored sort");
                None
            }
        });
        let sort_direction = store
            .get(&keys.sort_direction)?
            .and_then(|raw| raw.parse::<SortDirection>().ok());
        let is_public = store
            .get(&keys.visibility)?
            .is_none_or(|raw| raw == "public");

        Ok(Self {
            filters,
            sort,
            sort_direction,
            is_public,
        })
    }

    #[tracing::instrument(skip(self, store))]
    pub fn save(&self, store: &dyn KeyValueStore, name: &str) -> anyhow::Result<()> {
        let keys = Keys::for_workspace(name);

        match &self.filters {
            Some(filters) => store.set(&keys.filters, &serde_json::to_string(filters)?)?,
            None => store.remove(&keys.filters)?,
        }
        match self.sort {
            Some(sort) => store.set(&keys.sort, sort.as_str())?,
            None => store.remove(&keys.sort)?,
        }
        match self.sort_direction {
            Some(direction) => store.set(&keys.sort_direction, direction.as_str())?,
            None => store.remove(&keys.sort_direction)?,
        }
        let visibility = if self.is_public { "public" } else { "private" };
        store.set(&keys.visibility, visibility)?;
        Ok(())
    }

    pub fn has_active_state(&self) -> bool {
        self.filters.is_some() || self.sort.is_some()
    }

    pub fn filter_description(&self) -> Option<String> {
        let filters = self.filters.as_ref()?;
        let mut parts = Vec::new();

        let priorities = filters.priorities.labels();
        if !priorities.is_empty() {
            parts.push(format!("Priority: {}", priorities.join(", ")));
        }
        let deadlines = filters.deadlines.labels();
        if !deadlines.is_empty() {
            parts.push(format!("Deadline: {}", deadlines.join(", ")));
        }

        (!parts.is_empty()).then(|| parts.join(SEPARATOR))
    }

    pub fn sort_description(&self) -> Option<String> {
        let label = self.sort?.label();
        Some(match self.sort_direction {
            Some(SortDirection::Ascending) => format!("{label} (Asc)"),
            Some(SortDirection::Descending) => format!("{label} (Desc)"),
            None => label.to_string(),
        })
    }

    pub fn state_description(&self) -> String {
        let mut parts = vec![if self.is_public { "Public" } else { "Private" }.to_string()];
        let filter = self.filter_description();
        let sort = self.sort_description();
        let idle = filter.is_none() && sort.is_none();

        parts.extend(filter);
        parts.extend(sort);
        if idle {
            parts.push(DEFAULT_MESSAGE.to_string());
        }
        parts.join(SEPARATOR)
    }

    /// Tasks passing the stored filters, in source order. A task has to
    /// satisfy the priority group and the deadline group when each has at
    /// least one flag set.
    pub fn apply_filters<'a>(&self, tasks: &'a [Task], now: DateTime<Utc>, tz: &Tz) -> Vec<&'a Task> {
        let Some(filters) = self.filters else {
            return tasks.iter().collect();
        };
        let by_priority = filters.priorities.any();
        let by_deadline = filters.deadlines.any();
        if !by_priority && !by_deadline {
            return tasks.iter().collect();
        }

        tasks
            .iter()
            .filter(|task| {
                let priority_ok = !by_priority || filters.priorities.accepts(task.priority);
                let deadline_ok = !by_deadline || deadline_matches(&filters.deadlines, task, now, tz);
                priority_ok && deadline_ok
            })
            .collect()
    }
}

fn deadline_matches(flags: &DeadlineFilters, task: &Task, now: DateTime<Utc>, tz: &Tz) -> bool {
    let Some(deadline) = task.deadline_instant(tz) else {
        return flags.none;
    };

    let today = to_date_in(now, tz);
    let day = to_date_in(deadline, tz);
    let is_today = day == today;
    let this_week = week_start_sunday(day) == week_start_sunday(today);

    (flags.overdue && deadline < now && !is_today)
        || (flags.today && is_today)
        || (flags.this_week && this_week)
        || (flags.future && deadline > now && !is_today && !this_week)
}

impl fmt::Display for WorkspaceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.state_description())
    }
}
