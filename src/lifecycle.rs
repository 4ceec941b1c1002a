use std::fmt;

/// Project lifecycle status. Stored as lowercase strings in Postgres;
/// every transition goes through [`ProjectStatus::can_transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProjectStatus {
    Draft,
    Active,
    Paused,
    Completed,
    PendingReview,
    Cancelled,
}

impl ProjectStatus {
    pub const ALL: [ProjectStatus; 6] = [
        ProjectStatus::Draft,
        ProjectStatus::Active,
        ProjectStatus::Paused,
        ProjectStatus::Completed,
        ProjectStatus::PendingReview,
        ProjectStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Draft => "draft",
            ProjectStatus::Active => "active",
            ProjectStatus::Paused => "paused",
            ProjectStatus::Completed => "completed",
            ProjectStatus::PendingReview => "pending_review",
            ProjectStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Completed | ProjectStatus::Cancelled)
    }

    /// The authoritative transition table. Any move not listed here is
    /// rejected, wherever it comes from.
    pub fn can_transition(self, next: ProjectStatus) -> bool {
        use ProjectStatus::*;

        if next == Cancelled {
            return !self.is_terminal();
        }

        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Paused)
                | (Paused, Active)
                | (Active, Completed)
                | (Active, PendingReview)
                | (PendingReview, Active)
        )
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Task pipeline status. Forward-biased; the only backward move is the
/// rejection re-queue, which clears the assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Available,
    Assigned,
    InProgress,
    Submitted,
    UnderReview,
    Approved,
    Rejected,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 7] = [
        TaskStatus::Available,
        TaskStatus::Assigned,
        TaskStatus::InProgress,
        TaskStatus::Submitted,
        TaskStatus::UnderReview,
        TaskStatus::Approved,
        TaskStatus::Rejected,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Available => "available",
            TaskStatus::Assigned => "assigned",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Submitted => "submitted",
            TaskStatus::UnderReview => "under_review",
            TaskStatus::Approved => "approved",
            TaskStatus::Rejected => "rejected",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == value)
    }

    pub fn can_transition(self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        matches!(
            (self, next),
            (Available, Assigned)
                | (Assigned, InProgress)
                | (Assigned, Submitted)
                | (InProgress, Submitted)
                | (Submitted, UnderReview)
                | (UnderReview, Approved)
                | (UnderReview, Rejected)
                | (Rejected, Available)
        )
    }

    /// Invariant: a task carries an assignee exactly when it has left the
    /// `available` pool.
    pub fn requires_assignee(self) -> bool {
        self != TaskStatus::Available
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
