//! Typed payload actions.
//!
//! Quick replies and postbacks carry short string payloads. They are parsed
//! into [`Action`] when an event arrives and encoded back when a reply is
//! built; nothing past the boundary looks at the raw strings.
//!
//! Wire grammar (fixed literals, then prefix + goal id):
//!
//! | Action | Payload |
//! |---|---|
//! | `NewGoal` | `Payload new goal` |
//! | `ListGoals` | `Payload view` |
//! | `PickProgress` | `Payload progress` |
//! | `FinishedGoals` | `Payload finished` |
//! | `Home` | `home` |
//! | `ViewGoal` | `view <id>` |
//! | `LogProgress` | `prog <id>` |
//! | `Logs` | `logs<page>!<id>` |
//! | `AskDelete` | `dele <id>` |
//! | `AskFinish` | `finish <id>` |
//! | `ConfirmDelete` | `yes  <id>` |
//! | `CancelDelete` | `no   <id>` |
//! | `ConfirmFinish` | `yef  <id>` |
//! | `CancelFinish` | `nf   <id>` |

use std::sync::LazyLock;

use regex::Regex;

use crate::goals::model::GoalId;

pub const NEW_GOAL: &str = "Payload new goal";
pub const LIST_GOALS: &str = "Payload view";
pub const PICK_PROGRESS: &str = "Payload progress";
pub const FINISHED_GOALS: &str = "Payload finished";
pub const HOME: &str = "home";

static LOGS_PAYLOAD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^logs(\d{1,6})!(\S+)$").expect("logs payload pattern"));

/// Goal-scoped action kinds that use a `prefix + id` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Prefixed {
    View,
    Progress,
    Delete,
    Finish,
    YesDelete,
    NoDelete,
    YesFinish,
    NoFinish,
}

impl Prefixed {
    const ALL: [Prefixed; 8] = [
        Self::View,
        Self::Progress,
        Self::Delete,
        Self::Finish,
        Self::YesDelete,
        Self::NoDelete,
        Self::YesFinish,
        Self::NoFinish,
    ];

    fn prefix(self) -> &'static str {
        match self {
            Self::View => "view ",
            Self::Progress => "prog ",
            Self::Delete => "dele ",
            Self::Finish => "finish ",
            Self::YesDelete => "yes  ",
            Self::NoDelete => "no   ",
            Self::YesFinish => "yef  ",
            Self::NoFinish => "nf   ",
        }
    }

    fn with(self, id: GoalId) -> Action {
        match self {
            Self::View => Action::ViewGoal(id),
            Self::Progress => Action::LogProgress(id),
            Self::Delete => Action::AskDelete(id),
            Self::Finish => Action::AskFinish(id),
            Self::YesDelete => Action::ConfirmDelete(id),
            Self::NoDelete => Action::CancelDelete(id),
            Self::YesFinish => Action::ConfirmFinish(id),
            Self::NoFinish => Action::CancelFinish(id),
        }
    }
}

/// A user action carried by a quick reply or postback payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    NewGoal,
    ListGoals,
    PickProgress,
    FinishedGoals,
    Home,
    ViewGoal(GoalId),
    LogProgress(GoalId),
    Logs { page: usize, goal: GoalId },
    AskDelete(GoalId),
    AskFinish(GoalId),
    ConfirmDelete(GoalId),
    CancelDelete(GoalId),
    ConfirmFinish(GoalId),
    CancelFinish(GoalId),
}

impl Action {
    /// Parse a raw payload. Returns `None` for anything outside the grammar,
    /// including well-formed prefixes with an unparsable goal id.
    pub fn parse(payload: &str) -> Option<Self> {
        match payload {
            NEW_GOAL => return Some(Self::NewGoal),
            LIST_GOALS => return Some(Self::ListGoals),
            PICK_PROGRESS => return Some(Self::PickProgress),
            FINISHED_GOALS => return Some(Self::FinishedGoals),
            HOME => return Some(Self::Home),
            _ => {}
        }

        if let Some(caps) = LOGS_PAYLOAD.captures(payload) {
            let page = caps[1].parse().ok()?;
            let goal = caps[2].parse().ok()?;
            return Some(Self::Logs { page, goal });
        }

        Prefixed::ALL.iter().find_map(|kind| {
            let rest = payload.strip_prefix(kind.prefix())?;
            let id: GoalId = rest.parse().ok()?;
            Some(kind.with(id))
        })
    }

    /// Encode as a wire payload.
    pub fn encode(&self) -> String {
        match self {
            Self::NewGoal => NEW_GOAL.to_string(),
            Self::ListGoals => LIST_GOALS.to_string(),
            Self::PickProgress => PICK_PROGRESS.to_string(),
            Self::FinishedGoals => FINISHED_GOALS.to_string(),
            Self::Home => HOME.to_string(),
            Self::Logs { page, goal } => format!("logs{page}!{goal}"),
            Self::ViewGoal(id) => format!("{}{id}", Prefixed::View.prefix()),
            Self::LogProgress(id) => format!("{}{id}", Prefixed::Progress.prefix()),
            Self::AskDelete(id) => format!("{}{id}", Prefixed::Delete.prefix()),
            Self::AskFinish(id) => format!("{}{id}", Prefixed::Finish.prefix()),
            Self::ConfirmDelete(id) => format!("{}{id}", Prefixed::YesDelete.prefix()),
            Self::CancelDelete(id) => format!("{}{id}", Prefixed::NoDelete.prefix()),
            Self::ConfirmFinish(id) => format!("{}{id}", Prefixed::YesFinish.prefix()),
            Self::CancelFinish(id) => format!("{}{id}", Prefixed::NoFinish.prefix()),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id() -> GoalId {
        "6f1c2b9e-4a3d-4c2e-9a51-2f7d3c8e1b40".parse().unwrap()
    }

    #[test]
    fn fixed_literals() {
        assert_eq!(Action::parse("Payload new goal"), Some(Action::NewGoal));
        assert_eq!(Action::parse("Payload view"), Some(Action::ListGoals));
        assert_eq!(Action::parse("Payload progress"), Some(Action::PickProgress));
        assert_eq!(Action::parse("Payload finished"), Some(Action::FinishedGoals));
        assert_eq!(Action::parse("home"), Some(Action::Home));
    }

    #[test]
    fn prefixed_payloads_match_wire_format() {
        let id = id();
        let cases = [
            (format!("view {id}"), Action::ViewGoal(id)),
            (format!("prog {id}"), Action::LogProgress(id)),
            (format!("dele {id}"), Action::AskDelete(id)),
            (format!("finish {id}"), Action::AskFinish(id)),
            (format!("yes  {id}"), Action::ConfirmDelete(id)),
            (format!("no   {id}"), Action::CancelDelete(id)),
            (format!("yef  {id}"), Action::ConfirmFinish(id)),
            (format!("nf   {id}"), Action::CancelFinish(id)),
            (format!("logs3!{id}"), Action::Logs { page: 3, goal: id }),
        ];
        for (wire, action) in cases {
            assert_eq!(Action::parse(&wire), Some(action), "parsing {wire:?}");
            assert_eq!(action.encode(), wire);
        }
    }

    #[test]
    fn separator_width_is_load_bearing() {
        let id = id();
        assert_eq!(Action::parse(&format!("yes {id}")), None);
        assert_eq!(Action::parse(&format!("no {id}")), None);
        assert_eq!(Action::parse(&format!("view  {id}")), None);
    }

    #[test]
    fn rejects_unknown_and_malformed() {
        assert_eq!(Action::parse(""), None);
        assert_eq!(Action::parse("payload view"), None);
        assert_eq!(Action::parse("view not-a-goal"), None);
        assert_eq!(Action::parse("logs!abc"), None);
        assert_eq!(Action::parse(&format!("logsx!{}", id())), None);
        assert_eq!(Action::parse("GET_STARTED"), None);
    }
}
