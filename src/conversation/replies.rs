//! Reply builders. Pure functions from domain values to [`Reply`].

use crate::channels::gateway::{Button, MAX_QUICK_REPLIES, QuickReply, Reply};
use crate::error::ValidationError;
use crate::goals::model::{Goal, MAX_LOG_LEN, MAX_NAME_LEN};

use super::action::Action;

/// Log entries shown per page.
pub const LOG_PAGE_SIZE: usize = 5;

/// Demo keywords answered while idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Help,
    About,
    Motivate,
    Menu,
}

impl Keyword {
    /// Match trimmed, case-insensitive text.
    pub fn parse(text: &str) -> Option<Self> {
        match text.trim().to_lowercase().as_str() {
            "help" => Some(Self::Help),
            "about" => Some(Self::About),
            "motivate" => Some(Self::Motivate),
            "menu" => Some(Self::Menu),
            _ => None,
        }
    }
}

/// Which action a goal list offers per goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPurpose {
    View,
    Progress,
}

fn days(n: u32) -> &'static str {
    if n == 1 { "day" } else { "days" }
}

pub fn greeting() -> Reply {
    Reply::text(
        "Hi! I help you build habits one day at a time. \
         Create a goal, check in every day, and watch your streak grow.",
    )
}

pub fn home_menu() -> Reply {
    Reply::QuickReplies {
        text: "What would you like to do?".into(),
        options: vec![
            QuickReply::new("New goal", Action::NewGoal),
            QuickReply::new("Log progress", Action::PickProgress),
            QuickReply::new("My goals", Action::ListGoals),
        ],
    }
}

pub fn help() -> Reply {
    Reply::text(
        "Tap \"New goal\" to start tracking something, \"Log progress\" to check in, \
         and \"My goals\" to see your streaks. Type \"menu\" at any time.",
    )
}

pub fn about() -> Reply {
    Reply::text(format!(
        "Streak bot {}. A streak counts the consecutive days you checked in on a goal. \
         Miss a day and it starts over.",
        env!("CARGO_PKG_VERSION")
    ))
}

pub fn motivation(line: &str) -> Reply {
    Reply::text(line)
}

pub fn ask_goal_name() -> Reply {
    Reply::text(format!(
        "What do you want to call your new goal? (up to {MAX_NAME_LEN} characters)"
    ))
}

pub fn goal_created(goal: &Goal) -> Reply {
    Reply::text(format!(
        "Goal \"{}\" created. Log progress every day to build your streak!",
        goal.name
    ))
}

pub fn no_goals() -> Reply {
    Reply::text("You don't have any goals yet. Tap \"New goal\" to create one.")
}

/// One line per goal plus a quick reply per goal. Viewing also offers the
/// finished goals.
pub fn goal_list(goals: &[Goal], purpose: ListPurpose) -> Reply {
    let mut text = match purpose {
        ListPurpose::View if goals.is_empty() => "You have no active goals.".to_string(),
        ListPurpose::View => "Your goals:".to_string(),
        ListPurpose::Progress => "Which goal did you work on?".to_string(),
    };
    for goal in goals {
        text.push_str(&format!(
            "\n• {}: {} {} streak, {} total",
            goal.name,
            goal.streak,
            days(goal.streak),
            goal.total
        ));
    }

    let reserved = usize::from(purpose == ListPurpose::View);
    let mut options: Vec<QuickReply> = goals
        .iter()
        .take(MAX_QUICK_REPLIES - reserved)
        .map(|g| {
            let action = match purpose {
                ListPurpose::View => Action::ViewGoal(g.id),
                ListPurpose::Progress => Action::LogProgress(g.id),
            };
            QuickReply::new(g.name.clone(), action)
        })
        .collect();
    if purpose == ListPurpose::View {
        options.push(QuickReply::new("Finished Goals", Action::FinishedGoals));
    }

    Reply::QuickReplies { text, options }
}

pub fn finished_list(finished: &[String]) -> Reply {
    if finished.is_empty() {
        return Reply::text("You haven't finished any goals yet. Keep going!");
    }
    let mut text = "Finished goals:".to_string();
    for summary in finished {
        text.push_str("\n• ");
        text.push_str(summary);
    }
    Reply::text(text)
}

/// Goal detail card with the view-logs / finish / delete buttons.
pub fn goal_card(goal: &Goal) -> Reply {
    let mut text = format!(
        "{}\nStreak: {} {}\nTotal check-ins: {}",
        goal.name,
        goal.streak,
        days(goal.streak),
        goal.total
    );
    if let Some(last) = goal.log.first() {
        text.push_str(&format!("\nLast: {} {}", last.date.format("%b %-d"), last.text));
    }
    Reply::Buttons {
        text,
        buttons: vec![
            Button::new(
                "View logs",
                Action::Logs {
                    page: 0,
                    goal: goal.id,
                },
            ),
            Button::new("Finish", Action::AskFinish(goal.id)),
            Button::new("Delete", Action::AskDelete(goal.id)),
        ],
    }
}

/// One page of log entries, newest first.
pub fn log_page(goal: &Goal, page: usize) -> Reply {
    let start = page.saturating_mul(LOG_PAGE_SIZE);
    let entries: Vec<_> = goal.log.iter().skip(start).take(LOG_PAGE_SIZE).collect();

    let text = if goal.log.is_empty() {
        format!("No progress logged for {} yet.", goal.name)
    } else if entries.is_empty() {
        format!("No more entries for {}.", goal.name)
    } else {
        let mut text = format!("{} log:", goal.name);
        for entry in &entries {
            text.push_str(&format!("\n{}: {}", entry.date.format("%Y-%m-%d"), entry.text));
        }
        text
    };

    let mut options = Vec::new();
    if start + LOG_PAGE_SIZE < goal.log.len() {
        options.push(QuickReply::new(
            "More",
            Action::Logs {
                page: page + 1,
                goal: goal.id,
            },
        ));
    }
    options.push(QuickReply::new("Home", Action::Home));
    Reply::QuickReplies { text, options }
}

pub fn ask_progress(goal: &Goal) -> Reply {
    Reply::text(format!(
        "{} (streak {}). What did you do today? (up to {MAX_LOG_LEN} characters)",
        goal.name, goal.streak
    ))
}

pub fn progress_logged(goal: &Goal) -> Reply {
    Reply::text(format!(
        "Logged! {} is on a {} {} streak with {} check-ins.",
        goal.name,
        goal.streak,
        days(goal.streak),
        goal.total
    ))
}

pub fn confirm_delete(goal: &Goal) -> Reply {
    Reply::QuickReplies {
        text: format!("Delete \"{}\"? Its streak and log will be lost.", goal.name),
        options: vec![
            QuickReply::new("Yes", Action::ConfirmDelete(goal.id)),
            QuickReply::new("No", Action::CancelDelete(goal.id)),
        ],
    }
}

pub fn confirm_finish(goal: &Goal) -> Reply {
    Reply::QuickReplies {
        text: format!("Mark \"{}\" as finished?", goal.name),
        options: vec![
            QuickReply::new("Yes", Action::ConfirmFinish(goal.id)),
            QuickReply::new("No", Action::CancelFinish(goal.id)),
        ],
    }
}

pub fn goal_deleted(goal: &Goal) -> Reply {
    Reply::text(format!("Deleted \"{}\".", goal.name))
}

pub fn goal_finished(summary: &str) -> Reply {
    Reply::text(format!("Congratulations on finishing! {summary}"))
}

pub fn rejection(err: &ValidationError) -> Reply {
    Reply::text(err.to_string())
}

pub fn apology() -> Reply {
    Reply::text("Sorry, something went wrong on our side. Please try again.")
}
