//! ConversationManager: per-user mode tracking and event dispatch.
//!
//! One inbound event is handled as a sequential pipeline under the sender
//! lock: load or create the user, dispatch on payload or mode, persist the
//! mode change, then deliver the replies in order. Replies are sent after
//! the store writes and a failed send never rolls them back.

use std::sync::Arc;

use chrono::FixedOffset;
use tracing::{debug, error, info, warn};

use crate::channels::gateway::{EventKind, InboundEvent, MessagingGateway, Reply};
use crate::error::{GoalError, ValidationError};
use crate::goals::model::GoalId;
use crate::goals::streak::Moment;
use crate::goals::{GoalService, KeyedLocks};
use crate::motivation::MotivationFeed;
use crate::store::{Database, UserPatch};

use super::action::Action;
use super::replies::{self, Keyword, ListPurpose};
use super::state::{User, UserMode};

/// Coordinates the conversation: user records, mode transitions, goal
/// operations, and outbound replies.
pub struct ConversationManager {
    db: Arc<dyn Database>,
    goals: GoalService,
    gateway: Arc<dyn MessagingGateway>,
    motivation: Arc<dyn MotivationFeed>,
    sender_locks: KeyedLocks<String>,
}

impl ConversationManager {
    pub fn new(
        db: Arc<dyn Database>,
        gateway: Arc<dyn MessagingGateway>,
        motivation: Arc<dyn MotivationFeed>,
        offset: FixedOffset,
    ) -> Self {
        Self {
            goals: GoalService::new(Arc::clone(&db), offset),
            db,
            gateway,
            motivation,
            sender_locks: KeyedLocks::new(),
        }
    }

    /// Handle one inbound event end to end.
    ///
    /// Validation failures and missing goals are answered in the chat and
    /// return `Ok`. Store failures are answered with an apology and returned.
    pub async fn handle(&self, event: InboundEvent) -> Result<(), GoalError> {
        let _guard = self.sender_locks.lock(&event.sender_id).await;
        let sender = event.sender_id.as_str();
        let now = self.goals.moment(event.received_at);

        let (user, fresh) = match self.db.get_user(sender).await? {
            Some(user) => (user, false),
            None => {
                let user = User::new(sender);
                self.db.insert_user(&user).await?;
                info!(sender, "New user");
                (user, true)
            }
        };

        let mut out = Vec::new();
        if fresh {
            out.push(replies::greeting());
            out.push(replies::home_menu());
        }

        let result = match self.dispatch(&user, &event.kind, now, fresh).await {
            Ok(mut replies) => {
                out.append(&mut replies);
                Ok(())
            }
            Err(GoalError::Validation(e)) => {
                out.push(replies::rejection(&e));
                Ok(())
            }
            Err(e) if e.is_benign() => {
                debug!(sender, error = %e, "Stale action, returning home");
                if let Err(e) = self.set_mode(&user, UserMode::Idle).await {
                    warn!(sender, error = %e, "Failed to reset mode");
                }
                out.push(replies::home_menu());
                Ok(())
            }
            Err(e) => {
                error!(sender, error = %e, "Event handling failed");
                out.push(replies::apology());
                Err(e)
            }
        };

        self.deliver(sender, &out).await;
        result
    }

    async fn dispatch(
        &self,
        user: &User,
        kind: &EventKind,
        now: Moment,
        fresh: bool,
    ) -> Result<Vec<Reply>, GoalError> {
        match kind {
            EventKind::Payload(raw) => match Action::parse(raw) {
                Some(action) => self.on_action(user, action, now).await,
                None => {
                    warn!(sender = %user.sender_id, payload = %raw, "Unrecognized payload");
                    self.set_mode(user, UserMode::Idle).await?;
                    Ok(if fresh {
                        Vec::new()
                    } else {
                        vec![replies::home_menu()]
                    })
                }
            },
            EventKind::Text(text) => match user.mode {
                UserMode::Idle => self.on_idle_text(user, text, fresh).await,
                UserMode::NamingGoal => self.on_goal_name(user, text).await,
                UserMode::LoggingProgress(id) => self.on_progress_text(user, id, text, now).await,
            },
        }
    }

    /// Payloads are honored in any mode. Everything except starting a new
    /// goal or picking a goal to log leaves the user idle.
    async fn on_action(
        &self,
        user: &User,
        action: Action,
        now: Moment,
    ) -> Result<Vec<Reply>, GoalError> {
        let sender = user.sender_id.as_str();
        debug!(sender, %action, mode = %user.mode, "Dispatching action");

        if !matches!(action, Action::NewGoal | Action::LogProgress(_)) {
            self.set_mode(user, UserMode::Idle).await?;
        }

        match action {
            Action::NewGoal => match self.goals.ensure_capacity(sender).await {
                Ok(()) => {
                    self.set_mode(user, UserMode::NamingGoal).await?;
                    Ok(vec![replies::ask_goal_name()])
                }
                Err(GoalError::Validation(e)) => {
                    self.set_mode(user, UserMode::Idle).await?;
                    Ok(vec![replies::rejection(&e), replies::home_menu()])
                }
                Err(e) => Err(e),
            },
            Action::LogProgress(id) => {
                let goal = self.goals.view_goal(sender, id, now).await?;
                self.set_mode(user, UserMode::LoggingProgress(id)).await?;
                Ok(vec![replies::ask_progress(&goal)])
            }
            Action::Home | Action::CancelDelete(_) | Action::CancelFinish(_) => {
                Ok(vec![replies::home_menu()])
            }
            Action::ListGoals => {
                let goals = self.goals.view_all(sender, now).await?;
                Ok(vec![replies::goal_list(&goals, ListPurpose::View)])
            }
            Action::PickProgress => {
                let goals = self.goals.view_all(sender, now).await?;
                if goals.is_empty() {
                    return Ok(vec![replies::no_goals(), replies::home_menu()]);
                }
                Ok(vec![replies::goal_list(&goals, ListPurpose::Progress)])
            }
            Action::FinishedGoals => Ok(vec![
                replies::finished_list(&user.finished_goals),
                replies::home_menu(),
            ]),
            Action::ViewGoal(id) => {
                let goal = self.goals.view_goal(sender, id, now).await?;
                Ok(vec![replies::goal_card(&goal)])
            }
            Action::Logs { page, goal } => {
                let goal = self.goals.goal(sender, goal).await?;
                Ok(vec![replies::log_page(&goal, page)])
            }
            Action::AskDelete(id) => {
                let goal = self.goals.goal(sender, id).await?;
                Ok(vec![replies::confirm_delete(&goal)])
            }
            Action::AskFinish(id) => {
                let goal = self.goals.goal(sender, id).await?;
                Ok(vec![replies::confirm_finish(&goal)])
            }
            Action::ConfirmDelete(id) => {
                let goal = self.goals.delete_goal(sender, id).await?;
                Ok(vec![replies::goal_deleted(&goal), replies::home_menu()])
            }
            Action::ConfirmFinish(id) => {
                let summary = self.goals.finish_goal(sender, id, now).await?;
                Ok(vec![replies::goal_finished(&summary), replies::home_menu()])
            }
        }
    }

    async fn on_idle_text(
        &self,
        user: &User,
        text: &str,
        fresh: bool,
    ) -> Result<Vec<Reply>, GoalError> {
        Ok(match Keyword::parse(text) {
            Some(Keyword::Help) => vec![replies::help()],
            Some(Keyword::About) => vec![replies::about()],
            Some(Keyword::Menu) => vec![replies::home_menu()],
            Some(Keyword::Motivate) => {
                let (line, next) = self.motivation_at(user);
                self.db
                    .update_user(
                        &user.sender_id,
                        &UserPatch {
                            last_motivation_index: Some(next),
                            ..Default::default()
                        },
                    )
                    .await?;
                vec![replies::motivation(&line)]
            }
            // First contact already got the menu.
            None if fresh => Vec::new(),
            None => vec![replies::home_menu()],
        })
    }

    /// Free text while naming: validation failures keep the user naming,
    /// except the goal cap, which sends them home.
    async fn on_goal_name(&self, user: &User, text: &str) -> Result<Vec<Reply>, GoalError> {
        match self.goals.create_goal(&user.sender_id, text).await {
            Ok(goal) => {
                self.set_mode(user, UserMode::Idle).await?;
                Ok(vec![replies::goal_created(&goal), replies::home_menu()])
            }
            Err(GoalError::Validation(e @ ValidationError::GoalLimitReached { .. })) => {
                self.set_mode(user, UserMode::Idle).await?;
                Ok(vec![replies::rejection(&e), replies::home_menu()])
            }
            Err(GoalError::Validation(e)) => {
                Ok(vec![replies::rejection(&e), replies::ask_goal_name()])
            }
            Err(e) => Err(e),
        }
    }

    async fn on_progress_text(
        &self,
        user: &User,
        id: GoalId,
        text: &str,
        now: Moment,
    ) -> Result<Vec<Reply>, GoalError> {
        let goal = match self.goals.log_progress(&user.sender_id, id, text, now).await {
            Ok(goal) => goal,
            // Too long: stay in logging mode so the user can retry.
            Err(GoalError::Validation(e)) => return Ok(vec![replies::rejection(&e)]),
            Err(e) => return Err(e),
        };

        let (line, next) = self.motivation_at(user);
        self.db
            .update_user(
                &user.sender_id,
                &UserPatch {
                    mode: Some(UserMode::Idle),
                    last_motivation_index: Some(next),
                    ..Default::default()
                },
            )
            .await?;

        Ok(vec![
            replies::progress_logged(&goal),
            replies::motivation(&line),
            replies::home_menu(),
        ])
    }

    /// The line at the user's cursor and the cursor to store next.
    fn motivation_at(&self, user: &User) -> (String, u32) {
        let index = user.last_motivation_index;
        (
            self.motivation.line(index).to_string(),
            index.wrapping_add(1),
        )
    }

    async fn set_mode(&self, user: &User, mode: UserMode) -> Result<(), GoalError> {
        if user.mode == mode {
            return Ok(());
        }
        if user.mode.awaits_input() && mode.awaits_input() {
            debug!(sender = %user.sender_id, from = %user.mode, to = %mode, "Abandoning pending input");
        }
        self.db
            .update_user(&user.sender_id, &UserPatch::mode(mode))
            .await?;
        debug!(sender = %user.sender_id, from = %user.mode, to = %mode, "Mode changed");
        Ok(())
    }

    /// Send replies in order. Failures are logged and skipped.
    async fn deliver(&self, recipient: &str, replies: &[Reply]) {
        if replies.is_empty() {
            return;
        }
        if let Err(e) = self.gateway.typing(recipient).await {
            debug!(recipient, error = %e, "Typing indicator failed");
        }
        for reply in replies {
            if let Err(e) = self.gateway.send(recipient, reply).await {
                warn!(
                    recipient,
                    gateway = self.gateway.name(),
                    error = %e,
                    "Failed to send reply"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    use super::*;
    use crate::error::GatewayError;
    use crate::goals::model::MAX_GOALS;
    use crate::motivation::StaticMotivationFeed;
    use crate::store::LibSqlBackend;

    const SENDER: &str = "1001";

    #[derive(Default)]
    struct RecordingGateway {
        sent: Mutex<Vec<Reply>>,
        fail: bool,
    }

    impl RecordingGateway {
        fn take(&self) -> Vec<Reply> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl MessagingGateway for RecordingGateway {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, _recipient: &str, reply: &Reply) -> Result<(), GatewayError> {
            self.sent.lock().unwrap().push(reply.clone());
            if self.fail {
                return Err(GatewayError::Request("offline".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        db: Arc<dyn Database>,
        gateway: Arc<RecordingGateway>,
        manager: ConversationManager,
    }

    /// Wednesday 2026-03-04 09:00 UTC.
    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 4, 9, 0, 0).unwrap()
    }

    async fn harness_with(gateway: RecordingGateway) -> Harness {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let gateway = Arc::new(gateway);
        let feed = StaticMotivationFeed::from_lines(vec!["first".into(), "second".into()]);
        let manager = ConversationManager::new(
            Arc::clone(&db),
            gateway.clone(),
            Arc::new(feed),
            FixedOffset::east_opt(0).unwrap(),
        );
        Harness {
            db,
            gateway,
            manager,
        }
    }

    async fn harness() -> Harness {
        harness_with(RecordingGateway::default()).await
    }

    impl Harness {
        async fn text(&self, text: &str) -> Vec<Reply> {
            self.manager
                .handle(InboundEvent::text(SENDER, text).at(base()))
                .await
                .unwrap();
            self.gateway.take()
        }

        async fn tap(&self, action: Action) -> Vec<Reply> {
            self.tap_at(action, base()).await
        }

        async fn tap_at(&self, action: Action, at: DateTime<Utc>) -> Vec<Reply> {
            self.manager
                .handle(InboundEvent::payload(SENDER, action.encode()).at(at))
                .await
                .unwrap();
            self.gateway.take()
        }

        async fn user(&self) -> User {
            self.db.get_user(SENDER).await.unwrap().unwrap()
        }

        /// Register the user and drain the greeting.
        async fn onboard(&self) {
            self.text("hi").await;
        }

        async fn create(&self, name: &str) -> GoalId {
            self.tap(Action::NewGoal).await;
            self.text(name).await;
            let goals = self.db.list_goals(SENDER).await.unwrap();
            goals.last().unwrap().id
        }
    }

    #[tokio::test]
    async fn first_contact_greets_before_anything_else() {
        let h = harness().await;
        let sent = h.text("hello there").await;
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], replies::greeting());
        assert_eq!(sent[1], replies::home_menu());

        let user = h.user().await;
        assert_eq!(user.mode, UserMode::Idle);
        assert_eq!(user.goal_count, 0);
    }

    #[tokio::test]
    async fn first_contact_with_payload_still_dispatches() {
        let h = harness().await;
        let sent = h.tap(Action::NewGoal).await;
        assert_eq!(sent[0], replies::greeting());
        assert_eq!(sent[2], replies::ask_goal_name());
        assert_eq!(h.user().await.mode, UserMode::NamingGoal);
    }

    #[tokio::test]
    async fn unknown_idle_text_falls_back_to_menu() {
        let h = harness().await;
        h.onboard().await;
        assert_eq!(h.text("what?").await, vec![replies::home_menu()]);
        assert_eq!(h.text("HELP").await, vec![replies::help()]);
    }

    #[tokio::test]
    async fn naming_flow_creates_goal() {
        let h = harness().await;
        h.onboard().await;

        h.tap(Action::NewGoal).await;
        assert_eq!(h.user().await.mode, UserMode::NamingGoal);

        let sent = h.text("run").await;
        assert!(sent[0].body().contains("\"Run\" created"));
        let user = h.user().await;
        assert_eq!(user.mode, UserMode::Idle);
        assert_eq!(user.goal_count, 1);
    }

    #[tokio::test]
    async fn duplicate_name_keeps_naming_mode() {
        let h = harness().await;
        h.onboard().await;
        h.create("run").await;

        h.tap(Action::NewGoal).await;
        let sent = h.text("RUN").await;
        assert!(sent[0].body().contains("already have a goal"));
        assert_eq!(h.user().await.mode, UserMode::NamingGoal);
        assert_eq!(h.db.list_goals(SENDER).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn new_goal_at_cap_is_rejected() {
        let h = harness().await;
        h.onboard().await;
        for i in 0..MAX_GOALS {
            h.create(&format!("goal {i}")).await;
        }

        let sent = h.tap(Action::NewGoal).await;
        assert!(sent[0].body().contains("already have 5 goals"));
        assert_eq!(sent[1], replies::home_menu());
        assert_eq!(h.user().await.mode, UserMode::Idle);
        assert_eq!(h.user().await.goal_count, MAX_GOALS as u32);
    }

    #[tokio::test]
    async fn progress_flow_logs_and_motivates() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;

        let sent = h.tap(Action::LogProgress(id)).await;
        assert!(sent[0].body().starts_with("Run (streak 0)"));
        assert_eq!(h.user().await.mode, UserMode::LoggingProgress(id));

        let sent = h.text("5k easy").await;
        assert_eq!(sent.len(), 3);
        assert!(sent[0].body().contains("1 day streak"));
        assert_eq!(sent[1], replies::motivation("first"));

        let user = h.user().await;
        assert_eq!(user.mode, UserMode::Idle);
        assert_eq!(user.last_motivation_index, 1);

        // Next log sends the next line.
        h.tap(Action::LogProgress(id)).await;
        let sent = h.text("again").await;
        assert_eq!(sent[1], replies::motivation("second"));
    }

    #[tokio::test]
    async fn overlong_progress_keeps_logging_mode() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::LogProgress(id)).await;

        let sent = h.text(&"x".repeat(120)).await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body().contains("limit is 96"));
        assert_eq!(h.user().await.mode, UserMode::LoggingProgress(id));
        assert_eq!(h.db.get_goal(id).await.unwrap().unwrap().total, 0);
    }

    #[tokio::test]
    async fn blank_progress_is_rejected_and_not_credited() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::LogProgress(id)).await;

        let sent = h.text("   ").await;
        assert_eq!(sent, vec![replies::rejection(&ValidationError::EmptyLog)]);
        assert_eq!(h.user().await.mode, UserMode::LoggingProgress(id));
        let goal = h.db.get_goal(id).await.unwrap().unwrap();
        assert_eq!(goal.total, 0);
        assert!(goal.log.is_empty());
    }

    #[tokio::test]
    async fn logging_on_vanished_goal_returns_home() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::LogProgress(id)).await;
        h.db.delete_goal(id).await.unwrap();

        let sent = h.text("did it").await;
        assert_eq!(sent, vec![replies::home_menu()]);
        assert_eq!(h.user().await.mode, UserMode::Idle);
    }

    #[tokio::test]
    async fn payload_while_naming_returns_to_idle() {
        let h = harness().await;
        h.onboard().await;
        h.create("run").await;
        h.tap(Action::NewGoal).await;

        let sent = h.tap(Action::ListGoals).await;
        assert!(sent[0].body().contains("Your goals:"));
        assert_eq!(h.user().await.mode, UserMode::Idle);
    }

    #[tokio::test]
    async fn view_list_shows_decayed_streaks() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::LogProgress(id)).await;
        h.text("x").await;

        let later = base() + Duration::days(10);
        let sent = h.tap_at(Action::ListGoals, later).await;
        assert!(sent[0].body().contains("Run: 0 days streak, 1 total"));
        assert_eq!(h.db.get_goal(id).await.unwrap().unwrap().streak, 0);
    }

    #[tokio::test]
    async fn pick_progress_without_goals() {
        let h = harness().await;
        h.onboard().await;
        let sent = h.tap(Action::PickProgress).await;
        assert_eq!(sent, vec![replies::no_goals(), replies::home_menu()]);
    }

    #[tokio::test]
    async fn delete_confirmation_and_replay() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;

        let sent = h.tap(Action::AskDelete(id)).await;
        assert_eq!(
            sent[0].actions(),
            vec![Action::ConfirmDelete(id), Action::CancelDelete(id)]
        );

        let sent = h.tap(Action::ConfirmDelete(id)).await;
        assert!(sent[0].body().starts_with("Deleted"));
        assert_eq!(h.user().await.goal_count, 0);

        // Replayed confirmation: benign, home menu.
        let sent = h.tap(Action::ConfirmDelete(id)).await;
        assert_eq!(sent, vec![replies::home_menu()]);
        assert_eq!(h.user().await.goal_count, 0);
    }

    #[tokio::test]
    async fn cancel_keeps_goal() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::AskFinish(id)).await;
        let sent = h.tap(Action::CancelFinish(id)).await;
        assert_eq!(sent, vec![replies::home_menu()]);
        assert!(h.db.get_goal(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn finish_records_summary() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;

        let sent = h.tap(Action::ConfirmFinish(id)).await;
        assert!(sent[0].body().contains("Run: 0 check-ins"));

        let user = h.user().await;
        assert_eq!(user.goal_count, 0);
        assert_eq!(user.finished_goals.len(), 1);

        let sent = h.tap(Action::FinishedGoals).await;
        assert!(sent[0].body().contains("Run: 0 check-ins, final streak 0, finished 2026-03-04"));
    }

    #[tokio::test]
    async fn goal_card_and_logs() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;
        h.tap(Action::LogProgress(id)).await;
        h.text("5k").await;

        let sent = h.tap(Action::ViewGoal(id)).await;
        assert!(matches!(sent[0], Reply::Buttons { .. }));

        let sent = h.tap(Action::Logs { page: 0, goal: id }).await;
        assert!(sent[0].body().contains("2026-03-04: 5k"));
    }

    #[tokio::test]
    async fn other_users_goal_is_not_reachable() {
        let h = harness().await;
        h.onboard().await;
        let id = h.create("run").await;

        h.manager
            .handle(InboundEvent::payload("2002", Action::ConfirmDelete(id).encode()).at(base()))
            .await
            .unwrap();
        h.gateway.take();
        assert!(h.db.get_goal(id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn unknown_payload_goes_home() {
        let h = harness().await;
        h.onboard().await;
        let sent = h.tap_raw("GET_STARTED").await;
        assert_eq!(sent, vec![replies::home_menu()]);
    }

    #[tokio::test]
    async fn failed_sends_do_not_roll_back() {
        let h = harness_with(RecordingGateway {
            fail: true,
            ..Default::default()
        })
        .await;
        h.onboard().await;
        let id = h.create("run").await;

        assert!(h.db.get_goal(id).await.unwrap().is_some());
        assert_eq!(h.user().await.goal_count, 1);
    }

    impl Harness {
        async fn tap_raw(&self, payload: &str) -> Vec<Reply> {
            self.manager
                .handle(InboundEvent::payload(SENDER, payload).at(base()))
                .await
                .unwrap();
            self.gateway.take()
        }
    }
}
