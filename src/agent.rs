use std::sync::Arc;

use anyhow::Result;
use tokio::sync::RwLock;

use crate::config::Config;
use crate::life::{LifeManager, holiday};
use crate::life::store::DailyState;
use crate::llm::{LlmClient, Message};
use crate::scheduler::DailyTimer;
use crate::session::SessionStore;

/// How many recent messages from the active conversation go back to the model.
const CONTEXT_MESSAGES: usize = 20;

const USAGE: &str = "Life schedule commands:\n\
    /life show - view today's schedule\n\
    /life regenerate [request] - regenerate today's schedule (admin)\n\
    /life time <HH:MM> - set the daily generation time (admin)";

const ADMIN_ONLY: &str = "This command is admin-only.";

pub struct Agent {
    llm: Arc<dyn LlmClient>,
    life: Arc<LifeManager>,
    timer: Arc<DailyTimer>,
    sessions: Arc<SessionStore>,
    config: Arc<RwLock<Config>>,
}

impl Agent {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        life: Arc<LifeManager>,
        timer: Arc<DailyTimer>,
        sessions: Arc<SessionStore>,
        config: Arc<RwLock<Config>>,
    ) -> Self {
        Self {
            llm,
            life,
            timer,
            sessions,
            config,
        }
    }

    pub async fn handle_message(&self, text: &str, source: &str, user: &str) -> Result<String> {
        let text = text.trim();
        if let Some(rest) = text.strip_prefix("/life")
            && (rest.is_empty() || rest.starts_with(char::is_whitespace))
        {
            return self.life_command(rest.trim(), user).await;
        }

        tracing::info!("[{source}] {user}: {text}");

        let system = self.build_system_prompt().await;
        let mut messages = vec![Message::system(system)];
        if let Some(recent) = self.sessions.recent(source, CONTEXT_MESSAGES) {
            for entry in recent {
                messages.push(Message {
                    role: entry.role,
                    content: entry.text,
                });
            }
        }
        messages.push(Message::user(text));

        let reply = self.llm.chat(messages).await?;

        self.sessions.record(source, "user", text)?;
        self.sessions.record(source, "assistant", &reply)?;
        Ok(reply)
    }

    /// The daily-state block goes ahead of the persona so the model reads
    /// current state before anything else.
    async fn build_system_prompt(&self) -> String {
        let persona = self.config.read().await.agent.persona.clone();
        match self.life.injection().await {
            Some(block) => format!("{block}\n\n{persona}"),
            None => persona,
        }
    }

    async fn life_command(&self, args: &str, user: &str) -> Result<String> {
        let (action, param) = match args.split_once(char::is_whitespace) {
            Some((action, param)) => (action, param.trim()),
            None => (args, ""),
        };
        match action {
            "show" => match self.life.ensure_fresh().await {
                Ok(state) => Ok(format_state(&state)),
                Err(e) => {
                    tracing::error!("Schedule generation for /life show failed: {e}");
                    Ok("Today's schedule could not be generated. Check the logs.".to_string())
                }
            },
            "regenerate" => {
                if !self.is_admin(user).await {
                    return Ok(ADMIN_ONLY.to_string());
                }
                let supplement = (!param.is_empty()).then_some(param);
                match self.life.regenerate(supplement).await {
                    Ok(state) => Ok(format!(
                        "Regenerated today's schedule.\n\n{}",
                        format_state(&state)
                    )),
                    Err(e) => {
                        tracing::error!("Manual regeneration failed: {e}");
                        Ok("Regeneration failed; the previous schedule is unchanged.".to_string())
                    }
                }
            }
            "time" => {
                if !self.is_admin(user).await {
                    return Ok(ADMIN_ONLY.to_string());
                }
                if param.is_empty() {
                    return Ok("Usage: /life time <HH:MM>".to_string());
                }
                match self.life.set_schedule_time(param).await {
                    Ok((hour, minute)) => {
                        if let Err(e) = self.timer.reschedule(hour, minute).await {
                            tracing::error!("Failed to reschedule daily timer: {e}");
                        }
                        Ok(format!("Daily schedule time updated to {hour:02}:{minute:02}."))
                    }
                    Err(e) => Ok(format!("Could not update schedule time: {e}")),
                }
            }
            _ => Ok(USAGE.to_string()),
        }
    }

    async fn is_admin(&self, user: &str) -> bool {
        self.config
            .read()
            .await
            .agent
            .admin_users
            .iter()
            .any(|u| u == user)
    }
}

pub fn format_state(state: &DailyState) -> String {
    format!(
        "📅 {} ({})\n👗 Outfit: {}\n📝 Today's plan:\n{}",
        state.date,
        holiday::weekday_name(state.date),
        state.outfit,
        state.schedule
    )
}
