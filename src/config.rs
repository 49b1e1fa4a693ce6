use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid schedule time {0:?}, expected HH:MM")]
    ScheduleTime(String),
    #[error("reference_history_days must be between 1 and 7, got {0}")]
    HistoryDays(u32),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub llm: LlmConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub life: LifeConfig,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_persona")]
    pub persona: String,
    /// User ids allowed to run the admin life commands in chat.
    #[serde(default)]
    pub admin_users: Vec<String>,
}

fn default_persona() -> String {
    "A warm, observant AI companion who enjoys small everyday rituals.".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: String,
    /// Base URL for the API. Optional - each provider has a sensible default.
    pub base_url: Option<String>,
    pub model: String,
    pub api_key: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    8192
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_bind")]
    pub bind: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            api_key: None,
        }
    }
}

fn default_api_bind() -> String {
    "127.0.0.1:3000".to_string()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
        }
    }
}

fn default_base_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".higoto")
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LifeConfig {
    /// Local time of day (HH:MM) at which the daily state is regenerated.
    #[serde(default = "default_schedule_time")]
    pub schedule_time: String,
    /// How many previous days are shown to the model, 1 to 7.
    #[serde(default = "default_history_days")]
    pub reference_history_days: u32,
    #[serde(default = "default_generation_timeout")]
    pub generation_timeout_secs: u64,
    #[serde(default = "default_outfit_desc")]
    pub outfit_desc: String,
    #[serde(default = "default_prompt_template")]
    pub prompt_template: String,
    /// Conversation sources whose recent messages feed the generation prompt.
    #[serde(default)]
    pub reference_chats: Vec<ChatRef>,
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for LifeConfig {
    fn default() -> Self {
        Self {
            schedule_time: default_schedule_time(),
            reference_history_days: default_history_days(),
            generation_timeout_secs: default_generation_timeout(),
            outfit_desc: default_outfit_desc(),
            prompt_template: default_prompt_template(),
            reference_chats: Vec::new(),
            pool: PoolConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRef {
    pub source: String,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_daily_themes")]
    pub daily_themes: Vec<String>,
    #[serde(default = "default_mood_colors")]
    pub mood_colors: Vec<String>,
    #[serde(default = "default_outfit_styles")]
    pub outfit_styles: Vec<String>,
    #[serde(default = "default_schedule_types")]
    pub schedule_types: Vec<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            daily_themes: default_daily_themes(),
            mood_colors: default_mood_colors(),
            outfit_styles: default_outfit_styles(),
            schedule_types: default_schedule_types(),
        }
    }
}

fn default_schedule_time() -> String {
    "07:30".to_string()
}

fn default_history_days() -> u32 {
    3
}

fn default_generation_timeout() -> u64 {
    60
}

fn default_outfit_desc() -> String {
    "Everyday wardrobe: comfortable, a little playful, weather-appropriate.".to_string()
}

fn default_prompt_template() -> String {
    r#"You are maintaining the daily life of an AI companion persona.

Today is {date} ({weekday}). {holiday}

Persona:
{persona}

Wardrobe guidance: {outfit_desc}

Creative direction for today: theme "{daily_theme}", mood color "{mood_color}",
outfit leaning "{outfit_style}", schedule shape "{schedule_type}".

Previous days:
{history}

Recent conversations:
{recent_chats}

Write today's outfit and day plan for the persona. Keep both grounded in the
persona and consistent with previous days without repeating them.
Reply with a single JSON object of the form {"outfit": "...", "schedule": "..."}"#
        .to_string()
}

fn default_daily_themes() -> Vec<String> {
    [
        "a cozy slow day",
        "an errand-running day",
        "a creative day",
        "a social day",
        "a quiet focus day",
        "an outdoorsy day",
    ]
    .map(String::from)
    .to_vec()
}

fn default_mood_colors() -> Vec<String> {
    [
        "warm amber",
        "soft sage",
        "dusty blue",
        "pale lavender",
        "sunlit cream",
        "deep teal",
    ]
    .map(String::from)
    .to_vec()
}

fn default_outfit_styles() -> Vec<String> {
    [
        "casual knitwear",
        "smart casual",
        "sporty",
        "vintage flair",
        "minimalist",
        "layered comfy",
    ]
    .map(String::from)
    .to_vec()
}

fn default_schedule_types() -> Vec<String> {
    [
        "loose and unhurried",
        "tightly planned",
        "split between morning and evening",
        "built around one highlight",
        "routine with a twist",
    ]
    .map(String::from)
    .to_vec()
}

/// Parse "HH:MM" into (hour, minute). Rejects anything out of range.
pub fn parse_schedule_time(value: &str) -> Result<(u32, u32), ConfigError> {
    let err = || ConfigError::ScheduleTime(value.to_string());
    let (h, m) = value.split_once(':').ok_or_else(err)?;
    if h.len() != 2 || m.len() != 2 {
        return Err(err());
    }
    let hour: u32 = h.parse().map_err(|_| err())?;
    let minute: u32 = m.parse().map_err(|_| err())?;
    if hour > 23 || minute > 59 {
        return Err(err());
    }
    Ok((hour, minute))
}

pub fn validate(config: &Config) -> Result<(), ConfigError> {
    parse_schedule_time(&config.life.schedule_time)?;
    let days = config.life.reference_history_days;
    if !(1..=7).contains(&days) {
        return Err(ConfigError::HistoryDays(days));
    }
    Ok(())
}

pub fn load(path: &str) -> Result<Config> {
    let path = expand_tilde(path);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config: {}", path.display()))?;
    let config: Config =
        toml::from_str(&content).with_context(|| "Failed to parse config.toml")?;
    validate(&config)?;
    Ok(config)
}

/// Write the config back to disk (used when schedule_time changes at runtime).
pub fn save(config: &Config, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config).context("Failed to serialize config")?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)
        .with_context(|| format!("Failed to write config: {}", tmp.display()))?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

pub fn resolve_path(path: &str) -> PathBuf {
    expand_tilde(path)
}

pub async fn init_config_dir() -> Result<()> {
    let base = default_base_dir();
    tokio::fs::create_dir_all(base.join("sessions")).await?;

    let config_path = base.join("config.toml");
    if !config_path.exists() {
        tokio::fs::write(
            &config_path,
            r#"[agent]
name = "higoto"
persona = "A warm, observant AI companion who enjoys small everyday rituals."
# User ids allowed to run admin life commands in chat:
# admin_users = ["masaki"]

[llm]
provider = "openai"
# base_url = "https://api.openai.com/v1"  # optional, uses provider default
model = "gpt-4o"
api_key = "YOUR_API_KEY"
max_tokens = 8192

# Other provider examples:
# provider = "openrouter"
# model = "anthropic/claude-sonnet-4"
#
# provider = "deepseek"
# model = "deepseek-chat"

[api]
bind = "127.0.0.1:3000"
# api_key = "CHANGE_ME"  # required for non-localhost binds

[life]
schedule_time = "07:30"
reference_history_days = 3
generation_timeout_secs = 60
# Conversation sources whose recent messages flavor the daily state:
# reference_chats = [{ source = "cli:default", count = 10 }]
"#,
        )
        .await?;
    }

    Ok(())
}

fn expand_tilde(path: &str) -> PathBuf {
    if path.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(&path[2..]);
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [agent]
        name = "higoto"

        [llm]
        provider = "openai"
        model = "gpt-4o"
        api_key = "k"
    "#;

    #[test]
    fn test_parse_schedule_time_valid() {
        assert_eq!(parse_schedule_time("07:30"), Ok((7, 30)));
        assert_eq!(parse_schedule_time("00:00"), Ok((0, 0)));
        assert_eq!(parse_schedule_time("23:59"), Ok((23, 59)));
    }

    #[test]
    fn test_parse_schedule_time_invalid() {
        for bad in ["", "7:30", "07:5", "24:00", "12:60", "ab:cd", "07-30", "07:30:00"] {
            assert!(parse_schedule_time(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn test_minimal_config_gets_defaults() {
        let cfg: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(cfg.life.schedule_time, "07:30");
        assert_eq!(cfg.life.reference_history_days, 3);
        assert!(cfg.life.reference_chats.is_empty());
        assert!(!cfg.life.pool.daily_themes.is_empty());
        assert!(cfg.life.prompt_template.contains("{history}"));
        assert!(validate(&cfg).is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_history_days() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.life.reference_history_days = 0;
        assert_eq!(validate(&cfg), Err(ConfigError::HistoryDays(0)));
        cfg.life.reference_history_days = 8;
        assert_eq!(validate(&cfg), Err(ConfigError::HistoryDays(8)));
    }

    #[test]
    fn test_validate_rejects_bad_schedule_time() {
        let mut cfg: Config = toml::from_str(MINIMAL).unwrap();
        cfg.life.schedule_time = "25:00".to_string();
        assert!(matches!(validate(&cfg), Err(ConfigError::ScheduleTime(_))));
    }
}
