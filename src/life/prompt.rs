use chrono::NaiveDate;

use crate::config::LifeConfig;
use crate::life::holiday;
use crate::life::pool::PoolDraw;
use crate::life::store::DailyState;
use crate::session::ChatEntry;

const OUTFIT_EXCERPT_CHARS: usize = 40;
const SCHEDULE_EXCERPT_CHARS: usize = 60;

/// Fill `{name}` placeholders from an explicit name -> value map in a
/// single left-to-right pass. Unrecognized placeholders (including JSON
/// braces in the template) pass through untouched, so partial or custom
/// templates keep working.
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let after = &rest[start..];
        match after.find('}') {
            Some(end) => {
                let name = &after[1..end];
                if let Some((_, value)) = vars.iter().find(|(k, _)| *k == name) {
                    out.push_str(value);
                } else {
                    out.push_str(&after[..=end]);
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(after);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Prior days rendered oldest first. Excerpts are clipped so old days
/// cannot dominate the prompt.
pub fn history_block(history: &[DailyState]) -> String {
    if history.is_empty() {
        return "(no prior records)".to_string();
    }
    history
        .iter()
        .map(|s| {
            format!(
                "[{}] outfit: {} | schedule: {}",
                s.date,
                excerpt(&s.outfit, OUTFIT_EXCERPT_CHARS),
                excerpt(&s.schedule, SCHEDULE_EXCERPT_CHARS),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Recent messages per source, in configured source order, chronological
/// within each source.
pub fn chats_block(chats: &[(String, Vec<ChatEntry>)]) -> String {
    let mut blocks = Vec::new();
    for (source, entries) in chats {
        let mut lines = Vec::new();
        for entry in entries {
            match entry.role.as_str() {
                "user" => lines.push(format!("User: {}", entry.text)),
                "assistant" => lines.push(format!("Me: {}", entry.text)),
                _ => {}
            }
        }
        if !lines.is_empty() {
            blocks.push(format!("--- {source} ---\n{}", lines.join("\n")));
        }
    }
    if blocks.is_empty() {
        "(no recent conversations)".to_string()
    } else {
        blocks.join("\n")
    }
}

pub fn build(
    life: &LifeConfig,
    persona: &str,
    date: NaiveDate,
    draw: &PoolDraw,
    history: &[DailyState],
    chats: &[(String, Vec<ChatEntry>)],
    supplement: Option<&str>,
) -> String {
    let date_str = date.format("%Y-%m-%d").to_string();
    let holiday = holiday::holiday_for(date)
        .map(|h| format!("Today is {h}."))
        .unwrap_or_default();
    let history = history_block(history);
    let recent = chats_block(chats);

    let vars = [
        ("date", date_str.as_str()),
        ("weekday", holiday::weekday_name(date)),
        ("holiday", holiday.as_str()),
        ("persona", persona),
        ("outfit_desc", life.outfit_desc.as_str()),
        ("daily_theme", draw.daily_theme.as_str()),
        ("mood_color", draw.mood_color.as_str()),
        ("outfit_style", draw.outfit_style.as_str()),
        ("schedule_type", draw.schedule_type.as_str()),
        ("history", history.as_str()),
        ("recent_chats", recent.as_str()),
    ];

    let mut prompt = render_template(&life.prompt_template, &vars);
    if let Some(extra) = supplement {
        prompt.push_str("\n\nAdditional request (honor it in today's outfit and schedule):\n");
        prompt.push_str(extra);
    }
    prompt
}

fn excerpt(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        text.chars().take(max_chars).collect()
    }
}
