use chrono::{NaiveTime, Timelike};

use crate::life::store::DailyState;

/// Coarse day-progress label. Bands are inclusive on the lower bound and
/// exclusive on the upper: [00:00, 09:00) / [09:00, 22:00) / [22:00, 24:00).
pub fn time_band(now: NaiveTime) -> &'static str {
    match now.hour() {
        h if h < 9 => "just started",
        h if h < 22 => "in progress",
        _ => "about to end",
    }
}

/// Render the injection block for the outbound model request. Pure
/// function of its inputs; the stored state is never touched.
pub fn render(state: Option<&DailyState>, now: NaiveTime) -> Option<String> {
    let state = state?;
    Some(format!(
        "[Inner state - colors tone and mood only, never announce it]\n\
         Day progress: the day has {band}\n\
         Outfit: {outfit}\n\
         Today's plan:\n{schedule}\n\n\
         [Conversation rules]\n\
         - Stay focused on the user's topic and needs\n\
         - Talk like a real person; do not narrate what you wear or where you are\n\
         - Only touch on the above briefly if the user explicitly asks\n\
         - Let it shade your mood and phrasing, nothing more",
        band = time_band(now),
        outfit = state.outfit,
        schedule = state.schedule,
    ))
}
