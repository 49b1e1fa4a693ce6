use rand::Rng;

use crate::config::PoolConfig;

/// One pick from each creative pool, drawn fresh per generation so
/// consecutive days do not read alike.
#[derive(Debug, Clone)]
pub struct PoolDraw {
    pub daily_theme: String,
    pub mood_color: String,
    pub outfit_style: String,
    pub schedule_type: String,
}

/// The RNG is passed in so callers can seed it deterministically.
pub fn draw(pool: &PoolConfig, rng: &mut impl Rng) -> PoolDraw {
    PoolDraw {
        daily_theme: pick(&pool.daily_themes, rng),
        mood_color: pick(&pool.mood_colors, rng),
        outfit_style: pick(&pool.outfit_styles, rng),
        schedule_type: pick(&pool.schedule_types, rng),
    }
}

fn pick(items: &[String], rng: &mut impl Rng) -> String {
    if items.is_empty() {
        return String::new();
    }
    items[rng.random_range(0..items.len())].clone()
}
