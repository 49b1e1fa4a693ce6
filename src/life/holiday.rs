use chrono::{Datelike, NaiveDate};

const WEEKDAYS: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Fixed-date holidays used to flavor the generated day. Dates with no
/// entry simply yield nothing.
const HOLIDAYS: &[(u32, u32, &str)] = &[
    (1, 1, "New Year's Day"),
    (2, 14, "Valentine's Day"),
    (3, 8, "International Women's Day"),
    (4, 1, "April Fools' Day"),
    (5, 1, "Labour Day"),
    (6, 1, "Children's Day"),
    (10, 31, "Halloween"),
    (12, 24, "Christmas Eve"),
    (12, 25, "Christmas Day"),
    (12, 31, "New Year's Eve"),
];

pub fn weekday_name(date: NaiveDate) -> &'static str {
    WEEKDAYS[date.weekday().num_days_from_monday() as usize]
}

pub fn holiday_for(date: NaiveDate) -> Option<&'static str> {
    HOLIDAYS
        .iter()
        .find(|(month, day, _)| *month == date.month() && *day == date.day())
        .map(|(_, _, name)| *name)
}
