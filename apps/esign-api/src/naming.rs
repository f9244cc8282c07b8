//! Names for files written to the drive

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref UNSAFE_RUN: Regex = Regex::new(r"[^A-Za-z0-9_.\-]+").unwrap();
}

/// Replace each run of characters outside `[A-Za-z0-9_.-]` with `_`
pub fn safe_name(raw: &str) -> String {
    let trimmed = raw.trim();
    let source = if trimmed.is_empty() { "user" } else { trimmed };
    UNSAFE_RUN.replace_all(source, "_").into_owned()
}

/// `dd-mm-yyyy` in the given time zone
pub fn date_stamp(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format("%d-%m-%Y").to_string()
}

/// File names for one signing: `(signed pdf, signature png)`
pub fn output_names(user_name: &str, now: DateTime<Utc>, tz: Tz) -> (String, String) {
    let base = format!("{}_{}", safe_name(user_name), date_stamp(now, tz));
    (
        format!("{}_signed.pdf", base),
        format!("{}_signature.png", base),
    )
}

/// Staged template name: `<millis>-<DOCTYPE>-<safe name>`
pub fn staged_template_name(now: DateTime<Utc>, doc_type: &str, template_name: &str) -> String {
    let name = if template_name.trim().is_empty() {
        "template"
    } else {
        template_name
    };
    format!("{}-{}-{}", now.timestamp_millis(), doc_type, safe_name(name))
}
