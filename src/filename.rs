use crate::models::OutputMode;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;

const MAX_FILENAME_CHARS: usize = 200;
const FALLBACK_STEM: &str = "download";

static INVALID_CHARS: OnceLock<Regex> = OnceLock::new();
static RESERVED_NAMES: OnceLock<Regex> = OnceLock::new();

fn invalid_chars() -> &'static Regex {
    INVALID_CHARS.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F]"#).expect("invalid chars regex"))
}

fn reserved_names() -> &'static Regex {
    RESERVED_NAMES.get_or_init(|| {
        Regex::new(r"(?i)^(con|prn|aux|nul|com[0-9]|lpt[0-9])(\..*)?$").expect("reserved names regex")
    })
}

/// Strips characters no common filesystem accepts in a file name.
///
/// Windows is the strictest target, so its rules apply everywhere: no
/// `<>:"/\|?*` or control characters, no trailing dots or spaces, and no
/// device names such as `CON` or `COM1`.
pub fn clean_filename(raw: &str) -> String {
    let stripped = invalid_chars().replace_all(raw, "");
    let mut cleaned = stripped
        .trim()
        .trim_end_matches(|c| c == '.' || c == ' ')
        .to_string();

    if cleaned.chars().count() > MAX_FILENAME_CHARS {
        cleaned = truncate_keeping_extension(&cleaned, MAX_FILENAME_CHARS);
    }

    if reserved_names().is_match(&cleaned) {
        cleaned = format!("_{cleaned}");
    }
    cleaned
}

fn truncate_keeping_extension(name: &str, limit: usize) -> String {
    let path = Path::new(name);
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or(name);
    if ext.is_empty() || ext.chars().count() + 1 >= limit {
        return name.chars().take(limit).collect();
    }
    let keep = limit - ext.chars().count() - 1;
    let stem: String = stem.chars().take(keep).collect();
    format!("{stem}.{ext}")
}

/// Final output name for a job: the user's choice (or the source stem),
/// sanitized, with the mode's default extension when none was given.
///
/// A default stem always gets the extension, so titles such as
/// `Episode 1.5` are not mistaken for named files.
pub fn output_filename(requested: Option<&str>, default_stem: &str, mode: OutputMode) -> String {
    let requested = requested.map(str::trim).filter(|s| !s.is_empty());
    let from_user = requested.is_some();

    let mut name = clean_filename(requested.unwrap_or(default_stem));
    if name.is_empty() {
        name = FALLBACK_STEM.to_string();
    }

    let has_ext = Path::new(&name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| !e.is_empty());
    if !from_user || !has_ext {
        name = format!("{name}.{}", mode.default_extension());
    }
    name
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_filename_strips_invalid_characters() {
        assert_eq!(clean_filename("a<b>c:d\"e/f\\g|h?i*j.mp4"), "abcdefghij.mp4");
        assert_eq!(clean_filename("tab\there.mp3"), "tabhere.mp3");
    }

    #[test]
    fn clean_filename_trims_trailing_dots_and_spaces() {
        assert_eq!(clean_filename("  clip. . "), "clip");
    }

    #[test]
    fn clean_filename_escapes_device_names() {
        assert_eq!(clean_filename("CON"), "_CON");
        assert_eq!(clean_filename("com1.mp4"), "_com1.mp4");
        assert_eq!(clean_filename("console.mp4"), "console.mp4");
    }

    #[test]
    fn clean_filename_caps_length_but_keeps_extension() {
        let long = format!("{}.webm", "x".repeat(400));
        let cleaned = clean_filename(&long);
        assert_eq!(cleaned.chars().count(), MAX_FILENAME_CHARS);
        assert!(cleaned.ends_with(".webm"));
    }

    #[test]
    fn output_filename_adds_mode_extension_when_missing() {
        assert_eq!(output_filename(Some("song"), "ignored", OutputMode::Audio), "song.mp3");
        assert_eq!(output_filename(None, "My: Video?", OutputMode::Video), "My Video.mp4");
        assert_eq!(output_filename(Some("clip.mkv"), "x", OutputMode::MuteVideo), "clip.mkv");
    }

    #[test]
    fn default_stem_with_dots_still_gets_extension() {
        assert_eq!(output_filename(None, "Episode 1.5", OutputMode::Audio), "Episode 1.5.mp3");
        assert_eq!(output_filename(Some("  "), "v2.0", OutputMode::Video), "v2.0.mp4");
    }

    #[test]
    fn output_filename_falls_back_when_everything_is_stripped() {
        assert_eq!(output_filename(Some("???"), "", OutputMode::Video), "download.mp4");
    }
}
