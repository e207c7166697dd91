//! Pull files, commands and outputs out of a free-text execution report.

use std::sync::LazyLock;

use regex::Regex;

use atlas_core::Evidence;

const MAX_FILES: usize = 8;
const MAX_COMMANDS: usize = 8;
const MAX_OUTPUTS: usize = 5;
const MAX_OUTPUT_CHARS: usize = 500;
const MAX_SUMMARY_CHARS: usize = 300;

static FILE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[\s`'(])((?:[A-Za-z0-9_.-]+/)*[A-Za-z0-9_-][A-Za-z0-9_.-]*\.[A-Za-z][A-Za-z0-9]{0,7})\b")
        .expect("valid file regex")
});

static INLINE_CMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`\n]{2,120})`").expect("valid inline command regex"));

static PROMPT_CMD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*[>$] (.{2,160})$").expect("valid prompt regex"));

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\n(.*?)```").expect("valid fence regex"));

static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(files?|commands?|results?|outputs?|status)\s*:\s*(.+)$")
        .expect("valid label regex")
});

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)(?:summary|резюме)\s*[:\-]?\s*(.{1,400}?)(?:\n\n|steps:|кроки:|\z)")
        .expect("valid summary regex")
});

/// Extract structured evidence from an executor report.
///
/// The score weighs each kind of evidence found: files, commands and
/// outputs 0.3 each, a summary 0.1.
pub fn extract_evidence(text: &str) -> Evidence {
    let mut evidence = Evidence::default();
    if text.trim().is_empty() {
        return evidence;
    }

    let mut prose = FENCE_RE.replace_all(text, "").into_owned();

    for caps in FENCE_RE.captures_iter(text) {
        let body = caps[1].trim();
        if !body.is_empty() {
            push_capped(&mut evidence.outputs, truncate(body, MAX_OUTPUT_CHARS), MAX_OUTPUTS);
        }
    }

    for caps in LABEL_RE.captures_iter(&prose) {
        let label = caps[1].to_lowercase();
        let value = caps[2].trim();
        if label.starts_with("file") {
            for item in split_list(value) {
                push_capped(&mut evidence.files, item, MAX_FILES);
            }
        } else if label.starts_with("command") {
            for item in split_list(value) {
                push_capped(&mut evidence.commands, item, MAX_COMMANDS);
            }
        } else {
            push_capped(&mut evidence.outputs, truncate(value, MAX_OUTPUT_CHARS), MAX_OUTPUTS);
        }
    }
    prose = LABEL_RE.replace_all(&prose, "").into_owned();

    for caps in PROMPT_CMD_RE.captures_iter(&prose) {
        push_capped(&mut evidence.commands, caps[1].trim().to_string(), MAX_COMMANDS);
    }
    for caps in INLINE_CMD_RE.captures_iter(&prose) {
        let snippet = caps[1].trim();
        // A lone filename in backticks is a file, not a command.
        if snippet.contains(' ') {
            push_capped(&mut evidence.commands, snippet.to_string(), MAX_COMMANDS);
        }
    }

    for caps in FILE_RE.captures_iter(&prose) {
        let candidate = &caps[1];
        if looks_like_path(candidate) {
            push_capped(&mut evidence.files, candidate.to_string(), MAX_FILES);
        }
    }

    evidence.summary = match SUMMARY_RE.captures(text) {
        Some(caps) => truncate(caps[1].trim(), MAX_SUMMARY_CHARS),
        None => {
            let head: Vec<&str> = text
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with("```"))
                .take(3)
                .collect();
            truncate(&head.join(" "), MAX_SUMMARY_CHARS)
        }
    };

    evidence.score = score(&evidence);
    evidence
}

fn score(evidence: &Evidence) -> f64 {
    let mut score = 0.0;
    if !evidence.files.is_empty() {
        score += 0.3;
    }
    if !evidence.commands.is_empty() {
        score += 0.3;
    }
    if !evidence.outputs.is_empty() {
        score += 0.3;
    }
    if !evidence.summary.is_empty() {
        score += 0.1;
    }
    f64::min(score, 1.0)
}

fn push_capped(list: &mut Vec<String>, item: String, cap: usize) {
    if list.len() < cap && !item.is_empty() && !list.contains(&item) {
        list.push(item);
    }
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split([',', ';'])
        .map(|s| s.trim().trim_matches('`').to_string())
        .filter(|s| !s.is_empty())
}

/// Rejects version numbers and abbreviations like `e.g`.
fn looks_like_path(candidate: &str) -> bool {
    let ext = candidate.rsplit('.').next().unwrap_or_default();
    ext.len() >= 2 && !candidate.chars().all(|c| c.is_ascii_digit() || c == '.')
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
