/// Output Parser / Verifier - Language-Agnostic Verdicts
///
/// **Core Responsibility:**
/// Split the sandbox's delimited combined output into per-test-case
/// segments, pull the trailing timing marker out, and count matches against
/// expected outputs.
///
/// **Critical Properties:**
/// - Knows nothing about Docker
/// - Knows nothing about persistence
/// - Pure function: (raw output, test cases) -> verdict
///
/// **Normalization Rules (Applied to Both Sides):**
/// - All line endings (\r\n, \r, \n) stripped
/// - Unicode NFC normalization
/// - Lowercased
/// This is a deliberately coarse, whitespace-and-case-insensitive policy.
///
/// **Known limitation:** a program that prints the delimiter token itself
/// desynchronizes the framing silently. Length-prefixed framing would fix
/// it; the flat delimiter is the contract the sandbox images emit today.
use gavel_common::types::TestCase;
use unicode_normalization::UnicodeNormalization;

/// Fixed separator the sandboxed runner emits between per-test-case outputs
/// and before the trailing timing marker.
pub const DELIMITER: &str = "---";

/// Parsed and verified output of one sandbox run.
#[derive(Debug, Clone)]
pub struct Verdict {
    /// Number of segments that matched their test case's expected output.
    pub passed_count: usize,
    /// Elapsed milliseconds reported by the runner, when the trailing
    /// marker parsed as a non-negative integer.
    pub exec_time_ms: Option<u64>,
    /// The raw blob with the timing marker stripped, for permanent
    /// submissions' `output` field. Untouched when no marker was found.
    pub raw_output: String,
    /// Raw per-test-case segments for temporary runs' display.
    pub display_segments: Vec<String>,
}

/// Comparison form: line endings removed, NFC-normalized, lowercased.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| *c != '\r' && *c != '\n')
        .nfc()
        .collect::<String>()
        .to_lowercase()
}

/// parseInt-style read of the timing marker: leading decimal digits after
/// trimming, anything after them ignored. A sign or non-digit start means
/// no timing is available.
fn parse_leading_ms(fragment: &str) -> Option<u64> {
    let trimmed = fragment.trim_start();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse().ok()
}

/// Parse the combined output and count passing test cases.
///
/// Segment `i` is compared against `test_cases[i]`; segments with no
/// corresponding test case, or whose case has no expected output (the
/// synthetic custom-input case), never count. Missing segments simply
/// never match, so the pass count caps itself below the case count.
pub fn evaluate(raw_output: &str, test_cases: &[TestCase]) -> Verdict {
    // Split once, on the raw text, then normalize each fragment on its own.
    // Normalizing the whole blob first would strip newlines sitting between
    // '-' runs and manufacture delimiters the raw text never had, leaving
    // the two fragment lists out of step.
    let raw_fragments: Vec<&str> = raw_output.split(DELIMITER).collect();
    let norm_fragments: Vec<String> = raw_fragments.iter().map(|f| normalize(f)).collect();

    // The last non-empty fragment is the timing marker, if it reads as a
    // non-negative integer. Otherwise nothing is excluded.
    let timing = norm_fragments
        .iter()
        .rposition(|f| !f.trim().is_empty())
        .and_then(|idx| parse_leading_ms(&norm_fragments[idx]).map(|ms| (idx, ms)));

    let (exec_time_ms, cutoff, raw_blob) = match timing {
        Some((idx, ms)) => {
            let blob = format!("{}{}", raw_fragments[..idx].join(DELIMITER), DELIMITER);
            (Some(ms), idx, blob)
        }
        None => (None, raw_fragments.len(), raw_output.to_string()),
    };

    // Drop empty/whitespace-only slots (a trailing delimiter produces one).
    let kept: Vec<(&str, &str)> = norm_fragments[..cutoff]
        .iter()
        .zip(&raw_fragments[..cutoff])
        .filter(|(norm, _)| !norm.trim().is_empty())
        .map(|(norm, raw)| (norm.as_str(), *raw))
        .collect();

    let passed_count = kept
        .iter()
        .enumerate()
        .filter(|(idx, (norm, _))| {
            test_cases
                .get(*idx)
                .and_then(|case| case.expected_output.as_deref())
                .map_or(false, |expected| normalize(expected) == **norm)
        })
        .count();

    Verdict {
        passed_count,
        exec_time_ms,
        raw_output: raw_blob,
        display_segments: kept.iter().map(|(_, raw)| raw.to_string()).collect(),
    }
}
