//! Best-effort parsing of comma-separated label completions.
//!
//! Completions are free text. Nothing here fails: malformed input yields
//! whatever tokens can be recovered, possibly none.

/// Switches for [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalizeOptions {
    pub lower: bool,
    pub strip_punct: bool,
    /// Drop a field prefix the model echoed back, e.g. `Skills: x` → ` x`.
    pub split_colon: bool,
}

impl NormalizeOptions {
    /// Settings for the infer stage: keep the model's text as-is.
    pub const RAW: Self = Self {
        lower: false,
        strip_punct: false,
        split_colon: false,
    };

    /// Settings for the rank stage: as [`RAW`](Self::RAW) but with prefix removal.
    pub const SPLIT_COLON: Self = Self {
        lower: false,
        strip_punct: false,
        split_colon: true,
    };
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            lower: true,
            strip_punct: true,
            split_colon: false,
        }
    }
}

/// Normalise a single label.
///
/// 1. With `split_colon`, a label containing `:` keeps only the text between
///    the first and second colon.
/// 2. Leading and trailing newlines are removed.
/// 3. With `strip_punct`, leading and trailing runs of characters that are
///    neither word characters nor whitespace are removed.
/// 4. With `lower`, the label is lower-cased.
/// 5. Surrounding whitespace is trimmed.
pub fn normalize(label: &str, opts: NormalizeOptions) -> String {
    let mut label = label;
    if opts.split_colon && label.contains(':') {
        label = label.split(':').nth(1).unwrap_or_default();
    }

    label = label.trim_matches('\n');
    if opts.strip_punct {
        label = label.trim_matches(is_punct);
    }
    label = label.trim_matches('\n');

    if opts.lower {
        label.trim().to_lowercase()
    } else {
        label.trim().to_string()
    }
}

// Neither `\w` nor `\s` in the Unicode sense.
fn is_punct(c: char) -> bool {
    !(c.is_alphanumeric() || c == '_' || c.is_whitespace())
}

/// Split one comma-separated string into normalised labels.
///
/// Colon splitting is never applied at this level: it only makes sense on a
/// whole completion.
pub fn split_labels(labels: &str, opts: NormalizeOptions) -> Vec<String> {
    let opts = NormalizeOptions {
        split_colon: false,
        ..opts
    };
    labels
        .split(',')
        .map(|piece| normalize(piece, opts))
        .filter(|label| !label.is_empty())
        .collect()
}

/// Parse every sampled completion into one flat label list, in order.
///
/// Each completion is normalised as a whole first (this is where an echoed
/// field prefix is dropped), then all completions are joined and split on
/// commas. Empty labels are discarded; duplicates are kept.
pub fn extract_labels<S: AsRef<str>>(completions: &[S], opts: NormalizeOptions) -> Vec<String> {
    let joined = completions
        .iter()
        .map(|c| normalize(c.as_ref(), opts))
        .collect::<Vec<_>>()
        .join(", ");
    split_labels(&joined, opts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_lower_and_strip() {
        let opts = NormalizeOptions::default();
        assert_eq!(normalize("  Project Management.", opts), "project management");
        // Trailing whitespace shields trailing punctuation from the strip.
        assert_eq!(normalize("Teamwork. ", opts), "teamwork.");
        assert_eq!(normalize("\n**Python**\n", opts), "python");
        assert_eq!(normalize("C++", opts), "c");
    }

    #[test]
    fn raw_options_only_trim() {
        let opts = NormalizeOptions::RAW;
        assert_eq!(normalize("  Use Excel.\n", opts), "Use Excel.");
        assert_eq!(normalize("Skills: a", opts), "Skills: a");
    }

    #[test]
    fn split_colon_keeps_second_segment() {
        let opts = NormalizeOptions::SPLIT_COLON;
        assert_eq!(normalize("Skills: teamwork", opts), "teamwork");
        assert_eq!(normalize("a: b: c", opts), "b");
        assert_eq!(normalize("no colon here", opts), "no colon here");
        assert_eq!(normalize("trailing:", opts), "");
    }

    #[test]
    fn punctuation_strip_keeps_inner_punctuation() {
        let opts = NormalizeOptions::default();
        assert_eq!(normalize("...e-commerce!!", opts), "e-commerce");
        assert_eq!(normalize("(über-qualität)", opts), "über-qualität");
        assert_eq!(normalize("_private_", opts), "_private_");
    }

    #[test]
    fn extract_splits_and_drops_empties() {
        let completions = vec!["python, sql,, docker ,".to_string()];
        assert_eq!(
            extract_labels(&completions, NormalizeOptions::RAW),
            vec!["python", "sql", "docker"]
        );
    }

    #[test]
    fn extract_unions_multiple_samples_in_order() {
        let completions = vec!["a, b".to_string(), "b, c".to_string()];
        assert_eq!(
            extract_labels(&completions, NormalizeOptions::RAW),
            vec!["a", "b", "b", "c"]
        );
    }

    #[test]
    fn extract_drops_echoed_prefix_once_per_completion() {
        let completions = vec!["Skills: teamwork, communication".to_string()];
        assert_eq!(
            extract_labels(&completions, NormalizeOptions::SPLIT_COLON),
            vec!["teamwork", "communication"]
        );
    }

    #[test]
    fn empty_completion_yields_nothing() {
        let none: Vec<String> = vec![];
        assert!(extract_labels(&none, NormalizeOptions::RAW).is_empty());
        assert!(extract_labels(&["".to_string()], NormalizeOptions::RAW).is_empty());
        assert!(extract_labels(&[" , ,\n".to_string()], NormalizeOptions::RAW).is_empty());
    }
}
