//! Splitting long inputs into bounded, slightly overlapping windows.
//!
//! Window sizes are measured in characters, not bytes. Every window is a
//! subslice of the input, so nothing is copied.

use crate::config::PipelineConfig;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunker {
    pub context_window: usize,
    pub max_windows: usize,
    pub window_overlap: f64,
}

impl Chunker {
    pub fn new(context_window: usize, max_windows: usize, window_overlap: f64) -> Self {
        Self {
            context_window,
            max_windows,
            window_overlap,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.chunk_context_window,
            config.chunk_max_windows,
            config.chunk_window_overlap,
        )
    }

    /// Split `text` into at most `max_windows` trimmed windows.
    ///
    /// Each window reads up to `context_window * (1 + window_overlap)`
    /// characters. When more text follows and the window holds a newline in
    /// its second half, the window is cut at that newline and the next window
    /// resumes right after it. Empty input yields no windows.
    pub fn windows<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let span = ((self.context_window as f64) * (1.0 + self.window_overlap)) as usize;
        let span = span.max(1);
        let min_cut = self.context_window / 2;

        let mut windows = Vec::new();
        let mut rest = text;
        while windows.len() < self.max_windows && !rest.is_empty() {
            let end = rest
                .char_indices()
                .nth(span)
                .map(|(i, _)| i)
                .unwrap_or(rest.len());
            let (mut snippet, mut tail) = rest.split_at(end);

            if !tail.is_empty()
                && let Some(nl) = snippet.rfind('\n')
                && snippet[..nl].chars().count() >= min_cut
            {
                tail = &rest[nl + 1..];
                snippet = &snippet[..nl];
            }

            windows.push(snippet.trim());
            rest = tail;
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_one_window() {
        let chunker = Chunker::new(100, 5, 0.0);
        assert_eq!(chunker.windows("  hello world \n"), vec!["hello world"]);
    }

    #[test]
    fn empty_text_has_no_windows() {
        let chunker = Chunker::new(100, 5, 0.0);
        assert!(chunker.windows("").is_empty());
    }

    #[test]
    fn hard_cut_without_newline() {
        let chunker = Chunker::new(4, 10, 0.0);
        assert_eq!(chunker.windows("abcdefghij"), vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn overlap_widens_the_window() {
        let chunker = Chunker::new(4, 10, 0.5);
        assert_eq!(chunker.windows("abcdefghij"), vec!["abcdef", "ghij"]);
    }

    #[test]
    fn cuts_at_late_newline_and_resumes_after_it() {
        let chunker = Chunker::new(8, 10, 0.0);
        // Newline at char 5 >= 8 / 2, more text follows.
        let windows = chunker.windows("abcde\nfghijklm");
        assert_eq!(windows, vec!["abcde", "fghijklm"]);
    }

    #[test]
    fn ignores_early_newline() {
        let chunker = Chunker::new(8, 10, 0.0);
        // Newline at char 1 < 8 / 2: hard cut instead.
        let windows = chunker.windows("a\nbcdefghijk");
        assert_eq!(windows, vec!["a\nbcdefg", "hijk"]);
    }

    #[test]
    fn bounded_by_max_windows() {
        let chunker = Chunker::new(2, 3, 0.0);
        let windows = chunker.windows("aabbccddeeff");
        assert_eq!(windows, vec!["aa", "bb", "cc"]);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunker = Chunker::new(3, 10, 0.0);
        assert_eq!(chunker.windows("äöüßéè"), vec!["äöü", "ßéè"]);
    }

    #[test]
    fn from_config_uses_chunk_fields() {
        let config = PipelineConfig::new("infer_esco", "rank_esco");
        let chunker = Chunker::from_config(&config);
        assert_eq!(chunker.context_window, 3000);
        assert_eq!(chunker.max_windows, 5);
        assert_eq!(chunker.window_overlap, 0.02);
    }
}
