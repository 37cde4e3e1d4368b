//! User-generated text screening: profanity filtering and URL stripping.

use lazy_static::lazy_static;
use parking_lot::RwLock;
use regex::Regex;

lazy_static! {
    static ref URL_REGEX: Regex = Regex::new(r"\bhttps?://\S+\b").unwrap();
    static ref BAD_WORDS: RwLock<Option<Regex>> = RwLock::new(None);
}

/// Compiles the profanity pattern from a word list. Typically called once at
/// startup with the contents of the configured word file.
pub fn load_bad_words<I, S>(words: I)
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let alternatives: Vec<_> = words
        .into_iter()
        .filter(|w| !w.as_ref().is_empty())
        .map(|w| regex::escape(w.as_ref()))
        .collect();

    if alternatives.is_empty() {
        return;
    }

    let pattern = format!("({})", alternatives.join("|"));

    match Regex::new(&pattern) {
        Ok(regex) => *BAD_WORDS.write() = Some(regex),
        Err(err) => log::warn!("Failed to compile profanity pattern: {err}"),
    }
}

/// Whether the input contains a listed word. Returns false when no word list
/// has been loaded.
pub fn contains_bad_word(input: &str) -> bool {
    BAD_WORDS
        .read()
        .as_ref()
        .map(|regex| regex.is_match(input))
        .unwrap_or(false)
}

/// Strips http(s) URLs from user text before it is persisted.
pub fn remove_urls(input: &str) -> String {
    URL_REGEX.replace_all(input, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_removal() {
        let input = "look at https://example.com/spam here";
        assert_eq!(remove_urls(input), "look at  here");
    }

    // The word list is process-global, so the matching cases share one test.
    #[test]
    fn test_bad_word_matching() {
        load_bad_words(["멍청이", "badword", "a.b"]);

        assert!(contains_bad_word("you badword"));
        assert!(contains_bad_word("이 멍청이야"));
        assert!(!contains_bad_word("a perfectly fine description"));

        assert!(contains_bad_word("a.b"));
        assert!(!contains_bad_word("axb"), "dot must not act as a wildcard");
    }
}
