use unicode_normalization::UnicodeNormalization as _;
use unicode_normalization::char::is_combining_mark;

/// Folds text for label comparison: Unicode-decomposes, strips diacritics,
/// lowercases, trims and collapses inner whitespace.
///
/// `đ`/`Đ` carry no combining mark and are mapped to `d` explicitly.
pub fn normalize(text: &str) -> String {
    let folded: String = text
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .map(|c| match c {
            'đ' | 'Đ' => 'd',
            other => other,
        })
        .flat_map(char::to_lowercase)
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A set of accepted labels compared after [`normalize`].
///
/// A trailing colon on the candidate is ignored so `Tổng:` matches `tong`.
#[derive(Debug, Clone, Default)]
pub struct LabelSet {
    labels: Vec<String>,
}

impl LabelSet {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<String> = labels
            .into_iter()
            .map(|s| normalize(s.as_ref()))
            .filter(|s| !s.is_empty())
            .collect();
        labels.sort();
        labels.dedup();
        Self { labels }
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn matches(&self, text: &str) -> bool {
        if self.labels.is_empty() {
            return false;
        }
        let normalized = normalize(text);
        let candidate = normalized.trim_end_matches(':').trim_end();
        !candidate.is_empty() && self.labels.iter().any(|label| label == candidate)
    }
}
