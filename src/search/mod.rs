use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};

/// Fuzzy narrowing of dropdown choices while the user types
pub struct ChoiceFilter {
    matcher: SkimMatcherV2,
}

impl Default for ChoiceFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ChoiceFilter {
    pub fn new() -> Self {
        Self {
            matcher: SkimMatcherV2::default().ignore_case(),
        }
    }

    /// Indices of `items` matching `query`, best match first.
    /// Equal scores keep list order; an empty query keeps everything.
    pub fn filter<S: AsRef<str>>(&self, items: &[S], query: &str) -> Vec<usize> {
        let query = query.trim();
        if query.is_empty() {
            return (0..items.len()).collect();
        }

        let mut scored: Vec<(usize, i64)> = items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| {
                self.matcher
                    .fuzzy_match(item.as_ref(), query)
                    .map(|score| (i, score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().map(|(i, _)| i).collect()
    }
}
