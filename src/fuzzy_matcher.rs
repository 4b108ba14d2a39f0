use strsim::normalized_damerau_levenshtein;

/// Fuzzy matcher for identifiers that nearly name a known column
pub struct FuzzyMatcher {
    /// Similarity threshold (0.0-1.0) for accepting a match
    pub similarity_threshold: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
        }
    }
}

impl FuzzyMatcher {
    pub fn new(threshold: f64) -> Self {
        Self {
            similarity_threshold: threshold,
        }
    }

    /// Similarity between two identifiers, 0.0-1.0 (higher = more similar).
    ///
    /// Normalized Damerau-Levenshtein: an adjacent transposition (`regoin`)
    /// costs one edit. Comparison is case-sensitive; case-only differences are
    /// resolved before fuzzy matching is attempted.
    pub fn similarity(&self, s1: &str, s2: &str) -> f64 {
        normalized_damerau_levenshtein(s1, s2)
    }

    pub fn is_match(&self, s1: &str, s2: &str) -> bool {
        self.similarity(s1, s2) >= self.similarity_threshold
    }

    /// Closest candidate at or above the threshold.
    /// Ties keep the earliest candidate.
    pub fn find_best_match<'a, I>(&self, target: &str, candidates: I) -> Option<(&'a str, f64)>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut best: Option<(&'a str, f64)> = None;

        for candidate in candidates {
            let score = self.similarity(target, candidate);
            if score < self.similarity_threshold {
                continue;
            }
            match best {
                Some((_, best_score)) if best_score >= score => {}
                _ => best = Some((candidate, score)),
            }
        }

        best
    }
}
