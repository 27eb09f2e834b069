//! Deterministic sub-metrics.
//!
//! Each function takes a validated [`StoryPack`] and returns a value in
//! `[0, 1]`. None of them can fail.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::config::ItemRange;
use crate::domain::{Epic, Story, StoryPack};
use crate::similarity::{text_similarity, tokenize};

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "from", "into", "are", "was", "were", "will",
    "shall", "should", "must", "can", "could", "would", "have", "has", "had", "not", "but", "all",
    "any", "our", "their", "they", "them", "you", "your", "its", "out", "via", "per", "each",
    "when", "then", "than", "also", "able", "use", "using", "who", "what", "which", "where",
];

/// Distinct non-stopword tokens of the epic's requirement text.
pub fn epic_keywords(epic: &Epic) -> HashSet<String> {
    tokenize(&epic.requirement_text())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Fraction of epic keywords that appear anywhere in the pack.
///
/// An epic with no keywords is trivially covered (1.0).
pub fn keyword_coverage(epic: &Epic, pack: &StoryPack) -> f64 {
    let keywords = epic_keywords(epic);
    if keywords.is_empty() {
        return 1.0;
    }
    let pack_tokens: HashSet<String> = tokenize(&pack.text()).collect();
    let hits = keywords.iter().filter(|k| pack_tokens.contains(*k)).count();
    hits as f64 / keywords.len() as f64
}

fn present(field: &Option<String>) -> bool {
    field.as_deref().is_some_and(|s| !s.trim().is_empty())
}

fn mentions(story: &Story, phrase: &str) -> bool {
    story.description.to_lowercase().contains(phrase)
}

/// INVEST-style structural heuristic for one story: role, goal, benefit,
/// at least one criterion, and a title of 2–12 words.
pub fn invest_story(story: &Story) -> f64 {
    let words = story.title.split_whitespace().count();
    let checks = [
        present(&story.as_a) || mentions(story, "as a"),
        present(&story.i_want) || mentions(story, "i want"),
        present(&story.so_that) || mentions(story, "so that"),
        story.acceptance_criteria.iter().any(|c| !c.trim().is_empty()),
        (2..=12).contains(&words),
    ];
    checks.iter().filter(|ok| **ok).count() as f64 / checks.len() as f64
}

/// Mean [`invest_story`] over the pack; 0 for an empty pack.
pub fn invest_heuristic(pack: &StoryPack) -> f64 {
    if pack.stories.is_empty() {
        return 0.0;
    }
    pack.stories.iter().map(invest_story).sum::<f64>() / pack.stories.len() as f64
}

fn gwt_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)\bgiven\b.*\bwhen\b.*\bthen\b").expect("invalid Given/When/Then regex")
    })
}

/// Fraction of acceptance criteria written in Given/When/Then form.
pub fn gwt_heuristic(pack: &StoryPack) -> f64 {
    let criteria: Vec<&String> = pack
        .stories
        .iter()
        .flat_map(|s| s.acceptance_criteria.iter())
        .filter(|c| !c.trim().is_empty())
        .collect();
    if criteria.is_empty() {
        return 0.0;
    }
    let re = gwt_regex();
    criteria.iter().filter(|c| re.is_match(c)).count() as f64 / criteria.len() as f64
}

/// `1 − duplicates / n`, where a story is a duplicate when its text is at
/// least `threshold` similar to any earlier story.
pub fn duplication(pack: &StoryPack, threshold: f64) -> f64 {
    let n = pack.stories.len();
    if n <= 1 {
        return 1.0;
    }
    let texts: Vec<String> = pack.stories.iter().map(Story::text).collect();
    let dups = (1..n)
        .filter(|&i| {
            texts[..i]
                .iter()
                .any(|earlier| text_similarity(earlier, &texts[i]) >= threshold)
        })
        .count();
    1.0 - dups as f64 / n as f64
}

/// 1 inside the target range, linear falloff on either side, 0 when empty.
pub fn item_count(n: usize, range: ItemRange) -> f64 {
    if n == 0 {
        0.0
    } else if n < range.min {
        n as f64 / range.min as f64
    } else if n <= range.max {
        1.0
    } else {
        let over = (n - range.max) as f64;
        (1.0 - over / range.max as f64).max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Story;

    fn pack(stories: Vec<Story>) -> StoryPack {
        StoryPack {
            epic_id: "E1".to_string(),
            stories,
        }
    }

    fn full_story(title: &str) -> Story {
        Story::new(title, "")
            .with_narrative("shopper", "to pay", "I get my goods")
            .with_criterion("Given a cart When I pay Then I see a receipt")
    }

    #[test]
    fn keyword_coverage_counts_distinct_hits() {
        let epic = Epic::new("E1", "Checkout", "Card payment");
        let p = pack(vec![Story::new("Card checkout", "")]);
        // keywords: checkout, card, payment
        let c = keyword_coverage(&epic, &p);
        assert!((c - 2.0 / 3.0).abs() < 1e-9, "got {c}");
    }

    #[test]
    fn keyword_coverage_with_no_keywords_is_one() {
        let epic = Epic::new("E1", "", "to do it");
        assert_eq!(keyword_coverage(&epic, &pack(vec![])), 1.0);
    }

    #[test]
    fn invest_full_story_scores_one() {
        assert_eq!(invest_story(&full_story("Pay by card")), 1.0);
    }

    #[test]
    fn invest_bare_story_scores_low() {
        let s = Story::new("Pay", "");
        assert_eq!(invest_story(&s), 0.0);
    }

    #[test]
    fn invest_reads_narrative_from_description() {
        let s = Story::new(
            "Pay by card",
            "As a shopper I want to pay by card so that checkout is fast",
        )
        .with_criterion("receipt is shown");
        assert_eq!(invest_story(&s), 1.0);
    }

    #[test]
    fn gwt_fraction() {
        let p = pack(vec![Story::new("A b", "")
            .with_criterion("Given x When y Then z")
            .with_criterion("it works")]);
        assert_eq!(gwt_heuristic(&p), 0.5);
        assert_eq!(gwt_heuristic(&pack(vec![Story::new("A", "")])), 0.0);
    }

    #[test]
    fn duplication_penalizes_repeats() {
        let p = pack(vec![
            full_story("Pay by card"),
            full_story("Pay by card"),
            Story::new("Export invoices monthly", "accounting ledger download"),
        ]);
        let d = duplication(&p, 0.85);
        assert!((d - 2.0 / 3.0).abs() < 1e-9, "got {d}");
        assert_eq!(duplication(&pack(vec![full_story("Solo story")]), 0.85), 1.0);
    }

    #[test]
    fn item_count_shape() {
        let range = ItemRange { min: 4, max: 8 };
        assert_eq!(item_count(0, range), 0.0);
        assert_eq!(item_count(2, range), 0.5);
        assert_eq!(item_count(4, range), 1.0);
        assert_eq!(item_count(8, range), 1.0);
        assert_eq!(item_count(12, range), 0.5);
        assert_eq!(item_count(40, range), 0.0);
    }
}
