use std::cmp::Ordering;
use std::str::FromStr;

use core_types::Note;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Category selection value that disables category filtering.
pub const ALL_CATEGORIES: &str = "all";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CategoryFilter {
    #[default]
    All,
    Only(String),
}

impl CategoryFilter {
    pub fn from_selection(selection: &str) -> Self {
        if selection == ALL_CATEGORIES {
            Self::All
        } else {
            Self::Only(selection.to_string())
        }
    }

    pub fn matches(&self, note: &Note) -> bool {
        match self {
            Self::All => true,
            Self::Only(category) => note.category == *category,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    /// Most recent `timestamp` first.
    #[default]
    Newest,
    /// Ascending by title with locale-aware collation.
    Title,
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "date" | "newest" | "timestamp" => Ok(Self::Newest),
            "title" => Ok(Self::Title),
            other => Err(format!("unknown sort order `{other}`; expected date|title")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteQuery {
    pub category: CategoryFilter,
    pub search: String,
    pub sort: SortOrder,
}

impl NoteQuery {
    pub fn with_category(mut self, category: CategoryFilter) -> Self {
        self.category = category;
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = search.into();
        self
    }

    pub fn with_sort(mut self, sort: SortOrder) -> Self {
        self.sort = sort;
        self
    }
}

pub fn filter_by_category<'a>(notes: &'a [Note], filter: &CategoryFilter) -> Vec<&'a Note> {
    notes.iter().filter(|note| filter.matches(note)).collect()
}

/// Keeps notes whose title or content contains `query`, ignoring case.
/// A blank query keeps everything; otherwise the query is matched as typed,
/// surrounding whitespace included.
pub fn search_notes<'a>(notes: Vec<&'a Note>, query: &str) -> Vec<&'a Note> {
    if query.trim().is_empty() {
        return notes;
    }
    let needle = query.to_lowercase();

    notes
        .into_iter()
        .filter(|note| {
            note.title.to_lowercase().contains(&needle)
                || note.content.to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn sort_notes(notes: &mut [&Note], order: SortOrder) {
    match order {
        SortOrder::Newest => notes.sort_unstable_by(|a, b| b.timestamp.cmp(&a.timestamp)),
        SortOrder::Title => notes.sort_unstable_by(|a, b| collate(&a.title, &b.title)),
    }
}

/// Category filter, then search, then sort.
pub fn derive_view<'a>(notes: &'a [Note], query: &NoteQuery) -> Vec<&'a Note> {
    let filtered = filter_by_category(notes, &query.category);
    let mut matched = search_notes(filtered, &query.search);
    sort_notes(&mut matched, query.sort);
    matched
}

/// Compares strings the way a default-locale collator does for Latin text:
/// base letters first, then accents, then case with lowercase first.
/// Punctuation and symbols sort before digits, digits before letters.
pub fn collate(a: &str, b: &str) -> Ordering {
    let left = collation_elements(a);
    let right = collation_elements(b);

    left.iter()
        .map(|e| e.primary())
        .cmp(right.iter().map(|e| e.primary()))
        .then_with(|| left.iter().map(|e| e.accent).cmp(right.iter().map(|e| e.accent)))
        .then_with(|| left.iter().map(|e| e.upper).cmp(right.iter().map(|e| e.upper)))
        .then_with(|| a.cmp(b))
}

#[derive(Debug, Clone, Copy)]
struct CollationElement {
    base: char,
    accent: u8,
    upper: bool,
}

impl CollationElement {
    fn primary(&self) -> (u8, char) {
        let class = if self.base.is_alphabetic() {
            2
        } else if self.base.is_numeric() {
            1
        } else {
            0
        };
        (class, self.base)
    }
}

fn collation_elements(text: &str) -> Vec<CollationElement> {
    let mut elements = Vec::with_capacity(text.len());
    for c in text.chars() {
        let upper = c.is_uppercase();
        let lower = c.to_lowercase().next().unwrap_or(c);
        let (base, expansion, accent) = match lower {
            'æ' => ('a', Some('e'), 8),
            'œ' => ('o', Some('e'), 8),
            'ß' => ('s', Some('s'), 8),
            'ø' => ('o', None, 9),
            other => {
                let (base, accent) = fold_accent(other);
                (base, None, accent)
            }
        };
        elements.push(CollationElement {
            base,
            accent,
            upper,
        });
        if let Some(base) = expansion {
            elements.push(CollationElement {
                base,
                accent: 0,
                upper,
            });
        }
    }
    elements
}

fn fold_accent(c: char) -> (char, u8) {
    match c {
        'á' | 'é' | 'í' | 'ó' | 'ú' | 'ý' => (strip(c), 1),
        'à' | 'è' | 'ì' | 'ò' | 'ù' => (strip(c), 2),
        'â' | 'ê' | 'î' | 'ô' | 'û' => (strip(c), 3),
        'ä' | 'ë' | 'ï' | 'ö' | 'ü' | 'ÿ' => (strip(c), 4),
        'ã' | 'õ' | 'ñ' => (strip(c), 5),
        'å' => ('a', 6),
        'ç' => ('c', 7),
        _ => (c, 0),
    }
}

fn strip(c: char) -> char {
    match c {
        'á' | 'à' | 'â' | 'ä' | 'ã' => 'a',
        'é' | 'è' | 'ê' | 'ë' => 'e',
        'í' | 'ì' | 'î' | 'ï' => 'i',
        'ó' | 'ò' | 'ô' | 'ö' | 'õ' => 'o',
        'ú' | 'ù' | 'û' | 'ü' => 'u',
        'ý' | 'ÿ' => 'y',
        'ñ' => 'n',
        other => other,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NoteStatistics {
    pub total: usize,
    /// Only categories present in the data, in first-seen order.
    pub by_category: IndexMap<String, usize>,
    pub longest: Option<Note>,
    pub shortest: Option<Note>,
}

/// Aggregates over the collection in one left-to-right pass; on equal content
/// length the first note seen wins.
pub fn statistics(notes: &[Note]) -> NoteStatistics {
    let mut by_category = IndexMap::new();
    let mut longest: Option<&Note> = None;
    let mut shortest: Option<&Note> = None;

    for note in notes {
        *by_category.entry(note.category.clone()).or_insert(0) += 1;

        let len = note.content_len();
        if longest.is_none_or(|current| len > current.content_len()) {
            longest = Some(note);
        }
        if shortest.is_none_or(|current| len < current.content_len()) {
            shortest = Some(note);
        }
    }

    NoteStatistics {
        total: notes.len(),
        by_category,
        longest: longest.cloned(),
        shortest: shortest.cloned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(id: &str, title: &str, content: &str, category: &str, timestamp: i64) -> Note {
        Note {
            id: id.to_string(),
            title: title.to_string(),
            content: content.to_string(),
            category: category.to_string(),
            timestamp,
        }
    }

    fn ids(notes: &[&Note]) -> Vec<String> {
        notes.iter().map(|n| n.id.clone()).collect()
    }

    fn sample() -> Vec<Note> {
        vec![
            note("1", "Gracia", "Sobre la gracia divina", "Teología", 10),
            note("2", "Ética", "Virtud y carácter", "Filosofía", 30),
            note("3", "Compras", "Pan, leche", "Personal", 20),
        ]
    }

    #[test]
    fn all_filter_is_identity() {
        let notes = sample();
        let filtered = filter_by_category(&notes, &CategoryFilter::from_selection("all"));
        assert_eq!(ids(&filtered), vec!["1", "2", "3"]);
    }

    #[test]
    fn filter_keeps_exact_category_matches() {
        let notes = sample();
        let filtered = filter_by_category(&notes, &CategoryFilter::from_selection("Filosofía"));
        assert_eq!(ids(&filtered), vec!["2"]);

        let absent = filter_by_category(&notes, &CategoryFilter::from_selection("General"));
        assert!(absent.is_empty());
    }

    #[test]
    fn search_is_case_insensitive_over_title_and_content() {
        let notes = sample();
        let all: Vec<&Note> = notes.iter().collect();

        assert_eq!(ids(&search_notes(all.clone(), "GRACIA")), vec!["1"]);
        assert_eq!(ids(&search_notes(all.clone(), "leche")), vec!["3"]);
        assert_eq!(ids(&search_notes(all.clone(), "   ")), vec!["1", "2", "3"]);
        assert!(search_notes(all, "ausente").is_empty());
    }

    #[test]
    fn search_keeps_surrounding_whitespace_of_query() {
        let notes = vec![
            note("1", "dedo", "mano", "General", 1),
            note("2", "Carta", "hijo de Dios", "Teología", 2),
        ];
        let all: Vec<&Note> = notes.iter().collect();
        assert_eq!(ids(&search_notes(all.clone(), "de ")), vec!["2"]);
        assert_eq!(ids(&search_notes(all, "de")), vec!["1", "2"]);
    }

    #[test]
    fn default_sort_is_newest_first() {
        let notes = sample();
        let view = derive_view(&notes, &NoteQuery::default());
        assert_eq!(ids(&view), vec!["2", "3", "1"]);
    }

    #[test]
    fn title_sort_uses_locale_collation() {
        let notes = vec![note("b", "Banana", "x", "A", 1), note("a", "apple", "x", "A", 2)];
        let view = derive_view(&notes, &NoteQuery::default().with_sort(SortOrder::Title));
        assert_eq!(ids(&view), vec!["a", "b"]);
    }

    #[test]
    fn collation_orders_case_and_accents_as_secondary() {
        assert_eq!(collate("apple", "Banana"), Ordering::Less);
        assert_eq!(collate("a", "A"), Ordering::Less);
        assert_eq!(collate("Ética", "Etica"), Ordering::Greater);
        assert_eq!(collate("Ética", "Eucaristía"), Ordering::Less);
        assert_eq!(collate("same", "same"), Ordering::Equal);
    }

    #[test]
    fn collation_expands_ligatures_and_ranks_punctuation_first() {
        assert_eq!(collate("æther", "bravo"), Ordering::Less);
        assert_eq!(collate("æther", "aether"), Ordering::Greater);
        assert_eq!(collate("ßeta", "tau"), Ordering::Less);
        assert_eq!(collate("Ørsted", "plato"), Ordering::Less);
        assert_eq!(collate("œuvre", "opera"), Ordering::Less);
        assert_eq!(collate("~nota", "apple"), Ordering::Less);
        assert_eq!(collate("2024", "apple"), Ordering::Less);
        assert_eq!(collate("!", "9"), Ordering::Less);
    }

    #[test]
    fn view_applies_filter_then_search_then_sort() {
        let mut notes = sample();
        notes.push(note("4", "Gracia común", "Calvino", "Teología", 40));
        let query = NoteQuery::default()
            .with_category(CategoryFilter::from_selection("Teología"))
            .with_search("gracia")
            .with_sort(SortOrder::Newest);
        assert_eq!(ids(&derive_view(&notes, &query)), vec!["4", "1"]);
    }

    #[test]
    fn parses_sort_order_names() {
        assert_eq!("date".parse::<SortOrder>(), Ok(SortOrder::Newest));
        assert_eq!(" Title ".parse::<SortOrder>(), Ok(SortOrder::Title));
        assert!("size".parse::<SortOrder>().is_err());
    }

    #[test]
    fn statistics_count_categories_in_first_seen_order() {
        let notes = vec![
            note("1", "t", "aa", "A", 1),
            note("2", "t", "bbbb", "A", 2),
            note("3", "t", "c", "B", 3),
        ];
        let stats = statistics(&notes);
        assert_eq!(stats.total, 3);
        assert_eq!(
            stats.by_category.into_iter().collect::<Vec<_>>(),
            vec![("A".to_string(), 2), ("B".to_string(), 1)]
        );
        assert_eq!(stats.longest.map(|n| n.id).as_deref(), Some("2"));
        assert_eq!(stats.shortest.map(|n| n.id).as_deref(), Some("3"));
    }

    #[test]
    fn statistics_ties_keep_first_seen() {
        let notes = vec![
            note("1", "t", "xx", "A", 1),
            note("2", "t", "yy", "A", 2),
        ];
        let stats = statistics(&notes);
        assert_eq!(stats.longest.map(|n| n.id).as_deref(), Some("1"));
        assert_eq!(stats.shortest.map(|n| n.id).as_deref(), Some("1"));
    }

    #[test]
    fn statistics_of_empty_collection() {
        let stats = statistics(&[]);
        assert_eq!(stats.total, 0);
        assert!(stats.by_category.is_empty());
        assert!(stats.longest.is_none());
        assert!(stats.shortest.is_none());
    }
}
