use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::models::{Link, Sentence, SentenceId, SentenceTable};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    pub applied: usize,
    pub dangling: usize,
    pub self_links: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndirectStats {
    pub sentences: usize,
    pub relations: usize,
}

/// Adds a direct relation for every link whose endpoints both exist.
///
/// Links are applied as read: `(a, b)` gives `a` a relation to `b` and nothing more.
/// Dangling links and links from a sentence to itself are dropped. Re-applying a link is a no-op.
pub fn apply_links<I>(table: &mut SentenceTable, links: I) -> LinkStats
where
    I: IntoIterator<Item = Link>,
{
    let mut stats = LinkStats::default();

    for Link { from, to } in links {
        if from == to {
            stats.self_links += 1;
            continue;
        }

        let language = match table.language_of(to) {
            Some(language) if table.contains(from) => language.to_string(),
            _ => {
                stats.dangling += 1;
                continue;
            }
        };

        if let Some(sentence) = table.get_mut(from) {
            sentence.direct_relations.insert(to);
            sentence.translated_languages.insert(language);
            stats.applied += 1;
        }
    }

    info!(
        applied = stats.applied,
        dangling = stats.dangling,
        self_links = stats.self_links,
        "direct relations added"
    );
    stats
}

/// Resolves relations reachable through exactly one intermediate direct neighbour.
///
/// Candidate sets are computed in parallel against a read-only view of the table; each
/// sentence's result is then written back by a single owner.
pub fn resolve_indirect(table: &mut SentenceTable) -> IndirectStats {
    let sentences = table.as_map();

    let updates: Vec<(SentenceId, HashSet<SentenceId>, HashSet<String>)> = sentences
        .par_iter()
        .filter(|(_, sentence)| !sentence.direct_relations.is_empty())
        .filter_map(|(&id, sentence)| {
            let indirect = two_hop_neighbours(sentences, sentence);
            if indirect.is_empty() {
                return None;
            }
            let languages = indirect
                .iter()
                .filter_map(|other| sentences.get(other))
                .map(|other| other.language.clone())
                .collect();
            Some((id, indirect, languages))
        })
        .collect();

    let mut stats = IndirectStats::default();
    for (id, indirect, languages) in updates {
        if let Some(sentence) = table.get_mut(id) {
            stats.sentences += 1;
            stats.relations += indirect.len();
            sentence.indirect_relations = indirect;
            sentence.translated_languages.extend(languages);
        }
    }

    info!(
        sentences = stats.sentences,
        relations = stats.relations,
        "indirect relations added"
    );
    stats
}

fn two_hop_neighbours(
    sentences: &HashMap<SentenceId, Sentence>,
    sentence: &Sentence,
) -> HashSet<SentenceId> {
    let mut indirect = HashSet::new();

    for direct in &sentence.direct_relations {
        let Some(neighbour) = sentences.get(direct) else {
            continue;
        };

        for &candidate in &neighbour.direct_relations {
            if candidate == sentence.id || sentence.direct_relations.contains(&candidate) {
                continue;
            }
            indirect.insert(candidate);
        }
    }

    indirect
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    SelfRelation(SentenceId),
    Overlap {
        sentence: SentenceId,
        other: SentenceId,
    },
    Dangling {
        sentence: SentenceId,
        other: SentenceId,
    },
    Languages {
        sentence: SentenceId,
        expected: Vec<String>,
        actual: Vec<String>,
    },
}

/// Checks the relation invariants for every sentence and returns whatever does not hold.
pub fn check_invariants(table: &SentenceTable) -> Vec<Violation> {
    let mut violations = Vec::new();

    for sentence in table.iter() {
        let id = sentence.id;
        if sentence.direct_relations.contains(&id) || sentence.indirect_relations.contains(&id) {
            violations.push(Violation::SelfRelation(id));
        }

        for other in sentence
            .direct_relations
            .intersection(&sentence.indirect_relations)
        {
            violations.push(Violation::Overlap {
                sentence: id,
                other: *other,
            });
        }

        let mut expected = HashSet::new();
        for other in sentence
            .direct_relations
            .iter()
            .chain(&sentence.indirect_relations)
        {
            match table.language_of(*other) {
                Some(language) => {
                    expected.insert(language.to_string());
                }
                None => violations.push(Violation::Dangling {
                    sentence: id,
                    other: *other,
                }),
            }
        }

        if expected != sentence.translated_languages {
            let mut expected: Vec<String> = expected.into_iter().collect();
            let mut actual: Vec<String> = sentence.translated_languages.iter().cloned().collect();
            expected.sort();
            actual.sort();
            violations.push(Violation::Languages {
                sentence: id,
                expected,
                actual,
            });
        }
    }

    if !violations.is_empty() {
        debug!(count = violations.len(), "relation invariants violated");
    }
    violations
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn table(rows: &[(SentenceId, &str)]) -> SentenceTable {
        rows.iter()
            .map(|(id, language)| Sentence::new(*id, *language, format!("s{id}"), "user"))
            .collect()
    }

    fn links(pairs: &[(SentenceId, SentenceId)]) -> Vec<Link> {
        pairs.iter().map(|&(from, to)| Link { from, to }).collect()
    }

    fn sorted<T: Ord + Clone>(set: &HashSet<T>) -> Vec<T> {
        let mut values: Vec<T> = set.iter().cloned().collect();
        values.sort();
        values
    }

    #[test]
    fn resolves_direct_and_indirect_chain() {
        let mut sentences = table(&[(1, "eng"), (2, "fra"), (3, "deu")]);
        apply_links(&mut sentences, links(&[(1, 2), (2, 3)]));
        resolve_indirect(&mut sentences);

        let first = sentences.get(1).expect("sentence 1");
        assert_eq!(sorted(&first.direct_relations), vec![2]);
        assert_eq!(sorted(&first.indirect_relations), vec![3]);
        assert_eq!(sorted(&first.translated_languages), vec!["deu", "fra"]);

        let second = sentences.get(2).expect("sentence 2");
        assert_eq!(sorted(&second.direct_relations), vec![3]);
        assert!(second.indirect_relations.is_empty());
        assert_eq!(sorted(&second.translated_languages), vec!["deu"]);

        let third = sentences.get(3).expect("sentence 3");
        assert!(third.direct_relations.is_empty());
        assert!(third.translated_languages.is_empty());

        assert_eq!(check_invariants(&sentences), Vec::new());
    }

    #[test]
    fn dangling_and_self_links_are_dropped() {
        let mut sentences = table(&[(1, "eng"), (2, "fra")]);
        let stats = apply_links(&mut sentences, links(&[(1, 99), (98, 1), (1, 1), (1, 2)]));

        assert_eq!(
            stats,
            LinkStats {
                applied: 1,
                dangling: 2,
                self_links: 1
            }
        );
        assert_eq!(
            sorted(&sentences.get(1).expect("sentence 1").direct_relations),
            vec![2]
        );
    }

    #[test]
    fn duplicate_links_are_idempotent() {
        let pairs = links(&[(1, 2), (1, 3), (2, 1)]);
        let mut once = table(&[(1, "eng"), (2, "fra"), (3, "fra")]);
        apply_links(&mut once, pairs.clone());

        let mut twice = table(&[(1, "eng"), (2, "fra"), (3, "fra")]);
        apply_links(&mut twice, pairs.clone());
        apply_links(&mut twice, pairs);

        for id in [1, 2, 3] {
            let a = once.get(id).expect("sentence");
            let b = twice.get(id).expect("sentence");
            assert_eq!(a.direct_relations, b.direct_relations);
            assert_eq!(a.translated_languages, b.translated_languages);
        }
        assert_eq!(
            sorted(&once.get(1).expect("sentence 1").translated_languages),
            vec!["fra"]
        );
    }

    #[test]
    fn symmetric_links_do_not_loop_back() {
        let mut sentences = table(&[(1, "eng"), (2, "fra"), (3, "deu")]);
        apply_links(&mut sentences, links(&[(1, 2), (2, 1), (2, 3), (3, 2)]));
        resolve_indirect(&mut sentences);

        let first = sentences.get(1).expect("sentence 1");
        assert_eq!(sorted(&first.indirect_relations), vec![3]);

        let second = sentences.get(2).expect("sentence 2");
        assert!(second.indirect_relations.is_empty());
        assert_eq!(sorted(&second.direct_relations), vec![1, 3]);

        assert_eq!(check_invariants(&sentences), Vec::new());
    }

    #[test]
    fn direct_neighbours_are_not_repeated_as_indirect() {
        // 1 reaches 3 both directly and through 2.
        let mut sentences = table(&[(1, "eng"), (2, "fra"), (3, "deu"), (4, "deu")]);
        apply_links(&mut sentences, links(&[(1, 2), (1, 3), (2, 3), (2, 4), (3, 4)]));
        resolve_indirect(&mut sentences);

        let first = sentences.get(1).expect("sentence 1");
        assert_eq!(sorted(&first.direct_relations), vec![2, 3]);
        assert_eq!(sorted(&first.indirect_relations), vec![4]);
        assert_eq!(sorted(&first.translated_languages), vec!["deu", "fra"]);
    }

    #[test]
    fn closure_stops_after_two_hops() {
        let mut sentences = table(&[(1, "eng"), (2, "fra"), (3, "deu"), (4, "ita")]);
        apply_links(&mut sentences, links(&[(1, 2), (2, 3), (3, 4)]));
        resolve_indirect(&mut sentences);

        let first = sentences.get(1).expect("sentence 1");
        assert_eq!(sorted(&first.indirect_relations), vec![3]);
        assert!(!first.translated_languages.contains("ita"));
    }

    #[test]
    fn invariants_hold_on_dense_generated_graph() {
        const LANGUAGES: [&str; 4] = ["eng", "fra", "deu", "jpn"];
        let rows: Vec<(SentenceId, &str)> =
            (1..=60).map(|id| (id, LANGUAGES[id as usize % 4])).collect();
        let mut sentences = table(&rows);

        let mut state: u64 = 0x2545_f491_4f6c_dd1d;
        let mut pairs = Vec::new();
        for _ in 0..400 {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let from = (state % 64) as SentenceId + 1;
            let to = ((state >> 20) % 64) as SentenceId + 1;
            pairs.push((from, to));
        }

        apply_links(&mut sentences, links(&pairs));
        resolve_indirect(&mut sentences);
        // A second pass must not change anything.
        let before: Vec<_> = sentences
            .sorted_ids()
            .into_iter()
            .map(|id| sentences.get(id).cloned())
            .collect();
        resolve_indirect(&mut sentences);
        let after: Vec<_> = sentences
            .sorted_ids()
            .into_iter()
            .map(|id| sentences.get(id).cloned())
            .collect();

        assert_eq!(before, after);
        assert_eq!(check_invariants(&sentences), Vec::new());
    }

    #[test]
    fn reports_broken_invariants() {
        let mut sentences = table(&[(1, "eng"), (2, "fra")]);
        let first = sentences.get_mut(1).expect("sentence 1");
        first.direct_relations.extend([1, 2, 5]);
        first.indirect_relations.insert(2);

        let violations = check_invariants(&sentences);
        assert!(violations.contains(&Violation::SelfRelation(1)));
        assert!(violations.contains(&Violation::Overlap {
            sentence: 1,
            other: 2
        }));
        assert!(violations.contains(&Violation::Dangling {
            sentence: 1,
            other: 5
        }));
        assert!(
            violations
                .iter()
                .any(|v| matches!(v, Violation::Languages { sentence: 1, .. }))
        );
    }
}
