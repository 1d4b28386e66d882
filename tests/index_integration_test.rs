//! End-to-end tests over a small annotated corpus: ingest, filter at every
//! output level, masking, export round-trips, carryover, co-occurrence.

use decaf::index::StructureCountSpec;
use decaf::{Condition, Criterion, DecafIndex, Filter, IngestConfig, Op, OutputLevel};
use std::path::PathBuf;
use tempfile::TempDir;

/// Two documents, five sentences, with UPOS and dependency annotations.
const CORPUS: &str = "\
# newdoc id = D1
# meta::date = 2024-01-01
# sent_id = s1
# text = The quick cat sleeps.
1\tThe\tthe\tDET\t_\t_\t3\tdet\t_\t_
2\tquick\tquick\tADJ\t_\t_\t3\tamod\t_\t_
3\tcat\tcat\tNOUN\t_\t_\t4\tnsubj\t_\t_
4\tsleeps\tsleep\tVERB\t_\t_\t0\troot\t_\t_
5\t.\t.\tPUNCT\t_\t_\t4\tpunct\t_\t_

# sent_id = s2
# text = A dog runs.
1\tA\ta\tDET\t_\t_\t2\tdet\t_\t_
2\tdog\tdog\tNOUN\t_\t_\t3\tnsubj\t_\t_
3\truns\trun\tVERB\t_\t_\t0\troot\t_\t_
4\t.\t.\tPUNCT\t_\t_\t3\tpunct\t_\t_

# newdoc id = D2
# sent_id = s3
# text = Green ideas sleep.
1\tGreen\tgreen\tADJ\t_\t_\t2\tamod\t_\t_
2\tideas\tidea\tNOUN\t_\t_\t3\tnsubj\t_\t_
3\tsleep\tsleep\tVERB\t_\t_\t0\troot\t_\t_
4\t.\t.\tPUNCT\t_\t_\t3\tpunct\t_\t_

# sent_id = s4
# text = Dogs bark loudly.
1\tDogs\tdog\tNOUN\t_\t_\t2\tnsubj\t_\t_
2\tbark\tbark\tVERB\t_\t_\t0\troot\t_\t_
3\tloudly\tloudly\tADV\t_\t_\t2\tadvmod\t_\t_
4\t.\t.\tPUNCT\t_\t_\t2\tpunct\t_\t_

# sent_id = s5
# text = Dogs are loud.
1\tDogs\tdog\tNOUN\t_\t_\t3\tnsubj\t_\t_
2\tare\tbe\tAUX\t_\t_\t3\tcop\t_\t_
3\tloud\tloud\tADJ\t_\t_\t0\troot\t_\t_
4\t.\t.\tPUNCT\t_\t_\t3\tpunct\t_\t_
";

fn build_index(corpus: &str, config: &IngestConfig) -> (TempDir, DecafIndex) {
    let dir = TempDir::new().unwrap();
    let corpus_path = dir.path().join("corpus.conllu");
    std::fs::write(&corpus_path, corpus).unwrap();
    let index_path = dir.path().join("index");
    let mut index = DecafIndex::create(&index_path).unwrap();
    index.ingest(&corpus_path, config).unwrap();
    (dir, index)
}

fn default_index() -> (TempDir, DecafIndex) {
    build_index(CORPUS, &IngestConfig::default())
}

fn noun_filter() -> Filter {
    Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["NOUN"]),
    )])
}

fn adj_noun_filter() -> Filter {
    Filter::new(vec![Criterion::all(vec![
        Condition::new("upos").with_values(["ADJ"]),
        Condition::new("upos").with_values(["NOUN"]),
    ])])
    .with_hierarchy("sentence", "token")
}

#[test]
fn test_empty_index() {
    let dir = TempDir::new().unwrap();
    let index = DecafIndex::create(&dir.path().join("index")).unwrap();
    assert_eq!(index.num_shards(), 1);

    let size = index.get_size().unwrap();
    assert_eq!(size.literals, 0);
    assert_eq!(size.structures, 0);
    assert_eq!(size.hierarchies, 0);

    let matches = index
        .filter(&noun_filter(), OutputLevel::Substructures)
        .unwrap();
    assert!(matches.is_empty());
    assert!(index.get_literal_counts().unwrap().is_empty());
}

#[test]
fn test_ingest_statistics() {
    let dir = TempDir::new().unwrap();
    let corpus_path = dir.path().join("corpus.conllu");
    std::fs::write(&corpus_path, CORPUS).unwrap();
    let index_path = dir.path().join("index");
    let mut index = DecafIndex::create(&index_path).unwrap();
    let stats = index.ingest(&corpus_path, &IngestConfig::default()).unwrap();

    assert_eq!(stats.sentences, 5);
    assert_eq!(stats.shards, 1);
    // Ingest statistics agree with the stored totals.
    let size = index.get_size().unwrap();
    assert_eq!(size.literals, stats.literals);
    assert_eq!(size.structures, stats.structures);
    assert_eq!(size.hierarchies, stats.hierarchies);
    // 21 tokens and 21 separating spaces.
    assert_eq!(size.literals, 42);
}

#[test]
fn test_flat_filter_returns_surface_text() {
    let (_dir, index) = default_index();
    let matches = index
        .filter(&noun_filter(), OutputLevel::Substructures)
        .unwrap();

    let mut texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    texts.sort();
    assert_eq!(texts, vec!["Dogs", "Dogs", "cat", "dog", "ideas"]);
}

#[test]
fn test_scoped_filter_structures_output() {
    let (_dir, index) = default_index();
    let matches = index
        .filter(&adj_noun_filter(), OutputLevel::Structures)
        .unwrap();

    // Only sentences containing both an ADJ and a NOUN.
    assert_eq!(matches.len(), 3);
    let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    assert!(texts.contains(&"The quick cat sleeps . "));
    assert!(texts.contains(&"Green ideas sleep . "));
    assert!(texts.contains(&"Dogs are loud . "));
}

#[test]
fn test_scoped_filter_substructures_output() {
    let (_dir, index) = default_index();
    let matches = index
        .filter(&adj_noun_filter(), OutputLevel::Substructures)
        .unwrap();

    let mut texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    texts.sort();
    assert_eq!(
        texts,
        vec!["Dogs", "Green", "cat", "ideas", "loud", "quick"]
    );
}

#[test]
fn test_min_count_restricts_parents() {
    let (_dir, index) = default_index();
    // At least two nouns per sentence: no sentence qualifies.
    let filter = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["NOUN"]).with_min_count(1),
    )])
    .with_hierarchy("sentence", "token");
    let matches = index.filter(&filter, OutputLevel::Structures).unwrap();
    assert!(matches.is_empty());
}

#[test]
fn test_sequential_filter_requires_offset_order() {
    let (_dir, index) = default_index();
    let filter = Filter::new(vec![
        Criterion::single(Condition::new("upos").with_values(["ADJ"])),
        Criterion::single(Condition::new("upos").with_values(["NOUN"])),
    ])
    .with_op(Op::And)
    .with_sequential(true)
    .with_hierarchy("sentence", "token");

    let matches = index.filter(&filter, OutputLevel::Structures).unwrap();
    // "Dogs are loud." has the ADJ after the NOUN and must not match.
    assert_eq!(matches.len(), 2);
    let texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    assert!(texts.contains(&"The quick cat sleeps . "));
    assert!(texts.contains(&"Green ideas sleep . "));
}

#[test]
fn test_literal_condition() {
    let (_dir, index) = default_index();
    let filter = Filter::new(vec![Criterion::single(
        Condition::new("token").with_literal("cat"),
    )]);
    let matches = index.filter(&filter, OutputLevel::Substructures).unwrap();
    assert_eq!(matches.len(), 1);
    assert_eq!(matches[0].text, "cat");
}

#[test]
fn test_carryover_documents_and_metadata() {
    let (_dir, index) = default_index();

    let documents = index.get_structures("document").unwrap();
    assert_eq!(documents.len(), 2);

    let counts = index
        .get_structure_counts(&StructureCountSpec {
            types: Some(vec![
                "document".to_string(),
                "document_id".to_string(),
                "date".to_string(),
                "paragraph".to_string(),
            ]),
            by_value: true,
            by_literal: false,
        })
        .unwrap();

    let find = |stype: &str, value: Option<&str>| {
        counts
            .iter()
            .find(|c| c.stype == stype && c.value.as_deref() == value)
            .map(|c| c.count)
    };
    assert_eq!(find("document", None), Some(2));
    assert_eq!(find("document_id", Some("D1")), Some(1));
    assert_eq!(find("document_id", Some("D2")), Some(1));
    // The meta:: key is stored under its bare name, once (scoped to D1).
    assert_eq!(find("date", Some("2024-01-01")), Some(1));
    // Document starts open paragraph scopes implicitly.
    assert_eq!(find("paragraph", None), Some(2));
}

#[test]
fn test_document_round_trip() {
    let (_dir, index) = default_index();
    let documents = index.get_structures("document").unwrap();
    let refs: Vec<(usize, i64)> = documents.iter().map(|d| (d.shard, d.id)).collect();
    let texts = index.export_structures(&refs).unwrap();

    assert_eq!(texts.len(), 2);
    assert_eq!(texts[0], "The quick cat sleeps . A dog runs . ");
    assert_eq!(
        texts[1],
        "Green ideas sleep . Dogs bark loudly . Dogs are loud . "
    );
}

#[test]
fn test_sentence_export_matches_range_export() {
    let (_dir, index) = default_index();
    let sentences = index.get_structures("sentence").unwrap();
    assert_eq!(sentences.len(), 5);

    let refs: Vec<(usize, i64)> = sentences.iter().map(|s| (s.shard, s.id)).collect();
    let by_mapping = index.export_structures(&refs).unwrap();
    let ranges: Vec<(i64, i64)> = sentences.iter().map(|s| (s.start, s.end)).collect();
    let by_range = index.export_ranges(0, &ranges).unwrap();

    // A sentence owns every literal in its range, so both exports agree.
    assert_eq!(by_mapping, by_range);
    assert_eq!(by_mapping[0], "The quick cat sleeps . ");
}

#[test]
fn test_full_text_reconstruction() {
    let (_dir, index) = default_index();
    // Masking with an unmatchable filter returns the entire corpus text.
    let filter = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["INTJ"]),
    )]);
    let text = index.mask(&filter, OutputLevel::Substructures, false).unwrap();
    assert_eq!(
        text,
        "The quick cat sleeps . A dog runs . \
         Green ideas sleep . Dogs bark loudly . Dogs are loud . "
    );
}

#[test]
fn test_mask_removes_matched_literals() {
    let (_dir, index) = default_index();
    let masked = index
        .mask(&noun_filter(), OutputLevel::Substructures, false)
        .unwrap();
    assert!(!masked.contains("cat"));
    assert!(!masked.contains("dog"));
    assert!(!masked.contains("ideas"));
    assert!(masked.contains("The quick"));

    let collapsed = index
        .mask(&noun_filter(), OutputLevel::Substructures, true)
        .unwrap();
    assert!(!collapsed.contains("  "));
    assert!(collapsed.starts_with("The quick sleeps ."));
}

#[test]
fn test_cooccurrence_scoped_to_sentences() {
    let (_dir, index) = default_index();
    let source = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["NOUN"]),
    )])
    .with_hierarchy("sentence", "token");
    let target = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["ADJ"]),
    )])
    .with_hierarchy("sentence", "token");

    let forward = index.get_cooccurrence(&source, &target).unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].source, "upos=NOUN");
    assert_eq!(forward[0].target, "upos=ADJ");
    // Sentences containing both a NOUN and an ADJ.
    assert_eq!(forward[0].frequency, 3);

    // Symmetric when source and target are swapped.
    let backward = index.get_cooccurrence(&target, &source).unwrap();
    assert_eq!(backward.len(), 1);
    assert_eq!(backward[0].frequency, 3);
}

#[test]
fn test_cooccurrence_hierarchy_mismatch_is_rejected() {
    let (_dir, index) = default_index();
    let scoped = noun_filter().with_hierarchy("sentence", "token");
    let flat = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["ADJ"]),
    )]);
    assert!(index.get_cooccurrence(&scoped, &flat).is_err());

    let other_scope = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["ADJ"]),
    )])
    .with_hierarchy("document", "token");
    assert!(index.get_cooccurrence(&scoped, &other_scope).is_err());
}

#[test]
fn test_unscoped_cooccurrence_joins_on_offsets() {
    let (_dir, index) = default_index();
    // Lemma and UPOS annotations sit at identical token offsets.
    let source = Filter::new(vec![Criterion::single(
        Condition::new("lemma").with_values(["dog"]),
    )]);
    let target = Filter::new(vec![Criterion::single(
        Condition::new("upos").with_values(["NOUN"]),
    )]);
    let pairs = index.get_cooccurrence(&source, &target).unwrap();
    assert_eq!(pairs.len(), 1);
    assert_eq!(pairs[0].source, "lemma=dog");
    assert_eq!(pairs[0].target, "upos=NOUN");
    // "dog" in s2, "Dogs" in s4 and s5.
    assert_eq!(pairs[0].frequency, 3);
}

#[test]
fn test_structure_counts_by_value() {
    let (_dir, index) = default_index();
    let counts = index
        .get_structure_counts(&StructureCountSpec {
            types: Some(vec!["upos".to_string()]),
            by_value: true,
            by_literal: false,
        })
        .unwrap();
    let noun = counts
        .iter()
        .find(|c| c.value.as_deref() == Some("NOUN"))
        .unwrap();
    assert_eq!(noun.count, 5);
    let adj = counts
        .iter()
        .find(|c| c.value.as_deref() == Some("ADJ"))
        .unwrap();
    assert_eq!(adj.count, 3);
}

#[test]
fn test_literal_counts() {
    let (_dir, index) = default_index();
    let counts = index.get_literal_counts().unwrap();
    assert_eq!(counts.get("Dogs"), Some(&2));
    assert_eq!(counts.get("cat"), Some(&1));
    // One separating space after each of the 21 tokens.
    assert_eq!(counts.get(" "), Some(&21));
}

#[test]
fn test_force_alignment_spacing() {
    let config = IngestConfig {
        force_alignment: true,
        ..IngestConfig::default()
    };
    let (_dir, index) = build_index(CORPUS, &config);
    // Exact spacing from the text metadata: no space before periods, no
    // trailing whitespace.
    let sentences = index.get_structures("sentence").unwrap();
    let refs: Vec<(usize, i64)> = sentences.iter().map(|s| (s.shard, s.id)).collect();
    let texts = index.export_structures(&refs).unwrap();
    assert_eq!(texts[0], "The quick cat sleeps.");
    assert_eq!(texts[1], "A dog runs.");
}

#[test]
fn test_character_literal_level() {
    let config = IngestConfig {
        literal_level: decaf::conllu::LiteralLevel::Character,
        ..IngestConfig::default()
    };
    let (_dir, index) = build_index(CORPUS, &config);
    let size = index.get_size().unwrap();
    // 21 tokens with 70 characters total, plus 21 spaces.
    assert_eq!(size.literals, 70 + 21);

    let matches = index
        .filter(&noun_filter(), OutputLevel::Substructures)
        .unwrap();
    let mut texts: Vec<&str> = matches.iter().map(|m| m.text.as_str()).collect();
    texts.sort();
    assert_eq!(texts, vec!["Dogs", "Dogs", "cat", "dog", "ideas"]);
}

#[test]
fn test_filter_spec_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let spec: PathBuf = dir.path().join("filter.yaml");
    std::fs::write(
        &spec,
        "criteria:\n  - conditions:\n      - type: upos\n        values: [NOUN]\nhierarchy: [sentence, token]\n",
    )
    .unwrap();
    let filter = Filter::load(&spec).unwrap();
    assert_eq!(filter, noun_filter().with_hierarchy("sentence", "token"));
}
