use proptest::prelude::*;
use zoekt_shard::bloom::BloomFilter;
use zoekt_shard::codec::{from_deltas, from_sized_deltas, to_deltas, to_sized_deltas};
use zoekt_shard::ngram::{case_folding_equals, rune_count, split_ngrams, to_lower_bytes};

fn sorted_offsets() -> impl Strategy<Value = Vec<u32>> {
    prop::collection::vec(0u32..1_000_000, 0..200).prop_map(|mut v| {
        v.sort_unstable();
        v.dedup();
        v
    })
}

proptest! {
    #[test]
    fn posting_deltas_survive(offsets in sorted_offsets()) {
        prop_assert_eq!(from_deltas(&to_deltas(&offsets)).unwrap(), offsets.clone());
        prop_assert_eq!(from_sized_deltas(&to_sized_deltas(&offsets)).unwrap(), offsets);
    }

    #[test]
    fn bloom_has_no_false_negatives(words in prop::collection::vec("[a-zA-Z_][a-zA-Z0-9_]{2,12}", 1..50)) {
        let mut bf = BloomFilter::with_len(4096);
        for w in &words {
            bf.add_bytes(w.as_bytes());
        }
        for w in &words {
            prop_assert!(bf.maybe_has_bytes(w.as_bytes()));
        }
    }

    #[test]
    fn every_rune_window_is_one_ngram(s in "\\PC{0,40}") {
        let n = rune_count(s.as_bytes());
        prop_assert_eq!(split_ngrams(s.as_bytes()).len(), n.saturating_sub(2));
    }

    #[test]
    fn lowercase_text_folds_onto_itself(s in "[a-zA-Z0-9 ]{0,40}") {
        let lower = to_lower_bytes(s.as_bytes());
        prop_assert_eq!(case_folding_equals(&lower, s.as_bytes()), Some(s.len()));
    }
}
