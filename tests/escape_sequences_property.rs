// tests/escape_sequences_property.rs

use proptest::prelude::*;
use procwatch::strip_escape_sequences;

// Printable text without ESC / CSI introducers.
fn plain_text() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 .,:;!?_=+-]{0,40}"
}

// An SGR / cursor sequence: ESC [ params final-byte.
fn csi_sequence() -> impl Strategy<Value = String> {
    (
        proptest::collection::vec(0u8..=107, 0..4),
        prop::sample::select(vec!['m', 'K', 'H', 'J', 'A', 'B', 'C', 'D', 'h', 'l']),
    )
        .prop_map(|(params, final_byte)| {
            let params: Vec<String> = params.iter().map(|p| p.to_string()).collect();
            format!("\x1b[{}{}", params.join(";"), final_byte)
        })
}

proptest! {
    #[test]
    fn plain_text_is_unchanged(text in plain_text()) {
        prop_assert_eq!(strip_escape_sequences(&text), text);
    }

    #[test]
    fn interleaved_sequences_are_removed(
        parts in proptest::collection::vec((plain_text(), csi_sequence()), 0..8)
    ) {
        let mut decorated = String::new();
        let mut expected = String::new();
        for (text, seq) in &parts {
            decorated.push_str(seq);
            decorated.push_str(text);
            expected.push_str(text);
        }

        let stripped = strip_escape_sequences(&decorated);
        prop_assert_eq!(&stripped, &expected);
        prop_assert!(!stripped.contains('\x1b'));
    }

    #[test]
    fn stripping_is_idempotent(
        parts in proptest::collection::vec((plain_text(), csi_sequence()), 0..8)
    ) {
        let decorated: String = parts.iter().map(|(t, s)| format!("{t}{s}")).collect();
        let once = strip_escape_sequences(&decorated);
        prop_assert_eq!(strip_escape_sequences(&once), once.clone());
    }
}
