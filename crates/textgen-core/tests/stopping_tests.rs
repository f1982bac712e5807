use proptest::prelude::*;
use textgen_core::apply_stopping_strings;

#[test]
fn full_match_truncates_and_stops() {
    assert_eq!(apply_stopping_strings("Hello\nYou: ", &["\nYou:"]), ("Hello", true));
}

#[test]
fn partial_tail_is_trimmed_without_stopping() {
    assert_eq!(apply_stopping_strings("Hello\nYo", &["\nYou:"]), ("Hello", false));
}

#[test]
fn no_stop_strings_leaves_text_alone() {
    let none: [&str; 0] = [];
    assert_eq!(apply_stopping_strings("Hello\nYo", &none), ("Hello\nYo", false));
}

#[test]
fn earliest_occurrence_wins_across_stop_strings() {
    let stops = ["world", "lo"];
    assert_eq!(apply_stopping_strings("hello world", &stops), ("hel", true));
}

#[test]
fn first_stop_string_with_partial_tail_is_applied() {
    // "ab" ends with "b" (prefix of "bc") and with "ab" (prefix of "abx");
    // list order decides which one is trimmed.
    assert_eq!(apply_stopping_strings("xxab", &["bc", "abx"]), ("xxa", false));
    assert_eq!(apply_stopping_strings("xxab", &["abx", "bc"]), ("xx", false));
}

#[test]
fn longest_partial_prefix_is_removed() {
    assert_eq!(apply_stopping_strings("a\n\n", &["\n\n\n"]), ("a", false));
}

#[test]
fn empty_stop_strings_are_ignored() {
    assert_eq!(apply_stopping_strings("hello", &["", "xyz"]), ("hello", false));
    assert_eq!(apply_stopping_strings("hello", &[""]), ("hello", false));
}

#[test]
fn multibyte_prefixes_respect_char_boundaries() {
    assert_eq!(apply_stopping_strings("über é", &["éa"]), ("über ", false));
    assert_eq!(apply_stopping_strings("naïve", &["ïv"]), ("na", true));
}

#[test]
fn owned_stop_strings_are_accepted() {
    let stops = vec!["\nUser:".to_string()];
    assert_eq!(apply_stopping_strings("Sure.\nUser: hi", &stops), ("Sure.", true));
}

proptest! {
    #[test]
    fn stopped_result_never_contains_a_stop_string(
        text in "[a-c]{0,24}",
        stops in proptest::collection::vec("[a-c]{1,3}", 1..4),
    ) {
        let (out, stopped) = apply_stopping_strings(&text, &stops);
        if stopped {
            for s in &stops {
                prop_assert!(!out.contains(s.as_str()));
            }
            prop_assert!(text.starts_with(out));
        }
    }

    #[test]
    fn result_is_stopped_iff_some_stop_string_occurs(
        text in "[a-c]{0,24}",
        stops in proptest::collection::vec("[a-c]{1,3}", 1..4),
    ) {
        let occurs = stops.iter().any(|s| text.contains(s.as_str()));
        let (_, stopped) = apply_stopping_strings(&text, &stops);
        prop_assert_eq!(stopped, occurs);
    }

    #[test]
    fn partial_tail_is_removed(body in "[a-m]{0,16}", stop in "[n-z]{2,6}", cut in 1usize..6) {
        let cut = cut.min(stop.len() - 1);
        let text = format!("{body}{}", &stop[..cut]);
        let (out, stopped) = apply_stopping_strings(&text, &[stop.as_str()]);
        prop_assert!(!stopped);
        prop_assert_eq!(out, body.as_str());
    }

    #[test]
    fn stopped_result_is_stable(body in "[a-m]{0,16}", stop in "[n-z]{1,4}", tail in "[a-z]{0,8}") {
        let text = format!("{body}{stop}{tail}");
        let (once, stopped) = apply_stopping_strings(&text, &[stop.as_str()]);
        prop_assert!(stopped);
        prop_assert_eq!(once, body.as_str());
        let (twice, stopped) = apply_stopping_strings(once, &[stop.as_str()]);
        prop_assert!(!stopped);
        prop_assert_eq!(twice, once);
    }
}
