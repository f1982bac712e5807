use textgen_core::format::{escape_html, fix_galactica, fix_gpt4chan, formatted_output, unescape_html};

#[test]
fn escape_round_trips() {
    let raw = "<b>1 & 2</b>";
    let escaped = escape_html(raw);
    assert_eq!(escaped, "&lt;b&gt;1 &amp; 2&lt;/b&gt;");
    assert_eq!(unescape_html(&escaped), raw);
}

#[test]
fn gpt4chan_empty_posts_collapse() {
    let thread = "--- 1\n>>2\n---\nhello\n--- 3\n\n\n---";
    assert_eq!(fix_gpt4chan(thread), "---\nhello\n---");
}

#[test]
fn galactica_delimiters_become_dollars() {
    assert_eq!(fix_galactica(r"\[x^2\]"), "$x^2$");
    assert_eq!(fix_galactica(r"\(a\)"), "$a$");
    assert_eq!(fix_galactica("a\nb"), "a\n\nb");
    assert_eq!(fix_galactica("a\n\nb"), "a\n\nb");
}

#[test]
fn formatted_output_unescapes() {
    assert_eq!(formatted_output("a &lt; b", "llama"), "a < b");
    assert_eq!(formatted_output("--- 1\n \n---", "gpt-4chan"), "---");
    assert_eq!(formatted_output("--- 1\n \n---", "llama"), "--- 1\n \n---");
}
