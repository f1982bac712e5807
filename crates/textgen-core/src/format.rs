//! Display-side cleanup of generated text.

use once_cell::sync::Lazy;
use regex::Regex;

static GPT4CHAN_EMPTY: Lazy<[Regex; 3]> = Lazy::new(|| {
    [
        Regex::new(r"--- [0-9]*\n>>[0-9]*\n---").expect("static regex"),
        Regex::new(r"--- [0-9]*\n *\n---").expect("static regex"),
        Regex::new(r"--- [0-9]*\n\n\n---").expect("static regex"),
    ]
});
static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("static regex"));

pub fn escape_html(text: &str) -> String { html_escape::encode_text(text).into_owned() }

pub fn unescape_html(text: &str) -> String { html_escape::decode_html_entities(text).into_owned() }

/// Drops empty posts from gpt4chan-style threads.
pub fn fix_gpt4chan(text: &str) -> String {
    let mut s = text.to_string();
    for _ in 0..10 {
        for re in GPT4CHAN_EMPTY.iter() {
            s = re.replace_all(&s, "---").into_owned();
        }
    }
    s
}

/// Rewrites GALACTICA's LaTeX delimiters to `$` and doubles line breaks.
pub fn fix_galactica(text: &str) -> String {
    let s = text
        .replace(r"\[", "$")
        .replace(r"\]", "$")
        .replace(r"\(", "$")
        .replace(r"\)", "$")
        .replace("$$", "$")
        .replace('\n', "\n\n");
    BLANK_RUN.replace_all(&s, "\n\n").into_owned()
}

pub fn is_gpt4chan(model_name: &str) -> bool {
    ["gpt-4chan", "gpt4chan"].iter().any(|m| model_name.contains(m))
}

/// Plain-text form of a reply as a UI would show it.
pub fn formatted_output(reply: &str, model_name: &str) -> String {
    if is_gpt4chan(model_name) {
        unescape_html(&fix_gpt4chan(reply))
    } else {
        unescape_html(reply)
    }
}
