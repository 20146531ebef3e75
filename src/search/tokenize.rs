//! Token streams for identifiers and docstrings.

use std::collections::BTreeSet;

/// Words too common in docstrings to carry any signal.
const STOPWORDS: &[&str] = &[
    "an", "and", "are", "as", "at", "be", "by", "for", "from", "if", "in", "is", "it", "of", "on",
    "or", "the", "this", "that", "to", "with",
];

/// Splits an identifier or dotted name on `.`, `_`, any other
/// non-alphanumeric character and casing boundaries, then lowercases.
///
/// `google.adk.tools.ToolConfig` yields `google adk tools tool config`;
/// `HTTPServer` yields `http server`.
pub fn tokenize_identifier(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        split_case(word, &mut tokens);
    }
    tokens
}

/// Tokens of free text such as a docstring, without stopwords and
/// single characters.
pub fn tokenize_text(text: &str) -> Vec<String> {
    tokenize_identifier(text)
        .into_iter()
        .filter(|t| t.chars().count() > 1 && !STOPWORDS.contains(&t.as_str()))
        .collect()
}

/// Distinct query tokens across every sub-query.
pub fn query_tokens(queries: &[String]) -> BTreeSet<String> {
    queries.iter().flat_map(|q| tokenize_identifier(q)).collect()
}

fn split_case(word: &str, tokens: &mut Vec<String>) {
    let chars: Vec<char> = word.chars().collect();
    let mut start = 0;

    for i in 1..chars.len() {
        let prev = chars[i - 1];
        let cur = chars[i];
        let next_is_lower = chars.get(i + 1).is_some_and(|c| c.is_lowercase());

        let boundary = (cur.is_uppercase() && (prev.is_lowercase() || prev.is_numeric()))
            || (cur.is_uppercase() && prev.is_uppercase() && next_is_lower);
        if boundary {
            push_token(&chars[start..i], tokens);
            start = i;
        }
    }
    push_token(&chars[start..], tokens);
}

fn push_token(chars: &[char], tokens: &mut Vec<String>) {
    if !chars.is_empty() {
        tokens.push(chars.iter().collect::<String>().to_lowercase());
    }
}
