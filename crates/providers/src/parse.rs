//! Parsers for free-text model output.
//!
//! Models rarely answer in exactly the requested shape. Every parser here
//! either extracts a usable value or returns `None`/empty, which the oracle
//! maps to the no-op answer for that question.

use std::collections::BTreeMap;

use parley_core::message::{Message, Role};
use parley_core::oracle::SourceQuery;
use regex_lite::Regex;
use serde_yaml::Value;

/// All integers in `text`, in order of appearance.
fn numbers(text: &str) -> Vec<i64> {
    Regex::new(r"-?\d+")
        .map(|re| {
            re.find_iter(text)
                .filter_map(|m| m.as_str().parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Trim whitespace and a single layer of surrounding quotes.
pub fn unquote(text: &str) -> &str {
    let trimmed = text.trim();
    for quote in ['"', '\'', '`'] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    trimmed
}

/// The body of the first fenced code block, minus a `yaml` language tag.
pub fn fenced_block(text: &str) -> Option<&str> {
    let mut parts = text.split("```");
    parts.next()?;
    let block = parts.next()?;
    let block = block
        .strip_prefix("yaml")
        .or_else(|| block.strip_prefix("YAML"))
        .or_else(|| block.strip_prefix("yml"))
        .unwrap_or(block);
    Some(block.trim())
}

fn first_word(text: &str) -> Option<String> {
    unquote(text)
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .map(str::to_lowercase)
}

/// Whether the answer opens with a refusal ("none", "no", ...).
fn opens_negative(text: &str) -> bool {
    matches!(
        first_word(text).as_deref(),
        Some("no" | "none" | "neither" | "nothing" | "false" | "n")
    )
}

/// Read a yes/no verdict from the first word of the answer.
pub fn parse_yes_no(text: &str) -> Option<bool> {
    match first_word(text)?.as_str() {
        "yes" | "true" | "y" => Some(true),
        "no" | "false" | "n" => Some(false),
        _ => None,
    }
}

/// Read a conversation index. A "new conversation" verdict, an explicit
/// `-1` or a leading refusal all mean `-1`, whatever other numbers follow.
pub fn parse_conversation_index(text: &str) -> Option<i64> {
    let found = numbers(text);
    let lowered = text.to_lowercase();
    if found.contains(&-1)
        || lowered.contains("new conversation")
        || first_word(text).as_deref() == Some("new")
        || opens_negative(text)
    {
        return Some(-1);
    }
    found.first().copied()
}

/// The first two numbers of the answer, if both are non-negative and the
/// answer does not open with a refusal.
pub fn parse_pair(text: &str) -> Option<(usize, usize)> {
    if opens_negative(text) {
        return None;
    }
    let found = numbers(text);
    if found.len() < 2 {
        return None;
    }
    let a = usize::try_from(found[0]).ok()?;
    let b = usize::try_from(found[1]).ok()?;
    Some((a, b))
}

/// Parse `role: content` lines into messages. Lines without a known role
/// label continue the previous message.
pub fn parse_turns(text: &str) -> Vec<Message> {
    let mut turns: Vec<Message> = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("```") {
            continue;
        }
        let labelled = line.split_once(':').and_then(|(label, content)| {
            let label = label.trim_start_matches(['-', ' ']).trim_matches('*');
            Role::parse(label).map(|role| (role, content.trim()))
        });
        match labelled {
            Some((role, content)) => turns.push(Message {
                role,
                content: content.to_string(),
            }),
            None => {
                if let Some(last) = turns.last_mut() {
                    last.content.push('\n');
                    last.content.push_str(line);
                }
            }
        }
    }
    turns
}

fn yaml_payload(text: &str) -> Option<Value> {
    let body = fenced_block(text).unwrap_or(text);
    serde_yaml::from_str(body).ok()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A flat YAML mapping of preferences. Anything else yields an empty map.
pub fn parse_preferences(text: &str) -> BTreeMap<String, String> {
    let Some(Value::Mapping(map)) = yaml_payload(text) else {
        return BTreeMap::new();
    };
    map.iter()
        .filter_map(|(k, v)| {
            let key = scalar_to_string(k)?;
            let value = scalar_to_string(v)?;
            (!key.is_empty()).then_some((key, value))
        })
        .collect()
}

/// A YAML list of `{source, query}` maps. Keys are case-insensitive and
/// `name` is accepted for `source`.
pub fn parse_source_queries(text: &str) -> Vec<SourceQuery> {
    let Some(Value::Sequence(items)) = yaml_payload(text) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let Value::Mapping(map) = item else {
                return None;
            };
            let mut source = None;
            let mut query = None;
            for (k, v) in map {
                let key = scalar_to_string(k)?.to_lowercase();
                let value = scalar_to_string(v)?;
                match key.as_str() {
                    "source" | "name" => source = Some(value),
                    "query" => query = Some(strip_site_filter(&value).to_string()),
                    _ => {}
                }
            }
            let (source, query) = (source?, query?);
            (!source.is_empty() && !query.is_empty()).then_some(SourceQuery { source, query })
        })
        .collect()
}

fn strip_site_filter(query: &str) -> &str {
    match query.find("site:") {
        Some(idx) => query[..idx].trim(),
        None => query.trim(),
    }
}

/// The reworded request from a fenced block, or the answer itself.
pub fn parse_rephrased<'a>(text: &'a str, original: &'a str) -> &'a str {
    let candidate = unquote(fenced_block(text).unwrap_or(text));
    if candidate.is_empty() { original } else { candidate }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yes_no_reads_first_word() {
        assert_eq!(parse_yes_no("Yes, because it asks about dogs."), Some(true));
        assert_eq!(parse_yes_no("\"no its on topic\""), Some(false));
        assert_eq!(parse_yes_no("It depends."), None);
        assert_eq!(parse_yes_no(""), None);
    }

    #[test]
    fn index_parsing() {
        assert_eq!(parse_conversation_index("Conversation 2"), Some(2));
        assert_eq!(parse_conversation_index("new conversation"), Some(-1));
        assert_eq!(parse_conversation_index("-1"), Some(-1));
        assert_eq!(parse_conversation_index("The one about cats."), None);
    }

    #[test]
    fn index_new_conversation_verdict_wins_over_numbers() {
        assert_eq!(parse_conversation_index("New conversation, not 0 or 1"), Some(-1));
        assert_eq!(parse_conversation_index("None of 0, 1 or 2 fit."), Some(-1));
        assert_eq!(parse_conversation_index("2, or maybe -1"), Some(-1));
        assert_eq!(parse_conversation_index("1. It continues the cats topic."), Some(1));
    }

    #[test]
    fn pair_parsing() {
        assert_eq!(parse_pair("Conversations 2 and 4 are similar, and 7 and 3 too."), Some((2, 4)));
        assert_eq!(parse_pair("Only 3 looks related."), None);
        assert_eq!(parse_pair("None of them."), None);
        assert_eq!(parse_pair("-1 and 2"), None);
    }

    #[test]
    fn pair_refusal_mentioning_indices_is_no_pair() {
        assert_eq!(parse_pair("None. Conversations 0 and 1 discuss unrelated topics."), None);
        assert_eq!(parse_pair("No, 2 and 3 only share a word."), None);
        assert_eq!(parse_pair("Neither: 0 is cooking, 1 is tax law."), None);
        assert_eq!(parse_pair("0 and 1: both about cats."), Some((0, 1)));
    }

    #[test]
    fn turns_parsing_keeps_colons_in_content() {
        let text = "Here you go:\nuser: what time is it?\n**Assistant**: It is 10:30.\nStill the assistant.\nsystem: note";
        let turns = parse_turns(text);
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0], Message::user("what time is it?"));
        assert_eq!(turns[1].role, Role::Assistant);
        assert_eq!(turns[1].content, "It is 10:30.\nStill the assistant.");
        assert_eq!(turns[2], Message::system("note"));
    }

    #[test]
    fn turns_parsing_without_roles_is_empty() {
        assert!(parse_turns("I could not merge these.").is_empty());
    }

    #[test]
    fn preferences_from_fenced_yaml() {
        let text = "Sure:\n```yaml\n\"My name\": \"Sir\"\nbirth year: 1990\n```";
        let prefs = parse_preferences(text);
        assert_eq!(prefs.get("My name").map(String::as_str), Some("Sir"));
        assert_eq!(prefs.get("birth year").map(String::as_str), Some("1990"));
    }

    #[test]
    fn preferences_garbage_is_empty() {
        assert!(parse_preferences("I can't do that").is_empty());
        assert!(parse_preferences("```yaml\n- a\n- b\n```").is_empty());
    }

    #[test]
    fn source_queries_from_yaml_list() {
        let text = "```yaml\n- NAME: wikipedia\n  QUERY: Alan Turing site:wikipedia.org\n- source: calculator\n  query: 2 + 2\n- source: nowhere\n```";
        let queries = parse_source_queries(text);
        assert_eq!(
            queries,
            vec![
                SourceQuery {
                    source: "wikipedia".into(),
                    query: "Alan Turing".into()
                },
                SourceQuery {
                    source: "calculator".into(),
                    query: "2 + 2".into()
                },
            ]
        );
    }

    #[test]
    fn source_queries_none_answer() {
        assert!(parse_source_queries("none").is_empty());
        assert!(parse_source_queries("```yaml\n[]\n```").is_empty());
    }

    #[test]
    fn rephrased_prefers_fenced_block() {
        assert_eq!(
            parse_rephrased("```yaml\nDid Queen Elizabeth die?\n```", "orig"),
            "Did Queen Elizabeth die?"
        );
        assert_eq!(parse_rephrased("  \"What about dogs?\" ", "orig"), "What about dogs?");
        assert_eq!(parse_rephrased("``````", "orig"), "orig");
    }

    #[test]
    fn unquote_single_layer() {
        assert_eq!(unquote("\"'nested'\""), "'nested'");
        assert_eq!(unquote("plain"), "plain");
    }
}
