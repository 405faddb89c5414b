use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::action_parser::ParseError;

/// Header and action text extracted from one prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub thought: Option<String>,
    pub reflection: Option<String>,
    pub action: String,
}

#[derive(Debug, Default, PartialEq)]
struct Header {
    thought: Option<String>,
    reflection: Option<String>,
}

/// One `bc` output dialect: the first dialect whose guard accepts the text
/// owns header extraction, even if its pattern then fails to match.
struct BcDialect {
    name: &'static str,
    applies: fn(&str) -> bool,
    extract: fn(&str) -> Header,
}

const BC_DIALECTS: [BcDialect; 3] = [
    BcDialect {
        name: "thought",
        applies: has_thought,
        extract: extract_thought,
    },
    BcDialect {
        name: "reflection",
        applies: starts_with_reflection,
        extract: extract_reflection,
    },
    BcDialect {
        name: "action_summary",
        applies: starts_with_action_summary,
        extract: extract_action_summary,
    },
];

static THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)Thought: (.+?)\s*(?:Action:|\z)").expect("valid regex"));
static REFLECTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)Reflection: (.+?)Action_Summary: (.+?)\s*(?:Action:|\z)").expect("valid regex")
});
static ACTION_SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Action_Summary: (.+?)\s*(?:Action:|$)").expect("valid regex"));

static O1_THOUGHT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<Thought>\s*(.*?)\s*</Thought>").expect("valid regex"));
static O1_SUMMARY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\nAction_Summary:\s*(.*?)\s*Action:").expect("valid regex"));
static O1_ACTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\nAction:\s*(.*?)\s*</Output>").expect("valid regex"));

static BOX_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:bbox|point)>([^<]*)</(?:bbox|point)>").expect("valid regex")
});
static FUNCTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\w+)\((.*)\)$").expect("valid regex"));
static ARG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?:[^,'"]|'[^']*'|"[^"]*")+"#).expect("valid regex"));

fn has_thought(text: &str) -> bool {
    text.contains("Thought:")
}

fn starts_with_reflection(text: &str) -> bool {
    text.starts_with("Reflection:")
}

fn starts_with_action_summary(text: &str) -> bool {
    text.starts_with("Action_Summary:")
}

fn capture(re: &Regex, text: &str, group: usize) -> Option<String> {
    re.captures(text)
        .and_then(|c| c.get(group))
        .map(|m| m.as_str().trim().to_string())
}

fn extract_thought(text: &str) -> Header {
    Header {
        thought: capture(&THOUGHT_RE, text, 1),
        reflection: None,
    }
}

fn extract_reflection(text: &str) -> Header {
    match REFLECTION_RE.captures(text) {
        Some(c) => Header {
            reflection: c.get(1).map(|m| m.as_str().trim().to_string()),
            thought: c.get(2).map(|m| m.as_str().trim().to_string()),
        },
        None => Header::default(),
    }
}

fn extract_action_summary(text: &str) -> Header {
    Header {
        thought: capture(&ACTION_SUMMARY_RE, text, 1),
        reflection: None,
    }
}

/// Splits a `bc` prediction. Text without any `Action:` marker is taken
/// whole as the action string.
pub fn segment_bc(text: &str) -> Segment {
    let header = BC_DIALECTS
        .iter()
        .find(|d| (d.applies)(text))
        .map(|d| {
            tracing::trace!(dialect = d.name, "prediction header dialect");
            (d.extract)(text)
        })
        .unwrap_or_default();

    let action = if text.contains("Action:") {
        text.rsplit("Action: ").next().unwrap_or_default().to_string()
    } else {
        text.to_string()
    };

    Segment {
        thought: header.thought,
        reflection: header.reflection,
        action,
    }
}

/// Splits an `o1` prediction. The action block is mandatory.
pub fn segment_o1(text: &str) -> Result<Segment, ParseError> {
    let thought = capture(&O1_THOUGHT_RE, text, 1).unwrap_or_default();
    let summary = capture(&O1_SUMMARY_RE, text, 1).unwrap_or_default();
    let action = capture(&O1_ACTION_RE, text, 1).ok_or(ParseError::MissingActionBlock)?;

    Ok(Segment {
        thought: Some(format!("{thought}\n<Action_Summary>\n{summary}")),
        reflection: None,
        action,
    })
}

/// `name(key='value', ...)` after canonicalization.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub args: Vec<(String, String)>,
}

/// Rewrites legacy coordinate notations into the `start_box='(x,y)'` form.
pub fn canonicalize(statement: &str) -> String {
    let stripped = statement
        .replace("<|box_start|>", "")
        .replace("<|box_end|>", "")
        .replace("start_point=", "start_box=")
        .replace("end_point=", "end_box=")
        .replace("point=", "start_box=");

    BOX_TAG_RE
        .replace_all(&stripped, |c: &Captures<'_>| {
            let body: Vec<&str> = c[1].split_whitespace().collect();
            format!("({})", body.join(","))
        })
        .into_owned()
}

pub fn parse_function_call(statement: &str) -> Option<FunctionCall> {
    let canonical = canonicalize(statement);
    let caps = FUNCTION_RE.captures(canonical.trim())?;
    let name = caps[1].to_string();
    let args_str = caps.get(2).map_or("", |m| m.as_str());

    let mut args = Vec::new();
    if !args_str.trim().is_empty() {
        for pair in ARG_RE.find_iter(args_str) {
            let (key, value) = pair.as_str().split_once('=').unwrap_or((pair.as_str(), ""));
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            args.push((key.to_string(), strip_quotes(value.trim()).to_string()));
        }
    }

    Some(FunctionCall { name, args })
}

fn strip_quotes(value: &str) -> &str {
    let value = value.strip_prefix(['\'', '"']).unwrap_or(value);
    value.strip_suffix(['\'', '"']).unwrap_or(value)
}
