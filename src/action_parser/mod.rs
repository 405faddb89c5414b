pub mod coords;
pub mod grammar;
pub mod types;

use thiserror::Error;

pub use types::{ActionInput, ActionInputs, Factors, ParseMode, ParsedAction, UiTarsVersion};

use crate::perception::types::ScreenContext;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("prediction has no `Action:` block terminated by `</Output>`")]
    MissingActionBlock,
}

/// Everything the parser needs besides the prediction text.
#[derive(Debug, Clone, Copy, Default)]
pub struct ParseOptions {
    pub factors: Factors,
    pub screen_context: Option<ScreenContext>,
    pub scale_factor: Option<f64>,
    pub mode: ParseMode,
    pub model_version: UiTarsVersion,
}

/// Parses one prediction into one action per blank-line separated statement.
/// Legacy `<bbox>`/`<point>`/`point=` notations are canonicalized first, and
/// box arguments come out normalized to the unit square, plus absolute
/// pixel midpoints when the screen size is known.
///
/// Statements that are not function calls yield an action with an empty
/// `action_type` and no inputs; only a structurally broken `o1` prediction
/// is an error.
pub fn parse_prediction(prediction: &str, opts: &ParseOptions) -> Result<Vec<ParsedAction>, ParseError> {
    let text = prediction.trim();
    let segment = match opts.mode {
        ParseMode::Bc => grammar::segment_bc(text),
        ParseMode::O1 => grammar::segment_o1(text)?,
    };

    let screen = opts.screen_context.filter(|s| s.width > 0 && s.height > 0);
    let divisors = match screen {
        Some(s) if opts.model_version.uses_smart_resize() => {
            coords::smart_resize(s.height, s.width, coords::SmartResizeParams::default())
                .map(|(w, h)| Factors::new(w, h))
                .unwrap_or(opts.factors)
        }
        _ => opts.factors,
    };

    let thought = segment.thought.unwrap_or_default();
    let actions = segment
        .action
        .split("\n\n")
        .map(|raw| {
            let statement = raw.replace('\n', "\\n");
            let (action_type, action_inputs) = match grammar::parse_function_call(statement.trim_start()) {
                Some(call) => (call.name, build_inputs(call.args, divisors, screen, opts)),
                None => {
                    tracing::debug!(statement = %statement, "action statement is not a function call");
                    (String::new(), ActionInputs::new())
                }
            };
            ParsedAction {
                reflection: segment.reflection.clone(),
                thought: thought.clone(),
                action_type,
                action_inputs,
            }
        })
        .collect();

    Ok(actions)
}

fn build_inputs(
    args: Vec<(String, String)>,
    divisors: Factors,
    screen: Option<ScreenContext>,
    opts: &ParseOptions,
) -> ActionInputs {
    let mut inputs = ActionInputs::new();
    for (name, value) in args {
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        let is_start = name.contains("start_box");
        if !is_start && !name.contains("end_box") {
            inputs.insert(name, ActionInput::Text(value.to_string()));
            continue;
        }

        let normalized = coords::normalize_box(value, divisors);
        inputs.insert(name, ActionInput::Text(coords::format_box(&normalized)));

        if let Some(screen) = screen {
            let key = if is_start { "start_coords" } else { "end_coords" };
            let absolute = coords::absolute_midpoint(
                &normalized,
                screen,
                opts.factors,
                opts.scale_factor.unwrap_or(1.0),
            );
            inputs.insert(key.to_string(), ActionInput::Coords(absolute));
        }
    }
    inputs
}
