/// Computer-use prompt. `{action_spaces}`, `{language}` and `{instruction}`
/// are substituted by [`render_system_prompt`].
pub const COMPUTER_USE_TEMPLATE: &str = "\
You are a GUI agent. You are given a task and your action history, with screenshots. \
You need to perform the next action to complete the task.

## Output Format
```
Thought: ...
Action: ...
```

## Action Space
{action_spaces}

## Note
- Use {language} in `Thought` part.
- Write a small plan and finally summarize your next action (with its target element) in one sentence in `Thought` part.

## User Instruction
{instruction}
";

pub fn render_system_prompt(template: &str, action_spaces: &[String], language: &str, instruction: &str) -> String {
    template
        .replace("{action_spaces}", &action_spaces.join("\n"))
        .replace("{language}", language)
        .replace("{instruction}", instruction)
}
