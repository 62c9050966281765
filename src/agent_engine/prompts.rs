//! Prompt text for the four experts.
//!
//! Every prompt that expects a decision ends with the answer format on a
//! `RESPONSE:` line; the decoders in `llm::protocol` rely on it.

use crate::llm::protocol::ProtocolError;

pub const PLANNING_SYSTEM: &str = "\
You are the planning expert of a desktop automation agent working on an Ubuntu machine. \
You split a user's task into subtasks and subtasks into low-level instructions that another \
expert will execute one at a time on the screen. Only plan what can be verified from the \
current screenshot; never look more than one subtask ahead in detail. \
Think step by step, then give your answer on a final line that starts with `RESPONSE:`.";

pub const ACTION_SYSTEM: &str = "\
You are the action expert of a desktop automation agent. You receive one instruction, the \
current screenshot, the same screenshot with numbered boxes around candidate regions, and a \
list describing those regions. You translate the instruction into exactly one pyautogui \
command using absolute pixel coordinates of the screenshot.";

pub const REFLECTION_SYSTEM: &str = "\
You are the reflection expert of a desktop automation agent. After each action you look at \
the new screenshot and decide whether the instruction achieved its intended effect. Judge by \
the presence or absence of the state the instruction meant to create or remove, not by \
whether the action was sent. Trust the screenshot over any claim of success. \
Give your answer on a final line that starts with `RESPONSE:`.";

pub const ERROR_SYSTEM: &str = "\
You are the error expert of a desktop automation agent. A step failed in a way that cannot \
be patched locally. Propose a different way to reach the goal from the current screen.";

fn screen_block(regions: &str, width: u32, height: u32) -> String {
    format!("Screen resolution: {width}x{height}\nDetected regions:\n{regions}")
}

pub fn decompose_task(task: &str, regions: &str, width: u32, height: u32) -> String {
    format!(
        "Task: {task}\n\n{}\n\n\
         Split the task into an ordered list of subtasks, each a self-contained goal \
         (for example \"Open the terminal\", \"Create the folder\"). \
         Answer with the subtasks separated by `;`.\n\
         RESPONSE: <subtask 1>; <subtask 2>; ...",
        screen_block(regions, width, height)
    )
}

pub fn is_task_done(task: &str, completed: &[String], just_finished: &str, regions: &str) -> String {
    format!(
        "Task: {task}\nCompleted subtasks: {}\nSubtask just finished: {just_finished}\n\
         Detected regions:\n{regions}\n\n\
         Looking at the current screen, is the whole task finished, so that no further \
         subtask is required?\nRESPONSE: yes | no",
        join_or_none(completed)
    )
}

pub fn replan(task: &str, completed: &[String], progress: &str, feedback: &str, regions: &str) -> String {
    let reason = if feedback.trim().is_empty() {
        "The previous subtask finished successfully.".to_string()
    } else {
        format!("The previous subtask failed and cannot be repaired locally:\n{feedback}")
    };
    let progress = if progress.trim().is_empty() { "(none)" } else { progress.trim() };
    format!(
        "Task: {task}\nCompleted subtasks (keep them, do not repeat them): {}\n\
         Recap of executed actions: {progress}\n{reason}\n\nDetected regions:\n{regions}\n\n\
         Plan the REMAINING subtasks from the current screen. Do not repeat the exact \
         approach that just failed. Answer with the remaining subtasks separated by `;`.\n\
         RESPONSE: <subtask 1>; <subtask 2>; ...",
        join_or_none(completed)
    )
}

pub fn decompose_subtask(task: &str, subtask: &str, regions: &str, width: u32, height: u32) -> String {
    format!(
        "Task: {task}\nCurrent subtask: {subtask}\n\n{}\n\n\
         Split the current subtask into an ordered list of low-level instructions, each one \
         decisive action on the screen (a click, a key combination, typing, a scroll). \
         Rules:\n\
         - Clicking a field, selecting its content and typing into it may be one instruction \
         when they belong together, e.g. \"Click the name field, select all and type 'report'\".\n\
         - Never write a conditional instruction (\"if X then Y\", \"otherwise\", \"when X appears\"). \
         Commit to one action per instruction.\n\
         Answer with the instructions separated by `;`.\n\
         RESPONSE: <instruction 1>; <instruction 2>; ...",
        screen_block(regions, width, height)
    )
}

pub fn action_analysis(
    instruction: &str,
    subtask: &str,
    prior: &[String],
    feedback: &str,
    regions: &str,
    width: u32,
    height: u32,
) -> String {
    let mut prompt = format!(
        "Subtask: {subtask}\nAlready executed for this subtask: {}\nInstruction: {instruction}\n\n{}\n",
        join_or_none(prior),
        screen_block(regions, width, height)
    );
    if !feedback.trim().is_empty() {
        prompt.push_str(&format!(
            "\nThe previous attempt at this instruction failed: {}\n",
            feedback.trim()
        ));
    }
    prompt.push_str(
        "\nThe first image is the screenshot, the second marks the regions listed above. \
         Describe the part of the screen relevant to the instruction, name the region to act \
         on and its pixel center. If the instruction is already satisfied, say so.",
    );
    prompt
}

pub const ACTION_DECISION: &str = "\
Now give exactly one command on the RESPONSE line, one of:\n\
- pyautogui.click(x, y) / pyautogui.doubleClick(x, y) / pyautogui.rightClick(x, y)\n\
- pyautogui.drag(x1, y1, x2, y2)\n\
- pyautogui.typewrite('text') / pyautogui.press('key') / pyautogui.hotkey('key1', 'key2')\n\
- pyautogui.scroll(clicks) / time.sleep(seconds)\n\
- FINISH if the instruction needs no action\n\
- ERROR: <reason> if the instruction cannot be carried out on this screen\n\
RESPONSE: <command>";

pub const ACTION_SUMMARY: &str = "\
Summarize in a few sentences what has been executed so far in this conversation and what \
the screen showed afterwards. Plain text, no commands.";

pub fn reflection_expectation(instruction: &str, last_action: &str, regions: &str) -> String {
    format!(
        "Instruction: {instruction}\nLast action sent: {last_action}\n\
         Detected regions on the new screen:\n{regions}\n\n\
         Describe the state the screen should show if the instruction succeeded, then compare \
         it with the screenshots (plain and annotated)."
    )
}

pub const REFLECTION_JUDGEMENT: &str = "\
Is the expected state present on the current screen?\n\
RESPONSE: yes | no";

pub fn classify_failure(task: &str, instruction: &str, execution_error: Option<&str>, regions: &str) -> String {
    let context = match execution_error {
        Some(reason) => format!("The action expert could not carry out the instruction: {reason}"),
        None => "The instruction did not reach its intended effect.".to_string(),
    };
    format!(
        "Task: {task}\nInstruction: {instruction}\n{context}\nDetected regions:\n{regions}\n\n\
         Classify the failure:\n\
         - Minor: the instruction can still be completed from this screen with one extra \
         corrective action (wrong button clicked but the right one is visible, wrong text typed, \
         a slider over- or undershot, one scroll needed).\n\
         - Major: the instruction cannot be completed from this screen (wrong page, required \
         element absent, an irreversible action was taken).\n\
         Optionally add `Fix: <corrective action>` after a Minor diagnosis.\n\
         RESPONSE: Minor: <diagnosis> | Major: <diagnosis>"
    )
}

pub fn patch_instruction(instruction: &str, diagnosis: &str, fix_hint: Option<&str>) -> String {
    let hint = fix_hint.map(|h| format!("\nSuggested fix: {h}")).unwrap_or_default();
    format!(
        "Instruction that has to be completed: {instruction}\nProblem: {diagnosis}{hint}\n\n\
         Write the single next corrective instruction, one decisive action, no conditionals.\n\
         RESPONSE: <instruction>"
    )
}

pub fn error_advice(task: &str, subtask: &str, diagnosis: &str, regions: &str) -> String {
    format!(
        "Task: {task}\nSubtask: {subtask}\nProblem: {diagnosis}\nDetected regions:\n{regions}\n\n\
         Help me solve this problem: propose a different approach in two or three sentences.\n\
         RESPONSE: <approach>"
    )
}

/// Follow-up sent after a reply that could not be decoded.
pub fn protocol_reminder(err: &ProtocolError) -> String {
    format!(
        "Your answer could not be used ({err}). Reply again and put the answer on a final line \
         that starts with `RESPONSE:` in exactly the requested format."
    )
}

fn join_or_none(items: &[String]) -> String {
    if items.is_empty() {
        "(none)".to_string()
    } else {
        items.join("; ")
    }
}
