mod common;

use barry_lib::agent_engine::state::{DONE, FAIL};
use common::{agent, agent_config, observation, Experts, FixedBackend};

#[tokio::test]
async fn completed_task_yields_done_and_stays_done() {
    let experts = Experts::new();
    let backend = FixedBackend::new();
    let mut barry = agent(&experts, agent_config(), backend.clone());

    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    let first = barry.predict("Open a terminal", &observation()).await;
    assert_eq!(first.commands, vec!["pyautogui.hotkey('ctrl', 'alt', 't')"]);
    assert_eq!(barry.last_trace(), ["start", "planning", "decompose", "execute", "continue"]);
    assert!(!barry.episode_state().is_first_step);

    experts.judge(true);
    experts.plan("yes");
    let second = barry.predict("Open a terminal", &observation()).await;
    assert_eq!(second.commands, vec![DONE]);
    assert!(barry.episode_state().done);
    assert!(barry.is_finished());
    assert_eq!(barry.completed_subtasks(), ["Open the terminal"]);
    assert!(experts.nothing_left());

    let calls = experts.planning.call_count() + experts.action.call_count() + experts.reflection.call_count();
    let third = barry.predict("Open a terminal", &observation()).await;
    assert!(third.is_done());
    let after = experts.planning.call_count() + experts.action.call_count() + experts.reflection.call_count();
    assert_eq!(calls, after);
}

#[tokio::test]
async fn text_editor_scenario_replans_after_clean_subtask() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Open a text editor and type 'hello'";

    experts.plan("Open the text editor; Type the text");
    experts.plan("Open the text editor");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 'e')");
    let first = barry.predict(task, &observation()).await;
    assert_eq!(first.commands, vec!["pyautogui.hotkey('ctrl', 'alt', 'e')"]);
    assert_eq!(barry.instruction_list(), ["Open the text editor"]);

    experts.judge(true);
    experts.plan("no");
    experts.action.push_reply("Opened the text editor with a keyboard shortcut.");
    experts.plan("Type the text");
    experts.plan("Click the editor area and type 'hello'");
    experts.act("pyautogui.typewrite('hello')");
    let second = barry.predict(task, &observation()).await;

    assert_eq!(second.commands, vec!["pyautogui.typewrite('hello')"]);
    assert_eq!(barry.current_subtask(), Some("Type the text"));
    assert_eq!(barry.completed_subtasks(), ["Open the text editor"]);
    assert_eq!(barry.instruction_list(), ["Click the editor area and type 'hello'"]);
    assert_eq!(barry.cursor(), 0);
    assert_eq!(
        barry.last_trace(),
        ["reflect", "accept", "replanning", "decompose", "execute", "continue"]
    );

    // The replan request carries the completed prefix and the action recap.
    let replan_request = experts.planning.requests()[3].last().unwrap().text();
    assert!(replan_request.contains("Completed subtasks (keep them, do not repeat them): Open the text editor"));
    assert!(replan_request.contains("Opened the text editor with a keyboard shortcut."));
    assert!(replan_request.contains("finished successfully"));
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn unparseable_action_reply_is_patched_as_minor_failure() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());

    experts.plan("Save the file");
    experts.plan("Press ctrl+s; Click Save in the dialog");
    experts.action.push_reply("I see the editor.");
    experts.action.push_reply("I think pressing ctrl and s would work");
    experts
        .reflection
        .push_reply("RESPONSE: Minor: no command was given. Fix: press ctrl+s");
    experts.reflection.push_reply("RESPONSE: Press ctrl+s");
    experts.act("pyautogui.hotkey('ctrl', 's')");

    let prediction = barry.predict("Save the document", &observation()).await;
    assert_eq!(prediction.commands, vec!["pyautogui.hotkey('ctrl', 's')"]);
    assert_eq!(barry.instruction_list().len(), 2);
    assert_eq!(barry.cursor(), 0);
    assert_eq!(barry.current_instruction(), "Press ctrl+s");
    assert_eq!(barry.episode_state().retry_count_for_current_minor_error, 1);
    assert_eq!(
        barry.last_trace(),
        ["start", "planning", "decompose", "execute", "reflect", "escalate_minor", "execute", "continue"]
    );

    // The retry sees the diagnosis as feedback.
    let retry_prompt = experts.action.requests()[2].last().unwrap().text();
    assert!(retry_prompt.contains("no command was given"));
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn third_minor_failure_escalates_to_replanning() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Save the document";

    experts.plan("Save the file");
    experts.plan("Click Save");
    experts.act("pyautogui.click(100, 100)");
    barry.predict(task, &observation()).await;

    for streak in 1..=2 {
        experts.judge(false);
        experts.reflection.push_reply("RESPONSE: Minor: clicked next to the button");
        experts.reflection.push_reply("RESPONSE: Click the Save button");
        experts.act("pyautogui.click(110, 100)");
        let p = barry.predict(task, &observation()).await;
        assert_eq!(p.commands, vec!["pyautogui.click(110, 100)"]);
        assert_eq!(barry.episode_state().retry_count_for_current_minor_error, streak);
        assert_eq!(barry.instruction_list(), ["Click Save"]);
    }

    experts.judge(false);
    experts.reflection.push_reply("RESPONSE: Minor: clicked next to the button again");
    experts.error.push_reply("RESPONSE: Use the keyboard shortcut instead of the button.");
    experts.action.push_reply("Clicked near Save three times without effect.");
    experts.plan("Save with the keyboard");
    experts.plan("Press ctrl+s");
    experts.act("pyautogui.hotkey('ctrl', 's')");
    let p = barry.predict(task, &observation()).await;

    assert_eq!(p.commands, vec!["pyautogui.hotkey('ctrl', 's')"]);
    assert_eq!(
        barry.last_trace(),
        ["reflect", "escalate_major", "replanning", "decompose", "execute", "continue"]
    );
    assert_eq!(barry.episode_state().retry_count_for_current_minor_error, 0);
    assert_eq!(barry.instruction_list(), ["Press ctrl+s"]);
    assert!(barry.completed_subtasks().is_empty());

    let replan_request = experts.planning.requests()[2].last().unwrap().text();
    assert!(replan_request.contains("minor fixes failed 3 times in a row"));
    assert!(replan_request.contains("Use the keyboard shortcut instead of the button."));
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn step_past_budget_fails_regardless_of_state() {
    let experts = Experts::new();
    let mut config = agent_config();
    config.max_trajectory_length = 25;
    let mut barry = agent(&experts, config, FixedBackend::new());

    let instructions: Vec<String> = (0..30).map(|i| format!("Press key {i}")).collect();
    experts.plan("Press every key");
    experts.plan(&instructions.join("; "));
    experts.act("pyautogui.press('a')");
    assert_eq!(barry.predict("press keys", &observation()).await.commands, vec!["pyautogui.press('a')"]);

    for step in 2..=25 {
        experts.judge(true);
        experts.act("pyautogui.press('a')");
        let p = barry.predict("press keys", &observation()).await;
        assert!(!p.is_fail(), "step {step} failed");
        assert!(barry.cursor() < barry.instruction_list().len());
    }
    assert_eq!(barry.cursor(), 24);
    assert!(experts.nothing_left());

    let p = barry.predict("press keys", &observation()).await;
    assert_eq!(p.commands, vec![FAIL]);
    assert_eq!(barry.episode_state().step_count, 26);
    assert!(barry.predict("press keys", &observation()).await.is_fail());
}

#[tokio::test]
async fn perception_failure_fails_only_the_step() {
    let experts = Experts::new();
    let backend = FixedBackend::new();
    let mut barry = agent(&experts, agent_config(), backend.clone());

    backend.fail_next("connection refused");
    let p = barry.predict("Open a terminal", &observation()).await;
    assert!(p.is_fail());
    assert!(p.message.contains("perception unavailable"));
    assert!(!barry.is_finished());
    assert!(barry.episode_state().is_first_step);
    assert_eq!(experts.planning.call_count(), 0);

    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    let p = barry.predict("Open a terminal", &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.hotkey('ctrl', 'alt', 't')"]);
    assert_eq!(barry.episode_state().step_count, 2);
    assert_eq!(backend.calls(), 2);
}

#[tokio::test]
async fn planning_protocol_violations_fail_the_step_then_resume() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());

    experts.planning.push_reply("I would open the terminal first.");
    experts.planning.push_reply("Open the terminal, then type.");
    experts.planning.push_reply("Still no marker.");
    let p = barry.predict("Open a terminal", &observation()).await;
    assert!(p.is_fail());
    assert_eq!(experts.planning.call_count(), 3);
    assert!(!barry.episode_state().done);
    assert!(!barry.is_finished());

    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    let p = barry.predict("Open a terminal", &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.hotkey('ctrl', 'alt', 't')"]);
    assert_eq!(barry.last_trace()[0], "planning");
}

#[tokio::test]
async fn attempts_per_step_are_capped() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());

    experts.plan("Walk through the wizard");
    experts.plan("Step one; Step two; Step three; Step four; Step five");
    for _ in 0..4 {
        experts.act("FINISH");
    }
    let p = barry.predict("finish the wizard", &observation()).await;
    assert!(p.is_fail());
    assert_eq!(barry.cursor(), 4);
    assert_eq!(barry.current_instruction(), "Step five");

    experts.act("pyautogui.press('enter')");
    let p = barry.predict("finish the wizard", &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.press('enter')"]);
    assert_eq!(barry.last_trace(), ["execute", "continue"]);
}

#[tokio::test]
async fn task_is_fixed_for_the_episode_until_reset() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());

    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    barry.predict("Open a terminal", &observation()).await;

    experts.judge(true);
    experts.plan("yes");
    assert!(barry.predict("Browse the web", &observation()).await.is_done());
    assert_eq!(barry.task(), Some("Open a terminal"));

    barry.reset();
    assert_eq!(barry.episode_state().step_count, 0);
    assert!(barry.instruction_list().is_empty());

    experts.plan("Open the browser");
    experts.plan("Click the browser icon");
    experts.act("pyautogui.click(40, 300)");
    let p = barry.predict("Browse the web", &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.click(40, 300)"]);
    assert_eq!(barry.task(), Some("Browse the web"));
    assert!(barry.completed_subtasks().is_empty());
}

#[tokio::test]
async fn action_error_marker_goes_straight_to_classification() {
    let experts = Experts::new();
    let mut config = agent_config();
    config.use_error_expert = false;
    let mut barry = agent(&experts, config, FixedBackend::new());

    experts.plan("Open settings");
    experts.plan("Click the gear icon");
    experts.act("ERROR: no gear icon on this screen");
    experts.reflection.push_reply("RESPONSE: Major: settings are not reachable from here");
    experts.plan("Open settings from the app menu");
    experts.plan("Click the app menu");
    experts.act("pyautogui.click(20, 20)");

    let p = barry.predict("Change the wallpaper", &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.click(20, 20)"]);
    assert_eq!(
        barry.last_trace(),
        [
            "start",
            "planning",
            "decompose",
            "execute",
            "reflect",
            "escalate_major",
            "replanning",
            "decompose",
            "execute",
            "continue"
        ]
    );
    // Nothing had been executed, so no recap was requested.
    assert_eq!(experts.action.call_count(), 4);
    let classify = experts.reflection.requests()[0].last().unwrap().text();
    assert!(classify.contains("no gear icon on this screen"));
    assert_eq!(experts.error.call_count(), 0);
}

#[tokio::test]
async fn finished_patch_retries_the_unconfirmed_instruction() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Save the report";

    experts.plan("Name the report");
    experts.plan("Type 'report' in the name field; Press enter");
    experts.act("pyautogui.typewrite('report')");
    barry.predict(task, &observation()).await;

    experts.judge(false);
    experts
        .reflection
        .push_reply("RESPONSE: Minor: the text went to the search box. Fix: click the name field");
    experts.reflection.push_reply("RESPONSE: Click the name field");
    experts.act("FINISH");
    experts.act("pyautogui.typewrite('report')");
    let p = barry.predict(task, &observation()).await;

    assert_eq!(p.commands, vec!["pyautogui.typewrite('report')"]);
    assert_eq!(barry.last_trace(), ["reflect", "escalate_minor", "execute", "execute", "continue"]);
    assert_eq!(barry.cursor(), 0);
    assert_eq!(barry.current_instruction(), "Type 'report' in the name field");
    let retry_prompt = experts.action.requests()[4].last().unwrap().text();
    assert!(retry_prompt.contains("Instruction: Type 'report' in the name field"));
    assert!(retry_prompt.contains("the text went to the search box"));

    experts.judge(true);
    experts.act("pyautogui.press('enter')");
    let p = barry.predict(task, &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.press('enter')"]);
    assert_eq!(barry.cursor(), 1);
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn finish_on_unconfirmed_instruction_is_judged_again() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Save the report";

    experts.plan("Name the report");
    experts.plan("Type 'report' in the name field; Press enter");
    experts.act("pyautogui.typewrite('report')");
    barry.predict(task, &observation()).await;

    experts.judge(false);
    experts
        .reflection
        .push_reply("RESPONSE: Minor: the field was still loading. Fix: wait for the field");
    experts.reflection.push_reply("RESPONSE: Wait for the name field");
    experts.act("FINISH");
    experts.act("FINISH");
    experts.judge(true);
    experts.act("pyautogui.press('enter')");
    let p = barry.predict(task, &observation()).await;

    assert_eq!(p.commands, vec!["pyautogui.press('enter')"]);
    assert_eq!(
        barry.last_trace(),
        ["reflect", "escalate_minor", "execute", "execute", "reflect", "accept", "execute", "continue"]
    );
    assert_eq!(barry.cursor(), 1);
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn major_verdict_discards_remaining_instructions() {
    let experts = Experts::new();
    let mut config = agent_config();
    config.use_error_expert = false;
    let mut barry = agent(&experts, config, FixedBackend::new());
    let task = "Export the document as PDF";

    experts.plan("Export through the File menu");
    experts.plan("Open the File menu; Click Export; Choose PDF");
    experts.act("pyautogui.click(20, 10)");
    barry.predict(task, &observation()).await;

    experts.judge(true);
    experts.act("pyautogui.click(40, 120)");
    barry.predict(task, &observation()).await;
    assert_eq!(barry.cursor(), 1);

    experts.judge(false);
    experts
        .reflection
        .push_reply("RESPONSE: Major: the menu has no Export entry in this application");
    experts.action.push_reply("Opened the File menu and clicked where Export should be.");
    experts.plan("Export through the Share menu");
    experts.plan("Open the Share menu; Click Export as PDF");
    experts.act("pyautogui.click(80, 10)");
    let p = barry.predict(task, &observation()).await;

    assert_eq!(p.commands, vec!["pyautogui.click(80, 10)"]);
    assert_eq!(
        barry.last_trace(),
        ["reflect", "escalate_major", "replanning", "decompose", "execute", "continue"]
    );
    assert_eq!(barry.instruction_list(), ["Open the Share menu", "Click Export as PDF"]);
    assert_eq!(barry.cursor(), 0);
    assert_eq!(barry.current_subtask(), Some("Export through the Share menu"));
    assert!(barry.completed_subtasks().is_empty());
    let replan_request = experts.planning.requests()[2].last().unwrap().text();
    assert!(replan_request.contains("the menu has no Export entry"));
    assert!(experts.nothing_left());
}

#[tokio::test]
async fn failing_error_expert_still_replans_on_the_diagnosis() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Open the settings";

    experts.plan("Open settings");
    experts.plan("Click the gear icon");
    experts.act("pyautogui.click(1900, 10)");
    barry.predict(task, &observation()).await;

    // No reply queued for the error expert: its call fails.
    experts.judge(false);
    experts.reflection.push_reply("RESPONSE: Major: a different window is in front");
    experts.action.push_reply("Clicked the top-right corner.");
    experts.plan("Bring the settings window forward");
    experts.plan("Press alt+tab");
    experts.act("pyautogui.hotkey('alt', 'tab')");
    let p = barry.predict(task, &observation()).await;

    assert_eq!(p.commands, vec!["pyautogui.hotkey('alt', 'tab')"]);
    assert_eq!(experts.error.call_count(), 1);
    let replan_request = experts.planning.requests()[2].last().unwrap().text();
    assert!(replan_request.contains("a different window is in front"));
    assert!(!replan_request.contains("Suggested approach"));
    assert!(!barry.episode_state().done);
}

#[tokio::test]
async fn oracle_error_fails_the_episode_until_reset() {
    let experts = Experts::new();
    let mut barry = agent(&experts, agent_config(), FixedBackend::new());
    let task = "Open a terminal";

    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    barry.predict(task, &observation()).await;

    // The reflection oracle has nothing to answer with.
    let p = barry.predict(task, &observation()).await;
    assert_eq!(p.commands, vec![FAIL]);
    assert!(p.message.contains("episode failed"));
    assert_eq!(barry.last_trace(), ["reflect", "failed"]);
    assert!(barry.is_finished());

    experts.judge(true);
    let calls = experts.reflection.call_count();
    assert!(barry.predict(task, &observation()).await.is_fail());
    assert_eq!(experts.reflection.call_count(), calls);
    assert_eq!(experts.reflection.remaining(), 2);

    barry.reset();
    assert!(!barry.is_finished());
    experts.plan("Open the terminal");
    experts.plan("Press ctrl+alt+t");
    experts.act("pyautogui.hotkey('ctrl', 'alt', 't')");
    let p = barry.predict(task, &observation()).await;
    assert_eq!(p.commands, vec!["pyautogui.hotkey('ctrl', 'alt', 't')"]);
}
