#![allow(dead_code)]

use std::collections::VecDeque;
use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine as _;

use barry_lib::agent_engine::engine::{BarryAgent, ExpertClients};
use barry_lib::agent_engine::state::Observation;
use barry_lib::config::{AgentConfig, HistoryConfig};
use barry_lib::errors::{BarryError, BarryResult};
use barry_lib::llm::conversation::RoleClient;
use barry_lib::llm::providers::scripted::ScriptedProvider;
use barry_lib::llm::registry::ExpertRole;
use barry_lib::llm::types::CallConfig;
use barry_lib::perception::traits::{ParsedScreen, PerceptionBackend, RawRegion};

pub const WIDTH: u32 = 1920;
pub const HEIGHT: u32 = 1080;

pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut out = Vec::new();
    image::DynamicImage::new_rgb8(width, height)
        .write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
        .unwrap();
    out
}

pub fn observation() -> Observation {
    Observation::new(png(WIDTH, HEIGHT))
}

/// Perception backend answering from memory. Queued failures are served
/// first, then the same parsed screen every time.
pub struct FixedBackend {
    failures: Mutex<VecDeque<BarryError>>,
    calls: Mutex<usize>,
}

impl FixedBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            failures: Mutex::new(VecDeque::new()),
            calls: Mutex::new(0),
        })
    }

    pub fn fail_next(&self, reason: &str) {
        self.failures
            .lock()
            .unwrap()
            .push_back(BarryError::PerceptionUnavailable(reason.into()));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl PerceptionBackend for FixedBackend {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn parse(&self, _image_base64: &str) -> BarryResult<ParsedScreen> {
        *self.calls.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        Ok(ParsedScreen {
            annotated_image: Some(base64::engine::general_purpose::STANDARD.encode(png(16, 16))),
            regions: Some(vec![
                RawRegion {
                    kind: "icon".into(),
                    content: Some("Terminal".into()),
                    interactivity: Some(true),
                    bbox: vec![0.0, 0.1, 0.05, 0.15],
                },
                RawRegion {
                    kind: "text".into(),
                    content: Some("Activities".into()),
                    interactivity: Some(false),
                    bbox: vec![0.0, 0.0, 0.06, 0.02],
                },
            ]),
        })
    }
}

/// One scripted oracle per expert role.
pub struct Experts {
    pub planning: Arc<ScriptedProvider>,
    pub action: Arc<ScriptedProvider>,
    pub reflection: Arc<ScriptedProvider>,
    pub error: Arc<ScriptedProvider>,
}

impl Experts {
    pub fn new() -> Self {
        Self {
            planning: Arc::new(ScriptedProvider::new("planning")),
            action: Arc::new(ScriptedProvider::new("action")),
            reflection: Arc::new(ScriptedProvider::new("reflection")),
            error: Arc::new(ScriptedProvider::new("error")),
        }
    }

    fn client(role: ExpertRole, provider: &Arc<ScriptedProvider>) -> RoleClient {
        RoleClient::new(
            role,
            provider.clone(),
            CallConfig {
                model: format!("{}-model", role.as_str()),
                stream: false,
                temperature: 0.0,
            },
        )
    }

    pub fn clients(&self, with_error_expert: bool) -> ExpertClients {
        ExpertClients {
            planning: Self::client(ExpertRole::Planning, &self.planning),
            action: Self::client(ExpertRole::Action, &self.action),
            reflection: Self::client(ExpertRole::Reflection, &self.reflection),
            error: with_error_expert.then(|| Self::client(ExpertRole::Error, &self.error)),
        }
    }

    /// Queue one action execution: a free-form look, then the decision.
    pub fn act(&self, decision: &str) {
        self.action.push_reply("The relevant control is visible.");
        self.action.push_reply(format!("RESPONSE: {decision}"));
    }

    /// Queue one evaluation: expectation, then the yes/no judgement.
    pub fn judge(&self, success: bool) {
        self.reflection.push_reply("Expected state described.");
        self.reflection
            .push_reply(if success { "RESPONSE: yes" } else { "RESPONSE: no" });
    }

    pub fn plan(&self, reply: &str) {
        self.planning.push_reply(format!("RESPONSE: {reply}"));
    }

    pub fn nothing_left(&self) -> bool {
        self.planning.remaining() == 0
            && self.action.remaining() == 0
            && self.reflection.remaining() == 0
            && self.error.remaining() == 0
    }
}

pub fn agent_config() -> AgentConfig {
    AgentConfig::default()
}

pub fn no_history() -> HistoryConfig {
    HistoryConfig {
        enabled: false,
        dir: None,
    }
}

pub fn agent(experts: &Experts, config: AgentConfig, backend: Arc<FixedBackend>) -> BarryAgent {
    let with_error_expert = config.use_error_expert;
    BarryAgent::new(config, no_history(), experts.clients(with_error_expert), backend)
}
