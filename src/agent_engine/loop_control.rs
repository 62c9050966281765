// Step budget for one episode.

pub struct LoopController {
    max_steps: u32,
    steps: u32,
}

impl LoopController {
    pub fn new(max_steps: u32) -> Self {
        Self { max_steps, steps: 0 }
    }

    /// Count a new step. Returns false once the ceiling has been passed.
    pub fn begin_step(&mut self) -> bool {
        self.steps = self.steps.saturating_add(1);
        self.steps <= self.max_steps
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn max_steps(&self) -> u32 {
        self.max_steps
    }
}
