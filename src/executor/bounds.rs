// Screen-bounds interceptor applied to every command before it leaves the agent.
use crate::executor::command::Command;
use crate::llm::protocol::ProtocolError;

/// Reject commands that point outside a `width`x`height` screen.
pub fn check_bounds(command: &Command, width: u32, height: u32) -> Result<(), ProtocolError> {
    let inside = |(x, y): (i32, i32)| x >= 0 && y >= 0 && (x as i64) < width as i64 && (y as i64) < height as i64;
    if command.points().into_iter().all(inside) {
        Ok(())
    } else {
        Err(ProtocolError::OutOfBounds {
            command: command.render(),
            width,
            height,
        })
    }
}
