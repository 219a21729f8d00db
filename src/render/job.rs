use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::utils::Result;

/// One chat line to draw.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub author: String,
    pub body: String,
}

/// Everything a worker needs to draw one frame. Built fresh per frame and
/// sent to the worker as a single line of JSON.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct RenderJob {
    pub width: u32,
    pub height: u32,
    pub visitors: usize,
    /// Newest first; the worker stacks them upwards from the bottom edge.
    pub instructions: Vec<Instruction>,
}

impl RenderJob {
    /// Build a job from a window of lines kept oldest first.
    pub fn from_window(
        width: u32,
        height: u32,
        visitors: usize,
        window: &VecDeque<Instruction>,
    ) -> Self {
        Self {
            width,
            height,
            visitors,
            instructions: window.iter().rev().cloned().collect(),
        }
    }

    /// The request line written to a worker, terminator included. JSON
    /// escapes control characters, so the line never contains a raw `\n`.
    pub fn to_line(&self) -> Result<Vec<u8>> {
        let mut line = serde_json::to_vec(self)?;
        line.push(b'\n');
        Ok(line)
    }
}
