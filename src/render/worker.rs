//! The worker side of the pool protocol.
//!
//! A worker process reads one JSON job per line from stdin and answers each
//! with exactly one frame on stdout. A job that cannot be decoded or drawn
//! gets an empty frame so the pool stays in step with the stream.

use std::io::{self, BufRead, Write};

use tracing::{debug, warn};

use super::canvas::render_jpeg;
use super::framing::{write_frame, write_rejection};
use super::job::RenderJob;

/// Serve jobs until `input` reaches end of file. Returns the number of
/// images written.
pub fn run<R: BufRead, W: Write>(input: R, mut output: W) -> io::Result<usize> {
    let mut rendered = 0;
    for line in input.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let image = serde_json::from_str::<RenderJob>(&line)
            .map_err(|e| e.to_string())
            .and_then(|job| render_jpeg(&job).map_err(|e| e.to_string()));
        match image {
            Ok(image) => {
                write_frame(&mut output, &image)?;
                rendered += 1;
                debug!(bytes = image.len(), "frame written");
            }
            Err(e) => {
                warn!(error = %e, "job rejected");
                write_rejection(&mut output)?;
            }
        }
    }
    Ok(rendered)
}
