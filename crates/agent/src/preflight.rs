//! Startup checks for the external probe programs

use tracing::{debug, warn};
use which::which;

/// Programs from `tools` that cannot be found on `PATH`
pub fn missing_tools(tools: &[&str]) -> Vec<String> {
    tools
        .iter()
        .filter_map(|tool| match which(tool) {
            Ok(path) => {
                debug!(tool = %tool, path = %path.display(), "Found probe tool");
                None
            }
            Err(_) => {
                warn!(tool = %tool, "Probe tool not found, its tasks will record failures");
                Some(tool.to_string())
            }
        })
        .collect()
}
