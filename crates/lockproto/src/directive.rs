//! Directives sent from the orchestrator to controllers.

use serde::{Deserialize, Serialize};

/// A directive the orchestrator delivers to one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Directive {
    /// Begin (or continue with) the next burst.
    Go,
    /// Finish in-flight writes and exit cleanly.
    Stop,
}

impl Directive {
    pub fn as_str(&self) -> &'static str {
        match self {
            Directive::Go => "go",
            Directive::Stop => "stop",
        }
    }
}

impl std::fmt::Display for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_snake_case() {
        assert_eq!(serde_json::to_string(&Directive::Go).unwrap(), "\"go\"");
        assert_eq!(Directive::Stop.to_string(), "stop");
    }
}
