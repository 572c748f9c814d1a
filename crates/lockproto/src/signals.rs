//! OS signal mapping for the orchestrator → controller directives.
//!
//! GO and STOP reach a controller as signals on its own handlers. READY
//! travels the other way over the ready socket (see [`crate::ready`]), so it
//! has no signal here.

use nix::sys::signal::Signal;
use thiserror::Error;

use crate::Directive;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignalPlanError {
    #[error("Unknown signal name: {0}")]
    UnknownSignal(String),

    #[error("GO and STOP must use distinct signals (both are {0})")]
    SharedGoStop(&'static str),

    #[error("{0} cannot be caught and is not usable as a protocol signal")]
    Uncatchable(&'static str),
}

/// Which signal carries each protocol message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalPlan {
    /// Orchestrator → controller begin/continue.
    pub go: Signal,
    /// Orchestrator → controller clean shutdown.
    pub stop: Signal,
}

impl Default for SignalPlan {
    fn default() -> Self {
        Self {
            go: Signal::SIGUSR2,
            stop: Signal::SIGTERM,
        }
    }
}

impl SignalPlan {
    /// Build a plan from signal names such as `"SIGUSR1"`.
    pub fn from_names(go: &str, stop: &str) -> Result<Self, SignalPlanError> {
        let plan = Self {
            go: parse_signal(go)?,
            stop: parse_signal(stop)?,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn validate(&self) -> Result<(), SignalPlanError> {
        for sig in [self.go, self.stop] {
            if matches!(sig, Signal::SIGKILL | Signal::SIGSTOP) {
                return Err(SignalPlanError::Uncatchable(sig.as_str()));
            }
        }
        if self.go == self.stop {
            return Err(SignalPlanError::SharedGoStop(self.go.as_str()));
        }
        Ok(())
    }

    /// Signal used to deliver a directive to a controller.
    pub fn signal_for(&self, directive: Directive) -> Signal {
        match directive {
            Directive::Go => self.go,
            Directive::Stop => self.stop,
        }
    }
}

fn parse_signal(name: &str) -> Result<Signal, SignalPlanError> {
    let trimmed = name.trim().to_ascii_uppercase();
    let canonical = if trimmed.starts_with("SIG") {
        trimmed
    } else {
        format!("SIG{}", trimmed)
    };
    canonical
        .parse::<Signal>()
        .map_err(|_| SignalPlanError::UnknownSignal(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_plan_is_valid() {
        let plan = SignalPlan::default();
        assert!(plan.validate().is_ok());
        assert_eq!(plan.signal_for(Directive::Go), Signal::SIGUSR2);
        assert_eq!(plan.signal_for(Directive::Stop), Signal::SIGTERM);
    }

    #[test]
    fn parses_short_and_long_names() {
        let plan = SignalPlan::from_names("usr1", "sigint").unwrap();
        assert_eq!(
            plan,
            SignalPlan {
                go: Signal::SIGUSR1,
                stop: Signal::SIGINT,
            }
        );
    }

    #[test]
    fn rejects_shared_go_stop() {
        let err = SignalPlan::from_names("SIGUSR2", "usr2").unwrap_err();
        assert_eq!(err, SignalPlanError::SharedGoStop("SIGUSR2"));
    }

    #[test]
    fn rejects_uncatchable() {
        assert!(matches!(
            SignalPlan::from_names("SIGUSR2", "SIGKILL"),
            Err(SignalPlanError::Uncatchable("SIGKILL"))
        ));
    }

    #[test]
    fn rejects_unknown_names() {
        assert!(matches!(
            SignalPlan::from_names("SIGBOGUS", "SIGTERM"),
            Err(SignalPlanError::UnknownSignal(_))
        ));
    }
}
