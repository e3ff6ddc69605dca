use std::path::PathBuf;

use alchemy_domain::ScopePhase;

use crate::error::AlchemyError;

/// Process-level configuration, assembled from environment variables so an
/// embedding program doesn't need to thread a config struct through its own
/// plumbing just to run `alchemy`.
#[derive(Debug, Clone)]
pub struct Config {
    pub state_root: PathBuf,
    pub stage: String,
    pub passphrase: Option<String>,
    pub phase_override: Option<ScopePhase>,
}

impl Config {
    pub fn from_env() -> Result<Self, AlchemyError> {
        let state_root = std::env::var("STATE_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.alchemy"));
        let stage = std::env::var("STAGE").unwrap_or_else(|_| "dev".to_string());
        let passphrase = std::env::var("PASSPHRASE").ok();
        let phase_override = match std::env::var("PHASE") {
            Ok(s) => Some(parse_phase(&s)?),
            Err(_) => None,
        };

        Ok(Config {
            state_root,
            stage,
            passphrase,
            phase_override,
        })
    }
}

fn parse_phase(s: &str) -> Result<ScopePhase, AlchemyError> {
    match s {
        "up" => Ok(ScopePhase::Up),
        "destroy" => Ok(ScopePhase::Destroy),
        "plan" => Ok(ScopePhase::Plan),
        "read" => Ok(ScopePhase::Read),
        other => Err(AlchemyError::Config(format!("unknown PHASE override '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unknown_phase() {
        assert!(parse_phase("sideways").is_err());
    }

    #[test]
    fn accepts_every_documented_phase() {
        for s in ["up", "destroy", "plan", "read"] {
            assert!(parse_phase(s).is_ok());
        }
    }
}
