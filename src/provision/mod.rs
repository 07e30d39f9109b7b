//! Provider selection and the provisioning flows
//!
//! The operator picks a hosting target once per run; the two flows are
//! mutually exclusive and share no in-memory state. Everything a later
//! `deploy` invocation needs (registry service, credentials) is left behind
//! in the cluster itself.

pub mod gcp;
pub mod minikube;

use crate::exec::CommandRunner;
use crate::prompt::PromptSource;
use crate::{Error, Result};

/// The enumerated provider set offered to the operator
pub const PROVIDERS: [&str; 2] = ["minikube", "gcp"];

/// The operator's selected hosting target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    /// Local single-node development cluster
    Minikube,
    /// Managed cluster on Google Cloud
    Gcp,
}

impl ProviderChoice {
    /// Parse a prompted answer into a provider choice
    pub fn parse(answer: &str) -> Option<Self> {
        match answer {
            "minikube" => Some(Self::Minikube),
            "gcp" => Some(Self::Gcp),
            _ => None,
        }
    }
}

/// Ask for a provider and run the matching provisioning flow
///
/// An answer outside the enumerated set is rejected before any external
/// command is issued.
pub async fn run(runner: &dyn CommandRunner, prompt: &dyn PromptSource) -> Result<()> {
    let answer = prompt.pick_one("Which cloud provider are you hosting with", &PROVIDERS)?;
    match ProviderChoice::parse(&answer) {
        Some(ProviderChoice::Minikube) => minikube::provision(runner, prompt).await,
        Some(ProviderChoice::Gcp) => gcp::GcpProvisioner::new(runner, prompt).provision().await,
        None => Err(Error::precondition("no valid cloud provider selected")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::fake::FakeRunner;
    use crate::prompt::fake::ScriptedPrompt;

    #[test]
    fn only_the_enumerated_providers_parse() {
        assert_eq!(ProviderChoice::parse("minikube"), Some(ProviderChoice::Minikube));
        assert_eq!(ProviderChoice::parse("gcp"), Some(ProviderChoice::Gcp));
        assert_eq!(ProviderChoice::parse("aws"), None);
        assert_eq!(ProviderChoice::parse("GCP"), None);
        assert_eq!(ProviderChoice::parse(""), None);
    }

    #[tokio::test]
    async fn out_of_set_answer_mutates_nothing() {
        let runner = FakeRunner::new();
        let prompt = ScriptedPrompt::new().with_pick("aws");

        let err = run(&runner, &prompt).await.unwrap_err();

        assert!(matches!(err, Error::Precondition(_)));
        assert!(runner.commands().is_empty());
    }
}
