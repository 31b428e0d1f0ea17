//! `DeployEnv`.

use std::env;
use std::str::FromStr;

use anyhow::Context;
use serde_with::DeserializeFromStr;
use strum::VariantArray;

/// Represents a validated `DEPLOY_ENVIRONMENT` configuration.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[derive(DeserializeFromStr, VariantArray)]
#[cfg_attr(
    any(test, feature = "test-utils"),
    derive(proptest_derive::Arbitrary)
)]
pub enum DeployEnv {
    /// "dev"
    Dev,
    /// "staging"
    Staging,
    /// "prod"
    Prod,
}

impl DeployEnv {
    /// Read a [`DeployEnv`] from env, or err if it was invalid / didn't
    /// exist.
    pub fn from_env() -> anyhow::Result<Self> {
        let value = env::var("DEPLOY_ENVIRONMENT")
            .context("DEPLOY_ENVIRONMENT was not set")?;
        Self::from_str(&value)
    }

    /// Shorthand to check whether this [`DeployEnv`] is dev.
    #[inline]
    pub fn is_dev(self) -> bool {
        matches!(self, Self::Dev)
    }

    /// Get a [`str`] containing "dev", "staging", or "prod".
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Staging => "staging",
            Self::Prod => "prod",
        }
    }
}

impl FromStr for DeployEnv {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "dev" => Ok(Self::Dev),
            "staging" => Ok(Self::Staging),
            "prod" => Ok(Self::Prod),
            _ => Err(anyhow::anyhow!(
                "Unrecognized DEPLOY_ENVIRONMENT '{s}': \
                 must be in ['dev', 'staging', 'prod']"
            )),
        }
    }
}

#[cfg(test)]
mod test {
    use strum::VariantArray;

    use super::*;

    #[test]
    fn deploy_env_roundtrip() {
        for env in DeployEnv::VARIANTS {
            assert_eq!(*env, DeployEnv::from_str(env.as_str()).unwrap());
        }
    }
}
