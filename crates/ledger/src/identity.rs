//! Environments and deployment attempt identifiers.

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// A deployment target.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Test,
    Prod,
}

impl Environment {
    /// Every supported environment, in promotion order.
    pub const ALL: [Environment; 3] = [Environment::Dev, Environment::Test, Environment::Prod];

    /// Directory and label name of this environment.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dev => "dev",
            Self::Test => "test",
            Self::Prod => "prod",
        }
    }

    /// Whether deployments here should ask for confirmation.
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Environment {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "test" => Ok(Self::Test),
            "prod" => Ok(Self::Prod),
            _ => Err(Error::UnknownEnvironment(s.to_string())),
        }
    }
}

const DATE_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Identifier of one deployment attempt.
///
/// Rendered as `<env>-<YYYYMMDD>-<HHMMSS>-<ordinal>`, which is a valid
/// Kubernetes resource name fragment. The ordinal is supplied by the caller
/// (typically the CI run number) and disambiguates attempts started within
/// the same second. Ordering is by timestamp, then ordinal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AttemptId {
    timestamp: DateTime<Utc>,
    ordinal: u64,
    environment: Environment,
}

impl AttemptId {
    /// Build an id from its parts. Sub-second precision is dropped.
    pub fn new(environment: Environment, timestamp: DateTime<Utc>, ordinal: u64) -> Self {
        Self {
            timestamp: timestamp.trunc_subsecs(0),
            ordinal,
            environment,
        }
    }

    /// Build an id for an attempt starting now.
    pub fn generate(environment: Environment, ordinal: u64) -> Self {
        Self::new(environment, Utc::now(), ordinal)
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }
}

impl fmt::Display for AttemptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:06}",
            self.environment,
            self.timestamp.format(DATE_FORMAT),
            self.ordinal
        )
    }
}

impl FromStr for AttemptId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::InvalidAttemptId(s.to_string());

        // env-YYYYMMDD-HHMMSS-ordinal
        let mut parts = s.splitn(2, '-');
        let env = parts.next().ok_or_else(invalid)?;
        let rest = parts.next().ok_or_else(invalid)?;
        let (stamp, ordinal) = rest.rsplit_once('-').ok_or_else(invalid)?;

        let environment = env.parse().map_err(|_| invalid())?;
        let ordinal = ordinal.parse().map_err(|_| invalid())?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, DATE_FORMAT)
            .map_err(|_| invalid())?
            .and_utc();

        Ok(Self::new(environment, timestamp, ordinal))
    }
}

impl From<AttemptId> for String {
    fn from(id: AttemptId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for AttemptId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}
