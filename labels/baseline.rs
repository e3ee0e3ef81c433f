//! Baseline classes and the diagnostic labels derived from them.

use super::codes::ChangeCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Arm id of the significant-memory-concern cohort.
pub const SMC_ARM: i64 = 11;
/// Arm id of the early-MCI cohort.
pub const EMCI_ARM: i64 = 10;
/// Enrollment statuses that count as enrolled at baseline.
pub const ACCEPTED_ENROLLMENT: [i64; 3] = [1, 2, 3];

/// Five-way diagnosis at the baseline visit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BaselineClass {
    Normal = 1,
    Smc = 2,
    Emci = 3,
    Lmci = 4,
    Ad = 5,
}

impl BaselineClass {
    /// Collapses the five baseline classes onto the three diagnostic classes.
    pub fn collapse(self) -> DxClass {
        match self {
            Self::Normal | Self::Smc => DxClass::Nl,
            Self::Emci | Self::Lmci => DxClass::Mci,
            Self::Ad => DxClass::Ad,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "NORMAL",
            Self::Smc => "SMC",
            Self::Emci => "EMCI",
            Self::Lmci => "LMCI",
            Self::Ad => "AD",
        }
    }
}

impl fmt::Display for BaselineClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assigns the baseline class from the baseline visit's change code and arm.
///
/// The three code groups are disjoint, so at most one rule fires.
pub fn classify_baseline(change: ChangeCode, arm: Option<i64>) -> BaselineClass {
    match change {
        ChangeCode::NlToNl | ChangeCode::MciToNl | ChangeCode::AdToNl => {
            if arm == Some(SMC_ARM) {
                BaselineClass::Smc
            } else {
                BaselineClass::Normal
            }
        }
        ChangeCode::MciToMci | ChangeCode::NlToMci | ChangeCode::AdToMci => {
            if arm == Some(EMCI_ARM) {
                BaselineClass::Emci
            } else {
                BaselineClass::Lmci
            }
        }
        ChangeCode::AdToAd | ChangeCode::MciToAd | ChangeCode::NlToAd => BaselineClass::Ad,
    }
}

/// Three-way diagnostic class. Discriminants are the label vector values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DxClass {
    Nl = 1,
    Mci = 2,
    Ad = 3,
}

impl DxClass {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nl => "NL",
            Self::Mci => "MCI",
            Self::Ad => "AD",
        }
    }
}

impl fmt::Display for DxClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DxClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nl" => Ok(Self::Nl),
            "mci" => Ok(Self::Mci),
            "ad" => Ok(Self::Ad),
            other => Err(format!(
                "Unknown diagnostic class '{other}'. Expected one of: nl, mci, ad."
            )),
        }
    }
}

/// Course of an MCI patient over the whole visit history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MciCourse {
    /// Converts to AD at some visit.
    Converter,
    /// Reverts to normal at some visit.
    Reverter,
    /// Stays MCI.
    Stable,
}

impl MciCourse {
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Converter => "C",
            Self::Reverter => "REV",
            Self::Stable => "NC",
        }
    }

    /// Scans a change-code history. Conversion wins over reversion, which
    /// wins over stability.
    pub fn from_history<I>(history: I) -> Option<Self>
    where
        I: IntoIterator<Item = ChangeCode>,
    {
        let mut converted = false;
        let mut reverted = false;
        let mut stable = false;
        for code in history {
            match code {
                ChangeCode::MciToAd => converted = true,
                ChangeCode::MciToNl => reverted = true,
                ChangeCode::MciToMci => stable = true,
                _ => {}
            }
        }
        if converted {
            Some(Self::Converter)
        } else if reverted {
            Some(Self::Reverter)
        } else if stable {
            Some(Self::Stable)
        } else {
            None
        }
    }
}

/// Patient-level diagnostic label: the collapsed baseline class, with the
/// MCI course attached when one is observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticLabel {
    Nl,
    Mci(Option<MciCourse>),
    Ad,
}

impl DiagnosticLabel {
    pub fn derive<I>(baseline: BaselineClass, history: I) -> Self
    where
        I: IntoIterator<Item = ChangeCode>,
    {
        match baseline.collapse() {
            DxClass::Nl => Self::Nl,
            DxClass::Mci => Self::Mci(MciCourse::from_history(history)),
            DxClass::Ad => Self::Ad,
        }
    }

    pub fn class(self) -> DxClass {
        match self {
            Self::Nl => DxClass::Nl,
            Self::Mci(_) => DxClass::Mci,
            Self::Ad => DxClass::Ad,
        }
    }
}

impl fmt::Display for DiagnosticLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mci(Some(course)) => write!(f, "MCI-{}", course.suffix()),
            other => f.write_str(other.class().as_str()),
        }
    }
}
