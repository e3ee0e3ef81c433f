//! Unified diagnostic change codes and the normalizer that reconciles the
//! two diagnostic coding schemes into them.

use crate::tables::{DxSummaryRecord, Rid};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Diagnostic transition observed at a visit, in the unified scheme.
/// Discriminants are the scheme's numeric codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChangeCode {
    NlToNl = 1,
    MciToMci = 2,
    AdToAd = 3,
    NlToMci = 4,
    MciToAd = 5,
    NlToAd = 6,
    MciToNl = 7,
    AdToMci = 8,
    AdToNl = 9,
}

impl ChangeCode {
    pub const ALL: [ChangeCode; 9] = [
        Self::NlToNl,
        Self::MciToMci,
        Self::AdToAd,
        Self::NlToMci,
        Self::MciToAd,
        Self::NlToAd,
        Self::MciToNl,
        Self::AdToMci,
        Self::AdToNl,
    ];

    pub fn from_code(code: i64) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.code() == code)
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    /// Diagnosis worsened at this visit.
    pub fn is_conversion(self) -> bool {
        matches!(self, Self::NlToMci | Self::MciToAd | Self::NlToAd)
    }

    /// Diagnosis improved at this visit.
    pub fn is_reversion(self) -> bool {
        matches!(self, Self::MciToNl | Self::AdToMci | Self::AdToNl)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NlToNl => "NL-NL",
            Self::MciToMci => "MCI-MCI",
            Self::AdToAd => "AD-AD",
            Self::NlToMci => "NL-MCI",
            Self::MciToAd => "MCI-AD",
            Self::NlToAd => "NL-AD",
            Self::MciToNl => "MCI-NL",
            Self::AdToMci => "AD-MCI",
            Self::AdToNl => "AD-NL",
        }
    }
}

impl fmt::Display for ChangeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which coding path produced a visit's change code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeSource {
    /// `DXCONV == 0` with `DXCURREN`.
    CurrentState,
    /// `DXCONV == 1` with `DXCONTYP`.
    Conversion,
    /// `DXCONV == 2` with `DXREV`.
    Reversion,
    /// Unified `DXCHANGE` recorded directly by later protocol phases.
    Recorded,
}

/// A diagnostic summary row with its unified change code.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedVisit {
    pub rid: Rid,
    pub phase: String,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub exam_date: Option<NaiveDate>,
    pub change: Option<ChangeCode>,
    pub source: Option<ChangeSource>,
}

fn current_state(dxcurren: i64) -> Option<ChangeCode> {
    match dxcurren {
        1 => Some(ChangeCode::NlToNl),
        2 => Some(ChangeCode::MciToMci),
        3 => Some(ChangeCode::AdToAd),
        _ => None,
    }
}

fn conversion(dxcontyp: i64) -> Option<ChangeCode> {
    match dxcontyp {
        1 => Some(ChangeCode::NlToMci),
        2 => Some(ChangeCode::NlToAd),
        3 => Some(ChangeCode::MciToAd),
        _ => None,
    }
}

fn reversion(dxrev: i64) -> Option<ChangeCode> {
    match dxrev {
        1 => Some(ChangeCode::MciToNl),
        2 => Some(ChangeCode::AdToMci),
        3 => Some(ChangeCode::AdToNl),
        _ => None,
    }
}

/// Applies the conversion-flag precedence to one row.
///
/// The three legacy branches are selected by distinct `DXCONV` values, so at
/// most one of them can fire. The recorded code is used only when none did.
pub fn normalize_change(record: &DxSummaryRecord) -> Option<(ChangeCode, ChangeSource)> {
    let legacy = match (record.dxconv, record.dxcurren, record.dxcontyp, record.dxrev) {
        (Some(0), Some(current), _, _) => {
            current_state(current).map(|code| (code, ChangeSource::CurrentState))
        }
        (Some(1), _, Some(kind), _) => {
            conversion(kind).map(|code| (code, ChangeSource::Conversion))
        }
        (Some(2), _, _, Some(kind)) => reversion(kind).map(|code| (code, ChangeSource::Reversion)),
        _ => None,
    };

    legacy.or_else(|| {
        record
            .dxchange
            .and_then(ChangeCode::from_code)
            .map(|code| (code, ChangeSource::Recorded))
    })
}

/// Produces the normalized table. The input is left untouched.
pub fn normalize_visits(records: &[DxSummaryRecord]) -> Vec<NormalizedVisit> {
    let normalized: Vec<NormalizedVisit> = records
        .iter()
        .map(|record| {
            let resolved = normalize_change(record);
            NormalizedVisit {
                rid: record.rid,
                phase: record.phase.clone(),
                viscode: record.viscode.clone(),
                viscode2: record.viscode2.clone(),
                exam_date: record.exam_date,
                change: resolved.map(|(code, _)| code),
                source: resolved.map(|(_, source)| source),
            }
        })
        .collect();

    let unresolved = normalized.iter().filter(|v| v.change.is_none()).count();
    log::info!(
        "Normalized {} diagnostic visits ({} without a change code)",
        normalized.len(),
        unresolved
    );
    normalized
}
