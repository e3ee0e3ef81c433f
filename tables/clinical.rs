//! Clinical tables: diagnostic summary, arm assignment, registry and the
//! data dictionary.

use super::{Frame, PatientKeyed, Rid, TableError, VisitKeyed};
use ahash::AHashMap;
use chrono::NaiveDate;
use std::path::Path;

/// One row of the diagnostic summary (`DXSUM_PDXCONV_ADNIALL`).
///
/// Early-protocol rows describe the diagnosis with `DXCONV` plus one of
/// `DXCURREN`/`DXCONTYP`/`DXREV`; later rows carry the unified `DXCHANGE`.
#[derive(Debug, Clone, PartialEq)]
pub struct DxSummaryRecord {
    pub rid: Rid,
    pub phase: String,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub exam_date: Option<NaiveDate>,
    pub dxconv: Option<i64>,
    pub dxcurren: Option<i64>,
    pub dxcontyp: Option<i64>,
    pub dxrev: Option<i64>,
    pub dxchange: Option<i64>,
}

impl DxSummaryRecord {
    /// A visit with every diagnostic field blank.
    pub fn visit(rid: Rid, phase: &str, viscode: &str, viscode2: Option<&str>) -> Self {
        Self {
            rid,
            phase: phase.to_string(),
            viscode: viscode.to_string(),
            viscode2: viscode2.map(str::to_string),
            exam_date: None,
            dxconv: None,
            dxcurren: None,
            dxcontyp: None,
            dxrev: None,
            dxchange: None,
        }
    }
}

impl PatientKeyed for DxSummaryRecord {
    fn rid(&self) -> Rid {
        self.rid
    }
}

impl VisitKeyed for DxSummaryRecord {
    fn phase(&self) -> Option<&str> {
        Some(&self.phase)
    }
    fn viscode(&self) -> &str {
        &self.viscode
    }
    fn viscode2(&self) -> Option<&str> {
        self.viscode2.as_deref()
    }
}

/// Arm assignment and enrollment status for one participant in one phase.
#[derive(Debug, Clone, PartialEq)]
pub struct ArmRecord {
    pub rid: Rid,
    pub phase: String,
    pub arm: Option<i64>,
    pub enrolled: Option<i64>,
}

/// One registry row: whether and when a scheduled visit took place.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryRecord {
    pub rid: Rid,
    pub phase: String,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub exam_date: Option<NaiveDate>,
    pub pt_status: Option<i64>,
    /// `RGCONDCT`: 1 when the visit was conducted.
    pub conducted: Option<i64>,
    pub status: Option<i64>,
    pub visit_type: Option<i64>,
}

impl RegistryRecord {
    pub fn conducted_visit(
        rid: Rid,
        phase: &str,
        viscode: &str,
        viscode2: Option<&str>,
        exam_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            rid,
            phase: phase.to_string(),
            viscode: viscode.to_string(),
            viscode2: viscode2.map(str::to_string),
            exam_date,
            pt_status: None,
            conducted: Some(1),
            status: None,
            visit_type: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DictionaryEntry {
    pub field: String,
    pub table: Option<String>,
    pub text: Option<String>,
}

/// Field descriptions from `DATADIC`, looked up by (table, field).
#[derive(Debug, Clone, Default)]
pub struct DataDictionary {
    entries: Vec<DictionaryEntry>,
    index: AHashMap<(String, String), usize>,
}

impl DataDictionary {
    pub fn new(entries: Vec<DictionaryEntry>) -> Self {
        let mut index = AHashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let table = entry.table.clone().unwrap_or_default();
            index.entry((table, entry.field.clone())).or_insert(i);
        }
        Self { entries, index }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Describes `field` of `table`, falling back to any table defining the field.
    pub fn describe(&self, table: &str, field: &str) -> Option<&str> {
        let exact = self
            .index
            .get(&(table.to_string(), field.to_string()))
            .map(|&i| &self.entries[i]);
        exact
            .or_else(|| self.entries.iter().find(|entry| entry.field == field))
            .and_then(|entry| entry.text.as_deref())
    }
}

pub fn load_dx_summary(path: &Path) -> Result<Vec<DxSummaryRecord>, TableError> {
    let frame = Frame::read(path, "diagnostic summary")?;
    let rids = frame.rids()?;
    let phases = frame.required_strings("Phase")?;
    let viscodes = frame.required_strings("VISCODE")?;
    let viscodes2 = frame.optional_strings("VISCODE2")?;
    let exam_dates = frame.dates("EXAMDATE")?;
    let dxconv = frame.codes("DXCONV")?;
    let dxcurren = frame.codes("DXCURREN")?;
    let dxcontyp = frame.codes("DXCONTYP")?;
    let dxrev = frame.codes("DXREV")?;
    let dxchange = frame.codes("DXCHANGE")?;

    let records = (0..frame.height())
        .map(|i| DxSummaryRecord {
            rid: rids[i],
            phase: phases[i].clone(),
            viscode: viscodes[i].clone(),
            viscode2: viscodes2[i].clone(),
            exam_date: exam_dates[i],
            dxconv: dxconv[i],
            dxcurren: dxcurren[i],
            dxcontyp: dxcontyp[i],
            dxrev: dxrev[i],
            dxchange: dxchange[i],
        })
        .collect();
    Ok(records)
}

pub fn load_arm(path: &Path) -> Result<Vec<ArmRecord>, TableError> {
    let frame = Frame::read(path, "arm")?;
    let rids = frame.rids()?;
    let phases = frame.required_strings("Phase")?;
    let arms = frame.codes("ARM")?;
    let enrolled = frame.codes("ENROLLED")?;

    Ok((0..frame.height())
        .map(|i| ArmRecord {
            rid: rids[i],
            phase: phases[i].clone(),
            arm: arms[i],
            enrolled: enrolled[i],
        })
        .collect())
}

pub fn load_registry(path: &Path) -> Result<Vec<RegistryRecord>, TableError> {
    let frame = Frame::read(path, "registry")?;
    let rids = frame.rids()?;
    let phases = frame.required_strings("Phase")?;
    let viscodes = frame.required_strings("VISCODE")?;
    let viscodes2 = frame.optional_strings("VISCODE2")?;
    let exam_dates = frame.dates("EXAMDATE")?;
    let pt_status = frame.codes("PTSTATUS")?;
    let conducted = frame.codes("RGCONDCT")?;
    let status = frame.codes("RGSTATUS")?;
    let visit_type = frame.codes("VISTYPE")?;

    Ok((0..frame.height())
        .map(|i| RegistryRecord {
            rid: rids[i],
            phase: phases[i].clone(),
            viscode: viscodes[i].clone(),
            viscode2: viscodes2[i].clone(),
            exam_date: exam_dates[i],
            pt_status: pt_status[i],
            conducted: conducted[i],
            status: status[i],
            visit_type: visit_type[i],
        })
        .collect())
}

pub fn load_data_dictionary(path: &Path) -> Result<DataDictionary, TableError> {
    let frame = Frame::read(path, "data dictionary")?;
    let fields = frame.strings("FLDNAME")?;
    let tables = frame.optional_strings("TBLNAME")?;
    let texts = frame.optional_strings("TEXT")?;

    let entries = fields
        .into_iter()
        .zip(tables)
        .zip(texts)
        .filter_map(|((field, table), text)| {
            field.map(|field| DictionaryEntry { field, table, text })
        })
        .collect();
    Ok(DataDictionary::new(entries))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_csv;
    use super::*;

    #[test]
    fn test_load_dx_summary_reads_both_coding_schemes() {
        let content = "RID,Phase,VISCODE,VISCODE2,EXAMDATE,DXCHANGE,DXCURREN,DXCONV,DXCONTYP,DXREV\n\
                       2,ADNI1,bl,bl,2005-09-08,,1,0,,\n\
                       2,ADNIGO,m60,m60,2010-09-22,1,,,,\n\
                       3,ADNI1,m06,m06,2006-05-02,,,1,3,";
        let file = create_test_csv(content).unwrap();
        let records = load_dx_summary(file.path()).unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[0].rid, 2);
        assert_eq!(records[0].viscode2.as_deref(), Some("bl"));
        assert_eq!(records[0].dxconv, Some(0));
        assert_eq!(records[0].dxcurren, Some(1));
        assert_eq!(records[0].dxchange, None);
        assert_eq!(records[1].phase, "ADNIGO");
        assert_eq!(records[1].dxchange, Some(1));
        assert_eq!(records[2].dxcontyp, Some(3));
        assert_eq!(
            records[2].exam_date,
            NaiveDate::from_ymd_opt(2006, 5, 2)
        );
    }

    #[test]
    fn test_load_registry_conducted_flag() {
        let content = "RID,Phase,VISCODE,VISCODE2,EXAMDATE,PTSTATUS,RGCONDCT,RGSTATUS,VISTYPE\n\
                       2,ADNI1,bl,bl,2005-09-08,1,1,,1\n\
                       2,ADNI1,m06,m06,,1,0,1,";
        let file = create_test_csv(content).unwrap();
        let records = load_registry(file.path()).unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].conducted, Some(1));
        assert_eq!(records[1].conducted, Some(0));
        assert_eq!(records[1].exam_date, None);
        assert_eq!(records[1].visit_type, None);
    }

    #[test]
    fn test_data_dictionary_prefers_exact_table() {
        let content = "FLDNAME,TBLNAME,TEXT\n\
                       MEAN,UCBERKELEYFDG,Mean FDG uptake\n\
                       MEAN,OTHER,Something else\n\
                       ST10CV,UCSFFSX,Intracranial volume";
        let file = create_test_csv(content).unwrap();
        let dictionary = load_data_dictionary(file.path()).unwrap();

        assert_eq!(dictionary.len(), 3);
        assert_eq!(
            dictionary.describe("UCBERKELEYFDG", "MEAN"),
            Some("Mean FDG uptake")
        );
        assert_eq!(dictionary.describe("OTHER", "MEAN"), Some("Something else"));
        assert_eq!(
            dictionary.describe("UNKNOWN", "ST10CV"),
            Some("Intracranial volume")
        );
        assert_eq!(dictionary.describe("UCSFFSX", "ST99XX"), None);
    }
}
