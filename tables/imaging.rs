//! Imaging measurement tables: regional FDG-PET statistics and FreeSurfer
//! MRI volumes.

use super::{Frame, PatientKeyed, Rid, TableError, VisitKeyed};
use std::path::Path;

/// Per-region FDG-PET summary statistics, in feature order.
pub const PET_STATISTICS: [&str; 6] = ["MEAN", "MEDIAN", "MODE", "MIN", "MAX", "STDEV"];

/// One region of interest from one PET scan.
#[derive(Debug, Clone, PartialEq)]
pub struct PetReading {
    pub rid: Rid,
    pub phase: Option<String>,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub roi_name: String,
    pub roi_lat: String,
    /// Values for [`PET_STATISTICS`], in the same order.
    pub stats: [Option<f64>; 6],
}

impl PetReading {
    /// Region label used for the wide layout (`ROINAME` + `ROILAT`).
    pub fn region(&self) -> String {
        format!("{}{}", self.roi_name, self.roi_lat)
    }
}

impl PatientKeyed for PetReading {
    fn rid(&self) -> Rid {
        self.rid
    }
}

impl VisitKeyed for PetReading {
    fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }
    fn viscode(&self) -> &str {
        &self.viscode
    }
    fn viscode2(&self) -> Option<&str> {
        self.viscode2.as_deref()
    }
}

/// One FreeSurfer scan row. `measures` is aligned with
/// [`MriTable::measure_columns`].
#[derive(Debug, Clone, PartialEq)]
pub struct MriScan {
    pub rid: Rid,
    pub phase: Option<String>,
    pub viscode: String,
    pub viscode2: Option<String>,
    pub status: Option<String>,
    pub overall_qc: Option<String>,
    pub measures: Vec<Option<f64>>,
}

impl PatientKeyed for MriScan {
    fn rid(&self) -> Rid {
        self.rid
    }
}

impl VisitKeyed for MriScan {
    fn phase(&self) -> Option<&str> {
        self.phase.as_deref()
    }
    fn viscode(&self) -> &str {
        &self.viscode
    }
    fn viscode2(&self) -> Option<&str> {
        self.viscode2.as_deref()
    }
}

/// The FreeSurfer table: a variable-width panel of `ST*` measures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MriTable {
    pub measure_columns: Vec<String>,
    pub scans: Vec<MriScan>,
}

impl MriTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.measure_columns.iter().position(|column| column == name)
    }
}

/// FreeSurfer measure columns are prefixed `ST`; `STATUS` shares the prefix
/// but is the processing status.
fn is_measure_column(name: &str) -> bool {
    name.starts_with("ST") && name != "STATUS"
}

pub fn load_pet(path: &Path) -> Result<Vec<PetReading>, TableError> {
    let frame = Frame::read(path, "pet")?;
    let rids = frame.rids()?;
    let phases = frame.optional_strings("Phase")?;
    let viscodes = frame.required_strings("VISCODE")?;
    let viscodes2 = frame.optional_strings("VISCODE2")?;
    let roi_names = frame.required_strings("ROINAME")?;
    let roi_lats = frame.optional_strings("ROILAT")?;
    let stat_columns = PET_STATISTICS
        .iter()
        .map(|name| frame.floats(name))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((0..frame.height())
        .map(|i| {
            let mut stats = [None; 6];
            for (slot, column) in stats.iter_mut().zip(&stat_columns) {
                *slot = column[i];
            }
            PetReading {
                rid: rids[i],
                phase: phases[i].clone(),
                viscode: viscodes[i].clone(),
                viscode2: viscodes2[i].clone(),
                roi_name: roi_names[i].clone(),
                roi_lat: roi_lats[i].clone().unwrap_or_default(),
                stats,
            }
        })
        .collect())
}

pub fn load_mri(path: &Path) -> Result<MriTable, TableError> {
    let frame = Frame::read(path, "mri")?;
    let rids = frame.rids()?;
    let phases = frame.optional_strings("Phase")?;
    let viscodes = frame.required_strings("VISCODE")?;
    let viscodes2 = frame.optional_strings("VISCODE2")?;
    let status = frame.strings("STATUS")?;
    let overall_qc = frame.strings("OVERALLQC")?;

    let measure_columns: Vec<String> = frame
        .column_names()
        .into_iter()
        .filter(|name| is_measure_column(name))
        .collect();
    let measure_values = measure_columns
        .iter()
        .map(|name| frame.floats(name))
        .collect::<Result<Vec<_>, _>>()?;
    log::debug!("MRI table has {} measure columns", measure_columns.len());

    let scans = (0..frame.height())
        .map(|i| MriScan {
            rid: rids[i],
            phase: phases[i].clone(),
            viscode: viscodes[i].clone(),
            viscode2: viscodes2[i].clone(),
            status: status[i].clone(),
            overall_qc: overall_qc[i].clone(),
            measures: measure_values.iter().map(|column| column[i]).collect(),
        })
        .collect();

    Ok(MriTable {
        measure_columns,
        scans,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_csv;
    use super::*;

    #[test]
    fn test_load_pet_builds_regions_and_stats() {
        let content = "RID,VISCODE,VISCODE2,ROINAME,ROILAT,MEAN,MEDIAN,MODE,MIN,MAX,STDEV\n\
                       2,bl,bl,Angular,Left,1.1,1.2,1.3,0.4,2.0,0.3\n\
                       2,bl,bl,CingulumPost,Bilateral,1.5,,1.6,0.5,2.5,0.2";
        let file = create_test_csv(content).unwrap();
        let readings = load_pet(file.path()).unwrap();

        assert_eq!(readings.len(), 2);
        assert_eq!(readings[0].region(), "AngularLeft");
        assert_eq!(readings[1].region(), "CingulumPostBilateral");
        assert_eq!(readings[0].stats[0], Some(1.1));
        assert_eq!(readings[1].stats[1], None);
        assert_eq!(readings[0].phase, None);
    }

    #[test]
    fn test_load_mri_selects_measure_columns() {
        let content = "RID,VISCODE,VISCODE2,STATUS,OVERALLQC,ST10CV,ST11SV,EXAMDATE\n\
                       5,sc,sc,complete,Pass,1500000,2000,\n\
                       6,sc,sc,partial,Fail,1400000,,";
        let file = create_test_csv(content).unwrap();
        let table = load_mri(file.path()).unwrap();

        assert_eq!(table.measure_columns, vec!["ST10CV", "ST11SV"]);
        assert_eq!(table.column_index("ST11SV"), Some(1));
        assert_eq!(table.scans.len(), 2);
        assert_eq!(table.scans[0].status.as_deref(), Some("complete"));
        assert_eq!(table.scans[0].measures, vec![Some(1_500_000.0), Some(2000.0)]);
        assert_eq!(table.scans[1].measures[1], None);
    }
}
