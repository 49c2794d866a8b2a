//! Static mapping from export sections to workbook locations.

use dossier_model::CellRef;

/// A section whose rows are appended to the end of a sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AppendTarget {
    pub section: &'static str,
    pub sheet: &'static str,
}

impl AppendTarget {
    pub const fn new(section: &'static str, sheet: &'static str) -> Self {
        Self { section, sheet }
    }
}

/// A section whose value overwrites one cell of the fixed-field sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedCellTarget {
    pub section: &'static str,
    pub cell: CellRef,
}

impl FixedCellTarget {
    pub const fn new(section: &'static str, cell: CellRef) -> Self {
        Self { section, cell }
    }
}

/// Where each recognized section goes.
///
/// Adding a section is a table edit; the merge engine only walks these tables.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MergeLayout {
    pub appendable: &'static [AppendTarget],
    pub fixed_sheet: &'static str,
    pub fixed_cells: &'static [FixedCellTarget],
}

const PATIENT_APPENDABLE: &[AppendTarget] = &[
    AppendTarget::new("Historique Séances", "Historique Séances"),
    AppendTarget::new("Analyse Clinique", "Analyse Clinique"),
    AppendTarget::new("Thérapeutiques", "Thérapeutiques"),
    AppendTarget::new("Lithothérapie", "Lithothérapie"),
    AppendTarget::new("Suivi", "Suivi"),
];

// Column B, rows 14..=17: the answers below the header row of "Infos Patient".
const PATIENT_FIXED_CELLS: &[FixedCellTarget] = &[
    FixedCellTarget::new("Demande", CellRef::new(13, 1)),
    FixedCellTarget::new("Famille", CellRef::new(14, 1)),
    FixedCellTarget::new("Sante", CellRef::new(15, 1)),
    FixedCellTarget::new("Situation", CellRef::new(16, 1)),
];

static PATIENT_RECORD: MergeLayout = MergeLayout {
    appendable: PATIENT_APPENDABLE,
    fixed_sheet: "Infos Patient",
    fixed_cells: PATIENT_FIXED_CELLS,
};

impl MergeLayout {
    /// Layout of the patient record workbook.
    pub fn patient_record() -> &'static MergeLayout {
        &PATIENT_RECORD
    }

    /// Every sheet the layout writes to, appendable sheets first.
    pub fn required_sheets(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.appendable
            .iter()
            .map(|target| target.sheet)
            .chain(std::iter::once(self.fixed_sheet))
    }

    /// Returns true when `section` is mapped by either table.
    pub fn recognizes(&self, section: &str) -> bool {
        self.appendable.iter().any(|t| t.section == section)
            || self.fixed_cells.iter().any(|t| t.section == section)
    }
}
