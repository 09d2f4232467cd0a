//! Output modes and the payloads a model run produces.

use ndarray as nd;

/// Sentinel reported in scalar slots when no successful computation was possible.
pub const FAILURE_SENTINEL: f64 = -9999.;

/// The shape in which a model run should report its results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OutputMode {
    /// The maximum supersaturation reached.
    #[default]
    Scalar,
    /// Raw trajectories: one array for the parcel variables, one for the aerosol variables.
    ArrayPair,
    /// The same trajectories as two tables with named columns.
    TablePair,
}

/// A rectangular table of floats with named columns, one row per output time.
#[derive(Clone, Debug, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    data: nd::Array2<f64>,
}

impl Table {
    /// Make a table.
    ///
    /// # Panics
    ///
    /// If the number of column names doesn't match the number of data columns.
    pub fn new(columns: Vec<String>, data: nd::Array2<f64>) -> Self {
        assert_eq!(columns.len(), data.ncols());
        Self { columns, data }
    }

    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::new(Vec::new(), nd::Array2::zeros((0, 0)))
    }

    /// A single-row table containing NaN in its only column.
    pub fn nan_row(column: impl Into<String>) -> Self {
        Self::new(vec![column.into()], nd::Array2::from_elem((1, 1), f64::NAN))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn data(&self) -> nd::ArrayView2<'_, f64> {
        self.data.view()
    }

    pub fn num_rows(&self) -> usize {
        self.data.nrows()
    }

    /// Look up a column by name.
    pub fn column(&self, name: &str) -> Option<nd::ArrayView1<'_, f64>> {
        self.columns
            .iter()
            .position(|column| column == name)
            .map(|index| self.data.column(index))
    }
}

/// Results of a model run, shaped according to an [`OutputMode`].
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    Scalar(f64),
    ArrayPair {
        parcel: nd::Array2<f64>,
        aerosol: nd::Array2<f64>,
    },
    TablePair {
        parcel: Table,
        aerosol: Table,
    },
}

impl Payload {
    /// The result reported for a parcel without updraft: zero, or empty containers.
    pub fn zero(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Scalar => Self::Scalar(0.),
            OutputMode::ArrayPair => Self::ArrayPair {
                parcel: nd::Array2::zeros((0, 0)),
                aerosol: nd::Array2::zeros((0, 0)),
            },
            OutputMode::TablePair => Self::TablePair {
                parcel: Table::empty(),
                aerosol: Table::empty(),
            },
        }
    }

    /// The result reported when every integration strategy failed.
    pub fn failure(mode: OutputMode) -> Self {
        match mode {
            OutputMode::Scalar => Self::Scalar(FAILURE_SENTINEL),
            OutputMode::ArrayPair => Self::ArrayPair {
                parcel: nd::Array2::zeros((0, 0)),
                aerosol: nd::Array2::zeros((0, 0)),
            },
            OutputMode::TablePair => Self::TablePair {
                parcel: Table::nan_row("S"),
                aerosol: Table::nan_row("aerosol1"),
            },
        }
    }

    pub fn mode(&self) -> OutputMode {
        match self {
            Self::Scalar(_) => OutputMode::Scalar,
            Self::ArrayPair { .. } => OutputMode::ArrayPair,
            Self::TablePair { .. } => OutputMode::TablePair,
        }
    }

    /// The scalar value, if this is a scalar payload.
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(value) => Some(*value),
            _ => None,
        }
    }
}
