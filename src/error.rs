use thiserror::Error;

/// Everything that can abort a grid build or migration. All variants are fatal;
/// the pipeline never retries and never renames a partial file into place.
#[derive(Debug, Error)]
pub enum GridError {
    #[error("unknown model {0:?} (expected disk, sphere, or snapshot)")]
    UnknownModel(String),

    #[error("unknown grid type {0:?} (expected octree, spherical, or cylindrical)")]
    UnknownGridType(String),

    #[error("missing extent parameter `{name}` for {geometry} grid (not given on the command line and no model default)")]
    MissingExtent {
        geometry: &'static str,
        name: &'static str,
    },

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("mass target shape {target_rows}x{target_cols} does not match the model's {model_rows} distributions x {model_cols} regions")]
    ShapeMismatch {
        target_rows: usize,
        target_cols: usize,
        model_rows: usize,
        model_cols: usize,
    },

    #[error("corrupt grid: {0}")]
    CorruptGrid(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GridError>;
