use thiserror::Error;

/// Usage errors raised while building or running a channel pipeline.
///
/// These are always fatal: the pipeline is pure and synchronous, so nothing is
/// retried. Data-shape anomalies (nulls, NaN, empty bins) never produce one.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("missing channel: {0}")]
    MissingChannel(String),

    #[error("invalid {kind}: {name}")]
    Invalid { kind: &'static str, name: String },

    #[error("transforms cannot be applied after initializers")]
    TransformAfterInitializer,

    #[error("{0} function returned a mismatched length")]
    MismatchedLength(&'static str),

    #[error("channel sort requires an initializer")]
    ChannelSortRequiresInitializer,

    #[error("column `{0}` was read before it was populated")]
    UnpopulatedColumn(String),
}

impl PipelineError {
    pub fn invalid(kind: &'static str, name: impl ToString) -> Self {
        PipelineError::Invalid {
            kind,
            name: name.to_string(),
        }
    }
}
