use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pipeline(#[from] switchboard_pipeline::Error),

    #[error(transparent)]
    Flow(#[from] switchboard_flow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
