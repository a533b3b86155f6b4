#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::error::Error),

    #[error(transparent)]
    Config(#[from] kjob_config::error::Error),

    #[error(transparent)]
    Kube(#[from] kjob_kube::error::Error),
}
