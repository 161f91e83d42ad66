use snw_lab_abstract::ConfigError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArqError {
    #[error("end of communication already queued on this sender")]
    Terminated,
    #[error("failed to spawn {thread} thread")]
    Spawn {
        thread: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} thread panicked")]
    Panicked(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}
