mod backfiller;
mod ethereum_adapter;
mod validator;

pub use backfiller::{BackfillError, HeaderBackfiller};
pub use ethereum_adapter::EthereumAdapter;
pub use validator::{HeaderValidator, ValidationWindow, ValidatorError, DEFAULT_VALIDATION_WINDOW};
