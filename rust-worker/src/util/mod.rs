pub mod signal;

pub use signal::{cancel_on_signal, shutdown_signal};
