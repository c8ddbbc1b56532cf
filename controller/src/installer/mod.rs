pub mod install;

pub use install::{InstallOutcome, Installer, PasswordResponder};
