//! Configuration: TOML settings for the relational and document backends.

mod settings;

pub use settings::{DocumentSettings, Settings, SettingsError, SqlSettings};
