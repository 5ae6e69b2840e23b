pub mod state;

pub use state::{ClientSettings, PollSettings, SettingsError, SettingsStore};
