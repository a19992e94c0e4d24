mod store;

pub use store::{
    JsonPreferenceStore, MemoryPreferenceStore, PreferenceStore, PreferenceUpdate, Preferences,
};
