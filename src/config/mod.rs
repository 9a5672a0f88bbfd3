//! Configuration module for Lydbot.
//!
//! Handles loading and managing application settings.

mod settings;

pub use settings::{
    AuditSettings, DeliverySettings, ExtractionSettings, GeneralSettings, ProgressSettings,
    Settings, TelegramSettings, TOKEN_ENV,
};
