//! Common test utilities
//!
//! This module is shared across all integration tests

pub mod fixtures;

#[allow(unused_imports)]
pub use fixtures::{
    callback, signed_init_data, signed_widget_params, widget_payload, TestEnvironment, BOT_ID,
    BOT_TOKEN, CLIENT_ID,
};
