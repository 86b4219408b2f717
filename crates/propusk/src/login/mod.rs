//! Login challenge resolution and OAuth2 error mapping

pub mod oauth2;
pub mod resolver;
pub mod urls;

pub use oauth2::{OAuth2ErrorCode, Rejection, rejection_for};
pub use resolver::{CallbackContext, CallbackPayload, LoginOutcome, LoginResolver, ResolverConfig};
