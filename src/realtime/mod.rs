//! Live delivery of notifications to connected clients.
//!
//! Both transports subscribe to the recipient's topic on connect and unsubscribe
//! when the connection goes away.

pub mod sse;
pub mod websocket;

use serde::Deserialize;
use utoipa::{IntoParams, ToSchema};

/// Query parameters for live connections
#[derive(Debug, Deserialize, ToSchema, IntoParams)]
#[into_params(style = Form, parameter_in = Query)]
pub struct StreamParams {
    /// User whose notifications are streamed
    #[schema(example = "1")]
    pub recipient_user_id: i64,
}
