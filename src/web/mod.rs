//! Web service: submission form, live progress channel and session registry.
//!
//! ## Module Map
//!
//! ```text
//! ┌──────────┐   HTTP   ┌──────────────────────────────────────────────────┐
//! │ Browser  │ ───────> │  server.rs  (axum Router, ServerConfig)          │
//! │ (app.js) │ <─────── │    ├─ api.rs  (handlers, AppState, ApiError)     │
//! └──────────┘ WebSocket│    └─ ws.rs   (attach, replay, ping/pong loop)   │
//!                       │         │                                        │
//!                       │         │ runner::spawn_session()                │
//!                       │         v                                        │
//!                       │  runner.rs  (Pipeline run, packaging, linger)    │
//!                       │         │                                        │
//!                       │         │ ProgressReporter                       │
//!                       │         v                                        │
//!                       │  session.rs  (Progress state machine + channel)  │
//!                       │         │                                        │
//!                       │         v                                        │
//!                       │  registry.rs (live map, demoted cache, reaping)  │
//!                       │    └─ history.rs (MessageHistory, HistoryStore)  │
//!                       └──────────────────────────────────────────────────┘
//! ```
//!
//! | Module     | Responsibility                                          |
//! |------------|---------------------------------------------------------|
//! | `limit`    | `RequestLimiter` and the `ClientKey` extractor          |
//! | `embedded` | Browser client compiled into the binary (`rust-embed`)  |

pub mod api;
pub mod embedded;
pub mod history;
pub mod limit;
pub mod registry;
pub mod runner;
pub mod server;
pub mod session;
pub mod ws;

pub use registry::SessionRegistry;
pub use server::{ServerConfig, build_router, start_server};
pub use session::{Progress, ProgressSnapshot};
