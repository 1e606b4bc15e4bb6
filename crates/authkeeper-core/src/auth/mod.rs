//! Authentication module for managing sessions and credentials.
//!
//! This module provides:
//! - `CookieJar`: Key/value token storage (memory, JSON file, OS keychain)
//! - `CredentialStore`: Named accessors for the stored tokens
//! - `TokenClock`: JWT expiry arithmetic with a 5 minute safety margin
//! - `RefreshCoordinator`: Single-flight refresh with a self re-arming timer
//! - `SessionAuth`: Login, logout and session restore
//! - `RequestInterceptor`: One retry after refresh for rejected API calls
//! - `RouteGuard`: Redirect rules for signed-in and anonymous users

pub mod clock;
pub mod coordinator;
pub mod credentials;
pub mod guard;
pub mod interceptor;
pub mod jar;
pub mod session;
pub mod timer;
pub mod user;

pub use clock::{Clock, SystemClock, TokenClock, SAFETY_MARGIN_MS};
pub use coordinator::{RefreshCoordinator, RefreshPhase};
pub use credentials::{Credential, CredentialStore};
pub use guard::{Redirect, RouteGuard};
pub use interceptor::{AuthorizedClient, RequestInterceptor};
pub use jar::{CookieJar, FileJar, KeyringJar, MemoryJar};
pub use session::{SessionAuth, SessionAuthBuilder};
pub use timer::RefreshTimer;
pub use user::UserSlot;
