//! Authentication and session core: credentials, sessions and the per-call gate.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod request_context;
mod credentials;
mod session;
mod gate;

pub use principal::{Identity, UserId};
pub use request_context::{CallContext, Metadata};
pub use credentials::{CredentialStore, PasswordHasherConfig};
pub use session::{Clock, ManualClock, SessionManager, SessionToken, SystemClock, TOKEN_BYTES};
pub use gate::{
    classify, AuthGate, MethodClass, LOGIN_METHOD, PUBLIC_METHODS, REFLECTION_V1ALPHA_LIST_METHOD,
    REFLECTION_V1ALPHA_METHOD, REFLECTION_V1_LIST_METHOD, REFLECTION_V1_METHOD, REGISTER_METHOD,
    SESSION_METADATA_KEY,
};
