mod auth;
mod client;
mod errors;
mod scopes;
mod transport;

pub use self::auth::{
    ensure_scopes, scopes_callback, AuthSession, AuthToken, CredentialSource, Reauthenticator,
};
pub use self::client::{Client, Endpoints};
pub use self::errors::{Error, GraphQlError, GraphQlErrorResponse};
pub use self::scopes::{
    check_scopes, ScopesCallback, ScopesLatch, OAUTH_APP_ID_HEADER, OAUTH_SCOPES_HEADER,
};
pub use self::transport::{
    add_header, add_header_func, replace_transport, verbose_log, ClientOption, Request, Response,
    Transport,
};
