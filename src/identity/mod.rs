//! Identity, credentials and access control.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod provider;
mod verifier;
mod api_keys;
mod role_authority;
mod authorizer;

pub use principal::{Identity, IdentityId};
pub use session::{IssuedToken, SessionClaims, SessionIssuer};
pub use provider::{DiscordIdentityProvider, ExternalProfile, IdentityProvider, LoginOutcome, LoginService, ProviderError};
pub use verifier::{Credential, CredentialKind, CredentialVerifier, Verified};
pub use api_keys::{ApiKey, ApiKeyService, ApiKeyView};
pub use role_authority::{DiscordRoleAuthority, GroupRole, Membership, RoleAuthority, RoleAuthorityError, RoleGateway};
pub use authorizer::{AuthorizationPolicy, Elevated};
