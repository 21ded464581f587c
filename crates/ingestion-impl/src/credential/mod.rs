mod oauth2;
mod static_provider;

pub use oauth2::{AuthorizationCodeRefresher, ClientCredentialsRefresher};
pub use static_provider::StaticCredentialProvider;
