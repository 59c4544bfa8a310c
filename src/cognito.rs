use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::{
    operation::list_users::ListUsersOutput,
    types::UserType,
    Client,
};
use log::trace;

use crate::directory::{LookupCache, UserLookup};
use crate::error::DirectoryError;

/// Cognito user pools.
///
/// Lookups by `sub` through `cache()` are memoized, see `LookupCache`.
#[derive(Clone)]
pub struct Cognito {
    cache: LookupCache<CognitoLookup>,
}

/// One page of a user listing.
#[derive(Debug, Clone)]
pub struct UserPage {
    pub users: Vec<UserType>,
    /// Pass to the next `Cognito::list` call to continue; `None` on the last page.
    pub pagination_token: Option<String>,
}

/// Uncached lookup of users by `sub`, the upstream of `Cognito::cache`.
pub struct CognitoLookup {
    client: Client,
}

/// Builds a `ListUsers` filter matching exactly the given `sub`.
fn sub_filter(sub: &str) -> String {
    let escaped = sub.replace('\\', "\\\\").replace('"', "\\\"");
    format!("sub = \"{escaped}\"")
}

/// Turns the answer to a `sub` filtered `ListUsers` call into a lookup
/// result: an empty page means the user does not exist, a failed call is a
/// provider error.
fn first_user<E>(pool_id: &str, listing: Result<ListUsersOutput, E>) -> Result<UserType, DirectoryError>
where E: std::error::Error + Send + Sync + 'static
{
    let out = listing.with_context(|| format!("can't list users of pool {pool_id}"))?;
    out.users()
        .first()
        .cloned()
        .ok_or(DirectoryError::UserNotFound)
}

#[async_trait]
impl UserLookup for CognitoLookup {
    type Record = UserType;

    async fn lookup(&self, pool_id: &str, sub: &str) -> Result<UserType, DirectoryError> {
        trace!("looking up {sub} in user pool {pool_id}");
        let listing = self.client
            .list_users()
            .user_pool_id(pool_id)
            .filter(sub_filter(sub))
            .send()
            .await;

        first_user(pool_id, listing)
    }
}

impl Cognito {
    pub fn new(client: Client) -> Self {
        Self {
            cache: LookupCache::new(CognitoLookup { client })
        }
    }

    pub fn client(&self) -> &Client {
        &self.cache.provider().client
    }

    /// Cached lookups by `sub`.
    pub fn cache(&self) -> &LookupCache<CognitoLookup> {
        &self.cache
    }

    /// Gets a user by `sub`, always asking Cognito.
    pub async fn get(&self, pool_id: &str, sub: &str) -> Result<UserType, DirectoryError> {
        self.cache.provider().lookup(pool_id, sub).await
    }

    /// Estimated number of users in a user pool.
    pub async fn length(&self, pool_id: &str) -> Result<i32> {
        let out = self.client()
            .describe_user_pool()
            .user_pool_id(pool_id)
            .send()
            .await
            .with_context(|| format!("can't describe user pool {pool_id}"))?;

        Ok(out.user_pool().map_or(0, |p| p.estimated_number_of_users()))
    }

    /// Lists users of a pool, one page at a time.
    ///
    /// `filter` uses the `ListUsers` filter syntax, e.g. `family_name = "Reddy"`
    /// or `given_name ^= "Jon"`; an empty filter lists all users. `previous` is
    /// the pagination token of the previous page.
    pub async fn list(&self, pool_id: &str, limit: i32, filter: &str, previous: Option<String>) -> Result<UserPage> {
        let filter = Some(filter.to_string()).filter(|f| !f.is_empty());
        let out = self.client()
            .list_users()
            .user_pool_id(pool_id)
            .limit(limit)
            .set_filter(filter)
            .set_pagination_token(previous)
            .send()
            .await
            .with_context(|| format!("can't list users of pool {pool_id}"))?;

        Ok(UserPage {
            users: out.users().to_vec(),
            pagination_token: out.pagination_token().map(String::from),
        })
    }

    /// Flattens the attributes of a user into a map; attributes without a
    /// value map to the empty string.
    pub fn user_attributes(user: &UserType) -> HashMap<String, String> {
        user.attributes()
            .iter()
            .map(|a| (a.name().to_string(), a.value().unwrap_or_default().to_string()))
            .collect()
    }
}

#[test]
fn test_sub_filter() {
    assert_eq!(
        sub_filter("3f1c2f6e-59d8-4d2b-8a8e-0e6b7f6f0c11"),
        r#"sub = "3f1c2f6e-59d8-4d2b-8a8e-0e6b7f6f0c11""#
    );
    assert_eq!(sub_filter(r#"a"b\c"#), r#"sub = "a\"b\\c""#);
}

#[test]
fn test_user_attributes() {
    use aws_sdk_cognitoidentityprovider::types::AttributeType;

    let user = UserType::builder()
        .username("jon")
        .attributes(AttributeType::builder().name("email").value("jon@example.com").build().unwrap())
        .attributes(AttributeType::builder().name("given_name").build().unwrap())
        .build();

    let attributes = Cognito::user_attributes(&user);
    assert_eq!(attributes.len(), 2);
    assert_eq!(attributes["email"], "jon@example.com");
    assert_eq!(attributes["given_name"], "");
}

#[test]
fn test_first_user() {
    let empty: Result<ListUsersOutput, std::io::Error> = Ok(ListUsersOutput::builder().build());
    assert!(first_user("pool-1", empty).unwrap_err().is_not_found());

    let listing: Result<ListUsersOutput, std::io::Error> = Ok(ListUsersOutput::builder()
        .users(UserType::builder().username("jon").build())
        .users(UserType::builder().username("jane").build())
        .build());
    let user = first_user("pool-1", listing).unwrap();
    assert_eq!(user.username(), Some("jon"));

    let failed: Result<ListUsersOutput, std::io::Error> = Err(std::io::Error::new(
        std::io::ErrorKind::ConnectionReset,
        "connection reset",
    ));
    let err = first_user("pool-1", failed).unwrap_err();
    assert!(matches!(err, DirectoryError::Provider(_)));
    assert_eq!(err.to_string(), "can't list users of pool pool-1: connection reset");
}
