//! Credential store tests

use deployd::authn::users::{CredentialError, CredentialStore};
use deployd::authn::Role;
use deployd::filesys::dir::Dir;

#[tokio::test]
async fn test_add_and_verify() {
    let dir = Dir::create_temp_dir("deployd-users").await.unwrap();
    let store = CredentialStore::open(dir.file("users.json")).await.unwrap();

    store.add_user("alice", "hunter22", Role::Admin).await.unwrap();
    let user = store.verify("alice", "hunter22").await.unwrap();
    assert_eq!(user.role, Role::Admin);
    assert_ne!(user.password_hash, "hunter22");

    assert!(matches!(
        store.verify("alice", "hunter23").await,
        Err(CredentialError::InvalidLogin)
    ));
    assert!(matches!(
        store.verify("mallory", "hunter22").await,
        Err(CredentialError::InvalidLogin)
    ));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_usernames_are_unique() {
    let dir = Dir::create_temp_dir("deployd-users").await.unwrap();
    let store = CredentialStore::open(dir.file("users.json")).await.unwrap();

    store.add_user("bob", "password", Role::User).await.unwrap();
    assert!(matches!(
        store.add_user("bob", "other-password", Role::Admin).await,
        Err(CredentialError::UserExists(_))
    ));
    assert!(matches!(
        store.add_user("", "password", Role::User).await,
        Err(CredentialError::Invalid(_))
    ));
    assert!(matches!(
        store.add_user("carol", "abc", Role::User).await,
        Err(CredentialError::Invalid(_))
    ));

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = Dir::create_temp_dir("deployd-users").await.unwrap();
    {
        let store = CredentialStore::open(dir.file("users.json")).await.unwrap();
        store.add_user("alice", "hunter22", Role::User).await.unwrap();
        store.register_api_token("token-id-1").await.unwrap();
    }

    let store = CredentialStore::open(dir.file("users.json")).await.unwrap();
    assert!(store.verify("alice", "hunter22").await.is_ok());
    assert!(store.has_api_token("token-id-1").await);
    assert!(!store.has_api_token("token-id-2").await);

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_change_password() {
    let dir = Dir::create_temp_dir("deployd-users").await.unwrap();
    let store = CredentialStore::open(dir.file("users.json")).await.unwrap();
    store.add_user("alice", "hunter22", Role::User).await.unwrap();

    assert!(matches!(
        store.change_password("alice", "wrong", "newpass1").await,
        Err(CredentialError::InvalidLogin)
    ));
    store.change_password("alice", "hunter22", "newpass1").await.unwrap();
    assert!(store.verify("alice", "hunter22").await.is_err());
    assert!(store.verify("alice", "newpass1").await.is_ok());

    dir.delete().await.unwrap();
}

#[tokio::test]
async fn test_disable_and_reset() {
    let dir = Dir::create_temp_dir("deployd-users").await.unwrap();
    let store = CredentialStore::open(dir.file("users.json")).await.unwrap();
    store.add_user("alice", "hunter22", Role::User).await.unwrap();
    store.add_user("bob", "hunter22", Role::User).await.unwrap();
    store.register_api_token("token-id-1").await.unwrap();

    store.disable_user("alice").await.unwrap();
    assert!(store.verify("alice", "hunter22").await.is_err());
    assert!(store.list().await.iter().any(|u| u.username == "alice" && u.disabled));
    assert!(matches!(
        store.disable_user("nobody").await,
        Err(CredentialError::UnknownUser(_))
    ));

    store.reset().await.unwrap();
    assert!(store.list().await.is_empty());
    assert!(store.has_api_token("token-id-1").await);

    dir.delete().await.unwrap();
}
